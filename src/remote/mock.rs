//! Scripted executor for deterministic tests.
//!
//! Records every invocation and answers from a list of rules, falling back
//! to [`default_response`], which describes a healthy Linux host with no
//! benchmark processes running.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use super::{CommandOutput, Invocation, RemoteError, RemoteExec};

type Rule = Box<dyn Fn(&Invocation) -> Option<CommandOutput> + Send + Sync>;

/// Build directory reported by [`default_response`].
pub const MOCK_BUILD_DIR: &str = "/home/bench/warpcore/Linux-benchmarking";

/// Canned answer for a command on an idle Linux host.
pub fn default_response(inv: &Invocation) -> CommandOutput {
    let cmd = inv.command.as_str();
    if cmd == "uname -s" {
        CommandOutput::ok("Linux\n")
    } else if cmd.starts_with("pgrep") {
        // pgrep: exit 1 means no process matched
        CommandOutput::exit(1)
    } else if cmd.ends_with("&& pwd") {
        CommandOutput::ok(format!("{}\n", MOCK_BUILD_DIR))
    } else if cmd == "ls /sys/class/net" {
        CommandOutput::ok("eth0\nlo\n")
    } else if cmd == "ifconfig -l" {
        CommandOutput::ok("ix0 lo0\n")
    } else {
        CommandOutput::ok("")
    }
}

#[derive(Default)]
pub struct ScriptedExec {
    rules: Vec<Rule>,
    calls: Mutex<Vec<Invocation>>,
}

impl ScriptedExec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a rule; the first rule returning `Some` wins.
    pub fn on<F>(mut self, rule: F) -> Self
    where
        F: Fn(&Invocation) -> Option<CommandOutput> + Send + Sync + 'static,
    {
        self.rules.push(Box::new(rule));
        self
    }

    /// Make every command containing `needle` exit with `code`.
    pub fn fail_on(self, needle: &str, code: i32) -> Self {
        let needle = needle.to_string();
        self.on(move |inv| inv.command.contains(&needle).then(|| CommandOutput::exit(code)))
    }

    /// Answer `uname -s` on `host` with `kernel`.
    pub fn kernel(self, host: &str, kernel: &str) -> Self {
        let host = host.to_string();
        let kernel = format!("{}\n", kernel);
        self.on(move |inv| {
            (inv.host == host && inv.command == "uname -s").then(|| CommandOutput::ok(kernel.clone()))
        })
    }

    /// Report a matching process on `host` for the first `polls` probes.
    pub fn busy_for(self, host: &str, polls: u32) -> Self {
        let host = host.to_string();
        let seen = Arc::new(AtomicU32::new(0));
        self.on(move |inv| {
            if inv.host != host || !inv.command.starts_with("pgrep") {
                return None;
            }
            let n = seen.fetch_add(1, Ordering::SeqCst);
            (n < polls).then(|| CommandOutput::ok("4242\n"))
        })
    }

    /// Every invocation so far, in order.
    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Commands run on `host`, in order.
    pub fn commands_on(&self, host: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|inv| inv.host == host)
            .map(|inv| inv.command)
            .collect()
    }

    pub fn clear(&self) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.clear();
        }
    }
}

#[async_trait::async_trait]
impl RemoteExec for ScriptedExec {
    async fn exec(&self, inv: &Invocation) -> Result<CommandOutput, RemoteError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(inv.clone());
        }
        let answer = self
            .rules
            .iter()
            .find_map(|rule| rule(inv))
            .unwrap_or_else(|| default_response(inv));
        Ok(answer)
    }
}
