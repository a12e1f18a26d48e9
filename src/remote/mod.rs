//! Remote command execution channel.
//!
//! Everything the orchestrator does on a benchmark host goes through
//! [`RemoteExec`]: a shell line, a target host, and two policy bits
//! (`sudo`, `warn_only`). Executors only report what happened; the
//! best-effort policy is applied by [`crate::context::RunContext::run`].

pub mod dry_run;
pub mod local;
pub mod mock;
pub mod ssh;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::BenchConfig;

pub use dry_run::DryRunExec;
pub use local::LocalExec;
pub use ssh::SshExec;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("failed to run command on {host}: {reason}")]
    Spawn { host: String, reason: String },

    #[error("command timed out after {timeout_secs}s on {host}")]
    Timeout { host: String, timeout_secs: u64 },

    #[error("command '{command}' failed on {host} with exit code {exit_code}: {stderr}")]
    CommandFailed {
        host: String,
        command: String,
        exit_code: i32,
        stderr: String,
    },
}

/// One command to run on one host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Invocation {
    pub host: String,
    pub command: String,
    /// Directory to `cd` into first; a leading `~/` is left to the shell.
    pub cwd: Option<String>,
    /// Run with elevated privileges.
    pub sudo: bool,
    /// A non-zero exit is a warning, not an error.
    pub warn_only: bool,
}

impl Invocation {
    pub fn new(host: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            command: command.into(),
            cwd: None,
            sudo: false,
            warn_only: false,
        }
    }

    pub fn sudo(mut self) -> Self {
        self.sudo = true;
        self
    }

    pub fn warn_only(mut self) -> Self {
        self.warn_only = true;
        self
    }

    pub fn in_dir(mut self, dir: impl Into<String>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Render the full shell line, applying `cwd` and (optionally) `sudo`.
    ///
    /// The privileged part runs under `sh -c` so redirections are performed
    /// with the same privileges as the command.
    pub fn shell_line(&self, allow_sudo: bool) -> String {
        let body = if self.sudo && allow_sudo {
            format!("sudo -n sh -c {}", shell_quote(&self.command))
        } else {
            self.command.clone()
        };
        match &self.cwd {
            Some(dir) => format!("cd {} && {}", quote_dir(dir), body),
            None => body,
        }
    }
}

/// Single-quote a string for POSIX `sh`.
pub fn shell_quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('\'');
    for ch in value.chars() {
        if ch == '\'' {
            out.push_str("'\"'\"'");
        } else {
            out.push(ch);
        }
    }
    out.push('\'');
    out
}

fn quote_dir(dir: &str) -> String {
    match dir.strip_prefix("~/") {
        Some(rest) if rest.is_empty() => "~".to_string(),
        Some(rest) => format!("~/{}", shell_quote(rest)),
        None if dir == "~" => "~".to_string(),
        None => shell_quote(dir),
    }
}

/// Outcome of a command that ran to completion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    #[serde(with = "duration_millis")]
    pub duration: Duration,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.into(),
            ..Self::default()
        }
    }

    pub fn exit(exit_code: i32) -> Self {
        Self {
            exit_code,
            ..Self::default()
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Last non-empty stdout line, trimmed.
    pub fn last_line(&self) -> Option<&str> {
        self.stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .last()
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Trait for every way of running a command on a benchmark host.
#[async_trait::async_trait]
pub trait RemoteExec: Send + Sync {
    /// Run the invocation and report its exit status and output.
    ///
    /// Only transport failures are errors; a non-zero exit is returned as
    /// a normal [`CommandOutput`].
    async fn exec(&self, inv: &Invocation) -> Result<CommandOutput, RemoteError>;
}

/// Dispatches to the local shell or to ssh depending on the host entry.
pub struct HostRouter {
    ssh: SshExec,
    local: LocalExec,
    local_hosts: HashSet<String>,
}

impl HostRouter {
    pub fn new(config: &BenchConfig) -> Self {
        let local_hosts = config
            .hosts
            .iter()
            .filter(|(_, h)| h.local)
            .map(|(id, _)| id.clone())
            .collect();
        Self {
            ssh: SshExec::from_config(config),
            local: LocalExec::new(),
            local_hosts,
        }
    }
}

#[async_trait::async_trait]
impl RemoteExec for HostRouter {
    async fn exec(&self, inv: &Invocation) -> Result<CommandOutput, RemoteError> {
        if self.local_hosts.contains(&inv.host) {
            self.local.exec(inv).await
        } else {
            self.ssh.exec(inv).await
        }
    }
}

/// Build the executor for a run.
pub fn executor_for(config: &BenchConfig, dry_run: bool) -> Arc<dyn RemoteExec> {
    if dry_run {
        Arc::new(DryRunExec)
    } else {
        Arc::new(HostRouter::new(config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_quote_embedded_quote() {
        assert_eq!(shell_quote("it's"), "'it'\"'\"'s'");
        assert_eq!(shell_quote("plain"), "'plain'");
    }

    #[test]
    fn test_shell_line_sudo_and_cwd() {
        let inv = Invocation::new("h1", "echo 4096 > /sys/module/netmap/parameters/if_size")
            .sudo()
            .in_dir("~/warpcore");
        assert_eq!(
            inv.shell_line(true),
            "cd ~/'warpcore' && sudo -n sh -c 'echo 4096 > /sys/module/netmap/parameters/if_size'"
        );
        assert_eq!(
            inv.shell_line(false),
            "cd ~/'warpcore' && echo 4096 > /sys/module/netmap/parameters/if_size"
        );
    }

    #[test]
    fn test_shell_line_absolute_dir() {
        let inv = Invocation::new("h1", "ls").in_dir("/tmp/bench dir");
        assert_eq!(inv.shell_line(true), "cd '/tmp/bench dir' && ls");
    }

    #[test]
    fn test_last_line_skips_blank() {
        let out = CommandOutput::ok("-- Build files written\nninja: no work to do.\n/home/u/warpcore/Linux-benchmarking\n\n");
        assert_eq!(out.last_line(), Some("/home/u/warpcore/Linux-benchmarking"));
        assert_eq!(CommandOutput::ok("").last_line(), None);
    }
}
