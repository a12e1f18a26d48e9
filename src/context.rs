//! Per-run context passed by reference into every operation.

use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tracing::warn;

use crate::config::BenchConfig;
use crate::error::BenchError;
use crate::hosts::HostFacts;
use crate::remote::{CommandOutput, Invocation, RemoteError, RemoteExec};

/// A best-effort command that exited non-zero.
#[derive(Debug, Clone, Serialize)]
pub struct Warning {
    pub host: String,
    pub command: String,
    pub exit_code: i32,
    pub stderr: String,
}

pub struct RunContext {
    config: BenchConfig,
    exec: Arc<dyn RemoteExec>,
    facts: HostFacts,
    warnings: Mutex<Vec<Warning>>,
}

impl RunContext {
    pub fn new(config: BenchConfig, exec: Arc<dyn RemoteExec>) -> Self {
        Self {
            config,
            exec,
            facts: HostFacts::default(),
            warnings: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &BenchConfig {
        &self.config
    }

    pub fn facts(&self) -> &HostFacts {
        &self.facts
    }

    /// Run an invocation under the run's failure policy.
    ///
    /// A non-zero exit of a `warn_only` invocation is logged, recorded and
    /// returned as `Ok`; for any other invocation it is an error.
    pub async fn run(&self, inv: Invocation) -> Result<CommandOutput, RemoteError> {
        let output = self.exec.exec(&inv).await?;
        if output.success() {
            return Ok(output);
        }

        if inv.warn_only {
            warn!(
                host = %inv.host,
                command = %inv.command,
                exit_code = output.exit_code,
                stderr = %output.stderr.trim(),
                "best-effort command failed"
            );
            self.record_warning(&inv, &output);
            Ok(output)
        } else {
            Err(RemoteError::CommandFailed {
                host: inv.host,
                command: inv.command,
                exit_code: output.exit_code,
                stderr: output.stderr.trim().to_string(),
            })
        }
    }

    /// Run without applying any exit-status policy (for probes whose exit
    /// status is the answer).
    pub async fn probe(&self, inv: Invocation) -> Result<CommandOutput, RemoteError> {
        self.exec.exec(&inv).await
    }

    fn record_warning(&self, inv: &Invocation, output: &CommandOutput) {
        if let Ok(mut warnings) = self.warnings.lock() {
            warnings.push(Warning {
                host: inv.host.clone(),
                command: inv.command.clone(),
                exit_code: output.exit_code,
                stderr: output.stderr.trim().to_string(),
            });
        }
    }

    pub fn warnings(&self) -> Vec<Warning> {
        self.warnings.lock().map(|w| w.clone()).unwrap_or_default()
    }

    /// Static benchmark address of `host`.
    pub fn address(&self, host: &str) -> Result<Ipv4Addr, BenchError> {
        self.config
            .hosts
            .get(host)
            .map(|h| h.address)
            .ok_or_else(|| BenchError::UnknownHost(host.to_string()))
    }
}
