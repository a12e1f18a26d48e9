//! ssh-backed executor.
//!
//! Uses the system `ssh` binary through `tokio::process::Command` so that
//! the operator's `~/.ssh/config`, agent and ControlMaster settings apply
//! unchanged.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::process::Command;
use tracing::{debug, error, warn};

use super::{CommandOutput, Invocation, RemoteError, RemoteExec};
use crate::config::BenchConfig;

pub struct SshExec {
    /// Host id -> ssh destination; unknown hosts are used verbatim.
    destinations: HashMap<String, String>,
    connect_timeout: Duration,
    command_timeout: Duration,
}

impl SshExec {
    pub fn from_config(config: &BenchConfig) -> Self {
        let destinations = config
            .hosts
            .iter()
            .filter_map(|(id, h)| h.ssh.as_ref().map(|dest| (id.clone(), dest.clone())))
            .collect();
        Self {
            destinations,
            connect_timeout: Duration::from_secs(config.ssh.connect_timeout_secs),
            command_timeout: Duration::from_secs(config.ssh.command_timeout_secs),
        }
    }

    fn destination<'a>(&'a self, host: &'a str) -> &'a str {
        self.destinations.get(host).map(String::as_str).unwrap_or(host)
    }

    fn build_ssh_args(&self, cmd: &mut Command) {
        cmd.arg("-o").arg("BatchMode=yes");
        cmd.arg("-o")
            .arg(format!("ConnectTimeout={}", self.connect_timeout.as_secs()));
        cmd.arg("-o").arg("StrictHostKeyChecking=accept-new");
    }
}

#[async_trait::async_trait]
impl RemoteExec for SshExec {
    async fn exec(&self, inv: &Invocation) -> Result<CommandOutput, RemoteError> {
        let line = inv.shell_line(true);
        let destination = self.destination(&inv.host);

        debug!(
            host = %inv.host,
            destination = %destination,
            command = %line,
            "executing ssh command"
        );

        let start = Instant::now();
        let mut cmd = Command::new("ssh");
        self.build_ssh_args(&mut cmd);
        cmd.arg(destination).arg(&line);
        cmd.kill_on_drop(true);

        let output = match tokio::time::timeout(self.command_timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                error!(host = %inv.host, error = %e, "ssh failed to execute");
                return Err(RemoteError::Spawn {
                    host: inv.host.clone(),
                    reason: e.to_string(),
                });
            }
            Err(_) => {
                warn!(
                    host = %inv.host,
                    command = %line,
                    timeout_secs = self.command_timeout.as_secs(),
                    "ssh command timed out"
                );
                return Err(RemoteError::Timeout {
                    host: inv.host.clone(),
                    timeout_secs: self.command_timeout.as_secs(),
                });
            }
        };

        let result = CommandOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            duration: start.elapsed(),
        };

        debug!(
            host = %inv.host,
            exit_code = result.exit_code,
            duration_ms = result.duration.as_millis() as u64,
            "ssh command finished"
        );

        Ok(result)
    }
}
