//! Executor for hosts that are this machine.

use std::time::Instant;

use tokio::process::Command;
use tracing::debug;

use super::{CommandOutput, Invocation, RemoteError, RemoteExec};

/// Runs invocations through the local `sh`.
pub struct LocalExec {
    allow_sudo: bool,
}

impl LocalExec {
    pub fn new() -> Self {
        Self { allow_sudo: true }
    }

    /// Ignore the `sudo` bit; for unprivileged runs against scratch dirs.
    pub fn without_sudo() -> Self {
        Self { allow_sudo: false }
    }
}

impl Default for LocalExec {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl RemoteExec for LocalExec {
    async fn exec(&self, inv: &Invocation) -> Result<CommandOutput, RemoteError> {
        let line = inv.shell_line(self.allow_sudo);
        debug!(host = %inv.host, command = %line, "executing local command");

        let start = Instant::now();
        let output = Command::new("sh")
            .arg("-c")
            .arg(&line)
            .output()
            .await
            .map_err(|e| RemoteError::Spawn {
                host: inv.host.clone(),
                reason: e.to_string(),
            })?;

        Ok(CommandOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            duration: start.elapsed(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_local_exec_captures_exit_and_stdout() {
        let exec = LocalExec::without_sudo();
        let out = exec
            .exec(&Invocation::new("localhost", "echo hello; exit 3"))
            .await
            .unwrap();
        assert_eq!(out.exit_code, 3);
        assert_eq!(out.last_line(), Some("hello"));
    }

    #[tokio::test]
    async fn test_local_exec_runs_in_dir() {
        let dir = tempfile::tempdir().unwrap();
        let exec = LocalExec::without_sudo();
        let out = exec
            .exec(&Invocation::new("localhost", "pwd").in_dir(dir.path().to_string_lossy()))
            .await
            .unwrap();
        assert!(out.success());
        let reported = std::fs::canonicalize(out.last_line().unwrap()).unwrap();
        assert_eq!(reported, std::fs::canonicalize(dir.path()).unwrap());
    }
}
