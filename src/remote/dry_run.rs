//! Dry-run executor: log what would run, pretend it worked.

use tracing::info;

use super::mock::default_response;
use super::{CommandOutput, Invocation, RemoteError, RemoteExec};

pub struct DryRunExec;

#[async_trait::async_trait]
impl RemoteExec for DryRunExec {
    async fn exec(&self, inv: &Invocation) -> Result<CommandOutput, RemoteError> {
        info!(
            host = %inv.host,
            sudo = inv.sudo,
            command = %inv.shell_line(true),
            "dry-run"
        );
        Ok(default_response(inv))
    }
}
