//! Termination confirmation: kill benchmark processes and poll until none
//! remain on any involved host.
//!
//! Patterns are matched against process names (`pkill`/`pgrep` without
//! `-f`), so the probe never matches the shell that runs it.

use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::context::RunContext;
use crate::error::BenchError;
use crate::remote::{shell_quote, Invocation};

/// All involved hosts reported no matching process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Quiescence {
    /// Kill-and-probe rounds it took.
    pub attempts: u32,
}

/// Signal flag for `pkill` in round `attempt` of `max`: TERM for the first
/// half, KILL afterwards.
fn kill_flag(attempt: u32, max: u32) -> &'static str {
    if attempt > max / 2 {
        "-KILL "
    } else {
        ""
    }
}

/// Stop every process matching `pattern` on `hosts`.
///
/// Returns once a probe on every host finds nothing, or fails with
/// [`BenchError::StuckProcess`] after `stop.max_attempts` rounds.
pub async fn stop(ctx: &RunContext, hosts: &[&str], pattern: &str) -> Result<Quiescence, BenchError> {
    let mut hosts: Vec<&str> = hosts.to_vec();
    hosts.sort_unstable();
    hosts.dedup();

    let settings = &ctx.config().stop;
    let quoted = shell_quote(pattern);
    let quoted = quoted.as_str();

    join_all(hosts.iter().map(|h| kill(ctx, h, "", quoted))).await;

    for attempt in 1..=settings.max_attempts {
        let flag = kill_flag(attempt, settings.max_attempts);
        let rounds = join_all(hosts.iter().map(|h| async move {
            kill(ctx, h, flag, quoted).await;
            probe(ctx, h, quoted).await.map(|busy| (*h, busy))
        }))
        .await;

        let mut busy = Vec::new();
        for round in rounds {
            let (host, running) = round?;
            if running {
                busy.push(host);
            }
        }

        if busy.is_empty() {
            debug!(attempts = attempt, pattern, "processes stopped");
            return Ok(Quiescence { attempts: attempt });
        }

        if attempt == settings.max_attempts {
            warn!(hosts = ?busy, pattern, attempts = attempt, "processes refuse to stop");
            return Err(BenchError::StuckProcess {
                host: busy.join(","),
                pattern: pattern.to_string(),
                attempts: attempt,
            });
        }

        info!(hosts = ?busy, attempt, "waiting for benchmark processes to exit");
        tokio::time::sleep(settings.backoff()).await;
    }

    // max_attempts >= 1 is enforced by config validation
    Err(BenchError::StuckProcess {
        host: hosts.join(","),
        pattern: pattern.to_string(),
        attempts: 0,
    })
}

async fn kill(ctx: &RunContext, host: &str, flag: &str, quoted: &str) {
    // pkill exits 1 when nothing matched, which is the goal state
    let inv = Invocation::new(host, format!("pkill {flag}{quoted}")).sudo();
    if let Err(e) = ctx.probe(inv).await {
        warn!(host, error = %e, "kill could not be delivered");
    }
}

/// True if a matching process is still running on `host`.
async fn probe(ctx: &RunContext, host: &str, quoted: &str) -> Result<bool, BenchError> {
    let output = ctx
        .probe(Invocation::new(host, format!("pgrep {quoted}")))
        .await?;
    match output.exit_code {
        0 => Ok(true),
        1 => Ok(false),
        code => {
            warn!(host, exit_code = code, stderr = %output.stderr.trim(), "process probe failed");
            Ok(true)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BenchConfig;
    use crate::remote::mock::ScriptedExec;
    use crate::remote::CommandOutput;
    use std::sync::Arc;

    const PATTERN: &str = "(warp|shim)(ping|inetd)";

    fn ctx(exec: Arc<ScriptedExec>, max_attempts: u32) -> RunContext {
        let mut config = BenchConfig::default();
        config.stop.max_attempts = max_attempts;
        config.stop.backoff_ms = 0;
        RunContext::new(config, exec)
    }

    fn probes_on(exec: &ScriptedExec, host: &str) -> usize {
        exec.commands_on(host)
            .iter()
            .filter(|c| c.starts_with("pgrep"))
            .count()
    }

    #[tokio::test]
    async fn test_idle_hosts_quiesce_on_first_probe() {
        let exec = Arc::new(ScriptedExec::new());
        let ctx = ctx(exec.clone(), 5);
        let q = stop(&ctx, &["phobos1", "phobos2"], PATTERN).await.unwrap();
        assert_eq!(q.attempts, 1);
        assert_eq!(probes_on(&exec, "phobos1"), 1);
        assert_eq!(probes_on(&exec, "phobos2"), 1);
    }

    #[tokio::test]
    async fn test_polls_until_last_probe_reports_nothing() {
        let exec = Arc::new(ScriptedExec::new().busy_for("phobos2", 3));
        let ctx = ctx(exec.clone(), 10);
        let q = stop(&ctx, &["phobos1", "phobos2"], PATTERN).await.unwrap();
        assert_eq!(q.attempts, 4);
        assert_eq!(probes_on(&exec, "phobos2"), 4);
        assert_eq!(probes_on(&exec, "phobos1"), 4);
    }

    #[tokio::test]
    async fn test_stuck_process_is_fatal_after_bound() {
        let exec = Arc::new(ScriptedExec::new().busy_for("phobos1", u32::MAX));
        let ctx = ctx(exec.clone(), 4);
        let err = stop(&ctx, &["phobos1", "phobos2"], PATTERN).await.unwrap_err();
        match err {
            BenchError::StuckProcess { host, attempts, .. } => {
                assert_eq!(host, "phobos1");
                assert_eq!(attempts, 4);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(probes_on(&exec, "phobos1"), 4);
    }

    #[tokio::test]
    async fn test_kill_escalates_in_second_half() {
        let exec = Arc::new(ScriptedExec::new().busy_for("phobos1", 3));
        let ctx = ctx(exec.clone(), 4);
        stop(&ctx, &["phobos1"], PATTERN).await.unwrap();
        let kills: Vec<String> = exec
            .commands_on("phobos1")
            .into_iter()
            .filter(|c| c.starts_with("pkill"))
            .collect();
        assert_eq!(kills[0], format!("pkill {}", shell_quote(PATTERN)));
        assert!(kills.last().unwrap().starts_with("pkill -KILL "));
    }

    #[tokio::test]
    async fn test_same_host_probed_once_per_round() {
        let exec = Arc::new(ScriptedExec::new());
        let ctx = ctx(exec.clone(), 3);
        stop(&ctx, &["five", "five"], PATTERN).await.unwrap();
        assert_eq!(probes_on(&exec, "five"), 1);
    }

    #[tokio::test]
    async fn test_probe_error_exit_counts_as_busy() {
        let exec = Arc::new(
            ScriptedExec::new().on(|inv| inv.command.starts_with("pgrep").then(|| CommandOutput::exit(2))),
        );
        let ctx = ctx(exec, 2);
        assert!(stop(&ctx, &["phobos1"], PATTERN).await.is_err());
    }
}
