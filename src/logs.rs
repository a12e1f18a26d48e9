//! Log lifecycle: clear old artifacts before a run, prune logs after each
//! trial.

use futures::future::join_all;
use tracing::{debug, info};

use crate::context::RunContext;
use crate::error::BenchError;
use crate::remote::{shell_quote, Invocation};

/// Profiler banner printed on every profiled exit; carries no benchmark data.
pub const PROFILER_NOISE: &str = "^PROFILE: interrupts/evictions/bytes";

/// Artifact suffixes owned by the benchmarks.
const ARTIFACT_SUFFIXES: [&str; 3] = ["log", "txt", "prof"];

/// Shell line removing every artifact of `kinds` from the current directory.
pub fn clear_command(kinds: &[String]) -> String {
    let globs: Vec<String> = kinds
        .iter()
        .flat_map(|kind| ARTIFACT_SUFFIXES.iter().map(move |ext| format!("{kind}*.{ext}")))
        .collect();
    format!("rm -f {}", globs.join(" "))
}

/// Shell line stripping profiler noise from `file` and deleting it if
/// nothing else is left. A missing file is not an error.
pub fn prune_command(file: &str) -> String {
    let f = shell_quote(file);
    let bak = shell_quote(&format!("{file}.bak"));
    let noise = PROFILER_NOISE.replace('/', "\\/");
    format!(
        "[ -f {f} ] || exit 0; sed -i.bak '/{noise}/d' {f} && rm -f {bak}; [ -s {f} ] || rm -f {f}"
    )
}

/// Delete all previous logs, results and profiles in the working directory
/// of `hosts`. With a shared working directory only the first host is used.
pub async fn clear_logs(ctx: &RunContext, hosts: &[&str]) -> Result<(), BenchError> {
    let config = ctx.config();
    let mut hosts: Vec<&str> = hosts.to_vec();
    hosts.dedup();
    if config.shared_workdir {
        hosts.truncate(1);
    }

    let command = clear_command(&config.kinds);
    info!(hosts = ?hosts, workdir = %config.workdir, "clearing previous benchmark artifacts");

    let results = join_all(hosts.iter().map(|host| {
        ctx.run(
            Invocation::new(*host, command.clone())
                .in_dir(&config.workdir)
                .sudo()
                .warn_only(),
        )
    }))
    .await;
    for result in results {
        result?;
    }
    Ok(())
}

/// Strip noise from, and drop if empty, `file` in the working directory of
/// `host`.
pub async fn prune_log(ctx: &RunContext, host: &str, file: &str) -> Result<(), BenchError> {
    debug!(host, file, "pruning log");
    ctx.run(
        Invocation::new(host, prune_command(file))
            .in_dir(&ctx.config().workdir)
            .sudo()
            .warn_only(),
    )
    .await?;
    Ok(())
}
