//! Host fact cache: platform and build directory per host.
//!
//! Facts are resolved lazily and cached for the whole run. A host's kernel
//! cannot change mid-run and the build happens once, so nothing here is
//! ever invalidated.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::context::RunContext;
use crate::error::BenchError;
use crate::remote::Invocation;

/// Crash-dump leftovers removed from the build directory before use.
const CRASH_DUMPS: &str = "rm -f *.core core vgcore.*";

/// The two platform families the network controller knows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Platform {
    Linux,
    /// FreeBSD and other BSD-style kernels.
    FreeBsd,
}

impl Platform {
    /// Classify a `uname -s` answer.
    pub fn from_kernel(name: &str) -> Self {
        if name.trim() == "Linux" {
            Platform::Linux
        } else {
            Platform::FreeBsd
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostFact {
    pub platform: Platform,
    /// Raw `uname -s` output, used to name the build directory.
    pub kernel: String,
}

type Cells<T> = Mutex<HashMap<String, Arc<OnceCell<T>>>>;

#[derive(Default)]
pub struct HostFacts {
    facts: Cells<HostFact>,
    shared_build: OnceCell<String>,
    host_builds: Cells<String>,
}

impl HostFacts {
    /// Platform fact of `host` if it has been resolved already.
    pub fn cached(&self, host: &str) -> Option<HostFact> {
        cell_for(&self.facts, host).get().cloned()
    }
}

/// One cell per host, so concurrent lookups of the same host share a
/// single initialization.
fn cell_for<T>(cells: &Cells<T>, host: &str) -> Arc<OnceCell<T>> {
    match cells.lock() {
        Ok(mut cells) => cells.entry(host.to_string()).or_default().clone(),
        // A poisoned map only loses sharing; resolve again.
        Err(_) => Arc::new(OnceCell::new()),
    }
}

/// Platform of `host`, querying `uname -s` only on first use.
pub async fn resolve_fact(ctx: &RunContext, host: &str) -> Result<HostFact, BenchError> {
    let cell = cell_for(&ctx.facts().facts, host);
    let fact = cell.get_or_try_init(|| query_fact(ctx, host)).await?;
    Ok(fact.clone())
}

async fn query_fact(ctx: &RunContext, host: &str) -> Result<HostFact, BenchError> {
    let output = ctx.run(Invocation::new(host, "uname -s")).await?;
    let kernel = output.last_line().unwrap_or_default().to_string();
    let fact = HostFact {
        platform: Platform::from_kernel(&kernel),
        kernel,
    };
    info!(host, platform = ?fact.platform, kernel = %fact.kernel, "resolved host platform");
    Ok(fact)
}

pub async fn resolve_platform(ctx: &RunContext, host: &str) -> Result<Platform, BenchError> {
    Ok(resolve_fact(ctx, host).await?.platform)
}

/// Build directory for `host`, building the benchmarks on first use.
///
/// With a shared working directory the build runs once for the whole run;
/// otherwise once per host.
pub async fn resolve_build_dir(ctx: &RunContext, host: &str) -> Result<String, BenchError> {
    let dir = if ctx.config().shared_workdir {
        ctx.facts()
            .shared_build
            .get_or_try_init(|| build(ctx, host))
            .await?
            .clone()
    } else {
        let cell = cell_for(&ctx.facts().host_builds, host);
        cell.get_or_try_init(|| build(ctx, host)).await?.clone()
    };
    debug!(host, build_dir = %dir, "build directory resolved");
    Ok(dir)
}

async fn build(ctx: &RunContext, host: &str) -> Result<String, BenchError> {
    let fact = resolve_fact(ctx, host).await?;
    let config = ctx.config();
    let dir = format!("{}-benchmarking", fact.kernel);
    let command = format!(
        "mkdir -p {dir} && cd {dir} && {} && {} && pwd",
        config.build.configure, config.build.build
    );

    info!(host, dir = %dir, "building benchmarks");
    let output = ctx
        .run(Invocation::new(host, command).in_dir(&config.workdir))
        .await
        .map_err(|e| BenchError::Build {
            host: host.to_string(),
            reason: e.to_string(),
        })?;

    let path = output
        .last_line()
        .ok_or_else(|| BenchError::Build {
            host: host.to_string(),
            reason: "build did not report its output directory".to_string(),
        })?
        .to_string();

    ctx.run(
        Invocation::new(host, CRASH_DUMPS)
            .in_dir(&path)
            .sudo()
            .warn_only(),
    )
    .await?;

    info!(host, build_dir = %path, "build complete");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BenchConfig;
    use crate::remote::mock::{ScriptedExec, MOCK_BUILD_DIR};

    fn ctx_with(exec: Arc<ScriptedExec>, shared: bool) -> RunContext {
        let mut config = BenchConfig::default();
        config.shared_workdir = shared;
        RunContext::new(config, exec)
    }

    #[test]
    fn test_platform_from_kernel() {
        assert_eq!(Platform::from_kernel("Linux\n"), Platform::Linux);
        assert_eq!(Platform::from_kernel("FreeBSD"), Platform::FreeBsd);
        assert_eq!(Platform::from_kernel("Darwin"), Platform::FreeBsd);
    }

    #[tokio::test]
    async fn test_platform_queried_once() {
        let exec = Arc::new(ScriptedExec::new().kernel("six", "FreeBSD"));
        let ctx = ctx_with(exec.clone(), true);

        for _ in 0..3 {
            assert_eq!(resolve_platform(&ctx, "six").await.unwrap(), Platform::FreeBsd);
        }
        assert_eq!(exec.commands_on("six"), vec!["uname -s".to_string()]);
        assert_eq!(ctx.facts().cached("six").unwrap().kernel, "FreeBSD");
    }

    #[tokio::test]
    async fn test_concurrent_lookups_of_one_host_share_a_query() {
        let exec = Arc::new(ScriptedExec::new());
        let ctx = ctx_with(exec.clone(), true);

        let (a, b) = tokio::try_join!(
            resolve_platform(&ctx, "phobos1"),
            resolve_platform(&ctx, "phobos1")
        )
        .unwrap();
        assert_eq!(a, Platform::Linux);
        assert_eq!(a, b);
        assert_eq!(exec.commands_on("phobos1"), vec!["uname -s".to_string()]);
    }

    #[tokio::test]
    async fn test_shared_build_runs_once() {
        let exec = Arc::new(ScriptedExec::new());
        let ctx = ctx_with(exec.clone(), true);

        let a = resolve_build_dir(&ctx, "phobos1").await.unwrap();
        let b = resolve_build_dir(&ctx, "phobos2").await.unwrap();
        let c = resolve_build_dir(&ctx, "phobos1").await.unwrap();
        assert_eq!(a, MOCK_BUILD_DIR);
        assert_eq!(a, b);
        assert_eq!(b, c);

        let builds = exec
            .calls()
            .into_iter()
            .filter(|inv| inv.command.ends_with("&& pwd"))
            .count();
        assert_eq!(builds, 1);
    }

    #[tokio::test]
    async fn test_build_cleans_crash_dumps_in_build_dir() {
        let exec = Arc::new(ScriptedExec::new());
        let ctx = ctx_with(exec.clone(), true);
        resolve_build_dir(&ctx, "phobos1").await.unwrap();

        let calls = exec.calls();
        let build = calls.iter().find(|i| i.command.ends_with("&& pwd")).unwrap();
        assert_eq!(build.cwd.as_deref(), Some("~/warpcore"));
        assert!(build.command.starts_with("mkdir -p Linux-benchmarking"));
        let clean = calls.iter().find(|i| i.command == CRASH_DUMPS).unwrap();
        assert_eq!(clean.cwd.as_deref(), Some(MOCK_BUILD_DIR));
    }

    #[tokio::test]
    async fn test_per_host_build_when_not_shared() {
        let exec = Arc::new(ScriptedExec::new());
        let ctx = ctx_with(exec.clone(), false);
        resolve_build_dir(&ctx, "phobos1").await.unwrap();
        resolve_build_dir(&ctx, "phobos2").await.unwrap();
        resolve_build_dir(&ctx, "phobos2").await.unwrap();

        let builds: Vec<String> = exec
            .calls()
            .into_iter()
            .filter(|inv| inv.command.ends_with("&& pwd"))
            .map(|inv| inv.host)
            .collect();
        assert_eq!(builds, vec!["phobos1".to_string(), "phobos2".to_string()]);
    }

    #[tokio::test]
    async fn test_build_failure_is_fatal_and_not_cached() {
        let exec = Arc::new(ScriptedExec::new().fail_on("ninja", 1));
        let ctx = ctx_with(exec.clone(), true);

        let err = resolve_build_dir(&ctx, "phobos1").await.unwrap_err();
        assert!(matches!(err, BenchError::Build { .. }));
        assert!(ctx.facts().shared_build.get().is_none());
    }
}
