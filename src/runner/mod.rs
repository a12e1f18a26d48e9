//! Benchmark runner: drives the test matrix one test case and one trial at
//! a time, and provides the recovery operations used by the CLI.

pub mod trial;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::context::{RunContext, Warning};
use crate::error::{BenchError, Step};
use crate::hosts::{resolve_build_dir, resolve_platform};
use crate::logs;
use crate::matrix::{self, Artifacts, BenchmarkVariant, TestCase};
use crate::netcfg;
use crate::roles::{Role, RoleBinding};
use crate::stop;

pub use trial::{ProcessSpec, TrialMachine, TrialState, DISCARD};

/// Outcome of one executed trial.
#[derive(Debug, Clone, Serialize)]
pub struct TrialRecord {
    pub case: String,
    pub speed: u32,
    pub variant: BenchmarkVariant,
    pub accelerated: bool,
    pub artifacts: Artifacts,
    pub states: Vec<TrialState>,
    pub stop_attempts: u32,
}

/// Everything a full run did, printed with `--json`.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub trials: Vec<TrialRecord>,
    pub warnings: Vec<Warning>,
}

/// Build directories of both role hosts for one test case.
struct BuildDirs {
    client: String,
    server: String,
}

impl BuildDirs {
    fn get(&self, role: Role) -> &str {
        match role {
            Role::Client => &self.client,
            Role::Server => &self.server,
        }
    }
}

trait AtStep<T> {
    fn at(self, case: &str, step: Step) -> Result<T, BenchError>;
}

impl<T, E: Into<BenchError>> AtStep<T> for Result<T, E> {
    fn at(self, case: &str, step: Step) -> Result<T, BenchError> {
        self.map_err(|e| BenchError::at(e.into(), case, step))
    }
}

/// Run the whole matrix: clear old artifacts, then every test case in
/// order. The first fatal error aborts the run.
pub async fn run_bench(ctx: &RunContext) -> Result<RunReport, BenchError> {
    let run_id = Uuid::new_v4();
    let started_at = Utc::now();
    let cases = matrix::test_cases(ctx.config());
    info!(%run_id, cases = cases.len(), kinds = ?ctx.config().kinds, "starting benchmark run");

    let hosts = matrix::matrix_hosts(&cases);
    logs::clear_logs(ctx, &hosts).await.at("run", Step::ClearLogs)?;

    let mut trials = Vec::new();
    for case in &cases {
        trials.extend(run_case(ctx, case).await?);
    }

    let warnings = ctx.warnings();
    info!(
        %run_id,
        trials = trials.len(),
        warnings = warnings.len(),
        "benchmark run complete"
    );
    Ok(RunReport {
        run_id,
        started_at,
        finished_at: Utc::now(),
        trials,
        warnings,
    })
}

/// Run every trial of one test case, bracketed by network setup and
/// teardown.
pub async fn run_case(ctx: &RunContext, case: &TestCase) -> Result<Vec<TrialRecord>, BenchError> {
    let label = case.label();
    let label = label.as_str();
    let binding = RoleBinding::for_case(case);
    let client = binding.host(Role::Client);
    let server = binding.host(Role::Server);
    info!(case = label, "starting test case");

    tokio::try_join!(resolve_platform(ctx, client), resolve_platform(ctx, server))
        .at(label, Step::ResolveHosts)?;
    let builds = BuildDirs {
        client: resolve_build_dir(ctx, client).await.at(label, Step::Build)?,
        server: resolve_build_dir(ctx, server).await.at(label, Step::Build)?,
    };

    let pattern = ctx.config().process_pattern();
    stop::stop(ctx, &[client, server], &pattern)
        .await
        .at(label, Step::Stop)?;
    netcfg::netmap_unconfigure(ctx, &binding)
        .await
        .at(label, Step::NetmapUnconfigure)?;
    netcfg::unconfig(ctx, &binding).await.at(label, Step::Unconfigure)?;
    netcfg::configure(ctx, &binding).await.at(label, Step::Configure)?;

    let mut records = Vec::new();
    for kind in &ctx.config().kinds {
        let variants = matrix::variants(std::slice::from_ref(kind));
        if ctx.config().is_accelerated(kind) {
            netcfg::netmap_configure(ctx, &binding)
                .await
                .at(label, Step::NetmapConfigure)?;
            let outcome = run_trials(ctx, case, &binding, &builds, &variants, &pattern).await;
            // The accelerated mode is left even when a trial failed.
            let closed = netcfg::netmap_unconfigure(ctx, &binding)
                .await
                .at(label, Step::NetmapUnconfigure);
            if let (Err(e), Err(close)) = (&outcome, &closed) {
                warn!(case = label, error = %e, close_error = %close, "netmap teardown failed after trial error");
            }
            records.extend(outcome?);
            closed?;
        } else {
            records.extend(run_trials(ctx, case, &binding, &builds, &variants, &pattern).await?);
        }
    }

    netcfg::unconfig(ctx, &binding).await.at(label, Step::Unconfigure)?;
    info!(case = label, trials = records.len(), "test case complete");
    Ok(records)
}

async fn run_trials(
    ctx: &RunContext,
    case: &TestCase,
    binding: &RoleBinding,
    builds: &BuildDirs,
    variants: &[BenchmarkVariant],
    pattern: &str,
) -> Result<Vec<TrialRecord>, BenchError> {
    let mut records = Vec::with_capacity(variants.len());
    for variant in variants {
        records.push(run_trial(ctx, case, binding, builds, variant, pattern).await?);
    }
    Ok(records)
}

async fn run_trial(
    ctx: &RunContext,
    case: &TestCase,
    binding: &RoleBinding,
    builds: &BuildDirs,
    variant: &BenchmarkVariant,
    pattern: &str,
) -> Result<TrialRecord, BenchError> {
    let label = case.label();
    let label = label.as_str();
    let config = ctx.config();
    let artifacts = Artifacts::for_trial(variant, case.speed);
    let mut machine = TrialMachine::new();
    info!(
        case = label,
        kind = %variant.kind,
        checksum = variant.checksum,
        busywait = variant.busywait,
        "starting trial"
    );

    let server = process_spec(ctx, case, binding, builds, variant, &artifacts, Role::Server)
        .await
        .at(label, Step::StartServer)?;
    ctx.run(server.invocation()).await.at(label, Step::StartServer)?;
    machine.transition(TrialState::ServerStarted).at(label, Step::StartServer)?;

    let settle = config.settle();
    if !settle.is_zero() {
        tokio::time::sleep(settle).await;
    }

    let client = process_spec(ctx, case, binding, builds, variant, &artifacts, Role::Client)
        .await
        .at(label, Step::StartClient)?;
    machine.transition(TrialState::ClientRunning).at(label, Step::StartClient)?;
    ctx.run(client.invocation()).await.at(label, Step::StartClient)?;

    machine.transition(TrialState::Stopping).at(label, Step::Stop)?;
    let quiet = stop::stop(ctx, &[binding.host(Role::Client), binding.host(Role::Server)], pattern)
        .await
        .at(label, Step::Stop)?;

    if config.keep_logs {
        logs::prune_log(ctx, binding.host(Role::Server), &artifacts.server_log)
            .await
            .at(label, Step::PruneLogs)?;
        logs::prune_log(ctx, binding.host(Role::Client), &artifacts.client_log)
            .await
            .at(label, Step::PruneLogs)?;
    }
    machine.transition(TrialState::Idle).at(label, Step::PruneLogs)?;

    Ok(TrialRecord {
        case: label.to_string(),
        speed: case.speed,
        variant: variant.clone(),
        accelerated: config.is_accelerated(&variant.kind),
        artifacts,
        states: machine.into_history(),
        stop_attempts: quiet.attempts,
    })
}

/// Artifacts live in the working directory, one level above the build
/// directory the processes run in.
fn in_workdir(name: &str) -> String {
    format!("../{name}")
}

async fn process_spec(
    ctx: &RunContext,
    case: &TestCase,
    binding: &RoleBinding,
    builds: &BuildDirs,
    variant: &BenchmarkVariant,
    artifacts: &Artifacts,
    role: Role,
) -> Result<ProcessSpec, BenchError> {
    let config = ctx.config();
    let host = binding.host(role);
    let platform = netcfg::for_platform(resolve_platform(ctx, host).await?);

    let mut args = vec!["-i".to_string(), binding.iface(role).to_string()];
    if role == Role::Client {
        let server_addr = ctx.address(binding.host(Role::Server))?;
        args.push("-d".to_string());
        args.push(server_addr.to_string());
    }
    args.extend(variant.flags().into_iter().map(str::to_string));
    if role == Role::Client {
        args.push("-l".to_string());
        args.push(case.iterations.to_string());
    }

    let (log, profile) = match role {
        Role::Client => (&artifacts.client_log, &artifacts.client_profile),
        Role::Server => (&artifacts.server_log, &artifacts.server_profile),
    };
    let cpus = match role {
        Role::Client => config.pin.client_cpus.as_deref(),
        Role::Server => config.pin.server_cpus.as_deref(),
    };

    Ok(ProcessSpec {
        host: host.to_string(),
        cwd: builds.get(role).to_string(),
        program: format!("examples/{}{}", variant.kind, role.binary_suffix()),
        args,
        detach: role == Role::Server,
        log: if config.keep_logs {
            in_workdir(log)
        } else {
            DISCARD.to_string()
        },
        output: (role == Role::Client).then(|| in_workdir(&artifacts.result)),
        profile: config.profile.then(|| in_workdir(profile)),
        pin: cpus.map(|c| platform.pin(c)),
    })
}

// ---------------------------------------------------------------------------
// Recovery operations
// ---------------------------------------------------------------------------

/// Test cases selected by `--case`: one by index, or all of them.
pub fn select_cases(ctx: &RunContext, index: Option<usize>) -> Result<Vec<TestCase>, BenchError> {
    let cases = matrix::test_cases(ctx.config());
    match index {
        None => Ok(cases),
        Some(i) => cases
            .get(i)
            .cloned()
            .map(|c| vec![c])
            .ok_or(BenchError::UnknownCase {
                index: i,
                count: cases.len(),
            }),
    }
}

/// Apply the benchmark network configuration for each case in order.
pub async fn configure_cases(ctx: &RunContext, cases: &[TestCase]) -> Result<(), BenchError> {
    for case in cases {
        let label = case.label();
        let binding = RoleBinding::for_case(case);
        netcfg::configure(ctx, &binding)
            .await
            .at(&label, Step::Configure)?;
    }
    Ok(())
}

/// Leave accelerated mode, then remove the benchmark network configuration,
/// for each case in order.
pub async fn unconfigure_cases(ctx: &RunContext, cases: &[TestCase]) -> Result<(), BenchError> {
    for case in cases {
        let label = case.label();
        let binding = RoleBinding::for_case(case);
        netcfg::netmap_unconfigure(ctx, &binding)
            .await
            .at(&label, Step::NetmapUnconfigure)?;
        netcfg::unconfig(ctx, &binding)
            .await
            .at(&label, Step::Unconfigure)?;
    }
    Ok(())
}

/// Stop benchmark processes on every host of the matrix.
pub async fn stop_all(ctx: &RunContext) -> Result<stop::Quiescence, BenchError> {
    let cases = matrix::test_cases(ctx.config());
    let hosts = matrix::matrix_hosts(&cases);
    stop::stop(ctx, &hosts, &ctx.config().process_pattern())
        .await
        .at("all", Step::Stop)
}

/// Build on every host of the matrix (once in total with a shared working
/// directory). Returns `(host, build dir)` pairs.
pub async fn build_all(ctx: &RunContext) -> Result<Vec<(String, String)>, BenchError> {
    let cases = matrix::test_cases(ctx.config());
    let mut dirs = Vec::new();
    for host in matrix::matrix_hosts(&cases) {
        let dir = resolve_build_dir(ctx, host).await.at(host, Step::Build)?;
        dirs.push((host.to_string(), dir));
    }
    Ok(dirs)
}

/// Clear artifacts of previous runs on every host of the matrix.
pub async fn clear_all(ctx: &RunContext) -> Result<(), BenchError> {
    let cases = matrix::test_cases(ctx.config());
    logs::clear_logs(ctx, &matrix::matrix_hosts(&cases))
        .await
        .at("all", Step::ClearLogs)
}
