//! Error taxonomy for benchmark orchestration.
//!
//! Configuration-command failures never reach this type: they are downgraded
//! to warnings by [`crate::context::RunContext::run`]. Everything here is fatal
//! for the run.

use thiserror::Error;

use crate::remote::RemoteError;
use crate::runner::TrialState;

#[derive(Debug, Error)]
pub enum BenchError {
    #[error("remote execution failed: {0}")]
    Remote(#[from] RemoteError),

    #[error("build failed on {host}: {reason}")]
    Build { host: String, reason: String },

    #[error("processes matching '{pattern}' still running on {host} after {attempts} attempts")]
    StuckProcess {
        host: String,
        pattern: String,
        attempts: u32,
    },

    #[error("invalid trial transition {from:?} -> {to:?}")]
    InvalidTransition { from: TrialState, to: TrialState },

    #[error("unknown host '{0}' (not present in [hosts])")]
    UnknownHost(String),

    #[error("no test case #{index} (the matrix has {count})")]
    UnknownCase { index: usize, count: usize },

    #[error("test case {case}, step {step}: {source}")]
    Step {
        case: String,
        step: Step,
        #[source]
        source: Box<BenchError>,
    },
}

impl BenchError {
    /// Attach the failing test case and step to an error.
    pub fn at(self, case: impl Into<String>, step: Step) -> Self {
        match self {
            // Already located by an inner step.
            e @ BenchError::Step { .. } => e,
            e => BenchError::Step {
                case: case.into(),
                step,
                source: Box::new(e),
            },
        }
    }
}

/// Orchestration steps, used to locate fatal errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Step {
    ResolveHosts,
    Build,
    ClearLogs,
    Stop,
    Unconfigure,
    Configure,
    NetmapConfigure,
    NetmapUnconfigure,
    StartServer,
    StartClient,
    PruneLogs,
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Step::ResolveHosts => "resolve-hosts",
            Step::Build => "build",
            Step::ClearLogs => "clear-logs",
            Step::Stop => "stop",
            Step::Unconfigure => "unconfig",
            Step::Configure => "configure",
            Step::NetmapConfigure => "netmap-configure",
            Step::NetmapUnconfigure => "netmap-unconfigure",
            Step::StartServer => "start-server",
            Step::StartClient => "start-client",
            Step::PruneLogs => "prune-logs",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_error_names_case_and_step() {
        let err = BenchError::StuckProcess {
            host: "phobos2".to_string(),
            pattern: "(warp|shim)(ping|inetd)".to_string(),
            attempts: 30,
        }
        .at("10G phobos1->phobos2", Step::Stop);

        let msg = err.to_string();
        assert!(msg.contains("10G phobos1->phobos2"));
        assert!(msg.contains("step stop"));
        assert!(msg.contains("phobos2"));
    }

    #[test]
    fn test_at_does_not_double_wrap() {
        let inner = BenchError::UnknownHost("five".to_string()).at("1G five->six", Step::Configure);
        let outer = inner.at("ignored", Step::Stop);
        match outer {
            BenchError::Step { case, step, .. } => {
                assert_eq!(case, "1G five->six");
                assert_eq!(step, Step::Configure);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
