//! Trial state machine and benchmark process command lines.

use serde::Serialize;
use tracing::debug;

use crate::error::BenchError;
use crate::remote::Invocation;

/// Where a trial stands with respect to its two processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TrialState {
    Idle,
    ServerStarted,
    ClientRunning,
    Stopping,
}

impl TrialState {
    fn allows(self, to: TrialState) -> bool {
        use TrialState::*;
        matches!(
            (self, to),
            (Idle, ServerStarted)
                | (ServerStarted, ClientRunning)
                | (ClientRunning, Stopping)
                | (Stopping, Idle)
        )
    }
}

/// Enforces `Idle -> ServerStarted -> ClientRunning -> Stopping -> Idle`
/// and keeps the visited states for the run report.
#[derive(Debug, Clone)]
pub struct TrialMachine {
    state: TrialState,
    history: Vec<TrialState>,
}

impl Default for TrialMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl TrialMachine {
    pub fn new() -> Self {
        Self {
            state: TrialState::Idle,
            history: vec![TrialState::Idle],
        }
    }

    pub fn state(&self) -> TrialState {
        self.state
    }

    pub fn transition(&mut self, to: TrialState) -> Result<(), BenchError> {
        if !self.state.allows(to) {
            return Err(BenchError::InvalidTransition {
                from: self.state,
                to,
            });
        }
        debug!(from = ?self.state, to = ?to, "trial transition");
        self.state = to;
        self.history.push(to);
        Ok(())
    }

    pub fn history(&self) -> &[TrialState] {
        &self.history
    }

    pub fn into_history(self) -> Vec<TrialState> {
        self.history
    }
}

/// Sink for logs that are not kept.
pub const DISCARD: &str = "/dev/null";

/// One benchmark process launch, rendered to a single shell line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessSpec {
    pub host: String,
    /// Directory the command runs in (the build directory).
    pub cwd: String,
    pub program: String,
    pub args: Vec<String>,
    /// Run in the background, surviving the session.
    pub detach: bool,
    /// stderr destination (stdout too, when detached).
    pub log: String,
    /// stdout destination of a foreground process.
    pub output: Option<String>,
    /// Profiler output file; enables the CPU profiler when set.
    pub profile: Option<String>,
    /// Rendered CPU pinning prefix, e.g. `taskset -c 2`.
    pub pin: Option<String>,
}

impl ProcessSpec {
    pub fn render(&self) -> String {
        let mut cmd = String::new();
        if let Some(profile) = &self.profile {
            cmd.push_str(&format!("CPUPROFILE={profile} "));
        }
        if self.detach {
            cmd.push_str("nohup ");
        }
        if let Some(pin) = &self.pin {
            cmd.push_str(pin);
            cmd.push(' ');
        }
        cmd.push_str(&self.program);
        for arg in &self.args {
            cmd.push(' ');
            cmd.push_str(arg);
        }

        if self.detach {
            cmd.push_str(&format!(" > {} 2>&1 < /dev/null &", self.log));
        } else {
            let output = self.output.as_deref().unwrap_or(DISCARD);
            cmd.push_str(&format!(" > {} 2> {}", output, self.log));
        }
        cmd
    }

    /// Launches are privileged and best-effort: a crashed benchmark is not
    /// an orchestration failure.
    pub fn invocation(&self) -> Invocation {
        Invocation::new(&self.host, self.render())
            .in_dir(&self.cwd)
            .sudo()
            .warn_only()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server() -> ProcessSpec {
        ProcessSpec {
            host: "phobos2".to_string(),
            cwd: "/home/bench/warpcore/Linux-benchmarking".to_string(),
            program: "examples/warpinetd".to_string(),
            args: vec!["-i".to_string(), "enp8s0f0".to_string(), "-b".to_string()],
            detach: true,
            log: DISCARD.to_string(),
            output: None,
            profile: None,
            pin: Some("taskset -c 2".to_string()),
        }
    }

    #[test]
    fn test_full_cycle_is_accepted() {
        let mut m = TrialMachine::new();
        for s in [
            TrialState::ServerStarted,
            TrialState::ClientRunning,
            TrialState::Stopping,
            TrialState::Idle,
        ] {
            m.transition(s).unwrap();
        }
        assert_eq!(m.state(), TrialState::Idle);
        assert_eq!(m.history().len(), 5);
    }

    #[test]
    fn test_client_never_before_server() {
        let mut m = TrialMachine::new();
        let err = m.transition(TrialState::ClientRunning).unwrap_err();
        assert!(matches!(
            err,
            BenchError::InvalidTransition {
                from: TrialState::Idle,
                to: TrialState::ClientRunning
            }
        ));
        assert_eq!(m.state(), TrialState::Idle);
        assert_eq!(m.history(), &[TrialState::Idle]);
    }

    #[test]
    fn test_stopping_cannot_skip_to_server() {
        let mut m = TrialMachine::new();
        m.transition(TrialState::ServerStarted).unwrap();
        assert!(m.transition(TrialState::Stopping).is_err());
        assert!(m.transition(TrialState::Idle).is_err());
    }

    #[test]
    fn test_render_detached_server() {
        assert_eq!(
            server().render(),
            "nohup taskset -c 2 examples/warpinetd -i enp8s0f0 -b > /dev/null 2>&1 < /dev/null &"
        );
    }

    #[test]
    fn test_render_profiled_foreground_client() {
        let spec = ProcessSpec {
            host: "phobos1".to_string(),
            cwd: "/b".to_string(),
            program: "examples/shimping".to_string(),
            args: vec!["-i".into(), "eth0".into(), "-d".into(), "10.11.12.4".into(), "-l".into(), "10".into()],
            detach: false,
            log: "../shimping-10.log".to_string(),
            output: Some("../shimping-10.txt".to_string()),
            profile: Some("../shimping-10.prof".to_string()),
            pin: None,
        };
        assert_eq!(
            spec.render(),
            "CPUPROFILE=../shimping-10.prof examples/shimping -i eth0 -d 10.11.12.4 -l 10 \
             > ../shimping-10.txt 2> ../shimping-10.log"
        );
        let inv = spec.invocation();
        assert!(inv.sudo && inv.warn_only);
        assert_eq!(inv.cwd.as_deref(), Some("/b"));
    }
}
