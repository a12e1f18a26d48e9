//! TOML configuration for a benchmark run.
//!
//! Every section has compiled-in defaults describing the two-host lab the
//! benchmarks were originally run in, so `warpbench` works with no config
//! file at all. Lookup order: explicit `--config` (which the CLI also
//! fills from `WARPBENCH_CONFIG`), `./warpbench.toml`, then defaults.

use std::collections::{BTreeMap, HashSet};
use std::net::Ipv4Addr;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Environment variable backing the `--config` flag.
pub const CONFIG_ENV: &str = "WARPBENCH_CONFIG";

/// Config file picked up from the current directory.
pub const LOCAL_CONFIG: &str = "warpbench.toml";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("test case #{index} references unknown host '{host}'")]
    UnknownHost { index: usize, host: String },

    #[error("test case #{index} has no interface for the {role} side")]
    MissingInterface { index: usize, role: &'static str },

    #[error("no benchmark kinds configured")]
    NoKinds,

    #[error("benchmark kind '{0}' listed more than once")]
    DuplicateKind(String),

    #[error("accelerated kind '{0}' is not one of the configured kinds")]
    UnknownAcceleratedKind(String),

    #[error("stop.max_attempts must be at least 1")]
    NoStopAttempts,

    #[error("test case #{index} reuses speed label {speed}G; artifact names would collide")]
    DuplicateSpeed { index: usize, speed: u32 },
}

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchConfig {
    /// Remote working directory holding the source tree and all artifacts.
    pub workdir: String,
    /// Whether every host sees the same working directory (e.g. NFS home).
    /// When true the build and log clearing run once per run, not per host.
    pub shared_workdir: bool,
    /// Keep benchmark stderr logs instead of sending them to `/dev/null`.
    pub keep_logs: bool,
    /// Run both benchmark processes under the CPU profiler.
    pub profile: bool,
    /// Delay between starting the server and starting the client.
    pub settle_ms: u64,
    /// Default client iteration count, per test case overridable.
    pub iterations: u64,
    /// Prefix length of the static benchmark addresses.
    pub prefix_len: u8,
    /// Benchmark implementations, in execution order.
    pub kinds: Vec<String>,
    /// Kinds that need the accelerated (netmap) mode around their trials.
    pub accelerated_kinds: Vec<String>,
    /// Process name pattern for kill/probe; derived from `kinds` when unset.
    pub process_pattern: Option<String>,
    pub hosts: BTreeMap<String, HostConfig>,
    pub tests: Vec<TestCaseConfig>,
    pub tuning: TuningConfig,
    pub stop: StopConfig,
    pub pin: PinConfig,
    pub build: BuildConfig,
    pub ssh: SshConfig,
}

impl Default for BenchConfig {
    fn default() -> Self {
        let hosts = [
            ("phobos1", [10, 11, 12, 3]),
            ("phobos2", [10, 11, 12, 4]),
            ("five", [10, 11, 12, 5]),
            ("six", [10, 11, 12, 6]),
        ]
        .into_iter()
        .map(|(name, octets)| {
            (
                name.to_string(),
                HostConfig {
                    address: Ipv4Addr::from(octets),
                    ssh: None,
                    local: false,
                },
            )
        })
        .collect();

        Self {
            workdir: "~/warpcore".to_string(),
            shared_workdir: true,
            keep_logs: false,
            profile: false,
            settle_ms: 3000,
            iterations: 100_000,
            prefix_len: 24,
            kinds: vec!["warp".to_string(), "shim".to_string()],
            accelerated_kinds: vec!["warp".to_string()],
            process_pattern: None,
            hosts,
            tests: vec![
                TestCaseConfig::symmetric(10, "phobos1", "phobos2", "enp8s0f0"),
                TestCaseConfig::symmetric(40, "phobos1", "phobos2", "enp4s0f0"),
            ],
            tuning: TuningConfig::default(),
            stop: StopConfig::default(),
            pin: PinConfig::default(),
            build: BuildConfig::default(),
            ssh: SshConfig::default(),
        }
    }
}

impl BenchConfig {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded benchmark configuration");
        Ok(config)
    }

    /// Resolve the configuration for this invocation.
    ///
    /// An explicit path must load. A broken local file only warns, then
    /// falls through to defaults.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        let config = match explicit {
            Some(path) => Self::load(path)?,
            None => Self::load_or_default(),
        };
        config.validate()?;
        Ok(config)
    }

    fn load_or_default() -> Self {
        let local = Path::new(LOCAL_CONFIG);
        if local.exists() {
            match Self::load(local) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %local.display(),
                        error = %e,
                        "local config file exists but could not be loaded, using defaults"
                    );
                }
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Self::default()
    }

    /// Check cross-references between sections.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.kinds.is_empty() {
            return Err(ConfigError::NoKinds);
        }
        let mut seen = HashSet::new();
        for kind in &self.kinds {
            if !seen.insert(kind.as_str()) {
                return Err(ConfigError::DuplicateKind(kind.clone()));
            }
        }
        if let Some(kind) = self
            .accelerated_kinds
            .iter()
            .find(|k| !self.kinds.contains(k))
        {
            return Err(ConfigError::UnknownAcceleratedKind(kind.clone()));
        }
        if self.stop.max_attempts == 0 {
            return Err(ConfigError::NoStopAttempts);
        }

        let mut speeds = HashSet::new();
        for (index, test) in self.tests.iter().enumerate() {
            if !speeds.insert(test.speed) {
                return Err(ConfigError::DuplicateSpeed {
                    index,
                    speed: test.speed,
                });
            }
            for host in [&test.client, &test.server] {
                if !self.hosts.contains_key(host) {
                    return Err(ConfigError::UnknownHost {
                        index,
                        host: host.clone(),
                    });
                }
            }
            if test.client_iface().is_none() {
                return Err(ConfigError::MissingInterface {
                    index,
                    role: "client",
                });
            }
            if test.server_iface().is_none() {
                return Err(ConfigError::MissingInterface {
                    index,
                    role: "server",
                });
            }
        }
        Ok(())
    }

    /// Pattern matching every benchmark process this run can start.
    pub fn process_pattern(&self) -> String {
        match &self.process_pattern {
            Some(p) => p.clone(),
            None => format!("({})(ping|inetd)", self.kinds.join("|")),
        }
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn is_accelerated(&self, kind: &str) -> bool {
        self.accelerated_kinds.iter().any(|k| k == kind)
    }
}

// ---------------------------------------------------------------------------
// Hosts and test cases
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    /// Static benchmark address assigned to the interface under test.
    pub address: Ipv4Addr,
    /// ssh destination; defaults to the host id so `~/.ssh/config` applies.
    #[serde(default)]
    pub ssh: Option<String>,
    /// Run commands for this host on the local machine instead of over ssh.
    #[serde(default)]
    pub local: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCaseConfig {
    /// Link speed label in Gb/s.
    pub speed: u32,
    pub client: String,
    pub server: String,
    /// Interface name used on both sides unless overridden.
    #[serde(default)]
    pub iface: Option<String>,
    #[serde(default)]
    pub client_iface: Option<String>,
    #[serde(default)]
    pub server_iface: Option<String>,
    #[serde(default)]
    pub iterations: Option<u64>,
}

impl TestCaseConfig {
    pub fn symmetric(speed: u32, client: &str, server: &str, iface: &str) -> Self {
        Self {
            speed,
            client: client.to_string(),
            server: server.to_string(),
            iface: Some(iface.to_string()),
            client_iface: None,
            server_iface: None,
            iterations: None,
        }
    }

    pub fn client_iface(&self) -> Option<&str> {
        self.client_iface.as_deref().or(self.iface.as_deref())
    }

    pub fn server_iface(&self) -> Option<&str> {
        self.server_iface.as_deref().or(self.iface.as_deref())
    }
}

// ---------------------------------------------------------------------------
// Tuning
// ---------------------------------------------------------------------------

/// NIC and kernel values applied by the network state controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TuningConfig {
    /// Socket buffer limit and default (bytes).
    pub socket_buffer_bytes: u64,
    /// Ring size set while benchmarking.
    pub ring_size: u32,
    /// Conservative ring size restored on unconfig.
    pub default_ring_size: u32,
    /// Interrupt coalescing delay (µs) restored when leaving benchmark mode.
    pub default_coalesce_usecs: u32,
    /// Combined queue count.
    pub queues: u32,
    /// netmap interface memory size.
    pub netmap_if_size: u32,
    /// netmap shared buffer pool size.
    pub netmap_buf_num: u32,
    /// netmap admission mode while accelerated (1 = native only).
    pub netmap_admode: u32,
}

impl Default for TuningConfig {
    fn default() -> Self {
        Self {
            socket_buffer_bytes: 26_214_400,
            ring_size: 4096,
            default_ring_size: 512,
            default_coalesce_usecs: 50,
            queues: 2,
            netmap_if_size: 4096,
            netmap_buf_num: 163_840,
            netmap_admode: 1,
        }
    }
}

// ---------------------------------------------------------------------------
// Stop, pinning, build, ssh
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StopConfig {
    /// Kill-and-probe rounds before a process is declared stuck.
    pub max_attempts: u32,
    /// Delay between rounds.
    pub backoff_ms: u64,
}

impl Default for StopConfig {
    fn default() -> Self {
        Self {
            max_attempts: 30,
            backoff_ms: 1000,
        }
    }
}

impl StopConfig {
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}

/// CPU sets the benchmark processes are pinned to, per role.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PinConfig {
    pub client_cpus: Option<String>,
    pub server_cpus: Option<String>,
}

impl Default for PinConfig {
    fn default() -> Self {
        Self {
            client_cpus: Some("2".to_string()),
            server_cpus: Some("2".to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Run from inside the build directory.
    pub configure: String,
    pub build: String,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            configure: "cmake -GNinja ..".to_string(),
            build: "ninja".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SshConfig {
    pub connect_timeout_secs: u64,
    pub command_timeout_secs: u64,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 10,
            command_timeout_secs: 900,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = BenchConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.tests.len(), 2);
        assert_eq!(config.process_pattern(), "(warp|shim)(ping|inetd)");
    }

    #[test]
    fn test_parse_minimal_toml() {
        let toml_str = r#"
            kinds = ["warp"]
            accelerated_kinds = []
            settle_ms = 0

            [hosts.a]
            address = "192.168.50.1"
            [hosts.b]
            address = "192.168.50.2"
            ssh = "root@b.lab"

            [[tests]]
            speed = 25
            client = "a"
            server = "b"
            client_iface = "ens1f0"
            server_iface = "ix0"
            iterations = 500
        "#;
        let config: BenchConfig = toml::from_str(toml_str).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.workdir, "~/warpcore");
        assert_eq!(config.hosts["b"].ssh.as_deref(), Some("root@b.lab"));
        let test = &config.tests[0];
        assert_eq!(test.client_iface(), Some("ens1f0"));
        assert_eq!(test.server_iface(), Some("ix0"));
        assert_eq!(config.stop.max_attempts, 30);
    }

    #[test]
    fn test_validate_unknown_host() {
        let mut config = BenchConfig::default();
        config.tests[1].server = "deimos".to_string();
        assert_eq!(
            config.validate(),
            Err(ConfigError::UnknownHost {
                index: 1,
                host: "deimos".to_string()
            })
        );
    }

    #[test]
    fn test_validate_accelerated_subset() {
        let mut config = BenchConfig::default();
        config.accelerated_kinds = vec!["dpdk".to_string()];
        assert_eq!(
            config.validate(),
            Err(ConfigError::UnknownAcceleratedKind("dpdk".to_string()))
        );
    }

    #[test]
    fn test_validate_rejects_reused_speed_label() {
        let mut config = BenchConfig::default();
        config
            .tests
            .push(TestCaseConfig::symmetric(10, "five", "six", "ix0"));
        assert_eq!(
            config.validate(),
            Err(ConfigError::DuplicateSpeed { index: 2, speed: 10 })
        );
    }

    #[test]
    fn test_validate_missing_interface() {
        let mut config = BenchConfig::default();
        config.tests[0].iface = None;
        config.tests[0].server_iface = Some("ix0".to_string());
        assert_eq!(
            config.validate(),
            Err(ConfigError::MissingInterface {
                index: 0,
                role: "client"
            })
        );
    }
}
