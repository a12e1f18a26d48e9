//! Test matrix: test cases, per-case trial variants and artifact names.

use serde::Serialize;

use crate::config::BenchConfig;
use crate::roles::Role;

/// Flag passed to the benchmark binaries to disable UDP checksums.
pub const CHECKSUM_FLAG: &str = "-z";

/// Flag passed to the benchmark binaries to busy-wait instead of blocking.
pub const BUSYWAIT_FLAG: &str = "-b";

/// One link / host pairing of the matrix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestCase {
    /// Link speed label in Gb/s.
    pub speed: u32,
    pub client: String,
    pub server: String,
    pub client_iface: String,
    pub server_iface: String,
    pub iterations: u64,
}

impl TestCase {
    /// Human-readable identifier used in logs and errors.
    pub fn label(&self) -> String {
        format!("{}G {}->{}", self.speed, self.client, self.server)
    }
}

/// All test cases of a validated configuration, in order.
pub fn test_cases(config: &BenchConfig) -> Vec<TestCase> {
    config
        .tests
        .iter()
        .filter_map(|t| {
            Some(TestCase {
                speed: t.speed,
                client: t.client.clone(),
                server: t.server.clone(),
                client_iface: t.client_iface()?.to_string(),
                server_iface: t.server_iface()?.to_string(),
                iterations: t.iterations.unwrap_or(config.iterations),
            })
        })
        .collect()
}

/// Distinct hosts of `cases` in order of first appearance, client first.
pub fn matrix_hosts(cases: &[TestCase]) -> Vec<&str> {
    let mut hosts: Vec<&str> = Vec::new();
    for case in cases {
        for host in [case.client.as_str(), case.server.as_str()] {
            if !hosts.contains(&host) {
                hosts.push(host);
            }
        }
    }
    hosts
}

/// One cell of the per-test-case trial matrix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct BenchmarkVariant {
    pub kind: String,
    /// Run with UDP checksums disabled (`-z`).
    pub checksum: bool,
    /// Run with busy-waiting (`-b`).
    pub busywait: bool,
}

impl BenchmarkVariant {
    pub fn checksum_flag(&self) -> &'static str {
        if self.checksum {
            CHECKSUM_FLAG
        } else {
            ""
        }
    }

    pub fn busywait_flag(&self) -> &'static str {
        if self.busywait {
            BUSYWAIT_FLAG
        } else {
            ""
        }
    }

    /// Flags for the benchmark command line, empty entries dropped.
    pub fn flags(&self) -> Vec<&'static str> {
        [self.busywait_flag(), self.checksum_flag()]
            .into_iter()
            .filter(|f| !f.is_empty())
            .collect()
    }

    /// File name stem for `role`'s artifacts at `speed`.
    pub fn stem(&self, role: Role, speed: u32) -> String {
        format!(
            "{}{}-{}{}{}",
            self.kind,
            role.binary_suffix(),
            speed,
            self.busywait_flag(),
            self.checksum_flag()
        )
    }
}

/// Trial variants for one test case: kind outermost, then checksum, then
/// busy-wait, each flag set before unset.
pub fn variants(kinds: &[String]) -> Vec<BenchmarkVariant> {
    let mut out = Vec::with_capacity(kinds.len() * 4);
    for kind in kinds {
        for checksum in [true, false] {
            for busywait in [true, false] {
                out.push(BenchmarkVariant {
                    kind: kind.clone(),
                    checksum,
                    busywait,
                });
            }
        }
    }
    out
}

/// File names (relative to the working directory) one trial produces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Artifacts {
    pub server_log: String,
    pub client_log: String,
    pub result: String,
    pub server_profile: String,
    pub client_profile: String,
}

impl Artifacts {
    pub fn for_trial(variant: &BenchmarkVariant, speed: u32) -> Self {
        let server = variant.stem(Role::Server, speed);
        let client = variant.stem(Role::Client, speed);
        Self {
            server_log: format!("{}.log", server),
            client_log: format!("{}.log", client),
            result: format!("{}.txt", client),
            server_profile: format!("{}.prof", server),
            client_profile: format!("{}.prof", client),
        }
    }
}

/// A planned trial, as printed by `warpbench plan`.
#[derive(Debug, Clone, Serialize)]
pub struct PlannedTrial {
    pub case: String,
    pub variant: BenchmarkVariant,
    pub accelerated: bool,
    pub artifacts: Artifacts,
}

/// Expand the whole run without touching any host.
pub fn plan(config: &BenchConfig) -> Vec<PlannedTrial> {
    let variants = variants(&config.kinds);
    test_cases(config)
        .iter()
        .flat_map(|case| {
            variants.iter().map(move |v| PlannedTrial {
                case: case.label(),
                variant: v.clone(),
                accelerated: config.is_accelerated(&v.kind),
                artifacts: Artifacts::for_trial(v, case.speed),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn kinds() -> Vec<String> {
        vec!["warp".to_string(), "shim".to_string()]
    }

    #[test]
    fn test_variant_order_kind_outermost() {
        let v = variants(&kinds());
        assert_eq!(v.len(), 8);
        assert!(v[..4].iter().all(|x| x.kind == "warp"));
        assert!(v[4..].iter().all(|x| x.kind == "shim"));
        let flags: Vec<(bool, bool)> = v[..4].iter().map(|x| (x.checksum, x.busywait)).collect();
        assert_eq!(
            flags,
            vec![(true, true), (true, false), (false, true), (false, false)]
        );
    }

    #[test]
    fn test_artifact_names_follow_layout() {
        let v = BenchmarkVariant {
            kind: "warp".to_string(),
            checksum: true,
            busywait: true,
        };
        let a = Artifacts::for_trial(&v, 10);
        assert_eq!(a.server_log, "warpinetd-10-b-z.log");
        assert_eq!(a.client_log, "warpping-10-b-z.log");
        assert_eq!(a.result, "warpping-10-b-z.txt");
        assert_eq!(a.client_profile, "warpping-10-b-z.prof");

        let plain = BenchmarkVariant {
            kind: "shim".to_string(),
            checksum: false,
            busywait: false,
        };
        assert_eq!(Artifacts::for_trial(&plain, 40).result, "shimping-40.txt");
        assert!(plain.flags().is_empty());
    }

    #[test]
    fn test_plan_has_unique_names_across_matrix() {
        let config = BenchConfig::default();
        let trials = plan(&config);
        assert_eq!(trials.len(), 8 * config.tests.len());

        let mut names = HashSet::new();
        for t in &trials {
            for name in [
                &t.artifacts.server_log,
                &t.artifacts.client_log,
                &t.artifacts.result,
            ] {
                assert!(names.insert(name.clone()), "duplicate artifact {}", name);
            }
        }
    }

    #[test]
    fn test_matrix_hosts_distinct_in_order() {
        let mut config = BenchConfig::default();
        config
            .tests
            .push(crate::config::TestCaseConfig::symmetric(1, "six", "phobos1", "ix0"));
        let cases = test_cases(&config);
        assert_eq!(matrix_hosts(&cases), vec!["phobos1", "phobos2", "six"]);
    }

    #[test]
    fn test_plan_marks_accelerated_kind() {
        let trials = plan(&BenchConfig::default());
        assert!(trials.iter().filter(|t| t.accelerated).all(|t| t.variant.kind == "warp"));
        assert_eq!(trials.iter().filter(|t| t.accelerated).count(), 8);
    }
}
