//! warpbench -- repeatable two-host network benchmarks for warpcore.
//!
//! This crate drives the `<kind>inetd` / `<kind>ping` benchmark pair across a
//! matrix of link speeds, implementations and option flags: it builds the
//! benchmarks on each host, puts the NICs into a known state, runs every
//! trial strictly in sequence and confirms the processes are gone before
//! moving on.

pub mod config;
pub mod context;
pub mod error;
pub mod hosts;
pub mod logs;
pub mod matrix;
pub mod netcfg;
pub mod remote;
pub mod roles;
pub mod runner;
pub mod stop;

pub use config::BenchConfig;
pub use context::RunContext;
pub use error::BenchError;
pub use runner::{run_bench, RunReport};
