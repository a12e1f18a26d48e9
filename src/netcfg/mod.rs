//! Network state controller.
//!
//! Two inverse pairs: `configure`/`unconfig` for base IP and NIC tuning,
//! and `netmap_configure`/`netmap_unconfigure` for the accelerated packet
//! I/O mode. Platform differences live behind [`HostPlatform`]; every
//! command is best-effort because the target value may already hold or the
//! NIC may not support the knob.

pub mod freebsd;
pub mod linux;

use std::net::Ipv4Addr;

use futures::future::join_all;
use tracing::{debug, info};

use crate::config::TuningConfig;
use crate::context::RunContext;
use crate::error::BenchError;
use crate::hosts::{resolve_platform, Platform};
use crate::remote::Invocation;
use crate::roles::{Role, RoleBinding};

pub use freebsd::FreeBsd;
pub use linux::Linux;

/// Inputs to one role-host's command list.
#[derive(Debug, Clone)]
pub struct NetParams<'a> {
    pub iface: &'a str,
    pub address: Ipv4Addr,
    pub prefix_len: u8,
    pub tuning: &'a TuningConfig,
}

/// Per-platform command lists for the network operations.
///
/// Implementations only describe commands; [`RunContext`] runs them.
pub trait HostPlatform: Send + Sync {
    fn configure(&self, p: &NetParams<'_>) -> Vec<String>;

    /// Command printing every local interface name.
    fn list_interfaces(&self) -> &'static str;

    /// `all_ifaces` is every interface on the host, not only the one under
    /// test, so addresses left on renamed interfaces are purged too.
    fn unconfig(&self, p: &NetParams<'_>, all_ifaces: &[String]) -> Vec<String>;

    fn netmap_configure(&self, p: &NetParams<'_>) -> Vec<String>;

    fn netmap_unconfigure(&self, p: &NetParams<'_>) -> Vec<String>;

    /// Prefix that pins the following command to `cpus`.
    fn pin(&self, cpus: &str) -> String;
}

pub fn for_platform(platform: Platform) -> &'static dyn HostPlatform {
    match platform {
        Platform::Linux => &Linux,
        Platform::FreeBsd => &FreeBsd,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NetOp {
    Configure,
    Unconfig,
    NetmapConfigure,
    NetmapUnconfigure,
}

impl NetOp {
    fn name(self) -> &'static str {
        match self {
            NetOp::Configure => "configure",
            NetOp::Unconfig => "unconfig",
            NetOp::NetmapConfigure => "netmap-configure",
            NetOp::NetmapUnconfigure => "netmap-unconfigure",
        }
    }
}

pub async fn configure(ctx: &RunContext, binding: &RoleBinding) -> Result<(), BenchError> {
    apply_all(ctx, binding, NetOp::Configure).await
}

pub async fn unconfig(ctx: &RunContext, binding: &RoleBinding) -> Result<(), BenchError> {
    apply_all(ctx, binding, NetOp::Unconfig).await
}

pub async fn netmap_configure(ctx: &RunContext, binding: &RoleBinding) -> Result<(), BenchError> {
    apply_all(ctx, binding, NetOp::NetmapConfigure).await
}

pub async fn netmap_unconfigure(ctx: &RunContext, binding: &RoleBinding) -> Result<(), BenchError> {
    apply_all(ctx, binding, NetOp::NetmapUnconfigure).await
}

/// Apply `op` on both role hosts concurrently and wait for both.
async fn apply_all(ctx: &RunContext, binding: &RoleBinding, op: NetOp) -> Result<(), BenchError> {
    info!(
        op = op.name(),
        client = binding.host(Role::Client),
        server = binding.host(Role::Server),
        "network operation"
    );
    let results = join_all(binding.roles().map(|role| apply(ctx, binding, role, op))).await;
    results.into_iter().collect()
}

async fn apply(
    ctx: &RunContext,
    binding: &RoleBinding,
    role: Role,
    op: NetOp,
) -> Result<(), BenchError> {
    let host = binding.host(role);
    let platform = for_platform(resolve_platform(ctx, host).await?);
    let config = ctx.config();
    let params = NetParams {
        iface: binding.iface(role),
        address: ctx.address(host)?,
        prefix_len: config.prefix_len,
        tuning: &config.tuning,
    };

    let commands = match op {
        NetOp::Configure => platform.configure(&params),
        NetOp::Unconfig => {
            let ifaces = local_interfaces(ctx, host, platform, params.iface).await?;
            platform.unconfig(&params, &ifaces)
        }
        NetOp::NetmapConfigure => platform.netmap_configure(&params),
        NetOp::NetmapUnconfigure => platform.netmap_unconfigure(&params),
    };

    debug!(host, %role, op = op.name(), count = commands.len(), "applying commands");
    for command in commands {
        ctx.run(Invocation::new(host, command).sudo().warn_only())
            .await?;
    }
    Ok(())
}

async fn local_interfaces(
    ctx: &RunContext,
    host: &str,
    platform: &dyn HostPlatform,
    fallback: &str,
) -> Result<Vec<String>, BenchError> {
    let output = ctx
        .run(Invocation::new(host, platform.list_interfaces()).warn_only())
        .await?;
    let mut ifaces: Vec<String> = if output.success() {
        output.stdout.split_whitespace().map(str::to_string).collect()
    } else {
        Vec::new()
    };
    if !ifaces.iter().any(|i| i == fallback) {
        ifaces.push(fallback.to_string());
    }
    Ok(ifaces)
}
