//! Linux command lists (`sysctl`, `ethtool`, `ip`, netmap module params).

use super::{HostPlatform, NetParams};

const NETMAP_PARAMS: &str = "/sys/module/netmap/parameters";

/// netmap module defaults restored when leaving accelerated mode.
const NETMAP_DEFAULT_IF_SIZE: u32 = 1024;
const NETMAP_DEFAULT_BUF_NUM: u32 = 163_840;
const NETMAP_DEFAULT_ADMODE: u32 = 0;

pub struct Linux;

impl HostPlatform for Linux {
    fn configure(&self, p: &NetParams<'_>) -> Vec<String> {
        let iface = p.iface;
        let t = p.tuning;
        let buf = t.socket_buffer_bytes;
        vec![
            format!(
                "sysctl -w net.core.rmem_max={buf} net.core.wmem_max={buf} \
                 net.core.rmem_default={buf} net.core.wmem_default={buf}"
            ),
            format!(
                "ethtool -C {iface} rx-usecs 0 tx-usecs 0 adaptive-rx off adaptive-tx off rx-usecs-high 0"
            ),
            format!("ethtool -G {iface} rx {0} tx {0}", t.ring_size),
            format!("ethtool -L {iface} combined {}", t.queues),
            format!("ethtool --set-eee {iface} eee off"),
            format!("ip link set {iface} down"),
            format!("ip link set {iface} up"),
            format!("ifconfig {iface} {}/{} up", p.address, p.prefix_len),
        ]
    }

    fn list_interfaces(&self) -> &'static str {
        "ls /sys/class/net"
    }

    fn unconfig(&self, p: &NetParams<'_>, all_ifaces: &[String]) -> Vec<String> {
        let iface = p.iface;
        let mut cmds: Vec<String> = all_ifaces
            .iter()
            .map(|i| format!("ip addr del {}/{} dev {i}", p.address, p.prefix_len))
            .collect();
        cmds.push(format!(
            "ethtool -G {iface} rx {0} tx {0}",
            p.tuning.default_ring_size
        ));
        cmds.push(format!("ethtool -K {iface} tso on gso on gro on rx on tx on"));
        cmds.push(restore_coalescing(iface, p.tuning.default_coalesce_usecs));
        cmds
    }

    fn netmap_configure(&self, p: &NetParams<'_>) -> Vec<String> {
        let iface = p.iface;
        let t = p.tuning;
        vec![
            format!("echo {} > {NETMAP_PARAMS}/if_size", t.netmap_if_size),
            format!("echo {} > {NETMAP_PARAMS}/buf_num", t.netmap_buf_num),
            format!("echo {} > {NETMAP_PARAMS}/admode", t.netmap_admode),
            format!("ethtool -A {iface} rx off tx off"),
            format!("ethtool -K {iface} tso off gso off gro off lro off rx off tx off"),
            format!("ethtool -C {iface} adaptive-rx off adaptive-tx off rx-usecs 0 tx-usecs 0"),
        ]
    }

    fn netmap_unconfigure(&self, p: &NetParams<'_>) -> Vec<String> {
        let iface = p.iface;
        vec![
            format!("echo {NETMAP_DEFAULT_IF_SIZE} > {NETMAP_PARAMS}/if_size"),
            format!("echo {NETMAP_DEFAULT_BUF_NUM} > {NETMAP_PARAMS}/buf_num"),
            format!("echo {NETMAP_DEFAULT_ADMODE} > {NETMAP_PARAMS}/admode"),
            format!("ethtool -A {iface} rx on tx on"),
            format!("ethtool -K {iface} tso on gso on gro on lro on rx on tx on"),
            restore_coalescing(iface, p.tuning.default_coalesce_usecs),
        ]
    }

    fn pin(&self, cpus: &str) -> String {
        format!("taskset -c {cpus}")
    }
}

fn restore_coalescing(iface: &str, usecs: u32) -> String {
    format!("ethtool -C {iface} adaptive-rx on adaptive-tx on rx-usecs {usecs} tx-usecs {usecs}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TuningConfig;
    use std::collections::BTreeSet;

    fn params(tuning: &TuningConfig) -> NetParams<'_> {
        NetParams {
            iface: "enp4s0f0",
            address: "10.11.12.3".parse().unwrap(),
            prefix_len: 24,
            tuning,
        }
    }

    #[test]
    fn test_configure_cycles_link_before_address() {
        let tuning = TuningConfig::default();
        let cmds = Linux.configure(&params(&tuning));
        let down = cmds.iter().position(|c| c == "ip link set enp4s0f0 down").unwrap();
        let up = cmds.iter().position(|c| c == "ip link set enp4s0f0 up").unwrap();
        assert!(down < up);
        assert_eq!(cmds.last().unwrap(), "ifconfig enp4s0f0 10.11.12.3/24 up");
        assert!(cmds.iter().any(|c| c == "ethtool -G enp4s0f0 rx 4096 tx 4096"));
        assert!(cmds.iter().any(|c| c == "ethtool -L enp4s0f0 combined 2"));
    }

    /// Command target (`ethtool -K eth0`, a sysfs path) and the knob
    /// names it sets, ignoring values.
    fn knobs(cmd: &str) -> (String, BTreeSet<String>) {
        let words: Vec<&str> = cmd.split_whitespace().collect();
        if words[0] == "echo" {
            return (words[3].to_string(), BTreeSet::new());
        }
        let target = words[..3].join(" ");
        let names = words[3..].iter().step_by(2).map(|w| w.to_string()).collect();
        (target, names)
    }

    #[test]
    fn test_netmap_pair_is_exact_inverse() {
        let tuning = TuningConfig::default();
        let on = Linux.netmap_configure(&params(&tuning));
        let off = Linux.netmap_unconfigure(&params(&tuning));

        let on_knobs: Vec<_> = on.iter().map(|c| knobs(c)).collect();
        let off_knobs: Vec<_> = off.iter().map(|c| knobs(c)).collect();
        assert_eq!(on_knobs, off_knobs);
        for (a, b) in on.iter().zip(off.iter()).filter(|(a, _)| a.starts_with("ethtool")) {
            assert_ne!(a, b);
        }

        assert!(on
            .iter()
            .any(|c| c == "ethtool -C enp4s0f0 adaptive-rx off adaptive-tx off rx-usecs 0 tx-usecs 0"));
        assert!(off.iter().any(|c| c.starts_with("ethtool -K") && c.contains("lro on")));
    }

    #[test]
    fn test_pin_uses_taskset() {
        assert_eq!(Linux.pin("2,3"), "taskset -c 2,3");
    }
}
