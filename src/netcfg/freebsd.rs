//! FreeBSD command lists. Ring, queue and EEE knobs have no portable
//! equivalent here and are skipped.

use super::{HostPlatform, NetParams};

const NETMAP_DEFAULT_BUF_NUM: u32 = 163_840;

pub struct FreeBsd;

impl HostPlatform for FreeBsd {
    fn configure(&self, p: &NetParams<'_>) -> Vec<String> {
        let iface = p.iface;
        vec![
            // dhclient would otherwise fight over the interface address.
            // The bracket keeps the pattern from matching its own shell.
            format!("pkill -f '[d]hclient.*{iface}'"),
            format!("sysctl -w kern.ipc.maxsockbuf={}", p.tuning.socket_buffer_bytes),
            format!("ifconfig {iface} down"),
            format!("ifconfig {iface} up"),
            format!("ifconfig {iface} inet {}/{} up", p.address, p.prefix_len),
        ]
    }

    fn list_interfaces(&self) -> &'static str {
        "ifconfig -l"
    }

    fn unconfig(&self, p: &NetParams<'_>, all_ifaces: &[String]) -> Vec<String> {
        let mut cmds: Vec<String> = all_ifaces
            .iter()
            .map(|i| format!("ifconfig {i} inet {} -alias", p.address))
            .collect();
        cmds.push(format!("ifconfig {} rxcsum txcsum tso lro", p.iface));
        cmds
    }

    fn netmap_configure(&self, p: &NetParams<'_>) -> Vec<String> {
        let t = p.tuning;
        vec![
            format!("sysctl -w dev.netmap.buf_num={}", t.netmap_buf_num),
            format!("sysctl -w dev.netmap.admode={}", t.netmap_admode),
            "sysctl -w hw.ix.enable_aim=0".to_string(),
            format!("ifconfig {} -rxcsum -txcsum -tso -lro", p.iface),
        ]
    }

    fn netmap_unconfigure(&self, p: &NetParams<'_>) -> Vec<String> {
        vec![
            format!("sysctl -w dev.netmap.buf_num={NETMAP_DEFAULT_BUF_NUM}"),
            "sysctl -w dev.netmap.admode=0".to_string(),
            "sysctl -w hw.ix.enable_aim=1".to_string(),
            format!("ifconfig {} rxcsum txcsum tso lro", p.iface),
        ]
    }

    fn pin(&self, cpus: &str) -> String {
        format!("cpuset -l {cpus}")
    }
}
