//! Host probing and neighbor table access

use super::neighbor::{parse_neighbor_table, Neighbor};
use async_trait::async_trait;
use std::io;
use std::net::Ipv4Addr;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

const PROC_NET_ARP: &str = "/proc/net/arp";

/// Access to the host's view of the local network
#[async_trait]
pub trait NetworkProbe: Send + Sync {
    /// Send one reachability probe to `ip`. Only the side effect of
    /// populating the neighbor table matters; the outcome is advisory.
    async fn probe(&self, ip: Ipv4Addr) -> bool;

    /// Current IP to MAC bindings known to the host
    async fn neighbor_table(&self) -> io::Result<Vec<Neighbor>>;
}

/// Probe backed by the system `ping` and `arp` tools
#[derive(Debug, Default, Clone)]
pub struct SystemProbe;

impl SystemProbe {
    pub fn new() -> Self {
        Self
    }

    async fn arp_command() -> io::Result<String> {
        let output = Command::new("arp")
            .arg("-a")
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .output()
            .await?;
        if !output.status.success() {
            return Err(io::Error::other(format!("arp exited with {}", output.status)));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl NetworkProbe for SystemProbe {
    async fn probe(&self, ip: Ipv4Addr) -> bool {
        let status = Command::new("ping")
            .args(["-c", "1", "-W", "1"])
            .arg(ip.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await;
        matches!(status, Ok(s) if s.success())
    }

    async fn neighbor_table(&self) -> io::Result<Vec<Neighbor>> {
        match Self::arp_command().await {
            Ok(out) => Ok(parse_neighbor_table(&out)),
            Err(e) => {
                debug!("arp -a unavailable ({}), reading {}", e, PROC_NET_ARP);
                let out = tokio::fs::read_to_string(PROC_NET_ARP).await?;
                Ok(parse_neighbor_table(&out))
            }
        }
    }
}
