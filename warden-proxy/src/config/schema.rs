//! Configuration schema types

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Complete gateway configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub admin: AdminConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub parental: ParentalConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

/// Intercepting proxy listener settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProxyConfig {
    #[serde(default = "default_proxy_listen")]
    pub listen: SocketAddr,
    /// Upper bound on concurrently handled connections; unbounded when absent
    #[serde(default)]
    pub max_connections: Option<usize>,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

fn default_proxy_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 3128))
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen: default_proxy_listen(),
            max_connections: None,
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

/// Administrative HTTP surface
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AdminConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_admin_listen")]
    pub listen: SocketAddr,
}

fn default_admin_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen: default_admin_listen(),
        }
    }
}

/// Subnet sweep settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DiscoveryConfig {
    /// First three octets of the /24 to sweep, e.g. `192.168.1`
    #[serde(default = "default_subnet_prefix")]
    pub subnet_prefix: String,
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    #[serde(default = "default_true")]
    pub scan_on_start: bool,
}

fn default_subnet_prefix() -> String {
    "192.168.1".to_string()
}

fn default_probe_timeout_ms() -> u64 {
    2_000
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            subnet_prefix: default_subnet_prefix(),
            probe_timeout_ms: default_probe_timeout_ms(),
            scan_on_start: true,
        }
    }
}

/// Passive packet capture settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CaptureConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub interface: Option<String>,
    #[serde(default = "default_capture_filter")]
    pub filter: String,
    /// Frames buffered between the capture thread and the decision pipeline
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_capture_filter() -> String {
    "ip or ip6".to_string()
}

fn default_channel_capacity() -> usize {
    1024
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interface: None,
            filter: default_capture_filter(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

/// Seed values for the parental control engine
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ParentalConfig {
    /// JSON array of CIDR strings
    #[serde(default)]
    pub vpn_cidrs_path: Option<PathBuf>,
    #[serde(default)]
    pub vpn_cidrs: Vec<String>,
    #[serde(default)]
    pub vpn_ports: Vec<u16>,
    #[serde(default)]
    pub vpn_hostname_signatures: Vec<String>,
    #[serde(default)]
    pub blocked_categories: Vec<String>,
    #[serde(default)]
    pub safe_search_enforce: bool,
}

/// Where device, policy, and log records live
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StoreConfig {
    /// Directory for the JSON store; records stay in memory when absent
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}
