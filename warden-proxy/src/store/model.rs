//! Records shared with the external stores

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Name given to devices first seen on the wire
pub const UNKNOWN_DEVICE_NAME: &str = "Unknown Device";

/// A device on the local network, keyed by MAC address
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Device {
    /// Lowercase colon-separated MAC address
    pub mac: String,
    /// Last IP address observed for this MAC
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub name: Option<String>,
    /// When false the device bypasses parental filtering entirely
    #[serde(default = "default_true")]
    pub proxy_enabled: bool,
}

fn default_true() -> bool {
    true
}

impl Device {
    pub fn new(mac: &str) -> Self {
        Self {
            mac: normalize_mac(mac),
            ip: String::new(),
            name: None,
            proxy_enabled: true,
        }
    }

    /// Apply the set fields of an update in place
    pub fn apply(&mut self, update: &DeviceUpdate) {
        if let Some(ip) = &update.ip {
            self.ip = ip.clone();
        }
        if let Some(name) = &update.name {
            self.name = Some(name.clone());
        }
        if let Some(enabled) = update.proxy_enabled {
            self.proxy_enabled = enabled;
        }
    }
}

/// Partial device fields for an upsert; `None` leaves a field untouched
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceUpdate {
    pub ip: Option<String>,
    pub name: Option<String>,
    pub proxy_enabled: Option<bool>,
}

pub fn normalize_mac(mac: &str) -> String {
    mac.trim().to_ascii_lowercase()
}

/// What a schedule does while its window is active
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleAction {
    /// Block everything not on the device allowlist
    BlockAllExceptAllowlist,
    /// No additional restriction
    AllowAll,
}

/// Daily time window in local `HH:MM`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Schedule {
    #[serde(default)]
    pub start: Option<String>,
    #[serde(default)]
    pub end: Option<String>,
    pub action: ScheduleAction,
}

/// Per-device rule set
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Policy {
    pub device_mac: String,
    #[serde(default)]
    pub allow_domains: Vec<String>,
    #[serde(default)]
    pub block_domains: Vec<String>,
    #[serde(default)]
    pub block_keywords: Vec<String>,
    #[serde(default)]
    pub schedule: Option<Schedule>,
}

impl Policy {
    pub fn new(device_mac: &str) -> Self {
        Self {
            device_mac: normalize_mac(device_mac),
            ..Default::default()
        }
    }

    pub fn apply(&mut self, update: &PolicyUpdate) {
        match update {
            PolicyUpdate::AddAllowDomain(d) => add_to_set(&mut self.allow_domains, d),
            PolicyUpdate::RemoveAllowDomain(d) => self.allow_domains.retain(|x| x != d),
            PolicyUpdate::AddBlockDomain(d) => add_to_set(&mut self.block_domains, d),
            PolicyUpdate::RemoveBlockDomain(d) => self.block_domains.retain(|x| x != d),
            PolicyUpdate::AddBlockKeyword(k) => add_to_set(&mut self.block_keywords, k),
            PolicyUpdate::RemoveBlockKeyword(k) => self.block_keywords.retain(|x| x != k),
            PolicyUpdate::SetSchedule(s) => self.schedule = s.clone(),
        }
    }
}

fn add_to_set(items: &mut Vec<String>, value: &str) {
    if !items.iter().any(|x| x == value) {
        items.push(value.to_string());
    }
}

/// A single edit to a stored policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyUpdate {
    AddAllowDomain(String),
    RemoveAllowDomain(String),
    AddBlockDomain(String),
    RemoveBlockDomain(String),
    AddBlockKeyword(String),
    RemoveBlockKeyword(String),
    SetSchedule(Option<Schedule>),
}

/// One request or observation outcome
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct LogEntry {
    pub mac: String,
    #[serde(default)]
    pub ip: Option<String>,
    pub url: String,
    #[serde(default)]
    pub hostname: Option<String>,
    pub method: String,
    pub blocked: bool,
    #[serde(default)]
    pub status_code: Option<u16>,
    #[serde(default)]
    pub data_length: Option<u64>,
    pub timestamp: DateTime<Utc>,
}
