//! Parental control engine: device rules, VPN evasion, categories, SafeSearch

use super::cidr::Cidr;
use super::rules::{self, BlockReason};
use crate::config::schema::ParentalConfig;
use crate::error::{Result, WardenError};
use crate::store::{Device, PolicyStore};
use chrono::{Local, NaiveTime};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeSet, HashSet};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Hostname markers of search engines that offer SafeSearch
const SEARCH_ENGINE_MARKERS: &[&str] = &["google", "bing"];

/// Immutable rule set; mutators publish a modified copy
#[derive(Debug, Clone, Default)]
pub struct ParentalRules {
    pub vpn_cidrs: Vec<Cidr>,
    pub vpn_hostname_signatures: Vec<String>,
    pub vpn_ports: HashSet<u16>,
    pub blocked_categories: BTreeSet<String>,
    pub safe_search_enforce: bool,
}

pub struct ParentalControlEngine {
    store: Arc<dyn PolicyStore>,
    rules: RwLock<Arc<ParentalRules>>,
    /// Serializes copy-then-publish updates so concurrent mutators don't lose edits
    update_lock: Mutex<()>,
    vpn_cidrs_path: Option<PathBuf>,
    /// CIDRs from config or added at runtime, kept across side-file reloads
    pinned_cidrs: Mutex<Vec<Cidr>>,
}

impl ParentalControlEngine {
    /// Build the engine from configuration.
    ///
    /// A missing or unreadable side file is logged and skipped; a malformed
    /// CIDR anywhere is a configuration error.
    pub fn new(config: &ParentalConfig, store: Arc<dyn PolicyStore>) -> Result<Self> {
        let configured_cidrs = parse_cidrs(&config.vpn_cidrs)?;

        let mut vpn_cidrs = match &config.vpn_cidrs_path {
            Some(path) => read_cidr_file(path)?.unwrap_or_default(),
            None => Vec::new(),
        };
        vpn_cidrs.extend(configured_cidrs.iter().copied());
        info!("Loaded {} VPN CIDRs", vpn_cidrs.len());

        let mut signatures = Vec::new();
        for sig in &config.vpn_hostname_signatures {
            if !signatures.contains(sig) {
                signatures.push(sig.clone());
            }
        }

        let rules = ParentalRules {
            vpn_cidrs,
            vpn_hostname_signatures: signatures,
            vpn_ports: config.vpn_ports.iter().copied().collect(),
            blocked_categories: config.blocked_categories.iter().cloned().collect(),
            safe_search_enforce: config.safe_search_enforce,
        };

        Ok(Self {
            store,
            rules: RwLock::new(Arc::new(rules)),
            update_lock: Mutex::new(()),
            vpn_cidrs_path: config.vpn_cidrs_path.clone(),
            pinned_cidrs: Mutex::new(configured_cidrs),
        })
    }

    /// Current rule snapshot
    pub fn rules(&self) -> Arc<ParentalRules> {
        self.rules.read().clone()
    }

    fn update<F: FnOnce(&mut ParentalRules)>(&self, edit: F) {
        let _guard = self.update_lock.lock();
        let mut next = (*self.rules()).clone();
        edit(&mut next);
        *self.rules.write() = Arc::new(next);
    }

    /// Re-read the VPN CIDR side file if one was configured.
    /// Failures keep the current CIDRs.
    pub async fn reload(&self) {
        let Some(path) = self.vpn_cidrs_path.clone() else {
            info!("ParentalControlEngine: reload completed");
            return;
        };

        let loaded = tokio::task::spawn_blocking(move || read_cidr_file(&path)).await;
        match loaded {
            Ok(Ok(Some(cidrs))) => {
                let mut count = 0;
                self.update(|r| {
                    r.vpn_cidrs = self.with_pinned(cidrs);
                    count = r.vpn_cidrs.len();
                });
                info!("ParentalControlEngine: reload completed, {} VPN CIDRs", count);
            }
            Ok(Ok(None)) => {}
            Ok(Err(e)) => warn!("ParentalControlEngine reload failed: {}", e),
            Err(e) => warn!("ParentalControlEngine reload task failed: {}", e),
        }
    }

    /// Append the pinned CIDRs missing from `cidrs`.
    /// Called under `update_lock` so a concurrent `add_vpn_cidr` is never lost.
    fn with_pinned(&self, mut cidrs: Vec<Cidr>) -> Vec<Cidr> {
        for cidr in self.pinned_cidrs.lock().iter() {
            if !cidrs.contains(cidr) {
                cidrs.push(*cidr);
            }
        }
        cidrs
    }

    /// Replace the VPN CIDR list. The new list survives later reloads.
    pub fn load_vpn_cidrs<S: AsRef<str>>(&self, cidrs: &[S]) -> Result<()> {
        let parsed = parse_cidrs(cidrs)?;
        info!("Loaded {} VPN CIDRs", parsed.len());
        *self.pinned_cidrs.lock() = parsed.clone();
        self.update(|r| r.vpn_cidrs = parsed);
        Ok(())
    }

    pub fn add_vpn_cidr(&self, cidr: &str) -> Result<()> {
        let cidr = Cidr::parse(cidr)?;
        {
            let mut pinned = self.pinned_cidrs.lock();
            if !pinned.contains(&cidr) {
                pinned.push(cidr);
            }
        }
        self.update(|r| {
            if !r.vpn_cidrs.contains(&cidr) {
                r.vpn_cidrs.push(cidr);
            }
        });
        Ok(())
    }

    pub fn add_vpn_hostname_signature(&self, sig: &str) {
        self.update(|r| {
            if !r.vpn_hostname_signatures.iter().any(|s| s == sig) {
                r.vpn_hostname_signatures.push(sig.to_string());
            }
        });
    }

    pub fn add_vpn_port(&self, port: u16) {
        self.update(|r| {
            r.vpn_ports.insert(port);
        });
    }

    pub fn add_blocked_category(&self, category: &str) {
        self.update(|r| {
            r.blocked_categories.insert(category.to_string());
        });
    }

    pub fn set_safe_search(&self, enforce: bool) {
        self.update(|r| r.safe_search_enforce = enforce);
    }

    pub fn is_vpn_ip(&self, ip: &str) -> bool {
        self.rules().vpn_cidrs.iter().any(|c| c.contains_str(ip))
    }

    pub fn is_vpn_port(&self, port: u16) -> bool {
        self.rules().vpn_ports.contains(&port)
    }

    pub fn is_vpn_hostname(&self, hostname: &str) -> bool {
        let lower = hostname.to_lowercase();
        self.rules()
            .vpn_hostname_signatures
            .iter()
            .any(|sig| lower.contains(&sig.to_lowercase()))
    }

    /// Decide against the local wall clock
    pub async fn should_block(
        &self,
        device: Option<&Device>,
        dest_ip: Option<IpAddr>,
        dest_port: Option<u16>,
        hostname: Option<&str>,
        url: Option<&str>,
    ) -> Option<BlockReason> {
        self.should_block_at(device, dest_ip, dest_port, hostname, url, Local::now().time())
            .await
    }

    pub async fn should_block_at(
        &self,
        device: Option<&Device>,
        dest_ip: Option<IpAddr>,
        dest_port: Option<u16>,
        hostname: Option<&str>,
        url: Option<&str>,
        now: NaiveTime,
    ) -> Option<BlockReason> {
        if let Some(device) = device {
            if !device.proxy_enabled {
                return None;
            }

            match self.store.find_policy(&device.mac).await {
                Ok(Some(policy)) => {
                    if let Some(reason) = rules::evaluate(&policy, hostname, url, now) {
                        return Some(reason);
                    }
                    // Allowlisted hosts skip the remaining layers too
                    if allowlisted(&policy.allow_domains, hostname) {
                        return None;
                    }
                }
                Ok(None) => {}
                Err(e) => warn!("Policy check failed for {}: {}", device.mac, e),
            }
        }

        let rules = self.rules();
        let hostname = hostname.filter(|h| !h.is_empty());

        if let Some(IpAddr::V4(ip)) = dest_ip {
            if rules.vpn_cidrs.iter().any(|c| c.contains(ip)) {
                return Some(BlockReason::VpnIp(IpAddr::V4(ip)));
            }
        }

        if let Some(port) = dest_port {
            if rules.vpn_ports.contains(&port) {
                return Some(BlockReason::VpnPort(port));
            }
        }

        let host = hostname?;
        let lower = host.to_lowercase();

        if rules
            .vpn_hostname_signatures
            .iter()
            .any(|sig| lower.contains(&sig.to_lowercase()))
        {
            return Some(BlockReason::VpnHostname(host.to_string()));
        }

        if let Some(category) = rules
            .blocked_categories
            .iter()
            .find(|c| lower.contains(&c.to_lowercase()))
        {
            return Some(BlockReason::Category(category.clone()));
        }

        if rules.safe_search_enforce && SEARCH_ENGINE_MARKERS.iter().any(|m| lower.contains(m)) {
            return Some(BlockReason::SafeSearch(host.to_string()));
        }

        None
    }
}

fn allowlisted(allow_domains: &[String], hostname: Option<&str>) -> bool {
    hostname
        .filter(|h| !h.is_empty())
        .map_or(false, |h| allow_domains.iter().any(|a| h.contains(a.as_str())))
}

fn parse_cidrs<S: AsRef<str>>(cidrs: &[S]) -> Result<Vec<Cidr>> {
    cidrs
        .iter()
        .map(|c| c.as_ref().trim())
        .filter(|c| !c.is_empty())
        .map(|c| Cidr::parse(c).map_err(WardenError::from))
        .collect()
}

/// Read a JSON array of CIDR strings. `Ok(None)` when the file can't be read.
fn read_cidr_file(path: &Path) -> Result<Option<Vec<Cidr>>> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) => {
            warn!("Failed to load VPN CIDR file {:?}: {}", path, e);
            return Ok(None);
        }
    };

    let entries: Vec<String> = match serde_json::from_str(&raw) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("VPN CIDR file {:?} is not a JSON array of strings: {}", path, e);
            return Ok(None);
        }
    };

    parse_cidrs(&entries).map(Some)
}
