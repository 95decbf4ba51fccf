//! In-process store

use super::model::{normalize_mac, Device, DeviceUpdate, LogEntry, Policy, PolicyUpdate};
use super::{DeviceRegistry, LogSink, PolicyStore, StoreResult};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, VecDeque};

/// Keeps devices, policies, and logs in memory for the life of the process
#[derive(Default)]
pub struct MemoryStore {
    devices: RwLock<BTreeMap<String, Device>>,
    policies: RwLock<BTreeMap<String, Policy>>,
    logs: Mutex<VecDeque<LogEntry>>,
    log_capacity: Option<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep at most `capacity` log entries, dropping the oldest first
    pub fn with_log_capacity(capacity: usize) -> Self {
        Self {
            log_capacity: Some(capacity.max(1)),
            ..Self::default()
        }
    }

    /// Seed a device record directly
    pub fn insert_device(&self, mut device: Device) {
        device.mac = normalize_mac(&device.mac);
        self.devices.write().insert(device.mac.clone(), device);
    }

    /// Seed or replace a policy directly
    pub fn insert_policy(&self, mut policy: Policy) {
        policy.device_mac = normalize_mac(&policy.device_mac);
        self.policies.write().insert(policy.device_mac.clone(), policy);
    }

    pub fn remove_policy(&self, mac: &str) {
        self.policies.write().remove(&normalize_mac(mac));
    }

    /// Snapshot of all log entries in append order
    pub fn logs(&self) -> Vec<LogEntry> {
        self.logs.lock().iter().cloned().collect()
    }

    pub fn device_count(&self) -> usize {
        self.devices.read().len()
    }
}

#[async_trait]
impl DeviceRegistry for MemoryStore {
    async fn list_devices(&self) -> StoreResult<Vec<Device>> {
        Ok(self.devices.read().values().cloned().collect())
    }

    async fn find_by_mac(&self, mac: &str) -> StoreResult<Option<Device>> {
        Ok(self.devices.read().get(&normalize_mac(mac)).cloned())
    }

    async fn find_by_ip(&self, ip: &str) -> StoreResult<Option<Device>> {
        Ok(self
            .devices
            .read()
            .values()
            .find(|d| d.ip == ip)
            .cloned())
    }

    async fn upsert_device(&self, mac: &str, update: DeviceUpdate) -> StoreResult<Device> {
        let mac = normalize_mac(mac);
        let mut devices = self.devices.write();
        let device = devices
            .entry(mac.clone())
            .or_insert_with(|| Device::new(&mac));
        device.apply(&update);
        Ok(device.clone())
    }
}

#[async_trait]
impl PolicyStore for MemoryStore {
    async fn list_policies(&self) -> StoreResult<Vec<Policy>> {
        Ok(self.policies.read().values().cloned().collect())
    }

    async fn find_policy(&self, mac: &str) -> StoreResult<Option<Policy>> {
        Ok(self.policies.read().get(&normalize_mac(mac)).cloned())
    }

    async fn update_policy(
        &self,
        mac: &str,
        update: PolicyUpdate,
        upsert: bool,
    ) -> StoreResult<bool> {
        let mac = normalize_mac(mac);
        let mut policies = self.policies.write();
        match policies.get_mut(&mac) {
            Some(policy) => policy.apply(&update),
            None if upsert => {
                let mut policy = Policy::new(&mac);
                policy.apply(&update);
                policies.insert(mac, policy);
            }
            None => return Ok(false),
        }
        Ok(true)
    }
}

#[async_trait]
impl LogSink for MemoryStore {
    async fn append(&self, entry: LogEntry) -> StoreResult<()> {
        let mut logs = self.logs.lock();
        logs.push_back(entry);
        if let Some(capacity) = self.log_capacity {
            while logs.len() > capacity {
                logs.pop_front();
            }
        }
        Ok(())
    }

    async fn recent(&self, mac: Option<&str>, limit: usize) -> StoreResult<Vec<LogEntry>> {
        let mac = mac.map(normalize_mac);
        let logs = self.logs.lock();
        Ok(logs
            .iter()
            .rev()
            .filter(|e| mac.as_deref().map_or(true, |m| e.mac == m))
            .take(limit)
            .cloned()
            .collect())
    }
}
