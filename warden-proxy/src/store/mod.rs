//! Adapters for the external device, policy, and log stores
//!
//! The gateway core only talks to these traits. [`MemoryStore`] keeps
//! everything in process; [`JsonStore`] persists to a data directory.

pub mod json;
pub mod memory;
pub mod model;

pub use json::JsonStore;
pub use memory::MemoryStore;
pub use model::{
    Device, DeviceUpdate, LogEntry, Policy, PolicyUpdate, Schedule, ScheduleAction,
};

use crate::error::StoreError;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Device identity records, unique by MAC
#[async_trait]
pub trait DeviceRegistry: Send + Sync {
    async fn list_devices(&self) -> StoreResult<Vec<Device>>;

    async fn find_by_mac(&self, mac: &str) -> StoreResult<Option<Device>>;

    async fn find_by_ip(&self, ip: &str) -> StoreResult<Option<Device>>;

    /// Insert or update the device keyed by `mac`, returning the stored record
    async fn upsert_device(&self, mac: &str, update: DeviceUpdate) -> StoreResult<Device>;
}

/// Per-device policies, unique by device MAC
#[async_trait]
pub trait PolicyStore: Send + Sync {
    async fn list_policies(&self) -> StoreResult<Vec<Policy>>;

    async fn find_policy(&self, mac: &str) -> StoreResult<Option<Policy>>;

    /// Apply `update` to the policy for `mac`. Without `upsert` a missing
    /// policy is left missing and `Ok(false)` is returned.
    async fn update_policy(
        &self,
        mac: &str,
        update: PolicyUpdate,
        upsert: bool,
    ) -> StoreResult<bool>;
}

/// Append-only request log
#[async_trait]
pub trait LogSink: Send + Sync {
    async fn append(&self, entry: LogEntry) -> StoreResult<()>;

    /// Most recent entries first, optionally restricted to one MAC
    async fn recent(&self, mac: Option<&str>, limit: usize) -> StoreResult<Vec<LogEntry>>;
}

/// Append without letting a sink failure reach the caller
pub async fn record(sink: &Arc<dyn LogSink>, entry: LogEntry) {
    if let Err(e) = sink.append(entry).await {
        warn!("Failed to append log entry: {}", e);
    }
}
