//! File-backed store
//!
//! Devices and policies are kept as JSON arrays and rewritten on every
//! mutation; logs are appended as JSON lines. Reads are served from an
//! in-memory copy loaded at open time.

use super::memory::MemoryStore;
use super::model::{Device, DeviceUpdate, LogEntry, Policy, PolicyUpdate};
use super::{DeviceRegistry, LogSink, PolicyStore, StoreResult};
use crate::error::StoreError;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

const DEVICES_FILE: &str = "devices.json";
const POLICIES_FILE: &str = "policies.json";
const LOGS_FILE: &str = "logs.jsonl";

/// Log entries kept in memory for `recent` queries
const LOG_CACHE_CAPACITY: usize = 10_000;

pub struct JsonStore {
    dir: PathBuf,
    cache: MemoryStore,
    write_lock: Mutex<()>,
}

impl JsonStore {
    /// Open (creating if needed) a store rooted at `dir`
    pub async fn open(dir: impl AsRef<Path>) -> StoreResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| StoreError::Io {
                path: dir.clone(),
                source,
            })?;

        let cache = MemoryStore::with_log_capacity(LOG_CACHE_CAPACITY);

        let devices: Vec<Device> = read_json(&dir.join(DEVICES_FILE)).await?;
        for device in devices {
            cache.insert_device(device);
        }

        let policies: Vec<Policy> = read_json(&dir.join(POLICIES_FILE)).await?;
        for policy in policies {
            cache.insert_policy(policy);
        }

        for entry in read_log_lines(&dir.join(LOGS_FILE)).await? {
            cache.append(entry).await?;
        }

        debug!("Opened JSON store at {:?}", dir);

        Ok(Self {
            dir,
            cache,
            write_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn persist_devices(&self) -> StoreResult<()> {
        let devices = self.cache.list_devices().await?;
        write_json(&self.dir.join(DEVICES_FILE), &devices).await
    }

    async fn persist_policies(&self) -> StoreResult<()> {
        let policies = self.cache.list_policies().await?;
        write_json(&self.dir.join(POLICIES_FILE), &policies).await
    }
}

async fn read_json<T: DeserializeOwned + Default>(path: &Path) -> StoreResult<T> {
    match tokio::fs::read_to_string(path).await {
        Ok(contents) if contents.trim().is_empty() => Ok(T::default()),
        Ok(contents) => Ok(serde_json::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
        Err(source) => Err(StoreError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

async fn read_log_lines(path: &Path) -> StoreResult<Vec<LogEntry>> {
    let contents = match tokio::fs::read_to_string(path).await {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(StoreError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    let mut entries = Vec::new();
    for (lineno, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<LogEntry>(line) {
            Ok(entry) => entries.push(entry),
            Err(e) => warn!("Skipping malformed log line {} in {:?}: {}", lineno + 1, path, e),
        }
    }
    Ok(entries)
}

/// Write through a temporary file so readers never see a truncated file
async fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> StoreResult<()> {
    let data = serde_json::to_vec_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    let io_err = |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    };
    tokio::fs::write(&tmp, &data).await.map_err(io_err)?;
    tokio::fs::rename(&tmp, path).await.map_err(io_err)?;
    Ok(())
}

#[async_trait]
impl DeviceRegistry for JsonStore {
    async fn list_devices(&self) -> StoreResult<Vec<Device>> {
        self.cache.list_devices().await
    }

    async fn find_by_mac(&self, mac: &str) -> StoreResult<Option<Device>> {
        self.cache.find_by_mac(mac).await
    }

    async fn find_by_ip(&self, ip: &str) -> StoreResult<Option<Device>> {
        self.cache.find_by_ip(ip).await
    }

    async fn upsert_device(&self, mac: &str, update: DeviceUpdate) -> StoreResult<Device> {
        let _guard = self.write_lock.lock().await;
        let device = self.cache.upsert_device(mac, update).await?;
        self.persist_devices().await?;
        Ok(device)
    }
}

#[async_trait]
impl PolicyStore for JsonStore {
    async fn list_policies(&self) -> StoreResult<Vec<Policy>> {
        self.cache.list_policies().await
    }

    async fn find_policy(&self, mac: &str) -> StoreResult<Option<Policy>> {
        self.cache.find_policy(mac).await
    }

    async fn update_policy(
        &self,
        mac: &str,
        update: PolicyUpdate,
        upsert: bool,
    ) -> StoreResult<bool> {
        let _guard = self.write_lock.lock().await;
        let applied = self.cache.update_policy(mac, update, upsert).await?;
        if applied {
            self.persist_policies().await?;
        }
        Ok(applied)
    }
}

#[async_trait]
impl LogSink for JsonStore {
    async fn append(&self, entry: LogEntry) -> StoreResult<()> {
        let path = self.dir.join(LOGS_FILE);
        let mut line = serde_json::to_vec(&entry)?;
        line.push(b'\n');

        let io_err = |source| StoreError::Io {
            path: path.clone(),
            source,
        };
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(io_err)?;
        file.write_all(&line).await.map_err(io_err)?;

        self.cache.append(entry).await
    }

    async fn recent(&self, mac: Option<&str>, limit: usize) -> StoreResult<Vec<LogEntry>> {
        self.cache.recent(mac, limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_records_survive_reopen() {
        let dir = TempDir::new().unwrap();

        {
            let store = JsonStore::open(dir.path()).await.unwrap();
            store
                .upsert_device(
                    "AA:BB:CC:DD:EE:01",
                    DeviceUpdate {
                        ip: Some("192.168.1.44".to_string()),
                        ..Default::default()
                    },
                )
                .await
                .unwrap();
            store
                .update_policy(
                    "aa:bb:cc:dd:ee:01",
                    PolicyUpdate::AddBlockDomain("games.example".to_string()),
                    true,
                )
                .await
                .unwrap();
            store
                .append(LogEntry {
                    mac: "aa:bb:cc:dd:ee:01".to_string(),
                    ip: Some("192.168.1.44".to_string()),
                    url: "games.example".to_string(),
                    hostname: Some("games.example".to_string()),
                    method: "CONNECT".to_string(),
                    blocked: true,
                    status_code: Some(403),
                    data_length: Some(0),
                    timestamp: Utc::now(),
                })
                .await
                .unwrap();
        }

        let store = JsonStore::open(dir.path()).await.unwrap();
        let device = store.find_by_ip("192.168.1.44").await.unwrap().unwrap();
        assert_eq!(device.mac, "aa:bb:cc:dd:ee:01");

        let policy = store.find_policy("aa:bb:cc:dd:ee:01").await.unwrap().unwrap();
        assert_eq!(policy.block_domains, vec!["games.example"]);

        let logs = store.recent(None, 10).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert!(logs[0].blocked);
    }

    #[tokio::test]
    async fn test_hand_edited_uppercase_mac_is_found() {
        let dir = TempDir::new().unwrap();
        tokio::fs::write(
            dir.path().join(POLICIES_FILE),
            r#"[{"device_mac": "AA:BB:CC:DD:EE:02", "block_domains": ["games.example"]}]"#,
        )
        .await
        .unwrap();

        let store = JsonStore::open(dir.path()).await.unwrap();
        let policy = store.find_policy("aa:bb:cc:dd:ee:02").await.unwrap().unwrap();
        assert_eq!(policy.device_mac, "aa:bb:cc:dd:ee:02");
        assert_eq!(policy.block_domains, vec!["games.example"]);
    }

    #[tokio::test]
    async fn test_malformed_log_lines_are_skipped() {
        let dir = TempDir::new().unwrap();
        tokio::fs::write(dir.path().join(LOGS_FILE), "not json\n\n")
            .await
            .unwrap();

        let store = JsonStore::open(dir.path()).await.unwrap();
        assert!(store.recent(None, 10).await.unwrap().is_empty());
    }
}
