//! Policy engine for evaluating per-device domain rules

use super::rules::{self, BlockReason};
use crate::store::{Device, Policy, PolicyStore, StoreResult};
use chrono::{Local, NaiveTime};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

type PolicyMap = HashMap<String, Policy>;

/// Cached view of every device policy in the store
///
/// The cache is an immutable map behind a shared pointer. [`PolicyEngine::reload`]
/// builds a complete replacement before swapping it in, so a concurrent
/// reader holds either the old map or the new one.
pub struct PolicyEngine {
    store: Arc<dyn PolicyStore>,
    policies: RwLock<Arc<PolicyMap>>,
}

impl PolicyEngine {
    /// Create an engine with an empty cache; call [`PolicyEngine::reload`] to fill it
    pub fn new(store: Arc<dyn PolicyStore>) -> Self {
        Self {
            store,
            policies: RwLock::new(Arc::new(HashMap::new())),
        }
    }

    /// Replace the cache with the current contents of the store.
    /// On failure the previous cache stays in place.
    pub async fn reload(&self) {
        match self.try_reload().await {
            Ok(count) => info!("PolicyEngine: loaded {} policies", count),
            Err(e) => warn!("PolicyEngine reload failed, keeping previous policies: {}", e),
        }
    }

    async fn try_reload(&self) -> StoreResult<usize> {
        let all = self.store.list_policies().await?;
        let fresh: PolicyMap = all
            .into_iter()
            .filter(|p| !p.device_mac.is_empty())
            .map(|p| (p.device_mac.clone(), p))
            .collect();
        let count = fresh.len();
        *self.policies.write() = Arc::new(fresh);
        Ok(count)
    }

    /// Current cache snapshot
    pub fn snapshot(&self) -> Arc<PolicyMap> {
        self.policies.read().clone()
    }

    pub fn policy_for(&self, mac: &str) -> Option<Policy> {
        self.snapshot().get(mac).cloned()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Decide against the local wall clock
    pub fn should_block(
        &self,
        device: Option<&Device>,
        hostname: Option<&str>,
        url: Option<&str>,
    ) -> Option<BlockReason> {
        self.should_block_at(device, hostname, url, Local::now().time())
    }

    pub fn should_block_at(
        &self,
        device: Option<&Device>,
        hostname: Option<&str>,
        url: Option<&str>,
        now: NaiveTime,
    ) -> Option<BlockReason> {
        let device = device?;
        let snapshot = self.snapshot();
        let policy = snapshot.get(&device.mac)?;
        rules::evaluate(policy, hostname, url, now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::store::{MemoryStore, PolicyUpdate, Schedule, ScheduleAction};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    const MAC: &str = "aa:bb:cc:dd:ee:ff";

    fn at(hhmm: &str) -> NaiveTime {
        NaiveTime::parse_from_str(hhmm, "%H:%M").unwrap()
    }

    fn device() -> Device {
        Device::new(MAC)
    }

    #[tokio::test]
    async fn test_no_device_or_policy_is_allowed() {
        let store = Arc::new(MemoryStore::new());
        let engine = PolicyEngine::new(store);
        engine.reload().await;

        assert_eq!(engine.should_block(None, Some("anything.com"), None), None);
        assert_eq!(engine.should_block(Some(&device()), Some("anything.com"), None), None);
    }

    #[tokio::test]
    async fn test_allow_precedes_block() {
        let store = Arc::new(MemoryStore::new());
        store.insert_policy(Policy {
            device_mac: MAC.to_string(),
            allow_domains: vec!["good.com".to_string()],
            block_domains: vec!["good.com".to_string()],
            ..Default::default()
        });
        let engine = PolicyEngine::new(store);
        engine.reload().await;

        assert_eq!(engine.should_block(Some(&device()), Some("sub.good.com"), None), None);
    }

    #[tokio::test]
    async fn test_schedule_with_simulated_clock() {
        let store = Arc::new(MemoryStore::new());
        store.insert_policy(Policy {
            device_mac: MAC.to_string(),
            schedule: Some(Schedule {
                start: Some("08:00".to_string()),
                end: Some("20:00".to_string()),
                action: ScheduleAction::BlockAllExceptAllowlist,
            }),
            ..Default::default()
        });
        let engine = PolicyEngine::new(store);
        engine.reload().await;

        let dev = device();
        assert!(engine
            .should_block_at(Some(&dev), Some("example.org"), None, at("12:00"))
            .is_some());
        assert_eq!(
            engine.should_block_at(Some(&dev), Some("example.org"), None, at("21:00")),
            None
        );
    }

    #[tokio::test]
    async fn test_reload_mirrors_store() {
        let store = Arc::new(MemoryStore::new());
        store
            .update_policy(MAC, PolicyUpdate::AddBlockDomain("games".to_string()), true)
            .await
            .unwrap();
        let engine = PolicyEngine::new(store.clone());
        engine.reload().await;
        assert!(engine.should_block(Some(&device()), Some("games.net"), None).is_some());

        store.remove_policy(MAC);
        engine.reload().await;
        assert!(engine.is_empty());
        assert_eq!(engine.should_block(Some(&device()), Some("games.net"), None), None);
    }

    struct FlakyStore {
        inner: MemoryStore,
        fail: AtomicBool,
    }

    #[async_trait]
    impl PolicyStore for FlakyStore {
        async fn list_policies(&self) -> StoreResult<Vec<Policy>> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(StoreError::NotFound("policies".to_string()));
            }
            self.inner.list_policies().await
        }

        async fn find_policy(&self, mac: &str) -> StoreResult<Option<Policy>> {
            self.inner.find_policy(mac).await
        }

        async fn update_policy(
            &self,
            mac: &str,
            update: PolicyUpdate,
            upsert: bool,
        ) -> StoreResult<bool> {
            self.inner.update_policy(mac, update, upsert).await
        }
    }

    #[tokio::test]
    async fn test_failed_reload_keeps_last_known_good() {
        let inner = MemoryStore::new();
        inner.insert_policy(Policy {
            device_mac: MAC.to_string(),
            block_domains: vec!["games".to_string()],
            ..Default::default()
        });
        let store = Arc::new(FlakyStore {
            inner,
            fail: AtomicBool::new(false),
        });
        let engine = PolicyEngine::new(store.clone());
        engine.reload().await;
        assert_eq!(engine.len(), 1);

        store.fail.store(true, Ordering::SeqCst);
        engine.reload().await;
        assert_eq!(engine.len(), 1);
        assert!(engine.should_block(Some(&device()), Some("games.net"), None).is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_readers_see_whole_snapshots() {
        // Each generation blocks "gen-N" for every device; a reader must never
        // see devices from two different generations in one snapshot.
        let store = Arc::new(MemoryStore::new());
        let macs: Vec<String> = (0..50).map(|i| format!("02:00:00:00:00:{:02x}", i)).collect();
        let seed = |generation: usize| {
            for mac in &macs {
                store.insert_policy(Policy {
                    device_mac: mac.clone(),
                    block_domains: vec![format!("gen-{}", generation)],
                    ..Default::default()
                });
            }
        };
        seed(0);

        let engine = Arc::new(PolicyEngine::new(store.clone()));
        engine.reload().await;

        let stop = Arc::new(AtomicBool::new(false));
        let mut readers = Vec::new();
        for _ in 0..4 {
            let engine = engine.clone();
            let stop = stop.clone();
            readers.push(tokio::spawn(async move {
                while !stop.load(Ordering::SeqCst) {
                    let snapshot = engine.snapshot();
                    let mut generations: Vec<&String> =
                        snapshot.values().map(|p| &p.block_domains[0]).collect();
                    generations.dedup();
                    assert_eq!(generations.len(), 1, "mixed snapshot: {:?}", generations);
                    tokio::task::yield_now().await;
                }
            }));
        }

        for generation in 1..20 {
            seed(generation);
            engine.reload().await;
            tokio::task::yield_now().await;
        }
        stop.store(true, Ordering::SeqCst);

        for reader in readers {
            reader.await.unwrap();
        }
        assert_eq!(engine.len(), 50);
    }
}
