//! Maps network identity (IP, MAC) to device records

use super::neighbor::Neighbor;
use super::probe::NetworkProbe;
use crate::store::model::{normalize_mac, UNKNOWN_DEVICE_NAME};
use crate::store::{Device, DeviceRegistry, DeviceUpdate, StoreResult};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

pub struct DeviceResolver {
    subnet_prefix: String,
    registry: Arc<dyn DeviceRegistry>,
    probe: Arc<dyn NetworkProbe>,
    probe_timeout: Duration,
}

impl DeviceResolver {
    pub fn new(
        subnet_prefix: impl Into<String>,
        registry: Arc<dyn DeviceRegistry>,
        probe: Arc<dyn NetworkProbe>,
    ) -> Self {
        Self {
            subnet_prefix: subnet_prefix.into(),
            registry,
            probe,
            probe_timeout: Duration::from_secs(2),
        }
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn subnet_prefix(&self) -> &str {
        &self.subnet_prefix
    }

    /// Sweep `.1`..`.254` of the subnet, then record every neighbor the
    /// host learned. Probe failures are ignored; an unreadable neighbor
    /// table yields an empty result.
    pub async fn scan_network(&self) -> Vec<Neighbor> {
        self.sweep().await;

        let neighbors = match self.probe.neighbor_table().await {
            Ok(neighbors) => neighbors,
            Err(e) => {
                warn!("Failed to read neighbor table: {}", e);
                return Vec::new();
            }
        };

        for neighbor in &neighbors {
            let update = DeviceUpdate {
                ip: Some(neighbor.ip.clone()),
                ..Default::default()
            };
            if let Err(e) = self.registry.upsert_device(&neighbor.mac, update).await {
                warn!("Failed to upsert device {} ({}): {}", neighbor.mac, neighbor.ip, e);
            }
        }

        info!("Network scan found {} neighbors", neighbors.len());
        neighbors
    }

    async fn sweep(&self) {
        let mut probes = JoinSet::new();
        for host in 1..=254u8 {
            let addr = format!("{}.{}", self.subnet_prefix, host);
            let Ok(ip) = addr.parse::<Ipv4Addr>() else {
                warn!("Subnet prefix {:?} does not form IPv4 addresses", self.subnet_prefix);
                return;
            };
            let probe = Arc::clone(&self.probe);
            let limit = self.probe_timeout;
            probes.spawn(async move {
                let _ = tokio::time::timeout(limit, probe.probe(ip)).await;
            });
        }

        while probes.join_next().await.is_some() {}
        debug!("Probe sweep of {}.0/24 complete", self.subnet_prefix);
    }

    /// Find the device for `mac`, creating an "Unknown Device" record on
    /// first sight. Repeated calls return the same record.
    pub async fn resolve(&self, mac: &str) -> Option<Device> {
        let mac = normalize_mac(mac);
        if mac.is_empty() {
            return None;
        }

        match self.registry.find_by_mac(&mac).await {
            Ok(Some(device)) => return Some(device),
            Ok(None) => {}
            Err(e) => {
                warn!("Device lookup for {} failed: {}", mac, e);
                return None;
            }
        }

        let update = DeviceUpdate {
            name: Some(UNKNOWN_DEVICE_NAME.to_string()),
            ..Default::default()
        };
        match self.registry.upsert_device(&mac, update).await {
            Ok(device) => {
                info!("New device seen: {}", mac);
                Some(device)
            }
            Err(e) => {
                warn!("Failed to create device {}: {}", mac, e);
                None
            }
        }
    }

    pub async fn device_by_ip(&self, ip: &str) -> Option<Device> {
        if ip.is_empty() {
            return None;
        }
        match self.registry.find_by_ip(ip).await {
            Ok(device) => device,
            Err(e) => {
                warn!("Device lookup for {} failed: {}", ip, e);
                None
            }
        }
    }

    pub async fn device_by_mac(&self, mac: &str) -> Option<Device> {
        let mac = normalize_mac(mac);
        if mac.is_empty() {
            return None;
        }
        match self.registry.find_by_mac(&mac).await {
            Ok(device) => device,
            Err(e) => {
                warn!("Device lookup for {} failed: {}", mac, e);
                None
            }
        }
    }

    pub async fn list_devices(&self) -> StoreResult<Vec<Device>> {
        self.registry.list_devices().await
    }

    pub fn registry(&self) -> &Arc<dyn DeviceRegistry> {
        &self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeProbe {
        probes: AtomicUsize,
        table: Option<Vec<Neighbor>>,
        hang: bool,
    }

    impl FakeProbe {
        fn with_table(table: Vec<Neighbor>) -> Self {
            Self {
                probes: AtomicUsize::new(0),
                table: Some(table),
                hang: false,
            }
        }
    }

    #[async_trait]
    impl NetworkProbe for FakeProbe {
        async fn probe(&self, _ip: Ipv4Addr) -> bool {
            self.probes.fetch_add(1, Ordering::SeqCst);
            if self.hang {
                std::future::pending::<()>().await;
            }
            false
        }

        async fn neighbor_table(&self) -> io::Result<Vec<Neighbor>> {
            self.table
                .clone()
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no arp"))
        }
    }

    fn neighbor(ip: &str, mac: &str) -> Neighbor {
        Neighbor {
            ip: ip.into(),
            mac: mac.into(),
        }
    }

    #[tokio::test]
    async fn test_scan_probes_whole_subnet_and_upserts() {
        let store = Arc::new(MemoryStore::new());
        let probe = Arc::new(FakeProbe::with_table(vec![
            neighbor("192.168.1.10", "aa:bb:cc:dd:ee:01"),
            neighbor("192.168.1.11", "aa:bb:cc:dd:ee:02"),
        ]));
        let resolver = DeviceResolver::new("192.168.1", store.clone(), probe.clone());

        let found = resolver.scan_network().await;
        assert_eq!(found.len(), 2);
        assert_eq!(probe.probes.load(Ordering::SeqCst), 254);

        let device = resolver.device_by_ip("192.168.1.11").await.unwrap();
        assert_eq!(device.mac, "aa:bb:cc:dd:ee:02");
        assert_eq!(store.device_count(), 2);
    }

    #[tokio::test]
    async fn test_scan_updates_existing_ip() {
        let store = Arc::new(MemoryStore::new());
        let mut device = Device::new("aa:bb:cc:dd:ee:01");
        device.ip = "192.168.1.5".into();
        device.name = Some("Laptop".into());
        store.insert_device(device);

        let probe = Arc::new(FakeProbe::with_table(vec![neighbor(
            "192.168.1.50",
            "aa:bb:cc:dd:ee:01",
        )]));
        let resolver = DeviceResolver::new("192.168.1", store.clone(), probe);
        resolver.scan_network().await;

        let device = resolver.device_by_mac("AA:BB:CC:DD:EE:01").await.unwrap();
        assert_eq!(device.ip, "192.168.1.50");
        assert_eq!(device.name.as_deref(), Some("Laptop"));
    }

    #[tokio::test]
    async fn test_unreadable_table_yields_empty() {
        let store = Arc::new(MemoryStore::new());
        let probe = Arc::new(FakeProbe {
            probes: AtomicUsize::new(0),
            table: None,
            hang: false,
        });
        let resolver = DeviceResolver::new("10.0.0", store.clone(), probe);
        assert!(resolver.scan_network().await.is_empty());
        assert_eq!(store.device_count(), 0);
    }

    #[tokio::test]
    async fn test_hung_probes_are_bounded_by_timeout() {
        let store = Arc::new(MemoryStore::new());
        let probe = Arc::new(FakeProbe {
            probes: AtomicUsize::new(0),
            table: Some(vec![neighbor("10.0.0.2", "aa:bb:cc:dd:ee:03")]),
            hang: true,
        });
        let resolver = DeviceResolver::new("10.0.0", store, probe)
            .with_probe_timeout(Duration::from_millis(50));

        let found = tokio::time::timeout(Duration::from_secs(5), resolver.scan_network())
            .await
            .expect("scan should finish once probes time out");
        assert_eq!(found.len(), 1);
    }

    #[tokio::test]
    async fn test_resolve_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let resolver = DeviceResolver::new(
            "192.168.1",
            store.clone(),
            Arc::new(FakeProbe::with_table(vec![])),
        );

        let first = resolver.resolve("AA:BB:CC:00:00:01").await.unwrap();
        assert_eq!(first.mac, "aa:bb:cc:00:00:01");
        assert_eq!(first.name.as_deref(), Some(UNKNOWN_DEVICE_NAME));
        assert!(first.proxy_enabled);

        let second = resolver.resolve("aa:bb:cc:00:00:01").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(store.device_count(), 1);
    }

    #[tokio::test]
    async fn test_resolve_keeps_existing_name() {
        let store = Arc::new(MemoryStore::new());
        let mut device = Device::new("aa:bb:cc:00:00:02");
        device.name = Some("Tablet".into());
        store.insert_device(device);

        let resolver = DeviceResolver::new(
            "192.168.1",
            store,
            Arc::new(FakeProbe::with_table(vec![])),
        );
        let device = resolver.resolve("aa:bb:cc:00:00:02").await.unwrap();
        assert_eq!(device.name.as_deref(), Some("Tablet"));
    }

    #[tokio::test]
    async fn test_empty_identifiers() {
        let resolver = DeviceResolver::new(
            "192.168.1",
            Arc::new(MemoryStore::new()),
            Arc::new(FakeProbe::with_table(vec![])),
        );
        assert!(resolver.resolve("").await.is_none());
        assert!(resolver.resolve("   ").await.is_none());
        assert!(resolver.device_by_ip("").await.is_none());
        assert!(resolver.device_by_mac("").await.is_none());
    }
}
