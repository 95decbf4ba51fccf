//! Decision and logging for passively observed frames

use super::parser::ParsedFrame;
use crate::device::DeviceResolver;
use crate::filter::ParentalControlEngine;
use crate::store::{record, LogEntry, LogSink};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub struct PassivePipeline {
    resolver: Arc<DeviceResolver>,
    parental: Arc<ParentalControlEngine>,
    sink: Arc<dyn LogSink>,
}

impl PassivePipeline {
    pub fn new(
        resolver: Arc<DeviceResolver>,
        parental: Arc<ParentalControlEngine>,
        sink: Arc<dyn LogSink>,
    ) -> Self {
        Self {
            resolver,
            parental,
            sink,
        }
    }

    /// Consume frames until the channel closes or `cancel` fires
    pub async fn run(self, mut frames: mpsc::Receiver<ParsedFrame>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                frame = frames.recv() => match frame {
                    Some(frame) => self.handle_frame(frame).await,
                    None => break,
                },
            }
        }
        debug!("Passive pipeline stopped");
    }

    pub async fn handle_frame(&self, frame: ParsedFrame) {
        let Some(src_mac) = frame.src_mac.as_deref() else {
            return;
        };

        let device = self.resolver.resolve(src_mac).await;
        let hostname = frame.hostname.as_deref();
        let reason = self
            .parental
            .should_block(device.as_ref(), frame.dst_ip, None, hostname, None)
            .await;

        let mac = device
            .as_ref()
            .map(|d| d.mac.clone())
            .unwrap_or_else(|| src_mac.to_string());
        let target = hostname
            .map(str::to_string)
            .or_else(|| frame.dst_ip.map(|ip| ip.to_string()))
            .unwrap_or_default();

        match &reason {
            Some(reason) => info!("[{}] {} -> BLOCKED ({})", mac, target, reason),
            None => debug!("[{}] {} -> allowed", mac, target),
        }

        record(
            &self.sink,
            LogEntry {
                mac,
                ip: frame.src_ip.map(|ip| ip.to_string()),
                url: hostname.unwrap_or_default().to_string(),
                hostname: frame.hostname.clone(),
                method: frame.protocol.clone().unwrap_or_default(),
                blocked: reason.is_some(),
                status_code: None,
                data_length: None,
                timestamp: Utc::now(),
            },
        )
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ParentalConfig;
    use crate::device::{Neighbor, NetworkProbe};
    use crate::store::{MemoryStore, Policy};
    use async_trait::async_trait;
    use std::io;
    use std::net::Ipv4Addr;

    struct NoProbe;

    #[async_trait]
    impl NetworkProbe for NoProbe {
        async fn probe(&self, _ip: Ipv4Addr) -> bool {
            false
        }

        async fn neighbor_table(&self) -> io::Result<Vec<Neighbor>> {
            Ok(Vec::new())
        }
    }

    fn pipeline(store: Arc<MemoryStore>, config: ParentalConfig) -> PassivePipeline {
        let resolver = Arc::new(DeviceResolver::new("192.168.1", store.clone(), Arc::new(NoProbe)));
        let parental = Arc::new(ParentalControlEngine::new(&config, store.clone()).unwrap());
        PassivePipeline::new(resolver, parental, store)
    }

    fn frame(mac: Option<&str>, host: Option<&str>, dst: &str) -> ParsedFrame {
        ParsedFrame {
            src_mac: mac.map(str::to_string),
            dst_mac: Some("ff:ff:ff:ff:ff:ff".into()),
            src_ip: Some("192.168.1.30".parse().unwrap()),
            dst_ip: Some(dst.parse().unwrap()),
            protocol: Some("tcp".into()),
            hostname: host.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_frame_creates_device_and_logs() {
        let store = Arc::new(MemoryStore::new());
        let pipeline = pipeline(store.clone(), ParentalConfig::default());

        pipeline
            .handle_frame(frame(Some("AA:BB:CC:00:00:09"), Some("example.com"), "93.184.216.34"))
            .await;

        assert_eq!(store.device_count(), 1);
        let logs = store.logs();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].mac, "aa:bb:cc:00:00:09");
        assert_eq!(logs[0].url, "example.com");
        assert_eq!(logs[0].method, "tcp");
        assert_eq!(logs[0].ip.as_deref(), Some("192.168.1.30"));
        assert!(!logs[0].blocked);
        assert!(logs[0].status_code.is_none());
    }

    #[tokio::test]
    async fn test_frame_without_mac_is_skipped() {
        let store = Arc::new(MemoryStore::new());
        let pipeline = pipeline(store.clone(), ParentalConfig::default());

        pipeline.handle_frame(ParsedFrame::default()).await;
        pipeline.handle_frame(frame(None, Some("example.com"), "1.1.1.1")).await;

        assert_eq!(store.device_count(), 0);
        assert!(store.logs().is_empty());
    }

    #[tokio::test]
    async fn test_vpn_destination_is_flagged() {
        let store = Arc::new(MemoryStore::new());
        let config = ParentalConfig {
            vpn_cidrs: vec!["10.8.0.0/16".into()],
            ..Default::default()
        };
        let pipeline = pipeline(store.clone(), config);

        pipeline.handle_frame(frame(Some("aa:bb:cc:00:00:0a"), None, "10.8.3.4")).await;

        let logs = store.logs();
        assert_eq!(logs.len(), 1);
        assert!(logs[0].blocked);
        assert_eq!(logs[0].url, "");
        assert!(logs[0].hostname.is_none());
    }

    #[tokio::test]
    async fn test_policy_domain_applies_to_passive_frames() {
        let store = Arc::new(MemoryStore::new());
        let mut policy = Policy::new("aa:bb:cc:00:00:0b");
        policy.block_domains = vec!["games.example".into()];
        store.insert_policy(policy);
        let pipeline = pipeline(store.clone(), ParentalConfig::default());

        pipeline
            .handle_frame(frame(Some("aa:bb:cc:00:00:0b"), Some("play.games.example"), "1.2.3.4"))
            .await;

        assert!(store.logs()[0].blocked);
    }

    #[tokio::test]
    async fn test_run_stops_when_channel_closes() {
        let store = Arc::new(MemoryStore::new());
        let pipeline = pipeline(store.clone(), ParentalConfig::default());
        let (tx, rx) = mpsc::channel(4);

        tx.send(frame(Some("aa:bb:cc:00:00:0c"), Some("a.example"), "1.1.1.1"))
            .await
            .unwrap();
        tx.send(frame(Some("aa:bb:cc:00:00:0c"), Some("b.example"), "1.1.1.1"))
            .await
            .unwrap();
        drop(tx);

        pipeline.run(rx, CancellationToken::new()).await;
        assert_eq!(store.logs().len(), 2);
        assert_eq!(store.device_count(), 1);
    }
}
