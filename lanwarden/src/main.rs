use anyhow::Context;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::filter::EnvFilter;
use warden_admin::{AdminServer, AdminState};
use warden_proxy::capture::{start_capture, PassivePipeline};
use warden_proxy::config::StoreConfig;
use warden_proxy::{
    Config, ConfigLoader, ConfigValidator, DeviceRegistry, DeviceResolver, JsonStore, LogSink,
    MemoryStore, ParentalControlEngine, PolicyEngine, PolicyStore, ProxyServer, ProxyServerConfig,
    SystemProbe,
};

#[derive(Parser, Debug)]
#[command(name = "lanwarden")]
#[command(about = "LAN gateway with per-device filtering and parental controls")]
struct Args {
    /// Config file path
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Proxy listen address, overriding [proxy].listen
    #[arg(long, short = 'l')]
    listen: Option<SocketAddr>,

    /// Admin API listen address, overriding [admin].listen
    #[arg(long)]
    admin_listen: Option<SocketAddr>,

    /// Capture interface; enables passive capture
    #[arg(long, short = 'i')]
    interface: Option<String>,

    /// Disable passive capture even if configured
    #[arg(long)]
    no_capture: bool,

    /// Do not start the admin API
    #[arg(long)]
    no_admin: bool,

    /// Enable debug logging
    #[arg(long, short = 'v')]
    verbose: bool,
}

impl Args {
    fn apply(&self, config: &mut Config) {
        if let Some(listen) = self.listen {
            config.proxy.listen = listen;
        }
        if let Some(listen) = self.admin_listen {
            config.admin.listen = listen;
        }
        if let Some(interface) = &self.interface {
            config.capture.interface = Some(interface.clone());
            config.capture.enabled = true;
        }
        if self.no_capture {
            config.capture.enabled = false;
        }
        if self.no_admin {
            config.admin.enabled = false;
        }
    }
}

struct Stores {
    devices: Arc<dyn DeviceRegistry>,
    policies: Arc<dyn PolicyStore>,
    logs: Arc<dyn LogSink>,
}

async fn open_stores(config: &StoreConfig) -> anyhow::Result<Stores> {
    match &config.data_dir {
        Some(dir) => {
            let store = Arc::new(
                JsonStore::open(dir)
                    .await
                    .with_context(|| format!("Failed to open data directory {}", dir.display()))?,
            );
            info!("Using data directory {}", dir.display());
            Ok(Stores {
                devices: store.clone(),
                policies: store.clone(),
                logs: store,
            })
        }
        None => {
            warn!("No data directory configured; records are kept in memory only");
            let store = Arc::new(MemoryStore::new());
            Ok(Stores {
                devices: store.clone(),
                policies: store.clone(),
                logs: store,
            })
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    let env_filter = if args.verbose {
        EnvFilter::from_default_env()
            .add_directive(tracing_subscriber::filter::LevelFilter::DEBUG.into())
    } else {
        EnvFilter::from_default_env()
            .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    // Load configuration
    let mut config =
        ConfigLoader::load_or_default(args.config.clone()).context("Failed to load configuration")?;
    args.apply(&mut config);
    ConfigValidator::validate(&config).context("Invalid configuration")?;

    let stores = open_stores(&config.store).await?;

    let resolver = Arc::new(
        DeviceResolver::new(
            config.discovery.subnet_prefix.clone(),
            stores.devices.clone(),
            Arc::new(SystemProbe::new()),
        )
        .with_probe_timeout(Duration::from_millis(config.discovery.probe_timeout_ms)),
    );
    let policy_engine = Arc::new(PolicyEngine::new(stores.policies.clone()));
    let parental_engine = Arc::new(
        ParentalControlEngine::new(&config.parental, stores.policies.clone())
            .context("Failed to build parental control engine")?,
    );

    let cancel = CancellationToken::new();
    let mut tasks = JoinSet::new();

    if config.discovery.scan_on_start {
        let resolver = resolver.clone();
        tasks.spawn(async move {
            resolver.scan_network().await;
        });
    }

    let proxy = Arc::new(ProxyServer::new(ProxyServerConfig {
        listen: config.proxy.listen,
        connect_timeout: Duration::from_millis(config.proxy.connect_timeout_ms),
        max_connections: config.proxy.max_connections,
        resolver: resolver.clone(),
        policy_engine: policy_engine.clone(),
        parental_engine: parental_engine.clone(),
        log_sink: stores.logs.clone(),
    }));
    proxy.start().await.context("Failed to start proxy")?;
    if config.proxy.max_connections.is_none() {
        info!("No proxy connection limit configured");
    }

    if config.capture.enabled {
        match start_capture(&config.capture, cancel.child_token()) {
            Ok(frames) => {
                let pipeline =
                    PassivePipeline::new(resolver.clone(), parental_engine.clone(), stores.logs.clone());
                tasks.spawn(pipeline.run(frames, cancel.clone()));
            }
            Err(e) => warn!("Passive capture disabled: {}", e),
        }
    }

    if config.admin.enabled {
        let state = AdminState {
            resolver: resolver.clone(),
            devices: stores.devices.clone(),
            policies: stores.policies.clone(),
            logs: stores.logs.clone(),
            policy_engine: policy_engine.clone(),
            parental_engine: parental_engine.clone(),
            proxy: proxy.clone(),
        };
        let admin = AdminServer::bind(config.admin.listen, state)
            .await
            .context("Failed to start admin API")?;
        tasks.spawn(admin.run(cancel.clone()));
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Shutting down");

    cancel.cancel();
    proxy.stop().await;

    // A scan still in flight is not worth waiting for
    let _ = tokio::time::timeout(Duration::from_secs(2), async {
        while tasks.join_next().await.is_some() {}
    })
    .await;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides() {
        let args = Args::parse_from([
            "lanwarden",
            "--listen",
            "127.0.0.1:9000",
            "--interface",
            "eth1",
            "--no-admin",
        ]);
        let mut config = Config::default();
        args.apply(&mut config);

        assert_eq!(config.proxy.listen.port(), 9000);
        assert!(config.capture.enabled);
        assert_eq!(config.capture.interface.as_deref(), Some("eth1"));
        assert!(!config.admin.enabled);
    }

    #[test]
    fn test_no_capture_wins() {
        let args = Args::parse_from(["lanwarden", "-i", "eth0", "--no-capture"]);
        let mut config = Config::default();
        args.apply(&mut config);
        assert!(!config.capture.enabled);
    }

    #[tokio::test]
    async fn test_memory_stores_without_data_dir() {
        let stores = open_stores(&StoreConfig::default()).await.unwrap();
        assert!(stores.devices.list_devices().await.unwrap().is_empty());
    }
}
