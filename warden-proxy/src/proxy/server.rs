use super::request::{
    literal_ip, normalize_peer_ip, parse_request, send_connect_success, send_error_response,
    ParsedRequest, RequestKind,
};
use super::tunnel::{relay, ByteCounters};
use crate::device::DeviceResolver;
use crate::error::{Result, WardenError};
use crate::filter::{BlockReason, ParentalControlEngine, PolicyEngine};
use crate::store::{record, Device, LogEntry, LogSink};
use chrono::Utc;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{lookup_host, TcpListener, TcpStream};
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Size of the single read that must contain the request line
const FIRST_READ_SIZE: usize = 16 * 1024;

/// MAC recorded for clients that do not map to a known device
const UNKNOWN_MAC: &str = "unknown";

/// Intercepting proxy configuration
#[derive(Clone)]
pub struct ProxyServerConfig {
    /// TCP address to listen on
    pub listen: SocketAddr,
    /// Upper bound for establishing the upstream connection
    pub connect_timeout: Duration,
    /// Concurrent connection limit; unbounded when `None`
    pub max_connections: Option<usize>,
    pub resolver: Arc<DeviceResolver>,
    pub policy_engine: Arc<PolicyEngine>,
    pub parental_engine: Arc<ParentalControlEngine>,
    pub log_sink: Arc<dyn LogSink>,
}

struct Running {
    addr: SocketAddr,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// HTTP CONNECT / plain HTTP intercepting proxy
pub struct ProxyServer {
    config: ProxyServerConfig,
    state: Mutex<Option<Running>>,
}

impl ProxyServer {
    pub fn new(config: ProxyServerConfig) -> Self {
        Self {
            config,
            state: Mutex::new(None),
        }
    }

    /// Reload both engines, bind, and start accepting. Returns the bound
    /// address. Calling this while already running returns the current
    /// address without rebinding.
    pub async fn start(&self) -> Result<SocketAddr> {
        let mut state = self.state.lock().await;
        if let Some(running) = state.as_ref() {
            if !running.task.is_finished() {
                return Ok(running.addr);
            }
        }

        self.config.policy_engine.reload().await;
        self.config.parental_engine.reload().await;

        let listener = TcpListener::bind(self.config.listen)
            .await
            .map_err(|source| WardenError::Bind {
                addr: self.config.listen,
                source,
            })?;
        let addr = listener.local_addr()?;
        info!("Proxy listening on {}", addr);

        let cancel = CancellationToken::new();
        let handler = Arc::new(ConnectionHandler::new(&self.config));
        let limiter = self
            .config
            .max_connections
            .map(|n| Arc::new(Semaphore::new(n)));
        let task = tokio::spawn(accept_loop(listener, handler, limiter, cancel.clone()));

        *state = Some(Running { addr, cancel, task });
        Ok(addr)
    }

    /// Stop accepting and release the listening socket. Tunnels that are
    /// already established keep running until their peers close.
    pub async fn stop(&self) {
        let Some(running) = self.state.lock().await.take() else {
            return;
        };
        running.cancel.cancel();
        if let Err(e) = running.task.await {
            warn!("Proxy accept loop ended abnormally: {}", e);
        }
        info!("Proxy on {} stopped", running.addr);
    }

    pub async fn is_running(&self) -> bool {
        self.state
            .lock()
            .await
            .as_ref()
            .is_some_and(|r| !r.task.is_finished())
    }

    /// Bound address while running
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.state.lock().await.as_ref().map(|r| r.addr)
    }
}

async fn accept_loop(
    listener: TcpListener,
    handler: Arc<ConnectionHandler>,
    limiter: Option<Arc<Semaphore>>,
    cancel: CancellationToken,
) {
    loop {
        let permit = match &limiter {
            Some(semaphore) => tokio::select! {
                _ = cancel.cancelled() => break,
                permit = Arc::clone(semaphore).acquire_owned() => match permit {
                    Ok(permit) => Some(permit),
                    Err(_) => break,
                },
            },
            None => None,
        };

        tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let handler = Arc::clone(&handler);
                    tokio::spawn(async move {
                        let _permit = permit;
                        handler.handle(stream, peer).await;
                    });
                }
                Err(e) => {
                    // EMFILE and friends clear up once connections close
                    warn!("Accept failed: {}", e);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            },
        }
    }
}

/// Shared per-connection collaborators
struct ConnectionHandler {
    connect_timeout: Duration,
    resolver: Arc<DeviceResolver>,
    policy_engine: Arc<PolicyEngine>,
    parental_engine: Arc<ParentalControlEngine>,
    log_sink: Arc<dyn LogSink>,
}

/// What to record about one connection
struct Outcome {
    blocked: bool,
    status_code: u16,
    data_length: u64,
}

impl ConnectionHandler {
    fn new(config: &ProxyServerConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout,
            resolver: Arc::clone(&config.resolver),
            policy_engine: Arc::clone(&config.policy_engine),
            parental_engine: Arc::clone(&config.parental_engine),
            log_sink: Arc::clone(&config.log_sink),
        }
    }

    async fn handle(&self, mut client: TcpStream, peer: SocketAddr) {
        let mut buf = vec![0u8; FIRST_READ_SIZE];
        let n = match client.read(&mut buf).await {
            Ok(0) => return,
            Ok(n) => n,
            Err(e) => {
                debug!("Read from {} failed: {}", peer, e);
                return;
            }
        };
        let first_chunk = &buf[..n];

        let request = parse_request(first_chunk);
        let client_ip = normalize_peer_ip(peer.ip());
        let device = self.resolver.device_by_ip(&client_ip.to_string()).await;
        debug!(
            "{} {} from {} ({})",
            request.kind.method(),
            request.url,
            client_ip,
            device.as_ref().map_or(UNKNOWN_MAC, |d| d.mac.as_str())
        );

        let hostname = Some(request.hostname.as_str()).filter(|h| !h.is_empty());
        let url = Some(request.url.as_str()).filter(|u| !u.is_empty());
        let targets = match hostname {
            Some(host) => self.lookup_targets(host, request.dest_port).await,
            None => Vec::new(),
        };

        let policy_reason = self
            .policy_engine
            .should_block(device.as_ref(), hostname, url);
        let parental_reason = self
            .parental_decision(device.as_ref(), &targets, request.dest_port, hostname, url)
            .await;

        if let Some(reason) = policy_reason.or(parental_reason) {
            info!(
                "[{}] {} -> BLOCKED ({})",
                device.as_ref().map_or(UNKNOWN_MAC, |d| d.mac.as_str()),
                hostname.unwrap_or("<no host>"),
                reason
            );
            let _ = send_error_response(&mut client, 403, "Forbidden", &reason.to_string()).await;
            let _ = client.shutdown().await;
            self.log(&request, client_ip, device.as_ref(), Outcome::blocked())
                .await;
            return;
        }

        if hostname.is_none() {
            let _ = send_error_response(&mut client, 400, "Bad Request", "Malformed request").await;
            let _ = client.shutdown().await;
            self.log(&request, client_ip, device.as_ref(), Outcome::status(400))
                .await;
            return;
        }

        if targets.is_empty() {
            debug!("No address for {}:{}", request.hostname, request.dest_port);
            return self.upstream_failed(client, &request, client_ip, device).await;
        }

        let mut upstream =
            match tokio::time::timeout(self.connect_timeout, TcpStream::connect(&targets[..])).await {
                Ok(Ok(stream)) => stream,
                Ok(Err(e)) => {
                    debug!("Upstream {}:{} failed: {}", request.hostname, request.dest_port, e);
                    return self.upstream_failed(client, &request, client_ip, device).await;
                }
                Err(_) => {
                    debug!("Upstream {}:{} timed out", request.hostname, request.dest_port);
                    return self.upstream_failed(client, &request, client_ip, device).await;
                }
            };

        let counters = ByteCounters::default();
        match request.kind {
            RequestKind::Connect => {
                if let Err(e) = send_connect_success(&mut client).await {
                    debug!("Client {} went away before tunnel: {}", client_ip, e);
                    return self.upstream_failed(client, &request, client_ip, device).await;
                }
            }
            RequestKind::PlainHttp => {
                if let Err(e) = upstream.write_all(first_chunk).await {
                    debug!("Forwarding to {} failed: {}", request.hostname, e);
                    return self.upstream_failed(client, &request, client_ip, device).await;
                }
                counters.add_up(n as u64);
            }
        }

        relay(client, upstream, &counters, |up, down| {
            self.log(
                &request,
                client_ip,
                device.as_ref(),
                Outcome::relayed(up + down),
            )
        })
        .await;
        debug!("Tunnel to {}:{} closed", request.hostname, request.dest_port);
    }

    /// Destination addresses, resolved before any decision is made.
    /// An empty list means the name did not resolve.
    async fn lookup_targets(&self, hostname: &str, port: u16) -> Vec<SocketAddr> {
        if let Some(ip) = literal_ip(hostname) {
            return vec![SocketAddr::new(ip, port)];
        }
        match tokio::time::timeout(self.connect_timeout, lookup_host((hostname, port))).await {
            Ok(Ok(addrs)) => addrs.collect(),
            Ok(Err(e)) => {
                debug!("Lookup of {} failed: {}", hostname, e);
                Vec::new()
            }
            Err(_) => {
                debug!("Lookup of {} timed out", hostname);
                Vec::new()
            }
        }
    }

    /// Run the parental engine once per resolved address; the first block wins
    async fn parental_decision(
        &self,
        device: Option<&Device>,
        targets: &[SocketAddr],
        port: u16,
        hostname: Option<&str>,
        url: Option<&str>,
    ) -> Option<BlockReason> {
        if targets.is_empty() {
            return self
                .parental_engine
                .should_block(device, None, Some(port), hostname, url)
                .await;
        }
        for target in targets {
            let reason = self
                .parental_engine
                .should_block(device, Some(target.ip()), Some(port), hostname, url)
                .await;
            if reason.is_some() {
                return reason;
            }
        }
        None
    }

    async fn upstream_failed(
        &self,
        mut client: TcpStream,
        request: &ParsedRequest,
        client_ip: IpAddr,
        device: Option<Device>,
    ) {
        let _ = client.shutdown().await;
        self.log(request, client_ip, device.as_ref(), Outcome::status(502))
            .await;
    }

    async fn log(
        &self,
        request: &ParsedRequest,
        client_ip: IpAddr,
        device: Option<&Device>,
        outcome: Outcome,
    ) {
        let entry = LogEntry {
            mac: device.map_or_else(|| UNKNOWN_MAC.to_string(), |d| d.mac.clone()),
            ip: Some(client_ip.to_string()),
            url: request.url.clone(),
            hostname: (!request.hostname.is_empty()).then(|| request.hostname.clone()),
            method: request.kind.method().to_string(),
            blocked: outcome.blocked,
            status_code: Some(outcome.status_code),
            data_length: Some(outcome.data_length),
            timestamp: Utc::now(),
        };
        record(&self.log_sink, entry).await;
    }
}

impl Outcome {
    fn status(status_code: u16) -> Self {
        Self {
            blocked: false,
            status_code,
            data_length: 0,
        }
    }

    fn blocked() -> Self {
        Self {
            blocked: true,
            status_code: 403,
            data_length: 0,
        }
    }

    fn relayed(data_length: u64) -> Self {
        Self {
            blocked: false,
            status_code: 200,
            data_length,
        }
    }
}
