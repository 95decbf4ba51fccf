//! Intercepting proxy listener

pub mod request;
pub mod server;
pub mod tunnel;

pub use request::{normalize_peer_ip, parse_request, ParsedRequest, RequestKind};
pub use server::{ProxyServer, ProxyServerConfig};
pub use tunnel::ByteCounters;
