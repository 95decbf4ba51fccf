//! LAN gateway core: device identity, access-control engines, intercepting
//! proxy, and passive capture

pub mod capture;
pub mod config;
pub mod device;
pub mod error;
pub mod filter;
pub mod proxy;
pub mod store;

// Re-export commonly used types
pub use config::{Config, ConfigLoader, ConfigValidator};
pub use device::{DeviceResolver, NetworkProbe, SystemProbe};
pub use error::{CidrError, Result, StoreError, ValidationError, WardenError};
pub use filter::{BlockReason, Cidr, ParentalControlEngine, PolicyEngine};
pub use proxy::{ProxyServer, ProxyServerConfig};
pub use store::{DeviceRegistry, JsonStore, LogSink, MemoryStore, PolicyStore};
