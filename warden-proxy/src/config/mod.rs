//! Gateway configuration

pub mod builtin;
pub mod loader;
pub mod schema;
pub mod validator;

pub use loader::ConfigLoader;
pub use schema::{
    AdminConfig, CaptureConfig, Config, DiscoveryConfig, ParentalConfig, ProxyConfig, StoreConfig,
};
pub use validator::ConfigValidator;
