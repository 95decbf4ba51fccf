//! Error types for gateway operations

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, WardenError>;

#[derive(Debug, Error)]
pub enum WardenError {
    #[error("Configuration validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Invalid CIDR rule: {0}")]
    Cidr(#[from] CidrError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Failed to load config from {path}: {source}")]
    ConfigLoad {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Failed to bind proxy listener on {addr}: {source}")]
    Bind {
        addr: std::net::SocketAddr,
        source: std::io::Error,
    },

    #[error("Packet capture unavailable: {0}")]
    CaptureUnavailable(String),

    #[error("Packet capture error: {0}")]
    Capture(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Invalid CIDR notation: {cidr}")]
    InvalidCidr { cidr: String },

    #[error("Invalid time of day (expected HH:MM): {value}")]
    InvalidTime { value: String },

    #[error("Invalid port: {port}")]
    InvalidPort { port: u16 },

    #[error("Invalid subnet prefix (expected a.b.c): {prefix}")]
    InvalidSubnetPrefix { prefix: String },

    #[error("{field} must be greater than zero")]
    ZeroValue { field: &'static str },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CidrError {
    #[error("CIDR must include a mask, e.g. 192.168.1.0/24: {0}")]
    MissingMask(String),

    #[error("Invalid CIDR: {0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Store serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("No record for {0}")]
    NotFound(String),
}
