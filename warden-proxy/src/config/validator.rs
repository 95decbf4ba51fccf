//! Configuration validation

use super::schema::{CaptureConfig, Config, DiscoveryConfig, ParentalConfig, ProxyConfig};
use crate::error::{Result, ValidationError};
use crate::filter::Cidr;

pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate an entire gateway configuration
    pub fn validate(config: &Config) -> Result<()> {
        Self::validate_proxy(&config.proxy)?;
        Self::validate_discovery(&config.discovery)?;
        Self::validate_capture(&config.capture)?;
        Self::validate_parental(&config.parental)?;
        Ok(())
    }

    fn validate_proxy(proxy: &ProxyConfig) -> Result<()> {
        if proxy.max_connections == Some(0) {
            return Err(ValidationError::ZeroValue {
                field: "proxy.max_connections",
            }
            .into());
        }
        if proxy.connect_timeout_ms == 0 {
            return Err(ValidationError::ZeroValue {
                field: "proxy.connect_timeout_ms",
            }
            .into());
        }
        Ok(())
    }

    /// The prefix must be exactly three dotted octets
    fn validate_discovery(discovery: &DiscoveryConfig) -> Result<()> {
        let octets: Vec<&str> = discovery.subnet_prefix.split('.').collect();
        let well_formed =
            octets.len() == 3 && octets.iter().all(|o| !o.is_empty() && o.parse::<u8>().is_ok());
        if !well_formed {
            return Err(ValidationError::InvalidSubnetPrefix {
                prefix: discovery.subnet_prefix.clone(),
            }
            .into());
        }
        if discovery.probe_timeout_ms == 0 {
            return Err(ValidationError::ZeroValue {
                field: "discovery.probe_timeout_ms",
            }
            .into());
        }
        Ok(())
    }

    fn validate_capture(capture: &CaptureConfig) -> Result<()> {
        if capture.channel_capacity == 0 {
            return Err(ValidationError::ZeroValue {
                field: "capture.channel_capacity",
            }
            .into());
        }
        Ok(())
    }

    fn validate_parental(parental: &ParentalConfig) -> Result<()> {
        for cidr in &parental.vpn_cidrs {
            if Cidr::parse(cidr).is_err() {
                return Err(ValidationError::InvalidCidr { cidr: cidr.clone() }.into());
            }
        }
        if let Some(&port) = parental.vpn_ports.iter().find(|&&p| p == 0) {
            return Err(ValidationError::InvalidPort { port }.into());
        }
        Ok(())
    }
}
