//! IPv4 CIDR membership

use crate::error::CidrError;
use ipnet::Ipv4Net;
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

/// An IPv4 network given as `a.b.c.d/n`
///
/// The stored network is the parsed address with host bits cleared, so
/// `10.8.0.77/24` matches the same addresses as `10.8.0.0/24`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cidr {
    net: Ipv4Net,
}

impl Cidr {
    /// Parse a CIDR string. The `/n` suffix is mandatory.
    pub fn parse(cidr: &str) -> Result<Self, CidrError> {
        let cidr = cidr.trim();
        if !cidr.contains('/') {
            return Err(CidrError::MissingMask(cidr.to_string()));
        }

        let net = cidr
            .parse::<Ipv4Net>()
            .map_err(|_| CidrError::Invalid(cidr.to_string()))?;

        Ok(Self { net: net.trunc() })
    }

    /// Check whether `ip` falls inside this network
    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        u32::from(ip) & self.mask() == self.network()
    }

    /// Like [`Cidr::contains`] for textual addresses; anything that is not an
    /// IPv4 address is outside every network.
    pub fn contains_str(&self, ip: &str) -> bool {
        ip.trim()
            .parse::<Ipv4Addr>()
            .map(|addr| self.contains(addr))
            .unwrap_or(false)
    }

    pub fn network(&self) -> u32 {
        u32::from(self.net.network())
    }

    pub fn mask(&self) -> u32 {
        u32::from(self.net.netmask())
    }

    pub fn prefix_len(&self) -> u8 {
        self.net.prefix_len()
    }
}

impl FromStr for Cidr {
    type Err = CidrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.net)
    }
}
