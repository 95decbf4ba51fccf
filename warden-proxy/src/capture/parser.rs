//! Link-layer frame decoding for the passive path

use etherparse::{InternetSlice, LinkSlice, SlicedPacket, TransportSlice};
use regex::Regex;
use std::net::IpAddr;
use std::sync::LazyLock;

static HOST_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)Host:[ \t]*([^\r\n]+)").expect("valid regex"));

const ETHER_TYPE_ARP: u16 = 0x0806;

/// Fields extracted from one Ethernet II frame. Everything is optional; a
/// frame that does not decode yields `ParsedFrame::default()`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedFrame {
    pub src_mac: Option<String>,
    pub dst_mac: Option<String>,
    pub src_ip: Option<IpAddr>,
    pub dst_ip: Option<IpAddr>,
    /// Lowercase protocol name such as `tcp`, `udp` or `icmp`
    pub protocol: Option<String>,
    /// Value of a plaintext `Host:` header carried in a TCP payload
    pub hostname: Option<String>,
}

pub fn parse_frame(data: &[u8]) -> ParsedFrame {
    let Ok(sliced) = SlicedPacket::from_ethernet(data) else {
        return ParsedFrame::default();
    };

    let mut frame = ParsedFrame::default();
    let mut ether_type = None;

    if let Some(LinkSlice::Ethernet2(eth)) = &sliced.link {
        frame.src_mac = Some(format_mac(&eth.source()));
        frame.dst_mac = Some(format_mac(&eth.destination()));
        ether_type = Some(eth.ether_type());
    }

    let ip_protocol = match &sliced.ip {
        Some(InternetSlice::Ipv4(h, _)) => {
            frame.src_ip = Some(IpAddr::V4(h.source_addr()));
            frame.dst_ip = Some(IpAddr::V4(h.destination_addr()));
            Some(h.protocol())
        }
        Some(InternetSlice::Ipv6(h, _)) => {
            frame.src_ip = Some(IpAddr::V6(h.source_addr()));
            frame.dst_ip = Some(IpAddr::V6(h.destination_addr()));
            Some(h.next_header())
        }
        None => None,
    };

    frame.protocol = match &sliced.transport {
        Some(TransportSlice::Tcp(_)) => Some("tcp".to_string()),
        Some(TransportSlice::Udp(_)) => Some("udp".to_string()),
        Some(TransportSlice::Icmpv4(_)) => Some("icmp".to_string()),
        Some(TransportSlice::Icmpv6(_)) => Some("icmpv6".to_string()),
        Some(TransportSlice::Unknown(number)) => Some(ip_protocol_name(*number)),
        None => match (ip_protocol, ether_type) {
            (Some(number), _) => Some(ip_protocol_name(number)),
            (None, Some(ETHER_TYPE_ARP)) => Some("arp".to_string()),
            _ => None,
        },
    };

    if let Some(TransportSlice::Tcp(_)) = &sliced.transport {
        frame.hostname = extract_host_header(sliced.payload);
    }

    frame
}

/// Case-insensitive `Host:` header lookup in a plaintext payload
pub fn extract_host_header(payload: &[u8]) -> Option<String> {
    if payload.is_empty() {
        return None;
    }
    let text = String::from_utf8_lossy(payload);
    let caps = HOST_HEADER.captures(&text)?;
    let host = caps[1].trim();
    (!host.is_empty()).then(|| host.to_string())
}

fn format_mac(bytes: &[u8; 6]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(":")
}

fn ip_protocol_name(number: u8) -> String {
    match number {
        1 => "icmp".to_string(),
        2 => "igmp".to_string(),
        6 => "tcp".to_string(),
        17 => "udp".to_string(),
        47 => "gre".to_string(),
        50 => "esp".to_string(),
        51 => "ah".to_string(),
        58 => "icmpv6".to_string(),
        other => format!("ip-{other}"),
    }
}
