//! First-chunk request parsing for the intercepting proxy

use crate::capture::extract_host_header;
use std::net::IpAddr;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use url::Url;

const DEFAULT_CONNECT_PORT: u16 = 443;
const DEFAULT_HTTP_PORT: u16 = 80;

/// How the client asked to reach its destination
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// `CONNECT host:port`, tunneled opaquely
    Connect,
    /// Any other method, forwarded as-is
    PlainHttp,
}

impl RequestKind {
    /// Method label recorded in the request log
    pub fn method(&self) -> &'static str {
        match self {
            RequestKind::Connect => "CONNECT",
            RequestKind::PlainHttp => "HTTP",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedRequest {
    pub kind: RequestKind,
    /// Destination host without brackets or port; empty when unparsable
    pub hostname: String,
    pub dest_port: u16,
    /// `host:port` for CONNECT, the request target for plain HTTP
    pub url: String,
}

/// Parse the first chunk a client sent. Never fails: a request that cannot
/// be understood comes back with an empty hostname.
pub fn parse_request(data: &[u8]) -> ParsedRequest {
    let text = String::from_utf8_lossy(data);
    let first_line = text.lines().next().unwrap_or_default();
    let mut parts = first_line.split_whitespace();
    let method = parts.next().unwrap_or_default();
    let target = parts.next().unwrap_or_default();

    if method.eq_ignore_ascii_case("CONNECT") {
        let (hostname, dest_port) = split_authority(target, DEFAULT_CONNECT_PORT)
            .unwrap_or_else(|| (String::new(), DEFAULT_CONNECT_PORT));
        return ParsedRequest {
            kind: RequestKind::Connect,
            hostname,
            dest_port,
            url: target.to_string(),
        };
    }

    let url = if target.starts_with('/') {
        // Origin-form: the authority lives in the Host header
        extract_host_header(data).map(|host| format!("http://{host}{target}"))
    } else if target.contains("://") {
        Some(target.to_string())
    } else if target.is_empty() {
        None
    } else {
        Some(format!("http://{target}"))
    };

    let parsed = url.as_deref().and_then(|u| Url::parse(u).ok());
    let hostname = parsed
        .as_ref()
        .and_then(|u| u.host_str())
        .map(|h| h.trim_start_matches('[').trim_end_matches(']').to_string())
        .unwrap_or_default();
    let dest_port = parsed
        .as_ref()
        .and_then(|u| u.port_or_known_default())
        .unwrap_or(DEFAULT_HTTP_PORT);

    ParsedRequest {
        kind: RequestKind::PlainHttp,
        hostname,
        dest_port,
        url: url.unwrap_or_default(),
    }
}

/// Split `host:port`, `[v6]:port`, or a bare host
fn split_authority(authority: &str, default_port: u16) -> Option<(String, u16)> {
    if authority.is_empty() {
        return None;
    }

    if let Some(rest) = authority.strip_prefix('[') {
        let (host, after) = rest.split_once(']')?;
        let port = match after.strip_prefix(':') {
            Some(port) => port.parse().ok()?,
            None if after.is_empty() => default_port,
            None => return None,
        };
        return Some((host.to_string(), port));
    }

    match authority.rsplit_once(':') {
        Some((host, port)) => Some((host.to_string(), port.parse().ok()?)),
        None => Some((authority.to_string(), default_port)),
    }
}

/// Strip the IPv4-mapped IPv6 prefix (`::ffff:a.b.c.d`) from a peer address
pub fn normalize_peer_ip(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map(IpAddr::V4).unwrap_or(ip),
        v4 => v4,
    }
}

/// Destination IP when the hostname is already an address literal
pub fn literal_ip(hostname: &str) -> Option<IpAddr> {
    hostname.parse().ok()
}

pub async fn send_connect_success(stream: &mut TcpStream) -> std::io::Result<()> {
    stream
        .write_all(b"HTTP/1.1 200 Connection Established\r\n\r\n")
        .await?;
    stream.flush().await
}

/// Send a complete plain-text error response
pub async fn send_error_response(
    stream: &mut TcpStream,
    status: u16,
    reason: &str,
    body: &str,
) -> std::io::Result<()> {
    let response = format!(
        "HTTP/1.1 {status} {reason}\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    stream.write_all(response.as_bytes()).await?;
    stream.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_connect() {
        let req = parse_request(b"CONNECT example.com:8443 HTTP/1.1\r\nHost: example.com\r\n\r\n");
        assert_eq!(req.kind, RequestKind::Connect);
        assert_eq!(req.hostname, "example.com");
        assert_eq!(req.dest_port, 8443);
        assert_eq!(req.url, "example.com:8443");
    }

    #[test]
    fn test_parse_connect_default_port() {
        let req = parse_request(b"CONNECT example.com HTTP/1.1\r\n\r\n");
        assert_eq!(req.hostname, "example.com");
        assert_eq!(req.dest_port, 443);
    }

    #[test]
    fn test_parse_connect_ipv6() {
        let req = parse_request(b"CONNECT [2001:db8::1]:443 HTTP/1.1\r\n\r\n");
        assert_eq!(req.hostname, "2001:db8::1");
        assert_eq!(req.dest_port, 443);
        assert_eq!(literal_ip(&req.hostname), Some("2001:db8::1".parse().unwrap()));
    }

    #[test]
    fn test_parse_connect_invalid_port() {
        let req = parse_request(b"CONNECT example.com:invalid HTTP/1.1\r\n\r\n");
        assert_eq!(req.kind, RequestKind::Connect);
        assert!(req.hostname.is_empty());
    }

    #[test]
    fn test_parse_absolute_http() {
        let req = parse_request(b"GET http://Example.com:8080/a?q=1 HTTP/1.1\r\nHost: example.com\r\n\r\n");
        assert_eq!(req.kind, RequestKind::PlainHttp);
        assert_eq!(req.hostname, "example.com");
        assert_eq!(req.dest_port, 8080);
        assert_eq!(req.url, "http://Example.com:8080/a?q=1");
    }

    #[test]
    fn test_parse_schemeless_target() {
        let req = parse_request(b"GET example.com/path HTTP/1.1\r\n\r\n");
        assert_eq!(req.hostname, "example.com");
        assert_eq!(req.dest_port, 80);
        assert_eq!(req.url, "http://example.com/path");
    }

    #[test]
    fn test_parse_origin_form_uses_host_header() {
        let req = parse_request(b"GET /index.html HTTP/1.1\r\nhost: news.example:81\r\n\r\n");
        assert_eq!(req.hostname, "news.example");
        assert_eq!(req.dest_port, 81);
        assert_eq!(req.url, "http://news.example:81/index.html");
    }

    #[test]
    fn test_parse_malformed() {
        let cases: [&[u8]; 4] = [b"", b"\x16\x03\x01\x00", b"GET", b"GET /nohost HTTP/1.1\r\n\r\n"];
        for data in cases {
            let req = parse_request(data);
            assert!(req.hostname.is_empty(), "{:?} should not yield a host", data);
        }
    }

    #[test]
    fn test_normalize_peer_ip() {
        let mapped: IpAddr = "::ffff:192.168.1.20".parse().unwrap();
        assert_eq!(normalize_peer_ip(mapped), "192.168.1.20".parse::<IpAddr>().unwrap());

        let v6: IpAddr = "fe80::1".parse().unwrap();
        assert_eq!(normalize_peer_ip(v6), v6);

        let v4: IpAddr = "10.0.0.1".parse().unwrap();
        assert_eq!(normalize_peer_ip(v4), v4);
    }

    #[test]
    fn test_literal_ip() {
        assert_eq!(literal_ip("10.8.0.1"), Some("10.8.0.1".parse().unwrap()));
        assert!(literal_ip("example.com").is_none());
        assert!(literal_ip("").is_none());
    }
}
