//! Neighbor (ARP) table parsing
//!
//! Accepts the BSD/macOS `arp -a` layout, the Linux net-tools layout, and
//! raw `/proc/net/arp` rows.

use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;

/// One IP to MAC binding observed on the local segment
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Neighbor {
    pub ip: String,
    /// Lowercase colon-separated MAC address
    pub mac: String,
}

// ? (192.168.1.10) at a4:5e:60:12:9f:bb on en0 ifscope [ethernet]
static PAREN_AT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\(([\d.]+)\)\s+at\s+([0-9a-f]{2}(?::[0-9a-f]{2}){5})").expect("valid regex")
});

// 192.168.1.10 ether a4:5e:60:12:9f:bb C eth0
static ETHER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)([\d.]+)\s+ether\s+([0-9a-f]{2}(?::[0-9a-f]{2}){5})").expect("valid regex")
});

// 192.168.1.10     0x1         0x2         a4:5e:60:12:9f:bb     *        eth0
static PROC_ROW: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^([\d.]+)\s+0x[0-9a-f]+\s+0x[0-9a-f]+\s+([0-9a-f]{2}(?::[0-9a-f]{2}){5})")
        .expect("valid regex")
});

const INCOMPLETE_MAC: &str = "00:00:00:00:00:00";

/// Parse every recognizable line of a neighbor table dump
pub fn parse_neighbor_table(output: &str) -> Vec<Neighbor> {
    output.lines().filter_map(parse_line).collect()
}

fn parse_line(line: &str) -> Option<Neighbor> {
    let line = line.trim();
    let caps = PAREN_AT
        .captures(line)
        .or_else(|| ETHER.captures(line))
        .or_else(|| PROC_ROW.captures(line))?;

    let mac = caps[2].to_ascii_lowercase();
    if mac == INCOMPLETE_MAC {
        return None;
    }
    Some(Neighbor {
        ip: caps[1].to_string(),
        mac,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bsd_format() {
        let out = "? (192.168.1.10) at A4:5E:60:12:9F:BB on en0 ifscope [ethernet]\n\
                   ? (192.168.1.1) at 0:1:2:3:4:5 on en0 ifscope [ethernet]\n";
        let neighbors = parse_neighbor_table(out);
        // Abbreviated octets are not a full MAC and are skipped
        assert_eq!(
            neighbors,
            vec![Neighbor {
                ip: "192.168.1.10".into(),
                mac: "a4:5e:60:12:9f:bb".into(),
            }]
        );
    }

    #[test]
    fn test_net_tools_format() {
        let out = "Address                  HWtype  HWaddress           Flags Mask            Iface\n\
                   192.168.1.20             ether   aa:bb:cc:dd:ee:ff   C                     eth0\n";
        let neighbors = parse_neighbor_table(out);
        assert_eq!(neighbors.len(), 1);
        assert_eq!(neighbors[0].ip, "192.168.1.20");
        assert_eq!(neighbors[0].mac, "aa:bb:cc:dd:ee:ff");
    }

    #[test]
    fn test_proc_net_arp() {
        let out = "IP address       HW type     Flags       HW address            Mask     Device\n\
                   192.168.1.1      0x1         0x2         50:C7:BF:00:11:22     *        wlan0\n\
                   192.168.1.77     0x1         0x0         00:00:00:00:00:00     *        wlan0\n";
        let neighbors = parse_neighbor_table(out);
        assert_eq!(
            neighbors,
            vec![Neighbor {
                ip: "192.168.1.1".into(),
                mac: "50:c7:bf:00:11:22".into(),
            }]
        );
    }

    #[test]
    fn test_garbage_is_ignored() {
        assert!(parse_neighbor_table("").is_empty());
        assert!(parse_neighbor_table("no entries\n(incomplete)").is_empty());
    }
}
