//! Per-device rule evaluation shared by the policy and parental layers

use crate::store::{Policy, ScheduleAction};
use chrono::{NaiveTime, Timelike};
use std::fmt;
use std::net::IpAddr;

const DEFAULT_WINDOW_START: &str = "00:00";
const DEFAULT_WINDOW_END: &str = "23:59";

/// Why a connection or observation was refused
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockReason {
    Domain(String),
    Keyword(String),
    Schedule { start: String, end: String },
    VpnIp(IpAddr),
    VpnPort(u16),
    VpnHostname(String),
    Category(String),
    SafeSearch(String),
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockReason::Domain(d) => write!(f, "Blocked by policy domain: {}", d),
            BlockReason::Keyword(k) => write!(f, "Blocked by policy keyword: {}", k),
            BlockReason::Schedule { start, end } => {
                write!(f, "Blocked by schedule ({}-{})", start, end)
            }
            BlockReason::VpnIp(ip) => write!(f, "Blocked VPN IP ({})", ip),
            BlockReason::VpnPort(port) => write!(f, "Blocked VPN port ({})", port),
            BlockReason::VpnHostname(host) => write!(f, "Blocked VPN hostname ({})", host),
            BlockReason::Category(cat) => write!(f, "Blocked category ({})", cat),
            BlockReason::SafeSearch(host) => write!(f, "SafeSearch required for {}", host),
        }
    }
}

/// Minutes since midnight for `HH:MM`
pub fn parse_hhmm(value: &str) -> Option<u32> {
    let (h, m) = value.trim().split_once(':')?;
    let h: u32 = h.parse().ok()?;
    let m: u32 = m.parse().ok()?;
    if h > 23 || m > 59 {
        return None;
    }
    Some(h * 60 + m)
}

/// Check `now` against the inclusive window `[start, end]`.
/// A window with `start > end` wraps past midnight.
pub fn is_minute_in_window(now: u32, start: u32, end: u32) -> bool {
    if start <= end {
        now >= start && now <= end
    } else {
        now >= start || now <= end
    }
}

/// String form of [`is_minute_in_window`]; unparsable input is never in a window
pub fn is_time_in_window(now: &str, start: &str, end: &str) -> bool {
    match (parse_hhmm(now), parse_hhmm(start), parse_hhmm(end)) {
        (Some(now), Some(start), Some(end)) => is_minute_in_window(now, start, end),
        _ => false,
    }
}

fn minute_of_day(now: NaiveTime) -> u32 {
    now.hour() * 60 + now.minute()
}

/// Evaluate a device policy; first match wins.
///
/// Allow domains override everything else. During an active
/// `block_all_except_allowlist` schedule anything not allowlisted is blocked,
/// including requests with no hostname.
pub fn evaluate(
    policy: &Policy,
    hostname: Option<&str>,
    url: Option<&str>,
    now: NaiveTime,
) -> Option<BlockReason> {
    let hostname = hostname.filter(|h| !h.is_empty());
    let url = url.filter(|u| !u.is_empty());

    if let Some(host) = hostname {
        if policy.allow_domains.iter().any(|a| host.contains(a.as_str())) {
            return None;
        }

        if let Some(domain) = policy.block_domains.iter().find(|b| host.contains(b.as_str())) {
            return Some(BlockReason::Domain(domain.clone()));
        }
    }

    if let Some(url) = url {
        if let Some(keyword) = policy.block_keywords.iter().find(|k| url.contains(k.as_str())) {
            return Some(BlockReason::Keyword(keyword.clone()));
        }
    }

    if let Some(schedule) = &policy.schedule {
        if schedule.action == ScheduleAction::BlockAllExceptAllowlist {
            let start = schedule.start.as_deref().unwrap_or(DEFAULT_WINDOW_START);
            let end = schedule.end.as_deref().unwrap_or(DEFAULT_WINDOW_END);
            let active = match (parse_hhmm(start), parse_hhmm(end)) {
                (Some(s), Some(e)) => is_minute_in_window(minute_of_day(now), s, e),
                _ => false,
            };

            // An allowlisted hostname already returned above
            if active {
                return Some(BlockReason::Schedule {
                    start: start.to_string(),
                    end: end.to_string(),
                });
            }
        }
    }

    None
}
