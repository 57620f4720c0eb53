//! Input sanitation: layer ids, outbound URLs, bounding boxes, paging.
//!
//! Outbound URLs go through an SSRF policy: only http(s), an optional host
//! allowlist, and a blocklist of loopback/private/link-local literals plus
//! `localhost`. Host names are not resolved.

use std::net::{Ipv4Addr, Ipv6Addr};

use url::{Host, Url};
use wfsgate_telemetry::log_ssrf_rejected;

/// `true` iff `id` is non-empty and only contains `[A-Za-z0-9_-]`.
pub fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

/// `true` for internal proxy routes: a single leading `/` and no `..` segment.
pub fn is_internal_path(url: &str) -> bool {
    url.starts_with('/')
        && !url.starts_with("//")
        && !url.split(['/', '?', '#']).any(|segment| segment == "..")
}

/// `xmin,ymin,xmax,ymax[,crs]` with finite numbers and a positive extent.
pub fn is_valid_bbox(bbox: &str) -> bool {
    let parts: Vec<&str> = bbox.split(',').map(str::trim).collect();
    let coords = match parts.len() {
        4 => &parts[..],
        5 if parts[4].parse::<f64>().is_err() && !parts[4].is_empty() => &parts[..4],
        _ => return false,
    };

    let mut values = [0f64; 4];
    for (slot, raw) in values.iter_mut().zip(coords) {
        match raw.parse::<f64>() {
            Ok(v) if v.is_finite() => *slot = v,
            _ => return false,
        }
    }
    let [xmin, ymin, xmax, ymax] = values;
    xmax > xmin && ymax > ymin
}

/// Validator for outbound URLs and paging parameters.
#[derive(Debug, Clone)]
pub struct RequestValidator {
    allowed_hosts: Vec<String>,
    max_limit: u32,
}

impl RequestValidator {
    pub fn new(allowed_hosts: Vec<String>, max_limit: u32) -> Self {
        Self {
            allowed_hosts: allowed_hosts
                .into_iter()
                .map(|h| h.trim().to_lowercase())
                .filter(|h| !h.is_empty())
                .collect(),
            max_limit,
        }
    }

    /// Check an outbound URL.
    ///
    /// Relative paths (single leading `/`) are same-origin proxy routes and
    /// skip the SSRF checks. With `check_ssrf = false` only the scheme and the
    /// allowlist are enforced.
    pub fn is_valid_url(&self, raw: &str, check_ssrf: bool) -> bool {
        if is_internal_path(raw) {
            return true;
        }

        let url = match Url::parse(raw) {
            Ok(url) => url,
            Err(_) => return false,
        };

        match url.scheme() {
            "http" | "https" => {}
            scheme => {
                log_ssrf_rejected!(scheme = scheme, reason = "scheme", "rejected URL scheme");
                return false;
            }
        }

        let host = match url.host() {
            Some(host) => host,
            None => return false,
        };

        if !self.allowed_hosts.is_empty() && !self.host_allowed(&host_string(&host)) {
            log_ssrf_rejected!(host = %host, reason = "allowlist", "host not in allowlist");
            return false;
        }

        if !check_ssrf {
            return true;
        }

        let blocked = match &host {
            Host::Domain(name) => name.eq_ignore_ascii_case("localhost"),
            Host::Ipv4(ip) => is_blocked_ipv4(*ip),
            Host::Ipv6(ip) => is_blocked_ipv6(*ip),
        };
        if blocked {
            log_ssrf_rejected!(host = %host, reason = "blocked_address", "rejected internal address");
            return false;
        }

        true
    }

    fn host_allowed(&self, host: &str) -> bool {
        self.allowed_hosts.iter().any(|entry| {
            if let Some(domain) = entry.strip_prefix("*.") {
                host.len() > domain.len() + 1
                    && host.ends_with(domain)
                    && host.as_bytes()[host.len() - domain.len() - 1] == b'.'
            } else {
                entry == host
            }
        })
    }

    /// Parse a limit; values above the maximum are capped. Invalid → `None`.
    pub fn validate_limit(&self, raw: Option<&str>) -> Option<u32> {
        parse_non_negative(raw).map(|n| n.min(self.max_limit as u64) as u32)
    }

    /// Parse an offset. Invalid → `None`.
    pub fn validate_offset(&self, raw: Option<&str>) -> Option<u32> {
        parse_non_negative(raw).map(|n| n.min(u32::MAX as u64) as u32)
    }
}

fn parse_non_negative(raw: Option<&str>) -> Option<u64> {
    let raw = raw?.trim();
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    // Digits only, so the only failure left is overflow: saturate.
    Some(raw.parse::<u64>().unwrap_or(u64::MAX))
}

fn host_string(host: &Host<&str>) -> String {
    match host {
        Host::Domain(name) => name.to_lowercase(),
        Host::Ipv4(ip) => ip.to_string(),
        Host::Ipv6(ip) => ip.to_string(),
    }
}

fn is_blocked_ipv4(ip: Ipv4Addr) -> bool {
    ip.is_loopback()            // 127.0.0.0/8
        || ip.is_private()      // 10/8, 172.16/12, 192.168/16
        || ip.is_link_local()   // 169.254/16
        || ip.is_unspecified() // 0.0.0.0
}

fn is_blocked_ipv6(ip: Ipv6Addr) -> bool {
    if ip.is_loopback() || ip.is_unspecified() {
        return true;
    }
    let first = ip.segments()[0];
    if (first & 0xffc0) == 0xfe80 || (first & 0xfe00) == 0xfc00 {
        return true;
    }
    match ip.to_ipv4_mapped() {
        Some(v4) => is_blocked_ipv4(v4),
        None => false,
    }
}
