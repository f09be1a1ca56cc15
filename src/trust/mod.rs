//! Forwarded-header trust policy.
//!
//! Classifies the physical TCP peer address and decides whether
//! network-layer hints (forwarded-for, forwarded-host, ...) may be
//! honored. Client-supplied headers never override identity unless the
//! immediate peer is itself trusted.
//!
//! # Design Decisions
//! - CIDR lists are parsed once at startup into immutable snapshots
//! - The decision is derived per request and never cached, because it
//!   depends on the physical peer of that connection
//! - Fail closed: an unparseable configured CIDR is dropped at
//!   validation time, never treated as match-all

pub mod identity;

use std::net::IpAddr;
use std::sync::LazyLock;

use ipnet::IpNet;

use crate::config::TrustConfig;

/// Private and link-local ranges that count as "local area".
static LAN_RANGES: LazyLock<Vec<IpNet>> = LazyLock::new(|| {
    [
        "10.0.0.0/8",
        "172.16.0.0/12",
        "192.168.0.0/16",
        "169.254.0.0/16",
        "fc00::/7",
        "fe80::/10",
    ]
    .iter()
    .filter_map(|s| s.parse().ok())
    .collect()
});

/// Per-request classification of the physical peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrustDecision {
    /// Peer is loopback or inside a private/link-local range.
    pub local_area: bool,
    /// Peer is inside an authorized reverse-proxy CIDR.
    pub authorized_proxy: bool,
    /// Peer is inside a known CDN edge CIDR.
    pub cdn_edge: bool,
}

impl TrustDecision {
    /// Whether forwarding headers from this peer are honored at all.
    pub fn honored(&self) -> bool {
        self.local_area || self.authorized_proxy || self.cdn_edge
    }
}

/// Immutable trust policy built from configuration.
#[derive(Debug)]
pub struct TrustPolicy {
    authorized_proxies: Vec<IpNet>,
    cdn_ranges: Vec<IpNet>,
}

impl TrustPolicy {
    /// Build from config. Invalid CIDRs were already rejected by
    /// config validation; any stragglers are skipped with a warning.
    pub fn from_config(config: &TrustConfig) -> Self {
        Self {
            authorized_proxies: parse_cidrs(&config.authorized_proxies, "authorized_proxies"),
            cdn_ranges: parse_cidrs(&config.cdn_ranges, "cdn_ranges"),
        }
    }

    /// Classify a physical peer address.
    pub fn evaluate(&self, peer: IpAddr) -> TrustDecision {
        TrustDecision {
            local_area: peer.is_loopback() || LAN_RANGES.iter().any(|net| net.contains(&peer)),
            authorized_proxy: self.authorized_proxies.iter().any(|net| net.contains(&peer)),
            cdn_edge: self.cdn_ranges.iter().any(|net| net.contains(&peer)),
        }
    }
}

fn parse_cidrs(cidrs: &[String], list: &str) -> Vec<IpNet> {
    cidrs
        .iter()
        .filter_map(|s| match s.parse::<IpNet>() {
            Ok(net) => Some(net),
            Err(_) => {
                tracing::warn!(cidr = %s, list = %list, "Skipping unparseable CIDR");
                None
            }
        })
        .collect()
}
