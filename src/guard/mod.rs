//! Loopback/LAN destination guard.
//!
//! Blocks SSRF-style self-targeting: a request whose upstream resolves
//! to the proxy's own address or the loopback range is always refused,
//! and private-network targets are refused when `deny_lan` is set.
//! Hardcoded-response matches bypass the guard entirely, so operators
//! can explicitly allow specific internal endpoints.

use std::net::IpAddr;
use std::sync::LazyLock;

use ipnet::IpNet;

use crate::config::GuardConfig;

/// RFC1918, unique-local, site-local, and link-local ranges.
static PRIVATE_RANGES: LazyLock<Vec<IpNet>> = LazyLock::new(|| {
    [
        "10.0.0.0/8",
        "172.16.0.0/12",
        "192.168.0.0/16",
        "169.254.0.0/16",
        "fc00::/7",
        "fec0::/10",
        "fe80::/10",
    ]
    .iter()
    .filter_map(|s| s.parse().ok())
    .collect()
});

/// Why the guard refused a destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardDenial {
    /// Destination is the proxy itself or the loopback range.
    Loopback,
    /// Destination is inside a private/link-local network.
    PrivateNetwork,
}

impl GuardDenial {
    pub fn reason(&self) -> &'static str {
        match self {
            GuardDenial::Loopback => "destination is the proxy itself",
            GuardDenial::PrivateNetwork => "destination is a private network address",
        }
    }
}

/// Destination guard built from configuration plus the addresses the
/// proxy is actually bound to.
#[derive(Debug)]
pub struct TargetGuard {
    own_addresses: Vec<IpAddr>,
    external_address: Option<IpAddr>,
    deny_lan: bool,
}

impl TargetGuard {
    pub fn from_config(config: &GuardConfig, bound: &[IpAddr]) -> Self {
        let mut own_addresses: Vec<IpAddr> = config
            .own_addresses
            .iter()
            .filter_map(|s| s.parse().ok())
            .collect();
        own_addresses.extend_from_slice(bound);

        Self {
            own_addresses,
            external_address: config
                .external_address
                .as_deref()
                .and_then(|s| s.parse().ok()),
            deny_lan: config.deny_lan,
        }
    }

    /// Evaluate the resolved upstream address, and the hostname itself
    /// when it is a literal IP.
    pub fn evaluate(&self, hostname: &str, resolved: IpAddr) -> Result<(), GuardDenial> {
        self.check(resolved)?;
        let bare = hostname.trim_start_matches('[').trim_end_matches(']');
        if let Ok(literal) = bare.parse::<IpAddr>() {
            self.check(literal)?;
        }
        Ok(())
    }

    fn check(&self, addr: IpAddr) -> Result<(), GuardDenial> {
        if self.is_loopback(addr) {
            return Err(GuardDenial::Loopback);
        }
        if self.deny_lan && is_private(addr) {
            return Err(GuardDenial::PrivateNetwork);
        }
        Ok(())
    }

    fn is_loopback(&self, addr: IpAddr) -> bool {
        addr.is_loopback()
            || self.own_addresses.contains(&addr)
            || self.external_address == Some(addr)
    }
}

fn is_private(addr: IpAddr) -> bool {
    PRIVATE_RANGES.iter().any(|net| net.contains(&addr))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guard(deny_lan: bool) -> TargetGuard {
        TargetGuard::from_config(
            &GuardConfig {
                deny_lan,
                own_addresses: vec!["198.51.100.4".into()],
                external_address: Some("203.0.113.99".into()),
            },
            &["192.0.2.10".parse().unwrap()],
        )
    }

    #[test]
    fn loopback_is_always_denied() {
        for addr in ["127.0.0.1", "127.8.8.8", "::1"] {
            let denial = guard(false)
                .evaluate("roblox.com", addr.parse().unwrap())
                .unwrap_err();
            assert_eq!(denial, GuardDenial::Loopback, "{addr}");
        }
    }

    #[test]
    fn own_and_external_addresses_count_as_loopback() {
        for addr in ["198.51.100.4", "203.0.113.99", "192.0.2.10"] {
            let denial = guard(false)
                .evaluate("roblox.com", addr.parse().unwrap())
                .unwrap_err();
            assert_eq!(denial, GuardDenial::Loopback, "{addr}");
        }
    }

    #[test]
    fn private_addresses_depend_on_deny_lan() {
        for addr in ["10.0.0.5", "172.31.255.1", "192.168.0.2", "fd00::1", "fe80::2"] {
            let ip: IpAddr = addr.parse().unwrap();
            assert!(guard(false).evaluate("internal.example", ip).is_ok(), "{addr}");
            assert_eq!(
                guard(true).evaluate("internal.example", ip).unwrap_err(),
                GuardDenial::PrivateNetwork,
                "{addr}"
            );
        }
    }

    #[test]
    fn literal_ip_hostname_is_checked_directly() {
        // Resolved address is public but the hostname itself names
        // loopback; still denied.
        let denial = guard(false)
            .evaluate("127.0.0.1", "93.184.216.34".parse().unwrap())
            .unwrap_err();
        assert_eq!(denial, GuardDenial::Loopback);

        let denial = guard(false)
            .evaluate("[::1]", "93.184.216.34".parse().unwrap())
            .unwrap_err();
        assert_eq!(denial, GuardDenial::Loopback);
    }

    #[test]
    fn public_destinations_pass() {
        assert!(guard(true)
            .evaluate("roblox.com", "93.184.216.34".parse().unwrap())
            .is_ok());
    }
}
