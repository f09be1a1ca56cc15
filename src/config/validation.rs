//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, addresses parse)
//! - Compile-check CIDR lists and the test-site pattern
//!
//! # Design Decisions
//! - Returns all validation errors, not just the first
//! - Validation is a pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before a config is accepted into the system

use std::net::{IpAddr, SocketAddr};

use ipnet::IpNet;
use regex::Regex;
use thiserror::Error;

use crate::config::schema::ProxyConfig;

/// A single semantic validation failure.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("invalid bind address '{0}'")]
    BindAddress(String),

    #[error("invalid CIDR '{cidr}' in {list}")]
    Cidr { list: &'static str, cidr: String },

    #[error("invalid IP address '{0}' in guard configuration")]
    GuardAddress(String),

    #[error("test-site pattern does not compile: {0}")]
    TestSitePattern(String),

    #[error("production apex must not be empty")]
    EmptyApex,

    #[error("{0} must be greater than zero")]
    ZeroTimeout(&'static str),
}

/// Validate a configuration, collecting every error found.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::BindAddress(
            config.listener.bind_address.clone(),
        ));
    }

    for cidr in &config.trust.authorized_proxies {
        if cidr.parse::<IpNet>().is_err() {
            errors.push(ValidationError::Cidr {
                list: "trust.authorized_proxies",
                cidr: cidr.clone(),
            });
        }
    }
    for cidr in &config.trust.cdn_ranges {
        if cidr.parse::<IpNet>().is_err() {
            errors.push(ValidationError::Cidr {
                list: "trust.cdn_ranges",
                cidr: cidr.clone(),
            });
        }
    }

    for addr in &config.guard.own_addresses {
        if addr.parse::<IpAddr>().is_err() {
            errors.push(ValidationError::GuardAddress(addr.clone()));
        }
    }
    if let Some(addr) = &config.guard.external_address {
        if addr.parse::<IpAddr>().is_err() {
            errors.push(ValidationError::GuardAddress(addr.clone()));
        }
    }

    if let Err(e) = Regex::new(&config.hostname.test_site_pattern) {
        errors.push(ValidationError::TestSitePattern(e.to_string()));
    }
    if config.hostname.production_apex.trim().is_empty() {
        errors.push(ValidationError::EmptyApex);
    }

    if config.upstream.timeout_secs == 0 {
        errors.push(ValidationError::ZeroTimeout("upstream.timeout_secs"));
    }
    if config.upstream.connect_secs == 0 {
        errors.push(ValidationError::ZeroTimeout("upstream.connect_secs"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(validate_config(&ProxyConfig::default()).is_ok());
    }

    #[test]
    fn collects_multiple_errors() {
        let mut config = ProxyConfig::default();
        config.listener.bind_address = "not-an-address".into();
        config.trust.cdn_ranges.push("300.0.0.0/8".into());
        config.upstream.timeout_secs = 0;

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 3);
    }

    #[test]
    fn rejects_bad_test_site_pattern() {
        let mut config = ProxyConfig::default();
        config.hostname.test_site_pattern = "(".into();

        let errors = validate_config(&config).unwrap_err();
        assert!(matches!(errors[0], ValidationError::TestSitePattern(_)));
    }
}
