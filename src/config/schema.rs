//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration for the hostname-translating proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address, TLS).
    pub listener: ListenerConfig,

    /// Forwarded-header trust policy.
    pub trust: TrustConfig,

    /// Test-site hostname rewriting.
    pub hostname: HostnameConfig,

    /// Loopback/LAN destination guard.
    pub guard: GuardConfig,

    /// CORS / hardcoded-response rule files.
    pub rules: RulesConfig,

    /// Upstream forwarding settings.
    pub upstream: UpstreamConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    #[serde(default)]
    pub admin: AdminConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Optional TLS configuration.
    pub tls: Option<TlsConfig>,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            tls: None,
            max_connections: 10_000,
        }
    }
}

/// TLS configuration for the listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to certificate file (PEM).
    pub cert_path: String,

    /// Path to private key file (PEM).
    pub key_path: String,
}

/// Trust policy for forwarding headers.
///
/// Forwarding headers are honored only when the physical peer is
/// loopback, a private LAN address, or inside one of the configured
/// CIDR allow-lists.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TrustConfig {
    /// CIDR blocks of reverse proxies in front of this one.
    pub authorized_proxies: Vec<String>,

    /// CIDR blocks of CDN edge servers trusted to supply accurate
    /// forwarding headers.
    pub cdn_ranges: Vec<String>,

    /// CDN-specific connecting-IP header (e.g., "cf-connecting-ip").
    /// Preferred over the generic forwarded-for header when present.
    pub cdn_ip_header: Option<String>,

    /// Generic forwarded-for header name.
    pub forwarded_for_header: String,

    /// Honor X-Forwarded-Host from trusted peers.
    pub honor_forwarded_host: bool,

    /// Honor X-Forwarded-Proto from trusted peers.
    pub honor_forwarded_scheme: bool,

    /// Honor X-Forwarded-Port from trusted peers.
    pub honor_forwarded_port: bool,
}

impl Default for TrustConfig {
    fn default() -> Self {
        Self {
            authorized_proxies: Vec::new(),
            cdn_ranges: Vec::new(),
            cdn_ip_header: None,
            forwarded_for_header: "x-forwarded-for".to_string(),
            honor_forwarded_host: false,
            honor_forwarded_scheme: true,
            honor_forwarded_port: true,
        }
    }
}

/// Test-site hostname rewriting.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HostnameConfig {
    /// Pattern matched against the request hostname. The first capture
    /// group is the optional subdomain; a non-matching hostname is
    /// forwarded unchanged.
    pub test_site_pattern: String,

    /// Production apex domain substituted for the test-site suffix.
    pub production_apex: String,

    /// Strip a trailing ":port" from the host header before matching.
    pub strip_port: bool,
}

impl Default for HostnameConfig {
    fn default() -> Self {
        Self {
            test_site_pattern: r"^(?:([A-Za-z0-9-]+)\.)?sitetest\d+\.roblox\.com$".to_string(),
            production_apex: "roblox.com".to_string(),
            strip_port: true,
        }
    }
}

/// Loopback/LAN destination guard.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GuardConfig {
    /// Reject upstream destinations inside private/link-local ranges.
    /// Loopback destinations are always rejected.
    pub deny_lan: bool,

    /// Additional addresses considered "the proxy itself" besides the
    /// loopback ranges and the bound address.
    pub own_addresses: Vec<String>,

    /// Externally-observed address of this proxy, if known.
    pub external_address: Option<String>,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            deny_lan: false,
            own_addresses: Vec::new(),
            external_address: None,
        }
    }
}

/// Declarative rule files (JSON or YAML by extension).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RulesConfig {
    /// CORS rule file.
    pub cors_file: Option<PathBuf>,

    /// Hardcoded-response rule file.
    pub hardcoded_file: Option<PathBuf>,

    /// Service-name rewrite table (plain string-to-string map).
    pub service_rewrite_file: Option<PathBuf>,

    /// Re-check rule files for staleness on every request.
    pub reload_per_request: bool,

    /// Watch rule files and reload on change.
    pub watch: bool,

    /// Apply a matched CORS rule even when the request Origin is not
    /// in the rule's allowed origins.
    pub always_apply_cors: bool,
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            cors_file: None,
            hardcoded_file: None,
            service_rewrite_file: None,
            reload_per_request: false,
            watch: false,
            always_apply_cors: false,
        }
    }
}

/// Upstream forwarding settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Total request timeout in seconds.
    pub timeout_secs: u64,

    /// Connection establishment timeout in seconds.
    pub connect_secs: u64,

    /// Validate upstream TLS certificates.
    pub validate_certificates: bool,

    /// Strip and re-add canonical X-Forwarded-* headers.
    pub send_forwarded_headers: bool,

    /// Value of the X-Forwarded-Server header.
    pub server_name: String,

    /// Maximum inbound request body size in bytes.
    pub max_body_size: usize,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            connect_secs: 5,
            validate_certificates: true,
            send_forwarded_headers: true,
            server_name: "hostbridge".to_string(),
            max_body_size: 2 * 1024 * 1024,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,

    /// Analytics event sink. Events are fire-and-forget; absence
    /// never affects the pipeline.
    pub events_endpoint: Option<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
            events_endpoint: None,
        }
    }
}

/// Admin endpoint configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable the informational admin endpoints.
    pub enabled: bool,

    /// Admin bind address.
    pub bind_address: String,

    /// Bearer token required on admin requests. No token means the
    /// endpoints answer unauthenticated; bind to loopback in that case.
    pub api_key: Option<String>,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_address: "127.0.0.1:8081".to_string(),
            api_key: None,
        }
    }
}
