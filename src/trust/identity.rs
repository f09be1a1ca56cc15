//! Identity rewriter.
//!
//! Applies the trust policy's decision to produce the effective client
//! identity (IP, port, scheme, host) from forwarding headers. Fields
//! are written once into the request context and are read-only for
//! every later stage and the forwarder.
//!
//! Parse failures for a candidate header value are ignored; the value
//! is simply not applied.

use std::net::IpAddr;

use axum::http::HeaderMap;

use crate::config::TrustConfig;
use crate::observability::metrics;
use crate::pipeline::context::RequestContext;
use crate::trust::TrustPolicy;

const FORWARDED_HOST: &str = "x-forwarded-host";
const FORWARDED_PROTO: &str = "x-forwarded-proto";
const FORWARDED_PORT: &str = "x-forwarded-port";

/// Rewrite the context's identity fields from forwarding headers, if
/// and only if the physical peer is trusted.
pub fn rewrite_identity(
    policy: &TrustPolicy,
    config: &TrustConfig,
    headers: &HeaderMap,
    ctx: &mut RequestContext,
) {
    let decision = policy.evaluate(ctx.peer.ip());
    if !decision.honored() {
        tracing::trace!(peer = %ctx.peer, "Peer not trusted; forwarding headers ignored");
        return;
    }

    if let Some(ip) = candidate_client_ip(config, headers) {
        ctx.client_ip = ip;
        metrics::record_identity_override("ip");
    }

    if config.honor_forwarded_host {
        if let Some(host) = header_str(headers, FORWARDED_HOST) {
            if !host.is_empty() {
                ctx.host_override = Some(host.to_string());
                metrics::record_identity_override("host");
            }
        }
    }

    if config.honor_forwarded_scheme {
        if let Some(scheme) = header_str(headers, FORWARDED_PROTO) {
            if scheme == "http" || scheme == "https" {
                ctx.scheme = scheme.to_string();
                metrics::record_identity_override("scheme");
            }
        }
    }

    if config.honor_forwarded_port {
        if let Some(port) = header_str(headers, FORWARDED_PORT) {
            if let Ok(n) = port.parse::<u32>() {
                if n > 0 && n < 65536 {
                    ctx.client_port = n as u16;
                    metrics::record_identity_override("port");
                }
            }
        }
    }
}

/// The CDN connecting-IP header wins over the generic forwarded-for
/// header; both must carry a syntactically valid IPv4/IPv6 address.
fn candidate_client_ip(config: &TrustConfig, headers: &HeaderMap) -> Option<IpAddr> {
    if let Some(name) = &config.cdn_ip_header {
        if let Some(value) = header_str(headers, name) {
            if let Ok(ip) = value.trim().parse::<IpAddr>() {
                return Some(ip);
            }
        }
    }

    let value = header_str(headers, &config.forwarded_for_header)?;
    // Forwarded-for is a comma-separated chain; the first entry is the
    // originating client.
    value.split(',').next()?.trim().parse().ok()
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;

    fn trusted_ctx() -> RequestContext {
        let peer: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        RequestContext::new(peer, "http")
    }

    fn untrusted_ctx() -> RequestContext {
        let peer: SocketAddr = "203.0.113.10:9000".parse().unwrap();
        RequestContext::new(peer, "http")
    }

    fn config() -> TrustConfig {
        TrustConfig {
            cdn_ip_header: Some("cf-connecting-ip".into()),
            honor_forwarded_host: true,
            ..TrustConfig::default()
        }
    }

    fn policy(config: &TrustConfig) -> TrustPolicy {
        TrustPolicy::from_config(config)
    }

    #[test]
    fn untrusted_peer_keeps_physical_identity() {
        let config = config();
        let mut ctx = untrusted_ctx();
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "1.2.3.4".parse().unwrap());
        headers.insert("x-forwarded-proto", "https".parse().unwrap());
        headers.insert("x-forwarded-port", "443".parse().unwrap());
        headers.insert("x-forwarded-host", "evil.example".parse().unwrap());

        rewrite_identity(&policy(&config), &config, &headers, &mut ctx);

        assert_eq!(ctx.client_ip, "203.0.113.10".parse::<IpAddr>().unwrap());
        assert_eq!(ctx.client_port, 9000);
        assert_eq!(ctx.scheme, "http");
        assert!(ctx.host_override.is_none());
    }

    #[test]
    fn trusted_peer_honors_forwarded_for() {
        let config = config();
        let mut ctx = trusted_ctx();
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "1.2.3.4, 10.0.0.1".parse().unwrap());

        rewrite_identity(&policy(&config), &config, &headers, &mut ctx);

        assert_eq!(ctx.client_ip, "1.2.3.4".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn cdn_header_wins_over_forwarded_for() {
        let config = config();
        let mut ctx = trusted_ctx();
        let mut headers = HeaderMap::new();
        headers.insert("cf-connecting-ip", "2001:db8::7".parse().unwrap());
        headers.insert("x-forwarded-for", "1.2.3.4".parse().unwrap());

        rewrite_identity(&policy(&config), &config, &headers, &mut ctx);

        assert_eq!(ctx.client_ip, "2001:db8::7".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn invalid_cdn_header_falls_back_to_forwarded_for() {
        let config = config();
        let mut ctx = trusted_ctx();
        let mut headers = HeaderMap::new();
        headers.insert("cf-connecting-ip", "not-an-ip".parse().unwrap());
        headers.insert("x-forwarded-for", "1.2.3.4".parse().unwrap());

        rewrite_identity(&policy(&config), &config, &headers, &mut ctx);

        assert_eq!(ctx.client_ip, "1.2.3.4".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn scheme_must_be_http_or_https() {
        let config = config();
        let mut ctx = trusted_ctx();
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-proto", "gopher".parse().unwrap());

        rewrite_identity(&policy(&config), &config, &headers, &mut ctx);
        assert_eq!(ctx.scheme, "http");

        headers.insert("x-forwarded-proto", "https".parse().unwrap());
        rewrite_identity(&policy(&config), &config, &headers, &mut ctx);
        assert_eq!(ctx.scheme, "https");
    }

    #[test]
    fn port_must_be_in_range() {
        let config = config();
        let mut ctx = trusted_ctx();
        let mut headers = HeaderMap::new();

        for bad in ["0", "65536", "abc", "-1"] {
            headers.insert("x-forwarded-port", bad.parse().unwrap());
            rewrite_identity(&policy(&config), &config, &headers, &mut ctx);
            assert_eq!(ctx.client_port, 9000, "{bad} should not apply");
        }

        headers.insert("x-forwarded-port", "8443".parse().unwrap());
        rewrite_identity(&policy(&config), &config, &headers, &mut ctx);
        assert_eq!(ctx.client_port, 8443);
    }

    #[test]
    fn host_override_requires_flag() {
        let mut config = config();
        config.honor_forwarded_host = false;
        let mut ctx = trusted_ctx();
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-host", "apis.sitetest1.roblox.com".parse().unwrap());

        rewrite_identity(&policy(&config), &config, &headers, &mut ctx);
        assert!(ctx.host_override.is_none());

        config.honor_forwarded_host = true;
        rewrite_identity(&policy(&config), &config, &headers, &mut ctx);
        assert_eq!(ctx.host_override.as_deref(), Some("apis.sitetest1.roblox.com"));
    }
}
