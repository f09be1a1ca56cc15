//! Hostname extraction, test-site rewriting, and resolution.
//!
//! # Data Flow
//! ```text
//! effective host header (post identity rewrite)
//!     → strip trailing :port (bracketed IPv6 literals kept intact)
//!     → strip scheme prefix
//!     → test-site pattern rewrite (subdomain.<apex> | <apex>)
//!     → async DNS resolution
//!     → RequestContext.hostname / RequestContext.resolved
//! ```
//!
//! # Design Decisions
//! - Rewrite is idempotent: an already-rewritten apex hostname no
//!   longer matches the test-site pattern
//! - Resolution is for destination validation; the upstream client
//!   resolves again when connecting
//! - Not-found and malformed-host are reported as distinct outcomes

use std::collections::HashMap;
use std::net::IpAddr;

use axum::http::{header, HeaderMap};
use regex::Regex;
use tokio::net::lookup_host;

use crate::config::HostnameConfig;
use crate::observability::metrics;
use crate::pipeline::context::RequestContext;

/// Outcome of the hostname stage, mapped to a response by the
/// orchestrator.
#[derive(Debug)]
pub enum HostOutcome {
    /// No usable host header; terminate with 400.
    MissingHost,
    /// Hostname rewritten and resolved.
    Resolved { hostname: String, address: IpAddr },
    /// DNS gave no address for the hostname; terminate with 503.
    ResolveFailed { hostname: String },
}

/// Rewrites test-site hostnames to their production equivalent.
#[derive(Debug)]
pub struct HostnameRewriter {
    pattern: Regex,
    apex: String,
}

impl HostnameRewriter {
    pub fn from_config(config: &HostnameConfig) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: Regex::new(&config.test_site_pattern)?,
            apex: config.production_apex.clone(),
        })
    }

    /// `subdomain.sitetestN.<apex>` → `subdomain.<apex>`;
    /// `sitetestN.<apex>` → `<apex>`; anything else unchanged.
    pub fn rewrite(&self, hostname: &str) -> Option<String> {
        let caps = self.pattern.captures(hostname)?;
        Some(match caps.get(1) {
            Some(subdomain) => format!("{}.{}", subdomain.as_str(), self.apex),
            None => self.apex.clone(),
        })
    }
}

/// Address resolution seam. `Static` backs tests and fixed mappings.
#[derive(Debug, Clone)]
pub enum AddressResolver {
    Dns,
    Static(HashMap<String, IpAddr>),
}

impl AddressResolver {
    pub async fn resolve(&self, hostname: &str) -> Option<IpAddr> {
        // Bracketed IPv6 literals resolve as their inner address.
        let bare = hostname.trim_start_matches('[').trim_end_matches(']');
        if let Ok(ip) = bare.parse::<IpAddr>() {
            return Some(ip);
        }
        match self {
            AddressResolver::Dns => lookup_host((bare, 0u16))
                .await
                .ok()
                .and_then(|mut addrs| addrs.next())
                .map(|addr| addr.ip()),
            AddressResolver::Static(map) => map.get(bare).copied(),
        }
    }
}

/// The hostname stage: extraction, rewrite, resolution, and the
/// Origin/Referer same-origin transform.
#[derive(Debug)]
pub struct HostnameResolver {
    rewriter: HostnameRewriter,
    resolver: AddressResolver,
    strip_port: bool,
}

impl HostnameResolver {
    pub fn new(rewriter: HostnameRewriter, resolver: AddressResolver, strip_port: bool) -> Self {
        Self {
            rewriter,
            resolver,
            strip_port,
        }
    }

    pub async fn run(&self, headers: &HeaderMap, ctx: &mut RequestContext) -> HostOutcome {
        let raw_host = match effective_host(headers, ctx) {
            Some(h) if !h.is_empty() => h,
            _ => return HostOutcome::MissingHost,
        };
        ctx.original_host = Some(raw_host.clone());

        let mut hostname = strip_scheme(&raw_host).to_string();
        if self.strip_port {
            hostname = strip_port(&hostname).to_string();
        }
        if hostname.is_empty() {
            return HostOutcome::MissingHost;
        }

        if let Some(rewritten) = self.rewriter.rewrite(&hostname) {
            tracing::debug!(from = %hostname, to = %rewritten, "Test-site hostname rewritten");
            hostname = rewritten;
        }

        let address = match self.resolver.resolve(&hostname).await {
            Some(addr) => addr,
            None => {
                tracing::warn!(hostname = %hostname, "Hostname did not resolve");
                metrics::record_resolve_failure(&hostname);
                return HostOutcome::ResolveFailed { hostname };
            }
        };

        // Keep the upstream request same-origin-consistent: if the
        // Origin/Referer authority matches the downstream host, point
        // it at the rewritten hostname instead.
        ctx.transformed_origin = headers
            .get(header::ORIGIN)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| transform_same_origin(v, &raw_host, &hostname));
        ctx.transformed_referer = headers
            .get(header::REFERER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| transform_same_origin(v, &raw_host, &hostname));

        ctx.hostname = Some(hostname.clone());
        ctx.resolved = Some(address);
        HostOutcome::Resolved { hostname, address }
    }
}

/// Effective host: a trusted forwarded-host override wins, then the
/// Host header, then the request target's authority.
fn effective_host(headers: &HeaderMap, ctx: &RequestContext) -> Option<String> {
    if let Some(host) = &ctx.host_override {
        return Some(host.clone());
    }
    headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string())
}

/// Strip a trailing `:port`. Bracketed IPv6 literals are handled
/// specially so the enclosed literal survives intact.
pub fn strip_port(host: &str) -> &str {
    if let Some(end) = host.rfind(']') {
        // "[::1]:8080" → "[::1]"; "[::1]" unchanged.
        return &host[..=end];
    }
    match host.rfind(':') {
        Some(idx) if host[..idx].find(':').is_none() => &host[..idx],
        // More than one colon and no brackets: a bare IPv6 literal.
        _ => host,
    }
}

/// Strip a leading scheme prefix if present.
pub fn strip_scheme(host: &str) -> &str {
    host.strip_prefix("https://")
        .or_else(|| host.strip_prefix("http://"))
        .unwrap_or(host)
}

/// If `value`'s authority equals the original downstream host, rebuild
/// it with the rewritten upstream hostname.
fn transform_same_origin(value: &str, original_host: &str, new_host: &str) -> Option<String> {
    let (scheme, rest) = value.split_once("://")?;
    let authority_end = rest
        .find(|c| c == '/' || c == '?' || c == '#')
        .unwrap_or(rest.len());
    let (authority, remainder) = rest.split_at(authority_end);
    if !authority.eq_ignore_ascii_case(original_host) {
        return None;
    }
    Some(format!("{scheme}://{new_host}{remainder}"))
}
