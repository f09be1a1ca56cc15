//! Per-request context and stage results.
//!
//! # Design Decisions
//! - The context is exclusively owned by its request's task; no
//!   cross-request sharing, no locks
//! - Identity fields (client IP/port/scheme) are written once by the
//!   identity rewriter and read-only afterwards
//! - Stages signal control flow with an explicit result type instead
//!   of raising through the framework

use std::net::{IpAddr, SocketAddr};
use std::time::Instant;

use axum::response::Response;

use crate::error::ProxyError;

/// Result of running one pipeline stage.
///
/// A stage that writes any part of the response must return
/// `Terminate`; the orchestrator never invokes later stages after
/// that. Unexpected faults are routed to the terminal error stage.
pub enum StageOutcome {
    /// Proceed to the next stage.
    Continue,
    /// A complete response was produced; stop here.
    Terminate(Response),
    /// An unclassified fault; route to the terminal error stage.
    Fault(ProxyError),
}

/// Rendering style a stage may force on the terminal error responder,
/// overriding its user-agent sniff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorStyle {
    Html,
    Json,
}

/// Diagnostic a stage attaches for the terminal error responder and
/// the completion log.
#[derive(Debug)]
pub struct ErrorContext {
    pub detail: String,
    pub style: Option<ErrorStyle>,
}

/// Mutable state threaded through the pipeline for one request.
#[derive(Debug)]
pub struct RequestContext {
    /// Monotonic start of request processing.
    pub start: Instant,

    /// Physical TCP peer address. Never rewritten.
    pub peer: SocketAddr,

    /// Effective client IP after trusted forwarded-header overrides.
    pub client_ip: IpAddr,

    /// Effective client port.
    pub client_port: u16,

    /// Effective scheme ("http" or "https").
    pub scheme: String,

    /// Effective host override from a trusted forwarded-host header.
    pub host_override: Option<String>,

    /// Host header exactly as the downstream sent it.
    pub original_host: Option<String>,

    /// Upstream hostname after the test-site rewrite.
    pub hostname: Option<String>,

    /// Address the hostname resolved to.
    pub resolved: Option<IpAddr>,

    /// Rewritten Origin value when the request's Origin host matched
    /// the original host header.
    pub transformed_origin: Option<String>,

    /// Rewritten Referer value, same conditions as the Origin.
    pub transformed_referer: Option<String>,

    /// Whether the upstream response may overwrite CORS headers the
    /// rule engine already staged.
    pub allow_cors_overwrite: bool,

    /// Diagnostic set by whichever stage failed or refused the
    /// request.
    pub error_context: Option<ErrorContext>,
}

impl RequestContext {
    pub fn new(peer: SocketAddr, scheme: &str) -> Self {
        Self {
            start: Instant::now(),
            peer,
            client_ip: peer.ip(),
            client_port: peer.port(),
            scheme: scheme.to_string(),
            host_override: None,
            original_host: None,
            hostname: None,
            resolved: None,
            transformed_origin: None,
            transformed_referer: None,
            allow_cors_overwrite: true,
            error_context: None,
        }
    }

    /// Attach a diagnostic for the terminal error responder and the
    /// completion log. A later call replaces an earlier one.
    pub fn set_error(&mut self, detail: impl Into<String>, style: Option<ErrorStyle>) {
        self.error_context = Some(ErrorContext {
            detail: detail.into(),
            style,
        });
    }

    /// Milliseconds since the request entered the pipeline.
    pub fn elapsed_ms(&self) -> u128 {
        self.start.elapsed().as_millis()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_starts_with_physical_identity() {
        let peer: SocketAddr = "203.0.113.9:51000".parse().unwrap();
        let ctx = RequestContext::new(peer, "https");

        assert_eq!(ctx.client_ip, peer.ip());
        assert_eq!(ctx.client_port, 51000);
        assert_eq!(ctx.scheme, "https");
        assert!(ctx.allow_cors_overwrite);
        assert!(ctx.error_context.is_none());
    }

    #[test]
    fn later_error_context_replaces_earlier() {
        let peer: SocketAddr = "203.0.113.9:51000".parse().unwrap();
        let mut ctx = RequestContext::new(peer, "http");

        ctx.set_error("first", None);
        ctx.set_error("second", Some(ErrorStyle::Json));

        let ec = ctx.error_context.unwrap();
        assert_eq!(ec.detail, "second");
        assert_eq!(ec.style, Some(ErrorStyle::Json));
    }
}
