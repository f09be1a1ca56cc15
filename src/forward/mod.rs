//! Upstream forwarding.
//!
//! # Data Flow
//! ```text
//! RequestContext (effective identity, rewritten hostname)
//!     → build upstream request (method, headers, buffered body)
//!     → strip + re-add canonical forwarding headers
//!     → send (redirects relayed, never followed)
//!     → buffer upstream body
//!     → rewrite.rs (identity strip, CORS strip, Location, cookies)
//!     → relay with recomputed Content-Length
//! ```
//!
//! # Failure classification
//! - connect/response timeout, connection refused → 504 with an
//!   `X-Downstream-Timing` header and a message naming the URI
//! - connection reset while reading the body → 502
//! - anything else → routed to the terminal error stage
//!
//! Upstream 4xx/5xx are not failures; they are relayed as-is.

pub mod rewrite;

use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::Response;

use crate::config::UpstreamConfig;
use crate::error::ProxyError;
use crate::pipeline::context::{RequestContext, StageOutcome};

pub const DOWNSTREAM_TIMING_HEADER: &str = "x-downstream-timing";

/// Forwarding headers this proxy produces; stripped from the inbound
/// request before the canonical values are re-added.
const FORWARDING_HEADERS: &[&str] = &[
    "x-forwarded-for",
    "x-forwarded-host",
    "x-forwarded-port",
    "x-forwarded-proto",
    "x-forwarded-server",
    "x-real-ip",
];

/// Performs the proxied call and relays its result.
#[derive(Debug)]
pub struct UpstreamForwarder {
    client: reqwest::Client,
    timeout: Duration,
    send_forwarded: bool,
    server_name: String,
}

impl UpstreamForwarder {
    pub fn from_config(config: &UpstreamConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            // Redirects are relayed to the downstream, never chased.
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(Duration::from_secs(config.connect_secs))
            .danger_accept_invalid_certs(!config.validate_certificates)
            .build()?;

        Ok(Self {
            client,
            timeout: Duration::from_secs(config.timeout_secs),
            send_forwarded: config.send_forwarded_headers,
            server_name: config.server_name.clone(),
        })
    }

    /// Forward one request. The context must carry a rewritten
    /// hostname; the inbound body is already buffered.
    pub async fn forward(
        &self,
        ctx: &RequestContext,
        method: Method,
        path_and_query: &str,
        inbound_headers: &HeaderMap,
        body: Bytes,
    ) -> StageOutcome {
        let Some(hostname) = ctx.hostname.as_deref() else {
            return StageOutcome::Fault(ProxyError::Internal(
                "forwarder invoked without a resolved hostname".into(),
            ));
        };
        let url = format!("{}://{}{}", ctx.scheme, hostname, path_and_query);

        let headers = self.build_upstream_headers(ctx, inbound_headers);

        let result = self
            .client
            .request(method, &url)
            .headers(headers)
            .body(body)
            .timeout(self.timeout)
            .send()
            .await;

        let response = match result {
            Ok(response) => response,
            Err(e) if e.is_timeout() || e.is_connect() => {
                tracing::warn!(url = %url, elapsed_ms = ctx.elapsed_ms(), error = %e, "Upstream unreachable");
                return StageOutcome::Terminate(timeout_response(ctx, &url));
            }
            Err(e) => {
                return StageOutcome::Fault(ProxyError::Upstream {
                    uri: url,
                    source: e,
                });
            }
        };

        let status = response.status();
        let mut headers = response.headers().clone();

        // Buffered so the mid-stream reset case can still be reported
        // as a 502 and Content-Length recomputed after header rewrites.
        let body = match response.bytes().await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "Upstream connection reset mid-stream");
                return StageOutcome::Terminate(reset_response(&url));
            }
        };

        self.relay(ctx, status, &mut headers, body)
    }

    fn build_upstream_headers(&self, ctx: &RequestContext, inbound: &HeaderMap) -> HeaderMap {
        let mut headers = HeaderMap::with_capacity(inbound.len() + FORWARDING_HEADERS.len());
        for (name, value) in inbound {
            if rewrite::is_hop_by_hop(name.as_str()) {
                continue;
            }
            // The client derives Host and Content-Length itself.
            if *name == header::HOST || *name == header::CONTENT_LENGTH {
                continue;
            }
            if self.send_forwarded
                && FORWARDING_HEADERS
                    .iter()
                    .any(|h| name.as_str().eq_ignore_ascii_case(h))
            {
                continue;
            }
            headers.append(name.clone(), value.clone());
        }

        if self.send_forwarded {
            insert(&mut headers, "x-forwarded-for", &ctx.client_ip.to_string());
            if let Some(host) = &ctx.original_host {
                insert(&mut headers, "x-forwarded-host", host);
            }
            insert(&mut headers, "x-forwarded-port", &ctx.client_port.to_string());
            insert(&mut headers, "x-forwarded-proto", &ctx.scheme);
            insert(&mut headers, "x-forwarded-server", &self.server_name);
            insert(&mut headers, "x-real-ip", &ctx.client_ip.to_string());
        }

        if let Some(origin) = &ctx.transformed_origin {
            insert(&mut headers, "origin", origin);
        }
        if let Some(referer) = &ctx.transformed_referer {
            insert(&mut headers, "referer", referer);
        }

        headers
    }

    fn relay(
        &self,
        ctx: &RequestContext,
        status: StatusCode,
        headers: &mut HeaderMap,
        body: Bytes,
    ) -> StageOutcome {
        rewrite::strip_response_headers(headers);

        if !ctx.allow_cors_overwrite {
            rewrite::strip_cors_headers(headers);
        }

        if let (Some(upstream), Some(downstream)) =
            (ctx.hostname.as_deref(), ctx.original_host.as_deref())
        {
            rewrite::rewrite_location(headers, upstream, downstream);
            rewrite::rewrite_cookie_domains(headers, upstream, downstream);
        }

        headers.insert(
            header::CONTENT_LENGTH,
            HeaderValue::from(body.len()),
        );

        let mut response = Response::builder().status(status);
        if let Some(response_headers) = response.headers_mut() {
            *response_headers = headers.clone();
        }
        match response.body(Body::from(body)) {
            Ok(response) => StageOutcome::Terminate(response),
            Err(e) => StageOutcome::Fault(ProxyError::MalformedResponse(e.to_string())),
        }
    }
}

fn insert(headers: &mut HeaderMap, name: &'static str, value: &str) {
    if let Ok(v) = HeaderValue::from_str(value) {
        headers.insert(name, v);
    }
}

fn timeout_response(ctx: &RequestContext, url: &str) -> Response {
    let elapsed = ctx.elapsed_ms();
    Response::builder()
        .status(StatusCode::GATEWAY_TIMEOUT)
        .header(DOWNSTREAM_TIMING_HEADER, elapsed.to_string())
        .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(Body::from(format!(
            "upstream request to {url} timed out after {elapsed}ms"
        )))
        .unwrap_or_else(|_| Response::new(Body::empty()))
}

fn reset_response(url: &str) -> Response {
    Response::builder()
        .status(StatusCode::BAD_GATEWAY)
        .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(Body::from(format!(
            "upstream connection to {url} was reset while relaying the response"
        )))
        .unwrap_or_else(|_| Response::new(Body::empty()))
}
