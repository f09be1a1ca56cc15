//! Stage sequencing for one request.

use std::net::IpAddr;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::Request;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::Response;
use thiserror::Error;

use crate::config::ProxyConfig;
use crate::error::error_response;
use crate::forward::UpstreamForwarder;
use crate::guard::TargetGuard;
use crate::observability::events::EventReporter;
use crate::observability::metrics;
use crate::pipeline::context::{RequestContext, StageOutcome};
use crate::resolver::{AddressResolver, HostOutcome, HostnameResolver, HostnameRewriter};
use crate::rules::store::RuleStore;
use crate::rules::{cors, hardcoded};
use crate::trust::identity::rewrite_identity;
use crate::trust::TrustPolicy;

#[derive(Debug, Error)]
pub enum PipelineBuildError {
    #[error("invalid test-site pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("failed to build upstream client: {0}")]
    Client(#[from] reqwest::Error),
}

/// The assembled pipeline. One instance serves all requests.
#[derive(Debug)]
pub struct Pipeline {
    trust_policy: TrustPolicy,
    trust_config: crate::config::TrustConfig,
    resolver: HostnameResolver,
    guard: TargetGuard,
    rules: Arc<RuleStore>,
    forwarder: UpstreamForwarder,
    events: EventReporter,
    always_apply_cors: bool,
    max_body_size: usize,
    scheme: &'static str,
}

impl Pipeline {
    /// Assemble the pipeline from configuration. `bound` lists the
    /// addresses the listener actually bound to, fed to the guard.
    pub fn from_config(
        config: &ProxyConfig,
        rules: Arc<RuleStore>,
        resolver: AddressResolver,
        bound: &[IpAddr],
    ) -> Result<Self, PipelineBuildError> {
        let rewriter = HostnameRewriter::from_config(&config.hostname)?;
        Ok(Self {
            trust_policy: TrustPolicy::from_config(&config.trust),
            trust_config: config.trust.clone(),
            resolver: HostnameResolver::new(rewriter, resolver, config.hostname.strip_port),
            guard: TargetGuard::from_config(&config.guard, bound),
            rules,
            forwarder: UpstreamForwarder::from_config(&config.upstream)?,
            events: EventReporter::new(config.observability.events_endpoint.clone()),
            always_apply_cors: config.rules.always_apply_cors,
            max_body_size: config.upstream.max_body_size,
            scheme: if config.listener.tls.is_some() {
                "https"
            } else {
                "http"
            },
        })
    }

    /// Run one request through the stages and produce its response.
    pub async fn handle(&self, peer: SocketAddr, request: Request) -> Response {
        let (parts, body) = request.into_parts();
        let method = parts.method;
        let headers = parts.headers;
        let path_and_query = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| "/".to_string());
        let path = parts.uri.path().to_string();

        let mut ctx = RequestContext::new(peer, self.scheme);

        let body = match axum::body::to_bytes(body, self.max_body_size).await {
            Ok(bytes) => bytes,
            Err(_) => {
                tracing::warn!(peer = %peer, limit = self.max_body_size, "Request body over limit");
                let resp = plain_response(
                    StatusCode::PAYLOAD_TOO_LARGE,
                    "request body exceeds the configured limit",
                );
                return self.finish(&ctx, "rejected", resp);
            }
        };

        rewrite_identity(&self.trust_policy, &self.trust_config, &headers, &mut ctx);

        let snapshot = self.rules.snapshot();

        // A hardcoded match is authoritative and skips resolution and
        // the destination guard.
        if let Some(rule) =
            hardcoded::select_rule(&snapshot.hardcoded, &snapshot.services, &path, method.as_str())
        {
            tracing::debug!(template = rule.template_raw(), path = %path, "Hardcoded response served");
            return self.finish(&ctx, "hardcoded", rule.respond());
        }

        let hostname = match self.resolver.run(&headers, &mut ctx).await {
            HostOutcome::MissingHost => {
                self.events
                    .fire("missing_host_header", format!("peer {peer}"));
                let resp = plain_response(StatusCode::BAD_REQUEST, "host header is missing");
                return self.finish(&ctx, "missing_host", resp);
            }
            HostOutcome::ResolveFailed { hostname } => {
                self.events.fire("resolve_failed", hostname.clone());
                ctx.set_error(format!("hostname {hostname} could not be resolved"), None);
                let resp = plain_response(
                    StatusCode::SERVICE_UNAVAILABLE,
                    &format!("hostname {hostname} could not be resolved"),
                );
                return self.finish(&ctx, "resolve_failed", resp);
            }
            HostOutcome::Resolved { hostname, address } => {
                if let Err(denial) = self.guard.evaluate(&hostname, address) {
                    tracing::warn!(
                        hostname = %hostname,
                        address = %address,
                        reason = denial.reason(),
                        "Destination refused"
                    );
                    metrics::record_target_denied(match denial {
                        crate::guard::GuardDenial::Loopback => "loopback",
                        crate::guard::GuardDenial::PrivateNetwork => "private_network",
                    });
                    ctx.set_error(
                        format!("{hostname} resolved to {address}: {}", denial.reason()),
                        None,
                    );
                    let resp = plain_response(StatusCode::FORBIDDEN, denial.reason());
                    return self.finish(&ctx, "denied", resp);
                }
                hostname
            }
        };

        // Stage CORS headers before forwarding so the forwarder knows
        // whether upstream CORS headers may survive.
        let origin = headers
            .get(header::ORIGIN)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let mut staged = HeaderMap::new();
        if let Some(rule) = cors::select_rule(
            &snapshot.cors,
            &path,
            &hostname,
            method.as_str(),
            &ctx.scheme,
        ) {
            rule.apply(origin.as_deref(), self.always_apply_cors, &mut staged);
            ctx.allow_cors_overwrite = rule.allow_response_headers_overwrite();
        }

        match self
            .forwarder
            .forward(&ctx, method, &path_and_query, &headers, body)
            .await
        {
            StageOutcome::Terminate(mut response) => {
                merge_staged_headers(response.headers_mut(), staged);
                self.finish(&ctx, "forwarded", response)
            }
            StageOutcome::Fault(error) => {
                let response = error_response(&error, &ctx, &headers);
                self.finish(&ctx, "fault", response)
            }
            StageOutcome::Continue => {
                // No stage produced a response; nothing downstream can
                // serve this request.
                let resp = plain_response(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "no downstream for this request",
                );
                self.finish(&ctx, "unrouted", resp)
            }
        }
    }

    fn finish(&self, ctx: &RequestContext, outcome: &'static str, response: Response) -> Response {
        let status = response.status();
        tracing::info!(
            status = status.as_u16(),
            outcome,
            client_ip = %ctx.client_ip,
            hostname = ctx.hostname.as_deref().unwrap_or("-"),
            error_context = ctx
                .error_context
                .as_ref()
                .map(|e| e.detail.as_str())
                .unwrap_or("-"),
            elapsed_ms = ctx.elapsed_ms(),
            "Request completed"
        );
        metrics::record_request(status.as_u16(), outcome, ctx.start.elapsed());
        response
    }
}

/// Staged CORS headers fill gaps; headers the upstream legitimately
/// kept (overwrite allowed) stay authoritative.
fn merge_staged_headers(response: &mut HeaderMap, staged: HeaderMap) {
    for name in staged.keys() {
        if *name != header::VARY && response.contains_key(name) {
            continue;
        }
        for value in staged.get_all(name) {
            response.append(name.clone(), value.clone());
        }
    }
}

fn plain_response(status: StatusCode, message: &str) -> Response {
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(Body::from(message.to_string()))
        .unwrap_or_else(|_| Response::new(Body::empty()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RulesConfig;
    use crate::rules::hardcoded::MATCHED_TEMPLATE_HEADER;
    use std::collections::HashMap;
    use std::io::Write;
    use std::path::PathBuf;

    const PEER: &str = "203.0.113.50:40000";

    fn pipeline_with(
        rules_config: RulesConfig,
        static_hosts: &[(&str, &str)],
    ) -> Pipeline {
        let config = ProxyConfig {
            rules: rules_config,
            ..ProxyConfig::default()
        };
        let rules = Arc::new(RuleStore::new(&config.rules).unwrap());
        let resolver = AddressResolver::Static(
            static_hosts
                .iter()
                .map(|(host, ip)| (host.to_string(), ip.parse().unwrap()))
                .collect::<HashMap<_, _>>(),
        );
        Pipeline::from_config(&config, rules, resolver, &[]).unwrap()
    }

    fn request(host: Option<&str>, path: &str) -> Request {
        let mut builder = Request::builder().uri(path);
        if let Some(host) = host {
            builder = builder.header(header::HOST, host);
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), 1 << 20)
            .await
            .unwrap();
        String::from_utf8_lossy(&bytes).to_string()
    }

    fn temp_rules(name: &str, contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "hostbridge-orch-{}-{}",
            std::process::id(),
            name
        ));
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[tokio::test]
    async fn missing_host_is_400() {
        let pipeline = pipeline_with(RulesConfig::default(), &[]);
        let response = pipeline
            .handle(PEER.parse().unwrap(), request(None, "/v1/x"))
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(body_text(response).await.contains("host header is missing"));
    }

    #[tokio::test]
    async fn unresolvable_host_is_503() {
        let pipeline = pipeline_with(RulesConfig::default(), &[]);
        let response = pipeline
            .handle(
                PEER.parse().unwrap(),
                request(Some("apis.sitetest1.roblox.com"), "/v1/x"),
            )
            .await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        // The rewritten production name is what failed to resolve.
        assert!(body_text(response).await.contains("apis.roblox.com"));
    }

    #[tokio::test]
    async fn loopback_destination_is_403() {
        let pipeline = pipeline_with(
            RulesConfig::default(),
            &[("apis.roblox.com", "127.0.0.1")],
        );
        let response = pipeline
            .handle(
                PEER.parse().unwrap(),
                request(Some("apis.sitetest1.roblox.com"), "/v1/x"),
            )
            .await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn hardcoded_match_bypasses_resolution_and_guard() {
        let path = temp_rules(
            "bypass.json",
            r#"[{ "template": "/internal/ping", "body": "pong" }]"#,
        );
        let pipeline = pipeline_with(
            RulesConfig {
                hardcoded_file: Some(path.clone()),
                ..RulesConfig::default()
            },
            // Deliberately no resolvable hosts: the rule must answer
            // before resolution is attempted.
            &[],
        );

        let response = pipeline
            .handle(
                PEER.parse().unwrap(),
                request(Some("apis.sitetest1.roblox.com"), "/internal/ping"),
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(MATCHED_TEMPLATE_HEADER).unwrap(),
            "/internal/ping"
        );
        assert_eq!(body_text(response).await, "pong");

        std::fs::remove_file(path).ok();
    }

    #[tokio::test]
    async fn hardcoded_match_works_without_host_header() {
        let path = temp_rules("nohost.json", r#"[{ "template": "/ping" }]"#);
        let pipeline = pipeline_with(
            RulesConfig {
                hardcoded_file: Some(path.clone()),
                ..RulesConfig::default()
            },
            &[],
        );

        let response = pipeline
            .handle(PEER.parse().unwrap(), request(None, "/ping"))
            .await;
        assert_eq!(response.status(), StatusCode::OK);

        std::fs::remove_file(path).ok();
    }

    #[tokio::test]
    async fn oversized_body_is_413() {
        let mut config = ProxyConfig::default();
        config.upstream.max_body_size = 8;
        let rules = Arc::new(RuleStore::new(&config.rules).unwrap());
        let pipeline = Pipeline::from_config(
            &config,
            rules,
            AddressResolver::Static(HashMap::new()),
            &[],
        )
        .unwrap();

        let request = Request::builder()
            .uri("/v1/x")
            .header(header::HOST, "apis.sitetest1.roblox.com")
            .body(Body::from("way more than eight bytes"))
            .unwrap();
        let response = pipeline.handle(PEER.parse().unwrap(), request).await;
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[test]
    fn staged_headers_fill_gaps_only() {
        let mut response = HeaderMap::new();
        response.insert(
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            "https://upstream.example".parse().unwrap(),
        );

        let mut staged = HeaderMap::new();
        staged.insert(
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            "https://staged.example".parse().unwrap(),
        );
        staged.insert(header::ACCESS_CONTROL_MAX_AGE, "600".parse().unwrap());

        merge_staged_headers(&mut response, staged);

        assert_eq!(
            response.get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
            "https://upstream.example"
        );
        assert_eq!(response.get(header::ACCESS_CONTROL_MAX_AGE).unwrap(), "600");
    }
}
