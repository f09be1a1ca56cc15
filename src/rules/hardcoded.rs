//! Hardcoded response engine.
//!
//! A matched rule is authoritative: it writes the complete response
//! and terminates the pipeline, bypassing hostname resolution, the
//! destination guard, and the forwarder.

use std::collections::HashMap;

use axum::body::Body;
use axum::http::{header, HeaderName, HeaderValue, StatusCode};
use axum::response::Response;
use serde::Deserialize;

use crate::rules::{decode_entry, normalize_path, RouteTemplate};

/// Diagnostic header naming the template that matched.
pub const MATCHED_TEMPLATE_HEADER: &str = "x-hardcoded-response-template";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawHardcodedRule {
    // Mandatory; entries without a template are rejected at load time.
    template: Option<String>,
    #[serde(default = "default_method")]
    method: String,
    #[serde(default)]
    headers: HashMap<String, String>,
    #[serde(default)]
    body: Option<serde_json::Value>,
    #[serde(default)]
    content_type: Option<String>,
    #[serde(default = "default_status")]
    status_code: u16,
}

fn default_method() -> String {
    "all".to_string()
}

fn default_status() -> u16 {
    200
}

/// Validated hardcoded-response rule.
#[derive(Debug)]
pub struct HardcodedRule {
    template: RouteTemplate,
    method: String,
    headers: Vec<(HeaderName, HeaderValue)>,
    body: Vec<u8>,
    content_type: String,
    status: StatusCode,
}

impl HardcodedRule {
    fn from_raw(raw: RawHardcodedRule) -> Option<Self> {
        let Some(template) = raw.template else {
            tracing::warn!("Rejecting hardcoded rule without a template");
            return None;
        };
        let template = match RouteTemplate::compile(&template) {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!(template = %template, error = %e, "Rejecting hardcoded rule with bad template");
                return None;
            }
        };
        let Ok(status) = StatusCode::from_u16(raw.status_code) else {
            tracing::warn!(status = raw.status_code, "Rejecting hardcoded rule with bad status code");
            return None;
        };

        // Non-string bodies are JSON-encoded at load time.
        let (body, default_content_type) = match raw.body {
            None => (Vec::new(), "text/plain; charset=utf-8"),
            Some(serde_json::Value::String(s)) => {
                (s.into_bytes(), "text/plain; charset=utf-8")
            }
            Some(other) => (
                serde_json::to_vec(&other).unwrap_or_default(),
                "application/json",
            ),
        };

        let headers = raw
            .headers
            .into_iter()
            .filter_map(|(name, value)| {
                match (name.parse::<HeaderName>(), HeaderValue::from_str(&value)) {
                    (Ok(n), Ok(v)) => Some((n, v)),
                    _ => {
                        tracing::warn!(header = %name, "Dropping invalid header on hardcoded rule");
                        None
                    }
                }
            })
            .collect();

        Some(Self {
            template,
            method: raw.method.to_ascii_lowercase(),
            headers,
            body,
            content_type: raw
                .content_type
                .unwrap_or_else(|| default_content_type.to_string()),
            status,
        })
    }

    fn matches(&self, path: &str, method: &str) -> bool {
        self.template.matches(path)
            && (self.method == "all" || self.method.eq_ignore_ascii_case(method))
    }

    /// Build the authoritative response for this rule.
    pub fn respond(&self) -> Response {
        let mut builder = Response::builder()
            .status(self.status)
            .header(header::CONTENT_TYPE, self.content_type.clone())
            .header(header::CONTENT_LENGTH, self.body.len())
            .header(MATCHED_TEMPLATE_HEADER, self.template.raw());

        for (name, value) in &self.headers {
            builder = builder.header(name.clone(), value.clone());
        }

        builder
            .body(Body::from(self.body.clone()))
            .unwrap_or_else(|_| Response::new(Body::empty()))
    }

    pub fn template_raw(&self) -> &str {
        self.template.raw()
    }
}

/// Decode and validate a file's worth of entries. Malformed rules are
/// rejected here, never at match time.
pub fn build_hardcoded_rules(entries: Vec<serde_json::Value>) -> Vec<HardcodedRule> {
    entries
        .into_iter()
        .filter_map(|value| decode_entry::<RawHardcodedRule>(value, "hardcoded"))
        .filter_map(HardcodedRule::from_raw)
        .collect()
}

/// Rewrite the leading `/{service}/` path segment through the service
/// rewrite table, then return the normalized path.
pub fn rewrite_service_path(path: &str, services: &HashMap<String, String>) -> String {
    let normalized = normalize_path(path);
    if services.is_empty() {
        return normalized;
    }

    let mut segments = normalized[1..].splitn(2, '/');
    let Some(service) = segments.next() else {
        return normalized;
    };
    match services.get(service) {
        Some(renamed) => match segments.next() {
            Some(rest) => format!("/{renamed}/{rest}"),
            None => format!("/{renamed}"),
        },
        None => normalized,
    }
}

/// Select the first rule matching the request path and method.
pub fn select_rule<'a>(
    rules: &'a [HardcodedRule],
    services: &HashMap<String, String>,
    path: &str,
    method: &str,
) -> Option<&'a HardcodedRule> {
    if rules.is_empty() {
        return None;
    }
    let path = rewrite_service_path(path, services);
    rules.iter().find(|rule| rule.matches(&path, method))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rules(entries: serde_json::Value) -> Vec<HardcodedRule> {
        build_hardcoded_rules(entries.as_array().unwrap().clone())
    }

    #[test]
    fn template_is_mandatory() {
        let rules = rules(json!([
            { "body": "orphan" },
            { "template": "/ok" }
        ]));
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].template_raw(), "/ok");
    }

    #[test]
    fn method_defaults_to_all() {
        let rules = rules(json!([{ "template": "/x" }]));
        let services = HashMap::new();
        assert!(select_rule(&rules, &services, "/x", "GET").is_some());
        assert!(select_rule(&rules, &services, "/x", "DELETE").is_some());
    }

    #[test]
    fn method_match_is_case_insensitive() {
        let rules = rules(json!([{ "template": "/x", "method": "POST" }]));
        let services = HashMap::new();
        assert!(select_rule(&rules, &services, "/x", "post").is_some());
        assert!(select_rule(&rules, &services, "/x", "GET").is_none());
    }

    #[test]
    fn query_and_trailing_slash_are_ignored() {
        let rules = rules(json!([{ "template": "/health/check" }]));
        let services = HashMap::new();
        assert!(select_rule(&rules, &services, "/health/check/?deep=1", "GET").is_some());
    }

    #[test]
    fn string_body_is_verbatim_with_length() {
        let rules = rules(json!([
            { "template": "/t", "body": "pong", "statusCode": 418 }
        ]));
        let resp = rules[0].respond();
        assert_eq!(resp.status(), StatusCode::IM_A_TEAPOT);
        assert_eq!(resp.headers().get(header::CONTENT_LENGTH).unwrap(), "4");
        assert_eq!(
            resp.headers().get(MATCHED_TEMPLATE_HEADER).unwrap(),
            "/t"
        );
    }

    #[test]
    fn non_string_body_is_json_encoded() {
        let rules = rules(json!([
            { "template": "/t", "body": { "ok": true } }
        ]));
        let resp = rules[0].respond();
        assert_eq!(
            resp.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/json"
        );
        let expected = serde_json::to_vec(&json!({ "ok": true })).unwrap();
        assert_eq!(
            resp.headers().get(header::CONTENT_LENGTH).unwrap(),
            &expected.len().to_string()
        );
    }

    #[test]
    fn extra_headers_are_applied() {
        let rules = rules(json!([
            { "template": "/t", "headers": { "x-robots-tag": "noindex" } }
        ]));
        let resp = rules[0].respond();
        assert_eq!(resp.headers().get("x-robots-tag").unwrap(), "noindex");
    }

    #[test]
    fn service_rewrite_applies_to_first_segment() {
        let services: HashMap<String, String> =
            [("games".to_string(), "game-api".to_string())].into_iter().collect();

        assert_eq!(
            rewrite_service_path("/games/v1/list", &services),
            "/game-api/v1/list"
        );
        assert_eq!(rewrite_service_path("/games", &services), "/game-api");
        assert_eq!(rewrite_service_path("/users/v1", &services), "/users/v1");

        let rules = rules(json!([{ "template": "/game-api/*" }]));
        assert!(select_rule(&rules, &services, "/games/v1/list", "GET").is_some());
    }

    #[test]
    fn first_match_wins() {
        let rules = rules(json!([
            { "template": "/a/*", "body": "first" },
            { "template": "/a/b", "body": "second" }
        ]));
        let services = HashMap::new();
        let rule = select_rule(&rules, &services, "/a/b", "GET").unwrap();
        assert_eq!(rule.template_raw(), "/a/*");
    }
}
