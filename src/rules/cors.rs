//! CORS rule engine.
//!
//! Loads declarative CORS rules, normalizes their match keys at load
//! time, and stages response headers for matched requests. At most one
//! rule applies per request; the first match in load order wins.

use axum::http::header::{self, HeaderName, HeaderValue};
use axum::http::HeaderMap;
use regex::Regex;
use serde::Deserialize;

use crate::rules::{decode_entry, normalize_path, normalize_scheme, RouteTemplate};

/// Rule entry as it appears in the file.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawCorsRule {
    route_template: String,
    hostname: String,
    method: String,
    scheme: String,
    allowed_origins: Vec<String>,
    allowed_headers: Vec<String>,
    allowed_methods: Vec<String>,
    exposed_headers: Vec<String>,
    max_age: Option<u64>,
    allow_credentials: bool,
    allow_request_origin_if_no_allowed_origins: bool,
    allow_response_headers_overwrite: bool,
}

impl Default for RawCorsRule {
    fn default() -> Self {
        Self {
            route_template: "*".to_string(),
            hostname: "*".to_string(),
            method: "*".to_string(),
            scheme: "*".to_string(),
            allowed_origins: Vec::new(),
            allowed_headers: Vec::new(),
            allowed_methods: Vec::new(),
            exposed_headers: Vec::new(),
            max_age: None,
            allow_credentials: false,
            allow_request_origin_if_no_allowed_origins: false,
            allow_response_headers_overwrite: true,
        }
    }
}

/// One allowed-origin entry: `*` is match-any; other entries compile
/// to anchored patterns, falling back to literal comparison.
#[derive(Debug, Clone)]
enum OriginMatcher {
    Literal(String),
    Pattern(Regex),
}

impl OriginMatcher {
    fn compile(raw: &str) -> Self {
        match Regex::new(&format!("^(?:{raw})$")) {
            Ok(regex) => OriginMatcher::Pattern(regex),
            Err(_) => OriginMatcher::Literal(raw.to_string()),
        }
    }

    fn matches(&self, origin: &str) -> bool {
        match self {
            OriginMatcher::Literal(s) => s.eq_ignore_ascii_case(origin),
            OriginMatcher::Pattern(r) => r.is_match(origin),
        }
    }
}

#[derive(Debug, Clone)]
enum AllowedOrigins {
    Any,
    List(Vec<OriginMatcher>),
}

/// Validated, normalized CORS rule.
#[derive(Debug)]
pub struct CorsRule {
    template: RouteTemplate,
    hostname: String,
    method: String,
    scheme: String,
    origins: AllowedOrigins,
    allowed_headers: Vec<String>,
    allowed_methods: Vec<String>,
    exposed_headers: Vec<String>,
    max_age: Option<u64>,
    allow_credentials: bool,
    allow_request_origin_if_no_allowed_origins: bool,
    allow_response_headers_overwrite: bool,
}

impl CorsRule {
    fn from_raw(raw: RawCorsRule) -> Option<Self> {
        let template = match RouteTemplate::compile(&raw.route_template) {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!(template = %raw.route_template, error = %e, "Dropping CORS rule with bad route template");
                return None;
            }
        };

        let origins = if raw.allowed_origins.iter().any(|o| o == "*") {
            AllowedOrigins::Any
        } else {
            AllowedOrigins::List(
                raw.allowed_origins
                    .iter()
                    .map(|o| OriginMatcher::compile(o))
                    .collect(),
            )
        };

        Some(Self {
            template,
            hostname: raw.hostname.to_ascii_lowercase(),
            method: raw.method.to_ascii_uppercase(),
            scheme: normalize_scheme(&raw.scheme),
            origins,
            allowed_headers: raw.allowed_headers,
            allowed_methods: raw.allowed_methods,
            exposed_headers: raw.exposed_headers,
            max_age: raw.max_age,
            allow_credentials: raw.allow_credentials,
            allow_request_origin_if_no_allowed_origins: raw
                .allow_request_origin_if_no_allowed_origins,
            allow_response_headers_overwrite: raw.allow_response_headers_overwrite,
        })
    }

    fn dedupe_key(&self) -> (String, String, String, String) {
        (
            self.template.raw().to_string(),
            self.hostname.clone(),
            self.method.clone(),
            self.scheme.clone(),
        )
    }

    fn matches(&self, path: &str, hostname: &str, method: &str, scheme: &str) -> bool {
        self.template.matches(path)
            && (self.hostname == "*" || self.hostname.eq_ignore_ascii_case(hostname))
            && (self.method == "*" || self.method.eq_ignore_ascii_case(method))
            && (self.scheme == "*" || self.scheme.eq_ignore_ascii_case(scheme))
    }

    fn origin_allowed(&self, origin: &str) -> bool {
        match &self.origins {
            AllowedOrigins::Any => true,
            AllowedOrigins::List(list) => list.iter().any(|m| m.matches(origin)),
        }
    }

    fn has_allowed_origins(&self) -> bool {
        match &self.origins {
            AllowedOrigins::Any => true,
            AllowedOrigins::List(list) => !list.is_empty(),
        }
    }

    /// Whether the upstream response may later overwrite the staged
    /// CORS headers.
    pub fn allow_response_headers_overwrite(&self) -> bool {
        self.allow_response_headers_overwrite
    }

    /// Stage CORS headers for this rule. Returns false if the request
    /// origin did not qualify and no fallback applied.
    pub fn apply(
        &self,
        origin: Option<&str>,
        always_apply: bool,
        headers: &mut HeaderMap,
    ) -> bool {
        let allow_origin = match &self.origins {
            AllowedOrigins::Any => Some("*".to_string()),
            AllowedOrigins::List(_) => match origin {
                Some(o)
                    if self.origin_allowed(o)
                        || (!self.has_allowed_origins()
                            && self.allow_request_origin_if_no_allowed_origins)
                        || always_apply =>
                {
                    Some(o.to_string())
                }
                _ => None,
            },
        };

        let Some(allow_origin) = allow_origin else {
            return false;
        };

        if allow_origin != "*" {
            headers.append(header::VARY, HeaderValue::from_static("Origin"));
        }
        insert(headers, header::ACCESS_CONTROL_ALLOW_ORIGIN, &allow_origin);

        if !self.allowed_headers.is_empty() {
            insert(
                headers,
                header::ACCESS_CONTROL_ALLOW_HEADERS,
                &self.allowed_headers.join(", "),
            );
        }
        if !self.allowed_methods.is_empty() {
            insert(
                headers,
                header::ACCESS_CONTROL_ALLOW_METHODS,
                &self.allowed_methods.join(", "),
            );
        }
        if !self.exposed_headers.is_empty() {
            insert(
                headers,
                header::ACCESS_CONTROL_EXPOSE_HEADERS,
                &self.exposed_headers.join(", "),
            );
        }
        if let Some(max_age) = self.max_age {
            insert(headers, header::ACCESS_CONTROL_MAX_AGE, &max_age.to_string());
        }
        if self.allow_credentials {
            insert(headers, header::ACCESS_CONTROL_ALLOW_CREDENTIALS, "true");
        }
        true
    }
}

fn insert(headers: &mut HeaderMap, name: HeaderName, value: &str) {
    if let Ok(v) = HeaderValue::from_str(value) {
        headers.insert(name, v);
    }
}

/// Decode, validate, and dedupe a file's worth of entries. Invalid
/// entries are dropped; duplicates (identical route+hostname+method+
/// scheme) keep the first occurrence.
pub fn build_cors_rules(entries: Vec<serde_json::Value>) -> Vec<CorsRule> {
    let mut seen = std::collections::HashSet::new();
    entries
        .into_iter()
        .filter_map(|value| decode_entry::<RawCorsRule>(value, "cors"))
        .filter_map(CorsRule::from_raw)
        .filter(|rule| {
            if seen.insert(rule.dedupe_key()) {
                true
            } else {
                tracing::warn!(template = %rule.template.raw(), "Collapsing duplicate CORS rule");
                false
            }
        })
        .collect()
}

/// Select the first rule matching the request. Path is normalized
/// here; match keys were normalized at load time.
pub fn select_rule<'a>(
    rules: &'a [CorsRule],
    path: &str,
    hostname: &str,
    method: &str,
    scheme: &str,
) -> Option<&'a CorsRule> {
    let path = normalize_path(path);
    let scheme = normalize_scheme(scheme);
    rules
        .iter()
        .find(|rule| rule.matches(&path, hostname, method, &scheme))
}
