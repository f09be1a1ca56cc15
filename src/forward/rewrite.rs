//! Upstream response header rewriting.
//!
//! The downstream client talks to the test-site hostname; the upstream
//! only knows its production name. Redirect locations and cookie
//! domains coming back from the upstream are rewritten so the exchange
//! stays consistent from the downstream's point of view.

use axum::http::header::{self, HeaderName, HeaderValue};
use axum::http::HeaderMap;

/// Hop-by-hop headers that must not be relayed in either direction.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

/// Server-identity headers stripped from upstream responses.
const IDENTITY_HEADERS: &[&str] = &["server", "date", "x-powered-by"];

pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP.iter().any(|h| name.eq_ignore_ascii_case(h))
}

/// Strip hop-by-hop and server-identity headers from an upstream
/// response.
pub fn strip_response_headers(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP.iter().chain(IDENTITY_HEADERS) {
        while headers.remove(*name).is_some() {}
    }
}

/// Strip the upstream's CORS headers so the rule engine's staged ones
/// stay authoritative.
pub fn strip_cors_headers(headers: &mut HeaderMap) {
    let cors: Vec<HeaderName> = headers
        .keys()
        .filter(|name| name.as_str().starts_with("access-control-"))
        .cloned()
        .collect();
    for name in cors {
        while headers.remove(&name).is_some() {}
    }
}

/// Rewrite a `Location` header whose authority equals the upstream
/// hostname back to the original downstream host.
pub fn rewrite_location(headers: &mut HeaderMap, upstream_host: &str, downstream_host: &str) {
    let Some(location) = headers
        .get(header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
    else {
        return;
    };

    let Some((scheme, rest)) = location.split_once("://") else {
        return;
    };
    let authority_end = rest
        .find(|c| c == '/' || c == '?' || c == '#')
        .unwrap_or(rest.len());
    let (authority, remainder) = rest.split_at(authority_end);

    if authority.eq_ignore_ascii_case(upstream_host) {
        let rewritten = format!("{scheme}://{downstream_host}{remainder}");
        if let Ok(value) = HeaderValue::from_str(&rewritten) {
            headers.insert(header::LOCATION, value);
        }
    }
}

/// The base domain is the last two labels ("apis.roblox.com" →
/// "roblox.com").
pub fn base_domain(host: &str) -> Option<&str> {
    let trimmed = host.trim_start_matches('.');
    let mut labels = trimmed.rsplitn(3, '.');
    let tld = labels.next()?;
    let second = labels.next()?;
    let offset = trimmed.len() - tld.len() - second.len() - 1;
    Some(&trimmed[offset..])
}

/// Rewrite `Set-Cookie` Domain attributes whose base domain equals the
/// upstream's base domain to the downstream's base domain, leaving
/// leading-dot semantics intact.
pub fn rewrite_cookie_domains(
    headers: &mut HeaderMap,
    upstream_host: &str,
    downstream_host: &str,
) {
    let (Some(upstream_base), Some(downstream_base)) =
        (base_domain(upstream_host), base_domain(downstream_host))
    else {
        return;
    };

    let rewritten: Vec<HeaderValue> = headers
        .get_all(header::SET_COOKIE)
        .iter()
        .map(|value| {
            let Ok(cookie) = value.to_str() else {
                return value.clone();
            };
            match rewrite_cookie(cookie, upstream_base, downstream_base) {
                Some(updated) => {
                    HeaderValue::from_str(&updated).unwrap_or_else(|_| value.clone())
                }
                None => value.clone(),
            }
        })
        .collect();

    headers.remove(header::SET_COOKIE);
    for value in rewritten {
        headers.append(header::SET_COOKIE, value);
    }
}

fn rewrite_cookie(cookie: &str, upstream_base: &str, downstream_base: &str) -> Option<String> {
    let mut changed = false;
    let parts: Vec<String> = cookie
        .split(';')
        .map(|part| {
            let trimmed = part.trim_start();
            let leading = &part[..part.len() - trimmed.len()];
            let Some((attr, value)) = trimmed.split_once('=') else {
                return part.to_string();
            };
            if !attr.eq_ignore_ascii_case("domain") {
                return part.to_string();
            }
            let dot = if value.starts_with('.') { "." } else { "" };
            match base_domain(value) {
                Some(base) if base.eq_ignore_ascii_case(upstream_base) => {
                    changed = true;
                    format!("{leading}{attr}={dot}{downstream_base}")
                }
                _ => part.to_string(),
            }
        })
        .collect();

    changed.then(|| parts.join(";"))
}
