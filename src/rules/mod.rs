//! Declarative rule engines (CORS and hardcoded responses).
//!
//! # Data Flow
//! ```text
//! rule file (JSON/YAML)
//!     → parse into raw entries (invalid entries dropped, not fatal)
//!     → normalize match keys (method uppercased, scheme port-stripped)
//!     → compile route templates
//!     → RuleSet snapshot (immutable for one reload cycle)
//!     → store.rs swaps snapshots atomically
//! ```
//!
//! # Design Decisions
//! - Rules are strongly typed after a dedicated parse-and-validate
//!   step; nothing is rejected at match time
//! - First match wins; rule order is file order
//! - Query strings and trailing slashes are ignored for matching

pub mod cors;
pub mod hardcoded;
pub mod store;

use std::path::Path;

use regex::Regex;
use serde::de::DeserializeOwned;
use thiserror::Error;

/// Pattern over the URL path. `*` matches any remaining segments and
/// `:name`/`{name}` match exactly one segment.
#[derive(Debug, Clone)]
pub struct RouteTemplate {
    raw: String,
    regex: Option<Regex>,
}

impl RouteTemplate {
    pub fn compile(raw: &str) -> Result<Self, regex::Error> {
        if raw.is_empty() || raw == "*" {
            return Ok(Self {
                raw: "*".to_string(),
                regex: None,
            });
        }

        let normalized = normalize_path(raw);
        let mut pattern = String::from("^");
        for (i, segment) in normalized.split('/').enumerate() {
            if i > 0 {
                pattern.push('/');
            }
            if segment == "*" {
                pattern.push_str(".*");
            } else if segment.starts_with(':')
                || (segment.starts_with('{') && segment.ends_with('}'))
            {
                pattern.push_str("[^/]+");
            } else {
                pattern.push_str(&regex::escape(segment));
            }
        }
        pattern.push('$');

        Ok(Self {
            raw: raw.to_string(),
            regex: Some(Regex::new(&pattern)?),
        })
    }

    /// Match an already-normalized path.
    pub fn matches(&self, path: &str) -> bool {
        match &self.regex {
            None => true,
            Some(regex) => regex.is_match(path),
        }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }
}

/// Strip the query string and any trailing slash; guarantee a leading
/// slash.
pub fn normalize_path(path: &str) -> String {
    let path = path.split(['?', '#']).next().unwrap_or(path);
    let path = path.trim_end_matches('/');
    if path.is_empty() {
        "/".to_string()
    } else if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}

/// Normalize a scheme match key: lowercase, any `:port` suffix
/// stripped.
pub fn normalize_scheme(scheme: &str) -> String {
    scheme
        .split(':')
        .next()
        .unwrap_or(scheme)
        .to_ascii_lowercase()
}

/// Errors reading a rule file. Per-entry problems are not errors; bad
/// entries are dropped during validation.
#[derive(Debug, Error)]
pub enum RuleFileError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {detail}")]
    Parse { path: String, detail: String },
}

/// Parse a JSON or YAML rule file into loose entries, decided by
/// extension (`.yaml`/`.yml` vs everything else).
pub fn read_rule_entries(path: &Path) -> Result<Vec<serde_json::Value>, RuleFileError> {
    let text = std::fs::read_to_string(path).map_err(|source| RuleFileError::Io {
        path: path.display().to_string(),
        source,
    })?;

    let is_yaml = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    );

    if is_yaml {
        serde_yaml::from_str(&text).map_err(|e| RuleFileError::Parse {
            path: path.display().to_string(),
            detail: e.to_string(),
        })
    } else {
        serde_json::from_str(&text).map_err(|e| RuleFileError::Parse {
            path: path.display().to_string(),
            detail: e.to_string(),
        })
    }
}

/// Read a plain string-to-string map file (JSON or YAML).
pub fn read_string_map(
    path: &Path,
) -> Result<std::collections::HashMap<String, String>, RuleFileError> {
    let text = std::fs::read_to_string(path).map_err(|source| RuleFileError::Io {
        path: path.display().to_string(),
        source,
    })?;

    let is_yaml = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    );

    if is_yaml {
        serde_yaml::from_str(&text).map_err(|e| RuleFileError::Parse {
            path: path.display().to_string(),
            detail: e.to_string(),
        })
    } else {
        serde_json::from_str(&text).map_err(|e| RuleFileError::Parse {
            path: path.display().to_string(),
            detail: e.to_string(),
        })
    }
}

/// Decode one loose entry into a typed rule, or drop it.
pub fn decode_entry<T: DeserializeOwned>(value: serde_json::Value, kind: &str) -> Option<T> {
    match serde_json::from_value(value) {
        Ok(entry) => Some(entry),
        Err(e) => {
            tracing::warn!(kind = %kind, error = %e, "Dropping malformed rule entry");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_template_matches_everything() {
        let t = RouteTemplate::compile("*").unwrap();
        assert!(t.matches("/"));
        assert!(t.matches("/anything/at/all"));
    }

    #[test]
    fn literal_template_matches_exact_path() {
        let t = RouteTemplate::compile("/v1/games").unwrap();
        assert!(t.matches("/v1/games"));
        assert!(!t.matches("/v1/games/123"));
        assert!(!t.matches("/v2/games"));
    }

    #[test]
    fn parameter_segments_match_one_segment() {
        let t = RouteTemplate::compile("/users/:id/profile").unwrap();
        assert!(t.matches("/users/42/profile"));
        assert!(!t.matches("/users/42/abc/profile"));

        let braced = RouteTemplate::compile("/users/{id}").unwrap();
        assert!(braced.matches("/users/42"));
    }

    #[test]
    fn trailing_star_matches_rest() {
        let t = RouteTemplate::compile("/docs/*").unwrap();
        assert!(t.matches("/docs/a"));
        assert!(t.matches("/docs/a/b/c"));
        assert!(!t.matches("/api/a"));
    }

    #[test]
    fn normalize_strips_query_and_trailing_slash() {
        assert_eq!(normalize_path("/a/b/?q=1"), "/a/b");
        assert_eq!(normalize_path("/a/b/"), "/a/b");
        assert_eq!(normalize_path("/"), "/");
        assert_eq!(normalize_path(""), "/");
    }

    #[test]
    fn normalize_scheme_strips_port_suffix() {
        assert_eq!(normalize_scheme("https:443"), "https");
        assert_eq!(normalize_scheme("HTTP"), "http");
        assert_eq!(normalize_scheme("https"), "https");
    }
}
