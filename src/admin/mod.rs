//! Informational admin endpoints.
//!
//! Served on a separate listener so proxy traffic and operator traffic
//! never share a port. Read-only: rule edits happen on disk and arrive
//! through the reload path.

pub mod auth;
pub mod handlers;

use std::sync::Arc;
use std::time::Instant;

use axum::{middleware, routing::get, Router};

use crate::config::AdminConfig;
use crate::rules::store::RuleStore;

use self::auth::admin_auth_middleware;
use self::handlers::{get_rules, get_status};

/// State shared by the admin handlers.
#[derive(Clone)]
pub struct AdminState {
    pub rules: Arc<RuleStore>,
    pub started: Instant,
    pub api_key: Option<Arc<str>>,
}

pub fn setup_admin_router(config: &AdminConfig, rules: Arc<RuleStore>) -> Router {
    let state = AdminState {
        rules,
        started: Instant::now(),
        api_key: config.api_key.as_deref().map(Arc::from),
    };

    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/rules", get(get_rules))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            admin_auth_middleware,
        ))
        .with_state(state)
}
