use axum::{extract::State, Json};
use serde::Serialize;

use crate::admin::AdminState;

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub uptime_secs: u64,
}

#[derive(Serialize)]
pub struct RuleTableStatus {
    pub cors_rules: usize,
    pub hardcoded_rules: usize,
    pub service_rewrites: usize,
    pub watched_files: Vec<String>,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        uptime_secs: state.started.elapsed().as_secs(),
    })
}

pub async fn get_rules(State(state): State<AdminState>) -> Json<RuleTableStatus> {
    let snapshot = state.rules.snapshot();
    Json(RuleTableStatus {
        cors_rules: snapshot.cors.len(),
        hardcoded_rules: snapshot.hardcoded.len(),
        service_rewrites: snapshot.services.len(),
        watched_files: state
            .rules
            .watched_paths()
            .iter()
            .map(|p| p.display().to_string())
            .collect(),
    })
}
