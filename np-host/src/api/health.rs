//! Health check endpoint

use axum::{extract::State, routing::get, Json, Router};
use chrono::Utc;
use np_common::events::EngineStatus;
use serde::Serialize;

use crate::AppState;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// "ok" once the engine is ready, "starting" while it boots, "degraded" if it failed
    pub status: String,
    /// Module name ("np-host")
    pub module: String,
    /// Crate version from Cargo.toml
    pub version: String,
    /// Seconds since the host started
    pub uptime_seconds: u64,
    pub engine: EngineHealth,
    pub build: BuildInfo,
}

#[derive(Debug, Serialize)]
pub struct EngineHealth {
    pub status: EngineStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BuildInfo {
    pub git_hash: &'static str,
    pub timestamp: &'static str,
    pub profile: &'static str,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime = Utc::now().signed_duration_since(state.startup_time);
    let uptime_seconds = uptime.num_seconds().max(0) as u64;

    let readiness = state.engine.borrow().clone();
    let status = match readiness.status {
        EngineStatus::Idle => "ok",
        EngineStatus::Booting => "starting",
        EngineStatus::Failed => "degraded",
    };

    Json(HealthResponse {
        status: status.to_string(),
        module: "np-host".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds,
        engine: EngineHealth {
            status: readiness.status,
            detail: readiness.detail,
        },
        build: BuildInfo {
            git_hash: env!("GIT_HASH"),
            timestamp: env!("BUILD_TIMESTAMP"),
            profile: env!("BUILD_PROFILE"),
        },
    })
}

/// Build health check routes
pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
