//! Conversion session endpoints
//!
//! Every mutating call goes through the session actor and answers with the
//! resulting snapshot.

use axum::{
    extract::State,
    routing::{get, post, put},
    Json, Router,
};
use np_common::events::EngineStatus;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::info;

use crate::session::{ConversionParameters, ParameterEdit, Preset, SessionSnapshot};
use crate::{ApiError, ApiResult, AppState};

/// POST /session/file request
#[derive(Debug, Deserialize)]
pub struct SelectFileRequest {
    pub path: PathBuf,
}

/// POST /session/preset request
#[derive(Debug, Deserialize)]
pub struct PresetRequest {
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct PresetInfo {
    pub name: &'static str,
    pub parameters: ConversionParameters,
}

/// GET /session
pub async fn get_session(State(state): State<AppState>) -> ApiResult<Json<SessionSnapshot>> {
    Ok(Json(state.session.snapshot().await?))
}

/// POST /session/file
///
/// Starts a new session for the file. Refused until the engine is ready.
pub async fn select_file(
    State(state): State<AppState>,
    Json(request): Json<SelectFileRequest>,
) -> ApiResult<Json<SessionSnapshot>> {
    match state.engine_status() {
        EngineStatus::Idle => {}
        EngineStatus::Booting => {
            return Err(ApiError::Unavailable("Conversion engine is still starting".to_string()))
        }
        EngineStatus::Failed => {
            return Err(ApiError::Unavailable("Conversion engine is not available".to_string()))
        }
    }

    match tokio::fs::metadata(&request.path).await {
        Ok(meta) if meta.is_file() => {}
        Ok(_) => {
            return Err(ApiError::BadRequest(format!(
                "Not a file: {}",
                request.path.display()
            )))
        }
        Err(e) => {
            return Err(ApiError::BadRequest(format!(
                "Cannot open {}: {}",
                request.path.display(),
                e
            )))
        }
    }

    info!(path = %request.path.display(), "File selected via API");
    Ok(Json(state.session.select_file(request.path).await?))
}

/// PUT /session/parameters
pub async fn edit_parameters(
    State(state): State<AppState>,
    Json(edit): Json<ParameterEdit>,
) -> ApiResult<Json<SessionSnapshot>> {
    if edit.is_empty() {
        return Err(ApiError::BadRequest("No parameters given".to_string()));
    }
    Ok(Json(state.session.edit_parameters(edit).await?))
}

/// POST /session/preset
pub async fn apply_preset(
    State(state): State<AppState>,
    Json(request): Json<PresetRequest>,
) -> ApiResult<Json<SessionSnapshot>> {
    let preset: Preset = request.name.parse().map_err(ApiError::BadRequest)?;
    Ok(Json(state.session.apply_preset(preset).await?))
}

/// GET /session/presets
pub async fn list_presets() -> Json<Vec<PresetInfo>> {
    let base = ConversionParameters::default();
    Json(
        Preset::ALL
            .into_iter()
            .map(|preset| PresetInfo {
                name: preset.name(),
                parameters: base.apply(&preset.edit()),
            })
            .collect(),
    )
}

/// POST /session/reset
pub async fn reset_session(State(state): State<AppState>) -> ApiResult<Json<SessionSnapshot>> {
    Ok(Json(state.session.reset().await?))
}

/// Build session routes
pub fn session_routes() -> Router<AppState> {
    Router::new()
        .route("/session", get(get_session))
        .route("/session/file", post(select_file))
        .route("/session/parameters", put(edit_parameters))
        .route("/session/preset", post(apply_preset))
        .route("/session/presets", get(list_presets))
        .route("/session/reset", post(reset_session))
}
