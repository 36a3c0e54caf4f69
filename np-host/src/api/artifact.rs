//! Artifact export and host-bridge endpoints

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::output::{content_disposition, DownloadSource, ExportError, ARTIFACT_CONTENT_TYPE};
use crate::{ApiError, ApiResult, AppState};

#[derive(Debug, Serialize)]
pub struct ExportResponse {
    pub path: PathBuf,
}

/// POST /session/artifact/save request
#[derive(Debug, Deserialize)]
pub struct SaveRequest {
    pub directory: PathBuf,
}

/// POST /log request
#[derive(Debug, Deserialize)]
pub struct LogRequest {
    pub message: String,
}

/// GET /session/artifact
///
/// Redirects to the engine's static URL when there is one, otherwise serves
/// the in-memory blob as an attachment.
pub async fn download_artifact(State(state): State<AppState>) -> ApiResult<Response> {
    let artifact = state.session.artifact().ok_or(ExportError::NoArtifact)?;
    let link = state.output.download(&artifact);

    let response = match link.source {
        DownloadSource::StaticUrl(url) => Redirect::temporary(&url).into_response(),
        DownloadSource::Blob(blob) => (
            [
                (header::CONTENT_TYPE, ARTIFACT_CONTENT_TYPE.to_string()),
                (header::CONTENT_DISPOSITION, content_disposition(&link.filename)),
            ],
            blob,
        )
            .into_response(),
    };
    Ok(response)
}

/// POST /session/artifact/drag
pub async fn drag_artifact(State(state): State<AppState>) -> ApiResult<Json<ExportResponse>> {
    let artifact = state.session.artifact().ok_or(ExportError::NoArtifact)?;
    let path = state.output.start_drag(&artifact)?;
    Ok(Json(ExportResponse { path }))
}

/// POST /session/artifact/save
pub async fn save_artifact(
    State(state): State<AppState>,
    Json(request): Json<SaveRequest>,
) -> ApiResult<Json<ExportResponse>> {
    let artifact = state.session.artifact().ok_or(ExportError::NoArtifact)?;
    let path = state.output.save_to(&artifact, &request.directory).await?;
    Ok(Json(ExportResponse { path }))
}

/// POST /log
///
/// Appends a UI message to the durable diagnostic log.
pub async fn append_log(
    State(state): State<AppState>,
    Json(request): Json<LogRequest>,
) -> ApiResult<StatusCode> {
    if request.message.trim().is_empty() {
        return Err(ApiError::BadRequest("Empty log message".to_string()));
    }
    state.output.host().log(&request.message);
    Ok(StatusCode::NO_CONTENT)
}

/// Build artifact routes
pub fn artifact_routes() -> Router<AppState> {
    Router::new()
        .route("/session/artifact", get(download_artifact))
        .route("/session/artifact/drag", post(drag_artifact))
        .route("/session/artifact/save", post(save_artifact))
        .route("/log", post(append_log))
}
