//! reqwest client for the local inference engine
//!
//! Endpoints:
//! - `GET  {base}/health` → `{"status": "ok", "version": "..."}`
//! - `POST {base}/predict` (multipart) → MIDI bytes plus `X-*` headers
//!
//! The client has no overall request timeout of its own for `/predict`; the
//! session controller owns the conversion deadline and cancels through the
//! token. Health checks carry a short per-request timeout.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::HeaderMap;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Url};
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{EngineApi, EngineError, HealthReport, PredictRequest};
use crate::output::ArtifactReference;
use crate::session::SelectedFile;

/// Connect timeout for every engine call
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Per-check timeout for `/health`
const HEALTH_TIMEOUT: Duration = Duration::from_secs(2);

/// Raw (non-JSON) error bodies are cut to this many characters
pub const RAW_ERROR_LIMIT: usize = 200;

pub const DETECTED_BPM_HEADER: &str = "x-detected-bpm";
pub const BPM_ERROR_HEADER: &str = "x-bpm-error";
pub const GENERATED_FILENAME_HEADER: &str = "x-generated-filename";
pub const ABSOLUTE_PATH_HEADER: &str = "x-absolute-path";

/// HTTP client for the engine
pub struct EngineClient {
    http: Client,
    base_url: String,
    static_base_url: Option<String>,
}

impl EngineClient {
    /// Create a client for `base_url` (e.g. `http://127.0.0.1:8000`)
    ///
    /// `static_base_url` is the secondary server that serves generated files
    /// under `/outputs/{filename}`.
    pub fn new(
        base_url: impl Into<String>,
        static_base_url: Option<String>,
    ) -> Result<Self, EngineError> {
        let http = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| EngineError::Client(e.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            static_base_url,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn send_predict(&self, request: &PredictRequest) -> Result<ArtifactReference, EngineError> {
        let file = &request.file;
        let audio = tokio::fs::read(&file.path)
            .await
            .map_err(|source| EngineError::InputFile {
                path: file.path.clone(),
                source,
            })?;

        let params = &request.parameters;
        let form = Form::new()
            .part("file", Part::bytes(audio).file_name(file.name.clone()))
            .text("onset_threshold", params.onset_threshold.to_string())
            .text("frame_threshold", params.frame_threshold.to_string())
            .text("min_note_length", params.min_note_length_ms.to_string())
            .text("midi_tempo", params.tempo_field().to_string());

        debug!(
            request_id = %request.request_id,
            file = %file.name,
            onset = params.onset_threshold,
            frame = params.frame_threshold,
            min_note_ms = params.min_note_length_ms,
            tempo = params.tempo_field(),
            "Sending predict request"
        );

        let response = self
            .http
            .post(format!("{}/predict", self.base_url))
            .multipart(form)
            .send()
            .await
            .map_err(|e| transport_error(e, None))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EngineError::Rejected {
                status: status.as_u16(),
                message: extract_error_message(&body),
            });
        }

        let headers = ArtifactHeaders::from_headers(response.headers());
        let blob = response
            .bytes()
            .await
            .map_err(|e| transport_error(e, None))?;

        debug!(
            request_id = %request.request_id,
            bytes = blob.len(),
            filename = ?headers.generated_filename,
            detected_bpm = ?headers.detected_bpm,
            "Predict response received"
        );

        Ok(self.build_artifact(file, headers, blob))
    }

    fn build_artifact(&self, file: &SelectedFile, headers: ArtifactHeaders, blob: Bytes) -> ArtifactReference {
        let static_url = match (&self.static_base_url, &headers.generated_filename) {
            (Some(base), Some(name)) => static_url_for(base, name),
            _ => None,
        };
        let filename = headers
            .generated_filename
            .unwrap_or_else(|| fallback_filename(&file.name));

        ArtifactReference {
            filename,
            absolute_path: headers.absolute_path,
            static_url,
            size_bytes: blob.len(),
            blob,
            detected_bpm: headers.detected_bpm,
            bpm_warning: headers.bpm_error,
        }
    }
}

#[async_trait]
impl EngineApi for EngineClient {
    async fn health(&self) -> Result<HealthReport, EngineError> {
        let response = self
            .http
            .get(format!("{}/health", self.base_url))
            .timeout(HEALTH_TIMEOUT)
            .send()
            .await
            .map_err(|e| transport_error(e, Some(HEALTH_TIMEOUT)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EngineError::Rejected {
                status: status.as_u16(),
                message: extract_error_message(&body),
            });
        }

        response
            .json::<HealthReport>()
            .await
            .map_err(|e| EngineError::Malformed(format!("health body: {}", e)))
    }

    async fn predict(
        &self,
        request: &PredictRequest,
        cancel: CancellationToken,
    ) -> Result<ArtifactReference, EngineError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(request_id = %request.request_id, "Predict request cancelled");
                Err(EngineError::Cancelled)
            }
            result = self.send_predict(request) => result,
        }
    }
}

/// Optional `X-*` response headers on a successful prediction
#[derive(Debug, Default, PartialEq)]
struct ArtifactHeaders {
    generated_filename: Option<String>,
    absolute_path: Option<PathBuf>,
    detected_bpm: Option<f64>,
    bpm_error: Option<String>,
}

impl ArtifactHeaders {
    fn from_headers(headers: &HeaderMap) -> Self {
        Self {
            generated_filename: header_text(headers, GENERATED_FILENAME_HEADER),
            absolute_path: header_text(headers, ABSOLUTE_PATH_HEADER).map(PathBuf::from),
            detected_bpm: header_text(headers, DETECTED_BPM_HEADER)
                .and_then(|v| v.parse::<f64>().ok())
                .filter(|bpm| bpm.is_finite() && *bpm > 0.0),
            bpm_error: header_text(headers, BPM_ERROR_HEADER),
        }
    }
}

fn header_text(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Map a reqwest failure; `request_timeout` is the per-request limit, if any
fn transport_error(e: reqwest::Error, request_timeout: Option<Duration>) -> EngineError {
    classify_transport(e.is_connect(), e.is_timeout(), request_timeout, e.to_string())
}

fn classify_transport(
    connect: bool,
    timed_out: bool,
    request_timeout: Option<Duration>,
    message: String,
) -> EngineError {
    match (connect, timed_out, request_timeout) {
        // Includes CONNECT_TIMEOUT tripping: the engine never answered
        (true, _, _) => EngineError::Unreachable(message),
        (false, true, Some(limit)) => EngineError::Timeout(limit),
        // Without a per-request limit only the connect timeout can fire
        (false, true, None) => EngineError::Unreachable(message),
        (false, false, _) => EngineError::Network(message),
    }
}

/// `{base}/outputs/{filename}` with the filename percent-encoded
fn static_url_for(base: &str, filename: &str) -> Option<String> {
    let mut url = Url::parse(base).ok()?;
    url.path_segments_mut()
        .ok()?
        .pop_if_empty()
        .push("outputs")
        .push(filename);
    Some(url.to_string())
}

/// `song.wav` → `song.mid`
fn fallback_filename(source_name: &str) -> String {
    let stem = std::path::Path::new(source_name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "output".to_string());
    format!("{}.mid", stem)
}

/// User-facing message from a failed engine response body
///
/// Looks for a structured `detail`, `error` or `message` field (including the
/// list-of-`msg` validation shape); otherwise returns the first
/// [`RAW_ERROR_LIMIT`] characters of the raw body.
pub fn extract_error_message(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<Value>(body) {
        if let Some(message) = structured_message(&value) {
            return message;
        }
    }
    body.trim().chars().take(RAW_ERROR_LIMIT).collect()
}

fn structured_message(value: &Value) -> Option<String> {
    for key in ["detail", "error", "message"] {
        match value.get(key) {
            Some(Value::String(s)) if !s.is_empty() => return Some(s.clone()),
            Some(Value::Array(items)) => {
                let messages: Vec<&str> = items
                    .iter()
                    .filter_map(|item| item.get("msg").and_then(Value::as_str))
                    .collect();
                if !messages.is_empty() {
                    return Some(messages.join("; "));
                }
            }
            Some(Value::Object(inner)) => {
                if let Some(s) = inner.get("message").and_then(Value::as_str) {
                    return Some(s.to_string());
                }
            }
            _ => {}
        }
    }
    None
}
