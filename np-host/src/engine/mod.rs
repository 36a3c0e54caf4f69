//! Inference engine HTTP interface
//!
//! The engine is a separate local process exposing `GET /health` and
//! `POST /predict`. [`EngineApi`] is the seam the readiness poller and the
//! session controller talk through; [`EngineClient`] is the reqwest-backed
//! implementation.

pub mod client;

pub use client::{extract_error_message, EngineClient};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::output::ArtifactReference;
use crate::session::{ConversionParameters, RequestId, SelectedFile};

/// Body of `GET /health`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: String,
    #[serde(default)]
    pub version: Option<String>,
}

impl HealthReport {
    /// Only an explicit `"ok"` counts as ready
    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

/// One conversion request
#[derive(Debug, Clone)]
pub struct PredictRequest {
    pub request_id: RequestId,
    pub file: SelectedFile,
    pub parameters: ConversionParameters,
}

/// Engine call errors
#[derive(Debug, Error)]
pub enum EngineError {
    /// Engine answered with a non-2xx status
    #[error("Conversion failed (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },

    /// Request exceeded its deadline
    #[error("Engine did not respond within {0:?}")]
    Timeout(Duration),

    /// Connection refused or reset
    #[error("Engine unreachable: {0}")]
    Unreachable(String),

    /// Any other transport failure
    #[error("Network error: {0}")]
    Network(String),

    /// Cancellation token fired before the response arrived
    #[error("Request cancelled")]
    Cancelled,

    /// The selected audio file could not be read
    #[error("Could not read input file {path}: {source}")]
    InputFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// 2xx response that could not be decoded
    #[error("Malformed engine response: {0}")]
    Malformed(String),

    /// HTTP client could not be constructed
    #[error("HTTP client error: {0}")]
    Client(String),
}

impl EngineError {
    /// Message shown in the session's error state
    pub fn user_message(&self) -> String {
        match self {
            EngineError::Rejected { status, message } => {
                if message.is_empty() {
                    format!("Conversion failed (engine returned HTTP {}).", status)
                } else {
                    message.clone()
                }
            }
            EngineError::Timeout(limit) => format!(
                "Conversion timed out after {} seconds. The engine may be overloaded; try again or use a shorter file.",
                limit.as_secs()
            ),
            EngineError::Unreachable(_) | EngineError::Network(_) => {
                "Could not reach the conversion engine. It may have stopped; restart the application if this persists."
                    .to_string()
            }
            EngineError::Cancelled => "Conversion was cancelled.".to_string(),
            EngineError::InputFile { path, source } => {
                format!("Could not read {}: {}", path.display(), source)
            }
            EngineError::Malformed(detail) | EngineError::Client(detail) => {
                format!("Unexpected response from the conversion engine: {}", detail)
            }
        }
    }

    /// True for deadline and connectivity failures
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            EngineError::Timeout(_) | EngineError::Unreachable(_) | EngineError::Network(_)
        )
    }
}

/// Operations the host needs from the engine
#[async_trait]
pub trait EngineApi: Send + Sync + 'static {
    /// Probe `GET /health`
    async fn health(&self) -> Result<HealthReport, EngineError>;

    /// Run `POST /predict`; abandons the request when `cancel` fires
    async fn predict(
        &self,
        request: &PredictRequest,
        cancel: CancellationToken,
    ) -> Result<ArtifactReference, EngineError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_requires_literal_ok() {
        let ok: HealthReport = serde_json::from_str(r#"{"status":"ok","version":"1.2.0"}"#).unwrap();
        assert!(ok.is_ok());
        assert_eq!(ok.version.as_deref(), Some("1.2.0"));

        let loading: HealthReport = serde_json::from_str(r#"{"status":"loading"}"#).unwrap();
        assert!(!loading.is_ok());
    }

    #[test]
    fn test_timeout_message_is_distinct() {
        let timeout = EngineError::Timeout(Duration::from_secs(60)).user_message();
        let offline = EngineError::Unreachable("refused".into()).user_message();
        assert!(timeout.contains("timed out after 60 seconds"));
        assert!(offline.contains("Could not reach"));
        assert_ne!(timeout, offline);
    }

    #[test]
    fn test_rejected_message_is_verbatim() {
        let err = EngineError::Rejected {
            status: 500,
            message: "Prediction failed: bad audio".into(),
        };
        assert_eq!(err.user_message(), "Prediction failed: bad audio");
        assert!(!err.is_transport());
    }
}
