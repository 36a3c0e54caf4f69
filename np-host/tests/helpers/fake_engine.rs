//! Scriptable in-memory EngineApi

use async_trait::async_trait;
use bytes::Bytes;
use np_host::engine::{EngineApi, EngineError, HealthReport, PredictRequest};
use np_host::output::ArtifactReference;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// How the fake answers one predict call
#[derive(Debug, Clone)]
pub enum FakeReply {
    Artifact {
        filename: String,
        detected_bpm: Option<f64>,
        delay: Duration,
    },
    Reject {
        status: u16,
        message: String,
    },
    /// Never answers; only a timeout or cancellation ends the call
    Hang,
}

impl FakeReply {
    pub fn artifact(filename: &str) -> Self {
        FakeReply::Artifact {
            filename: filename.to_string(),
            detected_bpm: None,
            delay: Duration::ZERO,
        }
    }

    pub fn artifact_with_bpm(filename: &str, bpm: f64) -> Self {
        FakeReply::Artifact {
            filename: filename.to_string(),
            detected_bpm: Some(bpm),
            delay: Duration::ZERO,
        }
    }

    pub fn delayed(filename: &str, delay: Duration) -> Self {
        FakeReply::Artifact {
            filename: filename.to_string(),
            detected_bpm: None,
            delay,
        }
    }
}

/// A predict call as seen by the fake
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub request: PredictRequest,
    pub at: Instant,
}

#[derive(Default)]
pub struct FakeEngine {
    script: Mutex<VecDeque<FakeReply>>,
    requests: Mutex<Vec<RecordedRequest>>,
    static_base: Option<String>,
}

impl FakeEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Successful replies carry `{base}/outputs/{filename}` as static URL
    pub fn with_static_base(base: &str) -> Arc<Self> {
        Arc::new(Self {
            static_base: Some(base.to_string()),
            ..Default::default()
        })
    }

    /// Queue replies in call order; unscripted calls succeed immediately
    pub fn script(&self, replies: impl IntoIterator<Item = FakeReply>) {
        self.script.lock().unwrap().extend(replies);
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn artifact(&self, filename: String, detected_bpm: Option<f64>) -> ArtifactReference {
        let blob = Bytes::from_static(b"MThd\x00\x00\x00\x06");
        ArtifactReference {
            static_url: self
                .static_base
                .as_ref()
                .map(|base| format!("{}/outputs/{}", base, filename)),
            filename,
            absolute_path: None,
            size_bytes: blob.len(),
            blob,
            detected_bpm,
            bpm_warning: None,
        }
    }
}

#[async_trait]
impl EngineApi for FakeEngine {
    async fn health(&self) -> Result<HealthReport, EngineError> {
        Ok(HealthReport {
            status: "ok".to_string(),
            version: Some("fake".to_string()),
        })
    }

    async fn predict(
        &self,
        request: &PredictRequest,
        cancel: CancellationToken,
    ) -> Result<ArtifactReference, EngineError> {
        let call = self.requests.lock().unwrap().len() + 1;
        self.requests.lock().unwrap().push(RecordedRequest {
            request: request.clone(),
            at: Instant::now(),
        });
        let reply = self.script.lock().unwrap().pop_front().unwrap_or_else(|| {
            FakeReply::artifact(&format!("out_{}.mid", call))
        });

        match reply {
            FakeReply::Artifact {
                filename,
                detected_bpm,
                delay,
            } => {
                tokio::select! {
                    _ = cancel.cancelled() => Err(EngineError::Cancelled),
                    _ = tokio::time::sleep(delay) => Ok(self.artifact(filename, detected_bpm)),
                }
            }
            FakeReply::Reject { status, message } => Err(EngineError::Rejected { status, message }),
            FakeReply::Hang => {
                cancel.cancelled().await;
                Err(EngineError::Cancelled)
            }
        }
    }
}
