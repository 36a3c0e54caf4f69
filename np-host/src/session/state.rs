//! Conversion session state machine
//!
//! Status only changes through [`ConversionSession::handle`], which takes a
//! named [`SessionEvent`] and returns the [`Effect`]s the controller must
//! perform (issue a request, arm or cancel the debounce slot, stop playback).
//! The machine itself does no I/O and keeps no timers.
//!
//! ```text
//!   idle ──file──▶ processing ──2xx──▶ success
//!                     │  ▲               │
//!          non-2xx /  │  └──reprocess────┘ (debounced edit)
//!          timeout    ▼
//!                   error ──reset──▶ idle
//! ```

use chrono::{DateTime, Utc};
use np_common::events::SessionStatus;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::fence::{RequestFence, RequestId};
use super::parameters::{ConversionParameters, ParameterEdit, Preset, AUTO_TEMPO};
use crate::engine::{EngineError, PredictRequest};
use crate::output::ArtifactReference;

/// Opaque handle to the audio file chosen by the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SelectedFile {
    pub path: PathBuf,
    /// Display name (file name component)
    pub name: String,
}

impl SelectedFile {
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());
        Self { path, name }
    }
}

/// Named inputs to the state machine
#[derive(Debug)]
pub enum SessionEvent {
    /// User picked or dropped a file
    FileSelected(SelectedFile),
    /// Slider or field edit
    ParametersEdited(ParameterEdit),
    /// Preset button
    PresetApplied(Preset),
    /// Debounce window elapsed after the last edit
    ReprocessDue,
    /// Engine call finished (successfully or not)
    ResponseReceived {
        request_id: RequestId,
        sent: ConversionParameters,
        result: Result<ArtifactReference, EngineError>,
    },
    /// "Start over"
    Reset,
}

/// Work the controller performs on behalf of the machine
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Send a conversion request now
    Issue(IssuedRequest),
    /// (Re)arm the single debounce slot
    ScheduleReprocess,
    /// Disarm the debounce slot
    CancelReprocess,
    /// Stop playback of the current artifact
    StopPlayback,
}

/// Request data captured at issue time
#[derive(Debug, Clone, PartialEq)]
pub struct IssuedRequest {
    pub request_id: RequestId,
    pub file: SelectedFile,
    pub parameters: ConversionParameters,
}

impl IssuedRequest {
    pub fn to_predict_request(&self) -> PredictRequest {
        PredictRequest {
            request_id: self.request_id,
            file: self.file.clone(),
            parameters: self.parameters,
        }
    }
}

/// Read-only view of the session for the UI
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub session_id: Option<Uuid>,
    pub status: SessionStatus,
    pub file: Option<SelectedFile>,
    pub parameters: ConversionParameters,
    pub artifact: Option<ArtifactReference>,
    pub error: Option<String>,
    /// Why tempo detection fell back, from the latest artifact
    pub tempo_warning: Option<String>,
    pub last_request_id: Option<RequestId>,
    pub updated_at: DateTime<Utc>,
}

/// The single active conversion session
#[derive(Debug)]
pub struct ConversionSession {
    session_id: Option<Uuid>,
    status: SessionStatus,
    file: Option<SelectedFile>,
    parameters: ConversionParameters,
    artifact: Option<ArtifactReference>,
    error: Option<String>,
    fence: RequestFence,
    updated_at: DateTime<Utc>,
}

impl Default for ConversionSession {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversionSession {
    pub fn new() -> Self {
        Self {
            session_id: None,
            status: SessionStatus::Idle,
            file: None,
            parameters: ConversionParameters::default(),
            artifact: None,
            error: None,
            fence: RequestFence::new(),
            updated_at: Utc::now(),
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn parameters(&self) -> ConversionParameters {
        self.parameters
    }

    pub fn artifact(&self) -> Option<&ArtifactReference> {
        self.artifact.as_ref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn session_id(&self) -> Option<Uuid> {
        self.session_id
    }

    /// Apply one event; the only way session state changes
    pub fn handle(&mut self, event: SessionEvent) -> Vec<Effect> {
        let effects = match event {
            SessionEvent::FileSelected(file) => self.on_file_selected(file),
            SessionEvent::ParametersEdited(edit) => self.on_parameters_edited(&edit),
            SessionEvent::PresetApplied(preset) => self.on_parameters_edited(&preset.edit()),
            SessionEvent::ReprocessDue => self.on_reprocess_due(),
            SessionEvent::ResponseReceived {
                request_id,
                sent,
                result,
            } => self.on_response(request_id, sent, result),
            SessionEvent::Reset => self.on_reset(),
        };
        self.updated_at = Utc::now();
        effects
    }

    fn on_file_selected(&mut self, file: SelectedFile) -> Vec<Effect> {
        info!(file = %file.name, "File selected, starting new session");

        let mut effects = vec![Effect::CancelReprocess];
        if self.artifact.take().is_some() {
            effects.push(Effect::StopPlayback);
        }

        self.fence.invalidate();
        self.session_id = Some(Uuid::new_v4());
        self.file = Some(file);
        self.error = None;
        self.parameters = self.parameters.with_tempo(AUTO_TEMPO);

        effects.push(self.issue());
        effects
    }

    fn on_parameters_edited(&mut self, edit: &ParameterEdit) -> Vec<Effect> {
        let updated = self.parameters.apply(edit);
        if updated == self.parameters {
            return Vec::new();
        }
        self.parameters = updated;

        if self.file.is_some() {
            vec![Effect::ScheduleReprocess]
        } else {
            Vec::new()
        }
    }

    fn on_reprocess_due(&mut self) -> Vec<Effect> {
        if self.file.is_none() {
            debug!("Reprocess fired without a file; ignoring");
            return Vec::new();
        }
        vec![Effect::StopPlayback, self.issue()]
    }

    fn on_response(
        &mut self,
        request_id: RequestId,
        sent: ConversionParameters,
        result: Result<ArtifactReference, EngineError>,
    ) -> Vec<Effect> {
        if !self.fence.try_apply(request_id) {
            debug!(
                request_id = %request_id,
                latest = ?self.fence.latest(),
                "Discarding stale conversion response"
            );
            return Vec::new();
        }

        match result {
            Ok(artifact) => {
                if sent.is_auto_tempo() && self.parameters.is_auto_tempo() {
                    if let Some(bpm) = artifact.detected_bpm {
                        info!(bpm, "Applying detected tempo");
                        self.parameters = self.parameters.with_tempo(bpm);
                    }
                }
                info!(
                    request_id = %request_id,
                    filename = %artifact.filename,
                    bytes = artifact.size_bytes,
                    "Conversion succeeded"
                );
                self.artifact = Some(artifact);
                self.error = None;
                self.status = SessionStatus::Success;
            }
            Err(e) => {
                warn!(request_id = %request_id, error = %e, "Conversion failed");
                self.error = Some(e.user_message());
                self.status = SessionStatus::Error;
            }
        }
        Vec::new()
    }

    fn on_reset(&mut self) -> Vec<Effect> {
        if self.status == SessionStatus::Idle && self.file.is_none() {
            return Vec::new();
        }
        info!("Session reset");

        let mut effects = vec![Effect::CancelReprocess];
        if self.artifact.take().is_some() {
            effects.push(Effect::StopPlayback);
        }
        self.fence.invalidate();
        self.session_id = None;
        self.file = None;
        self.error = None;
        self.status = SessionStatus::Idle;
        effects
    }

    fn issue(&mut self) -> Effect {
        let request_id = self.fence.issue();
        self.status = SessionStatus::Processing;
        self.error = None;

        // Callers only issue with a file selected
        let file = self.file.clone().unwrap_or_else(|| SelectedFile::from_path(""));
        Effect::Issue(IssuedRequest {
            request_id,
            file,
            parameters: self.parameters,
        })
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.session_id,
            status: self.status,
            file: self.file.clone(),
            parameters: self.parameters,
            artifact: self.artifact.clone(),
            error: self.error.clone(),
            tempo_warning: self.artifact.as_ref().and_then(|a| a.bpm_warning.clone()),
            last_request_id: self.fence.latest(),
            updated_at: self.updated_at,
        }
    }
}
