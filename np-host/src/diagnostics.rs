//! Durable diagnostic log and the host bridge surface
//!
//! The diagnostic log is a plain append-only file in the OS temp directory.
//! It does not depend on the scratch or state directories, so failures that
//! happen before those exist (engine spawn, early panics) are still recorded.

use chrono::Utc;
use np_common::events::{EventBus, NpEvent};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// Default diagnostic log file name
pub const DIAGNOSTIC_LOG_NAME: &str = "neural-pitch-diagnostics.log";

/// Append-only diagnostic log
#[derive(Debug, Clone)]
pub struct DiagnosticLog {
    path: Arc<PathBuf>,
}

impl DiagnosticLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Arc::new(path.into()),
        }
    }

    /// `<temp dir>/neural-pitch-diagnostics.log`
    pub fn default_path() -> PathBuf {
        std::env::temp_dir().join(DIAGNOSTIC_LOG_NAME)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one timestamped line
    pub fn append(&self, message: &str) -> std::io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path.as_path())?;
        writeln!(file, "[{}] {}", Utc::now().to_rfc3339(), message.trim_end())
    }

    /// Append, reporting a write failure through tracing instead of failing
    pub fn record(&self, message: &str) {
        if let Err(e) = self.append(message) {
            warn!(
                "Could not write diagnostic log {}: {} (message: {})",
                self.path.display(),
                e,
                message
            );
        }
    }
}

/// Native drag request handed to the desktop shell
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DragRequest {
    pub path: PathBuf,
    pub icon: Option<PathBuf>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BridgeError {
    #[error("native drag is only available in the desktop host")]
    Unsupported,

    #[error("native drag failed: {0}")]
    Failed(String),
}

/// Operations the UI can ask of its host
pub trait HostBridge: Send + Sync {
    /// Running inside the desktop shell (as opposed to a plain browser)
    fn is_desktop(&self) -> bool;

    /// Begin an OS-level file drag of `request.path`
    fn start_drag(&self, request: &DragRequest) -> Result<(), BridgeError>;

    /// Append a line to the durable diagnostic log
    fn log(&self, message: &str);
}

/// Bridge for browser/headless runs: logging only, no native drag
pub struct HeadlessBridge {
    diagnostics: DiagnosticLog,
}

impl HeadlessBridge {
    pub fn new(diagnostics: DiagnosticLog) -> Self {
        Self { diagnostics }
    }
}

impl HostBridge for HeadlessBridge {
    fn is_desktop(&self) -> bool {
        false
    }

    fn start_drag(&self, _request: &DragRequest) -> Result<(), BridgeError> {
        Err(BridgeError::Unsupported)
    }

    fn log(&self, message: &str) {
        self.diagnostics.record(message);
    }
}

/// Bridge for the desktop shell
///
/// The shell subscribes to the host's event stream and performs the OS drag
/// when it sees `NativeDragRequested`.
pub struct DesktopBridge {
    diagnostics: DiagnosticLog,
    event_bus: EventBus,
}

impl DesktopBridge {
    pub fn new(diagnostics: DiagnosticLog, event_bus: EventBus) -> Self {
        Self {
            diagnostics,
            event_bus,
        }
    }
}

impl HostBridge for DesktopBridge {
    fn is_desktop(&self) -> bool {
        true
    }

    fn start_drag(&self, request: &DragRequest) -> Result<(), BridgeError> {
        info!(path = %request.path.display(), "Requesting native drag");
        self.event_bus
            .emit(NpEvent::NativeDragRequested {
                path: request.path.to_string_lossy().into_owned(),
                icon: request
                    .icon
                    .as_ref()
                    .map(|p| p.to_string_lossy().into_owned()),
                timestamp: Utc::now(),
            })
            .map(|_| ())
            .map_err(|_| BridgeError::Failed("desktop shell is not listening".to_string()))
    }

    fn log(&self, message: &str) {
        self.diagnostics.record(message);
    }
}
