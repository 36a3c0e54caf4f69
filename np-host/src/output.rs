//! Artifact output bridge
//!
//! Hands a finished conversion to the user in one of two ways:
//! - a conventional download (static URL when the engine serves the file,
//!   otherwise the in-memory blob)
//! - a native OS drag, only under the desktop host and only when the engine
//!   reported an absolute path. A URL never crosses the OS drag boundary the
//!   way a real file path does, so URL-only artifacts are not dragged.

use bytes::Bytes;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use crate::diagnostics::{BridgeError, DragRequest, HostBridge};

/// MIME type of generated artifacts
pub const ARTIFACT_CONTENT_TYPE: &str = "audio/midi";

/// Result of one successful conversion
#[derive(Debug, Clone, Serialize)]
pub struct ArtifactReference {
    /// Engine-assigned file name
    pub filename: String,
    /// Location on disk (desktop installs only)
    pub absolute_path: Option<PathBuf>,
    /// Static server URL, when the engine serves outputs
    pub static_url: Option<String>,
    /// Transient copy of the artifact bytes
    #[serde(skip)]
    pub blob: Bytes,
    pub size_bytes: usize,
    /// Tempo reported by the engine
    pub detected_bpm: Option<f64>,
    /// Why tempo detection fell back, if it did
    pub bpm_warning: Option<String>,
}

/// Where a download should read the artifact from
#[derive(Debug, Clone, PartialEq)]
pub enum DownloadSource {
    StaticUrl(String),
    Blob(Bytes),
}

/// A "save as" link
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadLink {
    pub filename: String,
    pub source: DownloadSource,
}

/// Export failures
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("Native drag requires the desktop application")]
    NotDesktop,

    #[error("Artifact has no file on disk; use download instead")]
    NoAbsolutePath,

    #[error("No artifact available")]
    NoArtifact,

    #[error(transparent)]
    Bridge(#[from] BridgeError),

    #[error("Could not save artifact: {0}")]
    Io(#[from] std::io::Error),
}

/// Export operations over the host bridge
pub struct OutputBridge {
    bridge: Arc<dyn HostBridge>,
    drag_icon: Option<PathBuf>,
}

impl OutputBridge {
    pub fn new(bridge: Arc<dyn HostBridge>, drag_icon: Option<PathBuf>) -> Self {
        Self { bridge, drag_icon }
    }

    pub fn host(&self) -> &dyn HostBridge {
        self.bridge.as_ref()
    }

    /// Download link: static URL when present, blob otherwise
    pub fn download(&self, artifact: &ArtifactReference) -> DownloadLink {
        let source = match &artifact.static_url {
            Some(url) => DownloadSource::StaticUrl(url.clone()),
            None => DownloadSource::Blob(artifact.blob.clone()),
        };
        DownloadLink {
            filename: artifact.filename.clone(),
            source,
        }
    }

    /// Whether [`OutputBridge::start_drag`] would be attempted
    pub fn can_drag(&self, artifact: &ArtifactReference) -> bool {
        self.bridge.is_desktop() && artifact.absolute_path.is_some()
    }

    /// Start a native drag of the artifact's file
    pub fn start_drag(&self, artifact: &ArtifactReference) -> Result<PathBuf, ExportError> {
        if !self.bridge.is_desktop() {
            return Err(ExportError::NotDesktop);
        }
        let path = artifact
            .absolute_path
            .clone()
            .ok_or(ExportError::NoAbsolutePath)?;

        self.bridge.start_drag(&DragRequest {
            path: path.clone(),
            icon: self.drag_icon.clone(),
        })?;
        info!(path = %path.display(), "Native drag started");
        Ok(path)
    }

    /// Write the blob to `dir/<filename>`
    pub async fn save_to(&self, artifact: &ArtifactReference, dir: &Path) -> Result<PathBuf, ExportError> {
        let target = dir.join(safe_file_name(&artifact.filename));
        tokio::fs::create_dir_all(dir).await?;
        tokio::fs::write(&target, &artifact.blob).await?;
        debug!(path = %target.display(), bytes = artifact.size_bytes, "Artifact saved");
        Ok(target)
    }
}

/// Strip any directory components from an engine-supplied file name
fn safe_file_name(name: &str) -> String {
    Path::new(name)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| "output.mid".to_string())
}

/// `Content-Disposition` value for a download
pub fn content_disposition(filename: &str) -> String {
    let escaped: String = safe_file_name(filename)
        .chars()
        .map(|c| if c == '"' || c.is_control() { '_' } else { c })
        .collect();
    format!("attachment; filename=\"{}\"", escaped)
}
