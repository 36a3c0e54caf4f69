//! Scratch directory cleanup
//!
//! Both scratch directories are recreated if missing and emptied. A failure
//! to delete one entry is logged and counted; it never aborts the pass.

use np_common::config::ScratchDirs;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Outcome of one cleanup pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    /// Top-level entries removed
    pub removed: usize,
    /// Entries (or directories) that could not be handled
    pub failures: Vec<CleanupFailure>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CleanupFailure {
    pub path: PathBuf,
    pub error: String,
}

impl CleanupReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    fn fail(&mut self, path: &Path, error: std::io::Error) {
        warn!("Cleanup could not remove {}: {}", path.display(), error);
        self.failures.push(CleanupFailure {
            path: path.to_path_buf(),
            error: error.to_string(),
        });
    }
}

pub struct CleanupManager {
    dirs: ScratchDirs,
}

impl CleanupManager {
    pub fn new(dirs: ScratchDirs) -> Self {
        Self { dirs }
    }

    pub fn dirs(&self) -> &ScratchDirs {
        &self.dirs
    }

    /// Ensure both scratch directories exist and are empty
    pub async fn run(&self) -> CleanupReport {
        let mut report = CleanupReport::default();
        for dir in self.dirs.iter() {
            clean_dir(dir, &mut report).await;
        }
        info!(
            removed = report.removed,
            failures = report.failures.len(),
            "Scratch cleanup finished"
        );
        report
    }
}

async fn clean_dir(dir: &Path, report: &mut CleanupReport) {
    if let Err(e) = tokio::fs::create_dir_all(dir).await {
        report.fail(dir, e);
        return;
    }

    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) => {
            report.fail(dir, e);
            return;
        }
    };

    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => {
                report.fail(dir, e);
                break;
            }
        };

        let path = entry.path();
        // file_type() does not follow symlinks, so a linked directory is unlinked, not emptied
        let result = match entry.file_type().await {
            Ok(t) if t.is_dir() => tokio::fs::remove_dir_all(&path).await,
            Ok(_) => tokio::fs::remove_file(&path).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                debug!("Removed {}", path.display());
                report.removed += 1;
            }
            Err(e) => report.fail(&path, e),
        }
    }
}
