//! Test helper utilities
//!
//! Shared utilities for testing np-host

#![allow(dead_code)]

pub mod fake_engine;
pub mod mock_engine;

pub use fake_engine::{FakeEngine, FakeReply, RecordedRequest};
pub use mock_engine::{MockEngine, PredictBehavior, ReceivedForm, MIDI_BYTES};

use np_host::session::{SessionHandle, SessionSnapshot};
use np_common::events::SessionStatus;
use std::path::{Path, PathBuf};

/// Write a small placeholder audio file and return its path
pub fn write_audio(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, b"RIFF\x24\x00\x00\x00WAVEfmt ").unwrap();
    path
}

/// Wait until the session publishes `status`
pub async fn wait_for_status(session: &SessionHandle, status: SessionStatus) -> SessionSnapshot {
    let mut rx = session.subscribe();
    let snapshot = rx
        .wait_for(|s| s.status == status)
        .await
        .expect("session actor stopped");
    snapshot.clone()
}
