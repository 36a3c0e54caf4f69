//! Engine readiness poller
//!
//! Probes `GET /health` on a fixed interval while the engine is booting.
//! The first `{"status":"ok"}` moves the status to idle and stops polling.
//! After `max_attempts` probes without success the status moves to failed.
//! Dropping the poller stops the interval.

use chrono::Utc;
use np_common::events::{EngineStatus, EventBus, NpEvent};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::engine::EngineApi;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_MAX_ATTEMPTS: u32 = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

/// Published engine readiness
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Readiness {
    pub status: EngineStatus,
    /// Engine version from the successful probe, or the failure reason
    pub detail: Option<String>,
}

impl Readiness {
    fn booting() -> Self {
        Self {
            status: EngineStatus::Booting,
            detail: None,
        }
    }
}

pub struct ReadinessPoller {
    readiness: watch::Receiver<Readiness>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl ReadinessPoller {
    /// Start polling `engine`
    pub fn spawn<E: EngineApi>(engine: Arc<E>, settings: PollSettings, event_bus: EventBus) -> Self {
        let (tx, rx) = watch::channel(Readiness::booting());
        let cancel = CancellationToken::new();

        emit_status(&event_bus, &Readiness::booting());
        let task = tokio::spawn(poll_loop(engine, settings, tx, event_bus, cancel.clone()));

        Self {
            readiness: rx,
            cancel,
            task: Some(task),
        }
    }

    /// A poller that never polls, for a host whose engine could not start
    pub fn failed(message: impl Into<String>, event_bus: &EventBus) -> Self {
        let readiness = Readiness {
            status: EngineStatus::Failed,
            detail: Some(message.into()),
        };
        emit_status(event_bus, &readiness);
        let (_tx, rx) = watch::channel(readiness);

        Self {
            readiness: rx,
            cancel: CancellationToken::new(),
            task: None,
        }
    }

    pub fn status(&self) -> EngineStatus {
        self.readiness.borrow().status
    }

    pub fn readiness(&self) -> Readiness {
        self.readiness.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Readiness> {
        self.readiness.clone()
    }

    /// Wait until the engine leaves `booting`
    pub async fn wait_ready(&self) -> EngineStatus {
        let mut rx = self.readiness.clone();
        let result = rx
            .wait_for(|r| r.status != EngineStatus::Booting)
            .await
            .map(|r| r.status);
        // Sender gone while booting: the poller was shut down
        result.unwrap_or_else(|_| rx.borrow().status)
    }

    /// Stop polling; a no-op once the status is terminal
    pub fn shutdown(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for ReadinessPoller {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn poll_loop<E: EngineApi>(
    engine: Arc<E>,
    settings: PollSettings,
    tx: watch::Sender<Readiness>,
    event_bus: EventBus,
    cancel: CancellationToken,
) {
    info!(
        interval_ms = settings.interval.as_millis() as u64,
        max_attempts = settings.max_attempts,
        "Waiting for engine to become ready"
    );

    let mut timer = tokio::time::interval(settings.interval);
    timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut attempts: u32 = 0;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(attempts, "Readiness polling cancelled");
                return;
            }
            _ = timer.tick() => {}
        }

        attempts += 1;
        let probe = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            probe = engine.health() => probe,
        };

        match probe {
            Ok(report) if report.is_ok() => {
                info!(attempts, version = ?report.version, "Engine is ready");
                let readiness = Readiness {
                    status: EngineStatus::Idle,
                    detail: report.version,
                };
                emit_status(&event_bus, &readiness);
                tx.send_replace(readiness);
                return;
            }
            Ok(report) => debug!(attempts, status = %report.status, "Engine not ready yet"),
            Err(e) => debug!(attempts, error = %e, "Health probe failed"),
        }

        if attempts >= settings.max_attempts {
            let message = format!(
                "Conversion engine did not become ready after {} health checks",
                attempts
            );
            warn!("{}", message);
            let readiness = Readiness {
                status: EngineStatus::Failed,
                detail: Some(message),
            };
            emit_status(&event_bus, &readiness);
            tx.send_replace(readiness);
            return;
        }
    }
}

fn emit_status(event_bus: &EventBus, readiness: &Readiness) {
    event_bus.emit_lossy(NpEvent::EngineStatusChanged {
        status: readiness.status,
        message: readiness.detail.clone(),
        timestamp: Utc::now(),
    });
}
