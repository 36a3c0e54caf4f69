//! Host lifecycle edges
//!
//! Startup cleanup and shutdown each run at most once, no matter how many
//! paths (signal handler, window close, panic hook) try to trigger them.
//! Shutdown empties the scratch directories first and then stops the engine.

use chrono::Utc;
use np_common::events::{EventBus, LifecycleEdge, NpEvent};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tracing::{debug, info};

use crate::cleanup::{CleanupManager, CleanupReport};
use crate::supervisor::{EngineSupervisor, StopOutcome};

/// What a shutdown pass did
#[derive(Debug)]
pub struct ShutdownReport {
    pub cleanup: CleanupReport,
    /// None when no engine was attached (external or failed to start)
    pub engine: Option<StopOutcome>,
}

pub struct Lifecycle {
    cleanup: CleanupManager,
    event_bus: EventBus,
    engine: OnceLock<Arc<EngineSupervisor>>,
    started: AtomicBool,
    shut_down: AtomicBool,
}

impl Lifecycle {
    pub fn new(cleanup: CleanupManager, event_bus: EventBus) -> Self {
        Self {
            cleanup,
            event_bus,
            engine: OnceLock::new(),
            started: AtomicBool::new(false),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Hand the running engine to the lifecycle; only the first call sticks
    pub fn attach_engine(&self, engine: Arc<EngineSupervisor>) -> bool {
        self.engine.set(engine).is_ok()
    }

    pub fn engine(&self) -> Option<&Arc<EngineSupervisor>> {
        self.engine.get()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// Startup cleanup; None if it already ran
    pub async fn startup_cleanup(&self) -> Option<CleanupReport> {
        if self.started.swap(true, Ordering::SeqCst) {
            debug!("Startup cleanup already done");
            return None;
        }
        let report = self.cleanup.run().await;
        self.announce(LifecycleEdge::Startup, &report);
        Some(report)
    }

    /// Shutdown sequence; None if it already ran
    pub async fn shutdown(&self) -> Option<ShutdownReport> {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            debug!("Shutdown already in progress");
            return None;
        }
        info!("Shutting down");

        let cleanup = self.cleanup.run().await;
        self.announce(LifecycleEdge::Shutdown, &cleanup);

        let engine = match self.engine.get() {
            Some(engine) => Some(engine.stop().await),
            None => None,
        };

        Some(ShutdownReport { cleanup, engine })
    }

    /// Run the shutdown sequence, then hand back `outcome` unchanged
    ///
    /// The exit path of `main`: scratch data and the engine are released
    /// even when serving failed.
    pub async fn shutdown_after<T, E>(&self, outcome: Result<T, E>) -> Result<T, E> {
        if let Some(report) = self.shutdown().await {
            info!(
                removed = report.cleanup.removed,
                engine = ?report.engine,
                ok = outcome.is_ok(),
                "Shutdown complete"
            );
        }
        outcome
    }

    /// Panic path: kill the engine without waiting
    pub fn emergency_stop(&self) {
        self.shut_down.store(true, Ordering::SeqCst);
        if let Some(engine) = self.engine.get() {
            engine.force_kill();
        }
    }

    fn announce(&self, edge: LifecycleEdge, report: &CleanupReport) {
        self.event_bus.emit_lossy(NpEvent::CleanupCompleted {
            edge,
            removed: report.removed,
            failures: report.failures.len(),
            timestamp: Utc::now(),
        });
    }
}
