//! np-host library interface
//!
//! Host orchestration for Neural Pitch: supervises the local inference
//! engine, waits for it to become ready, drives the single conversion
//! session and hands finished artifacts to the user. The control API in
//! [`api`] is what the UI talks to.

pub mod api;
pub mod cleanup;
pub mod config;
pub mod diagnostics;
pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod output;
pub mod poller;
pub mod session;
pub mod supervisor;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use np_common::events::{EngineStatus, EventBus};
use std::sync::Arc;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::diagnostics::DiagnosticLog;
use crate::output::OutputBridge;
use crate::poller::Readiness;
use crate::session::SessionHandle;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub session: SessionHandle,
    /// Engine readiness published by the poller
    pub engine: watch::Receiver<Readiness>,
    pub output: Arc<OutputBridge>,
    /// Event bus for SSE broadcasting
    pub event_bus: EventBus,
    pub diagnostics: DiagnosticLog,
    /// Startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(
        session: SessionHandle,
        engine: watch::Receiver<Readiness>,
        output: Arc<OutputBridge>,
        event_bus: EventBus,
        diagnostics: DiagnosticLog,
    ) -> Self {
        Self {
            session,
            engine,
            output,
            event_bus,
            diagnostics,
            startup_time: Utc::now(),
        }
    }

    pub fn engine_status(&self) -> EngineStatus {
        self.engine.borrow().status
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::health_routes())
        .merge(api::session_routes())
        .merge(api::artifact_routes())
        .merge(api::event_routes())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
