//! np-host - Neural Pitch host process
//!
//! Launches (or attaches to) the local inference engine, waits for it to
//! become ready, runs the conversion session and serves the control API the
//! UI talks to. On shutdown the scratch directories are emptied and the
//! engine is stopped, exactly once.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use chrono::Utc;
use clap::Parser;
use np_common::events::{EventBus, NpEvent};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use np_host::cleanup::CleanupManager;
use np_host::config::{Args, HostConfig};
use np_host::diagnostics::{DesktopBridge, DiagnosticLog, HeadlessBridge, HostBridge};
use np_host::engine::EngineClient;
use np_host::lifecycle::Lifecycle;
use np_host::output::OutputBridge;
use np_host::poller::ReadinessPoller;
use np_host::session::spawn_session;
use np_host::supervisor::{EngineSupervisor, DEFAULT_GRACE_PERIOD};
use np_host::AppState;

const DEFAULT_LOG_FILTER: &str = "np_host=debug,np_common=info,tower_http=info";

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = HostConfig::resolve(&args);

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| {
            tracing_subscriber::EnvFilter::try_new(
                config.log_filter.as_deref().unwrap_or(DEFAULT_LOG_FILTER),
            )
        })
        .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting np-host (Neural Pitch host)");
    info!("Version: {} ({})", env!("CARGO_PKG_VERSION"), env!("GIT_HASH"));
    info!(
        mode = %config.mode,
        external_engine = config.external_engine,
        desktop = config.desktop,
        "Configuration resolved"
    );
    info!("Scratch: {} / {}", config.scratch.uploads.display(), config.scratch.outputs.display());

    let diagnostics = DiagnosticLog::new(config.diagnostic_log.clone());
    info!("Diagnostic log: {}", diagnostics.path().display());

    let event_bus = EventBus::new(256);
    let lifecycle = Arc::new(Lifecycle::new(
        CleanupManager::new(config.scratch.clone()),
        event_bus.clone(),
    ));
    install_panic_hook(Arc::clone(&lifecycle), diagnostics.clone());

    if let Some(report) = lifecycle.startup_cleanup().await {
        if !report.is_clean() {
            warn!("Startup cleanup left {} entries behind", report.failures.len());
        }
    }

    let engine = Arc::new(
        EngineClient::new(config.engine_url(), Some(config.static_url()))
            .context("Failed to build engine HTTP client")?,
    );

    let mut poller = if config.external_engine {
        info!("Using external engine at {}", config.engine_url());
        ReadinessPoller::spawn(Arc::clone(&engine), config.poll_settings(), event_bus.clone())
    } else {
        match EngineSupervisor::start(
            &config.engine_launch(),
            event_bus.clone(),
            diagnostics.clone(),
            DEFAULT_GRACE_PERIOD,
        ) {
            Ok(supervisor) => {
                lifecycle.attach_engine(Arc::new(supervisor));
                ReadinessPoller::spawn(Arc::clone(&engine), config.poll_settings(), event_bus.clone())
            }
            Err(e) => {
                let message = format!("Could not start the conversion engine: {}", e);
                diagnostics.record(&message);
                error!("{}", message);
                event_bus.emit_lossy(NpEvent::EngineFatal {
                    message: message.clone(),
                    timestamp: Utc::now(),
                });
                ReadinessPoller::failed(message, &event_bus)
            }
        }
    };

    let shutdown = CancellationToken::new();
    let (session, session_task) = spawn_session(
        Arc::clone(&engine),
        config.session_settings(),
        event_bus.clone(),
        shutdown.child_token(),
    );

    let bridge: Arc<dyn HostBridge> = if config.desktop {
        Arc::new(DesktopBridge::new(diagnostics.clone(), event_bus.clone()))
    } else {
        Arc::new(HeadlessBridge::new(diagnostics.clone()))
    };
    let output = Arc::new(OutputBridge::new(bridge, config.drag_icon.clone()));

    let diagnostics_on_exit = diagnostics.clone();
    let state = AppState::new(session, poller.subscribe(), output, event_bus, diagnostics);
    let app = np_host::build_router(state);

    let served = serve(config.host_addr(), app).await;
    if let Err(e) = &served {
        error!("{:#}", e);
        diagnostics_on_exit.record(&format!("Control API failed: {:#}", e));
    }

    shutdown.cancel();
    poller.shutdown();
    if let Err(e) = session_task.await {
        warn!("Session task ended abnormally: {}", e);
    }
    lifecycle.shutdown_after(served).await
}

/// Bind the control API and serve until a shutdown signal arrives
async fn serve(addr: SocketAddr, app: Router) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")
}

/// Record panics durably, kill the engine and exit
fn install_panic_hook(lifecycle: Arc<Lifecycle>, diagnostics: DiagnosticLog) {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        diagnostics.record(&format!("Unhandled panic: {}", panic_info));
        default_hook(panic_info);
        lifecycle.emergency_stop();
        std::process::exit(1);
    }));
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
