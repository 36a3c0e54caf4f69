//! Session actor
//!
//! Runs the [`ConversionSession`] inside one tokio task. UI commands arrive
//! over an mpsc channel with a oneshot reply; debounce firings and engine
//! responses come back through an internal channel, so every state change is
//! serialized through the same loop.

use chrono::Utc;
use np_common::events::{EventBus, NpEvent};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::debounce::Debouncer;
use super::parameters::{ParameterEdit, Preset};
use super::state::{ConversionSession, Effect, IssuedRequest, SelectedFile, SessionEvent, SessionSnapshot};
use crate::engine::{EngineApi, EngineError};
use crate::output::ArtifactReference;

/// Default debounce window for parameter edits
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

/// Default ceiling for one conversion request
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

const COMMAND_BUFFER: usize = 32;

/// Session timing knobs
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionSettings {
    pub debounce: Duration,
    pub request_timeout: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            debounce: DEFAULT_DEBOUNCE,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

/// The session actor has stopped
#[derive(Debug, Clone, thiserror::Error)]
#[error("session controller is not running")]
pub struct SessionClosed;

type Reply = oneshot::Sender<SessionSnapshot>;

enum Command {
    SelectFile(SelectedFile, Reply),
    EditParameters(ParameterEdit, Reply),
    ApplyPreset(Preset, Reply),
    Reset(Reply),
    Snapshot(Reply),
}

enum Internal {
    ReprocessDue { ticket: u64 },
    Response {
        request: IssuedRequest,
        result: Result<ArtifactReference, EngineError>,
    },
}

/// Cloneable handle used by the control API
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
    snapshots: watch::Receiver<SessionSnapshot>,
}

impl SessionHandle {
    pub async fn select_file(&self, path: impl Into<PathBuf>) -> Result<SessionSnapshot, SessionClosed> {
        let file = SelectedFile::from_path(path.into());
        self.request(|reply| Command::SelectFile(file, reply)).await
    }

    pub async fn edit_parameters(&self, edit: ParameterEdit) -> Result<SessionSnapshot, SessionClosed> {
        self.request(|reply| Command::EditParameters(edit, reply)).await
    }

    pub async fn apply_preset(&self, preset: Preset) -> Result<SessionSnapshot, SessionClosed> {
        self.request(|reply| Command::ApplyPreset(preset, reply)).await
    }

    pub async fn reset(&self) -> Result<SessionSnapshot, SessionClosed> {
        self.request(Command::Reset).await
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot, SessionClosed> {
        self.request(Command::Snapshot).await
    }

    /// Latest published snapshot, without a round trip through the actor
    pub fn current(&self) -> SessionSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Watch every published snapshot
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshots.clone()
    }

    /// Artifact of the latest successful conversion
    pub fn artifact(&self) -> Option<ArtifactReference> {
        self.snapshots.borrow().artifact.clone()
    }

    async fn request(&self, build: impl FnOnce(Reply) -> Command) -> Result<SessionSnapshot, SessionClosed> {
        let (reply, rx) = oneshot::channel();
        self.commands.send(build(reply)).await.map_err(|_| SessionClosed)?;
        rx.await.map_err(|_| SessionClosed)
    }
}

/// Start the session actor
///
/// The actor stops when `shutdown` fires or every [`SessionHandle`] is
/// dropped. In-flight requests are cancelled with it.
pub fn spawn_session<E: EngineApi>(
    engine: Arc<E>,
    settings: SessionSettings,
    event_bus: EventBus,
    shutdown: CancellationToken,
) -> (SessionHandle, JoinHandle<()>) {
    let session = ConversionSession::new();
    let (snapshot_tx, snapshot_rx) = watch::channel(session.snapshot());
    let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
    let (internal_tx, internal_rx) = mpsc::unbounded_channel();

    let actor = SessionActor {
        session,
        engine,
        settings,
        event_bus,
        debouncer: Debouncer::new(settings.debounce),
        snapshot_tx,
        internal_tx,
        shutdown,
    };
    let task = tokio::spawn(actor.run(command_rx, internal_rx));

    (
        SessionHandle {
            commands: command_tx,
            snapshots: snapshot_rx,
        },
        task,
    )
}

struct SessionActor<E: EngineApi> {
    session: ConversionSession,
    engine: Arc<E>,
    settings: SessionSettings,
    event_bus: EventBus,
    debouncer: Debouncer,
    snapshot_tx: watch::Sender<SessionSnapshot>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    shutdown: CancellationToken,
}

impl<E: EngineApi> SessionActor<E> {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut internal: mpsc::UnboundedReceiver<Internal>,
    ) {
        info!(
            debounce_ms = self.settings.debounce.as_millis() as u64,
            timeout_s = self.settings.request_timeout.as_secs(),
            "Session controller started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                command = commands.recv() => match command {
                    Some(command) => self.on_command(command),
                    None => break,
                },
                Some(message) = internal.recv() => self.on_internal(message),
            }
        }

        self.debouncer.cancel();
        info!("Session controller stopped");
    }

    fn on_command(&mut self, command: Command) {
        let (event, reply) = match command {
            Command::SelectFile(file, reply) => (Some(SessionEvent::FileSelected(file)), reply),
            Command::EditParameters(edit, reply) => (Some(SessionEvent::ParametersEdited(edit)), reply),
            Command::ApplyPreset(preset, reply) => (Some(SessionEvent::PresetApplied(preset)), reply),
            Command::Reset(reply) => (Some(SessionEvent::Reset), reply),
            Command::Snapshot(reply) => (None, reply),
        };
        if let Some(event) = event {
            self.dispatch(event);
        }
        // Caller may have given up waiting
        let _ = reply.send(self.session.snapshot());
    }

    fn on_internal(&mut self, message: Internal) {
        match message {
            Internal::ReprocessDue { ticket } => {
                if self.debouncer.claim(ticket) {
                    self.dispatch(SessionEvent::ReprocessDue);
                } else {
                    debug!(ticket, "Ignoring superseded debounce firing");
                }
            }
            Internal::Response { request, result } => {
                self.dispatch(SessionEvent::ResponseReceived {
                    request_id: request.request_id,
                    sent: request.parameters,
                    result,
                });
            }
        }
    }

    fn dispatch(&mut self, event: SessionEvent) {
        let before = self.session.snapshot();
        let effects = self.session.handle(event);
        for effect in effects {
            self.perform(effect);
        }
        self.publish(&before);
    }

    fn perform(&mut self, effect: Effect) {
        match effect {
            Effect::Issue(request) => self.issue(request),
            Effect::ScheduleReprocess => {
                let tx = self.internal_tx.clone();
                let ticket = self.debouncer.schedule(move |ticket| async move {
                    let _ = tx.send(Internal::ReprocessDue { ticket });
                });
                debug!(ticket, "Reprocess scheduled");
            }
            Effect::CancelReprocess => {
                if self.debouncer.cancel() {
                    debug!("Pending reprocess cancelled");
                }
            }
            Effect::StopPlayback => {
                self.event_bus.emit_lossy(NpEvent::PlaybackStopRequested {
                    timestamp: Utc::now(),
                });
            }
        }
    }

    fn issue(&self, request: IssuedRequest) {
        info!(
            request_id = %request.request_id,
            file = %request.file.name,
            "Issuing conversion request"
        );
        self.event_bus.emit_lossy(NpEvent::ConversionStarted {
            session_id: self.session.session_id(),
            request_id: request.request_id.value(),
            file_name: request.file.name.clone(),
            timestamp: Utc::now(),
        });

        let engine = Arc::clone(&self.engine);
        let tx = self.internal_tx.clone();
        let limit = self.settings.request_timeout;
        let cancel = self.shutdown.child_token();

        tokio::spawn(async move {
            let predict = request.to_predict_request();
            let result = match tokio::time::timeout(limit, engine.predict(&predict, cancel.clone())).await {
                Ok(result) => result,
                Err(_) => {
                    cancel.cancel();
                    warn!(request_id = %request.request_id, "Conversion request timed out");
                    Err(EngineError::Timeout(limit))
                }
            };
            if matches!(result, Err(EngineError::Cancelled)) {
                return;
            }
            let _ = tx.send(Internal::Response { request, result });
        });
    }

    fn publish(&self, before: &SessionSnapshot) {
        let snapshot = self.session.snapshot();
        let changed = snapshot.status != before.status
            || snapshot.session_id != before.session_id
            || snapshot.last_request_id != before.last_request_id
            || snapshot.error != before.error;

        if changed {
            self.event_bus.emit_lossy(NpEvent::SessionChanged {
                session_id: snapshot.session_id,
                status: snapshot.status,
                request_id: snapshot.last_request_id.map(|id| id.value()),
                error: snapshot.error.clone(),
                timestamp: Utc::now(),
            });
        }
        self.snapshot_tx.send_replace(snapshot);
    }
}
