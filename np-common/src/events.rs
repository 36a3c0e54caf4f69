//! Event types for the Neural Pitch event system
//!
//! Provides the shared event definitions and the EventBus used by the host
//! to fan state changes out to the UI (via SSE) and to tests.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Readiness of the inference engine as seen by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineStatus {
    /// Waiting for the first healthy response
    Booting,
    /// Engine answered its health check; sessions may start
    Idle,
    /// Engine could not be started or never became healthy
    Failed,
}

/// Conversion session status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Idle,
    Processing,
    Success,
    Error,
}

/// Which engine output stream a log line came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStream {
    Stdout,
    Stderr,
}

/// Lifecycle edge at which scratch cleanup ran
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleEdge {
    Startup,
    Shutdown,
}

/// Neural Pitch event types
///
/// Events are broadcast via EventBus and serialized for SSE transmission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum NpEvent {
    /// Engine readiness changed
    EngineStatusChanged {
        status: EngineStatus,
        /// Reason for a failure, if any
        message: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// One line of engine stdout/stderr
    EngineLog {
        stream: LogStream,
        line: String,
        timestamp: DateTime<Utc>,
    },

    /// Engine process terminated
    EngineExited {
        /// None when terminated by a signal
        exit_code: Option<i32>,
        timestamp: DateTime<Utc>,
    },

    /// Engine could not be launched; conversion is unavailable
    ///
    /// The UI shows this as a blocking dialog.
    EngineFatal {
        message: String,
        timestamp: DateTime<Utc>,
    },

    /// Session state changed
    SessionChanged {
        session_id: Option<Uuid>,
        status: SessionStatus,
        /// Fence of the most recently issued request
        request_id: Option<u64>,
        error: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// A conversion request was sent to the engine
    ConversionStarted {
        session_id: Option<Uuid>,
        request_id: u64,
        file_name: String,
        timestamp: DateTime<Utc>,
    },

    /// Playback of the current artifact must stop before it is replaced
    PlaybackStopRequested { timestamp: DateTime<Utc> },

    /// Desktop shell should begin an OS-level file drag
    NativeDragRequested {
        path: String,
        icon: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// Scratch directories were reset
    CleanupCompleted {
        edge: LifecycleEdge,
        removed: usize,
        failures: usize,
        timestamp: DateTime<Utc>,
    },
}

impl NpEvent {
    /// Event name used as the SSE `event:` field
    pub fn event_type(&self) -> &'static str {
        match self {
            NpEvent::EngineStatusChanged { .. } => "EngineStatusChanged",
            NpEvent::EngineLog { .. } => "EngineLog",
            NpEvent::EngineExited { .. } => "EngineExited",
            NpEvent::EngineFatal { .. } => "EngineFatal",
            NpEvent::SessionChanged { .. } => "SessionChanged",
            NpEvent::ConversionStarted { .. } => "ConversionStarted",
            NpEvent::PlaybackStopRequested { .. } => "PlaybackStopRequested",
            NpEvent::NativeDragRequested { .. } => "NativeDragRequested",
            NpEvent::CleanupCompleted { .. } => "CleanupCompleted",
        }
    }
}

/// Broadcast bus for NpEvent
///
/// Cloning is cheap; all clones share the same channel.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<NpEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// Slow subscribers that fall more than `capacity` events behind lose
    /// the oldest events (they observe `RecvError::Lagged`).
    ///
    /// ```
    /// use np_common::events::EventBus;
    ///
    /// let event_bus = EventBus::new(256);
    /// assert_eq!(event_bus.capacity(), 256);
    /// ```
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<NpEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(&self, event: NpEvent) -> Result<usize, broadcast::error::SendError<NpEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: NpEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = NpEvent::EngineStatusChanged {
            status: EngineStatus::Idle,
            message: None,
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "EngineStatusChanged");
        assert_eq!(json["status"], "idle");
    }

    #[test]
    fn test_emit_without_subscribers_is_error() {
        let bus = EventBus::new(8);
        let result = bus.emit(NpEvent::PlaybackStopRequested {
            timestamp: Utc::now(),
        });
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_subscriber_receives_emitted_event() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);

        bus.emit_lossy(NpEvent::EngineExited {
            exit_code: Some(0),
            timestamp: Utc::now(),
        });

        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type(), "EngineExited");
    }
}
