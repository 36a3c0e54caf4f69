//! Engine process supervisor
//!
//! Launches the bundled inference engine as a child process, forwards its
//! stdout/stderr line by line, and terminates it on shutdown. Termination
//! asks politely first (SIGINT on unix, `taskkill /T /F` on Windows) and
//! kills after a grace period. The child is spawned with kill-on-drop so a
//! dropped supervisor never leaks the engine.

use chrono::Utc;
use np_common::config::ScratchDirs;
use np_common::events::{EventBus, LogStream, NpEvent};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::diagnostics::DiagnosticLog;

/// Time allowed for a graceful exit before the engine is killed
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// How to launch the engine
#[derive(Debug, Clone, PartialEq)]
pub struct EngineLaunch {
    pub executable: PathBuf,
    pub args: Vec<String>,
    pub scratch: ScratchDirs,
    pub working_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessState {
    Running,
    /// Exited without being asked to
    Exited,
    /// Terminated by [`EngineSupervisor::stop`]
    Stopped,
}

/// Observable state of the engine process
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineProcessHandle {
    pub pid: Option<u32>,
    pub state: ProcessState,
    pub exit_code: Option<i32>,
}

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("Engine executable not found: {0}")]
    ExecutableNotFound(PathBuf),

    #[error("Failed to start engine {path}: {source}")]
    Spawn {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Result of [`EngineSupervisor::stop`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The engine was running and has now been terminated
    Terminated,
    /// The engine had already exited on its own
    AlreadyExited,
    /// `stop` was called before
    AlreadyStopped,
}

pub struct EngineSupervisor {
    pid: Option<u32>,
    state: watch::Receiver<EngineProcessHandle>,
    stop_token: CancellationToken,
    stop_called: AtomicBool,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

impl EngineSupervisor {
    /// Spawn the engine and start forwarding its output
    pub fn start(
        launch: &EngineLaunch,
        event_bus: EventBus,
        diagnostics: DiagnosticLog,
        grace: Duration,
    ) -> Result<Self, SupervisorError> {
        if looks_like_path(&launch.executable) && !launch.executable.exists() {
            return Err(SupervisorError::ExecutableNotFound(launch.executable.clone()));
        }

        let mut command = Command::new(&launch.executable);
        command
            .args(&launch.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in launch.scratch.env_pairs() {
            command.env(key, value);
        }
        if let Some(dir) = &launch.working_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                SupervisorError::ExecutableNotFound(launch.executable.clone())
            } else {
                SupervisorError::Spawn {
                    path: launch.executable.clone(),
                    source,
                }
            }
        })?;

        let pid = child.id();
        info!(
            pid = ?pid,
            executable = %launch.executable.display(),
            uploads = %launch.scratch.uploads.display(),
            outputs = %launch.scratch.outputs.display(),
            "Engine process started"
        );

        if let Some(stdout) = child.stdout.take() {
            forward_lines(stdout, LogStream::Stdout, event_bus.clone(), None);
        }
        if let Some(stderr) = child.stderr.take() {
            forward_lines(stderr, LogStream::Stderr, event_bus.clone(), Some(diagnostics.clone()));
        }

        let (state_tx, state_rx) = watch::channel(EngineProcessHandle {
            pid,
            state: ProcessState::Running,
            exit_code: None,
        });
        let stop_token = CancellationToken::new();
        let monitor = tokio::spawn(monitor(
            child,
            stop_token.clone(),
            grace,
            state_tx,
            event_bus,
            diagnostics,
        ));

        Ok(Self {
            pid,
            state: state_rx,
            stop_token,
            stop_called: AtomicBool::new(false),
            monitor: Mutex::new(Some(monitor)),
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn handle(&self) -> EngineProcessHandle {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<EngineProcessHandle> {
        self.state.clone()
    }

    /// Wait for the process to leave the running state
    pub async fn wait_exit(&self) -> EngineProcessHandle {
        let mut rx = self.state.clone();
        let result = rx
            .wait_for(|h| h.state != ProcessState::Running)
            .await
            .map(|h| h.clone());
        result.unwrap_or_else(|_| rx.borrow().clone())
    }

    /// Terminate the engine and wait for it to exit
    ///
    /// Only the first call does anything.
    pub async fn stop(&self) -> StopOutcome {
        if self.stop_called.swap(true, Ordering::SeqCst) {
            debug!("Engine stop already requested");
            return StopOutcome::AlreadyStopped;
        }
        if self.state.borrow().state != ProcessState::Running {
            debug!("Engine already exited; nothing to stop");
            return StopOutcome::AlreadyExited;
        }

        info!(pid = ?self.pid, "Stopping engine");
        self.stop_token.cancel();

        let monitor = self
            .monitor
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(task) = monitor {
            if let Err(e) = task.await {
                error!("Engine monitor task failed: {}", e);
            }
        }

        match self.state.borrow().state {
            ProcessState::Exited => StopOutcome::AlreadyExited,
            _ => StopOutcome::Terminated,
        }
    }

    /// Synchronous hard kill for the panic hook
    pub fn force_kill(&self) {
        if self.state.borrow().state == ProcessState::Running {
            if let Some(pid) = self.pid {
                force_kill_pid(pid);
            }
        }
    }
}

fn looks_like_path(executable: &Path) -> bool {
    executable.is_absolute() || executable.components().count() > 1
}

/// Stderr lines also land in the diagnostic log when one is given
fn forward_lines<R>(
    reader: R,
    stream: LogStream,
    event_bus: EventBus,
    diagnostics: Option<DiagnosticLog>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    match stream {
                        LogStream::Stdout => info!(target: "engine", "{}", line),
                        LogStream::Stderr => info!(target: "engine", stream = "stderr", "{}", line),
                    }
                    if let Some(log) = &diagnostics {
                        log.record(&format!("engine: {}", line));
                    }
                    event_bus.emit_lossy(NpEvent::EngineLog {
                        stream,
                        line,
                        timestamp: Utc::now(),
                    });
                }
                Ok(None) => break,
                Err(e) => {
                    debug!(?stream, "Engine output stream closed: {}", e);
                    break;
                }
            }
        }
    })
}

async fn monitor(
    mut child: Child,
    stop: CancellationToken,
    grace: Duration,
    state_tx: watch::Sender<EngineProcessHandle>,
    event_bus: EventBus,
    diagnostics: DiagnosticLog,
) {
    let pid = child.id();

    let exited = tokio::select! {
        status = child.wait() => Some(status),
        _ = stop.cancelled() => None,
    };
    let (state, status) = match exited {
        Some(status) => (ProcessState::Exited, status),
        None => (ProcessState::Stopped, terminate(&mut child, grace).await),
    };

    let exit_code = match &status {
        Ok(status) => status.code(),
        Err(e) => {
            error!("Waiting for engine process failed: {}", e);
            None
        }
    };

    if state == ProcessState::Exited {
        let message = format!("Engine process exited unexpectedly (code {:?})", exit_code);
        warn!("{}", message);
        diagnostics.record(&message);
    } else {
        info!(exit_code = ?exit_code, "Engine process stopped");
    }

    state_tx.send_replace(EngineProcessHandle {
        pid,
        state,
        exit_code,
    });
    event_bus.emit_lossy(NpEvent::EngineExited {
        exit_code,
        timestamp: Utc::now(),
    });
}

async fn terminate(child: &mut Child, grace: Duration) -> std::io::Result<ExitStatus> {
    request_graceful_exit(child).await;

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(status) => status,
        Err(_) => {
            warn!(
                "Engine did not exit within {:?}, killing it",
                grace
            );
            child.kill().await?;
            child.wait().await
        }
    }
}

#[cfg(unix)]
async fn request_graceful_exit(child: &Child) {
    if let Some(pid) = child.id() {
        // SAFETY: plain signal delivery to our own child
        if unsafe { libc::kill(pid as libc::pid_t, libc::SIGINT) } != 0 {
            debug!(pid, "SIGINT delivery failed: {}", std::io::Error::last_os_error());
        }
    }
}

#[cfg(windows)]
async fn request_graceful_exit(child: &Child) {
    if let Some(pid) = child.id() {
        let result = Command::new("taskkill")
            .args(["/pid", &pid.to_string(), "/T", "/F"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        if let Err(e) = result {
            debug!(pid, "taskkill failed: {}", e);
        }
    }
}

#[cfg(not(any(unix, windows)))]
async fn request_graceful_exit(_child: &Child) {}

#[cfg(unix)]
fn force_kill_pid(pid: u32) {
    // SAFETY: plain signal delivery to our own child
    unsafe {
        libc::kill(pid as libc::pid_t, libc::SIGKILL);
    }
}

#[cfg(windows)]
fn force_kill_pid(pid: u32) {
    let _ = std::process::Command::new("taskkill")
        .args(["/pid", &pid.to_string(), "/T", "/F"])
        .status();
}

#[cfg(not(any(unix, windows)))]
fn force_kill_pid(_pid: u32) {}
