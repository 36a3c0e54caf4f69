//! Host configuration
//!
//! Resolved once at startup. Priority per field:
//! 1. Command-line argument
//! 2. Environment variable (clap `env` fallback)
//! 3. TOML config file
//! 4. Compiled default, which depends on the runtime mode

use clap::Parser;
use np_common::config::{
    default_config_path, load_toml_config_or_default, RuntimeMode, ScratchDirs, TomlConfig,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::diagnostics::DiagnosticLog;
use crate::poller::{PollSettings, DEFAULT_MAX_ATTEMPTS, DEFAULT_POLL_INTERVAL};
use crate::session::controller::{DEFAULT_DEBOUNCE, DEFAULT_REQUEST_TIMEOUT};
use crate::session::SessionSettings;
use crate::supervisor::EngineLaunch;

pub const DEFAULT_ENGINE_PORT: u16 = 8000;
pub const DEFAULT_STATIC_PORT: u16 = 8001;
pub const DEFAULT_HOST_PORT: u16 = 5790;

/// Engine binary name inside the packaged `engine/` folder
#[cfg(windows)]
pub const PACKAGED_ENGINE_NAME: &str = "np-engine.exe";
#[cfg(not(windows))]
pub const PACKAGED_ENGINE_NAME: &str = "np-engine";

/// Command-line arguments for np-host
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "np-host")]
#[command(about = "Neural Pitch host: engine supervision and conversion sessions")]
#[command(version)]
pub struct Args {
    /// Runtime mode (development or packaged)
    #[arg(long, env = "NP_MODE")]
    pub mode: Option<RuntimeMode>,

    /// Path to the engine executable
    #[arg(long, env = "NP_ENGINE_PATH")]
    pub engine_path: Option<PathBuf>,

    /// Extra argument passed to the engine (repeatable)
    #[arg(long = "engine-arg", allow_hyphen_values = true)]
    pub engine_args: Vec<String>,

    /// Do not launch the engine; expect one already listening
    #[arg(long, env = "NP_EXTERNAL_ENGINE")]
    pub external_engine: Option<bool>,

    /// Engine API port
    #[arg(long, env = "NP_ENGINE_PORT")]
    pub engine_port: Option<u16>,

    /// Engine static file port
    #[arg(long, env = "NP_STATIC_PORT")]
    pub static_port: Option<u16>,

    /// Control API port
    #[arg(short, long, env = "NP_HOST_PORT")]
    pub port: Option<u16>,

    /// Parent folder of uploads/ and outputs/
    #[arg(long, env = "NP_SCRATCH_ROOT")]
    pub scratch_root: Option<PathBuf>,

    /// Running inside the desktop shell
    #[arg(long, env = "NP_DESKTOP")]
    pub desktop: Option<bool>,

    /// Config file (default: ~/.config/neural-pitch/config.toml)
    #[arg(short, long, env = "NP_CONFIG")]
    pub config: Option<PathBuf>,

    /// Durable diagnostic log file
    #[arg(long, env = "NP_DIAGNOSTIC_LOG")]
    pub diagnostic_log: Option<PathBuf>,
}

/// Fully resolved host configuration
#[derive(Debug, Clone, PartialEq)]
pub struct HostConfig {
    pub mode: RuntimeMode,
    pub external_engine: bool,
    pub engine_executable: PathBuf,
    pub engine_args: Vec<String>,
    pub engine_working_dir: Option<PathBuf>,
    pub engine_port: u16,
    pub static_port: u16,
    pub host_port: u16,
    pub scratch: ScratchDirs,
    pub desktop: bool,
    pub drag_icon: Option<PathBuf>,
    pub log_filter: Option<String>,
    pub diagnostic_log: PathBuf,
    pub debounce: Duration,
    pub request_timeout: Duration,
    pub poll_interval: Duration,
    pub max_health_attempts: u32,
}

impl HostConfig {
    /// Load the TOML layer named by `args` (or the default location) and resolve
    pub fn resolve(args: &Args) -> Self {
        let path = args.config.clone().or_else(default_config_path);
        let toml = load_toml_config_or_default(path.as_deref());
        Self::from_sources(args, &toml)
    }

    /// Merge CLI/ENV values over a parsed TOML file and compiled defaults
    pub fn from_sources(args: &Args, toml: &TomlConfig) -> Self {
        let mode = args
            .mode
            .or(toml.mode)
            .unwrap_or_else(RuntimeMode::compiled_default);

        let engine_port = args.engine_port.or(toml.engine_port).unwrap_or(DEFAULT_ENGINE_PORT);

        let scratch_root = args.scratch_root.clone().or_else(|| toml.scratch_root.clone());
        let scratch = ScratchDirs::for_mode(mode, scratch_root.as_deref());

        let (default_executable, default_args, engine_working_dir) = default_engine(mode, engine_port);
        let engine_executable = args
            .engine_path
            .clone()
            .or_else(|| toml.engine_executable.clone())
            .unwrap_or(default_executable);
        let engine_args = if !args.engine_args.is_empty() {
            args.engine_args.clone()
        } else {
            toml.engine_args.clone().unwrap_or(default_args)
        };

        let timing = &toml.timing;

        Self {
            mode,
            external_engine: args
                .external_engine
                .or(toml.external_engine)
                .unwrap_or(mode == RuntimeMode::Development),
            engine_executable,
            engine_args,
            engine_working_dir,
            engine_port,
            static_port: args.static_port.or(toml.static_port).unwrap_or(DEFAULT_STATIC_PORT),
            host_port: args.port.or(toml.host_port).unwrap_or(DEFAULT_HOST_PORT),
            scratch,
            desktop: args.desktop.or(toml.desktop).unwrap_or(false),
            drag_icon: toml.drag_icon.clone(),
            log_filter: toml.logging.level.clone(),
            diagnostic_log: args
                .diagnostic_log
                .clone()
                .or_else(|| toml.logging.diagnostic_log.clone())
                .unwrap_or_else(DiagnosticLog::default_path),
            debounce: timing
                .debounce_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_DEBOUNCE),
            request_timeout: timing
                .request_timeout_ms
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_REQUEST_TIMEOUT),
            poll_interval: timing
                .poll_interval_ms
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_POLL_INTERVAL),
            max_health_attempts: timing
                .max_health_attempts
                .filter(|n| *n > 0)
                .unwrap_or(DEFAULT_MAX_ATTEMPTS),
        }
    }

    pub fn engine_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.engine_port)
    }

    pub fn static_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.static_port)
    }

    pub fn host_addr(&self) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], self.host_port))
    }

    pub fn engine_launch(&self) -> EngineLaunch {
        EngineLaunch {
            executable: self.engine_executable.clone(),
            args: self.engine_args.clone(),
            scratch: self.scratch.clone(),
            working_dir: self.engine_working_dir.clone(),
        }
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            debounce: self.debounce,
            request_timeout: self.request_timeout,
        }
    }

    pub fn poll_settings(&self) -> PollSettings {
        PollSettings {
            interval: self.poll_interval,
            max_attempts: self.max_health_attempts,
        }
    }
}

/// Compiled engine launch defaults: executable, args, working directory
fn default_engine(mode: RuntimeMode, engine_port: u16) -> (PathBuf, Vec<String>, Option<PathBuf>) {
    match mode {
        RuntimeMode::Development => (
            PathBuf::from(if cfg!(windows) { "python" } else { "python3" }),
            vec![
                "-m".to_string(),
                "uvicorn".to_string(),
                "main:app".to_string(),
                "--host".to_string(),
                "127.0.0.1".to_string(),
                "--port".to_string(),
                engine_port.to_string(),
            ],
            Some(PathBuf::from("fastapi_backend")),
        ),
        RuntimeMode::Packaged => {
            let engine_dir = std::env::current_exe()
                .ok()
                .and_then(|exe| exe.parent().map(|dir| dir.join("engine")))
                .unwrap_or_else(|| PathBuf::from("engine"));
            (
                engine_dir.join(PACKAGED_ENGINE_NAME),
                Vec::new(),
                Some(engine_dir),
            )
        }
    }
}
