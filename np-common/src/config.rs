//! Configuration loading and scratch folder resolution
//!
//! Values are resolved in this priority order by the host:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. Compiled default (fallback)
//!
//! This module owns the TOML layer and the compiled defaults. A missing or
//! malformed config file never prevents startup; it degrades to defaults.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, warn};

/// Directory name used under per-user config/data folders
pub const APP_DIR_NAME: &str = "neural-pitch";

/// Environment variable pinning the engine's upload scratch directory
pub const UPLOAD_DIR_ENV: &str = "NP_UPLOAD_DIR";

/// Environment variable pinning the engine's output scratch directory
pub const OUTPUT_DIR_ENV: &str = "NP_OUTPUT_DIR";

/// How the host was launched
///
/// Development runs from a source checkout and expects the engine to be
/// started by hand; packaged runs launch the bundled engine and keep scratch
/// data in the per-user data directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeMode {
    Development,
    Packaged,
}

impl RuntimeMode {
    /// Compiled default: debug builds are development builds
    pub fn compiled_default() -> Self {
        if cfg!(debug_assertions) {
            RuntimeMode::Development
        } else {
            RuntimeMode::Packaged
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RuntimeMode::Development => "development",
            RuntimeMode::Packaged => "packaged",
        }
    }
}

impl fmt::Display for RuntimeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RuntimeMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(RuntimeMode::Development),
            "packaged" | "production" | "prod" => Ok(RuntimeMode::Packaged),
            other => Err(format!("unknown runtime mode '{}'", other)),
        }
    }
}

/// Logging section of config.toml
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// tracing EnvFilter directive (e.g. "np_host=debug")
    pub level: Option<String>,
    /// Location of the durable diagnostic log
    pub diagnostic_log: Option<PathBuf>,
}

/// Timing section of config.toml (all values in milliseconds except attempts)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub debounce_ms: Option<u64>,
    pub request_timeout_ms: Option<u64>,
    pub poll_interval_ms: Option<u64>,
    pub max_health_attempts: Option<u32>,
}

/// Contents of `config.toml`
///
/// Every field is optional; absent fields fall through to compiled defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    pub mode: Option<RuntimeMode>,
    pub engine_executable: Option<PathBuf>,
    pub engine_args: Option<Vec<String>>,
    pub external_engine: Option<bool>,
    pub engine_port: Option<u16>,
    pub static_port: Option<u16>,
    pub host_port: Option<u16>,
    pub scratch_root: Option<PathBuf>,
    pub desktop: Option<bool>,
    pub drag_icon: Option<PathBuf>,
    pub logging: LoggingConfig,
    pub timing: TimingConfig,
}

/// Default location of the per-user config file
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(APP_DIR_NAME).join("config.toml"))
}

/// Parse a config file, failing on I/O or syntax errors
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))
}

/// Load the config file if present, otherwise return defaults
///
/// A missing file is normal and only logged at debug level; an unreadable or
/// malformed file is logged as a warning and ignored.
pub fn load_toml_config_or_default(path: Option<&Path>) -> TomlConfig {
    let Some(path) = path else {
        return TomlConfig::default();
    };

    if !path.exists() {
        debug!("No config file at {}, using defaults", path.display());
        return TomlConfig::default();
    }

    match load_toml_config(path) {
        Ok(config) => config,
        Err(e) => {
            warn!("{}; continuing with defaults", e);
            TomlConfig::default()
        }
    }
}

/// The two scratch directories handed to the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScratchDirs {
    pub uploads: PathBuf,
    pub outputs: PathBuf,
}

impl ScratchDirs {
    /// `uploads/` and `outputs/` under the given root
    pub fn under(root: &Path) -> Self {
        Self {
            uploads: root.join("uploads"),
            outputs: root.join("outputs"),
        }
    }

    /// Resolve the scratch root for a runtime mode
    ///
    /// Development keeps scratch data next to the checkout (current working
    /// directory); packaged installs use the per-user data directory.
    pub fn for_mode(mode: RuntimeMode, root_override: Option<&Path>) -> Self {
        if let Some(root) = root_override {
            return Self::under(root);
        }
        match mode {
            RuntimeMode::Development => {
                let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
                Self::under(&cwd)
            }
            RuntimeMode::Packaged => Self::under(&default_packaged_root()),
        }
    }

    /// Environment pairs passed to the engine process
    pub fn env_pairs(&self) -> [(&'static str, &Path); 2] {
        [
            (UPLOAD_DIR_ENV, self.uploads.as_path()),
            (OUTPUT_DIR_ENV, self.outputs.as_path()),
        ]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Path> {
        [self.uploads.as_path(), self.outputs.as_path()].into_iter()
    }
}

/// OS-dependent per-user data folder for packaged installs
pub fn default_packaged_root() -> PathBuf {
    if cfg!(target_os = "linux") {
        // ~/.local/share/neural-pitch
        dirs::data_local_dir()
            .map(|d| d.join(APP_DIR_NAME))
            .unwrap_or_else(|| PathBuf::from("/tmp").join(APP_DIR_NAME))
    } else if cfg!(target_os = "macos") {
        // ~/Library/Application Support/neural-pitch
        dirs::data_dir()
            .map(|d| d.join(APP_DIR_NAME))
            .unwrap_or_else(|| PathBuf::from("/tmp").join(APP_DIR_NAME))
    } else if cfg!(target_os = "windows") {
        // %LOCALAPPDATA%\neural-pitch
        dirs::data_local_dir()
            .map(|d| d.join(APP_DIR_NAME))
            .unwrap_or_else(|| std::env::temp_dir().join(APP_DIR_NAME))
    } else {
        PathBuf::from("./neural_pitch_data")
    }
}
