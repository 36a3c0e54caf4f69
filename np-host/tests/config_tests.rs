//! Host configuration priority: CLI > ENV > TOML > default
//!
//! Tests touching process environment run serially.

use clap::Parser;
use np_common::config::RuntimeMode;
use np_host::config::{Args, HostConfig, DEFAULT_ENGINE_PORT, DEFAULT_HOST_PORT};
use serial_test::serial;
use std::path::{Path, PathBuf};
use std::time::Duration;

const ENV_VARS: &[&str] = &[
    "NP_MODE",
    "NP_ENGINE_PATH",
    "NP_EXTERNAL_ENGINE",
    "NP_ENGINE_PORT",
    "NP_STATIC_PORT",
    "NP_HOST_PORT",
    "NP_SCRATCH_ROOT",
    "NP_DESKTOP",
    "NP_CONFIG",
    "NP_DIAGNOSTIC_LOG",
];

fn clear_env() {
    for var in ENV_VARS {
        std::env::remove_var(var);
    }
}

fn write_config(dir: &Path, content: &str) -> PathBuf {
    let path = dir.join("config.toml");
    std::fs::write(&path, content).unwrap();
    path
}

fn resolve(argv: &[&str]) -> HostConfig {
    let args = Args::try_parse_from(std::iter::once("np-host").chain(argv.iter().copied())).unwrap();
    HostConfig::resolve(&args)
}

#[test]
#[serial]
fn test_env_var_is_used() {
    clear_env();
    let dir = tempfile::tempdir().unwrap();
    let empty = write_config(dir.path(), "");
    std::env::set_var("NP_ENGINE_PORT", "9001");

    let config = resolve(&["--config", empty.to_str().unwrap()]);
    assert_eq!(config.engine_port, 9001);
    assert_eq!(config.engine_url(), "http://127.0.0.1:9001");

    clear_env();
}

#[test]
#[serial]
fn test_cli_overrides_env() {
    clear_env();
    let dir = tempfile::tempdir().unwrap();
    let empty = write_config(dir.path(), "");
    std::env::set_var("NP_ENGINE_PORT", "9001");
    std::env::set_var("NP_HOST_PORT", "6000");

    let config = resolve(&[
        "--config",
        empty.to_str().unwrap(),
        "--engine-port",
        "9002",
        "-p",
        "6001",
    ]);
    assert_eq!(config.engine_port, 9002);
    assert_eq!(config.host_port, 6001);

    clear_env();
}

#[test]
#[serial]
fn test_toml_used_when_cli_and_env_absent() {
    clear_env();
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(
        dir.path(),
        r#"
mode = "packaged"
engine_port = 9100
host_port = 6100
external_engine = true
scratch_root = "/var/tmp/np"

[timing]
debounce_ms = 250
request_timeout_ms = 30000
"#,
    );

    let config = resolve(&["--config", path.to_str().unwrap()]);
    assert_eq!(config.mode, RuntimeMode::Packaged);
    assert_eq!(config.engine_port, 9100);
    assert_eq!(config.host_port, 6100);
    assert!(config.external_engine);
    assert_eq!(config.scratch.uploads, PathBuf::from("/var/tmp/np/uploads"));
    assert_eq!(config.debounce, Duration::from_millis(250));
    assert_eq!(config.request_timeout, Duration::from_secs(30));

    // ENV still beats the file
    std::env::set_var("NP_ENGINE_PORT", "9200");
    let config = resolve(&["--config", path.to_str().unwrap()]);
    assert_eq!(config.engine_port, 9200);

    clear_env();
}

#[test]
#[serial]
fn test_malformed_config_degrades_to_defaults() {
    clear_env();
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(dir.path(), "engine_port = [[[");

    let config = resolve(&["--config", path.to_str().unwrap(), "--mode", "development"]);
    assert_eq!(config.engine_port, DEFAULT_ENGINE_PORT);
    assert_eq!(config.host_port, DEFAULT_HOST_PORT);
    assert!(config.external_engine);

    clear_env();
}

#[test]
#[serial]
fn test_env_mode_and_flags() {
    clear_env();
    let dir = tempfile::tempdir().unwrap();
    let empty = write_config(dir.path(), "");
    std::env::set_var("NP_MODE", "packaged");
    std::env::set_var("NP_DESKTOP", "true");
    std::env::set_var("NP_SCRATCH_ROOT", dir.path());

    let config = resolve(&["--config", empty.to_str().unwrap()]);
    assert_eq!(config.mode, RuntimeMode::Packaged);
    assert!(config.desktop);
    assert!(!config.external_engine);
    assert_eq!(config.scratch.outputs, dir.path().join("outputs"));

    let launch = config.engine_launch();
    assert_eq!(launch.scratch, config.scratch);
    assert_eq!(launch.executable, config.engine_executable);

    clear_env();
}

#[test]
#[serial]
fn test_invalid_port_is_rejected_by_parser() {
    clear_env();
    let result = Args::try_parse_from(["np-host", "--engine-port", "eighty"]);
    assert!(result.is_err());
}
