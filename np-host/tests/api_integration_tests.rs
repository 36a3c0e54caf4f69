//! Integration tests for the np-host control API

mod helpers;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use helpers::{write_audio, FakeEngine, FakeReply};
use http_body_util::BodyExt;
use np_common::events::{EngineStatus, EventBus, SessionStatus};
use np_host::diagnostics::{DiagnosticLog, HeadlessBridge};
use np_host::output::OutputBridge;
use np_host::poller::Readiness;
use np_host::session::{spawn_session, SessionHandle, SessionSettings};
use np_host::AppState;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tower::util::ServiceExt;

struct TestApp {
    app: Router,
    session: SessionHandle,
    engine_status: watch::Sender<Readiness>,
    dir: TempDir,
}

fn create_test_app(engine: Arc<FakeEngine>) -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let event_bus = EventBus::new(64);
    let diagnostics = DiagnosticLog::new(dir.path().join("diagnostics.log"));

    let (session, _task) = spawn_session(
        engine,
        SessionSettings {
            debounce: Duration::from_millis(50),
            request_timeout: Duration::from_secs(5),
        },
        event_bus.clone(),
        CancellationToken::new(),
    );
    let (engine_status, engine_rx) = watch::channel(Readiness {
        status: EngineStatus::Idle,
        detail: Some("fake".into()),
    });
    let output = Arc::new(OutputBridge::new(
        Arc::new(HeadlessBridge::new(diagnostics.clone())),
        None,
    ));

    let state = AppState::new(session.clone(), engine_rx, output, event_bus, diagnostics);
    TestApp {
        app: np_host::build_router(state),
        session,
        engine_status,
        dir,
    }
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = response.into_body().collect().await.unwrap().to_bytes().to_vec();
    (status, headers, bytes)
}

fn json_body(bytes: &[u8]) -> Value {
    serde_json::from_slice(bytes).unwrap()
}

async fn wait_until_success(session: &SessionHandle) {
    tokio::time::timeout(
        Duration::from_secs(5),
        helpers::wait_for_status(session, SessionStatus::Success),
    )
    .await
    .expect("session did not reach success");
}

#[tokio::test]
async fn test_health_endpoint() {
    let test = create_test_app(FakeEngine::new());
    let (status, _, body) = send(&test.app, "GET", "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    let body = json_body(&body);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["module"], "np-host");
    assert_eq!(body["engine"]["status"], "idle");
    assert!(body["uptime_seconds"].is_u64());
}

#[tokio::test]
async fn test_health_reports_booting_engine() {
    let test = create_test_app(FakeEngine::new());
    test.engine_status.send_replace(Readiness {
        status: EngineStatus::Booting,
        detail: None,
    });

    let (_, _, body) = send(&test.app, "GET", "/health", None).await;
    let body = json_body(&body);
    assert_eq!(body["status"], "starting");
    assert_eq!(body["engine"]["status"], "booting");
}

#[tokio::test]
async fn test_file_rejected_while_engine_booting() {
    let test = create_test_app(FakeEngine::new());
    test.engine_status.send_replace(Readiness {
        status: EngineStatus::Booting,
        detail: None,
    });
    let audio = write_audio(test.dir.path(), "song.wav");

    let (status, _, body) = send(&test.app, "POST", "/session/file", Some(json!({ "path": audio }))).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json_body(&body)["error"]["code"], "UNAVAILABLE");
}

#[tokio::test]
async fn test_missing_file_is_bad_request() {
    let test = create_test_app(FakeEngine::new());
    let (status, _, body) = send(
        &test.app,
        "POST",
        "/session/file",
        Some(json!({ "path": "/no/such/file.wav" })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json_body(&body)["error"]["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn test_select_file_starts_conversion() {
    let engine = FakeEngine::new();
    engine.script([FakeReply::artifact_with_bpm("abc.mid", 120.0)]);
    let test = create_test_app(engine.clone());
    let audio = write_audio(test.dir.path(), "song.wav");

    let (status, _, body) = send(&test.app, "POST", "/session/file", Some(json!({ "path": audio }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_body(&body)["status"], "processing");

    wait_until_success(&test.session).await;
    let (status, _, body) = send(&test.app, "GET", "/session", None).await;
    assert_eq!(status, StatusCode::OK);
    let body = json_body(&body);
    assert_eq!(body["status"], "success");
    assert_eq!(body["artifact"]["filename"], "abc.mid");
    assert_eq!(body["parameters"]["tempo_bpm"], 120.0);
    assert_eq!(engine.request_count(), 1);
}

#[tokio::test]
async fn test_parameter_edit_validation() {
    let test = create_test_app(FakeEngine::new());

    let (status, _, _) = send(&test.app, "PUT", "/session/parameters", Some(json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _, body) = send(
        &test.app,
        "PUT",
        "/session/parameters",
        Some(json!({ "onset_threshold": 5.0 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_body(&body)["parameters"]["onset_threshold"], 0.9);
}

#[tokio::test]
async fn test_presets() {
    let test = create_test_app(FakeEngine::new());

    let (status, _, _) = send(&test.app, "POST", "/session/preset", Some(json!({ "name": "loud" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _, body) = send(&test.app, "POST", "/session/preset", Some(json!({ "name": "clean" }))).await;
    assert_eq!(status, StatusCode::OK);
    let body = json_body(&body);
    assert_eq!(body["parameters"]["onset_threshold"], 0.7);
    assert_eq!(body["parameters"]["frame_threshold"], 0.5);

    let (_, _, body) = send(&test.app, "GET", "/session/presets", None).await;
    let names: Vec<String> = json_body(&body)
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["name"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(names, vec!["balanced", "sensitive", "clean"]);
}

#[tokio::test]
async fn test_reset_returns_to_idle() {
    let test = create_test_app(FakeEngine::new());
    let audio = write_audio(test.dir.path(), "song.wav");
    send(&test.app, "POST", "/session/file", Some(json!({ "path": audio }))).await;
    wait_until_success(&test.session).await;

    let (status, _, body) = send(&test.app, "POST", "/session/reset", None).await;
    assert_eq!(status, StatusCode::OK);
    let body = json_body(&body);
    assert_eq!(body["status"], "idle");
    assert!(body["artifact"].is_null());
}

#[tokio::test]
async fn test_artifact_download_without_artifact() {
    let test = create_test_app(FakeEngine::new());
    let (status, _, body) = send(&test.app, "GET", "/session/artifact", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json_body(&body)["error"]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_artifact_download_serves_blob() {
    let test = create_test_app(FakeEngine::new());
    let audio = write_audio(test.dir.path(), "song.wav");
    send(&test.app, "POST", "/session/file", Some(json!({ "path": audio }))).await;
    wait_until_success(&test.session).await;

    let (status, headers, body) = send(&test.app, "GET", "/session/artifact", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CONTENT_TYPE], "audio/midi");
    assert_eq!(
        headers[header::CONTENT_DISPOSITION],
        "attachment; filename=\"out_1.mid\""
    );
    assert!(body.starts_with(b"MThd"));
}

#[tokio::test]
async fn test_artifact_download_redirects_to_static_url() {
    let test = create_test_app(FakeEngine::with_static_base("http://127.0.0.1:8001"));
    let audio = write_audio(test.dir.path(), "song.wav");
    send(&test.app, "POST", "/session/file", Some(json!({ "path": audio }))).await;
    wait_until_success(&test.session).await;

    let (status, headers, _) = send(&test.app, "GET", "/session/artifact", None).await;
    assert_eq!(status, StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(headers[header::LOCATION], "http://127.0.0.1:8001/outputs/out_1.mid");
}

#[tokio::test]
async fn test_drag_refused_outside_desktop() {
    let test = create_test_app(FakeEngine::new());
    let audio = write_audio(test.dir.path(), "song.wav");
    send(&test.app, "POST", "/session/file", Some(json!({ "path": audio }))).await;
    wait_until_success(&test.session).await;

    let (status, _, body) = send(&test.app, "POST", "/session/artifact/drag", None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json_body(&body)["error"]["code"], "CONFLICT");
}

#[tokio::test]
async fn test_save_artifact_to_directory() {
    let test = create_test_app(FakeEngine::new());
    let audio = write_audio(test.dir.path(), "song.wav");
    send(&test.app, "POST", "/session/file", Some(json!({ "path": audio }))).await;
    wait_until_success(&test.session).await;

    let target = test.dir.path().join("exports");
    let (status, _, body) = send(
        &test.app,
        "POST",
        "/session/artifact/save",
        Some(json!({ "directory": target })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_body(&body)["path"], json!(target.join("out_1.mid")));
    assert!(target.join("out_1.mid").is_file());
}

#[tokio::test]
async fn test_log_appends_to_diagnostic_log() {
    let test = create_test_app(FakeEngine::new());

    let (status, _, _) = send(&test.app, "POST", "/log", Some(json!({ "message": "renderer crashed" }))).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let content = std::fs::read_to_string(test.dir.path().join("diagnostics.log")).unwrap();
    assert!(content.contains("renderer crashed"));

    let (status, _, _) = send(&test.app, "POST", "/log", Some(json!({ "message": "  " }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
