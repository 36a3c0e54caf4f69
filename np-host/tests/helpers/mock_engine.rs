//! In-process axum stand-in for the inference engine

use axum::{
    extract::{Multipart, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

/// How `/predict` answers
#[derive(Debug, Clone)]
pub enum PredictBehavior {
    /// 200 with the given filename and tempo headers
    Succeed {
        filename: String,
        detected_bpm: Option<String>,
        absolute_path: Option<String>,
    },
    /// Non-2xx with a JSON `detail`
    Detail { status: u16, detail: String },
    /// Non-2xx with a plain-text body
    Raw { status: u16, body: String },
    /// Sleep before answering 200
    Slow(Duration),
}

/// Form fields received by one `/predict` call
#[derive(Debug, Clone, Default)]
pub struct ReceivedForm {
    pub fields: HashMap<String, String>,
    pub file_name: Option<String>,
    pub file_len: usize,
}

#[derive(Clone)]
struct MockState {
    behavior: Arc<Mutex<PredictBehavior>>,
    received: Arc<Mutex<Vec<ReceivedForm>>>,
    health_status: Arc<Mutex<String>>,
}

pub struct MockEngine {
    pub addr: SocketAddr,
    state: MockState,
    server: JoinHandle<()>,
}

pub const MIDI_BYTES: &[u8] = b"MThd\x00\x00\x00\x06\x00\x01\x00\x01\x01\xe0";

impl MockEngine {
    pub async fn start(behavior: PredictBehavior) -> Self {
        let state = MockState {
            behavior: Arc::new(Mutex::new(behavior)),
            received: Arc::new(Mutex::new(Vec::new())),
            health_status: Arc::new(Mutex::new("ok".to_string())),
        };

        let app = Router::new()
            .route("/health", get(health))
            .route("/predict", post(predict))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, state, server }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn set_behavior(&self, behavior: PredictBehavior) {
        *self.state.behavior.lock().unwrap() = behavior;
    }

    pub fn set_health_status(&self, status: &str) {
        *self.state.health_status.lock().unwrap() = status.to_string();
    }

    pub fn received(&self) -> Vec<ReceivedForm> {
        self.state.received.lock().unwrap().clone()
    }
}

impl Drop for MockEngine {
    fn drop(&mut self) {
        self.server.abort();
    }
}

async fn health(State(state): State<MockState>) -> Json<serde_json::Value> {
    let status = state.health_status.lock().unwrap().clone();
    Json(json!({ "status": status, "version": "mock-1.0" }))
}

async fn predict(State(state): State<MockState>, mut multipart: Multipart) -> Response {
    let mut form = ReceivedForm::default();
    while let Ok(Some(field)) = multipart.next_field().await {
        let name = field.name().unwrap_or_default().to_string();
        if name == "file" {
            form.file_name = field.file_name().map(str::to_string);
            form.file_len = field.bytes().await.map(|b| b.len()).unwrap_or(0);
        } else {
            let value = field.text().await.unwrap_or_default();
            form.fields.insert(name, value);
        }
    }
    state.received.lock().unwrap().push(form);

    let behavior = state.behavior.lock().unwrap().clone();
    match behavior {
        PredictBehavior::Succeed {
            filename,
            detected_bpm,
            absolute_path,
        } => {
            let mut headers = HeaderMap::new();
            headers.insert("content-type", HeaderValue::from_static("audio/midi"));
            headers.insert("x-generated-filename", HeaderValue::from_str(&filename).unwrap());
            if let Some(bpm) = detected_bpm {
                headers.insert("x-detected-bpm", HeaderValue::from_str(&bpm).unwrap());
            }
            if let Some(path) = absolute_path {
                headers.insert("x-absolute-path", HeaderValue::from_str(&path).unwrap());
            }
            (StatusCode::OK, headers, MIDI_BYTES).into_response()
        }
        PredictBehavior::Detail { status, detail } => (
            StatusCode::from_u16(status).unwrap(),
            Json(json!({ "detail": detail })),
        )
            .into_response(),
        PredictBehavior::Raw { status, body } => {
            (StatusCode::from_u16(status).unwrap(), body).into_response()
        }
        PredictBehavior::Slow(delay) => {
            tokio::time::sleep(delay).await;
            (StatusCode::OK, MIDI_BYTES).into_response()
        }
    }
}
