//! In-process stand-in for the LifeOS backend, built on axum.
//!
//! Records the `Authorization` header of every request so tests can check
//! what the client actually sent.

#![allow(dead_code)]

use std::future::Future;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use lifeos_core::auth::FileStore;
use lifeos_core::{AuthSession, Config};
use serde::Deserialize;
use serde_json::{json, Value};
use tempfile::TempDir;

pub const GOOD_USER: &str = "alice";
pub const GOOD_PASSWORD: &str = "secret";
pub const GOOD_TOKEN: &str = "tok123";
pub const TAKEN_USER: &str = "taken";

pub const LOGIN: &str = "/api/v1/auth/login";
pub const REGISTER: &str = "/api/v1/auth/register";
pub const ME: &str = "/api/v1/auth/me";
pub const START: &str = "/api/v1/system/start";
pub const END: &str = "/api/v1/system/end";
pub const STATUS: &str = "/api/v1/system/status";

const WAIT_LIMIT: Duration = Duration::from_secs(3);

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub path: &'static str,
    pub authorization: Option<String>,
}

pub struct StubState {
    requests: Mutex<Vec<RecordedRequest>>,
    start_status: AtomicU16,
    end_status: AtomicU16,
}

impl StubState {
    fn record(&self, path: &'static str, headers: &HeaderMap) {
        let authorization = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        self.requests
            .lock()
            .expect("requests lock")
            .push(RecordedRequest { path, authorization });
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().expect("requests lock").clone()
    }

    pub fn calls_to(&self, path: &str) -> usize {
        self.requests().iter().filter(|r| r.path == path).count()
    }

    pub fn last_to(&self, path: &str) -> Option<RecordedRequest> {
        self.requests().into_iter().rev().find(|r| r.path == path)
    }

    pub fn set_start_status(&self, status: u16) {
        self.start_status.store(status, Ordering::SeqCst);
    }

    pub fn set_end_status(&self, status: u16) {
        self.end_status.store(status, Ordering::SeqCst);
    }

    fn status_of(code: &AtomicU16) -> StatusCode {
        StatusCode::from_u16(code.load(Ordering::SeqCst)).unwrap_or(StatusCode::OK)
    }
}

pub struct StubBackend {
    pub base_url: String,
    pub state: Arc<StubState>,
}

impl StubBackend {
    pub async fn spawn() -> Self {
        let state = Arc::new(StubState {
            requests: Mutex::new(Vec::new()),
            start_status: AtomicU16::new(200),
            end_status: AtomicU16::new(200),
        });

        let app = Router::new()
            .route(LOGIN, post(login))
            .route(REGISTER, post(register))
            .route(ME, get(me))
            .route(START, post(start))
            .route(END, post(end))
            .route(STATUS, get(status))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind stub backend");
        let addr = listener.local_addr().expect("stub address");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("stub backend");
        });

        Self {
            base_url: format!("http://{}", addr),
            state,
        }
    }

    pub fn config(&self) -> Config {
        Config {
            api_base_url: self.base_url.clone(),
            request_timeout_secs: 5,
            ..Config::default()
        }
    }
}

/// Config for a backend that is never reachable. Nothing listens on the
/// discard port, so best-effort calls fail fast.
pub fn offline_config() -> Config {
    Config {
        api_base_url: "http://127.0.0.1:9".to_string(),
        request_timeout_secs: 2,
        ..Config::default()
    }
}

/// Session persisting into `dir`, the way a reload would find it
pub fn file_session(config: &Config, dir: &TempDir) -> AuthSession {
    AuthSession::new(config, Arc::new(FileStore::new(dir.path()))).expect("auth session")
}

/// Poll `condition` until it holds or the wait limit passes.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + WAIT_LIMIT;
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "condition not met in time");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

pub async fn within<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(WAIT_LIMIT, future)
        .await
        .expect("timed out")
}

type Shared = State<Arc<StubState>>;

#[derive(Deserialize)]
struct CredentialsBody {
    username: String,
    password: String,
}

fn user(username: &str) -> Value {
    json!({"id": format!("id-{}", username), "username": username})
}

async fn login(
    State(state): Shared,
    headers: HeaderMap,
    Json(body): Json<CredentialsBody>,
) -> (StatusCode, Json<Value>) {
    state.record(LOGIN, &headers);
    if body.username == GOOD_USER && body.password == GOOD_PASSWORD {
        (
            StatusCode::OK,
            Json(json!({"token": GOOD_TOKEN, "user": user(&body.username)})),
        )
    } else {
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({"detail": "Invalid credentials"})),
        )
    }
}

async fn register(
    State(state): Shared,
    headers: HeaderMap,
    Json(body): Json<CredentialsBody>,
) -> (StatusCode, Json<Value>) {
    state.record(REGISTER, &headers);
    if body.username == TAKEN_USER {
        (
            StatusCode::BAD_REQUEST,
            Json(json!({"detail": "Username already exists"})),
        )
    } else {
        (
            StatusCode::OK,
            Json(json!({
                "access_token": format!("tok-{}", body.username),
                "user": user(&body.username),
            })),
        )
    }
}

async fn me(State(state): Shared, headers: HeaderMap) -> (StatusCode, Json<Value>) {
    state.record(ME, &headers);
    let expected = format!("Bearer {}", GOOD_TOKEN);
    match headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok()) {
        Some(value) if value == expected => (StatusCode::OK, Json(user(GOOD_USER))),
        _ => (
            StatusCode::UNAUTHORIZED,
            Json(json!({"detail": "Invalid or expired token"})),
        ),
    }
}

async fn start(State(state): Shared, headers: HeaderMap) -> (StatusCode, Json<Value>) {
    state.record(START, &headers);
    let status = StubState::status_of(&state.start_status);
    if status.is_success() {
        (status, Json(json!({"status": "starting", "message": "started"})))
    } else {
        (
            status,
            Json(json!({"detail": "Failed to start video system: no workers"})),
        )
    }
}

async fn end(State(state): Shared, headers: HeaderMap) -> (StatusCode, Json<Value>) {
    state.record(END, &headers);
    let status = StubState::status_of(&state.end_status);
    if status.is_success() {
        (status, Json(json!({"status": "ended"})))
    } else {
        (
            status,
            Json(json!({"detail": "Failed to end video system: boom"})),
        )
    }
}

async fn status(State(state): Shared, headers: HeaderMap) -> (StatusCode, Json<Value>) {
    state.record(STATUS, &headers);
    (
        StatusCode::OK,
        Json(json!({"status": "not_running", "message": "Video system is not currently running"})),
    )
}
