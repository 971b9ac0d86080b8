#![allow(dead_code)]

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use portal_auth::{CredentialPair, PortalClient, PortalConfig, Role};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use url::Url;

/// How the backend answers `POST /auth/refresh`.
#[derive(Debug, Clone)]
pub enum RefreshMode {
    /// Issue `fresh-<n>` where `n` counts refresh calls.
    Issue,
    Reject(StatusCode),
    /// 200 without an access token.
    Malformed,
}

pub struct Backend {
    refresh_calls: AtomicUsize,
    always_unauthorized_hits: AtomicUsize,
    valid: Mutex<HashSet<String>>,
    mode: Mutex<RefreshMode>,
    refresh_delay: Mutex<Duration>,
    refresh_tokens_seen: Mutex<Vec<String>>,
}

impl Backend {
    fn new() -> Self {
        Self {
            refresh_calls: AtomicUsize::new(0),
            always_unauthorized_hits: AtomicUsize::new(0),
            valid: Mutex::new(HashSet::new()),
            mode: Mutex::new(RefreshMode::Issue),
            refresh_delay: Mutex::new(Duration::ZERO),
            refresh_tokens_seen: Mutex::new(Vec::new()),
        }
    }

    pub fn accept(&self, token: &str) {
        self.valid.lock().unwrap().insert(token.to_string());
    }

    pub fn set_mode(&self, mode: RefreshMode) {
        *self.mode.lock().unwrap() = mode;
    }

    /// Hold every refresh response for `delay` so concurrent callers overlap.
    pub fn set_refresh_delay(&self, delay: Duration) {
        *self.refresh_delay.lock().unwrap() = delay;
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn always_unauthorized_hits(&self) -> usize {
        self.always_unauthorized_hits.load(Ordering::SeqCst)
    }

    pub fn refresh_tokens_seen(&self) -> Vec<String> {
        self.refresh_tokens_seen.lock().unwrap().clone()
    }
}

pub struct TestServer {
    pub addr: SocketAddr,
    pub backend: Arc<Backend>,
}

impl TestServer {
    pub async fn spawn() -> Self {
        let backend = Arc::new(Backend::new());
        let app = Router::new()
            .route("/api/classes", get(classes))
            .route("/api/echo", get(echo))
            .route("/api/always-401", get(always_unauthorized))
            .route("/auth/refresh", post(refresh))
            .route("/auth/login", post(login))
            .with_state(backend.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, backend }
    }

    pub fn base_url(&self) -> Url {
        format!("http://{}/", self.addr).parse().unwrap()
    }

    pub fn config(&self) -> PortalConfig {
        PortalConfig::new(self.base_url())
    }
}

/// Store a credential pair for `role` directly in the client's session.
pub async fn seed(client: &PortalClient, role: Role, access: &str, refresh: &str) {
    let pair = CredentialPair {
        access_token: access.to_string(),
        refresh_token: refresh.to_string(),
        access_expiry: Utc::now() + chrono::Duration::minutes(15),
        refresh_expiry: None,
    };
    client.session().store_pair(role, &pair).await.unwrap();
}

fn bearer(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::to_string)
}

async fn classes(State(backend): State<Arc<Backend>>, headers: HeaderMap) -> Response {
    match bearer(&headers) {
        Some(token) if backend.valid.lock().unwrap().contains(&token) => {
            Json(json!({ "token": token, "classes": ["7B", "8A"] })).into_response()
        }
        _ => StatusCode::UNAUTHORIZED.into_response(),
    }
}

async fn echo(headers: HeaderMap) -> Json<Value> {
    let authorization = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    Json(json!({ "authorization": authorization }))
}

async fn always_unauthorized(State(backend): State<Arc<Backend>>) -> StatusCode {
    backend.always_unauthorized_hits.fetch_add(1, Ordering::SeqCst);
    StatusCode::UNAUTHORIZED
}

async fn refresh(State(backend): State<Arc<Backend>>, Json(body): Json<Value>) -> Response {
    let n = backend.refresh_calls.fetch_add(1, Ordering::SeqCst) + 1;
    if let Some(token) = body.get("refresh_token").and_then(Value::as_str) {
        backend
            .refresh_tokens_seen
            .lock()
            .unwrap()
            .push(token.to_string());
    }

    let delay = *backend.refresh_delay.lock().unwrap();
    tokio::time::sleep(delay).await;

    let mode = backend.mode.lock().unwrap().clone();
    match mode {
        RefreshMode::Issue => {
            let token = format!("fresh-{n}");
            backend.accept(&token);
            Json(json!({ "access_token": token, "token_type": "bearer" })).into_response()
        }
        RefreshMode::Reject(status) => (status, "refresh token revoked").into_response(),
        RefreshMode::Malformed => Json(json!({ "token_type": "bearer" })).into_response(),
    }
}

async fn login(State(backend): State<Arc<Backend>>, Json(body): Json<Value>) -> Response {
    if body.get("password").and_then(Value::as_str) == Some("secret") {
        backend.accept("login-access");
        Json(json!({
            "access_token": "login-access",
            "refresh_token": "login-refresh",
            "expires_in": 900
        }))
        .into_response()
    } else {
        (StatusCode::UNAUTHORIZED, "invalid credentials").into_response()
    }
}
