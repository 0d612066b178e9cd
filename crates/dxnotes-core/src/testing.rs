//! In-memory notes server for unit tests.
//!
//! Mimics the token endpoints (form login, cookie-backed refresh, logout) and
//! treats every other path as protected: it answers 200 only when the bearer
//! token matches the most recently issued one. One-shot scripted responses
//! take priority over that logic.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use reqwest::{Method, StatusCode};

use crate::api::{ApiError, ApiRequest, ApiResponse, HttpTransport, RequestBody};

pub(crate) const PASSWORD: &str = "hunter2";

#[derive(Debug, Clone)]
pub(crate) enum Scripted {
    Status(u16, String),
    NetworkFailure,
}

#[derive(Debug, Clone)]
pub(crate) struct RecordedRequest {
    pub method: Method,
    pub path: String,
    pub bearer: Option<String>,
    pub body: RequestBody,
}

#[derive(Default)]
struct ServerState {
    issued: u32,
    valid_token: Option<String>,
    refresh_cookie: bool,
    scripts: HashMap<String, VecDeque<Scripted>>,
    bodies: HashMap<String, String>,
    requests: Vec<RecordedRequest>,
}

#[derive(Default)]
pub(crate) struct MockServer {
    state: Mutex<ServerState>,
}

impl MockServer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().expect("mock server state poisoned")
    }

    /// Queue a one-shot response for the next request to `path`
    pub fn script(&self, path: &str, response: Scripted) {
        self.lock()
            .scripts
            .entry(path.to_string())
            .or_default()
            .push_back(response);
    }

    /// Body returned for authorized requests to `path`
    pub fn respond_with(&self, path: &str, body: &str) {
        self.lock().bodies.insert(path.to_string(), body.to_string());
    }

    pub fn requests_to(&self, path: &str) -> Vec<RecordedRequest> {
        self.lock()
            .requests
            .iter()
            .filter(|r| r.path == path)
            .cloned()
            .collect()
    }

    pub fn count(&self, path: &str) -> usize {
        self.requests_to(path).len()
    }

    /// Server-side expiry of the access token; refresh still works
    pub fn expire_access_token(&self) {
        self.lock().valid_token = None;
    }

    /// Server-side revocation of the refresh cookie
    pub fn revoke_refresh(&self) {
        self.lock().refresh_cookie = false;
    }

    /// Pretend a refresh cookie survives from an earlier visit
    pub fn grant_refresh_cookie(&self) {
        self.lock().refresh_cookie = true;
    }

    pub fn refresh_allowed(&self) -> bool {
        self.lock().refresh_cookie
    }

    fn handle(&self, request: &ApiRequest) -> Scripted {
        let mut state = self.lock();
        if let Some(scripted) = state.scripts.get_mut(&request.path).and_then(VecDeque::pop_front) {
            return scripted;
        }

        match request.path.as_str() {
            "/token" => {
                let accepted = matches!(
                    &request.body,
                    RequestBody::Form(pairs) if pairs.iter().any(|(k, v)| k == "password" && v == PASSWORD)
                );
                if accepted {
                    state.refresh_cookie = true;
                    Self::issue(&mut state)
                } else {
                    Scripted::Status(401, r#"{"detail":"Incorrect username or password"}"#.to_string())
                }
            }
            "/token/refresh" => {
                if state.refresh_cookie {
                    Self::issue(&mut state)
                } else {
                    Scripted::Status(401, r#"{"detail":"Refresh token missing"}"#.to_string())
                }
            }
            "/logout" => {
                state.refresh_cookie = false;
                state.valid_token = None;
                Scripted::Status(200, "{}".to_string())
            }
            path => {
                let bearer = request.bearer_token();
                if bearer.is_some() && bearer == state.valid_token.as_deref() {
                    let body = state.bodies.get(path).cloned().unwrap_or_else(|| r#"{"ok":true}"#.to_string());
                    Scripted::Status(200, body)
                } else {
                    Scripted::Status(401, r#"{"detail":"Not authenticated"}"#.to_string())
                }
            }
        }
    }

    fn issue(state: &mut ServerState) -> Scripted {
        state.issued += 1;
        let token = format!("token-{}", state.issued);
        state.valid_token = Some(token.clone());
        Scripted::Status(200, format!(r#"{{"access_token":"{}"}}"#, token))
    }
}

/// A genuine reqwest error without touching the network
fn network_error() -> reqwest::Error {
    reqwest::Client::new()
        .get("not a url")
        .build()
        .expect_err("relative URL should not build")
}

#[async_trait]
impl HttpTransport for MockServer {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        self.lock().requests.push(RecordedRequest {
            method: request.method.clone(),
            path: request.path.clone(),
            bearer: request.bearer_token().map(str::to_string),
            body: request.body.clone(),
        });

        // Suspend like a real round trip so concurrent callers interleave
        tokio::task::yield_now().await;

        match self.handle(&request) {
            Scripted::Status(code, body) => Ok(ApiResponse::new(
                StatusCode::from_u16(code).expect("valid status code"),
                body,
            )),
            Scripted::NetworkFailure => Err(ApiError::Network(network_error())),
        }
    }
}
