//! Scripted in-memory transport for unit tests.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use crate::config::ClientConfig;
use crate::dispatcher::StreamKind;
use crate::error::{ClientError, ClientResult};
use crate::events::{AuthCompletion, AuthPrompt, AuthPromptHandler, SessionEventEmitter};
use crate::transport::{ApiRequest, ApiResponse, HttpMethod, Transport};

#[derive(Debug, Clone)]
enum Scripted {
    Respond { status: u16, body: Vec<u8> },
    Unreachable,
}

/// Answers each route from a FIFO script; the last step of a script
/// repeats forever. Unscripted routes answer 404.
#[derive(Default)]
pub struct MockTransport {
    scripts: Mutex<HashMap<String, VecDeque<Scripted>>>,
    latency: Mutex<HashMap<String, Duration>>,
    requests: Mutex<Vec<ApiRequest>>,
}

fn route_key(method: Option<HttpMethod>, path: &str) -> String {
    match method {
        Some(method) => format!("{} {}", method, path),
        None => path.to_string(),
    }
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, key: String, step: Scripted) {
        self.scripts
            .lock()
            .unwrap()
            .entry(key)
            .or_default()
            .push_back(step);
    }

    /// Appends a JSON response for `path`, any method.
    pub fn respond(&self, path: &str, status: u16, body: serde_json::Value) {
        self.push(
            route_key(None, path),
            Scripted::Respond {
                status,
                body: serde_json::to_vec(&body).unwrap(),
            },
        );
    }

    /// Appends a JSON response for `method path` only.
    pub fn respond_to(&self, method: HttpMethod, path: &str, status: u16, body: serde_json::Value) {
        self.push(
            route_key(Some(method), path),
            Scripted::Respond {
                status,
                body: serde_json::to_vec(&body).unwrap(),
            },
        );
    }

    /// Appends a connection failure for `path`.
    pub fn unreachable(&self, path: &str) {
        self.push(route_key(None, path), Scripted::Unreachable);
    }

    /// Drops every script for `path`, any method.
    pub fn clear(&self, path: &str) {
        self.scripts
            .lock()
            .unwrap()
            .retain(|key, _| key != path && !key.ends_with(&format!(" {}", path)));
    }

    /// Delays every answer on `path`.
    pub fn set_latency(&self, path: &str, latency: Duration) {
        self.latency.lock().unwrap().insert(path.to_string(), latency);
    }

    pub fn requests(&self) -> Vec<ApiRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Number of requests sent to `path`.
    pub fn count(&self, path: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.path == path)
            .count()
    }

    fn next_step(&self, request: &ApiRequest) -> Option<Scripted> {
        let mut scripts = self.scripts.lock().unwrap();
        for key in [route_key(Some(request.method), &request.path), route_key(None, &request.path)] {
            if let Some(script) = scripts.get_mut(&key) {
                if script.len() > 1 {
                    return script.pop_front();
                }
                if let Some(last) = script.front() {
                    return Some(last.clone());
                }
            }
        }
        None
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn execute(&self, request: ApiRequest) -> ClientResult<ApiResponse> {
        self.requests.lock().unwrap().push(request.clone());

        let latency = self.latency.lock().unwrap().get(&request.path).copied();
        let step = self.next_step(&request);

        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        match step {
            Some(Scripted::Respond { status, body }) => Ok(ApiResponse { status, body }),
            Some(Scripted::Unreachable) => {
                Err(ClientError::ConnectionFailed("connection refused".into()))
            }
            None => Ok(ApiResponse {
                status: 404,
                body: Vec::new(),
            }),
        }
    }
}

/// Session token whose `exp` is `valid_for` from now.
pub fn mint_token(valid_for: ChronoDuration) -> String {
    let exp = (Utc::now() + valid_for).timestamp();
    encode(
        &Header::default(),
        &json!({ "exp": exp, "sub": "device" }),
        &EncodingKey::from_secret(b"backend-key"),
    )
    .unwrap()
}

/// Successful `/v1/auth/token` body.
pub fn auth_ok(valid_for: ChronoDuration) -> serde_json::Value {
    json!({
        "Token": mint_token(valid_for),
        "Secret": "session-secret",
        "UserId": "user-1",
    })
}

/// Valid legacy production config with a 1s auth retry interval.
pub fn legacy_config() -> ClientConfig {
    let mut config = ClientConfig::default();
    config.api.base_url = "https://api.test".into();
    config.credentials.app_id = Some("550e8400-e29b-41d4-a716-446655440000".into());
    config.credentials.auth_secret = Some("app-secret".into());
    config.device.id = "device-1".into();
    config.auth.retry_interval_secs = 1;
    config
}

/// Records everything the SDK reports to the host.
#[derive(Default)]
pub struct RecordingHost {
    prompts: Mutex<Vec<AuthPrompt>>,
    completions: Mutex<Vec<AuthCompletion>>,
    evictions: Mutex<Vec<(StreamKind, usize)>>,
}

impl RecordingHost {
    pub fn prompts(&self) -> Vec<AuthPrompt> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn completions(&self) -> Vec<AuthCompletion> {
        self.completions.lock().unwrap().clone()
    }

    pub fn evictions(&self) -> Vec<(StreamKind, usize)> {
        self.evictions.lock().unwrap().clone()
    }
}

impl AuthPromptHandler for RecordingHost {
    fn show_prompt(&self, prompt: &AuthPrompt) {
        self.prompts.lock().unwrap().push(prompt.clone());
    }
}

impl SessionEventEmitter for RecordingHost {
    fn emit_auth_complete(&self, completion: &AuthCompletion) {
        self.completions.lock().unwrap().push(completion.clone());
    }

    fn emit_queue_evicted(&self, stream: StreamKind, count: usize) {
        self.evictions.lock().unwrap().push((stream, count));
    }
}
