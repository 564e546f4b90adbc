//! # HTTP Transport
//!
//! Request/response plumbing between the SDK and the backend.
//!
//! ## Layering
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  AuthSession / BatchDispatcher / StorageClient                          │
//! │          │  typed bodies                                                │
//! │          ▼                                                              │
//! │  ┌────────────────┐   encode/decode   ┌────────────────┐                │
//! │  │   ApiClient    │ ◄───────────────► │   WireCodec    │                │
//! │  │                │                   │   (JsonCodec)  │                │
//! │  │ status → error │                   └────────────────┘                │
//! │  └───────┬────────┘                                                     │
//! │          │  ApiRequest / ApiResponse                                    │
//! │          ▼                                                              │
//! │  ┌────────────────┐                                                     │
//! │  │ dyn Transport  │  HttpTransport (reqwest) in production,             │
//! │  │                │  a scripted mock in tests                           │
//! │  └────────────────┘                                                     │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The transport never retries. Retry policy belongs to the caller, which
//! decides from [`ClientError::is_retryable`].

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::codec::{JsonCodec, WireCodec};
use crate::error::{ClientError, ClientResult};

// =============================================================================
// Request / Response
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Delete,
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HttpMethod::Get => write!(f, "GET"),
            HttpMethod::Post => write!(f, "POST"),
            HttpMethod::Delete => write!(f, "DELETE"),
        }
    }
}

/// A request relative to the configured base URL.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: HttpMethod,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

impl ApiRequest {
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        ApiRequest {
            method,
            path: path.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn with_query(mut self, key: &str, value: impl Into<String>) -> Self {
        self.query.push((key.to_string(), value.into()));
        self
    }

    pub fn with_headers(mut self, headers: impl IntoIterator<Item = (String, String)>) -> Self {
        self.headers.extend(headers);
        self
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = Some(body);
        self
    }

    /// Value of the first header named `name` (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Raw response; any status, including non-2xx.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

// =============================================================================
// Transport Trait
// =============================================================================

/// Executes one request. Implementations report unreachable hosts and
/// timeouts as errors and hand back every other outcome as a response.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, request: ApiRequest) -> ClientResult<ApiResponse>;
}

// =============================================================================
// reqwest Transport
// =============================================================================

/// HTTPS transport backed by a shared `reqwest::Client`.
pub struct HttpTransport {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(base_url: &str, timeout: Duration) -> ClientResult<Self> {
        // Validate once so per-request joins cannot fail on the base.
        Url::parse(base_url)?;

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ClientError::InvalidConfig(format!("HTTP client: {}", e)))?;

        Ok(HttpTransport {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    fn url_for(&self, request: &ApiRequest) -> ClientResult<Url> {
        let mut url = Url::parse(&format!("{}{}", self.base_url, request.path))?;
        if !request.query.is_empty() {
            url.query_pairs_mut().extend_pairs(request.query.iter());
        }
        Ok(url)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn execute(&self, request: ApiRequest) -> ClientResult<ApiResponse> {
        let url = self.url_for(&request)?;

        let mut builder = match request.method {
            HttpMethod::Get => self.client.get(url),
            HttpMethod::Post => self.client.post(url),
            HttpMethod::Delete => self.client.delete(url),
        };
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(|e| self.map_error(e))?;
        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(|e| self.map_error(e))?.to_vec();

        Ok(ApiResponse { status, body })
    }
}

impl HttpTransport {
    fn map_error(&self, err: reqwest::Error) -> ClientError {
        if err.is_timeout() {
            ClientError::Timeout(self.timeout.as_secs())
        } else {
            ClientError::ConnectionFailed(err.to_string())
        }
    }
}

// =============================================================================
// API Client
// =============================================================================

/// Typed request helper over a [`Transport`] and a [`WireCodec`].
#[derive(Clone)]
pub struct ApiClient {
    transport: Arc<dyn Transport>,
    codec: Arc<dyn WireCodec>,
}

impl ApiClient {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::with_codec(transport, Arc::new(JsonCodec))
    }

    pub fn with_codec(transport: Arc<dyn Transport>, codec: Arc<dyn WireCodec>) -> Self {
        ApiClient { transport, codec }
    }

    /// Encodes `value` as a request body.
    pub fn encode<T: Serialize>(&self, value: &T) -> ClientResult<Vec<u8>> {
        let value = serde_json::to_value(value)
            .map_err(|e| ClientError::SerializationFailed(e.to_string()))?;
        self.codec.encode(&value)
    }

    /// Decodes a response body into `T`.
    pub fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> ClientResult<T> {
        let value = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            self.codec.decode(bytes)?
        };
        serde_json::from_value(value).map_err(|e| ClientError::DeserializationFailed(e.to_string()))
    }

    /// Sends `request`, mapping non-2xx statuses to [`ClientError::Http`].
    pub async fn send(&self, mut request: ApiRequest) -> ClientResult<Vec<u8>> {
        if request.body.is_some() && request.header("Content-Type").is_none() {
            request
                .headers
                .push(("Content-Type".to_string(), self.codec.content_type().to_string()));
        }

        let endpoint = request.path.clone();
        debug!(method = %request.method, endpoint = %endpoint, "Sending request");

        let response = self.transport.execute(request).await?;
        if !response.is_success() {
            return Err(ClientError::Http {
                endpoint,
                status: response.status,
                body: String::from_utf8_lossy(&response.body).into_owned(),
            });
        }

        Ok(response.body)
    }
}
