//! # Wire Protocol
//!
//! Request and response bodies exchanged with the Lumen backend.
//!
//! ## Endpoints
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Method  Path                  Signed  Body                             │
//! │  ──────  ────                  ──────  ────                             │
//! │  POST    /v1/auth/token        no      AuthRequest → AuthResponse       │
//! │  GET     /v1/storage/config    yes     → RemoteConfig                   │
//! │  POST    /v1/storage           yes     StorageBatch                     │
//! │  GET     /v1/storage?name&scope yes    → StorageBatch                   │
//! │  DELETE  /v1/storage?scope&name yes                                     │
//! │  POST    /v1/events            yes     StorageBatch                     │
//! │  POST    /v1/telemetry         yes     StorageBatch                     │
//! │  POST    /v1/logs              yes     StorageBatch                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Requests use camelCase keys. The auth response uses PascalCase keys,
//! which is also the shape of the hand-off bundle.

use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};

use lumen_core::{
    AuthMechanism, BatchEntry, BuildType, Credentials, KeepPolicy, Module, Record,
    SessionIdentity, SessionProfile, StorageScope,
};

use crate::config::DeviceConfig;
use crate::error::{ClientError, ClientResult};

pub const AUTH_TOKEN_PATH: &str = "/v1/auth/token";
pub const STORAGE_CONFIG_PATH: &str = "/v1/storage/config";
pub const STORAGE_PATH: &str = "/v1/storage";
pub const EVENTS_PATH: &str = "/v1/events";
pub const TELEMETRY_PATH: &str = "/v1/telemetry";
pub const LOGS_PATH: &str = "/v1/logs";

// =============================================================================
// Primary Auth
// =============================================================================

/// Body of `POST /v1/auth/token`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub org_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub org_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_secret: Option<String>,
    pub build_type: String,
    pub device_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub tags: Vec<String>,
    pub session_id: String,
    pub partner: String,
    pub ip_address: String,
    pub device_model: String,
    pub os_version: String,
    pub app_version: String,
    pub sdk_version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_mechanism: Option<AuthMechanism>,
}

impl AuthRequest {
    /// Builds the request for the active credential mode.
    ///
    /// Org-identifying fields are only included when `build_type`
    /// transmits them. The legacy secret is always sent.
    pub fn build(
        credentials: &Credentials,
        build_type: BuildType,
        identity: &SessionIdentity,
        device: &DeviceConfig,
        mechanism: Option<&AuthMechanism>,
    ) -> Self {
        let mut request = AuthRequest {
            build_type: build_type.as_str().to_string(),
            device_id: identity.device_id.clone(),
            user_id: device.user_id.clone(),
            tags: identity.tags.clone(),
            session_id: identity.session_id.clone(),
            partner: device.partner.clone(),
            ip_address: device.ip_address.clone(),
            device_model: device.model.clone(),
            os_version: format!("{} {}", std::env::consts::OS, std::env::consts::ARCH),
            app_version: device.app_version.clone(),
            sdk_version: lumen_core::SDK_VERSION.to_string(),
            auth_mechanism: mechanism.cloned(),
            ..Default::default()
        };

        match credentials {
            Credentials::Legacy(legacy) => {
                request.app_id = Some(legacy.app_id.clone());
                request.auth_secret = Some(legacy.auth_secret.clone());
                if build_type.transmits_org() {
                    request.org_id = legacy.org_id.clone();
                }
            }
            Credentials::Token(token) => {
                request.app_token = Some(token.app_token.clone());
                if build_type.transmits_org() {
                    request.org_token = token.org_token.clone();
                }
            }
        }

        request
    }
}

/// Body of a successful `POST /v1/auth/token`, and of a hand-off bundle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AuthResponse {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub app_id: Option<String>,
    #[serde(default)]
    pub package_name: Option<String>,
    #[serde(default)]
    pub user_data: Option<String>,
    #[serde(default)]
    pub modules: Option<Vec<Module>>,
}

impl AuthResponse {
    /// Returns `(token, secret)`, failing when either is missing or empty.
    pub fn credentials(&self, endpoint: &str) -> ClientResult<(String, String)> {
        let token = non_empty(&self.token).ok_or_else(|| missing(endpoint, "Token"))?;
        let secret = non_empty(&self.secret).ok_or_else(|| missing(endpoint, "Secret"))?;
        Ok((token, secret))
    }

    /// True when both token and secret are present.
    pub fn has_credentials(&self) -> bool {
        non_empty(&self.token).is_some() && non_empty(&self.secret).is_some()
    }

    pub fn profile(&self) -> SessionProfile {
        SessionProfile {
            user_id: self.user_id.clone(),
            app_id: self.app_id.clone(),
            package_name: self.package_name.clone(),
            user_data: self.user_data.clone(),
            modules: self.modules.clone().unwrap_or_default(),
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.as_ref().filter(|v| !v.is_empty()).cloned()
}

fn missing(endpoint: &str, field: &str) -> ClientError {
    ClientError::MissingField {
        endpoint: endpoint.to_string(),
        field: field.to_string(),
    }
}

// =============================================================================
// Remote Config
// =============================================================================

/// Body of `GET /v1/storage/config`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteConfig {
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub retry_interval_secs: Option<u64>,
    #[serde(default)]
    pub flush_interval_secs: Option<u64>,
    #[serde(default)]
    pub batch_size: Option<usize>,
    #[serde(default)]
    pub max_queue_size: Option<usize>,
    #[serde(default)]
    pub auth_mechanism: Option<AuthMechanism>,
}

// =============================================================================
// Batches
// =============================================================================

/// One entry as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireEntry {
    /// ISO-8601 UTC with milliseconds.
    pub timestamp: String,
    pub keep_policy: KeepPolicy,
    pub name: String,
    pub data: Vec<Record>,
    pub scope: StorageScope,
}

impl From<&BatchEntry> for WireEntry {
    fn from(entry: &BatchEntry) -> Self {
        WireEntry {
            timestamp: entry.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            keep_policy: entry.keep_policy,
            name: entry.name.clone(),
            data: vec![entry.payload.clone()],
            scope: entry.scope,
        }
    }
}

/// Envelope shared by every upload stream and by storage reads.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageBatch {
    #[serde(default)]
    pub data: Vec<WireEntry>,
}

impl StorageBatch {
    pub fn from_entries<'a>(entries: impl IntoIterator<Item = &'a BatchEntry>) -> Self {
        StorageBatch {
            data: entries.into_iter().map(WireEntry::from).collect(),
        }
    }
}
