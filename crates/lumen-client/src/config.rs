//! # Client Configuration
//!
//! Configuration management for the SDK.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     LUMEN_BASE_URL=https://api.lumen.example                           │
//! │     LUMEN_APP_ID=550e8400-...                                          │
//! │                                                                         │
//! │  2. Server overrides (GET /v1/storage/config, after primary auth)      │
//! │     retry/batch/cache tunables only, applied per flush                 │
//! │                                                                         │
//! │  3. TOML Config File                                                   │
//! │     ~/.config/lumen/lumen.toml (Linux)                                 │
//! │     ~/Library/Application Support/io.lumen.sdk/lumen.toml (macOS)      │
//! │                                                                         │
//! │  4. Default Values (lowest priority)                                   │
//! │     production build, legacy mode, auto-generated device id            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! [api]
//! base_url = "https://api.lumen.example"
//!
//! [credentials]
//! mode = "legacy"
//! build_type = "development"
//! app_id = "550e8400-e29b-41d4-a716-446655440000"
//! org_id = "6ba7b810-9dad-11d1-80b4-00c04fd430c8"
//! auth_secret = "..."
//!
//! [dispatch]
//! batch_size = 50
//! flush_interval_secs = 10
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use lumen_core::{
    BuildType, CredentialMode, Credentials, LegacyCredentials, TokenCredentials, ValidationError,
};

use crate::error::{ClientError, ClientResult};
use crate::protocol::RemoteConfig;

// =============================================================================
// API Settings
// =============================================================================

/// Backend endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiSettings {
    /// Base URL every endpoint path is joined onto.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Per-request timeout (seconds).
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_base_url() -> String {
    "https://api.lumen.example".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

impl Default for ApiSettings {
    fn default() -> Self {
        ApiSettings {
            base_url: default_base_url(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

// =============================================================================
// Credential Settings
// =============================================================================

/// Raw credential fields as configured.
///
/// Only the fields of `mode` may be set; [`CredentialSettings::credentials`]
/// rejects a configuration that mixes modes.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct CredentialSettings {
    #[serde(default)]
    pub mode: CredentialMode,

    #[serde(default)]
    pub build_type: BuildType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_secret: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_token: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org_token: Option<String>,
}

impl std::fmt::Debug for CredentialSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialSettings")
            .field("mode", &self.mode)
            .field("build_type", &self.build_type)
            .field("app_id", &self.app_id)
            .field("org_id", &self.org_id)
            .finish_non_exhaustive()
    }
}

impl CredentialSettings {
    /// Builds the credentials of the configured mode.
    ///
    /// Presence and shape are checked later by
    /// [`lumen_core::validation::validate_credentials`]; this only enforces
    /// that the inactive mode's fields are unset.
    pub fn credentials(&self) -> Result<Credentials, ValidationError> {
        let set = |value: &Option<String>| value.as_deref().is_some_and(|v| !v.trim().is_empty());

        match self.mode {
            CredentialMode::Legacy => {
                for (field, value) in [("app_token", &self.app_token), ("org_token", &self.org_token)] {
                    if set(value) {
                        return Err(mixed(field, self.mode));
                    }
                }
                Ok(Credentials::Legacy(LegacyCredentials {
                    app_id: self.app_id.clone().unwrap_or_default(),
                    org_id: self.org_id.clone().filter(|v| !v.trim().is_empty()),
                    auth_secret: self.auth_secret.clone().unwrap_or_default(),
                }))
            }
            CredentialMode::Token => {
                for (field, value) in [
                    ("app_id", &self.app_id),
                    ("org_id", &self.org_id),
                    ("auth_secret", &self.auth_secret),
                ] {
                    if set(value) {
                        return Err(mixed(field, self.mode));
                    }
                }
                Ok(Credentials::Token(TokenCredentials {
                    app_token: self.app_token.clone().unwrap_or_default(),
                    org_token: self.org_token.clone().filter(|v| !v.trim().is_empty()),
                }))
            }
        }
    }
}

fn mixed(field: &str, mode: CredentialMode) -> ValidationError {
    ValidationError::MixedMode {
        field: field.to_string(),
        mode: mode.to_string(),
    }
}

// =============================================================================
// Device Configuration
// =============================================================================

/// Device facts reported on every primary auth request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Unique device identifier (UUID v4).
    /// Auto-generated on first run if not provided.
    pub id: String,

    #[serde(default)]
    pub model: String,

    #[serde(default)]
    pub partner: String,

    #[serde(default)]
    pub ip_address: String,

    #[serde(default = "default_app_version")]
    pub app_version: String,

    /// End-user id, when the host already knows who is signed in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    #[serde(default)]
    pub tags: Vec<String>,
}

fn default_app_version() -> String {
    "0.0.0".to_string()
}

impl Default for DeviceConfig {
    fn default() -> Self {
        DeviceConfig {
            id: Uuid::new_v4().to_string(),
            model: String::new(),
            partner: String::new(),
            ip_address: String::new(),
            app_version: default_app_version(),
            user_id: None,
            tags: Vec::new(),
        }
    }
}

// =============================================================================
// Auth Settings
// =============================================================================

/// Primary auth retry and refresh tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSettings {
    /// Maximum primary auth attempts. Set to 0 for infinite retries.
    #[serde(default = "default_auth_max_retries")]
    pub max_retries: u32,

    /// Fixed delay between primary auth attempts (seconds).
    #[serde(default = "default_auth_retry_interval")]
    pub retry_interval_secs: u64,

    /// How often the refresh poller checks remaining validity (seconds).
    #[serde(default = "default_refresh_check_interval")]
    pub refresh_check_interval_secs: u64,

    /// Refresh once less than this much validity is left (seconds).
    #[serde(default = "default_refresh_threshold")]
    pub refresh_threshold_secs: u64,

    /// Attempts per refresh before leaving the token to expire. Must be
    /// at least 1; unlike `max_retries`, zero is not "unlimited".
    #[serde(default = "default_refresh_max_retries")]
    pub refresh_max_retries: u32,

    /// Validity assumed for hand-off credentials (hours).
    #[serde(default = "default_handoff_validity")]
    pub handoff_validity_hours: u64,
}

fn default_auth_max_retries() -> u32 {
    0 // Infinite
}
fn default_auth_retry_interval() -> u64 {
    5
}
fn default_refresh_check_interval() -> u64 {
    60
}
fn default_refresh_threshold() -> u64 {
    300
}
fn default_refresh_max_retries() -> u32 {
    3
}
fn default_handoff_validity() -> u64 {
    8
}

impl Default for AuthSettings {
    fn default() -> Self {
        AuthSettings {
            max_retries: default_auth_max_retries(),
            retry_interval_secs: default_auth_retry_interval(),
            refresh_check_interval_secs: default_refresh_check_interval(),
            refresh_threshold_secs: default_refresh_threshold(),
            refresh_max_retries: default_refresh_max_retries(),
            handoff_validity_hours: default_handoff_validity(),
        }
    }
}

impl AuthSettings {
    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_secs)
    }

    pub fn refresh_check_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_check_interval_secs)
    }

    pub fn refresh_threshold(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.refresh_threshold_secs as i64)
    }

    pub fn handoff_validity(&self) -> chrono::Duration {
        chrono::Duration::hours(self.handoff_validity_hours as i64)
    }

    /// Copy with server-supplied retry tunables applied.
    pub fn with_overrides(&self, remote: &RemoteConfig) -> AuthSettings {
        AuthSettings {
            max_retries: remote.max_retries.unwrap_or(self.max_retries),
            retry_interval_secs: remote
                .retry_interval_secs
                .filter(|v| *v > 0)
                .unwrap_or(self.retry_interval_secs),
            ..self.clone()
        }
    }
}

// =============================================================================
// Dispatch Settings
// =============================================================================

/// Batching tunables shared by every upload stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchSettings {
    /// Entries per send attempt; reaching it triggers an immediate flush.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Periodic flush interval (seconds).
    #[serde(default = "default_flush_interval")]
    pub flush_interval_secs: u64,

    /// Delay before retrying a failed send (seconds).
    #[serde(default = "default_dispatch_retry_interval")]
    pub retry_interval_secs: u64,

    /// Minimum spacing between send attempts (milliseconds).
    #[serde(default = "default_send_cooldown")]
    pub send_cooldown_ms: u64,

    /// Queue ceiling; oldest entries are evicted beyond it. 0 = unbounded.
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,

    /// Keep confirmed entries in memory for host-side inspection.
    #[serde(default)]
    pub retain_after_sent: bool,
}

fn default_batch_size() -> usize {
    50
}
fn default_flush_interval() -> u64 {
    10
}
fn default_dispatch_retry_interval() -> u64 {
    15
}
fn default_send_cooldown() -> u64 {
    1_000
}
fn default_max_queue_size() -> usize {
    5_000
}

impl Default for DispatchSettings {
    fn default() -> Self {
        DispatchSettings {
            batch_size: default_batch_size(),
            flush_interval_secs: default_flush_interval(),
            retry_interval_secs: default_dispatch_retry_interval(),
            send_cooldown_ms: default_send_cooldown(),
            max_queue_size: default_max_queue_size(),
            retain_after_sent: false,
        }
    }
}

impl DispatchSettings {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_secs)
    }

    pub fn send_cooldown(&self) -> Duration {
        Duration::from_millis(self.send_cooldown_ms)
    }

    /// Copy with server-supplied batching tunables applied.
    ///
    /// Zero values from the server are ignored rather than disabling
    /// batching outright.
    pub fn with_overrides(&self, remote: &RemoteConfig) -> DispatchSettings {
        DispatchSettings {
            batch_size: remote.batch_size.filter(|v| *v > 0).unwrap_or(self.batch_size),
            flush_interval_secs: remote
                .flush_interval_secs
                .filter(|v| *v > 0)
                .unwrap_or(self.flush_interval_secs),
            retry_interval_secs: remote
                .retry_interval_secs
                .filter(|v| *v > 0)
                .unwrap_or(self.retry_interval_secs),
            max_queue_size: remote.max_queue_size.unwrap_or(self.max_queue_size),
            ..self.clone()
        }
    }
}

// =============================================================================
// Main Client Configuration
// =============================================================================

/// Complete client configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default)]
    pub api: ApiSettings,

    #[serde(default)]
    pub credentials: CredentialSettings,

    #[serde(default)]
    pub device: DeviceConfig,

    #[serde(default)]
    pub auth: AuthSettings,

    #[serde(default)]
    pub dispatch: DispatchSettings,
}

impl ClientConfig {
    /// Creates a new config with defaults and a generated device ID.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (lumen.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> ClientResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading client config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load client config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> ClientResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| ClientError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;

        info!(?path, "Client config saved");
        Ok(())
    }

    /// Validates the non-credential parts of the configuration.
    ///
    /// Credentials are checked by `AuthSession::authenticate` so that a bad
    /// credential is reported through the completion notification.
    pub fn validate(&self) -> ClientResult<()> {
        let base = self.api.base_url.trim();
        if base.is_empty() {
            return Err(ClientError::InvalidConfig("api.base_url is required".into()));
        }

        let url = url::Url::parse(base)?;
        if url.scheme() != "https" && url.scheme() != "http" {
            return Err(ClientError::InvalidUrl(format!(
                "Base URL must start with http:// or https://, got: {}",
                base
            )));
        }

        if self.device.id.trim().is_empty() {
            return Err(ClientError::InvalidConfig("device.id is required".into()));
        }

        if self.dispatch.batch_size == 0 {
            return Err(ClientError::InvalidConfig(
                "dispatch.batch_size must be greater than 0".into(),
            ));
        }

        for (name, value) in [
            ("dispatch.flush_interval_secs", self.dispatch.flush_interval_secs),
            ("dispatch.retry_interval_secs", self.dispatch.retry_interval_secs),
            ("auth.retry_interval_secs", self.auth.retry_interval_secs),
            ("auth.refresh_check_interval_secs", self.auth.refresh_check_interval_secs),
            ("auth.refresh_max_retries", u64::from(self.auth.refresh_max_retries)),
        ] {
            if value == 0 {
                return Err(ClientError::InvalidConfig(format!(
                    "{} must be greater than 0",
                    name
                )));
            }
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("LUMEN_BASE_URL") {
            debug!(url = %url, "Overriding base URL from environment");
            self.api.base_url = url;
        }

        if let Ok(mode) = std::env::var("LUMEN_CREDENTIAL_MODE") {
            match mode.to_lowercase().as_str() {
                "legacy" => self.credentials.mode = CredentialMode::Legacy,
                "token" => self.credentials.mode = CredentialMode::Token,
                _ => warn!(mode = %mode, "Unknown credential mode in environment"),
            }
        }

        if let Ok(build_type) = std::env::var("LUMEN_BUILD_TYPE") {
            match build_type.parse() {
                Ok(parsed) => self.credentials.build_type = parsed,
                Err(_) => warn!(build_type = %build_type, "Unknown build type in environment"),
            }
        }

        let secrets = [
            ("LUMEN_APP_ID", &mut self.credentials.app_id),
            ("LUMEN_ORG_ID", &mut self.credentials.org_id),
            ("LUMEN_AUTH_SECRET", &mut self.credentials.auth_secret),
            ("LUMEN_APP_TOKEN", &mut self.credentials.app_token),
            ("LUMEN_ORG_TOKEN", &mut self.credentials.org_token),
        ];
        for (var, slot) in secrets {
            if let Ok(value) = std::env::var(var) {
                debug!(var, "Overriding credential from environment");
                *slot = Some(value);
            }
        }

        if let Ok(id) = std::env::var("LUMEN_DEVICE_ID") {
            debug!(device_id = %id, "Overriding device ID from environment");
            self.device.id = id;
        }

        if let Ok(user_id) = std::env::var("LUMEN_USER_ID") {
            self.device.user_id = Some(user_id);
        }
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("io", "lumen", "sdk")
            .map(|dirs| dirs.config_dir().join("lumen.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    pub fn device_id(&self) -> &str {
        &self.device.id
    }

    pub fn build_type(&self) -> BuildType {
        self.credentials.build_type
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.api.request_timeout_secs)
    }
}
