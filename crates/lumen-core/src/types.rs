//! # Domain Types
//!
//! Credentials, session token, session identity and the batch entry model.
//!
//! ## Credential Modes
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Credentials (exactly one per session)                │
//! │                                                                         │
//! │  LEGACY                              TOKEN                              │
//! │  ──────                              ─────                              │
//! │  app_id       UUID, required         app_token  3-segment, required     │
//! │  org_id       UUID, per BuildType    org_token  3-segment, per BuildType│
//! │  auth_secret  required                                                  │
//! │                                                                         │
//! │  BuildType::Production        org field optional, never transmitted    │
//! │  BuildType::Development       org field required, transmitted          │
//! │  BuildType::ProductionCustom  org field required, transmitted          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque record carried by a batch entry.
pub type Record = serde_json::Value;

// =============================================================================
// Build Type
// =============================================================================

/// Deployment mode controlling which identifying fields are sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildType {
    #[default]
    Production,
    Development,
    ProductionCustom,
}

impl BuildType {
    /// Whether an org credential must be configured.
    pub fn requires_org(&self) -> bool {
        !matches!(self, BuildType::Production)
    }

    /// Whether org-identifying fields are put on the wire.
    pub fn transmits_org(&self) -> bool {
        self.requires_org()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BuildType::Production => "production",
            BuildType::Development => "development",
            BuildType::ProductionCustom => "production_custom",
        }
    }
}

impl std::fmt::Display for BuildType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BuildType {
    type Err = crate::ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "production" | "prod" => Ok(BuildType::Production),
            "development" | "dev" => Ok(BuildType::Development),
            "production_custom" | "productioncustom" => Ok(BuildType::ProductionCustom),
            _ => Err(crate::ValidationError::NotAllowed {
                field: "build_type".to_string(),
                allowed: vec![
                    "production".to_string(),
                    "development".to_string(),
                    "production_custom".to_string(),
                ],
            }),
        }
    }
}

// =============================================================================
// Credentials
// =============================================================================

/// Which credential mode the configuration selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialMode {
    #[default]
    Legacy,
    Token,
}

impl std::fmt::Display for CredentialMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CredentialMode::Legacy => write!(f, "legacy"),
            CredentialMode::Token => write!(f, "token"),
        }
    }
}

/// Legacy `{app_id, org_id, auth_secret}` triple.
#[derive(Clone, PartialEq, Eq)]
pub struct LegacyCredentials {
    pub app_id: String,
    pub org_id: Option<String>,
    pub auth_secret: String,
}

/// Signed `{app_token, org_token}` pair.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenCredentials {
    pub app_token: String,
    pub org_token: Option<String>,
}

/// The credentials a session authenticates with.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    Legacy(LegacyCredentials),
    Token(TokenCredentials),
}

impl Credentials {
    pub fn mode(&self) -> CredentialMode {
        match self {
            Credentials::Legacy(_) => CredentialMode::Legacy,
            Credentials::Token(_) => CredentialMode::Token,
        }
    }
}

// Secrets stay out of logs even when a caller uses `{:?}`.
impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credentials::Legacy(c) => f
                .debug_struct("Legacy")
                .field("app_id", &c.app_id)
                .field("org_id", &c.org_id)
                .field("auth_secret", &"<redacted>")
                .finish(),
            Credentials::Token(c) => f
                .debug_struct("Token")
                .field("app_token", &"<redacted>")
                .field("has_org_token", &c.org_token.is_some())
                .finish(),
        }
    }
}

// =============================================================================
// Secondary Authentication
// =============================================================================

/// Step-up challenge descriptor returned by the server after primary auth.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthMechanism {
    /// Challenge kind, e.g. `"pin"`, `"email"`, `"text"`.
    #[serde(rename = "type")]
    pub mechanism_type: String,
    pub prompt: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub input_source: String,
}

impl AuthMechanism {
    /// Copy of this mechanism with the prompt replaced by the user's answer.
    pub fn with_answer(&self, answer: &str) -> Self {
        AuthMechanism {
            prompt: answer.to_string(),
            ..self.clone()
        }
    }
}

// =============================================================================
// Session Token
// =============================================================================

/// Token, secret and the expiry decoded from the token's claims.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionToken {
    pub token: String,
    pub secret: String,
    pub expiry: DateTime<Utc>,
}

impl SessionToken {
    /// True when token and secret are present and `now < expiry`.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        !self.token.is_empty() && !self.secret.is_empty() && now < self.expiry
    }

    /// Remaining validity, zero once expired.
    pub fn remaining_at(&self, now: DateTime<Utc>) -> Duration {
        if now >= self.expiry {
            Duration::zero()
        } else {
            self.expiry - now
        }
    }

    /// True when less than `threshold` of validity is left.
    pub fn needs_refresh_at(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        self.remaining_at(now) < threshold
    }
}

impl std::fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionToken")
            .field("token", &"<redacted>")
            .field("secret", &"<redacted>")
            .field("expiry", &self.expiry)
            .finish()
    }
}

// =============================================================================
// Session Identity
// =============================================================================

/// Identity generated once per process unless supplied externally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionIdentity {
    pub session_id: String,
    pub device_id: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl SessionIdentity {
    /// New identity with a fresh session id.
    pub fn generate(device_id: impl Into<String>, tags: Vec<String>) -> Self {
        SessionIdentity {
            session_id: Uuid::new_v4().to_string(),
            device_id: device_id.into(),
            tags,
        }
    }
}

// =============================================================================
// Session Profile
// =============================================================================

/// Content module advertised by the backend for this app/user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Module {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub target: String,
    #[serde(default)]
    pub order: i32,
}

/// Optional fields returned alongside the session token.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionProfile {
    pub user_id: Option<String>,
    pub app_id: Option<String>,
    pub package_name: Option<String>,
    pub user_data: Option<String>,
    pub modules: Vec<Module>,
}

// =============================================================================
// Batch Entries
// =============================================================================

/// Storage partition for a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageScope {
    #[default]
    Device,
    User,
}

impl StorageScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageScope::Device => "device",
            StorageScope::User => "user",
        }
    }
}

impl std::fmt::Display for StorageScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a named value replaces the previous one or appends to history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum KeepPolicy {
    KeepLatest,
    #[default]
    AppendHistory,
}

/// One queued record plus routing metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchEntry {
    pub timestamp: DateTime<Utc>,
    pub name: String,
    pub payload: Record,
    pub scope: StorageScope,
    pub keep_policy: KeepPolicy,
}

impl BatchEntry {
    /// Entry stamped at `timestamp` with default scope and policy.
    pub fn new(name: impl Into<String>, payload: Record, timestamp: DateTime<Utc>) -> Self {
        BatchEntry {
            timestamp,
            name: name.into(),
            payload,
            scope: StorageScope::default(),
            keep_policy: KeepPolicy::default(),
        }
    }

    pub fn with_scope(mut self, scope: StorageScope) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_keep_policy(mut self, keep_policy: KeepPolicy) -> Self {
        self.keep_policy = keep_policy;
        self
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn token_expiring_at(expiry: DateTime<Utc>) -> SessionToken {
        SessionToken {
            token: "a.b.c".to_string(),
            secret: "s".to_string(),
            expiry,
        }
    }

    #[test]
    fn test_build_type_org_rules() {
        assert!(!BuildType::Production.requires_org());
        assert!(BuildType::Development.requires_org());
        assert!(BuildType::ProductionCustom.transmits_org());
        assert_eq!(
            "production_custom".parse::<BuildType>().unwrap(),
            BuildType::ProductionCustom
        );
        assert!("staging".parse::<BuildType>().is_err());
    }

    #[test]
    fn test_session_token_validity_boundary() {
        let expiry = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();
        let token = token_expiring_at(expiry);

        assert!(token.is_valid_at(expiry - Duration::seconds(1)));
        assert!(!token.is_valid_at(expiry));
        assert!(!token.is_valid_at(expiry + Duration::seconds(1)));
        assert_eq!(token.remaining_at(expiry + Duration::hours(1)), Duration::zero());
    }

    #[test]
    fn test_session_token_requires_secret() {
        let expiry = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();
        let mut token = token_expiring_at(expiry);
        token.secret.clear();
        assert!(!token.is_valid_at(expiry - Duration::days(1)));
    }

    #[test]
    fn test_needs_refresh() {
        let now = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();
        let token = token_expiring_at(now + Duration::seconds(60));
        assert!(token.needs_refresh_at(now, Duration::seconds(300)));
        assert!(!token.needs_refresh_at(now, Duration::seconds(30)));
    }

    #[test]
    fn test_mechanism_with_answer_keeps_descriptor() {
        let mechanism = AuthMechanism {
            mechanism_type: "pin".to_string(),
            prompt: "Enter your PIN".to_string(),
            domain: "school.example".to_string(),
            input_source: "keypad".to_string(),
        };
        let answered = mechanism.with_answer("1234");
        assert_eq!(answered.prompt, "1234");
        assert_eq!(answered.mechanism_type, "pin");
        assert_eq!(answered.domain, "school.example");
    }

    #[test]
    fn test_mechanism_wire_names() {
        let json = r#"{"type":"email","prompt":"Email?","domain":"d","inputSource":"keyboard"}"#;
        let mechanism: AuthMechanism = serde_json::from_str(json).unwrap();
        assert_eq!(mechanism.mechanism_type, "email");
        assert_eq!(mechanism.input_source, "keyboard");
    }

    #[test]
    fn test_credentials_debug_redacts_secrets() {
        let creds = Credentials::Legacy(LegacyCredentials {
            app_id: "app".to_string(),
            org_id: None,
            auth_secret: "hunter2".to_string(),
        });
        assert!(!format!("{:?}", creds).contains("hunter2"));
    }

    #[test]
    fn test_keep_policy_and_scope_wire_names() {
        assert_eq!(serde_json::to_string(&KeepPolicy::KeepLatest).unwrap(), "\"keepLatest\"");
        assert_eq!(
            serde_json::to_string(&KeepPolicy::AppendHistory).unwrap(),
            "\"appendHistory\""
        );
        assert_eq!(serde_json::to_string(&StorageScope::User).unwrap(), "\"user\"");
    }
}
