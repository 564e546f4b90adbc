//! # Validation Module
//!
//! Credential shape checks that run before any network call.
//!
//! ## Validation Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  authenticate()                                                         │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  validate_credentials(creds, build_type) ← THIS MODULE                 │
//! │       │                                                                 │
//! │       ├── Legacy: app_id UUID? auth_secret set? org_id UUID?           │
//! │       ├── Token:  app_token 3-segment? org_token 3-segment?            │
//! │       ├── BuildType requires org and none configured?                  │
//! │       │                                                                 │
//! │       ├── any failure → ConfigurationError, NO HTTP request issued     │
//! │       └── OK → POST /v1/auth/token                                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use crate::error::{ValidationError, ValidationResult};
use crate::types::{BuildType, Credentials, LegacyCredentials, TokenCredentials};
use uuid::Uuid;

// =============================================================================
// Shape Checks
// =============================================================================

/// True for the canonical hyphenated 8-4-4-4-12 form.
///
/// Braced, URN and simple (no hyphen) encodings are rejected even though
/// `Uuid::parse_str` accepts them; the backend only knows the hyphenated form.
///
/// ```rust
/// use lumen_core::validation::is_uuid;
///
/// assert!(is_uuid("550e8400-e29b-41d4-a716-446655440000"));
/// assert!(!is_uuid("550e8400e29b41d4a716446655440000"));
/// assert!(!is_uuid("not-a-uuid"));
/// ```
pub fn is_uuid(value: &str) -> bool {
    value.len() == 36 && Uuid::try_parse(value).is_ok()
}

/// True when `token` has three non-empty base64url segments.
///
/// ```rust
/// use lumen_core::validation::is_three_segment_token;
///
/// assert!(is_three_segment_token("eyJhbGciOiJIUzI1NiJ9.eyJleHAiOjF9.c2ln"));
/// assert!(!is_three_segment_token("a.b"));
/// assert!(!is_three_segment_token("a..c"));
/// ```
pub fn is_three_segment_token(token: &str) -> bool {
    let segments: Vec<&str> = token.split('.').collect();
    segments.len() == 3
        && segments.iter().all(|segment| {
            !segment.is_empty()
                && segment
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '=')
        })
}

// =============================================================================
// Credential Validation
// =============================================================================

/// Validates the active credential mode against the build type.
pub fn validate_credentials(credentials: &Credentials, build_type: BuildType) -> ValidationResult<()> {
    match credentials {
        Credentials::Legacy(legacy) => validate_legacy(legacy, build_type),
        Credentials::Token(token) => validate_tokens(token, build_type),
    }
}

fn validate_legacy(creds: &LegacyCredentials, build_type: BuildType) -> ValidationResult<()> {
    require_uuid("app_id", &creds.app_id)?;

    if creds.auth_secret.trim().is_empty() {
        return Err(required("auth_secret"));
    }

    match creds.org_id.as_deref().map(str::trim) {
        Some(org_id) if !org_id.is_empty() => require_uuid("org_id", org_id)?,
        _ if build_type.requires_org() => return Err(required("org_id")),
        _ => {}
    }

    Ok(())
}

fn validate_tokens(creds: &TokenCredentials, build_type: BuildType) -> ValidationResult<()> {
    require_token("app_token", &creds.app_token)?;

    match creds.org_token.as_deref().map(str::trim) {
        Some(org_token) if !org_token.is_empty() => require_token("org_token", org_token)?,
        _ if build_type.requires_org() => return Err(required("org_token")),
        _ => {}
    }

    Ok(())
}

fn require_uuid(field: &str, value: &str) -> ValidationResult<()> {
    let value = value.trim();
    if value.is_empty() {
        return Err(required(field));
    }
    if !is_uuid(value) {
        return Err(ValidationError::InvalidFormat {
            field: field.to_string(),
            reason: "must be a hyphenated UUID".to_string(),
        });
    }
    Ok(())
}

fn require_token(field: &str, value: &str) -> ValidationResult<()> {
    let value = value.trim();
    if value.is_empty() {
        return Err(required(field));
    }
    if !is_three_segment_token(value) {
        return Err(ValidationError::InvalidFormat {
            field: field.to_string(),
            reason: "must be a three-segment signed token".to_string(),
        });
    }
    Ok(())
}

fn required(field: &str) -> ValidationError {
    ValidationError::Required {
        field: field.to_string(),
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
