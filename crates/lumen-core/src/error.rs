//! # Error Types
//!
//! Domain-specific error types for lumen-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  lumen-core errors (this file)                                         │
//! │  ├── ValidationError  - Credential/config shape failures               │
//! │  ├── TokenError       - Session token cannot yield an expiry           │
//! │  └── SigningError     - Signing attempted without credentials          │
//! │                                                                         │
//! │  lumen-client errors (separate crate)                                  │
//! │  └── ClientError      - Network, response, session failures            │
//! │                                                                         │
//! │  Flow: ValidationError ──► ClientError (configuration, no retry)       │
//! │        TokenError      ──► ClientError (response, no retry)            │
//! │        SigningError    ──► ClientError (programming error)             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Design Principles
//! 1. Use `thiserror` for derive macros (not manual impl)
//! 2. Include the offending field name in the message, never its value
//!    (values may be secrets)
//! 3. Errors are enum variants, never String

use thiserror::Error;

// =============================================================================
// Validation Error
// =============================================================================

/// Credential and configuration validation errors.
///
/// These are detected before any network call and are never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Invalid format (e.g., not a UUID, not a three-segment token).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// Value is not in allowed set.
    #[error("{field} must be one of: {allowed:?}")]
    NotAllowed { field: String, allowed: Vec<String> },

    /// A field belonging to the inactive credential mode was supplied.
    #[error("{field} is not used in {mode} credential mode")]
    MixedMode { field: String, mode: String },
}

// =============================================================================
// Token Error
// =============================================================================

/// Failures decoding the claims of a session token.
///
/// A token that fails here came from a structurally invalid server
/// response; retrying the same request reproduces the same token.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    /// Token is not `header.payload.signature`.
    #[error("token is not a three-segment signed token")]
    Malformed,

    /// Header or payload could not be decoded.
    #[error("token could not be decoded: {0}")]
    Undecodable(String),

    /// The payload has no `exp` claim.
    #[error("token has no expiry claim")]
    MissingExpiry,

    /// The `exp` claim is outside the representable time range.
    #[error("token expiry claim {0} is out of range")]
    ExpiryOutOfRange(i64),
}

// =============================================================================
// Signing Error
// =============================================================================

/// Attempt to sign a request without session credentials.
///
/// Callers gate on the session being authenticated, so observing this
/// error means a caller bypassed that gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SigningError {
    #[error("cannot sign request: session token is empty")]
    MissingToken,

    #[error("cannot sign request: session secret is empty")]
    MissingSecret,
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// Unit Tests
// =============================================================================
