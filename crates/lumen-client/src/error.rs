//! # Client Error Types
//!
//! Error types for authentication and upload operations.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Client Error Categories                           │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │    Network      │  │     Response            │ │
//! │  │  (never retry)  │  │ (fixed-interval │  │  (never retry)          │ │
//! │  │                 │  │     retry)      │  │                         │ │
//! │  │  InvalidConfig  │  │  Connection     │  │  MissingField           │ │
//! │  │  Validation     │  │  Timeout        │  │  Token                  │ │
//! │  │  InvalidUrl     │  │  Http (non-2xx) │  │  DeserializationFailed  │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────────────────────────────────┐  │
//! │  │    Signing      │  │               Session                       │  │
//! │  │                 │  │                                             │  │
//! │  │  Signing        │  │  NotAuthenticated  InvalidState  Superseded │  │
//! │  │  (caller bug)   │  │  MaxRetriesExceeded  ShuttingDown           │  │
//! │  └─────────────────┘  └─────────────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use lumen_core::{SigningError, TokenError, ValidationError};
use thiserror::Error;

/// Result type alias for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Client error type covering all possible SDK failures.
///
/// ## Design Principles
/// - Each variant includes enough context for debugging
/// - Errors are categorized for different retry strategies
/// - All errors are `Send + Sync` for async compatibility
#[derive(Debug, Error)]
pub enum ClientError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid client configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Credential fields failed validation.
    #[error("Invalid credentials: {0}")]
    Validation(#[from] ValidationError),

    /// Invalid base URL.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Network Errors
    // =========================================================================
    /// Could not reach the backend.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Request timed out.
    #[error("Request timeout after {0} seconds")]
    Timeout(u64),

    /// Backend answered with a non-2xx status.
    #[error("HTTP {status} from {endpoint}: {body}")]
    Http {
        endpoint: String,
        status: u16,
        body: String,
    },

    // =========================================================================
    // Response Errors
    // =========================================================================
    /// A successful response lacks a required field.
    #[error("Response from {endpoint} is missing {field}")]
    MissingField { endpoint: String, field: String },

    /// The session token in a response cannot be used.
    #[error("Invalid session token: {0}")]
    Token(#[from] TokenError),

    /// Failed to serialize a request body.
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    /// Failed to decode a response body.
    #[error("Deserialization failed: {0}")]
    DeserializationFailed(String),

    // =========================================================================
    // Signing Errors
    // =========================================================================
    /// Signing attempted without session credentials.
    #[error("Signing failed: {0}")]
    Signing(#[from] SigningError),

    // =========================================================================
    // Session Errors
    // =========================================================================
    /// Operation requires an authenticated session.
    #[error("Session is not authenticated")]
    NotAuthenticated,

    /// Operation is not valid in the current session state.
    #[error("Invalid session state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },

    /// The flow was overtaken by a re-authentication; its result was dropped.
    #[error("Authentication flow superseded (epoch {epoch})")]
    Superseded { epoch: u64 },

    /// Retry budget for an operation ran out.
    #[error("Max retries ({attempts}) exceeded during {stage}: {last_error}")]
    MaxRetriesExceeded {
        stage: String,
        attempts: u32,
        last_error: String,
    },

    /// Operation is only available on a different stream.
    #[error("Operation not supported: {0}")]
    Unsupported(String),

    /// Client is shutting down.
    #[error("Client is shutting down")]
    ShuttingDown,
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<url::ParseError> for ClientError {
    fn from(err: url::ParseError) -> Self {
        ClientError::InvalidUrl(err.to_string())
    }
}

impl From<std::io::Error> for ClientError {
    fn from(err: std::io::Error) -> Self {
        ClientError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for ClientError {
    fn from(err: toml::de::Error) -> Self {
        ClientError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for ClientError {
    fn from(err: toml::ser::Error) -> Self {
        ClientError::ConfigSaveFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization (for retry logic)
// =============================================================================

impl ClientError {
    /// Returns true if the operation can be retried.
    ///
    /// ## Retryable Errors
    /// - Connection failures (network issues)
    /// - Timeouts
    /// - Non-2xx protocol errors
    ///
    /// ## Non-Retryable Errors
    /// - Configuration errors
    /// - Structurally invalid responses
    /// - Signing misuse, session state errors
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClientError::ConnectionFailed(_) | ClientError::Timeout(_) | ClientError::Http { .. }
        )
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            ClientError::InvalidConfig(_)
                | ClientError::Validation(_)
                | ClientError::InvalidUrl(_)
                | ClientError::ConfigLoadFailed(_)
                | ClientError::ConfigSaveFailed(_)
        )
    }

    /// Returns true if the backend sent a structurally invalid response.
    pub fn is_response_error(&self) -> bool {
        matches!(
            self,
            ClientError::MissingField { .. }
                | ClientError::Token(_)
                | ClientError::DeserializationFailed(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(ClientError::ConnectionFailed("network error".into()).is_retryable());
        assert!(ClientError::Timeout(30).is_retryable());
        assert!(ClientError::Http {
            endpoint: "/v1/auth/token".into(),
            status: 503,
            body: String::new(),
        }
        .is_retryable());

        assert!(!ClientError::InvalidConfig("bad config".into()).is_retryable());
        assert!(!ClientError::Token(TokenError::MissingExpiry).is_retryable());
        assert!(!ClientError::Signing(SigningError::MissingToken).is_retryable());
    }

    #[test]
    fn test_categories() {
        let validation = ClientError::from(ValidationError::Required {
            field: "app_id".into(),
        });
        assert!(validation.is_config_error());

        let missing = ClientError::MissingField {
            endpoint: "/v1/auth/token".into(),
            field: "Token".into(),
        };
        assert!(missing.is_response_error());
        assert!(missing.to_string().contains("Token"));
    }
}
