//! # Request Signing
//!
//! Produces the authentication headers attached to every authenticated call.
//!
//! ## Signature Layout
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Authorization:      Bearer <token>                                     │
//! │  x-lumen-timestamp:  <unix seconds>                                     │
//! │  x-lumen-hash:       hex(sha256( token                                  │
//! │                                  ‖ secret                               │
//! │                                  ‖ decimal(timestamp)                   │
//! │                                  ‖ hex(sha256(body))   ← only if body)  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The concatenation order and hash function are a compatibility contract
//! with the backend and must stay bit-exact.

use sha2::{Digest, Sha256};

use crate::error::SigningError;

/// Header carrying the signing timestamp.
pub const TIMESTAMP_HEADER: &str = "x-lumen-timestamp";

/// Header carrying the request signature.
pub const HASH_HEADER: &str = "x-lumen-hash";

/// Standard bearer header name.
pub const AUTHORIZATION_HEADER: &str = "Authorization";

/// Headers produced by [`sign_request`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedHeaders {
    pub authorization: String,
    pub timestamp: String,
    pub signature: String,
}

impl SignedHeaders {
    /// Header name/value pairs in the order they are sent.
    pub fn to_pairs(&self) -> Vec<(String, String)> {
        vec![
            (AUTHORIZATION_HEADER.to_string(), self.authorization.clone()),
            (TIMESTAMP_HEADER.to_string(), self.timestamp.clone()),
            (HASH_HEADER.to_string(), self.signature.clone()),
        ]
    }
}

/// Signs a request with the session's token and secret.
///
/// Deterministic: identical inputs always give the identical signature.
/// An empty body slice is still a body and contributes its checksum.
pub fn sign_request(
    token: &str,
    secret: &str,
    unix_timestamp_secs: i64,
    body: Option<&[u8]>,
) -> Result<SignedHeaders, SigningError> {
    if token.is_empty() {
        return Err(SigningError::MissingToken);
    }
    if secret.is_empty() {
        return Err(SigningError::MissingSecret);
    }

    let timestamp = unix_timestamp_secs.to_string();

    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.update(secret.as_bytes());
    hasher.update(timestamp.as_bytes());
    if let Some(body) = body {
        hasher.update(body_checksum(body).as_bytes());
    }

    Ok(SignedHeaders {
        authorization: format!("Bearer {}", token),
        timestamp,
        signature: hex::encode(hasher.finalize()),
    })
}

/// Lower-case hex SHA-256 of a request body.
pub fn body_checksum(body: &[u8]) -> String {
    hex::encode(Sha256::digest(body))
}

// =============================================================================
// Unit Tests
// =============================================================================
