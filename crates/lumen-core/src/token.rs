//! # Session Token Claims
//!
//! Session tokens are JWTs issued by the backend. The SDK never verifies
//! their signature (it has no key); it only reads the `exp` claim to know
//! when the session lapses.

use chrono::{DateTime, TimeZone, Utc};
use jsonwebtoken::{decode, errors::ErrorKind, DecodingKey, Validation};
use serde::Deserialize;

use crate::error::TokenError;
use crate::validation::is_three_segment_token;

#[derive(Debug, Deserialize)]
struct ExpiryClaims {
    // Some issuers emit `exp` as a float.
    exp: Option<f64>,
}

/// Decodes the `exp` claim of `token` into a UTC instant.
///
/// Fails with [`TokenError::MissingExpiry`] when the claim is absent, which
/// callers treat as a non-retryable response error.
pub fn decode_expiry(token: &str) -> Result<DateTime<Utc>, TokenError> {
    if !is_three_segment_token(token) {
        return Err(TokenError::Malformed);
    }

    let mut validation = Validation::default();
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    let data = decode::<ExpiryClaims>(token, &DecodingKey::from_secret(&[]), &validation)
        .map_err(|e| match e.kind() {
            ErrorKind::InvalidToken => TokenError::Malformed,
            _ => TokenError::Undecodable(e.to_string()),
        })?;

    let exp = data.claims.exp.ok_or(TokenError::MissingExpiry)?;
    let secs = exp.trunc() as i64;
    Utc.timestamp_opt(secs, 0)
        .single()
        .ok_or(TokenError::ExpiryOutOfRange(secs))
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::json;

    fn mint(claims: serde_json::Value) -> String {
        encode(&Header::default(), &claims, &EncodingKey::from_secret(b"server-key")).unwrap()
    }

    #[test]
    fn test_decode_expiry() {
        let token = mint(json!({ "exp": 1_900_000_000, "sub": "user-1" }));
        let expiry = decode_expiry(&token).unwrap();
        assert_eq!(expiry.timestamp(), 1_900_000_000);
    }

    #[test]
    fn test_expired_token_still_decodes() {
        let token = mint(json!({ "exp": 1_000 }));
        assert_eq!(decode_expiry(&token).unwrap().timestamp(), 1_000);
    }

    #[test]
    fn test_audience_claim_is_ignored() {
        let token = mint(json!({ "exp": 1_900_000_000, "aud": "lumen-api" }));
        assert!(decode_expiry(&token).is_ok());
    }

    #[test]
    fn test_float_expiry() {
        let token = mint(json!({ "exp": 1_900_000_000.75 }));
        assert_eq!(decode_expiry(&token).unwrap().timestamp(), 1_900_000_000);
    }

    #[test]
    fn test_missing_expiry() {
        let token = mint(json!({ "sub": "user-1" }));
        assert_eq!(decode_expiry(&token), Err(TokenError::MissingExpiry));
    }

    #[test]
    fn test_malformed_and_undecodable() {
        assert_eq!(decode_expiry("not-a-token"), Err(TokenError::Malformed));
        assert!(matches!(
            decode_expiry("aGVsbG8.d29ybGQ.c2ln"),
            Err(TokenError::Undecodable(_))
        ));
    }
}
