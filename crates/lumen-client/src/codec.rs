//! Wire encoding for request and response bodies.

use crate::error::{ClientError, ClientResult};

/// Turns JSON values into body bytes and back.
///
/// Object safe so a transport stack can hold `Arc<dyn WireCodec>`; typed
/// (de)serialization goes through `serde_json::Value` in [`crate::transport::ApiClient`].
pub trait WireCodec: Send + Sync {
    /// `Content-Type` sent with encoded bodies.
    fn content_type(&self) -> &'static str;

    fn encode(&self, value: &serde_json::Value) -> ClientResult<Vec<u8>>;

    fn decode(&self, bytes: &[u8]) -> ClientResult<serde_json::Value>;
}

/// Compact UTF-8 JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl WireCodec for JsonCodec {
    fn content_type(&self) -> &'static str {
        "application/json"
    }

    fn encode(&self, value: &serde_json::Value) -> ClientResult<Vec<u8>> {
        serde_json::to_vec(value).map_err(|e| ClientError::SerializationFailed(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> ClientResult<serde_json::Value> {
        serde_json::from_slice(bytes).map_err(|e| ClientError::DeserializationFailed(e.to_string()))
    }
}
