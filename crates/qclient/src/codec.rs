//! Wire encoding for message bodies.
//!
//! Bodies travel as JSON text on every backend. Decoding is lenient about
//! foreign producers: UTF-8 text that is not JSON comes back as a JSON
//! string, so a plain-text body sent by another client is still readable.

use crate::error::SerializationError;
use serde_json::Value;

/// Serialize a body to its wire form
pub fn encode(body: &Value) -> Result<String, SerializationError> {
    Ok(serde_json::to_string(body)?)
}

/// Parse a wire body received as text
pub fn decode_str(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

/// Parse a wire body received as bytes
pub fn decode(raw: &[u8]) -> Result<Value, SerializationError> {
    if let Ok(value) = serde_json::from_slice(raw) {
        return Ok(value);
    }

    std::str::from_utf8(raw)
        .map(|text| Value::String(text.to_string()))
        .map_err(|_| SerializationError::InvalidUtf8)
}

#[cfg(test)]
#[path = "codec_tests.rs"]
mod tests;
