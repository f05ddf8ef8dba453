//! Codec for tether wire frames
//!
//! Frames are encoded as compact JSON text. Decoding is split in two steps
//! so callers can tell garbage bytes (`Error::Serialization`) from valid JSON
//! that is not a wire message (`Error::Protocol`), e.g. a frame with an
//! unknown `type`.
//!
//! # Examples
//!
//! ```rust
//! use tether_core::{codec, WireMessage};
//!
//! let text = codec::encode(&WireMessage::Ping { id: 1 }).unwrap();
//! assert_eq!(text, r#"{"type":"ping","id":1}"#);
//!
//! let decoded = codec::decode(&text).unwrap();
//! assert_eq!(decoded, WireMessage::Ping { id: 1 });
//! ```

use crate::error::{Error, Result};
use crate::types::WireMessage;

/// Encode a frame to JSON text
pub fn encode(msg: &WireMessage) -> Result<String> {
    serde_json::to_string(msg).map_err(|e| Error::Serialization(e.to_string()))
}

/// Decode a JSON text frame
///
/// # Errors
///
/// - `Error::Serialization` if the text is not JSON
/// - `Error::Protocol` if the JSON does not describe a known frame
pub fn decode(text: &str) -> Result<WireMessage> {
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|e| Error::Serialization(e.to_string()))?;
    from_value(value)
}

/// Decode a binary frame holding UTF-8 JSON
pub fn decode_bytes(bytes: &[u8]) -> Result<WireMessage> {
    let value: serde_json::Value =
        serde_json::from_slice(bytes).map_err(|e| Error::Serialization(e.to_string()))?;
    from_value(value)
}

fn from_value(value: serde_json::Value) -> Result<WireMessage> {
    if !value.is_object() {
        return Err(Error::Protocol("frame must be a JSON object".to_string()));
    }
    serde_json::from_value(value).map_err(|e| Error::Protocol(e.to_string()))
}
