//! Wire types for the tether transport
//!
//! Frames are JSON text messages discriminated by a `type` field:
//!
//! ```text
//! {"type":"ping","id":7}
//! {"type":"pong","id":7}
//! {"type":"payload","kind":"checkin.created","data":{...}}
//! ```
//!
//! `ping`/`pong` carry the heartbeat. Everything else travels in a
//! `payload` envelope whose contents the transport never interprets; the
//! `kind` string only decides which subscribers see it.

use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque application message routed by `kind`
///
/// # Examples
///
/// ```rust
/// use tether_core::Envelope;
/// use serde_json::json;
///
/// let envelope = Envelope::new("buddy.nudge", json!({"from": "ana"}));
/// assert_eq!(envelope.kind, "buddy.nudge");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Routing discriminator
    pub kind: String,
    /// Application data, passed through untouched
    #[serde(default)]
    pub data: serde_json::Value,
}

impl Envelope {
    /// Create an envelope from an already-built JSON value
    pub fn new(kind: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            kind: kind.into(),
            data,
        }
    }

    /// Create an envelope by serializing `data`
    pub fn from_serializable<T: Serialize>(kind: impl Into<String>, data: &T) -> Result<Self> {
        Ok(Self::new(kind, serde_json::to_value(data)?))
    }

    /// Deserialize the envelope data into a concrete type
    pub fn decode_data<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.data.clone()).map_err(Error::from)
    }
}

/// A single frame on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WireMessage {
    /// Liveness probe
    Ping {
        /// Echoed back in the matching pong
        id: u64,
    },
    /// Liveness answer
    Pong {
        /// Id of the ping being answered
        id: u64,
    },
    /// Application payload
    Payload(Envelope),
}

impl WireMessage {
    /// Short name used in logs
    pub fn type_name(&self) -> &'static str {
        match self {
            WireMessage::Ping { .. } => "ping",
            WireMessage::Pong { .. } => "pong",
            WireMessage::Payload(_) => "payload",
        }
    }
}

impl From<Envelope> for WireMessage {
    fn from(envelope: Envelope) -> Self {
        WireMessage::Payload(envelope)
    }
}

/// Credential presented when dialing the message server
///
/// The token format is owned by the credential store; the transport only
/// forwards it. `Debug` output is redacted so tokens never reach logs.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken(String);

impl AuthToken {
    /// Wrap a raw token
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The raw token
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `Authorization` header value
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.0)
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AuthToken(***)")
    }
}

impl From<String> for AuthToken {
    fn from(s: String) -> Self {
        AuthToken(s)
    }
}

impl From<&str> for AuthToken {
    fn from(s: &str) -> Self {
        AuthToken(s.to_string())
    }
}
