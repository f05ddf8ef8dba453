//! Error types for tether
//!
//! The transport distinguishes failures it recovers from on its own (socket
//! errors, liveness timeouts) from failures that need the caller to act
//! (missing credentials, an abandoned reconnect loop). Both kinds share one
//! `Error` enum; [`Error::is_terminal`] tells them apart.
//!
//! # Error Categories
//!
//! - **Caller action required**: AuthenticationMissing, MaxAttemptsExceeded
//! - **Recovered by the reconnect loop**: Transport, LivenessTimeout
//! - **Isolated**: Handler (an event subscriber panicked)
//! - **Local misuse**: Closed, InvalidConfig, Serialization
//! - **Peer misbehaviour**: Protocol
//!
//! # Examples
//!
//! ```rust
//! use tether_core::Error;
//!
//! let error = Error::MaxAttemptsExceeded { attempts: 5 };
//! assert!(error.is_terminal());
//! assert!(!Error::Transport("reset by peer".into()).is_terminal());
//! ```

use std::time::Duration;
use thiserror::Error;

/// Result type for tether operations
pub type Result<T> = std::result::Result<T, Error>;

/// Application-level error type for tether operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// No credential was available when a connection attempt started
    ///
    /// Never retried automatically. The caller restores credentials and
    /// calls `connect()` again.
    #[error("Authentication token missing")]
    AuthenticationMissing,

    /// Socket-level open, write or close failure
    ///
    /// Always routed into the reconnect loop.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The heartbeat pong did not arrive in time
    #[error("Liveness timeout: no pong within {0:?}")]
    LivenessTimeout(Duration),

    /// The reconnect loop gave up
    #[error("Reconnection abandoned after {attempts} attempts")]
    MaxAttemptsExceeded {
        /// Failed attempts in the streak that ended the loop
        attempts: u32,
    },

    /// An event subscriber panicked while handling an event
    #[error("Event handler failed: {0}")]
    Handler(String),

    /// Serialization or deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A frame from the peer was well-formed JSON but not a valid wire message
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The transport configuration was rejected
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The transport instance was closed
    #[error("Transport closed")]
    Closed,

    /// Unexpected internal failure
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True for failures the transport cannot recover from without the caller
    ///
    /// Everything else is handled by the reconnect loop or isolated, and is
    /// only observable as lifecycle events.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Error::AuthenticationMissing | Error::MaxAttemptsExceeded { .. }
        )
    }

    /// True when an inbound frame could not be decoded
    ///
    /// Decode failures are logged and skipped; they do not tear down the
    /// connection.
    pub fn is_decode(&self) -> bool {
        matches!(self, Error::Serialization(_) | Error::Protocol(_))
    }

    /// Short, stable label used as a metric attribute
    pub fn label(&self) -> &'static str {
        match self {
            Error::AuthenticationMissing => "authentication_missing",
            Error::Transport(_) => "transport",
            Error::LivenessTimeout(_) => "liveness_timeout",
            Error::MaxAttemptsExceeded { .. } => "max_attempts_exceeded",
            Error::Handler(_) => "handler",
            Error::Serialization(_) => "serialization",
            Error::Protocol(_) => "protocol",
            Error::InvalidConfig(_) => "invalid_config",
            Error::Closed => "closed",
            Error::Internal(_) => "internal",
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
