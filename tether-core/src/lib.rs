//! Core types for the tether messaging transport
//!
//! This crate holds everything that does not depend on a running
//! connection:
//!
//! - **Types**: wire frames (`ping`, `pong`, `payload`), the payload
//!   envelope and the auth token wrapper
//! - **Codec**: JSON encoding and decoding of wire frames
//! - **Error handling**: the shared `Error` enum and `Result` alias
//! - **Observability**: OpenTelemetry and `tracing` setup for host applications
//!
//! The `tether-client` crate builds the resilient connection on top of it.
//!
//! # Example
//!
//! ```rust
//! use tether_core::{codec, Envelope, WireMessage};
//! use serde_json::json;
//!
//! let frame = WireMessage::Payload(Envelope::new("checkin", json!({"mood": 4})));
//! let text = codec::encode(&frame).unwrap();
//! assert_eq!(codec::decode(&text).unwrap(), frame);
//! ```

pub mod codec;
pub mod error;
pub mod observability;
pub mod types;

pub use error::{Error, Result};
pub use observability::{init_observability, shutdown_observability, ObservabilityConfig};
pub use types::{AuthToken, Envelope, WireMessage};
