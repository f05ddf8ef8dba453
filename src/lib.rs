//! Tether - resilient real-time messaging transport
//!
//! This is the main convenience crate that re-exports the tether sub-crates.
//!
//! # Architecture
//!
//! - **tether-core**: wire types, JSON codec, error handling, observability
//! - **tether-client**: connection state machine, heartbeats, backoff,
//!   ordered outbound queue and typed events
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use tether::{ClientBuilder, EventKind, TransportEvent};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     tether::core::init_observability(tether::core::ObservabilityConfig::new("chat-app"))?;
//!
//!     let client = ClientBuilder::new("wss://chat.example.com/ws")
//!         .token("session-token")
//!         .build()?;
//!
//!     client.on_message("chat.message", |envelope| {
//!         println!("{}", envelope.data);
//!     });
//!     client.subscribe(EventKind::Reconnecting, |event| {
//!         if let TransportEvent::Reconnecting { attempt, delay, .. } = event {
//!             println!("retry #{} in {:?}", attempt, delay);
//!         }
//!     });
//!
//!     client.connect()?;
//!     client.send_payload("chat.message", &serde_json::json!({"text": "hi"}))?;
//!
//!     tokio::signal::ctrl_c().await?;
//!     client.close();
//!     tether::core::shutdown_observability();
//!     Ok(())
//! }
//! ```

pub use tether_client as client;
pub use tether_core as core;

pub use tether_client::{
    ClientBuilder, ConnectionState, EventKind, NetworkSignal, Reachability, ReconnectPolicy,
    TetherClient, TransportEvent,
};
pub use tether_core::{AuthToken, Envelope, Error, Result};
