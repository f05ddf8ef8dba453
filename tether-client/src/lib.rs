//! Resilient real-time messaging transport over WebSocket
//!
//! This crate keeps a long-lived connection to a message server alive on an
//! unreliable network: it notices silent failures through application-level
//! heartbeats, reconnects with bounded exponential backoff, and delivers
//! outbound messages in order across disconnects.
//!
//! # Core Features
//!
//! - **State machine**: one driver task per client, `Disconnected`,
//!   `Connecting`, `Connected`, `ReconnectWait`, `Closed`
//! - **Heartbeats**: `ping{id}` / `pong{id}` with a deadline per probe
//! - **Backoff**: `min(base * 2^attempt, cap)`, optional jitter, attempt limit
//! - **Ordered queue**: messages sent while offline go out FIFO on reconnect
//! - **Typed events**: a closed [`EventKind`] enum instead of string names
//! - **Network awareness**: [`NetworkSignal`] reacts to reachability changes
//! - **Observability**: OpenTelemetry metrics through [`ClientMetrics`]
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use tether_client::{ClientBuilder, EventKind, TransportEvent};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = ClientBuilder::new("wss://chat.example.com/ws")
//!         .token("session-token")
//!         .build()?;
//!
//!     client.subscribe(EventKind::StateChanged, |event| {
//!         if let TransportEvent::StateChanged { from, to } = event {
//!             println!("{} -> {}", from, to);
//!         }
//!     });
//!
//!     client.connect()?;
//!     client.send_payload("chat.message", &json!({"text": "hello"}))?;
//!
//!     // Hook the platform's reachability callback up to the client.
//!     let network = client.network_signal();
//!     network.down();
//!     network.up();
//!
//!     client.close();
//!     Ok(())
//! }
//! ```

mod client;
mod client_builder;
mod config;
mod connection_state;
mod credentials;
mod events;
mod heartbeat;
mod machine;
mod metrics;
mod network;
mod queue;
mod reconnect;
mod transport;

pub use client::TetherClient;
pub use client_builder::ClientBuilder;
pub use config::{TransportConfig, DEFAULT_HEARTBEAT_INTERVAL, DEFAULT_HEARTBEAT_TIMEOUT};
pub use connection_state::{ConnectionState, FailureCause};
pub use credentials::{CredentialStore, MemoryCredentials};
pub use events::{EventBus, EventKind, Subscription, TransportEvent};
pub use heartbeat::{HeartbeatEvent, HeartbeatMonitor, PongOutcome};
pub use metrics::ClientMetrics;
pub use network::{NetworkSignal, Reachability};
pub use queue::{DrainError, OutboundQueue, QueuedMessage};
pub use reconnect::{Backoff, BackoffDecision, ReconnectPolicy};
pub use transport::{Connector, Socket, WebSocketConnector, WebSocketSocket};
