//! Client handle
//!
//! [`TetherClient`] is the caller's side of one transport instance. It is
//! cheap to clone; every clone talks to the same driver task. All operations
//! return immediately: they hand a command to the driver and never wait on
//! the network.
//!
//! # Examples
//!
//! ```rust,no_run
//! use tether_client::{ClientBuilder, EventKind, TransportEvent};
//! use serde_json::json;
//!
//! # async fn example() -> tether_core::Result<()> {
//! let client = ClientBuilder::new("wss://chat.example.com/ws")
//!     .token("session-token")
//!     .build()?;
//!
//! client.subscribe(EventKind::MaxAttemptsExceeded, |_| {
//!     eprintln!("offline, giving up");
//! });
//! client.on_message("chat.message", |envelope| {
//!     println!("message: {}", envelope.data);
//! });
//!
//! // Sent as soon as the connection is up, in order.
//! client.send_payload("chat.message", &json!({"text": "hi"}))?;
//! client.connect()?;
//! # Ok(())
//! # }
//! ```

use crate::connection_state::ConnectionState;
use crate::events::{EventBus, EventKind, Subscription, TransportEvent};
use crate::machine::Command;
use crate::network::NetworkSignal;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tether_core::{Envelope, Error, Result};
use tokio::sync::{mpsc, watch};

/// Handle to a running transport
#[derive(Clone)]
pub struct TetherClient {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
    events: EventBus,
    /// Set by `close()` on any clone
    closed: Arc<AtomicBool>,
}

impl TetherClient {
    pub(crate) fn new(
        commands: mpsc::UnboundedSender<Command>,
        state: watch::Receiver<ConnectionState>,
        events: EventBus,
    ) -> Self {
        Self {
            commands,
            state,
            events,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Start connecting
    ///
    /// No-op while connecting or connected, and after giving up until
    /// [`reset`](Self::reset). From `ReconnectWait` it skips the remaining
    /// backoff. Fails only once the client is closed.
    #[tracing::instrument(skip(self))]
    pub fn connect(&self) -> Result<()> {
        self.command(Command::Connect)
    }

    /// Send a payload, or queue it until the connection is usable
    ///
    /// A disconnect never makes this fail: the message waits in the queue
    /// and goes out, in order, after the next successful connect. Fails with
    /// [`Error::Closed`] after `close()` or once the client gave up.
    pub fn send(&self, envelope: Envelope) -> Result<()> {
        if self.state() == ConnectionState::Closed {
            return Err(Error::Closed);
        }
        self.command(Command::Send(envelope))
    }

    /// Serialize `data` and [`send`](Self::send) it as `kind`
    pub fn send_payload<T: Serialize>(&self, kind: impl Into<String>, data: &T) -> Result<()> {
        self.send(Envelope::from_serializable(kind, data)?)
    }

    /// Stop for good: drop the socket, cancel timers, discard the queue
    ///
    /// Idempotent. The `Closed` event is published once.
    #[tracing::instrument(skip(self))]
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        // Err means the driver already stopped, which is what we want.
        let _ = self.commands.send(Command::Close);
    }

    /// Leave `Closed` after giving up; the attempt counter starts over
    ///
    /// Ignored in every other state. Call [`connect`](Self::connect)
    /// afterwards to dial again.
    pub fn reset(&self) -> Result<()> {
        self.command(Command::Reset)
    }

    /// Call `handler` for every event of `kind`
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&TransportEvent) + Send + Sync + 'static,
    {
        self.events.subscribe(kind, handler)
    }

    /// Call `handler` for every event
    pub fn subscribe_all<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&TransportEvent) + Send + Sync + 'static,
    {
        self.events.subscribe_all(handler)
    }

    /// Call `handler` for every received payload of the given kind
    pub fn on_message<F>(&self, kind: impl Into<String>, handler: F) -> Subscription
    where
        F: Fn(&Envelope) + Send + Sync + 'static,
    {
        let kind = kind.into();
        self.events.subscribe(EventKind::MessageReceived, move |event| {
            if let TransportEvent::MessageReceived(envelope) = event {
                if envelope.kind == kind {
                    handler(envelope);
                }
            }
        })
    }

    /// True while the socket is open
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Receiver that is notified on every state change
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Reachability input for this client
    pub fn network_signal(&self) -> NetworkSignal {
        NetworkSignal::new(self.commands.downgrade())
    }

    fn command(&self, command: Command) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Closed);
        }
        self.commands.send(command).map_err(|_| Error::Closed)
    }
}

impl std::fmt::Debug for TetherClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TetherClient")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
