//! Connection states and failure causes
//!
//! # State Transitions
//!
//! ```text
//!                 connect()
//! Disconnected ────────────► Connecting ──dial ok──► Connected
//!       ▲                      │    ▲                   │
//!       │ reset()   dial failed│    │backoff elapsed    │socket closed /
//!       │           no token   ▼    │network up         │liveness timeout /
//!       │                   ReconnectWait ◄─────────────┘network down
//!       │                      │
//!       │   max attempts       ▼
//!       └────────────────── Closed ◄──── close() from anywhere
//! ```
//!
//! `Closed` reached through `close()` is final. `Closed` reached by giving
//! up after too many attempts can be left with `reset()`.

use std::fmt;

/// Where the connection currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Not connected and not trying
    Disconnected,
    /// A dial is in progress
    Connecting,
    /// The socket is open; heartbeats are running
    Connected,
    /// Waiting before the next attempt (or for credentials)
    ReconnectWait,
    /// Stopped; no timers, no socket, no queue
    Closed,
}

impl ConnectionState {
    /// Gauge value for metrics
    pub fn metric_value(self) -> i64 {
        match self {
            ConnectionState::Disconnected => 0,
            ConnectionState::Connecting => 1,
            ConnectionState::Connected => 2,
            ConnectionState::ReconnectWait => 3,
            ConnectionState::Closed => 4,
        }
    }

    /// True for `Connecting` and `Connected`, where `connect()` is a no-op
    pub fn is_active(self) -> bool {
        matches!(self, ConnectionState::Connecting | ConnectionState::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::ReconnectWait => "reconnect_wait",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Why the machine left `Connecting` or `Connected`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureCause {
    /// The socket failed to open, failed a write, errored or was closed by the peer
    Transport,
    /// The heartbeat pong did not arrive in time
    LivenessTimeout,
    /// The network signal reported the device offline
    NetworkDown,
    /// The credential store had no token
    AuthenticationMissing,
}

impl FailureCause {
    /// Whether this failure counts toward the attempt limit
    ///
    /// A missing token is not a connection attempt; it waits for the caller.
    pub fn counts_as_attempt(self) -> bool {
        !matches!(self, FailureCause::AuthenticationMissing)
    }
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureCause::Transport => "transport",
            FailureCause::LivenessTimeout => "liveness_timeout",
            FailureCause::NetworkDown => "network_down",
            FailureCause::AuthenticationMissing => "authentication_missing",
        };
        f.write_str(name)
    }
}
