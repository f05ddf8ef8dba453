//! Application-level liveness probing
//!
//! A socket can stay open while the server behind it stopped responding
//! (half-open TCP, a wedged proxy, a suspended radio). The heartbeat catches
//! that: every `interval` a `ping{id}` is sent and a `timeout` is armed; the
//! matching `pong{id}` disarms it.
//!
//! # Cycle
//!
//! ```text
//! connected ──interval──► SendPing(id) ──pong(id)──► Confirmed{rtt} ──interval──► ...
//!                              │
//!                              └──timeout──► TimedOut (reported once, monitor is spent)
//! ```
//!
//! A monitor lives for exactly one Connected period. The state machine
//! creates it on entry and drops it on exit, which cancels its timers; a
//! ping armed in one period can never fire into the next.

use std::future::pending;
use std::pin::Pin;
use std::time::Duration;
use tokio::time::{self, Instant, Interval, MissedTickBehavior, Sleep};

/// Something the state machine must act on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatEvent {
    /// Write `ping{id}` to the socket now
    SendPing(u64),
    /// No pong arrived for `ping_id` within the timeout
    TimedOut { ping_id: u64, waited: Duration },
}

/// What a received pong meant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PongOutcome {
    /// It answered the outstanding ping
    Confirmed { round_trip: Duration },
    /// No matching ping was pending
    Ignored,
}

#[derive(Debug, Clone, Copy)]
struct PendingPing {
    id: u64,
    sent_at: Instant,
}

/// Ping/pong bookkeeping for one Connected period
#[derive(Debug)]
pub struct HeartbeatMonitor {
    interval: Duration,
    timeout: Duration,
    ticker: Interval,
    pending: Option<PendingPing>,
    deadline: Option<Pin<Box<Sleep>>>,
    last_ping_sent_at: Option<Instant>,
    next_id: u64,
    expired: bool,
}

impl HeartbeatMonitor {
    /// Start a monitor; the first ping is due one `interval` from now
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        let mut ticker = time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        Self {
            interval,
            timeout,
            ticker,
            pending: None,
            deadline: None,
            last_ping_sent_at: None,
            next_id: 1,
            expired: false,
        }
    }

    /// Time between pings
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// How long a ping may stay unanswered
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Id of the ping waiting for its pong, if any
    pub fn pending_ping(&self) -> Option<u64> {
        self.pending.map(|p| p.id)
    }

    /// When the most recent ping was handed out
    pub fn last_ping_sent_at(&self) -> Option<Instant> {
        self.last_ping_sent_at
    }

    /// True once a timeout has been reported
    pub fn is_expired(&self) -> bool {
        self.expired
    }

    /// Wait for the next thing the caller must do
    ///
    /// Cancel-safe: dropping the future before it completes loses nothing,
    /// so it can sit in a `tokio::select!` next to socket reads. After a
    /// timeout has been reported this never resolves again.
    pub async fn next_event(&mut self) -> HeartbeatEvent {
        if self.expired {
            return pending().await;
        }

        if let (Some(ping), Some(deadline)) = (self.pending, self.deadline.as_mut()) {
            deadline.as_mut().await;
            self.pending = None;
            self.deadline = None;
            self.expired = true;
            return HeartbeatEvent::TimedOut {
                ping_id: ping.id,
                waited: ping.sent_at.elapsed(),
            };
        }

        self.ticker.tick().await;
        let id = self.next_id;
        self.next_id += 1;

        let now = Instant::now();
        self.pending = Some(PendingPing { id, sent_at: now });
        self.last_ping_sent_at = Some(now);
        self.deadline = Some(Box::pin(time::sleep_until(now + self.timeout)));

        HeartbeatEvent::SendPing(id)
    }

    /// Feed a pong received from the peer
    ///
    /// A pong arriving at or after the deadline is ignored even if the
    /// timeout has not been reported yet.
    pub fn on_pong(&mut self, id: u64) -> PongOutcome {
        let timeout = self.timeout;
        match self.pending {
            Some(ping) if ping.id == id && !self.expired && ping.sent_at.elapsed() < timeout => {
                self.pending = None;
                self.deadline = None;
                PongOutcome::Confirmed {
                    round_trip: ping.sent_at.elapsed(),
                }
            }
            _ => PongOutcome::Ignored,
        }
    }
}
