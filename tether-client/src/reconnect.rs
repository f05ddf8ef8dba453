//! Reconnection policy and attempt bookkeeping
//!
//! [`ReconnectPolicy`] is a pure function of the attempt number:
//!
//! ```text
//! delay(attempt) = min(base_delay * 2^attempt, max_delay)
//! ```
//!
//! [`Backoff`] owns the attempt counter for one failure streak. The state
//! machine calls [`Backoff::record_failure`] on every failed attempt and
//! [`Backoff::confirm_live`] once a connection has survived a heartbeat
//! round-trip. A socket that opens and dies before that still counts as a
//! failure, so a flapping server cannot reset the streak.
//!
//! # Examples
//!
//! ```rust
//! use tether_client::ReconnectPolicy;
//! use std::time::Duration;
//!
//! let policy = ReconnectPolicy::new(Duration::from_secs(1), Duration::from_secs(30));
//! assert_eq!(policy.delay(0), Duration::from_secs(1));
//! assert_eq!(policy.delay(3), Duration::from_secs(8));
//! assert_eq!(policy.delay(10), Duration::from_secs(30));
//! ```

use std::time::Duration;

/// Exponential backoff parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    base_delay: Duration,
    max_delay: Duration,
    max_attempts: Option<u32>,
    jitter: bool,
}

impl ReconnectPolicy {
    /// Create a policy without an attempt limit and without jitter
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
            max_attempts: None,
            jitter: false,
        }
    }

    /// Give up after this many failed attempts in one streak
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Never give up
    pub fn unlimited(mut self) -> Self {
        self.max_attempts = None;
        self
    }

    /// Shave a random 0-25% off every delay to spread out reconnect storms
    pub fn with_jitter(mut self) -> Self {
        self.jitter = true;
        self
    }

    /// Delay for `attempt = 0`
    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    /// Upper bound of every delay
    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// Attempt limit, `None` when unlimited
    pub fn max_attempts(&self) -> Option<u32> {
        self.max_attempts
    }

    /// Whether jitter is applied by [`next_delay`](Self::next_delay)
    pub fn jitter(&self) -> bool {
        self.jitter
    }

    /// Deterministic delay for the given attempt
    ///
    /// Saturates at `max_delay` instead of overflowing for large attempts.
    pub fn delay(&self, attempt: u32) -> Duration {
        2u32.checked_pow(attempt)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }

    /// Delay to actually wait, with jitter applied when enabled
    ///
    /// The result is always within `[0.75 * delay(attempt), delay(attempt)]`.
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let delay = self.delay(attempt);
        if !self.jitter {
            return delay;
        }

        use rand::Rng;
        let jitter = delay.mul_f64(rand::thread_rng().gen_range(0.0..=0.25));
        delay.saturating_sub(jitter)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(30)).with_max_attempts(5)
    }
}

/// Outcome of a failed connection attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffDecision {
    /// Wait `delay`, then try again; `attempt` failures so far in this streak
    Retry { attempt: u32, delay: Duration },
    /// The attempt limit was reached
    GiveUp { attempts: u32 },
}

/// Attempt counter for the current failure streak
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: ReconnectPolicy,
    attempt: u32,
}

impl Backoff {
    /// Start with no failures recorded
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self { policy, attempt: 0 }
    }

    /// Failed attempts since the last confirmed-live connection
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// The policy driving this counter
    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    /// Record a failed attempt and decide what to do next
    ///
    /// The delay is computed from the count *before* this failure, so the
    /// first retry of a streak always waits `base_delay`.
    pub fn record_failure(&mut self) -> BackoffDecision {
        let delay = self.policy.next_delay(self.attempt);
        self.attempt = self.attempt.saturating_add(1);

        match self.policy.max_attempts {
            Some(max) if self.attempt >= max => BackoffDecision::GiveUp {
                attempts: self.attempt,
            },
            _ => BackoffDecision::Retry {
                attempt: self.attempt,
                delay,
            },
        }
    }

    /// The connection survived a heartbeat round-trip; the streak is over
    ///
    /// Returns true if the counter was actually reset.
    pub fn confirm_live(&mut self) -> bool {
        let had_failures = self.attempt > 0;
        self.attempt = 0;
        had_failures
    }

    /// Forget the streak after the caller gave up and starts over
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}
