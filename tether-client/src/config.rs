//! Transport configuration
//!
//! Defaults: ping every 30 s, 5 s to answer, reconnect after 1 s doubling up
//! to 30 s, give up after 5 failed attempts.

use crate::reconnect::ReconnectPolicy;
use std::time::Duration;
use tether_core::{Error, Result};

/// Default time between heartbeat pings
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Default time a ping may go unanswered
pub const DEFAULT_HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(5);

/// Everything the state machine needs to know up front
#[derive(Debug, Clone, PartialEq)]
pub struct TransportConfig {
    /// Server endpoint, e.g. `wss://chat.example.com/ws`
    pub url: String,
    pub heartbeat_interval: Duration,
    pub heartbeat_timeout: Duration,
    pub reconnect: ReconnectPolicy,
}

impl TransportConfig {
    /// Defaults for `url`
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Check the settings are usable
    pub fn validate(&self) -> Result<()> {
        if self.url.trim().is_empty() {
            return Err(Error::InvalidConfig("url must not be empty".to_string()));
        }
        if self.heartbeat_interval.is_zero() {
            return Err(Error::InvalidConfig(
                "heartbeat_interval must be greater than zero".to_string(),
            ));
        }
        if self.heartbeat_timeout.is_zero() {
            return Err(Error::InvalidConfig(
                "heartbeat_timeout must be greater than zero".to_string(),
            ));
        }
        if self.heartbeat_timeout >= self.heartbeat_interval {
            return Err(Error::InvalidConfig(format!(
                "heartbeat_timeout ({:?}) must be shorter than heartbeat_interval ({:?})",
                self.heartbeat_timeout, self.heartbeat_interval
            )));
        }
        if self.reconnect.base_delay().is_zero() {
            return Err(Error::InvalidConfig(
                "reconnect base delay must be greater than zero".to_string(),
            ));
        }
        if self.reconnect.base_delay() > self.reconnect.max_delay() {
            return Err(Error::InvalidConfig(format!(
                "reconnect base delay ({:?}) exceeds max delay ({:?})",
                self.reconnect.base_delay(),
                self.reconnect.max_delay()
            )));
        }
        if self.reconnect.max_attempts() == Some(0) {
            return Err(Error::InvalidConfig(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            heartbeat_timeout: DEFAULT_HEARTBEAT_TIMEOUT,
            reconnect: ReconnectPolicy::default(),
        }
    }
}
