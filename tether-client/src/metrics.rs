//! Client metrics definitions
//!
//! OpenTelemetry instruments describing transport health. They are recorded
//! by the state machine when observability is enabled through
//! `ClientBuilder::with_observability()` and exported by whatever meter
//! provider `tether_core::init_observability` installed.
//!
//! # Metrics Collected
//!
//! - **connection.state**: current state, see [`ConnectionState::metric_value`] (gauge)
//! - **messages.sent** / **messages.received**: payload traffic by kind (counter)
//! - **messages.queued**: payloads that had to wait for a connection (counter)
//! - **queue.depth**: outbound queue length after each change (gauge)
//! - **reconnect.attempts**: scheduled retries by cause (counter)
//! - **liveness.timeouts**: heartbeat deadlines missed (counter)
//! - **heartbeat.rtt**: ping/pong round-trip in seconds (histogram)
//! - **handler.failures**: event handlers that panicked (counter)
//! - **errors.total**: errors by type (counter)
//!
//! # Examples
//!
//! ```rust,no_run
//! use tether_client::ClientMetrics;
//!
//! let metrics = ClientMetrics::new("mobile-chat");
//! metrics.record_liveness_timeout();
//! ```

use crate::connection_state::{ConnectionState, FailureCause};
use opentelemetry::{
    global,
    metrics::{Counter, Gauge, Histogram, Meter},
    InstrumentationScope, KeyValue,
};
use std::time::Duration;

/// Transport instruments
pub struct ClientMetrics {
    pub connection_state: Gauge<i64>,
    pub messages_sent: Counter<u64>,
    pub messages_received: Counter<u64>,
    pub messages_queued: Counter<u64>,
    pub queue_depth: Gauge<u64>,
    pub reconnect_attempts: Counter<u64>,
    pub liveness_timeouts: Counter<u64>,
    /// Seconds
    pub heartbeat_rtt: Histogram<f64>,
    pub handler_failures: Counter<u64>,
    pub errors_total: Counter<u64>,
}

impl ClientMetrics {
    /// Instruments on the global meter provider, scoped to `service_name`
    pub fn new(service_name: impl Into<String>) -> Self {
        let scope = InstrumentationScope::builder(service_name.into()).build();
        let meter = global::meter_with_scope(scope);
        Self::new_with_meter(&meter)
    }

    /// Instruments on a caller-supplied meter
    pub fn new_with_meter(meter: &Meter) -> Self {
        Self {
            connection_state: meter
                .i64_gauge("tether.client.connection.state")
                .with_description("Connection state (0=disconnected, 1=connecting, 2=connected, 3=reconnect_wait, 4=closed)")
                .build(),
            messages_sent: meter
                .u64_counter("tether.client.messages.sent")
                .with_description("Payloads accepted by the socket")
                .build(),
            messages_received: meter
                .u64_counter("tether.client.messages.received")
                .with_description("Payloads received from the server")
                .build(),
            messages_queued: meter
                .u64_counter("tether.client.messages.queued")
                .with_description("Payloads queued while no connection was usable")
                .build(),
            queue_depth: meter
                .u64_gauge("tether.client.queue.depth")
                .with_description("Payloads waiting in the outbound queue")
                .build(),
            reconnect_attempts: meter
                .u64_counter("tether.client.reconnect.attempts")
                .with_description("Reconnect attempts scheduled")
                .build(),
            liveness_timeouts: meter
                .u64_counter("tether.client.liveness.timeouts")
                .with_description("Heartbeat pings that went unanswered")
                .build(),
            heartbeat_rtt: meter
                .f64_histogram("tether.client.heartbeat.rtt")
                .with_description("Heartbeat round-trip time in seconds")
                .with_unit("s")
                .build(),
            handler_failures: meter
                .u64_counter("tether.client.handler.failures")
                .with_description("Event handlers that panicked")
                .build(),
            errors_total: meter
                .u64_counter("tether.client.errors.total")
                .with_description("Total number of errors encountered")
                .build(),
        }
    }

    pub fn update_connection_state(&self, state: ConnectionState) {
        self.connection_state.record(state.metric_value(), &[]);
    }

    pub fn record_sent(&self, kind: &str) {
        self.messages_sent
            .add(1, &[KeyValue::new("kind", kind.to_string())]);
    }

    pub fn record_received(&self, kind: &str) {
        self.messages_received
            .add(1, &[KeyValue::new("kind", kind.to_string())]);
    }

    /// A payload was queued; `depth` is the queue length afterwards
    pub fn record_queued(&self, depth: usize) {
        self.messages_queued.add(1, &[]);
        self.record_queue_depth(depth);
    }

    pub fn record_queue_depth(&self, depth: usize) {
        self.queue_depth.record(depth as u64, &[]);
    }

    pub fn record_reconnect_attempt(&self, cause: FailureCause) {
        self.reconnect_attempts
            .add(1, &[KeyValue::new("cause", cause.to_string())]);
    }

    pub fn record_liveness_timeout(&self) {
        self.liveness_timeouts.add(1, &[]);
    }

    pub fn record_heartbeat_rtt(&self, round_trip: Duration) {
        self.heartbeat_rtt.record(round_trip.as_secs_f64(), &[]);
    }

    pub fn record_handler_failures(&self, count: u64) {
        if count > 0 {
            self.handler_failures.add(count, &[]);
        }
    }

    /// Record an error, labelled with `Error::label()`
    pub fn record_error(&self, error_type: &'static str) {
        self.errors_total
            .add(1, &[KeyValue::new("error_type", error_type)]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_core::Error;

    #[test]
    fn test_metrics_creation() {
        let metrics = ClientMetrics::new("test-client");

        // Without a provider these are no-ops; they must not panic.
        metrics.update_connection_state(ConnectionState::Connected);
        metrics.record_sent("chat.message");
        metrics.record_received("chat.message");
        metrics.record_queued(3);
        metrics.record_queue_depth(0);
        metrics.record_heartbeat_rtt(Duration::from_millis(42));
        metrics.record_handler_failures(0);
        metrics.record_handler_failures(2);
    }

    #[test]
    fn test_every_state_has_a_value() {
        let metrics = ClientMetrics::new("test-client-state");
        for state in [
            ConnectionState::Disconnected,
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::ReconnectWait,
            ConnectionState::Closed,
        ] {
            metrics.update_connection_state(state);
        }
    }

    #[test]
    fn test_failure_metrics() {
        let metrics = ClientMetrics::new("test-client-failures");
        metrics.record_reconnect_attempt(FailureCause::Transport);
        metrics.record_reconnect_attempt(FailureCause::LivenessTimeout);
        metrics.record_liveness_timeout();
        metrics.record_error(Error::Transport("reset".to_string()).label());
        metrics.record_error(Error::Closed.label());
    }
}
