//! Client builder for configuring heartbeats, reconnection and credentials
//!
//! The `ClientBuilder` provides a fluent API for everything a transport
//! needs before it starts:
//! - Heartbeat interval and timeout
//! - Reconnect policy (backoff, cap, attempt limit, jitter)
//! - Where auth tokens come from
//! - Observability (OpenTelemetry) and service name
//!
//! `build()` spawns the driver task and returns a handle without dialing;
//! call `connect()` when the session is ready.
//!
//! # Examples
//!
//! ```rust,no_run
//! use tether_client::{ClientBuilder, ReconnectPolicy};
//! use std::time::Duration;
//!
//! # async fn example() -> tether_core::Result<()> {
//! let client = ClientBuilder::new("wss://chat.example.com/ws")
//!     .token("session-token")
//!     .heartbeat(Duration::from_secs(15), Duration::from_secs(3))
//!     .reconnect(
//!         ReconnectPolicy::new(Duration::from_millis(500), Duration::from_secs(20))
//!             .with_max_attempts(8)
//!             .with_jitter(),
//!     )
//!     .with_default_observability()
//!     .service_name("mobile-chat")
//!     .build()?;
//!
//! client.connect()?;
//! # Ok(())
//! # }
//! ```

use crate::client::TetherClient;
use crate::config::TransportConfig;
use crate::connection_state::ConnectionState;
use crate::credentials::{CredentialStore, MemoryCredentials};
use crate::events::EventBus;
use crate::machine::{ConnectionStateMachine, Notifier};
use crate::metrics::ClientMetrics;
use crate::reconnect::ReconnectPolicy;
use crate::transport::{Connector, WebSocketConnector};
use std::sync::Arc;
use std::time::Duration;
use tether_core::{AuthToken, Error, ObservabilityConfig, Result};
use tokio::sync::{mpsc, watch};
use tracing::Instrument;

/// Builder for configuring and creating a TetherClient
pub struct ClientBuilder {
    config: TransportConfig,
    credentials: Arc<dyn CredentialStore>,
    connector: Arc<dyn Connector>,
    observability_config: Option<ObservabilityConfig>,
    service_name: Option<String>,
    metrics: Option<ClientMetrics>,
}

impl ClientBuilder {
    /// Create a builder with default heartbeat and reconnect settings
    ///
    /// The default credential store is empty: without `token()` or
    /// `credentials()` every connect reports `AuthenticationMissing`.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            config: TransportConfig::new(url),
            credentials: Arc::new(MemoryCredentials::new()),
            connector: Arc::new(WebSocketConnector),
            observability_config: None,
            service_name: None,
            metrics: None,
        }
    }

    /// Ping every `interval`, fail the connection if a pong takes longer than `timeout`
    pub fn heartbeat(mut self, interval: Duration, timeout: Duration) -> Self {
        self.config.heartbeat_interval = interval;
        self.config.heartbeat_timeout = timeout;
        self
    }

    /// Replace the reconnect policy
    pub fn reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.config.reconnect = policy;
        self
    }

    /// Use a fixed token
    pub fn token(self, token: impl Into<AuthToken>) -> Self {
        self.shared_credentials(Arc::new(MemoryCredentials::with_token(token)))
    }

    /// Ask `store` for a token before every dial
    pub fn credentials(self, store: impl CredentialStore + 'static) -> Self {
        self.shared_credentials(Arc::new(store))
    }

    /// Like [`credentials`](Self::credentials), for a store the caller keeps a handle to
    pub fn shared_credentials(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.credentials = store;
        self
    }

    /// Dial through `connector` instead of the WebSocket default
    pub fn connector(mut self, connector: impl Connector + 'static) -> Self {
        self.connector = Arc::new(connector);
        self
    }

    /// Enable OpenTelemetry observability with custom configuration
    pub fn with_observability(mut self, config: ObservabilityConfig) -> Self {
        self.observability_config = Some(config);
        self
    }

    /// Enable OpenTelemetry observability with default configuration
    pub fn with_default_observability(mut self) -> Self {
        self.observability_config = Some(ObservabilityConfig::default());
        self
    }

    /// Set service name for observability (used if observability is enabled)
    pub fn service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = Some(name.into());
        self
    }

    /// Record onto caller-built instruments instead of the global meter
    ///
    /// Works without [`with_observability`](Self::with_observability).
    pub fn metrics(mut self, metrics: ClientMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Settings the client will run with
    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Validate, spawn the driver on the current Tokio runtime and return its handle
    ///
    /// Does not dial. Fails with [`Error::InvalidConfig`] for unusable
    /// settings and [`Error::Internal`] outside a runtime or when
    /// observability cannot be initialized.
    pub fn build(self) -> Result<TetherClient> {
        self.config.validate()?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| Error::Internal(format!("No Tokio runtime available: {}", e)))?;

        let metrics = if let Some(mut config) = self.observability_config {
            if let Some(name) = self.service_name {
                config.service_name = name;
            }

            tether_core::init_observability(config.clone()).map_err(|e| {
                Error::Internal(format!("Failed to initialize observability: {}", e))
            })?;

            Some(
                self.metrics
                    .unwrap_or_else(|| ClientMetrics::new(&config.service_name)),
            )
        } else {
            self.metrics
        };
        let metrics = metrics.map(|metrics| {
            metrics.update_connection_state(ConnectionState::Disconnected);
            Arc::new(metrics)
        });

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let events = EventBus::new();

        let span = tracing::info_span!("tether", url = %self.config.url);
        let machine = ConnectionStateMachine::new(
            self.config,
            self.connector,
            self.credentials,
            commands_rx,
            Notifier::new(state_tx, events.clone(), metrics),
        );
        runtime.spawn(machine.run().instrument(span));

        Ok(TetherClient::new(commands_tx, state_rx, events))
    }
}
