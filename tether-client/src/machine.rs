//! The connection state machine driver
//!
//! One task per client owns everything mutable: the socket, the outbound
//! queue, the attempt counter and the heartbeat monitor. Handles talk to it
//! through an unbounded command channel, so there is exactly one mutator and
//! no locking on the hot path.
//!
//! Each [`Phase`] carries the resources that only make sense in it: the dial
//! future while connecting, the socket and heartbeat while connected, the
//! backoff timer while waiting. Replacing the phase drops them, which is how
//! timers get cancelled. A heartbeat or backoff timer from one phase cannot
//! fire into another.
//!
//! The loop exits after an explicit close, or once every handle is dropped.

use crate::config::TransportConfig;
use crate::connection_state::{ConnectionState, FailureCause};
use crate::credentials::CredentialStore;
use crate::events::{EventBus, TransportEvent};
use crate::heartbeat::{HeartbeatEvent, HeartbeatMonitor, PongOutcome};
use crate::metrics::ClientMetrics;
use crate::network::Reachability;
use crate::queue::{DrainError, OutboundQueue, QueuedMessage};
use crate::reconnect::{Backoff, BackoffDecision};
use crate::transport::{Connector, Socket};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tether_core::{Envelope, Error, Result, WireMessage};
use tokio::sync::{mpsc, watch};
use tokio::time::{self, Sleep};

/// How long a retired socket gets to close cleanly in the background
const SOCKET_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Requests from handles to the driver
#[derive(Debug)]
pub(crate) enum Command {
    Connect,
    Send(Envelope),
    Close,
    Reset,
    Network(Reachability),
}

type Dial = Pin<Box<dyn Future<Output = Result<Box<dyn Socket>>> + Send>>;

struct Live {
    socket: Box<dyn Socket>,
    heartbeat: HeartbeatMonitor,
    /// A heartbeat round-trip completed during this period
    confirmed: bool,
}

struct Wait {
    /// `None` while waiting for credentials, or after the backoff elapsed
    /// with the network down
    timer: Option<Pin<Box<Sleep>>>,
    cause: FailureCause,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseReason {
    /// The attempt limit was reached; `reset()` may revive the machine
    GaveUp,
    /// `close()`, or every handle dropped
    Explicit,
}

enum Phase {
    Disconnected,
    Connecting(Dial),
    Connected(Live),
    ReconnectWait(Wait),
    Closed(CloseReason),
}

impl Phase {
    fn state(&self) -> ConnectionState {
        match self {
            Phase::Disconnected => ConnectionState::Disconnected,
            Phase::Connecting(_) => ConnectionState::Connecting,
            Phase::Connected(_) => ConnectionState::Connected,
            Phase::ReconnectWait(_) => ConnectionState::ReconnectWait,
            Phase::Closed(_) => ConnectionState::Closed,
        }
    }
}

/// What woke the driver up
enum Step {
    Command(Option<Command>),
    Dialed(Result<Box<dyn Socket>>),
    Heartbeat(HeartbeatEvent),
    Frame(Option<Result<WireMessage>>),
    BackoffElapsed,
}

/// Outward-facing side of the driver: state mirror, events, metrics
pub(crate) struct Notifier {
    state: watch::Sender<ConnectionState>,
    events: EventBus,
    metrics: Option<Arc<ClientMetrics>>,
}

impl Notifier {
    pub(crate) fn new(
        state: watch::Sender<ConnectionState>,
        events: EventBus,
        metrics: Option<Arc<ClientMetrics>>,
    ) -> Self {
        Self {
            state,
            events,
            metrics,
        }
    }

    fn set_state(&self, to: ConnectionState) {
        let from = self.state.send_replace(to);
        if from == to {
            return;
        }
        tracing::debug!(%from, %to, "Connection state changed");
        if let Some(ref m) = self.metrics {
            m.update_connection_state(to);
        }
        self.publish(TransportEvent::StateChanged { from, to });
    }

    fn publish(&self, event: TransportEvent) {
        let failures_before = self.events.failure_count();
        self.events.publish(&event);
        if let Some(ref m) = self.metrics {
            m.record_handler_failures(
                self.events
                    .failure_count()
                    .saturating_sub(failures_before),
            );
        }
    }

    fn metrics(&self) -> Option<&ClientMetrics> {
        self.metrics.as_deref()
    }
}

pub(crate) struct ConnectionStateMachine {
    config: TransportConfig,
    connector: Arc<dyn Connector>,
    credentials: Arc<dyn CredentialStore>,
    commands: mpsc::UnboundedReceiver<Command>,
    notifier: Notifier,
    phase: Phase,
    queue: OutboundQueue,
    backoff: Backoff,
    network: Reachability,
}

impl ConnectionStateMachine {
    pub(crate) fn new(
        config: TransportConfig,
        connector: Arc<dyn Connector>,
        credentials: Arc<dyn CredentialStore>,
        commands: mpsc::UnboundedReceiver<Command>,
        notifier: Notifier,
    ) -> Self {
        let backoff = Backoff::new(config.reconnect.clone());
        Self {
            config,
            connector,
            credentials,
            commands,
            notifier,
            phase: Phase::Disconnected,
            queue: OutboundQueue::new(),
            backoff,
            network: Reachability::Up,
        }
    }

    /// Drive the machine until it is closed for good
    pub(crate) async fn run(mut self) {
        loop {
            match self.next_step().await {
                Step::Command(Some(command)) => self.handle_command(command).await,
                Step::Command(None) => {
                    tracing::debug!("All client handles dropped");
                    self.enter_closed(CloseReason::Explicit);
                }
                Step::Dialed(result) => self.on_dialed(result).await,
                Step::Heartbeat(event) => self.on_heartbeat(event).await,
                Step::Frame(frame) => self.on_frame(frame).await,
                Step::BackoffElapsed => self.on_backoff_elapsed(),
            }

            if matches!(self.phase, Phase::Closed(CloseReason::Explicit)) {
                break;
            }
        }
        tracing::debug!("State machine stopped");
    }

    /// Wait on whatever the current phase can be woken by
    ///
    /// Commands always win ties, so `close()` beats a frame or a timer that
    /// became ready at the same time.
    async fn next_step(&mut self) -> Step {
        let commands = &mut self.commands;
        match &mut self.phase {
            Phase::Connecting(dial) => tokio::select! {
                biased;
                command = commands.recv() => Step::Command(command),
                result = dial.as_mut() => Step::Dialed(result),
            },
            Phase::Connected(live) => {
                let Live {
                    socket, heartbeat, ..
                } = live;
                tokio::select! {
                    biased;
                    command = commands.recv() => Step::Command(command),
                    event = heartbeat.next_event() => Step::Heartbeat(event),
                    frame = socket.recv() => Step::Frame(frame),
                }
            }
            Phase::ReconnectWait(Wait {
                timer: Some(timer), ..
            }) => tokio::select! {
                biased;
                command = commands.recv() => Step::Command(command),
                () = timer.as_mut() => Step::BackoffElapsed,
            },
            _ => Step::Command(commands.recv().await),
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect => self.on_connect(),
            Command::Send(envelope) => self.on_send(envelope).await,
            Command::Close => self.enter_closed(CloseReason::Explicit),
            Command::Reset => self.on_reset(),
            Command::Network(reachability) => self.on_network(reachability),
        }
    }

    fn on_connect(&mut self) {
        let state = self.phase.state();
        if state.is_active() {
            tracing::debug!(state = %state, "connect() ignored, already connecting or connected");
        } else if state == ConnectionState::Closed {
            tracing::debug!("connect() ignored while closed");
        } else {
            self.begin_connect();
        }
    }

    async fn on_send(&mut self, envelope: Envelope) {
        match &mut self.phase {
            Phase::Connected(live) => {
                let frame = WireMessage::Payload(envelope.clone());
                match live.socket.send(&frame).await {
                    Ok(()) => self.message_sent(envelope),
                    Err(error) => {
                        // Not accepted, so it goes out first after reconnecting.
                        self.queue
                            .requeue_front(std::iter::once(QueuedMessage::new(envelope)));
                        if let Some(m) = self.notifier.metrics() {
                            m.record_queued(self.queue.len());
                        }
                        self.transport_failure(error);
                    }
                }
            }
            Phase::Closed(_) => {
                tracing::debug!(kind = %envelope.kind, "Message dropped, transport is closed");
            }
            _ => {
                tracing::trace!(kind = %envelope.kind, "Message queued");
                self.queue.enqueue(envelope);
                if let Some(m) = self.notifier.metrics() {
                    m.record_queued(self.queue.len());
                }
            }
        }
    }

    fn on_reset(&mut self) {
        if matches!(self.phase, Phase::Closed(CloseReason::GaveUp)) {
            tracing::info!("Reset after giving up");
            self.backoff.reset();
            self.enter(Phase::Disconnected);
        } else {
            tracing::debug!(state = %self.phase.state(), "reset() ignored");
        }
    }

    fn on_network(&mut self, reachability: Reachability) {
        if reachability == self.network {
            return;
        }
        self.network = reachability;
        tracing::info!(network = %reachability, "Network reachability changed");
        self.notifier
            .publish(TransportEvent::NetworkChanged(reachability));

        let active = self.phase.state().is_active();
        let retryable = matches!(
            &self.phase,
            Phase::ReconnectWait(wait) if wait.cause != FailureCause::AuthenticationMissing
        );
        match reachability {
            Reachability::Down if active => self.fail(FailureCause::NetworkDown),
            // Entering Connecting drops the pending backoff timer first.
            Reachability::Up if retryable => self.begin_connect(),
            _ => {}
        }
    }

    fn on_backoff_elapsed(&mut self) {
        match self.network {
            Reachability::Up => self.begin_connect(),
            Reachability::Down => {
                tracing::debug!("Backoff elapsed while offline, waiting for network");
                if let Phase::ReconnectWait(wait) = &mut self.phase {
                    wait.timer = None;
                }
            }
        }
    }

    fn begin_connect(&mut self) {
        let Some(token) = self.credentials.token() else {
            tracing::warn!("No auth token available, waiting for connect()");
            self.notifier.set_state(ConnectionState::Connecting);
            self.fail(FailureCause::AuthenticationMissing);
            if let Some(m) = self.notifier.metrics() {
                m.record_error(Error::AuthenticationMissing.label());
            }
            self.notifier.publish(TransportEvent::AuthenticationMissing);
            return;
        };

        tracing::info!(
            url = %self.config.url,
            attempt = self.backoff.attempt(),
            "Connecting to server"
        );
        let connector = Arc::clone(&self.connector);
        let url = self.config.url.clone();
        let dial: Dial = Box::pin(async move { connector.connect(&url, &token).await });
        self.enter(Phase::Connecting(dial));
    }

    async fn on_dialed(&mut self, result: Result<Box<dyn Socket>>) {
        match result {
            Ok(socket) => self.enter_connected(socket).await,
            Err(error) => {
                tracing::warn!(error = %error, "Connection attempt failed");
                self.transport_failure(error);
            }
        }
    }

    async fn enter_connected(&mut self, socket: Box<dyn Socket>) {
        let heartbeat =
            HeartbeatMonitor::new(self.config.heartbeat_interval, self.config.heartbeat_timeout);
        self.enter(Phase::Connected(Live {
            socket,
            heartbeat,
            confirmed: false,
        }));
        tracing::info!(url = %self.config.url, "Connected");
        self.notifier.publish(TransportEvent::Connected);
        self.drain().await;
    }

    /// Flush the queue into the fresh socket before anything else is sent
    async fn drain(&mut self) {
        if self.queue.is_empty() {
            return;
        }
        let Phase::Connected(live) = &mut self.phase else {
            return;
        };

        let notifier = &self.notifier;
        let result = self
            .queue
            .drain_into(live.socket.as_mut(), |message| {
                if let Some(m) = notifier.metrics() {
                    m.record_sent(&message.envelope.kind);
                }
                notifier.publish(TransportEvent::MessageSent(message.envelope.clone()));
            })
            .await;

        if let Some(m) = self.notifier.metrics() {
            m.record_queue_depth(self.queue.len());
        }
        match result {
            Ok(count) => {
                tracing::debug!(count, "Outbound queue drained");
                self.notifier.publish(TransportEvent::Drained { count });
            }
            Err(DrainError { sent, error }) => {
                tracing::warn!(
                    sent,
                    remaining = self.queue.len(),
                    error = %error,
                    "Drain interrupted"
                );
                self.transport_failure(error);
            }
        }
    }

    async fn on_heartbeat(&mut self, event: HeartbeatEvent) {
        let Phase::Connected(live) = &mut self.phase else {
            return;
        };
        match event {
            HeartbeatEvent::SendPing(id) => {
                tracing::trace!(ping_id = id, "Sending heartbeat");
                if let Err(error) = live.socket.send(&WireMessage::Ping { id }).await {
                    self.transport_failure(error);
                }
            }
            HeartbeatEvent::TimedOut { ping_id, waited } => {
                tracing::warn!(
                    ping_id,
                    waited_ms = waited.as_millis() as u64,
                    "Heartbeat timed out"
                );
                if let Some(m) = self.notifier.metrics() {
                    m.record_liveness_timeout();
                    m.record_error(Error::LivenessTimeout(waited).label());
                }
                self.notifier
                    .publish(TransportEvent::LivenessTimeout { waited });
                self.fail(FailureCause::LivenessTimeout);
            }
        }
    }

    async fn on_frame(&mut self, frame: Option<Result<WireMessage>>) {
        let Phase::Connected(live) = &mut self.phase else {
            return;
        };
        match frame {
            None => {
                tracing::info!("Connection closed by server");
                self.transport_failure(Error::Transport("connection closed by server".to_string()));
            }
            Some(Err(error)) if error.is_decode() => {
                tracing::warn!(error = %error, "Skipping undecodable frame");
                if let Some(m) = self.notifier.metrics() {
                    m.record_error(error.label());
                }
            }
            Some(Err(error)) => {
                tracing::error!(error = %error, "WebSocket error");
                self.transport_failure(error);
            }
            Some(Ok(WireMessage::Pong { id })) => match live.heartbeat.on_pong(id) {
                PongOutcome::Confirmed { round_trip } => {
                    if !live.confirmed {
                        live.confirmed = true;
                        if self.backoff.confirm_live() {
                            tracing::info!("Connection confirmed live, attempt counter reset");
                        }
                    }
                    if let Some(m) = self.notifier.metrics() {
                        m.record_heartbeat_rtt(round_trip);
                    }
                    self.notifier
                        .publish(TransportEvent::LivenessConfirmed { round_trip });
                }
                PongOutcome::Ignored => {
                    tracing::debug!(pong_id = id, "Ignoring unexpected pong");
                }
            },
            Some(Ok(WireMessage::Ping { id })) => {
                if let Err(error) = live.socket.send(&WireMessage::Pong { id }).await {
                    self.transport_failure(error);
                }
            }
            Some(Ok(WireMessage::Payload(envelope))) => {
                tracing::trace!(kind = %envelope.kind, "Payload received");
                if let Some(m) = self.notifier.metrics() {
                    m.record_received(&envelope.kind);
                }
                self.notifier
                    .publish(TransportEvent::MessageReceived(envelope));
            }
        }
    }

    fn message_sent(&self, envelope: Envelope) {
        if let Some(m) = self.notifier.metrics() {
            m.record_sent(&envelope.kind);
        }
        self.notifier.publish(TransportEvent::MessageSent(envelope));
    }

    fn transport_failure(&mut self, error: Error) {
        if let Some(m) = self.notifier.metrics() {
            m.record_error(error.label());
        }
        self.notifier.publish(TransportEvent::TransportError {
            message: error.to_string(),
        });
        self.fail(FailureCause::Transport);
    }

    /// Leave Connecting/Connected and either schedule a retry or give up
    fn fail(&mut self, cause: FailureCause) {
        if !cause.counts_as_attempt() {
            // Parked without a timer until the caller connects again.
            self.enter(Phase::ReconnectWait(Wait { timer: None, cause }));
            return;
        }
        match self.backoff.record_failure() {
            BackoffDecision::Retry { attempt, delay } => {
                tracing::info!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    cause = %cause,
                    "Reconnect scheduled"
                );
                self.enter(Phase::ReconnectWait(Wait {
                    timer: Some(Box::pin(time::sleep(delay))),
                    cause,
                }));
                if let Some(m) = self.notifier.metrics() {
                    m.record_reconnect_attempt(cause);
                }
                self.notifier.publish(TransportEvent::Reconnecting {
                    attempt,
                    delay,
                    cause,
                });
            }
            BackoffDecision::GiveUp { attempts } => {
                tracing::error!(attempts, cause = %cause, "Reconnection abandoned (max attempts reached)");
                self.enter(Phase::ReconnectWait(Wait { timer: None, cause }));
                if let Some(m) = self.notifier.metrics() {
                    m.record_error(Error::MaxAttemptsExceeded { attempts }.label());
                }
                self.notifier
                    .publish(TransportEvent::MaxAttemptsExceeded { attempts });
                self.enter_closed(CloseReason::GaveUp);
            }
        }
    }

    fn enter_closed(&mut self, reason: CloseReason) {
        if let Phase::Closed(current) = &mut self.phase {
            // close() after giving up makes it final without a second event.
            if reason == CloseReason::Explicit {
                *current = CloseReason::Explicit;
            }
            return;
        }

        let discarded = self.queue.clear();
        self.enter(Phase::Closed(reason));
        if let Some(m) = self.notifier.metrics() {
            m.record_queue_depth(0);
        }
        tracing::info!(reason = ?reason, discarded, "Transport closed");
        self.notifier.publish(TransportEvent::Closed { discarded });
    }

    /// Swap in the next phase, releasing whatever the previous one held
    fn enter(&mut self, next: Phase) {
        let to = next.state();
        let previous = std::mem::replace(&mut self.phase, next);
        if let Phase::Connected(live) = previous {
            // Dropping `live.heartbeat` here cancels its timers.
            close_in_background(live.socket);
        }
        self.notifier.set_state(to);
    }
}

fn close_in_background(mut socket: Box<dyn Socket>) {
    tokio::spawn(async move {
        match time::timeout(SOCKET_CLOSE_TIMEOUT, socket.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::debug!(error = %e, "Error closing socket"),
            Err(_) => tracing::debug!("Timed out closing socket"),
        }
    });
}
