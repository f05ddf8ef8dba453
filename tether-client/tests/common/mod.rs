//! Common test utilities for tether-client integration tests
//!
//! Two kinds of peers:
//! - [`MockWsServer`]: a real WebSocket listener on localhost, for tests that
//!   go through `WebSocketConnector`
//! - [`MockConnector`]: a scripted in-memory connector whose sockets are
//!   driven by the test through [`MockPeer`]; safe under paused time

#![allow(dead_code)]

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tether_client::{
    ClientBuilder, ConnectionState, Connector, EventKind, Socket, TetherClient, TransportEvent,
};
use tether_core::{codec, AuthToken, Envelope, Error, Result, WireMessage};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::Message;

// ---------------------------------------------------------------------------
// Real WebSocket server
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum ServerCommand {
    Push(String),
    Hangup,
}

/// Mock WebSocket server for client testing
///
/// Answers every `ping{id}` with `pong{id}` (unless created with
/// [`silent`](Self::silent)), records the `Authorization` header of every
/// handshake and forwards every received payload to the test.
pub struct MockWsServer {
    addr: SocketAddr,
    shutdown_tx: mpsc::Sender<()>,
    commands: broadcast::Sender<ServerCommand>,
    payload_rx: mpsc::UnboundedReceiver<Envelope>,
    auth_rx: mpsc::UnboundedReceiver<Option<String>>,
}

impl MockWsServer {
    /// Start a server that answers heartbeats
    pub async fn new() -> Self {
        Self::start(true).await
    }

    /// Start a server that never answers heartbeats
    pub async fn silent() -> Self {
        Self::start(false).await
    }

    async fn start(auto_pong: bool) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let (commands, _) = broadcast::channel::<ServerCommand>(16);
        let (payload_tx, payload_rx) = mpsc::unbounded_channel();
        let (auth_tx, auth_rx) = mpsc::unbounded_channel();

        let server_commands = commands.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    accepted = listener.accept() => {
                        let Ok((stream, _)) = accepted else { continue };
                        let auth_tx = auth_tx.clone();
                        let payload_tx = payload_tx.clone();
                        let mut commands_rx = server_commands.subscribe();

                        tokio::spawn(async move {
                            let callback = |request: &Request,
                                            response: Response|
                             -> std::result::Result<Response, ErrorResponse> {
                                let header = request
                                    .headers()
                                    .get(AUTHORIZATION)
                                    .and_then(|v| v.to_str().ok())
                                    .map(str::to_string);
                                let _ = auth_tx.send(header);
                                Ok(response)
                            };
                            let Ok(ws_stream) = accept_hdr_async(stream, callback).await else {
                                return;
                            };
                            let (mut write, mut read) = ws_stream.split();

                            loop {
                                tokio::select! {
                                    command = commands_rx.recv() => match command {
                                        Ok(ServerCommand::Push(text)) => {
                                            let _ = write.send(Message::Text(text)).await;
                                        }
                                        Ok(ServerCommand::Hangup) | Err(_) => {
                                            let _ = write.send(Message::Close(None)).await;
                                            break;
                                        }
                                    },
                                    frame = read.next() => match frame {
                                        Some(Ok(Message::Text(text))) => match codec::decode(&text) {
                                            Ok(WireMessage::Ping { id }) if auto_pong => {
                                                let pong = codec::encode(&WireMessage::Pong { id }).unwrap();
                                                let _ = write.send(Message::Text(pong)).await;
                                            }
                                            Ok(WireMessage::Payload(envelope)) => {
                                                let _ = payload_tx.send(envelope);
                                            }
                                            _ => {}
                                        },
                                        Some(Ok(_)) => continue,
                                        _ => break,
                                    },
                                }
                            }
                        });
                    }
                }
            }
        });

        Self {
            addr,
            shutdown_tx,
            commands,
            payload_rx,
            auth_rx,
        }
    }

    /// WebSocket URL of this server
    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Next payload received from any client (5 s timeout)
    pub async fn next_payload(&mut self) -> Option<Envelope> {
        tokio::time::timeout(Duration::from_secs(5), self.payload_rx.recv())
            .await
            .ok()
            .flatten()
    }

    /// `Authorization` header of the next handshake (5 s timeout)
    pub async fn next_handshake(&mut self) -> Option<Option<String>> {
        tokio::time::timeout(Duration::from_secs(5), self.auth_rx.recv())
            .await
            .ok()
            .flatten()
    }

    /// Send a payload to every connected client
    pub fn push(&self, envelope: Envelope) {
        let text = codec::encode(&WireMessage::Payload(envelope)).unwrap();
        let _ = self.commands.send(ServerCommand::Push(text));
    }

    /// Close every open connection; the listener keeps accepting
    pub fn hangup(&self) {
        let _ = self.commands.send(ServerCommand::Hangup);
    }

    /// Stop accepting and drop every connection
    pub async fn shutdown(self) {
        self.hangup();
        let _ = self.shutdown_tx.send(()).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

// ---------------------------------------------------------------------------
// Scripted in-memory connector
// ---------------------------------------------------------------------------

/// What the next dial does
#[derive(Debug, Clone, Copy)]
pub enum Dial {
    /// Open a socket
    Accept {
        /// Answer every ping with a pong
        auto_pong: bool,
        /// Writes accepted before every further write fails
        write_budget: Option<usize>,
    },
    /// Fail the dial
    Refuse,
    /// Never complete
    Hang,
}

impl Dial {
    pub fn healthy() -> Self {
        Dial::Accept {
            auto_pong: true,
            write_budget: None,
        }
    }

    pub fn silent() -> Self {
        Dial::Accept {
            auto_pong: false,
            write_budget: None,
        }
    }

    pub fn write_budget(budget: usize) -> Self {
        Dial::Accept {
            auto_pong: true,
            write_budget: Some(budget),
        }
    }
}

struct ConnectorState {
    script: Mutex<VecDeque<Dial>>,
    fallback: Dial,
    attempts: AtomicUsize,
    tokens: Mutex<Vec<String>>,
    peers: mpsc::UnboundedSender<MockPeer>,
}

/// Connector whose dials follow a script, then a fallback
#[derive(Clone)]
pub struct MockConnector {
    state: Arc<ConnectorState>,
}

impl MockConnector {
    /// `script` is consumed first, then every dial does `fallback`
    pub fn new(script: Vec<Dial>, fallback: Dial) -> (Self, mpsc::UnboundedReceiver<MockPeer>) {
        let (peers, peers_rx) = mpsc::unbounded_channel();
        let connector = Self {
            state: Arc::new(ConnectorState {
                script: Mutex::new(script.into()),
                fallback,
                attempts: AtomicUsize::new(0),
                tokens: Mutex::new(Vec::new()),
                peers,
            }),
        };
        (connector, peers_rx)
    }

    /// Every dial opens a socket that answers heartbeats
    pub fn healthy() -> (Self, mpsc::UnboundedReceiver<MockPeer>) {
        Self::new(Vec::new(), Dial::healthy())
    }

    /// Every dial fails
    pub fn refusing() -> (Self, mpsc::UnboundedReceiver<MockPeer>) {
        Self::new(Vec::new(), Dial::Refuse)
    }

    /// Dials made so far
    pub fn attempts(&self) -> usize {
        self.state.attempts.load(Ordering::SeqCst)
    }

    /// Tokens presented, in dial order
    pub fn tokens(&self) -> Vec<String> {
        self.state.tokens.lock().unwrap().clone()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, _url: &str, token: &AuthToken) -> Result<Box<dyn Socket>> {
        self.state.attempts.fetch_add(1, Ordering::SeqCst);
        self.state
            .tokens
            .lock()
            .unwrap()
            .push(token.as_str().to_string());

        let dial = self
            .state
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(self.state.fallback);

        match dial {
            Dial::Refuse => Err(Error::Transport("connection refused".to_string())),
            Dial::Hang => std::future::pending::<Result<Box<dyn Socket>>>().await,
            Dial::Accept {
                auto_pong,
                write_budget,
            } => {
                let (socket, peer) = MockSocket::pair(auto_pong, write_budget);
                let _ = self.state.peers.send(peer);
                Ok(Box::new(socket))
            }
        }
    }
}

enum Inbound {
    Frame(Result<WireMessage>),
    Hangup,
}

struct MockSocket {
    written: Arc<Mutex<Vec<WireMessage>>>,
    inbound_rx: mpsc::UnboundedReceiver<Inbound>,
    inbound_tx: mpsc::UnboundedSender<Inbound>,
    auto_pong: bool,
    write_budget: Option<usize>,
    closed: Arc<AtomicBool>,
}

impl MockSocket {
    fn pair(auto_pong: bool, write_budget: Option<usize>) -> (Self, MockPeer) {
        let written = Arc::new(Mutex::new(Vec::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        let peer = MockPeer {
            written: Arc::clone(&written),
            inbound: inbound_tx.clone(),
            closed: Arc::clone(&closed),
        };
        let socket = Self {
            written,
            inbound_rx,
            inbound_tx,
            auto_pong,
            write_budget,
            closed,
        };
        (socket, peer)
    }
}

#[async_trait]
impl Socket for MockSocket {
    async fn send(&mut self, message: &WireMessage) -> Result<()> {
        if let Some(budget) = self.write_budget.as_mut() {
            if *budget == 0 {
                return Err(Error::Transport("broken pipe".to_string()));
            }
            *budget -= 1;
        }
        self.written.lock().unwrap().push(message.clone());

        if let (true, WireMessage::Ping { id }) = (self.auto_pong, message) {
            let _ = self
                .inbound_tx
                .send(Inbound::Frame(Ok(WireMessage::Pong { id: *id })));
        }
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<WireMessage>> {
        match self.inbound_rx.recv().await {
            Some(Inbound::Frame(frame)) => Some(frame),
            Some(Inbound::Hangup) => None,
            // Peer handle dropped without hanging up: stay open.
            None => std::future::pending::<Option<Result<WireMessage>>>().await,
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// The server side of one [`MockConnector`] socket
pub struct MockPeer {
    written: Arc<Mutex<Vec<WireMessage>>>,
    inbound: mpsc::UnboundedSender<Inbound>,
    closed: Arc<AtomicBool>,
}

impl MockPeer {
    /// Every frame the client wrote, in order
    pub fn written(&self) -> Vec<WireMessage> {
        self.written.lock().unwrap().clone()
    }

    /// Kinds of the payloads the client wrote, in order
    pub fn payload_kinds(&self) -> Vec<String> {
        self.written()
            .into_iter()
            .filter_map(|frame| match frame {
                WireMessage::Payload(envelope) => Some(envelope.kind),
                _ => None,
            })
            .collect()
    }

    /// Ids of the pings the client wrote
    pub fn pings(&self) -> Vec<u64> {
        self.written()
            .into_iter()
            .filter_map(|frame| match frame {
                WireMessage::Ping { id } => Some(id),
                _ => None,
            })
            .collect()
    }

    /// Deliver a frame to the client
    pub fn push(&self, message: WireMessage) {
        let _ = self.inbound.send(Inbound::Frame(Ok(message)));
    }

    /// Deliver a read error to the client
    pub fn push_error(&self, error: Error) {
        let _ = self.inbound.send(Inbound::Frame(Err(error)));
    }

    /// Close the connection from the server side
    pub fn hangup(&self) {
        let _ = self.inbound.send(Inbound::Hangup);
    }

    /// True once the client closed this socket
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// Client helpers
// ---------------------------------------------------------------------------

/// Client with default settings, a fixed token and the given connector
pub fn mock_client(connector: MockConnector) -> TetherClient {
    ClientBuilder::new("ws://mock.invalid/ws")
        .token("test-token")
        .connector(connector)
        .build()
        .unwrap()
}

/// Let the driver process everything that is ready
///
/// Under paused time this returns once every task is idle, advancing the
/// clock by a single millisecond.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

/// Wait until the client reaches `state`
pub async fn wait_for_state(client: &TetherClient, state: ConnectionState) {
    let mut rx = client.watch_state();
    let reached = tokio::time::timeout(Duration::from_secs(600), rx.wait_for(|s| *s == state))
        .await
        .map(|result| result.is_ok())
        .unwrap_or(false);
    assert!(reached, "client never reached {}", state);
}

/// Channel receiving every event of `kind`, for tests on real time
pub fn events_of(client: &TetherClient, kind: EventKind) -> mpsc::UnboundedReceiver<TransportEvent> {
    let (tx, rx) = mpsc::unbounded_channel();
    client.subscribe(kind, move |event| {
        let _ = tx.send(event.clone());
    });
    rx
}

/// Next event from [`events_of`] (5 s timeout)
pub async fn next_event(rx: &mut mpsc::UnboundedReceiver<TransportEvent>) -> TransportEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .ok()
        .flatten()
        .expect("event not published in time")
}

pub fn payload(kind: &str) -> Envelope {
    Envelope::new(kind, serde_json::json!({ "kind": kind }))
}

/// Records every event a client publishes
#[derive(Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<TransportEvent>>>,
}

impl EventLog {
    pub fn attach(client: &TetherClient) -> Self {
        let log = Self::default();
        let events = Arc::clone(&log.events);
        client.subscribe_all(move |event| events.lock().unwrap().push(event.clone()));
        log
    }

    pub fn events(&self) -> Vec<TransportEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    /// Events recorded after the first `from`
    pub fn since(&self, from: usize) -> Vec<TransportEvent> {
        self.events()[from..].to_vec()
    }

    pub fn count(&self, kind: EventKind) -> usize {
        self.events().iter().filter(|e| e.kind() == kind).count()
    }

    /// Kinds of payloads reported as sent, in order
    pub fn sent_kinds(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                TransportEvent::MessageSent(envelope) => Some(envelope.kind),
                _ => None,
            })
            .collect()
    }

    /// Target states of every transition, in order
    pub fn states(&self) -> Vec<ConnectionState> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                TransportEvent::StateChanged { to, .. } => Some(to),
                _ => None,
            })
            .collect()
    }

    /// `(attempt, delay)` of every scheduled retry
    pub fn retries(&self) -> Vec<(u32, Duration)> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                TransportEvent::Reconnecting { attempt, delay, .. } => Some((attempt, delay)),
                _ => None,
            })
            .collect()
    }
}
