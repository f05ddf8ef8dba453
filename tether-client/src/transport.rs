//! Socket seam between the state machine and the network
//!
//! The state machine only needs three things from a socket: write a frame,
//! read the next frame, close. [`Socket`] captures that, and [`Connector`]
//! dials new sockets. [`WebSocketConnector`] is the production
//! implementation on top of `tokio-tungstenite`; tests plug in scripted
//! in-memory connectors instead.
//!
//! # Cancel Safety
//!
//! The state machine polls [`Socket::recv`] inside `tokio::select!` and drops
//! the future whenever another branch wins. Implementations must not lose a
//! frame when that happens.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tether_core::{codec, AuthToken, Error, Result, WireMessage};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header::AUTHORIZATION, HeaderValue};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

/// An open, exclusively owned connection to the message server
#[async_trait]
pub trait Socket: Send {
    /// Write one frame; `Ok` means the socket accepted it
    async fn send(&mut self, message: &WireMessage) -> Result<()>;

    /// Read the next frame
    ///
    /// - `None`: the peer closed the connection
    /// - `Some(Err(e))` with `e.is_decode()`: a bad frame, the socket is still usable
    /// - `Some(Err(_))` otherwise: the socket is broken
    async fn recv(&mut self) -> Option<Result<WireMessage>>;

    /// Close the connection
    async fn close(&mut self) -> Result<()>;
}

/// Opens sockets to the message server
#[async_trait]
pub trait Connector: Send + Sync {
    /// Dial `url`, presenting `token`
    async fn connect(&self, url: &str, token: &AuthToken) -> Result<Box<dyn Socket>>;
}

/// Dials WebSocket connections with a bearer token
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, url: &str, token: &AuthToken) -> Result<Box<dyn Socket>> {
        let mut request = url
            .into_client_request()
            .map_err(|e| Error::Transport(e.to_string()))?;

        let header = HeaderValue::from_str(&token.bearer())
            .map_err(|e| Error::Transport(format!("Invalid token header: {}", e)))?;
        request.headers_mut().insert(AUTHORIZATION, header);

        let (stream, _) = connect_async(request)
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;

        Ok(Box::new(WebSocketSocket { stream }))
    }
}

/// [`Socket`] over a tungstenite WebSocket stream, one JSON frame per text message
pub struct WebSocketSocket {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Socket for WebSocketSocket {
    async fn send(&mut self, message: &WireMessage) -> Result<()> {
        let text = codec::encode(message)?;
        self.stream
            .send(Message::Text(text))
            .await
            .map_err(|e| Error::Transport(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<WireMessage>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(codec::decode(&text)),
                Ok(Message::Binary(bytes)) => return Some(codec::decode_bytes(&bytes)),
                Ok(Message::Close(frame)) => {
                    tracing::debug!(frame = ?frame, "Close frame received");
                    return None;
                }
                // Control frames are answered by tungstenite itself.
                Ok(_) => continue,
                Err(e) => return Some(Err(Error::Transport(e.to_string()))),
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.stream
            .close(None)
            .await
            .map_err(|e| Error::Transport(e.to_string()))
    }
}
