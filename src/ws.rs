//! Shared WebSocket plumbing for the control and voice gateways.
//!
//! Both state machines speak the same `{op, d, ...}` JSON framing over a
//! TLS WebSocket; this module owns connecting and the single decode step.

use std::fmt;

use async_tungstenite::tokio::ConnectStream;
use async_tungstenite::tungstenite::protocol::CloseFrame;
use async_tungstenite::tungstenite::{Error as TungsteniteError, Message};
use async_tungstenite::WebSocketStream;
use futures::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;
use url::Url;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the socket itself, kept separate from protocol errors so
/// callers can tell a decode problem (drop the frame) from a transport
/// problem (reconnect).
#[derive(Debug)]
pub enum Error {
    /// A frame arrived but its JSON did not parse.
    Json(serde_json::Error),
    /// The underlying socket failed.
    Tungstenite(TungsteniteError),
    /// The peer closed the connection, possibly with a close frame.
    Closed(Option<CloseFrame<'static>>),
}

impl Error {
    /// Close code carried by the peer's close frame, if any.
    pub fn close_code(&self) -> Option<u16> {
        match self {
            Error::Closed(Some(frame)) => Some(frame.code.into()),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Json(e)
    }
}

impl From<TungsteniteError> for Error {
    fn from(e: TungsteniteError) -> Self {
        Error::Tungstenite(e)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Json(e) => write!(f, "json error: {e}"),
            Error::Tungstenite(e) => write!(f, "websocket error: {e}"),
            Error::Closed(Some(frame)) => {
                write!(f, "connection closed: {} {}", u16::from(frame.code), frame.reason)
            },
            Error::Closed(None) => f.write_str("connection closed"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Json(e) => Some(e),
            Error::Tungstenite(e) => Some(e),
            Error::Closed(_) => None,
        }
    }
}

pub struct WsClient(WebSocketStream<ConnectStream>);

impl WsClient {
    pub async fn connect(url: Url) -> Result<Self> {
        let (stream, _) = async_tungstenite::tokio::connect_async(url.as_str()).await?;

        Ok(Self(stream))
    }

    /// Receives one frame and decodes it.
    ///
    /// Returns `Ok(None)` for control frames (ping/pong) so callers can
    /// simply loop. A stream that ran dry is reported as [`Error::Closed`].
    ///
    /// Cancel-safe: no partial frame state is held across `.await` points
    /// outside the stream itself, so this may be used inside `select!`.
    pub async fn recv_json<T: DeserializeOwned>(&mut self) -> Result<Option<T>> {
        let message = match self.0.next().await {
            Some(Ok(message)) => message,
            Some(Err(e)) => return Err(e.into()),
            None => return Err(Error::Closed(None)),
        };

        match message {
            Message::Text(payload) => serde_json::from_str(&payload).map(Some).map_err(|why| {
                warn!("err deserializing text: {why:?}; text: {payload}");

                why.into()
            }),
            Message::Binary(bytes) => serde_json::from_slice(&bytes).map(Some).map_err(|why| {
                warn!("err deserializing bytes: {why:?}; {} bytes", bytes.len());

                why.into()
            }),
            Message::Close(frame) => Err(Error::Closed(frame)),
            // Ping/Pong behaviour is internally handled by tungstenite.
            _ => Ok(None),
        }
    }

    pub async fn send_json<T: Serialize>(&mut self, value: &T) -> Result<()> {
        let message = serde_json::to_string(value).map(Message::Text)?;

        self.0.send(message).await?;
        Ok(())
    }

    pub async fn close(&mut self) -> Result<()> {
        self.0.close(None).await?;
        Ok(())
    }
}

impl fmt::Debug for WsClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WsClient").finish_non_exhaustive()
    }
}
