//! Scripted-server plumbing shared by the integration tests.

#![allow(dead_code)]

use std::time::Duration;

use async_tungstenite::tokio::{accept_async, TokioAdapter};
use async_tungstenite::tungstenite::Message;
use async_tungstenite::WebSocketStream;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

pub type ServerWs = WebSocketStream<TokioAdapter<TcpStream>>;

/// Binds a scripted server socket, returning the listener and its `ws://`
/// address.
pub async fn bind_ws() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind scripted server");
    let addr = listener.local_addr().expect("local addr");

    (listener, format!("ws://{addr}"))
}

pub async fn accept_ws(listener: &TcpListener) -> ServerWs {
    let (stream, _) = timeout(Duration::from_secs(5), listener.accept())
        .await
        .expect("client never dialed")
        .expect("accept failed");

    accept_async(stream).await.expect("websocket handshake failed")
}

/// Receives the next text frame and parses it, failing the test after five
/// seconds of silence.
pub async fn recv_json(ws: &mut ServerWs) -> Value {
    loop {
        let message = timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for a client frame")
            .expect("client stream ended")
            .expect("client stream errored");

        match message {
            Message::Text(payload) => {
                return serde_json::from_str(&payload).expect("client sent invalid json")
            },
            Message::Binary(payload) => {
                return serde_json::from_slice(&payload).expect("client sent invalid json")
            },
            _ => continue,
        }
    }
}

/// True when no frame (other than ping/pong) arrives within `window`.
pub async fn assert_silent(ws: &mut ServerWs, window: Duration) -> bool {
    let result = timeout(window, async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                other => break other,
            }
        }
    })
    .await;

    result.is_err()
}

pub async fn send_json(ws: &mut ServerWs, value: &Value) {
    ws.send(Message::Text(value.to_string()))
        .await
        .expect("failed to send scripted frame");
}
