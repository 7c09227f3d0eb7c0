//! Event-router scenarios: interactions and messages end-to-end through a
//! scripted gateway and a stubbed REST endpoint.

mod common;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use bellbird::config::{AppEnv, Config};
use bellbird::model::id::ApplicationId;
use bellbird::{Http, Manager, Session};

use common::{accept_ws, assert_silent, bind_ws, recv_json, send_json, ServerWs};

/// One recorded request: method, path, raw head, body.
type RecordedRequest = (String, String, String, String);

struct HttpStub {
    base_url: String,
    requests: flume::Receiver<RecordedRequest>,
}

async fn read_request(stream: &mut TcpStream) -> Option<(String, String, String)> {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];

    while !head.ends_with(b"\r\n\r\n") {
        match stream.read(&mut byte).await {
            Ok(0) => return None,
            Ok(_) => head.extend_from_slice(&byte),
            Err(_) => return None,
        }
    }

    let head = String::from_utf8_lossy(&head).into_owned();
    let content_length = head
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse::<usize>().ok())?
        })
        .unwrap_or(0);

    let mut body = vec![0u8; content_length];
    if content_length > 0 && stream.read_exact(&mut body).await.is_err() {
        return None;
    }

    let request_line = head.lines().next().unwrap_or_default().to_owned();
    Some((request_line, head, String::from_utf8_lossy(&body).into_owned()))
}

/// A one-connection-per-request HTTP responder: 404 for voice-state
/// lookups, 204 for interaction callbacks, 200 for message creation.
async fn spawn_http_stub() -> HttpStub {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind http stub");
    let base_url = format!("http://{}", listener.local_addr().expect("local addr"));
    let (tx, rx) = flume::unbounded();

    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            let tx = tx.clone();
            tokio::spawn(async move {
                while let Some((request_line, head, body)) = read_request(&mut stream).await {
                    let mut parts = request_line.split_whitespace();
                    let method = parts.next().unwrap_or_default().to_owned();
                    let path = parts.next().unwrap_or_default().to_owned();

                    let (status, payload) = if path.starts_with("/guilds/") {
                        ("404 Not Found", r#"{"message":"Unknown Guild Member"}"#)
                    } else if path.starts_with("/interactions/") {
                        ("204 No Content", "")
                    } else {
                        ("200 OK", "{}")
                    };

                    let response = format!(
                        "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\n\r\n{payload}",
                        payload.len(),
                    );
                    if stream.write_all(response.as_bytes()).await.is_err() {
                        break;
                    }

                    let _ = tx.send((method, path, head, body));
                }
            });
        }
    });

    HttpStub {
        base_url,
        requests: rx,
    }
}

impl HttpStub {
    async fn next_request(&self) -> RecordedRequest {
        timeout(Duration::from_secs(5), self.requests.recv_async())
            .await
            .expect("expected a rest request")
            .expect("http stub went away")
    }
}

/// Runs a session against a scripted gateway, returning the server socket
/// positioned just after READY.
async fn ready_session(
    stub_base_url: String,
    root: &CancellationToken,
) -> (ServerWs, tokio::task::JoinHandle<Result<(), bellbird::gateway::Error>>) {
    let (listener, gateway_address) = bind_ws().await;

    let config = Config {
        bot_token: "token".into(),
        application_id: ApplicationId(99),
        public_key: "pk".into(),
        gateway_version: 10,
        voice_gateway_version: 8,
        http_base_url: stub_base_url,
        gateway_address,
        app_env: AppEnv::Development,
        bot_intents: 641,
        media_dir: PathBuf::from("./media"),
    };

    let http = Arc::new(Http::new(config.http_base_url.clone(), config.bot_token.clone()));
    let manager = Arc::new(Manager::new());
    let session = Session::new(&config, http, manager, root.clone());
    let run = tokio::spawn(session.run());

    let mut server = accept_ws(&listener).await;
    send_json(&mut server, &json!({"op": 10, "d": {"heartbeat_interval": 60000}})).await;

    let identify = recv_json(&mut server).await;
    assert_eq!(identify["op"], 2);

    send_json(
        &mut server,
        &json!({
            "op": 0,
            "s": 1,
            "t": "READY",
            "d": {
                "session_id": "s1",
                "resume_gateway_url": "wss://resume.example",
                "user": {"id": "42", "username": "bellbird"},
            },
        }),
    )
    .await;

    (server, run)
}

#[tokio::test]
async fn interaction_without_voice_state_gets_asked_to_join() {
    let stub = spawn_http_stub().await;
    let root = CancellationToken::new();
    let (mut server, run) = ready_session(stub.base_url.clone(), &root).await;

    send_json(
        &mut server,
        &json!({
            "op": 0,
            "s": 2,
            "t": "INTERACTION_CREATE",
            "d": {
                "id": "9001",
                "token": "tok",
                "guild_id": "7",
                "channel_id": "55",
                "member": {"user": {"id": "12", "username": "meri"}},
                "data": {"name": "play", "options": []},
            },
        }),
    )
    .await;

    let (method, path, head, _) = stub.next_request().await;
    assert_eq!(method, "GET");
    assert_eq!(path, "/guilds/7/voice-states/12");
    assert!(head.to_ascii_lowercase().contains("authorization: bot token"));
    assert!(head.contains("DiscordBot"));

    let (method, path, _, body) = stub.next_request().await;
    assert_eq!(method, "POST");
    assert_eq!(path, "/interactions/9001/tok/callback");
    assert!(body.contains(r#""type":4"#));
    assert!(body.contains("<@12>"));
    assert!(body.contains("join a voice channel"));

    // No voice-state update goes out on the control socket.
    assert!(assert_silent(&mut server, Duration::from_millis(300)).await);

    root.cancel();
    let _ = run.await;
}

#[tokio::test]
async fn voice_updates_converge_in_either_order() {
    let stub = spawn_http_stub().await;
    let root = CancellationToken::new();
    let (mut server, run) = ready_session(stub.base_url.clone(), &root).await;

    // A scripted voice gateway; reaching IDENTIFY proves the session armed.
    let (voice_listener, voice_endpoint) = bind_ws().await;

    // Server update first, state update second.
    send_json(
        &mut server,
        &json!({
            "op": 0,
            "s": 2,
            "t": "VOICE_SERVER_UPDATE",
            "d": {"guild_id": "7", "token": "vtoken", "endpoint": voice_endpoint},
        }),
    )
    .await;
    send_json(
        &mut server,
        &json!({
            "op": 0,
            "s": 3,
            "t": "VOICE_STATE_UPDATE",
            "d": {
                "guild_id": "7",
                "channel_id": "33",
                "user_id": "42",
                "session_id": "vsession",
            },
        }),
    )
    .await;

    let mut voice_ws = accept_ws(&voice_listener).await;
    let identify = recv_json(&mut voice_ws).await;
    assert_eq!(identify["op"], 0);
    assert_eq!(identify["d"]["server_id"], "7");
    assert_eq!(identify["d"]["session_id"], "vsession");
    assert_eq!(identify["d"]["token"], "vtoken");
    assert_eq!(identify["d"]["user_id"], "42");

    root.cancel();
    let _ = run.await;
}

#[tokio::test]
async fn messages_get_the_default_greeting_but_own_messages_are_ignored() {
    let stub = spawn_http_stub().await;
    let root = CancellationToken::new();
    let (mut server, run) = ready_session(stub.base_url.clone(), &root).await;

    // Authored by the application itself: must not produce a reply.
    send_json(
        &mut server,
        &json!({
            "op": 0,
            "s": 2,
            "t": "MESSAGE_CREATE",
            "d": {
                "id": "900",
                "channel_id": "55",
                "author": {"id": "99", "username": "bellbird"},
                "content": "self talk",
            },
        }),
    )
    .await;

    send_json(
        &mut server,
        &json!({
            "op": 0,
            "s": 3,
            "t": "MESSAGE_CREATE",
            "d": {
                "id": "901",
                "channel_id": "55",
                "author": {"id": "12", "username": "meri"},
                "content": "hi bot",
            },
        }),
    )
    .await;

    // Exactly one reply arrives, and it answers the second message.
    let (method, path, _, body) = stub.next_request().await;
    assert_eq!(method, "POST");
    assert_eq!(path, "/channels/55/messages");
    assert!(body.contains("hello, <@12>"));

    assert!(
        timeout(Duration::from_millis(300), stub.requests.recv_async()).await.is_err(),
        "own message should not be replied to",
    );

    root.cancel();
    let _ = run.await;
}
