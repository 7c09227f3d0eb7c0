//! Control-gateway scenarios against a scripted server.

mod common;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use bellbird::config::{AppEnv, Config};
use bellbird::gateway::ConnectionStage;
use bellbird::model::id::ApplicationId;
use bellbird::{Http, Manager, Session};

use common::{accept_ws, bind_ws, recv_json, send_json};

fn test_config(gateway_address: String) -> Config {
    Config {
        bot_token: "token".into(),
        application_id: ApplicationId(99),
        public_key: "pk".into(),
        gateway_version: 10,
        voice_gateway_version: 8,
        http_base_url: "http://127.0.0.1:1".into(),
        gateway_address,
        app_env: AppEnv::Development,
        bot_intents: 641,
        media_dir: PathBuf::from("./media"),
    }
}

fn build_session(gateway_address: String, root: &CancellationToken) -> Session {
    let config = test_config(gateway_address);
    let http = Arc::new(Http::new(config.http_base_url.clone(), config.bot_token.clone()));
    let manager = Arc::new(Manager::new());

    Session::new(&config, http, manager, root.clone())
}

#[tokio::test]
async fn identify_then_ready_with_heartbeats() {
    let (listener, address) = bind_ws().await;
    let root = CancellationToken::new();

    let session = build_session(address, &root);
    let shared = session.shared();
    let run = tokio::spawn(session.run());

    let mut server = accept_ws(&listener).await;
    send_json(&mut server, &json!({"op": 10, "d": {"heartbeat_interval": 200}})).await;

    let identify = recv_json(&mut server).await;
    assert_eq!(identify["op"], 2);
    assert_eq!(identify["d"]["token"], "token");
    assert_eq!(identify["d"]["intents"], 641);
    assert!(identify["d"]["properties"]["os"].is_string());

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

    // Two heartbeats on the 200 ms cadence, each carrying the sequence.
    for _ in 0..2 {
        let heartbeat = timeout(Duration::from_millis(700), recv_json(&mut server))
            .await
            .expect("heartbeat never arrived");
        assert_eq!(heartbeat["op"], 1);
        assert_eq!(heartbeat["d"], 1);
        send_json(&mut server, &json!({"op": 11})).await;
    }

    assert_eq!(shared.stage(), ConnectionStage::Ready);
    assert_eq!(shared.session_id().as_deref(), Some("s1"));
    assert_eq!(shared.resume_gateway_url().as_deref(), Some("wss://resume.example"));

    // The acks above complete a sent/acknowledged pair eventually.
    timeout(Duration::from_secs(1), async {
        while shared.latency().is_none() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("heartbeat ack never recorded");

    root.cancel();
    run.await.expect("session task panicked").expect("session errored");
    assert_eq!(shared.stage(), ConnectionStage::Disconnected);
}

#[tokio::test]
async fn reconnect_resumes_with_stored_sequence() {
    let (first_listener, first_address) = bind_ws().await;
    let (resume_listener, resume_address) = bind_ws().await;
    let root = CancellationToken::new();

    let session = build_session(first_address, &root);
    let shared = session.shared();
    let run = tokio::spawn(session.run());

    // First socket: normal identify handshake, then a dispatch that moves
    // the sequence to 42, then a RECONNECT request.
    let mut server = accept_ws(&first_listener).await;
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
                "resume_gateway_url": resume_address,
                "user": {"id": "42"},
            },
        }),
    )
    .await;
    send_json(
        &mut server,
        &json!({"op": 0, "s": 42, "t": "GUILD_CREATE", "d": {}}),
    )
    .await;
    send_json(&mut server, &json!({"op": 7, "d": null})).await;

    // Second socket: the first outbound message must be the resume, with
    // the stored identity and sequence.
    let mut resume_server = accept_ws(&resume_listener).await;
    let resume = recv_json(&mut resume_server).await;
    assert_eq!(resume["op"], 6);
    assert_eq!(resume["d"]["token"], "token");
    assert_eq!(resume["d"]["session_id"], "s1");
    assert_eq!(resume["d"]["seq"], 42);

    send_json(&mut resume_server, &json!({"op": 10, "d": {"heartbeat_interval": 60000}})).await;
    send_json(&mut resume_server, &json!({"op": 0, "s": 43, "t": "RESUMED", "d": null})).await;

    // Stage recovers to Ready and the replayed dispatch advanced the
    // sequence monotonically.
    timeout(Duration::from_secs(2), async {
        loop {
            if shared.stage() == ConnectionStage::Ready && shared.sequence() == 43 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("session never resumed");

    root.cancel();
    run.await.expect("session task panicked").expect("session errored");
}
