//! End-to-end runtime tests against the simulated server.
//!
//! Every test runs on a paused tokio clock: retry delays, heartbeat timeouts
//! and the runtime ticker all advance virtual time only, so the tests are
//! fast and deterministic.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use serde_json::json;
use tokio::{sync::watch, task::JoinHandle};
use zcret_app::{
    Identity, Runtime, RuntimeError, SessionConfig, SessionHandle, SessionState, SessionView,
};
use zcret_client::{SessionError, SessionFailure, ValidationError};
use zcret_core::{ConnectionConfig, TransportKind};
use zcret_harness::{SharedSimServer, SimEnv, SimServer, SimTransport, lock_server};
use zcret_proto::WireMessage;

const WALLET: &str = "7xKXtg2CW87d97TXJSDpbD5jBkheTqA83TZRuJosgAsU";
const OTHER: &str = "9WzDXwBbmkg8ZTbNMqUxvQRAyrZzDsGYdLVL9zYtAWWM";

struct Harness {
    server: SharedSimServer,
    identity: watch::Sender<Identity>,
    handle: SessionHandle,
    env: SimEnv,
    task: JoinHandle<()>,
}

impl Harness {
    fn start(server: SimServer, config: SessionConfig) -> Self {
        let server = Arc::new(Mutex::new(server));
        let env = SimEnv::tokio();
        let (identity, identity_rx) = watch::channel(Identity::disconnected());
        let (runtime, handle) =
            Runtime::new(env.clone(), SimTransport::new(server.clone()), config, identity_rx);
        let task = tokio::spawn(runtime.run());
        Self { server, identity, handle, env, task }
    }

    fn connect(&self, account: &str) {
        self.identity.send_replace(Identity::connected(account));
    }

    async fn wait_for(&self, what: &str, pred: impl Fn(&SessionView) -> bool) -> SessionView {
        let mut view = self.handle.view();
        let waited = tokio::time::timeout(Duration::from_secs(120), view.wait_for(|v| pred(v))).await;
        match waited {
            Ok(Ok(view)) => view.clone(),
            Ok(Err(_)) => panic!("runtime stopped while waiting for {what}"),
            Err(_) => panic!("timed out waiting for {what}: {:?}", self.handle.view().borrow()),
        }
    }

    async fn authenticated(&self) -> SessionView {
        self.wait_for("authentication", |v| v.state == SessionState::Authenticated && v.loaded)
            .await
    }

    async fn diagnostics(&self) -> Vec<String> {
        self.handle.diagnostics().await.unwrap().into_iter().map(|e| e.text).collect()
    }
}

fn wire(id: &str, content: &str, created_at: &str) -> WireMessage {
    WireMessage {
        id: Some(id.into()),
        sender: OTHER.into(),
        content: content.into(),
        created_at: created_at.into(),
    }
}

fn websocket_only() -> SessionConfig {
    SessionConfig {
        connection: ConnectionConfig {
            preferred_transport_order: vec![TransportKind::WebSocket],
            ..ConnectionConfig::default()
        },
        ..SessionConfig::default()
    }
}

#[tokio::test(start_paused = true)]
async fn connects_and_loads_history() {
    let server = SimServer::new(1).with_history(vec![
        wire("2", "later", "2024-01-01T10:05:00Z"),
        wire("1", "earlier", "2024-01-01T10:00:00Z"),
    ]);
    let h = Harness::start(server, SessionConfig::default());
    h.connect(WALLET);

    let view = h.authenticated().await;
    assert_eq!(view.account.as_deref(), Some(WALLET));
    assert_eq!(view.transport, Some(TransportKind::WebSocket));
    assert_eq!(view.message_count, 2);
    assert_eq!(view.status, None);

    let contents: Vec<String> =
        h.handle.messages().await.unwrap().into_iter().map(|m| m.content).collect();
    assert_eq!(contents, vec!["earlier", "later"]);

    let log = h.diagnostics().await;
    assert_eq!(log.first().map(String::as_str), Some("Attempting to connect..."));
    assert!(log.iter().any(|l| l == &format!("Emitting login with wallet: {WALLET}")));
}

#[tokio::test(start_paused = true)]
async fn submit_resolves_ack_and_echo() {
    let h = Harness::start(SimServer::new(1), SessionConfig::default());
    h.connect(WALLET);
    h.authenticated().await;

    let ack = h.handle.submit("hello").await.unwrap();
    assert_eq!(ack.id(), 2);
    assert_eq!(ack.wait().await.unwrap(), vec![json!({ "ok": true })]);

    h.wait_for("echo", |v| v.message_count == 1).await;
    let stored = h.handle.messages().await.unwrap();
    assert_eq!(stored[0].content, "hello");
    assert_eq!(stored[0].sender, WALLET);
    assert_eq!(lock_server(&h.server).sent_messages(), vec!["hello".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn submit_is_rejected_without_identity() {
    let h = Harness::start(SimServer::new(1), SessionConfig::default());

    let err = h.handle.submit("hello").await.unwrap_err();
    assert_eq!(err, RuntimeError::Session(SessionError::Validation(ValidationError::MissingIdentity)));

    let log = h.diagnostics().await;
    assert_eq!(log, vec!["Send rejected: invalid message: no identity connected".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn blank_submit_is_rejected_while_online() {
    let h = Harness::start(SimServer::new(1), SessionConfig::default());
    h.connect(WALLET);
    h.authenticated().await;

    let err = h.handle.submit(" \n\t ").await.unwrap_err();
    assert_eq!(err, RuntimeError::Session(SessionError::Validation(ValidationError::EmptyMessage)));
    assert!(lock_server(&h.server).sent_messages().is_empty());
}

#[tokio::test(start_paused = true)]
async fn falls_back_to_polling() {
    let server = SimServer::new(1).refuse_transport(TransportKind::WebSocket);
    let h = Harness::start(server, SessionConfig::default());
    h.connect(WALLET);

    let view = h.authenticated().await;
    assert_eq!(view.transport, Some(TransportKind::Polling));
    assert_eq!(
        lock_server(&h.server).dials(),
        &[TransportKind::WebSocket, TransportKind::Polling]
    );
}

#[tokio::test(start_paused = true)]
async fn exhausted_after_five_attempts_with_delays() {
    let h = Harness::start(SimServer::new(1).fail_next_dials(100), websocket_only());
    h.connect(WALLET);

    let view = h
        .wait_for("errored", |v| matches!(v.state, SessionState::Errored(SessionFailure::Connect(_))))
        .await;
    assert!(view.status.as_deref().is_some_and(|s| s.starts_with("Connection error:")));

    // Retries keep the session errored; wait out all four delays.
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(h.diagnostics().await.iter().any(|l| l == "Reconnection attempts exhausted"));
    assert_eq!(lock_server(&h.server).dials().len(), 5);
    assert!(h.env.elapsed() >= Duration::from_secs(4));
}

#[tokio::test(start_paused = true)]
async fn dropped_link_reconnects() {
    let server = SimServer::new(1).with_history(vec![wire("1", "kept", "2024-01-01T10:00:00Z")]);
    let h = Harness::start(server, SessionConfig::default());
    h.connect(WALLET);
    h.authenticated().await;

    lock_server(&h.server).drop_link();
    h.wait_for("disconnect", |v| v.state == SessionState::Disconnected).await;
    let view = h.authenticated().await;

    assert_eq!(view.message_count, 1);
    assert_eq!(lock_server(&h.server).links_opened(), 2);
    assert!(h.diagnostics().await.iter().any(|l| l == "Socket disconnected: transport close"));
}

#[tokio::test(start_paused = true)]
async fn pending_ack_is_released_when_link_drops() {
    let h = Harness::start(SimServer::new(1).without_acks(), SessionConfig::default());
    h.connect(WALLET);
    h.authenticated().await;

    let ack = h.handle.submit("unanswered").await.unwrap();
    lock_server(&h.server).drop_link();

    assert_eq!(ack.wait().await, Err(RuntimeError::AckReleased { id: 2 }));
}

#[tokio::test(start_paused = true)]
async fn abandoned_acks_do_not_accumulate() {
    let h = Harness::start(SimServer::new(1).without_acks(), SessionConfig::default());
    h.connect(WALLET);
    h.authenticated().await;

    let kept = h.handle.submit("kept").await.unwrap();
    for i in 0..100 {
        drop(h.handle.submit(format!("abandoned {i}")).await.unwrap());
    }
    // The last abandoned waiter is pruned by the next submit.
    assert_eq!(h.handle.view().borrow().pending_acks, 2);

    lock_server(&h.server).drop_link();
    assert_eq!(kept.wait().await, Err(RuntimeError::AckReleased { id: 2 }));
}

#[tokio::test(start_paused = true)]
async fn server_disconnect_stays_disconnected() {
    let h = Harness::start(SimServer::new(1), SessionConfig::default());
    h.connect(WALLET);
    h.authenticated().await;

    lock_server(&h.server).disconnect_client();
    h.wait_for("disconnect", |v| v.state == SessionState::Disconnected).await;

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(h.handle.state(), SessionState::Disconnected);
    assert_eq!(lock_server(&h.server).links_opened(), 1);
}

#[tokio::test(start_paused = true)]
async fn heartbeat_silence_triggers_reconnect() {
    let h = Harness::start(SimServer::new(1).with_heartbeat(1_000, 500), SessionConfig::default());
    h.connect(WALLET);
    h.authenticated().await;

    h.wait_for("ping timeout", |v| v.state == SessionState::Disconnected).await;
    assert!(h.diagnostics().await.iter().any(|l| l == "Socket disconnected: ping timeout"));
}

#[tokio::test(start_paused = true)]
async fn account_switch_reconnects_as_new_account() {
    let h = Harness::start(SimServer::new(1), SessionConfig::default());
    h.connect(WALLET);
    h.authenticated().await;

    h.connect(OTHER);
    let view = h
        .wait_for("new account", |v| {
            v.account.as_deref() == Some(OTHER) && v.state == SessionState::Authenticated
        })
        .await;
    assert_eq!(view.transport, Some(TransportKind::WebSocket));
    assert_eq!(lock_server(&h.server).links_opened(), 2);
}

#[tokio::test(start_paused = true)]
async fn identity_disconnect_keeps_messages() {
    let server = SimServer::new(1).with_history(vec![wire("1", "kept", "2024-01-01T10:00:00Z")]);
    let h = Harness::start(server, SessionConfig::default());
    h.connect(WALLET);
    h.authenticated().await;

    h.identity.send_replace(Identity::disconnected());
    let view = h.wait_for("idle", |v| v.state == SessionState::Idle).await;
    assert_eq!(view.message_count, 1);

    // Let the link task flush the namespace disconnect.
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(lock_server(&h.server).client_disconnects(), 1);
}

#[tokio::test(start_paused = true)]
async fn clear_diagnostics_empties_the_log() {
    let h = Harness::start(SimServer::new(1), SessionConfig::default());
    h.connect(WALLET);
    h.authenticated().await;

    let before = h.handle.diagnostics().await.unwrap();
    assert!(before[0].timestamp.to_rfc3339().starts_with("2024-01-01T00:00"));

    h.handle.clear_diagnostics().unwrap();
    assert!(h.handle.diagnostics().await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn shutdown_stops_the_runtime() {
    let h = Harness::start(SimServer::new(1), SessionConfig::default());
    h.connect(WALLET);
    h.authenticated().await;

    h.handle.shutdown().await.unwrap();
    h.task.await.unwrap();

    assert_eq!(h.handle.state(), SessionState::Idle);
    assert_eq!(h.handle.messages().await, Err(RuntimeError::Stopped));
}
