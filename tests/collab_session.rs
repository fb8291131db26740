//! End-to-end tests for the collaboration server and session client:
//! a real server on an ephemeral port, real WebSocket clients, and the
//! roster/replication/cursor/teardown properties exercised through the
//! full network stack.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::{json, Value};
use tokio::time::timeout;

use aula_colab::client::{
    AutosaveScheduler, ChannelConfig, ChannelEvent, ChannelState, DocChannel, DocSession,
    DocumentStore, SessionEvent,
};
use aula_colab::config::{self, Config};
use aula_colab::models::{ClientMessage, JoinDocumentMessage, LeaveDocumentMessage, ServerMessage};
use aula_colab::{build_app, AppState};

const TEST_SECRET: &str = "test-secret";

#[derive(Default)]
struct MemStore {
    saves: Mutex<Vec<Value>>,
}

impl MemStore {
    fn saved(&self) -> Vec<Value> {
        self.saves.lock().unwrap().clone()
    }
}

impl DocumentStore for MemStore {
    async fn save(
        &self,
        _document_id: &str,
        _document_type: &str,
        content: &Value,
    ) -> Result<(), String> {
        self.saves.lock().unwrap().push(content.clone());
        Ok(())
    }
}

fn ensure_config() {
    config::init_config(Config {
        auth_jwt_secret: Some(TEST_SECRET.to_string()),
        ..Config::default()
    });
}

fn mint_token(sub: &str, name: &str, roles: &[&str]) -> String {
    let claims = json!({
        "sub": sub,
        "name": name,
        "type": "user",
        "roles": roles,
        "exp": (Utc::now() + chrono::Duration::hours(1)).timestamp(),
    });
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(TEST_SECRET.as_bytes()),
    )
    .unwrap()
}

/// Start a server on an ephemeral port, return its address.
async fn start_server() -> SocketAddr {
    ensure_config();
    let state = Arc::new(AppState::new());
    let app = build_app(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn open_session(
    addr: SocketAddr,
    token: &str,
    document_id: &str,
) -> (DocSession<MemStore>, Arc<MemStore>) {
    let store = Arc::new(MemStore::default());
    let channel = DocChannel::connect(ChannelConfig::new(format!("ws://{}/ws", addr), token));
    let autosave = AutosaveScheduler::with_debounce(store.clone(), Duration::from_millis(50));
    let session = DocSession::open(channel, document_id, "project", autosave);
    (session, store)
}

async fn next_event(session: &mut DocSession<MemStore>) -> SessionEvent {
    timeout(Duration::from_secs(2), session.next_event())
        .await
        .expect("timed out waiting for session event")
        .expect("channel closed unexpectedly")
}

/// Drive the session until a roster snapshot of the given size arrives.
async fn wait_for_roster(session: &mut DocSession<MemStore>, size: usize) -> Vec<String> {
    loop {
        if let SessionEvent::RosterUpdated(users) = next_event(session).await {
            if users.len() == size {
                return users.into_iter().map(|u| u.user_id).collect();
            }
        }
    }
}

// ─── Roster & presence ───────────────────────────────────────────

#[tokio::test]
async fn roster_converges_across_joins_and_leaves() {
    let addr = start_server().await;

    let (mut a, _) = open_session(addr, &mint_token("u1", "Ana García", &[]), "d1");
    let roster = wait_for_roster(&mut a, 1).await;
    assert_eq!(roster, vec!["u1"]);

    let (mut b, _) = open_session(addr, &mint_token("u2", "Ben Okafor", &[]), "d1");
    let roster_b = wait_for_roster(&mut b, 2).await;
    assert!(roster_b.contains(&"u1".to_string()) && roster_b.contains(&"u2".to_string()));
    // the earlier member receives the same push
    wait_for_roster(&mut a, 2).await;

    b.close().await;
    let roster = wait_for_roster(&mut a, 1).await;
    assert_eq!(roster, vec!["u1"]);

    a.close().await;
}

#[tokio::test]
async fn one_user_with_two_tabs_appears_twice() {
    let addr = start_server().await;
    let token = mint_token("u1", "Ana García", &[]);

    let (mut tab1, _) = open_session(addr, &token, "d1");
    wait_for_roster(&mut tab1, 1).await;

    let (mut tab2, _) = open_session(addr, &token, "d1");
    let roster = wait_for_roster(&mut tab2, 2).await;
    // the roster is keyed by connection, so both tabs are listed
    assert_eq!(roster, vec!["u1", "u1"]);

    tab1.close().await;
    tab2.close().await;
}

#[tokio::test]
async fn abrupt_disconnect_cleans_up_like_a_leave() {
    let addr = start_server().await;

    let (mut a, _) = open_session(addr, &mint_token("u1", "Ana", &[]), "d1");
    wait_for_roster(&mut a, 1).await;
    let (mut b, _) = open_session(addr, &mint_token("u2", "Ben", &[]), "d1");
    wait_for_roster(&mut a, 2).await;
    wait_for_roster(&mut b, 2).await;

    // no leave-document message: the session is simply dropped
    drop(b);

    let roster = wait_for_roster(&mut a, 1).await;
    assert_eq!(roster, vec!["u1"]);
    a.close().await;
}

#[tokio::test]
async fn double_join_from_one_connection_keeps_one_entry() {
    let addr = start_server().await;
    let token = mint_token("u1", "Ana", &[]);

    let mut channel = DocChannel::connect(ChannelConfig::new(format!("ws://{}/ws", addr), token));
    let mut events = channel.take_events().unwrap();
    match timeout(Duration::from_secs(2), events.recv()).await {
        Ok(Some(ChannelEvent::Connected)) => {}
        other => panic!("expected Connected, got {:?}", other),
    }

    let join = ClientMessage::Join(JoinDocumentMessage {
        document_id: "d1".into(),
        document_type: "project".into(),
    });
    channel.send(join.clone());
    channel.send(join);

    // both joins produce a roster push, each with exactly one entry
    for _ in 0..2 {
        match timeout(Duration::from_secs(2), events.recv()).await {
            Ok(Some(ChannelEvent::Message(ServerMessage::ActiveUsers(snapshot)))) => {
                assert_eq!(snapshot.users.len(), 1);
            }
            other => panic!("expected roster push, got {:?}", other),
        }
    }

    // a single leave fully removes the session: a fresh peer sees an
    // empty room with only itself
    channel.send(ClientMessage::Leave(LeaveDocumentMessage {
        document_id: "d1".into(),
        document_type: "project".into(),
    }));

    let (mut observer, _) = open_session(addr, &mint_token("u2", "Ben", &[]), "d1");
    let roster = wait_for_roster(&mut observer, 1).await;
    assert_eq!(roster, vec!["u2"]);

    channel.disconnect().await;
    observer.close().await;
}

// ─── Content replication ─────────────────────────────────────────

#[tokio::test]
async fn content_relays_to_peers_and_suppresses_the_echo() {
    let addr = start_server().await;

    let (mut a, _) = open_session(addr, &mint_token("u1", "Ana", &[]), "d1");
    wait_for_roster(&mut a, 1).await;
    let (mut b, _) = open_session(addr, &mint_token("u2", "Ben", &[]), "d1");
    wait_for_roster(&mut a, 2).await;
    wait_for_roster(&mut b, 2).await;

    // A authors a change; B receives it
    a.on_local_mutation(json!({"text": "hello"}));
    let received = match next_event(&mut b).await {
        SessionEvent::RemoteContent(content) => content,
        other => panic!("expected remote content, got {:?}", other),
    };
    assert_eq!(received, json!({"text": "hello"}));

    // B applies it to its editing surface; the surface's mutation event
    // is reported back and must not be re-broadcast
    b.on_local_mutation(received);
    let echo = timeout(Duration::from_millis(300), a.next_event()).await;
    assert!(echo.is_err(), "echoed update leaked back: {:?}", echo);

    // B then authors a change of its own; A converges to it
    b.on_local_mutation(json!({"text": "hello world"}));
    match next_event(&mut a).await {
        SessionEvent::RemoteContent(content) => {
            assert_eq!(content, json!({"text": "hello world"}))
        }
        other => panic!("expected remote content, got {:?}", other),
    }

    a.close().await;
    b.close().await;
}

#[tokio::test]
async fn remote_mutations_are_persisted_too() {
    let addr = start_server().await;

    let (mut a, _) = open_session(addr, &mint_token("u1", "Ana", &[]), "d1");
    wait_for_roster(&mut a, 1).await;
    let (mut b, store_b) = open_session(addr, &mint_token("u2", "Ben", &[]), "d1");
    wait_for_roster(&mut a, 2).await;
    wait_for_roster(&mut b, 2).await;

    a.on_local_mutation(json!({"text": "hola"}));
    let received = match next_event(&mut b).await {
        SessionEvent::RemoteContent(content) => content,
        other => panic!("expected remote content, got {:?}", other),
    };
    b.on_local_mutation(received);

    // B's scheduler persists the remote-applied value after the window
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(store_b.saved(), vec![json!({"text": "hola"})]);

    a.close().await;
    b.close().await;
}

#[tokio::test]
async fn teardown_flushes_pending_content() {
    let addr = start_server().await;

    let (mut a, store) = open_session(addr, &mint_token("u1", "Ana", &[]), "d1");
    wait_for_roster(&mut a, 1).await;

    // the debounce window has not elapsed when the session ends; the
    // forced flush persists the change anyway
    a.on_local_mutation(json!({"text": "draft"}));
    a.close().await;

    assert_eq!(store.saved(), vec![json!({"text": "draft"})]);
}

// ─── Cursor broadcast ────────────────────────────────────────────

#[tokio::test]
async fn cursors_relay_and_are_pruned_with_the_roster() {
    let addr = start_server().await;

    let (mut a, _) = open_session(addr, &mint_token("u1", "Ana García", &[]), "d1");
    wait_for_roster(&mut a, 1).await;
    let (mut b, _) = open_session(addr, &mint_token("u2", "Ben", &[]), "d1");
    wait_for_roster(&mut a, 2).await;
    wait_for_roster(&mut b, 2).await;

    a.on_local_selection_change(Some(aula_colab::models::CursorPosition {
        x: 24.0,
        y: 120.0,
        height: 18.0,
        selection: None,
    }));

    match next_event(&mut b).await {
        SessionEvent::RemoteCursor { user_id } => assert_eq!(user_id, "u1"),
        other => panic!("expected cursor update, got {:?}", other),
    }
    let cursor = b.cursors().get("u1").expect("cursor cached");
    assert_eq!(cursor.position.y, 120.0);
    assert_eq!(cursor.initials, "AG");

    // failed geometry computation skips the broadcast entirely
    a.on_local_selection_change(None);

    // when A leaves, B prunes A's cursor with the roster push
    a.close().await;
    wait_for_roster(&mut b, 1).await;
    assert!(b.cursors().get("u1").is_none());

    b.close().await;
}

#[tokio::test]
async fn malformed_frames_are_dropped_without_killing_the_session() {
    use futures_util::{SinkExt, StreamExt};
    use tokio_tungstenite::tungstenite::Message as WsMessage;

    let addr = start_server().await;
    let token = mint_token("u1", "Ana", &[]);
    let (mut ws, _) =
        tokio_tungstenite::connect_async(format!("ws://{}/ws?token={}", addr, token))
            .await
            .unwrap();

    ws.send(WsMessage::Text("{not json".into())).await.unwrap();
    ws.send(WsMessage::Text(r#"{"type": "cursor-position"}"#.into()))
        .await
        .unwrap();

    // the connection survives both frames and a valid join still works
    let join = serde_json::to_string(&ClientMessage::Join(JoinDocumentMessage {
        document_id: "d1".into(),
        document_type: "project".into(),
    }))
    .unwrap();
    ws.send(WsMessage::Text(join.into())).await.unwrap();

    let roster = timeout(Duration::from_secs(2), async {
        loop {
            match ws.next().await {
                Some(Ok(WsMessage::Text(text))) => {
                    if let Ok(ServerMessage::ActiveUsers(snapshot)) =
                        serde_json::from_str(text.as_str())
                    {
                        return snapshot.users;
                    }
                }
                other => panic!("connection died: {:?}", other),
            }
        }
    })
    .await
    .expect("no roster push received");
    assert_eq!(roster.len(), 1);
}

// ─── Connection handling ─────────────────────────────────────────

#[tokio::test]
async fn invalid_token_is_rejected_not_retried() {
    let addr = start_server().await;

    let (mut session, _) = open_session(addr, "not-a-jwt", "d1");
    match next_event(&mut session).await {
        SessionEvent::AuthRejected => {}
        other => panic!("expected auth rejection, got {:?}", other),
    }
    assert_eq!(session.channel_state(), ChannelState::AuthRejected);
}

#[tokio::test]
async fn unreachable_server_surfaces_offline_after_bounded_retries() {
    ensure_config();
    let mut config = ChannelConfig::new("ws://127.0.0.1:9", "irrelevant");
    config.reconnect_delay = Duration::from_millis(10);
    config.max_reconnect_attempts = 2;

    let mut channel = DocChannel::connect(config);
    let mut events = channel.take_events().unwrap();
    match timeout(Duration::from_secs(5), events.recv()).await {
        Ok(Some(ChannelEvent::Offline)) => {}
        other => panic!("expected Offline, got {:?}", other),
    }
    assert_eq!(channel.state(), ChannelState::Offline);
}

// ─── REST surface ────────────────────────────────────────────────

#[tokio::test]
async fn health_is_public_and_diagnostics_needs_an_admin() {
    let addr = start_server().await;
    let http = reqwest::Client::new();

    let health = http
        .get(format!("http://{}/api/v1/health", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(health.status().as_u16(), 200);

    let anonymous = http
        .get(format!("http://{}/api/v1/diagnostics", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(anonymous.status().as_u16(), 401);

    let student = http
        .get(format!("http://{}/api/v1/diagnostics", addr))
        .bearer_auth(mint_token("u1", "Ana", &["student"]))
        .send()
        .await
        .unwrap();
    assert_eq!(student.status().as_u16(), 403);

    let admin = http
        .get(format!("http://{}/api/v1/diagnostics", addr))
        .bearer_auth(mint_token("adm", "Root", &["portal-admin"]))
        .send()
        .await
        .unwrap();
    assert_eq!(admin.status().as_u16(), 200);
    let body: Value = admin.json().await.unwrap();
    assert!(body.get("n_rooms").is_some());
}
