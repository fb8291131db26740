use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::models::{
    ClientMessage, ContentUpdateMessage, CursorUpdateMessage, ServerMessage,
};
use crate::services::auth_service::{self, UserIdentity};
use crate::ws::registry::Envelope;
use crate::AppState;

#[derive(Deserialize)]
pub struct WsAuthParams {
    pub token: Option<String>,
}

type SharedSink = Arc<Mutex<SplitSink<WebSocket, Message>>>;

/// WebSocket handler
///
/// The credential is validated before the upgrade, so a rejected token
/// surfaces to the client as HTTP 401 — distinct from a network-level
/// connect failure.
pub async fn collab_ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsAuthParams>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> Response {
    info!("New WebSocket connection attempt");

    let token = params
        .token
        .clone()
        .or_else(|| auth_service::token_from_headers(&headers).ok());
    let Some(token) = token else {
        return StatusCode::UNAUTHORIZED.into_response();
    };

    let identity = match auth_service::authenticate_connection(&token).await {
        Ok(identity) => identity,
        Err(e) => {
            info!("WebSocket authentication rejected: {}", e);
            return StatusCode::UNAUTHORIZED.into_response();
        }
    };

    ws.on_upgrade(move |socket| handle_socket(socket, identity, state))
}

/// Per-connection bookkeeping of joined rooms and their forward tasks.
type JoinedRooms = Arc<StdMutex<HashMap<String, JoinHandle<()>>>>;

/// Reclaims room membership when the connection task ends for any
/// reason, so connection loss gets the same cleanup as an explicit
/// leave and no ghost users accumulate.
struct DeferLeaveAll {
    state: Arc<AppState>,
    conn_id: Uuid,
    joined: JoinedRooms,
}

impl Drop for DeferLeaveAll {
    fn drop(&mut self) {
        let state = self.state.clone();
        let conn_id = self.conn_id;
        let rooms: Vec<(String, JoinHandle<()>)> = match self.joined.lock() {
            Ok(mut joined) => joined.drain().collect(),
            Err(_) => Vec::new(),
        };
        tokio::spawn(async move {
            for (document_id, task) in rooms {
                task.abort();
                state.registry.leave(&document_id, conn_id).await;
            }
        });
    }
}

/// Handle WebSocket connection
async fn handle_socket(socket: WebSocket, identity: UserIdentity, state: Arc<AppState>) {
    // Unique connection ID identifying this session across rooms
    let conn_id = Uuid::new_v4();
    info!(
        "WebSocket connection established for user {} with connection_id: {}",
        identity.user_id, conn_id
    );

    // Split the socket; the sink is shared between the read loop and the
    // per-room forward tasks
    let (sender, mut receiver) = socket.split();
    let sender: SharedSink = Arc::new(Mutex::new(sender));

    let joined: JoinedRooms = Arc::new(StdMutex::new(HashMap::new()));
    let _cleanup = DeferLeaveAll {
        state: state.clone(),
        conn_id,
        joined: joined.clone(),
    };

    // Listen for incoming messages; only text frames carry protocol
    // messages, anything else is skipped and stream end exits the loop
    while let Some(Ok(message)) = receiver.next().await {
        let Message::Text(text) = message else {
            continue;
        };

        // Parse into the closed protocol type; malformed frames are
        // dropped, never fatal
        let client_msg: ClientMessage = match serde_json::from_str(&text) {
            Ok(msg) => msg,
            Err(e) => {
                debug!("Dropping malformed frame from {}: {}", conn_id, e);
                continue;
            }
        };

        match client_msg {
            ClientMessage::Join(join) => {
                // A repeated join replaces the previous subscription so
                // the session never holds two forward tasks for one room
                if let Ok(mut rooms) = joined.lock() {
                    if let Some(task) = rooms.remove(&join.document_id) {
                        task.abort();
                    }
                }
                let rx = state
                    .registry
                    .join(
                        &join.document_id,
                        &join.document_type,
                        conn_id,
                        identity.presence_entry(),
                    )
                    .await;
                let task = spawn_room_forwarder(rx, conn_id, sender.clone());
                if let Ok(mut rooms) = joined.lock() {
                    rooms.insert(join.document_id, task);
                }
            }
            ClientMessage::Leave(leave) => {
                let task = match joined.lock() {
                    Ok(mut rooms) => rooms.remove(&leave.document_id),
                    Err(_) => None,
                };
                if let Some(task) = task {
                    task.abort();
                    state.registry.leave(&leave.document_id, conn_id).await;
                }
            }
            ClientMessage::ContentChange(change) => {
                state
                    .registry
                    .relay(
                        &change.document_id,
                        conn_id,
                        ServerMessage::ContentUpdate(ContentUpdateMessage {
                            content: change.content,
                        }),
                    )
                    .await;
            }
            ClientMessage::CursorPosition(cursor) => {
                state
                    .registry
                    .relay(
                        &cursor.document_id,
                        conn_id,
                        ServerMessage::CursorUpdate(CursorUpdateMessage {
                            user_id: identity.user_id.clone(),
                            user_name: identity.name.clone(),
                            user_initials: identity.initials.clone(),
                            position: cursor.position,
                        }),
                    )
                    .await;
            }
        }
    }

    info!("WebSocket connection terminated for {}", conn_id);
    // DeferLeaveAll drop runs here and reclaims all room memberships
}

/// Forward room traffic to this connection, skipping envelopes the
/// connection itself originated.
fn spawn_room_forwarder(
    mut rx: broadcast::Receiver<Envelope>,
    conn_id: Uuid,
    sender: SharedSink,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(envelope) => {
                    if envelope.exclude == Some(conn_id) {
                        continue;
                    }
                    let text = match serde_json::to_string(&envelope.message) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!("Failed to serialize broadcast message: {}", e);
                            continue;
                        }
                    };
                    if sender.lock().await.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Connection {} lagged, skipped {} message(s)", conn_id, skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
