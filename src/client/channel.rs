use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, info, warn};

use crate::models::{ClientMessage, ServerMessage};
use crate::utils::scope_guard::ScopeGuard;

/// Default fixed delay between reconnection attempts.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(1);
/// Default bound on consecutive failed connection attempts.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;

#[derive(Clone, Debug)]
pub struct ChannelConfig {
    /// WebSocket endpoint, e.g. `ws://portal.example/ws`
    pub server_url: String,
    /// Bearer credential for the connect handshake
    pub auth_token: String,
    pub reconnect_delay: Duration,
    pub max_reconnect_attempts: u32,
}

impl ChannelConfig {
    pub fn new(server_url: impl Into<String>, auth_token: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            auth_token: auth_token.into(),
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelState {
    Connecting,
    Connected,
    Reconnecting,
    /// Network-level retries exhausted
    Offline,
    /// Credential rejected during the handshake; never retried
    AuthRejected,
    Disconnected,
}

#[derive(Debug)]
pub enum ChannelEvent {
    /// Emitted on every successful connect, including reconnects; the
    /// session layer re-runs its join handshake on each one because
    /// room membership is not preserved across a disconnect.
    Connected,
    Message(ServerMessage),
    Offline,
    AuthRejected,
    Closed,
}

/// One authenticated, bidirectional message channel per open document
/// view.
///
/// Dropping the channel (or calling [`DocChannel::disconnect`]) closes
/// the connection, so every exit path of the owning view releases its
/// server-side room membership.
pub struct DocChannel {
    outgoing_tx: mpsc::UnboundedSender<ClientMessage>,
    events_rx: Option<mpsc::UnboundedReceiver<ChannelEvent>>,
    state_rx: watch::Receiver<ChannelState>,
    task: JoinHandle<()>,
}

impl DocChannel {
    /// Open the channel and start the connection task.
    pub fn connect(config: ChannelConfig) -> Self {
        let (state_tx, state_rx) = watch::channel(ChannelState::Connecting);
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run(config, state_tx, outgoing_rx, events_tx));
        Self {
            outgoing_tx,
            events_rx: Some(events_rx),
            state_rx,
            task,
        }
    }

    pub fn state(&self) -> ChannelState {
        *self.state_rx.borrow()
    }

    /// Fire-and-forget send: delivered at most once per attempt. A
    /// message sent while the channel is not connected is dropped, not
    /// queued.
    pub fn send(&self, message: ClientMessage) {
        if self.state() != ChannelState::Connected {
            debug!("Channel not connected, dropping outbound message");
            return;
        }
        let _ = self.outgoing_tx.send(message);
    }

    /// Take the event stream. Yields `None` after the connection task
    /// has ended.
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<ChannelEvent>> {
        self.events_rx.take()
    }

    /// Close the channel gracefully and wait for the connection task to
    /// finish.
    pub async fn disconnect(self) {
        let DocChannel {
            outgoing_tx, task, ..
        } = self;
        // Closing the outgoing channel tells the connection task to send
        // a close frame and stop.
        drop(outgoing_tx);
        let _ = task.await;
    }
}

/// Drop queued outbound messages from a previous connection attempt.
/// Returns true when the channel handle has been dropped entirely.
fn drain_stale_outgoing(outgoing_rx: &mut mpsc::UnboundedReceiver<ClientMessage>) -> bool {
    loop {
        match outgoing_rx.try_recv() {
            Ok(_) => continue, // dropped, not queued across connections
            Err(mpsc::error::TryRecvError::Empty) => return false,
            Err(mpsc::error::TryRecvError::Disconnected) => return true,
        }
    }
}

async fn run(
    config: ChannelConfig,
    state_tx: watch::Sender<ChannelState>,
    mut outgoing_rx: mpsc::UnboundedReceiver<ClientMessage>,
    events_tx: mpsc::UnboundedSender<ChannelEvent>,
) {
    let url = format!("{}?token={}", config.server_url, config.auth_token);

    // Any path that ends this task without reaching a terminal failure
    // state leaves the channel cleanly disconnected.
    let mut final_state = ScopeGuard::new(|| {
        let _ = state_tx.send(ChannelState::Disconnected);
    });

    let mut attempts: u32 = 0;
    let mut had_session = false;

    loop {
        if drain_stale_outgoing(&mut outgoing_rx) {
            return;
        }
        let _ = state_tx.send(if had_session {
            ChannelState::Reconnecting
        } else {
            ChannelState::Connecting
        });

        match tokio_tungstenite::connect_async(&url).await {
            Ok((stream, _response)) => {
                attempts = 0;
                had_session = true;
                let _ = state_tx.send(ChannelState::Connected);
                let _ = events_tx.send(ChannelEvent::Connected);
                info!("Channel connected to {}", config.server_url);

                let (mut sink, mut source) = stream.split();
                loop {
                    tokio::select! {
                        outgoing = outgoing_rx.recv() => {
                            match outgoing {
                                Some(message) => {
                                    let text = match serde_json::to_string(&message) {
                                        Ok(text) => text,
                                        Err(e) => {
                                            warn!("Failed to serialize outbound message: {}", e);
                                            continue;
                                        }
                                    };
                                    if sink.send(Message::Text(text.into())).await.is_err() {
                                        // Connection lost mid-send; the
                                        // message is dropped, not retried
                                        break;
                                    }
                                }
                                None => {
                                    // Channel handle dropped: graceful close
                                    let _ = sink.send(Message::Close(None)).await;
                                    let _ = events_tx.send(ChannelEvent::Closed);
                                    return;
                                }
                            }
                        }
                        incoming = source.next() => {
                            match incoming {
                                Some(Ok(Message::Text(text))) => {
                                    match serde_json::from_str::<ServerMessage>(text.as_str()) {
                                        Ok(message) => {
                                            let _ = events_tx.send(ChannelEvent::Message(message));
                                        }
                                        Err(e) => debug!("Dropping malformed frame: {}", e),
                                    }
                                }
                                Some(Ok(Message::Close(_))) | None => break,
                                Some(Ok(_)) => {}
                                Some(Err(e)) => {
                                    debug!("Channel read error: {}", e);
                                    break;
                                }
                            }
                        }
                    }
                }

                // Transient drop: fall through to the retry loop
                let _ = state_tx.send(ChannelState::Reconnecting);
                debug!("Channel connection lost, retrying");
                tokio::time::sleep(config.reconnect_delay).await;
            }
            Err(tungstenite::Error::Http(response))
                if response.status().as_u16() == 401 || response.status().as_u16() == 403 =>
            {
                // Authentication failure is fatal for the attempt and is
                // never retried automatically
                warn!("Channel authentication rejected ({})", response.status());
                final_state.dismiss();
                let _ = state_tx.send(ChannelState::AuthRejected);
                let _ = events_tx.send(ChannelEvent::AuthRejected);
                return;
            }
            Err(e) => {
                attempts += 1;
                debug!(
                    "Channel connect failed (attempt {}/{}): {}",
                    attempts, config.max_reconnect_attempts, e
                );
                if attempts >= config.max_reconnect_attempts {
                    warn!("Channel offline after {} attempts", attempts);
                    final_state.dismiss();
                    let _ = state_tx.send(ChannelState::Offline);
                    let _ = events_tx.send(ChannelEvent::Offline);
                    return;
                }
                tokio::time::sleep(config.reconnect_delay).await;
            }
        }
    }
}
