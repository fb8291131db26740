use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

use crate::client::autosave::{AutosaveScheduler, DocumentStore, SaveStatus};
use crate::client::channel::{ChannelEvent, ChannelState, DocChannel};
use crate::client::cursors::{CursorThrottle, RemoteCursorSet};
use crate::client::replication::Replicator;
use crate::models::{
    ClientMessage, ContentChangeMessage, CursorPosition, CursorPositionMessage,
    JoinDocumentMessage, LeaveDocumentMessage, PresenceEntry, ServerMessage,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Joining,
    Joined,
    Leaving,
    Left,
}

/// Events the embedding editor consumes from the session.
#[derive(Debug)]
pub enum SessionEvent {
    /// The roster snapshot was replaced; stale remote cursors have
    /// already been pruned.
    RosterUpdated(Vec<PresenceEntry>),
    /// A peer replaced the document. Apply the value to the editing
    /// surface; the surface's resulting mutation event must still be
    /// reported through [`DocSession::on_local_mutation`], where it is
    /// recognized as an echo and not re-broadcast.
    RemoteContent(Value),
    /// A peer's cursor moved; the updated state is in
    /// [`DocSession::cursors`].
    RemoteCursor { user_id: String },
    /// The channel reconnected and the join handshake was re-run.
    Reconnected,
    /// Reconnection attempts are exhausted.
    Offline,
    /// The credential was rejected; the session cannot recover.
    AuthRejected,
    /// The channel was closed.
    Closed,
}

/// One collaborative editing session: a user's live view of one
/// document.
///
/// Owns the transport channel, the presence roster, remote cursors,
/// echo suppression, and the autosave scheduler. All handlers run on
/// the caller's task; nothing here blocks.
pub struct DocSession<S: DocumentStore> {
    document_id: String,
    document_type: String,
    state: SessionState,
    channel: DocChannel,
    events: mpsc::UnboundedReceiver<ChannelEvent>,
    roster: Vec<PresenceEntry>,
    replicator: Replicator,
    throttle: CursorThrottle,
    cursors: RemoteCursorSet,
    autosave: AutosaveScheduler<S>,
    joined_once: bool,
}

impl<S: DocumentStore> DocSession<S> {
    /// Open a session over an already-connecting channel. The join
    /// handshake is sent as soon as the channel reports connected, and
    /// re-sent on every reconnect because room membership does not
    /// survive a disconnect.
    pub fn open(
        mut channel: DocChannel,
        document_id: impl Into<String>,
        document_type: impl Into<String>,
        autosave: AutosaveScheduler<S>,
    ) -> Self {
        let events = channel
            .take_events()
            .expect("channel event stream already taken");
        Self {
            document_id: document_id.into(),
            document_type: document_type.into(),
            state: SessionState::Joining,
            channel,
            events,
            roster: Vec::new(),
            replicator: Replicator::new(),
            throttle: CursorThrottle::new(),
            cursors: RemoteCursorSet::new(),
            autosave,
            joined_once: false,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn channel_state(&self) -> ChannelState {
        self.channel.state()
    }

    pub fn roster(&self) -> &[PresenceEntry] {
        &self.roster
    }

    pub fn cursors(&self) -> &RemoteCursorSet {
        &self.cursors
    }

    pub fn save_status(&self) -> SaveStatus {
        self.autosave.status()
    }

    /// Target scroll offset that brings a peer's cursor into view; see
    /// [`RemoteCursorSet::scroll_offset_to_user`].
    pub fn scroll_to_user(
        &self,
        user_id: &str,
        viewport_height: f64,
        current_scroll: f64,
    ) -> Option<f64> {
        self.cursors
            .scroll_offset_to_user(user_id, viewport_height, current_scroll)
    }

    /// Report a mutation of the editing surface, whatever its origin.
    /// Locally authored mutations are broadcast to peers; the mutation
    /// event caused by a just-applied remote update is not. Either way
    /// the change is scheduled for persistence.
    pub fn on_local_mutation(&mut self, content: Value) {
        // Persistence is independent of replication: remote-applied
        // mutations are saved by whichever session's timer fires first
        self.autosave
            .on_content_change(&self.document_id, &self.document_type, content.clone());

        if self.replicator.should_broadcast() {
            self.channel
                .send(ClientMessage::ContentChange(ContentChangeMessage {
                    document_id: self.document_id.clone(),
                    document_type: self.document_type.clone(),
                    content,
                }));
        }
    }

    /// Report a caret move, selection change, or focus event. The
    /// caller computes the viewport-relative geometry; `None` means the
    /// computation failed and this single broadcast is skipped.
    pub fn on_local_selection_change(&mut self, geometry: Option<CursorPosition>) {
        let Some(position) = geometry else {
            debug!("Skipping cursor broadcast without geometry");
            return;
        };
        if !self.throttle.allow() {
            return;
        }
        self.channel
            .send(ClientMessage::CursorPosition(CursorPositionMessage {
                document_id: self.document_id.clone(),
                document_type: self.document_type.clone(),
                position,
            }));
    }

    /// Next session event, driven from the channel's event stream.
    /// Returns `None` once the channel task has ended.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        while let Some(event) = self.events.recv().await {
            match event {
                ChannelEvent::Connected => {
                    self.state = SessionState::Joining;
                    self.channel.send(ClientMessage::Join(JoinDocumentMessage {
                        document_id: self.document_id.clone(),
                        document_type: self.document_type.clone(),
                    }));
                    if self.joined_once {
                        // Fresh room state comes with the next roster
                        // push; anything cached is stale
                        self.cursors.clear();
                        return Some(SessionEvent::Reconnected);
                    }
                }
                ChannelEvent::Message(message) => match message {
                    ServerMessage::ActiveUsers(snapshot) => {
                        if self.state == SessionState::Joining {
                            self.state = SessionState::Joined;
                            self.joined_once = true;
                        }
                        self.roster = snapshot.users;
                        self.cursors.retain_roster(&self.roster);
                        return Some(SessionEvent::RosterUpdated(self.roster.clone()));
                    }
                    ServerMessage::ContentUpdate(update) => {
                        self.replicator.begin_remote_apply();
                        return Some(SessionEvent::RemoteContent(update.content));
                    }
                    ServerMessage::CursorUpdate(update) => {
                        let user_id = update.user_id.clone();
                        self.cursors.apply_update(update);
                        return Some(SessionEvent::RemoteCursor { user_id });
                    }
                },
                ChannelEvent::Offline => {
                    self.cursors.clear();
                    return Some(SessionEvent::Offline);
                }
                ChannelEvent::AuthRejected => return Some(SessionEvent::AuthRejected),
                ChannelEvent::Closed => {
                    self.cursors.clear();
                    return Some(SessionEvent::Closed);
                }
            }
        }
        None
    }

    /// Tear the session down: flush pending content, leave the room,
    /// and disconnect the channel. Called on every exit path of the
    /// owning view.
    pub async fn close(mut self) {
        self.state = SessionState::Leaving;

        // Best-effort final flush before the view goes away
        self.autosave.flush().await;

        self.channel
            .send(ClientMessage::Leave(LeaveDocumentMessage {
                document_id: self.document_id.clone(),
                document_type: self.document_type.clone(),
            }));
        self.state = SessionState::Left;

        // The leave message is queued ahead of the close frame
        self.channel.disconnect().await;
    }
}
