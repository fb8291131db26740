use std::collections::{HashMap, HashSet};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

use crate::models::{ActiveUsersMessage, PresenceEntry, ServerMessage};

/// Capacity of each room's fan-out channel.
const ROOM_CHANNEL_CAPACITY: usize = 100;

/// A message fanned out to every subscriber of a room. Relayed peer
/// traffic excludes the originating connection; roster pushes go to all
/// members, including the one that triggered the recompute.
#[derive(Clone, Debug)]
pub struct Envelope {
    pub exclude: Option<Uuid>,
    pub message: ServerMessage,
}

struct Room {
    document_type: String,
    tx: broadcast::Sender<Envelope>,
    members: HashMap<Uuid, PresenceEntry>,
}

impl Room {
    fn new(document_type: &str) -> Self {
        let (tx, _rx) = broadcast::channel::<Envelope>(ROOM_CHANNEL_CAPACITY);
        Self {
            document_type: document_type.to_string(),
            tx,
            members: HashMap::new(),
        }
    }

    /// Recompute the roster and push it to every member. Always called
    /// with the registry write lock held, so membership mutation and the
    /// push are one logical step.
    fn push_roster(&self) {
        let users: Vec<PresenceEntry> = self.members.values().cloned().collect();
        let _ = self.tx.send(Envelope {
            exclude: None,
            message: ServerMessage::ActiveUsers(ActiveUsersMessage { users }),
        });
    }
}

/// Server-side map from document identifier to the set of currently
/// connected sessions. Rooms are created lazily on first join and
/// reclaimed on last leave. The roster is keyed by connection, not by
/// user: one user with two tabs appears twice.
#[derive(Default)]
pub struct RoomRegistry {
    rooms: RwLock<HashMap<String, Room>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a session to the room for `document_id`, creating the room if
    /// needed, and push the updated roster to every member. A repeated
    /// join from the same connection replaces the previous entry.
    ///
    /// The returned receiver is subscribed before the roster push, so the
    /// joining session sees the roster that includes itself.
    pub async fn join(
        &self,
        document_id: &str,
        document_type: &str,
        conn_id: Uuid,
        entry: PresenceEntry,
    ) -> broadcast::Receiver<Envelope> {
        let mut rooms = self.rooms.write().await;
        let room = rooms
            .entry(document_id.to_string())
            .or_insert_with(|| Room::new(document_type));
        let rx = room.tx.subscribe();
        room.members.insert(conn_id, entry);
        info!(
            "Session {} joined {} '{}' ({} member(s))",
            conn_id,
            room.document_type,
            document_id,
            room.members.len()
        );
        room.push_roster();
        rx
    }

    /// Remove a session from a room and push the updated roster to the
    /// remaining members. Empty rooms are removed from the map. Invoked
    /// both on explicit leave and on connection loss.
    pub async fn leave(&self, document_id: &str, conn_id: Uuid) {
        let mut rooms = self.rooms.write().await;
        if let Some(room) = rooms.get_mut(document_id) {
            if room.members.remove(&conn_id).is_none() {
                return;
            }
            info!(
                "Session {} left '{}' ({} member(s) remain)",
                conn_id,
                document_id,
                room.members.len()
            );
            if room.members.is_empty() {
                rooms.remove(document_id);
            } else {
                room.push_roster();
            }
        }
    }

    /// Relay a message from one member to every other member of the
    /// room. Messages for rooms the sender is not a member of are
    /// dropped.
    pub async fn relay(&self, document_id: &str, sender: Uuid, message: ServerMessage) {
        let rooms = self.rooms.read().await;
        match rooms.get(document_id) {
            Some(room) if room.members.contains_key(&sender) => {
                let _ = room.tx.send(Envelope {
                    exclude: Some(sender),
                    message,
                });
            }
            _ => {
                debug!(
                    "Dropping relay from {} for unjoined document '{}'",
                    sender, document_id
                );
            }
        }
    }

    /// Aggregate counters for diagnostics: total connections, rooms, and
    /// distinct users currently online.
    pub async fn stats(&self) -> (u32, u32, u32) {
        let rooms = self.rooms.read().await;
        let mut n_conn: u32 = 0;
        let mut users: HashSet<&str> = HashSet::new();
        for room in rooms.values() {
            n_conn += room.members.len() as u32;
            for entry in room.members.values() {
                users.insert(entry.user_id.as_str());
            }
        }
        (n_conn, rooms.len() as u32, users.len() as u32)
    }

    #[cfg(test)]
    async fn roster(&self, document_id: &str) -> Vec<PresenceEntry> {
        let rooms = self.rooms.read().await;
        rooms
            .get(document_id)
            .map(|room| room.members.values().cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ContentUpdateMessage, ServerMessage};
    use serde_json::json;

    fn entry(user_id: &str) -> PresenceEntry {
        PresenceEntry {
            user_id: user_id.to_string(),
            name: user_id.to_string(),
            initials: PresenceEntry::initials_from_name(user_id),
            avatar: None,
        }
    }

    #[tokio::test]
    async fn room_exists_iff_member_present() {
        let registry = RoomRegistry::new();
        let conn = Uuid::new_v4();

        let _rx = registry.join("d1", "project", conn, entry("u1")).await;
        assert_eq!(registry.stats().await, (1, 1, 1));

        registry.leave("d1", conn).await;
        assert_eq!(registry.stats().await, (0, 0, 0));
    }

    #[tokio::test]
    async fn duplicate_join_keeps_one_roster_entry() {
        let registry = RoomRegistry::new();
        let conn = Uuid::new_v4();

        let _rx1 = registry.join("d1", "project", conn, entry("u1")).await;
        let _rx2 = registry.join("d1", "project", conn, entry("u1")).await;
        assert_eq!(registry.roster("d1").await.len(), 1);

        // a single leave fully removes the session
        registry.leave("d1", conn).await;
        assert_eq!(registry.stats().await, (0, 0, 0));
    }

    #[tokio::test]
    async fn same_user_two_connections_appears_twice() {
        let registry = RoomRegistry::new();
        let _rx1 = registry.join("d1", "project", Uuid::new_v4(), entry("u1")).await;
        let _rx2 = registry.join("d1", "project", Uuid::new_v4(), entry("u1")).await;

        assert_eq!(registry.roster("d1").await.len(), 2);
        assert_eq!(registry.stats().await, (2, 1, 1));
    }

    #[tokio::test]
    async fn relay_excludes_sender_and_reaches_peers() {
        let registry = RoomRegistry::new();
        let (conn_a, conn_b) = (Uuid::new_v4(), Uuid::new_v4());
        let mut rx_a = registry.join("d1", "project", conn_a, entry("u1")).await;
        let mut rx_b = registry.join("d1", "project", conn_b, entry("u2")).await;

        // drain roster pushes
        while let Ok(envelope) = rx_a.try_recv() {
            assert!(matches!(envelope.message, ServerMessage::ActiveUsers(_)));
        }
        while rx_b.try_recv().is_ok() {}

        registry
            .relay(
                "d1",
                conn_a,
                ServerMessage::ContentUpdate(ContentUpdateMessage {
                    content: json!({"text": "hello"}),
                }),
            )
            .await;

        let envelope = rx_b.recv().await.unwrap();
        assert_eq!(envelope.exclude, Some(conn_a));
        assert!(matches!(envelope.message, ServerMessage::ContentUpdate(_)));

        // the sender's own receiver sees the envelope too, but marked
        // with its id so the forwarder drops it
        let echoed = rx_a.recv().await.unwrap();
        assert_eq!(echoed.exclude, Some(conn_a));
    }

    #[tokio::test]
    async fn relay_for_unjoined_sender_is_dropped() {
        let registry = RoomRegistry::new();
        let conn = Uuid::new_v4();
        let mut rx = registry.join("d1", "project", conn, entry("u1")).await;
        while rx.try_recv().is_ok() {}

        registry
            .relay(
                "d1",
                Uuid::new_v4(),
                ServerMessage::ContentUpdate(ContentUpdateMessage {
                    content: json!({}),
                }),
            )
            .await;
        assert!(rx.try_recv().is_err());
    }
}
