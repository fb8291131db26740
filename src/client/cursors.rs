use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::models::{CursorPosition, CursorUpdateMessage, PresenceEntry};

/// Caret line height used when a broadcast carries no usable height.
pub const DEFAULT_CARET_HEIGHT: f64 = 18.0;

/// Default minimum interval between cursor broadcasts.
pub const DEFAULT_THROTTLE_INTERVAL: Duration = Duration::from_millis(50);

/// Drop-not-queue rate limiter for cursor broadcasts: events inside the
/// interval are discarded, never coalesced or replayed.
#[derive(Debug)]
pub struct CursorThrottle {
    interval: Duration,
    last_broadcast: Option<Instant>,
}

impl CursorThrottle {
    pub fn new() -> Self {
        Self::with_interval(DEFAULT_THROTTLE_INTERVAL)
    }

    pub fn with_interval(interval: Duration) -> Self {
        Self {
            interval,
            last_broadcast: None,
        }
    }

    /// Whether a broadcast may go out now. Records the broadcast time
    /// when it may.
    pub fn allow(&mut self) -> bool {
        let now = Instant::now();
        match self.last_broadcast {
            Some(last) if now.duration_since(last) < self.interval => false,
            _ => {
                self.last_broadcast = Some(now);
                true
            }
        }
    }
}

impl Default for CursorThrottle {
    fn default() -> Self {
        Self::new()
    }
}

/// A peer's cursor as last broadcast. Ephemeral: rebuilt from the
/// latest update only, removed with the peer's presence entry.
#[derive(Clone, Debug)]
pub struct RemoteCursor {
    pub user_id: String,
    pub name: String,
    pub initials: String,
    pub position: CursorPosition,
}

impl RemoteCursor {
    /// Caret line height to render, falling back to the default when the
    /// broadcast carried no usable height.
    pub fn caret_height(&self) -> f64 {
        if self.position.height > 0.0 {
            self.position.height
        } else {
            DEFAULT_CARET_HEIGHT
        }
    }
}

/// Remote cursors for one document room, keyed by user identifier, so
/// several connections of the same user collapse to the latest
/// broadcast.
#[derive(Debug, Default)]
pub struct RemoteCursorSet {
    cursors: HashMap<String, RemoteCursor>,
}

impl RemoteCursorSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert a peer's cursor from an incoming update. Received
    /// coordinates are used as-is in the receiver's own container; no
    /// re-projection across differing scroll offsets is attempted.
    pub fn apply_update(&mut self, update: CursorUpdateMessage) {
        self.cursors.insert(
            update.user_id.clone(),
            RemoteCursor {
                user_id: update.user_id,
                name: update.user_name,
                initials: update.user_initials,
                position: update.position,
            },
        );
    }

    /// Prune cursors whose user is no longer in the roster.
    pub fn retain_roster(&mut self, roster: &[PresenceEntry]) {
        self.cursors
            .retain(|user_id, _| roster.iter().any(|entry| &entry.user_id == user_id));
    }

    /// Remove every remote cursor at once (channel disconnect).
    pub fn clear(&mut self) {
        self.cursors.clear();
    }

    pub fn get(&self, user_id: &str) -> Option<&RemoteCursor> {
        self.cursors.get(user_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RemoteCursor> {
        self.cursors.values()
    }

    pub fn len(&self) -> usize {
        self.cursors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cursors.is_empty()
    }

    /// Target scroll offset that centers the stored `y` of a user's
    /// cursor in the viewport, based on the receiver's own scroll offset
    /// at invocation time.
    ///
    /// The stored coordinate was captured relative to the sender's
    /// scroll state at broadcast time, so this is an approximation, not
    /// a precision guarantee.
    pub fn scroll_offset_to_user(
        &self,
        user_id: &str,
        viewport_height: f64,
        current_scroll: f64,
    ) -> Option<f64> {
        let cursor = self.cursors.get(user_id)?;
        let target = current_scroll + cursor.position.y - viewport_height / 2.0;
        Some(target.max(0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SelectionRegion;

    fn update(user_id: &str, y: f64) -> CursorUpdateMessage {
        CursorUpdateMessage {
            user_id: user_id.to_string(),
            user_name: user_id.to_string(),
            user_initials: "U".to_string(),
            position: CursorPosition {
                x: 10.0,
                y,
                height: 18.0,
                selection: None,
            },
        }
    }

    fn entry(user_id: &str) -> PresenceEntry {
        PresenceEntry {
            user_id: user_id.to_string(),
            name: user_id.to_string(),
            initials: "U".to_string(),
            avatar: None,
        }
    }

    #[test]
    fn throttle_allows_at_most_one_per_interval() {
        let mut throttle = CursorThrottle::with_interval(Duration::from_secs(60));
        let sent = (0..10).filter(|_| throttle.allow()).count();
        assert_eq!(sent, 1);
    }

    #[test]
    fn throttle_allows_again_after_interval() {
        let mut throttle = CursorThrottle::with_interval(Duration::from_millis(0));
        assert!(throttle.allow());
        assert!(throttle.allow());
    }

    #[test]
    fn upsert_keeps_latest_per_user() {
        let mut cursors = RemoteCursorSet::new();
        cursors.apply_update(update("u1", 100.0));
        cursors.apply_update(update("u1", 250.0));

        assert_eq!(cursors.len(), 1);
        assert_eq!(cursors.get("u1").unwrap().position.y, 250.0);
    }

    #[test]
    fn roster_pruning_drops_departed_users() {
        let mut cursors = RemoteCursorSet::new();
        cursors.apply_update(update("u1", 10.0));
        cursors.apply_update(update("u2", 20.0));

        cursors.retain_roster(&[entry("u2")]);
        assert!(cursors.get("u1").is_none());
        assert!(cursors.get("u2").is_some());

        cursors.clear();
        assert!(cursors.is_empty());
    }

    #[test]
    fn caret_height_falls_back_to_default() {
        let mut message = update("u1", 10.0);
        message.position.height = 0.0;
        let mut cursors = RemoteCursorSet::new();
        cursors.apply_update(message);

        assert_eq!(cursors.get("u1").unwrap().caret_height(), DEFAULT_CARET_HEIGHT);
    }

    #[test]
    fn selection_shapes_are_preserved() {
        let mut message = update("u1", 10.0);
        message.position.selection = Some(SelectionRegion::Endpoints {
            from_x: 1.0,
            from_y: 2.0,
            to_x: 50.0,
            to_y: 40.0,
        });
        let mut cursors = RemoteCursorSet::new();
        cursors.apply_update(message);

        assert!(matches!(
            cursors.get("u1").unwrap().position.selection,
            Some(SelectionRegion::Endpoints { .. })
        ));
    }

    #[test]
    fn scroll_target_centers_stored_y() {
        let mut cursors = RemoteCursorSet::new();
        cursors.apply_update(update("u1", 300.0));

        // 600px viewport scrolled to 1000: 1000 + 300 - 300 = 1000
        assert_eq!(
            cursors.scroll_offset_to_user("u1", 600.0, 1000.0),
            Some(1000.0)
        );
        // clamped at the top of the document
        cursors.apply_update(update("u2", 10.0));
        assert_eq!(cursors.scroll_offset_to_user("u2", 600.0, 0.0), Some(0.0));
        // unknown user yields nothing
        assert_eq!(cursors.scroll_offset_to_user("zz", 600.0, 0.0), None);
    }
}
