/// Echo suppression for whole-document replication.
///
/// Replication is last-write-wins: every broadcast carries the entire
/// document tree and replaces the receiver's copy without merging. Two
/// users typing concurrently will clobber each other's copy with their
/// next broadcast; that is the replication contract, not a defect of
/// this type.
///
/// The suppression flag assumes a single-threaded apply path: the
/// replicator is `&mut`-owned by the session, and the mutation event
/// produced by applying a remote update must reach
/// [`Replicator::should_broadcast`] before any other mutation source
/// fires. Both the session's event handling and the editing surface
/// callbacks run on one cooperative loop, so that ordering holds by
/// construction.
#[derive(Debug, Default)]
pub struct Replicator {
    suppress_next: bool,
}

impl Replicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm the suppression flag immediately before a remote update is
    /// applied to the editing surface.
    pub fn begin_remote_apply(&mut self) {
        self.suppress_next = true;
    }

    /// Called for every mutation of the editing surface, whatever its
    /// origin. Returns whether the mutation is locally authored and must
    /// be broadcast; the one mutation following a remote apply consumes
    /// the flag and is not re-broadcast.
    pub fn should_broadcast(&mut self) -> bool {
        if self.suppress_next {
            self.suppress_next = false;
            false
        } else {
            true
        }
    }
}
