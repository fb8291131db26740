pub mod autosave;
pub mod channel;
pub mod cursors;
pub mod replication;
pub mod session;

pub use autosave::{AutosaveScheduler, DocumentStore, PortalDocStore, SaveStatus};
pub use channel::{ChannelConfig, ChannelEvent, ChannelState, DocChannel};
pub use cursors::{CursorThrottle, RemoteCursor, RemoteCursorSet};
pub use replication::Replicator;
pub use session::{DocSession, SessionEvent, SessionState};
