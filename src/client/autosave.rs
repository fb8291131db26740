use chrono::{DateTime, Utc};
use serde_json::Value;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

/// Default pause in editing activity before a save fires.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(5);

/// Persistence boundary: replace a document's stored content with the
/// given value, addressed by document identifier. Must be idempotent —
/// redundant saves of the same content by multiple sessions are
/// possible and harmless.
pub trait DocumentStore: Send + Sync + 'static {
    fn save(
        &self,
        document_id: &str,
        document_type: &str,
        content: &Value,
    ) -> impl Future<Output = Result<(), String>> + Send;
}

/// Save status surfaced to the editor UI.
#[derive(Clone, Debug, PartialEq)]
pub enum SaveStatus {
    /// No unsaved changes; timestamp of the last successful persist
    Saved { last_saved: Option<DateTime<Utc>> },
    /// Changes pending a debounce expiry (or a failed save awaiting
    /// retry)
    Unsaved,
    Saving,
}

struct SaveState {
    pending: bool,
    saving: bool,
    /// Bumped on every content change; a debounce task only fires for
    /// the change that scheduled it, so each new change restarts the
    /// window.
    change_seq: u64,
    latest: Option<(String, String, Value)>,
    last_saved: Option<DateTime<Utc>>,
}

/// Decouples live editing from persistence: bursts of content changes
/// collapse into one debounced save of the latest value, and session
/// teardown forces a final flush.
///
/// The flush-on-teardown guarantee is best effort only — the acceptable
/// data-loss window is up to the debounce interval plus network
/// latency, not a hard durability guarantee.
pub struct AutosaveScheduler<S: DocumentStore> {
    store: Arc<S>,
    debounce: Duration,
    state: Arc<Mutex<SaveState>>,
}

impl<S: DocumentStore> Clone for AutosaveScheduler<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            debounce: self.debounce,
            state: self.state.clone(),
        }
    }
}

impl<S: DocumentStore> AutosaveScheduler<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self::with_debounce(store, DEFAULT_DEBOUNCE)
    }

    pub fn with_debounce(store: Arc<S>, debounce: Duration) -> Self {
        Self {
            store,
            debounce,
            state: Arc::new(Mutex::new(SaveState {
                pending: false,
                saving: false,
                change_seq: 0,
                latest: None,
                last_saved: None,
            })),
        }
    }

    /// Record a content mutation and (re)start the debounce window.
    /// Every mutation of the editing surface lands here, whether locally
    /// authored or remote-applied.
    pub fn on_content_change(&self, document_id: &str, document_type: &str, content: Value) {
        let seq = {
            let mut state = self.state.lock().expect("autosave state poisoned");
            state.pending = true;
            state.change_seq += 1;
            state.latest = Some((
                document_id.to_string(),
                document_type.to_string(),
                content,
            ));
            state.change_seq
        };

        let scheduler = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(scheduler.debounce).await;
            let still_current = {
                let state = scheduler.state.lock().expect("autosave state poisoned");
                state.change_seq == seq
            };
            // A newer change rescheduled the window; its own task fires
            if still_current {
                scheduler.save().await;
            }
        });
    }

    /// Attempt a save of the latest content. A no-op when nothing is
    /// pending or a save is already in flight. On failure the pending
    /// flag stays set so the next trigger retries.
    pub async fn save(&self) {
        let (seq, document_id, document_type, content) = {
            let mut state = self.state.lock().expect("autosave state poisoned");
            if !state.pending || state.saving {
                return;
            }
            let Some((document_id, document_type, content)) = state.latest.clone() else {
                return;
            };
            state.saving = true;
            (state.change_seq, document_id, document_type, content)
        };

        let result = self.store.save(&document_id, &document_type, &content).await;

        let mut state = self.state.lock().expect("autosave state poisoned");
        state.saving = false;
        match result {
            Ok(()) => {
                // Only clear the flag if no newer change arrived while
                // the write was in flight
                if state.change_seq == seq {
                    state.pending = false;
                }
                state.last_saved = Some(Utc::now());
                debug!("Saved document '{}'", document_id);
            }
            Err(e) => {
                // Editing continues uninterrupted; the next trigger,
                // timer or forced flush, retries
                warn!("Failed to save document '{}': {}", document_id, e);
            }
        }
    }

    /// Forced flush for session teardown: skip the debounce window and
    /// persist any pending change now.
    pub async fn flush(&self) {
        self.save().await;
    }

    pub fn has_pending_changes(&self) -> bool {
        self.state.lock().expect("autosave state poisoned").pending
    }

    pub fn last_saved(&self) -> Option<DateTime<Utc>> {
        self.state.lock().expect("autosave state poisoned").last_saved
    }

    pub fn status(&self) -> SaveStatus {
        let state = self.state.lock().expect("autosave state poisoned");
        if state.saving {
            SaveStatus::Saving
        } else if state.pending {
            SaveStatus::Unsaved
        } else {
            SaveStatus::Saved {
                last_saved: state.last_saved,
            }
        }
    }
}

/// Production store: idempotent whole-document replace against the
/// portal's document API, authenticated with the caller's own bearer
/// token.
pub struct PortalDocStore {
    client: reqwest::Client,
    base_url: String,
    auth_token: String,
}

impl PortalDocStore {
    pub fn new(base_url: impl Into<String>, auth_token: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("Failed to build reqwest client");
        Self {
            client,
            base_url: base_url.into(),
            auth_token: auth_token.into(),
        }
    }
}

impl DocumentStore for PortalDocStore {
    async fn save(
        &self,
        document_id: &str,
        document_type: &str,
        content: &Value,
    ) -> Result<(), String> {
        let url = format!(
            "{}/api/documents/{}/{}/content",
            self.base_url, document_type, document_id
        );
        let response = self
            .client
            .put(&url)
            .bearer_auth(&self.auth_token)
            .json(&serde_json::json!({ "content": content }))
            .send()
            .await
            .map_err(|e| format!("Save request failed: {}", e))?;

        if !response.status().is_success() {
            return Err(format!("Save rejected with status {}", response.status()));
        }
        Ok(())
    }
}
