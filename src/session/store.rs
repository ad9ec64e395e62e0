//! Process-wide map of conversation sessions.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use super::conversation::ConversationSession;
use super::transcript::clean_agent_output;
use crate::config::SessionConfig;
use crate::models::history::HistoryEntry;

/// Shared handle to one session's state.
type SessionHandle = Arc<Mutex<ConversationSession>>;

/// Session-id keyed store; each session sits behind its own lock.
#[derive(Debug)]
pub struct SessionStore {
    sessions: RwLock<HashMap<String, SessionHandle>>,
    window: usize,
    max_stored: Option<usize>,
}

impl SessionStore {
    /// Create an empty store.
    #[must_use]
    pub fn new(window: usize, max_stored: Option<usize>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            window,
            max_stored,
        }
    }

    /// Create a store from the `[session]` configuration section.
    #[must_use]
    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(config.history_window, config.max_stored_entries)
    }

    /// Build the prompt sent to the agent for `session_id`.
    ///
    /// Creates the session on first use.
    pub async fn augment(&self, session_id: &str, prompt: &str) -> String {
        let session = self.get_or_create(session_id).await;
        let guard = session.lock().await;
        guard.build_augmented_prompt(prompt)
    }

    /// Record a completed exchange. The assistant side is stored cleaned.
    pub async fn record_exchange(&self, session_id: &str, user_prompt: &str, raw_output: &str) {
        let session = self.get_or_create(session_id).await;
        let mut guard = session.lock().await;
        guard.record_exchange(user_prompt, &clean_agent_output(raw_output));
        debug!(session_id, entries = guard.len(), "recorded exchange");
    }

    /// Stored history for `session_id`; empty for unknown sessions.
    pub async fn history(&self, session_id: &str) -> Vec<HistoryEntry> {
        let session = {
            let sessions = self.sessions.read().await;
            sessions.get(session_id).cloned()
        };
        let Some(session) = session else {
            return Vec::new();
        };
        let guard = session.lock().await;
        guard.history()
    }

    /// Clear the history of `session_id`. Returns whether the session existed.
    pub async fn clear(&self, session_id: &str) -> bool {
        let session = {
            let sessions = self.sessions.read().await;
            sessions.get(session_id).cloned()
        };
        let Some(session) = session else {
            return false;
        };
        session.lock().await.clear();
        debug!(session_id, "cleared session history");
        true
    }

    /// Number of sessions created so far.
    pub async fn len(&self) -> usize {
        let sessions = self.sessions.read().await;
        sessions.len()
    }

    /// Whether no session has been created.
    pub async fn is_empty(&self) -> bool {
        let sessions = self.sessions.read().await;
        sessions.is_empty()
    }

    async fn get_or_create(&self, session_id: &str) -> SessionHandle {
        {
            let sessions = self.sessions.read().await;
            if let Some(existing) = sessions.get(session_id) {
                return Arc::clone(existing);
            }
        }

        let mut sessions = self.sessions.write().await;
        Arc::clone(sessions.entry(session_id.to_owned()).or_insert_with(|| {
            debug!(session_id, "created conversation session");
            Arc::new(Mutex::new(ConversationSession::new(
                self.window,
                self.max_stored,
            )))
        }))
    }
}
