//! Rolling dialogue state for a single session.

use std::collections::VecDeque;
use std::fmt::Write as _;

use crate::models::history::HistoryEntry;

/// Header line opening an augmented prompt.
const HISTORY_HEADER: &str = "Previous conversation:";

/// Ordered history of prompt/response pairs.
///
/// Only the most recent `window` entries are rendered into an augmented
/// prompt. Storage is unbounded unless `max_stored` is set, in which case
/// the oldest entries are dropped first.
#[derive(Debug, Clone)]
pub struct ConversationSession {
    history: VecDeque<HistoryEntry>,
    window: usize,
    max_stored: Option<usize>,
}

impl ConversationSession {
    /// Create an empty session.
    #[must_use]
    pub fn new(window: usize, max_stored: Option<usize>) -> Self {
        Self {
            history: VecDeque::new(),
            window,
            max_stored,
        }
    }

    /// Render the recent history followed by `prompt`.
    ///
    /// Returns `prompt` unchanged when the history is empty.
    #[must_use]
    pub fn build_augmented_prompt(&self, prompt: &str) -> String {
        if self.history.is_empty() {
            return prompt.to_owned();
        }

        let skip = self.history.len().saturating_sub(self.window);
        let mut rendered = String::from(HISTORY_HEADER);
        rendered.push('\n');
        for entry in self.history.iter().skip(skip) {
            let _ = writeln!(rendered, "{}: {}", entry.role.label(), entry.content);
        }
        let _ = write!(rendered, "\nCurrent request: {prompt}");
        rendered
    }

    /// Append the user prompt and then the assistant output.
    pub fn record_exchange(&mut self, user_prompt: &str, assistant_output: &str) {
        self.history.push_back(HistoryEntry::user(user_prompt));
        self.history.push_back(HistoryEntry::assistant(assistant_output));

        if let Some(cap) = self.max_stored {
            while self.history.len() > cap {
                self.history.pop_front();
            }
        }
    }

    /// Snapshot of every stored entry in chronological order.
    #[must_use]
    pub fn history(&self) -> Vec<HistoryEntry> {
        self.history.iter().cloned().collect()
    }

    /// Number of stored entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.history.len()
    }

    /// Whether no exchange has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// Drop all stored entries.
    pub fn clear(&mut self) {
        self.history.clear();
    }
}
