//! Cleanup of agent output before it is stored as conversation history.

use std::sync::LazyLock;

use regex::Regex;

/// Text stored when the agent produced nothing printable.
pub const EMPTY_RESPONSE_PLACEHOLDER: &str = "Response received but content was empty.";

/// CSI and OSC escape sequences emitted by terminal-aware agents.
static ANSI_ESCAPE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)|\x1b[@-Z\\-_]").ok()
});

/// Strip terminal escape sequences and surrounding whitespace.
///
/// Falls back to [`EMPTY_RESPONSE_PLACEHOLDER`] when nothing remains.
#[must_use]
pub fn clean_agent_output(raw: &str) -> String {
    let stripped = match ANSI_ESCAPE.as_ref() {
        Some(pattern) => pattern.replace_all(raw, ""),
        None => raw.into(),
    };

    let trimmed = stripped.trim();
    if trimmed.is_empty() {
        EMPTY_RESPONSE_PLACEHOLDER.to_owned()
    } else {
        trimmed.to_owned()
    }
}
