//! Unit tests for conversation sessions and transcript cleanup.

use agent_dispatch::models::history::Role;
use agent_dispatch::session::transcript::{clean_agent_output, EMPTY_RESPONSE_PLACEHOLDER};
use agent_dispatch::session::{ConversationSession, SessionStore};

// ── ConversationSession ─────────────────────────────────

#[test]
fn empty_history_leaves_prompt_unchanged() {
    let session = ConversationSession::new(6, None);
    assert_eq!(session.build_augmented_prompt("hello"), "hello");
}

#[test]
fn augmented_prompt_renders_history_then_request() {
    let mut session = ConversationSession::new(6, None);
    session.record_exchange("What is 2+2?", "4");

    assert_eq!(
        session.build_augmented_prompt("And 3+3?"),
        "Previous conversation:\nUser: What is 2+2?\nAssistant: 4\n\nCurrent request: And 3+3?"
    );
}

#[test]
fn only_last_window_entries_are_rendered() {
    let mut session = ConversationSession::new(2, None);
    session.record_exchange("old question", "old answer");
    session.record_exchange("new question", "new answer");

    let prompt = session.build_augmented_prompt("next");
    assert!(!prompt.contains("old"));
    assert!(prompt.contains("User: new question\nAssistant: new answer\n"));
    assert_eq!(session.len(), 4);
}

#[test]
fn exchanges_append_user_then_assistant() {
    let mut session = ConversationSession::new(6, None);
    session.record_exchange("q", "a");

    let history = session.history();
    assert_eq!(history[0].role, Role::User);
    assert_eq!(history[0].content, "q");
    assert_eq!(history[1].role, Role::Assistant);
    assert_eq!(history[1].content, "a");
}

#[test]
fn storage_cap_drops_oldest_entries() {
    let mut session = ConversationSession::new(6, Some(3));
    session.record_exchange("q1", "a1");
    session.record_exchange("q2", "a2");

    let contents: Vec<_> = session.history().into_iter().map(|e| e.content).collect();
    assert_eq!(contents, vec!["a1", "q2", "a2"]);
}

#[test]
fn clear_empties_history() {
    let mut session = ConversationSession::new(6, None);
    session.record_exchange("q", "a");
    session.clear();
    assert!(session.is_empty());
    assert_eq!(session.build_augmented_prompt("x"), "x");
}

// ── Transcript cleanup ──────────────────────────────────

#[test]
fn output_is_stripped_and_trimmed() {
    assert_eq!(clean_agent_output("\n\x1b[1;31mred\x1b[0m text \n"), "red text");
}

#[test]
fn empty_output_uses_placeholder() {
    assert_eq!(clean_agent_output(""), EMPTY_RESPONSE_PLACEHOLDER);
}

// ── SessionStore ────────────────────────────────────────

#[tokio::test]
async fn store_isolates_sessions() {
    let store = SessionStore::new(6, None);
    store.record_exchange("a", "hi", "\x1b[32mhello\x1b[0m").await;

    assert_eq!(store.history("a").await[1].content, "hello");
    assert!(store.history("b").await.is_empty());
    assert_eq!(store.augment("b", "fresh").await, "fresh");
    assert!(store.augment("a", "again").await.starts_with("Previous conversation:"));
}

#[tokio::test]
async fn store_clear_reports_existence() {
    let store = SessionStore::new(6, None);
    assert!(!store.clear("missing").await);

    store.record_exchange("s", "q", "a").await;
    assert!(store.clear("s").await);
    assert!(store.history("s").await.is_empty());
}

#[tokio::test]
async fn concurrent_exchanges_never_interleave() {
    let store = std::sync::Arc::new(SessionStore::new(6, None));
    let mut handles = Vec::new();
    for index in 0..20 {
        let store = std::sync::Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            store
                .record_exchange("shared", &format!("q{index}"), &format!("a{index}"))
                .await;
        }));
    }
    for handle in handles {
        handle.await.expect("task");
    }

    let history = store.history("shared").await;
    assert_eq!(history.len(), 40);
    for pair in history.chunks(2) {
        assert_eq!(pair[0].role, Role::User);
        assert_eq!(pair[1].role, Role::Assistant);
        assert_eq!(pair[0].content[1..], pair[1].content[1..]);
    }
}
