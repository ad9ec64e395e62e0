//! Conversation sessions used to augment prompts with recent history.
//!
//! A session is identified by a caller-chosen string. Each session holds an
//! ordered history of user and assistant entries behind its own lock, so
//! concurrent exchanges on one session append whole pairs without
//! interleaving.

pub mod conversation;
pub mod store;
pub mod transcript;

pub use conversation::ConversationSession;
pub use store::SessionStore;
