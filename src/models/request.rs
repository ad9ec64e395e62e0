//! Request model: one user-submitted unit of work.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Optional execution context supplied with a prompt.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RequestContext {
    /// Directory the agent process starts in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<PathBuf>,
    /// Variables overlaid onto the agent's environment.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub environment: HashMap<String, String>,
    /// Per-request timeout override in milliseconds.
    #[serde(default, alias = "timeout", skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl RequestContext {
    /// Timeout override as a [`Duration`], if one was supplied.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

/// Free-form caller metadata attached to a request.
pub type Metadata = HashMap<String, serde_json::Value>;

/// An accepted prompt. Immutable once created; lifecycle state lives in
/// the paired [`AgentResponse`](super::response::AgentResponse).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AgentRequest {
    /// Canonical request identifier, also the registry lookup key.
    pub id: String,
    /// Natural-language instruction text.
    pub prompt: String,
    /// Execution context.
    #[serde(default)]
    pub context: RequestContext,
    /// Caller metadata, stored but never interpreted.
    #[serde(default)]
    pub metadata: Metadata,
    /// Conversation session used to augment the prompt, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl AgentRequest {
    /// Construct a new request with a generated identifier.
    #[must_use]
    pub fn new(
        prompt: String,
        context: RequestContext,
        metadata: Metadata,
        session_id: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            prompt,
            context,
            metadata,
            session_id,
            created_at: Utc::now(),
        }
    }
}
