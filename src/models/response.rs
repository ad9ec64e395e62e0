//! Response model: the mutable lifecycle record tracked per request.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::request::AgentRequest;

/// Lifecycle status for a request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    /// Accepted, waiting for an execution slot.
    Pending,
    /// Agent process is running.
    Processing,
    /// Agent exited successfully.
    Completed,
    /// Execution failed for any reason.
    Failed,
}

impl ResponseStatus {
    /// Whether no further transitions can occur.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Determine whether a lifecycle transition is permitted.
    ///
    /// A pending request may fail without ever running (cancelled before
    /// admission, or an orchestration fault).
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Processing | Self::Failed)
                | (Self::Processing, Self::Completed | Self::Failed)
        )
    }

    /// Lowercase name as it appears on the wire.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// Lifecycle record for one request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AgentResponse {
    /// Record identifier; always equal to `request_id`.
    pub id: String,
    /// Identifier of the originating request.
    pub request_id: String,
    /// Current lifecycle status.
    pub status: ResponseStatus,
    /// Captured stdout; present only once `completed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    /// Failure description; present only once `failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Wall-clock execution time in milliseconds, set on terminal transition.
    #[serde(
        default,
        rename = "executionTime",
        skip_serializing_if = "Option::is_none"
    )]
    pub execution_time_ms: Option<u64>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Terminal transition timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl AgentResponse {
    /// Construct the initial `pending` record for a request.
    #[must_use]
    pub fn pending(request: &AgentRequest) -> Self {
        Self {
            id: request.id.clone(),
            request_id: request.id.clone(),
            status: ResponseStatus::Pending,
            output: None,
            error: None,
            execution_time_ms: None,
            created_at: request.created_at,
            completed_at: None,
        }
    }

    /// Whether the record reached `completed` or `failed`.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Partial update applied to an [`AgentResponse`] by the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    /// Target status.
    pub status: ResponseStatus,
    /// Output to attach (honoured only for `completed`).
    pub output: Option<String>,
    /// Error to attach (honoured only for `failed`).
    pub error: Option<String>,
    /// Execution time to record.
    pub execution_time: Option<Duration>,
    /// Explicit completion timestamp; defaults to now on terminal updates.
    pub completed_at: Option<DateTime<Utc>>,
}

impl StatusUpdate {
    /// Transition to `processing`.
    #[must_use]
    pub fn processing() -> Self {
        Self {
            status: ResponseStatus::Processing,
            output: None,
            error: None,
            execution_time: None,
            completed_at: None,
        }
    }

    /// Terminal success with captured output.
    #[must_use]
    pub fn completed(output: String, execution_time: Duration) -> Self {
        Self {
            status: ResponseStatus::Completed,
            output: Some(output),
            error: None,
            execution_time: Some(execution_time),
            completed_at: Some(Utc::now()),
        }
    }

    /// Terminal failure with a human-readable message.
    #[must_use]
    pub fn failed(error: impl Into<String>, execution_time: Duration) -> Self {
        Self {
            status: ResponseStatus::Failed,
            output: None,
            error: Some(error.into()),
            execution_time: Some(execution_time),
            completed_at: Some(Utc::now()),
        }
    }
}
