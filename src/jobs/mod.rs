//! Job orchestration: polled submissions and live streams.
//!
//! [`JobService`] accepts prompts, registers them and runs them in the
//! background under an admission semaphore. [`StreamRelay`] runs one prompt
//! while forwarding its output to a [`StreamSink`]. Both share the same
//! runner, session store and semaphore.

pub mod relay;
pub mod service;

use crate::config::GlobalConfig;
use crate::executor::ExecutionResult;
use crate::models::request::{Metadata, RequestContext};
use crate::models::response::StatusUpdate;
use crate::{AppError, Result};

pub use relay::{StreamRelay, StreamSink};
pub use service::JobService;

/// Failure message used when a job is cancelled while still queued.
pub const CANCELLED_BEFORE_START: &str = "Request cancelled before start";

/// Caller input for [`JobService::submit`].
#[derive(Debug, Clone, Default)]
pub struct Submission {
    /// Instruction text.
    pub prompt: String,
    /// Working directory, environment and timeout overrides.
    pub context: RequestContext,
    /// Caller metadata stored with the request.
    pub metadata: Metadata,
    /// Conversation session to augment the prompt from.
    pub session_id: Option<String>,
}

impl Submission {
    /// Submission with only a prompt.
    #[must_use]
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }
}

/// Input bounds applied before any work is scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmissionLimits {
    /// Maximum prompt length in characters.
    pub max_prompt_chars: usize,
    /// Smallest accepted timeout override.
    pub min_timeout_ms: u64,
    /// Largest accepted timeout override.
    pub max_timeout_ms: u64,
}

impl SubmissionLimits {
    /// Limits taken from the `[limits]` and `[timeouts]` sections.
    #[must_use]
    pub fn from_config(config: &GlobalConfig) -> Self {
        Self {
            max_prompt_chars: config.limits.max_prompt_chars,
            min_timeout_ms: config.timeouts.min_timeout_ms,
            max_timeout_ms: config.timeouts.max_timeout_ms,
        }
    }

    /// Check a prompt, its context and an optional session id.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Validation` describing the first violated bound.
    pub fn validate(
        &self,
        prompt: &str,
        context: &RequestContext,
        session_id: Option<&str>,
    ) -> Result<()> {
        if prompt.trim().is_empty() {
            return Err(AppError::Validation("prompt must not be empty".into()));
        }

        let chars = prompt.chars().count();
        if chars > self.max_prompt_chars {
            return Err(AppError::Validation(format!(
                "prompt is {chars} characters; the limit is {}",
                self.max_prompt_chars
            )));
        }

        if let Some(timeout_ms) = context.timeout_ms {
            if !(self.min_timeout_ms..=self.max_timeout_ms).contains(&timeout_ms) {
                return Err(AppError::Validation(format!(
                    "timeout must be between {} and {} ms",
                    self.min_timeout_ms, self.max_timeout_ms
                )));
            }
        }

        if session_id.is_some_and(|id| id.trim().is_empty()) {
            return Err(AppError::Validation("session id must not be empty".into()));
        }

        Ok(())
    }
}

/// Fold an execution result into the terminal registry update.
#[must_use]
pub fn terminal_update(result: ExecutionResult) -> StatusUpdate {
    if result.is_completed() {
        StatusUpdate::completed(result.output.unwrap_or_default(), result.execution_time)
    } else {
        StatusUpdate::failed(
            result
                .error
                .unwrap_or_else(|| "Agent execution failed".to_owned()),
            result.execution_time,
        )
    }
}
