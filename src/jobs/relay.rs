//! Live forwarding of a single execution's output.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, Instrument};

use super::{SubmissionLimits, CANCELLED_BEFORE_START};
use crate::executor::{
    duration_millis, AgentRunner, ExecOptions, ExecutionResult, FailureKind,
};
use crate::models::request::RequestContext;
use crate::session::SessionStore;
use crate::Result;

/// Receiver of one stream's events.
///
/// Every `on_chunk` call precedes the single terminal call, which is
/// either `on_complete` or `on_error`.
pub trait StreamSink: Send {
    /// A fragment of agent stdout, in arrival order.
    fn on_chunk(&mut self, text: &str);

    /// The agent exited successfully.
    fn on_complete(&mut self);

    /// The execution failed; `message` describes why.
    fn on_error(&mut self, message: &str);
}

/// Runs one prompt at a time per call and forwards its output to a sink.
#[derive(Clone)]
pub struct StreamRelay {
    runner: Arc<dyn AgentRunner>,
    sessions: Arc<SessionStore>,
    permits: Arc<Semaphore>,
    limits: SubmissionLimits,
    shutdown: CancellationToken,
}

impl StreamRelay {
    /// Create a relay. Usually obtained from
    /// [`JobService::relay`](super::JobService::relay) so both share one
    /// admission semaphore.
    #[must_use]
    pub fn new(
        runner: Arc<dyn AgentRunner>,
        sessions: Arc<SessionStore>,
        permits: Arc<Semaphore>,
        limits: SubmissionLimits,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            runner,
            sessions,
            permits,
            limits,
            shutdown,
        }
    }

    /// Token for one stream that also fires when the relay shuts down.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shutdown.child_token()
    }

    /// Run `prompt` and forward its output to `sink`.
    ///
    /// Input is validated before the sink sees anything. After that every
    /// outcome, including cancellation while queued, reaches the sink as
    /// exactly one terminal call and is returned as data. When `cancel` is
    /// `None` the stream still stops on relay shutdown.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Validation` for rejected input.
    pub async fn stream(
        &self,
        prompt: &str,
        context: &RequestContext,
        session_id: Option<&str>,
        cancel: Option<CancellationToken>,
        sink: &mut dyn StreamSink,
    ) -> Result<ExecutionResult> {
        self.limits.validate(prompt, context, session_id)?;

        let token = cancel.unwrap_or_else(|| self.cancellation_token());
        let span = info_span!("stream", session_id = session_id.unwrap_or_default());
        Ok(self
            .run(prompt, context, session_id, token, sink)
            .instrument(span)
            .await)
    }

    async fn run(
        &self,
        prompt: &str,
        context: &RequestContext,
        session_id: Option<&str>,
        token: CancellationToken,
        sink: &mut dyn StreamSink,
    ) -> ExecutionResult {
        let queued = Instant::now();

        let permit = tokio::select! {
            biased;
            () = token.cancelled() => None,
            permit = Arc::clone(&self.permits).acquire_owned() => match permit {
                Ok(permit) => Some(permit),
                Err(err) => {
                    error!(%err, "admission semaphore closed");
                    None
                }
            },
        };
        let Some(permit) = permit else {
            info!("stream cancelled while queued");
            sink.on_error(CANCELLED_BEFORE_START);
            return ExecutionResult::failed(
                FailureKind::Cancelled,
                CANCELLED_BEFORE_START.to_owned(),
                None,
                None,
                queued.elapsed(),
            );
        };

        info!(waited_ms = duration_millis(queued.elapsed()), "stream started");

        let augmented = match session_id {
            Some(session_id) => self.sessions.augment(session_id, prompt).await,
            None => prompt.to_owned(),
        };

        let options = ExecOptions::from_context(context).with_cancel(token);
        let result = {
            let mut forward = |text: &str| sink.on_chunk(text);
            self.runner
                .execute_streaming(&augmented, &options, &mut forward)
                .await
        };
        drop(permit);

        if result.is_completed() {
            if let Some(session_id) = session_id {
                let output = result.output.as_deref().unwrap_or_default();
                self.sessions
                    .record_exchange(session_id, prompt, output)
                    .await;
            }
            sink.on_complete();
        } else {
            let message = result.error.as_deref().unwrap_or("Agent execution failed");
            sink.on_error(message);
        }

        info!(completed = result.is_completed(), "stream finished");
        result
    }
}
