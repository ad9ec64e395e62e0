//! External agent execution.
//!
//! [`ProcessRunner`] launches one agent process per call, feeds it the
//! prompt, enforces a timeout and optional caller cancellation, and folds
//! every outcome into an [`ExecutionResult`]. Nothing in this module returns
//! an error for a failed execution: spawn failures, timeouts and non-zero
//! exits are all data.

pub mod codec;
pub mod command;
pub mod lifecycle;
pub mod runner;

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::models::request::RequestContext;

pub use runner::ProcessRunner;

/// Boxed future returned by [`AgentRunner`] methods.
pub type RunFuture<'a> = Pin<Box<dyn Future<Output = ExecutionResult> + Send + 'a>>;

/// Callback receiving stdout text in arrival order.
pub type ChunkSink<'a> = &'a mut (dyn FnMut(&str) + Send);

/// Whole milliseconds in `duration`, saturating at `u64::MAX`.
#[must_use]
pub fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Per-call execution options.
#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    /// Directory the process starts in; defaults to the server's own.
    pub working_directory: Option<PathBuf>,
    /// Variables overlaid onto the child's environment.
    pub environment: HashMap<String, String>,
    /// Timeout override; the runner's default applies when absent.
    pub timeout: Option<Duration>,
    /// Token that terminates the process when cancelled.
    pub cancel: Option<CancellationToken>,
}

impl ExecOptions {
    /// Options derived from a request's context.
    #[must_use]
    pub fn from_context(context: &RequestContext) -> Self {
        Self {
            working_directory: context.working_directory.clone(),
            environment: context.environment.clone(),
            timeout: context.timeout(),
            cancel: None,
        }
    }

    /// Attach a cancellation token.
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

/// Terminal status of one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStatus {
    /// Process exited with code 0.
    Completed,
    /// Any other outcome.
    Failed,
}

/// Classification of a failed execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The process could not be launched.
    Spawn,
    /// The process exceeded its timeout and was terminated.
    Timeout,
    /// The caller cancelled the execution.
    Cancelled,
    /// The process exited unsuccessfully.
    NonZeroExit,
}

/// Exactly one terminal result per execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    /// Terminal status.
    pub status: ExecutionStatus,
    /// Captured stdout. Always present on success, present on failure only
    /// when the process wrote something.
    pub output: Option<String>,
    /// Failure description.
    pub error: Option<String>,
    /// Failure classification.
    pub failure: Option<FailureKind>,
    /// Process exit code, when one exists.
    pub exit_code: Option<i32>,
    /// Wall-clock time from spawn attempt to terminal result.
    pub execution_time: Duration,
}

impl ExecutionResult {
    /// Successful execution.
    #[must_use]
    pub fn completed(output: String, exit_code: Option<i32>, execution_time: Duration) -> Self {
        Self {
            status: ExecutionStatus::Completed,
            output: Some(output),
            error: None,
            failure: None,
            exit_code,
            execution_time,
        }
    }

    /// Failed execution.
    #[must_use]
    pub fn failed(
        failure: FailureKind,
        error: String,
        output: Option<String>,
        exit_code: Option<i32>,
        execution_time: Duration,
    ) -> Self {
        Self {
            status: ExecutionStatus::Failed,
            output,
            error: Some(error),
            failure: Some(failure),
            exit_code,
            execution_time,
        }
    }

    /// Whether the execution completed successfully.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.status == ExecutionStatus::Completed
    }
}

/// Seam between orchestration and process execution.
///
/// [`ProcessRunner`] is the production implementation; the job service and
/// stream relay accept any implementation.
pub trait AgentRunner: Send + Sync {
    /// Run one prompt to completion.
    fn execute<'a>(&'a self, prompt: &'a str, options: &'a ExecOptions) -> RunFuture<'a>;

    /// Run one prompt, handing stdout text to `on_chunk` as it arrives.
    ///
    /// Every `on_chunk` call happens before the returned future resolves.
    fn execute_streaming<'a>(
        &'a self,
        prompt: &'a str,
        options: &'a ExecOptions,
        on_chunk: ChunkSink<'a>,
    ) -> RunFuture<'a>;
}
