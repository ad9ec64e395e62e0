//! Per-execution lifecycle state machine and result classification.
//!
//! An execution moves `Running → Killed(reason)` when a timeout or
//! cancellation fires first, or `Running → Exited` when the process exits
//! on its own. Only the first terminal event is acted upon: a kill request
//! after exit is refused, and an exit observed after a kill keeps the kill
//! reason so the result reports the timeout rather than the exit code.

use std::process::ExitStatus;
use std::time::Duration;

use super::{ExecutionResult, FailureKind};

/// Why the runner terminated a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillReason {
    /// The execution exceeded its timeout.
    Timeout,
    /// The caller cancelled the execution.
    Cancelled,
}

/// Lifecycle of one spawned process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Lifecycle {
    /// Process is running and no terminal event has been seen.
    #[default]
    Running,
    /// Runner sent a termination signal.
    Killed(KillReason),
    /// Process exited before any kill was requested.
    Exited,
}

impl Lifecycle {
    /// Whether no terminal event has been recorded yet.
    #[must_use]
    pub fn is_running(self) -> bool {
        self == Self::Running
    }

    /// Record a kill request. Returns `true` only for the first terminal
    /// event; the caller must send the signal only in that case.
    pub fn request_kill(&mut self, reason: KillReason) -> bool {
        if self.is_running() {
            *self = Self::Killed(reason);
            true
        } else {
            false
        }
    }

    /// Record process exit. Returns the kill reason if a kill won the race.
    pub fn observe_exit(&mut self) -> Option<KillReason> {
        match *self {
            Self::Running => {
                *self = Self::Exited;
                None
            }
            Self::Killed(reason) => Some(reason),
            Self::Exited => None,
        }
    }
}

/// Exit information detached from the platform `ExitStatus`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitInfo {
    /// Whether the process reported success.
    pub success: bool,
    /// Exit code, absent when terminated by a signal.
    pub code: Option<i32>,
}

impl ExitInfo {
    /// Exit with the given code.
    #[must_use]
    pub fn code(code: i32) -> Self {
        Self {
            success: code == 0,
            code: Some(code),
        }
    }

    /// Termination without an exit code.
    #[must_use]
    pub fn signalled() -> Self {
        Self {
            success: false,
            code: None,
        }
    }
}

impl From<ExitStatus> for ExitInfo {
    fn from(status: ExitStatus) -> Self {
        Self {
            success: status.success(),
            code: status.code(),
        }
    }
}

/// Everything the runner collected about a finished process.
#[derive(Debug, Clone)]
pub struct Finished {
    /// Final lifecycle state.
    pub lifecycle: Lifecycle,
    /// Exit information.
    pub exit: ExitInfo,
    /// Captured stdout.
    pub stdout: String,
    /// Captured stderr.
    pub stderr: String,
    /// Timeout that was in force.
    pub timeout: Duration,
    /// Wall-clock time since spawn.
    pub elapsed: Duration,
}

/// Fold a finished process into exactly one terminal result.
#[must_use]
pub fn classify(finished: Finished) -> ExecutionResult {
    let Finished {
        lifecycle,
        exit,
        stdout,
        stderr,
        timeout,
        elapsed,
    } = finished;

    match lifecycle {
        Lifecycle::Killed(KillReason::Timeout) => ExecutionResult::failed(
            FailureKind::Timeout,
            format!("Process timed out after {} ms", timeout.as_millis()),
            non_empty(stdout),
            exit.code,
            elapsed,
        ),
        Lifecycle::Killed(KillReason::Cancelled) => ExecutionResult::failed(
            FailureKind::Cancelled,
            "Process cancelled".to_owned(),
            non_empty(stdout),
            exit.code,
            elapsed,
        ),
        Lifecycle::Running | Lifecycle::Exited if exit.success => {
            ExecutionResult::completed(stdout, exit.code, elapsed)
        }
        Lifecycle::Running | Lifecycle::Exited => {
            let stderr = stderr.trim();
            let message = if stderr.is_empty() {
                exit.code.map_or_else(
                    || "Process terminated by signal".to_owned(),
                    |code| format!("Process exited with code {code}"),
                )
            } else {
                stderr.to_owned()
            };
            ExecutionResult::failed(
                FailureKind::NonZeroExit,
                message,
                non_empty(stdout),
                exit.code,
                elapsed,
            )
        }
    }
}

fn non_empty(text: String) -> Option<String> {
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}
