//! Process runner: one agent process per call.
//!
//! Each call spawns the configured agent, delivers the prompt, and drives a
//! single `select!` loop over stdout, stderr, process exit, the timeout,
//! caller cancellation, the hard-kill timer and the post-exit drain window.
//! Signals go to the agent's whole process group. Termination goes through
//! [`Lifecycle`] so only the first terminal event counts.

use std::time::Duration;

use futures_util::StreamExt;
use tokio::io::{AsyncRead, AsyncWriteExt};
use tokio::process::Child;
use tokio::time::Instant;
use tokio_util::codec::FramedRead;
use tracing::{debug, info, warn};

use super::codec::Utf8ChunkCodec;
use super::command::build_command;
use super::lifecycle::{classify, ExitInfo, Finished, KillReason, Lifecycle};
use super::{
    duration_millis, AgentRunner, ChunkSink, ExecOptions, ExecutionResult, FailureKind, RunFuture,
};
use crate::config::{AgentConfig, GlobalConfig, PromptMode};

/// How long to keep reading stdout and stderr after the process has exited.
///
/// A grandchild that inherited the pipes can hold them open indefinitely.
/// When this window closes the rest of the process group is killed and
/// whatever was read so far is kept.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Characters of the prompt included in log lines.
const PROMPT_LOG_CHARS: usize = 100;

/// Spawns and supervises external agent processes.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    agent: AgentConfig,
    default_timeout: Duration,
    kill_grace: Duration,
}

impl ProcessRunner {
    /// Create a runner for the given agent command line.
    #[must_use]
    pub fn new(agent: AgentConfig, default_timeout: Duration, kill_grace: Duration) -> Self {
        Self {
            agent,
            default_timeout,
            kill_grace,
        }
    }

    /// Create a runner from the global configuration.
    #[must_use]
    pub fn from_config(config: &GlobalConfig) -> Self {
        Self::new(
            config.agent.clone(),
            config.timeouts.default_timeout(),
            config.timeouts.kill_grace(),
        )
    }

    /// Timeout applied when the caller does not supply one.
    #[must_use]
    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Run `prompt` and collect the complete result.
    pub async fn execute(&self, prompt: &str, options: &ExecOptions) -> ExecutionResult {
        self.run(prompt, options, None).await
    }

    /// Run `prompt`, handing each stdout chunk to `on_chunk` in arrival
    /// order. Chunks are also accumulated into the result's `output`.
    pub async fn execute_streaming(
        &self,
        prompt: &str,
        options: &ExecOptions,
        on_chunk: ChunkSink<'_>,
    ) -> ExecutionResult {
        self.run(prompt, options, Some(on_chunk)).await
    }

    async fn run(
        &self,
        prompt: &str,
        options: &ExecOptions,
        mut on_chunk: Option<ChunkSink<'_>>,
    ) -> ExecutionResult {
        let started = Instant::now();
        let timeout = options.timeout.unwrap_or(self.default_timeout);

        let mut child = match build_command(&self.agent, prompt, options).spawn() {
            Ok(child) => child,
            Err(err) => {
                warn!(command = %self.agent.command, %err, "failed to spawn agent");
                return ExecutionResult::failed(
                    FailureKind::Spawn,
                    format!("Failed to start agent: {err}"),
                    None,
                    None,
                    started.elapsed(),
                );
            }
        };

        let pgid = child.id().and_then(|pid| i32::try_from(pid).ok());
        info!(
            pid = pgid.unwrap_or(0),
            command = %self.agent.command,
            timeout_ms = duration_millis(timeout),
            prompt = %truncate(prompt, PROMPT_LOG_CHARS),
            "agent process spawned"
        );

        if self.agent.prompt_mode == PromptMode::Stdin {
            if let Some(mut stdin) = child.stdin.take() {
                let payload = prompt.to_owned();
                // Written off-loop so a child that never reads stdin cannot
                // stall stdout draining. Dropping the handle closes the pipe.
                tokio::spawn(async move {
                    if let Err(err) = stdin.write_all(payload.as_bytes()).await {
                        debug!(%err, "agent closed stdin before the prompt was written");
                    }
                });
            }
        }

        let mut output = String::new();
        let mut stderr = String::new();
        let mut lifecycle = Lifecycle::Running;
        let mut exit: Option<ExitInfo> = None;
        let cancel = options.cancel.clone().unwrap_or_default();

        let mut out_frames = child
            .stdout
            .take()
            .map(|stdout| FramedRead::new(stdout, Utf8ChunkCodec::new()));
        let mut err_frames = child
            .stderr
            .take()
            .map(|stderr| FramedRead::new(stderr, Utf8ChunkCodec::new()));
        let mut stdout_open = out_frames.is_some();
        let mut stderr_open = err_frames.is_some();

        let deadline = tokio::time::sleep(timeout);
        let hard_kill = tokio::time::sleep(self.kill_grace);
        let drain = tokio::time::sleep(DRAIN_GRACE);
        tokio::pin!(deadline, hard_kill, drain);
        let mut hard_kill_armed = false;

        while exit.is_none() || stdout_open || stderr_open {
            tokio::select! {
                frame = next_frame(&mut out_frames), if stdout_open => match frame {
                    Some(Ok(text)) => {
                        if let Some(sink) = on_chunk.as_mut() {
                            sink(&text);
                        }
                        output.push_str(&text);
                    }
                    Some(Err(err)) => {
                        warn!(%err, "failed reading agent stdout");
                        stdout_open = false;
                    }
                    None => stdout_open = false,
                },
                frame = next_frame(&mut err_frames), if stderr_open => match frame {
                    Some(Ok(text)) => stderr.push_str(&text),
                    Some(Err(err)) => {
                        warn!(%err, "failed reading agent stderr");
                        stderr_open = false;
                    }
                    None => stderr_open = false,
                },
                status = child.wait(), if exit.is_none() => {
                    let info = match status {
                        Ok(status) => ExitInfo::from(status),
                        Err(err) => {
                            warn!(%err, "error waiting for agent process");
                            ExitInfo::signalled()
                        }
                    };
                    if let Some(reason) = lifecycle.observe_exit() {
                        debug!(?reason, "agent exited after termination request");
                    }
                    exit = Some(info);
                    drain.as_mut().reset(Instant::now() + DRAIN_GRACE);
                },
                () = &mut deadline, if lifecycle.is_running() => {
                    if lifecycle.request_kill(KillReason::Timeout) {
                        warn!(timeout_ms = duration_millis(timeout), "agent timed out; terminating");
                        signal_group(&mut child, pgid, Stop::Terminate);
                        hard_kill.as_mut().reset(Instant::now() + self.kill_grace);
                        hard_kill_armed = true;
                    }
                },
                () = cancel.cancelled(), if lifecycle.is_running() => {
                    if lifecycle.request_kill(KillReason::Cancelled) {
                        info!("agent execution cancelled; terminating");
                        signal_group(&mut child, pgid, Stop::Terminate);
                        hard_kill.as_mut().reset(Instant::now() + self.kill_grace);
                        hard_kill_armed = true;
                    }
                },
                () = &mut hard_kill, if hard_kill_armed && exit.is_none() => {
                    hard_kill_armed = false;
                    warn!("agent ignored termination signal; killing");
                    signal_group(&mut child, pgid, Stop::Kill);
                },
                () = &mut drain, if exit.is_some() && (stdout_open || stderr_open) => {
                    debug!("pipes still open after exit; killing leftover processes");
                    signal_group(&mut child, pgid, Stop::Kill);
                    stdout_open = false;
                    stderr_open = false;
                },
            }
        }

        let result = classify(Finished {
            lifecycle,
            exit: exit.unwrap_or_else(ExitInfo::signalled),
            stdout: output,
            stderr,
            timeout,
            elapsed: started.elapsed(),
        });

        info!(
            status = ?result.status,
            failure = ?result.failure,
            exit_code = ?result.exit_code,
            elapsed_ms = duration_millis(result.execution_time),
            "agent execution finished"
        );

        result
    }
}

impl AgentRunner for ProcessRunner {
    fn execute<'a>(&'a self, prompt: &'a str, options: &'a ExecOptions) -> RunFuture<'a> {
        Box::pin(ProcessRunner::execute(self, prompt, options))
    }

    fn execute_streaming<'a>(
        &'a self,
        prompt: &'a str,
        options: &'a ExecOptions,
        on_chunk: ChunkSink<'a>,
    ) -> RunFuture<'a> {
        Box::pin(ProcessRunner::execute_streaming(
            self, prompt, options, on_chunk,
        ))
    }
}

/// Poll the next stdout frame; an absent reader behaves as EOF.
async fn next_frame<R>(
    frames: &mut Option<FramedRead<R, Utf8ChunkCodec>>,
) -> Option<crate::Result<String>>
where
    R: AsyncRead + Unpin,
{
    match frames {
        Some(frames) => frames.next().await,
        None => None,
    }
}

/// How hard to stop a process group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stop {
    /// SIGTERM, giving the agent a chance to exit cleanly.
    Terminate,
    /// SIGKILL.
    Kill,
}

/// Signal the agent's process group so grandchildren holding the pipes
/// stop with it. Falls back to killing the direct child; on non-Unix
/// platforms that is the only option.
fn signal_group(child: &mut Child, pgid: Option<i32>, stop: Stop) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        if let Some(pgid) = pgid {
            let signal = match stop {
                Stop::Terminate => Signal::SIGTERM,
                Stop::Kill => Signal::SIGKILL,
            };
            match killpg(Pid::from_raw(pgid), signal) {
                Ok(()) => return,
                Err(err) => debug!(pgid, %err, ?signal, "signalling process group failed"),
            }
        }
    }
    #[cfg(not(unix))]
    let _ = (pgid, stop);

    if let Err(err) = child.start_kill() {
        debug!(%err, "failed to kill agent process");
    }
}

/// Truncate `text` to at most `max` characters for logging.
fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
