//! Integration tests for `ProcessRunner` against real `sh` processes.
//!
//! Covers the success, non-zero exit, timeout, spawn failure and
//! cancellation outcomes, process-group cleanup, streaming order, and
//! prompt delivery.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use agent_dispatch::config::PromptMode;
use agent_dispatch::executor::{ExecOptions, ExecutionStatus, FailureKind, ProcessRunner};

use super::test_helpers::{sh_agent, sh_runner};

// ── Terminal outcomes ───────────────────────────────────

/// Exit 0 with "done" on stdout completes with that output.
#[tokio::test]
async fn successful_exit_completes_with_stdout() {
    let runner = sh_runner("printf done");
    let result = runner.execute("ignored", &ExecOptions::default()).await;

    assert_eq!(result.status, ExecutionStatus::Completed);
    assert_eq!(result.output.as_deref(), Some("done"));
    assert_eq!(result.error, None);
    assert_eq!(result.exit_code, Some(0));
}

/// Exit 1 with "boom" on stderr fails with exactly "boom".
#[tokio::test]
async fn nonzero_exit_reports_stderr() {
    let runner = sh_runner("echo boom >&2; exit 1");
    let result = runner.execute("ignored", &ExecOptions::default()).await;

    assert_eq!(result.status, ExecutionStatus::Failed);
    assert_eq!(result.failure, Some(FailureKind::NonZeroExit));
    assert_eq!(result.error.as_deref(), Some("boom"));
    assert_eq!(result.exit_code, Some(1));
}

/// Silent non-zero exit falls back to a message naming the code.
#[tokio::test]
async fn nonzero_exit_without_stderr_names_code() {
    let runner = sh_runner("printf partial; exit 3");
    let result = runner.execute("ignored", &ExecOptions::default()).await;

    assert_eq!(result.error.as_deref(), Some("Process exited with code 3"));
    assert_eq!(result.output.as_deref(), Some("partial"));
}

/// A process outliving its timeout is terminated and reported as timed out.
#[tokio::test]
async fn timeout_terminates_process() {
    let runner = sh_runner("exec sleep 30");
    let options = ExecOptions {
        timeout: Some(Duration::from_millis(300)),
        ..ExecOptions::default()
    };

    let started = Instant::now();
    let result = runner.execute("ignored", &options).await;

    assert_eq!(result.failure, Some(FailureKind::Timeout));
    assert_eq!(
        result.error.as_deref(),
        Some("Process timed out after 300 ms")
    );
    assert!(
        started.elapsed() < Duration::from_secs(5),
        "timeout took {:?}",
        started.elapsed()
    );
}

/// A background child holding the pipes open does not cost the stderr
/// already written.
#[tokio::test]
async fn stderr_survives_lingering_background_child() {
    let runner = sh_runner("sleep 30 & echo boom >&2; exit 1");

    let started = Instant::now();
    let result = runner.execute("ignored", &ExecOptions::default()).await;

    assert_eq!(result.failure, Some(FailureKind::NonZeroExit));
    assert_eq!(result.error.as_deref(), Some("boom"));
    assert_eq!(result.exit_code, Some(1));
    assert!(
        started.elapsed() < Duration::from_secs(4),
        "drain took {:?}",
        started.elapsed()
    );
}

/// Timeout reaches the shell's foreground child too, so the pipes close
/// right away instead of waiting out the drain window.
#[tokio::test]
async fn timeout_stops_whole_process_group() {
    let runner = sh_runner("sleep 30; printf late");
    let options = ExecOptions {
        timeout: Some(Duration::from_millis(300)),
        ..ExecOptions::default()
    };

    let started = Instant::now();
    let result = runner.execute("ignored", &options).await;

    assert_eq!(result.failure, Some(FailureKind::Timeout));
    assert_eq!(result.output, None);
    assert!(
        started.elapsed() < Duration::from_millis(1500),
        "timeout took {:?}",
        started.elapsed()
    );
}

/// A backgrounded grandchild does not outlive a timed-out agent.
#[tokio::test]
async fn timeout_leaves_no_grandchild_running() {
    let dir = tempfile::tempdir().expect("tempdir");
    let pid_file = dir.path().join("grandchild.pid");
    let runner = sh_runner(r#"sleep 30 & echo $! > "$PID_FILE"; wait"#);
    let options = ExecOptions {
        timeout: Some(Duration::from_millis(300)),
        environment: HashMap::from([(
            "PID_FILE".to_owned(),
            pid_file.display().to_string(),
        )]),
        ..ExecOptions::default()
    };

    let result = runner.execute("ignored", &options).await;
    assert_eq!(result.failure, Some(FailureKind::Timeout));

    let pid: i32 = std::fs::read_to_string(&pid_file)
        .expect("pid file")
        .trim()
        .parse()
        .expect("pid");
    let deadline = Instant::now() + Duration::from_secs(2);
    while is_running(pid) {
        assert!(Instant::now() < deadline, "grandchild {pid} still running");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Whether `pid` is alive; an unreaped zombie counts as stopped.
fn is_running(pid: i32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    if kill(Pid::from_raw(pid), None).is_err() {
        return false;
    }
    match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
        Ok(stat) => stat
            .rsplit_once(')')
            .and_then(|(_, rest)| rest.split_whitespace().next())
            .is_some_and(|state| state != "Z"),
        Err(_) => !cfg!(target_os = "linux"),
    }
}

/// A process that ignores SIGTERM is hard-killed after the grace period.
#[tokio::test]
async fn sigterm_resistant_process_is_killed() {
    let runner = ProcessRunner::new(
        sh_agent("trap '' TERM; while :; do sleep 0.05; done"),
        Duration::from_secs(10),
        Duration::from_millis(200),
    );
    let options = ExecOptions {
        timeout: Some(Duration::from_millis(200)),
        ..ExecOptions::default()
    };

    let started = Instant::now();
    let result = runner.execute("ignored", &options).await;

    assert_eq!(result.failure, Some(FailureKind::Timeout));
    assert!(started.elapsed() < Duration::from_secs(6));
}

/// A missing binary yields a spawn failure rather than an error.
#[tokio::test]
async fn missing_binary_is_spawn_failure() {
    let mut agent = sh_agent("true");
    agent.command = "/nonexistent/agent-binary".into();
    agent.args.clear();
    let runner = ProcessRunner::new(agent, Duration::from_secs(5), Duration::from_millis(100));

    let result = runner.execute("hello", &ExecOptions::default()).await;

    assert_eq!(result.failure, Some(FailureKind::Spawn));
    let error = result.error.expect("spawn error message");
    assert!(error.starts_with("Failed to start agent:"), "{error}");
}

/// Cancelling the token terminates the process with the cancel message.
#[tokio::test]
async fn cancellation_terminates_process() {
    let runner = sh_runner("exec sleep 30");
    let cancel = CancellationToken::new();
    let options = ExecOptions::default().with_cancel(cancel.clone());

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(150)).await;
        trigger.cancel();
    });

    let result = runner.execute("ignored", &options).await;

    assert_eq!(result.failure, Some(FailureKind::Cancelled));
    assert_eq!(result.error.as_deref(), Some("Process cancelled"));
}

// ── Prompt delivery ─────────────────────────────────────

/// In stdin mode the prompt is written to the child's stdin and closed.
#[tokio::test]
async fn stdin_mode_delivers_prompt() {
    let runner = sh_runner("cat");
    let result = runner.execute("hello agent", &ExecOptions::default()).await;

    assert_eq!(result.output.as_deref(), Some("hello agent"));
}

/// In argument mode the prompt follows the fixed args.
#[tokio::test]
async fn argument_mode_passes_prompt() {
    let mut agent = sh_agent(r#"printf '%s' "$0""#);
    agent.prompt_mode = PromptMode::Argument;
    let runner = ProcessRunner::new(agent, Duration::from_secs(5), Duration::from_millis(100));

    let result = runner.execute("as-argument", &ExecOptions::default()).await;

    assert_eq!(result.output.as_deref(), Some("as-argument"));
}

/// Working directory and environment overrides reach the child.
#[tokio::test]
async fn context_reaches_child() {
    let dir = tempfile::tempdir().expect("tempdir");
    let runner = sh_runner(r#"printf '%s|%s' "$(pwd)" "$DISPATCH_TEST_VAR""#);
    let options = ExecOptions {
        working_directory: Some(dir.path().to_path_buf()),
        environment: HashMap::from([("DISPATCH_TEST_VAR".to_owned(), "42".to_owned())]),
        ..ExecOptions::default()
    };

    let result = runner.execute("ignored", &options).await;
    let output = result.output.expect("output");
    let (cwd, var) = output.split_once('|').expect("separator");

    let expected = dir.path().canonicalize().expect("canonical tempdir");
    assert_eq!(
        std::path::Path::new(cwd).canonicalize().expect("canonical cwd"),
        expected
    );
    assert_eq!(var, "42");
}

// ── Streaming ───────────────────────────────────────────

/// Chunks arrive in order and are also accumulated into the output.
#[tokio::test]
async fn streaming_delivers_chunks_in_order() {
    let runner = sh_runner("printf A; sleep 0.1; printf B; sleep 0.1; printf C");
    let mut chunks = Vec::new();
    let mut on_chunk = |text: &str| chunks.push(text.to_owned());

    let result = runner
        .execute_streaming("ignored", &ExecOptions::default(), &mut on_chunk)
        .await;

    assert_eq!(result.status, ExecutionStatus::Completed);
    assert_eq!(result.output.as_deref(), Some("ABC"));
    assert_eq!(chunks.concat(), "ABC");
    assert_eq!(chunks, vec!["A", "B", "C"]);
}

/// The streaming variant honours the same timeout as the polled one.
#[tokio::test]
async fn streaming_applies_timeout() {
    let runner = sh_runner("printf start; exec sleep 30");
    let options = ExecOptions {
        timeout: Some(Duration::from_millis(300)),
        ..ExecOptions::default()
    };
    let mut chunks = Vec::new();
    let mut on_chunk = |text: &str| chunks.push(text.to_owned());

    let result = runner
        .execute_streaming("ignored", &options, &mut on_chunk)
        .await;

    assert_eq!(result.failure, Some(FailureKind::Timeout));
    assert_eq!(chunks.concat(), "start");
}
