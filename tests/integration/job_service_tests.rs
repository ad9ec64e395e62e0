//! Integration tests for `JobService`: asynchronous submission, terminal
//! writes, admission control, cancellation and session history.

use std::sync::Arc;
use std::time::{Duration, Instant};

use agent_dispatch::jobs::{JobService, Submission, CANCELLED_BEFORE_START};
use agent_dispatch::models::history::Role;
use agent_dispatch::models::request::RequestContext;
use agent_dispatch::models::response::ResponseStatus;
use agent_dispatch::AppError;

use super::test_helpers::{
    service_with, sh_config, wait_terminal, EchoRunner, PanickingRunner,
};

const LIMIT: Duration = Duration::from_secs(10);

// ── Submission ──────────────────────────────────────────

/// `submit` returns immediately with a pending record for a slow agent.
#[tokio::test]
async fn submit_returns_before_agent_finishes() {
    let service = JobService::from_config(&sh_config("sleep 1; printf late"));

    let started = Instant::now();
    let response = service.submit(Submission::new("work")).expect("accepted");

    assert!(started.elapsed() < Duration::from_millis(500));
    assert_eq!(response.status, ResponseStatus::Pending);
    assert_eq!(response.id, response.request_id);
    assert!(!response.is_terminal());

    let done = wait_terminal(&service, &response.request_id, LIMIT).await;
    assert_eq!(done.status, ResponseStatus::Completed);
    assert_eq!(done.output.as_deref(), Some("late"));
}

/// Successful agents complete with their stdout and a completion stamp.
#[tokio::test]
async fn successful_job_completes() {
    let service = JobService::from_config(&sh_config("printf done"));
    let response = service.submit(Submission::new("go")).expect("accepted");

    let done = wait_terminal(&service, &response.request_id, LIMIT).await;

    assert_eq!(done.status, ResponseStatus::Completed);
    assert_eq!(done.output.as_deref(), Some("done"));
    assert_eq!(done.error, None);
    assert!(done.completed_at.is_some());
    assert!(done.execution_time_ms.is_some());
}

/// Failing agents fail with their stderr and carry no output.
#[tokio::test]
async fn failing_job_reports_stderr() {
    let service = JobService::from_config(&sh_config("printf noise; echo boom >&2; exit 1"));
    let response = service.submit(Submission::new("go")).expect("accepted");

    let done = wait_terminal(&service, &response.request_id, LIMIT).await;

    assert_eq!(done.status, ResponseStatus::Failed);
    assert_eq!(done.error.as_deref(), Some("boom"));
    assert_eq!(done.output, None);
}

/// A per-request timeout override fails the job with a timeout message.
#[tokio::test]
async fn timeout_override_fails_job() {
    let service = JobService::from_config(&sh_config("exec sleep 30"));
    let submission = Submission {
        context: RequestContext {
            timeout_ms: Some(1_000),
            ..RequestContext::default()
        },
        ..Submission::new("go")
    };

    let started = Instant::now();
    let response = service.submit(submission).expect("accepted");
    let done = wait_terminal(&service, &response.request_id, LIMIT).await;

    assert_eq!(done.status, ResponseStatus::Failed);
    assert!(done.error.as_deref().unwrap_or_default().contains("timed out"));
    assert!(started.elapsed() < Duration::from_secs(5));
}

/// Terminal records no longer change on repeated reads.
#[tokio::test]
async fn terminal_record_is_stable() {
    let service = JobService::from_config(&sh_config("printf done"));
    let response = service.submit(Submission::new("go")).expect("accepted");

    let first = wait_terminal(&service, &response.request_id, LIMIT).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    let second = service.status(&response.request_id).expect("still present");

    assert_eq!(first, second);
}

// ── Validation ──────────────────────────────────────────

/// Blank prompts are rejected and register nothing.
#[tokio::test]
async fn blank_prompt_is_rejected() {
    let service = service_with(Arc::new(EchoRunner { delay: Duration::ZERO }), 1);

    let err = service.submit(Submission::new("   ")).expect_err("rejected");

    assert!(matches!(err, AppError::Validation(_)));
    assert!(service.registry().is_empty());
    assert_eq!(service.stats().expect("stats").active, 0);
}

/// Out-of-range timeout overrides are rejected.
#[tokio::test]
async fn out_of_range_timeout_is_rejected() {
    let service = service_with(Arc::new(EchoRunner { delay: Duration::ZERO }), 1);
    let submission = Submission {
        context: RequestContext {
            timeout_ms: Some(10),
            ..RequestContext::default()
        },
        ..Submission::new("go")
    };

    assert!(matches!(
        service.submit(submission),
        Err(AppError::Validation(_))
    ));
}

/// Unknown ids are reported as absent.
#[tokio::test]
async fn unknown_request_is_absent() {
    let service = service_with(Arc::new(EchoRunner { delay: Duration::ZERO }), 1);
    assert!(service.status("never-submitted").is_none());
}

// ── Supervision and counters ────────────────────────────

/// A panicking runner still drives the record to `failed`.
#[tokio::test]
async fn panicking_job_still_fails() {
    let service = service_with(Arc::new(PanickingRunner), 2);
    let response = service.submit(Submission::new("go")).expect("accepted");

    let done = wait_terminal(&service, &response.request_id, LIMIT).await;

    assert_eq!(done.status, ResponseStatus::Failed);
    let error = done.error.expect("error message");
    assert!(error.starts_with("internal error:"), "{error}");
    assert_eq!(service.stats().expect("stats").active, 0);
}

/// Counters add up after a mix of successes and failures.
#[tokio::test]
async fn stats_are_consistent_after_concurrent_jobs() {
    let service = JobService::from_config(&sh_config(
        r#"read -r line; case "$line" in fail*) exit 1 ;; *) printf ok ;; esac"#,
    ));

    let mut ids = Vec::new();
    for index in 0..6 {
        let prompt = if index % 3 == 0 { "fail please" } else { "succeed" };
        let response = service
            .submit(Submission::new(format!("{prompt}\n")))
            .expect("accepted");
        ids.push(response.request_id);
    }
    for id in &ids {
        wait_terminal(&service, id, LIMIT).await;
    }

    let stats = service.stats().expect("stats");
    assert_eq!(stats.completed, 4);
    assert_eq!(stats.failed, 2);
    assert_eq!(stats.active, 0);
    assert_eq!(stats.waiting, 0);
}

/// With one permit, the second job waits in `pending`.
#[tokio::test]
async fn admission_limit_keeps_jobs_pending() {
    let service = service_with(
        Arc::new(EchoRunner {
            delay: Duration::from_millis(400),
        }),
        1,
    );

    let first = service.submit(Submission::new("one")).expect("accepted");
    let second = service.submit(Submission::new("two")).expect("accepted");
    tokio::time::sleep(Duration::from_millis(150)).await;

    let stats = service.stats().expect("stats");
    assert_eq!(stats.active, 2);
    assert_eq!(stats.waiting, 1);
    assert_eq!(
        service.status(&second.request_id).map(|r| r.status),
        Some(ResponseStatus::Pending)
    );

    wait_terminal(&service, &first.request_id, LIMIT).await;
    let done = wait_terminal(&service, &second.request_id, LIMIT).await;
    assert_eq!(done.output.as_deref(), Some("two"));
}

// ── Cancellation ────────────────────────────────────────

/// Cancelling a running job terminates the agent.
#[tokio::test]
async fn cancel_running_job() {
    let service = JobService::from_config(&sh_config("exec sleep 30"));
    let response = service.submit(Submission::new("go")).expect("accepted");
    tokio::time::sleep(Duration::from_millis(200)).await;

    service.cancel(&response.request_id).expect("cancel accepted");
    let done = wait_terminal(&service, &response.request_id, LIMIT).await;

    assert_eq!(done.status, ResponseStatus::Failed);
    assert_eq!(done.error.as_deref(), Some("Process cancelled"));
}

/// Cancelling a queued job fails it without running it.
#[tokio::test]
async fn cancel_queued_job() {
    let service = service_with(
        Arc::new(EchoRunner {
            delay: Duration::from_millis(500),
        }),
        1,
    );
    let _running = service.submit(Submission::new("one")).expect("accepted");
    let queued = service.submit(Submission::new("two")).expect("accepted");

    service.cancel(&queued.request_id).expect("cancel accepted");
    let done = wait_terminal(&service, &queued.request_id, LIMIT).await;

    assert_eq!(done.error.as_deref(), Some(CANCELLED_BEFORE_START));
}

/// Cancel distinguishes unknown and finished requests.
#[tokio::test]
async fn cancel_unknown_or_finished() {
    let service = service_with(Arc::new(EchoRunner { delay: Duration::ZERO }), 1);
    assert!(matches!(service.cancel("nope"), Err(AppError::NotFound(_))));

    let response = service.submit(Submission::new("go")).expect("accepted");
    wait_terminal(&service, &response.request_id, LIMIT).await;
    assert!(matches!(
        service.cancel(&response.request_id),
        Err(AppError::Conflict(_))
    ));
}

/// Shutdown cancels in-flight work and reports when it has drained.
#[tokio::test]
async fn shutdown_drains_jobs() {
    let service = JobService::from_config(&sh_config("exec sleep 30"));
    let response = service.submit(Submission::new("go")).expect("accepted");
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(service.shutdown(Duration::from_secs(5)).await);
    let done = service.status(&response.request_id).expect("present");
    assert_eq!(done.status, ResponseStatus::Failed);
}

// ── Sessions ────────────────────────────────────────────

/// Completed exchanges are recorded and fed into later prompts.
#[tokio::test]
async fn session_history_augments_next_prompt() {
    let service = service_with(Arc::new(EchoRunner { delay: Duration::ZERO }), 1);
    let session = Some("chat-1".to_owned());

    let first = service
        .submit(Submission {
            session_id: session.clone(),
            ..Submission::new("first question")
        })
        .expect("accepted");
    wait_terminal(&service, &first.request_id, LIMIT).await;

    let second = service
        .submit(Submission {
            session_id: session,
            ..Submission::new("second question")
        })
        .expect("accepted");
    let done = wait_terminal(&service, &second.request_id, LIMIT).await;

    let echoed = done.output.expect("echoed prompt");
    assert!(echoed.starts_with("Previous conversation:\n"), "{echoed}");
    assert!(echoed.contains("User: first question"));
    assert!(echoed.contains("Assistant: first question"));
    assert!(echoed.ends_with("Current request: second question"));

    let history = service.sessions().history("chat-1").await;
    assert_eq!(history.len(), 4);
    assert_eq!(history[0].role, Role::User);
    assert_eq!(history[2].content, "second question");
}

/// Failed executions leave the session untouched.
#[tokio::test]
async fn failed_exchange_is_not_recorded() {
    let service = JobService::from_config(&sh_config("exit 1"));
    let response = service
        .submit(Submission {
            session_id: Some("chat-2".into()),
            ..Submission::new("go")
        })
        .expect("accepted");
    wait_terminal(&service, &response.request_id, LIMIT).await;

    assert!(service.sessions().history("chat-2").await.is_empty());
}
