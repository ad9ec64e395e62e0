//! Unit tests for submission bounds and result folding.

use std::time::Duration;

use agent_dispatch::executor::{ExecutionResult, FailureKind};
use agent_dispatch::jobs::{terminal_update, SubmissionLimits};
use agent_dispatch::models::request::RequestContext;
use agent_dispatch::models::response::ResponseStatus;
use agent_dispatch::AppError;

fn limits() -> SubmissionLimits {
    SubmissionLimits {
        max_prompt_chars: 10,
        min_timeout_ms: 1000,
        max_timeout_ms: 5000,
    }
}

fn with_timeout(timeout_ms: u64) -> RequestContext {
    RequestContext {
        timeout_ms: Some(timeout_ms),
        ..RequestContext::default()
    }
}

#[test]
fn accepts_prompt_within_bounds() {
    let ok = limits().validate("hello", &RequestContext::default(), Some("s1"));
    assert!(ok.is_ok());
}

#[test]
fn rejects_blank_prompt() {
    let err = limits()
        .validate("   \n", &RequestContext::default(), None)
        .expect_err("blank");
    assert!(matches!(err, AppError::Validation(_)));
}

#[test]
fn prompt_length_counts_characters() {
    let limits = limits();
    assert!(limits
        .validate(&"é".repeat(10), &RequestContext::default(), None)
        .is_ok());
    assert!(matches!(
        limits.validate(&"é".repeat(11), &RequestContext::default(), None),
        Err(AppError::Validation(_))
    ));
}

#[test]
fn timeout_bounds_are_inclusive() {
    let limits = limits();
    assert!(limits.validate("p", &with_timeout(1000), None).is_ok());
    assert!(limits.validate("p", &with_timeout(5000), None).is_ok());
    assert!(limits.validate("p", &with_timeout(999), None).is_err());
    assert!(limits.validate("p", &with_timeout(5001), None).is_err());
}

#[test]
fn rejects_blank_session_id() {
    let err = limits()
        .validate("p", &RequestContext::default(), Some(" "))
        .expect_err("blank session");
    assert_eq!(err.to_string(), "validation: session id must not be empty");
}

#[test]
fn completed_result_becomes_completed_update() {
    let update = terminal_update(ExecutionResult::completed(
        "out".into(),
        Some(0),
        Duration::from_millis(7),
    ));
    assert_eq!(update.status, ResponseStatus::Completed);
    assert_eq!(update.output.as_deref(), Some("out"));
    assert_eq!(update.execution_time, Some(Duration::from_millis(7)));
}

#[test]
fn failed_result_keeps_message_only() {
    let update = terminal_update(ExecutionResult::failed(
        FailureKind::NonZeroExit,
        "boom".into(),
        Some("partial".into()),
        Some(1),
        Duration::ZERO,
    ));
    assert_eq!(update.status, ResponseStatus::Failed);
    assert_eq!(update.error.as_deref(), Some("boom"));
    assert_eq!(update.output, None);
}
