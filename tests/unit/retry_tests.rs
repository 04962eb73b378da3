//! Unit tests for the Slack retry policy.

use std::time::Duration;

use agent_bridge::slack::client::{backoff_delay, retry_decision, FailureKind, RetryDecision};

#[test]
fn backoff_doubles_from_one_second() {
    assert_eq!(backoff_delay(1), Duration::from_secs(1));
    assert_eq!(backoff_delay(2), Duration::from_secs(2));
    assert_eq!(backoff_delay(3), Duration::from_secs(4));
    assert_eq!(backoff_delay(5), Duration::from_secs(16));
}

#[test]
fn backoff_is_capped_at_thirty_seconds() {
    assert_eq!(backoff_delay(6), Duration::from_secs(30));
    assert_eq!(backoff_delay(50), Duration::from_secs(30));
}

#[test]
fn attempt_zero_is_treated_as_first() {
    assert_eq!(backoff_delay(0), Duration::from_secs(1));
}

#[test]
fn rejected_calls_are_not_retried() {
    assert_eq!(retry_decision(FailureKind::Rejected, 1), RetryDecision::GiveUp);
}

#[test]
fn transient_failures_back_off() {
    assert_eq!(
        retry_decision(FailureKind::Transient, 1),
        RetryDecision::RetryAfter(Duration::from_secs(1))
    );
    assert_eq!(
        retry_decision(FailureKind::Transient, 3),
        RetryDecision::RetryAfter(Duration::from_secs(4))
    );
}

#[test]
fn rate_limits_honor_retry_after() {
    assert_eq!(
        retry_decision(FailureKind::RateLimited(Some(Duration::from_secs(7))), 1),
        RetryDecision::RetryAfter(Duration::from_secs(7))
    );
    assert_eq!(
        retry_decision(FailureKind::RateLimited(None), 2),
        RetryDecision::RetryAfter(Duration::from_secs(2))
    );
}

#[test]
fn fifth_attempt_gives_up() {
    assert_eq!(retry_decision(FailureKind::Transient, 5), RetryDecision::GiveUp);
    assert_eq!(
        retry_decision(FailureKind::RateLimited(Some(Duration::from_secs(1))), 5),
        RetryDecision::GiveUp
    );
}
