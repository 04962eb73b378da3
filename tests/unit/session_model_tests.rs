//! Unit tests for the conversation session record.

use std::time::Duration;

use tokio::time::Instant;

use agent_bridge::agent::{Completion, Event};
use agent_bridge::models::Session;

const TIMEOUT: Duration = Duration::from_secs(3600);

fn completed(id: &str, cost: f64) -> Event {
    Event::Completed(Completion {
        conversation_id: id.into(),
        duration_ms: 1000,
        turn_count: 1,
        cost_usd: cost,
        final_text: "done".into(),
    })
}

#[tokio::test]
async fn new_session_has_no_conversation() {
    let session = Session::new(TIMEOUT);
    assert!(session.conversation_id.is_none());
    assert_eq!(session.turn_count, 0);
    assert!(session.cumulative_cost_usd.abs() < f64::EPSILON);
}

#[tokio::test]
async fn init_sets_the_conversation_id() {
    let mut session = Session::new(TIMEOUT);
    session.observe(&Event::Init {
        conversation_id: "sess-1".into(),
    });
    assert_eq!(session.conversation_id.as_deref(), Some("sess-1"));
}

#[tokio::test]
async fn empty_init_id_is_ignored() {
    let mut session = Session::new(TIMEOUT);
    session.observe(&Event::Init {
        conversation_id: "sess-1".into(),
    });
    session.observe(&Event::Init {
        conversation_id: String::new(),
    });
    assert_eq!(session.conversation_id.as_deref(), Some("sess-1"));
}

#[tokio::test]
async fn completions_accumulate_cost_and_turns() {
    let mut session = Session::new(TIMEOUT);
    session.observe(&completed("sess-2", 0.25));
    session.observe(&completed("sess-2", 0.5));

    assert_eq!(session.conversation_id.as_deref(), Some("sess-2"));
    assert_eq!(session.turn_count, 2);
    assert!((session.cumulative_cost_usd - 0.75).abs() < 1e-9);
}

#[tokio::test]
async fn other_events_change_nothing() {
    let mut session = Session::new(TIMEOUT);
    let before = session.clone();
    session.observe(&Event::TextDelta { text: "hi".into() });
    assert_eq!(session, before);
}

#[tokio::test]
async fn timeout_without_conversation_is_a_no_op() {
    let mut session = Session::new(TIMEOUT);
    assert!(!session.check_timeout(Instant::now() + TIMEOUT * 2));
}

#[tokio::test]
async fn recent_activity_keeps_the_conversation() {
    let mut session = Session::new(TIMEOUT);
    session.observe(&completed("sess-3", 0.1));
    assert!(!session.check_timeout(Instant::now() + TIMEOUT / 2));
    assert_eq!(session.conversation_id.as_deref(), Some("sess-3"));
}

#[tokio::test]
async fn inactivity_resets_the_conversation() {
    let mut session = Session::new(TIMEOUT);
    session.observe(&completed("sess-4", 0.1));

    assert!(session.check_timeout(Instant::now() + TIMEOUT + Duration::from_secs(1)));
    assert!(session.conversation_id.is_none());
    assert_eq!(session.turn_count, 0);
    assert!(session.cumulative_cost_usd.abs() < f64::EPSILON);
}

#[tokio::test]
async fn reset_forgets_everything() {
    let mut session = Session::new(TIMEOUT);
    session.observe(&completed("sess-5", 2.0));
    session.reset();
    assert!(session.conversation_id.is_none());
    assert_eq!(session.turn_count, 0);
}
