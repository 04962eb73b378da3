//! End-to-end bridge flows: chat input in, scripted agent behind, recorded
//! chat endpoint out.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use agent_bridge::orchestrator::{Bridge, INJECT_FAILED_NOTICE};
use agent_bridge::presentation::{ChatEndpoint, Controls, CANCELLED_MARKER};
use agent_bridge::transcript::{ConversationLog, Role};
use tokio::task::JoinHandle;

use super::test_helpers::{
    test_config, Op, RecordingEndpoint, CRASHING_AGENT, EARLY_EXIT_AGENT, ECHO_AGENT,
    HANGING_AGENT, MODEL_ARGS_AGENT,
};

struct Harness {
    bridge: Arc<Bridge>,
    endpoint: Arc<RecordingEndpoint>,
    dispatcher: JoinHandle<()>,
    temp: tempfile::TempDir,
}

impl Harness {
    fn new(script: &str) -> Self {
        let temp = tempfile::tempdir().expect("tempdir");
        let config = test_config(script, temp.path());
        let endpoint = Arc::new(RecordingEndpoint::new());
        let (bridge, rx) = Bridge::new(
            &config,
            Arc::clone(&endpoint) as Arc<dyn ChatEndpoint>,
        )
        .expect("bridge builds");
        let dispatcher = bridge.spawn_dispatcher(rx);
        Self {
            bridge,
            endpoint,
            dispatcher,
            temp,
        }
    }

    fn root(&self) -> &Path {
        self.temp.path()
    }

    async fn stop(self) {
        self.bridge.shutdown().await;
        let _ = tokio::time::timeout(Duration::from_secs(5), self.dispatcher).await;
    }
}

const FOOTER_ONE: &str = "\u{23f1} 1s \u{b7} 1 turns";
const FOOTER_TWO: &str = "\u{23f1} 1s \u{b7} 2 turns";

/// Poll `check` until it holds or ten seconds pass.
async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while !check() {
        assert!(tokio::time::Instant::now() < deadline, "timed out: {what}");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn message_becomes_a_streamed_turn() {
    let harness = Harness::new(ECHO_AGENT);

    harness.bridge.accept_text("hi").await;
    let last = harness
        .endpoint
        .wait_for(|op| op.text().ends_with(FOOTER_ONE))
        .await;

    assert_eq!(
        last,
        Op::Edit {
            id: "m1".into(),
            text: format!("Hello world\n\n{FOOTER_ONE}"),
            controls: Controls::None,
        }
    );
    let session = harness.bridge.session().await;
    assert_eq!(session.conversation_id.as_deref(), Some("sess-fake"));
    assert_eq!(session.turn_count, 1);
    assert_eq!(
        harness.bridge.handle_command("cost").await,
        "\u{1f4b0} Session cost: $0.0100"
    );

    let log = ConversationLog::new(harness.root().join("data").join("conversation_log.jsonl"))
        .expect("log opens");
    eventually("transcript has both sides", || log.recent(10, 10_000).len() == 2).await;
    let entries = log.recent(10, 10_000);
    assert_eq!(entries[0].role, Role::User);
    assert_eq!(entries[0].text, "hi");
    assert_eq!(entries[1].role, Role::Assistant);
    assert_eq!(entries[1].text, "Hello world");

    harness.stop().await;
}

#[tokio::test]
async fn follow_up_reuses_the_process() {
    let harness = Harness::new(ECHO_AGENT);

    harness.bridge.accept_text("one").await;
    harness
        .endpoint
        .wait_for(|op| op.text().ends_with(FOOTER_ONE))
        .await;
    let supervisor = Arc::clone(harness.bridge.supervisor());
    supervisor.wait_idle().await;

    harness.bridge.accept_text("two").await;
    let second = harness
        .endpoint
        .wait_for(|op| op.text().ends_with(FOOTER_TWO))
        .await;

    assert_ne!(second.id(), "m1", "each turn gets its own message");
    assert_eq!(harness.bridge.session().await.turn_count, 2);

    harness.stop().await;
}

#[tokio::test]
async fn burst_is_coalesced_into_one_prompt() {
    let harness = Harness::new(ECHO_AGENT);

    harness.bridge.accept_text("first").await;
    harness.bridge.accept_text("second").await;
    harness
        .endpoint
        .wait_for(|op| op.text().ends_with(FOOTER_ONE))
        .await;

    let log = ConversationLog::new(harness.root().join("data").join("conversation_log.jsonl"))
        .expect("log opens");
    eventually("answer recorded", || log.recent(10, 10_000).len() == 2).await;
    assert_eq!(log.recent(10, 10_000)[0].text, "first\nsecond");

    let placeholders = harness
        .endpoint
        .ops()
        .iter()
        .filter(|op| matches!(op, Op::Post { .. }))
        .count();
    assert_eq!(placeholders, 1);

    harness.stop().await;
}

#[tokio::test]
async fn cancel_marks_the_running_turn() {
    let harness = Harness::new(HANGING_AGENT);
    let supervisor = Arc::clone(harness.bridge.supervisor());

    harness.bridge.accept_text("hang").await;
    eventually("turn is running", || supervisor.is_running()).await;

    assert_eq!(harness.bridge.cancel_turn().await, "\u{1f6d1} Cancelled.");
    let last = harness
        .endpoint
        .wait_for(|op| op.text().starts_with(CANCELLED_MARKER))
        .await;
    assert!(matches!(
        last,
        Op::Edit {
            controls: Controls::None,
            ..
        }
    ));
    assert!(!supervisor.is_running());
    assert_eq!(harness.bridge.cancel_turn().await, "Nothing running.");

    harness.stop().await;
}

#[tokio::test]
async fn crash_is_reported_in_the_message() {
    let harness = Harness::new(CRASHING_AGENT);

    harness.bridge.accept_text("hi").await;
    let report = harness
        .endpoint
        .wait_for(|op| op.text().contains("Agent process exited"))
        .await;

    assert_eq!(
        report.text(),
        "\u{26a0}\u{fe0f} Agent process exited (3): boom: invalid api key"
    );

    harness.stop().await;
}

#[tokio::test]
async fn commands_answer_without_a_turn() {
    let harness = Harness::new(ECHO_AGENT);
    let bridge = &harness.bridge;

    assert_eq!(bridge.handle_command("cancel").await, "Nothing running.");
    assert_eq!(
        bridge.handle_command("cost").await,
        "\u{1f4b0} Session cost: $0.0000"
    );
    assert_eq!(
        bridge.handle_command("model").await,
        "Current model: default\nUsage: model <name>"
    );
    assert_eq!(
        bridge.handle_command("model opus").await,
        "Model set to: opus"
    );
    assert_eq!(
        bridge.handle_command("MODEL").await,
        "Current model: opus\nUsage: model <name>"
    );
    assert_eq!(
        bridge.handle_command("help").await,
        "Commands: clear, cancel, cost, model [name], compact"
    );
    assert!(harness.endpoint.ops().is_empty());

    harness.stop().await;
}

#[tokio::test]
async fn clear_forgets_the_conversation() {
    let harness = Harness::new(ECHO_AGENT);

    harness.bridge.accept_text("hi").await;
    harness
        .endpoint
        .wait_for(|op| op.text().ends_with(FOOTER_ONE))
        .await;
    harness.bridge.supervisor().wait_idle().await;

    assert_eq!(
        harness.bridge.handle_command("clear").await,
        "\u{1f195} Session cleared."
    );
    let session = harness.bridge.session().await;
    assert_eq!(session.conversation_id, None);
    assert_eq!(session.turn_count, 0);
    assert!(!harness.bridge.supervisor().has_process().await);

    harness.stop().await;
}

#[tokio::test]
async fn startup_clears_stale_uploads() {
    let harness = Harness::new(ECHO_AGENT);
    let uploads = harness.root().join("uploads");
    std::fs::create_dir_all(&uploads).expect("upload dir");
    std::fs::write(uploads.join("F1_old.png"), b"png").expect("stale upload");

    harness.bridge.startup().await;

    assert!(!uploads.join("F1_old.png").exists());
    harness.stop().await;
}

#[tokio::test]
async fn shutdown_posts_a_notice() {
    let harness = Harness::new(ECHO_AGENT);
    let endpoint = Arc::clone(&harness.endpoint);

    harness.stop().await;

    assert_eq!(
        endpoint.ops(),
        vec![Op::Post {
            id: "m1".into(),
            text: "\u{1f44b} Bridge shutting down.".into(),
            reply_to: None,
            controls: Controls::None,
        }]
    );
}

#[tokio::test]
async fn failed_injection_is_noted_in_the_turn_and_retried_as_a_new_turn() {
    let harness = Harness::new(EARLY_EXIT_AGENT);
    let supervisor = Arc::clone(harness.bridge.supervisor());

    harness.bridge.accept_text("first").await;
    eventually("turn is running", || supervisor.is_running()).await;
    let bridge = Arc::clone(&harness.bridge);
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while bridge.session().await.conversation_id.as_deref() != Some("sess-early") {
        assert!(tokio::time::Instant::now() < deadline, "timed out: init seen");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    // Let the child exit while its stdout stays open.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(supervisor.is_running());

    harness.bridge.accept_text("second").await;
    harness
        .endpoint
        .wait_for(|op| op.id() == "m1" && op.text().contains(INJECT_FAILED_NOTICE))
        .await;
    assert!(
        !harness
            .endpoint
            .ops()
            .iter()
            .any(|op| matches!(op, Op::Post { .. }) && op.text().contains(INJECT_FAILED_NOTICE)),
        "the notice belongs in the running turn's message"
    );

    let answer = harness
        .endpoint
        .wait_for(|op| {
            op.id() == "m2"
                && matches!(
                    op,
                    Op::Edit {
                        controls: Controls::None,
                        ..
                    }
                )
        })
        .await;
    assert!(answer.text().starts_with("second answer"), "got: {answer:?}");
    assert_eq!(
        harness.endpoint.text_of("m1").as_deref(),
        Some(format!("{INJECT_FAILED_NOTICE}\n\n\u{26a0}\u{fe0f} Agent process exited (0)").as_str())
    );

    let log = ConversationLog::new(harness.root().join("data").join("conversation_log.jsonl"))
        .expect("log opens");
    eventually("requeued prompt recorded", || {
        log.recent(10, 10_000)
            .iter()
            .any(|entry| entry.role == Role::User && entry.text == "second")
    })
    .await;

    harness.stop().await;
}

#[tokio::test]
async fn model_change_during_a_turn_applies_to_the_next_one() {
    let harness = Harness::new(MODEL_ARGS_AGENT);
    let supervisor = Arc::clone(harness.bridge.supervisor());

    harness.bridge.accept_text("one").await;
    eventually("turn is running", || supervisor.is_running()).await;
    assert_eq!(
        harness.bridge.handle_command("model opus").await,
        "Model set to: opus (applies from the next turn)"
    );

    let first = harness
        .endpoint
        .wait_for(|op| {
            op.id() == "m1"
                && matches!(
                    op,
                    Op::Edit {
                        controls: Controls::None,
                        ..
                    }
                )
        })
        .await;
    assert!(first.text().starts_with("args:\n"), "got: {first:?}");
    supervisor.wait_idle().await;

    harness.bridge.accept_text("two").await;
    let second = harness
        .endpoint
        .wait_for(|op| {
            op.id() == "m2"
                && matches!(
                    op,
                    Op::Edit {
                        controls: Controls::None,
                        ..
                    }
                )
        })
        .await;
    assert!(
        second
            .text()
            .starts_with("args:--resume sess-model --model opus"),
        "got: {second:?}"
    );

    harness.stop().await;
}
