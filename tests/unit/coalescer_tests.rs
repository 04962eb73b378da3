//! Unit tests for the debounced input buffer.
//!
//! Time is paused; the runtime auto-advances the clock whenever every task
//! is idle, so elapsed time reflects the debounce exactly.

use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;

use agent_bridge::inbound::{Coalescer, PendingInput};

const DEBOUNCE: Duration = Duration::from_millis(500);

#[tokio::test(start_paused = true)]
async fn burst_is_flushed_after_quiet_period() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let coalescer = Coalescer::spawn(DEBOUNCE, tx);
    let start = Instant::now();

    coalescer.push_text("first").await;
    coalescer.push_text("second").await;

    let burst = rx.recv().await.expect("burst flushed");
    assert_eq!(burst.texts, vec!["first".to_owned(), "second".to_owned()]);
    assert!(!burst.escalated);
    assert!(start.elapsed() >= DEBOUNCE);
}

#[tokio::test(start_paused = true)]
async fn every_push_restarts_the_quiet_period() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let coalescer = Coalescer::spawn(DEBOUNCE, tx);
    let start = Instant::now();

    coalescer.push_text("a").await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    coalescer.push_text("b").await;

    let burst = rx.recv().await.expect("burst flushed");
    assert_eq!(burst.texts, vec!["a".to_owned(), "b".to_owned()]);
    assert!(
        start.elapsed() >= Duration::from_millis(800),
        "second push must restart the window, elapsed {:?}",
        start.elapsed()
    );
}

#[tokio::test(start_paused = true)]
async fn separate_bursts_are_flushed_separately() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let coalescer = Coalescer::spawn(DEBOUNCE, tx);

    coalescer.push_text("one").await;
    let first = rx.recv().await.expect("first burst");
    coalescer.push_text("two").await;
    let second = rx.recv().await.expect("second burst");

    assert_eq!(first.texts, vec!["one".to_owned()]);
    assert_eq!(second.texts, vec!["two".to_owned()]);
}

#[tokio::test(start_paused = true)]
async fn blank_text_is_ignored() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let coalescer = Coalescer::spawn(DEBOUNCE, tx);

    coalescer.push_text("   ").await;
    coalescer.push_text("real").await;

    let burst = rx.recv().await.expect("burst flushed");
    assert_eq!(burst.texts, vec!["real".to_owned()]);
}

#[tokio::test(start_paused = true)]
async fn photo_caption_becomes_text() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let coalescer = Coalescer::spawn(DEBOUNCE, tx);

    coalescer
        .push_photo(PathBuf::from("/tmp/up/F1_shot.png"), Some("what is this?"))
        .await;
    coalescer
        .push_document(PathBuf::from("/tmp/up/F2_notes.txt"), None)
        .await;

    let burst = rx.recv().await.expect("burst flushed");
    assert_eq!(burst.photos, vec![PathBuf::from("/tmp/up/F1_shot.png")]);
    assert_eq!(burst.documents, vec![PathBuf::from("/tmp/up/F2_notes.txt")]);
    assert_eq!(burst.texts, vec!["what is this?".to_owned()]);
}

#[tokio::test(start_paused = true)]
async fn requeued_input_goes_first_and_is_escalated() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let coalescer = Coalescer::spawn(DEBOUNCE, tx);

    coalescer.push_text("newer").await;
    coalescer
        .requeue(PendingInput {
            texts: vec!["older".into()],
            ..PendingInput::default()
        })
        .await;

    let burst = rx.recv().await.expect("burst flushed");
    assert_eq!(burst.texts, vec!["older".to_owned(), "newer".to_owned()]);
    assert!(burst.escalated);
}

#[tokio::test(start_paused = true)]
async fn clear_discards_buffered_input() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let coalescer = Coalescer::spawn(DEBOUNCE, tx);

    coalescer.push_text("dropped").await;
    coalescer.clear().await;
    coalescer.push_text("kept").await;

    let burst = rx.recv().await.expect("burst flushed");
    assert_eq!(burst.texts, vec!["kept".to_owned()]);
}

#[test]
fn prompt_lists_files_before_text() {
    let input = PendingInput {
        texts: vec!["look at these".into(), "thanks".into()],
        photos: vec![PathBuf::from("/u/a.png")],
        documents: vec![PathBuf::from("/u/b.pdf")],
        escalated: false,
    };
    assert_eq!(
        input.to_prompt(),
        "[User sent a photo: /u/a.png]\n[User sent a file: /u/b.pdf]\nlook at these\nthanks"
    );
}

#[test]
fn empty_input_is_empty() {
    assert!(PendingInput::default().is_empty());
    let input = PendingInput {
        documents: vec![PathBuf::from("/u/b.pdf")],
        ..PendingInput::default()
    };
    assert!(!input.is_empty());
}
