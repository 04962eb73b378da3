//! Unit tests for the stdin writer task.

use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use agent_bridge::agent::writer::run_writer;
use agent_bridge::AppError;

#[tokio::test]
async fn lines_are_newline_terminated_and_stdin_closed() {
    let (stdin, mut child_side) = tokio::io::duplex(1024);
    let (tx, rx) = mpsc::channel(4);
    let cancel = CancellationToken::new();

    let writer = tokio::spawn(run_writer(7, stdin, rx, cancel));
    tx.send("{\"a\":1}".into()).await.expect("send");
    tx.send("{\"b\":2}".into()).await.expect("send");
    drop(tx);

    let result = tokio::time::timeout(Duration::from_secs(5), writer)
        .await
        .expect("writer exits once the channel closes")
        .expect("writer does not panic");
    assert!(result.is_ok());

    let mut received = String::new();
    child_side
        .read_to_string(&mut received)
        .await
        .expect("read until stdin closes");
    assert_eq!(received, "{\"a\":1}\n{\"b\":2}\n");
}

#[tokio::test]
async fn write_to_closed_pipe_is_a_process_error() {
    let (stdin, child_side) = tokio::io::duplex(16);
    drop(child_side);

    let (tx, rx) = mpsc::channel(1);
    tx.send("hello".into()).await.expect("send");

    let result = run_writer(8, stdin, rx, CancellationToken::new()).await;
    assert!(
        matches!(result, Err(AppError::Process(ref msg)) if msg.starts_with("write failed")),
        "expected write failure, got: {result:?}"
    );
}

#[tokio::test]
async fn cancellation_stops_the_writer() {
    let (stdin, _child_side) = tokio::io::duplex(16);
    let (_tx, rx) = mpsc::channel::<String>(1);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = tokio::time::timeout(Duration::from_secs(5), run_writer(9, stdin, rx, cancel))
        .await
        .expect("cancelled writer returns promptly");
    assert!(result.is_ok());
}
