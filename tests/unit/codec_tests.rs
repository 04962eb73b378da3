//! Unit tests for the child's stdout line framing.

use bytes::BytesMut;
use tokio_util::codec::Decoder;

use agent_bridge::agent::codec::{LineCodec, MAX_LINE_BYTES};
use agent_bridge::AppError;

#[test]
fn single_line_is_returned_without_newline() {
    let mut codec = LineCodec::new();
    let mut buf = BytesMut::from("{\"type\":\"result\"}\n");

    let line = codec.decode(&mut buf).expect("decode succeeds");
    assert_eq!(line, Some("{\"type\":\"result\"}".to_owned()));
}

#[test]
fn partial_line_is_buffered_until_newline() {
    let mut codec = LineCodec::new();
    let mut buf = BytesMut::from("{\"type\":");

    assert_eq!(codec.decode(&mut buf).expect("decode succeeds"), None);

    buf.extend_from_slice(b"\"result\"}\n");
    assert_eq!(
        codec.decode(&mut buf).expect("decode succeeds"),
        Some("{\"type\":\"result\"}".to_owned())
    );
}

#[test]
fn batched_lines_decode_in_order() {
    let mut codec = LineCodec::new();
    let mut buf = BytesMut::from("one\ntwo\n");

    assert_eq!(codec.decode(&mut buf).expect("first"), Some("one".into()));
    assert_eq!(codec.decode(&mut buf).expect("second"), Some("two".into()));
    assert_eq!(codec.decode(&mut buf).expect("drained"), None);
}

#[test]
fn unterminated_last_line_is_returned_at_eof() {
    let mut codec = LineCodec::new();
    let mut buf = BytesMut::from("tail");

    assert_eq!(
        codec.decode_eof(&mut buf).expect("decode_eof succeeds"),
        Some("tail".into())
    );
}

#[test]
fn over_long_line_is_a_protocol_error() {
    let mut codec = LineCodec::with_max_length(8);
    let mut buf = BytesMut::from("0123456789abcdef\nok\n");

    let result = codec.decode(&mut buf);
    assert!(
        matches!(result, Err(AppError::Protocol(ref msg)) if msg.contains("line too long")),
        "expected line-too-long protocol error, got: {result:?}"
    );

    // Framing resumes at the next newline.
    let next = codec.decode(&mut buf).expect("decode after overflow");
    assert_eq!(next, Some("ok".into()));
}

#[test]
fn default_limit_is_generous() {
    assert_eq!(MAX_LINE_BYTES, 100 * 1024 * 1024);
}
