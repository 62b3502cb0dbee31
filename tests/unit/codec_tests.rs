use agent_tether::channel::codec::{FrameCodec, MAX_FRAME_BYTES};
use agent_tether::AppError;
use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

#[test]
fn decodes_one_frame_per_line() {
    let mut codec = FrameCodec::new();
    let mut buf = BytesMut::from("{\"a\":1}\n{\"b\":2}\n");

    assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some("{\"a\":1}"));
    assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some("{\"b\":2}"));
    assert_eq!(codec.decode(&mut buf).unwrap(), None);
}

#[test]
fn partial_line_waits_for_newline() {
    let mut codec = FrameCodec::new();
    let mut buf = BytesMut::from("{\"partial\"");
    assert_eq!(codec.decode(&mut buf).unwrap(), None);

    buf.extend_from_slice(b":true}\n");
    assert_eq!(
        codec.decode(&mut buf).unwrap().as_deref(),
        Some("{\"partial\":true}")
    );
}

#[test]
fn trailing_frame_without_newline_is_flushed_at_eof() {
    let mut codec = FrameCodec::new();
    let mut buf = BytesMut::from("last");
    assert_eq!(codec.decode_eof(&mut buf).unwrap().as_deref(), Some("last"));
}

#[test]
fn oversized_frame_is_a_channel_error() {
    let mut codec = FrameCodec::new();
    let mut buf = BytesMut::from("x".repeat(MAX_FRAME_BYTES + 1).as_str());
    buf.extend_from_slice(b"\n");

    let err = codec.decode(&mut buf).expect_err("should reject long frame");
    assert!(
        matches!(&err, AppError::Channel(msg) if msg.starts_with("frame too long")),
        "unexpected error: {err}"
    );
}

#[test]
fn codec_recovers_after_oversized_frame() {
    let mut codec = FrameCodec::new();
    let mut buf = BytesMut::from("y".repeat(MAX_FRAME_BYTES + 10).as_str());
    buf.extend_from_slice(b"\nok\n");

    assert!(codec.decode(&mut buf).is_err());
    let mut next = codec.decode(&mut buf).unwrap();
    while next.is_none() {
        next = codec.decode(&mut buf).unwrap();
    }
    assert_eq!(next.as_deref(), Some("ok"));
}

#[test]
fn encode_appends_newline() {
    let mut codec = FrameCodec::new();
    let mut buf = BytesMut::new();
    codec.encode("{\"x\":1}".to_owned(), &mut buf).unwrap();
    assert_eq!(&buf[..], b"{\"x\":1}\n");
}
