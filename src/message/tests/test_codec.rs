use crate::message::codec::MrcpCodec;
use crate::message::{headers, methods, Message, MessageKind};
use crate::Error;
use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

fn sample_request() -> Message {
    let mut msg = Message::new_request(methods::RECOGNIZE, 1);
    msg.set_header(headers::CHANNEL_IDENTIFIER, "24208d6b89a1403f@speechrecog");
    msg.set_body(b"session:demo".as_slice(), "text/uri-list");
    msg
}

#[test]
fn test_decode_single_frame() {
    let mut codec = MrcpCodec;
    let mut buffer = BytesMut::new();

    let msg = sample_request();
    codec.encode(&msg, &mut buffer).expect("encode");

    let decoded = codec
        .decode(&mut buffer)
        .expect("decode")
        .expect("complete frame");
    assert_eq!(decoded, msg);
    assert!(buffer.is_empty());
}

#[test]
fn test_decode_fragmented_frame() {
    let mut codec = MrcpCodec;
    let mut buffer = BytesMut::new();

    let data = sample_request().marshal();
    let (first, rest) = data.split_at(11);
    let (second, third) = rest.split_at(20);

    buffer.extend_from_slice(first);
    assert!(codec.decode(&mut buffer).expect("decode").is_none());

    buffer.extend_from_slice(second);
    assert!(codec.decode(&mut buffer).expect("decode").is_none());

    buffer.extend_from_slice(third);
    let decoded = codec
        .decode(&mut buffer)
        .expect("decode")
        .expect("complete frame");
    assert_eq!(decoded.name(), methods::RECOGNIZE);
}

#[test]
fn test_decode_back_to_back_frames() {
    let mut codec = MrcpCodec;
    let mut buffer = BytesMut::new();

    let first = sample_request();
    let mut second = Message::new_response(1, 200, crate::message::STATE_COMPLETE);
    second.set_header(headers::CHANNEL_IDENTIFIER, "24208d6b89a1403f@speechrecog");

    buffer.extend_from_slice(&first.marshal());
    buffer.extend_from_slice(&second.marshal());

    let one = codec.decode(&mut buffer).expect("decode").expect("frame");
    assert_eq!(one.kind(), MessageKind::Request);
    let two = codec.decode(&mut buffer).expect("decode").expect("frame");
    assert_eq!(two.kind(), MessageKind::Response);
    assert!(buffer.is_empty());
}

/// The length field is trusted only once its terminating space arrived; a
/// buffer ending inside the digits is simply incomplete, not an error.
#[test]
fn test_decode_waits_for_length_terminator() {
    let mut codec = MrcpCodec;
    let mut buffer = BytesMut::from(&b"MRCP/2.0 12"[..]);
    assert!(codec.decode(&mut buffer).expect("decode").is_none());
}

#[test]
fn test_decode_rejects_foreign_protocol() {
    let mut codec = MrcpCodec;
    let mut buffer = BytesMut::from(&b"GET / HTTP/1.1\r\n\r\n"[..]);
    match codec.decode(&mut buffer) {
        Err(Error::StartLine(_)) => {}
        other => panic!("expected start line error, got {other:?}"),
    }
}

#[test]
fn test_decode_rejects_unterminated_length_field() {
    let mut codec = MrcpCodec;
    let mut buffer = BytesMut::from(&b"MRCP/2.0 99999999999999999999999999999999"[..]);
    match codec.decode(&mut buffer) {
        Err(Error::StartLine(_)) => {}
        other => panic!("expected start line error, got {other:?}"),
    }
}

/// A frame whose length parses but whose interior is malformed is dropped
/// while the stream stays decodable: the next frame comes out intact.
#[test]
fn test_decode_survives_bad_frame_with_valid_length() {
    let mut codec = MrcpCodec;
    let mut buffer = BytesMut::new();

    let bad = b"MRCP/2.0 29 RECOGNIZE abc\r\n\r\n";
    assert_eq!(bad.len(), 29);
    buffer.extend_from_slice(bad);
    buffer.extend_from_slice(&sample_request().marshal());

    match codec.decode(&mut buffer) {
        Err(Error::Message(_)) => {}
        other => panic!("expected message error, got {other:?}"),
    }

    let decoded = codec
        .decode(&mut buffer)
        .expect("decode")
        .expect("complete frame");
    assert_eq!(decoded.name(), methods::RECOGNIZE);
    assert_eq!(decoded.request_id(), 1);
}
