use crate::media::negotiate_codecs;
use crate::sdp::{CodecDesc, CODEC_TELEPHONE_EVENT};

fn telephone_event(payload_type: u8, sample_rate: u32) -> CodecDesc {
    let mut codec = CodecDesc::new(payload_type, CODEC_TELEPHONE_EVENT, sample_rate);
    codec.format_params.insert("0-15".to_string(), String::new());
    codec
}

/// The peers share PCMA; the event codec comes from the remote list even
/// though the local list carries one under a different payload type.
#[test]
fn test_negotiate_prefers_remote_event_codec() {
    let local = vec![
        CodecDesc::new(0, "PCMU", 8000),
        CodecDesc::new(8, "PCMA", 8000),
        telephone_event(103, 8000),
    ];
    let remote = vec![CodecDesc::new(8, "PCMA", 8000), telephone_event(101, 8000)];

    let (audio, event) = negotiate_codecs(&local, &remote).expect("negotiate");
    assert_eq!(audio, CodecDesc::new(8, "PCMA", 8000));
    assert_eq!(event, Some(telephone_event(101, 8000)));
}

/// Only the event codec matching the audio sample rate qualifies.
#[test]
fn test_negotiate_event_codec_sample_rate_must_match() {
    let local = vec![
        CodecDesc::new(0, "PCMU", 8000),
        CodecDesc::new(8, "PCMA", 8000),
        telephone_event(101, 16000),
        telephone_event(102, 8000),
    ];
    let remote = vec![CodecDesc::new(8, "PCMA", 8000), telephone_event(101, 8000)];

    let (audio, event) = negotiate_codecs(&local, &remote).expect("negotiate");
    assert_eq!(audio, CodecDesc::new(8, "PCMA", 8000));
    assert_eq!(event, Some(telephone_event(101, 8000)));
}

/// Without a remote telephone-event entry the local list is the fallback.
#[test]
fn test_negotiate_falls_back_to_local_event_codec() {
    let local = vec![
        CodecDesc::new(0, "PCMU", 8000),
        CodecDesc::new(8, "PCMA", 8000),
        telephone_event(101, 16000),
        telephone_event(102, 8000),
    ];
    let remote = vec![CodecDesc::new(8, "PCMA", 8000)];

    let (audio, event) = negotiate_codecs(&local, &remote).expect("negotiate");
    assert_eq!(audio, CodecDesc::new(8, "PCMA", 8000));
    assert_eq!(event, Some(telephone_event(102, 8000)));
}

/// Remote order wins: the first remote codec present locally is chosen even
/// when the local list ranks another one higher.
#[test]
fn test_negotiate_walks_remote_codecs_in_order() {
    let local = vec![CodecDesc::new(0, "PCMU", 8000), CodecDesc::new(8, "PCMA", 8000)];
    let remote = vec![CodecDesc::new(8, "PCMA", 8000), CodecDesc::new(0, "PCMU", 8000)];

    let (audio, event) = negotiate_codecs(&local, &remote).expect("negotiate");
    assert_eq!(audio.payload_type, 8);
    assert_eq!(event, None);
}

#[test]
fn test_negotiate_fails_without_common_codec() {
    let local = vec![CodecDesc::new(0, "PCMU", 8000)];
    let remote = vec![CodecDesc::new(8, "PCMA", 8000)];
    assert!(negotiate_codecs(&local, &remote).is_err());
}
