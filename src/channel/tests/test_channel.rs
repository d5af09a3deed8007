use crate::channel::{random_id, Channel, ChannelId};
use crate::message::{headers, methods, Message, MessageKind, STATE_COMPLETE, STATE_IN_PROGRESS};
use crate::sdp::Resource;

#[test]
fn test_parse_channel_id() {
    let id: ChannelId = "031691b2dcc7426f@speechsynth".parse().expect("parse");
    assert_eq!(id.id, "031691b2dcc7426f");
    assert_eq!(id.resource, Resource::Speechsynth);
}

/// `parse(format(parse(s)))` equals `parse(s)` for valid identifiers.
#[test]
fn test_channel_id_round_trip() {
    for raw in [
        "031691b2dcc7426f@speechsynth",
        "24208d6b89a1403f@speechrecog",
        "a@speechrecog",
    ] {
        let parsed: ChannelId = raw.parse().expect("parse");
        let again: ChannelId = parsed.to_string().parse().expect("reparse");
        assert_eq!(again, parsed);
        assert_eq!(parsed.to_string(), raw);
    }
}

#[test]
fn test_parse_channel_id_rejects_malformed() {
    assert!("031691b2dcc7426f".parse::<ChannelId>().is_err());
    assert!("@speechsynth".parse::<ChannelId>().is_err());
    assert!("031691b2dcc7426f@faxmachine".parse::<ChannelId>().is_err());
}

#[test]
fn test_random_id_is_lowercase_hex() {
    let id = random_id(10);
    assert_eq!(id.len(), 10);
    assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
}

#[test]
fn test_new_request_ids_strictly_increase() {
    let channel = Channel::new(ChannelId::new("24208d6b89a1403f", Resource::Speechrecog));

    for want in 1..=5u32 {
        let msg = channel.new_request(methods::RECOGNIZE);
        assert_eq!(msg.kind(), MessageKind::Request);
        assert_eq!(msg.request_id(), want);
        assert_eq!(
            msg.header(headers::CHANNEL_IDENTIFIER),
            Some("24208d6b89a1403f@speechrecog")
        );
    }
}

/// Responses echo the inbound request id without disturbing the channel's
/// own outbound counter.
#[test]
fn test_new_response_does_not_mutate_counter() {
    let channel = Channel::new(ChannelId::new("24208d6b89a1403f", Resource::Speechrecog));

    let first = channel.new_request(methods::RECOGNIZE);
    assert_eq!(first.request_id(), 1);

    let inbound = Message::new_request(methods::STOP, 99);
    let resp = channel.new_response(&inbound, 200, STATE_COMPLETE);
    assert_eq!(resp.kind(), MessageKind::Response);
    assert_eq!(resp.request_id(), 99);
    assert_eq!(resp.status_code(), 200);
    assert_eq!(
        resp.header(headers::CHANNEL_IDENTIFIER),
        Some("24208d6b89a1403f@speechrecog")
    );

    let second = channel.new_request(methods::STOP);
    assert_eq!(second.request_id(), 2);
}

#[tokio::test]
async fn test_new_event_inherits_last_observed_request_id() {
    let channel = Channel::new(ChannelId::new("b2587e873c604dcf", Resource::Speechrecog));

    // an inbound request is observed without any handler attached
    let mut inbound = Message::new_request(methods::RECOGNIZE, 7);
    inbound.set_header(headers::CHANNEL_IDENTIFIER, "b2587e873c604dcf@speechrecog");
    channel.on_message(inbound).await;

    let event = channel.new_event("START-OF-INPUT", STATE_IN_PROGRESS);
    assert_eq!(event.kind(), MessageKind::Event);
    assert_eq!(event.request_id(), 7);
    assert_eq!(event.request_state(), STATE_IN_PROGRESS);
    assert_eq!(
        event.header(headers::CHANNEL_IDENTIFIER),
        Some("b2587e873c604dcf@speechrecog")
    );
}

#[tokio::test]
async fn test_send_on_unbound_channel_fails() {
    let channel = Channel::new(ChannelId::new("deadbeef00", Resource::Speechsynth));
    let msg = channel.new_request(methods::SPEAK);
    assert!(channel.send(&msg).await.is_err());

    // closing an unbound channel is a no-op, twice as well
    channel.close().await;
    channel.close().await;
}
