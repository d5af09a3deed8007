use crate::channel::ChannelId;
use crate::sdp::{
    default_audio_codecs, CodecDesc, ControlDesc, Desc, Direction, MediaDesc, Resource,
    CONNECTION_NEW, PROTO_TCP_MRCPV2, SETUP_ACTIVE, SETUP_PASSIVE,
};

const UNIMRCP_ANSWER: &[u8] = b"v=0\r\n\
o=UniMRCPServer 5710209595858788961 7814554407398160305 IN IP4 10.29.0.87\r\n\
s=-\r\n\
c=IN IP4 10.29.0.87\r\n\
t=0 0\r\n\
m=application 7230 TCP/MRCPv2 1\r\n\
a=setup:passive\r\n\
a=connection:new\r\n\
a=channel:24208d6b89a1403f@speechrecog\r\n\
a=cmid:1\r\n\
m=audio 22836 RTP/AVP 0 101\r\n\
a=rtpmap:0 PCMU/8000\r\n\
a=rtpmap:101 telephone-event/8000\r\n\
a=fmtp:101 0-15\r\n\
a=recvonly\r\n\
a=ptime:20\r\n\
a=mid:1\r\n";

#[test]
fn test_parse_answer() {
    let desc = Desc::parse(UNIMRCP_ANSWER).expect("parse");

    assert_eq!(desc.user_agent, "UniMRCPServer");
    assert_eq!(desc.host, "10.29.0.87");

    assert_eq!(desc.audio.host, "10.29.0.87");
    assert_eq!(desc.audio.port, 22836);
    assert_eq!(desc.audio.direction, Direction::Recvonly);
    assert_eq!(desc.audio.ptime, 20);
    // payload type 0 and 101 resolve through the static codec map
    assert_eq!(desc.audio.codecs.len(), 2);
    assert_eq!(desc.audio.codecs[0].name, "PCMU");
    assert_eq!(desc.audio.codecs[0].payload_type, 0);
    assert_eq!(desc.audio.codecs[1].name, "telephone-event");
    assert_eq!(desc.audio.codecs[1].payload_type, 101);
    assert_eq!(
        desc.audio.codecs[1].format_params.get("0-15"),
        Some(&String::new())
    );

    assert_eq!(desc.control.host, "10.29.0.87");
    assert_eq!(desc.control.port, 7230);
    assert_eq!(desc.control.proto, PROTO_TCP_MRCPV2);
    assert_eq!(desc.control.setup, SETUP_PASSIVE);
    assert_eq!(desc.control.connection, CONNECTION_NEW);
    assert_eq!(
        desc.control.channel,
        Some(ChannelId::new("24208d6b89a1403f", Resource::Speechrecog))
    );
    assert_eq!(desc.control.resource, None);
}

#[test]
fn test_parse_media_level_connection_overrides_session() {
    let sdp = b"v=0\r\n\
o=- 0 0 IN IP4 10.0.0.1\r\n\
s=-\r\n\
c=IN IP4 10.0.0.1\r\n\
t=0 0\r\n\
m=audio 4000 RTP/AVP 0\r\n\
c=IN IP4 10.0.0.2\r\n\
a=sendrecv\r\n\
a=ptime:20\r\n";

    let desc = Desc::parse(sdp).expect("parse");
    assert_eq!(desc.host, "10.0.0.1");
    assert_eq!(desc.audio.host, "10.0.0.2");
}

#[test]
fn test_parse_drops_unknown_payload_types() {
    let sdp = b"v=0\r\n\
o=- 0 0 IN IP4 10.0.0.1\r\n\
s=-\r\n\
c=IN IP4 10.0.0.1\r\n\
t=0 0\r\n\
m=audio 4000 RTP/AVP 96 0\r\n\
a=sendonly\r\n\
a=ptime:20\r\n";

    let desc = Desc::parse(sdp).expect("parse");
    assert_eq!(desc.audio.codecs.len(), 1);
    assert_eq!(desc.audio.codecs[0].payload_type, 0);
}

#[test]
fn test_parse_rejects_invalid_ptime() {
    let sdp = b"v=0\r\n\
o=- 0 0 IN IP4 10.0.0.1\r\n\
s=-\r\n\
c=IN IP4 10.0.0.1\r\n\
t=0 0\r\n\
m=audio 4000 RTP/AVP 0\r\n\
a=ptime:soon\r\n";

    assert!(Desc::parse(sdp).is_err());
}

#[test]
fn test_render_offer() {
    let desc = Desc {
        user_agent: "mrcpstack".to_string(),
        host: "127.0.0.1".to_string(),
        audio: MediaDesc {
            host: "127.0.0.1".to_string(),
            port: 10000,
            direction: Direction::Sendonly,
            ptime: 20,
            codecs: default_audio_codecs(),
        },
        control: ControlDesc {
            host: "127.0.0.1".to_string(),
            port: 9,
            proto: PROTO_TCP_MRCPV2.to_string(),
            setup: SETUP_ACTIVE.to_string(),
            connection: CONNECTION_NEW.to_string(),
            channel: None,
            resource: Some(Resource::Speechrecog),
        },
    };

    let want = "v=0\r\n\
o=mrcpstack 0 0 IN IP4 127.0.0.1\r\n\
s=-\r\n\
c=IN IP4 127.0.0.1\r\n\
t=0 0\r\n\
m=application 9 TCP/MRCPv2 1\r\n\
a=setup:active\r\n\
a=connection:new\r\n\
a=resource:speechrecog\r\n\
a=cmid:1\r\n\
m=audio 10000 RTP/AVP 0 8 101\r\n\
a=sendonly\r\n\
a=ptime:20\r\n\
a=mid:1\r\n\
a=rtpmap:0 PCMU/8000\r\n\
a=rtpmap:8 PCMA/8000\r\n\
a=rtpmap:101 telephone-event/8000\r\n\
a=fmtp:101 0-15\r\n";

    assert_eq!(String::from_utf8(desc.render()).unwrap(), want);
}

/// Rendering a parsed descriptor and parsing it again must yield the same
/// value when every codec is in the static payload-type map.
#[test]
fn test_parse_render_round_trip() {
    let desc = Desc {
        user_agent: "mrcpstack".to_string(),
        host: "10.0.0.1".to_string(),
        audio: MediaDesc {
            host: "10.0.0.1".to_string(),
            port: 22000,
            direction: Direction::Recvonly,
            ptime: 20,
            codecs: vec![
                CodecDesc::new(0, "PCMU", 8000),
                crate::sdp::known_codec(101).expect("known codec"),
            ],
        },
        control: ControlDesc {
            host: "10.0.0.1".to_string(),
            port: 1544,
            proto: PROTO_TCP_MRCPV2.to_string(),
            setup: SETUP_PASSIVE.to_string(),
            connection: CONNECTION_NEW.to_string(),
            channel: Some(ChannelId::new("6f5c2d3e8a", Resource::Speechrecog)),
            resource: Some(Resource::Speechrecog),
        },
    };

    let rendered = desc.render();
    let parsed = Desc::parse(&rendered).expect("parse");
    assert_eq!(parsed, desc);
}
