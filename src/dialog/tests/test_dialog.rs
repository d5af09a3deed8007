use crate::dialog::server_dialog::apply_reinvite;
use crate::dialog::{client_direction, server_direction};
use crate::sdp::{
    default_audio_codecs, ControlDesc, Desc, Direction, MediaDesc, Resource, CONNECTION_NEW,
    PROTO_TCP_MRCPV2, SETUP_PASSIVE,
};

fn established_local_desc() -> Desc {
    Desc {
        user_agent: "mrcpstack".to_string(),
        host: "127.0.0.1".to_string(),
        audio: MediaDesc {
            host: "127.0.0.1".to_string(),
            port: 22000,
            direction: Direction::Recvonly,
            ptime: 20,
            codecs: default_audio_codecs(),
        },
        control: ControlDesc {
            host: "127.0.0.1".to_string(),
            port: 1544,
            proto: PROTO_TCP_MRCPV2.to_string(),
            setup: SETUP_PASSIVE.to_string(),
            connection: CONNECTION_NEW.to_string(),
            channel: None,
            resource: Some(Resource::Speechrecog),
        },
    }
}

fn remote_desc(control_port: u16, audio_port: u16) -> Desc {
    let mut desc = established_local_desc();
    desc.control.port = control_port;
    desc.audio.port = audio_port;
    desc
}

/// The offered direction derives from the resource and the answered
/// direction is its mirror image.
#[test]
fn test_directions_mirror_by_resource() {
    assert_eq!(client_direction(Resource::Speechrecog), Direction::Sendonly);
    assert_eq!(client_direction(Resource::Speechsynth), Direction::Recvonly);
    assert_eq!(server_direction(Resource::Speechrecog), Direction::Recvonly);
    assert_eq!(server_direction(Resource::Speechsynth), Direction::Sendonly);
}

#[test]
fn test_reinvite_zero_control_port_closes_channel() {
    let mut local = established_local_desc();
    let action = apply_reinvite(&mut local, &remote_desc(0, 4000));

    assert!(action.close_channel);
    assert!(!action.close_media);
    assert_eq!(local.control.port, 0);
    assert_eq!(local.audio.port, 22000);
    assert_eq!(local.audio.direction, Direction::Recvonly);
}

#[test]
fn test_reinvite_zero_audio_port_closes_media() {
    let mut local = established_local_desc();
    let action = apply_reinvite(&mut local, &remote_desc(1544, 0));

    assert!(!action.close_channel);
    assert!(action.close_media);
    assert_eq!(local.control.port, 1544);
    assert_eq!(local.audio.port, 0);
    assert_eq!(local.audio.direction, Direction::Inactive);
}

#[test]
fn test_reinvite_without_zeroed_ports_changes_nothing() {
    let mut local = established_local_desc();
    let before = local.clone();
    let action = apply_reinvite(&mut local, &remote_desc(1544, 4000));

    assert!(!action.close_channel);
    assert!(!action.close_media);
    assert_eq!(local, before);
}
