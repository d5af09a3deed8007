use thiserror::Error as ThisError;

#[derive(Debug, ThisError)]
pub enum Error {
    #[error("SIP error: {0}")]
    Sip(#[from] rsipstack::Error),

    #[error("SIP message error: {0}")]
    SipMessage(#[from] rsip::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("address parse error: {0}")]
    AddrParse(#[from] std::net::AddrParseError),

    #[error("invalid SDP: {0}")]
    Sdp(String),

    #[error("invalid MRCP start line: {0}")]
    StartLine(String),

    #[error("invalid MRCP message: {0}")]
    Message(String),

    #[error("no available audio codec")]
    NoAudioCodec,

    #[error("no free rtp ports")]
    NoFreePorts,

    #[error("unsupported resource: {0}")]
    UnsupportedResource(String),

    #[error("invalid channel identifier: {0}")]
    ChannelIdentifier(String),

    #[error("channel is not bound to a connection")]
    ChannelUnbound,

    #[error("dialog error: {0}")]
    Dialog(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}
