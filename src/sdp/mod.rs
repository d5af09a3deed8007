//! Typed session descriptors and their SDP wire form.
//!
//! A [`Desc`] captures the two media sections an MRCPv2 offer/answer
//! carries: one `m=application` line describing the TCP control channel and
//! one `m=audio` line describing the RTP stream. Parsing walks the SDP line
//! by line; rendering writes the same shape back. Codec metadata is taken
//! from the static payload-type map shared by both roles, `rtpmap`/`fmtp`
//! attributes are accepted on input but not mined for codec parameters.

use crate::channel::ChannelId;
use crate::{Error, Result};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

#[cfg(test)]
mod tests;

pub const PROTO_TCP_MRCPV2: &str = "TCP/MRCPv2";

pub const SETUP_ACTIVE: &str = "active";
pub const SETUP_PASSIVE: &str = "passive";

pub const CONNECTION_NEW: &str = "new";
pub const CONNECTION_EXISTING: &str = "existing";

pub const CODEC_TELEPHONE_EVENT: &str = "telephone-event";

/// A speech resource class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    Speechsynth,
    Speechrecog,
}

impl Resource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Resource::Speechsynth => "speechsynth",
            Resource::Speechrecog => "speechrecog",
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Resource {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "speechsynth" => Ok(Resource::Speechsynth),
            "speechrecog" => Ok(Resource::Speechrecog),
            other => Err(Error::UnsupportedResource(other.to_string())),
        }
    }
}

/// Direction attribute of an audio stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Sendonly,
    Recvonly,
    Sendrecv,
    Inactive,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Sendonly => "sendonly",
            Direction::Recvonly => "recvonly",
            Direction::Sendrecv => "sendrecv",
            Direction::Inactive => "inactive",
        }
    }

    pub fn is_send(&self) -> bool {
        matches!(self, Direction::Sendonly | Direction::Sendrecv)
    }

    pub fn is_recv(&self) -> bool {
        matches!(self, Direction::Recvonly | Direction::Sendrecv)
    }
}

impl Default for Direction {
    fn default() -> Self {
        Direction::Inactive
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "sendonly" => Ok(Direction::Sendonly),
            "recvonly" => Ok(Direction::Recvonly),
            "sendrecv" => Ok(Direction::Sendrecv),
            "inactive" => Ok(Direction::Inactive),
            other => Err(Error::Sdp(format!("invalid direction: {other}"))),
        }
    }
}

/// One RTP payload description.
///
/// Negotiation equality covers payload type, name and sample rate; format
/// parameters are advisory metadata carried through `fmtp`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CodecDesc {
    pub payload_type: u8,
    pub name: String,
    pub sample_rate: u32,
    pub format_params: HashMap<String, String>,
}

impl CodecDesc {
    pub fn new(payload_type: u8, name: &str, sample_rate: u32) -> CodecDesc {
        CodecDesc {
            payload_type,
            name: name.to_string(),
            sample_rate,
            format_params: HashMap::new(),
        }
    }

    pub fn matches(&self, other: &CodecDesc) -> bool {
        self.payload_type == other.payload_type
            && self.name == other.name
            && self.sample_rate == other.sample_rate
    }

    pub fn is_telephone_event(&self) -> bool {
        self.name == CODEC_TELEPHONE_EVENT
    }
}

/// The audio half of a session description.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MediaDesc {
    /// Connection address covering this stream.
    pub host: String,
    pub port: u16,
    pub direction: Direction,
    /// Packet time in milliseconds.
    pub ptime: u64,
    pub codecs: Vec<CodecDesc>,
}

/// The MRCP control half of a session description.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ControlDesc {
    /// Connection address covering the control channel.
    pub host: String,
    pub port: u16,
    pub proto: String,
    pub setup: String,
    pub connection: String,
    pub channel: Option<ChannelId>,
    pub resource: Option<Resource>,
}

/// A whole SDP body: origin, global connection address, and the audio plus
/// control media sections.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Desc {
    /// Username carried in the SDP origin line.
    pub user_agent: String,
    /// Global connection address.
    pub host: String,
    pub audio: MediaDesc,
    pub control: ControlDesc,
}

/// Codecs both roles know by payload type. The offerer and answerer must
/// agree on this same static map for negotiation to converge.
pub(crate) fn known_codec(payload_type: u8) -> Option<CodecDesc> {
    match payload_type {
        0 => Some(CodecDesc::new(0, "PCMU", 8000)),
        8 => Some(CodecDesc::new(8, "PCMA", 8000)),
        101 => Some(telephone_event_codec(101)),
        _ => None,
    }
}

fn telephone_event_codec(payload_type: u8) -> CodecDesc {
    let mut codec = CodecDesc::new(payload_type, CODEC_TELEPHONE_EVENT, 8000);
    codec.format_params.insert("0-15".to_string(), String::new());
    codec
}

pub fn default_audio_codecs() -> Vec<CodecDesc> {
    vec![
        CodecDesc::new(0, "PCMU", 8000),
        CodecDesc::new(8, "PCMA", 8000),
        telephone_event_codec(101),
    ]
}

#[derive(Clone, Copy, PartialEq)]
enum Section {
    Session,
    Application,
    Audio,
    Other,
}

impl Desc {
    /// Parses raw SDP bytes into a descriptor.
    ///
    /// Unknown payload types and unknown attributes are dropped silently;
    /// unparsable ports and ptime values fail the whole body.
    pub fn parse(raw: &[u8]) -> Result<Desc> {
        let text = std::str::from_utf8(raw)
            .map_err(|_| Error::Sdp("session description is not valid UTF-8".to_string()))?;

        let mut desc = Desc::default();
        let mut section = Section::Session;

        for line in text.lines() {
            let Some((kind, rest)) = line.split_once('=') else {
                continue;
            };
            match kind {
                "o" => {
                    if let Some(username) = rest.split(' ').next() {
                        desc.user_agent = username.to_string();
                    }
                }
                "c" => {
                    let addr = connection_address(rest)?;
                    match section {
                        Section::Session => {
                            desc.host.clone_from(&addr);
                            desc.audio.host.clone_from(&addr);
                            desc.control.host = addr;
                        }
                        Section::Application => desc.control.host = addr,
                        Section::Audio => desc.audio.host = addr,
                        Section::Other => {}
                    }
                }
                "m" => {
                    let mut fields = rest.split(' ');
                    let media = fields
                        .next()
                        .ok_or_else(|| Error::Sdp(format!("invalid media line: {rest}")))?;
                    let port = fields
                        .next()
                        .and_then(|p| p.parse::<u16>().ok())
                        .ok_or_else(|| Error::Sdp(format!("invalid media port: {rest}")))?;
                    let proto = fields
                        .next()
                        .ok_or_else(|| Error::Sdp(format!("invalid media line: {rest}")))?;
                    match media {
                        "application" => {
                            section = Section::Application;
                            desc.control.port = port;
                            desc.control.proto = proto.to_string();
                        }
                        "audio" => {
                            section = Section::Audio;
                            desc.audio.port = port;
                            for fmt in fields {
                                let pt = fmt.parse::<u8>().map_err(|_| {
                                    Error::Sdp(format!("invalid media format: {fmt}"))
                                })?;
                                if let Some(codec) = known_codec(pt) {
                                    desc.audio.codecs.push(codec);
                                }
                            }
                        }
                        _ => section = Section::Other,
                    }
                }
                "a" => {
                    let (key, value) = match rest.split_once(':') {
                        Some((k, v)) => (k, v),
                        None => (rest, ""),
                    };
                    match section {
                        Section::Application => match key {
                            "setup" => desc.control.setup = value.to_string(),
                            "connection" => desc.control.connection = value.to_string(),
                            "channel" => desc.control.channel = value.parse().ok(),
                            "resource" => desc.control.resource = value.parse().ok(),
                            _ => {}
                        },
                        Section::Audio => {
                            if let Ok(direction) = key.parse::<Direction>() {
                                desc.audio.direction = direction;
                            } else if key == "ptime" {
                                desc.audio.ptime = value
                                    .parse::<u64>()
                                    .map_err(|_| Error::Sdp(format!("invalid ptime: {value}")))?;
                            }
                            // rtpmap and fmtp are accepted as-is, the static
                            // payload-type map is canonical for codec fields
                        }
                        _ => {}
                    }
                }
                _ => {}
            }
        }

        Ok(desc)
    }

    /// Renders the descriptor to SDP bytes.
    pub fn render(&self) -> Vec<u8> {
        let mut out = String::with_capacity(512);
        let username = if self.user_agent.is_empty() {
            "-"
        } else {
            &self.user_agent
        };

        out.push_str("v=0\r\n");
        out.push_str(&format!("o={} 0 0 IN IP4 {}\r\n", username, self.host));
        out.push_str("s=-\r\n");
        out.push_str(&format!("c=IN IP4 {}\r\n", self.host));
        out.push_str("t=0 0\r\n");

        out.push_str(&format!(
            "m=application {} {} 1\r\n",
            self.control.port, self.control.proto
        ));
        out.push_str(&format!("a=setup:{}\r\n", self.control.setup));
        out.push_str(&format!("a=connection:{}\r\n", self.control.connection));
        if let Some(resource) = self.control.resource {
            out.push_str(&format!("a=resource:{resource}\r\n"));
        }
        if let Some(channel) = &self.control.channel {
            out.push_str(&format!("a=channel:{channel}\r\n"));
        }
        out.push_str("a=cmid:1\r\n");

        out.push_str(&format!("m=audio {} RTP/AVP", self.audio.port));
        for codec in &self.audio.codecs {
            out.push_str(&format!(" {}", codec.payload_type));
        }
        out.push_str("\r\n");
        out.push_str(&format!("a={}\r\n", self.audio.direction));
        out.push_str(&format!("a=ptime:{}\r\n", self.audio.ptime));
        out.push_str("a=mid:1\r\n");
        for codec in &self.audio.codecs {
            out.push_str(&format!(
                "a=rtpmap:{} {}/{}\r\n",
                codec.payload_type, codec.name, codec.sample_rate
            ));
            let mut params: Vec<_> = codec.format_params.iter().collect();
            params.sort();
            for (key, value) in params {
                if value.is_empty() {
                    out.push_str(&format!("a=fmtp:{} {}\r\n", codec.payload_type, key));
                } else {
                    out.push_str(&format!(
                        "a=fmtp:{} {}={}\r\n",
                        codec.payload_type, key, value
                    ));
                }
            }
        }

        out.into_bytes()
    }
}

// "IN IP4 10.0.0.1" with an optional /ttl suffix
fn connection_address(rest: &str) -> Result<String> {
    let mut fields = rest.split(' ');
    let addr = match (fields.next(), fields.next(), fields.next()) {
        (Some(_), Some(_), Some(addr)) => addr,
        _ => return Err(Error::Sdp(format!("invalid connection line: {rest}"))),
    };
    Ok(addr.split('/').next().unwrap_or(addr).to_string())
}
