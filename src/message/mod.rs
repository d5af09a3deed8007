//! MRCPv2 message model.
//!
//! MRCPv2 is a text protocol framed by a byte length declared in the start
//! line. Three message shapes share one frame format:
//!
//! * request: `MRCP/2.0 <len> <METHOD> <request-id>`
//! * response: `MRCP/2.0 <len> <request-id> <status-code> <request-state>`
//! * event: `MRCP/2.0 <len> <EVENT> <request-id> <request-state>`
//!
//! followed by `Name: Value` header lines, a blank line, and the body. The
//! length in the start line is authoritative for framing; `Content-Length`
//! is informational and kept consistent when a body is set.

use crate::sdp::Resource;
use crate::{Error, Result};
use std::collections::HashMap;

pub(crate) mod codec;

#[cfg(test)]
mod tests;

pub mod methods {
    //! Method names defined for the speechrecog and speechsynth resources.
    pub const RECOGNIZE: &str = "RECOGNIZE";
    pub const SET_PARAMS: &str = "SET-PARAMS";
    pub const GET_PARAMS: &str = "GET-PARAMS";
    pub const DEFINE_GRAMMAR: &str = "DEFINE-GRAMMAR";
    pub const INTERPRET: &str = "INTERPRET";
    pub const GET_RESULT: &str = "GET-RESULT";
    pub const START_INPUT_TIMERS: &str = "START-INPUT-TIMERS";
    pub const STOP: &str = "STOP";
    pub const START_PHRASE_ENROLLMENT: &str = "START-PHRASE-ENROLLMENT";
    pub const ENROLLMENT_ROLLBACK: &str = "ENROLLMENT-ROLLBACK";
    pub const END_PHRASE_ENROLLMENT: &str = "END-PHRASE-ENROLLMENT";
    pub const MODIFY_PHRASE: &str = "MODIFY-PHRASE";
    pub const DELETE_PHRASE: &str = "DELETE-PHRASE";
    pub const SPEAK: &str = "SPEAK";
    pub const PAUSE: &str = "PAUSE";
    pub const RESUME: &str = "RESUME";
    pub const BARGE_IN_OCCURRED: &str = "BARGE-IN-OCCURRED";
    pub const CONTROL: &str = "CONTROL";
    pub const DEFINE_LEXICON: &str = "DEFINE-LEXICON";
}

pub mod headers {
    //! Header names the stack itself reads or writes. Any other header is
    //! carried through as an opaque string.
    pub const CONTENT_TYPE: &str = "Content-Type";
    pub const CONTENT_LENGTH: &str = "Content-Length";
    pub const COMPLETION_CAUSE: &str = "Completion-Cause";
    pub const CHANNEL_IDENTIFIER: &str = "Channel-Identifier";
}

pub const STATE_COMPLETE: &str = "COMPLETE";
pub const STATE_IN_PROGRESS: &str = "IN-PROGRESS";
pub const STATE_PENDING: &str = "PENDING";

/// Completion cause carried by a terminal SPEAK or RECOGNIZE event.
///
/// The numeric code is shared between the two resources; the wire string
/// (`NNN name`) is looked up per resource when the header is written.
/// [`CompletionCause::UNKNOWN`] is returned when the header is missing or
/// unparsable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletionCause(pub i32);

const SYNTH_COMPLETION_CAUSES: [&str; 8] = [
    "000 normal",
    "001 barge-in",
    "002 parse-failure",
    "003 uri-failure",
    "004 error",
    "005 language-unsupported",
    "006 lexicon-load-failure",
    "007 cancelled",
];

const RECOG_COMPLETION_CAUSES: [&str; 17] = [
    "000 success",
    "001 no-match",
    "002 no-input-timeout",
    "003 hotword-maxtime",
    "004 grammar-load-failure",
    "005 grammar-compilation-failure",
    "006 recognizer-error",
    "007 speech-too-early",
    "008 success-maxtime",
    "009 uri-failure",
    "010 language-unsupported",
    "011 cancelled",
    "012 semantics-failure",
    "013 partial-match",
    "014 partial-match-maxtime",
    "015 no-match-maxtime",
    "016 grammar-definition-failure",
];

impl CompletionCause {
    pub const UNKNOWN: Self = Self(-1);

    pub const SYNTH_NORMAL: Self = Self(0);
    pub const SYNTH_BARGE_IN: Self = Self(1);
    pub const SYNTH_PARSE_FAILURE: Self = Self(2);
    pub const SYNTH_URI_FAILURE: Self = Self(3);
    pub const SYNTH_ERROR: Self = Self(4);
    pub const SYNTH_LANGUAGE_UNSUPPORTED: Self = Self(5);
    pub const SYNTH_LEXICON_LOAD_FAILURE: Self = Self(6);
    pub const SYNTH_CANCELLED: Self = Self(7);

    pub const RECOG_SUCCESS: Self = Self(0);
    pub const RECOG_NO_MATCH: Self = Self(1);
    pub const RECOG_NO_INPUT_TIMEOUT: Self = Self(2);
    pub const RECOG_HOTWORD_MAXTIME: Self = Self(3);
    pub const RECOG_GRAMMAR_LOAD_FAILURE: Self = Self(4);
    pub const RECOG_GRAMMAR_COMPILATION_FAILURE: Self = Self(5);
    pub const RECOG_RECOGNIZER_ERROR: Self = Self(6);
    pub const RECOG_SPEECH_TOO_EARLY: Self = Self(7);
    pub const RECOG_SUCCESS_MAXTIME: Self = Self(8);
    pub const RECOG_URI_FAILURE: Self = Self(9);
    pub const RECOG_LANGUAGE_UNSUPPORTED: Self = Self(10);
    pub const RECOG_CANCELLED: Self = Self(11);
    pub const RECOG_SEMANTICS_FAILURE: Self = Self(12);
    pub const RECOG_PARTIAL_MATCH: Self = Self(13);
    pub const RECOG_PARTIAL_MATCH_MAXTIME: Self = Self(14);
    pub const RECOG_NO_MATCH_MAXTIME: Self = Self(15);
    pub const RECOG_GRAMMAR_DEFINITION_FAILURE: Self = Self(16);

    pub fn code(self) -> i32 {
        self.0
    }

    /// Wire form of the cause for the given resource, or `None` when the
    /// code has no entry in that resource's table.
    pub fn as_header_value(self, resource: Resource) -> Option<&'static str> {
        let table: &[&str] = match resource {
            Resource::Speechrecog => &RECOG_COMPLETION_CAUSES,
            Resource::Speechsynth => &SYNTH_COMPLETION_CAUSES,
        };
        usize::try_from(self.0).ok().and_then(|i| table.get(i).copied())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Request,
    Response,
    Event,
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageKind::Request => write!(f, "request"),
            MessageKind::Response => write!(f, "response"),
            MessageKind::Event => write!(f, "event"),
        }
    }
}

/// A single MRCPv2 message.
///
/// Header keys keep the case they were sent with; iteration order of the
/// header map is not significant on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    kind: MessageKind,
    // method name for requests, event name for events
    name: String,
    request_id: u32,
    request_state: String,
    status_code: u16,
    headers: HashMap<String, String>,
    body: Vec<u8>,
}

impl Message {
    pub fn new_request(method: impl Into<String>, request_id: u32) -> Message {
        Message {
            kind: MessageKind::Request,
            name: method.into(),
            request_id,
            request_state: String::new(),
            status_code: 0,
            headers: HashMap::new(),
            body: Vec::new(),
        }
    }

    pub fn new_response(
        request_id: u32,
        status_code: u16,
        request_state: impl Into<String>,
    ) -> Message {
        Message {
            kind: MessageKind::Response,
            name: String::new(),
            request_id,
            request_state: request_state.into(),
            status_code,
            headers: HashMap::new(),
            body: Vec::new(),
        }
    }

    pub fn new_event(
        name: impl Into<String>,
        request_id: u32,
        request_state: impl Into<String>,
    ) -> Message {
        Message {
            kind: MessageKind::Event,
            name: name.into(),
            request_id,
            request_state: request_state.into(),
            status_code: 0,
            headers: HashMap::new(),
            body: Vec::new(),
        }
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    /// Method name for requests, event name for events, empty for responses.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn request_id(&self) -> u32 {
        self.request_id
    }

    pub fn set_request_id(&mut self, request_id: u32) {
        self.request_id = request_id;
    }

    pub fn request_state(&self) -> &str {
        &self.request_state
    }

    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }

    pub fn set_header(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(key.into(), value.into());
    }

    pub fn headers(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Sets the body together with a `Content-Type` header and a
    /// `Content-Length` consistent with the body size.
    pub fn set_body(&mut self, body: impl Into<Vec<u8>>, content_type: &str) {
        let body = body.into();
        self.set_header(headers::CONTENT_TYPE, content_type);
        self.set_header(headers::CONTENT_LENGTH, body.len().to_string());
        self.body = body;
    }

    pub fn set_completion_cause(&mut self, resource: Resource, cause: CompletionCause) {
        if let Some(value) = cause.as_header_value(resource) {
            self.set_header(headers::COMPLETION_CAUSE, value);
        }
    }

    /// Numeric part of the `Completion-Cause` header.
    /// [`CompletionCause::UNKNOWN`] when the header is missing or malformed.
    pub fn completion_cause(&self) -> CompletionCause {
        let Some(value) = self.header(headers::COMPLETION_CAUSE) else {
            return CompletionCause::UNKNOWN;
        };
        let Some(i) = value.find(' ') else {
            return CompletionCause::UNKNOWN;
        };
        value[..i]
            .parse::<i32>()
            .map(CompletionCause)
            .unwrap_or(CompletionCause::UNKNOWN)
    }

    /// Serializes the message. The length written into the start line counts
    /// every byte of the returned frame, itself included, so the value is
    /// found by a short fixed-point iteration over its decimal width.
    pub fn marshal(&self) -> Vec<u8> {
        let mut tail = Vec::with_capacity(256);
        tail.extend_from_slice(b"\r\n");
        for (k, v) in &self.headers {
            tail.extend_from_slice(k.as_bytes());
            tail.extend_from_slice(b": ");
            tail.extend_from_slice(v.as_bytes());
            tail.extend_from_slice(b"\r\n");
        }
        tail.extend_from_slice(b"\r\n");
        tail.extend_from_slice(&self.body);

        let request_id = self.request_id.to_string();
        let fixed = match self.kind {
            MessageKind::Request => 11 + self.name.len() + request_id.len() + tail.len(),
            MessageKind::Response => {
                12 + request_id.len()
                    + decimal_width(self.status_code as usize)
                    + self.request_state.len()
                    + tail.len()
            }
            MessageKind::Event => {
                12 + self.name.len() + request_id.len() + self.request_state.len() + tail.len()
            }
        };
        let total = frame_length(fixed);

        let mut out = Vec::with_capacity(total);
        out.extend_from_slice(b"MRCP/2.0 ");
        out.extend_from_slice(total.to_string().as_bytes());
        out.push(b' ');
        match self.kind {
            MessageKind::Request => {
                out.extend_from_slice(self.name.as_bytes());
                out.push(b' ');
                out.extend_from_slice(request_id.as_bytes());
            }
            MessageKind::Response => {
                out.extend_from_slice(request_id.as_bytes());
                out.push(b' ');
                out.extend_from_slice(self.status_code.to_string().as_bytes());
                out.push(b' ');
                out.extend_from_slice(self.request_state.as_bytes());
            }
            MessageKind::Event => {
                out.extend_from_slice(self.name.as_bytes());
                out.push(b' ');
                out.extend_from_slice(request_id.as_bytes());
                out.push(b' ');
                out.extend_from_slice(self.request_state.as_bytes());
            }
        }
        out.extend_from_slice(&tail);
        out
    }

    /// Parses one complete frame. The caller is responsible for handing in
    /// exactly the bytes the start-line length declared; everything after
    /// the blank line is taken as the body.
    pub fn unmarshal(data: &[u8]) -> Result<Message> {
        let line_end =
            find_crlf(data).ok_or_else(|| Error::Message("missing start line".to_string()))?;
        let mut msg = Message::parse_start_line(&data[..line_end])?;

        let mut pos = line_end + 2;
        loop {
            let Some(rel) = find_crlf(&data[pos..]) else {
                // truncated header block, treat the rest as headers-only
                pos = data.len();
                break;
            };
            let line = &data[pos..pos + rel];
            pos += rel + 2;
            if line.is_empty() {
                break;
            }
            let Some(i) = line.iter().position(|&b| b == b':') else {
                continue;
            };
            let mut value = &line[i + 1..];
            if value.first() == Some(&b' ') {
                value = &value[1..];
            }
            msg.headers.insert(
                String::from_utf8_lossy(&line[..i]).into_owned(),
                String::from_utf8_lossy(value).into_owned(),
            );
        }
        msg.body = data[pos..].to_vec();
        Ok(msg)
    }

    fn parse_start_line(line: &[u8]) -> Result<Message> {
        let line = std::str::from_utf8(line)
            .map_err(|_| Error::Message("start line is not valid UTF-8".to_string()))?;
        let fields: Vec<&str> = line.split(' ').collect();
        if fields.len() != 4 && fields.len() != 5 {
            return Err(Error::Message(format!("invalid start line: {line}")));
        }

        fields[1]
            .parse::<usize>()
            .map_err(|_| Error::Message(format!("invalid message length: {}", fields[1])))?;

        match fields[2].parse::<u32>() {
            Ok(request_id) => {
                if fields.len() != 5 {
                    return Err(Error::Message(format!("invalid start line: {line}")));
                }
                let status_code = fields[3]
                    .parse::<u16>()
                    .map_err(|_| Error::Message(format!("invalid status code: {}", fields[3])))?;
                Ok(Message::new_response(request_id, status_code, fields[4]))
            }
            Err(_) => {
                // request or event, the third field is a name
                let request_id = fields[3]
                    .parse::<u32>()
                    .map_err(|_| Error::Message(format!("invalid request id: {}", fields[3])))?;
                if fields.len() == 5 {
                    Ok(Message::new_event(fields[2], request_id, fields[4]))
                } else {
                    Ok(Message::new_request(fields[2], request_id))
                }
            }
        }
    }
}

fn find_crlf(data: &[u8]) -> Option<usize> {
    data.windows(2).position(|w| w == b"\r\n")
}

fn decimal_width(mut n: usize) -> usize {
    let mut w = 1;
    while n >= 10 {
        n /= 10;
        w += 1;
    }
    w
}

// The frame length appears inside the frame, so adding its own digits may
// grow the digit count once more; iterate until stable.
fn frame_length(fixed: usize) -> usize {
    let mut width = 1;
    loop {
        let total = fixed + width;
        let w = decimal_width(total);
        if w == width {
            return total;
        }
        width = w;
    }
}
