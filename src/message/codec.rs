use super::Message;
use crate::Error;
use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

const START_LINE_PREFIX: &[u8] = b"MRCP/2.0 ";
// prefix plus the widest length field we would ever accept
const MAX_LENGTH_FIELD_END: usize = 32;
const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Length-prefixed MRCPv2 frame codec.
///
/// The start line carries the byte count of the whole frame; the decoder
/// waits for the space terminating the length field before trusting it, so
/// short reads never truncate the digits. Errors split in two classes:
/// [`Error::StartLine`] means the stream is unframeable and the connection
/// reader must stop, [`Error::Message`] means one frame with a valid length
/// failed to parse and was discarded, the stream position is still sound.
pub(crate) struct MrcpCodec;

impl Decoder for MrcpCodec {
    type Item = Message;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> crate::Result<Option<Message>> {
        if src.len() < START_LINE_PREFIX.len() + 2 {
            return Ok(None);
        }
        if !src.starts_with(START_LINE_PREFIX) {
            let shown = src.len().min(20);
            return Err(Error::StartLine(
                String::from_utf8_lossy(&src[..shown]).into_owned(),
            ));
        }

        let digits = &src[START_LINE_PREFIX.len()..];
        let Some(i) = digits.iter().position(|&b| b == b' ') else {
            if src.len() > MAX_LENGTH_FIELD_END {
                return Err(Error::StartLine(
                    "message length field not terminated".to_string(),
                ));
            }
            return Ok(None);
        };
        let length = std::str::from_utf8(&digits[..i])
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .ok_or_else(|| {
                Error::StartLine(format!(
                    "invalid message length: {}",
                    String::from_utf8_lossy(&digits[..i])
                ))
            })?;
        if length <= START_LINE_PREFIX.len() || length > MAX_FRAME_SIZE {
            return Err(Error::StartLine(format!(
                "unreasonable message length: {length}"
            )));
        }

        if src.len() < length {
            src.reserve(length - src.len());
            return Ok(None);
        }

        let frame = src.split_to(length);
        Message::unmarshal(&frame).map(Some)
    }
}

impl Encoder<&Message> for MrcpCodec {
    type Error = Error;

    fn encode(&mut self, msg: &Message, dst: &mut BytesMut) -> crate::Result<()> {
        dst.extend_from_slice(&msg.marshal());
        Ok(())
    }
}
