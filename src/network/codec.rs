//! Message framing
//!
//! Every message travels as `[type: u8][length: u32 BE][payload]`. The
//! codec plugs into `tokio_util::codec::Framed`, so peer tasks read and
//! write whole [`Message`]s.
//!
//! While a handshake is in progress the codec can be told which message
//! kind must come next. A frame of any other kind is rejected from its type
//! byte, before the length is trusted or the payload parsed.

use crate::network::message::{Message, MsgType, MAX_MESSAGE_SIZE, PROTOCOL_VERSION};
use crate::ser::WireError;
use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Type byte plus length prefix
pub const FRAME_HEADER_SIZE: usize = 5;

/// Length-prefixed binary framing
#[derive(Debug, Clone, Copy)]
pub struct MessageCodec {
    /// Version that `hand`/`shake` payloads must carry
    version: u32,
    max_size: usize,
    /// Only this kind is accepted while set
    expected: Option<MsgType>,
}

impl MessageCodec {
    pub fn new(version: u32) -> Self {
        Self {
            version,
            max_size: MAX_MESSAGE_SIZE,
            expected: None,
        }
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// Restrict the next frames to one message kind, or lift the restriction
    pub fn expect(&mut self, expected: Option<MsgType>) {
        self.expected = expected;
    }

    pub fn expected(&self) -> Option<MsgType> {
        self.expected
    }

    fn declared_len(src: &BytesMut) -> usize {
        u32::from_be_bytes([src[1], src[2], src[3], src[4]]) as usize
    }
}

impl Default for MessageCodec {
    fn default() -> Self {
        Self::new(PROTOCOL_VERSION)
    }
}

impl Encoder<Message> for MessageCodec {
    type Error = WireError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        item.check_limits()?;

        let mut payload = BytesMut::new();
        item.write_payload(&mut payload);

        if payload.len() > self.max_size {
            return Err(WireError::Oversized {
                len: payload.len(),
                max: self.max_size,
            });
        }

        // Type (1) + Length (4) + Payload
        dst.reserve(FRAME_HEADER_SIZE + payload.len());
        dst.put_u8(item.msg_type() as u8);
        dst.put_u32(payload.len() as u32);
        dst.extend_from_slice(&payload);

        Ok(())
    }
}

impl Decoder for MessageCodec {
    type Item = Message;
    type Error = WireError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // Need at least header
        if src.len() < FRAME_HEADER_SIZE {
            return Ok(None);
        }

        let msg_type = MsgType::try_from(src[0])?;
        if let Some(expected) = self.expected {
            if msg_type != expected {
                return Err(WireError::UnexpectedMessageType {
                    expected: expected as u8,
                    got: msg_type as u8,
                });
            }
        }

        let len = Self::declared_len(src);
        if len > self.max_size {
            return Err(WireError::Oversized {
                len,
                max: self.max_size,
            });
        }

        // Check if we have full message
        if src.len() < FRAME_HEADER_SIZE + len {
            src.reserve(FRAME_HEADER_SIZE + len - src.len());
            return Ok(None);
        }

        src.advance(FRAME_HEADER_SIZE);
        let payload = src.split_to(len).freeze();

        Message::read_payload(msg_type, payload, self.version).map(Some)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(msg) = self.decode(src)? {
            return Ok(Some(msg));
        }
        if src.is_empty() {
            return Ok(None);
        }

        // Connection closed in the middle of a frame
        let needed = if src.len() < FRAME_HEADER_SIZE {
            FRAME_HEADER_SIZE - src.len()
        } else {
            FRAME_HEADER_SIZE + Self::declared_len(src) - src.len()
        };
        Err(WireError::Truncated { needed })
    }
}
