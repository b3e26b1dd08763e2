//! AODV control messages and their fixed big-endian wire layouts.
//!
//! | Message | Type | Size | Layout |
//! |---|---|---|---|
//! | RREQ | `0x01` | 32 | type, flags, 0, hops, request id, dest, dest seq, orig, orig seq |
//! | RREP | `0x02` | 28 | type, flags, 0, hops, dest, dest seq, orig, orig seq |
//! | RERR | `0x03` | 20 | type, 0, 0, dest count, dest, orig |

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::CoreError;
use crate::types::Address;

pub const RREQ_TYPE: u8 = 0x01;
pub const RREP_TYPE: u8 = 0x02;
pub const RERR_TYPE: u8 = 0x03;

pub const RREQ_LEN: usize = 32;
pub const RREP_LEN: usize = 28;
pub const RERR_LEN: usize = 20;

const FLAG_DESTINATION_ONLY: u8 = 0x80;
const FLAG_GRATUITOUS_REPLY: u8 = 0x40;
const FLAG_ACK_REQUIRED: u8 = 0x80;

/// A route request, flooded to discover a destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteRequest {
    pub hop_count: u8,
    pub request_id: u32,
    pub destination: Address,
    pub destination_seq: u32,
    pub originator: Address,
    pub originator_seq: u32,
    pub destination_only: bool,
    pub gratuitous_reply: bool,
}

impl RouteRequest {
    /// Count one more hop; saturates rather than wrapping on the wire.
    pub fn increment_hop_count(&mut self) -> u8 {
        self.hop_count = self.hop_count.saturating_add(1);
        self.hop_count
    }
}

/// A route reply, unicast back along the reverse route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteReply {
    pub hop_count: u8,
    pub destination: Address,
    pub destination_seq: u32,
    pub originator: Address,
    pub originator_seq: u32,
    pub ack_required: bool,
}

impl RouteReply {
    /// Build the reply a destination sends for `request`.
    pub fn answering(request: &RouteRequest, destination_seq: u32) -> Self {
        Self {
            hop_count: 0,
            destination: request.destination,
            destination_seq,
            originator: request.originator,
            originator_seq: request.originator_seq,
            ack_required: false,
        }
    }

    pub fn increment_hop_count(&mut self) -> u8 {
        self.hop_count = self.hop_count.saturating_add(1);
        self.hop_count
    }
}

/// A route error, sent toward an originator whose route broke.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteErrorMessage {
    pub destination_count: u8,
    pub destination: Address,
    pub originator: Address,
}

impl RouteErrorMessage {
    pub fn new(originator: Address, destination: Address) -> Self {
        Self {
            destination_count: 1,
            destination,
            originator,
        }
    }
}

/// Any AODV control message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AodvMessage {
    Request(RouteRequest),
    Reply(RouteReply),
    Error(RouteErrorMessage),
}

impl AodvMessage {
    /// The wire type byte.
    pub fn message_type(&self) -> u8 {
        match self {
            Self::Request(_) => RREQ_TYPE,
            Self::Reply(_) => RREP_TYPE,
            Self::Error(_) => RERR_TYPE,
        }
    }

    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Request(_) => "RREQ",
            Self::Reply(_) => "RREP",
            Self::Error(_) => "RERR",
        }
    }

    /// Encode into the fixed wire layout.
    pub fn encode(&self) -> Bytes {
        match self {
            Self::Request(m) => {
                let mut buf = BytesMut::with_capacity(RREQ_LEN);
                let mut flags = 0u8;
                if m.destination_only {
                    flags |= FLAG_DESTINATION_ONLY;
                }
                if m.gratuitous_reply {
                    flags |= FLAG_GRATUITOUS_REPLY;
                }
                buf.put_u8(RREQ_TYPE);
                buf.put_u8(flags);
                buf.put_u8(0);
                buf.put_u8(m.hop_count);
                buf.put_u32(m.request_id);
                buf.put_u64(m.destination.as_u64());
                buf.put_u32(m.destination_seq);
                buf.put_u64(m.originator.as_u64());
                buf.put_u32(m.originator_seq);
                buf.freeze()
            }
            Self::Reply(m) => {
                let mut buf = BytesMut::with_capacity(RREP_LEN);
                buf.put_u8(RREP_TYPE);
                buf.put_u8(if m.ack_required { FLAG_ACK_REQUIRED } else { 0 });
                buf.put_u8(0);
                buf.put_u8(m.hop_count);
                buf.put_u64(m.destination.as_u64());
                buf.put_u32(m.destination_seq);
                buf.put_u64(m.originator.as_u64());
                buf.put_u32(m.originator_seq);
                buf.freeze()
            }
            Self::Error(m) => {
                let mut buf = BytesMut::with_capacity(RERR_LEN);
                buf.put_u8(RERR_TYPE);
                buf.put_u8(0);
                buf.put_u8(0);
                buf.put_u8(m.destination_count);
                buf.put_u64(m.destination.as_u64());
                buf.put_u64(m.originator.as_u64());
                buf.freeze()
            }
        }
    }

    /// Decode a frame payload. Trailing bytes beyond the fixed layout are ignored.
    pub fn decode(frame: &[u8]) -> Result<Self, CoreError> {
        let message_type = *frame.first().ok_or(CoreError::EmptyFrame)?;
        match message_type {
            RREQ_TYPE => {
                let mut buf = Self::checked(frame, "RREQ", RREQ_LEN)?;
                buf.advance(1);
                let flags = buf.get_u8();
                buf.advance(1);
                Ok(Self::Request(RouteRequest {
                    hop_count: buf.get_u8(),
                    request_id: buf.get_u32(),
                    destination: Address(buf.get_u64()),
                    destination_seq: buf.get_u32(),
                    originator: Address(buf.get_u64()),
                    originator_seq: buf.get_u32(),
                    destination_only: flags & FLAG_DESTINATION_ONLY != 0,
                    gratuitous_reply: flags & FLAG_GRATUITOUS_REPLY != 0,
                }))
            }
            RREP_TYPE => {
                let mut buf = Self::checked(frame, "RREP", RREP_LEN)?;
                buf.advance(1);
                let flags = buf.get_u8();
                buf.advance(1);
                Ok(Self::Reply(RouteReply {
                    hop_count: buf.get_u8(),
                    destination: Address(buf.get_u64()),
                    destination_seq: buf.get_u32(),
                    originator: Address(buf.get_u64()),
                    originator_seq: buf.get_u32(),
                    ack_required: flags & FLAG_ACK_REQUIRED != 0,
                }))
            }
            RERR_TYPE => {
                let mut buf = Self::checked(frame, "RERR", RERR_LEN)?;
                buf.advance(3);
                Ok(Self::Error(RouteErrorMessage {
                    destination_count: buf.get_u8(),
                    destination: Address(buf.get_u64()),
                    originator: Address(buf.get_u64()),
                }))
            }
            other => Err(CoreError::UnknownMessageType(other)),
        }
    }

    fn checked<'a>(
        frame: &'a [u8],
        kind: &'static str,
        expected: usize,
    ) -> Result<&'a [u8], CoreError> {
        if frame.len() < expected {
            return Err(CoreError::FrameTooShort {
                kind,
                expected,
                actual: frame.len(),
            });
        }
        Ok(&frame[..expected])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_request() -> RouteRequest {
        RouteRequest {
            hop_count: 3,
            request_id: 0x0102_0304,
            destination: Address(0x0013_A200),
            destination_seq: 7,
            originator: Address(0x0013_A2FF),
            originator_seq: 9,
            destination_only: true,
            gratuitous_reply: false,
        }
    }

    #[test]
    fn test_rreq_wire_layout() {
        let frame = AodvMessage::Request(make_request()).encode();
        assert_eq!(frame.len(), RREQ_LEN);
        assert_eq!(frame[0], RREQ_TYPE);
        assert_eq!(frame[1], 0x80);
        assert_eq!(frame[3], 3);
        assert_eq!(&frame[4..8], &[1, 2, 3, 4]);
        assert_eq!(&frame[8..16], &0x0013_A200u64.to_be_bytes());
        assert_eq!(&frame[20..28], &0x0013_A2FFu64.to_be_bytes());

        let decoded = AodvMessage::decode(&frame).unwrap();
        assert_eq!(decoded, AodvMessage::Request(make_request()));
    }

    #[test]
    fn test_rrep_answering_request() {
        let request = make_request();
        let reply = RouteReply::answering(&request, 12);
        assert_eq!(reply.hop_count, 0);
        assert_eq!(reply.destination, request.destination);
        assert_eq!(reply.originator, request.originator);

        let frame = AodvMessage::Reply(reply).encode();
        assert_eq!(frame.len(), RREP_LEN);
        assert_eq!(&frame[12..16], &12u32.to_be_bytes());
        assert_eq!(AodvMessage::decode(&frame).unwrap(), AodvMessage::Reply(reply));
    }

    #[test]
    fn test_rerr_wire_layout() {
        let rerr = RouteErrorMessage::new(Address(0xAA), Address(0xBB));
        let frame = AodvMessage::Error(rerr).encode();
        assert_eq!(frame.len(), RERR_LEN);
        assert_eq!(frame[3], 1);
        assert_eq!(&frame[4..12], &0xBBu64.to_be_bytes());
        assert_eq!(&frame[12..20], &0xAAu64.to_be_bytes());
    }

    #[test]
    fn test_decode_rejects_short_and_unknown_frames() {
        assert_eq!(AodvMessage::decode(&[]), Err(CoreError::EmptyFrame));
        assert_eq!(
            AodvMessage::decode(&[RREP_TYPE, 0, 0]),
            Err(CoreError::FrameTooShort {
                kind: "RREP",
                expected: RREP_LEN,
                actual: 3
            })
        );
        assert_eq!(
            AodvMessage::decode(&[0x41; 40]),
            Err(CoreError::UnknownMessageType(0x41))
        );
    }

    #[test]
    fn test_hop_count_saturates() {
        let mut request = make_request();
        request.hop_count = u8::MAX;
        assert_eq!(request.increment_hop_count(), u8::MAX);
    }
}
