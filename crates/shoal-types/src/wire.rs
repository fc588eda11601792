//! Packed wire format for events and member records.
//!
//! Every queue znode carries one encoded event; every member znode carries
//! one encoded member record. Layout (little-endian, no padding):
//!
//! ```text
//! event:  u32 kind | member sender | u32 join_result | u64 buf_len | buf
//! member: u16 id_len | id bytes (UTF-8) | u64 session | u8 joined
//! ```

use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;

use crate::event::{Event, EventKind, JoinResult};
use crate::node::{InvalidNodeId, Member, NodeId};

/// Hard cap on the opaque payload carried by a single event.
pub const MAX_EVENT_BUF_SIZE: usize = 4096;

/// Decoding or encoding failure for the packed formats.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    #[error("record truncated")]
    Truncated,
    #[error("payload of {len} bytes exceeds the {max}-byte event buffer cap")]
    PayloadTooLarge { len: usize, max: usize },
    #[error("unknown event kind {0}")]
    UnknownEventKind(u32),
    #[error("unknown join result {0}")]
    UnknownJoinResult(u32),
    #[error("node id is not valid UTF-8")]
    NodeIdEncoding,
    #[error(transparent)]
    NodeId(#[from] InvalidNodeId),
}

impl Member {
    pub fn encoded_len(&self) -> usize {
        2 + self.node.as_str().len() + 8 + 1
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        let id = self.node.as_str().as_bytes();
        buf.put_u16_le(id.len() as u16);
        buf.put_slice(id);
        buf.put_u64_le(self.session);
        buf.put_u8(self.joined as u8);
    }

    pub fn decode(buf: &mut impl Buf) -> Result<Member, WireError> {
        if buf.remaining() < 2 {
            return Err(WireError::Truncated);
        }
        let id_len = buf.get_u16_le() as usize;
        if buf.remaining() < id_len + 8 + 1 {
            return Err(WireError::Truncated);
        }
        let mut id = vec![0u8; id_len];
        buf.copy_to_slice(&mut id);
        let id = String::from_utf8(id).map_err(|_| WireError::NodeIdEncoding)?;
        let node = NodeId::new(id)?;
        let session = buf.get_u64_le();
        let joined = buf.get_u8() != 0;
        Ok(Member {
            node,
            session,
            joined,
        })
    }

    pub fn encode_vec(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode(&mut buf);
        buf.to_vec()
    }

    pub fn decode_vec(mut data: &[u8]) -> Result<Member, WireError> {
        Member::decode(&mut data)
    }
}

impl Event {
    pub fn encoded_len(&self) -> usize {
        4 + self.sender.encoded_len() + 4 + 8 + self.payload.len()
    }

    pub fn encode(&self, buf: &mut BytesMut) -> Result<(), WireError> {
        if self.payload.len() > MAX_EVENT_BUF_SIZE {
            return Err(WireError::PayloadTooLarge {
                len: self.payload.len(),
                max: MAX_EVENT_BUF_SIZE,
            });
        }
        buf.put_u32_le(self.kind.to_wire());
        self.sender.encode(buf);
        buf.put_u32_le(self.join_result.to_wire());
        buf.put_u64_le(self.payload.len() as u64);
        buf.put_slice(&self.payload);
        Ok(())
    }

    pub fn decode(buf: &mut impl Buf) -> Result<Event, WireError> {
        if buf.remaining() < 4 {
            return Err(WireError::Truncated);
        }
        let raw_kind = buf.get_u32_le();
        let kind = EventKind::from_wire(raw_kind).ok_or(WireError::UnknownEventKind(raw_kind))?;
        let sender = Member::decode(buf)?;
        if buf.remaining() < 4 + 8 {
            return Err(WireError::Truncated);
        }
        let raw_result = buf.get_u32_le();
        let join_result =
            JoinResult::from_wire(raw_result).ok_or(WireError::UnknownJoinResult(raw_result))?;
        let buf_len = buf.get_u64_le();
        if buf_len > MAX_EVENT_BUF_SIZE as u64 {
            return Err(WireError::PayloadTooLarge {
                len: buf_len as usize,
                max: MAX_EVENT_BUF_SIZE,
            });
        }
        let buf_len = buf_len as usize;
        if buf.remaining() < buf_len {
            return Err(WireError::Truncated);
        }
        let mut payload = vec![0u8; buf_len];
        buf.copy_to_slice(&mut payload);
        Ok(Event {
            kind,
            sender,
            join_result,
            payload,
        })
    }

    pub fn encode_vec(&self) -> Result<Vec<u8>, WireError> {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode(&mut buf)?;
        Ok(buf.to_vec())
    }

    pub fn decode_vec(mut data: &[u8]) -> Result<Event, WireError> {
        Event::decode(&mut data)
    }
}
