//! Message envelope.
//!
//! The engine treats message content as opaque bytes: the body is whatever
//! the application encoded into it (JSON in most of the examples). The
//! envelope only adds a format version so the decoder can reject garbage.

use crate::error::{EngineError, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};

const FORMAT_VERSION: u8 = 1;

/// A single message: an opaque body behind a versioned envelope.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    body: Bytes,
}

impl Message {
    #[must_use]
    pub const fn new() -> Self {
        Self { body: Bytes::new() }
    }

    /// Create a message from a body.
    pub fn with_body(body: impl Into<Bytes>) -> Self {
        Self { body: body.into() }
    }

    #[must_use]
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Encode the message for transmission.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(5 + self.body.len());
        buf.put_u8(FORMAT_VERSION);
        buf.put_u32(self.body.len() as u32);
        buf.extend_from_slice(&self.body);
        buf.freeze()
    }

    /// Decode a message from delivery payload bytes.
    pub fn decode(mut raw: Bytes) -> Result<Self> {
        if raw.remaining() < 5 {
            return Err(EngineError::MessageFormat("truncated envelope"));
        }
        let version = raw.get_u8();
        if version != FORMAT_VERSION {
            return Err(EngineError::MessageFormat("unknown format version"));
        }
        let len = raw.get_u32() as usize;
        if raw.remaining() < len {
            return Err(EngineError::MessageFormat("truncated body"));
        }
        let body = raw.split_to(len);
        if raw.has_remaining() {
            return Err(EngineError::MessageFormat("trailing bytes"));
        }
        Ok(Self { body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode() {
        let msg = Message::with_body(&b"{\"sequence\":0}"[..]);
        let decoded = Message::decode(msg.encode()).unwrap();
        assert_eq!(decoded.body(), msg.body());
    }

    #[test]
    fn test_decode_rejects_bad_version() {
        let mut buf = BytesMut::new();
        buf.put_u8(9);
        buf.put_u32(0);
        assert!(Message::decode(buf.freeze()).is_err());
    }

    #[test]
    fn test_decode_rejects_truncated() {
        let msg = Message::with_body(&b"abcdef"[..]);
        let enc = msg.encode();
        assert!(Message::decode(enc.slice(..enc.len() - 1)).is_err());
    }
}
