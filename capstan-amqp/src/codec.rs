//! Wire framing for the capstan peer protocol.
//!
//! This is deliberately *not* AMQP 1.0 framing. The engine keeps AMQP's
//! endpoint and delivery semantics but speaks a compact private format
//! between capstan peers:
//!
//! - an 8-byte protocol header exchanged once per direction,
//! - then frames of `u32` big-endian body length followed by the body,
//! - each body starting with a 1-byte opcode.
//!
//! Strings are `u16`-length-prefixed UTF-8, delivery tags are `u8`-length
//! byte strings, payloads are `u32`-length byte strings.

use crate::delivery::Disposition;
use crate::endpoint::{Condition, Terminus};
use crate::error::{EngineError, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Protocol header: magic, version, three reserved bytes.
pub const HEADER: [u8; 8] = *b"CAPS\x01\x00\x00\x00";

/// Maximum accepted frame body size.
pub const MAX_FRAME: usize = 1024 * 1024;

const OP_AUTH: u8 = 0x10;
const OP_OPEN: u8 = 0x01;
const OP_BEGIN: u8 = 0x02;
const OP_ATTACH: u8 = 0x03;
const OP_FLOW: u8 = 0x04;
const OP_TRANSFER: u8 = 0x05;
const OP_DISPOSITION: u8 = 0x06;
const OP_DETACH: u8 = 0x07;
const OP_END: u8 = 0x08;
const OP_CLOSE: u8 = 0x09;

/// Sending or receiving end of a link, from the frame issuer's perspective.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Sender,
    Receiver,
}

/// A decoded protocol frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Auth {
        mechanism: String,
        user: String,
        password: String,
    },
    Open {
        hostname: Option<String>,
    },
    Begin {
        channel: u16,
    },
    Attach {
        channel: u16,
        handle: u32,
        name: String,
        role: Role,
        source: Terminus,
        target: Terminus,
    },
    Flow {
        channel: u16,
        handle: u32,
        delivery_count: u32,
        credit: u32,
        available: u32,
        drain: bool,
    },
    Transfer {
        channel: u16,
        handle: u32,
        tag: Bytes,
        more: bool,
        settled: bool,
        payload: Bytes,
    },
    Disposition {
        channel: u16,
        handle: u32,
        tag: Bytes,
        state: Option<Disposition>,
        settled: bool,
    },
    Detach {
        channel: u16,
        handle: u32,
        condition: Option<Condition>,
    },
    End {
        channel: u16,
        condition: Option<Condition>,
    },
    Close {
        condition: Option<Condition>,
    },
}

impl Frame {
    /// Encode the frame, including its length prefix, into `dst`.
    pub fn encode(&self, dst: &mut BytesMut) {
        let mut body = BytesMut::with_capacity(64);
        self.encode_body(&mut body);
        dst.put_u32(body.len() as u32);
        dst.extend_from_slice(&body);
    }

    fn encode_body(&self, b: &mut BytesMut) {
        match self {
            Frame::Auth {
                mechanism,
                user,
                password,
            } => {
                b.put_u8(OP_AUTH);
                put_str(b, mechanism);
                put_str(b, user);
                put_str(b, password);
            }
            Frame::Open { hostname } => {
                b.put_u8(OP_OPEN);
                put_opt_str(b, hostname.as_deref());
            }
            Frame::Begin { channel } => {
                b.put_u8(OP_BEGIN);
                b.put_u16(*channel);
            }
            Frame::Attach {
                channel,
                handle,
                name,
                role,
                source,
                target,
            } => {
                b.put_u8(OP_ATTACH);
                b.put_u16(*channel);
                b.put_u32(*handle);
                put_str(b, name);
                b.put_u8(match role {
                    Role::Sender => 0,
                    Role::Receiver => 1,
                });
                put_terminus(b, source);
                put_terminus(b, target);
            }
            Frame::Flow {
                channel,
                handle,
                delivery_count,
                credit,
                available,
                drain,
            } => {
                b.put_u8(OP_FLOW);
                b.put_u16(*channel);
                b.put_u32(*handle);
                b.put_u32(*delivery_count);
                b.put_u32(*credit);
                b.put_u32(*available);
                b.put_u8(u8::from(*drain));
            }
            Frame::Transfer {
                channel,
                handle,
                tag,
                more,
                settled,
                payload,
            } => {
                b.put_u8(OP_TRANSFER);
                b.put_u16(*channel);
                b.put_u32(*handle);
                put_tag(b, tag);
                b.put_u8(u8::from(*more));
                b.put_u8(u8::from(*settled));
                b.put_u32(payload.len() as u32);
                b.extend_from_slice(payload);
            }
            Frame::Disposition {
                channel,
                handle,
                tag,
                state,
                settled,
            } => {
                b.put_u8(OP_DISPOSITION);
                b.put_u16(*channel);
                b.put_u32(*handle);
                put_tag(b, tag);
                b.put_u8(encode_state(*state));
                b.put_u8(u8::from(*settled));
            }
            Frame::Detach {
                channel,
                handle,
                condition,
            } => {
                b.put_u8(OP_DETACH);
                b.put_u16(*channel);
                b.put_u32(*handle);
                put_condition(b, condition.as_ref());
            }
            Frame::End { channel, condition } => {
                b.put_u8(OP_END);
                b.put_u16(*channel);
                put_condition(b, condition.as_ref());
            }
            Frame::Close { condition } => {
                b.put_u8(OP_CLOSE);
                put_condition(b, condition.as_ref());
            }
        }
    }

    /// Decode one frame body (without the length prefix).
    pub fn decode(mut body: Bytes) -> Result<Frame> {
        let op = get_u8(&mut body)?;
        let frame = match op {
            OP_AUTH => Frame::Auth {
                mechanism: get_str(&mut body)?,
                user: get_str(&mut body)?,
                password: get_str(&mut body)?,
            },
            OP_OPEN => Frame::Open {
                hostname: get_opt_str(&mut body)?,
            },
            OP_BEGIN => Frame::Begin {
                channel: get_u16(&mut body)?,
            },
            OP_ATTACH => Frame::Attach {
                channel: get_u16(&mut body)?,
                handle: get_u32(&mut body)?,
                name: get_str(&mut body)?,
                role: match get_u8(&mut body)? {
                    0 => Role::Sender,
                    1 => Role::Receiver,
                    _ => return Err(EngineError::Malformed("bad role")),
                },
                source: get_terminus(&mut body)?,
                target: get_terminus(&mut body)?,
            },
            OP_FLOW => Frame::Flow {
                channel: get_u16(&mut body)?,
                handle: get_u32(&mut body)?,
                delivery_count: get_u32(&mut body)?,
                credit: get_u32(&mut body)?,
                available: get_u32(&mut body)?,
                drain: get_u8(&mut body)? != 0,
            },
            OP_TRANSFER => {
                let channel = get_u16(&mut body)?;
                let handle = get_u32(&mut body)?;
                let tag = get_tag(&mut body)?;
                let more = get_u8(&mut body)? != 0;
                let settled = get_u8(&mut body)? != 0;
                let len = get_u32(&mut body)? as usize;
                if body.remaining() < len {
                    return Err(EngineError::Malformed("short payload"));
                }
                let payload = body.split_to(len);
                Frame::Transfer {
                    channel,
                    handle,
                    tag,
                    more,
                    settled,
                    payload,
                }
            }
            OP_DISPOSITION => Frame::Disposition {
                channel: get_u16(&mut body)?,
                handle: get_u32(&mut body)?,
                tag: get_tag(&mut body)?,
                state: decode_state(get_u8(&mut body)?)?,
                settled: get_u8(&mut body)? != 0,
            },
            OP_DETACH => Frame::Detach {
                channel: get_u16(&mut body)?,
                handle: get_u32(&mut body)?,
                condition: get_condition(&mut body)?,
            },
            OP_END => Frame::End {
                channel: get_u16(&mut body)?,
                condition: get_condition(&mut body)?,
            },
            OP_CLOSE => Frame::Close {
                condition: get_condition(&mut body)?,
            },
            _ => return Err(EngineError::Malformed("unknown opcode")),
        };
        if body.has_remaining() {
            return Err(EngineError::Malformed("trailing bytes"));
        }
        Ok(frame)
    }
}

/// Stateful frame decoder.
///
/// Feed it the undecoded inbound buffer; it yields complete frames as they
/// become available and remembers a parsed length across calls while the
/// body is still in flight.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    expected: Option<usize>,
}

impl FrameDecoder {
    #[must_use]
    pub const fn new() -> Self {
        Self { expected: None }
    }

    /// Decode a single frame from `src`, consuming the bytes it uses.
    ///
    /// Returns:
    /// - `Ok(Some(frame))` - frame decoded
    /// - `Ok(None)` - need more data
    /// - `Err` - protocol violation
    pub fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        let expected = match self.expected {
            Some(n) => n,
            None => {
                if src.len() < 4 {
                    return Ok(None);
                }
                let size = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
                if size > MAX_FRAME {
                    return Err(EngineError::FrameTooLarge {
                        size,
                        max: MAX_FRAME,
                    });
                }
                if size == 0 {
                    return Err(EngineError::Malformed("empty frame"));
                }
                src.advance(4);
                self.expected = Some(size);
                size
            }
        };

        if src.len() < expected {
            return Ok(None);
        }
        let body = src.split_to(expected).freeze();
        self.expected = None;
        Frame::decode(body).map(Some)
    }
}

fn encode_state(state: Option<Disposition>) -> u8 {
    match state {
        None => 0,
        Some(Disposition::Accepted) => 1,
        Some(Disposition::Rejected) => 2,
        Some(Disposition::Released) => 3,
        Some(Disposition::Modified) => 4,
    }
}

fn decode_state(raw: u8) -> Result<Option<Disposition>> {
    Ok(match raw {
        0 => None,
        1 => Some(Disposition::Accepted),
        2 => Some(Disposition::Rejected),
        3 => Some(Disposition::Released),
        4 => Some(Disposition::Modified),
        _ => return Err(EngineError::Malformed("bad disposition state")),
    })
}

fn put_str(b: &mut BytesMut, s: &str) {
    b.put_u16(s.len() as u16);
    b.extend_from_slice(s.as_bytes());
}

fn put_opt_str(b: &mut BytesMut, s: Option<&str>) {
    match s {
        Some(s) => {
            b.put_u8(1);
            put_str(b, s);
        }
        None => b.put_u8(0),
    }
}

fn put_tag(b: &mut BytesMut, tag: &Bytes) {
    b.put_u8(tag.len() as u8);
    b.extend_from_slice(tag);
}

fn put_terminus(b: &mut BytesMut, t: &Terminus) {
    put_opt_str(b, t.address());
    b.put_u8(u8::from(t.is_dynamic()));
}

fn put_condition(b: &mut BytesMut, c: Option<&Condition>) {
    match c {
        Some(c) => {
            b.put_u8(1);
            put_str(b, c.name());
            put_str(b, c.description());
        }
        None => b.put_u8(0),
    }
}

fn get_u8(b: &mut Bytes) -> Result<u8> {
    if b.remaining() < 1 {
        return Err(EngineError::Malformed("truncated frame"));
    }
    Ok(b.get_u8())
}

fn get_u16(b: &mut Bytes) -> Result<u16> {
    if b.remaining() < 2 {
        return Err(EngineError::Malformed("truncated frame"));
    }
    Ok(b.get_u16())
}

fn get_u32(b: &mut Bytes) -> Result<u32> {
    if b.remaining() < 4 {
        return Err(EngineError::Malformed("truncated frame"));
    }
    Ok(b.get_u32())
}

fn get_str(b: &mut Bytes) -> Result<String> {
    let len = get_u16(b)? as usize;
    if b.remaining() < len {
        return Err(EngineError::Malformed("truncated string"));
    }
    let raw = b.split_to(len);
    String::from_utf8(raw.to_vec()).map_err(|_| EngineError::Malformed("invalid utf-8"))
}

fn get_opt_str(b: &mut Bytes) -> Result<Option<String>> {
    match get_u8(b)? {
        0 => Ok(None),
        1 => get_str(b).map(Some),
        _ => Err(EngineError::Malformed("bad option marker")),
    }
}

fn get_tag(b: &mut Bytes) -> Result<Bytes> {
    let len = get_u8(b)? as usize;
    if b.remaining() < len {
        return Err(EngineError::Malformed("truncated tag"));
    }
    Ok(b.split_to(len))
}

fn get_terminus(b: &mut Bytes) -> Result<Terminus> {
    let address = get_opt_str(b)?;
    let dynamic = get_u8(b)? != 0;
    let mut t = Terminus::default();
    t.set_address(address.as_deref());
    t.set_dynamic(dynamic);
    Ok(t)
}

fn get_condition(b: &mut Bytes) -> Result<Option<Condition>> {
    match get_u8(b)? {
        0 => Ok(None),
        1 => {
            let name = get_str(b)?;
            let description = get_str(b)?;
            Ok(Some(Condition::new(name, description)))
        }
        _ => Err(EngineError::Malformed("bad option marker")),
    }
}
