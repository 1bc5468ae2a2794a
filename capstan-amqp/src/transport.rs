//! Transport: the byte-oriented surface between a connection and a socket.
//!
//! The owner of the socket pushes received bytes in with `push` and pulls
//! bytes to send with `pending`/`peek`/`pop`. Sign conventions follow the
//! classic engine contract: `capacity()` and `pending()` return `-1` once
//! their direction has reached end of stream.
//!
//! Binding replays the connection's local state into the outbound queue;
//! unbinding (after a disconnect) resets every remote half so the connection
//! can be bound to a fresh transport and greet a new peer.

use crate::codec::{Frame, FrameDecoder, HEADER};
use crate::connection::Connection;
use crate::error::{EngineError, Result};
use bytes::{Buf, Bytes, BytesMut};
use tracing::{debug, warn};

/// How many undecoded inbound bytes the transport is willing to buffer.
const READ_WINDOW: usize = 64 * 1024;

/// SASL configuration for the client side of a transport.
#[derive(Debug, Default)]
pub struct Sasl {
    pub(crate) plain: Option<(String, String)>,
}

impl Sasl {
    /// Use PLAIN authentication with the given credentials.
    pub fn plain(&mut self, user: &str, password: &str) {
        self.plain = Some((user.to_owned(), password.to_owned()));
    }
}

/// A transport bound to at most one connection.
#[derive(Debug, Default)]
pub struct Transport {
    bound: Option<Connection>,
    out: BytesMut,
    inq: BytesMut,
    decoder: FrameDecoder,
    sasl: Sasl,
    header_sent: bool,
    header_received: bool,
    input_closed: bool,
    input_error: bool,
    close_encoded: bool,
}

impl Transport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `connection` to this transport and replay its local state.
    pub fn bind(&mut self, connection: &Connection) {
        connection.replay_frames();
        self.bound = Some(connection.clone());
    }

    /// Detach from the connection, resetting its remote state so it can be
    /// rebound elsewhere.
    pub fn unbind(&mut self) {
        if let Some(connection) = self.bound.take() {
            connection.reset_remote();
        }
    }

    /// The bound connection, if any.
    #[must_use]
    pub fn connection(&self) -> Option<&Connection> {
        self.bound.as_ref()
    }

    /// SASL configuration. Credentials set here are announced ahead of the
    /// open frame.
    pub fn sasl(&mut self) -> &mut Sasl {
        &mut self.sasl
    }

    /// How many bytes the transport can accept, or `-1` at end of stream.
    #[must_use]
    pub fn capacity(&self) -> isize {
        if self.input_error || self.input_closed {
            return -1;
        }
        if let Some(conn) = &self.bound {
            if conn.state().is_closed() {
                return -1;
            }
        }
        READ_WINDOW.saturating_sub(self.inq.len()) as isize
    }

    /// Feed received bytes into the engine.
    ///
    /// Frames are decoded and applied immediately; events they produce land
    /// on the bound connection's collector.
    pub fn push(&mut self, data: &[u8]) -> Result<()> {
        self.inq.extend_from_slice(data);
        match self.process_input() {
            Ok(()) => Ok(()),
            Err(err) => {
                warn!(%err, "protocol error on input");
                self.input_error = true;
                if let Some(conn) = &self.bound {
                    conn.emit_transport_event();
                }
                Err(err)
            }
        }
    }

    fn process_input(&mut self) -> Result<()> {
        if !self.header_received {
            if self.inq.len() < HEADER.len() {
                return Ok(());
            }
            if self.inq[..HEADER.len()] != HEADER {
                return Err(EngineError::Header);
            }
            self.inq.advance(HEADER.len());
            self.header_received = true;
            debug!("protocol header accepted");
        }
        while let Some(frame) = self.decoder.decode(&mut self.inq)? {
            match &self.bound {
                Some(conn) => conn.handle_frame(frame)?,
                None => debug!(?frame, "frame on unbound transport, dropping"),
            }
        }
        Ok(())
    }

    /// How many bytes are waiting to be written, or `-1` once the outbound
    /// direction is finished.
    #[must_use]
    pub fn pending(&mut self) -> isize {
        let Some(conn) = self.bound.clone() else {
            return 0;
        };
        if !self.header_sent {
            self.out.extend_from_slice(&HEADER);
            if let Some((user, password)) = self.sasl.plain.clone() {
                Frame::Auth {
                    mechanism: "PLAIN".to_owned(),
                    user,
                    password,
                }
                .encode(&mut self.out);
            }
            self.header_sent = true;
        }
        for frame in conn.take_outbound() {
            if matches!(frame, Frame::Close { .. }) {
                self.close_encoded = true;
            }
            frame.encode(&mut self.out);
        }
        if !self.out.is_empty() {
            self.out.len() as isize
        } else if self.close_encoded || conn.state().is_closed() {
            -1
        } else {
            0
        }
    }

    /// Copy out up to `n` bytes of the write queue without consuming them.
    #[must_use]
    pub fn peek(&self, n: usize) -> Bytes {
        let take = n.min(self.out.len());
        Bytes::copy_from_slice(&self.out[..take])
    }

    /// Drop `n` bytes from the write queue (they were written).
    pub fn pop(&mut self, n: usize) {
        let take = n.min(self.out.len());
        self.out.advance(take);
    }

    /// Note a clean end of the inbound byte stream.
    pub fn close_tail(&mut self) {
        self.input_closed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::Collector;

    #[test]
    fn test_header_goes_out_first() {
        let collector = Collector::new();
        let conn = Connection::new(&collector);
        let mut transport = Transport::new();
        transport.bind(&conn);
        conn.open();

        let n = transport.pending();
        assert!(n > 0);
        let head = transport.peek(HEADER.len());
        assert_eq!(&head[..], &HEADER[..]);
    }

    #[test]
    fn test_bad_header_is_an_error() {
        let collector = Collector::new();
        let conn = Connection::new(&collector);
        let mut transport = Transport::new();
        transport.bind(&conn);

        let err = transport.push(b"GARBAGE!").unwrap_err();
        assert!(matches!(err, EngineError::Header));
        assert_eq!(transport.capacity(), -1);
    }

    #[test]
    fn test_capacity_shrinks_with_backlog() {
        let mut transport = Transport::new();
        let full = transport.capacity();
        // The header is consumed outright; a partial frame stays buffered
        // and eats into the window.
        transport.push(&HEADER).unwrap();
        transport.push(&[0, 0]).unwrap();
        assert_eq!(transport.capacity(), full - 2);
    }

    #[test]
    fn test_pending_negative_after_close_flushed() {
        let collector = Collector::new();
        let conn = Connection::new(&collector);
        let mut transport = Transport::new();
        transport.bind(&conn);
        conn.open();
        conn.close();

        let n = transport.pending();
        assert!(n > 0);
        transport.pop(n as usize);
        assert_eq!(transport.pending(), -1);
    }
}
