//! The socket adapter: a non-blocking TCP socket bound to a transport.
//!
//! Bytes read off the socket are pushed into the transport (and become
//! collector events); bytes the transport has pending are written back out.
//! Each direction is torn down independently (`read_done` / `write_done`);
//! when both are done the adapter reports closed and the reactor drops it,
//! which is what closes the socket.
//!
//! A connection that did not close cleanly (both halves closed at both
//! peers) gets a synthetic `disconnected` event when the adapter is removed.

use crate::error::Result;
use crate::events::EventSource;
use crate::selectable::Selectable;
use crate::url::Url;
use capstan_amqp::{Connection, Event, Transport};
use socket2::{Domain, Protocol, Socket, Type};
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::os::unix::io::{AsRawFd, RawFd};
use tracing::debug;

/// Largest single read handed to the transport.
const READ_CHUNK: usize = 64 * 1024;

/// A reactor participant pumping one TCP socket through one transport.
pub struct SocketAdapter {
    conn: Connection,
    transport: Transport,
    stream: TcpStream,
    source: EventSource,
    read_done: bool,
    write_done: bool,
    scratch: Vec<u8>,
}

impl SocketAdapter {
    /// Start a non-blocking connect to `url` and bind `conn` to a fresh
    /// transport over it. Credentials in the URL select SASL PLAIN.
    pub fn connect(conn: Connection, source: EventSource, url: &Url) -> Result<Self> {
        let (host, port) = url.host_port();
        let addr = resolve(host, port)?;
        let domain = Domain::for_address(addr);
        let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
        socket.set_nonblocking(true)?;
        socket.set_nodelay(true)?;
        if let Err(err) = socket.connect(&addr.into()) {
            // Non-blocking connect: in-progress is the normal case, and
            // hard failures surface through the readiness loop.
            debug!(%addr, %err, "connect pending");
        }
        let stream: TcpStream = socket.into();
        conn.set_hostname(Some(host));

        let mut transport = Transport::new();
        if let (Some(user), Some(password)) = (url.user(), url.password()) {
            transport.sasl().plain(user, password);
        }
        transport.bind(&conn);
        debug!(%addr, "connecting");
        Ok(Self::new(conn, transport, stream, source))
    }

    /// Adopt an accepted socket in server mode.
    pub fn accepted(conn: Connection, source: EventSource, stream: TcpStream) -> Result<Self> {
        stream.set_nonblocking(true)?;
        stream.set_nodelay(true)?;
        let mut transport = Transport::new();
        transport.bind(&conn);
        Ok(Self::new(conn, transport, stream, source))
    }

    fn new(conn: Connection, transport: Transport, stream: TcpStream, source: EventSource) -> Self {
        Self {
            conn,
            transport,
            stream,
            source,
            read_done: false,
            write_done: false,
            scratch: vec![0; READ_CHUNK],
        }
    }

    /// Both halves closed at both peers.
    fn closed_cleanly(&self) -> bool {
        self.conn.state().is_closed()
    }
}

fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    let mut addrs = (host, port).to_socket_addrs()?;
    addrs.next().ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("no address for {host}:{port}"),
        )
        .into()
    })
}

impl Selectable for SocketAdapter {
    fn fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }

    fn reading(&mut self) -> bool {
        if self.read_done {
            return false;
        }
        let capacity = self.transport.capacity();
        if capacity > 0 {
            true
        } else {
            if capacity < 0 {
                self.read_done = true;
            }
            false
        }
    }

    fn writing(&mut self) -> bool {
        if self.write_done {
            return false;
        }
        let pending = self.transport.pending();
        if pending > 0 {
            true
        } else {
            if pending < 0 {
                self.write_done = true;
            }
            false
        }
    }

    fn readable(&mut self) {
        let capacity = self.transport.capacity();
        if capacity < 0 {
            self.read_done = true;
            return;
        }
        if capacity == 0 {
            return;
        }
        let want = (capacity as usize).min(self.scratch.len());
        match (&self.stream).read(&mut self.scratch[..want]) {
            Ok(0) => {
                if self.closed_cleanly() {
                    self.transport.close_tail();
                } else {
                    self.read_done = true;
                    self.write_done = true;
                }
            }
            Ok(n) => {
                if let Err(err) = self.transport.push(&self.scratch[..n]) {
                    debug!(%err, "error on read");
                    self.read_done = true;
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {}
            Err(err) => {
                debug!(%err, "error on recv");
                self.read_done = true;
                self.write_done = true;
            }
        }
    }

    fn writable(&mut self) {
        let pending = self.transport.pending();
        if pending < 0 {
            self.write_done = true;
            return;
        }
        if pending == 0 {
            return;
        }
        let data = self.transport.peek(pending as usize);
        match (&self.stream).write(&data) {
            Ok(n) => self.transport.pop(n),
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {}
            Err(err) => {
                debug!(%err, "error on send");
                self.write_done = true;
            }
        }
    }

    fn closed(&mut self) -> bool {
        self.read_done && self.write_done
    }

    fn removed(&mut self) {
        if self.closed_cleanly() {
            debug!("connection closed cleanly");
        } else {
            debug!("connection lost");
            self.transport.unbind();
            self.source.dispatch(&Event::disconnected(&self.conn));
        }
    }
}
