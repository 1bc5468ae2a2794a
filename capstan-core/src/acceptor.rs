//! The acceptor: a non-blocking listener spawning server-side adapters.

use crate::error::Result;
use crate::events::EventSource;
use crate::reactor::Registrar;
use crate::selectable::Selectable;
use crate::socket::SocketAdapter;
use socket2::{Domain, Protocol, Socket, Type};
use std::cell::Cell;
use std::io;
use std::net::{SocketAddr, TcpListener, ToSocketAddrs};
use std::os::unix::io::{AsRawFd, RawFd};
use std::rc::Rc;
use tracing::{debug, error};

const BACKLOG: i32 = 16;

/// A listening socket registered with the reactor. Every accepted socket
/// gets its own connection and server-mode [`SocketAdapter`].
pub struct Acceptor {
    listener: TcpListener,
    source: EventSource,
    registrar: Registrar,
    closed: Rc<Cell<bool>>,
    local_addr: SocketAddr,
}

impl Acceptor {
    /// Bind and listen on `host:port` (port 0 picks a free port).
    pub fn bind(source: EventSource, registrar: Registrar, host: &str, port: u16) -> Result<Self> {
        let addr = (host, port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no address to bind"))?;
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
        socket.set_reuse_address(true)?;
        socket.set_nonblocking(true)?;
        socket.bind(&addr.into())?;
        socket.listen(BACKLOG)?;
        let listener: TcpListener = socket.into();
        let local_addr = listener.local_addr()?;
        debug!(%local_addr, "listening");
        Ok(Self {
            listener,
            source,
            registrar,
            closed: Rc::new(Cell::new(false)),
            local_addr,
        })
    }

    /// The bound address (useful with port 0).
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Shared flag that marks this acceptor for removal.
    #[must_use]
    pub fn close_flag(&self) -> Rc<Cell<bool>> {
        self.closed.clone()
    }
}

impl Selectable for Acceptor {
    fn fd(&self) -> RawFd {
        self.listener.as_raw_fd()
    }

    fn reading(&mut self) -> bool {
        !self.closed.get()
    }

    fn writing(&mut self) -> bool {
        false
    }

    fn readable(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    debug!(%peer, "incoming connection");
                    let conn = self.source.connection();
                    match SocketAdapter::accepted(conn, self.source.clone(), stream) {
                        Ok(adapter) => self.registrar.add(Box::new(adapter)),
                        Err(err) => error!(%err, "failed to adopt accepted socket"),
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) => {
                    error!(%err, "accept error");
                    break;
                }
            }
        }
    }

    fn writable(&mut self) {}

    fn closed(&mut self) -> bool {
        self.closed.get()
    }

    fn removed(&mut self) {}
}
