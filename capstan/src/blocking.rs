//! Synchronous facade over the reactor.
//!
//! A [`BlockingConnection`] owns a private runtime and pumps it one
//! iteration at a time until the condition the caller is waiting for holds:
//! connection opened, link opened, delivery settled, connection closed.
//! Peer-reported closes while we are still active, and disconnections, are
//! latched by a guard handler on the connection and surface as
//! [`ClientError`] from whichever call was pumping.

use capstan_core::{
    Condition, ConnectOptions, Delivery, Event, Handler, Message, MessagingContext, Receiver,
    Runtime, Sender,
};
use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;

/// Terminal errors surfaced to blocking callers.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The peer closed the connection or link while we were still active.
    #[error("closed by peer: {}", condition_text(.0))]
    RemoteClosed(Option<Condition>),

    /// The transport went away.
    #[error("disconnected")]
    Disconnected,

    /// The configured deadline passed while pumping.
    #[error("operation timed out")]
    Timeout,

    /// Runtime setup failure (bad address, socket error).
    #[error(transparent)]
    Runtime(#[from] capstan_core::Error),
}

fn condition_text(condition: &Option<Condition>) -> String {
    match condition {
        Some(condition) => condition.to_string(),
        None => "no condition".to_owned(),
    }
}

type ErrorSlot = Rc<RefCell<Option<ClientError>>>;

/// Connection-scope handler latching terminal conditions.
struct Guard {
    error: ErrorSlot,
}

impl Guard {
    fn latch(&self, error: ClientError) {
        let mut slot = self.error.borrow_mut();
        if slot.is_none() {
            *slot = Some(error);
        }
    }
}

impl Handler for Guard {
    fn on_connection_remote_close(&mut self, event: &Event) {
        if let Some(conn) = event.connection() {
            if conn.state().is_local_active() {
                self.latch(ClientError::RemoteClosed(conn.remote_condition()));
            }
        }
    }

    fn on_link_remote_close(&mut self, event: &Event) {
        if let Some(link) = event.link() {
            if link.state().is_local_active() {
                self.latch(ClientError::RemoteClosed(link.remote_condition()));
            }
        }
    }

    fn on_disconnected(&mut self, _event: &Event) {
        self.latch(ClientError::Disconnected);
    }
}

/// A synchronous connection.
#[derive(Debug)]
pub struct BlockingConnection {
    runtime: Runtime,
    context: MessagingContext,
    error: ErrorSlot,
    timeout: Option<Duration>,
}

impl BlockingConnection {
    /// Connect to `url` and block until the peer has opened its half.
    pub fn connect(url: &str) -> Result<Self, ClientError> {
        Self::connect_with_timeout(url, None)
    }

    /// Like [`BlockingConnection::connect`] with a deadline applied to this
    /// and every later blocking call.
    pub fn connect_with_timeout(
        url: &str,
        timeout: Option<Duration>,
    ) -> Result<Self, ClientError> {
        let runtime = Runtime::with_handlers(Vec::new());
        let error: ErrorSlot = Rc::new(RefCell::new(None));
        let context = runtime.connect(ConnectOptions::url(url).with_handler(Guard {
            error: error.clone(),
        }))?;
        let conn = Self {
            runtime,
            context,
            error,
            timeout,
        };
        conn.pump(|| !conn.context.connection().state().is_remote_uninit())?;
        debug!(%url, "blocking connection open");
        Ok(conn)
    }

    /// Change the pump deadline for subsequent calls.
    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    /// Build a sender and block until the peer attached its end.
    pub fn sender(&self, address: &str) -> Result<BlockingSender<'_>, ClientError> {
        let sender = self.context.sender(address);
        self.wait_attached(|| sender.state())?;
        Ok(BlockingSender { conn: self, sender })
    }

    /// Build a receiver with one credit and block until the peer attached.
    pub fn receiver(&self, address: &str) -> Result<BlockingReceiver<'_>, ClientError> {
        let receiver = self.context.receiver(address);
        receiver.flow(1);
        self.wait_attached(|| receiver.state())?;
        Ok(BlockingReceiver {
            conn: self,
            receiver,
        })
    }

    /// Close the connection and block until the peer's half is gone.
    pub fn close(&self) -> Result<(), ClientError> {
        self.context.close();
        self.pump(|| !self.context.connection().state().is_remote_active())
    }

    fn wait_attached(&self, state: impl Fn() -> capstan_core::State) -> Result<(), ClientError> {
        self.pump(|| !state().is_remote_uninit())
    }

    fn pump(&self, done: impl Fn() -> bool) -> Result<(), ClientError> {
        let deadline = self.timeout.map(|t| Instant::now() + t);
        loop {
            if let Some(error) = self.error.borrow_mut().take() {
                return Err(error);
            }
            if done() {
                return Ok(());
            }
            match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(ClientError::Timeout);
                    }
                    self.runtime
                        .do_work_timeout((deadline - now).min(capstan_core::DEFAULT_TIMEOUT))?;
                }
                None => self.runtime.do_work()?,
            }
        }
    }
}

/// A sender whose `send_msg` returns only once the delivery settled.
pub struct BlockingSender<'a> {
    conn: &'a BlockingConnection,
    sender: Sender,
}

impl BlockingSender<'_> {
    /// Send `message` and block until the peer settled the delivery.
    pub fn send_msg(&self, message: &Message) -> Result<Delivery, ClientError> {
        let delivery = self.sender.send_msg(message);
        self.conn.pump(|| delivery.settled())?;
        Ok(delivery)
    }

    /// Close the link and block until the peer detached.
    pub fn close(&self) -> Result<(), ClientError> {
        self.sender.close();
        self.conn.pump(|| !self.sender.state().is_remote_active())
    }

    #[must_use]
    pub fn sender(&self) -> &Sender {
        &self.sender
    }
}

/// A receiver pre-charged with one credit.
pub struct BlockingReceiver<'a> {
    conn: &'a BlockingConnection,
    receiver: Receiver,
}

impl BlockingReceiver<'_> {
    /// Close the link and block until the peer detached.
    pub fn close(&self) -> Result<(), ClientError> {
        self.receiver.close();
        self.conn.pump(|| !self.receiver.state().is_remote_active())
    }

    #[must_use]
    pub fn receiver(&self) -> &Receiver {
        &self.receiver
    }
}
