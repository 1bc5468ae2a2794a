//! # Capstan
//!
//! A reactive client-side messaging runtime: one thread, one readiness
//! loop, a layered handler pipeline on top.
//!
//! ## Architecture
//!
//! Capstan is split into three crates:
//!
//! - **`capstan-amqp`**: sans-IO protocol engine (endpoint state machines,
//!   transport byte pump, event collector)
//! - **`capstan-core`**: the reactor, dispatch pipeline and messaging
//!   lifecycle helpers
//! - **`capstan`**: public API surface (this crate), including the blocking
//!   facade
//!
//! ## Quick start
//!
//! ### Reactive client
//!
//! ```rust,no_run
//! use capstan::{ConnectOptions, Event, Handler, Message, Runtime};
//!
//! struct Hello;
//!
//! impl Handler for Hello {
//!     fn on_connection_remote_open(&mut self, event: &Event) {
//!         // Build links once the peer is there.
//!     }
//! }
//!
//! # fn main() -> Result<(), capstan::Error> {
//! let runtime = Runtime::new();
//! let context = runtime.connect(ConnectOptions::url("localhost:5672").with_handler(Hello))?;
//! let sender = context.sender("examples");
//! sender.send_msg(&Message::with_body(&b"{\"sequence\":0}"[..]));
//! runtime.run()?;
//! # Ok(())
//! # }
//! ```
//!
//! ### Blocking client
//!
//! ```rust,no_run
//! use capstan::blocking::BlockingConnection;
//! use capstan::Message;
//!
//! # fn main() -> Result<(), capstan::blocking::ClientError> {
//! let conn = BlockingConnection::connect("localhost:5672")?;
//! let sender = conn.sender("examples")?;
//! // Returns once the peer settled the delivery.
//! sender.send_msg(&Message::with_body(&b"hi"[..]))?;
//! conn.close()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Model
//!
//! - **Single-threaded cooperative**: handlers, pumps and timers all run on
//!   the reactor thread; handlers must not block.
//! - **Scoped handlers**: attach a handler to a delivery, link, session or
//!   connection and it sees that object's events, finest scope first.
//! - **Zero-copy-ish**: payloads ride in `bytes::Bytes` end to end.

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod blocking;
pub mod dev_tracing;

pub use bytes::Bytes;

// The runtime surface.
pub use capstan_core::{
    attach_handler, handlers, AcceptorHandle, ApplicationEvent, Backoff, ConnectOptions,
    DeliveryTags, Error, EventSource, EventTrigger, FlowController, Handler, Handshaker,
    IncomingMessageHandler, MessagingContext, OutgoingMessageHandler, Receiver, ReceiverOptions,
    Reject, Runtime, ScopedDispatcher, Selectable, SendOptions, Sender, SenderOptions, Url, Urls,
};

// The engine types events and handlers expose.
pub use capstan_core::{
    Category, Condition, Connection, Delivery, Disposition, Event, EventKind, Half, Link, Message,
    Session, State, Terminus, Token,
};
