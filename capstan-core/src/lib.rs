//! Capstan core runtime
//!
//! This crate contains the reactor and the event machinery that drive the
//! protocol engine:
//! - Readiness loop over non-blocking sockets (`reactor`)
//! - Reactor participants: socket adapter, acceptor, cross-thread injector
//!   (`socket`, `acceptor`, `injector`)
//! - Event source with scheduled timers (`events`)
//! - Handler trait and dispatchers (`dispatch`)
//! - Behavioral handlers: handshaking, credit top-up, settlement (`handlers`)
//! - Endpoint builders (`context`), outbound connects and reconnect policy
//!   (`connector`, `backoff`), address parsing (`url`)
//! - The user-facing `Runtime` (`runtime`)
//!
//! Everything here runs on one thread. Handlers must not block: the only
//! blocking call in the whole runtime is the readiness wait inside the
//! reactor, and timers keep that wait bounded. The single cross-thread entry
//! point is [`injector::EventTrigger`].

#![deny(unsafe_code)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_possible_wrap)]

pub mod acceptor;
pub mod backoff;
pub mod connector;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod handlers;
pub mod injector;
pub mod reactor;
pub mod runtime;
pub mod selectable;
pub mod socket;
pub mod url;

pub use acceptor::Acceptor;
pub use backoff::Backoff;
pub use connector::{Connector, ConnectorRegistry};
pub use context::{
    DeliveryTags, MessagingContext, Receiver, ReceiverOptions, SendOptions, Sender, SenderOptions,
};
pub use dispatch::{attach_handler, Handler, HandlerCell, ScopedDispatcher};
pub use error::Error;
pub use events::EventSource;
pub use handlers::{
    FlowController, Handshaker, IncomingMessageHandler, OutgoingMessageHandler, Reject,
};
pub use injector::{ApplicationEvent, EventInjector, EventTrigger};
pub use reactor::{Reactor, Registrar, DEFAULT_TIMEOUT};
pub use runtime::{AcceptorHandle, ConnectOptions, Runtime};
pub use selectable::Selectable;
pub use socket::SocketAdapter;
pub use url::{Url, Urls};

// The engine types users touch constantly.
pub use capstan_amqp::{
    Category, Collector, Condition, Connection, Delivery, Disposition, Event, EventKind, Half,
    Link, Message, Session, State, Terminus, Token,
};
