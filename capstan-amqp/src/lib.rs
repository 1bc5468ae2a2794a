//! Capstan protocol engine
//!
//! This crate contains the sans-IO messaging engine the capstan runtime is
//! built on:
//! - Endpoint state machines (`connection`, `session`, `link`, `delivery`)
//! - Byte-oriented transport pump (`transport`)
//! - Wire framing (`codec`)
//! - Typed event collection (`collector`)
//! - Message envelope (`message`)
//!
//! The engine performs no I/O of its own. Bytes are pushed in and pulled out
//! through a [`transport::Transport`] bound to a [`connection::Connection`];
//! everything the engine wants to tell the application is queued as an
//! [`collector::Event`] on the connection's [`collector::Collector`].
//!
//! The engine is single-threaded by design: handles are `Rc`-based and cheap
//! to clone, and all state lives on the thread that drives the reactor.

#![deny(unsafe_code)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_possible_wrap)]

pub mod codec;
pub mod collector;
pub mod connection;
pub mod delivery;
pub mod endpoint;
pub mod error;
pub mod link;
pub mod message;
pub mod session;
pub mod transport;

pub use collector::{Category, Collector, Event, EventKind, Token};
pub use connection::Connection;
pub use delivery::{Delivery, Disposition};
pub use endpoint::{Condition, Half, State, Terminus};
pub use error::EngineError;
pub use link::Link;
pub use message::Message;
pub use session::Session;
pub use transport::Transport;

use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_ENTITY_ID: AtomicU64 = AtomicU64::new(1);

/// Allocate a process-unique entity id.
///
/// Every connection, session, link and delivery gets one; side tables in the
/// runtime key off these instead of attaching fields to engine objects.
pub(crate) fn next_entity_id() -> u64 {
    NEXT_ENTITY_ID.fetch_add(1, Ordering::Relaxed)
}
