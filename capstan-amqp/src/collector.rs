//! Event collection.
//!
//! The engine never calls the application back. It queues [`Event`]s on a
//! [`Collector`] and the runtime drains them after each byte pump. Events
//! carry handles for every scope level they concern (connection, session,
//! link, delivery) so dispatchers can walk the chain from finest to
//! coarsest.

use crate::connection::Connection;
use crate::delivery::Delivery;
use crate::link::Link;
use crate::message::Message;
use crate::session::Session;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// The kind of an event.
///
/// Protocol kinds are emitted by the engine; `Timer`, `Disconnected` and
/// `Custom` are application kinds built by the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    ConnectionInit,
    ConnectionOpen,
    ConnectionRemoteOpen,
    ConnectionClose,
    ConnectionRemoteClose,
    ConnectionFinal,
    SessionInit,
    SessionOpen,
    SessionRemoteOpen,
    SessionClose,
    SessionRemoteClose,
    SessionFinal,
    LinkInit,
    LinkOpen,
    LinkRemoteOpen,
    LinkClose,
    LinkRemoteClose,
    LinkFlow,
    LinkFinal,
    Delivery,
    Transport,
    Timer,
    Disconnected,
    /// Application-defined event, named by the injecting code.
    Custom(Arc<str>),
}

/// The scope class of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Connection,
    Session,
    Link,
    Delivery,
    Application,
}

/// An opaque identity used as an event subject.
///
/// Components that schedule events for themselves (the connector, for
/// instance) tag them with their own token and ignore everyone else's.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Token(u64);

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

impl Token {
    /// Allocate a fresh, process-unique token.
    #[must_use]
    pub fn unique() -> Self {
        Self(NEXT_TOKEN.fetch_add(1, Ordering::Relaxed))
    }
}

/// A dispatched event: a kind plus the domain objects it concerns.
#[derive(Debug, Clone)]
pub struct Event {
    kind: EventKind,
    category: Category,
    connection: Option<Connection>,
    session: Option<Session>,
    link: Option<Link>,
    delivery: Option<Delivery>,
    subject: Option<Token>,
    message: Option<Message>,
}

impl Event {
    /// Build an event with no scope.
    ///
    /// Attach scopes with the `with_*` builders; the category follows the
    /// finest scope attached.
    #[must_use]
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            category: Category::Application,
            connection: None,
            session: None,
            link: None,
            delivery: None,
            subject: None,
            message: None,
        }
    }

    /// Build a timer event.
    #[must_use]
    pub fn timer() -> Self {
        Self::new(EventKind::Timer)
    }

    /// Build a disconnection event for `connection`.
    #[must_use]
    pub fn disconnected(connection: &Connection) -> Self {
        Self::new(EventKind::Disconnected).with_connection(connection)
    }

    /// Build a named custom event.
    #[must_use]
    pub fn custom(name: &str) -> Self {
        Self::new(EventKind::Custom(Arc::from(name)))
    }

    #[must_use]
    pub fn with_connection(mut self, connection: &Connection) -> Self {
        self.connection = Some(connection.clone());
        self.recategorize();
        self
    }

    #[must_use]
    pub fn with_session(mut self, session: &Session) -> Self {
        self.connection = session.connection();
        self.session = Some(session.clone());
        self.recategorize();
        self
    }

    #[must_use]
    pub fn with_link(mut self, link: &Link) -> Self {
        let session = link.session();
        self.connection = session.as_ref().and_then(Session::connection);
        self.session = session;
        self.link = Some(link.clone());
        self.recategorize();
        self
    }

    #[must_use]
    pub fn with_delivery(mut self, delivery: &Delivery) -> Self {
        let link = delivery.link();
        let session = link.as_ref().and_then(Link::session);
        self.connection = session.as_ref().and_then(Session::connection);
        self.session = session;
        self.link = link;
        self.delivery = Some(delivery.clone());
        self.recategorize();
        self
    }

    #[must_use]
    pub fn with_subject(mut self, subject: Token) -> Self {
        self.subject = Some(subject);
        self
    }

    #[must_use]
    pub fn with_message(mut self, message: Message) -> Self {
        self.message = Some(message);
        self
    }

    fn recategorize(&mut self) {
        self.category = if self.delivery.is_some() {
            Category::Delivery
        } else if self.link.is_some() {
            Category::Link
        } else if self.session.is_some() {
            Category::Session
        } else if self.connection.is_some() {
            Category::Connection
        } else {
            Category::Application
        };
    }

    #[must_use]
    pub fn kind(&self) -> &EventKind {
        &self.kind
    }

    #[must_use]
    pub fn category(&self) -> Category {
        self.category
    }

    #[must_use]
    pub fn connection(&self) -> Option<&Connection> {
        self.connection.as_ref()
    }

    #[must_use]
    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    #[must_use]
    pub fn link(&self) -> Option<&Link> {
        self.link.as_ref()
    }

    #[must_use]
    pub fn delivery(&self) -> Option<&Delivery> {
        self.delivery.as_ref()
    }

    #[must_use]
    pub fn subject(&self) -> Option<Token> {
        self.subject
    }

    #[must_use]
    pub fn message(&self) -> Option<&Message> {
        self.message.as_ref()
    }

    /// The name of a custom event, if this is one.
    #[must_use]
    pub fn custom_name(&self) -> Option<&str> {
        match &self.kind {
            EventKind::Custom(name) => Some(name.as_ref()),
            _ => None,
        }
    }
}

/// FIFO queue of engine events.
///
/// Cheap to clone; every connection bound to the same collector feeds the
/// same queue.
#[derive(Debug, Clone, Default)]
pub struct Collector {
    queue: Rc<RefCell<VecDeque<Event>>>,
}

impl Collector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The oldest queued event, if any, without removing it.
    #[must_use]
    pub fn peek(&self) -> Option<Event> {
        self.queue.borrow().front().cloned()
    }

    /// Drop the oldest queued event.
    pub fn pop(&self) {
        self.queue.borrow_mut().pop_front();
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.borrow().is_empty()
    }

    pub(crate) fn push(&self, event: Event) {
        self.queue.borrow_mut().push_back(event);
    }
}
