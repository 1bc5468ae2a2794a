//! Endpoint builders: the per-connection messaging facade.
//!
//! A [`MessagingContext`] wraps a connection and builds senders and
//! receivers on a lazily created session. Handlers passed to the builders
//! are attached to the new link so the scoped dispatcher finds them.

use crate::dispatch::{attach_handler, attach_handler_cell, Handler};
use capstan_amqp::{Connection, Delivery, Event, Link, Message, Session};
use bytes::Bytes;
use std::cell::{Cell, RefCell};
use std::ops::Deref;
use std::rc::Rc;

/// Monotonic delivery-tag generator: `"1"`, `"2"`, `"3"`, ...
#[derive(Debug, Clone)]
pub struct DeliveryTags {
    next: u64,
}

impl Default for DeliveryTags {
    fn default() -> Self {
        Self { next: 1 }
    }
}

impl DeliveryTags {
    /// Take the next tag.
    pub fn next_tag(&mut self) -> Bytes {
        let tag = self.next.to_string();
        self.next += 1;
        Bytes::from(tag)
    }
}

/// Options for [`MessagingContext::sender_with`].
#[derive(Default)]
pub struct SenderOptions {
    pub(crate) target: Option<String>,
    pub(crate) source: Option<String>,
    pub(crate) name: Option<String>,
    pub(crate) handler: Option<Box<dyn Handler>>,
    pub(crate) tags: Option<DeliveryTags>,
}

impl SenderOptions {
    #[must_use]
    pub fn with_target(mut self, target: &str) -> Self {
        self.target = Some(target.to_owned());
        self
    }

    #[must_use]
    pub fn with_source(mut self, source: &str) -> Self {
        self.source = Some(source.to_owned());
        self
    }

    #[must_use]
    pub fn with_name(mut self, name: &str) -> Self {
        self.name = Some(name.to_owned());
        self
    }

    #[must_use]
    pub fn with_handler(mut self, handler: impl Handler + 'static) -> Self {
        self.handler = Some(Box::new(handler));
        self
    }

    #[must_use]
    pub fn with_tags(mut self, tags: DeliveryTags) -> Self {
        self.tags = Some(tags);
        self
    }
}

/// Options for [`MessagingContext::receiver_with`].
#[derive(Default)]
pub struct ReceiverOptions {
    pub(crate) source: Option<String>,
    pub(crate) target: Option<String>,
    pub(crate) name: Option<String>,
    pub(crate) dynamic: bool,
    pub(crate) handler: Option<Box<dyn Handler>>,
}

impl ReceiverOptions {
    #[must_use]
    pub fn with_source(mut self, source: &str) -> Self {
        self.source = Some(source.to_owned());
        self
    }

    #[must_use]
    pub fn with_target(mut self, target: &str) -> Self {
        self.target = Some(target.to_owned());
        self
    }

    #[must_use]
    pub fn with_name(mut self, name: &str) -> Self {
        self.name = Some(name.to_owned());
        self
    }

    /// Ask the peer to create a temporary node and name it.
    #[must_use]
    pub fn dynamic(mut self) -> Self {
        self.dynamic = true;
        self
    }

    #[must_use]
    pub fn with_handler(mut self, handler: impl Handler + 'static) -> Self {
        self.handler = Some(Box::new(handler));
        self
    }
}

/// Options for [`Sender::send_msg_with`].
#[derive(Default)]
pub struct SendOptions {
    pub(crate) tag: Option<Bytes>,
    pub(crate) handler: Option<Box<dyn Handler>>,
}

impl SendOptions {
    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<Bytes>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    /// Attach a per-delivery handler; it sees this delivery's events before
    /// any link, session or connection handler.
    #[must_use]
    pub fn with_handler(mut self, handler: impl Handler + 'static) -> Self {
        self.handler = Some(Box::new(handler));
        self
    }
}

/// A sending link plus its delivery-tag generator.
pub struct Sender {
    link: Link,
    tags: RefCell<DeliveryTags>,
}

impl Sender {
    #[must_use]
    pub fn link(&self) -> &Link {
        &self.link
    }

    /// Encode `message` into a fresh delivery and hand it to the link.
    pub fn send_msg(&self, message: &Message) -> Delivery {
        self.send_msg_with(message, SendOptions::default())
    }

    /// Like [`Sender::send_msg`] with an explicit tag and/or per-delivery
    /// handler.
    pub fn send_msg_with(&self, message: &Message, options: SendOptions) -> Delivery {
        let tag = options
            .tag
            .unwrap_or_else(|| self.tags.borrow_mut().next_tag());
        let delivery = self.link.delivery(tag);
        if let Some(handler) = options.handler {
            attach_handler_cell(&delivery, Rc::new(RefCell::new(handler)));
        }
        self.link.send(&message.encode());
        self.link.advance();
        delivery
    }
}

impl Deref for Sender {
    type Target = Link;

    fn deref(&self) -> &Link {
        &self.link
    }
}

/// A receiving link.
pub struct Receiver {
    link: Link,
}

impl Receiver {
    #[must_use]
    pub fn link(&self) -> &Link {
        &self.link
    }
}

impl Deref for Receiver {
    type Target = Link;

    fn deref(&self) -> &Link {
        &self.link
    }
}

/// Closes the connection when the peer ends the session underneath it.
struct SessionGuard {
    conn: Connection,
}

impl Handler for SessionGuard {
    fn on_session_remote_close(&mut self, _event: &Event) {
        self.conn.close();
    }
}

/// Per-connection facade for building senders and receivers.
///
/// The first link allocates a session; later links share it.
#[derive(Debug)]
pub struct MessagingContext {
    conn: Connection,
    session: RefCell<Option<Session>>,
    anon: Cell<u64>,
}

impl MessagingContext {
    /// Wrap `conn`. Attach connection-scope handlers before or after; this
    /// does not touch the attachment slot.
    #[must_use]
    pub fn new(conn: Connection) -> Self {
        Self {
            conn,
            session: RefCell::new(None),
            anon: Cell::new(0),
        }
    }

    /// Wrap `conn` and attach `handler` at connection scope.
    #[must_use]
    pub fn with_handler(conn: Connection, handler: impl Handler + 'static) -> Self {
        attach_handler(&conn, handler);
        Self::new(conn)
    }

    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Build and open a sender targeting `target`.
    pub fn sender(&self, target: &str) -> Sender {
        self.sender_with(SenderOptions::default().with_target(target))
    }

    /// Build and open a sender with full control over the link.
    pub fn sender_with(&self, options: SenderOptions) -> Sender {
        let name = options.name.clone().unwrap_or_else(|| {
            self.link_name(options.target.as_deref(), options.source.as_deref())
        });
        let link = self.session().sender(&name);
        if let Some(source) = options.source.as_deref() {
            link.set_source_address(Some(source));
        }
        link.set_target_address(options.target.as_deref());
        if let Some(handler) = options.handler {
            attach_handler_cell(&link, Rc::new(RefCell::new(handler)));
        }
        link.open();
        Sender {
            link,
            tags: RefCell::new(options.tags.unwrap_or_default()),
        }
    }

    /// Build and open a receiver reading from `source`.
    pub fn receiver(&self, source: &str) -> Receiver {
        self.receiver_with(ReceiverOptions::default().with_source(source))
    }

    /// Build and open a receiver with full control over the link.
    pub fn receiver_with(&self, options: ReceiverOptions) -> Receiver {
        let name = options.name.clone().unwrap_or_else(|| {
            self.link_name(options.source.as_deref(), options.target.as_deref())
        });
        let link = self.session().receiver(&name);
        link.set_source_address(options.source.as_deref());
        if options.dynamic {
            link.set_source_dynamic(true);
        }
        if let Some(target) = options.target.as_deref() {
            link.set_target_address(Some(target));
        }
        if let Some(handler) = options.handler {
            attach_handler_cell(&link, Rc::new(RefCell::new(handler)));
        }
        link.open();
        Receiver { link }
    }

    /// Close the session (if one was created) and the connection.
    pub fn close(&self) {
        if let Some(session) = self.session.borrow().as_ref() {
            session.close();
        }
        self.conn.close();
    }

    fn session(&self) -> Session {
        let mut slot = self.session.borrow_mut();
        match slot.as_ref() {
            Some(session) => session.clone(),
            None => {
                let session = self.conn.session();
                session.open();
                attach_handler(
                    &session,
                    SessionGuard {
                        conn: self.conn.clone(),
                    },
                );
                *slot = Some(session.clone());
                session
            }
        }
    }

    /// Default link naming: `remote-local`, the bare remote address, or a
    /// unique fallback when neither address was given.
    fn link_name(&self, remote: Option<&str>, local: Option<&str>) -> String {
        match (remote, local) {
            (Some(remote), Some(local)) => format!("{remote}-{local}"),
            (Some(remote), None) => remote.to_owned(),
            _ => {
                let n = self.anon.get();
                self.anon.set(n + 1);
                format!("temp-{n}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use capstan_amqp::Collector;

    fn context() -> MessagingContext {
        let collector = Collector::new();
        MessagingContext::new(Connection::new(&collector))
    }

    #[test]
    fn test_tags_count_from_one() {
        let mut tags = DeliveryTags::default();
        assert_eq!(tags.next_tag(), Bytes::from_static(b"1"));
        assert_eq!(tags.next_tag(), Bytes::from_static(b"2"));
        assert_eq!(tags.next_tag(), Bytes::from_static(b"3"));
    }

    #[test]
    fn test_session_is_lazy_and_shared() {
        let ctx = context();
        assert!(ctx.session.borrow().is_none());
        let sender = ctx.sender("a");
        let receiver = ctx.receiver("b");
        assert_eq!(
            sender.link().session().unwrap(),
            receiver.link().session().unwrap()
        );
        assert!(ctx.session.borrow().as_ref().unwrap().state().is_local_active());
    }

    #[test]
    fn test_sender_addresses_and_name() {
        let ctx = context();
        let sender = ctx.sender_with(SenderOptions::default().with_target("q").with_source("me"));
        assert_eq!(sender.link().name(), "q-me");
        assert_eq!(sender.target().address(), Some("q"));
        assert_eq!(sender.source().address(), Some("me"));
        assert!(sender.state().is_local_active());
        assert!(sender.is_sender());
    }

    #[test]
    fn test_anonymous_links_get_unique_names() {
        let ctx = context();
        let a = ctx.receiver_with(ReceiverOptions::default().dynamic());
        let b = ctx.receiver_with(ReceiverOptions::default().dynamic());
        assert_ne!(a.link().name(), b.link().name());
        assert!(a.source().is_dynamic());
    }

    #[test]
    fn test_send_msg_uses_generated_tags() {
        let ctx = context();
        let sender = ctx.sender("q");
        let first = sender.send_msg(&Message::with_body(&b"x"[..]));
        let second = sender.send_msg(&Message::with_body(&b"y"[..]));
        assert_eq!(first.tag(), Bytes::from_static(b"1"));
        assert_eq!(second.tag(), Bytes::from_static(b"2"));
        let tagged = sender.send_msg_with(
            &Message::with_body(&b"z"[..]),
            SendOptions::default().with_tag(&b"custom"[..]),
        );
        assert_eq!(tagged.tag(), Bytes::from_static(b"custom"));
    }
}
