//! Sessions: channels multiplexing links over a connection.

use crate::codec::{Frame, Role};
use crate::collector::{Collector, Event, EventKind};
use crate::connection::{Connection, ConnectionInner};
use crate::endpoint::{Condition, Half, State, Terminus};
use crate::link::Link;
use std::any::Any;
use std::cell::RefCell;
use std::rc::{Rc, Weak};
use tracing::debug;

#[derive(Debug)]
pub(crate) struct SessionInner {
    pub(crate) id: u64,
    pub(crate) channel: u16,
    pub(crate) state: State,
    pub(crate) collector: Collector,
    pub(crate) connection: Weak<RefCell<ConnectionInner>>,
    pub(crate) links: Vec<Link>,
    pub(crate) next_handle: u32,
    pub(crate) remote_condition: Option<Condition>,
    pub(crate) attachment: Option<Rc<dyn Any>>,
    pub(crate) finalized: bool,
}

/// Handle to a session.
#[derive(Clone)]
pub struct Session {
    pub(crate) inner: Rc<RefCell<SessionInner>>,
}

impl Session {
    pub(crate) fn new(
        channel: u16,
        collector: Collector,
        connection: Weak<RefCell<ConnectionInner>>,
    ) -> Self {
        Self {
            inner: Rc::new(RefCell::new(SessionInner {
                id: crate::next_entity_id(),
                channel,
                state: State::default(),
                collector,
                connection,
                links: Vec::new(),
                next_handle: 0,
                remote_condition: None,
                attachment: None,
                finalized: false,
            })),
        }
    }

    pub(crate) fn from_inner(inner: Rc<RefCell<SessionInner>>) -> Self {
        Self { inner }
    }

    /// Stable identity for side tables.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.borrow().id
    }

    #[must_use]
    pub fn state(&self) -> State {
        self.inner.borrow().state
    }

    /// The connection this session belongs to.
    #[must_use]
    pub fn connection(&self) -> Option<Connection> {
        self.inner
            .borrow()
            .connection
            .upgrade()
            .map(Connection::from_inner)
    }

    #[must_use]
    pub fn remote_condition(&self) -> Option<Condition> {
        self.inner.borrow().remote_condition.clone()
    }

    /// The user attachment slot.
    #[must_use]
    pub fn attachment(&self) -> Option<Rc<dyn Any>> {
        self.inner.borrow().attachment.clone()
    }

    pub fn set_attachment(&self, attachment: Option<Rc<dyn Any>>) {
        self.inner.borrow_mut().attachment = attachment;
    }

    /// Open the local half and transmit the begin.
    pub fn open(&self) {
        let channel = {
            let mut inner = self.inner.borrow_mut();
            if inner.state.local != Half::Uninit {
                return;
            }
            inner.state.local = Half::Active;
            inner.channel
        };
        self.push_frame(Frame::Begin { channel });
        self.emit(EventKind::SessionOpen);
    }

    /// Close the local half and transmit the end.
    pub fn close(&self) {
        let channel = {
            let mut inner = self.inner.borrow_mut();
            if inner.state.local == Half::Closed {
                return;
            }
            inner.state.local = Half::Closed;
            inner.channel
        };
        self.push_frame(Frame::End {
            channel,
            condition: None,
        });
        self.emit(EventKind::SessionClose);
        self.maybe_finalize();
    }

    /// Create a sending link named `name`.
    pub fn sender(&self, name: &str) -> Link {
        self.new_link(name, Role::Sender)
    }

    /// Create a receiving link named `name`.
    pub fn receiver(&self, name: &str) -> Link {
        self.new_link(name, Role::Receiver)
    }

    fn new_link(&self, name: &str, role: Role) -> Link {
        let link = {
            let mut inner = self.inner.borrow_mut();
            let handle = inner.next_handle;
            inner.next_handle += 1;
            let link = Link::new(
                name.to_owned(),
                handle,
                role,
                inner.collector.clone(),
                Rc::downgrade(&self.inner),
            );
            inner.links.push(link.clone());
            link
        };
        let collector = self.inner.borrow().collector.clone();
        collector.push(Event::new(EventKind::LinkInit).with_link(&link));
        link
    }

    // ---- frame application (called by the connection) ----

    pub(crate) fn remote_opened(&self) {
        self.inner.borrow_mut().state.remote = Half::Active;
        self.emit(EventKind::SessionRemoteOpen);
    }

    pub(crate) fn remote_closed(&self, condition: Option<Condition>) {
        {
            let mut inner = self.inner.borrow_mut();
            inner.remote_condition = condition;
            inner.state.remote = Half::Closed;
        }
        self.emit(EventKind::SessionRemoteClose);
        self.maybe_finalize();
    }

    pub(crate) fn handle_attach(
        &self,
        handle: u32,
        name: &str,
        role: Role,
        source: Terminus,
        target: Terminus,
    ) {
        let existing = {
            let inner = self.inner.borrow();
            inner.links.iter().find(|l| l.name() == name).cloned()
        };
        let link = match existing {
            Some(link) => link,
            None => {
                // Peer-initiated link: mirror its handle, flip its role.
                let flipped = match role {
                    Role::Sender => Role::Receiver,
                    Role::Receiver => Role::Sender,
                };
                let link = {
                    let mut inner = self.inner.borrow_mut();
                    let link = Link::new(
                        name.to_owned(),
                        handle,
                        flipped,
                        inner.collector.clone(),
                        Rc::downgrade(&self.inner),
                    );
                    inner.links.push(link.clone());
                    inner.next_handle = inner.next_handle.max(handle + 1);
                    link
                };
                let collector = self.inner.borrow().collector.clone();
                collector.push(Event::new(EventKind::LinkInit).with_link(&link));
                link
            }
        };
        link.remote_attached(source, target);
    }

    pub(crate) fn link_by_handle(&self, handle: u32) -> Option<Link> {
        let inner = self.inner.borrow();
        inner.links.iter().find(|l| l.handle() == handle).cloned()
    }

    pub(crate) fn forget_link(&self, link: &Link) {
        self.inner.borrow_mut().links.retain(|l| l != link);
    }

    /// Append the frames that re-announce this session's local state.
    pub(crate) fn replay_into(&self, frames: &mut Vec<Frame>) {
        let inner = self.inner.borrow();
        if inner.state.local == Half::Uninit {
            return;
        }
        frames.push(Frame::Begin {
            channel: inner.channel,
        });
        for link in &inner.links {
            link.replay_into(inner.channel, frames);
        }
        if inner.state.local == Half::Closed {
            frames.push(Frame::End {
                channel: inner.channel,
                condition: None,
            });
        }
    }

    pub(crate) fn reset_remote(&self) {
        let links = {
            let mut inner = self.inner.borrow_mut();
            inner.state.remote = Half::Uninit;
            inner.remote_condition = None;
            inner.links.clone()
        };
        for link in links {
            link.reset_remote();
        }
    }

    pub(crate) fn finalize(&self) {
        let links = {
            let mut inner = self.inner.borrow_mut();
            if inner.finalized {
                return;
            }
            inner.finalized = true;
            std::mem::take(&mut inner.links)
        };
        for link in links {
            link.finalize();
        }
        self.emit(EventKind::SessionFinal);
    }

    fn maybe_finalize(&self) {
        if !self.state().is_closed() {
            return;
        }
        if let Some(connection) = self.connection() {
            connection.forget_session(self);
        }
        self.finalize();
    }

    pub(crate) fn channel(&self) -> u16 {
        self.inner.borrow().channel
    }

    /// Queue a link frame, filling in this session's channel number.
    pub(crate) fn push_link_frame(&self, mut frame: Frame) {
        let channel = self.channel();
        match &mut frame {
            Frame::Attach { channel: c, .. }
            | Frame::Flow { channel: c, .. }
            | Frame::Transfer { channel: c, .. }
            | Frame::Disposition { channel: c, .. }
            | Frame::Detach { channel: c, .. } => *c = channel,
            other => {
                debug!(?other, "not a link frame");
                return;
            }
        }
        self.push_frame(frame);
    }

    fn push_frame(&self, frame: Frame) {
        if let Some(connection) = self.connection() {
            connection.push_frame(frame);
        }
    }

    fn emit(&self, kind: EventKind) {
        let collector = self.inner.borrow().collector.clone();
        collector.push(Event::new(kind).with_session(self));
    }
}

impl PartialEq for Session {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Session")
            .field("channel", &inner.channel)
            .field("state", &inner.state)
            .field("links", &inner.links.len())
            .finish_non_exhaustive()
    }
}
