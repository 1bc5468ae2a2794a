//! Connections: the top-level endpoint.
//!
//! A connection owns its sessions, queues the frames its endpoints want
//! transmitted, and applies the frames a transport feeds it. It performs no
//! I/O: a [`crate::transport::Transport`] binds to it and moves the bytes.

use crate::codec::Frame;
use crate::collector::{Collector, Event, EventKind};
use crate::endpoint::{Condition, Half, State};
use crate::error::{EngineError, Result};
use crate::session::Session;
use std::any::Any;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use tracing::debug;

#[derive(Debug)]
pub(crate) struct ConnectionInner {
    pub(crate) id: u64,
    pub(crate) state: State,
    pub(crate) hostname: Option<String>,
    pub(crate) collector: Collector,
    pub(crate) sessions: Vec<Session>,
    pub(crate) next_channel: u16,
    pub(crate) outbound: VecDeque<Frame>,
    pub(crate) remote_condition: Option<Condition>,
    pub(crate) peer_user: Option<String>,
    pub(crate) attachment: Option<Rc<dyn Any>>,
    pub(crate) finalized: bool,
}

/// Handle to a connection.
#[derive(Clone)]
pub struct Connection {
    pub(crate) inner: Rc<RefCell<ConnectionInner>>,
}

impl Connection {
    /// Create a connection feeding events to `collector`.
    #[must_use]
    pub fn new(collector: &Collector) -> Self {
        let conn = Self {
            inner: Rc::new(RefCell::new(ConnectionInner {
                id: crate::next_entity_id(),
                state: State::default(),
                hostname: None,
                collector: collector.clone(),
                sessions: Vec::new(),
                next_channel: 0,
                outbound: VecDeque::new(),
                remote_condition: None,
                peer_user: None,
                attachment: None,
                finalized: false,
            })),
        };
        collector.push(Event::new(EventKind::ConnectionInit).with_connection(&conn));
        conn
    }

    pub(crate) fn from_inner(inner: Rc<RefCell<ConnectionInner>>) -> Self {
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

    #[must_use]
    pub fn hostname(&self) -> Option<String> {
        self.inner.borrow().hostname.clone()
    }

    pub fn set_hostname(&self, hostname: Option<&str>) {
        self.inner.borrow_mut().hostname = hostname.map(str::to_owned);
    }

    #[must_use]
    pub fn remote_condition(&self) -> Option<Condition> {
        self.inner.borrow().remote_condition.clone()
    }

    /// The user name the peer presented during authentication, if any.
    #[must_use]
    pub fn peer_user(&self) -> Option<String> {
        self.inner.borrow().peer_user.clone()
    }

    /// The user attachment slot.
    #[must_use]
    pub fn attachment(&self) -> Option<Rc<dyn Any>> {
        self.inner.borrow().attachment.clone()
    }

    pub fn set_attachment(&self, attachment: Option<Rc<dyn Any>>) {
        self.inner.borrow_mut().attachment = attachment;
    }

    /// Open the local half and transmit the open.
    pub fn open(&self) {
        let frame = {
            let mut inner = self.inner.borrow_mut();
            if inner.state.local != Half::Uninit {
                return;
            }
            inner.state.local = Half::Active;
            Frame::Open {
                hostname: inner.hostname.clone(),
            }
        };
        self.push_frame(frame);
        self.emit(EventKind::ConnectionOpen);
    }

    /// Close the local half and transmit the close.
    pub fn close(&self) {
        self.close_with(None);
    }

    /// Close the local half, reporting `condition` to the peer.
    pub fn close_with(&self, condition: Option<Condition>) {
        {
            let mut inner = self.inner.borrow_mut();
            if inner.state.local == Half::Closed {
                return;
            }
            inner.state.local = Half::Closed;
        }
        self.push_frame(Frame::Close { condition });
        self.emit(EventKind::ConnectionClose);
        self.maybe_finalize();
    }

    /// Create a session on this connection.
    #[must_use]
    pub fn session(&self) -> Session {
        let session = {
            let mut inner = self.inner.borrow_mut();
            let channel = inner.next_channel;
            inner.next_channel += 1;
            let session = Session::new(channel, inner.collector.clone(), Rc::downgrade(&self.inner));
            inner.sessions.push(session.clone());
            session
        };
        let collector = self.collector();
        collector.push(Event::new(EventKind::SessionInit).with_session(&session));
        session
    }

    // ---- transport plumbing ----

    pub(crate) fn collector(&self) -> Collector {
        self.inner.borrow().collector.clone()
    }

    pub(crate) fn push_frame(&self, frame: Frame) {
        self.inner.borrow_mut().outbound.push_back(frame);
    }

    pub(crate) fn take_outbound(&self) -> Vec<Frame> {
        self.inner.borrow_mut().outbound.drain(..).collect()
    }

    /// Rebuild the outbound queue from current local state. Called when a
    /// transport binds, so a rebound connection re-announces itself.
    pub(crate) fn replay_frames(&self) {
        let mut inner = self.inner.borrow_mut();
        inner.outbound.clear();
        if inner.state.local == Half::Uninit {
            return;
        }
        let mut frames = vec![Frame::Open {
            hostname: inner.hostname.clone(),
        }];
        for session in &inner.sessions {
            session.replay_into(&mut frames);
        }
        if inner.state.local == Half::Closed {
            frames.push(Frame::Close { condition: None });
        }
        inner.outbound.extend(frames);
    }

    /// Forget everything the old peer told us. Called when a transport
    /// unbinds after a disconnect.
    pub(crate) fn reset_remote(&self) {
        let sessions = {
            let mut inner = self.inner.borrow_mut();
            inner.state.remote = Half::Uninit;
            inner.remote_condition = None;
            inner.peer_user = None;
            inner.sessions.clone()
        };
        for session in sessions {
            session.reset_remote();
        }
    }

    /// Apply one frame received from the peer.
    pub(crate) fn handle_frame(&self, frame: Frame) -> Result<()> {
        match frame {
            Frame::Auth {
                mechanism, user, ..
            } => {
                debug!(%mechanism, %user, "peer authentication");
                self.inner.borrow_mut().peer_user = Some(user);
            }
            Frame::Open { hostname } => {
                debug!(?hostname, "remote open");
                self.inner.borrow_mut().state.remote = Half::Active;
                self.emit(EventKind::ConnectionRemoteOpen);
            }
            Frame::Begin { channel } => {
                let session = match self.session_by_channel(channel) {
                    Some(session) => session,
                    None => self.remote_session(channel),
                };
                session.remote_opened();
            }
            Frame::Attach {
                channel,
                handle,
                name,
                role,
                source,
                target,
            } => {
                let session = self
                    .session_by_channel(channel)
                    .ok_or(EngineError::Violation("attach on unknown channel"))?;
                session.handle_attach(handle, &name, role, source, target);
            }
            Frame::Flow {
                channel,
                handle,
                delivery_count,
                credit,
                available,
                drain,
            } => {
                let link = self.link_at(channel, handle)?;
                link.apply_flow(delivery_count, credit, available, drain);
            }
            Frame::Transfer {
                channel,
                handle,
                tag,
                more,
                settled,
                payload,
            } => {
                let link = self.link_at(channel, handle)?;
                link.apply_transfer(tag, more, settled, payload);
            }
            Frame::Disposition {
                channel,
                handle,
                tag,
                state,
                settled,
            } => {
                let link = self.link_at(channel, handle)?;
                link.apply_disposition(&tag, state, settled);
            }
            Frame::Detach {
                channel,
                handle,
                condition,
            } => {
                let link = self.link_at(channel, handle)?;
                link.apply_detach(condition);
            }
            Frame::End { channel, condition } => {
                let session = self
                    .session_by_channel(channel)
                    .ok_or(EngineError::Violation("end on unknown channel"))?;
                session.remote_closed(condition);
            }
            Frame::Close { condition } => {
                {
                    let mut inner = self.inner.borrow_mut();
                    inner.remote_condition = condition;
                    inner.state.remote = Half::Closed;
                }
                self.emit(EventKind::ConnectionRemoteClose);
                self.maybe_finalize();
            }
        }
        Ok(())
    }

    pub(crate) fn emit_transport_event(&self) {
        let collector = self.collector();
        collector.push(Event::new(EventKind::Transport).with_connection(self));
    }

    pub(crate) fn forget_session(&self, session: &Session) {
        self.inner.borrow_mut().sessions.retain(|s| s != session);
    }

    fn session_by_channel(&self, channel: u16) -> Option<Session> {
        let inner = self.inner.borrow();
        inner
            .sessions
            .iter()
            .find(|s| s.channel() == channel)
            .cloned()
    }

    fn remote_session(&self, channel: u16) -> Session {
        let session = {
            let mut inner = self.inner.borrow_mut();
            let session = Session::new(channel, inner.collector.clone(), Rc::downgrade(&self.inner));
            inner.sessions.push(session.clone());
            inner.next_channel = inner.next_channel.max(channel + 1);
            session
        };
        let collector = self.collector();
        collector.push(Event::new(EventKind::SessionInit).with_session(&session));
        session
    }

    fn link_at(&self, channel: u16, handle: u32) -> Result<crate::link::Link> {
        let session = self
            .session_by_channel(channel)
            .ok_or(EngineError::Violation("frame on unknown channel"))?;
        session
            .link_by_handle(handle)
            .ok_or(EngineError::Violation("frame on unknown handle"))
    }

    fn maybe_finalize(&self) {
        if !self.state().is_closed() {
            return;
        }
        let sessions = {
            let mut inner = self.inner.borrow_mut();
            if inner.finalized {
                return;
            }
            inner.finalized = true;
            std::mem::take(&mut inner.sessions)
        };
        for session in sessions {
            session.finalize();
        }
        self.emit(EventKind::ConnectionFinal);
    }

    fn emit(&self, kind: EventKind) {
        let collector = self.collector();
        collector.push(Event::new(kind).with_connection(self));
    }
}

impl PartialEq for Connection {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Connection")
            .field("id", &inner.id)
            .field("state", &inner.state)
            .field("sessions", &inner.sessions.len())
            .finish_non_exhaustive()
    }
}
