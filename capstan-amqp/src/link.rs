//! Links: named, directed message conduits inside a session.
//!
//! A link is either a sender or a receiver. Senders build deliveries
//! (`delivery` / `send` / `advance`) and consume credit; receivers grant
//! credit (`flow`) and read payload off the current delivery (`recv` /
//! `advance`). Credit is reconciled with the peer through delivery counts:
//! effective sender credit is
//! `(remote_delivery_count + remote_credit) - local_delivery_count`.

use crate::codec::{Frame, Role};
use crate::collector::{Collector, Event, EventKind};
use crate::delivery::Delivery;
use crate::endpoint::{Condition, Half, State, Terminus};
use crate::session::{Session, SessionInner};
use bytes::Bytes;
use std::any::Any;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::{Rc, Weak};
use tracing::debug;

#[derive(Debug)]
pub(crate) struct LinkInner {
    pub(crate) id: u64,
    pub(crate) name: String,
    pub(crate) handle: u32,
    pub(crate) role: Role,
    pub(crate) state: State,
    pub(crate) collector: Collector,
    pub(crate) session: Weak<RefCell<SessionInner>>,
    pub(crate) source: Terminus,
    pub(crate) target: Terminus,
    pub(crate) remote_source: Terminus,
    pub(crate) remote_target: Terminus,
    pub(crate) credit: u32,
    pub(crate) delivery_count: u32,
    pub(crate) available: u32,
    pub(crate) remote_available: u32,
    pub(crate) drain: bool,
    pub(crate) deliveries: VecDeque<Delivery>,
    pub(crate) current_out: Option<Delivery>,
    pub(crate) remote_condition: Option<Condition>,
    pub(crate) attachment: Option<Rc<dyn Any>>,
    pub(crate) finalized: bool,
}

/// Handle to a link.
#[derive(Clone)]
pub struct Link {
    pub(crate) inner: Rc<RefCell<LinkInner>>,
}

impl Link {
    pub(crate) fn new(
        name: String,
        handle: u32,
        role: Role,
        collector: Collector,
        session: Weak<RefCell<SessionInner>>,
    ) -> Self {
        Self {
            inner: Rc::new(RefCell::new(LinkInner {
                id: crate::next_entity_id(),
                name,
                handle,
                role,
                state: State::default(),
                collector,
                session,
                source: Terminus::default(),
                target: Terminus::default(),
                remote_source: Terminus::default(),
                remote_target: Terminus::default(),
                credit: 0,
                delivery_count: 0,
                available: 0,
                remote_available: 0,
                drain: false,
                deliveries: VecDeque::new(),
                current_out: None,
                remote_condition: None,
                attachment: None,
                finalized: false,
            })),
        }
    }

    pub(crate) fn from_inner(inner: Rc<RefCell<LinkInner>>) -> Self {
        Self { inner }
    }

    /// Stable identity for side tables.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.borrow().id
    }

    #[must_use]
    pub fn name(&self) -> String {
        self.inner.borrow().name.clone()
    }

    #[must_use]
    pub fn state(&self) -> State {
        self.inner.borrow().state
    }

    #[must_use]
    pub fn is_receiver(&self) -> bool {
        self.inner.borrow().role == Role::Receiver
    }

    #[must_use]
    pub fn is_sender(&self) -> bool {
        self.inner.borrow().role == Role::Sender
    }

    /// The session this link belongs to.
    #[must_use]
    pub fn session(&self) -> Option<Session> {
        self.inner.borrow().session.upgrade().map(Session::from_inner)
    }

    #[must_use]
    pub fn source(&self) -> Terminus {
        self.inner.borrow().source.clone()
    }

    #[must_use]
    pub fn target(&self) -> Terminus {
        self.inner.borrow().target.clone()
    }

    #[must_use]
    pub fn remote_source(&self) -> Terminus {
        self.inner.borrow().remote_source.clone()
    }

    #[must_use]
    pub fn remote_target(&self) -> Terminus {
        self.inner.borrow().remote_target.clone()
    }

    pub fn set_source(&self, terminus: Terminus) {
        self.inner.borrow_mut().source = terminus;
    }

    pub fn set_target(&self, terminus: Terminus) {
        self.inner.borrow_mut().target = terminus;
    }

    pub fn set_source_address(&self, address: Option<&str>) {
        self.inner.borrow_mut().source.set_address(address);
    }

    pub fn set_target_address(&self, address: Option<&str>) {
        self.inner.borrow_mut().target.set_address(address);
    }

    pub fn set_source_dynamic(&self, dynamic: bool) {
        self.inner.borrow_mut().source.set_dynamic(dynamic);
    }

    #[must_use]
    pub fn credit(&self) -> u32 {
        self.inner.borrow().credit
    }

    #[must_use]
    pub fn draining(&self) -> bool {
        self.inner.borrow().drain
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

    /// Open the local half and transmit the attach.
    pub fn open(&self) {
        let frame = {
            let mut inner = self.inner.borrow_mut();
            if inner.state.local != Half::Uninit {
                return;
            }
            inner.state.local = Half::Active;
            Frame::Attach {
                channel: 0,
                handle: inner.handle,
                name: inner.name.clone(),
                role: inner.role,
                source: inner.source.clone(),
                target: inner.target.clone(),
            }
        };
        self.push_frame(frame);
        self.emit(EventKind::LinkOpen);
    }

    /// Close the local half and transmit the detach.
    pub fn close(&self) {
        {
            let mut inner = self.inner.borrow_mut();
            if inner.state.local == Half::Closed {
                return;
            }
            inner.state.local = Half::Closed;
        }
        let handle = self.inner.borrow().handle;
        self.push_frame(Frame::Detach {
            channel: 0,
            handle,
            condition: None,
        });
        self.emit(EventKind::LinkClose);
        self.maybe_finalize();
    }

    /// Grant `delta` additional credits to the peer (receiver side).
    pub fn flow(&self, delta: u32) {
        if delta == 0 {
            return;
        }
        let frame = {
            let mut inner = self.inner.borrow_mut();
            inner.credit += delta;
            Frame::Flow {
                channel: 0,
                handle: inner.handle,
                delivery_count: inner.delivery_count,
                credit: inner.credit,
                available: inner.available,
                drain: inner.drain,
            }
        };
        self.push_frame(frame);
    }

    /// Advertise how many messages this sender has ready.
    pub fn offered(&self, count: u32) {
        let frame = {
            let mut inner = self.inner.borrow_mut();
            inner.available = count;
            Frame::Flow {
                channel: 0,
                handle: inner.handle,
                delivery_count: inner.delivery_count,
                credit: inner.credit,
                available: inner.available,
                drain: inner.drain,
            }
        };
        self.push_frame(frame);
    }

    /// Start an outgoing delivery with the given tag (sender side).
    pub fn delivery(&self, tag: impl Into<Bytes>) -> Delivery {
        let delivery = Delivery::new(tag.into(), &Rc::downgrade(&self.inner));
        self.inner.borrow_mut().current_out = Some(delivery.clone());
        delivery
    }

    /// Append payload bytes to the current outgoing delivery.
    ///
    /// Returns the number of bytes taken (zero when no delivery is open).
    pub fn send(&self, data: &[u8]) -> usize {
        let inner = self.inner.borrow();
        match &inner.current_out {
            Some(delivery) => {
                delivery.inner.borrow_mut().outgoing.extend_from_slice(data);
                data.len()
            }
            None => {
                debug!("send without an open delivery, dropping {} bytes", data.len());
                0
            }
        }
    }

    /// Advance past the current delivery.
    ///
    /// Sender: finish the outgoing delivery and transmit it. Receiver: mark
    /// the current incoming delivery consumed so `recv` moves to the next.
    pub fn advance(&self) {
        let role = self.inner.borrow().role;
        match role {
            Role::Sender => {
                let frame = {
                    let mut inner = self.inner.borrow_mut();
                    let Some(delivery) = inner.current_out.take() else {
                        return;
                    };
                    let (tag, payload) = {
                        let mut d = delivery.inner.borrow_mut();
                        (d.tag.clone(), d.outgoing.split().freeze())
                    };
                    inner.credit = inner.credit.saturating_sub(1);
                    inner.delivery_count = inner.delivery_count.wrapping_add(1);
                    let frame = Frame::Transfer {
                        channel: 0,
                        handle: inner.handle,
                        tag,
                        more: false,
                        settled: false,
                        payload,
                    };
                    inner.deliveries.push_back(delivery);
                    frame
                };
                self.push_frame(frame);
            }
            Role::Receiver => {
                let inner = self.inner.borrow();
                if let Some(delivery) = inner.deliveries.iter().find(|d| d.readable()) {
                    delivery.inner.borrow_mut().readable = false;
                }
            }
        }
    }

    /// Read up to `n` payload bytes off the current incoming delivery.
    #[must_use]
    pub fn recv(&self, n: usize) -> Bytes {
        let inner = self.inner.borrow();
        for delivery in &inner.deliveries {
            if delivery.readable() {
                let mut d = delivery.inner.borrow_mut();
                let take = n.min(d.incoming.len());
                return d.incoming.split_to(take).freeze();
            }
        }
        Bytes::new()
    }

    // ---- frame application (called by the session) ----

    pub(crate) fn remote_attached(&self, source: Terminus, target: Terminus) {
        {
            let mut inner = self.inner.borrow_mut();
            inner.remote_source = source;
            inner.remote_target = target;
            inner.state.remote = Half::Active;
        }
        self.emit(EventKind::LinkRemoteOpen);
    }

    pub(crate) fn apply_flow(
        &self,
        delivery_count: u32,
        credit: u32,
        available: u32,
        drain: bool,
    ) {
        {
            let mut inner = self.inner.borrow_mut();
            match inner.role {
                Role::Sender => {
                    let granted = delivery_count.wrapping_add(credit);
                    inner.credit = granted.saturating_sub(inner.delivery_count);
                    inner.drain = drain;
                }
                Role::Receiver => {
                    inner.remote_available = available;
                }
            }
        }
        self.emit(EventKind::LinkFlow);
    }

    pub(crate) fn apply_transfer(&self, tag: Bytes, more: bool, settled: bool, payload: Bytes) {
        let delivery = {
            let mut inner = self.inner.borrow_mut();
            let partial_tail = inner
                .deliveries
                .back()
                .filter(|d| d.partial())
                .cloned();
            let delivery = match partial_tail {
                Some(existing) => {
                    let mut d = existing.inner.borrow_mut();
                    d.incoming.extend_from_slice(&payload);
                    d.partial = more;
                    if settled {
                        d.remote_settled = true;
                    }
                    drop(d);
                    existing
                }
                None => {
                    let delivery = Delivery::new(tag, &Rc::downgrade(&self.inner));
                    {
                        let mut d = delivery.inner.borrow_mut();
                        d.incoming.extend_from_slice(&payload);
                        d.readable = true;
                        d.partial = more;
                        d.remote_settled = settled;
                    }
                    inner.deliveries.push_back(delivery.clone());
                    delivery
                }
            };
            inner.credit = inner.credit.saturating_sub(1);
            inner.delivery_count = inner.delivery_count.wrapping_add(1);
            delivery
        };
        self.emit_delivery(&delivery);
    }

    pub(crate) fn apply_disposition(
        &self,
        tag: &Bytes,
        state: Option<crate::delivery::Disposition>,
        settled: bool,
    ) {
        let delivery = {
            let inner = self.inner.borrow();
            inner
                .deliveries
                .iter()
                .find(|d| d.tag() == *tag)
                .cloned()
                .or_else(|| inner.current_out.clone().filter(|d| d.tag() == *tag))
        };
        let Some(delivery) = delivery else {
            debug!(?tag, "disposition for unknown delivery, ignoring");
            return;
        };
        {
            let mut d = delivery.inner.borrow_mut();
            d.remote_state = state;
            d.remote_settled = settled;
            d.updated = true;
        }
        self.emit_delivery(&delivery);
    }

    pub(crate) fn apply_detach(&self, condition: Option<Condition>) {
        {
            let mut inner = self.inner.borrow_mut();
            inner.remote_condition = condition;
            inner.state.remote = Half::Closed;
        }
        self.emit(EventKind::LinkRemoteClose);
        self.maybe_finalize();
    }

    pub(crate) fn settle_delivery(&self, delivery: &Delivery) {
        let frame = {
            let mut inner = self.inner.borrow_mut();
            inner.deliveries.retain(|d| d != delivery);
            if inner
                .current_out
                .as_ref()
                .is_some_and(|d| d == delivery)
            {
                inner.current_out = None;
            }
            Frame::Disposition {
                channel: 0,
                handle: inner.handle,
                tag: delivery.tag(),
                state: delivery.local_state(),
                settled: true,
            }
        };
        self.push_frame(frame);
    }

    /// Append the frames that re-announce this link's local state.
    pub(crate) fn replay_into(&self, channel: u16, frames: &mut Vec<Frame>) {
        let inner = self.inner.borrow();
        if inner.state.local == Half::Uninit {
            return;
        }
        frames.push(Frame::Attach {
            channel,
            handle: inner.handle,
            name: inner.name.clone(),
            role: inner.role,
            source: inner.source.clone(),
            target: inner.target.clone(),
        });
        if inner.role == Role::Receiver && inner.credit > 0 {
            frames.push(Frame::Flow {
                channel,
                handle: inner.handle,
                delivery_count: inner.delivery_count,
                credit: inner.credit,
                available: inner.available,
                drain: inner.drain,
            });
        }
        if inner.state.local == Half::Closed {
            frames.push(Frame::Detach {
                channel,
                handle: inner.handle,
                condition: None,
            });
        }
    }

    /// Drop delivery bookkeeping after the transport went away: in-flight
    /// deliveries dangle and delivery counts restart with the next peer.
    pub(crate) fn reset_remote(&self) {
        let mut inner = self.inner.borrow_mut();
        inner.state.remote = Half::Uninit;
        inner.remote_condition = None;
        inner.delivery_count = 0;
        inner.deliveries.clear();
        inner.current_out = None;
        if inner.role == Role::Sender {
            inner.credit = 0;
        }
    }

    pub(crate) fn finalize(&self) {
        {
            let mut inner = self.inner.borrow_mut();
            if inner.finalized {
                return;
            }
            inner.finalized = true;
        }
        self.emit(EventKind::LinkFinal);
    }

    fn maybe_finalize(&self) {
        if !self.state().is_closed() {
            return;
        }
        if let Some(session) = self.session() {
            session.forget_link(self);
        }
        self.finalize();
    }

    pub(crate) fn handle(&self) -> u32 {
        self.inner.borrow().handle
    }

    fn push_frame(&self, frame: Frame) {
        let Some(session) = self.session() else {
            return;
        };
        session.push_link_frame(frame);
    }

    fn emit(&self, kind: EventKind) {
        let collector = self.inner.borrow().collector.clone();
        collector.push(Event::new(kind).with_link(self));
    }

    fn emit_delivery(&self, delivery: &Delivery) {
        let collector = self.inner.borrow().collector.clone();
        collector.push(Event::new(EventKind::Delivery).with_delivery(delivery));
    }
}

impl PartialEq for Link {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Link")
            .field("name", &inner.name)
            .field("role", &inner.role)
            .field("state", &inner.state)
            .field("credit", &inner.credit)
            .finish_non_exhaustive()
    }
}
