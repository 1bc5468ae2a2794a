//! Delivery: one message transfer on a link.
//!
//! A delivery tracks the payload bytes (incoming side), the disposition each
//! peer has taken, and the settlement flags. `settled()` reports the
//! *remote* peer's settlement; `local_settled()` reports ours. The runtime's
//! outgoing handler uses the local flag as its once-only settlement guard.

use crate::link::{Link, LinkInner};
use bytes::{Bytes, BytesMut};
use std::any::Any;
use std::cell::RefCell;
use std::rc::{Rc, Weak};

/// Terminal outcome of a delivery at one peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Accepted,
    Rejected,
    Released,
    Modified,
}

#[derive(Debug)]
pub(crate) struct DeliveryInner {
    pub(crate) id: u64,
    pub(crate) tag: Bytes,
    pub(crate) link: Weak<RefCell<LinkInner>>,
    pub(crate) incoming: BytesMut,
    pub(crate) outgoing: BytesMut,
    pub(crate) readable: bool,
    pub(crate) partial: bool,
    pub(crate) updated: bool,
    pub(crate) remote_settled: bool,
    pub(crate) local_settled: bool,
    pub(crate) remote_state: Option<Disposition>,
    pub(crate) local_state: Option<Disposition>,
    pub(crate) attachment: Option<Rc<dyn Any>>,
}

/// Handle to a delivery.
#[derive(Clone)]
pub struct Delivery {
    pub(crate) inner: Rc<RefCell<DeliveryInner>>,
}

impl Delivery {
    pub(crate) fn new(tag: Bytes, link: &Weak<RefCell<LinkInner>>) -> Self {
        Self {
            inner: Rc::new(RefCell::new(DeliveryInner {
                id: crate::next_entity_id(),
                tag,
                link: link.clone(),
                incoming: BytesMut::new(),
                outgoing: BytesMut::new(),
                readable: false,
                partial: false,
                updated: false,
                remote_settled: false,
                local_settled: false,
                remote_state: None,
                local_state: None,
                attachment: None,
            })),
        }
    }

    /// Stable identity for side tables.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.borrow().id
    }

    #[must_use]
    pub fn tag(&self) -> Bytes {
        self.inner.borrow().tag.clone()
    }

    /// Bytes of payload not yet read off this delivery.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inner.borrow().incoming.len()
    }

    /// True while incoming payload is available to read.
    #[must_use]
    pub fn readable(&self) -> bool {
        self.inner.borrow().readable
    }

    /// True while more transfer frames for this delivery are expected.
    #[must_use]
    pub fn partial(&self) -> bool {
        self.inner.borrow().partial
    }

    /// True once the remote disposition changed since the delivery was last
    /// dispatched.
    #[must_use]
    pub fn updated(&self) -> bool {
        self.inner.borrow().updated
    }

    /// True once the remote peer settled this delivery.
    #[must_use]
    pub fn settled(&self) -> bool {
        self.inner.borrow().remote_settled
    }

    /// True once this side settled the delivery.
    #[must_use]
    pub fn local_settled(&self) -> bool {
        self.inner.borrow().local_settled
    }

    #[must_use]
    pub fn remote_state(&self) -> Option<Disposition> {
        self.inner.borrow().remote_state
    }

    #[must_use]
    pub fn local_state(&self) -> Option<Disposition> {
        self.inner.borrow().local_state
    }

    /// Set the local disposition. Transmitted when the delivery is settled.
    pub fn update(&self, state: Disposition) {
        self.inner.borrow_mut().local_state = Some(state);
    }

    /// Settle the delivery: transmit the local disposition with the settled
    /// flag and forget the delivery on this side. Idempotent.
    pub fn settle(&self) {
        let link = {
            let mut inner = self.inner.borrow_mut();
            if inner.local_settled {
                return;
            }
            inner.local_settled = true;
            inner.link.upgrade()
        };
        if let Some(link) = link {
            Link::from_inner(link).settle_delivery(self);
        }
    }

    /// The link this delivery travels on.
    #[must_use]
    pub fn link(&self) -> Option<Link> {
        self.inner.borrow().link.upgrade().map(Link::from_inner)
    }

    /// The user attachment slot.
    #[must_use]
    pub fn attachment(&self) -> Option<Rc<dyn Any>> {
        self.inner.borrow().attachment.clone()
    }

    pub fn set_attachment(&self, attachment: Option<Rc<dyn Any>>) {
        self.inner.borrow_mut().attachment = attachment;
    }
}

impl PartialEq for Delivery {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Delivery")
            .field("tag", &inner.tag)
            .field("readable", &inner.readable)
            .field("remote_state", &inner.remote_state)
            .field("remote_settled", &inner.remote_settled)
            .finish_non_exhaustive()
    }
}
