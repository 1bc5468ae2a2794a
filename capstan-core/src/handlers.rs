//! Behavioral handlers: the pipeline stages that automate endpoint
//! handshaking, receiver credit and delivery settlement.
//!
//! [`OutgoingMessageHandler`] and [`IncomingMessageHandler`] are delegating
//! wrappers: wrap any [`Handler`] and its messaging hooks (`on_accepted`,
//! `on_message`, ...) get driven with the right settlement bookkeeping,
//! while every other event passes straight through to the delegate.

use crate::dispatch::Handler;
use capstan_amqp::{Delivery, Disposition, Event, Link, Message};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

/// Signal from [`Handler::on_message`] that the delivery must be rejected.
#[derive(Debug, Clone, Copy, Default)]
pub struct Reject;

impl std::fmt::Display for Reject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "message rejected")
    }
}

impl std::error::Error for Reject {}

/// Mirrors the peer: opens local endpoint halves the peer opened and closes
/// the ones it closed, unless the application already chose otherwise.
#[derive(Debug, Default)]
pub struct Handshaker;

static DYNAMIC_NODE: AtomicU64 = AtomicU64::new(1);

impl Handshaker {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Handler for Handshaker {
    fn on_connection_remote_open(&mut self, event: &Event) {
        if let Some(conn) = event.connection() {
            if conn.state().is_local_uninit() {
                conn.open();
            }
        }
    }

    fn on_session_remote_open(&mut self, event: &Event) {
        if let Some(session) = event.session() {
            if session.state().is_local_uninit() {
                session.open();
            }
        }
    }

    fn on_link_remote_open(&mut self, event: &Event) {
        let Some(link) = event.link() else {
            return;
        };
        if !link.state().is_local_uninit() {
            return;
        }
        let mut source = link.remote_source();
        if source.is_dynamic() && source.address().is_none() {
            // The peer asked for a dynamic node; name one for it.
            let name = format!("tmp-{}", DYNAMIC_NODE.fetch_add(1, Ordering::Relaxed));
            source.set_address(Some(&name));
        }
        link.set_source(source);
        link.set_target(link.remote_target());
        link.open();
    }

    fn on_connection_remote_close(&mut self, event: &Event) {
        if let Some(conn) = event.connection() {
            if !conn.state().is_local_closed() {
                conn.close();
            }
        }
    }

    fn on_session_remote_close(&mut self, event: &Event) {
        if let Some(session) = event.session() {
            if !session.state().is_local_closed() {
                session.close();
            }
        }
    }

    fn on_link_remote_close(&mut self, event: &Event) {
        if let Some(link) = event.link() {
            if !link.state().is_local_closed() {
                link.close();
            }
        }
    }
}

/// Keeps every receiver's credit topped up to a fixed window.
#[derive(Debug)]
pub struct FlowController {
    window: u32,
}

impl FlowController {
    #[must_use]
    pub const fn new(window: u32) -> Self {
        Self { window }
    }

    fn top_up(&self, link: &Link) {
        let credit = link.credit();
        if credit < self.window {
            link.flow(self.window - credit);
        }
    }
}

impl Handler for FlowController {
    fn on_link_open(&mut self, event: &Event) {
        if let Some(link) = event.link().filter(|l| l.is_receiver()) {
            self.top_up(link);
        }
    }

    fn on_link_remote_open(&mut self, event: &Event) {
        if let Some(link) = event.link().filter(|l| l.is_receiver()) {
            self.top_up(link);
        }
    }

    fn on_link_flow(&mut self, event: &Event) {
        if let Some(link) = event.link().filter(|l| l.is_receiver()) {
            self.top_up(link);
        }
    }

    fn on_delivery(&mut self, event: &Event) {
        let Some(link) = event.delivery().and_then(Delivery::link) else {
            return;
        };
        if link.is_receiver() {
            self.top_up(&link);
        }
    }
}

macro_rules! forward_to_delegate {
    () => {
        fn on_connection_init(&mut self, event: &Event) {
            self.delegate.on_connection_init(event);
        }
        fn on_connection_open(&mut self, event: &Event) {
            self.delegate.on_connection_open(event);
        }
        fn on_connection_remote_open(&mut self, event: &Event) {
            self.delegate.on_connection_remote_open(event);
        }
        fn on_connection_close(&mut self, event: &Event) {
            self.delegate.on_connection_close(event);
        }
        fn on_connection_remote_close(&mut self, event: &Event) {
            self.delegate.on_connection_remote_close(event);
        }
        fn on_connection_final(&mut self, event: &Event) {
            self.delegate.on_connection_final(event);
        }
        fn on_session_init(&mut self, event: &Event) {
            self.delegate.on_session_init(event);
        }
        fn on_session_open(&mut self, event: &Event) {
            self.delegate.on_session_open(event);
        }
        fn on_session_remote_open(&mut self, event: &Event) {
            self.delegate.on_session_remote_open(event);
        }
        fn on_session_close(&mut self, event: &Event) {
            self.delegate.on_session_close(event);
        }
        fn on_session_remote_close(&mut self, event: &Event) {
            self.delegate.on_session_remote_close(event);
        }
        fn on_session_final(&mut self, event: &Event) {
            self.delegate.on_session_final(event);
        }
        fn on_link_init(&mut self, event: &Event) {
            self.delegate.on_link_init(event);
        }
        fn on_link_open(&mut self, event: &Event) {
            self.delegate.on_link_open(event);
        }
        fn on_link_remote_open(&mut self, event: &Event) {
            self.delegate.on_link_remote_open(event);
        }
        fn on_link_close(&mut self, event: &Event) {
            self.delegate.on_link_close(event);
        }
        fn on_link_remote_close(&mut self, event: &Event) {
            self.delegate.on_link_remote_close(event);
        }
        fn on_link_flow(&mut self, event: &Event) {
            self.delegate.on_link_flow(event);
        }
        fn on_link_final(&mut self, event: &Event) {
            self.delegate.on_link_final(event);
        }
        fn on_transport(&mut self, event: &Event) {
            self.delegate.on_transport(event);
        }
        fn on_timer(&mut self, event: &Event) {
            self.delegate.on_timer(event);
        }
        fn on_disconnected(&mut self, event: &Event) {
            self.delegate.on_disconnected(event);
        }
        fn on_custom(&mut self, event: &Event) {
            self.delegate.on_custom(event);
        }
        fn on_message(&mut self, event: &Event) -> Result<(), Reject> {
            self.delegate.on_message(event)
        }
        fn on_accepted(&mut self, event: &Event) {
            self.delegate.on_accepted(event);
        }
        fn on_rejected(&mut self, event: &Event) {
            self.delegate.on_rejected(event);
        }
        fn on_released(&mut self, event: &Event) {
            self.delegate.on_released(event);
        }
        fn on_modified(&mut self, event: &Event) {
            self.delegate.on_modified(event);
        }
        fn on_settled(&mut self, event: &Event) {
            self.delegate.on_settled(event);
        }
        fn auto_settle(&self) -> bool {
            self.delegate.auto_settle()
        }
        fn auto_accept(&self) -> bool {
            self.delegate.auto_accept()
        }
        fn on_unhandled(&mut self, event: &Event) {
            self.delegate.on_unhandled(event);
        }
    };
}

/// Drives the delegate's disposition hooks for a sender's deliveries and
/// settles them once the peer has reacted.
///
/// The settlement side effect runs at most once per delivery: the delivery's
/// local-settled flag gates both the hooks and the settle itself, no matter
/// how many update events arrive.
pub struct OutgoingMessageHandler<H: Handler> {
    delegate: H,
}

impl<H: Handler> OutgoingMessageHandler<H> {
    pub fn new(delegate: H) -> Self {
        Self { delegate }
    }

    pub fn delegate(&self) -> &H {
        &self.delegate
    }

    pub fn into_inner(self) -> H {
        self.delegate
    }
}

impl<H: Handler> Handler for OutgoingMessageHandler<H> {
    forward_to_delegate!();

    fn on_delivery(&mut self, event: &Event) {
        let Some(delivery) = event.delivery() else {
            return;
        };
        let Some(link) = delivery.link() else {
            return;
        };
        if !link.is_sender() {
            self.delegate.on_delivery(event);
            return;
        }
        if delivery.updated() && !delivery.local_settled() {
            match delivery.remote_state() {
                Some(Disposition::Accepted) => self.delegate.on_accepted(event),
                Some(Disposition::Rejected) => self.delegate.on_rejected(event),
                Some(Disposition::Released) => self.delegate.on_released(event),
                Some(Disposition::Modified) => self.delegate.on_modified(event),
                None => {}
            }
            if delivery.settled() {
                self.delegate.on_settled(event);
            }
            if self.delegate.auto_settle() {
                delivery.settle();
            }
        }
    }
}

/// Decodes arriving messages for a receiver's deliveries and feeds them to
/// the delegate's `on_message`, honoring `Reject` over auto-accept.
pub struct IncomingMessageHandler<H: Handler> {
    delegate: H,
}

impl<H: Handler> IncomingMessageHandler<H> {
    pub fn new(delegate: H) -> Self {
        Self { delegate }
    }

    pub fn delegate(&self) -> &H {
        &self.delegate
    }

    pub fn into_inner(self) -> H {
        self.delegate
    }
}

impl<H: Handler> Handler for IncomingMessageHandler<H> {
    forward_to_delegate!();

    fn on_delivery(&mut self, event: &Event) {
        let Some(delivery) = event.delivery() else {
            return;
        };
        let Some(link) = delivery.link() else {
            return;
        };
        if !link.is_receiver() {
            self.delegate.on_delivery(event);
            return;
        }
        if delivery.readable() && !delivery.partial() {
            let raw = link.recv(delivery.pending());
            link.advance();
            match Message::decode(raw) {
                Ok(message) => {
                    let enriched = event.clone().with_message(message);
                    match self.delegate.on_message(&enriched) {
                        Ok(()) => {
                            if self.delegate.auto_accept() {
                                accept(delivery);
                            }
                        }
                        Err(Reject) => reject(delivery),
                    }
                }
                Err(err) => {
                    warn!(%err, "undecodable message, rejecting");
                    reject(delivery);
                }
            }
        } else if delivery.updated() && delivery.settled() {
            self.delegate.on_settled(event);
        }
    }
}

/// Accept and settle `delivery`.
pub fn accept(delivery: &Delivery) {
    settle(delivery, Some(Disposition::Accepted));
}

/// Reject and settle `delivery`.
pub fn reject(delivery: &Delivery) {
    settle(delivery, Some(Disposition::Rejected));
}

/// Release `delivery` back to the peer: `delivered` marks it as modified
/// (counted as a delivery attempt), otherwise it is released untouched.
pub fn release(delivery: &Delivery, delivered: bool) {
    if delivered {
        settle(delivery, Some(Disposition::Modified));
    } else {
        settle(delivery, Some(Disposition::Released));
    }
}

/// Settle `delivery`, optionally updating its disposition first.
pub fn settle(delivery: &Delivery, state: Option<Disposition>) {
    if let Some(state) = state {
        delivery.update(state);
    }
    delivery.settle();
}
