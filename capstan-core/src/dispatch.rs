//! Event dispatch.
//!
//! [`Handler`] is the one trait every pipeline stage and every user callback
//! implements: one `on_*` method per event kind, each defaulting to
//! [`Handler::on_unhandled`], plus the messaging hooks the behavioral
//! handlers invoke. The provided [`Handler::dispatch`] routes an event to
//! its method.
//!
//! [`ScopedDispatcher`] is the pipeline stage that realizes per-endpoint
//! handlers: it walks the event's domain objects from finest to coarsest
//! (delivery, link, session, connection) and dispatches to every handler
//! attached to one of them.

use crate::handlers::Reject;
use capstan_amqp::{Category, Connection, Delivery, Event, EventKind, Link, Session};
use smallvec::SmallVec;
use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;

/// Shared, interiorly mutable handler, as stored in attachment slots and the
/// dispatch chain.
pub type HandlerCell = Rc<RefCell<Box<dyn Handler>>>;

/// The event-handling surface.
///
/// Implement the methods you care about; everything else funnels into
/// [`Handler::on_unhandled`], which defaults to doing nothing.
#[allow(unused_variables)]
pub trait Handler {
    /// Route `event` to the method for its kind.
    fn dispatch(&mut self, event: &Event) {
        match event.kind() {
            EventKind::ConnectionInit => self.on_connection_init(event),
            EventKind::ConnectionOpen => self.on_connection_open(event),
            EventKind::ConnectionRemoteOpen => self.on_connection_remote_open(event),
            EventKind::ConnectionClose => self.on_connection_close(event),
            EventKind::ConnectionRemoteClose => self.on_connection_remote_close(event),
            EventKind::ConnectionFinal => self.on_connection_final(event),
            EventKind::SessionInit => self.on_session_init(event),
            EventKind::SessionOpen => self.on_session_open(event),
            EventKind::SessionRemoteOpen => self.on_session_remote_open(event),
            EventKind::SessionClose => self.on_session_close(event),
            EventKind::SessionRemoteClose => self.on_session_remote_close(event),
            EventKind::SessionFinal => self.on_session_final(event),
            EventKind::LinkInit => self.on_link_init(event),
            EventKind::LinkOpen => self.on_link_open(event),
            EventKind::LinkRemoteOpen => self.on_link_remote_open(event),
            EventKind::LinkClose => self.on_link_close(event),
            EventKind::LinkRemoteClose => self.on_link_remote_close(event),
            EventKind::LinkFlow => self.on_link_flow(event),
            EventKind::LinkFinal => self.on_link_final(event),
            EventKind::Delivery => self.on_delivery(event),
            EventKind::Transport => self.on_transport(event),
            EventKind::Timer => self.on_timer(event),
            EventKind::Disconnected => self.on_disconnected(event),
            EventKind::Custom(_) => self.on_custom(event),
        }
    }

    fn on_connection_init(&mut self, event: &Event) {
        self.on_unhandled(event);
    }
    fn on_connection_open(&mut self, event: &Event) {
        self.on_unhandled(event);
    }
    fn on_connection_remote_open(&mut self, event: &Event) {
        self.on_unhandled(event);
    }
    fn on_connection_close(&mut self, event: &Event) {
        self.on_unhandled(event);
    }
    fn on_connection_remote_close(&mut self, event: &Event) {
        self.on_unhandled(event);
    }
    fn on_connection_final(&mut self, event: &Event) {
        self.on_unhandled(event);
    }
    fn on_session_init(&mut self, event: &Event) {
        self.on_unhandled(event);
    }
    fn on_session_open(&mut self, event: &Event) {
        self.on_unhandled(event);
    }
    fn on_session_remote_open(&mut self, event: &Event) {
        self.on_unhandled(event);
    }
    fn on_session_close(&mut self, event: &Event) {
        self.on_unhandled(event);
    }
    fn on_session_remote_close(&mut self, event: &Event) {
        self.on_unhandled(event);
    }
    fn on_session_final(&mut self, event: &Event) {
        self.on_unhandled(event);
    }
    fn on_link_init(&mut self, event: &Event) {
        self.on_unhandled(event);
    }
    fn on_link_open(&mut self, event: &Event) {
        self.on_unhandled(event);
    }
    fn on_link_remote_open(&mut self, event: &Event) {
        self.on_unhandled(event);
    }
    fn on_link_close(&mut self, event: &Event) {
        self.on_unhandled(event);
    }
    fn on_link_remote_close(&mut self, event: &Event) {
        self.on_unhandled(event);
    }
    fn on_link_flow(&mut self, event: &Event) {
        self.on_unhandled(event);
    }
    fn on_link_final(&mut self, event: &Event) {
        self.on_unhandled(event);
    }
    fn on_delivery(&mut self, event: &Event) {
        self.on_unhandled(event);
    }
    fn on_transport(&mut self, event: &Event) {
        self.on_unhandled(event);
    }
    fn on_timer(&mut self, event: &Event) {
        self.on_unhandled(event);
    }
    fn on_disconnected(&mut self, event: &Event) {
        self.on_unhandled(event);
    }
    /// Application-defined event; name available via `event.custom_name()`.
    fn on_custom(&mut self, event: &Event) {
        self.on_unhandled(event);
    }

    /// A decoded message arrived. Return `Err(Reject)` to have the delivery
    /// rejected and settled regardless of [`Handler::auto_accept`].
    fn on_message(&mut self, event: &Event) -> Result<(), Reject> {
        Ok(())
    }
    /// The peer accepted an outgoing delivery.
    fn on_accepted(&mut self, event: &Event) {}
    /// The peer rejected an outgoing delivery.
    fn on_rejected(&mut self, event: &Event) {}
    /// The peer released an outgoing delivery.
    fn on_released(&mut self, event: &Event) {}
    /// The peer modified an outgoing delivery.
    fn on_modified(&mut self, event: &Event) {}
    /// The peer settled a delivery.
    fn on_settled(&mut self, event: &Event) {}

    /// Settle outgoing deliveries automatically once the peer reacted?
    fn auto_settle(&self) -> bool {
        true
    }
    /// Accept and settle incoming messages automatically?
    fn auto_accept(&self) -> bool {
        true
    }

    /// Fallback for every `on_*` method not overridden.
    fn on_unhandled(&mut self, event: &Event) {}
}

/// Objects carrying an engine attachment slot a handler can live in.
pub trait Attachable {
    fn attachment(&self) -> Option<Rc<dyn Any>>;
    fn set_attachment(&self, attachment: Option<Rc<dyn Any>>);
}

macro_rules! impl_attachable {
    ($($ty:ty),*) => {$(
        impl Attachable for $ty {
            fn attachment(&self) -> Option<Rc<dyn Any>> {
                <$ty>::attachment(self)
            }
            fn set_attachment(&self, attachment: Option<Rc<dyn Any>>) {
                <$ty>::set_attachment(self, attachment);
            }
        }
    )*};
}

impl_attachable!(Connection, Session, Link, Delivery);

/// Attach `handler` to an endpoint or delivery. The scoped dispatcher will
/// call it for every event the object is in scope for.
pub fn attach_handler<H: Handler + 'static>(target: &(impl Attachable + ?Sized), handler: H) {
    attach_handler_cell(target, Rc::new(RefCell::new(Box::new(handler))));
}

pub(crate) fn attach_handler_cell(target: &(impl Attachable + ?Sized), cell: HandlerCell) {
    target.set_attachment(Some(cell as Rc<dyn Any>));
}

pub(crate) fn attached_handler(target: &(impl Attachable + ?Sized)) -> Option<HandlerCell> {
    target
        .attachment()
        .and_then(|slot| slot.downcast::<RefCell<Box<dyn Handler>>>().ok())
}

/// Dispatches each event to the handlers attached along its scope chain,
/// finest scope first.
#[derive(Debug, Default)]
pub struct ScopedDispatcher;

impl ScopedDispatcher {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn targets(event: &Event) -> SmallVec<[HandlerCell; 4]> {
        let mut targets = SmallVec::new();
        let depth = match event.category() {
            Category::Delivery => 4,
            Category::Link => 3,
            Category::Session => 2,
            Category::Connection => 1,
            Category::Application => 0,
        };
        if depth >= 4 {
            if let Some(handler) = event.delivery().and_then(|d| attached_handler(d)) {
                targets.push(handler);
            }
        }
        if depth >= 3 {
            if let Some(handler) = event.link().and_then(|l| attached_handler(l)) {
                targets.push(handler);
            }
        }
        if depth >= 2 {
            if let Some(handler) = event.session().and_then(|s| attached_handler(s)) {
                targets.push(handler);
            }
        }
        if depth >= 1 {
            if let Some(handler) = event.connection().and_then(|c| attached_handler(c)) {
                targets.push(handler);
            }
        }
        targets
    }
}

impl Handler for ScopedDispatcher {
    fn dispatch(&mut self, event: &Event) {
        for target in Self::targets(event) {
            target.borrow_mut().dispatch(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use capstan_amqp::Collector;

    struct Recorder {
        log: Rc<RefCell<Vec<String>>>,
        name: &'static str,
    }

    impl Handler for Recorder {
        fn on_unhandled(&mut self, event: &Event) {
            self.log
                .borrow_mut()
                .push(format!("{}:{:?}", self.name, event.kind()));
        }
    }

    #[test]
    fn test_dispatch_routes_by_kind() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut recorder = Recorder {
            log: log.clone(),
            name: "r",
        };
        let collector = Collector::new();
        let conn = Connection::new(&collector);
        recorder.dispatch(&Event::new(EventKind::ConnectionRemoteOpen).with_connection(&conn));
        recorder.dispatch(&Event::custom("wake"));
        assert_eq!(
            *log.borrow(),
            vec![
                "r:ConnectionRemoteOpen".to_owned(),
                "r:Custom(\"wake\")".to_owned()
            ]
        );
    }

    #[test]
    fn test_scope_order_is_finest_first() {
        let collector = Collector::new();
        let conn = Connection::new(&collector);
        let ssn = conn.session();
        let link = ssn.sender("s");
        let delivery = link.delivery("1");

        let log = Rc::new(RefCell::new(Vec::new()));
        for (name, target) in [
            ("delivery", &delivery as &dyn Attachable),
            ("link", &link),
            ("session", &ssn),
            ("connection", &conn),
        ] {
            attach_handler_cell(
                target,
                Rc::new(RefCell::new(Box::new(Recorder {
                    log: log.clone(),
                    name,
                }))),
            );
        }

        let event = Event::new(EventKind::Delivery).with_delivery(&delivery);
        ScopedDispatcher::new().dispatch(&event);

        let order: Vec<String> = log
            .borrow()
            .iter()
            .map(|s| s.split(':').next().unwrap_or_default().to_owned())
            .collect();
        assert_eq!(order, vec!["delivery", "link", "session", "connection"]);
    }

    #[test]
    fn test_link_event_skips_delivery_scope() {
        let collector = Collector::new();
        let conn = Connection::new(&collector);
        let ssn = conn.session();
        let link = ssn.receiver("r");

        let log = Rc::new(RefCell::new(Vec::new()));
        attach_handler(
            &link,
            Recorder {
                log: log.clone(),
                name: "link",
            },
        );

        let event = Event::new(EventKind::LinkFlow).with_link(&link);
        ScopedDispatcher::new().dispatch(&event);
        assert_eq!(log.borrow().len(), 1);
    }
}
