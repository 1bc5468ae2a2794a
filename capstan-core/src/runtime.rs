//! The user-facing runtime: a reactor, its event source, and the default
//! dispatch chain wired together.
//!
//! Runtimes are constructed explicitly (there is no process-wide default)
//! and are cheap to clone; clones share the same reactor. The default chain
//! is scoped dispatch, the connector, then either the caller's handlers or
//! a credit window of ten.

use crate::acceptor::Acceptor;
use crate::backoff::Backoff;
use crate::connector::{Connector, ConnectorRegistry};
use crate::context::MessagingContext;
use crate::dispatch::{attach_handler_cell, Handler, HandlerCell, ScopedDispatcher};
use crate::error::{Error, Result};
use crate::events::EventSource;
use crate::handlers::FlowController;
use crate::injector::{EventInjector, EventTrigger};
use crate::reactor::{Reactor, Registrar, DEFAULT_TIMEOUT};
use crate::selectable::Selectable;
use crate::url::{Url, Urls};
use capstan_amqp::Event;
use std::cell::{Cell, RefCell};
use std::net::SocketAddr;
use std::rc::Rc;
use std::time::{Duration, Instant};

/// Options for [`Runtime::connect`].
#[derive(Default)]
pub struct ConnectOptions {
    url: Option<String>,
    urls: Option<Vec<String>>,
    address: Option<Urls>,
    handler: Option<Box<dyn Handler>>,
    reconnect: Option<Backoff>,
}

impl ConnectOptions {
    /// Connect to a single address.
    #[must_use]
    pub fn url(url: &str) -> Self {
        Self {
            url: Some(url.to_owned()),
            ..Self::default()
        }
    }

    /// Connect through a rotation of addresses.
    #[must_use]
    pub fn urls<S: AsRef<str>>(urls: &[S]) -> Self {
        Self {
            urls: Some(urls.iter().map(|u| u.as_ref().to_owned()).collect()),
            ..Self::default()
        }
    }

    /// Connect through a pre-parsed rotation.
    #[must_use]
    pub fn address(address: Urls) -> Self {
        Self {
            address: Some(address),
            ..Self::default()
        }
    }

    /// Attach `handler` at connection scope.
    #[must_use]
    pub fn with_handler(mut self, handler: impl Handler + 'static) -> Self {
        self.handler = Some(Box::new(handler));
        self
    }

    /// Reconnect automatically with the given backoff policy.
    #[must_use]
    pub fn with_reconnect(mut self, reconnect: Backoff) -> Self {
        self.reconnect = Some(reconnect);
        self
    }

    fn resolve(self) -> Result<(Urls, Option<Box<dyn Handler>>, Option<Backoff>)> {
        let urls = if let Some(address) = self.address {
            address
        } else if let Some(urls) = self.urls {
            Urls::parse(&urls)?
        } else if let Some(url) = self.url {
            Urls::from(Url::parse(&url)?)
        } else {
            return Err(Error::MissingAddress);
        };
        Ok((urls, self.handler, self.reconnect))
    }
}

/// Handle to a listening acceptor.
pub struct AcceptorHandle {
    closed: Rc<Cell<bool>>,
    addr: SocketAddr,
}

impl AcceptorHandle {
    /// The bound address (real port even when 0 was requested).
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop accepting; the reactor releases the listener on its next sweep.
    pub fn close(&self) {
        self.closed.set(true);
    }
}

#[derive(Debug)]
struct RuntimeInner {
    source: EventSource,
    registrar: Registrar,
    abort: Rc<Cell<bool>>,
    reactor: RefCell<Reactor>,
    registry: ConnectorRegistry,
    trigger: RefCell<Option<EventTrigger>>,
}

/// A reactor plus its dispatch chain. Clones share the runtime.
#[derive(Clone, Debug)]
pub struct Runtime {
    inner: Rc<RuntimeInner>,
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl Runtime {
    /// A runtime with the default chain: scoped dispatch, connector, and a
    /// flow controller with a window of ten.
    #[must_use]
    pub fn new() -> Self {
        Self::build(vec![Box::new(FlowController::new(10))])
    }

    /// A runtime dispatching to `handlers` (after scoped dispatch and the
    /// connector).
    #[must_use]
    pub fn with_handlers(handlers: Vec<Box<dyn Handler>>) -> Self {
        Self::build(handlers)
    }

    fn build(handlers: Vec<Box<dyn Handler>>) -> Self {
        let source = EventSource::new();
        let registrar = Registrar::new();
        let abort = Rc::new(Cell::new(false));

        let connector = Connector::new(source.clone(), registrar.clone());
        let registry = connector.registry();

        source.push_handler(cell(ScopedDispatcher::new()));
        source.push_handler(cell(connector));
        for handler in handlers {
            source.push_handler(Rc::new(RefCell::new(handler)));
        }

        let reactor = Reactor::new(source.clone(), registrar.clone(), abort.clone());
        Self {
            inner: Rc::new(RuntimeInner {
                source,
                registrar,
                abort,
                reactor: RefCell::new(reactor),
                registry,
                trigger: RefCell::new(None),
            }),
        }
    }

    /// The runtime's event source.
    #[must_use]
    pub fn source(&self) -> EventSource {
        self.inner.source.clone()
    }

    /// Open an outbound connection; the connector dials it on the next
    /// iteration.
    pub fn connect(&self, options: ConnectOptions) -> Result<MessagingContext> {
        let (urls, handler, reconnect) = options.resolve()?;
        let conn = self.inner.source.connection();
        if let Some(handler) = handler {
            attach_handler_cell(&conn, Rc::new(RefCell::new(handler)));
        }
        self.inner.registry.register(&conn, urls, reconnect);
        let context = MessagingContext::new(conn);
        context.connection().open();
        Ok(context)
    }

    /// Listen on `url` (e.g. `"localhost:0"`).
    pub fn listen(&self, url: &str) -> Result<AcceptorHandle> {
        let parsed = Url::parse(url)?;
        let (host, port) = parsed.host_port();
        let acceptor = Acceptor::bind(
            self.inner.source.clone(),
            self.inner.registrar.clone(),
            host,
            port,
        )?;
        let handle = AcceptorHandle {
            closed: acceptor.close_flag(),
            addr: acceptor.local_addr(),
        };
        self.inner.registrar.add(Box::new(acceptor));
        Ok(handle)
    }

    /// Dispatch `event` at `deadline`.
    pub fn schedule(&self, deadline: Instant, event: Event) {
        self.inner.source.schedule(deadline, event);
    }

    /// Dispatch `event` after `delay`.
    pub fn schedule_in(&self, delay: Duration, event: Event) {
        self.schedule(Instant::now() + delay, event);
    }

    /// The cross-thread trigger, creating (and registering) the injector on
    /// first use or after the previous one closed.
    pub fn event_trigger(&self) -> Result<EventTrigger> {
        let mut slot = self.inner.trigger.borrow_mut();
        if let Some(trigger) = slot.as_ref() {
            if !trigger.is_closed() {
                return Ok(trigger.clone());
            }
        }
        let (injector, trigger) = EventInjector::new(self.inner.source.clone())?;
        self.inner.registrar.add(Box::new(injector));
        *slot = Some(trigger.clone());
        Ok(trigger)
    }

    /// Register an arbitrary selectable with the reactor.
    pub fn add(&self, selectable: Box<dyn Selectable>) {
        self.inner.registrar.add(selectable);
    }

    /// Run until aborted or out of work.
    pub fn run(&self) -> Result<()> {
        self.inner.reactor.borrow_mut().run()
    }

    /// One reactor iteration with the default wait bound.
    pub fn do_work(&self) -> Result<()> {
        self.inner.reactor.borrow_mut().do_work(DEFAULT_TIMEOUT)
    }

    /// One reactor iteration waiting at most `timeout`.
    pub fn do_work_timeout(&self, timeout: Duration) -> Result<()> {
        self.inner.reactor.borrow_mut().do_work(timeout)
    }

    /// Make `run()` return at the next iteration boundary.
    pub fn stop(&self) {
        self.inner.abort.set(true);
    }
}

fn cell(handler: impl Handler + 'static) -> HandlerCell {
    Rc::new(RefCell::new(Box::new(handler)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idle_runtime_terminates() {
        let runtime = Runtime::new();
        runtime.run().unwrap();
    }

    #[test]
    fn test_connect_requires_an_address() {
        let runtime = Runtime::new();
        let err = runtime.connect(ConnectOptions::default()).unwrap_err();
        assert!(matches!(err, Error::MissingAddress));
    }

    #[test]
    fn test_closed_injector_lets_the_loop_finish() {
        let runtime = Runtime::new();
        let trigger = runtime.event_trigger().unwrap();
        trigger.close();
        // The injector drains and reports closed; the loop runs dry.
        runtime.run().unwrap();
    }

    #[test]
    fn test_trigger_is_reused_until_closed() {
        let runtime = Runtime::new();
        let first = runtime.event_trigger().unwrap();
        let second = runtime.event_trigger().unwrap();
        first.close();
        assert!(second.is_closed());
        let third = runtime.event_trigger().unwrap();
        assert!(!third.is_closed());
    }
}
