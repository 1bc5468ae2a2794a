//! Cross-thread event injection.
//!
//! The runtime is single-threaded; this is the one safe way in from
//! outside. [`EventTrigger`] can be cloned into any thread: `trigger`
//! enqueues an [`ApplicationEvent`] and pokes a socketpair so the reactor's
//! readiness wait returns. The reactor-side [`EventInjector`] drains the
//! pipe and the queue and dispatches each event.

use crate::events::EventSource;
use crate::selectable::Selectable;
use capstan_amqp::Event;
use std::io::{Read, Write};
use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

/// An event built outside the reactor thread: just a name; it is dispatched
/// as a custom event.
#[derive(Debug, Clone)]
pub struct ApplicationEvent {
    name: String,
}

impl ApplicationEvent {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Sending side: safe to clone and use from any thread.
#[derive(Clone)]
pub struct EventTrigger {
    tx: flume::Sender<ApplicationEvent>,
    writer: Arc<UnixStream>,
    closed: Arc<AtomicBool>,
}

impl std::fmt::Debug for EventTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventTrigger").finish_non_exhaustive()
    }
}

impl EventTrigger {
    /// Enqueue `event` and wake the reactor.
    pub fn trigger(&self, event: ApplicationEvent) {
        if self.closed.load(Ordering::Acquire) {
            debug!("trigger on closed injector, dropping event");
            return;
        }
        let _ = self.tx.send(event);
        self.wake();
    }

    /// Mark the injector closed; it is removed from the reactor once its
    /// queue has drained.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.wake();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn wake(&self) {
        // A full pipe already guarantees a pending wakeup.
        let _ = (&*self.writer).write(&[b'!']);
    }
}

/// Reactor side: a selectable draining the pipe and the queue.
pub struct EventInjector {
    rx: flume::Receiver<ApplicationEvent>,
    reader: UnixStream,
    closed: Arc<AtomicBool>,
    source: EventSource,
}

impl EventInjector {
    /// Build an injector plus its cross-thread trigger.
    pub fn new(source: EventSource) -> std::io::Result<(Self, EventTrigger)> {
        let (reader, writer) = UnixStream::pair()?;
        reader.set_nonblocking(true)?;
        writer.set_nonblocking(true)?;
        let (tx, rx) = flume::unbounded();
        let closed = Arc::new(AtomicBool::new(false));
        let trigger = EventTrigger {
            tx,
            writer: Arc::new(writer),
            closed: closed.clone(),
        };
        Ok((
            Self {
                rx,
                reader,
                closed,
                source,
            },
            trigger,
        ))
    }
}

impl Selectable for EventInjector {
    fn fd(&self) -> RawFd {
        self.reader.as_raw_fd()
    }

    fn reading(&mut self) -> bool {
        true
    }

    fn writing(&mut self) -> bool {
        false
    }

    fn readable(&mut self) {
        let mut buf = [0u8; 512];
        let _ = (&self.reader).read(&mut buf);
        while let Ok(event) = self.rx.try_recv() {
            trace!(name = event.name(), "injected event");
            self.source.dispatch(&Event::custom(event.name()));
        }
    }

    fn writable(&mut self) {}

    fn closed(&mut self) -> bool {
        self.closed.load(Ordering::Acquire) && self.rx.is_empty()
    }

    fn removed(&mut self) {}
}
