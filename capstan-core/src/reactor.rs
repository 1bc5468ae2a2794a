//! The readiness loop.
//!
//! Single-threaded and cooperative. Each iteration: drain the event source
//! (collector plus due timers), sweep out closed participants until the set
//! is stable, then block in one poll bounded by the earliest timer, and pump
//! whichever participants the OS reported ready.

use crate::error::Result;
use crate::events::EventSource;
use crate::selectable::Selectable;
use std::cell::{Cell, RefCell};
use std::io;
use std::rc::Rc;
use std::time::Duration;
use tracing::{error, trace};

/// Upper bound on one readiness wait.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

/// Hand-off point for new reactor participants.
///
/// Handlers and acceptors run while the reactor is mid-iteration, so they
/// queue additions here; the reactor adopts them at the next sweep.
#[derive(Clone, Default)]
pub struct Registrar {
    pending: Rc<RefCell<Vec<Box<dyn Selectable>>>>,
}

impl std::fmt::Debug for Registrar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registrar").finish_non_exhaustive()
    }
}

impl Registrar {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `selectable` for adoption by the reactor.
    pub fn add(&self, selectable: Box<dyn Selectable>) {
        self.pending.borrow_mut().push(selectable);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.borrow().is_empty()
    }

    fn drain(&self) -> Vec<Box<dyn Selectable>> {
        std::mem::take(&mut *self.pending.borrow_mut())
    }
}

struct Entry {
    key: u64,
    selectable: Box<dyn Selectable>,
}

impl std::fmt::Debug for Reactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reactor").finish_non_exhaustive()
    }
}

/// The poll loop over all registered selectables.
pub struct Reactor {
    source: EventSource,
    registrar: Registrar,
    abort: Rc<Cell<bool>>,
    entries: Vec<Entry>,
    sources: popol::Sources<u64>,
    next_key: u64,
}

impl Reactor {
    #[must_use]
    pub fn new(source: EventSource, registrar: Registrar, abort: Rc<Cell<bool>>) -> Self {
        Self {
            source,
            registrar,
            abort,
            entries: Vec::new(),
            sources: popol::Sources::new(),
            next_key: 1,
        }
    }

    /// Nothing left to do: no events, no timers, no participants.
    #[must_use]
    pub fn redundant(&self) -> bool {
        self.source.is_empty() && self.entries.is_empty() && self.registrar.is_empty()
    }

    /// Run until aborted or redundant.
    pub fn run(&mut self) -> Result<()> {
        while !self.abort.get() && !self.redundant() {
            self.do_work(DEFAULT_TIMEOUT)?;
        }
        Ok(())
    }

    /// One reactor iteration: process events, sweep, wait, pump.
    pub fn do_work(&mut self, timeout: Duration) -> Result<()> {
        self.source.process();
        if self.abort.get() {
            return Ok(());
        }

        // Adopt additions and sweep out closed participants until stable;
        // removal handlers may add or close more.
        loop {
            for selectable in self.registrar.drain() {
                let key = self.next_key;
                self.next_key += 1;
                self.sources
                    .register(key, &selectable.fd(), popol::interest::ALL);
                self.entries.push(Entry { key, selectable });
            }

            let mut closed_keys = Vec::new();
            for entry in &mut self.entries {
                let reading = entry.selectable.reading();
                let writing = entry.selectable.writing();
                if entry.selectable.closed() {
                    closed_keys.push(entry.key);
                    continue;
                }
                if let Some(source) = self.sources.get_mut(&entry.key) {
                    source.unset(popol::interest::ALL);
                    if reading {
                        source.set(popol::interest::READ);
                    }
                    if writing {
                        source.set(popol::interest::WRITE);
                    }
                }
            }

            for key in &closed_keys {
                self.sources.unregister(key);
                if let Some(pos) = self.entries.iter().position(|e| e.key == *key) {
                    let mut entry = self.entries.remove(pos);
                    entry.selectable.removed();
                }
            }

            if closed_keys.is_empty() && self.registrar.is_empty() {
                break;
            }
        }

        if self.redundant() {
            return Ok(());
        }

        let timeout = match self.source.next_interval() {
            Some(interval) => timeout.min(interval),
            None => timeout,
        };

        trace!(
            selectables = self.entries.len(),
            ?timeout,
            "waiting for readiness"
        );
        let mut events = popol::Events::new();
        match self.sources.wait_timeout(&mut events, timeout) {
            Ok(()) => {
                for (key, event) in events.iter() {
                    let Some(entry) = self.entries.iter_mut().find(|e| e.key == *key) else {
                        continue;
                    };
                    if event.invalid {
                        // The descriptor went away underneath us; the next
                        // sweep will collect the participant.
                        error!(key, "invalid descriptor in poll set");
                        continue;
                    }
                    // Error and hangup conditions surface through the pumps.
                    if event.readable || event.errored || event.hangup {
                        entry.selectable.readable();
                    }
                    if event.writable || event.errored || event.hangup {
                        entry.selectable.writable();
                    }
                }
            }
            Err(err)
                if err.kind() == io::ErrorKind::TimedOut
                    || err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(err.into()),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_reactor_terminates() {
        let source = EventSource::new();
        let registrar = Registrar::new();
        let abort = Rc::new(Cell::new(false));
        let mut reactor = Reactor::new(source, registrar, abort);
        reactor.run().unwrap();
    }

    #[test]
    fn test_pending_events_are_processed_before_exit() {
        let source = EventSource::new();
        let conn = source.connection();
        conn.open();
        assert!(!source.is_empty());

        let registrar = Registrar::new();
        let abort = Rc::new(Cell::new(false));
        let mut reactor = Reactor::new(source.clone(), registrar, abort);
        reactor.run().unwrap();
        assert!(source.is_empty());
    }

    #[test]
    fn test_abort_stops_the_loop() {
        let source = EventSource::new();
        let registrar = Registrar::new();
        let abort = Rc::new(Cell::new(false));
        abort.set(true);
        // A pending timer would otherwise keep the loop alive.
        source.schedule(
            std::time::Instant::now() + Duration::from_secs(3600),
            capstan_amqp::Event::custom("never"),
        );
        let mut reactor = Reactor::new(source, registrar, abort);
        reactor.run().unwrap();
    }
}
