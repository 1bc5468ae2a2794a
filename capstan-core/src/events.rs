//! The event source: collector drain, handler chain and scheduled timers.
//!
//! One event source feeds one reactor. `process()` first drains the
//! collector to quiescence (handlers may cause more events to be queued,
//! which are picked up in the same drain), then dispatches every timer whose
//! deadline has passed. Timers scheduled for the same instant dispatch in
//! scheduling order.

use crate::dispatch::HandlerCell;
use capstan_amqp::{Collector, Connection, Event};
use smallvec::SmallVec;
use std::cell::{Cell, RefCell};
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::rc::Rc;
use std::time::{Duration, Instant};

struct TimerEntry {
    deadline: Instant,
    seq: u64,
    event: Event,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for TimerEntry {}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.deadline
            .cmp(&other.deadline)
            .then(self.seq.cmp(&other.seq))
    }
}

struct SourceInner {
    collector: Collector,
    chain: RefCell<Vec<HandlerCell>>,
    timers: RefCell<BinaryHeap<Reverse<TimerEntry>>>,
    seq: Cell<u64>,
}

/// Shared handle to the reactor's event source.
#[derive(Clone)]
pub struct EventSource {
    inner: Rc<SourceInner>,
}

impl std::fmt::Debug for EventSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSource").finish_non_exhaustive()
    }
}

impl Default for EventSource {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSource {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Rc::new(SourceInner {
                collector: Collector::new(),
                chain: RefCell::new(Vec::new()),
                timers: RefCell::new(BinaryHeap::new()),
                seq: Cell::new(0),
            }),
        }
    }

    /// Append a handler to the dispatch chain.
    pub fn push_handler(&self, handler: HandlerCell) {
        self.inner.chain.borrow_mut().push(handler);
    }

    /// Create a connection whose events feed this source.
    #[must_use]
    pub fn connection(&self) -> Connection {
        Connection::new(&self.inner.collector)
    }

    /// The collector this source drains.
    #[must_use]
    pub fn collector(&self) -> Collector {
        self.inner.collector.clone()
    }

    /// Dispatch one event through the whole chain.
    pub fn dispatch(&self, event: &Event) {
        // Snapshot so a handler adding to the chain does not invalidate the
        // walk. Handlers themselves live behind their own cells.
        let chain: SmallVec<[HandlerCell; 8]> =
            self.inner.chain.borrow().iter().cloned().collect();
        for handler in chain {
            handler.borrow_mut().dispatch(event);
        }
    }

    /// Drain queued collector events, then dispatch all due timers.
    pub fn process(&self) {
        loop {
            let Some(event) = self.inner.collector.peek() else {
                break;
            };
            self.dispatch(&event);
            self.inner.collector.pop();
        }
        let now = Instant::now();
        loop {
            let due = {
                let mut timers = self.inner.timers.borrow_mut();
                match timers.peek() {
                    Some(Reverse(entry)) if entry.deadline <= now => {
                        timers.pop().map(|Reverse(entry)| entry.event)
                    }
                    _ => None,
                }
            };
            match due {
                Some(event) => self.dispatch(&event),
                None => break,
            }
        }
    }

    /// Schedule `event` for dispatch at `deadline`.
    pub fn schedule(&self, deadline: Instant, event: Event) {
        let seq = self.inner.seq.get();
        self.inner.seq.set(seq + 1);
        self.inner.timers.borrow_mut().push(Reverse(TimerEntry {
            deadline,
            seq,
            event,
        }));
    }

    /// Time until the earliest timer, zero if one is already due, `None`
    /// with no timers pending.
    #[must_use]
    pub fn next_interval(&self) -> Option<Duration> {
        let timers = self.inner.timers.borrow();
        let Reverse(entry) = timers.peek()?;
        Some(entry.deadline.saturating_duration_since(Instant::now()))
    }

    /// No queued events and no pending timers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.collector.is_empty() && self.inner.timers.borrow().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::Handler;
    use std::rc::Rc;

    struct NameLog {
        log: Rc<RefCell<Vec<String>>>,
    }

    impl Handler for NameLog {
        fn on_custom(&mut self, event: &Event) {
            self.log
                .borrow_mut()
                .push(event.custom_name().unwrap_or_default().to_owned());
        }
    }

    fn source_with_log() -> (EventSource, Rc<RefCell<Vec<String>>>) {
        let source = EventSource::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        source.push_handler(Rc::new(RefCell::new(Box::new(NameLog { log: log.clone() }))));
        (source, log)
    }

    #[test]
    fn test_timers_dispatch_in_deadline_order() {
        let (source, log) = source_with_log();
        let now = Instant::now();
        source.schedule(now + Duration::from_millis(2), Event::custom("late"));
        source.schedule(now, Event::custom("early"));
        std::thread::sleep(Duration::from_millis(5));
        source.process();
        assert_eq!(*log.borrow(), vec!["early".to_owned(), "late".to_owned()]);
        assert!(source.is_empty());
    }

    #[test]
    fn test_equal_deadlines_keep_schedule_order() {
        let (source, log) = source_with_log();
        let deadline = Instant::now();
        for name in ["a", "b", "c"] {
            source.schedule(deadline, Event::custom(name));
        }
        source.process();
        assert_eq!(*log.borrow(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_future_timer_is_not_dispatched() {
        let (source, log) = source_with_log();
        source.schedule(
            Instant::now() + Duration::from_secs(60),
            Event::custom("later"),
        );
        source.process();
        assert!(log.borrow().is_empty());
        assert!(!source.is_empty());
        let interval = source.next_interval().unwrap();
        assert!(interval > Duration::from_secs(50));
    }

    #[test]
    fn test_collector_drains_before_timers() {
        let (source, log) = source_with_log();
        let conn = source.connection();
        conn.open();
        source.schedule(Instant::now(), Event::custom("timer"));

        struct KindLog {
            log: Rc<RefCell<Vec<String>>>,
        }
        impl Handler for KindLog {
            fn on_unhandled(&mut self, event: &Event) {
                self.log.borrow_mut().push(format!("{:?}", event.kind()));
            }
        }
        source.push_handler(Rc::new(RefCell::new(Box::new(KindLog { log: log.clone() }))));
        source.process();

        let entries = log.borrow();
        let timer_pos = entries.iter().position(|e| e == "timer").unwrap();
        let open_pos = entries
            .iter()
            .position(|e| e == "ConnectionOpen")
            .unwrap();
        assert!(open_pos < timer_pos);
        assert_eq!(*entries.last().unwrap(), "Custom(\"timer\")".to_owned());
    }
}
