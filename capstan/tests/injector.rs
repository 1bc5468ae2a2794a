//! Cross-thread injection: triggers fired from background threads reach the
//! reactor as custom events, none lost, and the loop winds down once the
//! trigger closes.

use capstan::{ApplicationEvent, Event, Handler, Runtime};
use std::cell::Cell;
use std::rc::Rc;
use std::thread;
use std::time::Duration;

struct WakeCount {
    count: Rc<Cell<u32>>,
}

impl Handler for WakeCount {
    fn on_custom(&mut self, event: &Event) {
        if event.custom_name() == Some("wake") {
            self.count.set(self.count.get() + 1);
        }
    }
}

#[test]
fn overlapping_triggers_lose_nothing() {
    capstan::dev_tracing::init_tracing();

    let count = Rc::new(Cell::new(0));
    let runtime = Runtime::with_handlers(vec![Box::new(WakeCount {
        count: count.clone(),
    })]);

    let trigger = runtime.event_trigger().unwrap();
    let producers = {
        let trigger = trigger.clone();
        thread::spawn(move || {
            let workers: Vec<_> = (0..2)
                .map(|_| {
                    let trigger = trigger.clone();
                    thread::spawn(move || {
                        thread::sleep(Duration::from_millis(20));
                        for _ in 0..50 {
                            trigger.trigger(ApplicationEvent::new("wake"));
                        }
                    })
                })
                .collect();
            for worker in workers {
                worker.join().unwrap();
            }
            // Both producers done; let the loop wind down.
            trigger.close();
        })
    };

    runtime.run().unwrap();
    producers.join().unwrap();
    assert_eq!(count.get(), 100);
}
