//! Backpressure: a sender offering 1000 messages against a credit window of
//! ten fills exactly its credit on every flow event; every message is
//! accepted.

use capstan::{
    attach_handler, AcceptorHandle, ConnectOptions, Event, FlowController, Handler, Handshaker,
    IncomingMessageHandler, Message, OutgoingMessageHandler, Reject, Runtime, Sender,
};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

const TOTAL: u32 = 1000;
const WINDOW: u32 = 10;

struct ServerCount {
    received: Rc<Cell<u32>>,
}

impl Handler for ServerCount {
    fn on_message(&mut self, _event: &Event) -> Result<(), Reject> {
        self.received.set(self.received.get() + 1);
        Ok(())
    }
}

struct Firehose {
    sender: Rc<Sender>,
    sent: u32,
    confirmed: Rc<Cell<u32>>,
    batches: Rc<RefCell<Vec<u32>>>,
}

impl Handler for Firehose {
    fn on_link_flow(&mut self, _event: &Event) {
        let credit = self.sender.credit();
        let remaining = TOTAL - self.sent;
        let mut batch = 0;
        while self.sent < TOTAL && self.sender.credit() > 0 {
            let body = serde_json::to_vec(&serde_json::json!({"sequence": self.sent})).unwrap();
            self.sender.send_msg(&Message::with_body(body));
            self.sent += 1;
            batch += 1;
        }
        if batch > 0 {
            assert_eq!(batch, credit.min(remaining));
            self.batches.borrow_mut().push(batch);
        }
    }

    fn on_accepted(&mut self, event: &Event) {
        self.confirmed.set(self.confirmed.get() + 1);
        if self.confirmed.get() == TOTAL {
            self.sender.close();
            if let Some(conn) = event.connection() {
                conn.close();
            }
        }
    }
}

struct Stopper {
    runtime: Runtime,
    acceptor: AcceptorHandle,
}

impl Handler for Stopper {
    fn on_connection_final(&mut self, _event: &Event) {
        self.acceptor.close();
        self.runtime.stop();
    }
}

#[test]
fn window_paces_the_firehose() {
    capstan::dev_tracing::init_tracing();

    let received = Rc::new(Cell::new(0));
    let runtime = Runtime::with_handlers(vec![
        Box::new(Handshaker::new()),
        Box::new(FlowController::new(WINDOW)),
        Box::new(IncomingMessageHandler::new(ServerCount {
            received: received.clone(),
        })),
    ]);

    let acceptor = runtime.listen("127.0.0.1:0").unwrap();
    let url = format!("127.0.0.1:{}", acceptor.local_addr().port());

    let context = runtime.connect(ConnectOptions::url(&url)).unwrap();
    attach_handler(
        context.connection(),
        Stopper {
            runtime: runtime.clone(),
            acceptor,
        },
    );

    let confirmed = Rc::new(Cell::new(0));
    let batches = Rc::new(RefCell::new(Vec::new()));
    let sender = Rc::new(context.sender("q"));
    sender.offered(TOTAL);
    attach_handler(
        sender.link(),
        OutgoingMessageHandler::new(Firehose {
            sender: sender.clone(),
            sent: 0,
            confirmed: confirmed.clone(),
            batches: batches.clone(),
        }),
    );

    runtime.run().unwrap();

    assert_eq!(received.get(), TOTAL);
    assert_eq!(confirmed.get(), TOTAL);
    // Credit caps every burst.
    let batches = batches.borrow();
    assert!(batches.iter().all(|b| *b <= WINDOW));
    assert_eq!(batches.iter().sum::<u32>(), TOTAL);
}
