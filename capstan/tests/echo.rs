//! Loopback echo: a server and a client sharing one reactor. The client
//! opens a sender, ships one JSON message, sees exactly one acceptance, and
//! both sides close cleanly.

use capstan::{
    attach_handler, AcceptorHandle, Bytes, ConnectOptions, Event, FlowController, Handler,
    Handshaker, IncomingMessageHandler, Message, OutgoingMessageHandler, Reject, Runtime, Sender,
};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

struct ServerLogic {
    received: Rc<RefCell<Vec<Bytes>>>,
}

impl Handler for ServerLogic {
    fn on_message(&mut self, event: &Event) -> Result<(), Reject> {
        let message = event.message().expect("delivery carries a message");
        self.received.borrow_mut().push(message.body().clone());
        Ok(())
    }
}

struct ClientLogic {
    sender: Rc<Sender>,
    sent: bool,
    accepted: Rc<Cell<u32>>,
}

impl Handler for ClientLogic {
    fn on_link_flow(&mut self, _event: &Event) {
        if !self.sent && self.sender.credit() > 0 {
            let body = serde_json::to_vec(&serde_json::json!({"sequence": 0})).unwrap();
            self.sender.send_msg(&Message::with_body(body));
            self.sent = true;
        }
    }

    fn on_accepted(&mut self, event: &Event) {
        self.accepted.set(self.accepted.get() + 1);
        self.sender.close();
        if let Some(conn) = event.connection() {
            conn.close();
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
fn echo_round_trip() {
    capstan::dev_tracing::init_tracing();

    let received = Rc::new(RefCell::new(Vec::new()));
    let runtime = Runtime::with_handlers(vec![
        Box::new(Handshaker::new()),
        Box::new(FlowController::new(10)),
        Box::new(IncomingMessageHandler::new(ServerLogic {
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

    let accepted = Rc::new(Cell::new(0));
    let sender = Rc::new(context.sender("q"));
    attach_handler(
        sender.link(),
        OutgoingMessageHandler::new(ClientLogic {
            sender: sender.clone(),
            sent: false,
            accepted: accepted.clone(),
        }),
    );

    runtime.run().unwrap();

    let received = received.borrow();
    assert_eq!(received.len(), 1);
    let body: serde_json::Value = serde_json::from_slice(&received[0]).unwrap();
    assert_eq!(body, serde_json::json!({"sequence": 0}));
    assert_eq!(accepted.get(), 1);
    assert!(context.connection().state().is_closed());
    assert!(sender.state().is_closed());
}
