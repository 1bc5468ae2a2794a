//! A receiver raising `Reject` wins over auto-accept: the sender observes a
//! rejected, settled delivery.

use capstan::{
    attach_handler, AcceptorHandle, ConnectOptions, Delivery, Disposition, Event, FlowController,
    Handler, Handshaker, IncomingMessageHandler, Message, OutgoingMessageHandler, Reject, Runtime,
    Sender,
};
use std::cell::RefCell;
use std::rc::Rc;

struct PickyServer;

impl Handler for PickyServer {
    fn on_message(&mut self, _event: &Event) -> Result<(), Reject> {
        Err(Reject)
    }
}

struct Client {
    sender: Rc<Sender>,
    delivery: Rc<RefCell<Option<Delivery>>>,
    outcomes: Rc<RefCell<Vec<&'static str>>>,
}

impl Handler for Client {
    fn on_link_flow(&mut self, _event: &Event) {
        if self.delivery.borrow().is_none() && self.sender.credit() > 0 {
            let delivery = self.sender.send_msg(&Message::with_body(&b"unwanted"[..]));
            self.delivery.replace(Some(delivery));
        }
    }

    fn on_accepted(&mut self, _event: &Event) {
        self.outcomes.borrow_mut().push("accepted");
    }

    fn on_rejected(&mut self, event: &Event) {
        self.outcomes.borrow_mut().push("rejected");
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
fn reject_beats_auto_accept() {
    capstan::dev_tracing::init_tracing();

    let runtime = Runtime::with_handlers(vec![
        Box::new(Handshaker::new()),
        Box::new(FlowController::new(10)),
        // auto_accept is left at its default of true; Reject must win.
        Box::new(IncomingMessageHandler::new(PickyServer)),
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

    let outcomes = Rc::new(RefCell::new(Vec::new()));
    let delivery = Rc::new(RefCell::new(None));
    let sender = Rc::new(context.sender("q"));
    attach_handler(
        sender.link(),
        OutgoingMessageHandler::new(Client {
            sender: sender.clone(),
            delivery: delivery.clone(),
            outcomes: outcomes.clone(),
        }),
    );

    runtime.run().unwrap();

    assert_eq!(*outcomes.borrow(), vec!["rejected"]);
    let delivery = delivery.borrow().clone().unwrap();
    assert_eq!(delivery.remote_state(), Some(Disposition::Rejected));
    assert!(delivery.settled());
}
