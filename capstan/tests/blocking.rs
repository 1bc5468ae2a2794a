//! Blocking facade: `send_msg` returns only once the peer settled; dead
//! peers and unresponsive peers surface as errors, not hangs.

use capstan::blocking::{BlockingConnection, ClientError};
use capstan::{
    AcceptorHandle, Disposition, Event, FlowController, Handler, Handshaker,
    IncomingMessageHandler, Message, Reject, Runtime,
};
use std::cell::RefCell;
use std::net::TcpListener;
use std::rc::Rc;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

struct EchoServer;

impl Handler for EchoServer {
    fn on_message(&mut self, _event: &Event) -> Result<(), Reject> {
        Ok(())
    }
}

type StopSlot = Rc<RefCell<Option<(Runtime, AcceptorHandle)>>>;

/// Shuts the server runtime down once the client went away.
struct ServerStop {
    slot: StopSlot,
}

impl ServerStop {
    fn stop(&self) {
        if let Some((runtime, acceptor)) = self.slot.borrow().as_ref() {
            acceptor.close();
            runtime.stop();
        }
    }
}

impl Handler for ServerStop {
    fn on_connection_final(&mut self, _event: &Event) {
        self.stop();
    }

    fn on_disconnected(&mut self, _event: &Event) {
        self.stop();
    }
}

/// Spawn a server runtime on its own thread, returning its port.
fn spawn_server(with_settlement: bool) -> (u16, thread::JoinHandle<()>) {
    let (port_tx, port_rx) = mpsc::channel();
    let handle = thread::spawn(move || {
        let slot: StopSlot = Rc::new(RefCell::new(None));
        let mut handlers: Vec<Box<dyn Handler>> = vec![Box::new(Handshaker::new())];
        if with_settlement {
            handlers.push(Box::new(FlowController::new(10)));
            handlers.push(Box::new(IncomingMessageHandler::new(EchoServer)));
        }
        handlers.push(Box::new(ServerStop { slot: slot.clone() }));
        let runtime = Runtime::with_handlers(handlers);
        let acceptor = runtime.listen("127.0.0.1:0").unwrap();
        port_tx.send(acceptor.local_addr().port()).unwrap();
        slot.replace(Some((runtime.clone(), acceptor)));
        runtime.run().unwrap();
    });
    (port_rx.recv().unwrap(), handle)
}

#[test]
fn send_msg_returns_settled() {
    capstan::dev_tracing::init_tracing();

    let (port, server) = spawn_server(true);
    let url = format!("127.0.0.1:{port}");

    let conn =
        BlockingConnection::connect_with_timeout(&url, Some(Duration::from_secs(10))).unwrap();
    let sender = conn.sender("examples").unwrap();
    let delivery = sender.send_msg(&Message::with_body(&b"{\"n\":1}"[..])).unwrap();
    assert!(delivery.settled());
    assert_eq!(delivery.remote_state(), Some(Disposition::Accepted));

    let receiver = conn.receiver("examples").unwrap();
    assert!(receiver.receiver().state().is_remote_active());

    conn.close().unwrap();
    server.join().unwrap();
}

#[test]
fn unresponsive_peer_times_out() {
    capstan::dev_tracing::init_tracing();

    // This server attaches links but never grants credit nor settles.
    let (port, server) = spawn_server(false);
    let url = format!("127.0.0.1:{port}");

    let mut conn =
        BlockingConnection::connect_with_timeout(&url, Some(Duration::from_secs(10))).unwrap();
    conn.set_timeout(Some(Duration::from_millis(300)));
    let sender = conn.sender("examples").unwrap();
    let err = sender
        .send_msg(&Message::with_body(&b"lost"[..]))
        .unwrap_err();
    assert!(matches!(err, ClientError::Timeout));

    drop(sender);
    drop(conn); // the server notices the disconnect and shuts down
    server.join().unwrap();
}

#[test]
fn dead_peer_is_an_error() {
    capstan::dev_tracing::init_tracing();

    let dead_port = {
        let briefly = TcpListener::bind("127.0.0.1:0").unwrap();
        briefly.local_addr().unwrap().port()
    };
    let err = BlockingConnection::connect_with_timeout(
        &format!("127.0.0.1:{dead_port}"),
        Some(Duration::from_secs(5)),
    )
    .unwrap_err();
    assert!(matches!(err, ClientError::Disconnected));
}
