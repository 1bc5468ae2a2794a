//! Reconnect policy: a two-address rotation where only the second listens.
//! The first attempt fails and is retried immediately (delay 0); a
//! successful open resets the policy; a forced disconnect restarts the
//! schedule with an immediate retry and then the 100 ms step.

use capstan::{Backoff, ConnectOptions, Event, Handler, Runtime};
use capstan_amqp::codec::{Frame, HEADER};
use bytes::BytesMut;
use std::cell::RefCell;
use std::io::Write;
use std::net::TcpListener;
use std::rc::Rc;
use std::time::{Duration, Instant};

struct Watcher {
    disconnects: Rc<RefCell<Vec<Instant>>>,
    opens: Rc<RefCell<Vec<Instant>>>,
}

impl Handler for Watcher {
    fn on_disconnected(&mut self, _event: &Event) {
        self.disconnects.borrow_mut().push(Instant::now());
    }

    fn on_connection_remote_open(&mut self, _event: &Event) {
        self.opens.borrow_mut().push(Instant::now());
    }
}

/// The bytes a server says hello with.
fn greeting() -> Vec<u8> {
    let mut buf = BytesMut::new();
    buf.extend_from_slice(&HEADER);
    Frame::Open { hostname: None }.encode(&mut buf);
    buf.to_vec()
}

#[test]
fn rotation_backoff_and_reset() {
    capstan::dev_tracing::init_tracing();

    // A hand-driven server socket, so the test can drop connections
    // abruptly (no close frame: the client must see `disconnected`).
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.set_nonblocking(true).unwrap();
    let live_port = listener.local_addr().unwrap().port();
    let dead_port = {
        let briefly = TcpListener::bind("127.0.0.1:0").unwrap();
        briefly.local_addr().unwrap().port()
    };

    let disconnects = Rc::new(RefCell::new(Vec::new()));
    let opens = Rc::new(RefCell::new(Vec::new()));

    let runtime = Runtime::new();
    let _context = runtime
        .connect(
            ConnectOptions::urls(&[
                format!("127.0.0.1:{dead_port}"),
                format!("127.0.0.1:{live_port}"),
            ])
            .with_reconnect(Backoff::new())
            .with_handler(Watcher {
                disconnects: disconnects.clone(),
                opens: opens.clone(),
            }),
        )
        .unwrap();

    let start = Instant::now();
    let mut streams = Vec::new();
    let mut accepts: Vec<Instant> = Vec::new();
    let mut dropped = false;
    while start.elapsed() < Duration::from_secs(10) {
        runtime
            .do_work_timeout(Duration::from_millis(10))
            .unwrap();
        match listener.accept() {
            Ok((mut stream, _)) => {
                accepts.push(Instant::now());
                stream.write_all(&greeting()).unwrap();
                streams.push(stream);
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {}
            Err(err) => panic!("accept failed: {err}"),
        }
        if !dropped && opens.borrow().len() == 1 {
            streams.clear(); // yank the live connection
            dropped = true;
        }
        if opens.borrow().len() >= 2 {
            break;
        }
    }

    let disconnects = disconnects.borrow();
    let opens = opens.borrow();
    // Dead dial, forced drop, dead dial again (rotation wrapped around).
    assert!(opens.len() >= 2, "never reconnected: {opens:?}");
    assert!(accepts.len() >= 2);
    assert!(disconnects.len() >= 3, "saw {} disconnects", disconnects.len());

    // The retry after the forced drop was immediate: the successful open
    // had reset the policy back to a zero delay.
    let reset_retry_gap = disconnects[2].duration_since(disconnects[1]);
    assert!(
        reset_retry_gap < Duration::from_millis(90),
        "immediate retry took {reset_retry_gap:?}"
    );

    // The next step of the schedule applied the 100 ms backoff before the
    // second successful connection.
    let backoff_gap = accepts[1].duration_since(disconnects[2]);
    assert!(
        backoff_gap >= Duration::from_millis(90),
        "backoff step took only {backoff_gap:?}"
    );
}
