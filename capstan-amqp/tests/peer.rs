//! Back-to-back engine tests: two connections joined by pumping bytes
//! between their transports, no sockets involved.

use capstan_amqp::{
    Collector, Connection, Disposition, Event, EventKind, Half, Link, Message, Transport,
};

struct Peer {
    collector: Collector,
    conn: Connection,
    transport: Transport,
}

impl Peer {
    fn new() -> Self {
        let collector = Collector::new();
        let conn = Connection::new(&collector);
        let mut transport = Transport::new();
        transport.bind(&conn);
        Self {
            collector,
            conn,
            transport,
        }
    }

    fn drain(&self) -> Vec<Event> {
        let mut events = Vec::new();
        while let Some(ev) = self.collector.peek() {
            events.push(ev);
            self.collector.pop();
        }
        events
    }
}

/// Move bytes both ways until neither side has anything to say.
fn pump(a: &mut Peer, b: &mut Peer) {
    loop {
        let mut moved = false;
        let n = a.transport.pending();
        if n > 0 {
            let data = a.transport.peek(n as usize);
            b.transport.push(&data).expect("b accepts a's bytes");
            a.transport.pop(n as usize);
            moved = true;
        }
        let n = b.transport.pending();
        if n > 0 {
            let data = b.transport.peek(n as usize);
            a.transport.push(&data).expect("a accepts b's bytes");
            b.transport.pop(n as usize);
            moved = true;
        }
        if !moved {
            break;
        }
    }
}

fn kinds(events: &[Event]) -> Vec<EventKind> {
    events.iter().map(|e| e.kind().clone()).collect()
}

#[test]
fn open_is_seen_remotely() {
    let mut client = Peer::new();
    let mut server = Peer::new();

    client.conn.open();
    pump(&mut client, &mut server);

    let server_kinds = kinds(&server.drain());
    assert!(server_kinds.contains(&EventKind::ConnectionRemoteOpen));
    assert_eq!(server.conn.state().remote, Half::Active);
    assert_eq!(server.conn.state().local, Half::Uninit);

    server.conn.open();
    pump(&mut client, &mut server);
    assert_eq!(client.conn.state().remote, Half::Active);
}

fn remote_link(events: &[Event]) -> Link {
    events
        .iter()
        .find(|e| *e.kind() == EventKind::LinkRemoteOpen)
        .and_then(|e| e.link().cloned())
        .expect("peer saw the attach")
}

#[test]
fn transfer_and_disposition_round() {
    let mut client = Peer::new();
    let mut server = Peer::new();

    // Client builds the whole chain.
    client.conn.open();
    let ssn = client.conn.session();
    ssn.open();
    let sender = ssn.sender("q-sender");
    sender.set_target_address(Some("q"));
    sender.open();
    pump(&mut client, &mut server);

    // Server mirrors it by hand (the runtime's handshaker does this for
    // real applications).
    let events = server.drain();
    server.conn.open();
    let server_ssn = events
        .iter()
        .find(|e| *e.kind() == EventKind::SessionRemoteOpen)
        .and_then(|e| e.session().cloned())
        .expect("server saw the begin");
    server_ssn.open();
    let receiver = remote_link(&events);
    assert!(receiver.is_receiver());
    assert_eq!(receiver.remote_target().address(), Some("q"));
    receiver.set_target(receiver.remote_target());
    receiver.open();
    receiver.flow(10);
    pump(&mut client, &mut server);

    client.drain();
    assert_eq!(sender.credit(), 10);

    // One message across.
    let msg = Message::with_body(&b"ahoy"[..]);
    let delivery = sender.delivery("1");
    sender.send(&msg.encode());
    sender.advance();
    assert_eq!(sender.credit(), 9);
    pump(&mut client, &mut server);

    let events = server.drain();
    let incoming = events
        .iter()
        .find(|e| *e.kind() == EventKind::Delivery)
        .and_then(|e| e.delivery().cloned())
        .expect("server saw the transfer");
    assert!(incoming.readable());
    assert!(!incoming.partial());
    let raw = receiver.recv(incoming.pending());
    receiver.advance();
    let received = Message::decode(raw).unwrap();
    assert_eq!(received.body(), msg.body());

    // Accept and settle; the sender observes both.
    incoming.update(Disposition::Accepted);
    incoming.settle();
    pump(&mut client, &mut server);

    let events = client.drain();
    assert!(events.iter().any(|e| *e.kind() == EventKind::Delivery));
    assert!(delivery.updated());
    assert!(delivery.settled());
    assert_eq!(delivery.remote_state(), Some(Disposition::Accepted));
    assert!(!delivery.local_settled());
    delivery.settle();
    assert!(delivery.local_settled());
}

#[test]
fn clean_close_finalizes_both_ends() {
    let mut client = Peer::new();
    let mut server = Peer::new();

    client.conn.open();
    pump(&mut client, &mut server);
    server.conn.open();
    pump(&mut client, &mut server);

    client.conn.close();
    pump(&mut client, &mut server);
    assert!(server.conn.state().is_remote_closed());
    server.conn.close();
    pump(&mut client, &mut server);

    assert!(client.conn.state().is_closed());
    assert!(server.conn.state().is_closed());
    assert!(kinds(&client.drain()).contains(&EventKind::ConnectionFinal));
    assert!(kinds(&server.drain()).contains(&EventKind::ConnectionFinal));

    // Both directions are finished at the byte level too.
    assert_eq!(client.transport.pending(), -1);
    assert_eq!(client.transport.capacity(), -1);
}

#[test]
fn rebind_replays_local_state() {
    let mut client = Peer::new();
    let mut server = Peer::new();

    client.conn.open();
    let ssn = client.conn.session();
    ssn.open();
    let receiver = ssn.receiver("inbox");
    receiver.set_source_address(Some("inbox"));
    receiver.open();
    receiver.flow(5);
    pump(&mut client, &mut server);
    server.drain();

    // The peer goes away: unbind resets everything remote.
    client.transport.unbind();
    assert_eq!(client.conn.state().remote, Half::Uninit);

    // Rebind to a fresh peer; the local chain is re-announced.
    let mut replacement = Peer::new();
    let mut transport = Transport::new();
    transport.bind(&client.conn);
    client.transport = transport;
    pump(&mut client, &mut replacement);

    let events = replacement.drain();
    let kinds = kinds(&events);
    assert!(kinds.contains(&EventKind::ConnectionRemoteOpen));
    assert!(kinds.contains(&EventKind::SessionRemoteOpen));
    assert!(kinds.contains(&EventKind::LinkRemoteOpen));
    let sender = remote_link(&events);
    assert!(sender.is_sender());
    // The replayed flow restored the credit window.
    assert_eq!(sender.credit(), 5);
}

#[test]
fn sasl_plain_reaches_the_peer() {
    let mut client = Peer::new();
    let mut server = Peer::new();

    client.transport.sasl().plain("guest", "secret");
    client.conn.open();
    pump(&mut client, &mut server);

    assert_eq!(server.conn.peer_user().as_deref(), Some("guest"));
}
