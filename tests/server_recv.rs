use crossbeam_channel::Receiver;
use sockwatch::{Context, Event, Handle, Notification, Server, WakeHandle, wake_pair};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::os::unix::io::IntoRawFd;
use std::thread;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(5);

struct Harness {
    context: Context,
    events: Receiver<Notification>,
    server: Server,
    addr: SocketAddr,
    _waker: WakeHandle,
}

fn start_server(capacity: usize) -> Harness {
    let (context, events) = Context::with_channel();
    let (interrupt, waker) = wake_pair(&context).expect("wake pair");

    let listener = TcpListener::bind("127.0.0.1:0").expect("bind listener");
    let addr = listener.local_addr().expect("local addr");
    let listener = Handle::new(listener.into_raw_fd()).expect("handle");

    let mut server = Server::create(
        &context,
        interrupt,
        listener,
        capacity,
        4096,
        Duration::from_millis(20),
    )
    .expect("create server");
    server.start_watching().expect("start");

    Harness {
        context,
        events,
        server,
        addr,
        _waker: waker,
    }
}

fn next_event(events: &Receiver<Notification>) -> Event {
    events
        .recv_timeout(WAIT)
        .expect("notification")
        .into_event()
        .expect("event, not a diagnostic")
}

#[test]
fn data_then_close_then_pruned() {
    let Harness {
        events,
        mut server,
        addr,
        _waker,
        ..
    } = start_server(4);

    let mut client = TcpStream::connect(addr).expect("connect");
    let Event::Accept { connection, .. } = next_event(&events) else {
        panic!("expected an accept");
    };

    client.write_all(b"hello").expect("write");
    match next_event(&events) {
        Event::Data {
            connection: from,
            bytes,
            listener,
        } => {
            assert_eq!(from, connection);
            assert_eq!(listener, server.listener());
            assert_eq!(bytes, b"hello");
        }
        other => panic!("expected data, got {other:?}"),
    }

    drop(client);
    assert_eq!(next_event(&events), Event::Close(connection));

    server.stop().expect("stop");
    server.compact().expect("compact");
    assert_eq!(server.clients(), Some(Vec::new()));
    assert!(server.registry().expect("stopped").is_empty());
}

#[test]
fn payloads_are_attributed_per_connection() {
    let Harness {
        events,
        mut server,
        addr,
        _waker,
        ..
    } = start_server(4);

    let mut first = TcpStream::connect(addr).expect("connect");
    let Event::Accept { connection: a, .. } = next_event(&events) else {
        panic!("expected an accept");
    };
    let mut second = TcpStream::connect(addr).expect("connect");
    let Event::Accept { connection: b, .. } = next_event(&events) else {
        panic!("expected an accept");
    };

    first.write_all(b"from-a").expect("write");
    second.write_all(b"from-b").expect("write");

    let mut received: HashMap<Handle, Vec<u8>> = HashMap::new();
    while received.values().map(Vec::len).sum::<usize>() < 12 {
        match next_event(&events) {
            Event::Data {
                connection, bytes, ..
            } => received.entry(connection).or_default().extend(bytes),
            other => panic!("expected data, got {other:?}"),
        }
    }

    assert_eq!(received[&a], b"from-a");
    assert_eq!(received[&b], b"from-b");

    server.remove().expect("remove");
}

#[test]
fn foreground_send_reaches_the_peer() {
    let Harness {
        context,
        events,
        mut server,
        addr,
        _waker,
        ..
    } = start_server(2);

    let mut client = TcpStream::connect(addr).expect("connect");
    let Event::Accept { connection, .. } = next_event(&events) else {
        panic!("expected an accept");
    };

    let sent = sockwatch::send(&context, connection, b"pong").expect("send");
    assert_eq!(sent, 4);

    client.set_read_timeout(Some(WAIT)).expect("read timeout");
    let mut buf = [0u8; 4];
    client.read_exact(&mut buf).expect("read");
    assert_eq!(&buf, b"pong");

    server.remove().expect("remove");
}

#[test]
fn idle_round_frees_the_slot_of_a_closed_peer() {
    let Harness {
        events,
        mut server,
        addr,
        _waker,
        ..
    } = start_server(1);

    let first = TcpStream::connect(addr).expect("connect");
    let Event::Accept { connection, .. } = next_event(&events) else {
        panic!("expected an accept");
    };

    drop(first);
    assert_eq!(next_event(&events), Event::Close(connection));

    // Several idle rounds pass; the loop compacts on its own.
    thread::sleep(Duration::from_millis(200));

    let _second = TcpStream::connect(addr).expect("connect");
    let Event::Accept {
        connection: replacement,
        ..
    } = next_event(&events)
    else {
        panic!("expected an accept");
    };

    server.stop().expect("stop");
    assert_eq!(server.clients(), Some(vec![replacement]));
}

