// A single test: it closes a registered descriptor behind the server's back,
// and a test running in parallel could otherwise reuse its number.

use sockwatch::{Context, Event, Handle, Notification, Server, wake_pair};
use std::net::{TcpListener, TcpStream};
use std::os::unix::io::IntoRawFd;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(5);

fn next_event(events: &crossbeam_channel::Receiver<Notification>) -> Event {
    loop {
        match events.recv_timeout(WAIT).expect("notification") {
            Notification::Event { event, .. } => return event,
            Notification::Diagnostic { .. } => continue,
        }
    }
}

#[test]
fn connection_closed_elsewhere_is_dropped_without_a_second_close() {
    let (context, events) = Context::with_channel();
    let (interrupt, _waker) = wake_pair(&context).expect("wake pair");

    let listener = TcpListener::bind("127.0.0.1:0").expect("bind listener");
    let addr = listener.local_addr().expect("local addr");
    let listener = Handle::new(listener.into_raw_fd()).expect("handle");

    let mut server = Server::builder()
        .client_capacity(1)
        .timeout(Duration::from_millis(20))
        .build(&context, interrupt, listener)
        .expect("build server");
    server.start_watching().expect("start");

    let _first = TcpStream::connect(addr).expect("connect");
    let Event::Accept { connection, .. } = next_event(&events) else {
        panic!("expected an accept");
    };

    sockwatch::close(&context, connection).expect("close");
    assert_eq!(next_event(&events), Event::Close(connection));

    // The slot is reclaimed by the loop itself, so the registry has room again.
    std::thread::sleep(Duration::from_millis(200));
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
    server.remove().expect("remove");
}
