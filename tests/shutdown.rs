// A single test: it checks descriptor validity after removal, which would race
// with descriptors opened by tests running in parallel.

use sockwatch::{Context, Event, Handle, Server, SocketList, is_valid, wake_pair};
use std::io::Read;
use std::net::{TcpListener, TcpStream, UdpSocket};
use std::os::unix::io::IntoRawFd;
use std::time::Duration;

#[test]
fn remove_closes_everything_once() {
    let (context, events) = Context::with_channel();

    let (interrupt, _waker) = wake_pair(&context).expect("wake pair");
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind listener");
    let addr = listener.local_addr().expect("local addr");
    let listener = Handle::new(listener.into_raw_fd()).expect("handle");

    let mut server = Server::builder()
        .client_capacity(2)
        .timeout(Duration::from_millis(20))
        .build(&context, interrupt, listener)
        .expect("build server");
    server.start_watching().expect("start");

    let mut client = TcpStream::connect(addr).expect("connect");
    let connection = match events
        .recv_timeout(Duration::from_secs(5))
        .expect("notification")
        .into_event()
    {
        Some(Event::Accept { connection, .. }) => connection,
        other => panic!("expected an accept, got {other:?}"),
    };

    server.remove().expect("remove");
    assert!(!server.is_watching());
    assert!(server.clients().is_none());
    assert!(!is_valid(listener));
    assert!(!is_valid(interrupt));
    assert!(!is_valid(connection));

    client
        .set_read_timeout(Some(Duration::from_secs(5)))
        .expect("read timeout");
    let mut buf = [0u8; 1];
    assert_eq!(client.read(&mut buf).expect("read"), 0);

    server.remove().expect("second remove is a no-op");
    assert!(matches!(server.compact(), Err(sockwatch::Error::Removed)));

    let (interrupt, _waker) = wake_pair(&context).expect("wake pair");
    let member = Handle::new(
        UdpSocket::bind("127.0.0.1:0")
            .expect("bind")
            .into_raw_fd(),
    )
    .expect("handle");

    let mut list = SocketList::create(&context, interrupt, 1).expect("create list");
    list.set_members(&[member]).expect("members");
    list.start_watching().expect("start");

    list.remove().expect("remove");
    assert!(!is_valid(interrupt));
    assert!(!is_valid(member));
    assert!(list.members().is_empty());

    list.remove().expect("second remove is a no-op");
    assert!(matches!(list.set_members(&[]), Err(sockwatch::Error::Removed)));
}
