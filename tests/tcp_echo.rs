use cyclenet::{Acceptor, Cycle, TcpSession};

use std::cell::RefCell;
use std::io::{Read, Write};
use std::net::TcpStream as StdTcpStream;
use std::rc::Rc;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

#[test]
fn two_client_writes_coalesce_into_one_delivery() {
    let cycle = Cycle::new();
    let deliveries: Rc<RefCell<Vec<Vec<u8>>>> = Rc::new(RefCell::new(Vec::new()));
    let sessions: Rc<RefCell<Vec<TcpSession>>> = Rc::new(RefCell::new(Vec::new()));

    let deliveries_in_factory = deliveries.clone();
    let sessions_in_factory = sessions.clone();
    let acceptor = Acceptor::new(
        &cycle,
        "127.0.0.1:0",
        Box::new(move |cycle, fd, peer| {
            let session = TcpSession::from_accepted(cycle, fd, peer);
            let deliveries = deliveries_in_factory.clone();
            session.set_message_callback(move |session, input| {
                let bytes = input.take_all();
                session.send(&bytes); // echo
                deliveries.borrow_mut().push(bytes);
            });
            session.establish();
            sessions_in_factory.borrow_mut().push(session);
        }),
    )
    .expect("bind acceptor");
    acceptor.listen().expect("listen");
    let port = acceptor.local_addr().expect("local addr").port();

    let (written_tx, written_rx) = mpsc::channel();
    let client = thread::spawn(move || {
        let mut stream = StdTcpStream::connect(("127.0.0.1", port)).expect("connect");
        stream.write_all(b"hello ").expect("first write");
        stream.write_all(b"world").expect("second write");
        written_tx.send(()).unwrap();
        let mut echo = [0u8; 11];
        stream.read_exact(&mut echo).expect("echo");
        echo
    });

    // Only start dispatching once both client writes sit in the socket's
    // receive queue, so the read path sees them together.
    written_rx.recv().unwrap();
    thread::sleep(Duration::from_millis(50));

    let handle = cycle.handle();
    cycle.run_after(Duration::from_millis(300), move || handle.exit());
    cycle.run();

    let echo = client.join().unwrap();
    assert_eq!(&echo, b"hello world");

    let deliveries = deliveries.borrow();
    assert_eq!(deliveries.len(), 1, "writes of a and b must arrive as one");
    assert_eq!(deliveries[0], b"hello world");
}

#[test]
fn buffered_output_drains_on_writable_readiness() {
    const SIZE: usize = 4 * 1024 * 1024;

    let cycle = Cycle::new();
    let handle = cycle.handle();
    let sessions: Rc<RefCell<Vec<TcpSession>>> = Rc::new(RefCell::new(Vec::new()));

    let sessions_in_factory = sessions.clone();
    let exit_handle = handle.clone();
    let acceptor = Acceptor::new(
        &cycle,
        "127.0.0.1:0",
        Box::new(move |cycle, fd, peer| {
            let session = TcpSession::from_accepted(cycle, fd, peer);
            session.set_write_complete_callback(|session| session.shutdown());
            let exit_handle = exit_handle.clone();
            session.set_close_callback(move |_| exit_handle.exit());
            session.establish();

            let payload: Vec<u8> = (0..SIZE).map(|i| i as u8).collect();
            assert!(session.send(&payload), "send while connected");
            sessions_in_factory.borrow_mut().push(session);
        }),
    )
    .expect("bind acceptor");
    acceptor.listen().expect("listen");
    let port = acceptor.local_addr().expect("local addr").port();

    let client = thread::spawn(move || {
        let mut stream = StdTcpStream::connect(("127.0.0.1", port)).expect("connect");
        let mut received = Vec::new();
        stream.read_to_end(&mut received).expect("read to eof");
        received
    });

    // Safety net so a regression fails instead of hanging.
    let fallback = handle.clone();
    cycle.run_after(Duration::from_secs(10), move || fallback.exit());
    cycle.run();

    let received = client.join().unwrap();
    assert_eq!(received.len(), SIZE);
    assert!(
        received.iter().enumerate().all(|(i, &b)| b == i as u8),
        "payload corrupted in flight"
    );
}
