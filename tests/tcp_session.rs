use cyclenet::cycle::Cycle;
use cyclenet::net::tcp::{SessionState, TcpSession};

use std::cell::{Cell, RefCell};
use std::io::{Read, Write};
use std::net::{TcpListener as StdTcpListener, TcpStream as StdTcpStream};
use std::os::unix::io::IntoRawFd;
use std::rc::Rc;
use std::thread;
use std::time::Duration;

/// Accepts one std connection and wraps the server side in a session.
fn attached_pair(cycle: &Rc<Cycle>) -> (TcpSession, StdTcpStream) {
    let listener = StdTcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let client = StdTcpStream::connect(addr).expect("connect");
    let (server, peer) = listener.accept().expect("accept");
    let session = TcpSession::from_accepted(cycle, server.into_raw_fd(), peer);
    (session, client)
}

#[test]
fn send_is_gated_on_the_connected_state() {
    let cycle = Cycle::new();
    let (session, mut client) = attached_pair(&cycle);

    let states: Rc<RefCell<Vec<SessionState>>> = Rc::new(RefCell::new(Vec::new()));
    let states_in_cb = states.clone();
    session.set_connection_callback(move |session| {
        states_in_cb.borrow_mut().push(session.state());
    });

    assert_eq!(session.state(), SessionState::Connecting);
    assert!(!session.send(b"early"), "send before establish must fail");

    session.establish();
    assert!(session.send(b"hi"));
    let mut got = [0u8; 2];
    client.read_exact(&mut got).expect("read");
    assert_eq!(&got, b"hi");

    session.shutdown();
    assert_eq!(session.state(), SessionState::Disconnected);
    assert!(!session.send(b"late"), "send after disconnect must fail");

    assert_eq!(
        *states.borrow(),
        vec![SessionState::Connected, SessionState::Disconnected],
        "the state machine only moves forward"
    );
}

#[test]
fn shutdown_with_pending_output_enters_disconnecting() {
    let cycle = Cycle::new();
    let (session, client) = attached_pair(&cycle);
    session.establish();

    // Well past any socket send buffer, so the immediate write leaves a
    // remainder in the output buffer.
    let payload = vec![0x5Au8; 64 * 1024 * 1024];
    assert!(session.send(&payload));
    session.shutdown();
    assert_eq!(session.state(), SessionState::Disconnecting);

    let closes = Rc::new(Cell::new(0u32));
    let closes_in_cb = closes.clone();
    session.set_close_callback(move |_| closes_in_cb.set(closes_in_cb.get() + 1));

    session.force_close();
    assert_eq!(session.state(), SessionState::Disconnected);
    session.force_close(); // second close must be a no-op
    assert_eq!(closes.get(), 1, "descriptor closed exactly once");
    drop(client);
}

#[test]
fn no_callback_fires_after_disconnected() {
    let cycle = Cycle::new();
    let (session, mut client) = attached_pair(&cycle);

    let messages = Rc::new(Cell::new(0u32));
    let messages_in_cb = messages.clone();
    session.set_message_callback(move |_, input| {
        input.retrieve_all();
        messages_in_cb.set(messages_in_cb.get() + 1);
    });
    session.establish();
    session.force_close();

    // Bytes arriving after the close must never reach the consumer.
    let _ = client.write_all(b"ghost");
    let handle = cycle.handle();
    cycle.run_after(Duration::from_millis(100), move || handle.exit());
    cycle.run();

    assert_eq!(messages.get(), 0);
}

#[test]
fn outbound_connect_establishes_and_sends() {
    let listener = StdTcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("local addr");

    let server = thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("accept");
        let mut got = [0u8; 5];
        stream.read_exact(&mut got).expect("read");
        got
    });

    let cycle = Cycle::new();
    let handle = cycle.handle();
    let session =
        TcpSession::connect(&cycle, &addr.to_string()).expect("start non-blocking connect");
    assert_eq!(session.state(), SessionState::Connecting);

    let exit_handle = handle.clone();
    session.set_connection_callback(move |session| {
        if session.is_connected() {
            assert!(session.send(b"hello"));
            exit_handle.exit();
        }
    });

    cycle.run_after(Duration::from_secs(5), move || handle.exit());
    cycle.run();

    assert_eq!(&server.join().unwrap(), b"hello");
    assert_eq!(session.state(), SessionState::Connected);
}

#[test]
fn connection_callback_may_close_the_session_it_observes() {
    let cycle = Cycle::new();
    let (session, mut client) = attached_pair(&cycle);

    let states: Rc<RefCell<Vec<SessionState>>> = Rc::new(RefCell::new(Vec::new()));
    let states_in_cb = states.clone();
    session.set_connection_callback(move |session| {
        states_in_cb.borrow_mut().push(session.state());
        if session.is_connected() {
            // Reject the peer from inside its own notification.
            session.shutdown();
        }
    });
    let closes = Rc::new(Cell::new(0u32));
    let closes_in_cb = closes.clone();
    session.set_close_callback(move |_| closes_in_cb.set(closes_in_cb.get() + 1));

    session.establish();

    assert_eq!(
        *states.borrow(),
        vec![SessionState::Connected, SessionState::Disconnected]
    );
    assert_eq!(closes.get(), 1);
    let mut got = [0u8; 1];
    assert_eq!(client.read(&mut got).expect("read"), 0, "peer sees EOF");
}

#[test]
fn write_complete_callback_may_send_a_followup() {
    let cycle = Cycle::new();
    let (session, mut client) = attached_pair(&cycle);
    session.establish();

    let followed = Rc::new(Cell::new(false));
    let flag = followed.clone();
    session.set_write_complete_callback(move |session| {
        if !flag.get() {
            flag.set(true);
            // Small enough to complete inline, which fires this callback
            // again before the first invocation returns.
            assert!(session.send(b"second"));
        }
    });

    assert!(session.send(b"first"));
    assert!(followed.get());
    session.shutdown();

    let mut received = String::new();
    client.read_to_string(&mut received).expect("read");
    assert_eq!(received, "firstsecond");
}

#[test]
fn dropped_session_frees_its_descriptor_slot() {
    let cycle = Cycle::new();
    let listener = StdTcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("local addr");

    let _first_client = StdTcpStream::connect(addr).expect("connect");
    let (first_server, first_peer) = listener.accept().expect("accept");
    let first_fd = first_server.into_raw_fd();
    let first = TcpSession::from_accepted(&cycle, first_fd, first_peer);
    first.establish();

    // Queue the second connection before releasing the first descriptor so
    // the kernel hands its number straight back on the next accept.
    let _second_client = StdTcpStream::connect(addr).expect("connect");
    drop(first);

    let (second_server, second_peer) = listener.accept().expect("accept");
    let second_fd = second_server.into_raw_fd();
    assert_eq!(second_fd, first_fd, "lowest free descriptor is reused");

    let second = TcpSession::from_accepted(&cycle, second_fd, second_peer);
    second.establish();
    assert!(second.is_connected());
    second.force_close();
}
