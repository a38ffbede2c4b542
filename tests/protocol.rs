use cyclenet::net::tcp::TcpSession;
use cyclenet::protocol::{Protocol, ProtocolKind};
use cyclenet::{Buffer, Cycle, Error};

use std::cell::RefCell;
use std::net::{TcpListener as StdTcpListener, TcpStream as StdTcpStream};
use std::os::unix::io::IntoRawFd;
use std::rc::Rc;

const MAX_FRAME: usize = 1 << 20;

/// Toy length-prefixed framing: u32 big-endian length, then payload.
struct LengthPrefixed {
    frames: Rc<RefCell<Vec<Vec<u8>>>>,
}

impl Protocol for LengthPrefixed {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::Other
    }

    fn parse(&mut self, input: &mut Buffer, _session: &TcpSession) -> cyclenet::Result<()> {
        while input.readable_bytes() >= 4 {
            let len = input.peek_u32() as usize;
            if len > MAX_FRAME {
                return Err(Error::parse(format!("frame of {len} bytes")));
            }
            if input.readable_bytes() < 4 + len {
                break; // partial trailing frame stays put
            }
            input.retrieve(4);
            self.frames.borrow_mut().push(input.take(len));
        }
        Ok(())
    }
}

fn scratch_session() -> (TcpSession, StdTcpStream, Rc<Cycle>) {
    let listener = StdTcpListener::bind("127.0.0.1:0").expect("bind");
    let client = StdTcpStream::connect(listener.local_addr().unwrap()).expect("connect");
    let (server, peer) = listener.accept().expect("accept");
    let cycle = Cycle::new();
    let session = TcpSession::from_accepted(&cycle, server.into_raw_fd(), peer);
    (session, client, cycle)
}

#[test]
fn parser_consumes_whole_frames_and_keeps_partial_tail() {
    let (session, _client, _cycle) = scratch_session();
    let frames = Rc::new(RefCell::new(Vec::new()));
    let mut parser = LengthPrefixed {
        frames: frames.clone(),
    };
    assert_eq!(parser.kind(), ProtocolKind::Other);

    let mut input = Buffer::new();
    input.add_u32(3);
    input.add(b"one");
    input.add_u32(5);
    input.add(b"tw"); // second frame arrives split

    parser.parse(&mut input, &session).expect("clean parse");
    assert_eq!(*frames.borrow(), vec![b"one".to_vec()]);
    assert_eq!(input.readable_bytes(), 6, "partial frame left untouched");

    input.add(b"o-2");
    parser.parse(&mut input, &session).expect("clean parse");
    assert_eq!(
        *frames.borrow(),
        vec![b"one".to_vec(), b"two-2".to_vec()]
    );
    assert_eq!(input.readable_bytes(), 0);
}

#[test]
fn oversized_frame_is_a_parse_error() {
    let (session, _client, _cycle) = scratch_session();
    let mut parser = LengthPrefixed {
        frames: Rc::new(RefCell::new(Vec::new())),
    };

    let mut input = Buffer::new();
    input.add_u32((MAX_FRAME + 1) as u32);

    let err = parser.parse(&mut input, &session).unwrap_err();
    assert!(matches!(err, Error::Parse { .. }), "got {err}");
}
