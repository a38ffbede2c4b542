//! Listening-socket Event that manufactures sessions.
//!
//! On each readiness notification the acceptor drains the accept queue,
//! handing every new descriptor to the injected factory, which constructs
//! the protocol-specific session and notifies the owning server.
//!
//! Descriptor-exhaustion defense: one idle descriptor (`/dev/null`) is held
//! in reserve. When `accept` fails with EMFILE/ENFILE the reserve is closed,
//! the pending connection accepted and immediately closed, and the reserve
//! reopened. Without this the listening descriptor would stay readable
//! forever and spin the loop.

use crate::cycle::Cycle;
use crate::error::Error;
use crate::event::Event;
use crate::net::socket;

use libc::{
    EAGAIN, ECONNABORTED, EINTR, EMFILE, ENFILE, EWOULDBLOCK, O_CLOEXEC, O_RDONLY, SOCK_CLOEXEC,
    SOCK_NONBLOCK, accept, accept4, close, open, sockaddr, sockaddr_in, socklen_t,
};
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::io;
use std::mem;
use std::net::SocketAddr;
use std::os::unix::io::RawFd;
use std::ptr;
use std::rc::Rc;

use tracing::{error, info, warn};

/// Constructs and retains a session for a freshly accepted descriptor.
pub type SessionFactory = Box<dyn FnMut(&Rc<Cycle>, RawFd, SocketAddr)>;

struct AcceptorShared {
    cycle: Rc<Cycle>,
    event: Rc<Event>,
    fd: RawFd,
    idle_fd: Cell<RawFd>,
    factory: RefCell<SessionFactory>,
}

/// Listening socket registered with a Cycle.
pub struct Acceptor {
    shared: Rc<AcceptorShared>,
}

impl Acceptor {
    /// Binds a listening socket on `address` ("ip:port"). Call
    /// [`listen`](Self::listen) to start accepting.
    pub fn new(cycle: &Rc<Cycle>, address: &str, factory: SessionFactory) -> io::Result<Self> {
        cycle.assert_in_cycle_thread();
        let addr = socket::parse_sockaddr(address)?;
        let fd = socket::new_stream_socket()?;
        if let Err(err) = socket::bind_socket(fd, &addr) {
            unsafe {
                close(fd);
            }
            return Err(err);
        }

        let idle_fd = unsafe { open(c"/dev/null".as_ptr(), O_RDONLY | O_CLOEXEC) };
        assert!(idle_fd >= 0, "reserve descriptor open failed");

        let event = Event::new(cycle, fd);
        let shared = Rc::new(AcceptorShared {
            cycle: cycle.clone(),
            event: event.clone(),
            fd,
            idle_fd: Cell::new(idle_fd),
            factory: RefCell::new(factory),
        });
        event.tie(&(shared.clone() as Rc<dyn Any>));

        let weak = Rc::downgrade(&shared);
        event.set_read_handler(move || {
            if let Some(shared) = weak.upgrade() {
                Acceptor { shared }.handle_read();
            }
        });

        Ok(Self { shared })
    }

    /// Starts listening and arms read interest on the Cycle.
    pub fn listen(&self) -> io::Result<()> {
        self.shared.cycle.assert_in_cycle_thread();
        socket::listen_socket(self.shared.fd)?;
        self.shared.event.enable_reading();
        info!(addr = %self.local_addr()?, "listening");
        Ok(())
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        socket::local_addr(self.shared.fd)
    }

    fn handle_read(&self) {
        loop {
            let mut addr: sockaddr_in = unsafe { mem::zeroed() };
            let mut len = mem::size_of::<sockaddr_in>() as socklen_t;
            let fd = unsafe {
                accept4(
                    self.shared.fd,
                    &mut addr as *mut _ as *mut sockaddr,
                    &mut len,
                    SOCK_NONBLOCK | SOCK_CLOEXEC,
                )
            };

            if fd >= 0 {
                let peer = socket::sockaddr_to_socketaddr(&addr);
                (self.shared.factory.borrow_mut())(&self.shared.cycle, fd, peer);
                continue;
            }

            match socket::errno() {
                err if err == EAGAIN || err == EWOULDBLOCK => break,
                EINTR | ECONNABORTED => continue,
                err if err == EMFILE || err == ENFILE => {
                    let rejected = Error::Rejected {
                        reason: "descriptor limit reached".to_string(),
                    };
                    warn!(error = %rejected, "shedding one connection");
                    self.shed_connection();
                }
                err => {
                    error!(errno = err, "accept failed");
                    break;
                }
            }
        }
    }

    /// Degraded-mode accept under descriptor exhaustion: free the reserve,
    /// accept the pending connection, close it, reopen the reserve.
    fn shed_connection(&self) {
        unsafe {
            close(self.shared.idle_fd.get());
        }
        let fd = unsafe { accept(self.shared.fd, ptr::null_mut(), ptr::null_mut()) };
        if fd >= 0 {
            unsafe {
                close(fd);
            }
        }
        let idle_fd = unsafe { open(c"/dev/null".as_ptr(), O_RDONLY | O_CLOEXEC) };
        self.shared.idle_fd.set(idle_fd);
    }
}

impl Drop for AcceptorShared {
    fn drop(&mut self) {
        unsafe {
            close(self.fd);
            close(self.idle_fd.get());
        }
    }
}
