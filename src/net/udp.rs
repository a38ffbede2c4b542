//! UDP datagram session.
//!
//! Shares the TCP session's state machine and, deliberately, its gating of
//! `send` on the `Connected` state even though datagrams are connectionless:
//! the owner attaches the socket, installs callbacks, then calls
//! [`UdpSession::establish`]. Exactly one received message is delivered per
//! readable notification; sends are single-shot with no buffering or retry.

use crate::cycle::Cycle;
use crate::event::Event;
use crate::net::socket;
use crate::net::tcp::SessionState;

use libc::{c_void, close, recvfrom, sendto, sockaddr, sockaddr_in, socklen_t};
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::io;
use std::mem;
use std::net::SocketAddr;
use std::os::unix::io::RawFd;
use std::rc::Rc;

use tracing::{debug, warn};

type DatagramCallback = Rc<RefCell<dyn FnMut(&UdpSession, &[u8], SocketAddr)>>;

struct UdpShared {
    cycle: Rc<Cycle>,
    event: Rc<Event>,
    fd: RawFd,
    local: SocketAddr,
    peer: Cell<Option<SocketAddr>>,
    state: Cell<SessionState>,
    datagram_cb: RefCell<Option<DatagramCallback>>,
}

/// Handle to one UDP socket owned by a Cycle.
#[derive(Clone)]
pub struct UdpSession {
    shared: Rc<UdpShared>,
}

impl UdpSession {
    /// Binds a datagram socket on `address` ("ip:port"). The session starts
    /// in `Connecting`; install callbacks, then call
    /// [`establish`](Self::establish).
    pub fn bind(cycle: &Rc<Cycle>, address: &str) -> io::Result<Self> {
        cycle.assert_in_cycle_thread();
        let addr = socket::parse_sockaddr(address)?;
        let fd = socket::new_datagram_socket()?;
        if let Err(err) = socket::bind_socket(fd, &addr) {
            unsafe {
                close(fd);
            }
            return Err(err);
        }
        let local = socket::local_addr(fd)?;

        let event = Event::new(cycle, fd);
        let shared = Rc::new(UdpShared {
            cycle: cycle.clone(),
            event: event.clone(),
            fd,
            local,
            peer: Cell::new(None),
            state: Cell::new(SessionState::Connecting),
            datagram_cb: RefCell::new(None),
        });
        event.tie(&(shared.clone() as Rc<dyn Any>));

        let weak = Rc::downgrade(&shared);
        event.set_read_handler(move || {
            if let Some(shared) = weak.upgrade() {
                UdpSession { shared }.handle_read();
            }
        });

        Ok(Self { shared })
    }

    pub fn state(&self) -> SessionState {
        self.shared.state.get()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.shared.local
    }

    /// Default destination for [`send`](Self::send).
    pub fn set_peer(&self, peer: SocketAddr) {
        self.shared.peer.set(Some(peer));
    }

    /// One callback invocation per received datagram.
    pub fn set_datagram_callback(&self, cb: impl FnMut(&UdpSession, &[u8], SocketAddr) + 'static) {
        *self.shared.datagram_cb.borrow_mut() = Some(Rc::new(RefCell::new(cb)));
    }

    /// Transitions to `Connected` and arms read interest.
    pub fn establish(&self) {
        self.shared.cycle.assert_in_cycle_thread();
        assert_eq!(
            self.shared.state.get(),
            SessionState::Connecting,
            "establish on a session past Connecting"
        );
        self.shared.state.set(SessionState::Connected);
        self.shared.event.enable_reading();
        debug!(local = %self.shared.local, "udp session established");
    }

    /// Sends one datagram to the configured peer. A single synchronous
    /// attempt; returns `false` when not `Connected`, when no peer is set,
    /// or on any send failure. Never buffers or retries.
    pub fn send(&self, data: &[u8]) -> bool {
        match self.shared.peer.get() {
            Some(peer) => self.send_to(data, peer),
            None => {
                warn!("udp send with no peer configured");
                false
            }
        }
    }

    /// Sends one datagram to `peer` with the same single-shot policy.
    pub fn send_to(&self, data: &[u8], peer: SocketAddr) -> bool {
        if self.shared.state.get() != SessionState::Connected {
            warn!(state = ?self.shared.state.get(), "send on non-connected udp session");
            return false;
        }
        self.shared.cycle.assert_in_cycle_thread();

        let addr = match socket::socketaddr_to_sockaddr(peer) {
            Ok(addr) => addr,
            Err(_) => return false,
        };
        let n = unsafe {
            sendto(
                self.shared.fd,
                data.as_ptr() as *const c_void,
                data.len(),
                0,
                &addr as *const sockaddr_in as *const sockaddr,
                mem::size_of::<sockaddr_in>() as socklen_t,
            )
        };
        n == data.len() as isize
    }

    /// Removes the Event and closes the descriptor exactly once.
    pub fn close(&self) {
        self.shared.cycle.assert_in_cycle_thread();
        if self.shared.state.get() == SessionState::Disconnected {
            return;
        }
        self.shared.state.set(SessionState::Disconnected);
        self.shared.event.disable_all();
        self.shared.event.remove();
        unsafe {
            close(self.shared.fd);
        }
    }

    fn handle_read(&self) {
        if self.shared.state.get() != SessionState::Connected {
            return;
        }

        // One datagram per notification preserves message boundaries.
        let mut buf = [0u8; 65536];
        let mut addr: sockaddr_in = unsafe { mem::zeroed() };
        let mut len = mem::size_of::<sockaddr_in>() as socklen_t;
        let n = unsafe {
            recvfrom(
                self.shared.fd,
                buf.as_mut_ptr() as *mut c_void,
                buf.len(),
                0,
                &mut addr as *mut _ as *mut sockaddr,
                &mut len,
            )
        };
        if n < 0 {
            return;
        }

        let peer = socket::sockaddr_to_socketaddr(&addr);
        let cb = self.shared.datagram_cb.borrow().clone();
        if let Some(cb) = cb {
            (cb.borrow_mut())(self, &buf[..n as usize], peer);
        }
    }
}

impl Drop for UdpShared {
    fn drop(&mut self) {
        if self.state.get() != SessionState::Disconnected {
            unsafe {
                close(self.fd);
            }
        }
    }
}
