//! TCP stream session: a connected socket's buffers, callbacks and
//! connection state machine.
//!
//! A [`TcpSession`] is a cheaply cloneable handle (an `Rc` underneath); the
//! component that created it (acceptor factory or dialer) owns it until
//! the state machine reaches `Disconnected`. States only move forward:
//!
//! ```text
//! Connecting -> Connected -> Disconnecting -> Disconnected
//! ```
//!
//! `Disconnecting` is entered when a local close is requested while output
//! is still flushing; the descriptor is closed exactly once on entering
//! `Disconnected` and no callback ever fires afterwards. All of this runs
//! on the owning Cycle's thread; the handle is deliberately `!Send`.

use crate::buffer::Buffer;
use crate::cycle::Cycle;
use crate::event::Event;
use crate::net::socket;

use libc::{EAGAIN, EINTR, EWOULDBLOCK, c_void, close, write};
use std::any::Any;
use std::cell::{Cell, RefCell, RefMut};
use std::io;
use std::net::SocketAddr;
use std::os::unix::io::RawFd;
use std::rc::Rc;

use tracing::{debug, error, trace, warn};

/// Connection lifecycle state. Transitions are forward-only.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Connected,
    Disconnecting,
    Disconnected,
}

type MessageCallback = Rc<RefCell<dyn FnMut(&TcpSession, &mut Buffer)>>;
// Shared, not RefCell-wrapped: these slots can legally re-enter themselves
// (a connection callback rejecting the peer via shutdown, a write-complete
// callback refilling the stream), so invocation must not hold any borrow.
type SessionCallback = Rc<dyn Fn(&TcpSession)>;

struct SessionShared {
    cycle: Rc<Cycle>,
    event: Rc<Event>,
    fd: RawFd,
    local: SocketAddr,
    peer: Cell<SocketAddr>,
    state: Cell<SessionState>,
    input: RefCell<Buffer>,
    output: RefCell<Buffer>,
    message_cb: RefCell<Option<MessageCallback>>,
    connection_cb: RefCell<Option<SessionCallback>>,
    write_complete_cb: RefCell<Option<SessionCallback>>,
    close_cb: RefCell<Option<SessionCallback>>,
    /// Protocol-specific state attached by the session's owner.
    context: RefCell<Option<Box<dyn Any>>>,
}

/// Handle to one TCP connection owned by a Cycle.
#[derive(Clone)]
pub struct TcpSession {
    shared: Rc<SessionShared>,
}

impl TcpSession {
    /// Wraps a freshly accepted descriptor. The session starts in
    /// `Connecting`; the owner installs callbacks and then calls
    /// [`establish`](Self::establish).
    pub fn from_accepted(cycle: &Rc<Cycle>, fd: RawFd, peer: SocketAddr) -> Self {
        cycle.assert_in_cycle_thread();
        socket::set_nonblocking(fd);
        let local = socket::local_addr(fd).unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], 0)));
        Self::build(cycle, fd, local, peer)
    }

    /// Starts a non-blocking connect to `address`. The session stays in
    /// `Connecting` with write interest armed; first writability resolves
    /// SO_ERROR and either establishes or tears down.
    pub fn connect(cycle: &Rc<Cycle>, address: &str) -> io::Result<Self> {
        cycle.assert_in_cycle_thread();
        let addr = socket::parse_sockaddr(address)?;
        let fd = socket::new_stream_socket()?;
        if let Err(err) = socket::connect_socket(fd, &addr) {
            unsafe {
                close(fd);
            }
            return Err(err);
        }

        let local = socket::local_addr(fd).unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], 0)));
        let session = Self::build(cycle, fd, local, socket::sockaddr_to_socketaddr(&addr));
        session.shared.event.enable_writing();
        Ok(session)
    }

    fn build(cycle: &Rc<Cycle>, fd: RawFd, local: SocketAddr, peer: SocketAddr) -> Self {
        let event = Event::new(cycle, fd);
        let shared = Rc::new(SessionShared {
            cycle: cycle.clone(),
            event: event.clone(),
            fd,
            local,
            peer: Cell::new(peer),
            state: Cell::new(SessionState::Connecting),
            input: RefCell::new(Buffer::new()),
            output: RefCell::new(Buffer::new()),
            message_cb: RefCell::new(None),
            connection_cb: RefCell::new(None),
            write_complete_cb: RefCell::new(None),
            close_cb: RefCell::new(None),
            context: RefCell::new(None),
        });
        event.tie(&(shared.clone() as Rc<dyn Any>));

        let weak = Rc::downgrade(&shared);
        event.set_read_handler(move || {
            if let Some(shared) = weak.upgrade() {
                TcpSession { shared }.handle_read();
            }
        });
        let weak = Rc::downgrade(&shared);
        event.set_write_handler(move || {
            if let Some(shared) = weak.upgrade() {
                TcpSession { shared }.handle_write();
            }
        });
        let weak = Rc::downgrade(&shared);
        event.set_close_handler(move || {
            if let Some(shared) = weak.upgrade() {
                TcpSession { shared }.handle_close();
            }
        });
        let weak = Rc::downgrade(&shared);
        event.set_error_handler(move || {
            if let Some(shared) = weak.upgrade() {
                TcpSession { shared }.handle_error();
            }
        });

        TcpSession { shared }
    }

    pub fn state(&self) -> SessionState {
        self.shared.state.get()
    }

    pub fn is_connected(&self) -> bool {
        self.shared.state.get() == SessionState::Connected
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.shared.local
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.shared.peer.get()
    }

    pub fn cycle(&self) -> &Rc<Cycle> {
        &self.shared.cycle
    }

    /// Bytes delivered to a message callback are accumulated here; a
    /// protocol parser leaves any partial trailing frame in place.
    pub fn set_message_callback(&self, cb: impl FnMut(&TcpSession, &mut Buffer) + 'static) {
        *self.shared.message_cb.borrow_mut() = Some(Rc::new(RefCell::new(cb)));
    }

    /// Observes state-machine transitions (established and disconnected).
    /// The callback may close the session it observes.
    pub fn set_connection_callback(&self, cb: impl Fn(&TcpSession) + 'static) {
        *self.shared.connection_cb.borrow_mut() = Some(Rc::new(cb));
    }

    /// Fires when the output buffer drains completely. The callback may
    /// `send` again; an immediate full write fires it again, re-entrantly.
    pub fn set_write_complete_callback(&self, cb: impl Fn(&TcpSession) + 'static) {
        *self.shared.write_complete_cb.borrow_mut() = Some(Rc::new(cb));
    }

    /// Fires once on entering `Disconnected`, after the connection callback.
    pub fn set_close_callback(&self, cb: impl Fn(&TcpSession) + 'static) {
        *self.shared.close_cb.borrow_mut() = Some(Rc::new(cb));
    }

    /// Attaches protocol-specific per-session state.
    pub fn set_context(&self, context: Box<dyn Any>) {
        *self.shared.context.borrow_mut() = Some(context);
    }

    pub fn context(&self) -> RefMut<'_, Option<Box<dyn Any>>> {
        self.shared.context.borrow_mut()
    }

    /// Completes attachment of an accepted descriptor: transitions to
    /// `Connected`, arms read interest and fires the connection callback.
    pub fn establish(&self) {
        self.shared.cycle.assert_in_cycle_thread();
        assert_eq!(
            self.shared.state.get(),
            SessionState::Connecting,
            "establish on a session past Connecting"
        );
        self.shared.state.set(SessionState::Connected);
        self.shared.event.enable_reading();
        debug!(peer = %self.peer_addr(), "session established");
        self.fire(&self.shared.connection_cb);
    }

    /// Queues `data` for delivery to the peer.
    ///
    /// Only legal in `Connected`; returns `false` otherwise with no I/O
    /// performed. If the output buffer is empty an immediate write is
    /// attempted; any remainder is buffered and write interest enabled so
    /// the Cycle drains it on future writable readiness.
    pub fn send(&self, data: &[u8]) -> bool {
        if self.shared.state.get() != SessionState::Connected {
            warn!(state = ?self.shared.state.get(), "send on non-connected session");
            return false;
        }
        self.shared.cycle.assert_in_cycle_thread();

        let mut written = 0usize;
        if self.shared.output.borrow().is_empty() {
            let n = unsafe {
                write(
                    self.shared.fd,
                    data.as_ptr() as *const c_void,
                    data.len(),
                )
            };
            if n < 0 {
                let err = socket::errno();
                if err != EAGAIN && err != EWOULDBLOCK && err != EINTR {
                    // Hard error: leave teardown to the readiness
                    // notification already queued by the kernel.
                    warn!(errno = err, "send write failed");
                    return false;
                }
            } else {
                written = n as usize;
            }
        }

        if written < data.len() {
            self.shared.output.borrow_mut().add(&data[written..]);
            if !self.shared.event.is_writing() {
                self.shared.event.enable_writing();
            }
        } else {
            self.fire(&self.shared.write_complete_cb);
        }
        true
    }

    /// Requests a local close. With pending output the session moves to
    /// `Disconnecting` and closes once the buffer drains; otherwise it
    /// disconnects immediately.
    pub fn shutdown(&self) {
        self.shared.cycle.assert_in_cycle_thread();
        if self.shared.state.get() != SessionState::Connected {
            return;
        }
        if self.shared.output.borrow().is_empty() {
            self.handle_close();
        } else {
            self.shared.state.set(SessionState::Disconnecting);
        }
    }

    /// Closes immediately, discarding any pending output.
    pub fn force_close(&self) {
        self.shared.cycle.assert_in_cycle_thread();
        self.handle_close();
    }

    fn handle_read(&self) {
        if self.shared.state.get() == SessionState::Disconnected {
            return;
        }

        // Drain everything currently available so multiple peer writes
        // coalesce into a single delivery.
        let mut saw_eof = false;
        loop {
            let result = self
                .shared
                .input
                .borrow_mut()
                .read_from_descriptor(self.shared.fd);
            match result {
                Ok(0) => {
                    saw_eof = true;
                    break;
                }
                Ok(_) => continue,
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    error!(peer = %self.peer_addr(), error = %err, "read failed");
                    self.handle_error();
                    return;
                }
            }
        }

        if self.shared.input.borrow().readable_bytes() > 0 {
            let cb = self.shared.message_cb.borrow().clone();
            if let Some(cb) = cb {
                // Move the buffer out for the duration of the callback so
                // the consumer can hold `&mut Buffer` while still calling
                // send/shutdown on the session handle.
                let mut input = std::mem::take(&mut *self.shared.input.borrow_mut());
                (cb.borrow_mut())(self, &mut input);
                *self.shared.input.borrow_mut() = input;
            }
        }

        if saw_eof {
            trace!(peer = %self.peer_addr(), "peer closed");
            self.handle_close();
        }
    }

    fn handle_write(&self) {
        let state = self.shared.state.get();
        if state == SessionState::Disconnected {
            return;
        }
        if state == SessionState::Connecting {
            self.finish_connect();
            return;
        }
        if !self.shared.event.is_writing() {
            return;
        }

        let drained = {
            let mut output = self.shared.output.borrow_mut();
            let n = unsafe {
                write(
                    self.shared.fd,
                    output.peek().as_ptr() as *const c_void,
                    output.readable_bytes(),
                )
            };
            if n < 0 {
                let err = socket::errno();
                if err != EAGAIN && err != EWOULDBLOCK && err != EINTR {
                    error!(errno = err, "flush write failed");
                    drop(output);
                    self.handle_error();
                    return;
                }
                false
            } else {
                output.retrieve(n as usize);
                output.is_empty()
            }
        };

        if drained {
            self.shared.event.disable_writing();
            self.fire(&self.shared.write_complete_cb);
            if self.shared.state.get() == SessionState::Disconnecting {
                self.handle_close();
            }
        }
    }

    /// Resolves a pending non-blocking connect on first writability.
    fn finish_connect(&self) {
        let err = socket::socket_error(self.shared.fd);
        if err != 0 {
            error!(errno = err, peer = %self.peer_addr(), "connect failed");
            self.handle_close();
            return;
        }
        if let Ok(peer) = socket::peer_addr(self.shared.fd) {
            self.shared.peer.set(peer);
        }
        self.shared.event.disable_writing();
        self.shared.state.set(SessionState::Connected);
        self.shared.event.enable_reading();
        debug!(peer = %self.peer_addr(), "outbound session established");
        self.fire(&self.shared.connection_cb);
    }

    fn handle_close(&self) {
        if self.shared.state.get() == SessionState::Disconnected {
            return;
        }
        self.shared.state.set(SessionState::Disconnected);
        self.shared.event.disable_all();
        self.shared.event.remove();
        unsafe {
            close(self.shared.fd);
        }
        debug!(peer = %self.peer_addr(), "session closed");
        self.fire(&self.shared.connection_cb);
        self.fire(&self.shared.close_cb);
    }

    fn handle_error(&self) {
        let err = socket::socket_error(self.shared.fd);
        if err != 0 {
            error!(errno = err, peer = %self.peer_addr(), "session error");
        }
        self.handle_close();
    }

    fn fire(&self, slot: &RefCell<Option<SessionCallback>>) {
        // Clone the Rc and release the slot borrow before the call so the
        // callback can reach back into this session.
        let cb = slot.borrow().clone();
        if let Some(cb) = cb {
            cb(self);
        }
    }
}

impl Drop for SessionShared {
    fn drop(&mut self) {
        // Owner dropped every handle without closing. Unregister the Event
        // first: a closed descriptor never reports readiness again, so the
        // table entry would otherwise outlive the fd and collide with the
        // next session the kernel hands the same number.
        if self.state.get() != SessionState::Disconnected {
            self.event.remove();
            unsafe {
                close(self.fd);
            }
        }
    }
}
