//! Registration of one descriptor's interest set and callbacks with a
//! [`Cycle`].
//!
//! An [`Event`] lives in the fd-keyed table of exactly one Cycle and is only
//! ever touched on that Cycle's thread, so its state sits behind
//! `Cell`/`RefCell` with no locking. Handlers are stored as
//! `Rc<RefCell<dyn FnMut()>>` slots: dispatch clones the slot and releases
//! the Event borrow before invoking it, so a handler is free to re-arm or
//! remove the Event it is running for.

use crate::cycle::Cycle;
use crate::poller::{Interest, Readiness};

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::os::unix::io::RawFd;
use std::rc::{Rc, Weak};

use tracing::trace;

pub(crate) type Handler = Rc<RefCell<dyn FnMut()>>;

/// One descriptor's registration with its owning Cycle.
pub struct Event {
    fd: RawFd,
    cycle: Weak<Cycle>,
    interest: Cell<Interest>,
    registered: Cell<bool>,
    /// Non-owning handle to the logical object this Event serves. Dispatch
    /// resolves it first and skips (and removes) the Event when the owner
    /// is already gone.
    tie: RefCell<Option<Weak<dyn Any>>>,
    read_handler: RefCell<Option<Handler>>,
    write_handler: RefCell<Option<Handler>>,
    close_handler: RefCell<Option<Handler>>,
    error_handler: RefCell<Option<Handler>>,
}

impl Event {
    pub fn new(cycle: &Rc<Cycle>, fd: RawFd) -> Rc<Self> {
        Rc::new(Self {
            fd,
            cycle: Rc::downgrade(cycle),
            interest: Cell::new(Interest::default()),
            registered: Cell::new(false),
            tie: RefCell::new(None),
            read_handler: RefCell::new(None),
            write_handler: RefCell::new(None),
            close_handler: RefCell::new(None),
            error_handler: RefCell::new(None),
        })
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    pub(crate) fn interest(&self) -> Interest {
        self.interest.get()
    }

    pub(crate) fn registered(&self) -> &Cell<bool> {
        &self.registered
    }

    /// Ties this Event to the object it serves; dispatch is skipped once the
    /// object has been dropped.
    pub fn tie(&self, owner: &Rc<dyn Any>) {
        *self.tie.borrow_mut() = Some(Rc::downgrade(owner));
    }

    pub fn set_read_handler(&self, handler: impl FnMut() + 'static) {
        *self.read_handler.borrow_mut() = Some(Rc::new(RefCell::new(handler)));
    }

    pub fn set_write_handler(&self, handler: impl FnMut() + 'static) {
        *self.write_handler.borrow_mut() = Some(Rc::new(RefCell::new(handler)));
    }

    pub fn set_close_handler(&self, handler: impl FnMut() + 'static) {
        *self.close_handler.borrow_mut() = Some(Rc::new(RefCell::new(handler)));
    }

    pub fn set_error_handler(&self, handler: impl FnMut() + 'static) {
        *self.error_handler.borrow_mut() = Some(Rc::new(RefCell::new(handler)));
    }

    pub fn is_reading(&self) -> bool {
        self.interest.get().read
    }

    pub fn is_writing(&self) -> bool {
        self.interest.get().write
    }

    pub fn enable_reading(self: &Rc<Self>) {
        let mut interest = self.interest.get();
        interest.read = true;
        self.interest.set(interest);
        self.update();
    }

    pub fn enable_writing(self: &Rc<Self>) {
        let mut interest = self.interest.get();
        interest.write = true;
        self.interest.set(interest);
        self.update();
    }

    pub fn disable_writing(self: &Rc<Self>) {
        let mut interest = self.interest.get();
        interest.write = false;
        self.interest.set(interest);
        self.update();
    }

    pub fn disable_all(self: &Rc<Self>) {
        self.interest.set(Interest::default());
        self.update();
    }

    /// Removes this Event from its owning Cycle's table and poller.
    pub fn remove(self: &Rc<Self>) {
        if let Some(cycle) = self.cycle.upgrade() {
            cycle.remove_event(self.fd);
        }
    }

    fn update(self: &Rc<Self>) {
        if let Some(cycle) = self.cycle.upgrade() {
            cycle.update_event(self);
        }
    }

    /// Invokes the applicable handlers for `readiness`, in the fixed order
    /// read, write, close/error.
    pub(crate) fn dispatch(self: &Rc<Self>, readiness: Readiness) {
        let tied = self.tie.borrow().clone();
        if let Some(tie) = tied
            && tie.upgrade().is_none()
        {
            // The serving object died but the OS notification arrived late.
            trace!(fd = self.fd, "event owner gone, dropping registration");
            self.remove();
            return;
        }

        if readiness.is_readable() {
            self.invoke(&self.read_handler);
        }
        if readiness.is_writable() {
            self.invoke(&self.write_handler);
        }
        if readiness.is_closed() {
            self.invoke(&self.close_handler);
        }
        if readiness.is_error() {
            self.invoke(&self.error_handler);
        }
    }

    fn invoke(&self, slot: &RefCell<Option<Handler>>) {
        let handler = slot.borrow().clone();
        if let Some(handler) = handler {
            (handler.borrow_mut())();
        }
    }
}
