//! The reactor: one blocking dispatch loop per thread.
//!
//! A [`Cycle`] composes a poller, a timer schedule and a cross-thread task
//! queue. Exactly one thread may call [`Cycle::run`]; every Event and Buffer
//! it owns is mutated only on that thread, so the steady-state I/O path
//! takes no locks. The only thread-safe entry points are [`CycleHandle`]
//! (task enqueue and exit) and timer cancellation marshalled through the
//! task queue.
//!
//! Each loop iteration, in order:
//! 1. wait for readiness, bounded by the earliest pending timer expiry
//! 2. dispatch ready Events in the order the poller reported them
//! 3. fire due timers in non-decreasing expiry order
//! 4. drain queued tasks FIFO, each exactly once
//! 5. observe the exit flag

use crate::event::Event;
use crate::poller::{Poller, ReadyEntry};
use crate::timer::{TimerCallback, TimerId, TimerQueue};

use libc::{EFD_CLOEXEC, EFD_NONBLOCK, close, eventfd, read, write};
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::os::unix::io::RawFd;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

/// Upper bound on one poller wait when no timer is pending sooner.
const DEFAULT_WAIT: Duration = Duration::from_secs(10);

/// A unit of work handed to a Cycle from any thread, run once on the loop
/// thread with the Cycle in scope.
pub type Task = Box<dyn FnOnce(&Cycle) + Send>;

/// The cross-thread half of a Cycle: everything a foreign thread is allowed
/// to touch.
struct CycleShared {
    pending: Mutex<VecDeque<Task>>,
    quit: AtomicBool,
    draining: AtomicBool,
    wakeup_fd: RawFd,
}

impl Drop for CycleShared {
    // The eventfd lives as long as any handle does, so a late enqueue
    // never writes into a recycled descriptor.
    fn drop(&mut self) {
        unsafe {
            close(self.wakeup_fd);
        }
    }
}

impl CycleShared {
    /// Makes a blocked `wait` return promptly.
    fn wakeup(&self) {
        let one: u64 = 1;
        let ret = unsafe { write(self.wakeup_fd, &one as *const u64 as *const _, 8) };
        if ret < 0 {
            warn!(fd = self.wakeup_fd, "wakeup write failed");
        }
    }
}

/// Thread-safe handle to a running Cycle.
///
/// Cloneable and `Send`; the only operations it exposes are the ones that
/// are safe from a foreign thread.
#[derive(Clone)]
pub struct CycleHandle {
    shared: Arc<CycleShared>,
}

impl CycleHandle {
    /// Enqueues `task` for execution on the loop thread, waking a blocked
    /// wait. The task runs exactly once, FIFO with respect to other tasks.
    pub fn queue(&self, task: impl FnOnce(&Cycle) + Send + 'static) {
        self.shared.pending.lock().unwrap().push_back(Box::new(task));
        self.shared.wakeup();
    }

    /// Requests loop exit. Idempotent and safe from any thread.
    pub fn exit(&self) {
        self.shared.quit.store(true, Ordering::Release);
        self.shared.wakeup();
    }

    /// Marshals a timer cancellation onto the loop thread.
    pub fn cancel_timer(&self, id: TimerId) {
        self.queue(move |cycle| cycle.cancel(id));
    }
}

/// Single-threaded event-dispatch loop over one poller instance.
pub struct Cycle {
    shared: Arc<CycleShared>,
    poller: RefCell<Poller>,
    events: RefCell<HashMap<RawFd, Rc<Event>>>,
    timers: RefCell<TimerQueue>,
    owner: ThreadId,
    looping: Cell<bool>,
    /// Keeps the self-wakeup Event alive for the life of the Cycle.
    wakeup_event: RefCell<Option<Rc<Event>>>,
}

impl Cycle {
    /// Creates a Cycle owned by the calling thread.
    pub fn new() -> Rc<Self> {
        let wakeup_fd = unsafe { eventfd(0, EFD_NONBLOCK | EFD_CLOEXEC) };
        assert!(wakeup_fd >= 0, "eventfd creation failed");

        let cycle = Rc::new(Self {
            shared: Arc::new(CycleShared {
                pending: Mutex::new(VecDeque::new()),
                quit: AtomicBool::new(false),
                draining: AtomicBool::new(false),
                wakeup_fd,
            }),
            poller: RefCell::new(Poller::new()),
            events: RefCell::new(HashMap::new()),
            timers: RefCell::new(TimerQueue::new()),
            owner: thread::current().id(),
            looping: Cell::new(false),
            wakeup_event: RefCell::new(None),
        });

        let event = Event::new(&cycle, wakeup_fd);
        event.set_read_handler(move || {
            let mut counter: u64 = 0;
            unsafe {
                read(wakeup_fd, &mut counter as *mut u64 as *mut _, 8);
            }
        });
        event.enable_reading();
        *cycle.wakeup_event.borrow_mut() = Some(event);

        debug!(wakeup_fd, "cycle created");
        cycle
    }

    /// Returns a `Send` handle for cross-thread task handoff and exit.
    pub fn handle(&self) -> CycleHandle {
        CycleHandle {
            shared: self.shared.clone(),
        }
    }

    /// Whether the calling thread owns this Cycle.
    pub fn is_in_cycle_thread(&self) -> bool {
        thread::current().id() == self.owner
    }

    pub(crate) fn assert_in_cycle_thread(&self) {
        assert!(
            self.is_in_cycle_thread(),
            "cycle owned by {:?} touched from {:?}",
            self.owner,
            thread::current().id()
        );
    }

    /// Blocks the calling thread dispatching readiness, timers and tasks
    /// until [`exit`](Self::exit) is observed.
    pub fn run(&self) {
        self.assert_in_cycle_thread();
        assert!(!self.looping.get(), "cycle is already running");
        self.looping.set(true);
        debug!("cycle loop started");

        let mut ready: Vec<ReadyEntry> = Vec::with_capacity(64);
        loop {
            let timeout = self.wait_timeout();
            ready.clear();
            self.poller.borrow_mut().wait(timeout, &mut ready);

            // Snapshot the active events first: a handler may register or
            // remove events, which needs the table borrow back.
            let active: Vec<_> = {
                let events = self.events.borrow();
                ready
                    .iter()
                    .filter_map(|entry| {
                        events
                            .get(&entry.fd)
                            .map(|event| (event.clone(), entry.readiness))
                    })
                    .collect()
            };
            for (event, readiness) in active {
                event.dispatch(readiness);
            }

            self.process_timers();
            self.drain_pending();

            if self.shared.quit.load(Ordering::Acquire) {
                break;
            }
        }

        self.looping.set(false);
        debug!("cycle loop stopped");
    }

    /// Requests loop exit; idempotent, callable from any thread.
    pub fn exit(&self) {
        self.shared.quit.store(true, Ordering::Release);
        if !self.is_in_cycle_thread() {
            self.shared.wakeup();
        }
    }

    /// Runs `task` now when called on the loop thread, otherwise enqueues it.
    pub fn run_in_cycle(&self, task: impl FnOnce(&Cycle) + Send + 'static) {
        if self.is_in_cycle_thread() {
            task(self);
        } else {
            self.queue_in_cycle(task);
        }
    }

    /// Thread-safe task enqueue; wakes the loop when called from a foreign
    /// thread or while the loop is already draining the queue.
    pub fn queue_in_cycle(&self, task: impl FnOnce(&Cycle) + Send + 'static) {
        self.shared.pending.lock().unwrap().push_back(Box::new(task));
        if !self.is_in_cycle_thread() || self.shared.draining.load(Ordering::Acquire) {
            self.shared.wakeup();
        }
    }

    /// Schedules `callback` at an absolute instant.
    pub fn run_at(&self, when: Instant, callback: impl FnMut() + 'static) -> TimerId {
        self.insert_timer(when, None, Box::new(callback))
    }

    /// Schedules `callback` once, `delay` from now.
    pub fn run_after(&self, delay: Duration, callback: impl FnMut() + 'static) -> TimerId {
        self.insert_timer(Instant::now() + delay, None, Box::new(callback))
    }

    /// Schedules a persistent `callback` every `interval`, first firing one
    /// interval from now.
    pub fn run_every(&self, interval: Duration, callback: impl FnMut() + 'static) -> TimerId {
        self.insert_timer(Instant::now() + interval, Some(interval), Box::new(callback))
    }

    /// Cancels a pending timer; no-op if it already fired and was one-shot.
    /// Only legal on the loop thread; foreign threads go through
    /// [`CycleHandle::cancel_timer`].
    pub fn cancel(&self, id: TimerId) {
        self.assert_in_cycle_thread();
        self.timers.borrow_mut().cancel(id);
    }

    fn insert_timer(
        &self,
        expiry: Instant,
        interval: Option<Duration>,
        callback: TimerCallback,
    ) -> TimerId {
        self.assert_in_cycle_thread();
        self.timers.borrow_mut().insert(expiry, interval, callback)
    }

    /// Registers or re-registers `event` with the poller. Loop thread only.
    pub(crate) fn update_event(&self, event: &Rc<Event>) {
        self.assert_in_cycle_thread();
        let fd = event.fd();
        if event.registered().get() {
            self.poller.borrow_mut().modify(fd, event.interest());
        } else {
            assert!(
                !self.events.borrow().contains_key(&fd),
                "descriptor {} registered twice on this cycle",
                fd
            );
            trace!(fd, "registering event");
            self.poller.borrow_mut().add(fd, event.interest());
            self.events.borrow_mut().insert(fd, event.clone());
            event.registered().set(true);
        }
    }

    /// Drops the Event registered for `fd`. Loop thread only.
    pub(crate) fn remove_event(&self, fd: RawFd) {
        self.assert_in_cycle_thread();
        if let Some(event) = self.events.borrow_mut().remove(&fd) {
            trace!(fd, "removing event");
            self.poller.borrow_mut().remove(fd);
            event.registered().set(false);
        }
    }

    fn wait_timeout(&self) -> Duration {
        match self.timers.borrow().next_expiry() {
            Some(expiry) => expiry
                .saturating_duration_since(Instant::now())
                .min(DEFAULT_WAIT),
            None => DEFAULT_WAIT,
        }
    }

    fn process_timers(&self) {
        let now = Instant::now();
        let due = self.timers.borrow_mut().pop_due(now);
        for mut timer in due {
            (timer.callback)();
            self.timers.borrow_mut().reschedule(timer, now);
        }
    }

    fn drain_pending(&self) {
        self.shared.draining.store(true, Ordering::Release);
        // One swap per iteration: tasks queued while draining run next
        // time round, their enqueue already forced a wakeup.
        let tasks: Vec<Task> = {
            let mut pending = self.shared.pending.lock().unwrap();
            pending.drain(..).collect()
        };
        for task in tasks {
            task(self);
        }
        self.shared.draining.store(false, Ordering::Release);
    }
}
