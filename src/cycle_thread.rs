//! A dedicated thread running exactly one Cycle.
//!
//! The Cycle is constructed inside the new thread; its handle is published
//! to the caller through a latch signalled only after construction has
//! fully completed, so [`CycleThread::start`] never returns a handle to
//! partially built state.

use crate::cycle::{Cycle, CycleHandle};

use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use tracing::debug;

/// Owns one thread whose body constructs a Cycle and runs its loop.
pub struct CycleThread {
    handle: CycleHandle,
    thread: Option<JoinHandle<()>>,
}

impl CycleThread {
    /// Spawns the loop thread and blocks until its Cycle is fully
    /// constructed, then returns the owning wrapper. The handle is the only
    /// way to reach the new loop: task enqueue, exit and marshalled timer
    /// cancellation.
    pub fn start() -> Self {
        let latch = Arc::new((Mutex::new(None::<CycleHandle>), Condvar::new()));
        let latch_in_thread = latch.clone();

        let thread = std::thread::spawn(move || {
            let cycle = Cycle::new();
            {
                let (slot, signal) = &*latch_in_thread;
                *slot.lock().unwrap() = Some(cycle.handle());
                signal.notify_one();
            }
            cycle.run();
            debug!("cycle thread finished");
        });

        let (slot, signal) = &*latch;
        let mut published = slot.lock().unwrap();
        while published.is_none() {
            published = signal.wait(published).unwrap();
        }
        let handle = published.take().unwrap();

        Self {
            handle,
            thread: Some(thread),
        }
    }

    /// Handle to the owned loop, safe to clone and pass across threads.
    pub fn handle(&self) -> CycleHandle {
        self.handle.clone()
    }
}

impl Drop for CycleThread {
    fn drop(&mut self) {
        self.handle.exit();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
