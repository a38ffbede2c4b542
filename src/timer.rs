//! Timer schedule integrated into a Cycle's wait timeout.
//!
//! Entries are ordered by absolute expiry. A persistent timer that slipped
//! while the loop was busy skips the missed ticks and schedules exactly one
//! future interval-aligned tick (no burst catch-up).

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

/// Identifier returned by an insert, used to cancel the entry later.
///
/// `Copy + Send` so a foreign thread can marshal a cancel back to the
/// owning loop through the task queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

pub(crate) type TimerCallback = Box<dyn FnMut()>;

struct TimerEntry {
    interval: Option<Duration>,
    callback: TimerCallback,
}

/// A timer popped for firing, carried outside the queue borrow so the
/// callback can itself insert or cancel timers.
pub(crate) struct DueTimer {
    pub(crate) id: TimerId,
    pub(crate) expiry: Instant,
    pub(crate) interval: Option<Duration>,
    pub(crate) callback: TimerCallback,
}

/// Expiry-ordered schedule owned by one Cycle.
pub(crate) struct TimerQueue {
    entries: BTreeMap<(Instant, u64), TimerEntry>,
    /// Live ids and their current deadline. An id stays in here while its
    /// entry is temporarily popped for firing, which is what makes
    /// cancel-during-fire observable.
    deadlines: HashMap<u64, Instant>,
    next_id: u64,
}

impl TimerQueue {
    pub(crate) fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            deadlines: HashMap::new(),
            next_id: 1,
        }
    }

    /// Schedules `callback` at `expiry`; with an interval the timer persists
    /// and refires every interval after its previous expiry.
    pub(crate) fn insert(
        &mut self,
        expiry: Instant,
        interval: Option<Duration>,
        callback: TimerCallback,
    ) -> TimerId {
        let id = self.next_id;
        self.next_id += 1;
        self.deadlines.insert(id, expiry);
        self.entries.insert((expiry, id), TimerEntry { interval, callback });
        TimerId(id)
    }

    /// Removes a pending timer. A no-op when the id already fired (one-shot)
    /// or was never known.
    pub(crate) fn cancel(&mut self, id: TimerId) {
        if let Some(deadline) = self.deadlines.remove(&id.0) {
            // Absent from entries when the timer is mid-fire; dropping it
            // from `deadlines` is enough to stop the reschedule.
            self.entries.remove(&(deadline, id.0));
        }
    }

    /// Earliest pending expiry, used to bound the poller wait.
    pub(crate) fn next_expiry(&self) -> Option<Instant> {
        self.entries.keys().next().map(|(expiry, _)| *expiry)
    }

    /// Pops every entry due at `now`, in non-decreasing expiry order.
    pub(crate) fn pop_due(&mut self, now: Instant) -> Vec<DueTimer> {
        let mut due = Vec::new();
        while let Some(&(expiry, id)) = self.entries.keys().next() {
            if expiry > now {
                break;
            }
            let entry = self.entries.remove(&(expiry, id)).unwrap();
            due.push(DueTimer {
                id: TimerId(id),
                expiry,
                interval: entry.interval,
                callback: entry.callback,
            });
        }
        due
    }

    /// Requeues a fired timer: persistent entries move to the next
    /// interval-aligned expiry strictly in the future, one-shots retire.
    /// Skipped entirely if the timer was cancelled while firing.
    pub(crate) fn reschedule(&mut self, timer: DueTimer, now: Instant) {
        if !self.deadlines.contains_key(&timer.id.0) {
            return;
        }
        match timer.interval {
            Some(interval) => {
                let mut next = timer.expiry + interval;
                while next <= now {
                    next += interval;
                }
                self.deadlines.insert(timer.id.0, next);
                self.entries.insert(
                    (next, timer.id.0),
                    TimerEntry {
                        interval: Some(interval),
                        callback: timer.callback,
                    },
                );
            }
            None => {
                self.deadlines.remove(&timer.id.0);
            }
        }
    }
}
