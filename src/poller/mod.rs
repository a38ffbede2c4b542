//! OS readiness backends.
//!
//! Two implementations translate platform readiness bits into the portable
//! [`Readiness`] set:
//! - [`epoll::EpollPoller`]: the preferred backend where epoll is available
//! - [`poll::PollPoller`]: the poll(2) fallback
//!
//! The [`Poller`] enum picks epoll at construction time and falls back to
//! poll if the epoll instance cannot be created.

pub(crate) mod epoll;
pub(crate) mod poll;

use std::os::unix::io::RawFd;
use std::time::Duration;

use tracing::debug;

/// Interest set registered for a descriptor.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Interest {
    pub read: bool,
    pub write: bool,
}

impl Interest {
    pub fn is_none(&self) -> bool {
        !self.read && !self.write
    }
}

/// Portable readiness flags reported by a wait.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Readiness(u8);

impl Readiness {
    pub const READABLE: Readiness = Readiness(0b0001);
    pub const WRITABLE: Readiness = Readiness(0b0010);
    pub const ERROR: Readiness = Readiness(0b0100);
    pub const CLOSED: Readiness = Readiness(0b1000);

    pub fn insert(&mut self, other: Readiness) {
        self.0 |= other.0;
    }

    pub fn contains(&self, other: Readiness) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_readable(&self) -> bool {
        self.contains(Readiness::READABLE)
    }

    pub fn is_writable(&self) -> bool {
        self.contains(Readiness::WRITABLE)
    }

    pub fn is_error(&self) -> bool {
        self.contains(Readiness::ERROR)
    }

    pub fn is_closed(&self) -> bool {
        self.contains(Readiness::CLOSED)
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

/// One ready descriptor, in the order the OS reported it.
#[derive(Clone, Copy, Debug)]
pub struct ReadyEntry {
    pub fd: RawFd,
    pub readiness: Readiness,
}

/// Readiness backend, epoll-preferred with a poll(2) fallback.
pub(crate) enum Poller {
    Epoll(epoll::EpollPoller),
    Poll(poll::PollPoller),
}

impl Poller {
    pub(crate) fn new() -> Self {
        match epoll::EpollPoller::new() {
            Ok(poller) => Poller::Epoll(poller),
            Err(err) => {
                debug!(error = %err, "epoll unavailable, falling back to poll");
                Poller::Poll(poll::PollPoller::new())
            }
        }
    }

    pub(crate) fn add(&mut self, fd: RawFd, interest: Interest) {
        match self {
            Poller::Epoll(p) => p.add(fd, interest),
            Poller::Poll(p) => p.add(fd, interest),
        }
    }

    pub(crate) fn modify(&mut self, fd: RawFd, interest: Interest) {
        match self {
            Poller::Epoll(p) => p.modify(fd, interest),
            Poller::Poll(p) => p.modify(fd, interest),
        }
    }

    pub(crate) fn remove(&mut self, fd: RawFd) {
        match self {
            Poller::Epoll(p) => p.remove(fd),
            Poller::Poll(p) => p.remove(fd),
        }
    }

    /// Blocks for at most `timeout`, filling `ready` with descriptors in
    /// the order the OS reported them. Interrupted waits are retried
    /// transparently.
    pub(crate) fn wait(&mut self, timeout: Duration, ready: &mut Vec<ReadyEntry>) {
        match self {
            Poller::Epoll(p) => p.wait(timeout, ready),
            Poller::Poll(p) => p.wait(timeout, ready),
        }
    }
}

pub(crate) fn timeout_millis(timeout: Duration) -> i32 {
    timeout.as_millis().min(i32::MAX as u128) as i32
}
