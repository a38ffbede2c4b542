//! poll(2)-class readiness backend, used when epoll is unavailable.

use super::{Interest, Readiness, ReadyEntry, timeout_millis};

use libc::{
    EINTR, POLLERR, POLLHUP, POLLIN, POLLNVAL, POLLOUT, POLLPRI, POLLRDHUP, nfds_t, poll, pollfd,
};
use std::collections::HashMap;
use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

pub(crate) struct PollPoller {
    /// Dense descriptor set handed to poll(2) each wait.
    fds: Vec<pollfd>,
    /// fd -> slot in `fds`.
    slots: HashMap<RawFd, usize>,
}

impl PollPoller {
    pub(crate) fn new() -> Self {
        Self {
            fds: Vec::new(),
            slots: HashMap::new(),
        }
    }

    pub(crate) fn add(&mut self, fd: RawFd, interest: Interest) {
        assert!(
            !self.slots.contains_key(&fd),
            "descriptor {} already registered with poller",
            fd
        );
        self.slots.insert(fd, self.fds.len());
        self.fds.push(pollfd {
            fd,
            events: interest_bits(interest),
            revents: 0,
        });
    }

    pub(crate) fn modify(&mut self, fd: RawFd, interest: Interest) {
        let slot = *self
            .slots
            .get(&fd)
            .unwrap_or_else(|| panic!("descriptor {} not registered with poller", fd));
        self.fds[slot].events = interest_bits(interest);
    }

    pub(crate) fn remove(&mut self, fd: RawFd) {
        let slot = match self.slots.remove(&fd) {
            Some(slot) => slot,
            None => return,
        };
        self.fds.swap_remove(slot);
        if slot < self.fds.len() {
            self.slots.insert(self.fds[slot].fd, slot);
        }
    }

    pub(crate) fn wait(&mut self, timeout: Duration, ready: &mut Vec<ReadyEntry>) {
        loop {
            let n = unsafe {
                poll(
                    self.fds.as_mut_ptr(),
                    self.fds.len() as nfds_t,
                    timeout_millis(timeout),
                )
            };

            if n < 0 {
                if io::Error::last_os_error().raw_os_error() == Some(EINTR) {
                    continue;
                }
                panic!("poll failed: {}", io::Error::last_os_error());
            }

            let mut remaining = n as usize;
            for entry in &mut self.fds {
                if remaining == 0 {
                    break;
                }
                if entry.revents == 0 {
                    continue;
                }
                ready.push(ReadyEntry {
                    fd: entry.fd,
                    readiness: translate(entry.revents),
                });
                entry.revents = 0;
                remaining -= 1;
            }
            return;
        }
    }
}

fn interest_bits(interest: Interest) -> i16 {
    let mut bits = 0i16;
    if interest.read {
        bits |= POLLIN | POLLPRI;
    }
    if interest.write {
        bits |= POLLOUT;
    }
    bits
}

fn translate(bits: i16) -> Readiness {
    let mut readiness = Readiness::default();
    if bits & (POLLIN | POLLPRI) != 0 {
        readiness.insert(Readiness::READABLE);
    }
    if bits & POLLOUT != 0 {
        readiness.insert(Readiness::WRITABLE);
    }
    if bits & (POLLERR | POLLNVAL) != 0 {
        readiness.insert(Readiness::ERROR);
    }
    if bits & (POLLHUP | POLLRDHUP) != 0 {
        readiness.insert(Readiness::CLOSED);
    }
    readiness
}
