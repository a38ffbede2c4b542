//! epoll-class readiness backend.

use super::{Interest, Readiness, ReadyEntry, timeout_millis};

use libc::{
    EINTR, EPOLL_CLOEXEC, EPOLL_CTL_ADD, EPOLL_CTL_DEL, EPOLL_CTL_MOD, EPOLLERR, EPOLLHUP,
    EPOLLIN, EPOLLOUT, EPOLLPRI, EPOLLRDHUP, close, epoll_create1, epoll_ctl, epoll_event,
    epoll_wait,
};
use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

const EVENT_CHUNK: usize = 64;

pub(crate) struct EpollPoller {
    epoll_fd: RawFd,
    events: Vec<epoll_event>,
}

impl EpollPoller {
    pub(crate) fn new() -> io::Result<Self> {
        let epoll_fd = unsafe { epoll_create1(EPOLL_CLOEXEC) };
        if epoll_fd < 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(Self {
            epoll_fd,
            events: vec![epoll_event { events: 0, u64: 0 }; EVENT_CHUNK],
        })
    }

    pub(crate) fn add(&mut self, fd: RawFd, interest: Interest) {
        self.control(EPOLL_CTL_ADD, fd, interest);
    }

    pub(crate) fn modify(&mut self, fd: RawFd, interest: Interest) {
        self.control(EPOLL_CTL_MOD, fd, interest);
    }

    pub(crate) fn remove(&mut self, fd: RawFd) {
        self.control(EPOLL_CTL_DEL, fd, Interest::default());
    }

    pub(crate) fn wait(&mut self, timeout: Duration, ready: &mut Vec<ReadyEntry>) {
        loop {
            let n = unsafe {
                epoll_wait(
                    self.epoll_fd,
                    self.events.as_mut_ptr(),
                    self.events.len() as i32,
                    timeout_millis(timeout),
                )
            };

            if n < 0 {
                if errno() == EINTR {
                    continue;
                }
                panic!("epoll_wait failed: {}", io::Error::last_os_error());
            }

            for event in &self.events[..n as usize] {
                ready.push(ReadyEntry {
                    fd: event.u64 as RawFd,
                    readiness: translate(event.events as i32),
                });
            }

            // A full chunk may mean more descriptors are pending; grow so
            // the next wait can report them in one pass.
            if n as usize == self.events.len() {
                self.events
                    .resize(self.events.len() * 2, epoll_event { events: 0, u64: 0 });
            }
            return;
        }
    }

    fn control(&self, op: i32, fd: RawFd, interest: Interest) {
        let mut bits = 0u32;
        if interest.read {
            bits |= EPOLLIN as u32;
        }
        if interest.write {
            bits |= EPOLLOUT as u32;
        }

        let mut event = epoll_event {
            events: bits,
            u64: fd as u64,
        };

        let ret = unsafe { epoll_ctl(self.epoll_fd, op, fd, &mut event) };
        assert!(
            ret == 0,
            "epoll_ctl(op={}, fd={}) failed: {}",
            op,
            fd,
            io::Error::last_os_error()
        );
    }
}

impl Drop for EpollPoller {
    fn drop(&mut self) {
        unsafe {
            close(self.epoll_fd);
        }
    }
}

fn translate(bits: i32) -> Readiness {
    let mut readiness = Readiness::default();
    if bits & (EPOLLIN | EPOLLPRI) as i32 != 0 {
        readiness.insert(Readiness::READABLE);
    }
    if bits & EPOLLOUT as i32 != 0 {
        readiness.insert(Readiness::WRITABLE);
    }
    if bits & EPOLLERR as i32 != 0 {
        readiness.insert(Readiness::ERROR);
    }
    if bits & (EPOLLHUP | EPOLLRDHUP) as i32 != 0 {
        readiness.insert(Readiness::CLOSED);
    }
    readiness
}

fn errno() -> i32 {
    io::Error::last_os_error().raw_os_error().unwrap_or(0)
}
