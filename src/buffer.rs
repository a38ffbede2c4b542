//! Growable byte buffer optimized for non-blocking socket I/O.
//!
//! A [`Buffer`] keeps three contiguous regions inside one allocation:
//!
//! ```text
//! +-------------------+------------------+------------------+
//! | prependable bytes |  readable bytes  |  writable bytes  |
//! +-------------------+------------------+------------------+
//! 0            read_index         write_index          capacity
//! ```
//!
//! Invariant: `0 <= read_index <= write_index <= capacity`.
//!
//! The prependable region starts at [`PREPEND`] bytes so a codec can stamp a
//! length or header in front of already-encoded payload without a copy. A
//! buffer is owned by exactly one session or caller and is never shared
//! across threads.

use libc::{c_void, iovec, readv};
use std::io;
use std::os::unix::io::RawFd;

/// Reserved space in front of the readable region for [`Buffer::prepend`].
pub const PREPEND: usize = 8;

/// Initial writable capacity of a fresh buffer.
pub const INITIAL: usize = 1024;

/// Growable byte container with prependable/readable/writable regions.
pub struct Buffer {
    storage: Vec<u8>,
    read_index: usize,
    write_index: usize,
}

impl Buffer {
    /// Creates a buffer with the default initial capacity.
    pub fn new() -> Self {
        Self::with_capacity(INITIAL)
    }

    /// Creates a buffer with room for `capacity` writable bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            storage: vec![0; PREPEND + capacity],
            read_index: PREPEND,
            write_index: PREPEND,
        }
    }

    /// Number of bytes available to read.
    pub fn readable_bytes(&self) -> usize {
        self.write_index - self.read_index
    }

    /// Number of bytes that can be written without growing.
    pub fn writable_bytes(&self) -> usize {
        self.storage.len() - self.write_index
    }

    /// Number of bytes in front of the readable region.
    pub fn prependable_bytes(&self) -> usize {
        self.read_index
    }

    pub fn is_empty(&self) -> bool {
        self.read_index == self.write_index
    }

    /// Returns the readable region without consuming it.
    pub fn peek(&self) -> &[u8] {
        &self.storage[self.read_index..self.write_index]
    }

    /// Copies `data` into the writable region, growing storage if needed.
    ///
    /// Growth first tries to reclaim slack by shifting the readable bytes
    /// back to the prepend boundary; only when prependable + trailing slack
    /// is still too small does it reallocate. Always returns `true`: an
    /// allocation failure aborts the process, it is not a recoverable
    /// condition here.
    pub fn add(&mut self, data: &[u8]) -> bool {
        self.ensure_writable(data.len());
        self.storage[self.write_index..self.write_index + data.len()].copy_from_slice(data);
        self.write_index += data.len();
        true
    }

    /// Advances the read index by `n` (clamped to the readable length).
    ///
    /// When the buffer becomes fully drained both indices snap back to the
    /// prepend boundary so the whole allocation is writable again.
    pub fn retrieve(&mut self, n: usize) {
        if n >= self.readable_bytes() {
            self.retrieve_all();
        } else {
            self.read_index += n;
        }
    }

    /// Drops all readable bytes and rewinds both indices.
    pub fn retrieve_all(&mut self) {
        self.read_index = PREPEND;
        self.write_index = PREPEND;
    }

    /// Consumes and returns the first `n` readable bytes.
    pub fn take(&mut self, n: usize) -> Vec<u8> {
        let n = n.min(self.readable_bytes());
        let out = self.peek()[..n].to_vec();
        self.retrieve(n);
        out
    }

    /// Consumes and returns the whole readable region.
    pub fn take_all(&mut self) -> Vec<u8> {
        let out = self.peek().to_vec();
        self.retrieve_all();
        out
    }

    /// Writes `data` immediately before the readable region.
    ///
    /// # Panics
    /// Panics if `prependable_bytes()` is smaller than `data.len()`; the
    /// caller is expected to have reserved the space (a header never exceeds
    /// [`PREPEND`] for a fresh readable region).
    pub fn prepend(&mut self, data: &[u8]) {
        assert!(
            data.len() <= self.prependable_bytes(),
            "prepend of {} bytes exceeds prependable space {}",
            data.len(),
            self.prependable_bytes()
        );
        self.read_index -= data.len();
        self.storage[self.read_index..self.read_index + data.len()].copy_from_slice(data);
    }

    /// Moves all readable bytes of `other` to the end of `self`, leaving
    /// `other` empty.
    pub fn append(&mut self, other: &mut Buffer) {
        // Split borrows: read straight out of other's storage.
        let (read, write) = (other.read_index, other.write_index);
        self.ensure_writable(write - read);
        let dst = self.write_index;
        self.storage[dst..dst + (write - read)].copy_from_slice(&other.storage[read..write]);
        self.write_index += write - read;
        other.retrieve_all();
    }

    /// Performs one scatter read from `fd` into the writable region plus a
    /// 64 KiB stack-local overflow area, then folds any overflow back into
    /// managed storage.
    ///
    /// Returns the number of bytes read; `Ok(0)` means end of stream. The
    /// stack area lets a single call absorb more bytes than the current
    /// capacity without pre-growing the buffer for the common small read.
    pub fn read_from_descriptor(&mut self, fd: RawFd) -> io::Result<usize> {
        let mut extra = [0u8; 65536];
        let writable = self.writable_bytes();

        let iov = [
            iovec {
                iov_base: self.storage[self.write_index..].as_mut_ptr() as *mut c_void,
                iov_len: writable,
            },
            iovec {
                iov_base: extra.as_mut_ptr() as *mut c_void,
                iov_len: extra.len(),
            },
        ];

        let n = unsafe { readv(fd, iov.as_ptr(), 2) };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }

        let n = n as usize;
        if n <= writable {
            self.write_index += n;
        } else {
            self.write_index = self.storage.len();
            self.add(&extra[..n - writable]);
        }
        Ok(n)
    }

    /// Appends a big-endian `u16`.
    pub fn add_u16(&mut self, value: u16) {
        self.add(&host_to_network16(value).to_ne_bytes());
    }

    /// Appends a big-endian `u32`.
    pub fn add_u32(&mut self, value: u32) {
        self.add(&host_to_network32(value).to_ne_bytes());
    }

    /// Appends a big-endian `u64`.
    pub fn add_u64(&mut self, value: u64) {
        self.add(&host_to_network64(value).to_ne_bytes());
    }

    /// Reads a big-endian `u32` from the front of the readable region
    /// without consuming it.
    ///
    /// # Panics
    /// Panics if fewer than four bytes are readable.
    pub fn peek_u32(&self) -> u32 {
        let bytes: [u8; 4] = self.peek()[..4].try_into().unwrap();
        network_to_host32(u32::from_ne_bytes(bytes))
    }

    /// Consumes and returns a big-endian `u32`.
    pub fn read_u32(&mut self) -> u32 {
        let value = self.peek_u32();
        self.retrieve(4);
        value
    }

    fn ensure_writable(&mut self, len: usize) {
        if self.writable_bytes() >= len {
            return;
        }

        if self.prependable_bytes().saturating_sub(PREPEND) + self.writable_bytes() >= len {
            // Enough total slack: compact by moving the readable bytes back
            // to the prepend boundary.
            let readable = self.readable_bytes();
            self.storage.copy_within(self.read_index..self.write_index, PREPEND);
            self.read_index = PREPEND;
            self.write_index = PREPEND + readable;
        } else {
            self.storage.resize(self.write_index + len, 0);
        }
    }
}

impl Default for Buffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Converts a `u16` from host to network (big-endian) byte order.
pub fn host_to_network16(value: u16) -> u16 {
    value.to_be()
}

/// Converts a `u32` from host to network (big-endian) byte order.
pub fn host_to_network32(value: u32) -> u32 {
    value.to_be()
}

/// Converts a `u64` from host to network (big-endian) byte order.
pub fn host_to_network64(value: u64) -> u64 {
    value.to_be()
}

/// Converts a `u16` from network (big-endian) to host byte order.
pub fn network_to_host16(value: u16) -> u16 {
    u16::from_be(value)
}

/// Converts a `u32` from network (big-endian) to host byte order.
pub fn network_to_host32(value: u32) -> u32 {
    u32::from_be(value)
}

/// Converts a `u64` from network (big-endian) to host byte order.
pub fn network_to_host64(value: u64) -> u64 {
    u64::from_be(value)
}
