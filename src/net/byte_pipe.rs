//! Bounded single-producer/single-consumer byte ring
//!
//! The sole synchronization point between the socket reader and a client's
//! parser. The writer parks when the ring is full and the reader parks when
//! it is empty; back-pressure is part of the contract, so this is a real
//! ring buffer, not slices through an unbounded queue. Wraparound is
//! invisible to both sides.

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::game::constants::net;

#[derive(Debug)]
struct PipeState {
    buf: Box<[u8]>,
    read: usize,
    len: usize,
    closed: bool,
}

impl PipeState {
    fn capacity(&self) -> usize {
        self.buf.len()
    }

    fn write_index(&self) -> usize {
        (self.read + self.len) % self.capacity()
    }

    /// Copies as much of `src` as fits, returning the count.
    fn push(&mut self, src: &[u8]) -> usize {
        let free = self.capacity() - self.len;
        let n = src.len().min(free);
        let start = self.write_index();
        let first = n.min(self.capacity() - start);
        self.buf[start..start + first].copy_from_slice(&src[..first]);
        if n > first {
            self.buf[..n - first].copy_from_slice(&src[first..n]);
        }
        self.len += n;
        n
    }

    /// Copies up to `dst.len()` buffered bytes out, returning the count.
    fn pop(&mut self, dst: &mut [u8]) -> usize {
        let n = dst.len().min(self.len);
        let first = n.min(self.capacity() - self.read);
        dst[..first].copy_from_slice(&self.buf[self.read..self.read + first]);
        if n > first {
            dst[first..n].copy_from_slice(&self.buf[..n - first]);
        }
        self.read = (self.read + n) % self.capacity();
        self.len -= n;
        n
    }
}

/// Bounded byte ring with blocking read/write
#[derive(Debug)]
pub struct BytePipe {
    state: Mutex<PipeState>,
    readable: Notify,
    writable: Notify,
}

impl BytePipe {
    /// Creates a pipe with the given capacity; 0 selects the default.
    pub fn new(capacity: usize) -> Self {
        let capacity = if capacity == 0 {
            net::PIPE_CAPACITY
        } else {
            capacity
        };
        Self {
            state: Mutex::new(PipeState {
                buf: vec![0u8; capacity].into_boxed_slice(),
                read: 0,
                len: 0,
                closed: false,
            }),
            readable: Notify::new(),
            writable: Notify::new(),
        }
    }

    /// Writes all of `bytes`, waiting for the reader whenever the ring
    /// fills. Returns the number of bytes written; fewer than `bytes.len()`
    /// (possibly 0) only when the pipe closes mid-write.
    pub async fn write(&self, bytes: &[u8]) -> usize {
        let mut written = 0;
        loop {
            let parked = self.writable.notified();
            {
                let mut state = self.state.lock();
                if state.closed {
                    return written;
                }
                let n = state.push(&bytes[written..]);
                if n > 0 {
                    written += n;
                    self.readable.notify_one();
                }
                if written == bytes.len() {
                    return written;
                }
            }
            parked.await;
        }
    }

    /// Reads whatever is buffered, up to `buf.len()`, waiting when the ring
    /// is empty. Returns 0 once the pipe is closed.
    pub async fn read(&self, buf: &mut [u8]) -> usize {
        if buf.is_empty() {
            return 0;
        }
        loop {
            let parked = self.readable.notified();
            {
                let mut state = self.state.lock();
                if state.closed {
                    return 0;
                }
                let n = state.pop(buf);
                if n > 0 {
                    self.writable.notify_one();
                    return n;
                }
            }
            parked.await;
        }
    }

    /// Currently buffered bytes.
    pub fn len(&self) -> usize {
        self.state.lock().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Closes the pipe and unblocks both sides.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        drop(state);
        self.readable.notify_one();
        self.writable.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}
