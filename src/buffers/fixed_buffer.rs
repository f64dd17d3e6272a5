//! A fixed-capacity, reusable byte buffer. Packet buffers are pre-allocated at
//! the configured maximum packet size and cycled through the pool, so they
//! never reallocate; implementing `BufMut` lets header and payload writers use
//! the `bytes` ecosystem directly.

use bytes::buf::UninitSlice;
use std::fmt::{Debug, Formatter};

#[derive(Eq)]
pub struct FixedBuf {
    buf: Vec<u8>,
    len: usize,
}

impl FixedBuf {
    pub fn new(capacity: usize) -> FixedBuf {
        // eager zero-initialization: buffers are reused aggressively, so the
        // one-time cost is irrelevant and it keeps the unsafe surface small
        FixedBuf {
            buf: vec![0; capacity],
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }

    /// Expose the entire backing storage through `as_mut()`, for use as a
    /// receive buffer: recv writes into the full slice, then `truncate` trims
    /// to the number of bytes actually read.
    pub fn maximize_len(&mut self) {
        self.len = self.capacity();
    }

    pub fn truncate(&mut self, len: usize) {
        assert!(len <= self.capacity());
        self.len = len;
    }

    #[cfg(test)]
    pub fn from_slice(capacity: usize, data: &[u8]) -> FixedBuf {
        let mut result = FixedBuf::new(capacity);
        bytes::BufMut::put_slice(&mut result, data);
        result
    }
}

impl PartialEq for FixedBuf {
    fn eq(&self, other: &Self) -> bool {
        self.as_ref().eq(other.as_ref())
    }
}

impl Debug for FixedBuf {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        self.as_ref().fmt(f)
    }
}

impl AsRef<[u8]> for FixedBuf {
    fn as_ref(&self) -> &[u8] {
        &self.buf[..self.len]
    }
}

impl AsMut<[u8]> for FixedBuf {
    fn as_mut(&mut self) -> &mut [u8] {
        &mut self.buf[..self.len]
    }
}

unsafe impl bytes::BufMut for FixedBuf {
    fn remaining_mut(&self) -> usize {
        self.capacity() - self.len
    }

    unsafe fn advance_mut(&mut self, cnt: usize) {
        assert!(self.len + cnt <= self.capacity());
        self.len += cnt;
    }

    fn chunk_mut(&mut self) -> &mut UninitSlice {
        UninitSlice::new(&mut self.buf[self.len..])
    }
}
