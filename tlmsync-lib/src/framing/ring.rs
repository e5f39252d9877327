use std::cmp;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{Error, Result};

/// What to do when an append does not fit in the free space of a [RingBuffer].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum OverrunPolicy {
    /// Overwrite the oldest unread bytes. This is how legacy field-station links behave
    /// and means data is lost if the consumer falls behind.
    #[default]
    Overwrite,
    /// Fail the append with [Error::Overrun] without writing anything.
    Reject,
}

/// Fixed capacity circular byte store.
///
/// Bytes are appended at the write position and consumed from the read position. A
/// single append may wrap around the end of the backing storage at most once, so an
/// append larger than the capacity is rejected with [Error::ChunkTooLarge].
///
/// Not synchronized; intended to be owned by a single reader.
#[derive(Debug)]
pub struct RingBuffer {
    buf: Vec<u8>,
    // Index of the next unread byte
    read: usize,
    // Number of unread bytes
    len: usize,
    policy: OverrunPolicy,
}

impl RingBuffer {
    /// Create a new buffer with `capacity` bytes of storage.
    ///
    /// # Panics
    /// If `capacity` is 0.
    #[must_use]
    pub fn new(capacity: usize, policy: OverrunPolicy) -> Self {
        assert!(capacity > 0, "ring buffer capacity must be non-zero");
        RingBuffer {
            buf: vec![0u8; capacity],
            read: 0,
            len: 0,
            policy,
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Number of unread bytes.
    #[must_use]
    pub fn available(&self) -> usize {
        self.len
    }

    /// Number of bytes that can be appended without overrunning unread data.
    #[must_use]
    pub fn free(&self) -> usize {
        self.capacity() - self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub fn policy(&self) -> OverrunPolicy {
        self.policy
    }

    fn write_pos(&self) -> usize {
        (self.read + self.len) % self.capacity()
    }

    /// Append `dat` at the write position and return the number of unread bytes that
    /// were overwritten to make room, which is always 0 for [OverrunPolicy::Reject].
    ///
    /// # Errors
    /// [Error::ChunkTooLarge] if `dat` is longer than the capacity, or [Error::Overrun]
    /// if it does not fit and the policy is [OverrunPolicy::Reject].
    pub fn append(&mut self, dat: &[u8]) -> Result<usize> {
        let capacity = self.capacity();
        if dat.len() > capacity {
            return Err(Error::ChunkTooLarge {
                len: dat.len(),
                capacity,
            });
        }
        if dat.is_empty() {
            return Ok(0);
        }

        let lost = dat.len().saturating_sub(self.free());
        if lost > 0 {
            if self.policy == OverrunPolicy::Reject {
                return Err(Error::Overrun {
                    len: dat.len(),
                    free: self.free(),
                });
            }
            warn!(lost, capacity, "ring buffer overrun; oldest unread bytes overwritten");
        }

        let start = self.write_pos();
        let first = cmp::min(dat.len(), capacity - start);
        self.buf[start..start + first].copy_from_slice(&dat[..first]);
        self.buf[..dat.len() - first].copy_from_slice(&dat[first..]);

        // The overwritten bytes were the oldest, i.e., at the front of the unread region
        self.read = (self.read + lost) % capacity;
        self.len = self.len - lost + dat.len();

        Ok(lost)
    }

    /// The unread region as two slices, in order. The second slice is empty unless the
    /// unread region wraps the end of the storage.
    #[must_use]
    pub fn as_slices(&self) -> (&[u8], &[u8]) {
        let first = cmp::min(self.len, self.capacity() - self.read);
        (
            &self.buf[self.read..self.read + first],
            &self.buf[..self.len - first],
        )
    }

    /// Get the unread byte at `offset` from the read position.
    #[must_use]
    pub fn byte_at(&self, offset: usize) -> Option<u8> {
        if offset >= self.len {
            return None;
        }
        Some(self.buf[(self.read + offset) % self.capacity()])
    }

    /// Copy unread bytes starting at `offset` from the read position into `dst`
    /// without consuming them. Returns `false`, leaving `dst` untouched, if there are
    /// not enough unread bytes to fill it.
    pub fn peek(&self, offset: usize, dst: &mut [u8]) -> bool {
        if offset + dst.len() > self.len {
            return false;
        }
        let capacity = self.capacity();
        let start = (self.read + offset) % capacity;
        let first = cmp::min(dst.len(), capacity - start);
        let n = dst.len();
        dst[..first].copy_from_slice(&self.buf[start..start + first]);
        dst[first..].copy_from_slice(&self.buf[..n - first]);
        true
    }

    /// Like [RingBuffer::peek], but returns a newly allocated vector of `len` bytes.
    #[must_use]
    pub fn to_vec(&self, offset: usize, len: usize) -> Option<Vec<u8>> {
        let mut out = vec![0u8; len];
        if self.peek(offset, &mut out) {
            Some(out)
        } else {
            None
        }
    }

    /// Offset, relative to the read position, of the first unread byte at or after
    /// `from` that equals `byte`.
    #[must_use]
    pub fn position(&self, from: usize, byte: u8) -> Option<usize> {
        let (a, b) = self.as_slices();
        a.iter()
            .chain(b.iter())
            .skip(from)
            .position(|x| *x == byte)
            .map(|idx| idx + from)
    }

    /// Advance the read position by `len` bytes.
    ///
    /// # Errors
    /// [Error::ConsumeOverflow] if fewer than `len` bytes are unread.
    pub fn consume(&mut self, len: usize) -> Result<()> {
        if len > self.len {
            return Err(Error::ConsumeOverflow {
                len,
                available: self.len,
            });
        }
        self.read = (self.read + len) % self.capacity();
        self.len -= len;
        Ok(())
    }

    /// Discard all unread bytes.
    pub fn clear(&mut self) {
        self.read = 0;
        self.len = 0;
    }
}
