//! Reusable byte buffers for the stream layer.
//!
//! Tape streams work with buffers of one to four blocks (up to a
//! megabyte with large block sizes), allocated and dropped once per
//! file. Returned buffers park in a small thread-local cache keyed by
//! capacity so a batch over many files reuses the same allocations.

use std::cell::RefCell;

/// Distinct capacities the pool keeps.
const POOL_CAPACITIES: usize = 4;
/// Parked buffers per capacity.
const POOL_DEPTH: usize = 2;

/// FIFO byte buffer with a read and a write cursor.
///
/// Data is appended at the write cursor and drained from the read
/// cursor. Compaction is lazy: content moves to the front only when
/// the tail is too small for the next append.
pub struct StreamBuffer {
    data: Vec<u8>,
    read_pos: usize,
    write_pos: usize,
}

impl StreamBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        let data = POOL.with(|pool| pool.borrow_mut().take(capacity));
        Self {
            data,
            read_pos: 0,
            write_pos: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Buffered bytes not yet drained.
    pub fn len(&self) -> usize {
        self.write_pos - self.read_pos
    }

    pub fn is_empty(&self) -> bool {
        self.read_pos == self.write_pos
    }

    pub fn reset(&mut self) {
        self.read_pos = 0;
        self.write_pos = 0;
    }

    /// Free space left for appending (after compaction).
    pub fn free(&self) -> usize {
        self.capacity() - self.len()
    }

    fn make_room(&mut self, need: usize) {
        if self.capacity() - self.write_pos >= need {
            return;
        }
        self.data.copy_within(self.read_pos..self.write_pos, 0);
        self.write_pos -= self.read_pos;
        self.read_pos = 0;
    }

    /// Append by letting `source` fill the free tail; at most `max`
    /// bytes are offered. Returns what the source produced.
    pub fn fill_from<E>(
        &mut self,
        max: usize,
        source: impl FnOnce(&mut [u8]) -> Result<usize, E>,
    ) -> Result<usize, E> {
        let want = max.min(self.free());
        self.make_room(want);
        let count = source(&mut self.data[self.write_pos..self.write_pos + want])?;
        debug_assert!(count <= want);
        self.write_pos += count;
        Ok(count)
    }

    /// Drain by offering the sink up to `max` buffered bytes; the
    /// sink's return value says how many it consumed.
    pub fn spill_to<E>(
        &mut self,
        max: usize,
        sink: impl FnOnce(&[u8]) -> Result<usize, E>,
    ) -> Result<usize, E> {
        let avail = max.min(self.len());
        let count = sink(&self.data[self.read_pos..self.read_pos + avail])?;
        debug_assert!(count <= avail);
        self.read_pos += count;
        if self.is_empty() {
            self.reset();
        }
        Ok(count)
    }

    /// Copy bytes in, as many as fit.
    pub fn push(&mut self, bytes: &[u8]) -> usize {
        self.fill_from(bytes.len(), |dst| {
            let count = dst.len();
            dst.copy_from_slice(&bytes[..count]);
            Ok::<_, std::convert::Infallible>(count)
        })
        .unwrap()
    }

    /// Copy bytes out, as many as are buffered.
    pub fn pop(&mut self, out: &mut [u8]) -> usize {
        self.spill_to(out.len(), |src| {
            out[..src.len()].copy_from_slice(src);
            Ok::<_, std::convert::Infallible>(src.len())
        })
        .unwrap()
    }

    /// Append zeroes until `len()` reaches `target`.
    pub fn zero_pad_to(&mut self, target: usize) {
        while self.len() < target {
            let need = target - self.len();
            self.make_room(need);
            let end = (self.write_pos + need).min(self.capacity());
            self.data[self.write_pos..end].fill(0);
            self.write_pos = end;
            if self.write_pos == self.capacity() && self.len() < target {
                // target larger than capacity, stop at full
                break;
            }
        }
    }

    /// Peek at the buffered bytes without consuming them.
    pub fn buffered(&self) -> &[u8] {
        &self.data[self.read_pos..self.write_pos]
    }

    /// Drop `count` buffered bytes without delivering them.
    pub fn consume(&mut self, count: usize) {
        self.read_pos += count.min(self.len());
        if self.is_empty() {
            self.reset();
        }
    }
}

impl Drop for StreamBuffer {
    fn drop(&mut self) {
        let data = std::mem::take(&mut self.data);
        if !data.is_empty() {
            POOL.with(|pool| pool.borrow_mut().put(data));
        }
    }
}

/// Size-keyed buffer cache, least recently used capacity evicted.
#[derive(Default)]
struct BufferPool {
    // most recently used capacity last
    slots: Vec<(usize, Vec<Vec<u8>>)>,
}

impl BufferPool {
    fn take(&mut self, capacity: usize) -> Vec<u8> {
        if let Some(index) = self.slots.iter().position(|(cap, _)| *cap == capacity) {
            let mut slot = self.slots.remove(index);
            let buffer = slot.1.pop();
            self.slots.push(slot);
            if let Some(buffer) = buffer {
                return buffer;
            }
        }
        vec![0u8; capacity]
    }

    fn put(&mut self, buffer: Vec<u8>) {
        let capacity = buffer.len();
        match self.slots.iter().position(|(cap, _)| *cap == capacity) {
            Some(index) => {
                let mut slot = self.slots.remove(index);
                if slot.1.len() < POOL_DEPTH {
                    slot.1.push(buffer);
                }
                self.slots.push(slot);
            }
            None => {
                if self.slots.len() == POOL_CAPACITIES {
                    self.slots.remove(0);
                }
                self.slots.push((capacity, vec![buffer]));
            }
        }
    }
}

thread_local! {
    static POOL: RefCell<BufferPool> = RefCell::new(BufferPool::default());
}
