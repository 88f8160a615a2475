// src/buffer.rs
use crate::error::MixerError;

/// Fixed-capacity byte ring fed by a producer and drained once per mix tick.
///
/// The backing allocation is `capacity + guard` bytes. Whenever a read has to
/// cross the physical end, the head of the ring is first copied into the
/// guard so the consumer always gets one contiguous slice.
pub struct StreamBuffer {
    data: Box<[u8]>,
    capacity: usize,
    guard: usize,
    read: usize,
    write: usize,
    unread: usize,
}

impl StreamBuffer {
    /// Create an empty ring. Nothing here allocates after construction.
    pub fn new(capacity: usize, guard: usize) -> Self {
        Self {
            data: vec![0; capacity + guard].into_boxed_slice(),
            capacity,
            guard,
            read: 0,
            write: 0,
            unread: 0,
        }
    }

    pub fn unread(&self) -> usize {
        self.unread
    }

    pub fn free(&self) -> usize {
        self.capacity - self.unread
    }

    pub fn is_empty(&self) -> bool {
        self.unread == 0
    }

    /// Append producer data behind the unread region.
    ///
    /// Rejects the whole chunk if any byte of it would land on unread data;
    /// a chunk that exactly fills the ring is accepted.
    pub fn append(&mut self, bytes: &[u8]) -> Result<(), MixerError> {
        if bytes.len() > self.free() {
            return Err(MixerError::BufferOverflowRejected {
                requested: bytes.len(),
                free: self.free(),
            });
        }

        let to_end = self.capacity - self.write;
        if bytes.len() <= to_end {
            self.data[self.write..self.write + bytes.len()].copy_from_slice(bytes);
        } else {
            let (head, tail) = bytes.split_at(to_end);
            self.data[self.write..self.capacity].copy_from_slice(head);
            self.data[..tail.len()].copy_from_slice(tail);
        }

        self.write = (self.write + bytes.len()) % self.capacity;
        self.unread += bytes.len();
        Ok(())
    }

    /// Up to `max` unread bytes as one contiguous slice starting at the read
    /// cursor. At most `guard` bytes may come from past the physical end.
    pub fn readable(&mut self, max: usize) -> &[u8] {
        let len = self
            .unread
            .min(max)
            .min(self.capacity - self.read + self.guard);
        let end = self.read + len;
        if end > self.capacity {
            let wrapped = end - self.capacity;
            tracing::trace!("Copying {} wrapped bytes into guard", wrapped);
            self.data.copy_within(..wrapped, self.capacity);
        }
        &self.data[self.read..end]
    }

    /// Mark `count` bytes returned by [`readable`](Self::readable) as played.
    pub fn consume(&mut self, count: usize) {
        let count = count.min(self.unread);
        self.read += count;
        if self.read >= self.capacity {
            self.read -= self.capacity;
        }
        self.unread -= count;
    }

    /// Drop everything and move both cursors back to the start.
    pub fn reset(&mut self) {
        self.read = 0;
        self.write = 0;
        self.unread = 0;
    }
}
