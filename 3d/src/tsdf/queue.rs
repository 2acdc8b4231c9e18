//! Per-frame list of blocks to fuse.
//!
//! Word 0 holds the size counter, which starts at 1 so that the live entries
//! are `words[1..size]`. Words past the size are left over from earlier frames.

use cv_hal::AtomicBuffer;

const SIZE: usize = 0;

pub struct IntegrationQueue {
    words: AtomicBuffer,
    capacity: u32,
}

impl IntegrationQueue {
    pub fn new(capacity: u32) -> Self {
        let words = AtomicBuffer::zeroed(capacity as usize + 1);
        words.store(SIZE, 1);
        Self { words, capacity }
    }

    /// Reserve a slot and write `index`. Returns `false` when the queue is full.
    #[inline]
    pub fn push(&self, index: u32) -> bool {
        let capacity = self.capacity;
        match self
            .words
            .fetch_update(SIZE, |size| (size <= capacity).then_some(size + 1))
        {
            Ok(slot) => {
                self.words.store(slot as usize, index);
                true
            }
            Err(_) => false,
        }
    }

    pub fn len(&self) -> usize {
        (self.words.load(SIZE) - 1) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity as usize
    }

    /// Entry `i` of the live range.
    #[inline]
    pub fn get(&self, i: usize) -> u32 {
        self.words.load_relaxed(i + 1)
    }

    pub fn entries(&self) -> Vec<u32> {
        self.words.read_range(1..self.len() + 1)
    }

    /// Drop all entries. Stale words are not cleared.
    pub fn reset(&mut self) {
        self.words.store(SIZE, 1);
    }

    pub fn size_in_bytes(&self) -> usize {
        self.words.size_in_bytes()
    }
}

impl std::fmt::Debug for IntegrationQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntegrationQueue")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}
