//! Lock-free free-list allocator over a fixed index range.
//!
//! Layout of the backing buffer: word 0 is the stack pointer, words
//! `1..=capacity` form the index stack. Indices at `stack[sp..=capacity]` are
//! free; allocation pops `stack[sp]` and advances `sp`. Index 0 is never handed
//! out and doubles as the exhaustion signal.

use cv_hal::AtomicBuffer;

use super::NIL;

const SP: usize = 0;

pub struct FreeList {
    words: AtomicBuffer,
    capacity: u32,
    offset: u32,
    reserved: u32,
}

impl FreeList {
    /// Free list over `offset + 1 ..= offset + capacity`, with the first `reserved`
    /// of those permanently taken.
    pub fn new(capacity: u32, offset: u32, reserved: u32) -> Self {
        let mut list = Self {
            words: AtomicBuffer::zeroed(capacity as usize + 1),
            capacity,
            offset,
            reserved: reserved.min(capacity),
        };
        list.fill_values();
        list
    }

    /// Reset to the initial state: `stack[i] = offset + i`, nothing allocated.
    pub fn fill_values(&mut self) {
        for i in 1..=self.capacity {
            self.words.store_relaxed(i as usize, self.offset + i);
        }
        self.words.store(SP, self.reserved + 1);
    }

    /// Pop a free index, or [`NIL`] when exhausted.
    #[inline]
    pub fn allocate(&self) -> u32 {
        let capacity = self.capacity;
        match self
            .words
            .fetch_update(SP, |sp| (sp <= capacity).then_some(sp + 1))
        {
            Ok(slot) => self.words.load(slot as usize),
            Err(_) => NIL,
        }
    }

    /// Push `index` back. Returns `false` if nothing is allocated.
    ///
    /// Takes `&mut self`: frees never overlap a dispatch that allocates.
    pub fn free(&mut self, index: u32) -> bool {
        debug_assert!(
            index > self.offset + self.reserved && index <= self.offset + self.capacity,
            "index {index} outside the free list range"
        );
        let floor = self.reserved + 1;
        match self
            .words
            .fetch_update(SP, |sp| (sp > floor).then_some(sp - 1))
        {
            Ok(sp) => {
                self.words.store((sp - 1) as usize, index);
                true
            }
            Err(_) => false,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity as usize
    }

    pub fn allocated(&self) -> usize {
        (self.words.load(SP) - 1 - self.reserved) as usize
    }

    pub fn available(&self) -> usize {
        (self.capacity + 1 - self.words.load(SP)) as usize
    }

    /// Indices handed out so far, in allocation order.
    ///
    /// Exact while frees have been in reverse allocation order.
    pub fn allocated_indices(&self) -> Vec<u32> {
        let sp = self.words.load(SP) as usize;
        self.words.read_range(self.reserved as usize + 1..sp)
    }

    /// Copy of the whole index stack `stack[1..=capacity]`.
    pub fn snapshot(&self) -> Vec<u32> {
        self.words.read_range(1..self.capacity as usize + 1)
    }

    pub fn size_in_bytes(&self) -> usize {
        self.words.size_in_bytes()
    }
}

impl std::fmt::Debug for FreeList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FreeList")
            .field("capacity", &self.capacity)
            .field("allocated", &self.allocated())
            .finish()
    }
}
