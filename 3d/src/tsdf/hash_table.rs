//! Spatial hash from block coordinates to block indices.
//!
//! Buckets live in one word buffer, `WORDS_PER_BUCKET` words each: four inline
//! entries `[x, y, z, block]` followed by a chain word. Buckets
//! `0..primary` are addressed by hash; the rest form the overflow region and
//! are linked into chains on demand. The chain word of a primary bucket also
//! carries the bucket lock that serialises inserts into its chain.

use cv_hal::AtomicBuffer;

use super::allocator::FreeList;
use super::block_pool::BlockPool;
use super::voxel::BlockCoord;
use super::NIL;

pub const ENTRIES_PER_BUCKET: usize = 4;
const WORDS_PER_ENTRY: usize = 4;
pub const WORDS_PER_BUCKET: usize = ENTRIES_PER_BUCKET * WORDS_PER_ENTRY + 1;
const CHAIN: usize = ENTRIES_PER_BUCKET * WORDS_PER_ENTRY;
const PTR: usize = 3;

/// Chain word: top bit is the bucket lock, the rest is the next bucket (0 = end).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChainWord(pub u32);

impl ChainWord {
    pub const LOCK: u32 = 1 << 31;
    pub const INDEX_MASK: u32 = !Self::LOCK;

    #[inline]
    pub fn is_locked(self) -> bool {
        self.0 & Self::LOCK != 0
    }

    #[inline]
    pub fn chain_index(self) -> u32 {
        self.0 & Self::INDEX_MASK
    }

    #[inline]
    pub fn with_lock(self) -> Self {
        Self(self.0 | Self::LOCK)
    }

    #[inline]
    pub fn without_lock(self) -> Self {
        Self(self.0 & Self::INDEX_MASK)
    }

    #[inline]
    pub fn with_chain_index(self, index: u32) -> Self {
        Self((self.0 & Self::LOCK) | (index & Self::INDEX_MASK))
    }
}

/// Why an insert could not complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exhausted {
    Blocks,
    Buckets,
}

/// Outcome of [`SpatialHash::find_or_insert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    /// Block was already resident.
    Found(u32),
    /// This call allocated and inserted the block.
    Inserted(u32),
    Exhausted(Exhausted),
}

impl Lookup {
    pub fn index(self) -> Option<u32> {
        match self {
            Lookup::Found(i) | Lookup::Inserted(i) => Some(i),
            Lookup::Exhausted(_) => None,
        }
    }
}

/// Deterministic bucket of `coord` among `n` primary buckets.
#[inline]
pub fn hash(coord: BlockCoord, n: u32) -> u32 {
    let h = (coord.x as u32).wrapping_mul(73_856_093)
        ^ (coord.y as u32).wrapping_mul(19_349_669)
        ^ (coord.z as u32).wrapping_mul(83_492_791);
    h % n
}

pub struct SpatialHash {
    words: AtomicBuffer,
    primary: u32,
    overflow: FreeList,
}

struct BucketGuard<'a> {
    words: &'a AtomicBuffer,
    word: usize,
}

impl Drop for BucketGuard<'_> {
    fn drop(&mut self) {
        self.words.fetch_and(self.word, ChainWord::INDEX_MASK);
    }
}

#[inline]
fn chain_word(bucket: u32) -> usize {
    bucket as usize * WORDS_PER_BUCKET + CHAIN
}

#[inline]
fn entry_word(bucket: u32, entry: usize) -> usize {
    bucket as usize * WORDS_PER_BUCKET + entry * WORDS_PER_ENTRY
}

impl SpatialHash {
    pub fn new(primary: u32, overflow: u32) -> Self {
        let total = primary + overflow;
        Self {
            words: AtomicBuffer::zeroed(total as usize * WORDS_PER_BUCKET),
            primary,
            // bucket indices 1..total, 1..primary are the primaries themselves
            overflow: FreeList::new(total.saturating_sub(1), 0, primary.saturating_sub(1)),
        }
    }

    #[inline]
    pub fn bucket_of(&self, coord: BlockCoord) -> u32 {
        hash(coord, self.primary)
    }

    #[inline]
    fn entry_matches(&self, base: usize, coord: BlockCoord) -> bool {
        self.words.load_relaxed(base) == coord.x as u32
            && self.words.load_relaxed(base + 1) == coord.y as u32
            && self.words.load_relaxed(base + 2) == coord.z as u32
    }

    #[inline]
    fn next_bucket(&self, bucket: u32) -> u32 {
        ChainWord(self.words.load(chain_word(bucket))).chain_index()
    }

    /// Lock-free lookup.
    pub fn find(&self, coord: BlockCoord) -> Option<u32> {
        let mut bucket = self.bucket_of(coord);
        loop {
            for e in 0..ENTRIES_PER_BUCKET {
                let base = entry_word(bucket, e);
                let ptr = self.words.load(base + PTR);
                if ptr != NIL && self.entry_matches(base, coord) {
                    return Some(ptr);
                }
            }
            bucket = self.next_bucket(bucket);
            if bucket == 0 {
                return None;
            }
        }
    }

    fn lock(&self, bucket: u32) -> BucketGuard<'_> {
        let word = chain_word(bucket);
        loop {
            let current = ChainWord(self.words.load_relaxed(word));
            if !current.is_locked()
                && self
                    .words
                    .compare_exchange(word, current.0, current.with_lock().0)
                    .is_ok()
            {
                return BucketGuard {
                    words: &self.words,
                    word,
                };
            }
            std::hint::spin_loop();
        }
    }

    /// Find `coord`, or allocate a block from `blocks` and insert it.
    ///
    /// Concurrent calls for the same coordinate agree on one index and exactly
    /// one of them reports [`Lookup::Inserted`]. On exhaustion nothing is
    /// inserted and the chain stays consistent.
    pub fn find_or_insert(&self, coord: BlockCoord, blocks: &BlockPool, frame: u32) -> Lookup {
        if let Some(index) = self.find(coord) {
            return Lookup::Found(index);
        }

        let head = self.bucket_of(coord);
        let _guard = self.lock(head);

        // Re-scan under the lock: another thread may have inserted meanwhile.
        let mut free_entry = None;
        let mut bucket = head;
        let tail = loop {
            for e in 0..ENTRIES_PER_BUCKET {
                let base = entry_word(bucket, e);
                let ptr = self.words.load(base + PTR);
                if ptr == NIL {
                    free_entry.get_or_insert(base);
                } else if self.entry_matches(base, coord) {
                    return Lookup::Found(ptr);
                }
            }
            match self.next_bucket(bucket) {
                0 => break bucket,
                next => bucket = next,
            }
        };

        let base = match free_entry {
            Some(base) => base,
            None => {
                let fresh = self.overflow.allocate();
                if fresh == NIL {
                    return Lookup::Exhausted(Exhausted::Buckets);
                }
                let word = chain_word(tail);
                let linked = ChainWord(self.words.load(word)).with_chain_index(fresh);
                self.words.store(word, linked.0);
                entry_word(fresh, 0)
            }
        };

        let index = blocks.allocate(coord, frame);
        if index == NIL {
            return Lookup::Exhausted(Exhausted::Blocks);
        }
        self.words.store_relaxed(base, coord.x as u32);
        self.words.store_relaxed(base + 1, coord.y as u32);
        self.words.store_relaxed(base + 2, coord.z as u32);
        // publishes the coordinates to lock-free readers
        self.words.store(base + PTR, index);
        Lookup::Inserted(index)
    }

    /// Indices of the 2x2x2 blocks at `coord + (dx, dy, dz)`, `d* in {0, 1}`,
    /// at position `dx + 2 dy + 4 dz`; [`NIL`] where absent.
    pub fn neighbours(&self, coord: BlockCoord) -> [u32; 8] {
        let mut out = [NIL; 8];
        for (i, slot) in out.iter_mut().enumerate() {
            let n = coord.neighbour((i & 1) as i32, ((i >> 1) & 1) as i32, (i >> 2) as i32);
            *slot = self.find(n).unwrap_or(NIL);
        }
        out
    }

    /// Reset every bucket and the overflow free list.
    pub fn clear(&mut self) {
        self.words.fill(0);
        self.overflow.fill_values();
    }

    pub fn primary_buckets(&self) -> u32 {
        self.primary
    }

    /// Overflow buckets currently linked into chains.
    pub fn buckets_used(&self) -> usize {
        self.overflow.allocated()
    }

    /// Longest chain, in buckets, over all primaries.
    pub fn max_chain_len(&self) -> usize {
        (0..self.primary)
            .map(|b| {
                let mut len = 1;
                let mut bucket = self.next_bucket(b);
                while bucket != 0 {
                    len += 1;
                    bucket = self.next_bucket(bucket);
                }
                len
            })
            .max()
            .unwrap_or(0)
    }

    /// Live entries in the table.
    pub fn entry_count(&self) -> usize {
        let buckets = self.words.len() / WORDS_PER_BUCKET;
        (0..buckets as u32)
            .flat_map(|b| (0..ENTRIES_PER_BUCKET).map(move |e| entry_word(b, e) + PTR))
            .filter(|&w| self.words.load_relaxed(w) != NIL)
            .count()
    }

    pub fn size_in_bytes(&self) -> usize {
        self.words.size_in_bytes() + self.overflow.size_in_bytes()
    }
}

impl std::fmt::Debug for SpatialHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpatialHash")
            .field("primary", &self.primary)
            .field("overflow_used", &self.buckets_used())
            .finish()
    }
}
