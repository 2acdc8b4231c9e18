//! Fixed-capacity arena of voxel blocks addressed by 1-based index.

use cv_hal::AtomicBuffer;

use super::allocator::FreeList;
use super::voxel::{BlockCoord, Voxel, BLOCK_BYTES, VOXELS_PER_BLOCK, WORDS_PER_BLOCK, WORDS_PER_VOXEL};
use super::NIL;

pub struct BlockPool {
    allocator: FreeList,
    /// `WORDS_PER_BLOCK` words per block, slot `index - 1`.
    voxels: AtomicBuffer,
    /// `x, y, z` per block.
    coords: AtomicBuffer,
    /// Id of the last frame that queued the block.
    stamps: AtomicBuffer,
}

impl BlockPool {
    pub fn new(capacity: u32) -> Self {
        let n = capacity as usize;
        Self {
            allocator: FreeList::new(capacity, 0, 0),
            voxels: AtomicBuffer::zeroed(n * WORDS_PER_BLOCK),
            coords: AtomicBuffer::zeroed(n * 3),
            stamps: AtomicBuffer::zeroed(n),
        }
    }

    /// Take a block for `coord`, reset its voxels and stamp it with `frame`.
    ///
    /// Returns [`NIL`] when the pool is exhausted.
    pub fn allocate(&self, coord: BlockCoord, frame: u32) -> u32 {
        let index = self.allocator.allocate();
        if index == NIL {
            return NIL;
        }
        let slot = (index - 1) as usize;

        let [tsdf, packed] = Voxel::EMPTY.to_words();
        let base = slot * WORDS_PER_BLOCK;
        for v in 0..VOXELS_PER_BLOCK {
            self.voxels.store_relaxed(base + v * WORDS_PER_VOXEL, tsdf);
            self.voxels.store_relaxed(base + v * WORDS_PER_VOXEL + 1, packed);
        }
        self.coords.store_relaxed(slot * 3, coord.x as u32);
        self.coords.store_relaxed(slot * 3 + 1, coord.y as u32);
        self.coords.store_relaxed(slot * 3 + 2, coord.z as u32);
        self.stamps.store(slot, frame);
        index
    }

    /// `true` for exactly one caller per block and frame.
    #[inline]
    pub fn claim(&self, index: u32, frame: u32) -> bool {
        self.stamps.swap((index - 1) as usize, frame) != frame
    }

    #[inline]
    pub fn coord(&self, index: u32) -> BlockCoord {
        let slot = (index - 1) as usize * 3;
        BlockCoord::new(
            self.coords.load_relaxed(slot) as i32,
            self.coords.load_relaxed(slot + 1) as i32,
            self.coords.load_relaxed(slot + 2) as i32,
        )
    }

    #[inline]
    pub fn voxel(&self, index: u32, local: usize) -> Voxel {
        let w = (index - 1) as usize * WORDS_PER_BLOCK + local * WORDS_PER_VOXEL;
        Voxel::from_words(self.voxels.load_relaxed(w), self.voxels.load_relaxed(w + 1))
    }

    /// Overwrite one voxel. Callers guarantee a single writer per voxel per dispatch.
    #[inline]
    pub fn set_voxel(&self, index: u32, local: usize, voxel: Voxel) {
        let w = (index - 1) as usize * WORDS_PER_BLOCK + local * WORDS_PER_VOXEL;
        let [tsdf, packed] = voxel.to_words();
        self.voxels.store_relaxed(w, tsdf);
        self.voxels.store_relaxed(w + 1, packed);
    }

    /// Copy of a block's 512 voxels.
    pub fn read_block(&self, index: u32) -> Vec<Voxel> {
        let base = (index - 1) as usize * WORDS_PER_BLOCK;
        let words = self.voxels.read_range(base..base + WORDS_PER_BLOCK);
        bytemuck::cast_slice::<u32, Voxel>(&words).to_vec()
    }

    /// Release every block. Payloads are reset lazily on the next allocation.
    pub fn clear(&mut self) {
        self.allocator.fill_values();
        self.stamps.fill(0);
    }

    pub fn is_allocated(&self, index: u32) -> bool {
        index != NIL && (index as usize) <= self.used()
    }

    pub fn used(&self) -> usize {
        self.allocator.allocated()
    }

    pub fn capacity(&self) -> usize {
        self.allocator.capacity()
    }

    pub fn used_bytes(&self) -> usize {
        self.used() * BLOCK_BYTES
    }

    /// Allocated block indices in allocation order.
    pub fn allocated_indices(&self) -> Vec<u32> {
        self.allocator.allocated_indices()
    }

    /// Bytes reserved for payload, coordinates, stamps and the free list.
    pub fn size_in_bytes(&self) -> usize {
        self.voxels.size_in_bytes()
            + self.coords.size_in_bytes()
            + self.stamps.size_in_bytes()
            + self.allocator.size_in_bytes()
    }
}

impl std::fmt::Debug for BlockPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockPool")
            .field("capacity", &self.capacity())
            .field("used", &self.used())
            .finish()
    }
}
