//! Voxel and block-coordinate types.

use bytemuck::{Pod, Zeroable};
use nalgebra::Point3;

/// Voxels per block edge.
pub const BLOCK_SIZE: usize = 8;
pub const VOXELS_PER_BLOCK: usize = BLOCK_SIZE * BLOCK_SIZE * BLOCK_SIZE;
/// 32-bit words per voxel in the block pool.
pub const WORDS_PER_VOXEL: usize = 2;
pub const WORDS_PER_BLOCK: usize = VOXELS_PER_BLOCK * WORDS_PER_VOXEL;
/// Voxel payload of one block in bytes.
pub const BLOCK_BYTES: usize = WORDS_PER_BLOCK * std::mem::size_of::<u32>();

const WEIGHT_MASK: u32 = 0xff;

/// One fused sample of the distance field.
///
/// `tsdf` is the truncated signed distance normalised to `[-1, 1]`, positive in
/// front of the observed surface. `packed` holds the saturating weight in its low
/// 8 bits and RGB in the upper 24 (red highest).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Voxel {
    pub tsdf: f32,
    pub packed: u32,
}

impl Voxel {
    /// Never observed: far outside the surface, zero weight, black.
    pub const EMPTY: Voxel = Voxel {
        tsdf: 1.0,
        packed: 0,
    };

    pub fn new(tsdf: f32, weight: u8, color: [u8; 3]) -> Self {
        Self {
            tsdf,
            packed: pack(weight, color),
        }
    }

    #[inline]
    pub fn weight(&self) -> u8 {
        (self.packed & WEIGHT_MASK) as u8
    }

    #[inline]
    pub fn color(&self) -> [u8; 3] {
        [
            (self.packed >> 24) as u8,
            (self.packed >> 16) as u8,
            (self.packed >> 8) as u8,
        ]
    }

    #[inline]
    pub fn is_observed(&self) -> bool {
        self.weight() > 0
    }

    #[inline]
    pub(crate) fn from_words(tsdf_bits: u32, packed: u32) -> Self {
        Self {
            tsdf: f32::from_bits(tsdf_bits),
            packed,
        }
    }

    #[inline]
    pub(crate) fn to_words(self) -> [u32; 2] {
        [self.tsdf.to_bits(), self.packed]
    }
}

impl Default for Voxel {
    fn default() -> Self {
        Self::EMPTY
    }
}

#[inline]
fn pack(weight: u8, [r, g, b]: [u8; 3]) -> u32 {
    (r as u32) << 24 | (g as u32) << 16 | (b as u32) << 8 | weight as u32
}

/// Linear index of local voxel `(x, y, z)` inside a block, x fastest.
#[inline]
pub fn voxel_index(x: usize, y: usize, z: usize) -> usize {
    x + y * BLOCK_SIZE + z * BLOCK_SIZE * BLOCK_SIZE
}

/// Inverse of [`voxel_index`].
#[inline]
pub fn voxel_local(index: usize) -> (usize, usize, usize) {
    (
        index % BLOCK_SIZE,
        (index / BLOCK_SIZE) % BLOCK_SIZE,
        index / (BLOCK_SIZE * BLOCK_SIZE),
    )
}

/// Integer coordinate of an 8x8x8 block in the world grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct BlockCoord {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl BlockCoord {
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// Block containing integer voxel `(vx, vy, vz)`.
    pub fn from_voxel(vx: i32, vy: i32, vz: i32) -> Self {
        let s = BLOCK_SIZE as i32;
        Self::new(vx.div_euclid(s), vy.div_euclid(s), vz.div_euclid(s))
    }

    /// Block containing world point `p`.
    pub fn from_world(p: &Point3<f32>, voxel_size: f32) -> Self {
        Self::from_voxel(
            (p.x / voxel_size).floor() as i32,
            (p.y / voxel_size).floor() as i32,
            (p.z / voxel_size).floor() as i32,
        )
    }

    pub fn neighbour(self, dx: i32, dy: i32, dz: i32) -> Self {
        Self::new(self.x + dx, self.y + dy, self.z + dz)
    }

    /// Integer coordinate of the block's first voxel.
    pub fn origin_voxel(self) -> (i32, i32, i32) {
        let s = BLOCK_SIZE as i32;
        (self.x * s, self.y * s, self.z * s)
    }

    /// World position of the block's first voxel.
    pub fn origin_world(self, voxel_size: f32) -> Point3<f32> {
        let (x, y, z) = self.origin_voxel();
        Point3::new(x as f32, y as f32, z as f32) * voxel_size
    }
}
