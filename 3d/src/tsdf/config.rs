use cv_hal::budget::{parse_bytes_with_suffix, read_budget_from_env, slots_in_budget};

use super::hash_table::{ChainWord, WORDS_PER_BUCKET};
use super::voxel::BLOCK_BYTES;
use crate::{Error, Result};

/// Environment variable holding the voxel-block memory budget (`512MB`, `1GB`, ...).
pub const MAX_BYTES_ENV: &str = "RUSTCV_TSDF_MAX_BYTES";

/// Default voxel-block budget: 1 GiB.
pub const DEFAULT_MAX_BYTES: usize = 1024 * 1024 * 1024;

/// Capacities and fusion parameters of a [`TsdfVolume`](super::TsdfVolume).
#[derive(Debug, Clone, PartialEq)]
pub struct TsdfConfig {
    /// Edge length of one voxel in world units.
    pub voxel_size: f32,
    /// Truncation distance of the signed distance field.
    pub truncation: f32,
    /// Samples and voxels deeper than this are ignored.
    pub max_distance: f32,
    /// Primary bucket count. Should be prime.
    pub primary_buckets: u32,
    /// Overflow buckets shared by all chains.
    pub overflow_buckets: u32,
    /// Block pool capacity.
    pub max_blocks: u32,
    /// Blocks that can be queued for fusion in one frame.
    pub queue_capacity: u32,
    /// Saturation cap of the per-voxel weight.
    pub max_weight: u8,
    /// Cells with a corner at or below this weight produce no geometry.
    pub min_weight: u8,
}

impl Default for TsdfConfig {
    fn default() -> Self {
        Self {
            voxel_size: 0.01,
            truncation: 0.04,
            max_distance: 4.0,
            primary_buckets: 500_009,
            overflow_buckets: 65_536,
            max_blocks: slots_in_budget(DEFAULT_MAX_BYTES, BLOCK_BYTES) as u32,
            queue_capacity: 131_072,
            max_weight: 128,
            min_weight: 0,
        }
    }
}

impl TsdfConfig {
    /// Defaults with the block budget taken from `RUSTCV_TSDF_MAX_BYTES` if set.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Some(bytes) = read_budget_from_env(MAX_BYTES_ENV)? {
            config = config.with_memory_budget(bytes)?;
        }
        Ok(config)
    }

    pub fn with_voxel_size(mut self, voxel_size: f32) -> Self {
        self.voxel_size = voxel_size;
        self
    }

    pub fn with_truncation(mut self, truncation: f32) -> Self {
        self.truncation = truncation;
        self
    }

    pub fn with_max_distance(mut self, max_distance: f32) -> Self {
        self.max_distance = max_distance;
        self
    }

    pub fn with_primary_buckets(mut self, primary_buckets: u32) -> Self {
        self.primary_buckets = primary_buckets;
        self
    }

    pub fn with_overflow_buckets(mut self, overflow_buckets: u32) -> Self {
        self.overflow_buckets = overflow_buckets;
        self
    }

    pub fn with_max_blocks(mut self, max_blocks: u32) -> Self {
        self.max_blocks = max_blocks;
        self
    }

    pub fn with_queue_capacity(mut self, queue_capacity: u32) -> Self {
        self.queue_capacity = queue_capacity;
        self
    }

    pub fn with_max_weight(mut self, max_weight: u8) -> Self {
        self.max_weight = max_weight;
        self
    }

    pub fn with_min_weight(mut self, min_weight: u8) -> Self {
        self.min_weight = min_weight;
        self
    }

    /// Size the block pool to fit `bytes` of voxel payload.
    pub fn with_memory_budget(mut self, bytes: usize) -> Result<Self> {
        let blocks = slots_in_budget(bytes, BLOCK_BYTES);
        if blocks == 0 {
            return Err(Error::InvalidConfig(format!(
                "memory budget of {bytes} bytes holds no {BLOCK_BYTES}-byte block"
            )));
        }
        self.max_blocks = u32::try_from(blocks).unwrap_or(u32::MAX).min(MAX_INDEX);
        Ok(self)
    }

    /// Same as [`TsdfConfig::with_memory_budget`] for a human-readable size.
    pub fn with_memory_budget_str(self, size: &str) -> Result<Self> {
        let bytes = parse_bytes_with_suffix(size)?;
        self.with_memory_budget(bytes)
    }

    pub fn total_buckets(&self) -> usize {
        self.primary_buckets as usize + self.overflow_buckets as usize
    }

    /// Bytes of voxel payload the block pool can hold.
    pub fn block_pool_bytes(&self) -> usize {
        self.max_blocks as usize * BLOCK_BYTES
    }

    /// Bytes of the bucket table.
    pub fn hash_table_bytes(&self) -> usize {
        self.total_buckets() * WORDS_PER_BUCKET * std::mem::size_of::<u32>()
    }

    pub fn validate(&self) -> Result<()> {
        let positive = |name: &str, v: f32| {
            if v.is_finite() && v > 0.0 {
                Ok(())
            } else {
                Err(Error::InvalidConfig(format!("{name} must be positive, got {v}")))
            }
        };
        positive("voxel_size", self.voxel_size)?;
        positive("truncation", self.truncation)?;
        positive("max_distance", self.max_distance)?;

        if self.primary_buckets == 0 {
            return Err(Error::InvalidConfig("primary_buckets must be >= 1".to_string()));
        }
        if self.total_buckets() > MAX_INDEX as usize {
            return Err(Error::InvalidConfig(format!(
                "{} buckets exceed the chain index range",
                self.total_buckets()
            )));
        }
        if self.max_blocks == 0 || self.max_blocks > MAX_INDEX {
            return Err(Error::InvalidConfig(format!(
                "max_blocks must be in 1..={MAX_INDEX}, got {}",
                self.max_blocks
            )));
        }
        if self.queue_capacity == 0 || self.queue_capacity == u32::MAX {
            return Err(Error::InvalidConfig(format!(
                "queue_capacity must be in 1..{}, got {}",
                u32::MAX,
                self.queue_capacity
            )));
        }
        if self.max_weight == 0 {
            return Err(Error::InvalidConfig("max_weight must be >= 1".to_string()));
        }
        if self.min_weight >= self.max_weight {
            return Err(Error::InvalidConfig(format!(
                "min_weight {} must be below max_weight {}",
                self.min_weight, self.max_weight
            )));
        }
        Ok(())
    }
}

/// Largest index a chain word or block pointer can carry.
const MAX_INDEX: u32 = ChainWord::INDEX_MASK;
