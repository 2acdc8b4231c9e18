//! Sparse voxel-hashing TSDF volume.
//!
//! Space is split into 8x8x8-voxel blocks that are allocated on first
//! observation and located through a spatial hash. Integrating a frame runs two
//! dispatches on a compute backend:
//!
//! 1. every depth pixel walks its truncation band and queues the blocks it
//!    crosses, inserting missing ones into the hash table;
//! 2. every voxel of every queued block is projected into the frame and folded
//!    into a running weighted average of distance and color.
//!
//! [`TsdfVolume::to_scene_mesh`] runs Marching Cubes over all allocated blocks.
//!
//! Capacity exhaustion (blocks, overflow buckets, queue slots) never fails a
//! frame: the affected blocks are skipped and counted in [`FrameStats`].

pub mod allocator;
pub mod block_pool;
pub mod config;
pub mod extract;
pub mod hash_table;
pub mod integrate;
pub mod queue;
pub mod tables;
pub mod voxel;

use std::io::Write;
use std::path::Path;

use cv_core::RgbdFrame;
use cv_hal::ComputeBackend;
use cv_runtime::ResourceGroup;
use nalgebra::Point3;

use crate::mesh::TriangleMesh;
use crate::Result;

pub use block_pool::BlockPool;
pub use config::TsdfConfig;
pub use extract::BlockNeighbours;
pub use hash_table::{ChainWord, Lookup, SpatialHash};
pub use integrate::FrameStats;
pub use queue::IntegrationQueue;
pub use voxel::{BlockCoord, Voxel, BLOCK_SIZE, VOXELS_PER_BLOCK};

/// Reserved index: no block, no bucket, end of chain.
pub const NIL: u32 = 0;

pub struct TsdfVolume {
    config: TsdfConfig,
    table: SpatialHash,
    blocks: BlockPool,
    queue: IntegrationQueue,
    frame_id: u32,
    frames: u64,
    last_stats: FrameStats,
}

impl TsdfVolume {
    /// Volume with default capacities for truncation distance `trunc` and
    /// maximum integration depth `dmax`.
    pub fn new(trunc: f32, dmax: f32) -> Result<Self> {
        Self::with_config(
            TsdfConfig::default()
                .with_truncation(trunc)
                .with_max_distance(dmax),
        )
    }

    pub fn with_config(config: TsdfConfig) -> Result<Self> {
        config.validate()?;

        let volume = Self {
            table: SpatialHash::new(config.primary_buckets, config.overflow_buckets),
            blocks: BlockPool::new(config.max_blocks),
            queue: IntegrationQueue::new(config.queue_capacity),
            config,
            frame_id: 0,
            frames: 0,
            last_stats: FrameStats::default(),
        };

        #[cfg(feature = "tracing")]
        tracing::info!(
            primary_buckets = volume.config.primary_buckets,
            overflow_buckets = volume.config.overflow_buckets,
            max_blocks = volume.config.max_blocks,
            queue_capacity = volume.config.queue_capacity,
            reserved_bytes = volume.reserved_bytes(),
            "TSDF volume created"
        );

        Ok(volume)
    }

    pub fn config(&self) -> &TsdfConfig {
        &self.config
    }

    /// Integrate one frame on the process-wide CPU backend.
    pub fn add(&mut self, frame: &RgbdFrame) {
        self.add_ctx(frame, cv_hal::get_device());
    }

    /// Integrate one frame with an explicit compute backend.
    pub fn add_ctx<B: ComputeBackend>(&mut self, frame: &RgbdFrame, backend: &B) {
        self.frame_id = self.frame_id.wrapping_add(1).max(1);
        self.frames += 1;
        self.queue.reset();

        let sparse = integrate::Sparse {
            table: &self.table,
            pool: &self.blocks,
            queue: &self.queue,
        };
        let stats = integrate::build_queue(backend, frame, &self.config, &sparse, self.frame_id);
        integrate::fuse(backend, frame, &self.config, &self.blocks, &self.queue);
        self.last_stats = stats;

        #[cfg(feature = "tracing")]
        {
            tracing::debug!(
                frame = self.frame_id,
                valid_pixels = stats.valid_pixels,
                queued = stats.queued,
                inserted = stats.inserted,
                blocks_used = self.blocks_used(),
                "integrated frame"
            );
            if stats.exhausted() {
                tracing::warn!(
                    frame = self.frame_id,
                    dropped_blocks = stats.dropped_blocks,
                    dropped_queue = stats.dropped_queue,
                    blocks_used = self.blocks_used(),
                    buckets_used = self.buckets_used(),
                    "TSDF capacity exhausted, parts of the frame were skipped"
                );
            }
        }
    }

    /// Integrate one frame on the threads of `group`.
    pub fn add_in_group(&mut self, frame: &RgbdFrame, group: &ResourceGroup) {
        group.install(|| self.add_ctx(frame, &cv_hal::CpuBackend::new()));
    }

    /// Integrate one frame on the shared `"default"` resource group.
    pub fn add_in_default_group(&mut self, frame: &RgbdFrame) -> Result<()> {
        let group = cv_runtime::default_group()?;
        self.add_in_group(frame, &group);
        Ok(())
    }

    /// Drop all blocks and hash entries. Capacities are kept.
    pub fn clear(&mut self) {
        self.table.clear();
        self.blocks.clear();
        self.queue.reset();
        self.last_stats = FrameStats::default();

        #[cfg(feature = "tracing")]
        tracing::info!(frames = self.frames, "TSDF volume cleared");
    }

    /// Extract the zero level set on the process-wide CPU backend.
    pub fn to_scene_mesh(&self) -> TriangleMesh {
        self.to_scene_mesh_ctx(cv_hal::get_device())
    }

    pub fn to_scene_mesh_ctx<B: ComputeBackend>(&self, backend: &B) -> TriangleMesh {
        let surfaces = extract::extract_all(
            backend,
            &self.table,
            &self.blocks,
            self.config.voxel_size,
            self.config.min_weight,
        );

        let total: usize = surfaces.iter().map(|s| s.vertices.len()).sum();
        let mut vertices = Vec::with_capacity(total);
        let mut colors = Vec::with_capacity(total);
        for s in surfaces.iter() {
            vertices.extend_from_slice(&s.vertices);
            colors.extend(s.colors.iter().map(|c| Point3::new(c[0], c[1], c[2])));
        }
        let mesh = TriangleMesh::from_triangle_soup(vertices, Some(colors));

        #[cfg(feature = "tracing")]
        tracing::debug!(
            blocks = surfaces.len(),
            triangles = mesh.num_faces(),
            "extracted scene mesh"
        );

        mesh
    }

    pub fn blocks_used(&self) -> usize {
        self.blocks.used()
    }

    /// Bytes of voxel payload held by allocated blocks.
    pub fn blocks_used_size(&self) -> usize {
        self.blocks.used_bytes()
    }

    /// Overflow buckets linked into hash chains.
    pub fn buckets_used(&self) -> usize {
        self.table.buckets_used()
    }

    /// Bytes reserved by the hash table, block pool and queue.
    pub fn reserved_bytes(&self) -> usize {
        self.table.size_in_bytes() + self.blocks.size_in_bytes() + self.queue.size_in_bytes()
    }

    /// Frames integrated since construction.
    pub fn frame_count(&self) -> u64 {
        self.frames
    }

    pub fn last_frame_stats(&self) -> FrameStats {
        self.last_stats
    }

    pub fn find_block(&self, coord: BlockCoord) -> Option<u32> {
        self.table.find(coord)
    }

    pub fn block_coord(&self, index: u32) -> Option<BlockCoord> {
        self.blocks
            .is_allocated(index)
            .then(|| self.blocks.coord(index))
    }

    /// Copy of an allocated block's voxels.
    pub fn block_voxels(&self, index: u32) -> Option<Vec<Voxel>> {
        self.blocks
            .is_allocated(index)
            .then(|| self.blocks.read_block(index))
    }

    /// Block indices allocated so far, in allocation order.
    pub fn allocated_blocks(&self) -> Vec<u32> {
        self.blocks.allocated_indices()
    }

    /// Queue of the most recent frame.
    pub fn integration_queue(&self) -> &IntegrationQueue {
        &self.queue
    }

    pub fn hash_table(&self) -> &SpatialHash {
        &self.table
    }

    /// Wireframe boxes of all allocated blocks: 8 corners and 6 quads each.
    pub fn block_topology(&self) -> cv_io::ObjMesh {
        const QUADS: [[usize; 4]; 6] = [
            [0, 3, 2, 1],
            [4, 5, 6, 7],
            [0, 1, 5, 4],
            [1, 2, 6, 5],
            [2, 3, 7, 6],
            [3, 0, 4, 7],
        ];

        let extent = BLOCK_SIZE as f32 * self.config.voxel_size;
        let mut mesh = cv_io::ObjMesh::new();
        for index in self.blocks.allocated_indices() {
            let origin = self.blocks.coord(index).origin_world(self.config.voxel_size);
            let base = mesh.vertices.len();
            for [dx, dy, dz] in tables::CORNER_OFFSETS {
                mesh.vertices.push(Point3::new(
                    origin.x + dx as f32 * extent,
                    origin.y + dy as f32 * extent,
                    origin.z + dz as f32 * extent,
                ));
            }
            mesh.faces
                .extend(QUADS.iter().map(|q| q.iter().map(|&c| base + c).collect()));
        }
        mesh
    }

    /// Write [`TsdfVolume::block_topology`] to `path` as OBJ.
    pub fn dump_block_topology<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer = cv_io::create_writer(path)?;
        self.block_topology().write(&mut writer)?;
        writer.flush().map_err(cv_core::Error::from)?;
        Ok(())
    }
}

impl std::fmt::Debug for TsdfVolume {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TsdfVolume")
            .field("config", &self.config)
            .field("blocks_used", &self.blocks_used())
            .field("buckets_used", &self.buckets_used())
            .field("frames", &self.frames)
            .finish()
    }
}
