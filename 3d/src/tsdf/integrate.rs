//! Frame integration: block queue construction and voxel fusion.
//!
//! Both passes are single dispatches on a [`ComputeBackend`]; the dispatch
//! boundary between them is the barrier that makes the finished queue visible
//! to the fusion kernel.

use std::sync::atomic::{AtomicUsize, Ordering};

use cv_core::RgbdFrame;
use cv_hal::ComputeBackend;
use nalgebra::{Point2, Point3};

use super::block_pool::BlockPool;
use super::config::TsdfConfig;
use super::hash_table::{Lookup, SpatialHash};
use super::queue::IntegrationQueue;
use super::voxel::{voxel_local, BlockCoord, Voxel, BLOCK_SIZE, VOXELS_PER_BLOCK};

/// Counters of one integrated frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    /// Depth samples that were valid and within `max_distance`.
    pub valid_pixels: usize,
    /// Blocks queued for fusion.
    pub queued: usize,
    /// Blocks allocated by this frame.
    pub inserted: usize,
    /// Block requests lost to block or bucket exhaustion.
    pub dropped_blocks: usize,
    /// Blocks not queued because the queue was full.
    pub dropped_queue: usize,
}

impl FrameStats {
    pub fn exhausted(&self) -> bool {
        self.dropped_blocks > 0 || self.dropped_queue > 0
    }
}

#[derive(Default)]
struct Counters {
    valid_pixels: AtomicUsize,
    queued: AtomicUsize,
    inserted: AtomicUsize,
    dropped_blocks: AtomicUsize,
    dropped_queue: AtomicUsize,
}

impl Counters {
    fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn into_stats(self) -> FrameStats {
        FrameStats {
            valid_pixels: self.valid_pixels.into_inner(),
            queued: self.queued.into_inner(),
            inserted: self.inserted.into_inner(),
            dropped_blocks: self.dropped_blocks.into_inner(),
            dropped_queue: self.dropped_queue.into_inner(),
        }
    }
}

/// Blocks touched by the shared per-frame structures.
pub(crate) struct Sparse<'a> {
    pub table: &'a SpatialHash,
    pub pool: &'a BlockPool,
    pub queue: &'a IntegrationQueue,
}

/// Walk the truncation band of every valid depth sample and queue each block
/// it crosses, allocating blocks that are not resident yet.
///
/// A block is queued at most once per frame: by the thread that inserted it,
/// or by the one thread that re-stamps a resident block with `frame_id`.
pub(crate) fn build_queue<B: ComputeBackend>(
    backend: &B,
    frame: &RgbdFrame,
    config: &TsdfConfig,
    sparse: &Sparse<'_>,
    frame_id: u32,
) -> FrameStats {
    let counters = Counters::default();
    let intrinsics = frame.intrinsics();
    let camera_to_world = frame.camera_to_world();
    let voxel_size = config.voxel_size;
    let trunc = config.truncation;
    let dmax = config.max_distance;
    // half a block keeps consecutive samples in the same or adjacent blocks
    let step = 0.5 * BLOCK_SIZE as f32 * voxel_size;

    let enqueue = |index: u32| {
        if sparse.queue.push(index) {
            Counters::bump(&counters.queued);
        } else {
            Counters::bump(&counters.dropped_queue);
        }
    };

    backend.dispatch_2d(frame.width() as usize, frame.height() as usize, |u, v| {
        let Some(depth) = frame.depth_at(u as u32, v as u32) else {
            return;
        };
        if depth > dmax {
            return;
        }
        Counters::bump(&counters.valid_pixels);

        let pixel = Point2::new(u as f32, v as f32);
        let near = (depth - trunc).max(0.0);
        let far = (depth + trunc).min(dmax);
        // metric length of the band along this pixel's ray
        let span = (intrinsics.unproject(pixel, far) - intrinsics.unproject(pixel, near)).norm();
        let steps = (span / step).ceil().max(1.0) as usize;

        let mut last = None;
        for i in 0..=steps {
            let z = near + (far - near) * i as f32 / steps as f32;
            let world = camera_to_world.transform_point(&intrinsics.unproject(pixel, z));
            let coord = BlockCoord::from_world(&world, voxel_size);
            if last == Some(coord) {
                continue;
            }
            last = Some(coord);

            match sparse.table.find_or_insert(coord, sparse.pool, frame_id) {
                Lookup::Inserted(index) => {
                    Counters::bump(&counters.inserted);
                    enqueue(index);
                }
                Lookup::Found(index) => {
                    if sparse.pool.claim(index, frame_id) {
                        enqueue(index);
                    }
                }
                Lookup::Exhausted(_) => Counters::bump(&counters.dropped_blocks),
            }
        }
    });

    counters.into_stats()
}

/// Fold one observation into a voxel.
///
/// Running average of the distance and color with the current weight; the
/// weight grows by one up to `max_weight`. Without a color sample the voxel
/// keeps its color.
#[inline]
pub fn fuse_sample(old: Voxel, tsdf: f32, color: Option<[u8; 3]>, max_weight: u8) -> Voxel {
    let w = old.weight() as f32;
    let blended = (old.tsdf * w + tsdf) / (w + 1.0);
    let weight = old.weight().saturating_add(1).min(max_weight);

    let color = match color {
        Some(c) if old.weight() > 0 => {
            let o = old.color();
            let mix = |a: u8, b: u8| ((a as f32 * w + b as f32) / (w + 1.0)).round() as u8;
            [mix(o[0], c[0]), mix(o[1], c[1]), mix(o[2], c[2])]
        }
        Some(c) => c,
        None => old.color(),
    };

    Voxel::new(blended, weight, color)
}

/// Fuse every voxel of every queued block with `frame`.
///
/// Only voxel payloads are written; each voxel belongs to exactly one
/// invocation since the queue holds no duplicates.
pub(crate) fn fuse<B: ComputeBackend>(
    backend: &B,
    frame: &RgbdFrame,
    config: &TsdfConfig,
    pool: &BlockPool,
    queue: &IntegrationQueue,
) {
    let n = queue.len() * VOXELS_PER_BLOCK;
    backend.dispatch_1d(n, |i| {
        let block = queue.get(i / VOXELS_PER_BLOCK);
        let local = i % VOXELS_PER_BLOCK;
        if let Some(voxel) = fuse_voxel(frame, config, pool, block, local) {
            pool.set_voxel(block, local, voxel);
        }
    });
}

#[inline]
fn fuse_voxel(
    frame: &RgbdFrame,
    config: &TsdfConfig,
    pool: &BlockPool,
    block: u32,
    local: usize,
) -> Option<Voxel> {
    let (ox, oy, oz) = pool.coord(block).origin_voxel();
    let (lx, ly, lz) = voxel_local(local);
    let world = Point3::new(
        (ox + lx as i32) as f32,
        (oy + ly as i32) as f32,
        (oz + lz as i32) as f32,
    ) * config.voxel_size;

    let camera = frame.pose().transform_point(&world);
    if camera.z > config.max_distance {
        return None;
    }
    let pixel = frame.intrinsics().project(&camera)?;
    let (u, v) = (pixel.x.round(), pixel.y.round());
    if u < 0.0 || v < 0.0 {
        return None;
    }
    let depth = frame.depth_at(u as u32, v as u32)?;
    if depth > config.max_distance {
        return None;
    }

    let sdf = depth - camera.z;
    if sdf < -config.truncation {
        return None;
    }
    let tsdf = (sdf / config.truncation).min(1.0);
    let color = frame.color_at(u, v);

    Some(fuse_sample(
        pool.voxel(block, local),
        tsdf,
        color,
        config.max_weight,
    ))
}
