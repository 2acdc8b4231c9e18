use std::collections::HashSet;
use std::sync::Barrier;

use cv_3d::tsdf::hash_table::Lookup;
use cv_3d::tsdf::{BlockCoord, BlockPool, SpatialHash, TsdfConfig, TsdfVolume};
use cv_core::{CameraIntrinsics, DepthImage, RgbdFrame};
use cv_hal::{CpuBackend, SerialBackend};
use cv_runtime::ResourceGroup;
use image::{Luma, Rgb, RgbImage};
use nalgebra::{Matrix4, Vector3};

fn plane_frame(width: u32, height: u32, focal: f32, depth: f32, pose: Matrix4<f32>) -> RgbdFrame {
    let depth_map = DepthImage::from_pixel(width, height, Luma([depth]));
    let color = RgbImage::from_pixel(width, height, Rgb([255, 0, 0]));
    let intrinsics = CameraIntrinsics::new(focal, focal, width as f32 / 2.0, height as f32 / 2.0);
    RgbdFrame::new(depth_map, color, intrinsics, pose).unwrap()
}

/// 64 MiB of blocks and a small table, enough for the synthetic scenes below.
fn small_config() -> TsdfConfig {
    TsdfConfig::default()
        .with_truncation(0.1)
        .with_primary_buckets(10_007)
        .with_overflow_buckets(4_096)
        .with_max_blocks(16_384)
        .with_queue_capacity(16_384)
}

#[test]
fn test_single_plane_frame() {
    let mut volume = TsdfVolume::new(0.1, 4.0).unwrap();
    volume.clear();
    assert_eq!(volume.blocks_used(), 0);

    let frame = plane_frame(32, 24, 100.0, 2.0, Matrix4::identity());
    volume.add(&frame);

    assert!(volume.blocks_used() > 0);
    assert_eq!(volume.blocks_used_size(), volume.blocks_used() * 4096);
    let stats = volume.last_frame_stats();
    assert_eq!(stats.valid_pixels, 32 * 24);
    assert_eq!(stats.inserted, volume.blocks_used());
    assert_eq!(stats.queued, volume.blocks_used());
    assert!(!stats.exhausted());

    let mesh = volume.to_scene_mesh();
    assert!(mesh.num_vertices() > 0);
    assert!(mesh.num_faces() > 0);
    assert_eq!(mesh.num_vertices(), 3 * mesh.num_faces());
    let voxel = volume.config().voxel_size;
    for v in &mesh.vertices {
        assert!((v.z - 2.0).abs() <= voxel, "vertex off the plane: {v:?}");
    }
    // the patch spans roughly the camera footprint at 2 m
    let (min, max) = mesh.bounds();
    assert!(max.x - min.x > 0.4 && max.x - min.x < 0.8);
    assert!(max.y - min.y > 0.3 && max.y - min.y < 0.6);

    let colors = mesh.colors.as_ref().unwrap();
    assert_eq!(colors.len(), mesh.num_vertices());
    assert!(colors.iter().all(|c| (c.x - 1.0).abs() < 1e-6 && c.y.abs() < 1e-6));
}

#[test]
fn test_repeated_frames_converge() {
    let mut volume = TsdfVolume::with_config(small_config()).unwrap();
    let frame = plane_frame(32, 24, 100.0, 2.0, Matrix4::identity());

    volume.add(&frame);
    let first = volume.to_scene_mesh();
    let blocks_after_first = volume.blocks_used();
    let center = volume
        .find_block(BlockCoord::new(0, 0, 25))
        .expect("block under the principal point");
    assert_eq!(volume.block_voxels(center).unwrap()[0].weight(), 1);

    for _ in 1..50 {
        volume.add(&frame);
        let stats = volume.last_frame_stats();
        assert_eq!(stats.inserted, 0);
        assert_eq!(stats.queued, blocks_after_first);
    }
    assert_eq!(volume.frame_count(), 50);
    assert_eq!(volume.blocks_used(), blocks_after_first);
    assert_eq!(volume.block_voxels(center).unwrap()[0].weight(), 50);

    let last = volume.to_scene_mesh();
    assert_eq!(first.num_vertices(), last.num_vertices());
    let max_diff = first
        .vertices
        .iter()
        .zip(&last.vertices)
        .map(|(a, b)| (a - b).norm())
        .fold(0.0f32, f32::max);
    assert!(max_diff < 1e-4, "mesh drifted by {max_diff}");
}

#[test]
fn test_weight_is_capped() {
    let mut volume = TsdfVolume::with_config(small_config().with_max_weight(10)).unwrap();
    let frame = plane_frame(16, 12, 50.0, 2.0, Matrix4::identity());
    let mut previous = vec![0u8; 512];
    for _ in 0..15 {
        volume.add(&frame);
        let index = volume.find_block(BlockCoord::new(0, 0, 24)).unwrap();
        let weights: Vec<u8> = volume
            .block_voxels(index)
            .unwrap()
            .iter()
            .map(|v| v.weight())
            .collect();
        for (w, p) in weights.iter().zip(&previous) {
            assert!(w >= p);
            assert!(*w <= 10);
        }
        previous = weights;
    }
    assert!(previous.contains(&10));
}

#[test]
fn test_invalid_depth_adds_nothing() {
    let mut volume = TsdfVolume::with_config(small_config()).unwrap();
    let empty = plane_frame(32, 24, 100.0, 0.0, Matrix4::identity());

    volume.add(&empty);
    assert_eq!(volume.blocks_used(), 0);
    assert_eq!(volume.last_frame_stats().valid_pixels, 0);
    assert!(volume.integration_queue().is_empty());
    assert!(volume.to_scene_mesh().is_empty());

    let plane = plane_frame(32, 24, 100.0, 2.0, Matrix4::identity());
    volume.add(&plane);
    let used = volume.blocks_used();
    let faces = volume.to_scene_mesh().num_faces();

    let mut nan_depth = DepthImage::from_pixel(32, 24, Luma([f32::NAN]));
    nan_depth.put_pixel(0, 0, Luma([-1.0]));
    let nan_frame = RgbdFrame::depth_only(
        nan_depth,
        CameraIntrinsics::new(100.0, 100.0, 16.0, 12.0),
        Matrix4::identity(),
    )
    .unwrap();
    volume.add(&nan_frame);
    volume.add(&empty);
    assert_eq!(volume.blocks_used(), used);
    assert_eq!(volume.to_scene_mesh().num_faces(), faces);
}

#[test]
fn test_depth_beyond_max_distance_is_ignored() {
    let mut volume = TsdfVolume::with_config(small_config().with_max_distance(1.5)).unwrap();
    volume.add(&plane_frame(16, 12, 50.0, 2.0, Matrix4::identity()));
    assert_eq!(volume.blocks_used(), 0);
    assert_eq!(volume.last_frame_stats().valid_pixels, 0);
}

#[test]
fn test_block_exhaustion_degrades_gracefully() {
    let config = small_config()
        .with_voxel_size(0.05)
        .with_truncation(0.15);
    let near = plane_frame(16, 12, 16.0, 2.0, Matrix4::identity());
    let far_pose = Matrix4::new_translation(&Vector3::new(-100.0, 0.0, 0.0));
    let far = plane_frame(16, 12, 16.0, 2.0, far_pose);

    let mut probe = TsdfVolume::with_config(config.clone()).unwrap();
    probe.add(&near);
    let needed = probe.blocks_used() as u32;
    assert!(needed > 10);

    let capacity = needed + 4;
    let mut volume = TsdfVolume::with_config(config.with_max_blocks(capacity)).unwrap();
    volume.add(&near);
    assert_eq!(volume.blocks_used() as u32, needed);
    let near_faces = volume.to_scene_mesh().num_faces();
    assert!(near_faces > 0);

    volume.add(&far);
    assert_eq!(volume.blocks_used() as u32, capacity);
    assert!(volume.last_frame_stats().dropped_blocks > 0);
    assert!(volume.last_frame_stats().exhausted());

    for pose in [far_pose, Matrix4::new_translation(&Vector3::new(0.0, 50.0, 0.0))] {
        volume.add(&plane_frame(16, 12, 16.0, 2.0, pose));
        assert_eq!(volume.blocks_used() as u32, capacity);
    }

    // the fully resident region still meshes
    let mesh = volume.to_scene_mesh();
    let near_vertices = mesh
        .vertices
        .iter()
        .filter(|v| v.x.abs() < 2.0 && (v.z - 2.0).abs() < 0.05)
        .count();
    assert!(near_vertices >= 3 * near_faces);
}

#[test]
fn test_queue_has_no_duplicates() {
    let mut volume = TsdfVolume::with_config(small_config()).unwrap();
    // tilted view so many rays cross the same blocks
    let pose = Matrix4::new_rotation(Vector3::new(0.3, 0.2, 0.0));
    let frame = plane_frame(48, 36, 60.0, 1.5, pose);

    for _ in 0..2 {
        volume.add(&frame);
        let queue = volume.integration_queue().entries();
        let unique: HashSet<u32> = queue.iter().copied().collect();
        assert_eq!(unique.len(), queue.len());
        assert_eq!(queue.len(), volume.last_frame_stats().queued);
    }
    // second frame re-queues every block once
    let all: HashSet<u32> = volume.allocated_blocks().into_iter().collect();
    let queued: HashSet<u32> = volume.integration_queue().entries().into_iter().collect();
    assert_eq!(all, queued);
}

#[test]
fn test_concurrent_find_or_insert_is_unique() {
    const THREADS: usize = 8;
    const COORDS: i32 = 100;

    let table = SpatialHash::new(7, 64);
    let pool = BlockPool::new(1024);
    let barrier = Barrier::new(THREADS);
    let coords: Vec<BlockCoord> = (0..COORDS)
        .map(|i| BlockCoord::new(i % 5, i / 5 - 10, i % 3))
        .collect();

    let results: Vec<Vec<Lookup>> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..THREADS)
            .map(|t| {
                let (table, pool, barrier, coords) = (&table, &pool, &barrier, &coords);
                s.spawn(move || {
                    barrier.wait();
                    // each thread walks the coordinates from a different offset
                    (0..coords.len())
                        .map(|k| coords[(k + t * 13) % coords.len()])
                        .map(|c| table.find_or_insert(c, pool, 1))
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(pool.used(), COORDS as usize);
    let inserted = results
        .iter()
        .flatten()
        .filter(|r| matches!(r, Lookup::Inserted(_)))
        .count();
    assert_eq!(inserted, COORDS as usize);

    let mut seen = HashSet::new();
    for c in &coords {
        let index = table.find(*c).unwrap();
        assert_eq!(table.find(*c), Some(index));
        assert_eq!(pool.coord(index), *c);
        assert!(seen.insert(index));
    }
    for (t, per_thread) in results.iter().enumerate() {
        for (k, r) in per_thread.iter().enumerate() {
            let c = coords[(k + t * 13) % coords.len()];
            assert_eq!(r.index(), table.find(c));
        }
    }
}

#[test]
fn test_hash_chains_stay_short() {
    let table = SpatialHash::new(500_009, 1_024);
    let pool = BlockPool::new(16_384);
    for x in -20..20 {
        for y in -15..15 {
            for z in 0..12 {
                assert!(table
                    .find_or_insert(BlockCoord::new(x, y, z), &pool, 1)
                    .index()
                    .is_some());
            }
        }
    }
    assert_eq!(pool.used(), 40 * 30 * 12);
    assert!(table.max_chain_len() <= 2);
}

#[test]
fn test_backends_agree() {
    let frame = plane_frame(24, 18, 40.0, 1.2, Matrix4::new_rotation(Vector3::new(0.0, 0.2, 0.0)));

    let mut parallel = TsdfVolume::with_config(small_config()).unwrap();
    parallel.add_ctx(&frame, &CpuBackend::new());
    let mut serial = TsdfVolume::with_config(small_config()).unwrap();
    serial.add_ctx(&frame, &SerialBackend);

    assert_eq!(parallel.blocks_used(), serial.blocks_used());
    let a = parallel.to_scene_mesh_ctx(&CpuBackend::new());
    let b = serial.to_scene_mesh_ctx(&SerialBackend);
    assert_eq!(a.num_faces(), b.num_faces());
    assert!((a.surface_area() - b.surface_area()).abs() < 1e-3);
}

#[test]
fn test_integration_in_resource_group() {
    let group = ResourceGroup::new("tsdf-test", 2, None).unwrap();
    let frame = plane_frame(16, 12, 50.0, 2.0, Matrix4::identity());
    let mut volume = TsdfVolume::with_config(small_config()).unwrap();
    volume.add_in_group(&frame, &group);
    assert!(volume.blocks_used() > 0);
    volume.add_in_default_group(&frame).unwrap();
    assert_eq!(volume.frame_count(), 2);
}

#[test]
fn test_clear_resets_everything() {
    let mut volume = TsdfVolume::with_config(small_config()).unwrap();
    let frame = plane_frame(16, 12, 50.0, 2.0, Matrix4::identity());
    volume.add(&frame);
    let used = volume.blocks_used();
    assert!(used > 0);

    volume.clear();
    assert_eq!(volume.blocks_used(), 0);
    assert_eq!(volume.buckets_used(), 0);
    assert!(volume.to_scene_mesh().is_empty());
    assert_eq!(volume.find_block(BlockCoord::new(0, 0, 24)), None);

    volume.add(&frame);
    assert_eq!(volume.blocks_used(), used);
    assert!(!volume.to_scene_mesh().is_empty());
}

#[test]
fn test_dump_block_topology() {
    let mut volume = TsdfVolume::with_config(small_config()).unwrap();
    volume.add(&plane_frame(16, 12, 50.0, 2.0, Matrix4::identity()));
    let blocks = volume.blocks_used();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("debug/blocks.obj");
    volume.dump_block_topology(&path).unwrap();

    let file = std::io::BufReader::new(std::fs::File::open(&path).unwrap());
    let obj = cv_io::ObjMesh::read(file).unwrap();
    assert_eq!(obj.vertices.len(), 8 * blocks);
    assert_eq!(obj.faces.len(), 6 * blocks);
    assert!(obj.faces.iter().all(|f| f.len() == 4));
}

#[test]
fn test_scene_mesh_writes_ply() {
    let mut volume = TsdfVolume::with_config(small_config()).unwrap();
    volume.add(&plane_frame(16, 12, 50.0, 2.0, Matrix4::identity()));
    let mesh = volume.to_scene_mesh();

    let mut out = Vec::new();
    mesh.write_ply(&mut out).unwrap();
    let parsed = cv_io::read_ply_mesh(std::io::Cursor::new(out)).unwrap();
    assert_eq!(parsed.vertices.len(), mesh.num_vertices());
    assert_eq!(parsed.faces, mesh.faces);
    assert!(parsed.colors.unwrap().iter().all(|c| c.x > 0.99));
}

#[test]
fn test_full_queue_skips_blocks_but_keeps_them_resident() {
    let mut volume = TsdfVolume::with_config(small_config().with_queue_capacity(5)).unwrap();
    let frame = plane_frame(32, 24, 100.0, 2.0, Matrix4::identity());

    volume.add(&frame);
    let stats = volume.last_frame_stats();
    let inserted = stats.inserted;
    assert!(inserted > 5);
    assert_eq!(volume.blocks_used(), inserted);
    assert_eq!(stats.queued, 5);
    assert_eq!(stats.dropped_queue, inserted - 5);
    assert_eq!(stats.dropped_blocks, 0);
    assert!(stats.exhausted());

    let mut fused: HashSet<u32> = volume.integration_queue().entries().into_iter().collect();
    assert_eq!(fused.len(), 5);

    for _ in 0..3 {
        volume.add(&frame);
        let stats = volume.last_frame_stats();
        assert_eq!(stats.inserted, 0);
        assert_eq!(stats.queued, 5);
        assert_eq!(stats.dropped_queue, inserted - 5);
        let entries = volume.integration_queue().entries();
        let unique: HashSet<u32> = entries.iter().copied().collect();
        assert_eq!(unique.len(), 5);
        fused.extend(unique);
    }
    assert_eq!(volume.blocks_used(), inserted);

    // blocks that never made it into a queue stay allocated but unobserved
    for index in volume.allocated_blocks() {
        if !fused.contains(&index) {
            let voxels = volume.block_voxels(index).unwrap();
            assert!(voxels.iter().all(|v| v.weight() == 0));
        }
    }

    let mesh = volume.to_scene_mesh();
    assert_eq!(mesh.num_vertices(), 3 * mesh.num_faces());
}

#[test]
fn test_overflow_bucket_exhaustion() {
    let config = small_config()
        .with_primary_buckets(1)
        .with_overflow_buckets(2);
    let mut volume = TsdfVolume::with_config(config).unwrap();
    let frame = plane_frame(32, 24, 100.0, 2.0, Matrix4::identity());

    volume.add(&frame);
    let stats = volume.last_frame_stats();
    // one primary and two overflow buckets of four entries each
    assert_eq!(volume.blocks_used(), 12);
    assert_eq!(volume.buckets_used(), 2);
    assert_eq!(stats.inserted, 12);
    assert!(stats.dropped_blocks > 0);
    assert_eq!(volume.hash_table().entry_count(), 12);
    assert_eq!(volume.hash_table().max_chain_len(), 3);

    for index in volume.allocated_blocks() {
        let coord = volume.block_coord(index).unwrap();
        assert_eq!(volume.find_block(coord), Some(index));
    }

    volume.add(&frame);
    assert_eq!(volume.blocks_used(), 12);
    assert_eq!(volume.last_frame_stats().inserted, 0);
    assert!(volume.last_frame_stats().dropped_blocks > 0);

    let mesh = volume.to_scene_mesh();
    assert_eq!(mesh.num_vertices(), 3 * mesh.num_faces());
}
