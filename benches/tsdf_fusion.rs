use criterion::{black_box, criterion_group, criterion_main, Criterion};
use image::{Luma, Rgb, RgbImage};
use nalgebra::{Matrix4, Vector3};
use rustcv_fusion::{CameraIntrinsics, DepthImage, RgbdFrame, TsdfConfig, TsdfVolume};

fn synthetic_frame(width: u32, height: u32) -> RgbdFrame {
    // slanted wall so that blocks span several depths
    let depth = DepthImage::from_fn(width, height, |u, _| Luma([1.5 + u as f32 / width as f32]));
    let color = RgbImage::from_pixel(width, height, Rgb([128, 64, 32]));
    let intrinsics = CameraIntrinsics::new(525.0, 525.0, width as f32 / 2.0, height as f32 / 2.0);
    RgbdFrame::new(depth, color, intrinsics, Matrix4::identity()).unwrap()
}

fn bench_config() -> TsdfConfig {
    TsdfConfig::default()
        .with_max_blocks(65_536)
        .with_primary_buckets(100_003)
}

fn bench_integration(c: &mut Criterion) {
    let frame = synthetic_frame(640, 480);
    let mut group = c.benchmark_group("TSDF Integration");
    group.sample_size(20);

    group.bench_function("first frame (allocating)", |b| {
        let mut volume = TsdfVolume::with_config(bench_config()).unwrap();
        b.iter(|| {
            volume.clear();
            volume.add(black_box(&frame));
        })
    });

    group.bench_function("repeat frame (resident)", |b| {
        let mut volume = TsdfVolume::with_config(bench_config()).unwrap();
        volume.add(&frame);
        b.iter(|| volume.add(black_box(&frame)))
    });

    group.finish();
}

fn bench_extraction(c: &mut Criterion) {
    let mut volume = TsdfVolume::with_config(bench_config()).unwrap();
    volume.add(&synthetic_frame(640, 480));
    let moved = Matrix4::new_translation(&Vector3::new(0.1, 0.0, 0.0));
    let frame = synthetic_frame(640, 480);
    let shifted = RgbdFrame::new(
        frame.depth().clone(),
        frame.color().clone(),
        *frame.intrinsics(),
        moved,
    )
    .unwrap();
    volume.add(&shifted);

    let mut group = c.benchmark_group("TSDF Extraction");
    group.sample_size(20);
    group.bench_function("scene mesh", |b| b.iter(|| black_box(volume.to_scene_mesh())));
    group.finish();
}

criterion_group!(benches, bench_integration, bench_extraction);
criterion_main!(benches);
