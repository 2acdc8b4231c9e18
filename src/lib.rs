pub use cv_3d as reconstruction;
pub use cv_core as core;
pub use cv_hal as hal;
pub use cv_io as io;
pub use cv_runtime as runtime;

pub use cv_3d::{FrameStats, TriangleMesh, TsdfConfig, TsdfVolume};
pub use cv_core::{CameraIntrinsics, DepthImage, RgbdFrame};

/// Initialize a single global Rayon thread pool for all CPU-parallel routines.
///
/// Call this once at application startup before integrating frames.
/// Repeated calls are idempotent and return the first initialization result.
///
/// Priority order:
/// 1. explicit `num_threads`
/// 2. `RUSTCV_CPU_THREADS` env var
/// 3. Rayon default
pub fn init_thread_pool(num_threads: Option<usize>) -> cv_core::Result<()> {
    cv_core::init_global_thread_pool(num_threads)
}
