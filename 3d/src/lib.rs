//! Volumetric 3D reconstruction from RGB-D frames.

pub mod mesh;
pub mod tsdf;

pub use mesh::TriangleMesh;
pub use tsdf::{BlockCoord, FrameStats, TsdfConfig, TsdfVolume, Voxel};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("HAL error: {0}")]
    Hal(#[from] cv_hal::Error),

    #[error(transparent)]
    Core(#[from] cv_core::Error),

    #[error("Runtime error: {0}")]
    Runtime(#[from] cv_runtime::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
