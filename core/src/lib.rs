pub mod frames;
pub mod geometry;
pub mod runtime;

pub use frames::{DepthImage, RgbdFrame};
pub use geometry::CameraIntrinsics;
pub use runtime::{current_cpu_threads, init_global_thread_pool};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
