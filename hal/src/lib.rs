pub mod backend;
pub mod budget;
pub mod compute;
pub mod cpu;
pub mod storage;

pub use backend::{BackendType, Capability, ComputeBackend};
pub use budget::{fits_in_budget, parse_bytes_with_suffix, read_budget_from_env, slots_in_budget};
pub use compute::get_device;
pub use cpu::{CpuBackend, SerialBackend};
pub use storage::AtomicBuffer;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Memory error: {0}")]
    MemoryError(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
