use crate::cpu::CpuBackend;
use std::sync::OnceLock;

static CPU_CONTEXT: OnceLock<CpuBackend> = OnceLock::new();

/// Get the best available compute device.
pub fn get_device() -> &'static CpuBackend {
    CPU_CONTEXT.get_or_init(CpuBackend::new)
}
