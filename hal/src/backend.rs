use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendType {
    /// Data-parallel dispatch on the current rayon pool.
    Cpu,
    /// In-order dispatch on the calling thread.
    CpuSerial,
}

impl fmt::Display for BackendType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendType::Cpu => write!(f, "CPU"),
            BackendType::CpuSerial => write!(f, "CPU (serial)"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Compute,
    /// 32-bit compare-and-swap and fetch-add on shared buffers.
    Atomics,
    /// Invocations of one dispatch may run concurrently.
    ParallelDispatch,
}

/// A compute backend that runs kernels over an index space.
///
/// Every dispatch returns only after all of its invocations have finished, so
/// two consecutive dispatches are separated by a full barrier. There is no
/// ordering between invocations of the same dispatch: kernels that share state
/// must synchronize through atomics.
pub trait ComputeBackend: Send + Sync {
    fn backend_type(&self) -> BackendType;

    fn name(&self) -> &str;

    fn supports(&self, capability: Capability) -> bool;

    /// Run `kernel(i)` for every `i` in `0..n`.
    fn dispatch_1d<F>(&self, n: usize, kernel: F)
    where
        F: Fn(usize) + Sync + Send;

    /// Run `kernel(x, y)` over a `width x height` grid.
    fn dispatch_2d<F>(&self, width: usize, height: usize, kernel: F)
    where
        F: Fn(usize, usize) + Sync + Send,
    {
        if width == 0 {
            return;
        }
        self.dispatch_1d(width * height, |i| kernel(i % width, i / width));
    }

    /// Run `kernel(i)` for every `i` in `0..n` and return the results in index order.
    fn dispatch_collect<T, F>(&self, n: usize, kernel: F) -> Vec<T>
    where
        T: Send,
        F: Fn(usize) -> T + Sync + Send;
}
