use rayon::prelude::*;

use crate::{BackendType, Capability, ComputeBackend};

/// Rayon-backed data-parallel backend.
///
/// Dispatches run on whichever pool is current for the calling thread, so
/// calling into it from `ThreadPool::install` keeps the work on that pool.
#[derive(Debug, Default)]
pub struct CpuBackend {
    _private: (),
}

impl CpuBackend {
    pub fn new() -> Self {
        Self { _private: () }
    }

    pub fn num_threads(&self) -> usize {
        rayon::current_num_threads()
    }
}

impl ComputeBackend for CpuBackend {
    fn backend_type(&self) -> BackendType {
        BackendType::Cpu
    }

    fn name(&self) -> &str {
        "CPU"
    }

    fn supports(&self, capability: Capability) -> bool {
        match capability {
            Capability::Compute => true,
            Capability::Atomics => true,
            Capability::ParallelDispatch => true,
        }
    }

    fn dispatch_1d<F>(&self, n: usize, kernel: F)
    where
        F: Fn(usize) + Sync + Send,
    {
        (0..n).into_par_iter().for_each(kernel);
    }

    fn dispatch_2d<F>(&self, width: usize, height: usize, kernel: F)
    where
        F: Fn(usize, usize) + Sync + Send,
    {
        (0..height).into_par_iter().for_each(|y| {
            for x in 0..width {
                kernel(x, y);
            }
        });
    }

    fn dispatch_collect<T, F>(&self, n: usize, kernel: F) -> Vec<T>
    where
        T: Send,
        F: Fn(usize) -> T + Sync + Send,
    {
        (0..n).into_par_iter().map(kernel).collect()
    }
}

/// Runs every invocation in index order on the calling thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct SerialBackend;

impl ComputeBackend for SerialBackend {
    fn backend_type(&self) -> BackendType {
        BackendType::CpuSerial
    }

    fn name(&self) -> &str {
        "CPU serial"
    }

    fn supports(&self, capability: Capability) -> bool {
        match capability {
            Capability::Compute => true,
            Capability::Atomics => true,
            Capability::ParallelDispatch => false,
        }
    }

    fn dispatch_1d<F>(&self, n: usize, kernel: F)
    where
        F: Fn(usize) + Sync + Send,
    {
        (0..n).for_each(kernel);
    }

    fn dispatch_collect<T, F>(&self, n: usize, kernel: F) -> Vec<T>
    where
        T: Send,
        F: Fn(usize) -> T + Sync + Send,
    {
        (0..n).map(kernel).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_dispatch_covers_index_space() {
        let hits: Vec<AtomicUsize> = (0..1000).map(|_| AtomicUsize::new(0)).collect();
        CpuBackend::new().dispatch_1d(hits.len(), |i| {
            hits[i].fetch_add(1, Ordering::Relaxed);
        });
        assert!(hits.iter().all(|h| h.load(Ordering::Relaxed) == 1));
    }

    #[test]
    fn test_dispatch_2d_covers_grid() {
        let (w, h) = (17, 9);

        let hits: Vec<AtomicUsize> = (0..w * h).map(|_| AtomicUsize::new(0)).collect();
        CpuBackend::new().dispatch_2d(w, h, |x, y| {
            hits[y * w + x].fetch_add(1, Ordering::Relaxed);
        });
        assert!(hits.iter().all(|h| h.load(Ordering::Relaxed) == 1));

        // Default trait implementation
        let hits: Vec<AtomicUsize> = (0..w * h).map(|_| AtomicUsize::new(0)).collect();
        SerialBackend.dispatch_2d(w, h, |x, y| {
            hits[y * w + x].fetch_add(1, Ordering::Relaxed);
        });
        assert!(hits.iter().all(|h| h.load(Ordering::Relaxed) == 1));
    }

    #[test]
    fn test_collect_preserves_order() {
        let out = CpuBackend::new().dispatch_collect(500, |i| i * 2);
        assert_eq!(out, (0..500).map(|i| i * 2).collect::<Vec<_>>());
        let out = SerialBackend.dispatch_collect(5, |i| i + 1);
        assert_eq!(out, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_capabilities() {
        assert!(CpuBackend::new().supports(Capability::ParallelDispatch));
        assert!(!SerialBackend.supports(Capability::ParallelDispatch));
        assert_eq!(SerialBackend.backend_type().to_string(), "CPU (serial)");
    }
}
