use std::fmt;
use std::ops::Range;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::{Error, Result};

/// Fixed-length buffer of 32-bit words shared between the host and dispatched kernels.
///
/// Kernels access words through `&self` with atomic operations. Host-side bulk
/// access (`fill`, `write_from_host`) takes `&mut self`, which statically
/// guarantees that no dispatch holding a shared reference is in flight.
pub struct AtomicBuffer {
    words: Box<[AtomicU32]>,
}

impl AtomicBuffer {
    /// Allocate `len` zeroed words.
    ///
    /// Backed by a zeroed allocation, so pages are only committed when first touched.
    pub fn zeroed(len: usize) -> Self {
        let mut words = std::mem::ManuallyDrop::new(vec![0u32; len]);
        let (ptr, len, cap) = (words.as_mut_ptr(), words.len(), words.capacity());
        // SAFETY: `AtomicU32` has the same size, alignment and bit validity as `u32`,
        // and the allocation is handed over without being dropped as a `Vec<u32>`.
        let words = unsafe { Vec::from_raw_parts(ptr.cast::<AtomicU32>(), len, cap) };
        Self {
            words: words.into_boxed_slice(),
        }
    }

    pub fn from_host(data: &[u32]) -> Self {
        Self {
            words: data.iter().map(|&w| AtomicU32::new(w)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn size_in_bytes(&self) -> usize {
        self.words.len() * std::mem::size_of::<u32>()
    }

    #[inline]
    pub fn load(&self, index: usize) -> u32 {
        self.words[index].load(Ordering::Acquire)
    }

    #[inline]
    pub fn load_relaxed(&self, index: usize) -> u32 {
        self.words[index].load(Ordering::Relaxed)
    }

    #[inline]
    pub fn store(&self, index: usize, value: u32) {
        self.words[index].store(value, Ordering::Release);
    }

    #[inline]
    pub fn store_relaxed(&self, index: usize, value: u32) {
        self.words[index].store(value, Ordering::Relaxed);
    }

    #[inline]
    pub fn swap(&self, index: usize, value: u32) -> u32 {
        self.words[index].swap(value, Ordering::AcqRel)
    }

    #[inline]
    pub fn compare_exchange(&self, index: usize, current: u32, new: u32) -> std::result::Result<u32, u32> {
        self.words[index].compare_exchange(current, new, Ordering::AcqRel, Ordering::Acquire)
    }

    #[inline]
    pub fn fetch_add(&self, index: usize, value: u32) -> u32 {
        self.words[index].fetch_add(value, Ordering::AcqRel)
    }

    #[inline]
    pub fn fetch_and(&self, index: usize, value: u32) -> u32 {
        self.words[index].fetch_and(value, Ordering::AcqRel)
    }

    /// CAS loop applying `f` until it succeeds or `f` returns `None`.
    #[inline]
    pub fn fetch_update<F>(&self, index: usize, f: F) -> std::result::Result<u32, u32>
    where
        F: FnMut(u32) -> Option<u32>,
    {
        self.words[index].fetch_update(Ordering::AcqRel, Ordering::Acquire, f)
    }

    pub fn fill(&mut self, value: u32) {
        for w in self.words.iter_mut() {
            *w.get_mut() = value;
        }
    }

    pub fn write_from_host(&mut self, offset: usize, data: &[u32]) -> Result<()> {
        let end = offset
            .checked_add(data.len())
            .filter(|&end| end <= self.words.len())
            .ok_or_else(|| {
                Error::InvalidInput(format!(
                    "write of {} words at offset {} exceeds buffer of {} words",
                    data.len(),
                    offset,
                    self.words.len()
                ))
            })?;
        for (w, &v) in self.words[offset..end].iter_mut().zip(data) {
            *w.get_mut() = v;
        }
        Ok(())
    }

    pub fn read_range(&self, range: Range<usize>) -> Vec<u32> {
        self.words[range]
            .iter()
            .map(|w| w.load(Ordering::Acquire))
            .collect()
    }

    pub fn read_to_host(&self) -> Vec<u32> {
        self.read_range(0..self.words.len())
    }
}

impl fmt::Debug for AtomicBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AtomicBuffer(len={})", self.words.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zeroed_and_host_roundtrip() {
        let mut buf = AtomicBuffer::zeroed(16);
        assert_eq!(buf.len(), 16);
        assert_eq!(buf.size_in_bytes(), 64);
        assert!(buf.read_to_host().iter().all(|&w| w == 0));

        buf.write_from_host(4, &[1, 2, 3]).unwrap();
        assert_eq!(buf.read_range(3..8), vec![0, 1, 2, 3, 0]);
        assert!(buf.write_from_host(15, &[1, 2]).is_err());
    }

    #[test]
    fn test_atomic_ops() {
        let buf = AtomicBuffer::from_host(&[5, 0x8000_0003]);
        assert_eq!(buf.fetch_add(0, 2), 5);
        assert_eq!(buf.load(0), 7);
        assert_eq!(buf.compare_exchange(0, 1, 9), Err(7));
        assert_eq!(buf.compare_exchange(0, 7, 9), Ok(7));
        assert_eq!(buf.fetch_and(1, 0x7fff_ffff), 0x8000_0003);
        assert_eq!(buf.load(1), 3);
        assert_eq!(buf.fetch_update(1, |v| (v < 3).then_some(v + 1)), Err(3));
        assert_eq!(buf.swap(1, 11), 3);
    }

    #[test]
    fn test_fill() {
        let mut buf = AtomicBuffer::zeroed(8);
        buf.fill(7);
        assert_eq!(buf.read_to_host(), vec![7; 8]);
    }

    #[test]
    fn test_concurrent_fetch_add() {
        let buf = AtomicBuffer::zeroed(1);
        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    for _ in 0..1000 {
                        buf.fetch_add(0, 1);
                    }
                });
            }
        });
        assert_eq!(buf.load(0), 8000);
    }
}
