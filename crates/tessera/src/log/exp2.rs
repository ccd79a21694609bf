//! Exponentially-bucketed append-only array of 64-bit words.

use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicU64, Ordering};

/// Number of exponential buckets. Bucket `i` holds `2^(i + SHIFT)`
/// entries, so 32 buckets cover any reachable index.
pub const EXP2_BUCKETS: usize = 32;

/// Base shift of the reference reflog sizing: bucket `i` has capacity
/// `2^(i + 24)` entries.
pub const REFLOG_BASE_SHIFT: u32 = 24;

/// Slot marker while a bucket allocation is in flight.
const ALLOCATING: *mut AtomicU64 = 1 as *mut AtomicU64;

/// Lock-free exponentially-bucketed append-only array of `u64`.
///
/// Indices are reserved with fetch-and-add; the committed size is
/// published strictly in reservation order with release semantics, so an
/// index below [`MonologExp2::size`] always reads a fully written entry.
/// Buckets are allocated lazily on first touch and never freed before
/// drop.
///
/// `SHIFT` fixes the capacity of bucket 0 at `2^SHIFT` entries; each
/// subsequent bucket doubles. [`RefLog`] is the reference sizing used
/// for index posting lists; the descriptor registries use a small shift.
#[derive(Debug)]
pub struct MonologExp2<const SHIFT: u32> {
    buckets: [AtomicPtr<AtomicU64>; EXP2_BUCKETS],
    write_idx: AtomicU64,
    committed: AtomicU64,
}

/// An append-only sequence of record offsets (an index posting list).
pub type RefLog = MonologExp2<REFLOG_BASE_SHIFT>;

impl<const SHIFT: u32> Default for MonologExp2<SHIFT> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const SHIFT: u32> MonologExp2<SHIFT> {
    /// Creates an empty log. No bucket is allocated until the first push.
    pub fn new() -> Self {
        Self {
            buckets: std::array::from_fn(|_| AtomicPtr::new(ptr::null_mut())),
            write_idx: AtomicU64::new(0),
            committed: AtomicU64::new(0),
        }
    }

    /// Appends `value`, returning its dense index.
    ///
    /// Safe to call from any number of threads; indices equal insertion
    /// order of the winning fetch-and-add.
    pub fn push(&self, value: u64) -> u64 {
        let idx = self.write_idx.fetch_add(1, Ordering::Relaxed);
        let (bucket, within, cap) = Self::locate(idx);
        let base = self.ensure_bucket(bucket, cap);
        // The release store on `committed` below publishes this write.
        unsafe {
            (*base.add(within)).store(value, Ordering::Relaxed);
        }
        // Commit strictly in index order so `size` never covers a hole.
        while self
            .committed
            .compare_exchange_weak(idx, idx + 1, Ordering::Release, Ordering::Relaxed)
            .is_err()
        {
            std::hint::spin_loop();
        }
        idx
    }

    /// Number of committed entries; entries below this are fully written.
    pub fn size(&self) -> u64 {
        self.committed.load(Ordering::Acquire)
    }

    /// Reads the entry at `idx`. The caller must have observed
    /// `idx < size()`.
    pub fn get(&self, idx: u64) -> u64 {
        debug_assert!(idx < self.size(), "read past committed size");
        let (bucket, within, _) = Self::locate(idx);
        let base = self.buckets[bucket].load(Ordering::Acquire);
        assert!(
            !base.is_null() && base != ALLOCATING,
            "read from unallocated exp2 bucket {bucket}"
        );
        unsafe { (*base.add(within)).load(Ordering::Relaxed) }
    }

    /// Iterates the committed entries under a single size snapshot.
    pub fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        (0..self.size()).map(move |i| self.get(i))
    }

    /// Maps an index to (bucket, position within bucket, bucket capacity).
    fn locate(idx: u64) -> (usize, usize, usize) {
        let x = (idx >> SHIFT) + 1;
        let bucket = (63 - x.leading_zeros()) as usize;
        assert!(bucket < EXP2_BUCKETS, "exp2 index {idx} out of addressable range");
        let skipped = ((1u64 << bucket) - 1) << SHIFT;
        let cap = 1usize << (bucket as u32 + SHIFT);
        (bucket, (idx - skipped) as usize, cap)
    }

    fn ensure_bucket(&self, bucket: usize, cap: usize) -> *mut AtomicU64 {
        let slot = &self.buckets[bucket];
        loop {
            let p = slot.load(Ordering::Acquire);
            if p.is_null() {
                if slot
                    .compare_exchange(
                        ptr::null_mut(),
                        ALLOCATING,
                        Ordering::Acquire,
                        Ordering::Relaxed,
                    )
                    .is_ok()
                {
                    let layout = Layout::array::<AtomicU64>(cap)
                        .expect("exp2 bucket layout overflow");
                    // Safety: cap is non-zero; zeroed memory is a valid
                    // AtomicU64 array.
                    let fresh = unsafe { alloc_zeroed(layout) } as *mut AtomicU64;
                    assert!(!fresh.is_null(), "exp2 bucket allocation failed");
                    slot.store(fresh, Ordering::Release);
                    return fresh;
                }
            } else if p == ALLOCATING {
                std::hint::spin_loop();
            } else {
                return p;
            }
        }
    }
}

impl<const SHIFT: u32> Drop for MonologExp2<SHIFT> {
    fn drop(&mut self) {
        for (bucket, slot) in self.buckets.iter_mut().enumerate() {
            let p = *slot.get_mut();
            if !p.is_null() && p != ALLOCATING {
                let cap = 1usize << (bucket as u32 + SHIFT);
                // Safety: allocated in ensure_bucket with this layout.
                unsafe {
                    dealloc(p as *mut u8, Layout::array::<AtomicU64>(cap).unwrap());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_locate_crosses_buckets() {
        // SHIFT=1: bucket capacities 2, 4, 8, ...
        assert_eq!(MonologExp2::<1>::locate(0), (0, 0, 2));
        assert_eq!(MonologExp2::<1>::locate(1), (0, 1, 2));
        assert_eq!(MonologExp2::<1>::locate(2), (1, 0, 4));
        assert_eq!(MonologExp2::<1>::locate(5), (1, 3, 4));
        assert_eq!(MonologExp2::<1>::locate(6), (2, 0, 8));
        assert_eq!(MonologExp2::<1>::locate(13), (2, 7, 8));
        assert_eq!(MonologExp2::<1>::locate(14), (3, 0, 16));
    }

    #[test]
    fn test_push_and_get_in_order() {
        let log = MonologExp2::<2>::new();
        for v in 0..100u64 {
            assert_eq!(log.push(v * 3), v);
        }
        assert_eq!(log.size(), 100);
        for v in 0..100u64 {
            assert_eq!(log.get(v), v * 3);
        }
    }

    #[test]
    fn test_iter_matches_pushes() {
        let log = MonologExp2::<3>::new();
        log.push(7);
        log.push(8);
        log.push(9);
        let collected: Vec<u64> = log.iter().collect();
        assert_eq!(collected, vec![7, 8, 9]);
    }

    #[test]
    fn test_concurrent_pushes_are_dense() {
        let log = Arc::new(MonologExp2::<4>::new());
        let mut handles = Vec::new();
        for t in 0..4u64 {
            let log = Arc::clone(&log);
            handles.push(std::thread::spawn(move || {
                for i in 0..1000u64 {
                    log.push(t * 1000 + i);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(log.size(), 4000);
        let mut values: Vec<u64> = log.iter().collect();
        values.sort_unstable();
        values.dedup();
        assert_eq!(values.len(), 4000);
    }
}
