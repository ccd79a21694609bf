//! Fixed-stride bucketed byte log with atomic extent reservation.

use crate::error::{Error, Result};
use crate::storage::StorageMode;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicPtr, AtomicU64, Ordering};

/// Default bucket stride: 1 MiB.
pub const DEFAULT_BUCKET_BYTES: usize = 1 << 20;

/// Default bucket count: 1024 buckets (1 GiB total capacity).
pub const DEFAULT_MAX_BUCKETS: usize = 1024;

/// Slot marker while a bucket allocation is in flight. Losers of the
/// allocation race spin until the winner publishes the real pointer.
const ALLOCATING: *mut u8 = 1 as *mut u8;

/// Sizing of a [`DataLog`].
#[derive(Debug, Clone)]
pub struct DataLogConfig {
    /// Bytes per bucket. A single reservation never exceeds this, and no
    /// reservation straddles a bucket boundary.
    pub bucket_bytes: usize,
    /// Maximum number of buckets; total capacity is
    /// `bucket_bytes * max_buckets`.
    pub max_buckets: usize,
}

impl Default for DataLogConfig {
    fn default() -> Self {
        Self {
            bucket_bytes: DEFAULT_BUCKET_BYTES,
            max_buckets: DEFAULT_MAX_BUCKETS,
        }
    }
}

/// A contiguous extent handed out by [`DataLog::reserve`].
///
/// The extent may be preceded by padding bytes when the reservation was
/// rounded up to a bucket boundary; `expected_tail` is the log position
/// the reservation chain started at, which the read tail must reach
/// before this record publishes.
#[derive(Debug)]
pub struct Reservation {
    offset: u64,
    expected_tail: u64,
    len: usize,
}

impl Reservation {
    /// Byte position of the record's first byte; the record's identifier.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Length of the reserved extent.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the reservation is empty. Reservations produced by the
    /// table are never empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Tail value the publishing chain must reach before this record's
    /// extent (including any boundary padding) becomes visible.
    pub fn expected_tail(&self) -> u64 {
        self.expected_tail
    }

    /// First offset past the reserved extent; the tail value this record
    /// publishes.
    pub fn end(&self) -> u64 {
        self.offset + self.len as u64
    }
}

/// Lock-free append-only byte log over a [`StorageMode`].
///
/// Capacity is partitioned into fixed-size buckets allocated on first
/// touch. Writers reserve contiguous extents via an atomic write cursor;
/// concurrent reservers never overlap, and no extent straddles a bucket
/// boundary (the cursor rounds up to the next bucket when the remaining
/// space is insufficient).
#[derive(Debug)]
pub struct DataLog<S: StorageMode> {
    storage: S,
    config: DataLogConfig,
    buckets: Box<[AtomicPtr<u8>]>,
    write_cursor: AtomicU64,
}

impl<S: StorageMode> DataLog<S> {
    /// Creates an empty log over `storage` with the given sizing.
    pub fn new(storage: S, config: DataLogConfig) -> Self {
        assert!(config.bucket_bytes > 0, "bucket_bytes must be non-zero");
        assert!(config.max_buckets > 0, "max_buckets must be non-zero");
        let buckets = (0..config.max_buckets)
            .map(|_| AtomicPtr::new(ptr::null_mut()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            storage,
            config,
            buckets,
            write_cursor: AtomicU64::new(0),
        }
    }

    /// Total byte capacity of the log.
    pub fn capacity(&self) -> u64 {
        self.config.bucket_bytes as u64 * self.config.max_buckets as u64
    }

    /// Reserves a contiguous `len`-byte extent.
    ///
    /// The returned offset is the record identifier. When the current
    /// bucket cannot fit `len` bytes, the cursor skips to the next bucket
    /// boundary and the padding belongs to this reservation for
    /// tail-advance purposes.
    pub fn reserve(&self, len: usize) -> Result<Reservation> {
        debug_assert!(len > 0, "zero-length reservations are rejected upstream");
        let bucket_bytes = self.config.bucket_bytes as u64;
        if len as u64 > bucket_bytes {
            return Err(Error::Invariant(format!(
                "record of {len} bytes exceeds the bucket stride of {bucket_bytes} bytes"
            )));
        }
        loop {
            let cur = self.write_cursor.load(Ordering::Relaxed);
            let remaining = bucket_bytes - cur % bucket_bytes;
            let offset = if len as u64 <= remaining {
                cur
            } else {
                cur + remaining
            };
            let end = offset + len as u64;
            if end > self.capacity() {
                return Err(Error::Invariant(format!(
                    "data log capacity of {} bytes exceeded",
                    self.capacity()
                )));
            }
            if self
                .write_cursor
                .compare_exchange_weak(cur, end, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                self.ensure_bucket((offset / bucket_bytes) as usize)?;
                return Ok(Reservation {
                    offset,
                    expected_tail: cur,
                    len,
                });
            }
        }
    }

    /// Copies `bytes` into the reserved extent.
    ///
    /// `bytes` must not be longer than the reservation.
    pub fn write(&self, reservation: &Reservation, bytes: &[u8]) {
        assert!(
            bytes.len() <= reservation.len,
            "write of {} bytes into a {}-byte reservation",
            bytes.len(),
            reservation.len
        );
        let base = self.bucket_ptr(reservation.offset);
        let within = (reservation.offset % self.config.bucket_bytes as u64) as usize;
        // Safety: the extent [offset, offset + len) lies inside a single
        // allocated bucket and is exclusively owned by this reservation.
        unsafe {
            ptr::copy_nonoverlapping(bytes.as_ptr(), base.add(within), bytes.len());
        }
    }

    /// Durability barrier over the extent. A no-op for in-memory storage.
    pub fn flush(&self, offset: u64, len: usize) -> Result<()> {
        let bucket_bytes = self.config.bucket_bytes as u64;
        let bucket = (offset / bucket_bytes) as usize;
        let within = (offset % bucket_bytes) as usize;
        self.storage.flush(bucket, within, len)
    }

    /// Copies `dst.len()` bytes starting at `offset` into `dst`.
    ///
    /// The caller must have observed a read tail covering the range; every
    /// bucket under a published tail is allocated, so the read cannot
    /// fault.
    pub fn read(&self, offset: u64, dst: &mut [u8]) {
        let bucket_bytes = self.config.bucket_bytes as u64;
        let mut pos = offset;
        let mut copied = 0usize;
        while copied < dst.len() {
            let base = self.bucket_ptr(pos);
            let within = (pos % bucket_bytes) as usize;
            let chunk = usize::min(
                dst.len() - copied,
                self.config.bucket_bytes - within,
            );
            // Safety: the range lies inside an allocated bucket, and bytes
            // below the tail are never mutated again.
            unsafe {
                ptr::copy_nonoverlapping(base.add(within), dst.as_mut_ptr().add(copied), chunk);
            }
            pos += chunk as u64;
            copied += chunk;
        }
    }

    /// Raw pointer to the byte at `offset`.
    ///
    /// Valid for reads up to the end of the offset's bucket; records never
    /// straddle buckets, so a record pointer covers the whole record. The
    /// same tail precondition as [`DataLog::read`] applies.
    pub fn ptr(&self, offset: u64) -> *const u8 {
        let within = (offset % self.config.bucket_bytes as u64) as usize;
        // Safety: pointer arithmetic stays inside the bucket region.
        unsafe { self.bucket_ptr(offset).add(within) as *const u8 }
    }

    fn bucket_ptr(&self, offset: u64) -> *mut u8 {
        let bucket = (offset / self.config.bucket_bytes as u64) as usize;
        let p = self.buckets[bucket].load(Ordering::Acquire);
        assert!(
            !p.is_null() && p != ALLOCATING,
            "access to unallocated bucket {bucket}"
        );
        p
    }

    /// Allocates the bucket on first touch. Exactly one thread performs
    /// the allocation; racing threads spin until the pointer is published.
    fn ensure_bucket(&self, bucket: usize) -> Result<NonNull<u8>> {
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
                    match self.storage.allocate(bucket, self.config.bucket_bytes) {
                        Ok(region) => {
                            slot.store(region.as_ptr(), Ordering::Release);
                            return Ok(region);
                        }
                        Err(e) => {
                            slot.store(ptr::null_mut(), Ordering::Release);
                            return Err(e);
                        }
                    }
                }
            } else if p == ALLOCATING {
                std::hint::spin_loop();
            } else {
                // Safety: published pointers are never null.
                return Ok(unsafe { NonNull::new_unchecked(p) });
            }
        }
    }
}
