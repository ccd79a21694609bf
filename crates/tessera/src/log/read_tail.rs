//! Published read tail: the writer/reader synchronization boundary.

use std::sync::atomic::{AtomicU64, Ordering};

/// Spins this many times before yielding the thread while waiting for a
/// predecessor append to publish.
const SPINS_BEFORE_YIELD: u32 = 128;

/// A single published monotonic byte offset.
///
/// Readers treat the log as valid over `[0, tail)`. The tail is the only
/// synchronizes-with edge between writers and readers: every side effect
/// of an append (bytes written, filters updated, indexes inserted)
/// happens-before any reader's acquire-load that observes a covering
/// tail.
///
/// Publication is strict: an append publishes only after the tail has
/// reached the log position its reservation chain started at, so the
/// tail never uncovers a byte whose owning append has not completed.
#[derive(Debug, Default)]
pub struct ReadTail {
    tail: AtomicU64,
}

impl ReadTail {
    /// Creates a tail at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the published tail (acquire).
    pub fn get(&self) -> u64 {
        self.tail.load(Ordering::Acquire)
    }

    /// Publishes `new_tail` once the tail reaches `expected`.
    ///
    /// `expected` is the pre-reservation cursor of the corresponding
    /// append, so publications occur strictly in reservation order;
    /// exactly one in-flight append waits on each value. Calling with
    /// `new_tail < expected` is a contract violation and panics.
    pub fn advance(&self, expected: u64, new_tail: u64) {
        assert!(
            new_tail >= expected,
            "non-monotonic tail advance: {new_tail} < {expected}"
        );
        let mut spins = 0u32;
        while self.tail.load(Ordering::Acquire) != expected {
            spins += 1;
            if spins % SPINS_BEFORE_YIELD == 0 {
                std::thread::yield_now();
            } else {
                std::hint::spin_loop();
            }
        }
        self.tail.store(new_tail, Ordering::Release);
    }
}
