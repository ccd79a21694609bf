//! Lock-free append-only log structures.
//!
//! Three primitives live here, all built on the same discipline of
//! atomically reserved extents and release-published state:
//!
//! - [`DataLog`]: the byte-addressed record log. Writers reserve
//!   contiguous extents with an atomic cursor; bucket backing regions are
//!   allocated on first touch through a [`StorageMode`].
//! - [`MonologExp2`] / [`RefLog`]: an exponentially-bucketed append-only
//!   array of 64-bit words, used for index posting lists and the
//!   descriptor registries.
//! - [`ReadTail`]: the published upper bound of valid offsets, advanced
//!   strictly in reservation order.
//!
//! [`StorageMode`]: crate::storage::StorageMode

mod exp2;
mod linear;
mod read_tail;

pub use exp2::{MonologExp2, RefLog, EXP2_BUCKETS, REFLOG_BASE_SHIFT};
pub use linear::{DataLog, DataLogConfig, Reservation, DEFAULT_BUCKET_BYTES, DEFAULT_MAX_BUCKETS};
pub use read_tail::ReadTail;
