//! Error and Result types for Tessera operations.

use std::io;
use thiserror::Error;

/// A convenience `Result` type for Tessera operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type for table, storage, and metadata operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A management operation failed: unknown field name, unsupported
    /// indexing state, malformed expression, bad registration argument.
    /// The message carries the offending field or expression text verbatim.
    #[error("management error: {0}")]
    Management(String),

    /// Underlying I/O error from the storage mode or the metadata file.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// A contract violation, such as reserving past the configured data
    /// log capacity. Violations detected on the append hot path (a
    /// non-monotonic tail advance, an out-of-range field ordinal) panic
    /// instead: the record's offset is already reserved and cannot be
    /// retracted.
    #[error("invariant violation: {0}")]
    Invariant(String),
}
