//! Tessera - append-only schema-aware record store.
//!
//! This crate provides an in-process table of packed binary records with
//! in-line secondary indexing and live filter/trigger evaluation over
//! the ingest stream. Each append returns a monotonically increasing
//! byte offset that serves as the record's identifier; readers observe
//! a record only after the published read tail has advanced past its
//! extent.
//!
//! # Components
//!
//! - [`Table`]: orchestrates append, reads, and registrations
//! - [`Schema`] / [`RecordBuilder`]: column metadata and tuple packing
//! - [`RadixTree`]: per-column secondary index with reflog posting lists
//! - [`Filter`] / [`Trigger`]: streaming evaluation with windowed
//!   aggregates
//! - [`StorageMode`]: in-memory and memory-mapped backing for the data
//!   log
//!
//! # Example
//!
//! ```rust,ignore
//! use tessera::{ColumnType, RecordBuilder, SchemaBuilder, Table, Value};
//!
//! let schema = SchemaBuilder::new()
//!     .column("id", ColumnType::Int)
//!     .column("val", ColumnType::Double)
//!     .build()?;
//! let table = Table::in_memory(schema);
//!
//! table.add_index("val", 1.0)?;
//!
//! let mut record = RecordBuilder::new(table.schema());
//! record.set(0, Value::Int(1))?;
//! record.set(1, Value::Double(3.14))?;
//! let offset = table.append_at(&record.finish(), 1_000)?;
//!
//! let mut buf = vec![0u8; table.schema().stride()];
//! assert!(table.get(offset, &mut buf));
//! ```

#![deny(missing_docs)]

pub mod error;
pub mod index;
pub mod log;
pub mod meta;
pub mod monitor;
pub mod schema;
pub mod storage;
pub mod table;
pub mod time;

pub use error::{Error, Result};
pub use index::RadixTree;
pub use log::{DataLog, DataLogConfig, MonologExp2, ReadTail, RefLog};
pub use meta::{read_descriptors, Descriptor, MetadataWriter};
pub use monitor::{
    Aggregate, AggregateKind, CompiledFilter, ExprError, ExpressionCompiler, Filter,
    FilterConfig, Numeric, RelOp, Trigger,
};
pub use schema::{Column, ColumnType, Field, IndexState, Record, RecordBuilder, Schema,
    SchemaBuilder, Value};
pub use storage::{InMemory, Mapped, StorageMode};
pub use table::{Table, TableConfig};
pub use time::{Clock, ManualClock, SystemClock};
