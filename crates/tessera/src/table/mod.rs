//! The table: orchestration of append, reads, and registrations.
//!
//! An append runs log-write → schema-apply → filter-update →
//! index-insert → flush → tail-publish:
//!
//! ```text
//! bytes ──► data log ──► record view ──► filters observe
//!                                   └──► indexed fields insert
//!                                              │
//!                        flush ◄───────────────┘
//!                          │
//!                     tail advance (publication point)
//! ```
//!
//! Filters and indexes complete before the tail covers the record, so a
//! reader that observes a covering tail also observes every side effect
//! of the append. Registration operations mutate append-only registries
//! of owned descriptors and write a descriptor record into metadata.

mod registry;

pub use registry::Registry;

use crate::error::{Error, Result};
use crate::index::RadixTree;
use crate::log::{DataLog, DataLogConfig, ReadTail};
use crate::meta::{MetadataWriter, META_FILE_NAME};
use crate::monitor::{
    AggregateKind, ExpressionCompiler, Filter, FilterConfig, Numeric, RelOp, Trigger,
};
use crate::schema::{ColumnType, Record, Schema};
use crate::storage::{InMemory, Mapped, StorageMode};
use crate::time::{Clock, SystemClock};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Construction-time capabilities and sizing of a table.
#[derive(Clone)]
pub struct TableConfig {
    /// Data log sizing.
    pub data_log: DataLogConfig,
    /// Window-table sizing applied to every registered filter.
    pub filter: FilterConfig,
    /// Time source for default append timestamps.
    pub clock: Arc<dyn Clock>,
    /// Expression compiler consumed by `add_filter`. Without one,
    /// `add_filter` fails with a management error.
    pub compiler: Option<Arc<dyn ExpressionCompiler>>,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            data_log: DataLogConfig::default(),
            filter: FilterConfig::default(),
            clock: Arc::new(SystemClock),
            compiler: None,
        }
    }
}

/// An append-only, schema-aware record store with in-line secondary
/// indexing and live filter evaluation.
///
/// Any number of threads may append concurrently with any number of
/// readers; readers are wait-free and gate on a snapshot of the read
/// tail.
pub struct Table<S: StorageMode = InMemory> {
    schema: Schema,
    data_log: DataLog<S>,
    read_tail: ReadTail,
    metadata: MetadataWriter,
    filters: Registry<Filter>,
    triggers: Registry<Trigger>,
    indexes: Registry<RadixTree>,
    filter_config: FilterConfig,
    clock: Arc<dyn Clock>,
    compiler: Option<Arc<dyn ExpressionCompiler>>,
}

impl Table<InMemory> {
    /// Creates an in-memory table with default configuration. Flushes
    /// are no-ops and registrations are not persisted.
    pub fn in_memory(schema: Schema) -> Self {
        Self::with_storage(schema, InMemory::new(), MetadataWriter::noop(), TableConfig::default())
    }

    /// Creates an in-memory table with explicit configuration.
    pub fn in_memory_with_config(schema: Schema, config: TableConfig) -> Self {
        Self::with_storage(schema, InMemory::new(), MetadataWriter::noop(), config)
    }
}

impl Table<Mapped> {
    /// Creates a file-backed table under `dir` with default
    /// configuration: data log buckets are memory-mapped files and
    /// registrations persist to `table.meta`.
    pub fn mapped(schema: Schema, dir: impl AsRef<Path>) -> Result<Self> {
        Self::mapped_with_config(schema, dir, TableConfig::default())
    }

    /// Creates a file-backed table with explicit configuration.
    pub fn mapped_with_config(
        schema: Schema,
        dir: impl AsRef<Path>,
        config: TableConfig,
    ) -> Result<Self> {
        let dir = dir.as_ref();
        let storage = Mapped::create(dir)?;
        let metadata = MetadataWriter::create(dir.join(META_FILE_NAME))?;
        Ok(Self::with_storage(schema, storage, metadata, config))
    }
}

impl<S: StorageMode> Table<S> {
    /// Creates a table over an explicit storage mode and metadata
    /// writer.
    pub fn with_storage(
        schema: Schema,
        storage: S,
        metadata: MetadataWriter,
        config: TableConfig,
    ) -> Self {
        Self {
            schema,
            data_log: DataLog::new(storage, config.data_log),
            read_tail: ReadTail::new(),
            metadata,
            filters: Registry::new(),
            triggers: Registry::new(),
            indexes: Registry::new(),
            filter_config: config.filter,
            clock: config.clock,
            compiler: config.compiler,
        }
    }

    /// The table's schema.
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Appends a record stamped with the injected clock's current time.
    /// See [`Table::append_at`].
    pub fn append(&self, bytes: &[u8]) -> Result<u64> {
        self.append_at(bytes, self.clock.now_ms())
    }

    /// Appends a packed record with an explicit ingest timestamp,
    /// returning the record's offset.
    ///
    /// The bytes are stored verbatim and must cover at least one schema
    /// stride. Once the extent is reserved the append cannot be
    /// retracted; post-reservation failures are fatal to the process by
    /// contract, and the only ones possible here are storage allocation
    /// failures surfaced as errors before any bytes are published.
    pub fn append_at(&self, bytes: &[u8], ts: u64) -> Result<u64> {
        if bytes.is_empty() {
            return Err(Error::Management(
                "cannot append an empty record".to_string(),
            ));
        }
        if bytes.len() < self.schema.stride() {
            return Err(Error::Management(format!(
                "record of {} bytes is shorter than the schema stride of {}",
                bytes.len(),
                self.schema.stride()
            )));
        }

        let reservation = self.data_log.reserve(bytes.len())?;
        let offset = reservation.offset();
        self.data_log.write(&reservation, bytes);

        let record = self.schema.apply(offset, bytes, ts)?;

        // Registry lengths are acquired once per append: a concurrently
        // registered filter or index covers this record or it does not.
        let nfilters = self.filters.len();
        for id in 0..nfilters {
            if let Some(filter) = self.filters.get(id) {
                filter.update(&record);
            }
        }

        for field in record.fields() {
            if field.is_indexed() {
                let index = self
                    .indexes
                    .get(field.index_id())
                    .expect("indexed column references an unregistered index");
                index.insert(&field.key(), offset);
            }
        }

        self.data_log.flush(offset, bytes.len())?;
        self.read_tail
            .advance(reservation.expected_tail(), reservation.end());
        Ok(offset)
    }

    /// Registers a secondary index on `field_name`, coarsening numeric
    /// keys by `bucket_size`. Returns the dense index id.
    ///
    /// Fails when the field does not exist, the bucket size is not
    /// positive, or the column is already indexed or indexing.
    pub fn add_index(&self, field_name: &str, bucket_size: f64) -> Result<usize> {
        let ordinal = self.schema.ordinal(field_name).ok_or_else(|| {
            Error::Management(format!(
                "could not add index for {field_name}: unknown field"
            ))
        })?;
        if !bucket_size.is_finite() || bucket_size <= 0.0 {
            return Err(Error::Management(format!(
                "could not add index for {field_name}: bucket size must be positive"
            )));
        }

        let column = &self.schema.columns()[ordinal];
        if !column.set_indexing() {
            return Err(Error::Management(format!(
                "could not index {field_name}: already indexed/indexing"
            )));
        }

        let tree = match column.ty() {
            ColumnType::Bool => RadixTree::boolean(),
            ty => RadixTree::for_width(ty.width()),
        };
        let index_id = self.indexes.push(Box::new(tree));
        column.set_indexed(index_id, bucket_size);
        self.metadata
            .write_index(index_id as u16, field_name, bucket_size)?;
        debug!(
            "indexed column {} (ordinal {}) as index {} with bucket size {}",
            field_name, ordinal, index_id, bucket_size
        );
        Ok(index_id)
    }

    /// Disables the index on `field_name`. The underlying radix tree is
    /// retained and historical inserts remain reachable through
    /// [`Table::index`].
    pub fn remove_index(&self, field_name: &str) -> Result<()> {
        let ordinal = self.schema.ordinal(field_name).ok_or_else(|| {
            Error::Management(format!(
                "could not remove index for {field_name}: unknown field"
            ))
        })?;
        if !self.schema.columns()[ordinal].disable_indexing() {
            return Err(Error::Management(format!(
                "could not remove index for {field_name}: no index exists"
            )));
        }
        debug!("removed index on column {}", field_name);
        Ok(())
    }

    /// Compiles `expression` and registers a filter with a
    /// `window_ms`-millisecond monitor window. Returns the dense filter
    /// id.
    pub fn add_filter(&self, expression: &str, window_ms: u64) -> Result<usize> {
        let compiler = self.compiler.as_ref().ok_or_else(|| {
            Error::Management(format!(
                "could not add filter {expression:?}: no expression compiler configured"
            ))
        })?;
        if window_ms == 0 {
            return Err(Error::Management(format!(
                "could not add filter {expression:?}: monitor window must be non-zero"
            )));
        }
        let compiled = compiler
            .compile(expression, &self.schema)
            .map_err(|e| Error::Management(format!("could not add filter: {e}")))?;
        let filter_id = self.filters.push(Box::new(Filter::new(
            compiled,
            window_ms,
            self.filter_config.clone(),
        )));
        self.metadata.write_filter(filter_id as u32, expression)?;
        debug!(
            "registered filter {} for {:?} with window {} ms",
            filter_id, expression, window_ms
        );
        Ok(filter_id)
    }

    /// Registers a trigger over `filter_id`'s aggregates. Returns the
    /// dense trigger id.
    pub fn add_trigger(
        &self,
        filter_id: usize,
        field_name: &str,
        agg: AggregateKind,
        op: RelOp,
        threshold: Numeric,
    ) -> Result<usize> {
        if filter_id >= self.filters.len() {
            return Err(Error::Management(format!(
                "could not add trigger: no filter with id {filter_id}"
            )));
        }
        if self.schema.ordinal(field_name).is_none() {
            return Err(Error::Management(format!(
                "could not add trigger for {field_name}: unknown field"
            )));
        }
        let trigger_id = self.triggers.push(Box::new(Trigger::new(
            filter_id,
            field_name,
            agg,
            op,
            threshold,
        )));
        self.metadata.write_trigger(
            trigger_id as u32,
            filter_id as u32,
            agg,
            field_name,
            op,
            threshold,
        )?;
        debug!(
            "registered trigger {} on filter {} ({:?} {:?} {:?})",
            trigger_id, filter_id, agg, op, threshold
        );
        Ok(trigger_id)
    }

    /// Copies `buf.len()` bytes at `offset` into `buf` if the published
    /// tail covers `offset`. Returns false (not found) otherwise.
    pub fn get(&self, offset: u64, buf: &mut [u8]) -> bool {
        self.read_at(offset, buf, self.read_tail.get())
    }

    /// Like [`Table::get`] against a caller-snapshotted tail, so a scan
    /// can reuse one snapshot across many reads.
    pub fn read_at(&self, offset: u64, buf: &mut [u8], tail: u64) -> bool {
        if offset < tail {
            self.data_log.read(offset, buf);
            true
        } else {
            false
        }
    }

    /// Raw pointer to the record at `offset`, or None when the tail does
    /// not cover it. Valid for reads of the record's extent.
    pub fn ptr(&self, offset: u64) -> Option<*const u8> {
        self.ptr_at(offset, self.read_tail.get())
    }

    /// Like [`Table::ptr`] against a caller-snapshotted tail.
    pub fn ptr_at(&self, offset: u64, tail: u64) -> Option<*const u8> {
        if offset < tail {
            Some(self.data_log.ptr(offset))
        } else {
            None
        }
    }

    /// Decodes the record at `offset` against the schema, reading the
    /// ingest timestamp from the record's timestamp slot. Returns None
    /// when the tail does not cover the offset.
    pub fn record_at(&self, offset: u64) -> Option<Record<'_>> {
        if offset >= self.read_tail.get() {
            return None;
        }
        let stride = self.schema.stride();
        // Safety: offsets below the tail point at fully written records
        // of at least one stride that never straddle a bucket.
        let data = unsafe { std::slice::from_raw_parts(self.data_log.ptr(offset), stride) };
        let ts = u64::from_le_bytes(data[..8].try_into().expect("timestamp slot"));
        self.schema.apply(offset, data, ts).ok()
    }

    /// The published read tail: the upper bound of valid offsets, and
    /// the table's size in log bytes.
    pub fn num_records(&self) -> u64 {
        self.read_tail.get()
    }

    /// The filter registered under `id`.
    pub fn filter(&self, id: usize) -> Option<&Filter> {
        self.filters.get(id)
    }

    /// The trigger registered under `id`.
    pub fn trigger(&self, id: usize) -> Option<&Trigger> {
        self.triggers.get(id)
    }

    /// The index registered under `id`. Disabled indexes remain
    /// reachable here.
    pub fn index(&self, id: usize) -> Option<&RadixTree> {
        self.indexes.get(id)
    }

    /// Number of registered filters.
    pub fn num_filters(&self) -> usize {
        self.filters.len()
    }

    /// Number of registered triggers.
    pub fn num_triggers(&self) -> usize {
        self.triggers.len()
    }

    /// Number of registered indexes, including disabled ones.
    pub fn num_indexes(&self) -> usize {
        self.indexes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{RecordBuilder, SchemaBuilder, Value};

    fn schema() -> Schema {
        SchemaBuilder::new()
            .column("id", ColumnType::Int)
            .column("val", ColumnType::Double)
            .build()
            .unwrap()
    }

    fn record(schema: &Schema, id: i32, val: f64) -> Vec<u8> {
        let mut b = RecordBuilder::new(schema);
        b.set(0, Value::Int(id)).unwrap();
        b.set(1, Value::Double(val)).unwrap();
        b.finish()
    }

    #[test]
    fn test_append_then_get_roundtrip() {
        let table = Table::in_memory(schema());
        let bytes = record(table.schema(), 1, 3.14);
        let offset = table.append_at(&bytes, 1_000).unwrap();
        assert_eq!(offset, 0);
        assert_eq!(table.num_records(), bytes.len() as u64);

        let mut buf = vec![0u8; bytes.len()];
        assert!(table.get(0, &mut buf));
        assert_eq!(buf, bytes);
    }

    #[test]
    fn test_get_at_tail_is_not_found() {
        let table = Table::in_memory(schema());
        let bytes = record(table.schema(), 1, 1.0);
        table.append_at(&bytes, 0).unwrap();
        let mut buf = [0u8; 1];
        assert!(!table.get(table.num_records(), &mut buf));
    }

    #[test]
    fn test_empty_append_is_rejected() {
        let table = Table::in_memory(schema());
        assert!(matches!(
            table.append_at(&[], 0),
            Err(Error::Management(_))
        ));
    }

    #[test]
    fn test_short_append_is_rejected() {
        let table = Table::in_memory(schema());
        assert!(matches!(
            table.append_at(&[0u8; 8], 0),
            Err(Error::Management(_))
        ));
    }

    #[test]
    fn test_record_at_decodes_stored_timestamp() {
        let table = Table::in_memory(schema());
        let schema = table.schema();
        let mut b = RecordBuilder::new(schema).ts(77);
        b.set(1, Value::Double(2.5)).unwrap();
        let bytes = b.finish();
        let offset = table.append_at(&bytes, 77).unwrap();

        let view = table.record_at(offset).unwrap();
        assert_eq!(view.ts(), 77);
        assert_eq!(view.field(1).value(), Value::Double(2.5));
        assert!(table.record_at(table.num_records()).is_none());
    }
}
