//! Schema: column metadata, case-folded name lookup, and tuple decoding.
//!
//! A schema is an ordered sequence of columns plus a fixed record stride.
//! The stride is the sum of the column widths plus a 16-byte prelude for
//! the timestamp and offset slots:
//!
//! ```text
//! ┌──────────────┬──────────────┬────────────────────────────┐
//! │ ts (u64, LE) │ offset (u64) │ columns in schema order    │
//! └──────────────┴──────────────┴────────────────────────────┘
//! ```
//!
//! The schema is immutable after construction except for each column's
//! indexing state, which transitions atomically under concurrent
//! appends.

mod column;
pub mod key;
mod record;

pub use column::{Column, ColumnType, IndexState};
pub use record::{Field, Record, RecordBuilder, Value};

use crate::error::{Error, Result};
use std::collections::HashMap;

/// Bytes reserved at the front of every record for the timestamp and
/// offset slots.
pub const RECORD_PRELUDE_BYTES: usize = 16;

/// An ordered sequence of columns with case-insensitive name lookup.
#[derive(Debug)]
pub struct Schema {
    columns: Vec<Column>,
    name_map: HashMap<String, usize>,
    stride: usize,
}

impl Schema {
    /// Builds a schema from `(name, type)` pairs. Duplicate names
    /// (case-insensitive) and empty schemas are rejected.
    pub fn new(columns: Vec<(String, ColumnType)>) -> Result<Self> {
        if columns.is_empty() {
            return Err(Error::Management("schema has no columns".to_string()));
        }
        let mut built = Vec::with_capacity(columns.len());
        let mut name_map = HashMap::with_capacity(columns.len());
        let mut offset = RECORD_PRELUDE_BYTES;
        for (ordinal, (name, ty)) in columns.into_iter().enumerate() {
            let folded = name.to_uppercase();
            if name_map.insert(folded, ordinal).is_some() {
                return Err(Error::Management(format!(
                    "duplicate column name {name}"
                )));
            }
            built.push(Column::new(name, ordinal, ty, offset));
            offset += ty.width();
        }
        Ok(Self {
            columns: built,
            name_map,
            stride: offset,
        })
    }

    /// The columns in schema order.
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Case-insensitive name lookup.
    pub fn ordinal(&self, name: &str) -> Option<usize> {
        self.name_map.get(&name.to_uppercase()).copied()
    }

    /// Fixed record stride: prelude plus the sum of column widths.
    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Constructs a record view over `data` for the record at `offset`
    /// with ingest timestamp `ts`.
    ///
    /// `data` must cover at least one stride; appends shorter than the
    /// stride are rejected before reservation.
    pub fn apply<'a>(&'a self, offset: u64, data: &'a [u8], ts: u64) -> Result<Record<'a>> {
        if data.len() < self.stride {
            return Err(Error::Management(format!(
                "record of {} bytes is shorter than the schema stride of {}",
                data.len(),
                self.stride
            )));
        }
        Ok(Record::new(self, data, offset, ts))
    }
}

/// Chainable schema construction.
///
/// # Examples
/// ```rust,ignore
/// use tessera::schema::{ColumnType, SchemaBuilder};
///
/// let schema = SchemaBuilder::new()
///     .column("id", ColumnType::Int)
///     .column("val", ColumnType::Double)
///     .build()?;
/// ```
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    columns: Vec<(String, ColumnType)>,
}

impl SchemaBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a column.
    pub fn column(mut self, name: impl Into<String>, ty: ColumnType) -> Self {
        self.columns.push((name.into(), ty));
        self
    }

    /// Builds the schema.
    pub fn build(self) -> Result<Schema> {
        Schema::new(self.columns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stride_is_prelude_plus_widths() {
        let schema = SchemaBuilder::new()
            .column("id", ColumnType::Int)
            .column("val", ColumnType::Double)
            .build()
            .unwrap();
        assert_eq!(schema.stride(), 16 + 4 + 8);
    }

    #[test]
    fn test_name_lookup_is_case_insensitive() {
        let schema = SchemaBuilder::new()
            .column("Val", ColumnType::Double)
            .build()
            .unwrap();
        assert_eq!(schema.ordinal("val"), Some(0));
        assert_eq!(schema.ordinal("VAL"), Some(0));
        assert_eq!(schema.ordinal("missing"), None);
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let result = SchemaBuilder::new()
            .column("a", ColumnType::Int)
            .column("A", ColumnType::Long)
            .build();
        assert!(matches!(result, Err(Error::Management(_))));
    }

    #[test]
    fn test_empty_schema_rejected() {
        assert!(matches!(
            SchemaBuilder::new().build(),
            Err(Error::Management(_))
        ));
    }

    #[test]
    fn test_column_offsets_are_packed() {
        let schema = SchemaBuilder::new()
            .column("a", ColumnType::Bool)
            .column("b", ColumnType::Short)
            .column("c", ColumnType::Long)
            .build()
            .unwrap();
        let offsets: Vec<usize> = schema.columns().iter().map(|c| c.offset()).collect();
        assert_eq!(offsets, vec![16, 17, 19]);
        assert_eq!(schema.stride(), 27);
    }

    #[test]
    fn test_apply_rejects_short_records() {
        let schema = SchemaBuilder::new()
            .column("id", ColumnType::Int)
            .build()
            .unwrap();
        assert!(schema.apply(0, &[0u8; 4], 0).is_err());
    }
}
