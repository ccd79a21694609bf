//! Record and field views: lightweight decodings over a byte extent.

use crate::error::{Error, Result};
use crate::schema::column::{Column, ColumnType};
use crate::schema::{key, Schema};

/// A decoded column value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value<'a> {
    /// Boolean value.
    Bool(bool),
    /// Raw byte value.
    Char(u8),
    /// 16-bit integer.
    Short(i16),
    /// 32-bit integer.
    Int(i32),
    /// 64-bit integer.
    Long(i64),
    /// 32-bit float.
    Float(f32),
    /// 64-bit float.
    Double(f64),
    /// String bytes with the NUL padding trimmed.
    Str(&'a [u8]),
}

/// A decoding over one record's byte extent.
///
/// Iteration yields [`Field`] views in column order. The view borrows
/// the record bytes; it performs no copies.
#[derive(Debug, Clone, Copy)]
pub struct Record<'a> {
    schema: &'a Schema,
    data: &'a [u8],
    offset: u64,
    ts: u64,
}

impl<'a> Record<'a> {
    pub(crate) fn new(schema: &'a Schema, data: &'a [u8], offset: u64, ts: u64) -> Self {
        Self {
            schema,
            data,
            offset,
            ts,
        }
    }

    /// The record's identifier: the byte position of its first byte in
    /// the data log.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// The record's ingest timestamp in milliseconds.
    pub fn ts(&self) -> u64 {
        self.ts
    }

    /// The record's raw bytes, as appended.
    pub fn bytes(&self) -> &'a [u8] {
        self.data
    }

    /// Field view for `ordinal`. An out-of-range ordinal is a contract
    /// violation and panics.
    pub fn field(&self, ordinal: usize) -> Field<'a> {
        let column = &self.schema.columns()[ordinal];
        let start = column.offset();
        Field {
            column,
            bytes: &self.data[start..start + column.ty().width()],
        }
    }

    /// Iterates field views in column order.
    pub fn fields(&self) -> impl Iterator<Item = Field<'a>> + '_ {
        (0..self.schema.columns().len()).map(move |i| self.field(i))
    }
}

/// A typed view over one field of a record.
#[derive(Debug, Clone, Copy)]
pub struct Field<'a> {
    column: &'a Column,
    bytes: &'a [u8],
}

impl<'a> Field<'a> {
    /// Position of the field's column in the schema.
    pub fn ordinal(&self) -> usize {
        self.column.ordinal()
    }

    /// Typed extent of the field.
    pub fn ty(&self) -> ColumnType {
        self.column.ty()
    }

    /// Whether the field's column currently routes keys into an index.
    pub fn is_indexed(&self) -> bool {
        self.column.is_indexed()
    }

    /// Id of the column's index; meaningful only while indexed.
    pub fn index_id(&self) -> usize {
        self.column.index_id()
    }

    /// The field's packed bytes within the record.
    pub fn bytes(&self) -> &'a [u8] {
        self.bytes
    }

    /// Decodes the field value.
    pub fn value(&self) -> Value<'a> {
        match self.column.ty() {
            ColumnType::Bool => Value::Bool(self.bytes[0] != 0),
            ColumnType::Char => Value::Char(self.bytes[0]),
            ColumnType::Short => {
                Value::Short(i16::from_le_bytes([self.bytes[0], self.bytes[1]]))
            }
            ColumnType::Int => Value::Int(i32::from_le_bytes(
                self.bytes.try_into().expect("int extent"),
            )),
            ColumnType::Long => Value::Long(i64::from_le_bytes(
                self.bytes.try_into().expect("long extent"),
            )),
            ColumnType::Float => Value::Float(f32::from_le_bytes(
                self.bytes.try_into().expect("float extent"),
            )),
            ColumnType::Double => Value::Double(f64::from_le_bytes(
                self.bytes.try_into().expect("double extent"),
            )),
            ColumnType::String(_) => {
                let end = self
                    .bytes
                    .iter()
                    .rposition(|&b| b != 0)
                    .map_or(0, |p| p + 1);
                Value::Str(&self.bytes[..end])
            }
        }
    }

    /// Numeric projection of the field, used by filter aggregates.
    /// Strings have no numeric projection.
    pub fn as_f64(&self) -> Option<f64> {
        match self.value() {
            Value::Bool(b) => Some(f64::from(u8::from(b))),
            Value::Char(c) => Some(f64::from(c)),
            Value::Short(v) => Some(f64::from(v)),
            Value::Int(v) => Some(f64::from(v)),
            Value::Long(v) => Some(v as f64),
            Value::Float(v) => Some(f64::from(v)),
            Value::Double(v) => Some(v),
            Value::Str(_) => None,
        }
    }

    /// The field's order-preserving index key, coarsened by the column's
    /// bucket size.
    pub fn key(&self) -> Vec<u8> {
        key::encode_key(self.column.ty(), self.bytes, self.column.bucket_size())
    }
}

/// Packs typed values into the on-log record layout:
/// `[u64 ts][u64 offset][columns in schema order]`, little-endian.
#[derive(Debug)]
pub struct RecordBuilder<'a> {
    schema: &'a Schema,
    buf: Vec<u8>,
}

impl<'a> RecordBuilder<'a> {
    /// Creates a zeroed record of the schema's stride.
    pub fn new(schema: &'a Schema) -> Self {
        Self {
            schema,
            buf: vec![0u8; schema.stride()],
        }
    }

    /// Writes the timestamp slot.
    pub fn ts(mut self, ts: u64) -> Self {
        self.buf[..8].copy_from_slice(&ts.to_le_bytes());
        self
    }

    /// Packs `value` into the column at `ordinal`.
    ///
    /// Fails with a management error on a type mismatch or a string
    /// longer than the column width.
    pub fn set(&mut self, ordinal: usize, value: Value<'_>) -> Result<&mut Self> {
        let column = self.schema.columns().get(ordinal).ok_or_else(|| {
            Error::Management(format!("no column at ordinal {ordinal}"))
        })?;
        let start = column.offset();
        let width = column.ty().width();
        let slot = &mut self.buf[start..start + width];
        match (column.ty(), value) {
            (ColumnType::Bool, Value::Bool(b)) => slot[0] = u8::from(b),
            (ColumnType::Char, Value::Char(c)) => slot[0] = c,
            (ColumnType::Short, Value::Short(v)) => slot.copy_from_slice(&v.to_le_bytes()),
            (ColumnType::Int, Value::Int(v)) => slot.copy_from_slice(&v.to_le_bytes()),
            (ColumnType::Long, Value::Long(v)) => slot.copy_from_slice(&v.to_le_bytes()),
            (ColumnType::Float, Value::Float(v)) => slot.copy_from_slice(&v.to_le_bytes()),
            (ColumnType::Double, Value::Double(v)) => slot.copy_from_slice(&v.to_le_bytes()),
            (ColumnType::String(width), Value::Str(bytes)) => {
                if bytes.len() > width as usize {
                    return Err(Error::Management(format!(
                        "string of {} bytes exceeds column width {width} for {}",
                        bytes.len(),
                        column.name()
                    )));
                }
                slot[..bytes.len()].copy_from_slice(bytes);
                slot[bytes.len()..].fill(0);
            }
            (ty, value) => {
                return Err(Error::Management(format!(
                    "type mismatch for column {}: cannot pack {value:?} into {ty:?}",
                    column.name()
                )));
            }
        }
        Ok(self)
    }

    /// Returns the packed record bytes.
    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}
