//! Durable metadata: an append-only file of registration descriptors.
//!
//! Every successful `add_index` / `add_filter` / `add_trigger` writes a
//! descriptor record so registrations survive the process. The file
//! layout:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  File Header (6 bytes)                                       │
//! │  - Magic: "TMET" (4 bytes)                                   │
//! │  - Version: u16 = 1                                          │
//! ├──────────────────────────────────────────────────────────────┤
//! │  Descriptor records (repeated)                               │
//! │  - Kind: u8 (0x01 index, 0x02 filter, 0x03 trigger)          │
//! │  - Length: u32 (payload bytes)                               │
//! │  - Payload (see below)                                       │
//! └──────────────────────────────────────────────────────────────┘
//!
//! Index payload:   u16 id, u16 name len, name bytes, f64 bucket size
//! Filter payload:  u32 id, u32 expression len, expression bytes
//! Trigger payload: u32 id, u32 filter id, u8 aggregate kind,
//!                  u16 name len, name bytes, u8 relop kind,
//!                  16-byte tagged numeric threshold
//! ```
//!
//! All integers are little-endian. Each write is flushed and synced
//! before the registration returns.

use crate::error::{Error, Result};
use crate::monitor::{AggregateKind, Numeric, RelOp};
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::sync::Mutex;
use tracing::debug;

/// Metadata file magic bytes.
pub const META_MAGIC: [u8; 4] = *b"TMET";

/// Metadata file format version.
pub const META_VERSION: u16 = 1;

/// Default metadata file name inside a mapped table directory.
pub const META_FILE_NAME: &str = "table.meta";

const KIND_INDEX: u8 = 0x01;
const KIND_FILTER: u8 = 0x02;
const KIND_TRIGGER: u8 = 0x03;

/// A descriptor recovered from a metadata file.
#[derive(Debug, Clone, PartialEq)]
pub enum Descriptor {
    /// An index registration.
    Index {
        /// Dense index id.
        id: u16,
        /// Indexed field name, as registered.
        field: String,
        /// Key-coarsening bucket size.
        bucket_size: f64,
    },
    /// A filter registration.
    Filter {
        /// Dense filter id.
        id: u32,
        /// Expression source, verbatim.
        expression: String,
    },
    /// A trigger registration.
    Trigger {
        /// Dense trigger id.
        id: u32,
        /// Id of the watched filter.
        filter_id: u32,
        /// Watched aggregate.
        agg: AggregateKind,
        /// Aggregated field name.
        field: String,
        /// Comparison operator.
        op: RelOp,
        /// Threshold value.
        threshold: Numeric,
    },
}

/// Appends registration descriptors to the metadata file.
///
/// An in-memory table runs with a no-op writer; a mapped table writes
/// `table.meta` inside its directory.
#[derive(Debug)]
pub struct MetadataWriter {
    file: Option<Mutex<BufWriter<File>>>,
}

impl MetadataWriter {
    /// A writer that records nothing.
    pub fn noop() -> Self {
        Self { file: None }
    }

    /// Opens (creating or appending to) the metadata file at `path`.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        let mut writer = BufWriter::new(file);
        if writer.get_ref().metadata()?.len() == 0 {
            writer.write_all(&META_MAGIC)?;
            writer.write_all(&META_VERSION.to_le_bytes())?;
            writer.flush()?;
        }
        debug!("metadata file open at {}", path.display());
        Ok(Self {
            file: Some(Mutex::new(writer)),
        })
    }

    /// Writes an index descriptor.
    pub fn write_index(&self, id: u16, field: &str, bucket_size: f64) -> Result<()> {
        let name = field.as_bytes();
        let mut payload = Vec::with_capacity(2 + 2 + name.len() + 8);
        payload.extend_from_slice(&id.to_le_bytes());
        payload.extend_from_slice(&(name.len() as u16).to_le_bytes());
        payload.extend_from_slice(name);
        payload.extend_from_slice(&bucket_size.to_le_bytes());
        self.write_record(KIND_INDEX, &payload)
    }

    /// Writes a filter descriptor.
    pub fn write_filter(&self, id: u32, expression: &str) -> Result<()> {
        let expr = expression.as_bytes();
        let mut payload = Vec::with_capacity(4 + 4 + expr.len());
        payload.extend_from_slice(&id.to_le_bytes());
        payload.extend_from_slice(&(expr.len() as u32).to_le_bytes());
        payload.extend_from_slice(expr);
        self.write_record(KIND_FILTER, &payload)
    }

    /// Writes a trigger descriptor.
    pub fn write_trigger(
        &self,
        id: u32,
        filter_id: u32,
        agg: AggregateKind,
        field: &str,
        op: RelOp,
        threshold: Numeric,
    ) -> Result<()> {
        let name = field.as_bytes();
        let mut payload = Vec::with_capacity(4 + 4 + 1 + 2 + name.len() + 1 + 16);
        payload.extend_from_slice(&id.to_le_bytes());
        payload.extend_from_slice(&filter_id.to_le_bytes());
        payload.push(agg as u8);
        payload.extend_from_slice(&(name.len() as u16).to_le_bytes());
        payload.extend_from_slice(name);
        payload.push(op as u8);
        payload.extend_from_slice(&threshold.to_bytes());
        self.write_record(KIND_TRIGGER, &payload)
    }

    fn write_record(&self, kind: u8, payload: &[u8]) -> Result<()> {
        let Some(file) = &self.file else {
            return Ok(());
        };
        let mut writer = file.lock().unwrap_or_else(|e| e.into_inner());
        writer.write_all(&[kind])?;
        writer.write_all(&(payload.len() as u32).to_le_bytes())?;
        writer.write_all(payload)?;
        writer.flush()?;
        writer.get_ref().sync_data()?;
        Ok(())
    }
}

/// Reads every descriptor from a metadata file, in write order.
pub fn read_descriptors(path: impl AsRef<Path>) -> Result<Vec<Descriptor>> {
    let file = File::open(path.as_ref())?;
    let mut reader = BufReader::new(file);

    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    if magic != META_MAGIC {
        return Err(Error::Management(format!(
            "not a metadata file: bad magic {magic:?}"
        )));
    }
    let mut version = [0u8; 2];
    reader.read_exact(&mut version)?;
    let version = u16::from_le_bytes(version);
    if version != META_VERSION {
        return Err(Error::Management(format!(
            "unsupported metadata version {version}"
        )));
    }

    let mut descriptors = Vec::new();
    loop {
        let mut kind = [0u8; 1];
        match reader.read_exact(&mut kind) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        }
        let mut len = [0u8; 4];
        reader.read_exact(&mut len)?;
        let len = u32::from_le_bytes(len) as usize;
        let mut payload = vec![0u8; len];
        reader.read_exact(&mut payload)?;
        descriptors.push(parse_descriptor(kind[0], &payload)?);
    }
    Ok(descriptors)
}

fn parse_descriptor(kind: u8, payload: &[u8]) -> Result<Descriptor> {
    let bad = |what: &str| Error::Management(format!("malformed {what} descriptor"));
    match kind {
        KIND_INDEX => {
            if payload.len() < 4 {
                return Err(bad("index"));
            }
            let id = u16::from_le_bytes([payload[0], payload[1]]);
            let name_len = u16::from_le_bytes([payload[2], payload[3]]) as usize;
            if payload.len() != 4 + name_len + 8 {
                return Err(bad("index"));
            }
            let field = String::from_utf8(payload[4..4 + name_len].to_vec())
                .map_err(|_| bad("index"))?;
            let bucket_size = f64::from_le_bytes(
                payload[4 + name_len..].try_into().map_err(|_| bad("index"))?,
            );
            Ok(Descriptor::Index {
                id,
                field,
                bucket_size,
            })
        }
        KIND_FILTER => {
            if payload.len() < 8 {
                return Err(bad("filter"));
            }
            let id = u32::from_le_bytes(payload[..4].try_into().unwrap());
            let expr_len = u32::from_le_bytes(payload[4..8].try_into().unwrap()) as usize;
            if payload.len() != 8 + expr_len {
                return Err(bad("filter"));
            }
            let expression =
                String::from_utf8(payload[8..].to_vec()).map_err(|_| bad("filter"))?;
            Ok(Descriptor::Filter { id, expression })
        }
        KIND_TRIGGER => {
            if payload.len() < 11 {
                return Err(bad("trigger"));
            }
            let id = u32::from_le_bytes(payload[..4].try_into().unwrap());
            let filter_id = u32::from_le_bytes(payload[4..8].try_into().unwrap());
            let agg = AggregateKind::from_u8(payload[8]).ok_or_else(|| bad("trigger"))?;
            let name_len = u16::from_le_bytes([payload[9], payload[10]]) as usize;
            if payload.len() != 11 + name_len + 1 + 16 {
                return Err(bad("trigger"));
            }
            let field = String::from_utf8(payload[11..11 + name_len].to_vec())
                .map_err(|_| bad("trigger"))?;
            let op = RelOp::from_u8(payload[11 + name_len]).ok_or_else(|| bad("trigger"))?;
            let threshold_bytes: [u8; 16] = payload[12 + name_len..]
                .try_into()
                .map_err(|_| bad("trigger"))?;
            let threshold =
                Numeric::from_bytes(&threshold_bytes).ok_or_else(|| bad("trigger"))?;
            Ok(Descriptor::Trigger {
                id,
                filter_id,
                agg,
                field,
                op,
                threshold,
            })
        }
        other => Err(Error::Management(format!(
            "unknown descriptor kind 0x{other:02x}"
        ))),
    }
}
