//! In-memory reference format.
//!
//! A small self-describing layout used by tests and benchmarks:
//!
//! ```text
//! "CSM1" | chunks, dictionary pages, page indexes ... | footer | footer_len: u64 LE | "CSM1"
//! ```
//!
//! Chunks, dictionaries, page indexes and the footer are `bitcode`
//! encodings of the types in this crate. Statistics and page-index min/max
//! use the same plain encoding as real columnar files, so pruning code sees
//! exactly the bytes it would see in production.

mod builder;
mod instrumented;

pub use builder::{MemColumn, MemFileBuilder};
pub use instrumented::{InstrumentedReader, IoStatsSnapshot};

use std::io;
use std::ops::Range;

use arrow::buffer::NullBuffer;
use bitcode::{Decode, Encode};
use bytes::Bytes;
use colscan_result::{Error, Result};

use crate::chunk::{PhysicalValues, RawColumn};
use crate::format::FileFormat;
use crate::metadata::{ByteRange, ColumnChunkMeta, FileMetadata};
use crate::page_index::{ColumnIndex, OffsetIndex};
use crate::reader::{ByteRangeReader, ReadOutcome, read_range};
use crate::schema::SchemaNode;

pub(crate) const MAGIC: &[u8; 4] = b"CSM1";
const FOOTER_TAIL: u64 = 12;

#[derive(Clone, Debug, Encode, Decode)]
pub(crate) struct StoredColumn {
    pub(crate) num_rows: u64,
    pub(crate) validity: Option<Vec<bool>>,
    pub(crate) body: StoredBody,
}

#[derive(Clone, Debug, Encode, Decode)]
pub(crate) enum StoredBody {
    Values(PhysicalValues),
    Codes(Vec<u32>),
    Lengths(Vec<u32>),
    Struct,
}

/// A finished in-memory file.
#[derive(Clone, Debug)]
pub struct MemFile {
    path: String,
    bytes: Bytes,
}

impl MemFile {
    pub fn new(path: impl Into<String>, bytes: Bytes) -> Self {
        Self {
            path: path.into(),
            bytes,
        }
    }

    #[inline]
    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }
}

impl ByteRangeReader for MemFile {
    fn path(&self) -> &str {
        &self.path
    }

    fn size(&self) -> io::Result<u64> {
        Ok(self.bytes.len() as u64)
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<ReadOutcome> {
        let start = (offset as usize).min(self.bytes.len());
        let n = buf.len().min(self.bytes.len() - start);
        buf[..n].copy_from_slice(&self.bytes[start..start + n]);
        Ok(ReadOutcome::Read(n))
    }
}

/// [`FileFormat`] for files produced by [`MemFileBuilder`].
#[derive(Debug, Default, Clone, Copy)]
pub struct MemFormat;

fn decode_blob<T: bitcode::DecodeOwned>(blob: &[u8], what: &str) -> Result<T> {
    bitcode::decode(blob).map_err(|e| Error::corrupt(format!("malformed {what}: {e}")))
}

fn null_buffer(validity: Option<&[bool]>) -> Option<NullBuffer> {
    let validity = validity?;
    let nulls = NullBuffer::from(validity);
    (nulls.null_count() > 0).then_some(nulls)
}

impl FileFormat for MemFormat {
    fn parse_metadata(&self, reader: &dyn ByteRangeReader) -> Result<FileMetadata> {
        let size = reader
            .size()
            .map_err(|e| Error::file_read(reader.path(), e))?;
        if size < FOOTER_TAIL + MAGIC.len() as u64 {
            return Err(Error::corrupt(format!(
                "'{}' is too small ({size} bytes) to hold a footer",
                reader.path()
            )));
        }
        let tail = read_range(reader, ByteRange::new(size - FOOTER_TAIL, FOOTER_TAIL))?;
        if &tail[8..12] != MAGIC {
            return Err(Error::corrupt(format!("'{}' has a bad footer magic", reader.path())));
        }
        let mut len_bytes = [0u8; 8];
        len_bytes.copy_from_slice(&tail[..8]);
        let footer_len = u64::from_le_bytes(len_bytes);
        let footer_start = (size - FOOTER_TAIL)
            .checked_sub(footer_len)
            .ok_or_else(|| Error::corrupt("footer length exceeds file size"))?;
        let footer = read_range(reader, ByteRange::new(footer_start, footer_len))?;
        let metadata: FileMetadata = decode_blob(&footer, "footer")?;
        tracing::debug!(
            path = reader.path(),
            row_groups = metadata.row_groups.len(),
            footer_len,
            "parsed footer"
        );
        Ok(metadata)
    }

    fn parse_column_index(&self, blob: &[u8], _chunk: &ColumnChunkMeta) -> Result<ColumnIndex> {
        decode_blob(blob, "column index")
    }

    fn parse_offset_index(&self, blob: &[u8], _chunk: &ColumnChunkMeta) -> Result<OffsetIndex> {
        decode_blob(blob, "offset index")
    }

    fn decode_dictionary(
        &self,
        page: &[u8],
        _chunk: &ColumnChunkMeta,
        _node: &SchemaNode,
    ) -> Result<PhysicalValues> {
        decode_blob(page, "dictionary page")
    }

    fn decode_column(
        &self,
        data: &Bytes,
        _chunk: &ColumnChunkMeta,
        node: &SchemaNode,
        rows: Range<u64>,
    ) -> Result<RawColumn> {
        let stored: StoredColumn = decode_blob(data, "column chunk")?;
        if rows.start > rows.end || rows.end > stored.num_rows {
            return Err(Error::corrupt(format!(
                "rows {rows:?} out of range for column '{}' with {} rows",
                node.name, stored.num_rows
            )));
        }
        let (start, end) = (rows.start as usize, rows.end as usize);
        let window = stored.validity.as_ref().map(|v| &v[start..end]);
        let (before, within) = match &stored.validity {
            Some(v) => (
                v[..start].iter().filter(|b| **b).count(),
                v[start..end].iter().filter(|b| **b).count(),
            ),
            None => (start, end - start),
        };
        let validity = null_buffer(window);
        Ok(match stored.body {
            StoredBody::Values(values) => RawColumn::Flat {
                values: values.slice(before..before + within)?,
                validity,
            },
            StoredBody::Codes(codes) => {
                let slice = codes.get(before..before + within).ok_or_else(|| {
                    Error::corrupt(format!("dictionary codes truncated in '{}'", node.name))
                })?;
                RawColumn::Dictionary {
                    codes: slice.to_vec(),
                    validity,
                }
            }
            StoredBody::Lengths(lengths) => {
                let prefix: u64 = lengths[..start].iter().map(|l| *l as u64).sum();
                let span: u64 = lengths[start..end].iter().map(|l| *l as u64).sum();
                RawColumn::Repeated {
                    lengths: lengths[start..end].to_vec(),
                    validity,
                    child_rows: prefix..prefix + span,
                }
            }
            StoredBody::Struct => RawColumn::Struct {
                num_rows: end - start,
                validity,
            },
        })
    }
}
