//! Decoded column chunks, before conversion to Arrow arrays.
//!
//! Decoders hand back a [`RawColumn`] for a row window of one column. The
//! variant tells the materializer which path to take; it dispatches once per
//! chunk rather than per value. Non-null values are stored compactly: a chunk
//! with `n` rows and `k` nulls carries `n - k` values plus a validity map.

use std::cmp::Ordering;
use std::ops::Range;

use arrow::buffer::NullBuffer;
use bitcode::{Decode, Encode};
use colscan_result::{Error, Result};

/// Values of one physical type, nulls excluded.
#[derive(Clone, Debug, PartialEq, Encode, Decode)]
pub enum PhysicalValues {
    Boolean(Vec<bool>),
    Int32(Vec<i32>),
    Int64(Vec<i64>),
    Int96(Vec<[u32; 3]>),
    Float(Vec<f32>),
    Double(Vec<f64>),
    /// `offsets` has `len + 1` entries.
    ByteArray { offsets: Vec<u32>, data: Vec<u8> },
    FixedLenByteArray { width: u32, data: Vec<u8> },
}

impl PhysicalValues {
    pub fn len(&self) -> usize {
        match self {
            PhysicalValues::Boolean(v) => v.len(),
            PhysicalValues::Int32(v) => v.len(),
            PhysicalValues::Int64(v) => v.len(),
            PhysicalValues::Int96(v) => v.len(),
            PhysicalValues::Float(v) => v.len(),
            PhysicalValues::Double(v) => v.len(),
            PhysicalValues::ByteArray { offsets, .. } => offsets.len().saturating_sub(1),
            PhysicalValues::FixedLenByteArray { width, data } => {
                if *width == 0 {
                    0
                } else {
                    data.len() / *width as usize
                }
            }
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Build byte-array values from slices.
    pub fn from_byte_slices<'a>(values: impl IntoIterator<Item = &'a [u8]>) -> Self {
        let mut offsets = vec![0u32];
        let mut data = Vec::new();
        for value in values {
            data.extend_from_slice(value);
            offsets.push(data.len() as u32);
        }
        PhysicalValues::ByteArray { offsets, data }
    }

    /// Bytes of value `idx` for binary variants.
    pub fn bytes(&self, idx: usize) -> Option<&[u8]> {
        match self {
            PhysicalValues::ByteArray { offsets, data } => {
                let start = *offsets.get(idx)? as usize;
                let end = *offsets.get(idx + 1)? as usize;
                data.get(start..end)
            }
            PhysicalValues::FixedLenByteArray { width, data } => {
                let width = *width as usize;
                data.get(idx * width..(idx + 1) * width)
            }
            _ => None,
        }
    }

    /// Copy out values `range`.
    pub fn slice(&self, range: Range<usize>) -> Result<Self> {
        if range.end > self.len() || range.start > range.end {
            return Err(Error::corrupt(format!(
                "value slice {range:?} out of bounds for {} values",
                self.len()
            )));
        }
        Ok(match self {
            PhysicalValues::Boolean(v) => PhysicalValues::Boolean(v[range].to_vec()),
            PhysicalValues::Int32(v) => PhysicalValues::Int32(v[range].to_vec()),
            PhysicalValues::Int64(v) => PhysicalValues::Int64(v[range].to_vec()),
            PhysicalValues::Int96(v) => PhysicalValues::Int96(v[range].to_vec()),
            PhysicalValues::Float(v) => PhysicalValues::Float(v[range].to_vec()),
            PhysicalValues::Double(v) => PhysicalValues::Double(v[range].to_vec()),
            PhysicalValues::ByteArray { offsets, data } => {
                let base = offsets[range.start];
                let new_offsets: Vec<u32> = offsets[range.start..=range.end]
                    .iter()
                    .map(|o| o - base)
                    .collect();
                let end = offsets[range.end] as usize;
                PhysicalValues::ByteArray {
                    offsets: new_offsets,
                    data: data[base as usize..end].to_vec(),
                }
            }
            PhysicalValues::FixedLenByteArray { width, data } => {
                let w = *width as usize;
                PhysicalValues::FixedLenByteArray {
                    width: *width,
                    data: data[range.start * w..range.end * w].to_vec(),
                }
            }
        })
    }

    /// Compare two values by physical order: signed for integers, IEEE for
    /// floats, unsigned bytewise for binary.
    pub fn compare(&self, a: usize, b: usize) -> Option<Ordering> {
        match self {
            PhysicalValues::Boolean(v) => Some(v.get(a)?.cmp(v.get(b)?)),
            PhysicalValues::Int32(v) => Some(v.get(a)?.cmp(v.get(b)?)),
            PhysicalValues::Int64(v) => Some(v.get(a)?.cmp(v.get(b)?)),
            PhysicalValues::Int96(_) => None,
            PhysicalValues::Float(v) => v.get(a)?.partial_cmp(v.get(b)?),
            PhysicalValues::Double(v) => v.get(a)?.partial_cmp(v.get(b)?),
            PhysicalValues::ByteArray { .. } | PhysicalValues::FixedLenByteArray { .. } => {
                Some(self.bytes(a)?.cmp(self.bytes(b)?))
            }
        }
    }

    /// Plain encoding of value `idx`, as used for statistics.
    pub fn plain_encode(&self, idx: usize) -> Option<Vec<u8>> {
        Some(match self {
            PhysicalValues::Boolean(v) => vec![*v.get(idx)? as u8],
            PhysicalValues::Int32(v) => v.get(idx)?.to_le_bytes().to_vec(),
            PhysicalValues::Int64(v) => v.get(idx)?.to_le_bytes().to_vec(),
            PhysicalValues::Int96(v) => v.get(idx)?.iter().flat_map(|w| w.to_le_bytes()).collect(),
            PhysicalValues::Float(v) => v.get(idx)?.to_le_bytes().to_vec(),
            PhysicalValues::Double(v) => v.get(idx)?.to_le_bytes().to_vec(),
            PhysicalValues::ByteArray { .. } | PhysicalValues::FixedLenByteArray { .. } => {
                self.bytes(idx)?.to_vec()
            }
        })
    }
}

/// One decoded row window of one column.
#[derive(Clone, Debug)]
pub enum RawColumn {
    /// Values stored inline.
    Flat {
        values: PhysicalValues,
        validity: Option<NullBuffer>,
    },
    /// Codes into the chunk's dictionary page.
    Dictionary {
        codes: Vec<u32>,
        validity: Option<NullBuffer>,
    },
    /// List or map: one element count per row. Null rows have count 0.
    /// `child_rows` is the span of the child chunk covered by this window.
    Repeated {
        lengths: Vec<u32>,
        validity: Option<NullBuffer>,
        child_rows: Range<u64>,
    },
    /// Struct: children share the parent's rows.
    Struct {
        num_rows: usize,
        validity: Option<NullBuffer>,
    },
}

impl RawColumn {
    pub fn num_rows(&self) -> usize {
        match self {
            RawColumn::Flat { values, validity } => validity
                .as_ref()
                .map_or(values.len(), |v| v.len()),
            RawColumn::Dictionary { codes, validity } => {
                validity.as_ref().map_or(codes.len(), |v| v.len())
            }
            RawColumn::Repeated { lengths, .. } => lengths.len(),
            RawColumn::Struct { num_rows, .. } => *num_rows,
        }
    }

    pub fn validity(&self) -> Option<&NullBuffer> {
        match self {
            RawColumn::Flat { validity, .. }
            | RawColumn::Dictionary { validity, .. }
            | RawColumn::Repeated { validity, .. }
            | RawColumn::Struct { validity, .. } => validity.as_ref(),
        }
    }

    pub fn null_count(&self) -> usize {
        self.validity().map_or(0, |v| v.null_count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_array_slices_rebase_offsets() {
        let values = PhysicalValues::from_byte_slices([&b"ab"[..], b"", b"cde", b"f"]);
        assert_eq!(values.len(), 4);
        let tail = values.slice(2..4).unwrap();
        assert_eq!(tail.bytes(0), Some(&b"cde"[..]));
        assert_eq!(tail.bytes(1), Some(&b"f"[..]));
        assert!(values.slice(3..5).is_err());
    }

    #[test]
    fn plain_encoding_is_little_endian() {
        let values = PhysicalValues::Int32(vec![-2, 258]);
        assert_eq!(values.plain_encode(1), Some(vec![2, 1, 0, 0]));
        assert_eq!(values.compare(0, 1), Some(Ordering::Less));
    }
}
