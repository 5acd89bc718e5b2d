//! Footer-level metadata: row groups, column chunks, statistics.

use bitcode::{Decode, Encode};

use crate::schema::{FileSchema, NodeId};

/// Contiguous byte span in the file.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Encode, Decode)]
pub struct ByteRange {
    pub offset: u64,
    pub length: u64,
}

impl ByteRange {
    pub fn new(offset: u64, length: u64) -> Self {
        Self { offset, length }
    }

    #[inline]
    pub fn end(&self) -> u64 {
        self.offset + self.length
    }

    /// Smallest range covering both.
    pub fn union(&self, other: &ByteRange) -> ByteRange {
        let offset = self.offset.min(other.offset);
        ByteRange::new(offset, self.end().max(other.end()) - offset)
    }
}

/// Column chunk statistics, with min/max in plain encoding.
///
/// Numeric values are little-endian at the physical width; byte arrays are
/// raw bytes; fixed-length decimals are big-endian two's complement.
#[derive(Clone, Debug, Default, PartialEq, Eq, Encode, Decode)]
pub struct ColumnStatistics {
    pub min_value: Option<Vec<u8>>,
    pub max_value: Option<Vec<u8>>,
    pub null_count: Option<u64>,
    /// Min/max came from the deprecated statistics fields, whose sort order
    /// is only reliable for signed comparisons.
    pub legacy_min_max: bool,
}

impl ColumnStatistics {
    #[inline]
    pub fn has_min_max(&self) -> bool {
        self.min_value.is_some() && self.max_value.is_some()
    }
}

/// One column of one row group.
#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode)]
pub struct ColumnChunkMeta {
    pub node: NodeId,
    /// Values in the chunk, nulls included. Equals the row count for top-level columns.
    pub num_values: u64,
    /// Data pages.
    pub data: ByteRange,
    pub dictionary_page: Option<ByteRange>,
    /// Every data page references the dictionary.
    pub fully_dictionary_encoded: bool,
    pub statistics: Option<ColumnStatistics>,
    pub column_index: Option<ByteRange>,
    pub offset_index: Option<ByteRange>,
}

impl ColumnChunkMeta {
    /// Byte span covering the dictionary page and the data pages.
    pub fn chunk_range(&self) -> ByteRange {
        match &self.dictionary_page {
            Some(dict) => dict.union(&self.data),
            None => self.data,
        }
    }

    #[inline]
    pub fn compressed_size(&self) -> u64 {
        self.data.length + self.dictionary_page.map_or(0, |d| d.length)
    }

    #[inline]
    pub fn has_page_index(&self) -> bool {
        self.column_index.is_some() && self.offset_index.is_some()
    }
}

/// One physical row group or stripe.
#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode)]
pub struct RowGroupDescriptor {
    pub id: u32,
    /// Absolute position of the first row in the file.
    pub first_row: u64,
    pub num_rows: u64,
    pub compressed_size: u64,
    /// One entry per schema node, indexed by [`NodeId`].
    pub columns: Vec<ColumnChunkMeta>,
}

impl RowGroupDescriptor {
    /// Exclusive absolute end row.
    #[inline]
    pub fn last_row(&self) -> u64 {
        self.first_row + self.num_rows
    }

    #[inline]
    pub fn column(&self, node: NodeId) -> Option<&ColumnChunkMeta> {
        self.columns.get(node.index())
    }
}

/// Parsed footer.
#[derive(Clone, Debug, PartialEq, Encode, Decode)]
pub struct FileMetadata {
    pub schema: FileSchema,
    pub row_groups: Vec<RowGroupDescriptor>,
    pub created_by: Option<String>,
}

impl FileMetadata {
    pub fn num_rows(&self) -> u64 {
        self.row_groups.iter().map(|rg| rg.num_rows).sum()
    }
}
