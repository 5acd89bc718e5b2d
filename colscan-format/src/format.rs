use std::ops::Range;

use bytes::Bytes;
use colscan_result::Result;

use crate::chunk::{PhysicalValues, RawColumn};
use crate::metadata::{ColumnChunkMeta, FileMetadata};
use crate::page_index::{ColumnIndex, OffsetIndex};
use crate::reader::ByteRangeReader;
use crate::schema::SchemaNode;

/// Parser and page decoder for one on-disk columnar layout.
///
/// The scan pipeline never interprets file bytes itself. It fetches byte
/// ranges named by the metadata and hands them to these methods.
pub trait FileFormat: Send + Sync {
    /// Read and parse the footer.
    fn parse_metadata(&self, reader: &dyn ByteRangeReader) -> Result<FileMetadata>;

    fn parse_column_index(&self, blob: &[u8], chunk: &ColumnChunkMeta) -> Result<ColumnIndex>;

    fn parse_offset_index(&self, blob: &[u8], chunk: &ColumnChunkMeta) -> Result<OffsetIndex>;

    /// Decode a dictionary page into its distinct values.
    fn decode_dictionary(
        &self,
        page: &[u8],
        chunk: &ColumnChunkMeta,
        node: &SchemaNode,
    ) -> Result<PhysicalValues>;

    /// Decode `rows` of a column chunk from its data pages.
    ///
    /// For top-level columns `rows` is relative to the row group. For nested
    /// children it is the span reported by the parent's
    /// [`RawColumn::Repeated::child_rows`] (or the parent's rows for structs).
    fn decode_column(
        &self,
        data: &Bytes,
        chunk: &ColumnChunkMeta,
        node: &SchemaNode,
        rows: Range<u64>,
    ) -> Result<RawColumn>;
}
