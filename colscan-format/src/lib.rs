//! File-side data model for colscan.
//!
//! This crate describes what a columnar file looks like after its footer has
//! been parsed (schema arena, row groups, column chunks, statistics, page
//! indexes) and defines the two collaborator seams the scan pipeline reads
//! through:
//!
//! - [`ByteRangeReader`]: positioned reads with cooperative stop.
//! - [`FileFormat`]: footer, page-index, dictionary and data-page decoding.
//!
//! The [`memory`] module provides a complete in-memory implementation of
//! both, used by the workspace's tests and benchmarks.

pub mod chunk;
pub mod format;
pub mod memory;
pub mod metadata;
pub mod page_index;
pub mod reader;
pub mod schema;

pub use chunk::{PhysicalValues, RawColumn};
pub use format::FileFormat;
pub use metadata::{ByteRange, ColumnChunkMeta, ColumnStatistics, FileMetadata, RowGroupDescriptor};
pub use page_index::{
    BoundaryOrder, ColumnIndex, OffsetIndex, PageDescriptor, PageLocation, page_descriptors,
};
pub use reader::{ByteRangeReader, LocalFileReader, ReadOutcome, read_range};
pub use schema::{
    FileSchema, FileSchemaBuilder, LogicalType, NodeId, PhysicalType, SchemaNode, TimestampUnit,
};
