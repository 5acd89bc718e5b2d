//! Columnar file scanning for colscan.
//!
//! A [`ScanDriver`] turns one file plus a [`ScanRequest`] into Arrow record
//! batches of the requested table schema. Work is skipped at every level the
//! file allows:
//!
//! - row groups whose chunk statistics exclude the conjuncts ([`StatsPruner`])
//! - pages whose column index excludes them ([`PageIndexPruner`])
//! - row groups whose dictionary holds no matching value, with surviving
//!   string predicates rewritten to dictionary-code tests
//!   ([`DictionaryFilterEngine`])
//! - lazy columns, read only for rows that pass the conjuncts and deletes
//!   ([`LazyReadContext`], [`DeleteRowFilter`])
//!
//! File structure and decoding come from the collaborators in
//! `colscan-format`; conjunct evaluation from `colscan-expr`.

pub mod config;
pub mod delete_filter;
pub mod dict_filter;
pub mod driver;
mod io;
pub mod lazy_plan;
mod materialize;
pub mod page_index_pruner;
mod plain;
pub mod request;
mod row_group_reader;
pub mod row_ranges;
pub mod schema_resolver;
pub mod statistics;
pub mod stats_pruner;

pub use config::{AcidColumnNames, ScanConfig};
pub use delete_filter::{AcidRowId, DeleteRowFilter, DeleteRowSet};
pub use dict_filter::{
    DictFilterOutcome, DictionaryCandidate, DictionaryFilterEngine, DictionaryFilterState,
    eligible_columns,
};
pub use driver::{NextBatch, ScanBatches, ScanDriver, ScanPhase};
pub use lazy_plan::LazyReadContext;
pub use page_index_pruner::PageIndexPruner;
pub use request::{RequestedColumn, ScanRequest};
pub use row_ranges::RowRanges;
pub use schema_resolver::{
    ColumnMappingPlan, ColumnSource, ConverterCache, ReadPlan, ResolvedColumn, TypeConverter,
};
pub use statistics::ScanStatistics;
pub use stats_pruner::{RowGroupDecision, StatsPruner, binary_statistics_trusted};
