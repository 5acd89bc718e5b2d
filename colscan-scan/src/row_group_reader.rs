//! Batch production inside one active row group.
//!
//! Every window of rows goes through the same stages:
//!
//! 1. read predicate columns (dictionary codes for rewritten columns)
//! 2. fill constant columns that conjuncts reference
//! 3. evaluate conjuncts and fold deletes into one filter
//! 4. read lazy columns for the surviving rows only
//! 5. filter first-pass columns, expand codes, fill remaining constants
//!
//! Windows with no surviving row produce no batch.

use std::ops::Range;
use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, BooleanArray, RecordBatch, RecordBatchOptions, UInt32Array, new_null_array,
};
use arrow::compute::{filter_record_batch, take};
use arrow::datatypes::{DataType, Field, Schema};
use arrow_buffer::BooleanBuffer;
use bytes::Bytes;
use colscan_expr::Conjunct;
use colscan_format::{
    ByteRange, ColumnChunkMeta, FileFormat, FileSchema, NodeId, RowGroupDescriptor,
};
use colscan_result::{Error, Result};
use rustc_hash::FxHashMap;
use tracing::{debug, trace, warn};

use crate::dict_filter::{DictFilterOutcome, DictionaryFilterEngine, DictionaryFilterState};
use crate::driver::ScanPlan;
use crate::io::RangeFetcher;
use crate::materialize::{BatchMaterializer, ChunkSource, expand_codes, values_to_array};
use crate::row_ranges::{RangeCursor, RowRanges};
use crate::schema_resolver::{ColumnSource, ReadPlan, ResolvedColumn};
use crate::statistics::ScanStatistics;

/// Fetched bytes and decoded dictionaries of the active row group.
#[derive(Debug, Default)]
struct ChunkCache {
    /// One read covering every chunk of a small row group.
    coalesced: Option<(ByteRange, Bytes)>,
    data: FxHashMap<NodeId, Bytes>,
    dictionaries: FxHashMap<NodeId, ArrayRef>,
}

struct GroupChunks<'a> {
    cache: &'a mut ChunkCache,
    fetcher: &'a mut RangeFetcher,
    row_group: &'a RowGroupDescriptor,
    schema: &'a FileSchema,
    format: &'a dyn FileFormat,
}

impl<'a> GroupChunks<'a> {
    fn fetch(&mut self, range: ByteRange) -> Result<Bytes> {
        if let Some((whole, bytes)) = &self.cache.coalesced
            && range.offset >= whole.offset
            && range.end() <= whole.end()
        {
            let start = (range.offset - whole.offset) as usize;
            return Ok(bytes.slice(start..start + range.length as usize));
        }
        self.fetcher.fetch(range)
    }

    fn chunk(&self, node: NodeId) -> Result<&'a ColumnChunkMeta> {
        self.row_group.column(node).ok_or_else(|| {
            Error::corrupt(format!(
                "row group {} has no chunk for schema node {}",
                self.row_group.id, node.0
            ))
        })
    }
}

impl ChunkSource for GroupChunks<'_> {
    fn data(&mut self, node: NodeId) -> Result<Bytes> {
        if let Some(bytes) = self.cache.data.get(&node) {
            return Ok(bytes.clone());
        }
        let range = self.chunk(node)?.data;
        let bytes = self.fetch(range)?;
        self.cache.data.insert(node, bytes.clone());
        Ok(bytes)
    }

    fn dictionary(&mut self, node: NodeId, decoded: &DataType) -> Result<ArrayRef> {
        if let Some(dictionary) = self.cache.dictionaries.get(&node) {
            return Ok(Arc::clone(dictionary));
        }
        let chunk = self.chunk(node)?;
        let range = chunk.dictionary_page.ok_or_else(|| {
            Error::corrupt(format!(
                "column '{}' has dictionary codes but no dictionary page",
                self.schema.node(node).name
            ))
        })?;
        let page = self.fetch(range)?;
        let values = self
            .format
            .decode_dictionary(&page, chunk, self.schema.node(node))?;
        let dictionary = values_to_array(&values, None, values.len(), decoded, None)?;
        self.cache.dictionaries.insert(node, Arc::clone(&dictionary));
        Ok(dictionary)
    }
}

/// Reads batches from one row group until its candidate rows run out.
#[derive(Debug)]
pub(crate) struct RowGroupReader {
    rg_index: usize,
    cursor: RangeCursor,
    chunks: ChunkCache,
    dict_state: DictionaryFilterState,
    /// Conjuncts after dictionary rewrites.
    conjuncts: Vec<Conjunct>,
}

impl RowGroupReader {
    /// Prepare row group `rg_index` for reading `rows`.
    ///
    /// Returns `None` when a dictionary proves that no row matches.
    pub(crate) fn open(
        plan: &ScanPlan,
        rg_index: usize,
        rows: RowRanges,
        fetcher: &mut RangeFetcher,
        stats: &mut ScanStatistics,
    ) -> Result<Option<Self>> {
        let row_group = &plan.metadata.row_groups[rg_index];
        let mut chunks = ChunkCache::default();
        if row_group.compressed_size < plan.config.tiny_row_group_bytes
            && let Some(range) = coalesced_range(plan, row_group)
        {
            trace!(row_group = row_group.id, bytes = range.length, "coalescing small row group");
            chunks.coalesced = Some((range, fetcher.fetch(range)?));
        }

        let mut dict_state = DictionaryFilterState::default();
        let engine = DictionaryFilterEngine::new(
            plan.evaluator.as_ref(),
            plan.config.max_dictionary_codes_to_rewrite,
        );
        let mut source = GroupChunks {
            cache: &mut chunks,
            fetcher,
            row_group,
            schema: &plan.metadata.schema,
            format: plan.format.as_ref(),
        };
        for candidate in &plan.dict_candidates {
            let encoded = row_group
                .column(candidate.node)
                .is_some_and(|c| c.fully_dictionary_encoded && c.dictionary_page.is_some());
            if !encoded {
                continue;
            }
            let outcome = source
                .dictionary(candidate.node, &candidate.decoded)
                .and_then(|dictionary| engine.evaluate(candidate, dictionary, &plan.conjuncts));
            match outcome {
                Ok(DictFilterOutcome::AllFiltered) => {
                    stats.dict_filtered_row_groups += 1;
                    debug!(
                        row_group = row_group.id,
                        column = candidate.column.as_str(),
                        "skipping row group: no dictionary value matches"
                    );
                    return Ok(None);
                }
                Ok(DictFilterOutcome::Abandoned { surviving }) => {
                    stats.abandoned_dict_filters += 1;
                    warn!(
                        row_group = row_group.id,
                        column = candidate.column.as_str(),
                        surviving,
                        "too many dictionary values survive, evaluating strings directly"
                    );
                }
                Ok(DictFilterOutcome::Rewritten { codes, conjunct }) => {
                    stats.rewritten_dict_predicates += 1;
                    dict_state.record(candidate, codes, conjunct);
                }
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(err) => {
                    stats.abandoned_dict_filters += 1;
                    warn!(
                        row_group = row_group.id,
                        column = candidate.column.as_str(),
                        error = %err,
                        "dictionary filter failed, evaluating strings directly"
                    );
                }
            }
        }

        let conjuncts = dict_state.effective_conjuncts(&plan.conjuncts);
        Ok(Some(Self {
            rg_index,
            cursor: RangeCursor::new(rows),
            chunks,
            dict_state,
            conjuncts,
        }))
    }

    /// Next non-empty batch of at most `capacity` input rows, or `None` when
    /// the row group is done.
    pub(crate) fn next_batch(
        &mut self,
        plan: &ScanPlan,
        capacity: usize,
        fetcher: &mut RangeFetcher,
        stats: &mut ScanStatistics,
    ) -> Result<Option<RecordBatch>> {
        while let Some(window) = self.cursor.next_window(capacity as u64) {
            if let Some(batch) = self.read_window(plan, window, fetcher, stats)? {
                return Ok(Some(batch));
            }
        }
        Ok(None)
    }

    fn read_window(
        &mut self,
        plan: &ScanPlan,
        window: Range<u64>,
        fetcher: &mut RangeFetcher,
        stats: &mut ScanStatistics,
    ) -> Result<Option<RecordBatch>> {
        let row_group = &plan.metadata.row_groups[self.rg_index];
        let num_rows = (window.end - window.start) as usize;
        let lazy = &plan.lazy;
        let materializer =
            BatchMaterializer::new(&plan.metadata.schema, plan.format.as_ref(), row_group);
        let mut source = GroupChunks {
            cache: &mut self.chunks,
            fetcher,
            row_group,
            schema: &plan.metadata.schema,
            format: plan.format.as_ref(),
        };

        // first pass
        let mut fields = Vec::new();
        let mut arrays: Vec<ArrayRef> = Vec::new();
        for name in &lazy.predicate_columns {
            let column = resolved(plan, name)?;
            let array = match &column.source {
                ColumnSource::File(ReadPlan::Leaf { node, decoded, .. })
                    if self.dict_state.is_rewritten(name) =>
                {
                    let codes =
                        materializer.read_codes(name, *node, decoded, window.clone(), &mut source)?;
                    Arc::new(codes) as ArrayRef
                }
                ColumnSource::File(read) => {
                    let array =
                        materializer.read_column(name, read, window.clone(), None, &mut source)?;
                    check_nulls(column, array.as_ref())?;
                    array
                }
                _ => return Err(Error::Internal(format!("'{name}' is not a file column"))),
            };
            fields.push(Field::new(name, array.data_type().clone(), true));
            arrays.push(array);
        }
        for name in lazy.early_constants() {
            let column = resolved(plan, name)?;
            fields.push(Field::new(name, column.data_type.clone(), true));
            arrays.push(constant_column(column, num_rows)?);
        }
        stats.read_rows += num_rows as u64;

        let first_pass = RecordBatch::try_new_with_options(
            Arc::new(Schema::new(fields)),
            arrays,
            &RecordBatchOptions::new().with_row_count(Some(num_rows)),
        )?;
        let filter = if self.conjuncts.is_empty() {
            BooleanBuffer::new_set(num_rows)
        } else {
            let outcome = plan.evaluator.evaluate(&self.conjuncts, &first_pass)?;
            if outcome.filter.len() != num_rows {
                return Err(Error::Internal(format!(
                    "filter has {} bits for {num_rows} rows",
                    outcome.filter.len()
                )));
            }
            outcome.filter
        };
        let after_predicates = filter.count_set_bits();
        stats.predicate_filtered_rows += (num_rows - after_predicates) as u64;

        let filter = match &plan.delete_filter {
            Some(deletes) => {
                let absolute = row_group.first_row + window.start..row_group.first_row + window.end;
                let (fused, cleared) = deletes.apply(filter, absolute, &first_pass)?;
                stats.delete_filtered_rows += cleared;
                fused
            }
            None => filter,
        };
        let selected = filter.count_set_bits();
        if lazy.can_lazy_read {
            stats.lazy_read_filtered_rows += (num_rows - selected) as u64;
        }
        if selected == 0 {
            trace!(row_group = row_group.id, window = ?window, "window fully filtered");
            return Ok(None);
        }
        let selection = (selected != num_rows).then_some(&filter);

        let mut out: FxHashMap<&str, ArrayRef> = FxHashMap::default();
        for name in &lazy.lazy_columns {
            let column = resolved(plan, name)?;
            let ColumnSource::File(read) = &column.source else {
                return Err(Error::Internal(format!("'{name}' is not a file column")));
            };
            let array =
                materializer.read_column(name, read, window.clone(), selection, &mut source)?;
            check_nulls(column, array.as_ref())?;
            out.insert(name.as_str(), array);
        }

        let first_pass = match selection {
            Some(selection) => {
                filter_record_batch(&first_pass, &BooleanArray::new(selection.clone(), None))?
            }
            None => first_pass,
        };
        for (field, array) in first_pass.schema().fields().iter().zip(first_pass.columns()) {
            let Some(column) = plan.columns.get(field.name()) else {
                continue;
            };
            let array = match &column.source {
                ColumnSource::File(ReadPlan::Leaf { node, decoded, .. })
                    if self.dict_state.is_rewritten(&column.name) =>
                {
                    let dictionary = source.dictionary(*node, decoded)?;
                    let expanded = expand_codes(array.as_ref(), &dictionary)?;
                    check_nulls(column, expanded.as_ref())?;
                    expanded
                }
                _ => Arc::clone(array),
            };
            out.insert(column.name.as_str(), array);
        }
        for name in lazy.late_constants() {
            let column = resolved(plan, name)?;
            out.insert(column.name.as_str(), constant_column(column, selected)?);
        }

        let columns = plan
            .columns
            .output_columns()
            .map(|column| {
                out.remove(column.name.as_str()).ok_or_else(|| {
                    Error::Internal(format!("column '{}' was not materialized", column.name))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let batch = RecordBatch::try_new_with_options(
            Arc::clone(&plan.output_schema),
            columns,
            &RecordBatchOptions::new().with_row_count(Some(selected)),
        )?;
        trace!(
            row_group = row_group.id,
            window = ?window,
            rows = selected,
            "materialized batch"
        );
        Ok(Some(batch))
    }
}

fn resolved<'p>(plan: &'p ScanPlan, name: &str) -> Result<&'p ResolvedColumn> {
    plan.columns
        .get(name)
        .ok_or_else(|| Error::Internal(format!("column '{name}' is not in the scan plan")))
}

/// Byte span covering every chunk the scan reads from `row_group`.
fn coalesced_range(plan: &ScanPlan, row_group: &RowGroupDescriptor) -> Option<ByteRange> {
    plan.columns
        .columns()
        .iter()
        .filter_map(|column| match &column.source {
            ColumnSource::File(read) => Some(read.nodes()),
            _ => None,
        })
        .flatten()
        .filter_map(|node| row_group.column(node))
        .map(|chunk| chunk.chunk_range())
        .reduce(|a, b| a.union(&b))
}

fn check_nulls(column: &ResolvedColumn, array: &dyn Array) -> Result<()> {
    if !column.nullable && array.null_count() > 0 {
        return Err(Error::schema_mismatch(
            &column.name,
            "non-nullable column contains nulls",
        ));
    }
    Ok(())
}

/// A column of `num_rows` copies of a partition value or default, or nulls.
pub(crate) fn constant_column(column: &ResolvedColumn, num_rows: usize) -> Result<ArrayRef> {
    let value = match &column.source {
        ColumnSource::Partition(value) | ColumnSource::Missing(Some(value)) if !value.is_null() => {
            value
        }
        ColumnSource::Partition(_) | ColumnSource::Missing(_) => {
            return Ok(new_null_array(&column.data_type, num_rows));
        }
        ColumnSource::File(_) => {
            return Err(Error::Internal(format!("'{}' is read from the file", column.name)));
        }
    };
    let single = value.to_array(&column.data_type)?;
    let indices = UInt32Array::from(vec![0u32; num_rows]);
    Ok(take(single.as_ref(), &indices, None)?)
}
