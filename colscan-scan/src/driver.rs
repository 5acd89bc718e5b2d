//! Per-file scan state machine.
//!
//! ```text
//! Unopened -> MetadataLoaded -> RowGroupsPlanned -> {RowGroupSkipped | RowGroupActive}
//!          -> BatchEmitted -> ... -> Exhausted
//!
//! Any unrecoverable error moves the driver to Failed.
//! ```
//!
//! `init` loads the footer, resolves columns and prunes row groups from
//! statistics. Each `next_batch` call activates row groups in file order
//! (page pruning and dictionary filtering happen on activation) until one
//! produces a batch.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use arrow::array::RecordBatch;
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use colscan_expr::{
    ArrowConjunctEvaluator, Conjunct, ConjunctEvaluator, ValueRanges, derive_value_ranges,
};
use colscan_format::{ByteRangeReader, FileFormat, FileMetadata};
use colscan_result::{Error, Result};
use tracing::{debug, trace};

use crate::config::ScanConfig;
use crate::delete_filter::DeleteRowFilter;
use crate::dict_filter::{DictionaryCandidate, eligible_columns};
use crate::io::{RangeFetcher, StoppableReader};
use crate::lazy_plan::LazyReadContext;
use crate::page_index_pruner::PageIndexPruner;
use crate::request::ScanRequest;
use crate::row_group_reader::RowGroupReader;
use crate::row_ranges::RowRanges;
use crate::schema_resolver::{ColumnMappingPlan, ColumnSource, ConverterCache};
use crate::statistics::ScanStatistics;
use crate::stats_pruner::{RowGroupDecision, StatsPruner};

/// Lifecycle of a [`ScanDriver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanPhase {
    Unopened,
    MetadataLoaded,
    RowGroupsPlanned,
    /// The last activated row group was dropped by its page index or dictionary.
    RowGroupSkipped,
    RowGroupActive,
    BatchEmitted,
    Exhausted,
    Failed,
}

/// One call's worth of output.
#[derive(Debug, Clone)]
pub struct NextBatch {
    pub batch: RecordBatch,
    /// No more rows. `batch` is empty when set.
    pub eof: bool,
}

/// Everything fixed by `init` and shared by all row groups.
pub(crate) struct ScanPlan {
    pub(crate) metadata: Arc<FileMetadata>,
    pub(crate) format: Arc<dyn FileFormat>,
    pub(crate) evaluator: Arc<dyn ConjunctEvaluator>,
    pub(crate) columns: ColumnMappingPlan,
    pub(crate) lazy: LazyReadContext,
    pub(crate) conjuncts: Vec<Conjunct>,
    pub(crate) value_ranges: ValueRanges,
    pub(crate) delete_filter: Option<DeleteRowFilter>,
    pub(crate) dict_candidates: Vec<DictionaryCandidate>,
    pub(crate) output_schema: SchemaRef,
    pub(crate) config: ScanConfig,
    pub(crate) trust_binary: bool,
    pub(crate) use_page_index: bool,
}

/// Scans one columnar file into Arrow record batches.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use arrow::datatypes::DataType;
/// use colscan_expr::{Expr, Literal, Operator};
/// use colscan_format::memory::{MemColumn, MemFileBuilder, MemFormat};
/// use colscan_format::{FileSchema, LogicalType, PhysicalType};
/// use colscan_scan::{RequestedColumn, ScanConfig, ScanDriver, ScanRequest};
///
/// let mut schema = FileSchema::builder();
/// let x = schema.leaf("x", PhysicalType::Int64, LogicalType::None, false);
/// schema.root(x);
/// let file = MemFileBuilder::new(schema.build()?)
///     .row_group(vec![MemColumn::int64((0..10).map(Some))])
///     .build()?;
///
/// let mut driver = ScanDriver::new(Arc::new(file), Arc::new(MemFormat), ScanConfig::default());
/// driver.init(
///     ScanRequest::new(vec![RequestedColumn::new("x", DataType::Int64, false)])
///         .with_conjuncts(vec![Expr::pred(
///             "x".into(),
///             Operator::GreaterThan(Literal::Integer(6)),
///         )]),
/// )?;
/// let rows: usize = driver
///     .into_batches()
///     .map(|batch| batch.map(|b| b.num_rows()))
///     .sum::<colscan_result::Result<usize>>()?;
/// assert_eq!(rows, 3);
/// # Ok::<(), colscan_result::Error>(())
/// ```
pub struct ScanDriver {
    reader: Arc<dyn ByteRangeReader>,
    format: Arc<dyn FileFormat>,
    evaluator: Arc<dyn ConjunctEvaluator>,
    config: ScanConfig,
    stop: Arc<AtomicBool>,
    phase: ScanPhase,
    metadata: Option<Arc<FileMetadata>>,
    converters: ConverterCache,
    output_schema: SchemaRef,
    plan: Option<ScanPlan>,
    fetcher: Option<RangeFetcher>,
    pending: VecDeque<usize>,
    active: Option<RowGroupReader>,
    stats: ScanStatistics,
    failure: Option<Error>,
}

impl ScanDriver {
    pub fn new(
        reader: Arc<dyn ByteRangeReader>,
        format: Arc<dyn FileFormat>,
        config: ScanConfig,
    ) -> Self {
        Self {
            reader,
            format,
            evaluator: Arc::new(ArrowConjunctEvaluator),
            config,
            stop: Arc::new(AtomicBool::new(false)),
            phase: ScanPhase::Unopened,
            metadata: None,
            converters: ConverterCache::default(),
            output_schema: Arc::new(Schema::empty()),
            plan: None,
            fetcher: None,
            pending: VecDeque::new(),
            active: None,
            stats: ScanStatistics::default(),
            failure: None,
        }
    }

    /// Replace the default Arrow-kernel conjunct evaluator.
    pub fn with_evaluator(mut self, evaluator: Arc<dyn ConjunctEvaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }

    /// Share a stop flag with the caller. Setting it makes the scan report
    /// end of file at its next read.
    pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = stop;
        self
    }

    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    #[inline]
    pub fn phase(&self) -> ScanPhase {
        self.phase
    }

    /// Arrow schema of the emitted batches.
    pub fn output_schema(&self) -> SchemaRef {
        Arc::clone(&self.output_schema)
    }

    /// Counters so far, including reads issued by the scan.
    pub fn statistics(&self) -> ScanStatistics {
        let mut stats = self.stats;
        if let Some(fetcher) = &self.fetcher {
            stats.read_calls = fetcher.read_calls();
            stats.read_bytes = fetcher.read_bytes();
        }
        stats
    }

    fn stoppable(&self) -> Arc<StoppableReader> {
        Arc::new(StoppableReader::new(
            Arc::clone(&self.reader),
            Arc::clone(&self.stop),
        ))
    }

    /// Load and cache the footer. `None` for an empty file.
    fn load_metadata(&mut self) -> Result<Option<Arc<FileMetadata>>> {
        if let Some(metadata) = &self.metadata {
            return Ok(Some(Arc::clone(metadata)));
        }
        let size = self
            .reader
            .size()
            .map_err(|e| Error::file_read(self.reader.path(), e))?;
        if size == 0 {
            return Ok(None);
        }
        let metadata = Arc::new(self.format.parse_metadata(self.stoppable().as_ref())?);
        debug!(
            path = self.reader.path(),
            row_groups = metadata.row_groups.len(),
            rows = metadata.num_rows(),
            "loaded file metadata"
        );
        self.metadata = Some(Arc::clone(&metadata));
        if self.phase == ScanPhase::Unopened {
            self.phase = ScanPhase::MetadataLoaded;
        }
        Ok(Some(metadata))
    }

    /// Top-level column names and types as stored in the file.
    pub fn parsed_schema(&mut self) -> Result<(Vec<String>, Vec<DataType>)> {
        let Some(metadata) = self.load_metadata()? else {
            return Ok((Vec::new(), Vec::new()));
        };
        let schema = &metadata.schema;
        Ok(schema
            .roots()
            .iter()
            .map(|root| (schema.node(*root).name.clone(), schema.arrow_type(*root)))
            .unzip())
    }

    /// Plan the scan of `request`.
    ///
    /// A cancelled metadata read or an empty file leaves the driver
    /// exhausted. Other errors move it to [`ScanPhase::Failed`].
    pub fn init(&mut self, request: ScanRequest) -> Result<()> {
        if !matches!(self.phase, ScanPhase::Unopened | ScanPhase::MetadataLoaded) {
            return Err(Error::InvalidArgumentError(
                "scan driver is already initialized".to_string(),
            ));
        }
        self.output_schema = Arc::new(Schema::new(
            request
                .columns
                .iter()
                .map(|c| Field::new(&c.name, c.data_type.clone(), c.nullable))
                .collect::<Vec<_>>(),
        ));
        match self.plan_scan(request) {
            Ok(()) => Ok(()),
            Err(err) if err.is_terminal() => {
                debug!(path = self.reader.path(), "scan stopped during planning");
                self.phase = ScanPhase::Exhausted;
                Ok(())
            }
            Err(err) => {
                self.phase = ScanPhase::Failed;
                self.failure = Some(err.duplicate());
                Err(err)
            }
        }
    }

    fn plan_scan(&mut self, request: ScanRequest) -> Result<()> {
        let Some(metadata) = self.load_metadata()? else {
            debug!(path = self.reader.path(), "empty file");
            self.phase = ScanPhase::Exhausted;
            return Ok(());
        };

        let acid = self.config.acid_columns.clone();
        let needs_acid = request
            .delete_rows
            .as_ref()
            .is_some_and(|rows| rows.needs_acid_columns() && !rows.is_empty());
        let hidden: Vec<&str> = if needs_acid { acid.all().to_vec() } else { Vec::new() };
        let columns =
            ColumnMappingPlan::resolve(&metadata.schema, &request, &hidden, &mut self.converters)?;
        if needs_acid {
            for name in acid.all() {
                if !matches!(columns.get(name).map(|c| &c.source), Some(ColumnSource::File(_))) {
                    return Err(Error::schema_mismatch(
                        name,
                        "triple deletes need the ACID identity columns in the file",
                    ));
                }
            }
        }
        for column in columns.columns() {
            if let ColumnSource::Partition(value) | ColumnSource::Missing(Some(value)) =
                &column.source
            {
                value.to_array(&column.data_type).map_err(|e| {
                    Error::schema_mismatch(&column.name, format!("constant does not fit: {e}"))
                })?;
            }
        }

        let value_ranges = request
            .value_ranges
            .clone()
            .unwrap_or_else(|| derive_value_ranges(&request.conjuncts));
        let lazy = LazyReadContext::plan(
            &columns,
            &request.conjuncts,
            needs_acid,
            &acid,
            self.config.enable_lazy_materialization,
        )?;
        let dict_candidates = if self.config.enable_dictionary_filter {
            eligible_columns(&metadata.schema, &columns, &lazy, &request.conjuncts)
        } else {
            Vec::new()
        };
        let use_page_index = self.config.enable_filter_by_min_max
            && self.config.enable_page_index
            && !request.conjuncts.is_empty()
            && !value_ranges.is_empty()
            && !columns.reads_complex(&metadata.schema);

        let pruner = StatsPruner::new(&metadata, self.config.enable_filter_by_min_max);
        for (idx, row_group) in metadata.row_groups.iter().enumerate() {
            if row_group.num_rows == 0 {
                continue;
            }
            match pruner.decide(row_group, &columns, &value_ranges) {
                RowGroupDecision::Read => self.pending.push_back(idx),
                RowGroupDecision::Skip { column } => {
                    self.stats.filtered_row_groups += 1;
                    self.stats.filtered_group_rows += row_group.num_rows;
                    self.stats.filtered_bytes += row_group.compressed_size;
                    debug!(
                        row_group = row_group.id,
                        column = column.as_str(),
                        rows = row_group.num_rows,
                        "skipping row group: statistics exclude every row"
                    );
                }
            }
        }
        debug!(
            path = self.reader.path(),
            planned = self.pending.len(),
            skipped = self.stats.filtered_row_groups,
            page_index = use_page_index,
            dictionary_candidates = dict_candidates.len(),
            "planned row groups"
        );

        let delete_filter = request
            .delete_rows
            .filter(|rows| !rows.is_empty())
            .map(|rows| DeleteRowFilter::new(rows, acid));
        self.plan = Some(ScanPlan {
            trust_binary: pruner.trusts_binary_statistics(),
            metadata: Arc::clone(&metadata),
            format: Arc::clone(&self.format),
            evaluator: Arc::clone(&self.evaluator),
            columns,
            lazy,
            conjuncts: request.conjuncts,
            value_ranges,
            delete_filter,
            dict_candidates,
            output_schema: Arc::clone(&self.output_schema),
            config: self.config.clone(),
            use_page_index,
        });
        self.fetcher = Some(RangeFetcher::new(
            self.stoppable(),
            self.config.once_max_read_bytes,
        ));
        self.phase = ScanPhase::RowGroupsPlanned;
        Ok(())
    }

    /// Produce the next batch of at most `capacity` rows (`0` means the
    /// configured batch size).
    pub fn next_batch(&mut self, capacity: usize) -> Result<NextBatch> {
        match self.phase {
            ScanPhase::Unopened | ScanPhase::MetadataLoaded => {
                return Err(Error::InvalidArgumentError(
                    "next_batch called before init".to_string(),
                ));
            }
            ScanPhase::Exhausted => return Ok(self.eof()),
            ScanPhase::Failed => {
                return Err(self.failure.as_ref().map_or_else(
                    || Error::Internal("scan failed".to_string()),
                    Error::duplicate,
                ));
            }
            ScanPhase::RowGroupsPlanned
            | ScanPhase::RowGroupSkipped
            | ScanPhase::RowGroupActive
            | ScanPhase::BatchEmitted => {}
        }
        let capacity = if capacity == 0 {
            self.config.batch_size.max(1)
        } else {
            capacity
        };
        match self.advance(capacity) {
            Ok(Some(batch)) => {
                self.phase = ScanPhase::BatchEmitted;
                self.stats.emitted_rows += batch.num_rows() as u64;
                self.stats.emitted_batches += 1;
                Ok(NextBatch { batch, eof: false })
            }
            Ok(None) => {
                self.finish();
                Ok(self.eof())
            }
            Err(err) if err.is_terminal() => {
                debug!(path = self.reader.path(), "scan stopped");
                self.finish();
                Ok(self.eof())
            }
            Err(err) => {
                self.phase = ScanPhase::Failed;
                self.active = None;
                self.failure = Some(err.duplicate());
                Err(err)
            }
        }
    }

    fn eof(&self) -> NextBatch {
        NextBatch {
            batch: RecordBatch::new_empty(Arc::clone(&self.output_schema)),
            eof: true,
        }
    }

    fn finish(&mut self) {
        self.phase = ScanPhase::Exhausted;
        self.active = None;
        self.pending.clear();
        let stats = self.statistics();
        debug!(
            path = self.reader.path(),
            read_row_groups = stats.read_row_groups,
            filtered_row_groups = stats.filtered_row_groups,
            dict_filtered_row_groups = stats.dict_filtered_row_groups,
            filtered_page_rows = stats.filtered_page_rows,
            read_rows = stats.read_rows,
            emitted_rows = stats.emitted_rows,
            read_bytes = stats.read_bytes,
            "scan finished"
        );
    }

    fn advance(&mut self, capacity: usize) -> Result<Option<RecordBatch>> {
        let (Some(plan), Some(fetcher)) = (self.plan.as_ref(), self.fetcher.as_mut()) else {
            return Err(Error::Internal("scan plan missing after init".to_string()));
        };
        loop {
            if self.stop.load(Ordering::Relaxed) {
                return Err(Error::Cancelled);
            }
            if let Some(active) = self.active.as_mut() {
                if let Some(batch) = active.next_batch(plan, capacity, fetcher, &mut self.stats)? {
                    return Ok(Some(batch));
                }
                self.active = None;
                continue;
            }
            let Some(rg_index) = self.pending.pop_front() else {
                return Ok(None);
            };
            let row_group = &plan.metadata.row_groups[rg_index];
            let rows = if plan.use_page_index {
                PageIndexPruner::new(
                    &plan.metadata.schema,
                    plan.format.as_ref(),
                    plan.trust_binary,
                )
                .candidate_rows(
                    row_group,
                    &plan.columns,
                    &plan.value_ranges,
                    fetcher,
                    &mut self.stats,
                )?
            } else {
                RowRanges::full(row_group.num_rows)
            };
            if rows.is_empty() {
                debug!(row_group = row_group.id, "skipping row group: no page can match");
                self.phase = ScanPhase::RowGroupSkipped;
                continue;
            }
            let Some(reader) = RowGroupReader::open(plan, rg_index, rows, fetcher, &mut self.stats)?
            else {
                self.phase = ScanPhase::RowGroupSkipped;
                continue;
            };
            trace!(row_group = row_group.id, "activated row group");
            self.stats.read_row_groups += 1;
            self.active = Some(reader);
            self.phase = ScanPhase::RowGroupActive;
        }
    }

    /// Iterate the remaining batches with the configured batch size.
    pub fn into_batches(self) -> ScanBatches {
        ScanBatches {
            driver: self,
            done: false,
        }
    }
}

/// Iterator over a driver's batches. Yields at most one error.
pub struct ScanBatches {
    driver: ScanDriver,
    done: bool,
}

impl ScanBatches {
    pub fn statistics(&self) -> ScanStatistics {
        self.driver.statistics()
    }
}

impl Iterator for ScanBatches {
    type Item = Result<RecordBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.driver.next_batch(0) {
            Ok(next) if next.eof => {
                self.done = true;
                None
            }
            Ok(next) => Some(Ok(next.batch)),
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::AsArray;
    use arrow::datatypes::Int64Type;
    use bytes::Bytes;
    use colscan_expr::{Expr, Literal, Operator};
    use colscan_format::memory::{MemColumn, MemFile, MemFileBuilder, MemFormat};
    use colscan_format::{FileSchema, LogicalType, PhysicalType};

    use crate::request::RequestedColumn;

    fn file() -> MemFile {
        let mut b = FileSchema::builder();
        let x = b.leaf("x", PhysicalType::Int64, LogicalType::None, false);
        b.root(x);
        MemFileBuilder::new(b.build().unwrap())
            .row_group(vec![MemColumn::int64((0..10).map(Some))])
            .row_group(vec![MemColumn::int64((10..20).map(Some))])
            .build()
            .unwrap()
    }

    fn driver(file: MemFile) -> ScanDriver {
        ScanDriver::new(Arc::new(file), Arc::new(MemFormat), ScanConfig::default())
    }

    fn request() -> ScanRequest {
        ScanRequest::new(vec![RequestedColumn::new("x", DataType::Int64, false)])
    }

    #[test]
    fn phases_follow_the_scan() {
        let mut driver = driver(file());
        assert_eq!(driver.phase(), ScanPhase::Unopened);
        driver.init(request()).unwrap();
        assert_eq!(driver.phase(), ScanPhase::RowGroupsPlanned);
        let next = driver.next_batch(4).unwrap();
        assert_eq!(next.batch.num_rows(), 4);
        assert_eq!(driver.phase(), ScanPhase::BatchEmitted);
        let mut total = 4;
        loop {
            let next = driver.next_batch(4).unwrap();
            if next.eof {
                break;
            }
            total += next.batch.num_rows();
        }
        assert_eq!(total, 20);
        assert_eq!(driver.phase(), ScanPhase::Exhausted);
        assert!(driver.next_batch(4).unwrap().eof);
        assert_eq!(driver.statistics().read_row_groups, 2);
    }

    #[test]
    fn batches_are_in_row_order() {
        let mut driver = driver(file());
        driver
            .init(request().with_conjuncts(vec![Expr::pred(
                "x".to_string(),
                Operator::GreaterThanOrEquals(Literal::Integer(8)),
            )]))
            .unwrap();
        let values: Vec<i64> = driver
            .into_batches()
            .flat_map(|b| b.unwrap().column(0).as_primitive::<Int64Type>().values().to_vec())
            .collect();
        assert_eq!(values, (8..20).collect::<Vec<_>>());
    }

    #[test]
    fn empty_file_is_eof() {
        let mut driver = driver(MemFile::new("empty", Bytes::new()));
        driver.init(request()).unwrap();
        assert_eq!(driver.phase(), ScanPhase::Exhausted);
        let next = driver.next_batch(0).unwrap();
        assert!(next.eof);
        assert_eq!(next.batch.num_columns(), 1);
        assert_eq!(driver.parsed_schema().unwrap(), (Vec::new(), Vec::new()));
    }

    #[test]
    fn failures_are_replayed() {
        let mut driver = driver(file());
        let err = driver
            .init(ScanRequest::new(vec![RequestedColumn::new(
                "x",
                DataType::Struct(vec![Field::new("a", DataType::Int64, true)].into()),
                false,
            )]))
            .unwrap_err();
        assert!(matches!(err, Error::SchemaMismatch { .. }));
        assert_eq!(driver.phase(), ScanPhase::Failed);
        assert!(matches!(driver.next_batch(0), Err(Error::SchemaMismatch { .. })));
    }

    #[test]
    fn next_batch_requires_init() {
        let mut driver = driver(file());
        assert!(matches!(driver.next_batch(0), Err(Error::InvalidArgumentError(_))));
        let (names, types) = driver.parsed_schema().unwrap();
        assert_eq!(names, vec!["x"]);
        assert_eq!(types, vec![DataType::Int64]);
        assert_eq!(driver.phase(), ScanPhase::MetadataLoaded);
    }

    #[test]
    fn driver_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<ScanDriver>();
        assert_send::<ScanBatches>();
    }
}
