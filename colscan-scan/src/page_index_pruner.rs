//! Page-level pruning inside a kept row group.
//!
//! Each participating predicate column contributes the row spans of pages
//! that may hold a match. The candidate set is the union of those spans:
//! one column keeping a page is enough to read it, so the result can only
//! over-include rows.

use colscan_expr::{ColumnValueRange, ValueRanges};
use colscan_format::{
    FileFormat, FileSchema, PageDescriptor, RowGroupDescriptor, SchemaNode, page_descriptors,
};
use colscan_result::{Error, Result};
use tracing::{debug, warn};

use crate::io::RangeFetcher;
use crate::plain::usable_min_max;
use crate::row_ranges::RowRanges;
use crate::schema_resolver::{ColumnMappingPlan, ColumnSource, ReadPlan};
use crate::statistics::ScanStatistics;

pub struct PageIndexPruner<'a> {
    schema: &'a FileSchema,
    format: &'a dyn FileFormat,
    trust_binary: bool,
}

impl<'a> PageIndexPruner<'a> {
    pub fn new(schema: &'a FileSchema, format: &'a dyn FileFormat, trust_binary: bool) -> Self {
        Self {
            schema,
            format,
            trust_binary,
        }
    }

    /// Rows of `row_group` (relative to its first row) that may satisfy
    /// `ranges`.
    ///
    /// Index blobs that fail to parse leave the whole group in play. Only a
    /// cancelled read is returned as an error.
    pub(crate) fn candidate_rows(
        &self,
        row_group: &RowGroupDescriptor,
        plan: &ColumnMappingPlan,
        ranges: &ValueRanges,
        fetcher: &mut RangeFetcher,
        stats: &mut ScanStatistics,
    ) -> Result<RowRanges> {
        let full = RowRanges::full(row_group.num_rows);
        let mut names: Vec<&String> = ranges.keys().collect();
        names.sort();

        let mut kept: Option<RowRanges> = None;
        for name in names {
            let range = &ranges[name];
            if range.is_unbounded() {
                continue;
            }
            let Some(ColumnSource::File(ReadPlan::Leaf { node, converter, .. })) =
                plan.get(name).map(|c| &c.source)
            else {
                continue;
            };
            if !converter.preserves_order() {
                continue;
            }
            let Some(chunk) = row_group.column(*node).filter(|c| c.has_page_index()) else {
                continue;
            };
            let (Some(ci_range), Some(oi_range)) = (chunk.column_index, chunk.offset_index) else {
                continue;
            };

            stats.page_index_reads += 1;
            let pages = fetcher
                .fetch(ci_range)
                .and_then(|ci| Ok((ci, fetcher.fetch(oi_range)?)))
                .and_then(|(ci, oi)| {
                    let column_index = self.format.parse_column_index(&ci, chunk)?;
                    let offset_index = self.format.parse_offset_index(&oi, chunk)?;
                    page_descriptors(&column_index, &offset_index, row_group.num_rows)
                });
            let pages = match pages {
                Ok(pages) => pages,
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(err) => {
                    warn!(
                        row_group = row_group.id,
                        column = name.as_str(),
                        error = %err,
                        "unusable page index, reading the whole row group"
                    );
                    return Ok(full);
                }
            };

            let node = self.schema.node(*node);
            let column_rows = RowRanges::from_ranges(
                pages
                    .iter()
                    .filter(|page| self.page_may_match(node, page, range))
                    .map(|page| {
                        page.row_offset_within_group
                            ..page.row_offset_within_group + page.num_rows
                    }),
            );
            kept = Some(match kept {
                Some(previous) => previous.union(&column_rows),
                None => column_rows,
            });
        }

        let Some(kept) = kept else {
            return Ok(full);
        };
        let skipped = row_group.num_rows - kept.row_count();
        stats.filtered_page_rows += skipped;
        if skipped > 0 {
            debug!(
                row_group = row_group.id,
                skipped_rows = skipped,
                candidate_ranges = kept.ranges().len(),
                "page index pruned rows"
            );
        }
        Ok(kept)
    }

    fn page_may_match(
        &self,
        node: &SchemaNode,
        page: &PageDescriptor,
        range: &ColumnValueRange,
    ) -> bool {
        if page.null_page {
            return range.accepts_null();
        }
        let has_null = page.null_count.is_none_or(|n| n > 0);
        if has_null && range.accepts_null() {
            return true;
        }
        let (Some(min), Some(max)) = (&page.min, &page.max) else {
            return true;
        };
        match usable_min_max(node, min, max, false, self.trust_binary) {
            Some((min, max)) => range.may_match_values(Some(&min), Some(&max)),
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;

    use arrow::datatypes::DataType;
    use colscan_expr::{Expr, Literal, Operator, derive_value_ranges};
    use colscan_format::memory::{MemColumn, MemFile, MemFileBuilder, MemFormat};
    use colscan_format::{ByteRangeReader, FileMetadata, LogicalType, PhysicalType};

    use crate::io::StoppableReader;
    use crate::request::{RequestedColumn, ScanRequest};
    use crate::schema_resolver::ConverterCache;

    fn file() -> (MemFile, FileMetadata) {
        let mut b = FileSchema::builder();
        let x = b.leaf("x", PhysicalType::Int64, LogicalType::None, true);
        let y = b.leaf("y", PhysicalType::Int64, LogicalType::None, true);
        b.root(x).root(y);
        let file = MemFileBuilder::new(b.build().unwrap())
            .page_rows(10)
            .row_group(vec![
                MemColumn::int64((0..100).map(Some)),
                MemColumn::int64((0..100).map(|v| (v % 10 != 0).then_some(1000 - v))),
            ])
            .build()
            .unwrap();
        let metadata = MemFormat.parse_metadata(&file).unwrap();
        (file, metadata)
    }

    fn candidates(conjuncts: Vec<colscan_expr::Conjunct>) -> (RowRanges, ScanStatistics) {
        let (file, metadata) = file();
        let request = ScanRequest::new(vec![
            RequestedColumn::new("x", DataType::Int64, true),
            RequestedColumn::new("y", DataType::Int64, true),
        ]);
        let plan = ColumnMappingPlan::resolve(
            &metadata.schema,
            &request,
            &[],
            &mut ConverterCache::default(),
        )
        .unwrap();
        let inner: Arc<dyn ByteRangeReader> = Arc::new(file);
        let reader = Arc::new(StoppableReader::new(inner, Arc::new(AtomicBool::new(false))));
        let mut fetcher = RangeFetcher::new(reader, 1 << 20);
        let mut stats = ScanStatistics::default();
        let pruner = PageIndexPruner::new(&metadata.schema, &MemFormat, true);
        let rows = pruner
            .candidate_rows(
                &metadata.row_groups[0],
                &plan,
                &derive_value_ranges(&conjuncts),
                &mut fetcher,
                &mut stats,
            )
            .unwrap();
        (rows, stats)
    }

    #[test]
    fn keeps_only_overlapping_pages() {
        let (rows, stats) = candidates(vec![Expr::pred(
            "x".to_string(),
            Operator::Range {
                lower: std::ops::Bound::Included(Literal::Integer(45)),
                upper: std::ops::Bound::Excluded(Literal::Integer(52)),
            },
        )]);
        assert_eq!(rows.ranges(), &[40..60]);
        assert_eq!(stats.filtered_page_rows, 80);
        assert_eq!(stats.page_index_reads, 1);
    }

    #[test]
    fn columns_union_their_kept_pages() {
        let (rows, stats) = candidates(vec![
            Expr::pred("x".to_string(), Operator::LessThan(Literal::Integer(10))),
            Expr::pred("y".to_string(), Operator::Equals(Literal::Integer(915))),
        ]);
        assert_eq!(rows.ranges(), &[0..10, 80..90]);
        assert_eq!(stats.page_index_reads, 2);
    }

    #[test]
    fn null_tests_keep_pages_with_nulls() {
        let (rows, _) = candidates(vec![Expr::pred("y".to_string(), Operator::IsNull)]);
        assert_eq!(rows.row_count(), 100);
    }

    #[test]
    fn unbounded_ranges_keep_the_group() {
        let (rows, stats) = candidates(vec![]);
        assert_eq!(rows, RowRanges::full(100));
        assert_eq!(stats.page_index_reads, 0);
    }
}
