//! Delete markers folded into the row filter.
//!
//! Two delete modes exist. Position deletes name absolute row positions in
//! the file and are resolved with a binary search per batch window. ACID
//! deletes name rows by their `(original_transaction, bucket, row_id)`
//! identity, which lives in data columns, so every row of the window has to
//! be looked up.

use std::ops::Range;

use arrow::array::{Array, AsArray, RecordBatch};
use arrow::datatypes::{Int32Type, Int64Type};
use arrow_buffer::{BooleanBuffer, BooleanBufferBuilder};
use colscan_result::{Error, Result};
use rustc_hash::FxHashSet;

use crate::config::AcidColumnNames;

/// Identity of a row in a transactional table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AcidRowId {
    pub original_transaction: i64,
    pub bucket: i32,
    pub row_id: i64,
}

/// Rows deleted from the file, supplied before the scan starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteRowSet {
    /// Sorted, deduplicated absolute row positions.
    Positions(Vec<i64>),
    Triples(FxHashSet<AcidRowId>),
}

impl DeleteRowSet {
    pub fn positions(rows: impl IntoIterator<Item = i64>) -> Self {
        let mut rows: Vec<i64> = rows.into_iter().collect();
        rows.sort_unstable();
        rows.dedup();
        DeleteRowSet::Positions(rows)
    }

    pub fn triples(rows: impl IntoIterator<Item = AcidRowId>) -> Self {
        DeleteRowSet::Triples(rows.into_iter().collect())
    }

    pub fn is_empty(&self) -> bool {
        match self {
            DeleteRowSet::Positions(rows) => rows.is_empty(),
            DeleteRowSet::Triples(rows) => rows.is_empty(),
        }
    }

    /// Whether filtering needs the ACID identity columns.
    pub fn needs_acid_columns(&self) -> bool {
        matches!(self, DeleteRowSet::Triples(_))
    }
}

/// Applies a [`DeleteRowSet`] to batch windows.
#[derive(Debug)]
pub struct DeleteRowFilter {
    rows: DeleteRowSet,
    acid: AcidColumnNames,
}

impl DeleteRowFilter {
    pub fn new(rows: DeleteRowSet, acid: AcidColumnNames) -> Self {
        Self { rows, acid }
    }

    pub fn rows(&self) -> &DeleteRowSet {
        &self.rows
    }

    /// Clear the bits of deleted rows in `filter`.
    ///
    /// `window` holds absolute file row positions; `filter` has one bit per
    /// row of the window. `batch` must carry the ACID identity columns when
    /// the set is triple keyed. Returns the fused filter and the number of
    /// rows it newly cleared.
    pub fn apply(
        &self,
        filter: BooleanBuffer,
        window: Range<u64>,
        batch: &RecordBatch,
    ) -> Result<(BooleanBuffer, u64)> {
        let deleted = match &self.rows {
            DeleteRowSet::Positions(rows) => position_mask(rows, window),
            DeleteRowSet::Triples(rows) => Some(self.triple_mask(rows, batch)?),
        };
        let Some(keep) = deleted else {
            return Ok((filter, 0));
        };
        let before = filter.count_set_bits();
        let fused = &filter & &keep;
        let cleared = (before - fused.count_set_bits()) as u64;
        Ok((fused, cleared))
    }

    fn triple_mask(
        &self,
        rows: &FxHashSet<AcidRowId>,
        batch: &RecordBatch,
    ) -> Result<BooleanBuffer> {
        let column = |name: &str| {
            batch.column_by_name(name).ok_or_else(|| {
                Error::Internal(format!("ACID column '{name}' missing from predicate batch"))
            })
        };
        let txn = column(&self.acid.original_transaction)?;
        let bucket = column(&self.acid.bucket)?;
        let row_id = column(&self.acid.row_id)?;
        let (Some(txn), Some(bucket), Some(row_id)) = (
            txn.as_primitive_opt::<Int64Type>(),
            bucket.as_primitive_opt::<Int32Type>(),
            row_id.as_primitive_opt::<Int64Type>(),
        ) else {
            return Err(Error::schema_mismatch(
                self.acid.original_transaction.clone(),
                "ACID identity columns must be int64, int32, int64",
            ));
        };

        let mut keep = BooleanBufferBuilder::new(batch.num_rows());
        for idx in 0..batch.num_rows() {
            if txn.is_null(idx) || bucket.is_null(idx) || row_id.is_null(idx) {
                keep.append(true);
                continue;
            }
            let key = AcidRowId {
                original_transaction: txn.value(idx),
                bucket: bucket.value(idx),
                row_id: row_id.value(idx),
            };
            keep.append(!rows.contains(&key));
        }
        Ok(keep.finish())
    }
}

/// Keep-mask for a window, or `None` when no delete falls inside it.
fn position_mask(rows: &[i64], window: Range<u64>) -> Option<BooleanBuffer> {
    let (start, end) = (window.start as i64, window.end as i64);
    let first = rows.partition_point(|r| *r < start);
    let hits = rows[first..].iter().take_while(|r| **r < end);
    let mut keep: Option<BooleanBufferBuilder> = None;
    for row in hits {
        let builder = keep.get_or_insert_with(|| {
            let mut b = BooleanBufferBuilder::new((end - start) as usize);
            b.append_n((end - start) as usize, true);
            b
        });
        builder.set_bit((row - start) as usize, false);
    }
    keep.map(|mut b| b.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use arrow::array::{Int32Array, Int64Array};
    use arrow::datatypes::{DataType, Field, Schema};

    fn empty_batch(rows: usize) -> RecordBatch {
        RecordBatch::try_new_with_options(
            Arc::new(Schema::empty()),
            vec![],
            &arrow::array::RecordBatchOptions::new().with_row_count(Some(rows)),
        )
        .unwrap()
    }

    #[test]
    fn position_deletes_clear_exact_rows() {
        let filter =
            DeleteRowFilter::new(DeleteRowSet::positions([9, 5]), AcidColumnNames::default());
        let (out, cleared) = filter
            .apply(BooleanBuffer::new_set(10), 0..10, &empty_batch(10))
            .unwrap();
        let kept: Vec<usize> = out.set_indices().collect();
        assert_eq!(kept, vec![0, 1, 2, 3, 4, 6, 7, 8]);
        assert_eq!(cleared, 2);
    }

    #[test]
    fn position_deletes_respect_window_offset() {
        let filter = DeleteRowFilter::new(
            DeleteRowSet::positions([99, 100, 104, 105]),
            AcidColumnNames::default(),
        );
        let (out, cleared) = filter
            .apply(BooleanBuffer::new_set(5), 100..105, &empty_batch(5))
            .unwrap();
        assert_eq!(out.set_indices().collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(cleared, 2);
    }

    #[test]
    fn applying_twice_is_idempotent() {
        let filter =
            DeleteRowFilter::new(DeleteRowSet::positions([1, 3]), AcidColumnNames::default());
        let batch = empty_batch(6);
        let (once, _) = filter.apply(BooleanBuffer::new_set(6), 0..6, &batch).unwrap();
        let (twice, cleared) = filter.apply(once.clone(), 0..6, &batch).unwrap();
        assert_eq!(once, twice);
        assert_eq!(cleared, 0);
    }

    #[test]
    fn triple_deletes_match_identity_columns() {
        let acid = AcidColumnNames::default();
        let schema = Arc::new(Schema::new(vec![
            Field::new(&acid.original_transaction, DataType::Int64, false),
            Field::new(&acid.bucket, DataType::Int32, false),
            Field::new(&acid.row_id, DataType::Int64, false),
        ]));
        let batch = RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int64Array::from(vec![7, 7, 8])),
                Arc::new(Int32Array::from(vec![0, 0, 0])),
                Arc::new(Int64Array::from(vec![0, 1, 0])),
            ],
        )
        .unwrap();
        let filter = DeleteRowFilter::new(
            DeleteRowSet::triples([AcidRowId {
                original_transaction: 7,
                bucket: 0,
                row_id: 1,
            }]),
            acid,
        );
        let (out, cleared) = filter.apply(BooleanBuffer::new_set(3), 0..3, &batch).unwrap();
        assert_eq!(out.set_indices().collect::<Vec<_>>(), vec![0, 2]);
        assert_eq!(cleared, 1);
    }
}
