//! Column index and offset index, the per-page statistics of a column chunk.

use bitcode::{Decode, Encode};
use colscan_result::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Encode, Decode)]
pub enum BoundaryOrder {
    Unordered,
    Ascending,
    Descending,
}

/// Per-page min/max, in the same plain encoding as chunk statistics.
#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode)]
pub struct ColumnIndex {
    pub null_pages: Vec<bool>,
    pub min_values: Vec<Vec<u8>>,
    pub max_values: Vec<Vec<u8>>,
    pub null_counts: Option<Vec<u64>>,
    pub boundary_order: BoundaryOrder,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Encode, Decode)]
pub struct PageLocation {
    pub offset: u64,
    pub compressed_page_size: u32,
    /// Row of the first value in the page, relative to the row group.
    pub first_row_index: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode)]
pub struct OffsetIndex {
    pub page_locations: Vec<PageLocation>,
}

/// A page joined with its statistics and row span.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PageDescriptor {
    pub page_id: usize,
    pub row_offset_within_group: u64,
    pub num_rows: u64,
    /// `None` for null pages.
    pub min: Option<Vec<u8>>,
    pub max: Option<Vec<u8>>,
    pub null_page: bool,
    pub null_count: Option<u64>,
}

/// Join a column index with its offset index.
///
/// Fails with [`Error::CorruptData`] when the two disagree on the page count,
/// when the page row offsets are not strictly increasing within the group, or
/// when the pages leave rows of the group uncovered.
pub fn page_descriptors(
    column_index: &ColumnIndex,
    offset_index: &OffsetIndex,
    group_rows: u64,
) -> Result<Vec<PageDescriptor>> {
    let pages = offset_index.page_locations.len();
    if column_index.null_pages.len() != pages
        || column_index.min_values.len() != pages
        || column_index.max_values.len() != pages
    {
        return Err(Error::corrupt(format!(
            "column index has {} pages, offset index has {pages}",
            column_index.null_pages.len()
        )));
    }
    if let Some(counts) = &column_index.null_counts
        && counts.len() != pages
    {
        return Err(Error::corrupt("column index null counts length mismatch"));
    }

    let first_row = offset_index.page_locations.first().map(|l| l.first_row_index);
    if group_rows > 0 && first_row != Some(0) {
        return Err(Error::corrupt(format!(
            "pages start at row {first_row:?}, group rows begin at 0"
        )));
    }

    let mut out = Vec::with_capacity(pages);
    for (page_id, location) in offset_index.page_locations.iter().enumerate() {
        let start = location.first_row_index;
        let end = offset_index
            .page_locations
            .get(page_id + 1)
            .map_or(group_rows, |next| next.first_row_index);
        if start >= end || end > group_rows {
            return Err(Error::corrupt(format!(
                "page {page_id} has invalid row span [{start}, {end}) \
                 in a group of {group_rows} rows"
            )));
        }
        let null_page = column_index.null_pages[page_id];
        out.push(PageDescriptor {
            page_id,
            row_offset_within_group: start,
            num_rows: end - start,
            min: (!null_page).then(|| column_index.min_values[page_id].clone()),
            max: (!null_page).then(|| column_index.max_values[page_id].clone()),
            null_page,
            null_count: column_index.null_counts.as_ref().map(|c| c[page_id]),
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn location(first_row_index: u64) -> PageLocation {
        PageLocation {
            offset: 0,
            compressed_page_size: 0,
            first_row_index,
        }
    }

    #[test]
    fn joins_pages_with_row_spans() {
        let ci = ColumnIndex {
            null_pages: vec![false, true],
            min_values: vec![vec![1], vec![]],
            max_values: vec![vec![9], vec![]],
            null_counts: Some(vec![0, 40]),
            boundary_order: BoundaryOrder::Ascending,
        };
        let oi = OffsetIndex {
            page_locations: vec![location(0), location(60)],
        };
        let pages = page_descriptors(&ci, &oi, 100).unwrap();
        assert_eq!(pages[0].num_rows, 60);
        assert_eq!(pages[1].row_offset_within_group, 60);
        assert_eq!(pages[1].num_rows, 40);
        assert!(pages[1].null_page);
        assert_eq!(pages[1].min, None);
    }

    #[test]
    fn rejects_non_increasing_offsets() {
        let ci = ColumnIndex {
            null_pages: vec![false, false],
            min_values: vec![vec![1], vec![2]],
            max_values: vec![vec![1], vec![2]],
            null_counts: None,
            boundary_order: BoundaryOrder::Unordered,
        };
        let oi = OffsetIndex {
            page_locations: vec![location(50), location(10)],
        };
        assert!(page_descriptors(&ci, &oi, 100).is_err());
    }

    #[test]
    fn rejects_pages_that_leave_rows_uncovered() {
        let ci = ColumnIndex {
            null_pages: vec![false, false],
            min_values: vec![vec![1], vec![2]],
            max_values: vec![vec![1], vec![2]],
            null_counts: None,
            boundary_order: BoundaryOrder::Ascending,
        };
        let late_start = OffsetIndex {
            page_locations: vec![location(20), location(60)],
        };
        assert!(matches!(
            page_descriptors(&ci, &late_start, 100),
            Err(Error::CorruptData(_))
        ));

        let empty = ColumnIndex {
            null_pages: vec![],
            min_values: vec![],
            max_values: vec![],
            null_counts: None,
            boundary_order: BoundaryOrder::Unordered,
        };
        let no_pages = OffsetIndex {
            page_locations: vec![],
        };
        assert!(page_descriptors(&empty, &no_pages, 100).is_err());
        assert!(page_descriptors(&empty, &no_pages, 0).unwrap().is_empty());
    }
}
