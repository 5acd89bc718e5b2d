//! Sorted, disjoint sets of row ranges within a row group.

use std::ops::Range;

/// Row offsets relative to a row group, kept sorted and merged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowRanges {
    ranges: Vec<Range<u64>>,
}

impl RowRanges {
    pub fn empty() -> Self {
        Self::default()
    }

    /// `[0, num_rows)`.
    pub fn full(num_rows: u64) -> Self {
        Self::from_ranges([0..num_rows])
    }

    /// Sort and merge arbitrary ranges. Empty ranges are dropped; touching
    /// ranges are coalesced.
    pub fn from_ranges(ranges: impl IntoIterator<Item = Range<u64>>) -> Self {
        let mut ranges: Vec<Range<u64>> = ranges.into_iter().filter(|r| r.start < r.end).collect();
        ranges.sort_by_key(|r| r.start);
        let mut merged: Vec<Range<u64>> = Vec::with_capacity(ranges.len());
        for range in ranges {
            match merged.last_mut() {
                Some(last) if range.start <= last.end => last.end = last.end.max(range.end),
                _ => merged.push(range),
            }
        }
        Self { ranges: merged }
    }

    pub fn union(&self, other: &RowRanges) -> RowRanges {
        Self::from_ranges(self.ranges.iter().chain(other.ranges.iter()).cloned())
    }

    /// Rows of `[0, num_rows)` not covered by `self`.
    pub fn complement(&self, num_rows: u64) -> RowRanges {
        let mut out = Vec::with_capacity(self.ranges.len() + 1);
        let mut cursor = 0u64;
        for range in &self.ranges {
            if range.start >= num_rows {
                break;
            }
            if range.start > cursor {
                out.push(cursor..range.start);
            }
            cursor = cursor.max(range.end);
        }
        if cursor < num_rows {
            out.push(cursor..num_rows);
        }
        Self { ranges: out }
    }

    pub fn row_count(&self) -> u64 {
        self.ranges.iter().map(|r| r.end - r.start).sum()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn contains(&self, row: u64) -> bool {
        let idx = self.ranges.partition_point(|r| r.end <= row);
        self.ranges.get(idx).is_some_and(|r| r.start <= row)
    }

    #[inline]
    pub fn ranges(&self) -> &[Range<u64>] {
        &self.ranges
    }
}

/// Walks a [`RowRanges`] in windows of bounded size.
#[derive(Debug, Clone)]
pub(crate) struct RangeCursor {
    ranges: RowRanges,
    range_idx: usize,
    position: u64,
}

impl RangeCursor {
    pub(crate) fn new(ranges: RowRanges) -> Self {
        let position = ranges.ranges().first().map_or(0, |r| r.start);
        Self {
            ranges,
            range_idx: 0,
            position,
        }
    }

    /// Next contiguous window of at most `max_rows` rows.
    pub(crate) fn next_window(&mut self, max_rows: u64) -> Option<Range<u64>> {
        let max_rows = max_rows.max(1);
        loop {
            let range = self.ranges.ranges().get(self.range_idx)?;
            if self.position < range.end {
                let start = self.position.max(range.start);
                let end = range.end.min(start + max_rows);
                self.position = end;
                return Some(start..end);
            }
            self.range_idx += 1;
            if let Some(next) = self.ranges.ranges().get(self.range_idx) {
                self.position = next.start;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merges_overlapping_and_touching() {
        let r = RowRanges::from_ranges([10..20, 0..5, 5..7, 15..30, 40..40]);
        assert_eq!(r.ranges(), &[0..7, 10..30]);
        assert_eq!(r.row_count(), 27);
    }

    #[test]
    fn complement_within_group() {
        let skipped = RowRanges::from_ranges([0..10, 50..60]);
        assert_eq!(skipped.complement(100).ranges(), &[10..50, 60..100]);
        assert_eq!(RowRanges::empty().complement(5).ranges(), &[0..5]);
        assert!(RowRanges::full(5).complement(5).is_empty());
    }

    #[test]
    fn contains_uses_half_open_ranges() {
        let r = RowRanges::from_ranges([3..5, 8..9]);
        assert!(r.contains(3));
        assert!(!r.contains(5));
        assert!(r.contains(8));
        assert!(!r.contains(9));
    }

    #[test]
    fn cursor_splits_ranges_into_windows() {
        let mut cursor = RangeCursor::new(RowRanges::from_ranges([0..5, 10..12]));
        assert_eq!(cursor.next_window(3), Some(0..3));
        assert_eq!(cursor.next_window(3), Some(3..5));
        assert_eq!(cursor.next_window(3), Some(10..12));
        assert_eq!(cursor.next_window(3), None);
    }
}
