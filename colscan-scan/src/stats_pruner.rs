//! Row-group pruning from chunk statistics.

use colscan_expr::{ColumnValueRange, Literal, ValueRanges};
use colscan_format::{FileMetadata, FileSchema, RowGroupDescriptor};
use tracing::warn;

use crate::plain::statistics_min_max;
use crate::schema_resolver::{ColumnMappingPlan, ColumnSource, ReadPlan, TypeConverter};

/// Whether binary min/max written by `created_by` can be trusted.
///
/// Writers identifying as `parquet-mr` before 1.8.0 computed byte-array
/// statistics with signed byte comparison. Files that do not name their
/// writer (or name it unparsably) get the same treatment.
pub fn binary_statistics_trusted(created_by: Option<&str>) -> bool {
    let Some(created_by) = created_by.map(str::trim).filter(|s| !s.is_empty()) else {
        return false;
    };
    let Some((application, rest)) = created_by.split_once(" version ") else {
        return false;
    };
    if !application.trim().eq_ignore_ascii_case("parquet-mr") {
        return true;
    }
    let Some(version) = rest.split_whitespace().next() else {
        return false;
    };
    match parse_version(version) {
        Some(version) => version >= (1, 8, 0),
        None => false,
    }
}

fn parse_version(version: &str) -> Option<(u32, u32, u32)> {
    let core = version.split(['-', '+']).next()?;
    let mut parts = core.split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next()?.parse().ok()?;
    let patch = parts.next().map_or(Some(0), |p| p.parse().ok())?;
    Some((major, minor, patch))
}

/// Outcome for one row group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowGroupDecision {
    Read,
    /// Statistics of `column` prove no row can match.
    Skip { column: String },
}

/// Decides, per row group, whether statistics prove that no row can match.
#[derive(Debug)]
pub struct StatsPruner<'a> {
    schema: &'a FileSchema,
    trust_binary: bool,
    enabled: bool,
}

impl<'a> StatsPruner<'a> {
    pub fn new(metadata: &'a FileMetadata, enabled: bool) -> Self {
        let trust_binary = binary_statistics_trusted(metadata.created_by.as_deref());
        if enabled && !trust_binary {
            warn!(
                created_by = metadata.created_by.as_deref().unwrap_or(""),
                "ignoring binary column statistics from this writer"
            );
        }
        Self {
            schema: &metadata.schema,
            trust_binary,
            enabled,
        }
    }

    #[inline]
    pub fn trusts_binary_statistics(&self) -> bool {
        self.trust_binary
    }

    pub fn decide(
        &self,
        row_group: &RowGroupDescriptor,
        plan: &ColumnMappingPlan,
        ranges: &ValueRanges,
    ) -> RowGroupDecision {
        if !self.enabled {
            return RowGroupDecision::Read;
        }
        let mut names: Vec<&String> = ranges.keys().collect();
        names.sort();
        for name in names {
            let range = &ranges[name];
            if range.is_empty() {
                return RowGroupDecision::Skip {
                    column: name.clone(),
                };
            }
            if range.is_unbounded() {
                continue;
            }
            let Some(column) = plan.get(name) else {
                continue;
            };
            let may_match = match &column.source {
                ColumnSource::Partition(value) | ColumnSource::Missing(Some(value)) => {
                    constant_may_match(range, value)
                }
                ColumnSource::Missing(None) => range.accepts_null(),
                ColumnSource::File(read) => self.chunk_may_match(row_group, read, range),
            };
            if !may_match {
                return RowGroupDecision::Skip {
                    column: name.clone(),
                };
            }
        }
        RowGroupDecision::Read
    }

    fn chunk_may_match(
        &self,
        row_group: &RowGroupDescriptor,
        read: &ReadPlan,
        range: &ColumnValueRange,
    ) -> bool {
        let ReadPlan::Leaf { node, converter, .. } = read else {
            return true;
        };
        // text reinterpretation can turn values into nulls
        if matches!(converter.as_ref(), TypeConverter::StringReinterpret { .. }) {
            return true;
        }
        let Some(stats) = row_group.column(*node).and_then(|c| c.statistics.as_ref()) else {
            return true;
        };
        let num_values = row_group.column(*node).map_or(row_group.num_rows, |c| c.num_values);
        let all_null = stats.null_count == Some(num_values) && num_values > 0;
        let has_null = stats.null_count.is_none_or(|n| n > 0);
        let bounds = if converter.preserves_order() {
            statistics_min_max(self.schema.node(*node), stats, self.trust_binary)
        } else {
            None
        };
        let (min, max) = match &bounds {
            Some((min, max)) => (Some(min), Some(max)),
            None => (None, None),
        };
        let value_match = !all_null && range.may_match_values(min, max);
        let null_match = has_null && range.accepts_null();
        value_match || null_match
    }
}

pub(crate) fn constant_may_match(range: &ColumnValueRange, value: &Literal) -> bool {
    if value.is_null() {
        range.accepts_null()
    } else {
        range.may_match_values(Some(value), Some(value))
    }
}
