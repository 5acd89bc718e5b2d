use arrow::datatypes::DataType;
use colscan_expr::{Conjunct, Literal, ValueRanges};
use rustc_hash::FxHashMap;

use crate::delete_filter::DeleteRowSet;

/// One output column requested by the query engine.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestedColumn {
    /// Table column name. Conjuncts refer to columns by this name.
    pub name: String,
    pub data_type: DataType,
    pub nullable: bool,
    /// Value used when the file lacks the column.
    pub default: Option<Literal>,
}

impl RequestedColumn {
    pub fn new(name: impl Into<String>, data_type: DataType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable,
            default: None,
        }
    }

    pub fn with_default(mut self, default: Literal) -> Self {
        self.default = Some(default);
        self
    }
}

/// Everything `ScanDriver::init` needs to plan a scan.
#[derive(Debug, Clone, Default)]
pub struct ScanRequest {
    /// Output columns, in output order.
    pub columns: Vec<RequestedColumn>,
    /// ANDed filters. Every referenced column must be requested.
    pub conjuncts: Vec<Conjunct>,
    /// Per-column value domains. Derived from `conjuncts` when absent.
    pub value_ranges: Option<ValueRanges>,
    pub delete_rows: Option<DeleteRowSet>,
    /// Constant values for partition columns; these are never read from the file.
    pub partition_values: FxHashMap<String, Literal>,
    /// Table column name to file column name, for renamed columns.
    pub column_renames: FxHashMap<String, String>,
}

impl ScanRequest {
    pub fn new(columns: Vec<RequestedColumn>) -> Self {
        Self {
            columns,
            ..Self::default()
        }
    }

    pub fn with_conjuncts(mut self, conjuncts: Vec<Conjunct>) -> Self {
        self.conjuncts = conjuncts;
        self
    }

    pub fn with_value_ranges(mut self, ranges: ValueRanges) -> Self {
        self.value_ranges = Some(ranges);
        self
    }

    pub fn with_delete_rows(mut self, rows: DeleteRowSet) -> Self {
        self.delete_rows = Some(rows);
        self
    }

    pub fn with_partition_value(mut self, column: impl Into<String>, value: Literal) -> Self {
        self.partition_values.insert(column.into(), value);
        self
    }

    pub fn with_rename(
        mut self,
        table_column: impl Into<String>,
        file_column: impl Into<String>,
    ) -> Self {
        self.column_renames.insert(table_column.into(), file_column.into());
        self
    }
}
