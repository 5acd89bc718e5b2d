//! Split of the read column set into predicate and lazy columns.

use colscan_expr::Conjunct;
use colscan_result::{Error, Result};
use rustc_hash::FxHashSet;
use tracing::debug;

use crate::config::AcidColumnNames;
use crate::schema_resolver::{ColumnMappingPlan, ColumnSource};

/// Which columns are read before filtering and which after.
///
/// Built once per scan and consulted by every batch. Column lists hold
/// table column names in request order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LazyReadContext {
    /// File columns read before predicate evaluation.
    pub predicate_columns: Vec<String>,
    /// File columns read only for surviving rows.
    pub lazy_columns: Vec<String>,
    /// Constant partition columns filled after filtering.
    pub partition_columns: Vec<String>,
    /// Columns absent from the file, filled after filtering.
    pub missing_columns: Vec<String>,
    /// Partition columns a conjunct references; filled before evaluation.
    pub predicate_partition_columns: Vec<String>,
    /// Missing columns a conjunct references; filled before evaluation.
    pub predicate_missing_columns: Vec<String>,
    pub can_lazy_read: bool,
    /// The first output column is filled after filtering, so the batch row
    /// count is not known from the first-pass columns alone.
    pub resize_first_column: bool,
}

impl LazyReadContext {
    /// Partition `plan` given the conjuncts.
    ///
    /// Every column referenced by a conjunct must be part of the plan. When
    /// `needs_acid` is set the hidden identity columns join the predicate
    /// columns so deletes can be resolved before lazy reads.
    pub fn plan(
        plan: &ColumnMappingPlan,
        conjuncts: &[Conjunct],
        needs_acid: bool,
        acid: &AcidColumnNames,
        enable_lazy: bool,
    ) -> Result<Self> {
        let mut referenced: FxHashSet<&str> = FxHashSet::default();
        for conjunct in conjuncts {
            for field in conjunct.referenced_fields() {
                if plan.get(field).is_none() {
                    return Err(Error::InvalidArgumentError(format!(
                        "conjunct references column '{field}' which is not requested"
                    )));
                }
                referenced.insert(field.as_str());
            }
        }
        if needs_acid {
            referenced.extend(acid.all());
        }

        let mut ctx = LazyReadContext::default();
        for column in plan.columns() {
            let in_predicate = referenced.contains(column.name.as_str());
            let name = column.name.clone();
            match (&column.source, in_predicate) {
                (ColumnSource::File(_), true) => ctx.predicate_columns.push(name),
                (ColumnSource::File(_), false) => ctx.lazy_columns.push(name),
                (ColumnSource::Partition(_), true) => ctx.predicate_partition_columns.push(name),
                (ColumnSource::Partition(_), false) => ctx.partition_columns.push(name),
                (ColumnSource::Missing(_), true) => ctx.predicate_missing_columns.push(name),
                (ColumnSource::Missing(_), false) => ctx.missing_columns.push(name),
            }
        }

        ctx.can_lazy_read =
            enable_lazy && !ctx.predicate_columns.is_empty() && !ctx.lazy_columns.is_empty();
        if !ctx.can_lazy_read {
            // Constants a conjunct references stay early in both modes.
            ctx.predicate_columns.append(&mut ctx.lazy_columns);
            ctx.predicate_columns
                .sort_by_key(|name| plan.position(name).unwrap_or(usize::MAX));
        }
        ctx.resize_first_column = plan
            .output_columns()
            .next()
            .is_some_and(|first| !ctx.is_early(&first.name));

        debug!(
            lazy = ctx.can_lazy_read,
            predicate_columns = ?ctx.predicate_columns,
            lazy_columns = ?ctx.lazy_columns,
            "planned column read order"
        );
        Ok(ctx)
    }

    /// Whether `name` is available before predicate evaluation.
    pub fn is_early(&self, name: &str) -> bool {
        let has = |list: &[String]| list.iter().any(|c| c == name);
        has(&self.predicate_columns)
            || has(&self.predicate_partition_columns)
            || has(&self.predicate_missing_columns)
    }

    /// Constant columns filled before evaluation.
    pub(crate) fn early_constants(&self) -> impl Iterator<Item = &String> {
        self.predicate_partition_columns
            .iter()
            .chain(&self.predicate_missing_columns)
    }

    /// Constant columns filled after evaluation.
    pub(crate) fn late_constants(&self) -> impl Iterator<Item = &String> {
        self.partition_columns.iter().chain(&self.missing_columns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::datatypes::DataType;
    use colscan_expr::{Expr, Literal, Operator};
    use colscan_format::{FileSchema, LogicalType, PhysicalType};

    use crate::request::{RequestedColumn, ScanRequest};
    use crate::schema_resolver::ConverterCache;

    fn plan() -> ColumnMappingPlan {
        let mut b = FileSchema::builder();
        let a = b.leaf("a", PhysicalType::Int64, LogicalType::None, true);
        let c = b.leaf("c", PhysicalType::Int64, LogicalType::None, true);
        let row_id = b.leaf("rowId", PhysicalType::Int64, LogicalType::None, true);
        b.root(a).root(c).root(row_id);
        let schema = b.build().unwrap();
        let request = ScanRequest::new(vec![
            RequestedColumn::new("a", DataType::Int64, true),
            RequestedColumn::new("c", DataType::Int64, true),
            RequestedColumn::new("p", DataType::Utf8, true),
            RequestedColumn::new("m", DataType::Int32, true),
        ])
        .with_partition_value("p", Literal::from("2024"));
        ColumnMappingPlan::resolve(
            &schema,
            &request,
            &AcidColumnNames::default().all(),
            &mut ConverterCache::default(),
        )
        .unwrap()
    }

    fn eq(column: &str, value: i128) -> Conjunct {
        Expr::pred(column.to_string(), Operator::Equals(Literal::Integer(value)))
    }

    #[test]
    fn splits_predicate_and_lazy_columns() {
        let acid = AcidColumnNames::default();
        let ctx = LazyReadContext::plan(&plan(), &[eq("c", 1), eq("m", 2)], false, &acid, true)
            .unwrap();
        assert!(ctx.can_lazy_read);
        assert_eq!(ctx.predicate_columns, vec!["c"]);
        assert_eq!(ctx.lazy_columns, vec!["a", "rowId"]);
        assert_eq!(ctx.predicate_missing_columns, vec!["m"]);
        assert_eq!(ctx.partition_columns, vec!["p"]);
        assert!(ctx.resize_first_column);
    }

    #[test]
    fn no_lazy_columns_reads_everything_eagerly() {
        let acid = AcidColumnNames::default();
        let ctx = LazyReadContext::plan(
            &plan(),
            &[eq("a", 1), eq("c", 1), eq("m", 2)],
            true,
            &acid,
            true,
        )
        .unwrap();
        assert!(!ctx.can_lazy_read);
        assert_eq!(ctx.predicate_columns, vec!["a", "c", "rowId"]);
        assert!(ctx.lazy_columns.is_empty());
        assert!(ctx.missing_columns.is_empty());
        assert_eq!(ctx.predicate_missing_columns, vec!["m"]);
        assert!(ctx.is_early("m"));
        assert!(!ctx.resize_first_column);
    }

    #[test]
    fn disabled_lazy_mode_merges_lists() {
        let acid = AcidColumnNames::default();
        let ctx = LazyReadContext::plan(&plan(), &[eq("c", 1)], false, &acid, false).unwrap();
        assert!(!ctx.can_lazy_read);
        assert_eq!(ctx.predicate_columns, vec!["a", "c", "rowId"]);
        assert_eq!(ctx.partition_columns, vec!["p"]);
        assert_eq!(ctx.missing_columns, vec!["m"]);
    }

    #[test]
    fn constant_only_conjuncts_fill_constants_early() {
        let acid = AcidColumnNames::default();
        let p = Expr::pred("p".to_string(), Operator::Equals(Literal::from("2024")));
        for enable_lazy in [true, false] {
            let ctx = LazyReadContext::plan(&plan(), &[p.clone()], false, &acid, enable_lazy)
                .unwrap();
            assert!(!ctx.can_lazy_read);
            assert_eq!(ctx.predicate_partition_columns, vec!["p"]);
            assert!(ctx.partition_columns.is_empty());
            assert_eq!(ctx.early_constants().collect::<Vec<_>>(), vec!["p"]);
            assert!(ctx.is_early("p"));
            assert_eq!(ctx.predicate_columns, vec!["a", "c", "rowId"]);
        }
    }

    #[test]
    fn unrequested_conjunct_column_is_rejected() {
        let acid = AcidColumnNames::default();
        let err = LazyReadContext::plan(&plan(), &[eq("zzz", 1)], false, &acid, true).unwrap_err();
        assert!(matches!(err, Error::InvalidArgumentError(_)));
    }
}
