//! Conjunct evaluation against Arrow record batches.
//!
//! The scan pipeline treats evaluation as an external collaborator behind
//! [`ConjunctEvaluator`]. [`ArrowConjunctEvaluator`] is the default
//! implementation built on Arrow's comparison and boolean kernels.

use arrow::array::{Array, ArrayRef, BooleanArray, Datum, Scalar};
use arrow::compute::kernels::{boolean, cmp, comparison};
use arrow::compute::{cast, is_not_null, is_null};
use arrow::error::ArrowError;
use arrow::record_batch::RecordBatch;
use arrow_buffer::BooleanBuffer;
use colscan_result::{Error, Result};

use crate::expr::{CompareOp, Conjunct, Expr, Operator};
use crate::literal::{Literal, NativeLiteral};

/// Result of evaluating a conjunct list over one batch.
#[derive(Debug, Clone)]
pub struct FilterOutcome {
    /// One bit per row; set means the row satisfies every conjunct.
    pub filter: BooleanBuffer,
    /// No row survives.
    pub can_filter_all: bool,
}

impl FilterOutcome {
    pub fn from_filter(filter: BooleanBuffer) -> Self {
        let can_filter_all = filter.count_set_bits() == 0;
        Self {
            filter,
            can_filter_all,
        }
    }

    pub fn all_selected(len: usize) -> Self {
        Self::from_filter(BooleanBuffer::new_set(len))
    }
}

/// Evaluate ANDed conjuncts against a batch whose columns are named by
/// table column name.
pub trait ConjunctEvaluator: Send + Sync {
    fn evaluate(&self, conjuncts: &[Conjunct], batch: &RecordBatch) -> Result<FilterOutcome>;
}

/// Conjunct evaluator backed by Arrow compute kernels.
///
/// Uses SQL three-valued logic internally; a row whose result is null is
/// filtered out.
#[derive(Debug, Default, Clone, Copy)]
pub struct ArrowConjunctEvaluator;

impl ConjunctEvaluator for ArrowConjunctEvaluator {
    fn evaluate(&self, conjuncts: &[Conjunct], batch: &RecordBatch) -> Result<FilterOutcome> {
        let mut filter = BooleanBuffer::new_set(batch.num_rows());
        for conjunct in conjuncts {
            let result = evaluate_expr(conjunct, batch)?;
            filter = &filter & &to_selection(&result);
        }
        Ok(FilterOutcome::from_filter(filter))
    }
}

/// Collapse a nullable boolean result into a selection: null means "not selected".
pub fn to_selection(result: &BooleanArray) -> BooleanBuffer {
    match result.nulls() {
        Some(nulls) => result.values() & nulls.inner(),
        None => result.values().clone(),
    }
}

fn evaluate_expr(expr: &Conjunct, batch: &RecordBatch) -> Result<BooleanArray> {
    match expr {
        Expr::And(children) => fold(children, batch, true, |a, b| boolean::and_kleene(a, b)),
        Expr::Or(children) => fold(children, batch, false, |a, b| boolean::or_kleene(a, b)),
        Expr::Not(inner) => Ok(boolean::not(&evaluate_expr(inner, batch)?)?),
        Expr::Literal(value) => Ok(BooleanArray::from(vec![*value; batch.num_rows()])),
        Expr::Pred(filter) => {
            let column = column(batch, &filter.field_id)?;
            evaluate_operator(&filter.op, column)
        }
        Expr::Compare { left, op, right } => {
            let left = column(batch, left)?;
            let mut right = column(batch, right)?.clone();
            if right.data_type() != left.data_type() {
                right = cast(&right, left.data_type())?;
            }
            compare(left, *op, &right)
        }
    }
}

fn fold(
    children: &[Conjunct],
    batch: &RecordBatch,
    identity: bool,
    combine: impl Fn(&BooleanArray, &BooleanArray) -> std::result::Result<BooleanArray, ArrowError>,
) -> Result<BooleanArray> {
    let mut acc = BooleanArray::from(vec![identity; batch.num_rows()]);
    for child in children {
        acc = combine(&acc, &evaluate_expr(child, batch)?)?;
    }
    Ok(acc)
}

fn column<'b>(batch: &'b RecordBatch, name: &str) -> Result<&'b ArrayRef> {
    batch.column_by_name(name).ok_or_else(|| {
        Error::InvalidArgumentError(format!("conjunct references unknown column '{name}'"))
    })
}

fn scalar(literal: &Literal, column: &ArrayRef) -> Result<Scalar<ArrayRef>> {
    Ok(Scalar::new(literal.to_array(column.data_type())?))
}

fn compare(left: &dyn Datum, op: CompareOp, right: &dyn Datum) -> Result<BooleanArray> {
    let result = match op {
        CompareOp::Eq => cmp::eq(left, right)?,
        CompareOp::NotEq => cmp::neq(left, right)?,
        CompareOp::Lt => cmp::lt(left, right)?,
        CompareOp::LtEq => cmp::lt_eq(left, right)?,
        CompareOp::Gt => cmp::gt(left, right)?,
        CompareOp::GtEq => cmp::gt_eq(left, right)?,
    };
    Ok(result)
}

/// Compare `column` against a literal.
///
/// A literal with no exact native value keeps its meaning: `x > 2.5` on an
/// integer column becomes `x >= 3` and `x = 2.5` matches no row.
fn compare_literal(column: &ArrayRef, op: CompareOp, literal: &Literal) -> Result<BooleanArray> {
    match literal.to_native(column.data_type())? {
        NativeLiteral::Exact(value) => compare(column, op, &Scalar::new(value)),
        NativeLiteral::Between { floor, ceil } => match op {
            CompareOp::Eq => Ok(constant(column, false)),
            CompareOp::NotEq => Ok(constant(column, true)),
            CompareOp::Gt | CompareOp::GtEq => {
                compare(column, CompareOp::GtEq, &Scalar::new(ceil))
            }
            CompareOp::Lt | CompareOp::LtEq => {
                compare(column, CompareOp::LtEq, &Scalar::new(floor))
            }
        },
        NativeLiteral::Below => Ok(constant(
            column,
            matches!(op, CompareOp::NotEq | CompareOp::Gt | CompareOp::GtEq),
        )),
        NativeLiteral::Above => Ok(constant(
            column,
            matches!(op, CompareOp::NotEq | CompareOp::Lt | CompareOp::LtEq),
        )),
    }
}

/// `value` for every valid row of `column`, null for its null rows.
fn constant(column: &ArrayRef, value: bool) -> BooleanArray {
    let values = if value {
        BooleanBuffer::new_set(column.len())
    } else {
        BooleanBuffer::new_unset(column.len())
    };
    BooleanArray::new(values, column.logical_nulls())
}

fn evaluate_operator(op: &Operator, column: &ArrayRef) -> Result<BooleanArray> {
    match op {
        Operator::IsNull => Ok(is_null(column)?),
        Operator::IsNotNull => Ok(is_not_null(column)?),
        Operator::Equals(v) => compare_literal(column, CompareOp::Eq, v),
        Operator::NotEquals(v) => compare_literal(column, CompareOp::NotEq, v),
        Operator::GreaterThan(v) => compare_literal(column, CompareOp::Gt, v),
        Operator::GreaterThanOrEquals(v) => compare_literal(column, CompareOp::GtEq, v),
        Operator::LessThan(v) => compare_literal(column, CompareOp::Lt, v),
        Operator::LessThanOrEquals(v) => compare_literal(column, CompareOp::LtEq, v),
        Operator::Range { lower, upper } => {
            use std::ops::Bound;
            let mut acc = BooleanArray::from(vec![true; column.len()]);
            let lower = match lower {
                Bound::Included(v) => Some(compare_literal(column, CompareOp::GtEq, v)?),
                Bound::Excluded(v) => Some(compare_literal(column, CompareOp::Gt, v)?),
                Bound::Unbounded => None,
            };
            let upper = match upper {
                Bound::Included(v) => Some(compare_literal(column, CompareOp::LtEq, v)?),
                Bound::Excluded(v) => Some(compare_literal(column, CompareOp::Lt, v)?),
                Bound::Unbounded => None,
            };
            for side in [lower, upper].into_iter().flatten() {
                acc = boolean::and_kleene(&acc, &side)?;
            }
            // Unbounded on both sides still rejects nulls.
            Ok(boolean::and_kleene(&acc, &is_not_null(column)?)?)
        }
        Operator::In(values) => {
            let mut acc = BooleanArray::from(vec![false; column.len()]);
            for value in values {
                let hit = compare_literal(column, CompareOp::Eq, value)?;
                acc = boolean::or_kleene(&acc, &hit)?;
            }
            Ok(acc)
        }
        Operator::StartsWith(prefix) => {
            let pattern = scalar(&Literal::String(prefix.clone()), column)?;
            Ok(comparison::starts_with(column, &pattern)?)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use arrow::array::{Int32Array, StringArray, TimestampMillisecondArray};
    use arrow::datatypes::{DataType, Field, Schema, TimeUnit};

    fn batch() -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new("x", DataType::Int32, true),
            Field::new("s", DataType::Utf8, true),
        ]));
        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int32Array::from(vec![Some(1), Some(5), None, Some(9)])),
                Arc::new(StringArray::from(vec![Some("ab"), Some("b"), Some("ac"), None])),
            ],
        )
        .unwrap()
    }

    fn selected(outcome: &FilterOutcome) -> Vec<usize> {
        outcome.filter.set_indices().collect()
    }

    #[test]
    fn conjuncts_are_anded_and_nulls_filtered() {
        let conjuncts = vec![
            Expr::pred("x".to_string(), Operator::GreaterThan(Literal::Integer(2))),
            Expr::pred("s".to_string(), Operator::IsNotNull),
        ];
        let outcome = ArrowConjunctEvaluator.evaluate(&conjuncts, &batch()).unwrap();
        assert_eq!(selected(&outcome), vec![1]);
        assert!(!outcome.can_filter_all);
    }

    #[test]
    fn in_and_prefix() {
        let conjuncts = vec![Expr::Or(vec![
            Expr::pred(
                "x".to_string(),
                Operator::In(vec![Literal::Integer(1), Literal::Integer(9)]),
            ),
            Expr::pred("s".to_string(), Operator::StartsWith("a".into())),
        ])];
        let outcome = ArrowConjunctEvaluator.evaluate(&conjuncts, &batch()).unwrap();
        assert_eq!(selected(&outcome), vec![0, 2, 3]);
    }

    #[test]
    fn all_filtered_flag() {
        let conjuncts = vec![Expr::pred(
            "x".to_string(),
            Operator::Equals(Literal::Integer(42)),
        )];
        let outcome = ArrowConjunctEvaluator.evaluate(&conjuncts, &batch()).unwrap();
        assert!(outcome.can_filter_all);
    }

    #[test]
    fn fractional_literals_keep_their_meaning_on_integer_columns() {
        let half = |v| Literal::Decimal(crate::DecimalValue::new(v, 1).unwrap());
        let rows = |op| {
            let conjuncts = vec![Expr::pred("x".to_string(), op)];
            selected(&ArrowConjunctEvaluator.evaluate(&conjuncts, &batch()).unwrap())
        };
        assert_eq!(rows(Operator::GreaterThan(half(45))), vec![1, 3]);
        assert_eq!(rows(Operator::GreaterThanOrEquals(half(45))), vec![1, 3]);
        assert_eq!(rows(Operator::LessThan(Literal::Float(5.5))), vec![0, 1]);
        assert_eq!(rows(Operator::Equals(half(15))), Vec::<usize>::new());
        assert_eq!(rows(Operator::NotEquals(Literal::Float(1.5))), vec![0, 1, 3]);
        assert_eq!(rows(Operator::In(vec![half(10), half(95)])), vec![0]);
    }

    #[test]
    fn out_of_range_literals_fold_to_constants() {
        let rows = |op| {
            let conjuncts = vec![Expr::pred("x".to_string(), op)];
            selected(&ArrowConjunctEvaluator.evaluate(&conjuncts, &batch()).unwrap())
        };
        assert_eq!(rows(Operator::LessThan(Literal::Integer(1 << 40))), vec![0, 1, 3]);
        assert_eq!(rows(Operator::GreaterThan(Literal::Integer(1 << 40))), Vec::<usize>::new());
        assert_eq!(rows(Operator::GreaterThan(Literal::Integer(-(1 << 40)))), vec![0, 1, 3]);
        // null rows stay null under negation
        let negated = vec![Expr::not(Expr::pred(
            "x".to_string(),
            Operator::Equals(Literal::Integer(1 << 40)),
        ))];
        let outcome = ArrowConjunctEvaluator.evaluate(&negated, &batch()).unwrap();
        assert_eq!(selected(&outcome), vec![0, 1, 3]);
    }

    #[test]
    fn sub_unit_timestamps_are_not_truncated() {
        let schema = Arc::new(Schema::new(vec![Field::new(
            "t",
            DataType::Timestamp(TimeUnit::Millisecond, None),
            true,
        )]));
        let batch = RecordBatch::try_new(
            schema,
            vec![Arc::new(TimestampMillisecondArray::from(vec![0, 1, 2]))],
        )
        .unwrap();
        let rows = |op| {
            let conjuncts = vec![Expr::pred("t".to_string(), op)];
            selected(&ArrowConjunctEvaluator.evaluate(&conjuncts, &batch).unwrap())
        };
        assert_eq!(rows(Operator::Equals(Literal::Timestamp(1_500))), Vec::<usize>::new());
        assert_eq!(rows(Operator::GreaterThan(Literal::Timestamp(1_500))), vec![2]);
        assert_eq!(rows(Operator::LessThanOrEquals(Literal::Timestamp(1_500))), vec![0, 1]);
        assert_eq!(rows(Operator::Equals(Literal::Timestamp(2_000))), vec![2]);
    }

    #[test]
    fn unknown_column_is_an_argument_error() {
        let conjuncts = vec![Expr::pred("nope".to_string(), Operator::IsNull)];
        let err = ArrowConjunctEvaluator.evaluate(&conjuncts, &batch()).unwrap_err();
        assert!(matches!(err, Error::InvalidArgumentError(_)));
    }
}
