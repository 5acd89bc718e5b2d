//! Conjunct AST consumed by the scan pipeline.
#![forbid(unsafe_code)]

use std::ops::Bound;

use crate::literal::Literal;

/// Logical expression over predicates.
#[derive(Clone, Debug, PartialEq)]
pub enum Expr<F> {
    And(Vec<Expr<F>>),
    Or(Vec<Expr<F>>),
    Not(Box<Expr<F>>),
    Pred(Filter<F>),
    /// Comparison between two columns of the same batch.
    Compare {
        left: F,
        op: CompareOp,
        right: F,
    },
    /// Constant truth value.
    Literal(bool),
}

/// A top-level conjunct addressed by table column name.
pub type Conjunct = Expr<String>;

impl<F> Expr<F> {
    /// Build an AND of filters.
    #[inline]
    pub fn all_of(fs: Vec<Filter<F>>) -> Expr<F> {
        Expr::And(fs.into_iter().map(Expr::Pred).collect())
    }

    /// Build an OR of filters.
    #[inline]
    pub fn any_of(fs: Vec<Filter<F>>) -> Expr<F> {
        Expr::Or(fs.into_iter().map(Expr::Pred).collect())
    }

    /// Wrap an expression in a logical NOT.
    #[allow(clippy::should_implement_trait)]
    #[inline]
    pub fn not(e: Expr<F>) -> Expr<F> {
        Expr::Not(Box::new(e))
    }

    #[inline]
    pub fn pred(field_id: F, op: Operator) -> Expr<F> {
        Expr::Pred(Filter { field_id, op })
    }
}

impl<F: PartialEq> Expr<F> {
    /// Distinct fields referenced anywhere in the expression, in first-seen order.
    pub fn referenced_fields(&self) -> Vec<&F> {
        let mut out = Vec::new();
        self.collect_fields(&mut out);
        out
    }

    fn collect_fields<'s>(&'s self, out: &mut Vec<&'s F>) {
        match self {
            Expr::And(children) | Expr::Or(children) => {
                for child in children {
                    child.collect_fields(out);
                }
            }
            Expr::Not(inner) => inner.collect_fields(out),
            Expr::Pred(filter) => push_distinct(out, &filter.field_id),
            Expr::Compare { left, right, .. } => {
                push_distinct(out, left);
                push_distinct(out, right);
            }
            Expr::Literal(_) => {}
        }
    }

    /// The only field referenced, if exactly one is.
    pub fn single_field(&self) -> Option<&F> {
        let fields = self.referenced_fields();
        match fields.as_slice() {
            [only] => Some(*only),
            _ => None,
        }
    }

    /// Whether the expression is a plain equality or membership test on one
    /// column, which can be evaluated against dictionary codes instead of
    /// values.
    pub fn is_code_rewritable(&self) -> bool {
        matches!(
            self,
            Expr::Pred(Filter {
                op: Operator::Equals(lit),
                ..
            }) if !lit.is_null()
        ) || matches!(
            self,
            Expr::Pred(Filter {
                op: Operator::In(values),
                ..
            }) if values.iter().all(|v| !v.is_null())
        )
    }
}

fn push_distinct<'s, F: PartialEq>(out: &mut Vec<&'s F>, field: &'s F) {
    if !out.contains(&field) {
        out.push(field);
    }
}

/// Single predicate against a field.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter<F> {
    pub field_id: F,
    pub op: Operator,
}

/// Comparison/matching operators over literal values.
#[derive(Debug, Clone, PartialEq)]
pub enum Operator {
    // Equality
    Equals(Literal),
    NotEquals(Literal),

    Range {
        lower: Bound<Literal>,
        upper: Bound<Literal>,
    },

    // Simple comparisons
    GreaterThan(Literal),
    GreaterThanOrEquals(Literal),
    LessThan(Literal),
    LessThanOrEquals(Literal),

    // Set & pattern matching
    In(Vec<Literal>),
    StartsWith(String),

    // Null tests
    IsNull,
    IsNotNull,
}

impl Operator {
    /// Whether a null input can never satisfy this operator.
    #[inline]
    pub fn rejects_null(&self) -> bool {
        !matches!(self, Operator::IsNull)
    }
}

/// Operator for column-to-column comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}
