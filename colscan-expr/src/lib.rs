//! Predicates, literals and value domains for colscan.
//!
//! Conjuncts are [`Expr<String>`](expr::Expr) trees addressed by table column
//! name. The scan pipeline derives per-column [`ValueRanges`] from them for
//! statistics pruning and hands the original trees to a
//! [`ConjunctEvaluator`] for row-level filtering.

pub mod decimal;
pub mod eval;
pub mod expr;
pub mod literal;
pub mod value_range;

pub use decimal::{DecimalError, DecimalValue, RescaleStep};
pub use eval::{ArrowConjunctEvaluator, ConjunctEvaluator, FilterOutcome};
pub use expr::{CompareOp, Conjunct, Expr, Filter, Operator};
pub use literal::{Literal, NativeLiteral};
pub use value_range::{ColumnValueRange, NullPolicy, ValueRanges, derive_value_ranges};
