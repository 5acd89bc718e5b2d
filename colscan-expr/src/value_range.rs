//! Per-column value domains derived from conjuncts.
//!
//! The scan pipeline needs to ask "could any value in `[min, max]` satisfy
//! the predicates on this column?" for row-group statistics and page
//! indexes. [`derive_value_ranges`] folds every top-level single-column
//! predicate into a [`ColumnValueRange`] per column. Predicates that cannot
//! be expressed as a range (ORs, NOTs, column comparisons) are ignored, which
//! only makes the range wider, never narrower.

use std::cmp::Ordering;
use std::ops::Bound;

use rustc_hash::FxHashMap;

use crate::expr::{Conjunct, Expr, Operator};
use crate::literal::Literal;

/// Column name to derived value domain.
pub type ValueRanges = FxHashMap<String, ColumnValueRange>;

/// What the predicates on a column require of nulls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NullPolicy {
    /// No null constraint.
    Any,
    /// Only null rows can satisfy (`IS NULL`).
    OnlyNull,
    /// Nulls never satisfy (any comparison or `IS NOT NULL`).
    NotNull,
}

/// Satisfying domain of one column.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnValueRange {
    lower: Bound<Literal>,
    upper: Bound<Literal>,
    in_values: Option<Vec<Literal>>,
    nulls: NullPolicy,
    empty: bool,
}

impl Default for ColumnValueRange {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl ColumnValueRange {
    pub fn unbounded() -> Self {
        Self {
            lower: Bound::Unbounded,
            upper: Bound::Unbounded,
            in_values: None,
            nulls: NullPolicy::Any,
            empty: false,
        }
    }

    /// Build the domain of a single operator.
    pub fn from_operator(op: &Operator) -> Self {
        let mut range = Self::unbounded();
        range.intersect(op);
        range
    }

    /// No value or null satisfies the predicates.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.empty
    }

    #[inline]
    pub fn null_policy(&self) -> NullPolicy {
        self.nulls
    }

    /// Whether a null row could satisfy the predicates.
    #[inline]
    pub fn accepts_null(&self) -> bool {
        !self.empty && self.nulls != NullPolicy::NotNull
    }

    #[inline]
    pub fn lower(&self) -> &Bound<Literal> {
        &self.lower
    }

    #[inline]
    pub fn upper(&self) -> &Bound<Literal> {
        &self.upper
    }

    #[inline]
    pub fn in_values(&self) -> Option<&[Literal]> {
        self.in_values.as_deref()
    }

    /// Whether the range constrains anything at all.
    pub fn is_unbounded(&self) -> bool {
        !self.empty
            && self.nulls == NullPolicy::Any
            && self.in_values.is_none()
            && matches!(self.lower, Bound::Unbounded)
            && matches!(self.upper, Bound::Unbounded)
    }

    /// Narrow the range by one more ANDed operator.
    pub fn intersect(&mut self, op: &Operator) {
        if self.empty {
            return;
        }
        match op {
            Operator::IsNull => {
                if self.nulls == NullPolicy::NotNull {
                    self.empty = true;
                }
                self.nulls = NullPolicy::OnlyNull;
            }
            Operator::IsNotNull => self.require_values(),
            Operator::NotEquals(v) => {
                self.require_values();
                if v.is_null() {
                    self.empty = true;
                }
            }
            Operator::Equals(v) => {
                self.tighten_lower(Bound::Included(v.clone()));
                self.tighten_upper(Bound::Included(v.clone()));
            }
            Operator::GreaterThan(v) => self.tighten_lower(Bound::Excluded(v.clone())),
            Operator::GreaterThanOrEquals(v) => self.tighten_lower(Bound::Included(v.clone())),
            Operator::LessThan(v) => self.tighten_upper(Bound::Excluded(v.clone())),
            Operator::LessThanOrEquals(v) => self.tighten_upper(Bound::Included(v.clone())),
            Operator::Range { lower, upper } => {
                self.tighten_lower(lower.clone());
                self.tighten_upper(upper.clone());
            }
            Operator::StartsWith(prefix) => {
                self.tighten_lower(Bound::Included(Literal::String(prefix.clone())));
            }
            Operator::In(values) => {
                self.require_values();
                let incoming: Vec<Literal> =
                    values.iter().filter(|v| !v.is_null()).cloned().collect();
                self.in_values = Some(match self.in_values.take() {
                    None => incoming,
                    Some(existing) => existing
                        .into_iter()
                        .filter(|a| {
                            incoming
                                .iter()
                                .any(|b| a.compare(b) == Some(Ordering::Equal))
                        })
                        .collect(),
                });
            }
        }
        self.normalize();
    }

    /// Whether some non-null value within `[min, max]` could satisfy the
    /// predicates. Missing or incomparable bounds never prove disjointness.
    pub fn may_match_values(&self, min: Option<&Literal>, max: Option<&Literal>) -> bool {
        if self.empty || self.nulls == NullPolicy::OnlyNull {
            return false;
        }
        if let Some(values) = &self.in_values {
            return values.iter().any(|v| value_within(v, min, max));
        }
        check_overlap(&self.lower, &self.upper, min, max)
    }

    fn require_values(&mut self) {
        if self.nulls == NullPolicy::OnlyNull {
            self.empty = true;
        }
        self.nulls = NullPolicy::NotNull;
    }

    fn tighten_lower(&mut self, candidate: Bound<Literal>) {
        self.require_values();
        if let Bound::Included(v) | Bound::Excluded(v) = &candidate
            && v.is_null()
        {
            self.empty = true;
            return;
        }
        let replace = match (&self.lower, &candidate) {
            (_, Bound::Unbounded) => false,
            (Bound::Unbounded, _) => true,
            (Bound::Included(cur) | Bound::Excluded(cur), Bound::Included(new)) => {
                new.compare(cur) == Some(Ordering::Greater)
            }
            (Bound::Included(cur), Bound::Excluded(new)) => {
                matches!(new.compare(cur), Some(Ordering::Greater | Ordering::Equal))
            }
            (Bound::Excluded(cur), Bound::Excluded(new)) => {
                new.compare(cur) == Some(Ordering::Greater)
            }
        };
        if replace {
            self.lower = candidate;
        }
    }

    fn tighten_upper(&mut self, candidate: Bound<Literal>) {
        self.require_values();
        if let Bound::Included(v) | Bound::Excluded(v) = &candidate
            && v.is_null()
        {
            self.empty = true;
            return;
        }
        let replace = match (&self.upper, &candidate) {
            (_, Bound::Unbounded) => false,
            (Bound::Unbounded, _) => true,
            (Bound::Included(cur) | Bound::Excluded(cur), Bound::Included(new)) => {
                new.compare(cur) == Some(Ordering::Less)
            }
            (Bound::Included(cur), Bound::Excluded(new)) => {
                matches!(new.compare(cur), Some(Ordering::Less | Ordering::Equal))
            }
            (Bound::Excluded(cur), Bound::Excluded(new)) => {
                new.compare(cur) == Some(Ordering::Less)
            }
        };
        if replace {
            self.upper = candidate;
        }
    }

    fn normalize(&mut self) {
        if self.empty {
            return;
        }
        if let (
            Bound::Included(lo) | Bound::Excluded(lo),
            Bound::Included(hi) | Bound::Excluded(hi),
        ) = (&self.lower, &self.upper)
        {
            let both_inclusive = matches!(self.lower, Bound::Included(_))
                && matches!(self.upper, Bound::Included(_));
            match lo.compare(hi) {
                Some(Ordering::Greater) => self.empty = true,
                Some(Ordering::Equal) if !both_inclusive => self.empty = true,
                _ => {}
            }
        }
        if let Some(values) = &mut self.in_values {
            let (lower, upper) = (&self.lower, &self.upper);
            values.retain(|v| satisfies_lower(v, lower) && satisfies_upper(v, upper));
            if values.is_empty() {
                self.empty = true;
            }
        }
    }
}

/// Fold the top-level single-column predicates of `conjuncts` into ranges.
pub fn derive_value_ranges(conjuncts: &[Conjunct]) -> ValueRanges {
    let mut ranges = ValueRanges::default();
    for conjunct in conjuncts {
        collect_ranges(conjunct, &mut ranges);
    }
    ranges
}

fn collect_ranges(expr: &Conjunct, ranges: &mut ValueRanges) {
    match expr {
        Expr::And(children) => {
            for child in children {
                collect_ranges(child, ranges);
            }
        }
        Expr::Pred(filter) => {
            ranges
                .entry(filter.field_id.clone())
                .or_default()
                .intersect(&filter.op);
        }
        _ => {}
    }
}

fn satisfies_lower(v: &Literal, lower: &Bound<Literal>) -> bool {
    match lower {
        Bound::Unbounded => true,
        Bound::Included(l) => !matches!(v.compare(l), Some(Ordering::Less)),
        Bound::Excluded(l) => !matches!(v.compare(l), Some(Ordering::Less | Ordering::Equal)),
    }
}

fn satisfies_upper(v: &Literal, upper: &Bound<Literal>) -> bool {
    match upper {
        Bound::Unbounded => true,
        Bound::Included(u) => !matches!(v.compare(u), Some(Ordering::Greater)),
        Bound::Excluded(u) => !matches!(v.compare(u), Some(Ordering::Greater | Ordering::Equal)),
    }
}

fn value_within(v: &Literal, min: Option<&Literal>, max: Option<&Literal>) -> bool {
    let above_min = min.is_none_or(|m| !matches!(v.compare(m), Some(Ordering::Less)));
    let below_max = max.is_none_or(|m| !matches!(v.compare(m), Some(Ordering::Greater)));
    above_min && below_max
}

fn check_overlap(
    lb: &Bound<Literal>,
    ub: &Bound<Literal>,
    chunk_min: Option<&Literal>,
    chunk_max: Option<&Literal>,
) -> bool {
    // Range is [lb, ub], chunk is [chunk_min, chunk_max] (inclusive)

    // Range < Chunk if ub < chunk_min
    if let Some(min) = chunk_min {
        match ub {
            Bound::Included(u) => {
                if u.compare(min) == Some(Ordering::Less) {
                    return false;
                }
            }
            Bound::Excluded(u) => {
                if matches!(u.compare(min), Some(Ordering::Less | Ordering::Equal)) {
                    return false;
                }
            }
            Bound::Unbounded => {}
        }
    }

    // Range > Chunk if lb > chunk_max
    if let Some(max) = chunk_max {
        match lb {
            Bound::Included(l) => {
                if l.compare(max) == Some(Ordering::Greater) {
                    return false;
                }
            }
            Bound::Excluded(l) => {
                if matches!(l.compare(max), Some(Ordering::Greater | Ordering::Equal)) {
                    return false;
                }
            }
            Bound::Unbounded => {}
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int(v: i128) -> Literal {
        Literal::Integer(v)
    }

    #[test]
    fn greater_than_beyond_max_is_disjoint() {
        let range = ColumnValueRange::from_operator(&Operator::GreaterThan(int(25)));
        assert!(!range.may_match_values(Some(&int(10)), Some(&int(20))));
        assert!(range.may_match_values(Some(&int(10)), Some(&int(26))));
        assert!(!range.may_match_values(Some(&int(10)), Some(&int(25))));
        assert!(!range.accepts_null());
    }

    #[test]
    fn missing_stats_never_prove_disjointness() {
        let range = ColumnValueRange::from_operator(&Operator::LessThan(int(0)));
        assert!(range.may_match_values(None, None));
        assert!(range.may_match_values(None, Some(&int(100))));
    }

    #[test]
    fn contradictory_bounds_are_empty() {
        let conjuncts = vec![
            Expr::pred("x".to_string(), Operator::GreaterThan(int(10))),
            Expr::pred("x".to_string(), Operator::LessThanOrEquals(int(10))),
        ];
        let ranges = derive_value_ranges(&conjuncts);
        assert!(ranges["x"].is_empty());
    }

    #[test]
    fn in_list_is_clipped_by_bounds() {
        let conjuncts = vec![Expr::And(vec![
            Expr::pred(
                "x".to_string(),
                Operator::In(vec![int(1), int(5), int(9)]),
            ),
            Expr::pred("x".to_string(), Operator::GreaterThan(int(4))),
        ])];
        let ranges = derive_value_ranges(&conjuncts);
        let range = &ranges["x"];
        assert_eq!(range.in_values(), Some(&[int(5), int(9)][..]));
        assert!(!range.may_match_values(Some(&int(6)), Some(&int(8))));
        assert!(range.may_match_values(Some(&int(9)), Some(&int(12))));
    }

    #[test]
    fn null_tests_shape_policy() {
        let mut range = ColumnValueRange::from_operator(&Operator::IsNull);
        assert_eq!(range.null_policy(), NullPolicy::OnlyNull);
        assert!(range.accepts_null());
        assert!(!range.may_match_values(None, None));
        range.intersect(&Operator::Equals(int(1)));
        assert!(range.is_empty());
    }

    #[test]
    fn disjunctions_do_not_narrow() {
        let conjuncts = vec![Expr::Or(vec![
            Expr::pred("x".to_string(), Operator::Equals(int(1))),
            Expr::pred("x".to_string(), Operator::Equals(int(2))),
        ])];
        assert!(derive_value_ranges(&conjuncts).is_empty());
    }

    #[test]
    fn string_bounds_compare_bytewise() {
        let range = ColumnValueRange::from_operator(&Operator::Equals(Literal::from("m")));
        assert!(range.may_match_values(Some(&Literal::from("a")), Some(&Literal::from("z"))));
        assert!(!range.may_match_values(Some(&Literal::from("n")), Some(&Literal::from("z"))));
    }
}
