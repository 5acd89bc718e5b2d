//! Predicate evaluation against dictionary pages.
//!
//! A string predicate over a fully dictionary-encoded chunk is evaluated
//! once per distinct value instead of once per row. The surviving codes
//! either prove the row group empty, or replace the string predicate with
//! an integer test on the code column.

use std::sync::Arc;

use arrow::array::{ArrayRef, RecordBatch};
use arrow::datatypes::{DataType, Field, Schema};
use colscan_expr::{Conjunct, ConjunctEvaluator, Expr, Literal, Operator};
use colscan_format::{FileSchema, NodeId, PhysicalType};
use colscan_result::Result;
use rustc_hash::FxHashMap;

use crate::lazy_plan::LazyReadContext;
use crate::schema_resolver::{ColumnMappingPlan, ColumnSource, ReadPlan, TypeConverter};

/// A predicate column whose conjuncts can all be answered from its dictionary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DictionaryCandidate {
    pub column: String,
    pub node: NodeId,
    pub decoded: DataType,
    /// Positions in the scan's conjunct list of the conjuncts on this column.
    pub conjunct_indices: Vec<usize>,
}

/// Columns eligible for dictionary filtering, decided once per scan.
///
/// Whether a given row group's chunk is actually dictionary encoded is
/// checked when the group is opened.
pub fn eligible_columns(
    schema: &FileSchema,
    plan: &ColumnMappingPlan,
    lazy: &LazyReadContext,
    conjuncts: &[Conjunct],
) -> Vec<DictionaryCandidate> {
    let mut out = Vec::new();
    for name in &lazy.predicate_columns {
        let Some(ColumnSource::File(ReadPlan::Leaf {
            node,
            decoded,
            converter,
            ..
        })) = plan.get(name).map(|c| &c.source)
        else {
            continue;
        };
        if **converter != TypeConverter::Identity
            || schema.node(*node).physical_type != PhysicalType::ByteArray
            || !matches!(decoded, DataType::Utf8 | DataType::Binary)
        {
            continue;
        }
        let touching: Vec<usize> = conjuncts
            .iter()
            .enumerate()
            .filter(|(_, c)| c.referenced_fields().iter().any(|f| *f == name))
            .map(|(idx, _)| idx)
            .collect();
        let rewritable = !touching.is_empty()
            && touching.iter().all(|idx| {
                let conjunct = &conjuncts[*idx];
                conjunct.single_field() == Some(name) && conjunct.is_code_rewritable()
            });
        if rewritable {
            out.push(DictionaryCandidate {
                column: name.clone(),
                node: *node,
                decoded: decoded.clone(),
                conjunct_indices: touching,
            });
        }
    }
    out
}

/// Result of evaluating a column's conjuncts over its dictionary.
#[derive(Debug, Clone, PartialEq)]
pub enum DictFilterOutcome {
    /// No dictionary value survives: the row group has no match.
    AllFiltered,
    /// Too many values survive for a code rewrite to pay off.
    Abandoned { surviving: usize },
    /// Evaluate `conjunct` on the code column instead.
    Rewritten { codes: Vec<u32>, conjunct: Conjunct },
}

/// Evaluates predicate columns' conjuncts over decoded dictionaries.
pub struct DictionaryFilterEngine<'a> {
    evaluator: &'a dyn ConjunctEvaluator,
    max_codes: usize,
}

impl<'a> DictionaryFilterEngine<'a> {
    pub fn new(evaluator: &'a dyn ConjunctEvaluator, max_codes: usize) -> Self {
        Self {
            evaluator,
            max_codes,
        }
    }

    pub fn evaluate(
        &self,
        candidate: &DictionaryCandidate,
        dictionary: ArrayRef,
        conjuncts: &[Conjunct],
    ) -> Result<DictFilterOutcome> {
        let schema = Arc::new(Schema::new(vec![Field::new(
            &candidate.column,
            dictionary.data_type().clone(),
            true,
        )]));
        let batch = RecordBatch::try_new(schema, vec![dictionary])?;
        let own: Vec<Conjunct> = candidate
            .conjunct_indices
            .iter()
            .map(|idx| conjuncts[*idx].clone())
            .collect();
        let outcome = self.evaluator.evaluate(&own, &batch)?;
        let codes: Vec<u32> = outcome.filter.set_indices().map(|c| c as u32).collect();
        if codes.is_empty() {
            return Ok(DictFilterOutcome::AllFiltered);
        }
        if codes.len() > self.max_codes {
            return Ok(DictFilterOutcome::Abandoned {
                surviving: codes.len(),
            });
        }
        let conjunct = code_predicate(&candidate.column, &codes);
        Ok(DictFilterOutcome::Rewritten { codes, conjunct })
    }
}

fn code_predicate(column: &str, codes: &[u32]) -> Conjunct {
    let op = match codes {
        [only] => Operator::Equals(Literal::Integer(*only as i128)),
        _ => Operator::In(codes.iter().map(|c| Literal::Integer(*c as i128)).collect()),
    };
    Expr::pred(column.to_string(), op)
}

/// Surviving dictionary codes of the active row group's rewritten columns.
#[derive(Debug, Clone, Default)]
pub struct DictionaryFilterState {
    codes: FxHashMap<String, Vec<u32>>,
    replaced: Vec<usize>,
    rewrites: Vec<Conjunct>,
}

impl DictionaryFilterState {
    pub(crate) fn record(
        &mut self,
        candidate: &DictionaryCandidate,
        codes: Vec<u32>,
        conjunct: Conjunct,
    ) {
        self.codes.insert(candidate.column.clone(), codes);
        self.replaced.extend(&candidate.conjunct_indices);
        self.rewrites.push(conjunct);
    }

    /// Whether `column` is read as dictionary codes in this row group.
    pub fn is_rewritten(&self, column: &str) -> bool {
        self.codes.contains_key(column)
    }

    pub fn codes(&self, column: &str) -> Option<&[u32]> {
        self.codes.get(column).map(Vec::as_slice)
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    /// The scan's conjuncts with rewritten ones swapped for code predicates.
    pub fn effective_conjuncts(&self, conjuncts: &[Conjunct]) -> Vec<Conjunct> {
        conjuncts
            .iter()
            .enumerate()
            .filter(|(idx, _)| !self.replaced.contains(idx))
            .map(|(_, c)| c.clone())
            .chain(self.rewrites.iter().cloned())
            .collect()
    }
}
