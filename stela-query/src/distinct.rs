//! Duplicate elimination.
//!
//! Sorts the child's result on the distinct columns (then on the remaining
//! columns for determinism) and drops consecutive duplicates.

use crate::context::ExecutionContext;
use crate::error::Result;
use crate::operator::{
    compute_materialized, single_fragment_stream, Operator, QueryExecutionTree, TableStream,
};
use crate::variable::{Variable, VariableToColumnMap};
use stela_core::IdTable;
use std::sync::Arc;

#[derive(Clone)]
pub struct Distinct {
    child: Arc<QueryExecutionTree>,
    /// Columns defining row identity; usually all of them.
    cols: Vec<usize>,
}

impl Distinct {
    pub fn new(child: Arc<QueryExecutionTree>, cols: Vec<usize>) -> Self {
        Self { child, cols }
    }
}

impl Operator for Distinct {
    fn result_width(&self) -> usize {
        self.child.result_width()
    }

    fn result_sorted_on(&self) -> Vec<usize> {
        self.cols.clone()
    }

    fn variable_columns(&self) -> VariableToColumnMap {
        self.child.variable_columns()
    }

    fn cache_key(&self) -> String {
        format!("DISTINCT on {:?}\n{{{}}}", self.cols, self.child.cache_key())
    }

    fn size_estimate(&self) -> u64 {
        self.child.size_estimate()
    }

    fn cost_estimate(&self) -> u64 {
        self.child.size_estimate() + self.child.cost_estimate()
    }

    fn known_empty_result(&self) -> bool {
        self.child.known_empty_result()
    }

    fn children(&self) -> Vec<&Arc<QueryExecutionTree>> {
        vec![&self.child]
    }

    fn descriptor(&self) -> String {
        "Distinct".to_owned()
    }

    fn column_originates_from_graph(&self, variable: &Variable) -> bool {
        self.child.operation().column_originates_from_graph(variable)
    }

    fn compute(&self, ctx: &ExecutionContext) -> Result<TableStream> {
        let (table, vocab) = compute_materialized(&self.child, ctx)?;
        ctx.cancellation.check()?;

        let mut sort_cols = self.cols.clone();
        for c in 0..table.num_cols() {
            if !sort_cols.contains(&c) {
                sort_cols.push(c);
            }
        }
        let mut sorted = table;
        sorted.sort_by_columns(&sort_cols);

        let mut out = IdTable::new(sorted.num_cols(), ctx.budget.clone());
        let mut last: Option<Vec<stela_core::ValueId>> = None;
        for row in sorted.rows() {
            let key: Vec<_> = self.cols.iter().map(|&c| row[c]).collect();
            if last.as_ref() != Some(&key) {
                out.push_row(row)?;
                last = Some(key);
            }
        }
        Ok(single_fragment_stream((out, vocab)))
    }
}
