//! Explicit sort of a subtree's result.

use crate::context::ExecutionContext;
use crate::error::Result;
use crate::operator::{
    compute_materialized, single_fragment_stream, Operator, QueryExecutionTree, TableStream,
};
use crate::variable::{Variable, VariableToColumnMap};
use std::sync::Arc;

#[derive(Clone)]
pub struct Sort {
    child: Arc<QueryExecutionTree>,
    cols: Vec<usize>,
}

impl Sort {
    pub fn new(child: Arc<QueryExecutionTree>, cols: Vec<usize>) -> Self {
        Self { child, cols }
    }
}

impl Operator for Sort {
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
        format!("SORT on {:?}\n{{{}}}", self.cols, self.child.cache_key())
    }

    fn size_estimate(&self) -> u64 {
        self.child.size_estimate()
    }

    fn cost_estimate(&self) -> u64 {
        // n log n over the child's size, plus the child itself.
        let n = self.child.size_estimate();
        n.saturating_mul(64 - n.leading_zeros() as u64) + self.child.cost_estimate()
    }

    fn known_empty_result(&self) -> bool {
        self.child.known_empty_result()
    }

    fn children(&self) -> Vec<&Arc<QueryExecutionTree>> {
        vec![&self.child]
    }

    fn descriptor(&self) -> String {
        format!("Sort on {:?}", self.cols)
    }

    fn column_originates_from_graph(&self, variable: &Variable) -> bool {
        self.child.operation().column_originates_from_graph(variable)
    }

    fn compute(&self, ctx: &ExecutionContext) -> Result<TableStream> {
        let (mut table, vocab) = compute_materialized(&self.child, ctx)?;
        ctx.cancellation.check()?;
        table.sort_by_columns(&self.cols);
        Ok(single_fragment_stream((table, vocab)))
    }
}
