//! Column projection.
//!
//! Restricts a subtree to a subset of its columns, in the given order. Used
//! by the executor for SELECT clauses and internally where a subtree must
//! expose a single variable (e.g. the empty-path side of a transitive
//! path).

use crate::context::ExecutionContext;
use crate::error::Result;
use crate::operator::{Operator, QueryExecutionTree, TableStream};
use crate::variable::{ColumnInfo, Variable, VariableToColumnMap};
use stela_core::IdTable;
use std::sync::Arc;

#[derive(Clone)]
pub struct Project {
    child: Arc<QueryExecutionTree>,
    /// Source column per output column.
    cols: Vec<usize>,
}

impl Project {
    pub fn new(child: Arc<QueryExecutionTree>, cols: Vec<usize>) -> Self {
        debug_assert!(cols.iter().all(|&c| c < child.result_width()));
        Self { child, cols }
    }

    /// Project onto the columns of the given variables, in order.
    pub fn on_variables(child: Arc<QueryExecutionTree>, variables: &[Variable]) -> Self {
        let map = child.variable_columns();
        let cols = variables
            .iter()
            .filter_map(|v| map.get(v).map(|i| i.column))
            .collect();
        Self::new(child, cols)
    }
}

impl Operator for Project {
    fn result_width(&self) -> usize {
        self.cols.len()
    }

    fn result_sorted_on(&self) -> Vec<usize> {
        // The child's sort order survives as long as its leading sort
        // columns are a prefix of our output columns.
        let mut out = Vec::new();
        for child_col in self.child.result_sorted_on() {
            match self.cols.iter().position(|&c| c == child_col) {
                Some(output_col) if output_col == out.len() => out.push(output_col),
                _ => break,
            }
        }
        out
    }

    fn variable_columns(&self) -> VariableToColumnMap {
        let child_map = self.child.variable_columns();
        let mut map = VariableToColumnMap::new();
        for (var, info) in child_map {
            if let Some(output_col) = self.cols.iter().position(|&c| c == info.column) {
                map.insert(
                    var,
                    ColumnInfo {
                        column: output_col,
                        undef: info.undef,
                    },
                );
            }
        }
        map
    }

    fn cache_key(&self) -> String {
        format!("PROJECT {:?}\n{{{}}}", self.cols, self.child.cache_key())
    }

    fn size_estimate(&self) -> u64 {
        self.child.size_estimate()
    }

    fn cost_estimate(&self) -> u64 {
        self.child.cost_estimate()
    }

    fn known_empty_result(&self) -> bool {
        self.child.known_empty_result()
    }

    fn children(&self) -> Vec<&Arc<QueryExecutionTree>> {
        vec![&self.child]
    }

    fn descriptor(&self) -> String {
        format!("Project {:?}", self.cols)
    }

    fn column_originates_from_graph(&self, variable: &Variable) -> bool {
        self.variable_columns().contains_key(variable)
            && self.child.operation().column_originates_from_graph(variable)
    }

    fn compute(&self, ctx: &ExecutionContext) -> Result<TableStream> {
        let stream = self.child.compute(ctx)?;
        let cols = self.cols.clone();
        let ctx = ctx.clone();
        Ok(Box::new(stream.map(move |fragment| {
            let (table, vocab) = fragment?;
            let mut out = IdTable::new(cols.len(), ctx.budget.clone());
            out.reserve_rows(table.num_rows())?;
            let mut row = Vec::with_capacity(cols.len());
            for input in table.rows() {
                row.clear();
                row.extend(cols.iter().map(|&c| input[c]));
                out.push_row(&row)?;
            }
            Ok((out, vocab))
        })))
    }
}
