//! Row filter driven by the expression evaluator.

use crate::context::ExecutionContext;
use crate::error::Result;
use crate::expression::{ebv, Expression};
use crate::operator::{Operator, QueryExecutionTree, TableStream};
use crate::variable::{Variable, VariableToColumnMap};
use stela_core::IdTable;
use std::sync::Arc;

#[derive(Clone)]
pub struct Filter {
    child: Arc<QueryExecutionTree>,
    expression: Expression,
    /// Label for EXPLAIN output, e.g. `BOUND(?x)`.
    label: String,
}

impl Filter {
    pub fn new(child: Arc<QueryExecutionTree>, expression: Expression, label: String) -> Self {
        Self {
            child,
            expression,
            label,
        }
    }
}

impl Operator for Filter {
    fn result_width(&self) -> usize {
        self.child.result_width()
    }

    fn result_sorted_on(&self) -> Vec<usize> {
        // Dropping rows preserves order.
        self.child.result_sorted_on()
    }

    fn variable_columns(&self) -> VariableToColumnMap {
        self.child.variable_columns()
    }

    fn cache_key(&self) -> String {
        format!(
            "FILTER {}\n{{{}}}",
            self.expression.cache_key(),
            self.child.cache_key()
        )
    }

    fn size_estimate(&self) -> u64 {
        // A filter cannot grow its input; assume half survives.
        (self.child.size_estimate() / 2).max(1)
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
        format!("Filter {}", self.label)
    }

    fn column_originates_from_graph(&self, variable: &Variable) -> bool {
        self.child.operation().column_originates_from_graph(variable)
    }

    fn compute(&self, ctx: &ExecutionContext) -> Result<TableStream> {
        let stream = self.child.compute(ctx)?;
        let expression = self.expression.clone();
        let ctx = ctx.clone();
        Ok(Box::new(stream.map(move |fragment| {
            let (table, mut vocab) = fragment?;
            ctx.cancellation.check()?;
            let keep = expression.evaluate(&ctx, &table, &mut vocab)?;
            let mut out = IdTable::new(table.num_cols(), ctx.budget.clone());
            for (row, id) in table.rows().zip(keep) {
                if ebv(id) {
                    out.push_row(row)?;
                }
            }
            Ok((out, vocab))
        })))
    }
}
