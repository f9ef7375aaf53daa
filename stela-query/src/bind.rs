//! BIND: append a computed column.

use crate::context::ExecutionContext;
use crate::error::Result;
use crate::expression::Expression;
use crate::operator::{Operator, QueryExecutionTree, TableStream};
use crate::variable::{ColumnInfo, Variable, VariableToColumnMap};
use stela_core::IdTable;
use std::sync::Arc;

#[derive(Clone)]
pub struct Bind {
    child: Arc<QueryExecutionTree>,
    expression: Expression,
    target: Variable,
}

impl Bind {
    pub fn new(child: Arc<QueryExecutionTree>, expression: Expression, target: Variable) -> Self {
        Self {
            child,
            expression,
            target,
        }
    }

    /// The variable this BIND introduces.
    pub fn target(&self) -> &Variable {
        &self.target
    }
}

impl Operator for Bind {
    fn result_width(&self) -> usize {
        self.child.result_width() + 1
    }

    fn result_sorted_on(&self) -> Vec<usize> {
        // Appending a column preserves the child's order.
        self.child.result_sorted_on()
    }

    fn variable_columns(&self) -> VariableToColumnMap {
        let mut map = self.child.variable_columns();
        map.insert(
            self.target.clone(),
            ColumnInfo::possibly_undefined(self.child.result_width()),
        );
        map
    }

    fn cache_key(&self) -> String {
        // The target variable lands in a fixed output column; its name is
        // irrelevant to the produced table.
        format!(
            "BIND {} as col {}\n{{{}}}",
            self.expression.cache_key(),
            self.child.result_width(),
            self.child.cache_key()
        )
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
        format!("Bind {}", self.target)
    }

    fn column_originates_from_graph(&self, variable: &Variable) -> bool {
        if variable == &self.target {
            return false;
        }
        self.child.operation().column_originates_from_graph(variable)
    }

    fn compute(&self, ctx: &ExecutionContext) -> Result<TableStream> {
        let stream = self.child.compute(ctx)?;
        let expression = self.expression.clone();
        let ctx = ctx.clone();
        Ok(Box::new(stream.map(move |fragment| {
            let (table, mut vocab) = fragment?;
            ctx.cancellation.check()?;
            let computed = expression.evaluate(&ctx, &table, &mut vocab)?;
            let mut out = IdTable::new(table.num_cols() + 1, ctx.budget.clone());
            out.reserve_rows(table.num_rows())?;
            let mut row = Vec::with_capacity(table.num_cols() + 1);
            for (input, id) in table.rows().zip(computed) {
                row.clear();
                row.extend_from_slice(input);
                row.push(id);
                out.push_row(&row)?;
            }
            Ok((out, vocab))
        })))
    }
}
