//! Union of two subtrees with column alignment by variable.
//!
//! The output schema is the left child's variables (in column order)
//! followed by the right child's additional variables. Rows missing a
//! column are padded with `UNDEFINED`, the identity element for
//! outer-join-style padding. No output order is implied.

use crate::context::ExecutionContext;
use crate::error::Result;
use crate::operator::{Operator, QueryExecutionTree, TableStream};
use crate::variable::{ColumnInfo, UndefStatus, Variable, VariableToColumnMap};
use stela_core::{IdTable, ValueId};
use std::sync::Arc;

#[derive(Clone)]
pub struct Union {
    left: Arc<QueryExecutionTree>,
    right: Arc<QueryExecutionTree>,
    /// Output variables in output column order.
    variables: Vec<Variable>,
    /// Per output column: source column in the left / right child.
    left_source: Vec<Option<usize>>,
    right_source: Vec<Option<usize>>,
}

impl Union {
    pub fn new(left: Arc<QueryExecutionTree>, right: Arc<QueryExecutionTree>) -> Self {
        let left_map = left.variable_columns();
        let right_map = right.variable_columns();

        let mut variables: Vec<Variable> = vec![Variable::new("_"); left.result_width()];
        for (var, info) in &left_map {
            variables[info.column] = var.clone();
        }
        let mut right_extra: Vec<(usize, Variable)> = right_map
            .iter()
            .filter(|(var, _)| !left_map.contains_key(var))
            .map(|(var, info)| (info.column, var.clone()))
            .collect();
        right_extra.sort();
        variables.extend(right_extra.into_iter().map(|(_, var)| var));

        let left_source = variables
            .iter()
            .map(|v| left_map.get(v).map(|i| i.column))
            .collect();
        let right_source = variables
            .iter()
            .map(|v| right_map.get(v).map(|i| i.column))
            .collect();

        Self {
            left,
            right,
            variables,
            left_source,
            right_source,
        }
    }

    fn remap(
        table: &IdTable,
        source: &[Option<usize>],
        budget: &stela_core::MemoryBudget,
    ) -> Result<IdTable> {
        let mut out = IdTable::new(source.len(), budget.clone());
        out.reserve_rows(table.num_rows())?;
        let mut row = vec![ValueId::UNDEFINED; source.len()];
        for input in table.rows() {
            for (o, src) in source.iter().enumerate() {
                row[o] = src.map_or(ValueId::UNDEFINED, |c| input[c]);
            }
            out.push_row(&row)?;
        }
        Ok(out)
    }
}

impl Operator for Union {
    fn result_width(&self) -> usize {
        self.variables.len()
    }

    fn result_sorted_on(&self) -> Vec<usize> {
        vec![]
    }

    fn variable_columns(&self) -> VariableToColumnMap {
        let left_map = self.left.variable_columns();
        let right_map = self.right.variable_columns();
        self.variables
            .iter()
            .enumerate()
            .map(|(col, var)| {
                let undef = match (left_map.get(var), right_map.get(var)) {
                    (Some(l), Some(r))
                        if l.undef == UndefStatus::AlwaysDefined
                            && r.undef == UndefStatus::AlwaysDefined =>
                    {
                        UndefStatus::AlwaysDefined
                    }
                    _ => UndefStatus::PossiblyUndefined,
                };
                (var.clone(), ColumnInfo { column: col, undef })
            })
            .collect()
    }

    fn cache_key(&self) -> String {
        // The column mappings (not the variable names) pin the alignment.
        format!(
            "UNION map_left={:?} map_right={:?}\n{{{}}}\n{{{}}}",
            self.left_source,
            self.right_source,
            self.left.cache_key(),
            self.right.cache_key()
        )
    }

    fn size_estimate(&self) -> u64 {
        self.left.size_estimate() + self.right.size_estimate()
    }

    fn cost_estimate(&self) -> u64 {
        self.size_estimate() + self.left.cost_estimate() + self.right.cost_estimate()
    }

    fn known_empty_result(&self) -> bool {
        self.left.known_empty_result() && self.right.known_empty_result()
    }

    fn children(&self) -> Vec<&Arc<QueryExecutionTree>> {
        vec![&self.left, &self.right]
    }

    fn descriptor(&self) -> String {
        "Union".to_owned()
    }

    fn column_originates_from_graph(&self, variable: &Variable) -> bool {
        let left_has = self.left.variable_columns().contains_key(variable);
        let right_has = self.right.variable_columns().contains_key(variable);
        (!left_has || self.left.operation().column_originates_from_graph(variable))
            && (!right_has
                || self
                    .right
                    .operation()
                    .column_originates_from_graph(variable))
            && (left_has || right_has)
    }

    fn compute(&self, ctx: &ExecutionContext) -> Result<TableStream> {
        let ctx = ctx.clone();
        let left_stream = self.left.compute(&ctx)?;
        let right_stream = self.right.compute(&ctx)?;

        let budget = ctx.budget.clone();
        let left_source = self.left_source.clone();
        let right_source = self.right_source.clone();
        let mapped = left_stream
            .map(move |fragment| {
                let (table, vocab) = fragment?;
                Ok((Union::remap(&table, &left_source, &budget)?, vocab))
            })
            .chain({
                let budget = ctx.budget.clone();
                right_stream.map(move |fragment| {
                    let (table, vocab) = fragment?;
                    Ok((Union::remap(&table, &right_source, &budget)?, vocab))
                })
            });
        Ok(Box::new(mapped))
    }
}
