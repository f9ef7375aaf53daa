//! Inline VALUES clause.
//!
//! Rows may contain `UNDEFINED` for UNDEF entries; the definedness of each
//! output column is derived from the actual rows.

use crate::context::ExecutionContext;
use crate::error::Result;
use crate::operator::{single_fragment_stream, Operator, QueryExecutionTree, TableStream};
use crate::variable::{ColumnInfo, UndefStatus, Variable, VariableToColumnMap};
use stela_core::{IdTable, LocalVocab, ValueId};
use std::sync::Arc;

#[derive(Clone)]
pub struct Values {
    variables: Vec<Variable>,
    rows: Vec<Vec<ValueId>>,
}

impl Values {
    pub fn new(variables: Vec<Variable>, rows: Vec<Vec<ValueId>>) -> Self {
        debug_assert!(rows.iter().all(|r| r.len() == variables.len()));
        Self { variables, rows }
    }

    /// A single-row VALUES binding one variable to one id.
    pub fn single(variable: Variable, id: ValueId) -> Self {
        Self::new(vec![variable], vec![vec![id]])
    }
}

impl Operator for Values {
    fn result_width(&self) -> usize {
        self.variables.len()
    }

    fn result_sorted_on(&self) -> Vec<usize> {
        vec![]
    }

    fn variable_columns(&self) -> VariableToColumnMap {
        self.variables
            .iter()
            .enumerate()
            .map(|(col, var)| {
                let undef = if self.rows.iter().any(|r| r[col].is_undefined()) {
                    UndefStatus::PossiblyUndefined
                } else {
                    UndefStatus::AlwaysDefined
                };
                (var.clone(), ColumnInfo { column: col, undef })
            })
            .collect()
    }

    fn cache_key(&self) -> String {
        let rows: Vec<String> = self
            .rows
            .iter()
            .map(|r| {
                let ids: Vec<String> = r.iter().map(|id| format!("{id:?}")).collect();
                ids.join(",")
            })
            .collect();
        format!("VALUES width={} rows=[{}]", self.variables.len(), rows.join(";"))
    }

    fn size_estimate(&self) -> u64 {
        self.rows.len() as u64
    }

    fn cost_estimate(&self) -> u64 {
        self.rows.len() as u64
    }

    fn known_empty_result(&self) -> bool {
        self.rows.is_empty()
    }

    fn children(&self) -> Vec<&Arc<QueryExecutionTree>> {
        vec![]
    }

    fn descriptor(&self) -> String {
        format!("Values ({} rows)", self.rows.len())
    }

    fn compute(&self, ctx: &ExecutionContext) -> Result<TableStream> {
        let mut table = IdTable::new(self.result_width(), ctx.budget.clone());
        for row in &self.rows {
            table.push_row(row)?;
        }
        Ok(single_fragment_stream((table, LocalVocab::new())))
    }
}
