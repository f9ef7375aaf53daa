//! Merge join on one column.
//!
//! Both children are sorted on their join column at construction time (a
//! [`Sort`](crate::sort::Sort) is inserted when needed), so the join is a
//! single linear merge. Rows with an undefined join value cannot match
//! anything in the knowledge graph and are skipped.

use crate::context::ExecutionContext;
use crate::error::Result;
use crate::operator::{
    compute_materialized, single_fragment_stream, Operator, QueryExecutionTree, TableStream,
};
use crate::variable::{ColumnInfo, Variable, VariableToColumnMap};
use stela_core::IdTable;
use std::sync::Arc;

/// Inner merge join of two subtrees on one column each.
#[derive(Clone)]
pub struct Join {
    left: Arc<QueryExecutionTree>,
    right: Arc<QueryExecutionTree>,
    left_col: usize,
    right_col: usize,
}

impl Join {
    /// Create a join; children are wrapped in sorts when not already
    /// sorted on their join columns.
    pub fn new(
        left: Arc<QueryExecutionTree>,
        right: Arc<QueryExecutionTree>,
        left_col: usize,
        right_col: usize,
    ) -> Self {
        let left = QueryExecutionTree::ensure_sorted(left, vec![left_col]);
        let right = QueryExecutionTree::ensure_sorted(right, vec![right_col]);
        Self {
            left,
            right,
            left_col,
            right_col,
        }
    }

    /// Output column of a right-side column.
    fn map_right_col(&self, col: usize) -> Option<usize> {
        let left_width = self.left.result_width();
        match col.cmp(&self.right_col) {
            std::cmp::Ordering::Less => Some(left_width + col),
            std::cmp::Ordering::Equal => None,
            std::cmp::Ordering::Greater => Some(left_width + col - 1),
        }
    }
}

impl Operator for Join {
    fn result_width(&self) -> usize {
        self.left.result_width() + self.right.result_width() - 1
    }

    fn result_sorted_on(&self) -> Vec<usize> {
        vec![self.left_col]
    }

    fn variable_columns(&self) -> VariableToColumnMap {
        let mut map = self.left.variable_columns();
        for (var, info) in self.right.variable_columns() {
            // The right join column binds to the left join column (covered
            // by the left map when the names coincide).
            let mapped = if info.column == self.right_col {
                Some(self.left_col)
            } else {
                self.map_right_col(info.column)
            };
            if let Some(column) = mapped {
                map.entry(var).or_insert(ColumnInfo {
                    column,
                    undef: info.undef,
                });
            }
        }
        map
    }

    fn cache_key(&self) -> String {
        format!(
            "JOIN on cols {}|{}\n{{{}}}\n{{{}}}",
            self.left_col,
            self.right_col,
            self.left.cache_key(),
            self.right.cache_key()
        )
    }

    fn size_estimate(&self) -> u64 {
        self.left.size_estimate().max(self.right.size_estimate())
    }

    fn cost_estimate(&self) -> u64 {
        self.size_estimate() + self.left.cost_estimate() + self.right.cost_estimate()
    }

    fn known_empty_result(&self) -> bool {
        self.left.known_empty_result() || self.right.known_empty_result()
    }

    fn children(&self) -> Vec<&Arc<QueryExecutionTree>> {
        vec![&self.left, &self.right]
    }

    fn descriptor(&self) -> String {
        "Join".to_owned()
    }

    fn column_originates_from_graph(&self, variable: &Variable) -> bool {
        self.left.operation().column_originates_from_graph(variable)
            || self
                .right
                .operation()
                .column_originates_from_graph(variable)
    }

    fn compute(&self, ctx: &ExecutionContext) -> Result<TableStream> {
        let (left_table, mut vocab) = compute_materialized(&self.left, ctx)?;
        let (right_table, right_vocab) = compute_materialized(&self.right, ctx)?;
        vocab.merge_with([&right_vocab]);

        let mut out = IdTable::new(self.result_width(), ctx.budget.clone());
        let (mut i, mut j) = (0usize, 0usize);
        let (n, m) = (left_table.num_rows(), right_table.num_rows());
        while i < n && j < m {
            ctx.cancellation.check()?;
            let lv = left_table.at(i, self.left_col);
            let rv = right_table.at(j, self.right_col);
            if lv.is_undefined() {
                i += 1;
                continue;
            }
            if rv.is_undefined() {
                j += 1;
                continue;
            }
            match lv.cmp(&rv) {
                std::cmp::Ordering::Less => i += 1,
                std::cmp::Ordering::Greater => j += 1,
                std::cmp::Ordering::Equal => {
                    // Emit the cross product of the equal runs.
                    let i_end = run_end(&left_table, self.left_col, i);
                    let j_end = run_end(&right_table, self.right_col, j);
                    for li in i..i_end {
                        for rj in j..j_end {
                            let mut row = Vec::with_capacity(self.result_width());
                            row.extend_from_slice(left_table.row(li));
                            for (col, &id) in right_table.row(rj).iter().enumerate() {
                                if col != self.right_col {
                                    row.push(id);
                                }
                            }
                            out.push_row(&row)?;
                        }
                    }
                    i = i_end;
                    j = j_end;
                }
            }
        }
        Ok(single_fragment_stream((out, vocab)))
    }
}

/// End of the run of equal values starting at `from`.
fn run_end(table: &IdTable, col: usize, from: usize) -> usize {
    let value = table.at(from, col);
    let mut end = from + 1;
    while end < table.num_rows() && table.at(end, col) == value {
        end += 1;
    }
    end
}
