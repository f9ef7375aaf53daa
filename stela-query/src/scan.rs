//! Index scans: the leaves of every execution tree.
//!
//! An [`IndexScan`] reads one permutation, constrained by the fixed terms of
//! its triple pattern. Fixed terms must form a prefix of the permutation's
//! sort order; the output columns are the variable positions in that order,
//! so the output is always fully sorted.
//!
//! Two overlays apply before rows leave the scan:
//! - an optional [`PrefilterExpression`] prunes interior blocks from their
//!   metadata alone (boundary blocks whose fixed-prefix columns straddle the
//!   range bypass the filter and are always read);
//! - the delta overlay: inserted triples are merged into the sorted stream,
//!   deleted triples are dropped.

use crate::context::ExecutionContext;
use crate::error::Result;
use crate::operator::{empty_stream, Operator, QueryExecutionTree, TableStream};
use crate::prefilter::PrefilterExpression;
use crate::variable::{ColumnInfo, Variable, VariableToColumnMap};
use stela_core::{IdTable, LocalVocab, Triple, ValueId};
use stela_index::{BlockMetadata, Permutation, PermutedTriple};
use std::collections::VecDeque;
use std::sync::Arc;

/// One position of a triple pattern.
#[derive(Clone, Debug, PartialEq)]
pub enum Term {
    Fixed(ValueId),
    Variable(Variable),
}

impl Term {
    pub fn as_variable(&self) -> Option<&Variable> {
        match self {
            Term::Variable(v) => Some(v),
            Term::Fixed(_) => None,
        }
    }

    pub fn is_variable(&self) -> bool {
        matches!(self, Term::Variable(_))
    }
}

/// A triple pattern with terms already resolved to ids.
#[derive(Clone, Debug, PartialEq)]
pub struct TriplePattern {
    pub subject: Term,
    pub predicate: Term,
    pub object: Term,
}

impl TriplePattern {
    pub fn new(subject: Term, predicate: Term, object: Term) -> Self {
        Self {
            subject,
            predicate,
            object,
        }
    }

    fn spo(&self) -> [&Term; 3] {
        [&self.subject, &self.predicate, &self.object]
    }
}

/// Scan of one permutation under a triple pattern.
#[derive(Clone)]
pub struct IndexScan {
    index: Arc<stela_index::Index>,
    permutation: Permutation,
    pattern: TriplePattern,
    /// The pattern's terms in permutation column order.
    cols: [Term; 3],
    /// Output column -> permutation column, one entry per distinct
    /// variable.
    output_cols: Vec<usize>,
    variables: Vec<Variable>,
    prefilter: Option<PrefilterExpression>,
    /// Set when a fixed term does not exist in the knowledge graph.
    known_empty: bool,
}

impl IndexScan {
    /// Create a scan, choosing the permutation from the bound positions.
    pub fn new(index: Arc<stela_index::Index>, pattern: TriplePattern) -> Self {
        let permutation = Permutation::choose(
            !pattern.subject.is_variable(),
            !pattern.predicate.is_variable(),
            !pattern.object.is_variable(),
        );
        Self::with_permutation(index, pattern, permutation)
    }

    /// Create a scan over an explicitly chosen permutation. The fixed terms
    /// of the pattern must form a prefix of the permutation's sort order.
    pub fn with_permutation(
        index: Arc<stela_index::Index>,
        pattern: TriplePattern,
        permutation: Permutation,
    ) -> Self {
        let order = permutation.key_order();
        let spo = pattern.spo();
        let cols = [
            spo[order[0]].clone(),
            spo[order[1]].clone(),
            spo[order[2]].clone(),
        ];
        debug_assert!(
            fixed_prefix_len(&cols) == cols.iter().filter(|t| !t.is_variable()).count(),
            "fixed terms must form a prefix of the permutation order"
        );

        let mut output_cols = Vec::new();
        let mut variables: Vec<Variable> = Vec::new();
        for (col, term) in cols.iter().enumerate() {
            if let Term::Variable(v) = term {
                if !variables.contains(v) {
                    variables.push(v.clone());
                    output_cols.push(col);
                }
            }
        }

        Self {
            index,
            permutation,
            pattern,
            cols,
            output_cols,
            variables,
            prefilter: None,
            known_empty: false,
        }
    }

    /// Mark the scan as empty (a fixed term is not in the graph).
    pub fn new_known_empty(index: Arc<stela_index::Index>, pattern: TriplePattern) -> Self {
        let mut scan = Self::new(index, pattern);
        scan.known_empty = true;
        scan
    }

    /// Attach a block prefilter on the first variable column.
    pub fn set_prefilter(&mut self, prefilter: PrefilterExpression) {
        self.prefilter = Some(prefilter);
    }

    pub fn permutation(&self) -> Permutation {
        self.permutation
    }

    pub fn pattern(&self) -> &TriplePattern {
        &self.pattern
    }

    /// The predicate term, used by the materialized-view chain detection.
    pub fn predicate(&self) -> &Term {
        &self.pattern.predicate
    }

    fn fixed(&self, col: usize) -> Option<ValueId> {
        match &self.cols[col] {
            Term::Fixed(id) => Some(*id),
            Term::Variable(_) => None,
        }
    }

    /// Number of leading fixed columns; also the prefilter evaluation
    /// column.
    fn eval_col(&self) -> usize {
        fixed_prefix_len(&self.cols)
    }

    fn term_label(&self, term: &Term) -> String {
        match term {
            Term::Fixed(id) => self
                .index
                .term_for_id(*id)
                .unwrap_or_else(|_| format!("{id:?}")),
            Term::Variable(v) => v.to_string(),
        }
    }

    /// Project a permuted triple onto the output columns; `None` when a
    /// repeated variable binds two different values.
    fn project(&self, t: &PermutedTriple) -> Option<Vec<ValueId>> {
        // Repeated variables must agree.
        for (i, term_i) in self.cols.iter().enumerate() {
            if let Term::Variable(v) = term_i {
                for (j, term_j) in self.cols.iter().enumerate().skip(i + 1) {
                    if term_j.as_variable() == Some(v) && t.get(i) != t.get(j) {
                        return None;
                    }
                }
            }
        }
        Some(self.output_cols.iter().map(|&c| t.get(c)).collect())
    }

    /// Delta-overlay rows matching this scan, projected and sorted.
    fn delta_rows(&self, ctx: &ExecutionContext) -> Vec<(PermutedTriple, Vec<ValueId>)> {
        let mut rows: Vec<(PermutedTriple, Vec<ValueId>)> = ctx
            .delta
            .inserted()
            .filter_map(|triple| {
                let pt = self.permutation.apply(triple);
                for (col, term) in self.cols.iter().enumerate() {
                    if let Term::Fixed(id) = term {
                        if pt.get(col) != *id {
                            return None;
                        }
                    }
                }
                self.project(&pt).map(|row| (pt, row))
            })
            .collect();
        rows.sort_by(|a, b| a.0.cmp(&b.0));
        rows
    }
}

fn fixed_prefix_len(cols: &[Term; 3]) -> usize {
    cols.iter().take_while(|t| !t.is_variable()).count()
}

impl Operator for IndexScan {
    fn result_width(&self) -> usize {
        self.output_cols.len()
    }

    fn result_sorted_on(&self) -> Vec<usize> {
        // Fixed prefix + sorted permutation => output columns are sorted
        // lexicographically.
        (0..self.output_cols.len()).collect()
    }

    fn variable_columns(&self) -> VariableToColumnMap {
        self.variables
            .iter()
            .enumerate()
            .map(|(i, v)| (v.clone(), ColumnInfo::always_defined(i)))
            .collect()
    }

    fn cache_key(&self) -> String {
        let col_key = |term: &Term| match term {
            Term::Fixed(id) => format!("{id:?}"),
            Term::Variable(_) => "?".to_owned(),
        };
        let mut key = format!(
            "INDEX SCAN {}: {} {} {}",
            self.permutation,
            col_key(&self.cols[0]),
            col_key(&self.cols[1]),
            col_key(&self.cols[2]),
        );
        // Repeated variables change the semantics but not the layout; mark
        // the equality pattern positionally.
        for (i, term_i) in self.cols.iter().enumerate() {
            for (j, term_j) in self.cols.iter().enumerate().skip(i + 1) {
                if term_i.is_variable() && term_i.as_variable() == term_j.as_variable() {
                    key.push_str(&format!(" eq{i}{j}"));
                }
            }
        }
        if let Some(pf) = &self.prefilter {
            key.push_str(&format!(" prefilter[{pf}]"));
        }
        if self.known_empty {
            key.push_str(" EMPTY");
        }
        key
    }

    fn size_estimate(&self) -> u64 {
        if self.known_empty {
            return 0;
        }
        let reader = self.index.permutation(self.permutation);
        let blocks = reader.relevant_blocks(self.fixed(0), self.fixed(1));
        let block_size = self.index.config().block_size as u64;
        if self.eval_col() == 3 {
            // Fully bound: at most one row.
            return 1;
        }
        (blocks.len() as u64 * block_size).max(1)
    }

    fn cost_estimate(&self) -> u64 {
        self.size_estimate()
    }

    fn known_empty_result(&self) -> bool {
        self.known_empty
    }

    fn children(&self) -> Vec<&Arc<QueryExecutionTree>> {
        vec![]
    }

    fn descriptor(&self) -> String {
        format!(
            "IndexScan {} {} {} {}",
            self.permutation,
            self.term_label(&self.pattern.subject),
            self.term_label(&self.pattern.predicate),
            self.term_label(&self.pattern.object),
        )
    }

    fn column_originates_from_graph(&self, variable: &Variable) -> bool {
        self.variables.contains(variable)
    }

    fn compute(&self, ctx: &ExecutionContext) -> Result<TableStream> {
        if self.known_empty {
            return Ok(empty_stream());
        }
        let reader = self.index.permutation(self.permutation);
        let blocks = reader.relevant_blocks(self.fixed(0), self.fixed(1));
        let blocks = self.apply_prefilter(blocks);
        let delta_rows = self.delta_rows(ctx);

        let scan = self.clone();
        let ctx = ctx.clone();
        Ok(Box::new(ScanStream {
            scan,
            ctx,
            blocks: blocks.into(),
            delta_rows: delta_rows.into(),
            done: false,
        }))
    }
}

impl IndexScan {
    /// Run the prefilter over the blocks whose fixed-prefix columns are
    /// constant (the checker's column-consistency requirement). Boundary
    /// blocks that straddle the range bypass the filter.
    fn apply_prefilter(&self, blocks: Vec<BlockMetadata>) -> Vec<BlockMetadata> {
        let Some(prefilter) = &self.prefilter else {
            return blocks;
        };
        let eval_col = self.eval_col();
        if eval_col == 3 {
            return blocks;
        }
        let consistent = |b: &BlockMetadata| {
            (0..eval_col).all(|c| {
                let v = b.first.get(c);
                v == b.last.get(c) && Some(v) == self.fixed(c)
            })
        };
        let (interior, boundary): (Vec<_>, Vec<_>) = blocks.into_iter().partition(consistent);
        let before = interior.len();
        let kept = prefilter.evaluate(&interior, eval_col);
        tracing::debug!(
            pruned = before - kept.len(),
            total = before,
            "prefilter pruned blocks"
        );
        // Re-merge with the boundary blocks in block-index order.
        let mut merged: Vec<BlockMetadata> = kept;
        merged.extend(boundary);
        merged.sort_by_key(|b| b.block_index);
        merged
    }
}

/// Lazy stream over the pruned blocks, with delta rows merged in order.
struct ScanStream {
    scan: IndexScan,
    ctx: ExecutionContext,
    blocks: VecDeque<BlockMetadata>,
    delta_rows: VecDeque<(PermutedTriple, Vec<ValueId>)>,
    done: bool,
}

impl ScanStream {
    fn next_fragment(&mut self) -> Result<Option<IdTable>> {
        let width = self.scan.result_width();
        loop {
            self.ctx.cancellation.check()?;
            let Some(block) = self.blocks.pop_front() else {
                // Final fragment: remaining delta rows.
                if self.delta_rows.is_empty() {
                    return Ok(None);
                }
                let mut table = IdTable::new(width, self.ctx.budget.clone());
                while let Some((_, row)) = self.delta_rows.pop_front() {
                    table.push_row(&row)?;
                }
                return Ok(Some(table));
            };

            let reader = self.scan.index.permutation(self.scan.permutation);
            let triples =
                reader.read_filtered(&block, self.scan.fixed(0), self.scan.fixed(1))?;
            let mut table = IdTable::new(width, self.ctx.budget.clone());
            for t in &triples {
                // Delta rows that sort before this persistent triple keep
                // the output ordered.
                while self
                    .delta_rows
                    .front()
                    .is_some_and(|(pt, _)| pt <= t)
                {
                    let (_, row) = self.delta_rows.pop_front().expect("peeked");
                    table.push_row(&row)?;
                }
                let original = self.scan.permutation.restore(t);
                if self.ctx.delta.is_deleted(&original) {
                    continue;
                }
                if let Some(row) = self.scan.project(t) {
                    table.push_row(&row)?;
                }
            }
            // Flush delta rows belonging before the next block.
            if let Some(next_block) = self.blocks.front() {
                while self
                    .delta_rows
                    .front()
                    .is_some_and(|(pt, _)| *pt < next_block.first)
                {
                    let (_, row) = self.delta_rows.pop_front().expect("peeked");
                    table.push_row(&row)?;
                }
            }
            if !table.is_empty() {
                return Ok(Some(table));
            }
        }
    }
}

impl Iterator for ScanStream {
    type Item = Result<(IdTable, LocalVocab)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_fragment() {
            Ok(Some(table)) => Some(Ok((table, LocalVocab::new()))),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
