//! The operator contract and the closed operator set.
//!
//! Operators form a DAG of [`QueryExecutionTree`] nodes (children are shared
//! `Arc` handles, because alternative subtrees are kept alive for cost
//! comparison). The operator set is closed: [`Operation`] is an enum over
//! the variant structs, and the common surface dispatches by match.
//!
//! `compute` returns a pull-based stream of `(IdTable, LocalVocab)`
//! fragments. Operators must check the cancellation handle at fragment
//! boundaries; within one stream, row order is whatever
//! [`Operator::result_sorted_on`] documents.
//!
//! **Cache-key law**: two operator trees produce identical result tables
//! (modulo row order where unordered) iff their cache keys are equal.
//! Cache keys therefore name fixed terms and column indices, never variable
//! names: a variable rename that does not change column-to-value bindings
//! must not change the key.

use crate::bind::Bind;
use crate::context::ExecutionContext;
use crate::distinct::Distinct;
use crate::error::Result;
use crate::filter::Filter;
use crate::join::Join;
use crate::project::Project;
use crate::scan::IndexScan;
use crate::sort::Sort;
use crate::text_scan::{TextIndexScanForEntity, TextIndexScanForWord};
use crate::transitive::TransitivePath;
use crate::union::Union;
use crate::values::Values;
use crate::variable::{ColumnInfo, Variable, VariableToColumnMap};
use crate::views::MaterializedViewScan;
use stela_core::{IdTable, LocalVocab, MemoryBudget};
use std::sync::Arc;

/// One produced fragment: a table plus the strings it materialised.
pub type TableFragment = (IdTable, LocalVocab);

/// Pull-based lazy stream of fragments.
pub type TableStream = Box<dyn Iterator<Item = Result<TableFragment>> + Send>;

/// The common operator surface.
pub trait Operator {
    /// Number of output columns.
    fn result_width(&self) -> usize;

    /// Column indices the output is sorted on (possibly empty).
    fn result_sorted_on(&self) -> Vec<usize>;

    /// Output variable -> column mapping.
    fn variable_columns(&self) -> VariableToColumnMap;

    /// Stable identifier of this operation and its children. See the
    /// cache-key law in the module docs.
    fn cache_key(&self) -> String;

    /// Estimated number of result rows.
    fn size_estimate(&self) -> u64;

    /// Estimated total cost including children.
    fn cost_estimate(&self) -> u64;

    /// Whether the result is known to be empty without computing it.
    fn known_empty_result(&self) -> bool {
        false
    }

    /// Average number of rows per distinct value of a column. Operators
    /// without better knowledge report 1.
    fn multiplicity(&self, _col: usize) -> f32 {
        1.0
    }

    /// Child subtrees.
    fn children(&self) -> Vec<&Arc<QueryExecutionTree>>;

    /// Human-readable label for EXPLAIN output.
    fn descriptor(&self) -> String;

    /// Whether values of this variable are guaranteed to come from the
    /// knowledge graph (or be undefined). Used to skip graph-membership
    /// joins.
    fn column_originates_from_graph(&self, _variable: &Variable) -> bool {
        false
    }

    /// Produce the lazy result stream.
    fn compute(&self, ctx: &ExecutionContext) -> Result<TableStream>;
}

/// The closed set of operators.
#[derive(Clone)]
pub enum Operation {
    IndexScan(IndexScan),
    Join(Join),
    Union(Union),
    Distinct(Distinct),
    Filter(Filter),
    Values(Values),
    Sort(Sort),
    Bind(Bind),
    Project(Project),
    TransitivePath(TransitivePath),
    TextIndexScanForEntity(TextIndexScanForEntity),
    TextIndexScanForWord(TextIndexScanForWord),
    MaterializedViewScan(MaterializedViewScan),
}

macro_rules! dispatch {
    ($self:expr, $inner:ident => $body:expr) => {
        match $self {
            Operation::IndexScan($inner) => $body,
            Operation::Join($inner) => $body,
            Operation::Union($inner) => $body,
            Operation::Distinct($inner) => $body,
            Operation::Filter($inner) => $body,
            Operation::Values($inner) => $body,
            Operation::Sort($inner) => $body,
            Operation::Bind($inner) => $body,
            Operation::Project($inner) => $body,
            Operation::TransitivePath($inner) => $body,
            Operation::TextIndexScanForEntity($inner) => $body,
            Operation::TextIndexScanForWord($inner) => $body,
            Operation::MaterializedViewScan($inner) => $body,
        }
    };
}

impl Operator for Operation {
    fn result_width(&self) -> usize {
        dispatch!(self, op => op.result_width())
    }

    fn result_sorted_on(&self) -> Vec<usize> {
        dispatch!(self, op => op.result_sorted_on())
    }

    fn variable_columns(&self) -> VariableToColumnMap {
        dispatch!(self, op => op.variable_columns())
    }

    fn cache_key(&self) -> String {
        dispatch!(self, op => op.cache_key())
    }

    fn size_estimate(&self) -> u64 {
        dispatch!(self, op => op.size_estimate())
    }

    fn cost_estimate(&self) -> u64 {
        dispatch!(self, op => op.cost_estimate())
    }

    fn known_empty_result(&self) -> bool {
        dispatch!(self, op => op.known_empty_result())
    }

    fn children(&self) -> Vec<&Arc<QueryExecutionTree>> {
        dispatch!(self, op => op.children())
    }

    fn descriptor(&self) -> String {
        dispatch!(self, op => op.descriptor())
    }

    fn column_originates_from_graph(&self, variable: &Variable) -> bool {
        dispatch!(self, op => op.column_originates_from_graph(variable))
    }

    fn compute(&self, ctx: &ExecutionContext) -> Result<TableStream> {
        ctx.cancellation.check()?;
        dispatch!(self, op => op.compute(ctx))
    }
}

// ============================================================================
// QueryExecutionTree
// ============================================================================

/// A node of the execution DAG. Always handled through `Arc`.
pub struct QueryExecutionTree {
    operation: Operation,
}

impl QueryExecutionTree {
    pub fn new(operation: Operation) -> Arc<Self> {
        Arc::new(Self { operation })
    }

    pub fn operation(&self) -> &Operation {
        &self.operation
    }

    pub fn result_width(&self) -> usize {
        self.operation.result_width()
    }

    pub fn result_sorted_on(&self) -> Vec<usize> {
        self.operation.result_sorted_on()
    }

    pub fn variable_columns(&self) -> VariableToColumnMap {
        self.operation.variable_columns()
    }

    /// Column of one variable, if it is visible in the output.
    pub fn variable_column(&self, variable: &Variable) -> Option<ColumnInfo> {
        self.variable_columns().get(variable).copied()
    }

    pub fn cache_key(&self) -> String {
        self.operation.cache_key()
    }

    pub fn size_estimate(&self) -> u64 {
        self.operation.size_estimate()
    }

    pub fn cost_estimate(&self) -> u64 {
        self.operation.cost_estimate()
    }

    pub fn known_empty_result(&self) -> bool {
        self.operation.known_empty_result()
    }

    pub fn descriptor(&self) -> String {
        self.operation.descriptor()
    }

    pub fn compute(&self, ctx: &ExecutionContext) -> Result<TableStream> {
        self.operation.compute(ctx)
    }

    /// Wrap `tree` in a [`Sort`] unless its output is already sorted on the
    /// given column prefix.
    pub fn ensure_sorted(tree: Arc<Self>, cols: Vec<usize>) -> Arc<Self> {
        let current = tree.result_sorted_on();
        if current.len() >= cols.len() && current[..cols.len()] == cols[..] {
            return tree;
        }
        QueryExecutionTree::new(Operation::Sort(Sort::new(tree, cols)))
    }
}

impl std::fmt::Debug for QueryExecutionTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "QueryExecutionTree({})", self.descriptor())
    }
}

// ============================================================================
// Stream helpers
// ============================================================================

/// Drain a stream into a single fragment, merging the fragment vocabularies
/// into one whose lifetime covers every emitted row (`yieldOnce` semantics).
pub fn materialize(
    stream: TableStream,
    width: usize,
    budget: &MemoryBudget,
) -> Result<TableFragment> {
    let mut table = IdTable::new(width, budget.clone());
    let mut vocab = LocalVocab::new();
    for fragment in stream {
        let (chunk, chunk_vocab) = fragment?;
        for row in chunk.rows() {
            table.push_row(row)?;
        }
        vocab.merge_with([&chunk_vocab]);
    }
    Ok((table, vocab))
}

/// Compute a child tree and materialize it into a single fragment.
pub fn compute_materialized(
    tree: &Arc<QueryExecutionTree>,
    ctx: &ExecutionContext,
) -> Result<TableFragment> {
    let stream = tree.compute(ctx)?;
    materialize(stream, tree.result_width(), &ctx.budget)
}

/// A stream that yields exactly one precomputed fragment.
pub fn single_fragment_stream(fragment: TableFragment) -> TableStream {
    Box::new(std::iter::once(Ok(fragment)))
}

/// The empty stream.
pub fn empty_stream() -> TableStream {
    Box::new(std::iter::empty())
}
