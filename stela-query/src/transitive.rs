//! Transitive-path closure over a binary relation.
//!
//! Given a subtree computing a relation `R` (column 0 -> column 1) and two
//! path sides, computes all `(x, y)` with `x R^k y` for `k` in
//! `[min_dist, max_dist]`.
//!
//! Structural rewrites at construction:
//! - both sides fixed but distinct with `min_dist == 0`: the identity case
//!   cannot match, so `min_dist` is lifted to 1;
//! - both sides unbound variables with `min_dist == 0`: a synthetic
//!   "empty-path side" (all subjects and objects of the active graph,
//!   distinct) seeds the zero-length case;
//! - one side fixed with `min_dist == 0`: that side is joined against the
//!   graph via a single-row VALUES clause.
//!
//! Two hull implementations satisfy the same contract and are selected by
//! the `use_bin_search_transitive_path` flag: a hash-map BFS and a variant
//! that keeps the relation sorted and binary-searches successor ranges.

use crate::context::ExecutionContext;
use crate::distinct::Distinct;
use crate::error::Result;
use crate::expression::Expression;
use crate::filter::Filter;
use crate::join::Join;
use crate::operator::{
    compute_materialized, single_fragment_stream, Operation, Operator, QueryExecutionTree,
    TableStream,
};
use crate::project::Project;
use crate::scan::{IndexScan, Term, TriplePattern};
use crate::union::Union;
use crate::values::Values;
use crate::variable::{ColumnInfo, UndefStatus, Variable, VariableToColumnMap};
use rustc_hash::{FxHashMap, FxHashSet};
use stela_core::{EngineConfig, IdTable, ValueId};
use stela_index::{Index, Permutation};
use std::sync::Arc;

/// Unbounded maximum distance.
pub const UNBOUNDED: u64 = u64::MAX;

fn internal_variable(suffix: &str) -> Variable {
    Variable::new(format!("internal_property_path_variable_{suffix}"))
}

// ============================================================================
// TransitivePathSide
// ============================================================================

/// One endpoint of the path: a fixed term or a variable, optionally bound
/// to a subtree column.
#[derive(Clone)]
pub struct TransitivePathSide {
    pub value: Term,
    pub tree_and_col: Option<(Arc<QueryExecutionTree>, usize)>,
    pub output_col: usize,
}

impl TransitivePathSide {
    pub fn variable(v: Variable) -> Self {
        Self {
            value: Term::Variable(v),
            tree_and_col: None,
            output_col: 0,
        }
    }

    pub fn fixed(id: ValueId) -> Self {
        Self {
            value: Term::Fixed(id),
            tree_and_col: None,
            output_col: 0,
        }
    }

    pub fn is_variable(&self) -> bool {
        self.value.is_variable()
    }

    pub fn is_bound_variable(&self) -> bool {
        self.is_variable() && self.tree_and_col.is_some()
    }

    pub fn is_unbound_variable(&self) -> bool {
        self.is_variable() && self.tree_and_col.is_none()
    }

    fn is_sorted_on_input_col(&self) -> bool {
        self.tree_and_col
            .as_ref()
            .is_some_and(|(tree, col)| tree.result_sorted_on().first() == Some(col))
    }

    fn cache_key(&self) -> String {
        let mut key = match &self.value {
            Term::Fixed(id) => format!("fixed {id:?}"),
            Term::Variable(_) => format!("var at col {}", self.output_col),
        };
        if let Some((tree, col)) = &self.tree_and_col {
            key.push_str(&format!(", bound on col {col} {{{}}}", tree.cache_key()));
        }
        key
    }
}

// ============================================================================
// TransitivePath
// ============================================================================

#[derive(Clone)]
pub struct TransitivePath {
    index: Arc<Index>,
    subtree: Arc<QueryExecutionTree>,
    /// Alternative relation subtrees kept for cost comparison when a side
    /// gets bound.
    alternative_subtrees: Vec<Arc<QueryExecutionTree>>,
    lhs: TransitivePathSide,
    rhs: TransitivePathSide,
    min_dist: u64,
    max_dist: u64,
    use_bin_search: bool,
    bound_variable_is_for_empty_path: bool,
    variable_columns: VariableToColumnMap,
    result_width: usize,
    config: Arc<EngineConfig>,
}

impl TransitivePath {
    /// Create the operator, selecting the hull implementation from the
    /// engine configuration.
    pub fn new(
        index: Arc<Index>,
        subtree: Arc<QueryExecutionTree>,
        left_side: TransitivePathSide,
        right_side: TransitivePathSide,
        min_dist: u64,
        max_dist: u64,
        config: Arc<EngineConfig>,
    ) -> Self {
        let use_bin_search = config.use_bin_search_transitive_path;
        Self::with_bin_search(
            index, subtree, left_side, right_side, min_dist, max_dist, use_bin_search, config,
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn with_bin_search(
        index: Arc<Index>,
        subtree: Arc<QueryExecutionTree>,
        mut lhs: TransitivePathSide,
        mut rhs: TransitivePathSide,
        mut min_dist: u64,
        max_dist: u64,
        use_bin_search: bool,
        config: Arc<EngineConfig>,
    ) -> Self {
        let mut variable_columns = VariableToColumnMap::new();
        if let Term::Variable(v) = &lhs.value {
            variable_columns.insert(v.clone(), ColumnInfo::always_defined(0));
        }
        if let Term::Variable(v) = &rhs.value {
            variable_columns.insert(v.clone(), ColumnInfo::always_defined(1));
        }

        let mut bound_variable_is_for_empty_path = false;
        if min_dist == 0 {
            if !lhs.is_variable() && !rhs.is_variable() && lhs.value != rhs.value {
                // `<x> <p>* <y>` with `<x> != <y>` cannot match with length
                // zero; computing `<x> <p>+ <y>` avoids matching the fixed
                // term against the whole graph.
                min_dist = 1;
            } else if lhs.is_unbound_variable() && rhs.is_unbound_variable() {
                bound_variable_is_for_empty_path = true;
                lhs.tree_and_col = Some((make_empty_path_side(&index, None), 0));
            } else {
                // Bind a fixed starting side to the graph via a single-row
                // VALUES join so the zero-length case produces its row.
                let right_starts =
                    !lhs.is_bound_variable() && (rhs.is_bound_variable() || !rhs.is_variable());
                let starting = if right_starts { &mut rhs } else { &mut lhs };
                if let Term::Fixed(id) = starting.value {
                    starting.tree_and_col = Some((join_with_graph(&index, id), 0));
                }
            }
        }

        lhs.output_col = 0;
        rhs.output_col = 1;

        Self {
            index,
            subtree,
            alternative_subtrees: Vec::new(),
            lhs,
            rhs,
            min_dist,
            max_dist,
            use_bin_search,
            bound_variable_is_for_empty_path,
            variable_columns,
            result_width: 2,
            config,
        }
    }

    pub fn min_dist(&self) -> u64 {
        self.min_dist
    }

    pub fn max_dist(&self) -> u64 {
        self.max_dist
    }

    /// Whether at least one side is bound or fixed. The synthetic
    /// empty-path tree does not count as bound.
    pub fn is_bound_or_id(&self) -> bool {
        !self.bound_variable_is_for_empty_path
            && (!self.lhs.is_unbound_variable() || !self.rhs.is_unbound_variable())
    }

    /// The side the traversal starts from and the side it targets.
    fn decide_direction(&self) -> (&TransitivePathSide, &TransitivePathSide, bool) {
        if self.lhs.is_bound_variable() {
            tracing::debug!("computing TransitivePath left to right");
            (&self.lhs, &self.rhs, true)
        } else if self.rhs.is_bound_variable() || !self.rhs.is_variable() {
            tracing::debug!("computing TransitivePath right to left");
            (&self.rhs, &self.lhs, false)
        } else {
            tracing::debug!("computing TransitivePath left to right");
            (&self.lhs, &self.rhs, true)
        }
    }

    /// Bind the left side to a subtree (the variable's values come from
    /// `tree` column `input_col`).
    pub fn bind_left_side(
        &self,
        tree: Arc<QueryExecutionTree>,
        input_col: usize,
    ) -> Result<TransitivePath> {
        self.bind_side(tree, input_col, true)
    }

    /// Bind the right side to a subtree.
    pub fn bind_right_side(
        &self,
        tree: Arc<QueryExecutionTree>,
        input_col: usize,
    ) -> Result<TransitivePath> {
        self.bind_side(tree, input_col, false)
    }

    /// Pre-process a to-be-bound subtree: drop undefined values and join
    /// with the graph when the column's values may come from elsewhere.
    fn match_with_knowledge_graph(
        &self,
        mut input_col: usize,
        mut tree: Arc<QueryExecutionTree>,
    ) -> Arc<QueryExecutionTree> {
        let map = tree.variable_columns();
        let Some((variable, info)) = map.iter().find(|(_, i)| i.column == input_col) else {
            return tree;
        };
        let variable = variable.clone();
        let info = *info;

        // If we're not explicitly handling the empty path, the first step
        // filters non-matching values anyway.
        if self.min_dist > 0 {
            return tree;
        }

        // Undefined values are not in the graph and break the join.
        if info.undef != UndefStatus::AlwaysDefined {
            let label = format!("BOUND({variable})");
            let bound = Expression::Bound(Box::new(Expression::Column(input_col)));
            tree = QueryExecutionTree::new(Operation::Filter(Filter::new(tree, bound, label)));
        }

        if !tree.operation().column_originates_from_graph(&variable) {
            // Join with the graph. The input tree is the left join side, so
            // the variable's column index does not move.
            let side = make_empty_path_side(&self.index, Some(variable));
            tree = QueryExecutionTree::new(Operation::Join(Join::new(tree, side, input_col, 0)));
        }
        tree
    }

    fn bind_side(
        &self,
        tree: Arc<QueryExecutionTree>,
        input_col: usize,
        is_left: bool,
    ) -> Result<TransitivePath> {
        let tree = self.match_with_knowledge_graph(input_col, tree);
        let tree = QueryExecutionTree::ensure_sorted(tree, vec![input_col]);

        let mut lhs = self.lhs.clone();
        let mut rhs = self.rhs.clone();
        if is_left {
            lhs.tree_and_col = Some((Arc::clone(&tree), input_col));
            // Remove the placeholder tree when binding the actual tree.
            if !rhs.is_variable() {
                rhs.tree_and_col = None;
            }
        } else {
            if self.bound_variable_is_for_empty_path || !lhs.is_variable() {
                lhs.tree_and_col = None;
            }
            rhs.tree_and_col = Some((Arc::clone(&tree), input_col));
        }

        // Use the cheapest path over any of the alternative relation
        // subtrees, so a pre-sorted alternative never gets re-sorted.
        let mut candidates: Vec<TransitivePath> = Vec::new();
        for subtree in
            std::iter::once(&self.subtree).chain(self.alternative_subtrees.iter())
        {
            candidates.push(TransitivePath::with_bin_search(
                Arc::clone(&self.index),
                Arc::clone(subtree),
                lhs.clone(),
                rhs.clone(),
                self.min_dist,
                self.max_dist,
                self.use_bin_search,
                Arc::clone(&self.config),
            ));
        }
        let mut best = candidates
            .into_iter()
            .min_by_key(|c| c.cost_estimate())
            .expect("at least one candidate");

        // Propagate the bound side's other columns into the output.
        for (variable, mut info) in tree.variable_columns() {
            if info.column == input_col {
                continue;
            }
            info.column += if info.column > input_col { 1 } else { 2 };
            debug_assert!(!best.variable_columns.contains_key(&variable));
            best.variable_columns.insert(variable, info);
        }
        best.result_width += tree.result_width() - 1;
        Ok(best)
    }

    // ------------------------------------------------------------------
    // Hull computation
    // ------------------------------------------------------------------

    fn compute_hull(
        &self,
        ctx: &ExecutionContext,
        edges: &[(ValueId, ValueId)],
        starts: &[ValueId],
    ) -> Result<FxHashMap<ValueId, Vec<ValueId>>> {
        if self.use_bin_search {
            let mut sorted = edges.to_vec();
            sorted.sort_unstable();
            let graph = BinSearchGraph { edges: sorted };
            self.hull_over(ctx, &graph, starts)
        } else {
            let mut map: FxHashMap<ValueId, Vec<ValueId>> = FxHashMap::default();
            for &(a, b) in edges {
                map.entry(a).or_default().push(b);
            }
            let graph = HashMapGraph { map };
            self.hull_over(ctx, &graph, starts)
        }
    }

    fn hull_over<G: SuccessorGraph>(
        &self,
        ctx: &ExecutionContext,
        graph: &G,
        starts: &[ValueId],
    ) -> Result<FxHashMap<ValueId, Vec<ValueId>>> {
        let node_bound = graph.node_bound() as u64;
        let mut result: FxHashMap<ValueId, Vec<ValueId>> = FxHashMap::default();
        for &start in starts {
            ctx.cancellation.check()?;
            let mut reached: FxHashSet<ValueId> = FxHashSet::default();
            if self.min_dist == 0 {
                reached.insert(start);
            }
            // Per-depth frontier; a depth bound of min + |nodes| witnesses
            // every reachable pair even through cycles.
            let depth_limit = self
                .max_dist
                .min(self.min_dist.saturating_add(node_bound).saturating_add(1));
            let mut frontier: Vec<ValueId> = vec![start];
            let mut seen_frontiers: FxHashSet<ValueId> = FxHashSet::default();
            let mut depth = 0u64;
            while !frontier.is_empty() && depth < depth_limit {
                depth += 1;
                let mut next: Vec<ValueId> = Vec::new();
                for node in frontier.drain(..) {
                    graph.for_each_successor(node, |succ| next.push(succ));
                }
                next.sort_unstable();
                next.dedup();
                if depth >= self.min_dist {
                    reached.extend(next.iter().copied());
                    // A node already expanded at a depth >= min_dist
                    // contributes nothing new. Below min_dist, revisits
                    // must stay (a node can be reached at several depths);
                    // the depth limit bounds that blow-up.
                    next.retain(|n| seen_frontiers.insert(*n));
                }
                frontier = next;
            }
            let mut targets: Vec<ValueId> = reached.into_iter().collect();
            targets.sort_unstable();
            result.insert(start, targets);
        }
        Ok(result)
    }
}

// ============================================================================
// Successor graphs (the two hull implementations)
// ============================================================================

trait SuccessorGraph {
    fn for_each_successor(&self, node: ValueId, f: impl FnMut(ValueId));
    fn node_bound(&self) -> usize;
}

/// Hash-map BFS: successors materialised in a dictionary.
struct HashMapGraph {
    map: FxHashMap<ValueId, Vec<ValueId>>,
}

impl SuccessorGraph for HashMapGraph {
    fn for_each_successor(&self, node: ValueId, mut f: impl FnMut(ValueId)) {
        if let Some(succs) = self.map.get(&node) {
            for &s in succs {
                f(s);
            }
        }
    }

    fn node_bound(&self) -> usize {
        self.map.len() + 1
    }
}

/// Binary-search variant: the relation stays one sorted array and successor
/// ranges are found by seeking.
struct BinSearchGraph {
    edges: Vec<(ValueId, ValueId)>,
}

impl SuccessorGraph for BinSearchGraph {
    fn for_each_successor(&self, node: ValueId, mut f: impl FnMut(ValueId)) {
        let begin = self.edges.partition_point(|&(a, _)| a < node);
        for &(a, b) in &self.edges[begin..] {
            if a != node {
                break;
            }
            f(b);
        }
    }

    fn node_bound(&self) -> usize {
        self.edges.len() + 1
    }
}

// ============================================================================
// Synthetic sides
// ============================================================================

/// All subjects-or-objects of the active graph, distinct: the union of an
/// SPO scan and an OPS scan, both projected to their first column.
fn make_empty_path_side(index: &Arc<Index>, variable: Option<Variable>) -> Arc<QueryExecutionTree> {
    let x = variable.unwrap_or_else(|| internal_variable("x"));
    let y = internal_variable("y");
    let z = internal_variable("z");

    let select_x = |scan: IndexScan, x: &Variable| {
        let tree = QueryExecutionTree::new(Operation::IndexScan(scan));
        QueryExecutionTree::new(Operation::Project(Project::on_variables(
            tree,
            std::slice::from_ref(x),
        )))
    };

    let subjects = select_x(
        IndexScan::with_permutation(
            Arc::clone(index),
            TriplePattern::new(
                Term::Variable(x.clone()),
                Term::Variable(y.clone()),
                Term::Variable(z.clone()),
            ),
            Permutation::Spo,
        ),
        &x,
    );
    let objects = select_x(
        IndexScan::with_permutation(
            Arc::clone(index),
            TriplePattern::new(
                Term::Variable(z),
                Term::Variable(y),
                Term::Variable(x.clone()),
            ),
            Permutation::Ops,
        ),
        &x,
    );
    let all = QueryExecutionTree::new(Operation::Union(Union::new(subjects, objects)));
    QueryExecutionTree::new(Operation::Distinct(Distinct::new(all, vec![0])))
}

/// Join a fixed term against the graph via a single-row VALUES clause, so
/// the zero-length path produces the term's row only when the term exists.
fn join_with_graph(index: &Arc<Index>, id: ValueId) -> Arc<QueryExecutionTree> {
    let x = internal_variable("x");
    let values = QueryExecutionTree::new(Operation::Values(Values::single(x.clone(), id)));
    let side = make_empty_path_side(index, Some(x));
    QueryExecutionTree::new(Operation::Join(Join::new(side, values, 0, 0)))
}

// ============================================================================
// Operator impl
// ============================================================================

impl Operator for TransitivePath {
    fn result_width(&self) -> usize {
        self.result_width
    }

    fn result_sorted_on(&self) -> Vec<usize> {
        if self.lhs.is_sorted_on_input_col() {
            return vec![0];
        }
        if self.rhs.is_sorted_on_input_col() {
            return vec![1];
        }
        vec![]
    }

    fn variable_columns(&self) -> VariableToColumnMap {
        self.variable_columns.clone()
    }

    fn cache_key(&self) -> String {
        let mut key = String::from("TRANSITIVE PATH ");
        if self.lhs.is_variable() && self.lhs.value == self.rhs.value {
            // The same variable left and right changes the behaviour, and
            // variable names are invisible in the children's keys.
            key.push_str("symmetric ");
        }
        key.push_str(&format!("minDist {} maxDist {}\n", self.min_dist, self.max_dist));
        key.push_str(&format!("Left side: {}\n", self.lhs.cache_key()));
        key.push_str(&format!("Right side: {}\n", self.rhs.cache_key()));
        key.push_str(&format!("Subtree:\n{}\n", self.subtree.cache_key()));
        key
    }

    fn size_estimate(&self) -> u64 {
        if !self.lhs.is_variable() || !self.rhs.is_variable() {
            // A fixed side usually matches few paths; a deliberate
            // overestimate that still avoids plans building large
            // intermediates first.
            return self.config.transitive_fixed_side_estimate;
        }
        if let Some((tree, _)) = &self.lhs.tree_and_col {
            return tree.size_estimate();
        }
        if let Some((tree, _)) = &self.rhs.tree_and_col {
            return tree.size_estimate();
        }
        // Both sides free: the full hull. Scaled by the worst-case blow-up
        // observed on well-connected predicates so this plan is only chosen
        // when nothing binds either side.
        self.subtree
            .size_estimate()
            .saturating_mul(self.config.transitive_var_blowup_factor)
    }

    fn cost_estimate(&self) -> u64 {
        let mut cost = self.size_estimate();
        for child in self.children() {
            cost = cost.saturating_add(child.cost_estimate());
        }
        cost
    }

    fn known_empty_result(&self) -> bool {
        let (start, _, _) = self.decide_direction();
        let start_empty = start
            .tree_and_col
            .as_ref()
            .is_some_and(|(tree, _)| tree.known_empty_result());
        (self.subtree.known_empty_result() && self.min_dist > 0) || start_empty
    }

    fn children(&self) -> Vec<&Arc<QueryExecutionTree>> {
        let mut out = Vec::new();
        if let Some((tree, _)) = &self.lhs.tree_and_col {
            out.push(tree);
        }
        if let Some((tree, _)) = &self.rhs.tree_and_col {
            out.push(tree);
        }
        out.push(&self.subtree);
        out
    }

    fn descriptor(&self) -> String {
        let mut os = String::from("TransitivePath ");
        if self.min_dist > 1 || self.max_dist < UNBOUNDED {
            os.push_str(&format!("[{}, {}] ", self.min_dist, self.max_dist));
        }
        let side_label = |side: &TransitivePathSide| match &side.value {
            Term::Fixed(id) => self
                .index
                .term_for_id(*id)
                .unwrap_or_else(|_| format!("{id:?}")),
            Term::Variable(v) => v.to_string(),
        };
        os.push_str(&side_label(&self.lhs));
        if let Operation::IndexScan(scan) = self.subtree.operation() {
            if let Term::Fixed(p) = scan.predicate() {
                os.push_str(&format!(
                    " {} ",
                    self.index
                        .term_for_id(*p)
                        .unwrap_or_else(|_| format!("{p:?}"))
                ));
            } else {
                os.push_str(" <??> ");
            }
        } else {
            os.push_str(" <??> ");
        }
        os.push_str(&side_label(&self.rhs));
        os
    }

    fn column_originates_from_graph(&self, variable: &Variable) -> bool {
        self.lhs.value.as_variable() == Some(variable)
            || self.rhs.value.as_variable() == Some(variable)
    }

    fn compute(&self, ctx: &ExecutionContext) -> Result<TableStream> {
        // The relation: subtree column 0 -> column 1.
        let (relation, mut vocab) = compute_materialized(&self.subtree, ctx)?;
        let (start_side, target_side, left_to_right) = self.decide_direction();

        let edges: Vec<(ValueId, ValueId)> = relation
            .rows()
            .map(|row| {
                if left_to_right {
                    (row[0], row[1])
                } else {
                    (row[1], row[0])
                }
            })
            .collect();

        // Starting nodes and, for a bound side, the rows to propagate.
        let mut bound_rows: Option<(IdTable, usize)> = None;
        let starts: Vec<ValueId> = if let Some((tree, col)) = &start_side.tree_and_col {
            let (table, side_vocab) = compute_materialized(tree, ctx)?;
            vocab.merge_with([&side_vocab]);
            let mut starts: Vec<ValueId> =
                table.column(*col).filter(|id| !id.is_undefined()).collect();
            starts.sort_unstable();
            starts.dedup();
            let col = *col;
            bound_rows = Some((table, col));
            starts
        } else {
            match &start_side.value {
                Term::Fixed(id) => vec![*id],
                Term::Variable(_) => {
                    let mut starts: Vec<ValueId> = edges.iter().map(|&(a, _)| a).collect();
                    starts.sort_unstable();
                    starts.dedup();
                    starts
                }
            }
        };

        let hull = self.compute_hull(ctx, &edges, &starts)?;

        // The fixed target filters the hull.
        let target_filter = match &target_side.value {
            Term::Fixed(id) => Some(*id),
            Term::Variable(_) => None,
        };

        let (start_col, target_col) = (start_side.output_col, target_side.output_col);
        let mut out = IdTable::new(self.result_width, ctx.budget.clone());
        let mut row = vec![ValueId::UNDEFINED; self.result_width];

        let mut emit = |start: ValueId,
                        input: Option<(&IdTable, usize, usize)>,
                        out: &mut IdTable|
         -> Result<()> {
            let Some(targets) = hull.get(&start) else {
                return Ok(());
            };
            for &target in targets {
                if target_filter.is_some_and(|f| f != target) {
                    continue;
                }
                row.fill(ValueId::UNDEFINED);
                row[start_col] = start;
                row[target_col] = target;
                if let Some((table, input_col, input_row)) = input {
                    for (c, &id) in table.row(input_row).iter().enumerate() {
                        if c == input_col {
                            continue;
                        }
                        let out_col = if c > input_col { c + 1 } else { c + 2 };
                        row[out_col] = id;
                    }
                }
                out.push_row(&row)?;
            }
            Ok(())
        };

        match &bound_rows {
            Some((table, input_col)) => {
                for input_row in 0..table.num_rows() {
                    ctx.cancellation.check()?;
                    let start = table.at(input_row, *input_col);
                    if start.is_undefined() {
                        continue;
                    }
                    emit(start, Some((table, *input_col, input_row)), &mut out)?;
                }
            }
            None => {
                for &start in &starts {
                    ctx.cancellation.check()?;
                    emit(start, None, &mut out)?;
                }
            }
        }

        Ok(single_fragment_stream((out, vocab)))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn vid(v: u64) -> ValueId {
        ValueId::vocab_index(v)
    }

    #[test]
    fn test_bin_search_graph_successors() {
        let graph = BinSearchGraph {
            edges: vec![
                (vid(1), vid(2)),
                (vid(1), vid(3)),
                (vid(2), vid(3)),
                (vid(4), vid(1)),
            ],
        };
        let mut succs = Vec::new();
        graph.for_each_successor(vid(1), |s| succs.push(s));
        assert_eq!(succs, vec![vid(2), vid(3)]);

        succs.clear();
        graph.for_each_successor(vid(9), |s| succs.push(s));
        assert!(succs.is_empty());
    }

    #[test]
    fn test_hash_map_graph_matches_bin_search() {
        let edges = vec![
            (vid(1), vid(2)),
            (vid(2), vid(3)),
            (vid(3), vid(1)),
            (vid(3), vid(4)),
        ];
        let mut map: FxHashMap<ValueId, Vec<ValueId>> = FxHashMap::default();
        for &(a, b) in &edges {
            map.entry(a).or_default().push(b);
        }
        let hash_graph = HashMapGraph { map };
        let bin_graph = BinSearchGraph {
            edges: {
                let mut e = edges.clone();
                e.sort_unstable();
                e
            },
        };
        for node in [vid(1), vid(2), vid(3), vid(4), vid(5)] {
            let mut a = Vec::new();
            let mut b = Vec::new();
            hash_graph.for_each_successor(node, |s| a.push(s));
            bin_graph.for_each_successor(node, |s| b.push(s));
            a.sort_unstable();
            b.sort_unstable();
            assert_eq!(a, b, "successors of {node:?}");
        }
    }
}
