//! Materialized views: stored results of canonical query patterns, and the
//! analysis that detects when a user query can be answered from one.
//!
//! A view records its write query's basic graph pattern. The
//! [`QueryPatternCache`] indexes loaded views by shape:
//! - *simple chains* `?s <p1> ?m . ?m <p2> ?o` are keyed by the ordered
//!   predicate pair and checked against user queries in both orientations;
//! - *stars* on one subject are analyzed (the predicate index is kept
//!   current) but star rewriting is deferred: `check_star` intentionally
//!   reports no match until the rewrite is complete.
//!
//! Before matching, graph-pattern operations that cannot affect the view's
//! variables are filtered out (`BIND` with an unreferenced target, `VALUES`
//! introducing unreferenced variables); anything else conservatively blocks
//! the rewrite.

use crate::context::ExecutionContext;
use crate::error::Result;
use crate::operator::{single_fragment_stream, Operator, QueryExecutionTree, TableStream};
use crate::parser::{PatternElement, RawTerm, RawTriple, ValuesClause};
use crate::variable::{ColumnInfo, Variable, VariableToColumnMap};
use rustc_hash::{FxHashMap, FxHashSet};
use stela_core::{IdTable, LocalVocab, ValueId};
use std::sync::Arc;

// ============================================================================
// MaterializedView
// ============================================================================

/// A loaded materialized view: the write query's pattern plus the
/// precomputed rows.
pub struct MaterializedView {
    pub name: String,
    /// Output variables, one per stored column.
    pub variables: Vec<Variable>,
    /// The write query's basic graph pattern.
    pub triples: Vec<RawTriple>,
    /// Precomputed result rows, sorted by the first column.
    pub rows: Vec<Vec<ValueId>>,
}

impl MaterializedView {
    pub fn column_of(&self, variable: &Variable) -> Option<usize> {
        self.variables.iter().position(|v| v == variable)
    }
}

/// Key of the simple-chain cache: the ordered predicate pair.
type ChainedPredicates = (String, String);

/// One chain a view can answer: `?s <p1> ?m . ?m <p2> ?o`.
#[derive(Clone)]
pub struct ChainInfo {
    pub subject: Variable,
    pub chain: Variable,
    pub object: Variable,
    pub view: Arc<MaterializedView>,
}

/// A user-query chain that matched the cache. The subject may be fixed.
#[derive(Clone)]
pub struct UserQueryChain {
    pub subject: RawTerm,
    pub chain: Variable,
    pub object: Variable,
    pub chain_infos: Arc<Vec<ChainInfo>>,
}

/// A star that could be (partially) rewritten. Kept for the deferred star
/// rewrite; never produced yet.
#[allow(dead_code)]
pub struct UserQueryStar {
    pub view: Arc<MaterializedView>,
    pub requested_columns: Vec<Variable>,
    pub remaining_triples: Vec<RawTriple>,
}

// ============================================================================
// Invariance filter
// ============================================================================

/// Variables bound by the basic graph patterns of a query.
pub fn variables_in_triples(triples: &[RawTriple]) -> FxHashSet<Variable> {
    let mut vars = FxHashSet::default();
    for triple in triples {
        for term in [&triple.subject, &triple.predicate, &triple.object] {
            if let RawTerm::Var(v) = term {
                vars.insert(v.clone());
            }
        }
    }
    vars
}

/// Decides whether graph-pattern operations can be ignored because they do
/// not affect the bindings of the given variables.
pub struct BasicGraphPatternsInvariantTo {
    pub variables: FxHashSet<Variable>,
}

impl BasicGraphPatternsInvariantTo {
    pub fn is_invariant_bind(&self, target: &Variable) -> bool {
        !self.variables.contains(target)
    }

    pub fn is_invariant_values(&self, values: &ValuesClause) -> bool {
        !values
            .variables
            .iter()
            .any(|v| self.variables.contains(v))
    }

    /// OPTIONAL could bind values from the outside query; treat it as
    /// non-invariant until proven otherwise.
    pub fn is_invariant_optional(&self) -> bool {
        false
    }

    /// Whether a whole pattern element can be ignored for view matching.
    pub fn is_invariant(&self, element: &PatternElement) -> bool {
        match element {
            PatternElement::Bind { target, .. } => self.is_invariant_bind(target),
            PatternElement::Values(values) => self.is_invariant_values(values),
            PatternElement::Triple(_)
            | PatternElement::Filter(_)
            | PatternElement::ContainsWord { .. }
            | PatternElement::ContainsEntity { .. } => false,
        }
    }
}

// ============================================================================
// QueryPatternCache
// ============================================================================

/// Cache for quickly checking whether a query can use a loaded view.
#[derive(Default)]
pub struct QueryPatternCache {
    simple_chain_cache: FxHashMap<ChainedPredicates, Arc<Vec<ChainInfo>>>,
    /// Predicate -> views it appears in; feeds the (deferred) star rewrite.
    predicate_in_view: FxHashMap<String, Vec<Arc<MaterializedView>>>,
}

impl QueryPatternCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Analyze a view's write query and populate the cache. Returns whether
    /// any rewritable shape was recognized.
    pub fn analyze_view(&mut self, view: Arc<MaterializedView>) -> bool {
        for triple in &view.triples {
            if let RawTerm::Iri(p) = &triple.predicate {
                self.predicate_in_view
                    .entry(p.clone())
                    .or_default()
                    .push(Arc::clone(&view));
            }
        }

        let mut recognized = false;
        if view.triples.len() == 2 {
            let (a, b) = (&view.triples[0], &view.triples[1]);
            recognized = self.analyze_simple_chain(&view, a, b)
                || self.analyze_simple_chain(&view, b, a);
        }
        recognized |= self.analyze_star(&view);
        if recognized {
            tracing::debug!(view = %view.name, "materialized view registered for rewriting");
        }
        recognized
    }

    /// Check one direction of `a -> b` for the chain shape.
    fn analyze_simple_chain(
        &mut self,
        view: &Arc<MaterializedView>,
        a: &RawTriple,
        b: &RawTriple,
    ) -> bool {
        let (Some(s), Some(m1), Some(m2), Some(o)) = (
            a.subject.as_var(),
            a.object.as_var(),
            b.subject.as_var(),
            b.object.as_var(),
        ) else {
            return false;
        };
        let (RawTerm::Iri(p1), RawTerm::Iri(p2)) = (&a.predicate, &b.predicate) else {
            return false;
        };
        if m1 != m2 || s == o || s == m1 || o == m2 {
            return false;
        }
        // The view must expose the chain endpoints.
        if view.column_of(s).is_none() || view.column_of(o).is_none() {
            return false;
        }
        let info = ChainInfo {
            subject: s.clone(),
            chain: m1.clone(),
            object: o.clone(),
            view: Arc::clone(view),
        };
        let entry = self
            .simple_chain_cache
            .entry((p1.clone(), p2.clone()))
            .or_insert_with(|| Arc::new(Vec::new()));
        Arc::make_mut(entry).push(info);
        true
    }

    /// Star analysis: record which arms a view covers. The actual rewrite
    /// is deferred, so this only feeds `predicate_in_view`.
    fn analyze_star(&mut self, view: &Arc<MaterializedView>) -> bool {
        let mut subjects: FxHashMap<&Variable, usize> = FxHashMap::default();
        for triple in &view.triples {
            if let (Some(s), RawTerm::Iri(_), RawTerm::Var(_)) =
                (triple.subject.as_var(), &triple.predicate, &triple.object)
            {
                *subjects.entry(s).or_insert(0) += 1;
            }
        }
        subjects.values().any(|&arms| arms >= 2)
    }

    /// Check whether two user triples form a chain answered by a view.
    /// Call with both argument orders; each call checks one direction.
    pub fn check_simple_chain(
        &self,
        left: &RawTriple,
        right: &RawTriple,
    ) -> Option<UserQueryChain> {
        let (RawTerm::Iri(p1), RawTerm::Iri(p2)) = (&left.predicate, &right.predicate) else {
            return None;
        };
        let (Some(lo), Some(rs), Some(ro)) = (
            left.object.as_var(),
            right.subject.as_var(),
            right.object.as_var(),
        ) else {
            return None;
        };
        if lo != rs
            || left.subject.as_var() == Some(ro)
            || left.subject.as_var() == Some(lo)
            || rs == ro
        {
            return None;
        }
        let infos = self.simple_chain_cache.get(&(p1.clone(), p2.clone()))?;
        Some(UserQueryChain {
            subject: left.subject.clone(),
            chain: lo.clone(),
            object: ro.clone(),
            chain_infos: Arc::clone(infos),
        })
    }

    /// Star rewriting is deferred: the analysis side is maintained, but no
    /// star match is reported yet.
    pub fn check_star(&self, _triples: &[RawTriple]) -> Option<UserQueryStar> {
        None
    }

    /// Views known to contain a predicate.
    pub fn views_for_predicate(&self, predicate: &str) -> &[Arc<MaterializedView>] {
        self.predicate_in_view
            .get(predicate)
            .map_or(&[], |v| v.as_slice())
    }
}

// ============================================================================
// MaterializedViewScan
// ============================================================================

/// Scan over the stored rows of a materialized view.
#[derive(Clone)]
pub struct MaterializedViewScan {
    view: Arc<MaterializedView>,
    /// View columns exposed, in output order.
    cols: Vec<usize>,
    /// Output variables (the user query's names).
    variables: Vec<Variable>,
    /// Optional equality filter on a view column.
    filter: Option<(usize, ValueId)>,
}

impl MaterializedViewScan {
    pub fn new(
        view: Arc<MaterializedView>,
        cols: Vec<usize>,
        variables: Vec<Variable>,
        filter: Option<(usize, ValueId)>,
    ) -> Self {
        debug_assert_eq!(cols.len(), variables.len());
        Self {
            view,
            cols,
            variables,
            filter,
        }
    }
}

impl Operator for MaterializedViewScan {
    fn result_width(&self) -> usize {
        self.cols.len()
    }

    fn result_sorted_on(&self) -> Vec<usize> {
        // Stored rows are sorted by the first view column; the order
        // survives when that column is our first output.
        if self.cols.first() == Some(&0) {
            vec![0]
        } else {
            vec![]
        }
    }

    fn variable_columns(&self) -> VariableToColumnMap {
        self.variables
            .iter()
            .enumerate()
            .map(|(col, var)| (var.clone(), ColumnInfo::always_defined(col)))
            .collect()
    }

    fn cache_key(&self) -> String {
        format!(
            "MATERIALIZED VIEW SCAN {} cols {:?} filter {:?}",
            self.view.name, self.cols, self.filter
        )
    }

    fn size_estimate(&self) -> u64 {
        if self.filter.is_some() {
            (self.view.rows.len() as u64 / 10).max(1)
        } else {
            self.view.rows.len() as u64
        }
    }

    fn cost_estimate(&self) -> u64 {
        self.view.rows.len() as u64
    }

    fn known_empty_result(&self) -> bool {
        self.view.rows.is_empty()
    }

    fn children(&self) -> Vec<&Arc<QueryExecutionTree>> {
        vec![]
    }

    fn descriptor(&self) -> String {
        format!("MaterializedViewScan {}", self.view.name)
    }

    fn column_originates_from_graph(&self, variable: &Variable) -> bool {
        self.variables.contains(variable)
    }

    fn compute(&self, ctx: &ExecutionContext) -> Result<TableStream> {
        let mut table = IdTable::new(self.result_width(), ctx.budget.clone());
        let mut out_row = Vec::with_capacity(self.cols.len());
        for row in &self.view.rows {
            if let Some((col, id)) = &self.filter {
                if row[*col] != *id {
                    continue;
                }
            }
            out_row.clear();
            out_row.extend(self.cols.iter().map(|&c| row[c]));
            table.push_row(&out_row)?;
        }
        Ok(single_fragment_stream((table, LocalVocab::new())))
    }
}

// ============================================================================
// Manager
// ============================================================================

/// All loaded views plus the pattern cache.
#[derive(Default)]
pub struct MaterializedViewsManager {
    views: FxHashMap<String, Arc<MaterializedView>>,
    cache: QueryPatternCache,
}

impl MaterializedViewsManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a view and analyze its write query.
    pub fn load_view(&mut self, view: MaterializedView) -> Arc<MaterializedView> {
        let view = Arc::new(view);
        self.cache.analyze_view(Arc::clone(&view));
        self.views.insert(view.name.clone(), Arc::clone(&view));
        view
    }

    pub fn cache(&self) -> &QueryPatternCache {
        &self.cache
    }

    pub fn get(&self, name: &str) -> Option<&Arc<MaterializedView>> {
        self.views.get(name)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::PathModifier;

    fn var(name: &str) -> RawTerm {
        RawTerm::Var(Variable::new(name))
    }

    fn iri(s: &str) -> RawTerm {
        RawTerm::Iri(format!("<{s}>"))
    }

    fn triple(s: RawTerm, p: RawTerm, o: RawTerm) -> RawTriple {
        RawTriple {
            subject: s,
            predicate: p,
            object: o,
            path: PathModifier::None,
        }
    }

    fn chain_view() -> MaterializedView {
        MaterializedView {
            name: "chain".to_owned(),
            variables: vec![Variable::new("s"), Variable::new("o")],
            triples: vec![
                triple(var("s"), iri("p1"), var("m")),
                triple(var("m"), iri("p2"), var("o")),
            ],
            rows: vec![
                vec![ValueId::vocab_index(1), ValueId::vocab_index(2)],
                vec![ValueId::vocab_index(3), ValueId::vocab_index(4)],
            ],
        }
    }

    #[test]
    fn test_chain_detected_and_matched() {
        let mut manager = MaterializedViewsManager::new();
        let loaded = manager.load_view(chain_view());
        assert_eq!(loaded.variables.len(), 2);

        // The same shape in a user query, with different variable names.
        let left = triple(var("a"), iri("p1"), var("mid"));
        let right = triple(var("mid"), iri("p2"), var("b"));
        let matched = manager.cache().check_simple_chain(&left, &right).unwrap();
        assert_eq!(matched.chain, Variable::new("mid"));
        assert_eq!(matched.object, Variable::new("b"));
        assert_eq!(matched.chain_infos.len(), 1);

        // The wrong orientation does not match this direction.
        assert!(manager.cache().check_simple_chain(&right, &left).is_none());
    }

    #[test]
    fn test_chain_rejects_self_joins() {
        let mut manager = MaterializedViewsManager::new();
        manager.load_view(chain_view());

        // Shared variable between subject and object breaks the shape.
        let left = triple(var("a"), iri("p1"), var("m"));
        let right = triple(var("m"), iri("p2"), var("a"));
        assert!(manager.cache().check_simple_chain(&left, &right).is_none());
    }

    #[test]
    fn test_invariance_filter() {
        let triples = vec![triple(var("s"), iri("p"), var("o"))];
        let invariant = BasicGraphPatternsInvariantTo {
            variables: variables_in_triples(&triples),
        };
        assert!(invariant.is_invariant_bind(&Variable::new("unrelated")));
        assert!(!invariant.is_invariant_bind(&Variable::new("s")));

        let values_unrelated = ValuesClause {
            variables: vec![Variable::new("other")],
            rows: vec![],
        };
        assert!(invariant.is_invariant_values(&values_unrelated));
        let values_related = ValuesClause {
            variables: vec![Variable::new("o")],
            rows: vec![],
        };
        assert!(!invariant.is_invariant_values(&values_related));
        assert!(!invariant.is_invariant_optional());
    }

    #[test]
    fn test_star_rewrite_deferred() {
        let mut cache = QueryPatternCache::new();
        let star = MaterializedView {
            name: "star".to_owned(),
            variables: vec![Variable::new("s"), Variable::new("a"), Variable::new("b")],
            triples: vec![
                triple(var("s"), iri("p1"), var("a")),
                triple(var("s"), iri("p2"), var("b")),
            ],
            rows: vec![],
        };
        let star = Arc::new(star);
        cache.analyze_view(Arc::clone(&star));
        // Analysis feeds the predicate index, but no rewrite is offered.
        assert_eq!(cache.views_for_predicate("<p1>").len(), 1);
        assert!(cache.check_star(&star.triples).is_none());
    }
}
