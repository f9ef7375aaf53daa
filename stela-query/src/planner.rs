//! Cost-based query planning.
//!
//! Turns a [`ParsedQuery`] into a [`QueryExecutionTree`]:
//! - terms are resolved against the index (unknown fixed terms produce
//!   known-empty scans);
//! - a simple-chain materialized view replaces its two matching triples
//!   when every other graph-pattern operation is invariant to the chain's
//!   variables;
//! - prefilters are extracted from FILTER conjunctions and pushed to the
//!   scans whose first variable column they constrain;
//! - join order is greedy by size estimate; transitive paths bind their
//!   sides against already-planned subtrees;
//! - FILTER, BIND, ORDER BY, projection and DISTINCT stack on top.

use crate::bind::Bind;
use crate::context::ExecutionContext;
use crate::distinct::Distinct;
use crate::error::{QueryError, Result};
use crate::expression::Expression;
use crate::filter::Filter;
use crate::join::Join;
use crate::operator::{Operation, Operator, QueryExecutionTree};
use crate::parser::{
    ParsedQuery, PathModifier, PatternElement, QueryForm, RawExpr, RawTerm, RawTriple,
};
use crate::prefilter::{check_properties_for_prefilter_construction, PrefilterExpression};
use crate::project::Project;
use crate::scan::{IndexScan, Term, TriplePattern};
use crate::sort::Sort;
use crate::text_scan::{TextIndexScanForEntity, TextIndexScanForWord};
use crate::transitive::{TransitivePath, TransitivePathSide, UNBOUNDED};
use crate::values::Values;
use crate::variable::Variable;
use crate::views::{BasicGraphPatternsInvariantTo, MaterializedViewsManager};
use stela_core::{CompOp, EngineConfig, ValueId};
use stela_index::{encode_literal, Index};
use std::sync::Arc;

/// A planned query, ready for the executor.
pub struct QueryPlan {
    pub tree: Arc<QueryExecutionTree>,
    pub form: QueryForm,
    pub limit: Option<u64>,
}

pub struct Planner {
    index: Arc<Index>,
    views: Arc<MaterializedViewsManager>,
    config: Arc<EngineConfig>,
}

/// A pattern not yet joined into the tree.
enum PlanNode {
    Tree(Arc<QueryExecutionTree>),
    Path(Box<TransitivePath>),
}

impl PlanNode {
    fn size_estimate(&self) -> u64 {
        match self {
            PlanNode::Tree(t) => t.size_estimate(),
            PlanNode::Path(p) => p.size_estimate(),
        }
    }

    fn into_tree(self) -> Arc<QueryExecutionTree> {
        match self {
            PlanNode::Tree(t) => t,
            PlanNode::Path(p) => QueryExecutionTree::new(Operation::TransitivePath(*p)),
        }
    }

    fn variables(&self) -> Vec<Variable> {
        match self {
            PlanNode::Tree(t) => t.variable_columns().into_keys().collect(),
            PlanNode::Path(p) => p.variable_columns().into_keys().collect(),
        }
    }
}

impl Planner {
    pub fn new(index: Arc<Index>, views: Arc<MaterializedViewsManager>) -> Self {
        let config = Arc::clone(index.config());
        Self {
            index,
            views,
            config,
        }
    }

    /// Build the execution tree for a parsed query.
    pub fn plan(&self, query: &ParsedQuery) -> Result<QueryPlan> {
        let mut triples: Vec<RawTriple> = Vec::new();
        let mut filters: Vec<RawExpr> = Vec::new();
        let mut binds: Vec<(RawExpr, Variable)> = Vec::new();
        let mut values_nodes: Vec<Values> = Vec::new();
        let mut word_scans: Vec<(Variable, String)> = Vec::new();
        let mut entity_scans: Vec<(Variable, RawTerm)> = Vec::new();

        for element in &query.elements {
            match element {
                PatternElement::Triple(t) => triples.push(t.clone()),
                PatternElement::Filter(f) => filters.push(f.clone()),
                PatternElement::Bind { expr, target } => binds.push((expr.clone(), target.clone())),
                PatternElement::Values(v) => {
                    let rows = v
                        .rows
                        .iter()
                        .map(|row| {
                            row.iter()
                                .map(|entry| match entry {
                                    None => ValueId::UNDEFINED,
                                    Some(term) => {
                                        self.resolve(term).unwrap_or(ValueId::UNDEFINED)
                                    }
                                })
                                .collect()
                        })
                        .collect();
                    values_nodes.push(Values::new(v.variables.clone(), rows));
                }
                PatternElement::ContainsWord { text, word } => {
                    word_scans.push((text.clone(), word.clone()));
                }
                PatternElement::ContainsEntity { text, entity } => {
                    entity_scans.push((text.clone(), entity.clone()));
                }
            }
        }

        let mut nodes: Vec<PlanNode> = Vec::new();

        // ---- Materialized-view chain rewriting. ------------------------
        self.rewrite_chains(query, &mut triples, &mut nodes);

        // ---- Prefilters from the filter conjunctions. ------------------
        let prefilters = self.build_prefilters(&filters)?;

        // ---- Scans and transitive paths. -------------------------------
        for triple in &triples {
            match triple.path {
                PathModifier::None => {
                    let mut scan = self.make_scan(triple);
                    self.attach_prefilter(&mut scan, &prefilters);
                    nodes.push(PlanNode::Tree(QueryExecutionTree::new(Operation::IndexScan(
                        scan,
                    ))));
                }
                PathModifier::OneOrMore | PathModifier::ZeroOrMore => {
                    let min_dist = if triple.path == PathModifier::OneOrMore {
                        1
                    } else {
                        0
                    };
                    nodes.push(self.make_transitive_path(triple, min_dist)?);
                }
            }
        }

        // ---- Text scans. -----------------------------------------------
        for (text, entity) in &entity_scans {
            let word = word_scans
                .iter()
                .find(|(t, _)| t == text)
                .map(|(_, w)| w.clone())
                .ok_or_else(|| {
                    QueryError::other(format!(
                        "ql:contains-entity on {text} requires a ql:contains-word pattern \
                         on the same text variable"
                    ))
                })?;
            let scan = match entity {
                RawTerm::Var(v) => TextIndexScanForEntity::new(
                    Arc::clone(&self.index),
                    text.clone(),
                    v.clone(),
                    word,
                ),
                RawTerm::Iri(s) | RawTerm::Literal(s) => TextIndexScanForEntity::with_fixed_entity(
                    Arc::clone(&self.index),
                    text.clone(),
                    s.clone(),
                    word,
                )?,
            };
            nodes.push(PlanNode::Tree(QueryExecutionTree::new(
                Operation::TextIndexScanForEntity(scan),
            )));
        }
        for (text, word) in &word_scans {
            if entity_scans.iter().any(|(t, _)| t == text) {
                // Covered by the entity scan above.
                continue;
            }
            let scan =
                TextIndexScanForWord::new(Arc::clone(&self.index), text.clone(), word.clone());
            nodes.push(PlanNode::Tree(QueryExecutionTree::new(
                Operation::TextIndexScanForWord(scan),
            )));
        }

        for values in values_nodes {
            nodes.push(PlanNode::Tree(QueryExecutionTree::new(Operation::Values(
                values,
            ))));
        }

        if nodes.is_empty() {
            return Err(QueryError::other("query has an empty graph pattern"));
        }

        // ---- Greedy join order. ----------------------------------------
        let mut tree = self.join_greedily(nodes)?;

        // ---- Filters, binds. -------------------------------------------
        for raw in &filters {
            let columns = tree.variable_columns();
            let expression = self.to_expression(raw, &columns)?;
            expression.validate()?;
            let label = format!("{raw:?}");
            tree = QueryExecutionTree::new(Operation::Filter(Filter::new(
                tree, expression, label,
            )));
        }
        for (raw, target) in &binds {
            let columns = tree.variable_columns();
            if columns.contains_key(target) {
                return Err(QueryError::other(format!(
                    "BIND target {target} is already bound"
                )));
            }
            let expression = self.to_expression(raw, &columns)?;
            expression.validate()?;
            tree = QueryExecutionTree::new(Operation::Bind(Bind::new(
                tree,
                expression,
                target.clone(),
            )));
        }

        // ---- ORDER BY, projection, DISTINCT. ---------------------------
        if !query.order_by.is_empty() {
            let columns = tree.variable_columns();
            let cols: Vec<usize> = query
                .order_by
                .iter()
                .map(|v| {
                    columns
                        .get(v)
                        .map(|i| i.column)
                        .ok_or_else(|| QueryError::other(format!("ORDER BY unknown {v}")))
                })
                .collect::<Result<_>>()?;
            tree = QueryExecutionTree::new(Operation::Sort(Sort::new(tree, cols)));
        }

        if let QueryForm::Select {
            variables,
            select_all,
            distinct,
        } = &query.form
        {
            let selected: Vec<Variable> = if *select_all {
                let map = tree.variable_columns();
                let mut vars: Vec<(usize, Variable)> = map
                    .into_iter()
                    .filter(|(v, _)| !v.name().starts_with("internal_"))
                    .map(|(v, i)| (i.column, v))
                    .collect();
                vars.sort();
                vars.into_iter().map(|(_, v)| v).collect()
            } else {
                let map = tree.variable_columns();
                for v in variables {
                    if !map.contains_key(v) {
                        return Err(QueryError::other(format!("selected variable {v} is unbound")));
                    }
                }
                variables.clone()
            };
            tree = QueryExecutionTree::new(Operation::Project(Project::on_variables(
                tree, &selected,
            )));
            if *distinct {
                let cols: Vec<usize> = (0..tree.result_width()).collect();
                tree = QueryExecutionTree::new(Operation::Distinct(Distinct::new(tree, cols)));
            }
        }

        Ok(QueryPlan {
            tree,
            form: query.form.clone(),
            limit: query.limit,
        })
    }

    /// Execution context factory for this planner's index.
    pub fn make_context(&self, budget: stela_core::MemoryBudget) -> ExecutionContext {
        ExecutionContext::new(Arc::clone(&self.index), budget)
    }

    // ------------------------------------------------------------------
    // Term resolution
    // ------------------------------------------------------------------

    fn resolve(&self, term: &RawTerm) -> Option<ValueId> {
        let surface = term.surface()?;
        if let Some(direct) = encode_literal(surface) {
            return Some(direct);
        }
        self.index.id_for_term(surface)
    }

    fn to_term(&self, raw: &RawTerm) -> std::result::Result<Term, ()> {
        match raw {
            RawTerm::Var(v) => Ok(Term::Variable(v.clone())),
            _ => self.resolve(raw).map(Term::Fixed).ok_or(()),
        }
    }

    fn make_scan(&self, triple: &RawTriple) -> IndexScan {
        let resolved = (
            self.to_term(&triple.subject),
            self.to_term(&triple.predicate),
            self.to_term(&triple.object),
        );
        match resolved {
            (Ok(s), Ok(p), Ok(o)) => {
                IndexScan::new(Arc::clone(&self.index), TriplePattern::new(s, p, o))
            }
            _ => {
                // A fixed term missing from the vocabulary: scan a pattern
                // of fresh variables but mark it empty.
                let placeholder = |raw: &RawTerm, name: &str| match raw {
                    RawTerm::Var(v) => Term::Variable(v.clone()),
                    _ => Term::Variable(Variable::new(format!("internal_unknown_{name}"))),
                };
                IndexScan::new_known_empty(
                    Arc::clone(&self.index),
                    TriplePattern::new(
                        placeholder(&triple.subject, "s"),
                        placeholder(&triple.predicate, "p"),
                        placeholder(&triple.object, "o"),
                    ),
                )
            }
        }
    }

    fn make_transitive_path(&self, triple: &RawTriple, min_dist: u64) -> Result<PlanNode> {
        let Ok(predicate) = self.to_term(&triple.predicate) else {
            // Unknown predicate: no edges, the path is empty (even at
            // length zero, which requires the side to exist in the graph).
            return Ok(PlanNode::Tree(QueryExecutionTree::new(Operation::Values(
                Values::new(
                    [&triple.subject, &triple.object]
                        .iter()
                        .filter_map(|t| t.as_var().cloned())
                        .collect(),
                    vec![],
                ),
            ))));
        };

        let left = Variable::new("internal_transitive_left");
        let right = Variable::new("internal_transitive_right");
        let subtree = QueryExecutionTree::new(Operation::IndexScan(IndexScan::new(
            Arc::clone(&self.index),
            TriplePattern::new(
                Term::Variable(left),
                predicate,
                Term::Variable(right),
            ),
        )));

        let side = |raw: &RawTerm| -> std::result::Result<TransitivePathSide, ()> {
            match raw {
                RawTerm::Var(v) => Ok(TransitivePathSide::variable(v.clone())),
                _ => self.resolve(raw).map(TransitivePathSide::fixed).ok_or(()),
            }
        };
        let (Ok(lhs), Ok(rhs)) = (side(&triple.subject), side(&triple.object)) else {
            return Ok(PlanNode::Tree(QueryExecutionTree::new(Operation::Values(
                Values::new(
                    [&triple.subject, &triple.object]
                        .iter()
                        .filter_map(|t| t.as_var().cloned())
                        .collect(),
                    vec![],
                ),
            ))));
        };

        let path = TransitivePath::new(
            Arc::clone(&self.index),
            subtree,
            lhs,
            rhs,
            min_dist,
            UNBOUNDED,
            Arc::clone(&self.config),
        );
        Ok(PlanNode::Path(Box::new(path)))
    }

    // ------------------------------------------------------------------
    // Materialized views
    // ------------------------------------------------------------------

    fn rewrite_chains(
        &self,
        query: &ParsedQuery,
        triples: &mut Vec<RawTriple>,
        nodes: &mut Vec<PlanNode>,
    ) {
        let cache = self.views.cache();
        let mut i = 0;
        'outer: while i < triples.len() {
            let mut j = i + 1;
            while j < triples.len() {
                if triples[i].path != PathModifier::None || triples[j].path != PathModifier::None {
                    j += 1;
                    continue;
                }
                let matched = cache
                    .check_simple_chain(&triples[i], &triples[j])
                    .or_else(|| cache.check_simple_chain(&triples[j], &triples[i]));
                if let Some(chain) = matched {
                    // The rewrite is only valid when no other operation can
                    // change the bindings of the pattern's variables.
                    let invariant = BasicGraphPatternsInvariantTo {
                        variables: crate::views::variables_in_triples(triples),
                    };
                    let blocked = query.elements.iter().any(|e| {
                        matches!(
                            e,
                            PatternElement::Bind { .. } | PatternElement::Values(_)
                        ) && !invariant.is_invariant(e)
                    });
                    if blocked {
                        j += 1;
                        continue;
                    }

                    let info = &chain.chain_infos[0];
                    let view = &info.view;
                    let s_col = view.column_of(&info.subject).expect("checked at analysis");
                    let o_col = view.column_of(&info.object).expect("checked at analysis");
                    let scan = match &chain.subject {
                        RawTerm::Var(user_s) => crate::views::MaterializedViewScan::new(
                            Arc::clone(view),
                            vec![s_col, o_col],
                            vec![user_s.clone(), chain.object.clone()],
                            None,
                        ),
                        fixed => {
                            let Some(id) = self.resolve(fixed) else {
                                j += 1;
                                continue;
                            };
                            crate::views::MaterializedViewScan::new(
                                Arc::clone(view),
                                vec![o_col],
                                vec![chain.object.clone()],
                                Some((s_col, id)),
                            )
                        }
                    };
                    tracing::debug!(view = %view.name, "rewrote simple chain to view scan");
                    nodes.push(PlanNode::Tree(QueryExecutionTree::new(
                        Operation::MaterializedViewScan(scan),
                    )));
                    // Remove j first: it is the larger index.
                    triples.remove(j);
                    triples.remove(i);
                    continue 'outer;
                }
                j += 1;
            }
            i += 1;
        }
    }

    // ------------------------------------------------------------------
    // Prefilters
    // ------------------------------------------------------------------

    /// Extract `(prefilter, variable)` pairs from the conjunctive parts of
    /// the filters.
    fn build_prefilters(
        &self,
        filters: &[RawExpr],
    ) -> Result<Vec<(PrefilterExpression, Variable)>> {
        let mut per_var: std::collections::BTreeMap<Variable, PrefilterExpression> =
            std::collections::BTreeMap::new();
        let mut add = |var: Variable, expr: PrefilterExpression| {
            per_var
                .entry(var)
                .and_modify(|existing| {
                    *existing = PrefilterExpression::and(existing.clone(), expr.clone())
                })
                .or_insert(expr);
        };

        for filter in filters {
            let conjuncts: Vec<&RawExpr> = match filter {
                RawExpr::And(parts) => parts.iter().collect(),
                other => vec![other],
            };
            for conjunct in conjuncts {
                if let RawExpr::Compare(op, left, right) = conjunct {
                    match (left.as_ref(), right.as_ref()) {
                        (RawExpr::Term(RawTerm::Var(v)), RawExpr::Term(t)) => {
                            if let Some(id) = self.resolve(t) {
                                add(v.clone(), PrefilterExpression::relational(*op, id));
                            }
                        }
                        (RawExpr::Term(t), RawExpr::Term(RawTerm::Var(v))) => {
                            if let Some(id) = self.resolve(t) {
                                // `5 < ?x` is `?x > 5`.
                                let flipped = match op {
                                    CompOp::Lt => CompOp::Gt,
                                    CompOp::Le => CompOp::Ge,
                                    CompOp::Gt => CompOp::Lt,
                                    CompOp::Ge => CompOp::Le,
                                    CompOp::Eq | CompOp::Ne => *op,
                                };
                                add(v.clone(), PrefilterExpression::relational(flipped, id));
                            }
                        }
                        _ => {}
                    }
                }
            }
        }
        let pairs: Vec<(PrefilterExpression, Variable)> = per_var
            .into_iter()
            .map(|(var, expr)| (expr, var))
            .collect();
        check_properties_for_prefilter_construction(&pairs)?;
        Ok(pairs)
    }

    /// Push a matching prefilter down to a scan whose first variable column
    /// carries the filtered variable.
    fn attach_prefilter(&self, scan: &mut IndexScan, pairs: &[(PrefilterExpression, Variable)]) {
        let columns = scan.variable_columns();
        for (expr, var) in pairs {
            if columns.get(var).map(|i| i.column) == Some(0) {
                scan.set_prefilter(expr.clone());
                return;
            }
        }
    }

    // ------------------------------------------------------------------
    // Joining
    // ------------------------------------------------------------------

    fn join_greedily(&self, mut nodes: Vec<PlanNode>) -> Result<Arc<QueryExecutionTree>> {
        // Start from the smallest estimated node.
        let start = nodes
            .iter()
            .enumerate()
            .min_by_key(|(_, n)| n.size_estimate())
            .map(|(i, _)| i)
            .expect("non-empty");
        let mut acc = nodes.remove(start).into_tree();

        while !nodes.is_empty() {
            let acc_columns = acc.variable_columns();
            let shared = nodes.iter().position(|n| {
                n.variables()
                    .iter()
                    .any(|v| acc_columns.contains_key(v))
            });
            let Some(pos) = shared else {
                return Err(QueryError::other(
                    "disconnected graph pattern (cartesian products are not supported)",
                ));
            };
            match nodes.remove(pos) {
                PlanNode::Path(path) => {
                    // Bind the side whose variable the accumulated tree
                    // produces.
                    let path_columns = path.variable_columns();
                    let left_var = path_columns
                        .iter()
                        .find(|(_, i)| i.column == 0)
                        .map(|(v, _)| v.clone());
                    let right_var = path_columns
                        .iter()
                        .find(|(_, i)| i.column == 1)
                        .map(|(v, _)| v.clone());
                    let bound = if let Some(info) =
                        left_var.as_ref().and_then(|v| acc_columns.get(v))
                    {
                        path.bind_left_side(acc, info.column)?
                    } else if let Some(info) =
                        right_var.as_ref().and_then(|v| acc_columns.get(v))
                    {
                        path.bind_right_side(acc, info.column)?
                    } else {
                        unreachable!("position() guaranteed a shared variable");
                    };
                    acc = QueryExecutionTree::new(Operation::TransitivePath(bound));
                }
                PlanNode::Tree(tree) => {
                    let tree_columns = tree.variable_columns();
                    let (var, _) = tree_columns
                        .iter()
                        .find(|(v, _)| acc_columns.contains_key(v))
                        .expect("position() guaranteed a shared variable");
                    let left_col = acc_columns[var].column;
                    let right_col = tree_columns[var].column;
                    acc = QueryExecutionTree::new(Operation::Join(Join::new(
                        acc, tree, left_col, right_col,
                    )));
                }
            }
        }
        Ok(acc)
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    fn to_expression(
        &self,
        raw: &RawExpr,
        columns: &crate::variable::VariableToColumnMap,
    ) -> Result<Expression> {
        let recurse = |e: &RawExpr| self.to_expression(e, columns);
        Ok(match raw {
            RawExpr::Term(RawTerm::Var(v)) => {
                let info = columns
                    .get(v)
                    .ok_or_else(|| QueryError::other(format!("unbound variable {v} in expression")))?;
                Expression::Column(info.column)
            }
            RawExpr::Term(term) => match self.resolve(term) {
                Some(id) => Expression::Literal(id),
                // A string constant outside the global vocabulary still has
                // a value; it lives in the local vocab at evaluation time.
                None => match term {
                    RawTerm::Literal(s) => Expression::TextLiteral(s.clone()),
                    _ => Expression::Literal(ValueId::UNDEFINED),
                },
            },
            RawExpr::And(parts) => {
                Expression::And(parts.iter().map(recurse).collect::<Result<_>>()?)
            }
            RawExpr::Or(parts) => {
                Expression::Or(parts.iter().map(recurse).collect::<Result<_>>()?)
            }
            RawExpr::Not(inner) => Expression::Not(Box::new(recurse(inner)?)),
            RawExpr::Compare(op, l, r) => Expression::Compare {
                op: *op,
                left: Box::new(recurse(l)?),
                right: Box::new(recurse(r)?),
            },
            RawExpr::Arith(op, l, r) => Expression::Arithmetic {
                op: *op,
                left: Box::new(recurse(l)?),
                right: Box::new(recurse(r)?),
            },
            RawExpr::Neg(inner) => Expression::UnaryMinus(Box::new(recurse(inner)?)),
            RawExpr::Call(name, args) => self.call_to_expression(name, args, columns)?,
        })
    }

    fn call_to_expression(
        &self,
        name: &str,
        args: &[RawExpr],
        columns: &crate::variable::VariableToColumnMap,
    ) -> Result<Expression> {
        let arity = |expected: usize| -> Result<()> {
            if args.len() != expected {
                return Err(QueryError::other(format!(
                    "{name} expects {expected} argument(s), got {}",
                    args.len()
                )));
            }
            Ok(())
        };
        let one = |planner: &Self| -> Result<Box<Expression>> {
            Ok(Box::new(planner.to_expression(&args[0], columns)?))
        };
        Ok(match name {
            "BOUND" => {
                arity(1)?;
                Expression::Bound(one(self)?)
            }
            "COALESCE" => Expression::Coalesce(
                args.iter()
                    .map(|a| self.to_expression(a, columns))
                    .collect::<Result<_>>()?,
            ),
            "CONCAT" => Expression::Concat(
                args.iter()
                    .map(|a| self.to_expression(a, columns))
                    .collect::<Result<_>>()?,
            ),
            "STR" => {
                arity(1)?;
                Expression::Str(one(self)?)
            }
            "STRLEN" => {
                arity(1)?;
                Expression::StrLen(one(self)?)
            }
            "UCASE" => {
                arity(1)?;
                Expression::UCase(one(self)?)
            }
            "LCASE" => {
                arity(1)?;
                Expression::LCase(one(self)?)
            }
            "YEAR" => {
                arity(1)?;
                Expression::Year(one(self)?)
            }
            "MONTH" => {
                arity(1)?;
                Expression::Month(one(self)?)
            }
            "DAY" => {
                arity(1)?;
                Expression::Day(one(self)?)
            }
            "REGEX" => {
                arity(2)?;
                let RawExpr::Term(RawTerm::Literal(pattern)) = &args[1] else {
                    return Err(QueryError::other("REGEX pattern must be a literal"));
                };
                Expression::Regex {
                    target: one(self)?,
                    pattern: stela_index::literal_body(pattern).to_owned(),
                }
            }
            "GEOF:DISTANCE" => {
                arity(2)?;
                Expression::GeoDistance {
                    left: Box::new(self.to_expression(&args[0], columns)?),
                    right: Box::new(self.to_expression(&args[1], columns)?),
                }
            }
            other => {
                return Err(QueryError::other(format!("unsupported function {other}")));
            }
        })
    }
}
