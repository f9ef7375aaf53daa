//! Transitive-path semantics: closure properties, zero-length handling and
//! the equivalence of the two hull implementations.

mod common;

use common::{build_index_with_config, ctx, rows_of};
use stela_core::{EngineConfig, ValueId};
use stela_index::Index;
use stela_query::operator::{Operation, Operator, QueryExecutionTree};
use stela_query::{
    parse_query, IndexScan, Planner, Term, TransitivePath, TransitivePathSide, TriplePattern,
    MaterializedViewsManager, Variable, UNBOUNDED,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use tempfile::TempDir;

/// `a -> b -> c -> d`, plus `e -> a` and a cycle edge `d -> b`.
fn path_graph() -> Vec<(&'static str, &'static str, &'static str)> {
    vec![
        ("<a>", "<p>", "<b>"),
        ("<b>", "<p>", "<c>"),
        ("<c>", "<p>", "<d>"),
        ("<e>", "<p>", "<a>"),
        ("<d>", "<p>", "<b>"),
    ]
}

fn graph_index(use_bin_search: bool) -> (TempDir, Arc<Index>) {
    build_index_with_config(
        &path_graph(),
        EngineConfig {
            use_bin_search_transitive_path: use_bin_search,
            ..Default::default()
        },
    )
}

/// Reference transitive closure of the edge list.
fn reference_closure(edges: &[(&str, &str)], reflexive_universe: Option<&[&str]>) -> BTreeSet<(String, String)> {
    let mut closure: BTreeSet<(String, String)> = edges
        .iter()
        .map(|(a, b)| (a.to_string(), b.to_string()))
        .collect();
    loop {
        let mut added = false;
        let snapshot: Vec<_> = closure.iter().cloned().collect();
        for (a, b) in &snapshot {
            for (c, d) in &snapshot {
                if b == c && closure.insert((a.clone(), d.clone())) {
                    added = true;
                }
            }
        }
        if !added {
            break;
        }
    }
    if let Some(universe) = reflexive_universe {
        for node in universe {
            closure.insert((node.to_string(), node.to_string()));
        }
    }
    closure
}

fn run_path_query(index: &Arc<Index>, query: &str) -> BTreeSet<(String, String)> {
    let planner = Planner::new(Arc::clone(index), Arc::new(MaterializedViewsManager::new()));
    let plan = planner.plan(&parse_query(query).unwrap()).unwrap();
    let ctx = ctx(index);
    let result = stela_query::execute_plan(&plan, &ctx).unwrap();
    result
        .table
        .rows()
        .map(|row| {
            (
                index.term_for_id(row[0]).unwrap(),
                index.term_for_id(row[1]).unwrap(),
            )
        })
        .collect()
}

#[test]
fn one_or_more_equals_transitive_closure() {
    let edges = [("<a>", "<b>"), ("<b>", "<c>"), ("<c>", "<d>"), ("<e>", "<a>"), ("<d>", "<b>")];
    let expected = reference_closure(&edges, None);
    for bin_search in [false, true] {
        let (_dir, index) = graph_index(bin_search);
        let actual = run_path_query(&index, "SELECT ?x ?y WHERE { ?x <p>+ ?y }");
        assert_eq!(actual, expected, "bin_search={bin_search}");
    }
}

#[test]
fn zero_or_more_adds_the_identity_on_the_universe() {
    let edges = [("<a>", "<b>"), ("<b>", "<c>"), ("<c>", "<d>"), ("<e>", "<a>"), ("<d>", "<b>")];
    // The universe is every subject and object of the active graph.
    let universe = ["<a>", "<b>", "<c>", "<d>", "<e>"];
    let expected = reference_closure(&edges, Some(&universe));
    for bin_search in [false, true] {
        let (_dir, index) = graph_index(bin_search);
        let actual = run_path_query(&index, "SELECT ?x ?y WHERE { ?x <p>* ?y }");
        assert_eq!(actual, expected, "bin_search={bin_search}");
    }
}

fn make_fixed_path(
    index: &Arc<Index>,
    from: &str,
    to: &str,
    min_dist: u64,
) -> TransitivePath {
    let subtree = QueryExecutionTree::new(Operation::IndexScan(IndexScan::new(
        Arc::clone(index),
        TriplePattern::new(
            Term::Variable(Variable::new("l")),
            Term::Fixed(index.id_for_term("<p>").unwrap()),
            Term::Variable(Variable::new("r")),
        ),
    )));
    TransitivePath::new(
        Arc::clone(index),
        subtree,
        TransitivePathSide::fixed(index.id_for_term(from).unwrap()),
        TransitivePathSide::fixed(index.id_for_term(to).unwrap()),
        min_dist,
        UNBOUNDED,
        Arc::new(EngineConfig::default()),
    )
}

#[test]
fn zero_length_on_distinct_constants_lifts_min_dist() {
    let (_dir, index) = graph_index(true);
    // `<a> <p>* <d>` cannot match with length zero because <a> != <d>;
    // internally this becomes `<a> <p>+ <d>`.
    let star = make_fixed_path(&index, "<a>", "<d>", 0);
    assert_eq!(star.min_dist(), 1);

    let plus = make_fixed_path(&index, "<a>", "<d>", 1);
    let ctx = ctx(&index);
    let star_tree = QueryExecutionTree::new(Operation::TransitivePath(star));
    let plus_tree = QueryExecutionTree::new(Operation::TransitivePath(plus));
    assert_eq!(rows_of(&star_tree, &ctx), rows_of(&plus_tree, &ctx));
}

#[test]
fn zero_length_on_equal_constants_is_kept() {
    let (_dir, index) = graph_index(true);
    let path = make_fixed_path(&index, "<a>", "<a>", 0);
    // Identity stays possible, so the distance is not lifted.
    assert_eq!(path.min_dist(), 0);
    let tree = QueryExecutionTree::new(Operation::TransitivePath(path));
    let ctx = ctx(&index);
    let a = index.id_for_term("<a>").unwrap();
    let rows = rows_of(&tree, &ctx);
    assert!(rows.contains(&vec![a, a]), "identity row missing: {rows:?}");
}

#[test]
fn fixed_start_zero_or_more_includes_the_start() {
    let (_dir, index) = graph_index(true);
    let planner = Planner::new(Arc::clone(&index), Arc::new(MaterializedViewsManager::new()));
    let plan = planner
        .plan(&parse_query("SELECT ?y WHERE { <a> <p>* ?y }").unwrap())
        .unwrap();
    let ctx = ctx(&index);
    let result = stela_query::execute_plan(&plan, &ctx).unwrap();
    let actual: BTreeSet<String> = result
        .table
        .rows()
        .map(|row| index.term_for_id(row[0]).unwrap())
        .collect();
    let expected: BTreeSet<String> =
        ["<a>", "<b>", "<c>", "<d>"].iter().map(|s| s.to_string()).collect();
    assert_eq!(actual, expected);
}

#[test]
fn bound_side_propagates_extra_columns() {
    // `?s <q> ?x . ?x <p>+ ?y` binds the path's left side to the <q> scan.
    let mut triples = path_graph();
    triples.push(("<s1>", "<q>", "<a>"));
    triples.push(("<s2>", "<q>", "<e>"));
    let (_dir, index) = build_index_with_config(&triples, EngineConfig::default());

    let planner = Planner::new(Arc::clone(&index), Arc::new(MaterializedViewsManager::new()));
    let plan = planner
        .plan(&parse_query("SELECT ?s ?x ?y WHERE { ?s <q> ?x . ?x <p>+ ?y }").unwrap())
        .unwrap();
    let ctx = ctx(&index);
    let result = stela_query::execute_plan(&plan, &ctx).unwrap();

    let to_terms = |row: &[ValueId]| -> Vec<String> {
        row.iter().map(|&id| index.term_for_id(id).unwrap()).collect()
    };
    let rows: BTreeSet<Vec<String>> = result.table.rows().map(to_terms).collect();
    // From <a>: b, c, d (and the cycle keeps them finite).
    assert!(rows.contains(&vec!["<s1>".into(), "<a>".into(), "<d>".into()]));
    // From <e>: everything reachable from a, including a itself at depth 1.
    assert!(rows.contains(&vec!["<s2>".into(), "<e>".into(), "<a>".into()]));
    assert!(rows.contains(&vec!["<s2>".into(), "<e>".into(), "<d>".into()]));
    // Nothing starts from unrelated nodes.
    assert!(rows.iter().all(|r| r[0] == "<s1>" || r[0] == "<s2>"));
}

#[test]
fn size_estimates_use_the_configured_constants() {
    let (_dir, index) = graph_index(true);
    let config = EngineConfig::default();

    // Fixed side: the fixed-side estimate.
    let fixed = make_fixed_path(&index, "<a>", "<d>", 1);
    assert_eq!(fixed.size_estimate(), config.transitive_fixed_side_estimate);

    // Both sides free: subtree estimate times the blow-up factor.
    let subtree = QueryExecutionTree::new(Operation::IndexScan(IndexScan::new(
        Arc::clone(&index),
        TriplePattern::new(
            Term::Variable(Variable::new("l")),
            Term::Fixed(index.id_for_term("<p>").unwrap()),
            Term::Variable(Variable::new("r")),
        ),
    )));
    let free = TransitivePath::new(
        Arc::clone(&index),
        Arc::clone(&subtree),
        TransitivePathSide::variable(Variable::new("x")),
        TransitivePathSide::variable(Variable::new("y")),
        1,
        UNBOUNDED,
        Arc::new(config.clone()),
    );
    assert_eq!(
        free.size_estimate(),
        subtree.size_estimate() * config.transitive_var_blowup_factor
    );
}
