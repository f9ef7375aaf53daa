//! Full pipeline tests: parse, plan, execute, serialise.

mod common;

use common::{build_index, build_index_with_config, ctx};
use stela_core::{EngineConfig, Triple, ValueId};
use stela_index::Index;
use stela_query::parser::{PathModifier, RawTerm, RawTriple};
use stela_query::{
    execute_plan, parse_query, to_csv, to_json, to_tsv, MaterializedView,
    MaterializedViewsManager, Planner, QueryResult, Variable,
};
use std::collections::BTreeSet;
use std::sync::Arc;

fn numbers_kg() -> Vec<(String, String, String)> {
    let mut triples = Vec::new();
    for i in 0..50i64 {
        triples.push((
            format!("<item{i:02}>"),
            "<value>".to_owned(),
            format!("\"{i}\"^^<http://www.w3.org/2001/XMLSchema#integer>"),
        ));
        triples.push((
            format!("<item{i:02}>"),
            "<name>".to_owned(),
            format!("\"thing {i}\""),
        ));
    }
    triples.push(("<m>".into(), "<value>".into(), "\"7\"^^<http://www.w3.org/2001/XMLSchema#integer>".into()));
    triples
}

fn run(
    index: &Arc<Index>,
    views: &Arc<MaterializedViewsManager>,
    query: &str,
) -> QueryResult {
    let planner = Planner::new(Arc::clone(index), Arc::clone(views));
    let plan = planner.plan(&parse_query(query).unwrap()).unwrap();
    execute_plan(&plan, &ctx(index)).unwrap()
}

fn no_views() -> Arc<MaterializedViewsManager> {
    Arc::new(MaterializedViewsManager::new())
}

#[test]
fn filter_with_prefilter_pushdown() {
    let owned = numbers_kg();
    let triples: Vec<(&str, &str, &str)> = owned
        .iter()
        .map(|(s, p, o)| (s.as_str(), p.as_str(), o.as_str()))
        .collect();
    // Small blocks so the prefilter actually prunes.
    let (_dir, index) = build_index_with_config(
        &triples,
        EngineConfig {
            block_size: 8,
            ..Default::default()
        },
    );

    let result = run(
        &index,
        &no_views(),
        "SELECT ?s ?v WHERE { ?s <value> ?v . FILTER(?v <= 5 && ?v != 0) }",
    );
    let values: BTreeSet<i64> = result.table.rows().map(|r| r[1].decode_int()).collect();
    assert_eq!(values, (1..=5).collect());
}

#[test]
fn values_join_and_order_by() {
    let owned = numbers_kg();
    let triples: Vec<(&str, &str, &str)> = owned
        .iter()
        .map(|(s, p, o)| (s.as_str(), p.as_str(), o.as_str()))
        .collect();
    let (_dir, index) = build_index(&triples);

    let result = run(
        &index,
        &no_views(),
        "SELECT ?s ?v WHERE { ?s <value> ?v . VALUES ?s { <item03> <item01> } } ORDER BY ?v",
    );
    let values: Vec<i64> = result.table.rows().map(|r| r[1].decode_int()).collect();
    assert_eq!(values, vec![1, 3]);

    let limited = run(
        &index,
        &no_views(),
        "SELECT ?s ?v WHERE { ?s <value> ?v } ORDER BY ?v LIMIT 3",
    );
    assert_eq!(limited.table.num_rows(), 3);
}

#[test]
fn bind_concat_materialises_into_the_local_vocab() {
    let (_dir, index) = build_index(&[("<a>", "<name>", "\"ada\"")]);

    let result = run(
        &index,
        &no_views(),
        "SELECT ?shout WHERE { ?s <name> ?n . BIND(CONCAT(UCASE(?n), \"!\") AS ?shout) }",
    );
    assert_eq!(result.table.num_rows(), 1);
    let id = result.table.at(0, 0);
    assert_eq!(
        stela_query::surface_form(&index, &result.vocab, id).unwrap(),
        "\"ADA!\""
    );
}

#[test]
fn serialisation_formats() {
    let (_dir, index) = build_index(&[
        ("<a>", "<name>", "\"ada\""),
        ("<b>", "<name>", "\"grace, countess\""),
    ]);

    let result = run(&index, &no_views(), "SELECT ?s ?n WHERE { ?s <name> ?n } ORDER BY ?s");

    let tsv = to_tsv(&index, &result).unwrap();
    let mut lines = tsv.lines();
    assert_eq!(lines.next(), Some("?s\t?n"));
    assert_eq!(lines.next(), Some("a\tada"));

    let csv = to_csv(&index, &result).unwrap();
    // Embedded comma forces quoting.
    assert!(csv.contains("\"grace, countess\""), "{csv}");

    let json = to_json(&index, &result).unwrap();
    assert_eq!(json["head"]["vars"], serde_json::json!(["s", "n"]));
    assert_eq!(json["results"]["bindings"][0]["s"]["type"], "uri");
    assert_eq!(json["results"]["bindings"][0]["n"]["value"], "ada");
}

#[test]
fn construct_renders_ntriples() {
    let (_dir, index) = build_index(&[("<a>", "<p>", "<b>")]);
    let planner = Planner::new(Arc::clone(&index), no_views());
    let parsed = parse_query("CONSTRUCT { ?x <q> ?y } WHERE { ?x <p> ?y }").unwrap();
    let plan = planner.plan(&parsed).unwrap();
    let result = execute_plan(&plan, &ctx(&index)).unwrap();
    let stela_query::QueryForm::Construct { template } = &plan.form else {
        panic!("expected construct")
    };
    let nt = stela_query::construct_ntriples(&index, template, &result).unwrap();
    assert_eq!(nt.trim(), "<a> <q> <b> .");
}

#[test]
fn delta_overlay_is_visible_and_snapshotted() {
    let (_dir, index) = build_index(&[("<a>", "<p>", "<b>")]);
    let views = no_views();

    let before = run(&index, &views, "SELECT ?s ?o WHERE { ?s <p> ?o }");
    assert_eq!(before.table.num_rows(), 1);

    // Insert a triple over existing terms and delete the persistent one.
    let a = index.id_for_term("<a>").unwrap();
    let p = index.id_for_term("<p>").unwrap();
    let b = index.id_for_term("<b>").unwrap();
    index.delta().modify(|d| {
        d.insert(Triple::new(b, p, a));
        d.delete(Triple::new(a, p, b));
    });

    let after = run(&index, &views, "SELECT ?s ?o WHERE { ?s <p> ?o }");
    assert_eq!(after.table.num_rows(), 1);
    assert_eq!(after.table.at(0, 0), b);
    assert_eq!(after.table.at(0, 1), a);

    let count = index.delta().snapshot().count();
    assert_eq!(count.inserted, 1);
    assert_eq!(count.deleted, 1);
    assert_eq!(count.total(), 2);
}

#[test]
fn chain_view_rewrite_is_used() {
    let (_dir, index) = build_index(&[
        ("<s1>", "<p1>", "<m1>"),
        ("<m1>", "<p2>", "<o1>"),
        ("<s2>", "<p1>", "<m2>"),
        ("<m2>", "<p2>", "<o2>"),
    ]);

    // A view answering `?s <p1> ?m . ?m <p2> ?o`, stored as (s, o) rows.
    let mut views = MaterializedViewsManager::new();
    let rows = vec![
        vec![
            index.id_for_term("<s1>").unwrap(),
            index.id_for_term("<o1>").unwrap(),
        ],
        vec![
            index.id_for_term("<s2>").unwrap(),
            index.id_for_term("<o2>").unwrap(),
        ],
    ];
    let raw_triple = |s: &str, p: &str, o: &str| RawTriple {
        subject: RawTerm::Var(Variable::new(s)),
        predicate: RawTerm::Iri(p.to_owned()),
        object: RawTerm::Var(Variable::new(o)),
        path: PathModifier::None,
    };
    views.load_view(MaterializedView {
        name: "chain_p1_p2".to_owned(),
        variables: vec![Variable::new("s"), Variable::new("o")],
        triples: vec![raw_triple("s", "<p1>", "m"), raw_triple("m", "<p2>", "o")],
        rows,
    });
    let views = Arc::new(views);

    let planner = Planner::new(Arc::clone(&index), Arc::clone(&views));
    let plan = planner
        .plan(&parse_query("SELECT ?a ?b WHERE { ?a <p1> ?mid . ?mid <p2> ?b }").unwrap())
        .unwrap();
    assert!(
        plan.tree.cache_key().contains("MATERIALIZED VIEW SCAN"),
        "chain was not rewritten: {}",
        plan.tree.cache_key()
    );

    let result = execute_plan(&plan, &ctx(&index)).unwrap();
    let pairs: BTreeSet<(String, String)> = result
        .table
        .rows()
        .map(|r| {
            (
                index.term_for_id(r[0]).unwrap(),
                index.term_for_id(r[1]).unwrap(),
            )
        })
        .collect();
    let expected: BTreeSet<(String, String)> = [("<s1>", "<o1>"), ("<s2>", "<o2>")]
        .map(|(a, b)| (a.to_string(), b.to_string()))
        .into();
    assert_eq!(pairs, expected);

    // A BIND with an unreferenced target is invariant and does not block
    // the rewrite.
    let unblocked = planner
        .plan(
            &parse_query(
                "SELECT ?a WHERE { ?a <p1> ?mid . ?mid <p2> ?b . BIND(STRLEN(?b) AS ?c) }",
            )
            .unwrap(),
        )
        .unwrap();
    assert!(unblocked.tree.cache_key().contains("MATERIALIZED VIEW SCAN"));

    // A BIND targeting a pattern variable is not invariant; the rewrite
    // must stay off (the plan then fails because the target is re-bound).
    let blocked = planner.plan(
        &parse_query("SELECT ?a WHERE { ?a <p1> ?mid . ?mid <p2> ?b . BIND(1 AS ?mid) }")
            .unwrap(),
    );
    match blocked {
        Err(_) => {}
        Ok(plan) => assert!(
            !plan.tree.cache_key().contains("MATERIALIZED VIEW SCAN"),
            "rewrite must be blocked by the non-invariant BIND"
        ),
    }
}

#[test]
fn cache_keys_are_invariant_under_variable_renames() {
    let owned = numbers_kg();
    let triples: Vec<(&str, &str, &str)> = owned
        .iter()
        .map(|(s, p, o)| (s.as_str(), p.as_str(), o.as_str()))
        .collect();
    let (_dir, index) = build_index(&triples);
    let planner = Planner::new(Arc::clone(&index), no_views());

    let key = |query: &str| {
        planner
            .plan(&parse_query(query).unwrap())
            .unwrap()
            .tree
            .cache_key()
    };

    // Renamed variables, same bindings: same key, same result.
    let k1 = key("SELECT ?s ?v WHERE { ?s <value> ?v . FILTER(?v <= 5) }");
    let k2 = key("SELECT ?a ?b WHERE { ?a <value> ?b . FILTER(?b <= 5) }");
    assert_eq!(k1, k2);

    // A different constant changes the key.
    let k3 = key("SELECT ?s ?v WHERE { ?s <value> ?v . FILTER(?v <= 6) }");
    assert_ne!(k1, k3);

    // Results behind equal keys agree.
    let r1 = run(&index, &no_views(), "SELECT ?s ?v WHERE { ?s <value> ?v . FILTER(?v <= 5) }");
    let r2 = run(&index, &no_views(), "SELECT ?a ?b WHERE { ?a <value> ?b . FILTER(?b <= 5) }");
    let rows = |r: &QueryResult| -> Vec<Vec<ValueId>> {
        r.table.rows().map(|x| x.to_vec()).collect()
    };
    assert_eq!(rows(&r1), rows(&r2));
}

#[test]
fn cancellation_aborts_the_stream() {
    let owned = numbers_kg();
    let triples: Vec<(&str, &str, &str)> = owned
        .iter()
        .map(|(s, p, o)| (s.as_str(), p.as_str(), o.as_str()))
        .collect();
    let (_dir, index) = build_index(&triples);

    let planner = Planner::new(Arc::clone(&index), no_views());
    let plan = planner
        .plan(&parse_query("SELECT ?s ?v WHERE { ?s <value> ?v }").unwrap())
        .unwrap();
    let ctx = ctx(&index);
    ctx.cancellation.cancel();
    let err = execute_plan(&plan, &ctx).unwrap_err();
    assert!(err.is_cancelled(), "expected cancellation, got {err:?}");
}

#[test]
fn memory_budget_aborts_the_query_only() {
    let owned = numbers_kg();
    let triples: Vec<(&str, &str, &str)> = owned
        .iter()
        .map(|(s, p, o)| (s.as_str(), p.as_str(), o.as_str()))
        .collect();
    let (_dir, index) = build_index(&triples);

    let planner = Planner::new(Arc::clone(&index), no_views());
    let plan = planner
        .plan(&parse_query("SELECT ?s ?v WHERE { ?s <value> ?v }").unwrap())
        .unwrap();

    let tight = stela_query::ExecutionContext::new(
        Arc::clone(&index),
        stela_core::MemoryBudget::with_limit(64),
    );
    let err = execute_plan(&plan, &tight).unwrap_err();
    assert!(
        matches!(
            err,
            stela_query::QueryError::Core(stela_core::Error::MemoryBudgetExceeded { .. })
        ),
        "{err:?}"
    );

    // The same index keeps serving queries with a sane budget.
    let ok = execute_plan(&plan, &ctx(&index)).unwrap();
    assert!(ok.table.num_rows() > 0);
}
