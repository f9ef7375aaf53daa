//! Shared test support: build a small index in a temp directory and open
//! it.
#![allow(dead_code)]

use stela_core::{EngineConfig, MemoryBudget, ValueId};
use stela_index::{Index, IndexBuilder};
use stela_query::operator::compute_materialized;
use stela_query::{ExecutionContext, QueryExecutionTree};
use std::sync::Arc;
use tempfile::TempDir;

pub fn build_index(triples: &[(&str, &str, &str)]) -> (TempDir, Arc<Index>) {
    build_index_with_config(triples, EngineConfig::default())
}

pub fn build_index_with_config(
    triples: &[(&str, &str, &str)],
    config: EngineConfig,
) -> (TempDir, Arc<Index>) {
    let dir = TempDir::new().unwrap();
    let config = Arc::new(config);
    IndexBuilder::new(Arc::clone(&config))
        .build(
            dir.path(),
            triples
                .iter()
                .map(|(s, p, o)| (s.to_string(), p.to_string(), o.to_string())),
        )
        .unwrap();
    let index = Arc::new(Index::open(dir.path(), config).unwrap());
    (dir, index)
}

pub fn ctx(index: &Arc<Index>) -> ExecutionContext {
    ExecutionContext::new(Arc::clone(index), MemoryBudget::unlimited())
}

/// Materialise a tree into plain row vectors.
pub fn rows_of(tree: &Arc<QueryExecutionTree>, ctx: &ExecutionContext) -> Vec<Vec<ValueId>> {
    let (table, _vocab) = compute_materialized(tree, ctx).unwrap();
    table.rows().map(|r| r.to_vec()).collect()
}

/// The knowledge graph used by the text-scan scenarios.
pub fn text_kg() -> Vec<(&'static str, &'static str, &'static str)> {
    vec![
        ("<a>", "<p>", "\"he failed the test\""),
        ("<a>", "<p>", "\"testing can help\""),
        ("<a>", "<p>", "\"some other sentence\""),
        ("<b>", "<p>", "\"the test on friday was really hard\""),
        ("<b>", "<x2>", "<x>"),
        ("<b>", "<x2>", "<xb2>"),
    ]
}
