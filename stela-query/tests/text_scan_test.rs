//! Text-index scan behaviour over a small knowledge graph whose literals
//! are their own entities.

mod common;

use common::{build_index, ctx, text_kg};
use stela_query::operator::{compute_materialized, Operation, Operator};
use stela_query::{
    surface_form, QueryError, QueryExecutionTree, TextIndexScanForEntity, TextIndexScanForWord,
    UndefStatus, Variable,
};
use std::sync::Arc;

#[test]
fn entity_scan_basic() {
    let (_dir, index) = build_index(&text_kg());
    let ctx = ctx(&index);

    let s1 = TextIndexScanForEntity::new(
        Arc::clone(&index),
        Variable::new("text"),
        Variable::new("entityVar"),
        "test*",
    );
    assert_eq!(s1.result_width(), 3);

    let tree = QueryExecutionTree::new(Operation::TextIndexScanForEntity(s1));
    let (table, vocab) = compute_materialized(&tree, &ctx).unwrap();
    assert_eq!(table.num_cols(), 3);
    assert_eq!(table.num_rows(), 3);

    // The graph attaches each literal to itself, so the entities are the
    // texts, in index order.
    let entities: Vec<String> = table
        .column(1)
        .map(|id| surface_form(&index, &vocab, id).unwrap())
        .collect();
    assert_eq!(
        entities,
        vec![
            "\"he failed the test\"",
            "\"testing can help\"",
            "\"the test on friday was really hard\"",
        ]
    );

    // Variable columns: text, entity, then the derived score variable.
    let s2 = TextIndexScanForEntity::new(
        Arc::clone(&index),
        Variable::new("text2"),
        Variable::new("entityVar2"),
        "test*",
    );
    let columns = s2.variable_columns();
    let expect = [
        ("text2", 0),
        ("entityVar2", 1),
        ("ql_score_text2_var_entityVar2", 2),
    ];
    for (name, col) in expect {
        let info = columns.get(&Variable::new(name)).unwrap_or_else(|| {
            panic!("missing variable {name}; have {:?}", columns.keys().collect::<Vec<_>>())
        });
        assert_eq!(info.column, col, "{name}");
        assert_eq!(info.undef, UndefStatus::AlwaysDefined);
    }
}

#[test]
fn entity_scan_short_prefix() {
    let (_dir, index) = build_index(&text_kg());
    let ctx = ctx(&index);

    let scan = TextIndexScanForEntity::new(
        Arc::clone(&index),
        Variable::new("text"),
        Variable::new("entityVar"),
        "t*",
    );
    let tree = QueryExecutionTree::new(Operation::TextIndexScanForEntity(scan));
    let (table, vocab) = compute_materialized(&tree, &ctx).unwrap();
    assert_eq!(table.num_cols(), 3);
    // "t*" matches the/test/testing records: all but "some other sentence".
    assert_eq!(table.num_rows(), 3);
    let entities: Vec<String> = table
        .column(1)
        .map(|id| surface_form(&index, &vocab, id).unwrap())
        .collect();
    assert_eq!(
        entities,
        vec![
            "\"he failed the test\"",
            "\"testing can help\"",
            "\"the test on friday was really hard\"",
        ]
    );
}

#[test]
fn fixed_entity_scan() {
    let (_dir, index) = build_index(&text_kg());
    let ctx = ctx(&index);

    let fixed = "\"some other sentence\"".to_owned();
    let s3 = TextIndexScanForEntity::with_fixed_entity(
        Arc::clone(&index),
        Variable::new("text3"),
        fixed.clone(),
        "sentence",
    )
    .unwrap();
    assert_eq!(s3.result_width(), 2);

    let columns = s3.variable_columns();
    assert_eq!(columns.get(&Variable::new("text3")).unwrap().column, 0);
    let score_var =
        Variable::new("ql_score_text3_fixedEntity__34_some_32_other_32_sentence_34_");
    assert_eq!(
        columns.get(&score_var).map(|i| i.column),
        Some(1),
        "have {:?}",
        columns.keys().collect::<Vec<_>>()
    );

    let tree = QueryExecutionTree::new(Operation::TextIndexScanForEntity(s3));
    let (table, vocab) = compute_materialized(&tree, &ctx).unwrap();
    assert_eq!(table.num_cols(), 2);
    assert_eq!(table.num_rows(), 1);
    assert_eq!(
        surface_form(&index, &vocab, table.at(0, 0)).unwrap(),
        fixed
    );

    // Another fixed entity with a prefix word.
    let s4 = TextIndexScanForEntity::with_fixed_entity(
        Arc::clone(&index),
        Variable::new("text4"),
        "\"he failed the test\"".to_owned(),
        "test*",
    )
    .unwrap();
    let tree = QueryExecutionTree::new(Operation::TextIndexScanForEntity(s4));
    let (table, vocab) = compute_materialized(&tree, &ctx).unwrap();
    assert_eq!(table.num_rows(), 1);
    assert_eq!(
        surface_form(&index, &vocab, table.at(0, 0)).unwrap(),
        "\"he failed the test\""
    );
}

#[test]
fn unknown_fixed_entity_is_a_construction_error() {
    let (_dir, index) = build_index(&text_kg());

    let err = TextIndexScanForEntity::with_fixed_entity(
        Arc::clone(&index),
        Variable::new("text"),
        "\"non existent entity\"".to_owned(),
        "test*",
    )
    .unwrap_err();
    match err {
        QueryError::UnknownEntity(message) => {
            assert!(message.contains("\"non existent entity\""), "{message}");
            assert!(message.contains("ql:contains-entity"), "{message}");
        }
        other => panic!("expected UnknownEntity, got {other:?}"),
    }
}

#[test]
fn cache_keys_follow_the_key_law() {
    let (_dir, index) = build_index(&text_kg());
    let scan = |text: &str, entity: &str, word: &str| {
        TextIndexScanForEntity::new(
            Arc::clone(&index),
            Variable::new(text),
            Variable::new(entity),
            word,
        )
    };

    // Different text vars, different entity vars, same word: same key.
    let s1 = scan("text", "entityVar", "test*");
    let s2 = scan("text2", "entityVar2", "test*");
    assert_eq!(s1.cache_key(), s2.cache_key());

    // One with, one without the prefix marker: different keys.
    let s3 = scan("text3", "entityVar", "test");
    assert_ne!(s1.cache_key(), s3.cache_key());

    // Different words, both prefixed: different keys.
    let s4 = scan("text4", "entityVar", "sentence*");
    assert_ne!(s1.cache_key(), s4.cache_key());

    // A fixed entity differs from an entity variable.
    let fixed = |text: &str, entity: &str, word: &str| {
        TextIndexScanForEntity::with_fixed_entity(
            Arc::clone(&index),
            Variable::new(text),
            entity.to_owned(),
            word,
        )
        .unwrap()
    };
    let s5 = fixed("text3", "\"some other sentence\"", "sentence");
    assert_ne!(s3.cache_key(), s5.cache_key());

    // Different text vars, same fixed entity and word: same key.
    let s6 = fixed("text6", "\"some other sentence\"", "sentence");
    assert_eq!(s5.cache_key(), s6.cache_key());

    // Different fixed entities: different keys.
    let s7 = fixed("text7", "\"he failed the test\"", "sentence");
    assert_ne!(s5.cache_key(), s7.cache_key());

    // Same fixed entity, different words: different keys.
    let s8 = fixed("text7", "\"he failed the test\"", "sentences");
    assert_ne!(s7.cache_key(), s8.cache_key());
}

#[test]
fn known_empty_results() {
    let (_dir, index) = build_index(&text_kg());

    let s1 = TextIndexScanForEntity::new(
        Arc::clone(&index),
        Variable::new("text"),
        Variable::new("entityVar"),
        "nonExistentWord*",
    );
    assert!(s1.known_empty_result());

    let s2 = TextIndexScanForEntity::new(
        Arc::clone(&index),
        Variable::new("text"),
        Variable::new("entityVar"),
        "test*",
    );
    assert!(!s2.known_empty_result());

    let s3 = TextIndexScanForEntity::new(
        Arc::clone(&index),
        Variable::new("text"),
        Variable::new("entityVar"),
        "test",
    );
    assert!(!s3.known_empty_result());
}

#[test]
fn word_scan_deduplicates_records() {
    let (_dir, index) = build_index(&text_kg());
    let ctx = ctx(&index);

    let scan = TextIndexScanForWord::new(Arc::clone(&index), Variable::new("t"), "test*");
    let tree = QueryExecutionTree::new(Operation::TextIndexScanForWord(scan));
    let (table, _) = compute_materialized(&tree, &ctx).unwrap();
    assert_eq!(table.num_cols(), 2);
    assert_eq!(table.num_rows(), 3);
}
