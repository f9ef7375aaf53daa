//! The result pump: drives the root operator stream, merges local
//! vocabularies, applies LIMIT, and serialises bindings.
//!
//! Serialisation formats: TSV, CSV and the SPARQL results JSON format.
//! CONSTRUCT templates are instantiated per result row into N-Triples.

use crate::context::ExecutionContext;
use crate::error::{QueryError, Result};
use crate::operator::materialize;
use crate::parser::{QueryForm, RawTerm, RawTriple};
use crate::planner::QueryPlan;
use crate::variable::Variable;
use stela_core::{Datatype, IdTable, LocalVocab, ValueId};
use stela_index::Index;

/// A fully materialised query result.
pub struct QueryResult {
    pub variables: Vec<Variable>,
    pub table: IdTable,
    pub vocab: LocalVocab,
}

impl std::fmt::Debug for QueryResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryResult")
            .field("variables", &self.variables)
            .field("num_rows", &self.table.num_rows())
            .field("num_cols", &self.table.num_cols())
            .finish()
    }
}

/// Execute a plan to completion.
pub fn execute_plan(plan: &QueryPlan, ctx: &ExecutionContext) -> Result<QueryResult> {
    let stream = plan.tree.compute(ctx)?;
    let (mut table, vocab) = materialize(stream, plan.tree.result_width(), &ctx.budget)?;

    if let Some(limit) = plan.limit {
        if (table.num_rows() as u64) > limit {
            let mut truncated = IdTable::new(table.num_cols(), ctx.budget.clone());
            for row in table.rows().take(limit as usize) {
                truncated.push_row(row)?;
            }
            table = truncated;
        }
    }

    let map = plan.tree.variable_columns();
    let mut variables: Vec<(usize, Variable)> =
        map.into_iter().map(|(v, i)| (i.column, v)).collect();
    variables.sort();
    // Two variables can share a column (a join keeps both names); one name
    // per column keeps the serialisers aligned with the table.
    variables.dedup_by_key(|(column, _)| *column);
    Ok(QueryResult {
        variables: variables.into_iter().map(|(_, v)| v).collect(),
        table,
        vocab,
    })
}

// ============================================================================
// Term rendering
// ============================================================================

/// The surface form of an id (`<iri>`, `"literal"`, plain value forms for
/// the directly-encoded datatypes). Empty string for undefined.
pub fn surface_form(index: &Index, vocab: &LocalVocab, id: ValueId) -> Result<String> {
    Ok(match id.datatype() {
        Datatype::Undefined => String::new(),
        Datatype::Bool => if id.payload() == 1 { "true" } else { "false" }.to_owned(),
        Datatype::Int => id.decode_int().to_string(),
        Datatype::Double => format!("{}", id.decode_double()),
        Datatype::Date => {
            let (y, m, d) = crate::expression::civil_from_days(id.decode_int());
            format!("{y:04}-{m:02}-{d:02}")
        }
        Datatype::GeoPoint => {
            let (lat, lng) = id.decode_geo_point();
            format!("\"POINT({lng} {lat})\"")
        }
        Datatype::VocabIndex => index.term_for_id(id)?,
        Datatype::LocalVocabIndex => vocab
            .get(id)
            .map(|w| w.to_string())
            .unwrap_or_default(),
        Datatype::TextRecordIndex => {
            let content = index
                .text_index()
                .record_content(id.payload())
                .ok_or_else(|| {
                    QueryError::other(format!("dangling text record {}", id.payload()))
                })?;
            index.term_for_id(content)?
        }
        Datatype::BlankNodeIndex => format!("_:b{}", id.payload()),
    })
}

/// Human-readable cell for TSV/CSV: IRIs without brackets, literal bodies
/// without quotes.
fn plain_form(index: &Index, vocab: &LocalVocab, id: ValueId) -> Result<String> {
    let surface = surface_form(index, vocab, id)?;
    Ok(strip_term_decoration(&surface))
}

fn strip_term_decoration(surface: &str) -> String {
    if let Some(inner) = surface.strip_prefix('<').and_then(|s| s.strip_suffix('>')) {
        inner.to_owned()
    } else if surface.starts_with('"') {
        stela_index::literal_body(surface).to_owned()
    } else {
        surface.to_owned()
    }
}

// ============================================================================
// Serialisation
// ============================================================================

pub fn to_tsv(index: &Index, result: &QueryResult) -> Result<String> {
    let mut out = String::new();
    let header: Vec<String> = result.variables.iter().map(|v| v.to_string()).collect();
    out.push_str(&header.join("\t"));
    out.push('\n');
    for row in result.table.rows() {
        let cells: Vec<String> = row
            .iter()
            .map(|&id| plain_form(index, &result.vocab, id))
            .collect::<Result<_>>()?;
        out.push_str(&cells.join("\t"));
        out.push('\n');
    }
    Ok(out)
}

pub fn to_csv(index: &Index, result: &QueryResult) -> Result<String> {
    let quote = |cell: &str| -> String {
        if cell.contains([',', '"', '\n']) {
            format!("\"{}\"", cell.replace('"', "\"\""))
        } else {
            cell.to_owned()
        }
    };
    let mut out = String::new();
    let header: Vec<String> = result
        .variables
        .iter()
        .map(|v| v.name().to_owned())
        .collect();
    out.push_str(&header.join(","));
    out.push('\n');
    for row in result.table.rows() {
        let cells: Vec<String> = row
            .iter()
            .map(|&id| Ok(quote(&plain_form(index, &result.vocab, id)?)))
            .collect::<Result<_>>()?;
        out.push_str(&cells.join(","));
        out.push('\n');
    }
    Ok(out)
}

/// SPARQL results JSON (`application/sparql-results+json`).
pub fn to_json(index: &Index, result: &QueryResult) -> Result<serde_json::Value> {
    let vars: Vec<&str> = result.variables.iter().map(|v| v.name()).collect();
    let mut bindings = Vec::with_capacity(result.table.num_rows());
    for row in result.table.rows() {
        let mut binding = serde_json::Map::new();
        for (variable, &id) in result.variables.iter().zip(row.iter()) {
            if id.is_undefined() {
                continue;
            }
            let surface = surface_form(index, &result.vocab, id)?;
            let (ty, value, datatype) = json_term(&surface, id);
            let mut entry = serde_json::Map::new();
            entry.insert("type".into(), ty.into());
            entry.insert("value".into(), value.into());
            if let Some(dt) = datatype {
                entry.insert("datatype".into(), dt.into());
            }
            binding.insert(variable.name().to_owned(), entry.into());
        }
        bindings.push(serde_json::Value::Object(binding));
    }
    Ok(serde_json::json!({
        "head": { "vars": vars },
        "results": { "bindings": bindings }
    }))
}

fn json_term(surface: &str, id: ValueId) -> (&'static str, String, Option<String>) {
    const XSD: &str = "http://www.w3.org/2001/XMLSchema#";
    match id.datatype() {
        Datatype::VocabIndex | Datatype::TextRecordIndex | Datatype::LocalVocabIndex => {
            if surface.starts_with('<') {
                ("uri", strip_term_decoration(surface), None)
            } else {
                let datatype = surface
                    .rfind("^^<")
                    .map(|i| surface[i + 3..surface.len() - 1].to_owned());
                ("literal", strip_term_decoration(surface), datatype)
            }
        }
        Datatype::BlankNodeIndex => ("bnode", surface.to_owned(), None),
        Datatype::Bool => ("literal", surface.to_owned(), Some(format!("{XSD}boolean"))),
        Datatype::Int => ("literal", surface.to_owned(), Some(format!("{XSD}integer"))),
        Datatype::Double => ("literal", surface.to_owned(), Some(format!("{XSD}double"))),
        Datatype::Date => ("literal", surface.to_owned(), Some(format!("{XSD}date"))),
        Datatype::GeoPoint => (
            "literal",
            strip_term_decoration(surface),
            Some("http://www.opengis.net/ont/geosparql#wktLiteral".to_owned()),
        ),
        Datatype::Undefined => ("literal", String::new(), None),
    }
}

/// Instantiate a CONSTRUCT template into N-Triples. Rows leaving any
/// template variable unbound are skipped.
pub fn construct_ntriples(
    index: &Index,
    template: &[RawTriple],
    result: &QueryResult,
) -> Result<String> {
    let column_of = |v: &Variable| result.variables.iter().position(|rv| rv == v);
    let mut out = String::new();
    for row in result.table.rows() {
        for triple in template {
            let mut terms = Vec::with_capacity(3);
            let mut complete = true;
            for raw in [&triple.subject, &triple.predicate, &triple.object] {
                match raw {
                    RawTerm::Var(v) => match column_of(v) {
                        Some(col) if !row[col].is_undefined() => {
                            let mut surface = surface_form(index, &result.vocab, row[col])?;
                            // Directly-encoded values need literal quoting
                            // in N-Triples.
                            if !surface.starts_with('<')
                                && !surface.starts_with('"')
                                && !surface.starts_with("_:")
                            {
                                surface = quote_plain_value(&surface, row[col]);
                            }
                            terms.push(surface);
                        }
                        _ => {
                            complete = false;
                            break;
                        }
                    },
                    RawTerm::Iri(s) | RawTerm::Literal(s) => terms.push(s.clone()),
                }
            }
            if complete {
                out.push_str(&format!("{} {} {} .\n", terms[0], terms[1], terms[2]));
            }
        }
    }
    Ok(out)
}

fn quote_plain_value(surface: &str, id: ValueId) -> String {
    const XSD: &str = "http://www.w3.org/2001/XMLSchema#";
    let datatype = match id.datatype() {
        Datatype::Bool => "boolean",
        Datatype::Int => "integer",
        Datatype::Double => "double",
        Datatype::Date => "date",
        _ => return format!("\"{surface}\""),
    };
    format!("\"{surface}\"^^<{XSD}{datatype}>")
}
