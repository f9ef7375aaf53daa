//! Bulk index construction.
//!
//! [`IndexBuilder`] turns a stream of term-level triples into the on-disk
//! index layout: the compressed main vocabulary, the geo vocabulary with its
//! geometry-info sidecar, the six permutations and the text index, plus a
//! `meta.json` manifest binding them together.
//!
//! Term routing:
//! - WKT literals go to the geo vocabulary (ids carry [`GEO_VOCAB_MARKER`])
//! - numeric/boolean/date literals are encoded directly into the `ValueId`
//!   payload and never touch a vocabulary
//! - everything else goes to the compressed main vocabulary, externalised
//!   above the configured length threshold

use crate::error::Result;
use crate::index::{is_wkt_literal, GEO_VOCAB_MARKER};
use crate::permutation::{Permutation, PermutationWriter};
use crate::text::TextIndex;
use crate::vocabulary::{
    CompressedWordWriter, GeoWordWriter, GeoWriterStats, InMemoryWordWriter, WordWriter,
};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use stela_core::{EngineConfig, Triple, ValueId};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

/// Version of the overall index layout, recorded in `meta.json`.
pub const INDEX_FORMAT_VERSION: u32 = 1;

/// Manifest tying the index files together.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexManifest {
    pub format_version: u32,
    pub triple_count: u64,
    pub vocab_size: u64,
    pub geo_vocab_size: u64,
    pub text_record_count: u64,
    pub invalid_wkt_literals: u64,
    pub invalid_polygon_areas: u64,
}

/// Builder for a complete index directory.
pub struct IndexBuilder {
    config: Arc<EngineConfig>,
}

impl IndexBuilder {
    pub fn new(config: Arc<EngineConfig>) -> Self {
        Self { config }
    }

    /// Build all index files in `dir` from term-level triples
    /// (`<iri>` / `"literal"` surface forms).
    pub fn build(
        &self,
        dir: &Path,
        triples: impl IntoIterator<Item = (String, String, String)>,
    ) -> Result<IndexManifest> {
        std::fs::create_dir_all(dir)?;
        let triples: Vec<(String, String, String)> = triples.into_iter().collect();

        // ---- 1. Collect the distinct terms per vocabulary. -------------
        let mut vocab_terms: BTreeSet<&str> = BTreeSet::new();
        let mut geo_terms: BTreeSet<&str> = BTreeSet::new();
        for (s, p, o) in &triples {
            vocab_terms.insert(s.as_str());
            vocab_terms.insert(p.as_str());
            if encode_literal(o).is_some() {
                continue;
            }
            if is_wkt_literal(o) {
                geo_terms.insert(o.as_str());
            } else {
                vocab_terms.insert(o.as_str());
            }
        }

        // ---- 2. Main vocabulary (sorted input => sorted vocab). --------
        let mut ids: FxHashMap<&str, ValueId> =
            FxHashMap::with_capacity_and_hasher(vocab_terms.len(), Default::default());
        let mut vocab_writer =
            CompressedWordWriter::create(&dir.join("vocab"), self.config.block_size)?;
        for &term in &vocab_terms {
            let external = term.len() > self.config.externalization_threshold as usize;
            let index = vocab_writer.push(term, external)?;
            ids.insert(term, ValueId::vocab_index(index));
        }
        vocab_writer.finish()?;

        // ---- 3. Geo vocabulary with geometry preprocessing. ------------
        let mut geo_stats = GeoWriterStats::default();
        if !geo_terms.is_empty() {
            let base = dir.join("geo.vocab");
            let underlying = InMemoryWordWriter::create(&base)?;
            let mut geo_writer = GeoWordWriter::create(underlying, &base, &self.config)?;
            for &term in &geo_terms {
                let index = geo_writer.push(term, false)?;
                ids.insert(term, ValueId::vocab_index(GEO_VOCAB_MARKER | index));
            }
            geo_writer.finish()?;
            geo_stats = geo_writer.stats();
        }

        // ---- 4. Resolve triples to ids. ---------------------------------
        let resolve = |term: &str| -> ValueId {
            if let Some(direct) = encode_literal(term) {
                return direct;
            }
            *ids.get(term).expect("term registered above")
        };
        let id_triples: Vec<Triple> = triples
            .iter()
            .map(|(s, p, o)| Triple::new(resolve(s), resolve(p), resolve(o)))
            .collect();

        // ---- 5. Six permutations. ---------------------------------------
        for perm in Permutation::ALL {
            let mut projected: Vec<_> = id_triples.iter().map(|t| perm.apply(t)).collect();
            projected.sort_unstable();
            let path = dir.join(format!("perm.{}", perm.file_suffix()));
            let mut writer = PermutationWriter::create(&path, self.config.block_size)?;
            for t in projected {
                writer.push(t)?;
            }
            writer.finish()?;
        }

        // ---- 6. Text index over plain literal objects. -------------------
        let mut text = TextIndex::new();
        for (_, _, o) in &triples {
            if !o.starts_with('"') || is_wkt_literal(o) || encode_literal(o).is_some() {
                continue;
            }
            let content_id = resolve(o);
            // The indexed literal is its own entity; subjects reach it via
            // the regular permutations.
            text.add_record(content_id, &[content_id], literal_body(o));
        }
        text.write(&dir.join("text.idx"))?;

        // ---- 7. Manifest. -------------------------------------------------
        let manifest = IndexManifest {
            format_version: INDEX_FORMAT_VERSION,
            triple_count: id_triples.len() as u64,
            vocab_size: vocab_terms.len() as u64,
            geo_vocab_size: geo_terms.len() as u64,
            text_record_count: text.record_count(),
            invalid_wkt_literals: geo_stats.invalid_geometries,
            invalid_polygon_areas: geo_stats.invalid_polygon_areas,
        };
        std::fs::write(
            dir.join("meta.json"),
            serde_json::to_vec_pretty(&manifest)
                .map_err(|e| crate::error::IndexError::corrupt(format!("manifest: {e}")))?,
        )?;

        tracing::info!(
            triples = manifest.triple_count,
            vocab = manifest.vocab_size,
            geo = manifest.geo_vocab_size,
            text_records = manifest.text_record_count,
            invalid_wkt = manifest.invalid_wkt_literals,
            "index build finished"
        );
        Ok(manifest)
    }
}

// ============================================================================
// Literal handling
// ============================================================================

const XSD: &str = "http://www.w3.org/2001/XMLSchema#";

/// The body of a `"..."` literal (without quotes and datatype suffix).
pub fn literal_body(term: &str) -> &str {
    let Some(rest) = term.strip_prefix('"') else {
        return term;
    };
    match rest.rfind('"') {
        Some(end) => &rest[..end],
        None => rest,
    }
}

/// Datatype IRI of a literal, if present.
fn literal_datatype(term: &str) -> Option<&str> {
    let idx = term.rfind("^^<")?;
    term[idx + 3..].strip_suffix('>')
}

/// Encode numeric, boolean and date literals directly into the id payload.
pub fn encode_literal(term: &str) -> Option<ValueId> {
    if !term.starts_with('"') {
        return None;
    }
    let body = literal_body(term);
    let datatype = literal_datatype(term)?;
    let local = datatype.strip_prefix(XSD)?;
    match local {
        "integer" | "int" | "long" | "short" | "byte" | "nonNegativeInteger"
        | "positiveInteger" | "nonPositiveInteger" | "negativeInteger" => {
            body.parse::<i64>().ok().and_then(|v| ValueId::int(v).ok())
        }
        "double" | "float" | "decimal" => body.parse::<f64>().ok().map(ValueId::double),
        "boolean" => match body {
            "true" => Some(ValueId::BOOL_TRUE),
            "false" => Some(ValueId::BOOL_FALSE),
            _ => None,
        },
        "date" => parse_date_days(body).map(ValueId::date),
        _ => None,
    }
}

/// Days since the Unix epoch for a `YYYY-MM-DD` string.
fn parse_date_days(body: &str) -> Option<i32> {
    let mut parts = body.splitn(3, '-');
    let (y, m, d) = (
        parts.next()?.parse::<i64>().ok()?,
        parts.next()?.parse::<u32>().ok()?,
        parts.next()?.parse::<u32>().ok()?,
    );
    if !(1..=12).contains(&m) || !(1..=31).contains(&d) {
        return None;
    }
    // Days-from-civil, Gregorian calendar.
    let y = if m <= 2 { y - 1 } else { y };
    let era = if y >= 0 { y } else { y - 399 } / 400;
    let yoe = (y - era * 400) as i64;
    let mp = ((m + 9) % 12) as i64;
    let doy = (153 * mp + 2) / 5 + d as i64 - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    Some((era * 146097 + doe - 719468) as i32)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::Index;
    use tempfile::TempDir;

    fn build_sample(dir: &Path) -> IndexManifest {
        let config = Arc::new(EngineConfig {
            block_size: 4,
            worker_count: 2,
            ..Default::default()
        });
        let triples = vec![
            ("<a>", "<p>", "\"he failed the test\""),
            ("<a>", "<p>", "\"testing can help\""),
            ("<a>", "<p>", "\"some other sentence\""),
            ("<b>", "<p>", "\"the test on friday was really hard\""),
            ("<b>", "<x2>", "<x>"),
            ("<b>", "<x2>", "<xb2>"),
            ("<geo1>", "<hasShape>", "\"POINT(7.8 48.0)\""),
            (
                "<geo1>",
                "<size>",
                "\"42\"^^<http://www.w3.org/2001/XMLSchema#integer>",
            ),
        ];
        IndexBuilder::new(config)
            .build(
                dir,
                triples
                    .into_iter()
                    .map(|(s, p, o)| (s.to_owned(), p.to_owned(), o.to_owned())),
            )
            .unwrap()
    }

    #[test]
    fn test_build_and_open() {
        let dir = TempDir::new().unwrap();
        let manifest = build_sample(dir.path());
        assert_eq!(manifest.triple_count, 8);
        assert_eq!(manifest.geo_vocab_size, 1);
        assert_eq!(manifest.text_record_count, 4);
        assert_eq!(manifest.invalid_wkt_literals, 0);

        let index = Index::open(dir.path(), Arc::new(EngineConfig::default())).unwrap();
        let a = index.id_for_term("<a>").unwrap();
        assert_eq!(index.term_for_id(a).unwrap(), "<a>");

        let geo = index.id_for_term("\"POINT(7.8 48.0)\"").unwrap();
        assert!(geo.payload() & GEO_VOCAB_MARKER != 0);
        let info = index.geo_info(geo).unwrap().unwrap();
        assert_eq!(info.centroid, (48.0, 7.8));

        assert!(index.id_for_term("<missing>").is_none());
    }

    #[test]
    fn test_permutations_consistent() {
        let dir = TempDir::new().unwrap();
        build_sample(dir.path());
        let index = Index::open(dir.path(), Arc::new(EngineConfig::default())).unwrap();

        // Every permutation holds the same number of triples.
        let counts: Vec<usize> = Permutation::ALL
            .iter()
            .map(|&p| {
                let reader = index.permutation(p);
                reader
                    .blocks()
                    .iter()
                    .map(|b| reader.read_block(b).unwrap().len())
                    .sum()
            })
            .collect();
        assert!(counts.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(counts[0], 8);
    }

    #[test]
    fn test_encode_literal() {
        assert_eq!(
            encode_literal("\"42\"^^<http://www.w3.org/2001/XMLSchema#integer>"),
            Some(ValueId::int(42).unwrap())
        );
        assert_eq!(
            encode_literal("\"2.5\"^^<http://www.w3.org/2001/XMLSchema#double>"),
            Some(ValueId::double(2.5))
        );
        assert_eq!(
            encode_literal("\"true\"^^<http://www.w3.org/2001/XMLSchema#boolean>"),
            Some(ValueId::BOOL_TRUE)
        );
        assert_eq!(encode_literal("\"plain string\""), None);
        assert_eq!(encode_literal("<iri>"), None);
    }

    #[test]
    fn test_parse_date_days() {
        assert_eq!(parse_date_days("1970-01-01"), Some(0));
        assert_eq!(parse_date_days("1970-01-02"), Some(1));
        assert_eq!(parse_date_days("1969-12-31"), Some(-1));
        assert_eq!(parse_date_days("2024-01-15"), Some(19737));
        assert_eq!(parse_date_days("not-a-date"), None);
    }
}
