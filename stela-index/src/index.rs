//! The assembled on-disk index: vocabularies, permutations, text index.
//!
//! An [`Index`] is opened once per process lifetime and is immutable; the
//! only mutable state layered on top is the [`DeltaTriplesManager`]. Random
//! reads are thread-safe (positioned reads everywhere), so one `Index` is
//! shared by all queries.
//!
//! Vocabulary ids are split: bit 59 of a `VocabIndex` payload marks the geo
//! vocabulary (WKT literals with their geometry-info sidecar); all other
//! terms live in the compressed main vocabulary.

use crate::builder::{IndexManifest, INDEX_FORMAT_VERSION};
use crate::error::{IndexError, Result};
use crate::geometry::GeometryInfo;
use crate::permutation::{Permutation, PermutationReader};
use crate::text::TextIndex;
use crate::vocabulary::{CompressedVocabulary, GeoVocabulary, Vocabulary, VocabularyInMemory};
use stela_core::{DeltaTriplesManager, EngineConfig, ValueId};
use std::path::Path;
use std::sync::Arc;

/// Bit 59 of a `VocabIndex` payload: the id addresses the geo vocabulary.
pub const GEO_VOCAB_MARKER: u64 = 1u64 << 59;

/// WKT geometry keywords, used to route literals to the geo vocabulary.
const WKT_KEYWORDS: [&str; 7] = [
    "POINT",
    "LINESTRING",
    "POLYGON",
    "MULTIPOINT",
    "MULTILINESTRING",
    "MULTIPOLYGON",
    "GEOMETRYCOLLECTION",
];

/// Check whether a literal (in `"..."` surface form) is a WKT literal.
pub fn is_wkt_literal(term: &str) -> bool {
    let Some(body) = term.strip_prefix('"') else {
        return false;
    };
    let upper = body.trim_start().to_uppercase();
    WKT_KEYWORDS.iter().any(|kw| upper.starts_with(kw))
}

/// The immutable on-disk index plus the process-wide delta overlay.
pub struct Index {
    vocab: CompressedVocabulary,
    geo_vocab: Option<GeoVocabulary<VocabularyInMemory>>,
    permutations: [PermutationReader; 6],
    text: TextIndex,
    delta: DeltaTriplesManager,
    config: Arc<EngineConfig>,
    manifest: IndexManifest,
}

impl Index {
    /// Open all index files in `dir`. Refuses corrupt or version-mismatched
    /// files.
    pub fn open(dir: &Path, config: Arc<EngineConfig>) -> Result<Self> {
        let manifest_bytes = std::fs::read(dir.join("meta.json"))?;
        let manifest: IndexManifest = serde_json::from_slice(&manifest_bytes)
            .map_err(|e| IndexError::corrupt(format!("meta.json: {e}")))?;
        if manifest.format_version != INDEX_FORMAT_VERSION {
            return Err(IndexError::VersionMismatch(format!(
                "The index in {} has format version {}, which is incompatible with version \
                 {INDEX_FORMAT_VERSION} as required by this version of stela. Please rebuild \
                 your index.",
                dir.display(),
                manifest.format_version
            )));
        }

        let vocab = CompressedVocabulary::open(&dir.join("vocab"))?;
        let geo_vocab = if manifest.geo_vocab_size > 0 {
            let base = dir.join("geo.vocab");
            let literals = VocabularyInMemory::open(&base)?;
            Some(GeoVocabulary::open_with(literals, &base)?)
        } else {
            None
        };

        let open_perm = |p: Permutation| {
            PermutationReader::open(&dir.join(format!("perm.{}", p.file_suffix())))
        };
        let permutations = [
            open_perm(Permutation::Spo)?,
            open_perm(Permutation::Sop)?,
            open_perm(Permutation::Pso)?,
            open_perm(Permutation::Pos)?,
            open_perm(Permutation::Osp)?,
            open_perm(Permutation::Ops)?,
        ];

        let text = TextIndex::open(&dir.join("text.idx"))?;

        tracing::info!(
            dir = %dir.display(),
            triples = manifest.triple_count,
            vocab = manifest.vocab_size,
            geo = manifest.geo_vocab_size,
            "opened index"
        );
        Ok(Self {
            vocab,
            geo_vocab,
            permutations,
            text,
            delta: DeltaTriplesManager::new(),
            config,
            manifest,
        })
    }

    pub fn config(&self) -> &Arc<EngineConfig> {
        &self.config
    }

    pub fn manifest(&self) -> &IndexManifest {
        &self.manifest
    }

    /// Reader for one permutation.
    pub fn permutation(&self, p: Permutation) -> &PermutationReader {
        let idx = match p {
            Permutation::Spo => 0,
            Permutation::Sop => 1,
            Permutation::Pso => 2,
            Permutation::Pos => 3,
            Permutation::Osp => 4,
            Permutation::Ops => 5,
        };
        &self.permutations[idx]
    }

    pub fn text_index(&self) -> &TextIndex {
        &self.text
    }

    pub fn delta(&self) -> &DeltaTriplesManager {
        &self.delta
    }

    /// Total triple count of the persistent index.
    pub fn triple_count(&self) -> u64 {
        self.manifest.triple_count
    }

    // ------------------------------------------------------------------
    // Term <-> id
    // ------------------------------------------------------------------

    /// Look up the id of a term in its surface form (`<iri>` or
    /// `"literal"`). Returns `None` for unknown terms.
    pub fn id_for_term(&self, term: &str) -> Option<ValueId> {
        if is_wkt_literal(term) {
            let geo = self.geo_vocab.as_ref()?;
            let index = geo.lower_bound(term);
            if index < geo.size() && geo.get(index).ok()? == term {
                return Some(ValueId::vocab_index(GEO_VOCAB_MARKER | index));
            }
            return None;
        }
        let index = self.vocab.lower_bound(term);
        if index < self.vocab.size() && self.vocab.get(index).ok()? == term {
            return Some(ValueId::vocab_index(index));
        }
        None
    }

    /// Render a `VocabIndex` id back to its term string.
    pub fn term_for_id(&self, id: ValueId) -> Result<String> {
        let payload = id.payload();
        if payload & GEO_VOCAB_MARKER != 0 {
            let geo = self
                .geo_vocab
                .as_ref()
                .ok_or_else(|| IndexError::corrupt("geo id but no geo vocabulary"))?;
            geo.get(payload & !GEO_VOCAB_MARKER)
        } else {
            self.vocab.get(payload)
        }
    }

    /// Geometry info for a geo-vocabulary id; `None` for ids of other
    /// vocabularies or invalid geometries.
    pub fn geo_info(&self, id: ValueId) -> Result<Option<GeometryInfo>> {
        let payload = id.payload();
        if payload & GEO_VOCAB_MARKER == 0 {
            return Ok(None);
        }
        let Some(geo) = self.geo_vocab.as_ref() else {
            return Ok(None);
        };
        geo.get_geo_info(payload & !GEO_VOCAB_MARKER)
    }

    /// The main vocabulary (for range queries on term order).
    pub fn vocabulary(&self) -> &CompressedVocabulary {
        &self.vocab
    }

    /// The geo vocabulary, if the index contains WKT literals.
    pub fn geo_vocabulary(&self) -> Option<&GeoVocabulary<VocabularyInMemory>> {
        self.geo_vocab.as_ref()
    }
}
