//! # Stela Index
//!
//! On-disk index formats and the bulk builder for the stela knowledge-graph
//! engine.
//!
//! This crate owns:
//! - the vocabulary stack (in-memory, external on-demand, block-compressed,
//!   geo with geometry-info sidecar)
//! - the six sorted permutations with block metadata
//! - the full-text index
//! - the [`Index`] aggregate that opens everything and hands out readers
//!
//! All readers use positioned I/O and are safe to share across query
//! threads. Writers are single-owner build-time objects; the geo vocabulary
//! writer internally runs a parallel preprocessing pipeline.

pub mod builder;
pub mod error;
pub mod geometry;
pub mod index;
pub mod permutation;
pub mod text;
pub mod vocabulary;

pub use builder::{encode_literal, literal_body, IndexBuilder, IndexManifest};
pub use error::{IndexError, Result};
pub use geometry::{BoundingBox, GeometryInfo, WktType, GEOMETRY_INFO_VERSION, GEO_INFO_STRIDE};
pub use index::{is_wkt_literal, Index, GEO_VOCAB_MARKER};
pub use permutation::{
    BlockMetadata, Permutation, PermutationReader, PermutationWriter, PermutedTriple,
};
pub use text::{Posting, TextIndex};
pub use vocabulary::{
    CompressedVocabulary, CompressedWordWriter, ExternalVocabulary, GeoVocabulary, GeoWordWriter,
    GeoWriterStats, InMemoryWordWriter, Vocabulary, VocabularyInMemory, WordWriter,
};
