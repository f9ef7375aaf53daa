//! The vocabulary stack: append-only string dictionaries.
//!
//! A vocabulary maps a dense `u64` index to the original string bytes.
//! Variants stack:
//! - [`VocabularyInMemory`]: length-prefixed strings file + offset table,
//!   fully loaded
//! - [`ExternalVocabulary`]: long strings externalised to a separate file
//!   and loaded on demand
//! - [`CompressedVocabulary`]: block-wise zstd compression on top of the
//!   on-disk layout
//! - [`GeoVocabulary`]: WKT literals with a precomputed geometry-info
//!   sidecar
//!
//! All vocabularies are sorted by construction (the index builder feeds
//! words in sorted order), which makes `lower_bound`/`upper_bound` binary
//! searches and prefix ranges well-defined.

mod compressed;
mod external;
mod geo;
mod in_memory;

pub use compressed::{CompressedVocabulary, CompressedWordWriter};
pub use external::{ExternalVocabulary, ExternalWordWriter};
pub use geo::{geo_info_filename, GeoVocabulary, GeoWordWriter, GeoWriterStats};
pub use in_memory::{InMemoryWordWriter, VocabularyInMemory};

use crate::error::Result;

/// Read surface of a vocabulary.
pub trait Vocabulary {
    /// Number of words.
    fn size(&self) -> u64;

    /// Random access by index.
    fn get(&self, index: u64) -> Result<String>;

    /// Index of the first word `>= word` (words are sorted ascending by
    /// byte order).
    fn lower_bound(&self, word: &str) -> u64;

    /// Index of the first word `> word`.
    fn upper_bound(&self, word: &str) -> u64;

    /// Half-open index range of all words starting with `prefix`.
    fn prefix_range(&self, prefix: &str) -> (u64, u64) {
        let begin = self.lower_bound(prefix);
        // The end of the prefix range is the lower bound of the successor
        // byte string.
        let mut successor = prefix.as_bytes().to_vec();
        while let Some(&last) = successor.last() {
            if last < 0xFF {
                *successor.last_mut().expect("non-empty") = last + 1;
                break;
            }
            successor.pop();
        }
        if successor.is_empty() {
            return (begin, self.size());
        }
        // The successor is valid UTF-8 only when the incremented byte stays
        // ASCII; fall back to a lossy comparison otherwise.
        let end = match std::str::from_utf8(&successor) {
            Ok(s) => self.lower_bound(s),
            Err(_) => self.size(),
        };
        (begin, end)
    }
}

/// Write surface of a vocabulary: append-only, returns the assigned index.
pub trait WordWriter {
    /// Append the next word. `is_external` requests externalised storage
    /// where the implementation supports it.
    fn push(&mut self, word: &str, is_external: bool) -> Result<u64>;

    /// Flush and close all files. Must be called exactly once; further
    /// `push` calls are not allowed afterwards.
    fn finish(&mut self) -> Result<()>;
}

/// Generic binary search over any vocabulary, used by the implementations.
pub(crate) fn binary_search_bound<V: Vocabulary + ?Sized>(
    vocab: &V,
    word: &str,
    upper: bool,
) -> u64 {
    let mut low = 0u64;
    let mut high = vocab.size();
    while low < high {
        let mid = low + (high - low) / 2;
        // A missing word during search is a corrupt index; treat it as
        // larger than everything so the search terminates.
        let cmp_le = match vocab.get(mid) {
            Ok(w) => {
                if upper {
                    w.as_str() <= word
                } else {
                    w.as_str() < word
                }
            }
            Err(_) => false,
        };
        if cmp_le {
            low = mid + 1;
        } else {
            high = mid;
        }
    }
    low
}
