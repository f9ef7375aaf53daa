//! Per-result bags of strings materialised during query evaluation.
//!
//! Operators such as `CONCAT` produce strings that are not in the global
//! vocabulary. Those live in a [`LocalVocab`]: an append-only bag whose
//! entries are addressed by process-unique ids, so an id minted by one vocab
//! stays valid after the vocab is merged into another. Merging shares frozen
//! segments by `Arc`; published segments are never mutated.

use crate::value_id::{Datatype, ValueId};
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Process-wide id source. Ids are only unique, not dense; density is not
/// needed because lookups go through the owning vocab's maps.
static NEXT_LOCAL_ID: AtomicU64 = AtomicU64::new(0);

type Segment = FxHashMap<u64, Arc<str>>;

/// Append-only bag of query-local strings.
#[derive(Default)]
pub struct LocalVocab {
    /// Frozen segments taken over from merged vocabs.
    segments: Vec<Arc<Segment>>,
    /// Entries added directly to this vocab.
    current: Segment,
    /// Dedup index for `current` (merged segments are not deduped against;
    /// duplicate strings across segments are harmless).
    index_of: FxHashMap<Arc<str>, u64>,
}

impl LocalVocab {
    /// Create an empty local vocabulary.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of entries, including merged segments.
    pub fn len(&self) -> usize {
        self.current.len() + self.segments.iter().map(|s| s.len()).sum::<usize>()
    }

    /// Check if the vocab holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Add a word, returning its `LocalVocabIndex` id. Words already added
    /// to *this* vocab return their existing id.
    pub fn get_or_add_word(&mut self, word: &str) -> ValueId {
        if let Some(&id) = self.index_of.get(word) {
            return ValueId::local_vocab_index(id);
        }
        let id = NEXT_LOCAL_ID.fetch_add(1, Ordering::Relaxed);
        let entry: Arc<str> = Arc::from(word);
        self.current.insert(id, Arc::clone(&entry));
        self.index_of.insert(entry, id);
        ValueId::local_vocab_index(id)
    }

    /// Look up a word by its id.
    pub fn get(&self, id: ValueId) -> Option<Arc<str>> {
        debug_assert_eq!(id.datatype(), Datatype::LocalVocabIndex);
        let key = id.payload();
        if let Some(word) = self.current.get(&key) {
            return Some(Arc::clone(word));
        }
        self.segments.iter().find_map(|s| s.get(&key).cloned())
    }

    /// Merge the contents of `others` into this vocab.
    ///
    /// Ids minted by the other vocabs remain valid here. The other vocabs
    /// are unchanged; their entries are shared, not copied (each other's
    /// direct entries are frozen into one shared segment per call site).
    pub fn merge_with<'a>(&mut self, others: impl IntoIterator<Item = &'a LocalVocab>) {
        for other in others {
            for segment in &other.segments {
                self.segments.push(Arc::clone(segment));
            }
            if !other.current.is_empty() {
                self.segments.push(Arc::new(other.current.clone()));
            }
        }
    }

    /// Freeze this vocab's own entries into a shared segment, returning a
    /// cheaply clonable view. Used when one result is handed to several
    /// consumers.
    pub fn into_shared(mut self) -> LocalVocab {
        if !self.current.is_empty() {
            let current = std::mem::take(&mut self.current);
            self.segments.push(Arc::new(current));
            self.index_of.clear();
        }
        self
    }

    /// Clone by sharing all frozen segments and copying the open segment.
    pub fn share(&self) -> LocalVocab {
        let mut out = LocalVocab {
            segments: self.segments.clone(),
            current: Segment::default(),
            index_of: FxHashMap::default(),
        };
        if !self.current.is_empty() {
            out.segments.push(Arc::new(self.current.clone()));
        }
        out
    }
}

impl std::fmt::Debug for LocalVocab {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalVocab")
            .field("entries", &self.len())
            .field("segments", &self.segments.len())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_get() {
        let mut vocab = LocalVocab::new();
        let id = vocab.get_or_add_word("hello");
        assert_eq!(id.datatype(), Datatype::LocalVocabIndex);
        assert_eq!(vocab.get(id).as_deref(), Some("hello"));
    }

    #[test]
    fn test_dedup_within_vocab() {
        let mut vocab = LocalVocab::new();
        let a = vocab.get_or_add_word("x");
        let b = vocab.get_or_add_word("x");
        assert_eq!(a, b);
        assert_eq!(vocab.len(), 1);
    }

    #[test]
    fn test_ids_survive_merge() {
        let mut a = LocalVocab::new();
        let mut b = LocalVocab::new();
        let id_a = a.get_or_add_word("from-a");
        let id_b = b.get_or_add_word("from-b");
        assert_ne!(id_a, id_b, "ids are process-unique");

        let mut merged = LocalVocab::new();
        merged.merge_with([&a, &b]);
        assert_eq!(merged.get(id_a).as_deref(), Some("from-a"));
        assert_eq!(merged.get(id_b).as_deref(), Some("from-b"));
        assert_eq!(merged.len(), 2);

        // Sources are untouched.
        assert_eq!(a.get(id_a).as_deref(), Some("from-a"));
    }

    #[test]
    fn test_share_is_cheap_and_consistent() {
        let mut vocab = LocalVocab::new();
        let id = vocab.get_or_add_word("shared");
        let view = vocab.share();
        assert_eq!(view.get(id).as_deref(), Some("shared"));
    }
}
