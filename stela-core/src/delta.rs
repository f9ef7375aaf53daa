//! In-memory insert/delete overlay on top of the persistent index.
//!
//! [`DeltaTriples`] holds the triples inserted and deleted since the index
//! was built. The state is process-wide with a single-writer/many-readers
//! discipline: writers swap in a new [`Arc`] snapshot under a lock, readers
//! grab the current snapshot at query start and keep it for the lifetime of
//! the query, so a running scan never observes a half-applied update.

use crate::value_id::ValueId;
use rustc_hash::FxHashSet;
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use std::ops::Sub;
use std::sync::{Arc, RwLock};

/// A triple of ids in subject, predicate, object order.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Triple {
    pub subject: ValueId,
    pub predicate: ValueId,
    pub object: ValueId,
}

impl Triple {
    pub fn new(subject: ValueId, predicate: ValueId, object: ValueId) -> Self {
        Self {
            subject,
            predicate,
            object,
        }
    }
}

// ============================================================================
// DeltaTriplesCount
// ============================================================================

/// Observable size of the delta overlay.
///
/// Counts are signed so that differences between two observations (used for
/// update statistics) are representable.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct DeltaTriplesCount {
    pub inserted: i64,
    pub deleted: i64,
}

impl DeltaTriplesCount {
    pub const fn new(inserted: i64, deleted: i64) -> Self {
        Self { inserted, deleted }
    }

    /// Total overlay size: inserted + deleted.
    pub const fn total(&self) -> i64 {
        self.inserted + self.deleted
    }
}

impl Sub for DeltaTriplesCount {
    type Output = DeltaTriplesCount;

    fn sub(self, rhs: Self) -> Self::Output {
        DeltaTriplesCount {
            inserted: self.inserted - rhs.inserted,
            deleted: self.deleted - rhs.deleted,
        }
    }
}

impl Serialize for DeltaTriplesCount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("DeltaTriplesCount", 3)?;
        s.serialize_field("inserted", &self.inserted)?;
        s.serialize_field("deleted", &self.deleted)?;
        s.serialize_field("total", &self.total())?;
        s.end()
    }
}

// ============================================================================
// DeltaTriples
// ============================================================================

/// One immutable snapshot of the overlay.
#[derive(Clone, Default)]
pub struct DeltaTriples {
    inserted: FxHashSet<Triple>,
    deleted: FxHashSet<Triple>,
}

impl DeltaTriples {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an insertion. A previously deleted triple is revived instead
    /// of being counted twice.
    pub fn insert(&mut self, triple: Triple) {
        if !self.deleted.remove(&triple) {
            self.inserted.insert(triple);
        }
    }

    /// Record a deletion. An overlay-only triple is simply dropped.
    pub fn delete(&mut self, triple: Triple) {
        if !self.inserted.remove(&triple) {
            self.deleted.insert(triple);
        }
    }

    /// Check whether the overlay marks this triple as deleted.
    pub fn is_deleted(&self, triple: &Triple) -> bool {
        self.deleted.contains(triple)
    }

    /// Iterate the inserted triples (no order implied).
    pub fn inserted(&self) -> impl Iterator<Item = &Triple> {
        self.inserted.iter()
    }

    /// Current counts.
    pub fn count(&self) -> DeltaTriplesCount {
        DeltaTriplesCount {
            inserted: self.inserted.len() as i64,
            deleted: self.deleted.len() as i64,
        }
    }
}

impl std::fmt::Debug for DeltaTriples {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self.count();
        f.debug_struct("DeltaTriples")
            .field("inserted", &count.inserted)
            .field("deleted", &count.deleted)
            .finish()
    }
}

/// Process-wide overlay state with snapshot semantics for readers.
#[derive(Default)]
pub struct DeltaTriplesManager {
    state: RwLock<Arc<DeltaTriples>>,
}

impl DeltaTriplesManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot for a query. The snapshot stays valid while the query runs,
    /// independent of concurrent writers.
    pub fn snapshot(&self) -> Arc<DeltaTriples> {
        Arc::clone(&self.state.read().expect("delta lock poisoned"))
    }

    /// Apply a modification as the single writer. Readers keep their old
    /// snapshot; new queries see the new state.
    pub fn modify(&self, f: impl FnOnce(&mut DeltaTriples)) {
        let mut guard = self.state.write().expect("delta lock poisoned");
        let mut next = (**guard).clone();
        f(&mut next);
        *guard = Arc::new(next);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn triple(s: u64, p: u64, o: u64) -> Triple {
        Triple::new(
            ValueId::vocab_index(s),
            ValueId::vocab_index(p),
            ValueId::vocab_index(o),
        )
    }

    #[test]
    fn test_count_to_json() {
        let count = DeltaTriplesCount::new(5, 3);
        let expected = serde_json::json!({"inserted": 5, "deleted": 3, "total": 8});
        assert_eq!(serde_json::to_value(count).unwrap(), expected);
    }

    #[test]
    fn test_count_subtract() {
        let count1 = DeltaTriplesCount::new(10, 5);
        let count2 = DeltaTriplesCount::new(3, 2);
        assert_eq!(count1 - count2, DeltaTriplesCount::new(7, 3));
        assert_eq!(count2 - count1, DeltaTriplesCount::new(-7, -3));
    }

    #[test]
    fn test_count_subtract_total_is_component_sum() {
        let a = DeltaTriplesCount::new(10, 5);
        let b = DeltaTriplesCount::new(3, 2);
        assert_eq!((a - b).total(), a.total() - b.total());
    }

    #[test]
    fn test_insert_delete_cancel() {
        let mut delta = DeltaTriples::new();
        delta.insert(triple(1, 2, 3));
        assert_eq!(delta.count(), DeltaTriplesCount::new(1, 0));
        delta.delete(triple(1, 2, 3));
        // Deleting an overlay-only insert removes it entirely.
        assert_eq!(delta.count(), DeltaTriplesCount::new(0, 0));

        delta.delete(triple(4, 5, 6));
        assert_eq!(delta.count(), DeltaTriplesCount::new(0, 1));
        delta.insert(triple(4, 5, 6));
        assert_eq!(delta.count(), DeltaTriplesCount::new(0, 0));
    }

    #[test]
    fn test_manager_snapshot_isolation() {
        let manager = DeltaTriplesManager::new();
        let before = manager.snapshot();
        manager.modify(|d| d.insert(triple(1, 2, 3)));
        let after = manager.snapshot();
        assert_eq!(before.count().total(), 0);
        assert_eq!(after.count().total(), 1);
    }
}
