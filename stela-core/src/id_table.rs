//! Row-major result tables of `ValueId` with budgeted allocation.
//!
//! Every intermediate result of the engine is an [`IdTable`]: a row-major
//! buffer of fixed-width ids with a column count fixed at construction. Rows
//! are immutable once pushed. Cloning is explicit via [`IdTable::duplicate`]
//! so accidental copies of large intermediates show up in review.
//!
//! All table memory is tracked against a shared [`MemoryBudget`]. Exceeding
//! the budget is the recoverable [`Error::MemoryBudgetExceeded`]: it aborts
//! the query that allocated, never the process.

use crate::error::{Error, Result};
use crate::value_id::ValueId;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

// ============================================================================
// MemoryBudget
// ============================================================================

struct BudgetInner {
    /// Budget in bytes; `usize::MAX` means unlimited.
    limit: usize,
    used: AtomicUsize,
}

/// Shared byte budget for intermediate results.
///
/// Cheap to clone; all clones share the same counter.
#[derive(Clone)]
pub struct MemoryBudget {
    inner: Arc<BudgetInner>,
}

impl MemoryBudget {
    /// An unlimited budget (used by tests and small tools).
    pub fn unlimited() -> Self {
        Self::with_limit(usize::MAX)
    }

    /// A budget capped at `limit` bytes.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            inner: Arc::new(BudgetInner {
                limit,
                used: AtomicUsize::new(0),
            }),
        }
    }

    /// Currently reserved bytes.
    pub fn used(&self) -> usize {
        self.inner.used.load(Ordering::Relaxed)
    }

    /// Try to reserve `bytes`; fails without reserving anything when the
    /// budget would be exceeded.
    pub fn try_reserve(&self, bytes: usize) -> Result<()> {
        let mut current = self.inner.used.load(Ordering::Relaxed);
        loop {
            let available = self.inner.limit.saturating_sub(current);
            if bytes > available {
                return Err(Error::MemoryBudgetExceeded {
                    requested: bytes,
                    available,
                });
            }
            match self.inner.used.compare_exchange_weak(
                current,
                current + bytes,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Ok(()),
                Err(actual) => current = actual,
            }
        }
    }

    /// Return `bytes` to the budget.
    pub fn release(&self, bytes: usize) {
        self.inner.used.fetch_sub(bytes, Ordering::Relaxed);
    }
}

impl std::fmt::Debug for MemoryBudget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBudget")
            .field("limit", &self.inner.limit)
            .field("used", &self.used())
            .finish()
    }
}

// ============================================================================
// IdTable
// ============================================================================

/// Row-major table of `ValueId` with a dynamic column count.
pub struct IdTable {
    cols: usize,
    data: Vec<ValueId>,
    budget: MemoryBudget,
    /// Bytes currently reserved from the budget for `data`'s capacity.
    reserved_bytes: usize,
}

impl IdTable {
    /// Create an empty table with `cols` columns.
    pub fn new(cols: usize, budget: MemoryBudget) -> Self {
        Self {
            cols,
            data: Vec::new(),
            budget,
            reserved_bytes: 0,
        }
    }

    /// Number of columns.
    #[inline]
    pub fn num_cols(&self) -> usize {
        self.cols
    }

    /// Number of rows.
    #[inline]
    pub fn num_rows(&self) -> usize {
        if self.cols == 0 {
            0
        } else {
            self.data.len() / self.cols
        }
    }

    /// Check if the table has no rows.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Access a full row.
    #[inline]
    pub fn row(&self, row: usize) -> &[ValueId] {
        &self.data[row * self.cols..(row + 1) * self.cols]
    }

    /// Access a single cell.
    #[inline]
    pub fn at(&self, row: usize, col: usize) -> ValueId {
        debug_assert!(col < self.cols);
        self.data[row * self.cols + col]
    }

    /// Iterate over rows.
    pub fn rows(&self) -> impl Iterator<Item = &[ValueId]> {
        self.data.chunks_exact(self.cols.max(1))
    }

    /// Iterate over the values of one column.
    pub fn column(&self, col: usize) -> impl Iterator<Item = ValueId> + '_ {
        debug_assert!(col < self.cols);
        self.data.iter().skip(col).step_by(self.cols).copied()
    }

    /// Append a row. The row length must equal the column count.
    pub fn push_row(&mut self, row: &[ValueId]) -> Result<()> {
        debug_assert_eq!(row.len(), self.cols);
        self.ensure_capacity(self.data.len() + self.cols)?;
        self.data.extend_from_slice(row);
        Ok(())
    }

    /// Pre-reserve capacity for `rows` additional rows.
    pub fn reserve_rows(&mut self, rows: usize) -> Result<()> {
        self.ensure_capacity(self.data.len() + rows * self.cols)
    }

    /// Explicit deep copy (there is intentionally no `Clone` impl).
    pub fn duplicate(&self) -> Result<Self> {
        let mut copy = Self::new(self.cols, self.budget.clone());
        copy.ensure_capacity(self.data.len())?;
        copy.data.extend_from_slice(&self.data);
        Ok(copy)
    }

    /// Sort rows lexicographically by the given columns.
    pub fn sort_by_columns(&mut self, sort_cols: &[usize]) {
        let cols = self.cols;
        let mut indices: Vec<usize> = (0..self.num_rows()).collect();
        indices.sort_by(|&a, &b| {
            for &c in sort_cols {
                let ord = self.data[a * cols + c].cmp(&self.data[b * cols + c]);
                if ord != std::cmp::Ordering::Equal {
                    return ord;
                }
            }
            std::cmp::Ordering::Equal
        });
        let mut sorted = Vec::with_capacity(self.data.len());
        for idx in indices {
            sorted.extend_from_slice(&self.data[idx * cols..(idx + 1) * cols]);
        }
        self.data = sorted;
    }

    /// The budget this table draws from.
    pub fn budget(&self) -> &MemoryBudget {
        &self.budget
    }

    fn ensure_capacity(&mut self, needed: usize) -> Result<()> {
        if needed <= self.data.capacity() {
            return Ok(());
        }
        // Amortized doubling, reserved against the budget before growing.
        let new_cap = needed.max(self.data.capacity() * 2).max(64);
        let new_bytes = new_cap * std::mem::size_of::<ValueId>();
        let delta = new_bytes - self.reserved_bytes;
        self.budget.try_reserve(delta)?;
        self.reserved_bytes = new_bytes;
        self.data.reserve_exact(new_cap - self.data.len());
        Ok(())
    }
}

impl Drop for IdTable {
    fn drop(&mut self) {
        self.budget.release(self.reserved_bytes);
    }
}

impl std::fmt::Debug for IdTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "IdTable({} x {})", self.num_rows(), self.cols)?;
        for row in self.rows().take(20) {
            writeln!(f, "  {row:?}")?;
        }
        if self.num_rows() > 20 {
            writeln!(f, "  ... ({} more rows)", self.num_rows() - 20)?;
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn int(v: i64) -> ValueId {
        ValueId::int(v).unwrap()
    }

    #[test]
    fn test_push_and_access() {
        let mut t = IdTable::new(2, MemoryBudget::unlimited());
        t.push_row(&[int(1), int(2)]).unwrap();
        t.push_row(&[int(3), int(4)]).unwrap();
        assert_eq!(t.num_rows(), 2);
        assert_eq!(t.num_cols(), 2);
        assert_eq!(t.at(1, 0), int(3));
        assert_eq!(t.row(0), &[int(1), int(2)]);
        let col1: Vec<_> = t.column(1).collect();
        assert_eq!(col1, vec![int(2), int(4)]);
    }

    #[test]
    fn test_sort_by_columns() {
        let mut t = IdTable::new(2, MemoryBudget::unlimited());
        t.push_row(&[int(3), int(0)]).unwrap();
        t.push_row(&[int(1), int(2)]).unwrap();
        t.push_row(&[int(3), int(-1)]).unwrap();
        t.sort_by_columns(&[0, 1]);
        assert_eq!(t.row(0), &[int(1), int(2)]);
        assert_eq!(t.row(1), &[int(3), int(-1)]);
        assert_eq!(t.row(2), &[int(3), int(0)]);
    }

    #[test]
    fn test_duplicate_is_deep() {
        let mut t = IdTable::new(1, MemoryBudget::unlimited());
        t.push_row(&[int(1)]).unwrap();
        let mut copy = t.duplicate().unwrap();
        copy.push_row(&[int(2)]).unwrap();
        assert_eq!(t.num_rows(), 1);
        assert_eq!(copy.num_rows(), 2);
    }

    #[test]
    fn test_budget_exceeded_is_recoverable() {
        let budget = MemoryBudget::with_limit(1024);
        let mut t = IdTable::new(4, budget.clone());
        let mut failed = false;
        for i in 0..1000 {
            if t.push_row(&[int(i), int(i), int(i), int(i)]).is_err() {
                failed = true;
                break;
            }
        }
        assert!(failed, "a 1 KiB budget must not hold 1000 rows");
        // The table stays usable and the budget is released on drop.
        assert!(t.num_rows() > 0);
        drop(t);
        assert_eq!(budget.used(), 0);
    }

    #[test]
    fn test_budget_shared_between_tables() {
        let budget = MemoryBudget::with_limit(10_000);
        let mut a = IdTable::new(1, budget.clone());
        let mut b = IdTable::new(1, budget.clone());
        for i in 0..100 {
            a.push_row(&[int(i)]).unwrap();
            b.push_row(&[int(i)]).unwrap();
        }
        assert!(budget.used() > 0);
        drop(a);
        drop(b);
        assert_eq!(budget.used(), 0);
    }
}
