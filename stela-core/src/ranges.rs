//! Datatype-aware comparison ranges over sorted `ValueId` slices.
//!
//! Given a sorted slice of ids and a reference id, [`ranges_for_id`] returns
//! the half-open index ranges whose ids satisfy a relational comparison
//! against the reference. Only ids of a *comparable* datatype participate:
//! the reference's own tag, plus the sibling numeric tag when the reference
//! is numeric (Int and Double compare by numeric value). Ids of any other
//! datatype never match an ordering comparison.
//!
//! The block prefilter builds on this to map qualifying id ranges back to
//! block indices.

use crate::value_id::{Datatype, ValueId};
use std::cmp::Ordering;

/// Relational comparison operators.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum CompOp {
    Lt,
    Le,
    Eq,
    Ne,
    Ge,
    Gt,
}

impl CompOp {
    /// The complement under logical negation (`¬< = ≥`, `¬= = ≠`, ...).
    pub fn complement(self) -> Self {
        match self {
            CompOp::Lt => CompOp::Ge,
            CompOp::Le => CompOp::Gt,
            CompOp::Eq => CompOp::Ne,
            CompOp::Ne => CompOp::Eq,
            CompOp::Ge => CompOp::Lt,
            CompOp::Gt => CompOp::Le,
        }
    }
}

impl std::fmt::Display for CompOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CompOp::Lt => "LT(<)",
            CompOp::Le => "LE(<=)",
            CompOp::Eq => "EQ(=)",
            CompOp::Ne => "NE(!=)",
            CompOp::Ge => "GE(>=)",
            CompOp::Gt => "GT(>)",
        };
        write!(f, "{s}")
    }
}

/// Compare an id of datatype `tag` against the reference.
///
/// Same tag: raw `u64` order (monotone within every tag). Cross-tag is only
/// reached for the numeric pair and compares decoded values.
fn compare_to_reference(id: ValueId, reference: ValueId) -> Ordering {
    if id.tag() == reference.tag() {
        return id.as_u64().cmp(&reference.as_u64());
    }
    let lhs = id.as_numeric().expect("non-numeric id in numeric comparison");
    let rhs = reference
        .as_numeric()
        .expect("non-numeric reference in numeric comparison");
    lhs.total_cmp(&rhs)
}

/// The datatypes whose ids are comparable with `reference`.
fn comparable_datatypes(reference: ValueId) -> Vec<Datatype> {
    if reference.datatype().is_numeric() {
        vec![Datatype::Int, Datatype::Double]
    } else {
        vec![reference.datatype()]
    }
}

/// Compute the half-open index ranges of `ids` matching `op` against
/// `reference`.
///
/// `ids` must be sorted ascending (raw `u64` order). Empty ranges are
/// dropped, except for `Eq` with `keep_empty_ranges = true`: there an empty
/// `[lb, lb)` range still marks the insertion point of the reference, which
/// the prefilter needs to keep blocks whose interior may contain it.
pub fn ranges_for_id(
    ids: &[ValueId],
    reference: ValueId,
    op: CompOp,
    keep_empty_ranges: bool,
) -> Vec<(usize, usize)> {
    debug_assert!(ids.windows(2).all(|w| w[0] <= w[1]), "ids must be sorted");

    let mut ranges: Vec<(usize, usize)> = Vec::new();
    for datatype in comparable_datatypes(reference) {
        let tag = datatype as u8;
        // Sub-slice holding exactly this datatype.
        let begin = ids.partition_point(|id| id.tag() < tag);
        let end = ids.partition_point(|id| id.tag() <= tag);
        if begin == end && !(op == CompOp::Eq && keep_empty_ranges) {
            continue;
        }
        let lb = begin
            + ids[begin..end]
                .partition_point(|&id| compare_to_reference(id, reference) == Ordering::Less);
        let ub = begin
            + ids[begin..end]
                .partition_point(|&id| compare_to_reference(id, reference) != Ordering::Greater);

        match op {
            CompOp::Lt => ranges.push((begin, lb)),
            CompOp::Le => ranges.push((begin, ub)),
            CompOp::Eq => ranges.push((lb, ub)),
            CompOp::Ne => {
                ranges.push((begin, lb));
                ranges.push((ub, end));
            }
            CompOp::Ge => ranges.push((lb, end)),
            CompOp::Gt => ranges.push((ub, end)),
        }
    }

    if !(op == CompOp::Eq && keep_empty_ranges) {
        ranges.retain(|(b, e)| b < e);
    }
    simplify_ranges(ranges)
}

/// Sort and coalesce overlapping or adjacent non-empty ranges. Empty ranges
/// are kept as-is (they carry positional information for `Eq`).
fn simplify_ranges(mut ranges: Vec<(usize, usize)>) -> Vec<(usize, usize)> {
    ranges.sort_unstable();
    let mut out: Vec<(usize, usize)> = Vec::with_capacity(ranges.len());
    for (b, e) in ranges {
        match out.last_mut() {
            Some((_, last_end)) if b <= *last_end && e > *last_end => *last_end = e,
            Some((_, last_end)) if e <= *last_end && b < *last_end => {}
            _ => out.push((b, e)),
        }
    }
    out
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn ints(values: &[i64]) -> Vec<ValueId> {
        values.iter().map(|&v| ValueId::int(v).unwrap()).collect()
    }

    #[test]
    fn test_lt_le_on_ints() {
        let ids = ints(&[1, 3, 5, 7, 9]);
        let five = ValueId::int(5).unwrap();
        assert_eq!(ranges_for_id(&ids, five, CompOp::Lt, false), vec![(0, 2)]);
        assert_eq!(ranges_for_id(&ids, five, CompOp::Le, false), vec![(0, 3)]);
        assert_eq!(ranges_for_id(&ids, five, CompOp::Gt, false), vec![(3, 5)]);
        assert_eq!(ranges_for_id(&ids, five, CompOp::Ge, false), vec![(2, 5)]);
    }

    #[test]
    fn test_eq_ne() {
        let ids = ints(&[1, 3, 3, 3, 9]);
        let three = ValueId::int(3).unwrap();
        assert_eq!(ranges_for_id(&ids, three, CompOp::Eq, false), vec![(1, 4)]);
        assert_eq!(
            ranges_for_id(&ids, three, CompOp::Ne, false),
            vec![(0, 1), (4, 5)]
        );
    }

    #[test]
    fn test_eq_keeps_empty_range_when_requested() {
        let ids = ints(&[1, 9]);
        let five = ValueId::int(5).unwrap();
        assert_eq!(ranges_for_id(&ids, five, CompOp::Eq, false), vec![]);
        // The empty range at the insertion point survives with the flag.
        assert_eq!(ranges_for_id(&ids, five, CompOp::Eq, true), vec![(1, 1)]);
    }

    #[test]
    fn test_numeric_class_spans_int_and_double() {
        // Sorted: ints first (smaller tag), then doubles.
        let mut ids = ints(&[1, 4, 10]);
        ids.extend([ValueId::double(2.5), ValueId::double(6.0)]);
        let reference = ValueId::int(5).unwrap();
        // < 5 matches ints {1, 4} and double {2.5}.
        assert_eq!(
            ranges_for_id(&ids, reference, CompOp::Lt, false),
            vec![(0, 2), (3, 4)]
        );
        // >= 5 matches int {10} and double {6.0}.
        assert_eq!(
            ranges_for_id(&ids, reference, CompOp::Ge, false),
            vec![(2, 3), (4, 5)]
        );
    }

    #[test]
    fn test_non_comparable_datatypes_never_match() {
        let ids = vec![
            ValueId::int(1).unwrap(),
            ValueId::vocab_index(0),
            ValueId::vocab_index(5),
        ];
        let reference = ValueId::vocab_index(3);
        // Ordering comparisons only look at vocab ids.
        assert_eq!(
            ranges_for_id(&ids, reference, CompOp::Lt, false),
            vec![(1, 2)]
        );
        assert_eq!(
            ranges_for_id(&ids, reference, CompOp::Ge, false),
            vec![(2, 3)]
        );
    }

    #[test]
    fn test_simplify_merges_adjacent() {
        assert_eq!(simplify_ranges(vec![(0, 2), (2, 4), (6, 8)]), vec![(0, 4), (6, 8)]);
        assert_eq!(simplify_ranges(vec![(0, 4), (1, 3)]), vec![(0, 4)]);
    }

    #[test]
    fn test_ranges_match_brute_force_on_random_input() {
        use rand::rngs::StdRng;
        use rand::{Rng, SeedableRng};

        let mut rng = StdRng::seed_from_u64(0x5EED);
        for _ in 0..50 {
            let mut ids: Vec<ValueId> = (0..40)
                .map(|_| match rng.gen_range(0..3) {
                    0 => ValueId::int(rng.gen_range(-50..50)).unwrap(),
                    1 => ValueId::double(rng.gen_range(-50.0..50.0)),
                    _ => ValueId::vocab_index(rng.gen_range(0..30)),
                })
                .collect();
            ids.sort_unstable();
            let reference = ValueId::int(rng.gen_range(-50..50)).unwrap();

            for op in [CompOp::Lt, CompOp::Le, CompOp::Eq, CompOp::Ne, CompOp::Ge, CompOp::Gt] {
                let ranges = ranges_for_id(&ids, reference, op, false);
                let in_ranges = |i: usize| ranges.iter().any(|&(b, e)| b <= i && i < e);
                for (i, &id) in ids.iter().enumerate() {
                    let expected = match id.as_numeric() {
                        None => false,
                        Some(v) => {
                            let r = reference.decode_int() as f64;
                            match op {
                                CompOp::Lt => v < r,
                                CompOp::Le => v <= r,
                                CompOp::Eq => v == r,
                                CompOp::Ne => v != r,
                                CompOp::Ge => v >= r,
                                CompOp::Gt => v > r,
                            }
                        }
                    };
                    assert_eq!(
                        in_ranges(i),
                        expected,
                        "{op:?} ref {reference:?} id {id:?} at {i}"
                    );
                }
            }
        }
    }
}
