//! Block-level prefilter pushdown.
//!
//! Before an index scan reads a block, a [`PrefilterExpression`] decides
//! from the block metadata alone whether the block can contribute rows
//! satisfying a predicate like `?x <= 42 && ?x != 0`. Leaves are relational
//! comparisons against a reference id; inner nodes are AND/OR/NOT.
//!
//! Evaluation is sound, never complete: a returned block *may* contain
//! matching rows, a pruned block certainly does not. Input and output block
//! lists must satisfy the same invariants (unique, sorted, column-consistent
//! up to the evaluation column); violations are programmer errors and abort
//! via panic.

use stela_core::{ranges_for_id, CompOp, ValueId};
use stela_index::{BlockMetadata, PermutedTriple};

use crate::variable::Variable;

/// Maximum tree depth rendered by [`std::fmt::Display`].
const MAX_INFO_RECURSION: usize = 3;

/// A prefilter predicate tree.
#[derive(Clone, Debug, PartialEq)]
pub enum PrefilterExpression {
    /// Compare the evaluation column against a fixed id.
    Relational { op: CompOp, reference: ValueId },
    And(Box<PrefilterExpression>, Box<PrefilterExpression>),
    Or(Box<PrefilterExpression>, Box<PrefilterExpression>),
    /// The child is stored pre-complemented, so evaluating NOT is
    /// evaluating the child. Double application therefore cancels.
    Not(Box<PrefilterExpression>),
}

impl PrefilterExpression {
    // ---- Constructors ----

    pub fn relational(op: CompOp, reference: ValueId) -> Self {
        PrefilterExpression::Relational { op, reference }
    }

    pub fn lt(reference: ValueId) -> Self {
        Self::relational(CompOp::Lt, reference)
    }

    pub fn le(reference: ValueId) -> Self {
        Self::relational(CompOp::Le, reference)
    }

    pub fn eq(reference: ValueId) -> Self {
        Self::relational(CompOp::Eq, reference)
    }

    pub fn ne(reference: ValueId) -> Self {
        Self::relational(CompOp::Ne, reference)
    }

    pub fn ge(reference: ValueId) -> Self {
        Self::relational(CompOp::Ge, reference)
    }

    pub fn gt(reference: ValueId) -> Self {
        Self::relational(CompOp::Gt, reference)
    }

    pub fn and(a: PrefilterExpression, b: PrefilterExpression) -> Self {
        PrefilterExpression::And(Box::new(a), Box::new(b))
    }

    pub fn or(a: PrefilterExpression, b: PrefilterExpression) -> Self {
        PrefilterExpression::Or(Box::new(a), Box::new(b))
    }

    /// Build a NOT node: the child is complemented once here, and
    /// evaluation just evaluates the stored child.
    pub fn not(child: PrefilterExpression) -> Self {
        PrefilterExpression::Not(Box::new(child.logical_complement()))
    }

    // ---- Complement ----

    /// The tree equivalent to the logical negation, via per-relation
    /// complement and De Morgan's laws.
    pub fn logical_complement(&self) -> Self {
        match self {
            PrefilterExpression::Relational { op, reference } => PrefilterExpression::Relational {
                op: op.complement(),
                reference: *reference,
            },
            // not (A and B) = (not A) or (not B)
            PrefilterExpression::And(a, b) => PrefilterExpression::Or(
                Box::new(a.logical_complement()),
                Box::new(b.logical_complement()),
            ),
            // not (A or B) = (not A) and (not B)
            PrefilterExpression::Or(a, b) => PrefilterExpression::And(
                Box::new(a.logical_complement()),
                Box::new(b.logical_complement()),
            ),
            // Complementing a NOT undoes the complement applied when the
            // NOT was built.
            PrefilterExpression::Not(child) => child.logical_complement(),
        }
    }

    // ---- Evaluation ----

    /// Return the sorted, duplicate-free subset of `input` whose blocks may
    /// contain rows satisfying this predicate at `eval_col`.
    pub fn evaluate(&self, input: &[BlockMetadata], eval_col: usize) -> Vec<BlockMetadata> {
        check_eval_requirements(input, eval_col);
        let result = self.evaluate_impl(input, eval_col);
        check_eval_requirements(&result, eval_col);
        result
    }

    fn evaluate_impl(&self, input: &[BlockMetadata], eval_col: usize) -> Vec<BlockMetadata> {
        match self {
            PrefilterExpression::Relational { op, reference } => {
                evaluate_relational(input, eval_col, *op, *reference)
            }
            // AND composes: the second filter runs on the survivors of the
            // first.
            PrefilterExpression::And(a, b) => {
                let first = a.evaluate(input, eval_col);
                b.evaluate(&first, eval_col)
            }
            PrefilterExpression::Or(a, b) => {
                set_union(a.evaluate(input, eval_col), b.evaluate(input, eval_col))
            }
            // The stored child is already complemented.
            PrefilterExpression::Not(child) => child.evaluate(input, eval_col),
        }
    }

    fn fmt_with_depth(&self, f: &mut std::fmt::Formatter<'_>, depth: usize) -> std::fmt::Result {
        if depth > MAX_INFO_RECURSION {
            return write!(f, "MAX_DEPTH");
        }
        match self {
            PrefilterExpression::Relational { op, reference } => {
                write!(f, "Prefilter RelationalExpression<{op}> ValueId: {reference}")
            }
            PrefilterExpression::And(a, b) | PrefilterExpression::Or(a, b) => {
                let name = if matches!(self, PrefilterExpression::And(..)) {
                    "AND(&&)"
                } else {
                    "OR(||)"
                };
                write!(f, "Prefilter LogicalExpression<{name}> child1 {{")?;
                a.fmt_with_depth(f, depth + 1)?;
                write!(f, "}} child2 {{")?;
                b.fmt_with_depth(f, depth + 1)?;
                write!(f, "}}")
            }
            PrefilterExpression::Not(child) => {
                write!(f, "Prefilter NotExpression: child {{")?;
                child.fmt_with_depth(f, depth + 1)?;
                write!(f, "}}")
            }
        }
    }
}

impl std::fmt::Display for PrefilterExpression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.fmt_with_depth(f, 0)
    }
}

// ============================================================================
// Relational evaluation
// ============================================================================

/// Evaluate one relational comparison against the block boundary ids.
fn evaluate_relational(
    input: &[BlockMetadata],
    eval_col: usize,
    op: CompOp,
    reference: ValueId,
) -> Vec<BlockMetadata> {
    // Each block contributes the ids of its first and last triple at the
    // evaluation column. The flattened vector is sorted because the blocks
    // are sorted and column-consistent up to `eval_col`.
    let mut ids = Vec::with_capacity(2 * input.len());
    let mut mixed_datatype_blocks: Vec<BlockMetadata> = Vec::new();
    for block in input {
        let first_id = block.first.get(eval_col);
        let second_id = block.last.get(eval_col);
        ids.push(first_id);
        ids.push(second_id);
        // Blocks whose boundary ids have different datatypes contain the
        // boundary between two type domains; their interior is invisible to
        // the boundary ids, so they are always kept.
        if first_id.datatype() != second_id.datatype() {
            mixed_datatype_blocks.push(block.clone());
        }
    }

    // For EQ, empty ranges must be kept: the reference may lie strictly
    // between a block's boundary ids, in which case the insertion point
    // falls inside the block.
    let keep_empty = op == CompOp::Eq;
    let ranges = ranges_for_id(&ids, reference, op, keep_empty);

    let mut relevant: Vec<BlockMetadata> = Vec::with_capacity(input.len());
    for (first, second) in ranges {
        let begin_block = first / 2;
        // Round up: a range ending on a block's first boundary id makes
        // that block partially relevant.
        let end_block = if second < ids.len() {
            (second + 1) / 2
        } else {
            second / 2
        };
        for block in &input[begin_block..end_block.max(begin_block)] {
            relevant.push(block.clone());
        }
    }
    set_union(relevant, mixed_datatype_blocks)
}

/// Merge two sorted block lists into a sorted, duplicate-free union.
fn set_union(a: Vec<BlockMetadata>, b: Vec<BlockMetadata>) -> Vec<BlockMetadata> {
    let mut merged = Vec::with_capacity(a.len() + b.len());
    let (mut ia, mut ib) = (a.into_iter().peekable(), b.into_iter().peekable());
    loop {
        match (ia.peek(), ib.peek()) {
            (Some(x), Some(y)) => {
                if x.block_index < y.block_index {
                    merged.push(ia.next().expect("peeked"));
                } else if y.block_index < x.block_index {
                    merged.push(ib.next().expect("peeked"));
                } else {
                    merged.push(ia.next().expect("peeked"));
                    ib.next();
                }
            }
            (Some(_), None) => merged.push(ia.next().expect("peeked")),
            (None, Some(_)) => merged.push(ib.next().expect("peeked")),
            (None, None) => break,
        }
    }
    merged.dedup_by_key(|b| b.block_index);
    merged
}

// ============================================================================
// Input validation
// ============================================================================

/// Mask a triple, keeping only the columns before `up_to`.
fn masked_triple(t: &PermutedTriple, up_to: usize) -> (ValueId, ValueId, ValueId) {
    let undefined = ValueId::UNDEFINED;
    match up_to {
        0 => (undefined, undefined, undefined),
        1 => (t.col0, undefined, undefined),
        2 => (t.col0, t.col1, undefined),
        _ => (t.col0, t.col1, t.col2),
    }
}

/// Assert the evaluation preconditions: blocks unique, sorted by block
/// index, and column-consistent up to the evaluation column. A violation is
/// a programmer bug, not a data error.
fn check_eval_requirements(input: &[BlockMetadata], eval_col: usize) {
    for pair in input.windows(2) {
        let (b1, b2) = (&pair[0], &pair[1]);
        assert!(
            b1 != b2,
            "The provided data blocks must be unique."
        );
        assert!(
            b1.block_index < b2.block_index
                && masked_triple(&b1.last, 3) <= masked_triple(&b2.first, 3),
            "The blocks must be provided in sorted order."
        );
        let b1_first = masked_triple(&b1.first, eval_col);
        let b1_last = masked_triple(&b1.last, eval_col);
        let b2_first = masked_triple(&b2.first, eval_col);
        let b2_last = masked_triple(&b2.last, eval_col);
        assert!(
            b1_first == b1_last && b1_last == b2_first && b2_first == b2_last,
            "The values in the columns up to the evaluation column must be consistent."
        );
    }
}

/// Validate `(expression, variable)` pairs before prefilters are attached
/// to scans: sorted and unique by variable.
pub fn check_properties_for_prefilter_construction(
    pairs: &[(PrefilterExpression, Variable)],
) -> crate::error::Result<()> {
    let vars: Vec<&Variable> = pairs.iter().map(|(_, v)| v).collect();
    if !vars.windows(2).all(|w| w[0] <= w[1]) {
        return Err(crate::error::QueryError::other(
            "the <PrefilterExpression, Variable> pairs must be sorted by variable",
        ));
    }
    if vars.windows(2).any(|w| w[0] == w[1]) {
        return Err(crate::error::QueryError::other(
            "each variable must have exactly one <PrefilterExpression, Variable> pair",
        ));
    }
    Ok(())
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

    /// A block over a single object range, with subject/predicate fixed so
    /// that eval_col = 2 is column-consistent.
    fn block(index: u64, first_obj: ValueId, last_obj: ValueId) -> BlockMetadata {
        let s = ValueId::vocab_index(1);
        let p = ValueId::vocab_index(2);
        BlockMetadata {
            block_index: index,
            first: PermutedTriple::new(s, p, first_obj),
            last: PermutedTriple::new(s, p, last_obj),
            byte_offset: index * 100,
            byte_len: 100,
        }
    }

    fn int_blocks() -> Vec<BlockMetadata> {
        vec![
            block(0, int(1), int(10)),
            block(1, int(11), int(20)),
            block(2, int(21), int(30)),
        ]
    }

    fn indices(blocks: &[BlockMetadata]) -> Vec<u64> {
        blocks.iter().map(|b| b.block_index).collect()
    }

    #[test]
    fn test_le_lt_scenario() {
        // Blocks [1..10] and [11..20]: LE(15) keeps both, LT(11) only the
        // first, NOT(LE(15)) = GT(15) keeps only the second.
        let blocks = vec![block(0, int(1), int(10)), block(1, int(11), int(20))];
        assert_eq!(
            indices(&PrefilterExpression::le(int(15)).evaluate(&blocks, 2)),
            vec![0, 1]
        );
        assert_eq!(
            indices(&PrefilterExpression::lt(int(11)).evaluate(&blocks, 2)),
            vec![0]
        );
        let not_le = PrefilterExpression::not(PrefilterExpression::le(int(15)));
        assert_eq!(indices(&not_le.evaluate(&blocks, 2)), vec![1]);
        assert_eq!(
            indices(&PrefilterExpression::gt(int(15)).evaluate(&blocks, 2)),
            vec![1]
        );
    }

    #[test]
    fn test_eq_inside_block_bounds() {
        // 15 is strictly inside block 1's boundary ids; the empty range at
        // the insertion point must keep the block.
        let blocks = int_blocks();
        assert_eq!(
            indices(&PrefilterExpression::eq(int(15)).evaluate(&blocks, 2)),
            vec![1]
        );
        // A value below every block matches nothing.
        assert_eq!(
            indices(&PrefilterExpression::eq(int(0)).evaluate(&blocks, 2)),
            Vec::<u64>::new()
        );
    }

    #[test]
    fn test_and_composes_or_unions() {
        let blocks = int_blocks();
        // x > 10 && x <= 20 => only the middle block.
        let and = PrefilterExpression::and(
            PrefilterExpression::gt(int(10)),
            PrefilterExpression::le(int(20)),
        );
        assert_eq!(indices(&and.evaluate(&blocks, 2)), vec![1]);

        // x < 11 || x > 20 => first and last.
        let or = PrefilterExpression::or(
            PrefilterExpression::lt(int(11)),
            PrefilterExpression::gt(int(20)),
        );
        assert_eq!(indices(&or.evaluate(&blocks, 2)), vec![0, 2]);
    }

    #[test]
    fn test_idempotence() {
        let blocks = int_blocks();
        let exprs = [
            PrefilterExpression::le(int(15)),
            PrefilterExpression::ne(int(11)),
            PrefilterExpression::and(
                PrefilterExpression::ge(int(5)),
                PrefilterExpression::lt(int(25)),
            ),
        ];
        for expr in exprs {
            let once = expr.evaluate(&blocks, 2);
            let twice = expr.evaluate(&once, 2);
            assert_eq!(once, twice, "{expr}");
        }
    }

    #[test]
    fn test_de_morgan_roundtrip_is_structural_identity() {
        let exprs = [
            PrefilterExpression::lt(int(3)),
            PrefilterExpression::eq(int(7)),
            PrefilterExpression::and(
                PrefilterExpression::le(int(1)),
                PrefilterExpression::or(
                    PrefilterExpression::gt(int(2)),
                    PrefilterExpression::ne(int(3)),
                ),
            ),
        ];
        for expr in exprs {
            assert_eq!(expr.logical_complement().logical_complement(), expr);
        }
    }

    #[test]
    fn test_not_cancels_on_double_application() {
        let inner = PrefilterExpression::le(int(15));
        let double_not = PrefilterExpression::not(PrefilterExpression::not(inner.clone()));
        let blocks = int_blocks();
        assert_eq!(
            double_not.evaluate(&blocks, 2),
            inner.evaluate(&blocks, 2)
        );
    }

    #[test]
    fn test_mixed_datatype_blocks_always_kept() {
        // Block 1 spans the int/double boundary; it must survive any
        // relational filter.
        let blocks = vec![
            block(0, int(1), int(10)),
            block(1, int(11), ValueId::double(0.5)),
            block(2, ValueId::double(1.0), ValueId::double(9.0)),
        ];
        let filtered = PrefilterExpression::gt(int(100)).evaluate(&blocks, 2);
        assert_eq!(indices(&filtered), vec![1]);
    }

    #[test]
    fn test_soundness_against_row_level_filter() {
        // Property: every row satisfying the predicate lies in a kept block.
        let blocks: Vec<BlockMetadata> = (0..10)
            .map(|i| block(i, int(i as i64 * 10), int(i as i64 * 10 + 9)))
            .collect();
        for reference in [0i64, 5, 17, 42, 99, 100] {
            for op in [CompOp::Lt, CompOp::Le, CompOp::Eq, CompOp::Ne, CompOp::Ge, CompOp::Gt] {
                let expr = PrefilterExpression::relational(op, int(reference));
                let kept: Vec<u64> = indices(&expr.evaluate(&blocks, 2));
                for row in 0..100i64 {
                    let matches = match op {
                        CompOp::Lt => row < reference,
                        CompOp::Le => row <= reference,
                        CompOp::Eq => row == reference,
                        CompOp::Ne => row != reference,
                        CompOp::Ge => row >= reference,
                        CompOp::Gt => row > reference,
                    };
                    if matches {
                        let holding_block = (row / 10) as u64;
                        assert!(
                            kept.contains(&holding_block),
                            "{op:?} {reference}: row {row} in pruned block {holding_block}"
                        );
                    }
                }
            }
        }
    }

    #[test]
    #[should_panic(expected = "unique")]
    fn test_duplicate_blocks_panic() {
        let b = block(0, int(1), int(10));
        PrefilterExpression::lt(int(5)).evaluate(&[b.clone(), b], 2);
    }

    #[test]
    #[should_panic(expected = "sorted order")]
    fn test_unsorted_blocks_panic() {
        let blocks = vec![block(1, int(11), int(20)), block(0, int(1), int(10))];
        PrefilterExpression::lt(int(5)).evaluate(&blocks, 2);
    }

    #[test]
    #[should_panic(expected = "consistent")]
    fn test_column_inconsistency_panics() {
        let mut b0 = block(0, int(1), int(10));
        let b1 = block(1, int(11), int(20));
        // Break column consistency at col 0 while keeping the block order.
        b0.first = PermutedTriple::new(ValueId::vocab_index(0), b0.first.col1, b0.first.col2);
        b0.last = PermutedTriple::new(ValueId::vocab_index(0), b0.last.col1, b0.last.col2);
        PrefilterExpression::lt(int(5)).evaluate(&[b0, b1], 2);
    }

    #[test]
    fn test_construction_property_check() {
        let pairs = vec![
            (PrefilterExpression::lt(int(1)), Variable::new("a")),
            (PrefilterExpression::gt(int(2)), Variable::new("b")),
        ];
        assert!(check_properties_for_prefilter_construction(&pairs).is_ok());

        let unsorted = vec![
            (PrefilterExpression::lt(int(1)), Variable::new("b")),
            (PrefilterExpression::gt(int(2)), Variable::new("a")),
        ];
        assert!(check_properties_for_prefilter_construction(&unsorted).is_err());

        let duplicate = vec![
            (PrefilterExpression::lt(int(1)), Variable::new("a")),
            (PrefilterExpression::gt(int(2)), Variable::new("a")),
        ];
        assert!(check_properties_for_prefilter_construction(&duplicate).is_err());
    }
}
