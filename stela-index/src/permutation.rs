//! The six sorted permutations of the triple store.
//!
//! Each permutation (SPO, SOP, PSO, POS, OSP, OPS) is a file of sorted
//! `ValueId` triples chunked into zstd-compressed blocks, plus a metadata
//! table with one [`BlockMetadata`] per block. The metadata alone drives
//! block-level pruning (prefilter pushdown) and range seeks; payload bytes
//! are only read for blocks that survive pruning.
//!
//! ## Format (`*.perm.<order>`)
//!
//! ```text
//! magic: "SPR1" (4B)
//! version: u32 (LE)
//! blocks: concatenated zstd frames of row-major (col0,col1,col2) u64 LE
//! metadata table:
//!   count: u32 (LE)
//!   per block: block_index u64, first 3xu64, last 3xu64,
//!              byte_offset u64, byte_len u64
//! footer: metadata table offset, u64 (LE)
//! ```
//!
//! ## Invariants
//!
//! Blocks are unique and strictly ordered by `block_index`; for consecutive
//! blocks `last(b1) < first(b2)` on the full 3-tuple. These are validated at
//! open time; a violation means the index file is corrupt.

use crate::error::{IndexError, Result};
use stela_core::{Triple, ValueId};
use std::fs::File;
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::os::unix::fs::FileExt;
use std::path::Path;

const PERM_MAGIC: [u8; 4] = *b"SPR1";

/// Format version of permutation files. Readers refuse other versions.
pub const PERMUTATION_VERSION: u32 = 1;

// ============================================================================
// Permutation
// ============================================================================

/// One of the six sort orders of the triple store.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Permutation {
    Spo,
    Sop,
    Pso,
    Pos,
    Osp,
    Ops,
}

impl Permutation {
    pub const ALL: [Permutation; 6] = [
        Permutation::Spo,
        Permutation::Sop,
        Permutation::Pso,
        Permutation::Pos,
        Permutation::Osp,
        Permutation::Ops,
    ];

    /// Positions of (subject, predicate, object) in (col0, col1, col2).
    pub fn key_order(self) -> [usize; 3] {
        match self {
            Permutation::Spo => [0, 1, 2],
            Permutation::Sop => [0, 2, 1],
            Permutation::Pso => [1, 0, 2],
            Permutation::Pos => [1, 2, 0],
            Permutation::Osp => [2, 0, 1],
            Permutation::Ops => [2, 1, 0],
        }
    }

    /// Filename suffix of this permutation.
    pub fn file_suffix(self) -> &'static str {
        match self {
            Permutation::Spo => "spo",
            Permutation::Sop => "sop",
            Permutation::Pso => "pso",
            Permutation::Pos => "pos",
            Permutation::Osp => "osp",
            Permutation::Ops => "ops",
        }
    }

    /// Project a triple into this permutation's column order.
    pub fn apply(self, t: &Triple) -> PermutedTriple {
        let spo = [t.subject, t.predicate, t.object];
        let order = self.key_order();
        PermutedTriple {
            col0: spo[order[0]],
            col1: spo[order[1]],
            col2: spo[order[2]],
        }
    }

    /// Invert [`Self::apply`].
    pub fn restore(self, pt: &PermutedTriple) -> Triple {
        let order = self.key_order();
        let mut spo = [ValueId::UNDEFINED; 3];
        spo[order[0]] = pt.col0;
        spo[order[1]] = pt.col1;
        spo[order[2]] = pt.col2;
        Triple::new(spo[0], spo[1], spo[2])
    }

    /// Pick the permutation whose sort order puts the bound positions
    /// first. Ties prefer subject-major orders.
    pub fn choose(s_bound: bool, p_bound: bool, o_bound: bool) -> Permutation {
        match (s_bound, p_bound, o_bound) {
            (true, true, _) => Permutation::Spo,
            (true, false, true) => Permutation::Sop,
            (true, false, false) => Permutation::Spo,
            (false, true, true) => Permutation::Pos,
            (false, true, false) => Permutation::Pso,
            (false, false, true) => Permutation::Osp,
            (false, false, false) => Permutation::Spo,
        }
    }
}

impl std::fmt::Display for Permutation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.file_suffix().to_uppercase())
    }
}

/// A triple in the column order of some permutation.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PermutedTriple {
    pub col0: ValueId,
    pub col1: ValueId,
    pub col2: ValueId,
}

impl PermutedTriple {
    pub fn new(col0: ValueId, col1: ValueId, col2: ValueId) -> Self {
        Self { col0, col1, col2 }
    }

    /// Id at the given column index (0..=2).
    pub fn get(&self, col: usize) -> ValueId {
        match col {
            0 => self.col0,
            1 => self.col1,
            2 => self.col2,
            _ => unreachable!("column index {col} out of bounds"),
        }
    }
}

/// Block-level metadata: the unit of prefilter pruning.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BlockMetadata {
    pub block_index: u64,
    pub first: PermutedTriple,
    pub last: PermutedTriple,
    pub byte_offset: u64,
    pub byte_len: u64,
}

// ============================================================================
// Writer
// ============================================================================

/// Writer for one permutation file. Triples must arrive sorted.
pub struct PermutationWriter {
    out: BufWriter<File>,
    block_size: usize,
    pending: Vec<PermutedTriple>,
    blocks: Vec<BlockMetadata>,
    byte_pos: u64,
    last_written: Option<PermutedTriple>,
    finished: bool,
}

impl PermutationWriter {
    pub fn create(path: &Path, block_size: u32) -> Result<Self> {
        assert!(block_size > 0, "block size must be positive");
        let mut out = BufWriter::new(File::create(path)?);
        out.write_all(&PERM_MAGIC)?;
        out.write_all(&PERMUTATION_VERSION.to_le_bytes())?;
        Ok(Self {
            out,
            block_size: block_size as usize,
            pending: Vec::new(),
            blocks: Vec::new(),
            byte_pos: 8,
            last_written: None,
            finished: false,
        })
    }

    /// Append the next triple. Input must be sorted ascending; duplicates
    /// are dropped.
    pub fn push(&mut self, triple: PermutedTriple) -> Result<()> {
        debug_assert!(!self.finished);
        if let Some(last) = &self.last_written {
            if *last == triple {
                return Ok(());
            }
            if *last > triple {
                return Err(IndexError::corrupt(
                    "permutation writer received unsorted input",
                ));
            }
        }
        self.last_written = Some(triple);
        self.pending.push(triple);
        if self.pending.len() >= self.block_size {
            self.flush_block()?;
        }
        Ok(())
    }

    fn flush_block(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let mut raw = Vec::with_capacity(self.pending.len() * 24);
        for t in &self.pending {
            raw.extend_from_slice(&t.col0.as_u64().to_le_bytes());
            raw.extend_from_slice(&t.col1.as_u64().to_le_bytes());
            raw.extend_from_slice(&t.col2.as_u64().to_le_bytes());
        }
        let compressed =
            zstd::encode_all(&raw[..], 3).map_err(|e| IndexError::Io(std::io::Error::other(e)))?;
        self.out.write_all(&compressed)?;
        self.blocks.push(BlockMetadata {
            block_index: self.blocks.len() as u64,
            first: self.pending[0],
            last: *self.pending.last().expect("non-empty"),
            byte_offset: self.byte_pos,
            byte_len: compressed.len() as u64,
        });
        self.byte_pos += compressed.len() as u64;
        self.pending.clear();
        Ok(())
    }

    /// Flush the last block and write the metadata table plus footer.
    pub fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        self.flush_block()?;

        let meta_offset = self.byte_pos;
        self.out.write_all(&(self.blocks.len() as u32).to_le_bytes())?;
        for block in &self.blocks {
            self.out.write_all(&block.block_index.to_le_bytes())?;
            for t in [&block.first, &block.last] {
                self.out.write_all(&t.col0.as_u64().to_le_bytes())?;
                self.out.write_all(&t.col1.as_u64().to_le_bytes())?;
                self.out.write_all(&t.col2.as_u64().to_le_bytes())?;
            }
            self.out.write_all(&block.byte_offset.to_le_bytes())?;
            self.out.write_all(&block.byte_len.to_le_bytes())?;
        }
        self.out.write_all(&meta_offset.to_le_bytes())?;
        self.out.flush()?;
        self.out.get_ref().sync_all()?;
        Ok(())
    }
}

// ============================================================================
// Reader
// ============================================================================

/// Read side of one permutation file.
pub struct PermutationReader {
    file: File,
    blocks: Vec<BlockMetadata>,
}

impl PermutationReader {
    pub fn open(path: &Path) -> Result<Self> {
        let mut file = File::open(path)?;
        let mut header = [0u8; 8];
        file.read_exact(&mut header)?;
        if header[0..4] != PERM_MAGIC {
            return Err(IndexError::corrupt(format!(
                "{}: not a permutation file",
                path.display()
            )));
        }
        let version = u32::from_le_bytes(header[4..8].try_into().expect("sized"));
        if version != PERMUTATION_VERSION {
            return Err(IndexError::VersionMismatch(format!(
                "The permutation file {} has version {version}, which is incompatible with \
                 version {PERMUTATION_VERSION} as required by this version of stela. \
                 Please rebuild your index.",
                path.display()
            )));
        }

        let file_len = file.seek(SeekFrom::End(0))?;
        if file_len < 16 {
            return Err(IndexError::corrupt("permutation file truncated"));
        }
        let mut footer = [0u8; 8];
        file.read_exact_at(&mut footer, file_len - 8)?;
        let meta_offset = u64::from_le_bytes(footer);
        if meta_offset + 4 > file_len {
            return Err(IndexError::corrupt("permutation metadata offset out of range"));
        }

        let mut table = vec![0u8; (file_len - 8 - meta_offset) as usize];
        file.read_exact_at(&mut table, meta_offset)?;
        let count = u32::from_le_bytes(table[0..4].try_into().expect("sized")) as usize;
        const ENTRY: usize = 8 + 24 + 24 + 8 + 8;
        if table.len() < 4 + count * ENTRY {
            return Err(IndexError::corrupt("permutation metadata truncated"));
        }
        let mut blocks = Vec::with_capacity(count);
        for i in 0..count {
            let e = &table[4 + i * ENTRY..4 + (i + 1) * ENTRY];
            let u = |j: usize| u64::from_le_bytes(e[j * 8..(j + 1) * 8].try_into().expect("sized"));
            blocks.push(BlockMetadata {
                block_index: u(0),
                first: PermutedTriple::new(
                    ValueId::from_u64(u(1)),
                    ValueId::from_u64(u(2)),
                    ValueId::from_u64(u(3)),
                ),
                last: PermutedTriple::new(
                    ValueId::from_u64(u(4)),
                    ValueId::from_u64(u(5)),
                    ValueId::from_u64(u(6)),
                ),
                byte_offset: u(7),
                byte_len: u(8),
            });
        }

        validate_block_metadata(&blocks)?;
        Ok(Self { file, blocks })
    }

    /// All block metadata, ordered by block index.
    pub fn blocks(&self) -> &[BlockMetadata] {
        &self.blocks
    }

    /// Total number of triples is unknown without decompressing; the block
    /// count scaled by the nominal block size serves as the size estimate.
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Metadata of the blocks that may contain triples matching the given
    /// column bounds (prefix semantics: `col1` needs `col0`).
    pub fn relevant_blocks(
        &self,
        col0: Option<ValueId>,
        col1: Option<ValueId>,
    ) -> Vec<BlockMetadata> {
        debug_assert!(col0.is_some() || col1.is_none());
        let lower = |b: &BlockMetadata| {
            let t = &b.last;
            match (col0, col1) {
                (Some(c0), Some(c1)) => (t.col0, t.col1) < (c0, c1),
                (Some(c0), None) => t.col0 < c0,
                (None, _) => false,
            }
        };
        let upper = |b: &BlockMetadata| {
            let t = &b.first;
            match (col0, col1) {
                (Some(c0), Some(c1)) => (t.col0, t.col1) <= (c0, c1),
                (Some(c0), None) => t.col0 <= c0,
                (None, _) => true,
            }
        };
        let begin = self.blocks.partition_point(lower);
        let end = self.blocks.partition_point(upper);
        self.blocks[begin..end.max(begin)].to_vec()
    }

    /// Decompress one block.
    pub fn read_block(&self, block: &BlockMetadata) -> Result<Vec<PermutedTriple>> {
        let mut compressed = vec![0u8; block.byte_len as usize];
        self.file.read_exact_at(&mut compressed, block.byte_offset)?;
        let raw = zstd::decode_all(&compressed[..]).map_err(|e| {
            IndexError::corrupt(format!("block {}: zstd: {e}", block.block_index))
        })?;
        if raw.len() % 24 != 0 {
            return Err(IndexError::corrupt(format!(
                "block {} has a partial triple",
                block.block_index
            )));
        }
        let mut triples = Vec::with_capacity(raw.len() / 24);
        for chunk in raw.chunks_exact(24) {
            let u = |j: usize| {
                u64::from_le_bytes(chunk[j * 8..(j + 1) * 8].try_into().expect("sized"))
            };
            triples.push(PermutedTriple::new(
                ValueId::from_u64(u(0)),
                ValueId::from_u64(u(1)),
                ValueId::from_u64(u(2)),
            ));
        }
        Ok(triples)
    }

    /// Decompress one block and keep only the triples matching the bounds.
    pub fn read_filtered(
        &self,
        block: &BlockMetadata,
        col0: Option<ValueId>,
        col1: Option<ValueId>,
    ) -> Result<Vec<PermutedTriple>> {
        let mut triples = self.read_block(block)?;
        triples.retain(|t| {
            col0.map_or(true, |c0| t.col0 == c0) && col1.map_or(true, |c1| t.col1 == c1)
        });
        Ok(triples)
    }
}

/// Validate the block invariants: unique, strictly ordered by block index,
/// and strictly ordered by boundary tuples.
fn validate_block_metadata(blocks: &[BlockMetadata]) -> Result<()> {
    for pair in blocks.windows(2) {
        let (a, b) = (&pair[0], &pair[1]);
        if a.block_index >= b.block_index {
            return Err(IndexError::corrupt(
                "permutation blocks not strictly ordered by block index",
            ));
        }
        if a.last >= b.first {
            return Err(IndexError::corrupt(
                "permutation block boundaries overlap",
            ));
        }
    }
    for block in blocks {
        if block.first > block.last {
            return Err(IndexError::corrupt("permutation block is internally unsorted"));
        }
    }
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn vid(v: u64) -> ValueId {
        ValueId::vocab_index(v)
    }

    fn pt(a: u64, b: u64, c: u64) -> PermutedTriple {
        PermutedTriple::new(vid(a), vid(b), vid(c))
    }

    fn write_perm(dir: &TempDir, triples: &[PermutedTriple], block_size: u32) -> PermutationReader {
        let path = dir.path().join("perm.spo");
        let mut writer = PermutationWriter::create(&path, block_size).unwrap();
        for &t in triples {
            writer.push(t).unwrap();
        }
        writer.finish().unwrap();
        PermutationReader::open(&path).unwrap()
    }

    #[test]
    fn test_apply_restore_inverse() {
        let t = Triple::new(vid(1), vid(2), vid(3));
        for perm in Permutation::ALL {
            let projected = perm.apply(&t);
            assert_eq!(perm.restore(&projected), t, "{perm}");
        }
    }

    #[test]
    fn test_choose_permutation() {
        assert_eq!(Permutation::choose(true, true, false), Permutation::Spo);
        assert_eq!(Permutation::choose(false, true, true), Permutation::Pos);
        assert_eq!(Permutation::choose(false, true, false), Permutation::Pso);
        assert_eq!(Permutation::choose(false, false, true), Permutation::Osp);
        assert_eq!(Permutation::choose(true, false, true), Permutation::Sop);
        assert_eq!(Permutation::choose(false, false, false), Permutation::Spo);
    }

    #[test]
    fn test_write_read_round_trip() {
        let dir = TempDir::new().unwrap();
        let triples: Vec<_> = (0..100).map(|i| pt(i / 10, i % 10, i)).collect();
        let reader = write_perm(&dir, &triples, 16);

        assert_eq!(reader.block_count(), 7);
        let mut all = Vec::new();
        for block in reader.blocks() {
            all.extend(reader.read_block(block).unwrap());
        }
        assert_eq!(all, triples);
    }

    #[test]
    fn test_duplicates_dropped_and_unsorted_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("perm.spo");
        let mut writer = PermutationWriter::create(&path, 4).unwrap();
        writer.push(pt(1, 1, 1)).unwrap();
        writer.push(pt(1, 1, 1)).unwrap();
        writer.push(pt(1, 1, 2)).unwrap();
        assert!(writer.push(pt(0, 0, 0)).is_err());
        writer.finish().unwrap();

        let reader = PermutationReader::open(&path).unwrap();
        let all: Vec<_> = reader
            .blocks()
            .iter()
            .flat_map(|b| reader.read_block(b).unwrap())
            .collect();
        assert_eq!(all, vec![pt(1, 1, 1), pt(1, 1, 2)]);
    }

    #[test]
    fn test_relevant_blocks_prunes() {
        let dir = TempDir::new().unwrap();
        // 5 subjects x 20 objects, block size 10 => 10 blocks.
        let triples: Vec<_> = (0..5)
            .flat_map(|s| (0..20).map(move |o| pt(s, 0, o)))
            .collect();
        let reader = write_perm(&dir, &triples, 10);
        assert_eq!(reader.block_count(), 10);

        let relevant = reader.relevant_blocks(Some(vid(2)), None);
        // Subject 2 occupies exactly blocks 4 and 5.
        assert_eq!(relevant.len(), 2);
        let rows: Vec<_> = relevant
            .iter()
            .flat_map(|b| reader.read_filtered(b, Some(vid(2)), None).unwrap())
            .collect();
        assert_eq!(rows.len(), 20);
        assert!(rows.iter().all(|t| t.col0 == vid(2)));
    }

    #[test]
    fn test_full_scan_returns_everything() {
        let dir = TempDir::new().unwrap();
        let triples: Vec<_> = (0..30).map(|i| pt(i, 0, 0)).collect();
        let reader = write_perm(&dir, &triples, 7);
        let relevant = reader.relevant_blocks(None, None);
        assert_eq!(relevant.len(), reader.block_count());
    }

    #[test]
    fn test_version_mismatch() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("perm.spo");
        let mut writer = PermutationWriter::create(&path, 4).unwrap();
        writer.push(pt(1, 2, 3)).unwrap();
        writer.finish().unwrap();

        let mut bytes = std::fs::read(&path).unwrap();
        bytes[4] = 0xEE;
        std::fs::write(&path, bytes).unwrap();
        assert!(matches!(
            PermutationReader::open(&path),
            Err(IndexError::VersionMismatch(_))
        ));
    }
}
