//! Block-compressed vocabulary with externalisation.
//!
//! Words are chunked into fixed-size blocks; each block is a zstd-compressed
//! stream of length-prefixed strings. Words flagged as external bypass the
//! compressed blocks and land in an [`ExternalVocabulary`] loaded on demand.
//! A map file records, per global index, which store holds the word.
//!
//! ## Formats
//!
//! **Block data** (`*.blocks`): concatenated zstd frames.
//!
//! **Block table** (`*.blocktable`):
//! ```text
//! magic: "SVB1" (4B)
//! block_size: u32 (LE)          words per full block
//! block_count: u32 (LE)
//! For each block:
//!   word_count: u32, data_offset: u64, data_len: u64,
//!   first_word_len: u32, first_word: [u8]
//! ```
//!
//! **Map** (`*.map`): `magic "SVM1"`, `count: u64`, then `count` u64 slots;
//! bit 63 set means external, low bits are the local index in that store.

use super::{binary_search_bound, ExternalVocabulary, ExternalWordWriter, Vocabulary, WordWriter};
use crate::error::{IndexError, Result};
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

const BLOCK_TABLE_MAGIC: [u8; 4] = *b"SVB1";
const MAP_MAGIC: [u8; 4] = *b"SVM1";

const EXTERNAL_FLAG: u64 = 1u64 << 63;

fn with_suffix(base: &Path, suffix: &str) -> PathBuf {
    let mut os = base.as_os_str().to_owned();
    os.push(suffix);
    PathBuf::from(os)
}

#[derive(Debug, Clone)]
struct BlockInfo {
    word_count: u32,
    data_offset: u64,
    data_len: u64,
    first_word: String,
}

/// Compressed vocabulary with an external side-store for long strings.
pub struct CompressedVocabulary {
    data_file: File,
    block_size: u32,
    blocks: Vec<BlockInfo>,
    /// Global index -> store slot.
    map: Vec<u64>,
    external: Option<ExternalVocabulary>,
    /// One-block decompression cache; scans walk blocks in order, so this
    /// turns O(words) decompressions into O(blocks).
    cache: Mutex<Option<(u32, Arc<Vec<String>>)>>,
}

impl CompressedVocabulary {
    /// Open all parts written by [`CompressedWordWriter`].
    pub fn open(base: &Path) -> Result<Self> {
        let data_file = File::open(with_suffix(base, ".blocks"))?;

        // Block table
        let mut table = Vec::new();
        File::open(with_suffix(base, ".blocktable"))?.read_to_end(&mut table)?;
        if table.len() < 12 || table[0..4] != BLOCK_TABLE_MAGIC {
            return Err(IndexError::corrupt("not a vocabulary block table"));
        }
        let block_size = u32::from_le_bytes(table[4..8].try_into().expect("sized"));
        let block_count = u32::from_le_bytes(table[8..12].try_into().expect("sized")) as usize;
        let mut blocks = Vec::with_capacity(block_count);
        let mut pos = 12;
        for _ in 0..block_count {
            if pos + 24 > table.len() {
                return Err(IndexError::corrupt("block table truncated"));
            }
            let word_count = u32::from_le_bytes(table[pos..pos + 4].try_into().expect("sized"));
            let data_offset =
                u64::from_le_bytes(table[pos + 4..pos + 12].try_into().expect("sized"));
            let data_len = u64::from_le_bytes(table[pos + 12..pos + 20].try_into().expect("sized"));
            let first_len =
                u32::from_le_bytes(table[pos + 20..pos + 24].try_into().expect("sized")) as usize;
            pos += 24;
            if pos + first_len > table.len() {
                return Err(IndexError::corrupt("block table first word truncated"));
            }
            let first_word = std::str::from_utf8(&table[pos..pos + first_len])
                .map_err(|e| IndexError::corrupt(format!("block table: invalid UTF-8: {e}")))?
                .to_owned();
            pos += first_len;
            blocks.push(BlockInfo {
                word_count,
                data_offset,
                data_len,
                first_word,
            });
        }

        // Map
        let mut map_bytes = Vec::new();
        File::open(with_suffix(base, ".map"))?.read_to_end(&mut map_bytes)?;
        if map_bytes.len() < 12 || map_bytes[0..4] != MAP_MAGIC {
            return Err(IndexError::corrupt("not a vocabulary map"));
        }
        let count = u64::from_le_bytes(map_bytes[4..12].try_into().expect("sized")) as usize;
        if map_bytes.len() < 12 + count * 8 {
            return Err(IndexError::corrupt("vocabulary map truncated"));
        }
        let map = (0..count)
            .map(|i| {
                let p = 12 + i * 8;
                u64::from_le_bytes(map_bytes[p..p + 8].try_into().expect("sized"))
            })
            .collect::<Vec<_>>();

        // External store, present only when some word was externalised.
        let external_path = with_suffix(base, ".external");
        let external = if external_path.exists() {
            Some(ExternalVocabulary::open(&external_path)?)
        } else {
            None
        };

        Ok(Self {
            data_file,
            block_size,
            blocks,
            map,
            external,
            cache: Mutex::new(None),
        })
    }

    fn load_block(&self, block_id: u32) -> Result<Arc<Vec<String>>> {
        if let Some((cached_id, words)) = self.cache.lock().expect("cache poisoned").as_ref() {
            if *cached_id == block_id {
                return Ok(Arc::clone(words));
            }
        }
        let info = self
            .blocks
            .get(block_id as usize)
            .ok_or_else(|| IndexError::corrupt(format!("block {block_id} out of bounds")))?;
        let mut compressed = vec![0u8; info.data_len as usize];
        self.data_file.read_exact_at(&mut compressed, info.data_offset)?;
        let raw = zstd::decode_all(&compressed[..])
            .map_err(|e| IndexError::corrupt(format!("block {block_id}: zstd: {e}")))?;

        let mut words = Vec::with_capacity(info.word_count as usize);
        let mut pos = 0usize;
        for _ in 0..info.word_count {
            if pos + 4 > raw.len() {
                return Err(IndexError::corrupt("compressed block truncated"));
            }
            let len = u32::from_le_bytes(raw[pos..pos + 4].try_into().expect("sized")) as usize;
            pos += 4;
            if pos + len > raw.len() {
                return Err(IndexError::corrupt("compressed block entry truncated"));
            }
            let word = std::str::from_utf8(&raw[pos..pos + len])
                .map_err(|e| IndexError::corrupt(format!("compressed block: invalid UTF-8: {e}")))?;
            words.push(word.to_owned());
            pos += len;
        }
        let words = Arc::new(words);
        *self.cache.lock().expect("cache poisoned") = Some((block_id, Arc::clone(&words)));
        Ok(words)
    }

    /// First word of each block, for diagnostics and block-level seeks.
    pub fn block_first_words(&self) -> impl Iterator<Item = &str> {
        self.blocks.iter().map(|b| b.first_word.as_str())
    }
}

impl Vocabulary for CompressedVocabulary {
    fn size(&self) -> u64 {
        self.map.len() as u64
    }

    fn get(&self, index: u64) -> Result<String> {
        let slot = *self
            .map
            .get(index as usize)
            .ok_or_else(|| IndexError::corrupt(format!("vocabulary index {index} out of bounds")))?;
        let local = slot & !EXTERNAL_FLAG;
        if slot & EXTERNAL_FLAG != 0 {
            let external = self
                .external
                .as_ref()
                .ok_or_else(|| IndexError::corrupt("map references missing external store"))?;
            external.get(local)
        } else {
            let block_id = (local / self.block_size as u64) as u32;
            let in_block = (local % self.block_size as u64) as usize;
            let words = self.load_block(block_id)?;
            words.get(in_block).cloned().ok_or_else(|| {
                IndexError::corrupt(format!("word {in_block} missing from block {block_id}"))
            })
        }
    }

    fn lower_bound(&self, word: &str) -> u64 {
        binary_search_bound(self, word, false)
    }

    fn upper_bound(&self, word: &str) -> u64 {
        binary_search_bound(self, word, true)
    }
}

// ============================================================================
// Writer
// ============================================================================

/// Writer for the compressed vocabulary.
pub struct CompressedWordWriter {
    base: PathBuf,
    data_out: BufWriter<File>,
    data_pos: u64,
    block_size: u32,
    pending: Vec<String>,
    blocks: Vec<BlockInfo>,
    map: Vec<u64>,
    internal_count: u64,
    external_count: u64,
    external_writer: Option<ExternalWordWriter>,
    finished: bool,
}

impl CompressedWordWriter {
    pub fn create(base: &Path, block_size: u32) -> Result<Self> {
        assert!(block_size > 0, "block size must be positive");
        let data_out = BufWriter::new(File::create(with_suffix(base, ".blocks"))?);
        Ok(Self {
            base: base.to_owned(),
            data_out,
            data_pos: 0,
            block_size,
            pending: Vec::new(),
            blocks: Vec::new(),
            map: Vec::new(),
            internal_count: 0,
            external_count: 0,
            external_writer: None,
            finished: false,
        })
    }

    fn flush_block(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let mut raw = Vec::new();
        for word in &self.pending {
            raw.extend_from_slice(&(word.len() as u32).to_le_bytes());
            raw.extend_from_slice(word.as_bytes());
        }
        let compressed = zstd::encode_all(&raw[..], 3)
            .map_err(|e| IndexError::Io(std::io::Error::other(e)))?;
        self.data_out.write_all(&compressed)?;
        self.blocks.push(BlockInfo {
            word_count: self.pending.len() as u32,
            data_offset: self.data_pos,
            data_len: compressed.len() as u64,
            first_word: self.pending[0].clone(),
        });
        self.data_pos += compressed.len() as u64;
        self.pending.clear();
        Ok(())
    }
}

impl WordWriter for CompressedWordWriter {
    fn push(&mut self, word: &str, is_external: bool) -> Result<u64> {
        debug_assert!(!self.finished);
        let index = self.map.len() as u64;
        if is_external {
            let writer = match self.external_writer.as_mut() {
                Some(w) => w,
                None => {
                    let path = with_suffix(&self.base, ".external");
                    self.external_writer = Some(ExternalWordWriter::create(&path)?);
                    self.external_writer.as_mut().expect("just set")
                }
            };
            let local = writer.push(word, true)?;
            debug_assert_eq!(local, self.external_count);
            self.map.push(EXTERNAL_FLAG | self.external_count);
            self.external_count += 1;
        } else {
            self.pending.push(word.to_owned());
            self.map.push(self.internal_count);
            self.internal_count += 1;
            if self.pending.len() as u32 >= self.block_size {
                self.flush_block()?;
            }
        }
        Ok(index)
    }

    fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        self.flush_block()?;
        self.data_out.flush()?;

        // Block table
        let mut table = BufWriter::new(File::create(with_suffix(&self.base, ".blocktable"))?);
        table.write_all(&BLOCK_TABLE_MAGIC)?;
        table.write_all(&self.block_size.to_le_bytes())?;
        table.write_all(&(self.blocks.len() as u32).to_le_bytes())?;
        for block in &self.blocks {
            table.write_all(&block.word_count.to_le_bytes())?;
            table.write_all(&block.data_offset.to_le_bytes())?;
            table.write_all(&block.data_len.to_le_bytes())?;
            table.write_all(&(block.first_word.len() as u32).to_le_bytes())?;
            table.write_all(block.first_word.as_bytes())?;
        }
        table.flush()?;

        // Map
        let mut map_out = BufWriter::new(File::create(with_suffix(&self.base, ".map"))?);
        map_out.write_all(&MAP_MAGIC)?;
        map_out.write_all(&(self.map.len() as u64).to_le_bytes())?;
        for slot in &self.map {
            map_out.write_all(&slot.to_le_bytes())?;
        }
        map_out.flush()?;

        if let Some(mut ext) = self.external_writer.take() {
            ext.finish()?;
        }
        tracing::debug!(
            words = self.map.len(),
            blocks = self.blocks.len(),
            external = self.external_count,
            "finished compressed vocabulary"
        );
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn build(words: &[(&str, bool)], block_size: u32) -> (TempDir, CompressedVocabulary) {
        let dir = TempDir::new().unwrap();
        let base = dir.path().join("vocab");
        let mut writer = CompressedWordWriter::create(&base, block_size).unwrap();
        for (i, (word, external)) in words.iter().enumerate() {
            assert_eq!(writer.push(word, *external).unwrap(), i as u64);
        }
        writer.finish().unwrap();
        let vocab = CompressedVocabulary::open(&base).unwrap();
        (dir, vocab)
    }

    #[test]
    fn test_round_trip_multiple_blocks() {
        let words: Vec<String> = (0..25).map(|i| format!("word-{i:02}")).collect();
        let input: Vec<(&str, bool)> = words.iter().map(|w| (w.as_str(), false)).collect();
        let (_dir, vocab) = build(&input, 8);
        assert_eq!(vocab.size(), 25);
        for (i, word) in words.iter().enumerate() {
            assert_eq!(&vocab.get(i as u64).unwrap(), word);
        }
        assert_eq!(vocab.block_first_words().count(), 4);
    }

    #[test]
    fn test_external_words_bypass_blocks() {
        let long = "L".repeat(500);
        let input = [
            ("aaa", false),
            (long.as_str(), true),
            ("mmm", false),
            ("zzz", false),
        ];
        let (_dir, vocab) = build(&input, 2);
        assert_eq!(vocab.get(1).unwrap(), long);
        assert_eq!(vocab.get(3).unwrap(), "zzz");
    }

    #[test]
    fn test_bounds_across_blocks() {
        let words: Vec<String> = "abcdefghij".chars().map(|c| c.to_string()).collect();
        let input: Vec<(&str, bool)> = words.iter().map(|w| (w.as_str(), false)).collect();
        let (_dir, vocab) = build(&input, 3);
        assert_eq!(vocab.lower_bound("d"), 3);
        assert_eq!(vocab.upper_bound("d"), 4);
        assert_eq!(vocab.prefix_range("c"), (2, 3));
    }

    #[test]
    fn test_empty_vocabulary() {
        let (_dir, vocab) = build(&[], 4);
        assert_eq!(vocab.size(), 0);
        assert_eq!(vocab.lower_bound("anything"), 0);
    }
}
