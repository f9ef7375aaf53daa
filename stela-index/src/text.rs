//! Full-text index over literal objects.
//!
//! Maps words to postings of `(text record, entity, score)`. A text record
//! is one indexed literal; the entities of a record are the subjects (and
//! the literal itself) it was attached to. Prefix queries (`word*`) resolve
//! to an ordered-map range over the word dictionary.
//!
//! ## Format (`text.idx`)
//!
//! ```text
//! magic: "STX1" (4B), version: u32 (LE)
//! record_count: u64, records: [content_id u64]
//! word_count: u64
//! per word: len u32, utf8 bytes,
//!           posting_count u32, postings: [record u64, entity u64, score f32]
//! ```

use crate::error::{IndexError, Result};
use stela_core::ValueId;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::ops::Bound;
use std::path::Path;

const TEXT_MAGIC: [u8; 4] = *b"STX1";

/// Format version of the text index file.
pub const TEXT_INDEX_VERSION: u32 = 1;

/// One posting: a word occurrence linking a text record to an entity.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Posting {
    pub text_record: u64,
    pub entity: ValueId,
    pub score: f32,
}

/// In-memory text index; built once, then immutable.
#[derive(Default)]
pub struct TextIndex {
    /// Text record id -> the literal's global vocabulary id.
    records: Vec<ValueId>,
    /// Word -> postings sorted by (text_record, entity).
    postings: BTreeMap<String, Vec<Posting>>,
}

impl TextIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of text records.
    pub fn record_count(&self) -> u64 {
        self.records.len() as u64
    }

    /// The literal content id of a text record.
    pub fn record_content(&self, text_record: u64) -> Option<ValueId> {
        self.records.get(text_record as usize).copied()
    }

    /// Index one literal: `content_id` is the literal's vocabulary id,
    /// `entities` are the ids this record is attached to. Returns the new
    /// text record id.
    pub fn add_record(&mut self, content_id: ValueId, entities: &[ValueId], text: &str) -> u64 {
        let record = self.records.len() as u64;
        self.records.push(content_id);

        let mut frequencies: BTreeMap<String, u32> = BTreeMap::new();
        for word in tokenize(text) {
            *frequencies.entry(word).or_insert(0) += 1;
        }
        for (word, count) in frequencies {
            let list = self.postings.entry(word).or_default();
            for &entity in entities {
                list.push(Posting {
                    text_record: record,
                    entity,
                    score: count as f32,
                });
            }
        }
        record
    }

    /// Postings for a word, supporting a trailing `*` prefix wildcard.
    /// The result is sorted by (text_record, entity) and free of duplicate
    /// (record, entity) pairs (scores of merged prefix matches add up).
    pub fn postings_for(&self, word: &str) -> Vec<Posting> {
        let (needle, is_prefix) = split_prefix(word);
        let needle = needle.to_lowercase();
        let mut merged: BTreeMap<(u64, ValueId), f32> = BTreeMap::new();
        if is_prefix {
            let range = self
                .postings
                .range::<str, _>((Bound::Included(needle.as_str()), Bound::Unbounded));
            for (w, list) in range {
                if !w.starts_with(&needle) {
                    break;
                }
                for p in list {
                    *merged.entry((p.text_record, p.entity)).or_insert(0.0) += p.score;
                }
            }
        } else if let Some(list) = self.postings.get(&needle) {
            for p in list {
                *merged.entry((p.text_record, p.entity)).or_insert(0.0) += p.score;
            }
        }
        merged
            .into_iter()
            .map(|((text_record, entity), score)| Posting {
                text_record,
                entity,
                score,
            })
            .collect()
    }

    /// Check whether any record matches the word (or prefix).
    pub fn word_is_known(&self, word: &str) -> bool {
        let (needle, is_prefix) = split_prefix(word);
        let needle = needle.to_lowercase();
        if is_prefix {
            self.postings
                .range::<str, _>((Bound::Included(needle.as_str()), Bound::Unbounded))
                .next()
                .is_some_and(|(w, _)| w.starts_with(&needle))
        } else {
            self.postings.contains_key(&needle)
        }
    }

    // ------------------------------------------------------------------
    // Serialization
    // ------------------------------------------------------------------

    pub fn write(&self, path: &Path) -> Result<()> {
        let mut out = BufWriter::new(File::create(path)?);
        out.write_all(&TEXT_MAGIC)?;
        out.write_all(&TEXT_INDEX_VERSION.to_le_bytes())?;
        out.write_all(&(self.records.len() as u64).to_le_bytes())?;
        for record in &self.records {
            out.write_all(&record.as_u64().to_le_bytes())?;
        }
        out.write_all(&(self.postings.len() as u64).to_le_bytes())?;
        for (word, list) in &self.postings {
            out.write_all(&(word.len() as u32).to_le_bytes())?;
            out.write_all(word.as_bytes())?;
            out.write_all(&(list.len() as u32).to_le_bytes())?;
            for p in list {
                out.write_all(&p.text_record.to_le_bytes())?;
                out.write_all(&p.entity.as_u64().to_le_bytes())?;
                out.write_all(&p.score.to_le_bytes())?;
            }
        }
        out.flush()?;
        Ok(())
    }

    pub fn open(path: &Path) -> Result<Self> {
        let mut data = Vec::new();
        File::open(path)?.read_to_end(&mut data)?;
        let mut cursor = Cursor::new(&data);
        if cursor.take(4)? != &TEXT_MAGIC[..] {
            return Err(IndexError::corrupt(format!(
                "{}: not a text index",
                path.display()
            )));
        }
        let version = u32::from_le_bytes(cursor.take(4)?.try_into().expect("sized"));
        if version != TEXT_INDEX_VERSION {
            return Err(IndexError::VersionMismatch(format!(
                "The text index {} has version {version}, which is incompatible with version \
                 {TEXT_INDEX_VERSION} as required by this version of stela. Please rebuild \
                 your index.",
                path.display()
            )));
        }

        let record_count = u64::from_le_bytes(cursor.take(8)?.try_into().expect("sized"));
        let mut records = Vec::with_capacity(record_count as usize);
        for _ in 0..record_count {
            records.push(ValueId::from_u64(u64::from_le_bytes(
                cursor.take(8)?.try_into().expect("sized"),
            )));
        }

        let word_count = u64::from_le_bytes(cursor.take(8)?.try_into().expect("sized"));
        let mut postings = BTreeMap::new();
        for _ in 0..word_count {
            let len = u32::from_le_bytes(cursor.take(4)?.try_into().expect("sized")) as usize;
            let word = std::str::from_utf8(cursor.take(len)?)
                .map_err(|e| IndexError::corrupt(format!("text index: invalid UTF-8: {e}")))?
                .to_owned();
            let posting_count =
                u32::from_le_bytes(cursor.take(4)?.try_into().expect("sized")) as usize;
            let mut list = Vec::with_capacity(posting_count);
            for _ in 0..posting_count {
                let text_record = u64::from_le_bytes(cursor.take(8)?.try_into().expect("sized"));
                let entity = ValueId::from_u64(u64::from_le_bytes(
                    cursor.take(8)?.try_into().expect("sized"),
                ));
                let score = f32::from_le_bytes(cursor.take(4)?.try_into().expect("sized"));
                list.push(Posting {
                    text_record,
                    entity,
                    score,
                });
            }
            postings.insert(word, list);
        }
        Ok(Self { records, postings })
    }
}

/// Bounds-checked byte cursor for deserialization.
struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.pos + n > self.data.len() {
            return Err(IndexError::corrupt("text index truncated"));
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }
}

/// Split a trailing `*` wildcard off a query word.
fn split_prefix(word: &str) -> (&str, bool) {
    match word.strip_suffix('*') {
        Some(prefix) => (prefix, true),
        None => (word, false),
    }
}

/// Lowercased alphanumeric tokens.
fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
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

    fn sample_index() -> TextIndex {
        let mut index = TextIndex::new();
        index.add_record(vid(10), &[vid(1)], "he failed the test");
        index.add_record(vid(11), &[vid(1)], "testing can help");
        index.add_record(vid(12), &[vid(1)], "some other sentence");
        index.add_record(vid(13), &[vid(2)], "the test on friday was really hard");
        index
    }

    #[test]
    fn test_exact_word() {
        let index = sample_index();
        let postings = index.postings_for("test");
        let records: Vec<u64> = postings.iter().map(|p| p.text_record).collect();
        assert_eq!(records, vec![0, 3]);
    }

    #[test]
    fn test_prefix_word() {
        let index = sample_index();
        let postings = index.postings_for("test*");
        let records: Vec<u64> = postings.iter().map(|p| p.text_record).collect();
        // "test" and "testing" match; records in index order.
        assert_eq!(records, vec![0, 1, 3]);
    }

    #[test]
    fn test_word_is_known() {
        let index = sample_index();
        assert!(index.word_is_known("sentence"));
        assert!(index.word_is_known("t*"));
        assert!(!index.word_is_known("absent"));
        assert!(!index.word_is_known("absent*"));
    }

    #[test]
    fn test_tokenization_is_case_insensitive() {
        let mut index = TextIndex::new();
        index.add_record(vid(1), &[vid(5)], "Hello WORLD");
        assert!(index.word_is_known("hello"));
        assert!(index.word_is_known("world"));
    }

    #[test]
    fn test_score_counts_occurrences() {
        let mut index = TextIndex::new();
        index.add_record(vid(1), &[vid(5)], "rose is a rose is a rose");
        let postings = index.postings_for("rose");
        assert_eq!(postings.len(), 1);
        assert_eq!(postings[0].score, 3.0);
    }

    #[test]
    fn test_file_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("text.idx");
        let index = sample_index();
        index.write(&path).unwrap();
        let restored = TextIndex::open(&path).unwrap();
        assert_eq!(restored.record_count(), 4);
        assert_eq!(restored.postings_for("test*"), index.postings_for("test*"));
        assert_eq!(restored.record_content(2), Some(vid(12)));
    }

    #[test]
    fn test_version_mismatch() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("text.idx");
        sample_index().write(&path).unwrap();
        let mut bytes = std::fs::read(&path).unwrap();
        bytes[4] = 0x7F;
        std::fs::write(&path, bytes).unwrap();
        assert!(matches!(
            TextIndex::open(&path),
            Err(IndexError::VersionMismatch(_))
        ));
    }
}
