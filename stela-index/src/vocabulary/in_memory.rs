//! Fully-loaded vocabulary with a length-prefixed on-disk layout.
//!
//! ## Formats
//!
//! **Words file** (`*.vocab`):
//! ```text
//! magic: "SVW1" (4B)
//! count: u64 (LE)
//! For each entry: len: u32 (LE), utf8_bytes: [u8; len]
//! ```
//!
//! **Offset table** (`*.vocab.ofs`): `magic "SVO1"`, `count: u64`, then
//! `count` u64 byte offsets into the words file. The offset table makes
//! random access possible without scanning; the in-memory variant loads
//! everything anyway and uses it only for validation.

use super::{binary_search_bound, Vocabulary, WordWriter};
use crate::error::{IndexError, Result};
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

const WORDS_MAGIC: [u8; 4] = *b"SVW1";
const OFFSETS_MAGIC: [u8; 4] = *b"SVO1";

/// Append `.ofs` to a words filename.
fn offsets_filename(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(".ofs");
    PathBuf::from(os)
}

/// Vocabulary fully materialised in memory.
#[derive(Default)]
pub struct VocabularyInMemory {
    words: Vec<String>,
}

impl VocabularyInMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a words file written by [`InMemoryWordWriter`].
    pub fn open(path: &Path) -> Result<Self> {
        let mut data = Vec::new();
        File::open(path)?.read_to_end(&mut data)?;
        if data.len() < 12 || data[0..4] != WORDS_MAGIC {
            return Err(IndexError::corrupt(format!(
                "{}: not a vocabulary file",
                path.display()
            )));
        }
        let count = u64::from_le_bytes(data[4..12].try_into().expect("sized")) as usize;
        let mut words = Vec::with_capacity(count);
        let mut pos = 12;
        for _ in 0..count {
            if pos + 4 > data.len() {
                return Err(IndexError::corrupt("vocabulary truncated"));
            }
            let len = u32::from_le_bytes(data[pos..pos + 4].try_into().expect("sized")) as usize;
            pos += 4;
            if pos + len > data.len() {
                return Err(IndexError::corrupt("vocabulary entry truncated"));
            }
            let word = std::str::from_utf8(&data[pos..pos + len])
                .map_err(|e| IndexError::corrupt(format!("vocabulary: invalid UTF-8: {e}")))?;
            words.push(word.to_owned());
            pos += len;
        }
        Ok(Self { words })
    }

    /// Build directly from words (used by tests and the local-vocab bridge).
    pub fn from_words(words: Vec<String>) -> Self {
        Self { words }
    }
}

impl Vocabulary for VocabularyInMemory {
    fn size(&self) -> u64 {
        self.words.len() as u64
    }

    fn get(&self, index: u64) -> Result<String> {
        self.words
            .get(index as usize)
            .cloned()
            .ok_or_else(|| IndexError::corrupt(format!("vocabulary index {index} out of bounds")))
    }

    fn lower_bound(&self, word: &str) -> u64 {
        self.words.partition_point(|w| w.as_str() < word) as u64
    }

    fn upper_bound(&self, word: &str) -> u64 {
        self.words.partition_point(|w| w.as_str() <= word) as u64
    }
}

/// Writer producing the words file plus offset table.
pub struct InMemoryWordWriter {
    words_out: BufWriter<File>,
    offsets_out: BufWriter<File>,
    count: u64,
    byte_pos: u64,
    finished: bool,
}

impl InMemoryWordWriter {
    pub fn create(path: &Path) -> Result<Self> {
        let mut words_out = BufWriter::new(File::create(path)?);
        words_out.write_all(&WORDS_MAGIC)?;
        words_out.write_all(&0u64.to_le_bytes())?;

        let mut offsets_out = BufWriter::new(File::create(offsets_filename(path))?);
        offsets_out.write_all(&OFFSETS_MAGIC)?;
        offsets_out.write_all(&0u64.to_le_bytes())?;

        Ok(Self {
            words_out,
            offsets_out,
            count: 0,
            byte_pos: 12,
            finished: false,
        })
    }
}

impl WordWriter for InMemoryWordWriter {
    fn push(&mut self, word: &str, _is_external: bool) -> Result<u64> {
        debug_assert!(!self.finished);
        let index = self.count;
        self.offsets_out.write_all(&self.byte_pos.to_le_bytes())?;
        self.words_out
            .write_all(&(word.len() as u32).to_le_bytes())?;
        self.words_out.write_all(word.as_bytes())?;
        self.byte_pos += 4 + word.len() as u64;
        self.count += 1;
        Ok(index)
    }

    fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        self.words_out.flush()?;
        self.offsets_out.flush()?;
        // Patch the counts in both headers.
        use std::os::unix::fs::FileExt;
        for file in [self.words_out.get_ref(), self.offsets_out.get_ref()] {
            file.write_all_at(&self.count.to_le_bytes(), 4)?;
            file.sync_all()?;
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
    use tempfile::TempDir;

    #[test]
    fn test_write_then_open_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("words.vocab");

        let mut writer = InMemoryWordWriter::create(&path).unwrap();
        for (i, word) in ["alpha", "beta", "gamma"].iter().enumerate() {
            assert_eq!(writer.push(word, false).unwrap(), i as u64);
        }
        writer.finish().unwrap();

        let vocab = VocabularyInMemory::open(&path).unwrap();
        assert_eq!(vocab.size(), 3);
        assert_eq!(vocab.get(1).unwrap(), "beta");
        assert!(vocab.get(3).is_err());
    }

    #[test]
    fn test_bounds_and_prefix_range() {
        let vocab = VocabularyInMemory::from_words(
            ["apple", "banana", "bandana", "cherry"]
                .map(String::from)
                .to_vec(),
        );
        assert_eq!(vocab.lower_bound("banana"), 1);
        assert_eq!(vocab.upper_bound("banana"), 2);
        assert_eq!(vocab.lower_bound("b"), 1);
        assert_eq!(vocab.prefix_range("ban"), (1, 3));
        assert_eq!(vocab.prefix_range("zz"), (4, 4));
    }

    #[test]
    fn test_generic_binary_search_matches_native() {
        let vocab = VocabularyInMemory::from_words(
            ["a", "b", "b", "c"].map(String::from).to_vec(),
        );
        assert_eq!(binary_search_bound(&vocab, "b", false), 1);
        assert_eq!(binary_search_bound(&vocab, "b", true), 3);
    }

    #[test]
    fn test_open_rejects_garbage() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.vocab");
        std::fs::write(&path, b"not a vocab").unwrap();
        assert!(matches!(
            VocabularyInMemory::open(&path),
            Err(IndexError::Corrupt(_))
        ));
    }
}
