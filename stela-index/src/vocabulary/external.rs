//! On-demand vocabulary backed by positioned reads.
//!
//! Shares the on-disk layout of [`super::VocabularyInMemory`] (words file +
//! offset table) but keeps only the offset table in memory; word bytes are
//! read on demand with `pread`, so random reads are thread-safe without a
//! lock. This is where strings above the externalisation threshold live.

use super::{binary_search_bound, InMemoryWordWriter, Vocabulary};
use crate::error::{IndexError, Result};
use std::fs::File;
use std::io::Read;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

const OFFSETS_MAGIC: [u8; 4] = *b"SVO1";

fn offsets_filename(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(".ofs");
    PathBuf::from(os)
}

/// Vocabulary whose words stay on disk until accessed.
pub struct ExternalVocabulary {
    file: File,
    offsets: Vec<u64>,
}

impl ExternalVocabulary {
    /// Open a words file and its offset table.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;

        let mut table = Vec::new();
        File::open(offsets_filename(path))?.read_to_end(&mut table)?;
        if table.len() < 12 || table[0..4] != OFFSETS_MAGIC {
            return Err(IndexError::corrupt(format!(
                "{}: not an offset table",
                offsets_filename(path).display()
            )));
        }
        let count = u64::from_le_bytes(table[4..12].try_into().expect("sized")) as usize;
        if table.len() < 12 + count * 8 {
            return Err(IndexError::corrupt("offset table truncated"));
        }
        let offsets = (0..count)
            .map(|i| {
                let pos = 12 + i * 8;
                u64::from_le_bytes(table[pos..pos + 8].try_into().expect("sized"))
            })
            .collect();

        Ok(Self { file, offsets })
    }
}

impl Vocabulary for ExternalVocabulary {
    fn size(&self) -> u64 {
        self.offsets.len() as u64
    }

    fn get(&self, index: u64) -> Result<String> {
        let offset = *self
            .offsets
            .get(index as usize)
            .ok_or_else(|| IndexError::corrupt(format!("external index {index} out of bounds")))?;
        let mut len_buf = [0u8; 4];
        self.file.read_exact_at(&mut len_buf, offset)?;
        let len = u32::from_le_bytes(len_buf) as usize;
        let mut word = vec![0u8; len];
        self.file.read_exact_at(&mut word, offset + 4)?;
        String::from_utf8(word)
            .map_err(|e| IndexError::corrupt(format!("external vocabulary: invalid UTF-8: {e}")))
    }

    fn lower_bound(&self, word: &str) -> u64 {
        binary_search_bound(self, word, false)
    }

    fn upper_bound(&self, word: &str) -> u64 {
        binary_search_bound(self, word, true)
    }
}

/// Writer for the external words file. The format is shared with the
/// in-memory vocabulary, so the plain writer does the job.
pub type ExternalWordWriter = InMemoryWordWriter;

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vocabulary::WordWriter;
    use tempfile::TempDir;

    #[test]
    fn test_on_demand_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ext.vocab");

        let mut writer = ExternalWordWriter::create(&path).unwrap();
        let long_word = "x".repeat(1000);
        for word in ["aaa", long_word.as_str(), "zzz"] {
            writer.push(word, true).unwrap();
        }
        writer.finish().unwrap();

        let vocab = ExternalVocabulary::open(&path).unwrap();
        assert_eq!(vocab.size(), 3);
        assert_eq!(vocab.get(0).unwrap(), "aaa");
        assert_eq!(vocab.get(1).unwrap(), long_word);
        assert_eq!(vocab.get(2).unwrap(), "zzz");
        assert!(vocab.get(3).is_err());
    }

    #[test]
    fn test_concurrent_reads() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ext.vocab");

        let mut writer = ExternalWordWriter::create(&path).unwrap();
        for i in 0..100 {
            writer.push(&format!("word-{i:03}"), true).unwrap();
        }
        writer.finish().unwrap();

        let vocab = std::sync::Arc::new(ExternalVocabulary::open(&path).unwrap());
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let vocab = std::sync::Arc::clone(&vocab);
                std::thread::spawn(move || {
                    for i in (t..100).step_by(4) {
                        assert_eq!(vocab.get(i as u64).unwrap(), format!("word-{i:03}"));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
    }
}
