//! Vocabulary for WKT literals with a precomputed geometry-info sidecar.
//!
//! A [`GeoVocabulary`] stores its words like any other vocabulary and
//! additionally maintains a fixed-stride sidecar file: for string index `i`,
//! byte offset `header + i * stride` holds the serialized
//! [`GeometryInfo`] record, or the all-zero sentinel for an invalid
//! geometry. The sidecar is produced during the bulk build by a three-stage
//! pipeline ([`GeoWordWriter`]) that parses WKT on worker threads while
//! guaranteeing on-disk records end up in insertion order.

use super::{Vocabulary, WordWriter};
use crate::error::{IndexError, Result};
use crate::geometry::{GeometryInfo, GEOMETRY_INFO_VERSION, GEO_INFO_STRIDE, INVALID_GEO_INFO};
use stela_core::{BoundedQueue, EngineConfig};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

/// Filename suffix for the geometry information file.
const GEO_INFO_SUFFIX: &str = ".geoinfo";

/// Size of the version header at the start of the sidecar.
const GEO_INFO_HEADER: u64 = 4;

/// Construct the sidecar filename for a vocabulary base path.
pub fn geo_info_filename(base: &Path) -> PathBuf {
    let mut os = base.as_os_str().to_owned();
    os.push(GEO_INFO_SUFFIX);
    PathBuf::from(os)
}

// ============================================================================
// GeoVocabulary
// ============================================================================

/// A vocabulary of WKT literals plus their precomputed geometry info.
pub struct GeoVocabulary<V> {
    literals: V,
    geo_info_file: File,
}

impl<V> std::fmt::Debug for GeoVocabulary<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeoVocabulary").finish_non_exhaustive()
    }
}

impl<V: Vocabulary> GeoVocabulary<V> {
    /// Wrap an already-opened literal vocabulary and open the sidecar,
    /// checking its version word.
    pub fn open_with(literals: V, base: &Path) -> Result<Self> {
        let path = geo_info_filename(base);
        let geo_info_file = File::open(&path)?;

        let mut version_buf = [0u8; GEO_INFO_HEADER as usize];
        geo_info_file.read_exact_at(&mut version_buf, 0)?;
        let version = u32::from_le_bytes(version_buf);
        if version != GEOMETRY_INFO_VERSION {
            return Err(IndexError::VersionMismatch(format!(
                "The geometry info version of {} is {version}, which is incompatible with \
                 version {GEOMETRY_INFO_VERSION} as required by this version of stela. \
                 Please rebuild your index.",
                path.display()
            )));
        }
        Ok(Self {
            literals,
            geo_info_file,
        })
    }

    /// Load the precomputed geometry info for the literal with the given
    /// index. Returns `None` for invalid geometries.
    ///
    /// This is a pure function of the on-disk bytes: the all-zero record is
    /// the invalid sentinel, everything else decodes to a record
    /// ([`GeometryInfo`] guarantees no valid record is all-zero).
    pub fn get_geo_info(&self, index: u64) -> Result<Option<GeometryInfo>> {
        assert!(index < self.size(), "geo info index out of bounds");
        let mut buf = [0u8; GEO_INFO_STRIDE];
        self.geo_info_file
            .read_exact_at(&mut buf, GEO_INFO_HEADER + index * GEO_INFO_STRIDE as u64)?;
        if buf == INVALID_GEO_INFO {
            return Ok(None);
        }
        GeometryInfo::from_bytes(&buf)
            .map(Some)
            .ok_or_else(|| IndexError::corrupt(format!("geometry info record {index} is invalid")))
    }

    /// Access the underlying literal vocabulary.
    pub fn underlying(&self) -> &V {
        &self.literals
    }
}

impl<V: Vocabulary> Vocabulary for GeoVocabulary<V> {
    fn size(&self) -> u64 {
        self.literals.size()
    }

    fn get(&self, index: u64) -> Result<String> {
        self.literals.get(index)
    }

    fn lower_bound(&self, word: &str) -> u64 {
        self.literals.lower_bound(word)
    }

    fn upper_bound(&self, word: &str) -> u64 {
        self.literals.upper_bound(word)
    }
}

// ============================================================================
// GeoWordWriter
// ============================================================================

/// Counters reported by the writer thread after a build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GeoWriterStats {
    /// Literals whose WKT failed to parse (sentinel written).
    pub invalid_geometries: u64,
    /// Areal geometries whose metric area could not be computed.
    pub invalid_polygon_areas: u64,
    /// Total records written (equals the vocabulary size).
    pub records_written: u64,
}

struct WorkItem {
    index: u64,
    word: String,
}

struct ResultState {
    results: BTreeMap<u64, Option<GeometryInfo>>,
    done_processing: bool,
}

struct Pipeline {
    state: Mutex<ResultState>,
    result_ready: Condvar,
}

/// Word writer that precomputes geometry info in parallel.
///
/// Three stages connected by bounded queues:
/// 1. the caller thread assigns the next index and enqueues the raw word
///    (blocking while the work queue is full);
/// 2. worker threads parse WKT and publish `{index, Option<GeometryInfo>}`
///    into a result map;
/// 3. a single writer thread writes records strictly in index order, using
///    the all-zero sentinel for invalid geometries.
///
/// On-disk order therefore equals insertion order regardless of worker
/// completion order.
pub struct GeoWordWriter<W: WordWriter> {
    underlying: W,
    queue: Arc<BoundedQueue<WorkItem>>,
    pipeline: Arc<Pipeline>,
    workers: Vec<JoinHandle<()>>,
    writer: Option<JoinHandle<std::io::Result<GeoWriterStats>>>,
    stats: GeoWriterStats,
    finished: bool,
}

impl<W: WordWriter> GeoWordWriter<W> {
    /// Open the sidecar (writing its version header) and start the worker
    /// and writer threads.
    pub fn create(underlying: W, base: &Path, config: &EngineConfig) -> Result<Self> {
        let file = File::create(geo_info_filename(base))?;
        let mut out = BufWriter::new(file);
        out.write_all(&GEOMETRY_INFO_VERSION.to_le_bytes())?;

        let queue = Arc::new(BoundedQueue::<WorkItem>::new(config.queue_capacity as usize));
        let pipeline = Arc::new(Pipeline {
            state: Mutex::new(ResultState {
                results: BTreeMap::new(),
                done_processing: false,
            }),
            result_ready: Condvar::new(),
        });

        let workers = (0..config.effective_worker_count())
            .map(|_| {
                let queue = Arc::clone(&queue);
                let pipeline = Arc::clone(&pipeline);
                std::thread::spawn(move || {
                    while let Some(item) = queue.pop() {
                        let info = GeometryInfo::from_wkt_literal(&item.word);
                        let mut state = pipeline.state.lock().expect("pipeline lock poisoned");
                        state.results.insert(item.index, info);
                        drop(state);
                        pipeline.result_ready.notify_one();
                    }
                })
            })
            .collect();

        let writer = {
            let pipeline = Arc::clone(&pipeline);
            std::thread::spawn(move || write_records_in_order(&pipeline, out))
        };

        Ok(Self {
            underlying,
            queue,
            pipeline,
            workers,
            writer: Some(writer),
            stats: GeoWriterStats::default(),
            finished: false,
        })
    }

    /// Counters from the writer thread. Meaningful after [`Self::finish`].
    pub fn stats(&self) -> GeoWriterStats {
        self.stats
    }
}

/// Writer-thread body: await the next-in-sequence index, write its record
/// (or the sentinel), advance. Exits once producers are done and the map
/// has drained.
fn write_records_in_order(
    pipeline: &Pipeline,
    mut out: BufWriter<File>,
) -> std::io::Result<GeoWriterStats> {
    let mut stats = GeoWriterStats::default();
    let mut next: u64 = 0;
    let mut state = pipeline.state.lock().expect("pipeline lock poisoned");
    loop {
        while !state.done_processing && !state.results.contains_key(&next) {
            state = pipeline
                .result_ready
                .wait(state)
                .expect("pipeline lock poisoned");
        }

        while let Some(info) = state.results.remove(&next) {
            match &info {
                Some(info) => {
                    if !info.area_is_valid() {
                        stats.invalid_polygon_areas += 1;
                    }
                    out.write_all(&info.to_bytes())?;
                }
                None => {
                    stats.invalid_geometries += 1;
                    out.write_all(&INVALID_GEO_INFO)?;
                }
            }
            stats.records_written += 1;
            next += 1;
        }

        if state.done_processing && state.results.is_empty() {
            break;
        }
    }
    drop(state);
    out.flush()?;
    out.get_ref().sync_all()?;
    Ok(stats)
}

impl<W: WordWriter> WordWriter for GeoWordWriter<W> {
    /// Add the next literal, returning its index synchronously. Geometry
    /// preprocessing happens on the worker threads.
    fn push(&mut self, word: &str, is_external: bool) -> Result<u64> {
        debug_assert!(!self.finished, "push after finish");
        let index = self.underlying.push(word, is_external)?;
        self.queue.push(WorkItem {
            index,
            word: word.to_owned(),
        });
        Ok(index)
    }

    /// Close the work queue, drain all stages, join the threads and finish
    /// the underlying writer. Calling `finish` twice is a no-op.
    fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;

        self.queue.close();
        for worker in self.workers.drain(..) {
            worker
                .join()
                .map_err(|_| IndexError::corrupt("geometry worker thread panicked"))?;
        }

        {
            let mut state = self.pipeline.state.lock().expect("pipeline lock poisoned");
            state.done_processing = true;
        }
        self.pipeline.result_ready.notify_all();

        let writer = self.writer.take().expect("writer thread missing");
        self.stats = writer
            .join()
            .map_err(|_| IndexError::corrupt("geometry writer thread panicked"))??;

        self.underlying.finish()?;

        if self.stats.invalid_geometries > 0 {
            tracing::warn!(
                count = self.stats.invalid_geometries,
                "geometry preprocessing skipped invalid WKT literals"
            );
        }
        if self.stats.invalid_polygon_areas > 0 {
            tracing::warn!(
                count = self.stats.invalid_polygon_areas,
                "geometry preprocessing could not compute the area of malformed polygons"
            );
        }
        Ok(())
    }
}

impl<W: WordWriter> Drop for GeoWordWriter<W> {
    fn drop(&mut self) {
        if !self.finished {
            // Dropping without finishing would leak a partial sidecar file.
            // There is no way to report an error from here, so a failure on
            // this path is fatal.
            if let Err(e) = self.finish() {
                tracing::error!(error = %e, "finishing geo vocabulary writer during drop failed");
                std::process::abort();
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vocabulary::{InMemoryWordWriter, VocabularyInMemory};
    use tempfile::TempDir;

    fn build(words: &[&str]) -> (TempDir, GeoVocabulary<VocabularyInMemory>, GeoWriterStats) {
        let dir = TempDir::new().unwrap();
        let base = dir.path().join("geo.vocab");
        let config = EngineConfig {
            worker_count: 4,
            queue_capacity: 8,
            ..Default::default()
        };
        let underlying = InMemoryWordWriter::create(&base).unwrap();
        let mut writer = GeoWordWriter::create(underlying, &base, &config).unwrap();
        for (i, word) in words.iter().enumerate() {
            assert_eq!(writer.push(word, false).unwrap(), i as u64);
        }
        writer.finish().unwrap();
        let stats = writer.stats();
        drop(writer);

        let literals = VocabularyInMemory::open(&base).unwrap();
        let vocab = GeoVocabulary::open_with(literals, &base).unwrap();
        (dir, vocab, stats)
    }

    #[test]
    fn test_records_in_insertion_order() {
        let words = [
            "POINT(1 1)",
            "garbage",
            "POLYGON((0 0, 1 0, 1 1, 0 1, 0 0))",
            "POINT(2 2)",
        ];
        let (_dir, vocab, stats) = build(&words);
        assert_eq!(vocab.size(), 4);
        assert_eq!(stats.records_written, 4);
        assert_eq!(stats.invalid_geometries, 1);

        for (i, word) in words.iter().enumerate() {
            let expected = GeometryInfo::from_wkt_literal(word);
            assert_eq!(vocab.get_geo_info(i as u64).unwrap(), expected, "index {i}");
            assert_eq!(vocab.get(i as u64).unwrap(), *word);
        }
    }

    #[test]
    fn test_finish_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let base = dir.path().join("geo.vocab");
        let config = EngineConfig::default();
        let underlying = InMemoryWordWriter::create(&base).unwrap();
        let mut writer = GeoWordWriter::create(underlying, &base, &config).unwrap();
        writer.push("POINT(0 0)", false).unwrap();
        writer.finish().unwrap();
        writer.finish().unwrap();
        assert_eq!(writer.stats().records_written, 1);
    }

    #[test]
    fn test_version_mismatch_refused() {
        let dir = TempDir::new().unwrap();
        let base = dir.path().join("geo.vocab");
        let config = EngineConfig::default();
        let underlying = InMemoryWordWriter::create(&base).unwrap();
        let mut writer = GeoWordWriter::create(underlying, &base, &config).unwrap();
        writer.push("POINT(0 0)", false).unwrap();
        writer.finish().unwrap();
        drop(writer);

        // Corrupt the version word.
        let sidecar = geo_info_filename(&base);
        let mut bytes = std::fs::read(&sidecar).unwrap();
        bytes[0] = 0xFF;
        std::fs::write(&sidecar, bytes).unwrap();

        let literals = VocabularyInMemory::open(&base).unwrap();
        let err = GeoVocabulary::open_with(literals, &base).unwrap_err();
        match err {
            IndexError::VersionMismatch(msg) => {
                assert!(msg.contains("rebuild"), "message should instruct a rebuild")
            }
            other => panic!("expected version mismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_invalid_polygon_area_counted() {
        // A valid linestring and a polygon; linestrings have area 0.0
        // (valid), so only genuinely broken areal geometries count.
        let (_dir, _vocab, stats) = build(&[
            "LINESTRING(0 0, 1 1)",
            "POLYGON((0 0, 1 0, 1 1, 0 1, 0 0))",
        ]);
        assert_eq!(stats.invalid_polygon_areas, 0);
        assert_eq!(stats.invalid_geometries, 0);
    }
}
