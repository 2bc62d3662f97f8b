//! Observer trait for run events.
//!
//! Inject an `Arc<dyn PipelineObserver>` via
//! [`crate::config::ExtractionConfigBuilder::observer`] to watch a run:
//! progress bars, metrics, or persisting artifacts. Observers only watch;
//! nothing they do can change or fail the run.
//!
//! # Example
//!
//! ```rust
//! use submittal_extract::{ChunkResult, ExtractionConfig, PipelineObserver};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct Counter(AtomicUsize);
//!
//! impl PipelineObserver for Counter {
//!     fn on_chunk_complete(&self, result: &ChunkResult, total: usize) {
//!         let done = self.0.fetch_add(1, Ordering::SeqCst) + 1;
//!         eprintln!("chunk {} done ({done}/{total})", result.chunk_index);
//!     }
//! }
//!
//! let config = ExtractionConfig::builder()
//!     .observer(Arc::new(Counter(AtomicUsize::new(0))))
//!     .build()
//!     .unwrap();
//! ```

use crate::output::{ChunkResult, MergedResult};
use crate::pipeline::plan::{ChunkPlan, ChunkSpec};
use crate::pipeline::split::Chunk;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Receives run events. All methods default to no-ops.
///
/// With `concurrency > 1` the chunk-level methods may be called from
/// several tasks at once.
pub trait PipelineObserver: Send + Sync {
    /// Once, after planning.
    fn on_run_start(&self, plan: &ChunkPlan) {
        let _ = plan;
    }

    /// After the splitter produced a chunk. `file_name` follows the
    /// `{stem}_chunk_{NN}_pages_{start}-{end}` scheme.
    fn on_chunk_materialized(&self, chunk: &Chunk, file_name: &str) {
        let _ = (chunk, file_name);
    }

    /// Just before a chunk's first request.
    fn on_chunk_start(&self, spec: &ChunkSpec, total_chunks: usize) {
        let _ = (spec, total_chunks);
    }

    /// Every response body received, including ones that fail to parse.
    fn on_raw_response(&self, chunk_index: usize, attempt: u32, raw: &str) {
        let _ = (chunk_index, attempt, raw);
    }

    /// When a chunk has its final result, success or not.
    fn on_chunk_complete(&self, result: &ChunkResult, total_chunks: usize) {
        let _ = (result, total_chunks);
    }

    /// Once, with the merged result.
    fn on_run_complete(&self, result: &MergedResult) {
        let _ = result;
    }
}

/// Observer that ignores everything.
pub struct NoopObserver;

impl PipelineObserver for NoopObserver {}

/// Forwards each event to every inner observer in order.
#[derive(Default)]
pub struct Fanout {
    observers: Vec<Arc<dyn PipelineObserver>>,
}

impl Fanout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, observer: Arc<dyn PipelineObserver>) {
        self.observers.push(observer);
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

impl PipelineObserver for Fanout {
    fn on_run_start(&self, plan: &ChunkPlan) {
        self.observers.iter().for_each(|o| o.on_run_start(plan));
    }

    fn on_chunk_materialized(&self, chunk: &Chunk, file_name: &str) {
        self.observers
            .iter()
            .for_each(|o| o.on_chunk_materialized(chunk, file_name));
    }

    fn on_chunk_start(&self, spec: &ChunkSpec, total_chunks: usize) {
        self.observers
            .iter()
            .for_each(|o| o.on_chunk_start(spec, total_chunks));
    }

    fn on_raw_response(&self, chunk_index: usize, attempt: u32, raw: &str) {
        self.observers
            .iter()
            .for_each(|o| o.on_raw_response(chunk_index, attempt, raw));
    }

    fn on_chunk_complete(&self, result: &ChunkResult, total_chunks: usize) {
        self.observers
            .iter()
            .for_each(|o| o.on_chunk_complete(result, total_chunks));
    }

    fn on_run_complete(&self, result: &MergedResult) {
        self.observers.iter().for_each(|o| o.on_run_complete(result));
    }
}

/// Persists raw responses and chunk sub-documents under a directory.
///
/// Writes are best-effort: a failure is logged and the run goes on.
#[derive(Debug, Clone)]
pub struct DebugArtifactWriter {
    dir: PathBuf,
}

impl DebugArtifactWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `raw_response_chunk_{NN}_attempt_{A}.json`
    pub fn raw_response_file_name(chunk_index: usize, attempt: u32) -> String {
        format!("raw_response_chunk_{:02}_attempt_{}.json", chunk_index, attempt)
    }

    fn write(&self, file_name: &str, bytes: &[u8]) {
        let path = self.dir.join(file_name);
        let result = std::fs::create_dir_all(&self.dir).and_then(|_| std::fs::write(&path, bytes));
        match result {
            Ok(()) => debug!("Wrote debug artifact {}", path.display()),
            Err(e) => warn!("Could not write debug artifact {}: {}", path.display(), e),
        }
    }
}

impl PipelineObserver for DebugArtifactWriter {
    fn on_chunk_materialized(&self, chunk: &Chunk, file_name: &str) {
        self.write(file_name, chunk.as_bytes());
    }

    fn on_raw_response(&self, chunk_index: usize, attempt: u32, raw: &str) {
        self.write(&Self::raw_response_file_name(chunk_index, attempt), raw.as_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::split::ChunkContent;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Tracking {
        raw: AtomicUsize,
    }

    impl PipelineObserver for Tracking {
        fn on_raw_response(&self, _chunk_index: usize, _attempt: u32, _raw: &str) {
            self.raw.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_observer_compiles_and_runs() {
        let o = NoopObserver;
        o.on_raw_response(1, 1, "{}");
    }

    #[test]
    fn fanout_reaches_every_observer() {
        let a = Arc::new(Tracking { raw: AtomicUsize::new(0) });
        let b = Arc::new(Tracking { raw: AtomicUsize::new(0) });
        let mut fan = Fanout::new();
        fan.push(a.clone());
        fan.push(b.clone());
        fan.on_raw_response(2, 1, "{}");
        assert_eq!(a.raw.load(Ordering::SeqCst), 1);
        assert_eq!(b.raw.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn debug_writer_persists_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let writer = DebugArtifactWriter::new(dir.path().join("debug"));
        writer.on_raw_response(3, 2, "{\"bullets\": []}");
        let chunk = Chunk {
            spec: ChunkSpec {
                index: 3,
                start_page: 5,
                end_page: 6,
                estimated_tokens: 1060,
            },
            content: ChunkContent::Text("a\u{000C}b".into()),
        };
        writer.on_chunk_materialized(&chunk, "spec_chunk_03_pages_5-6.txt");

        let raw = std::fs::read_to_string(dir.path().join("debug/raw_response_chunk_03_attempt_2.json")).unwrap();
        assert_eq!(raw, "{\"bullets\": []}");
        assert!(dir.path().join("debug/spec_chunk_03_pages_5-6.txt").exists());
    }

    #[test]
    fn debug_writer_failure_is_swallowed() {
        let file = tempfile::NamedTempFile::new().unwrap();
        // A file where a directory is expected.
        let writer = DebugArtifactWriter::new(file.path().join("sub"));
        writer.on_raw_response(1, 1, "x");
    }
}
