//! Whole-document extraction entry points.
//!
//! [`extract_document`] is the orchestrator: it plans the run, splits the
//! document when the plan has more than one chunk, drives the extraction
//! client over every chunk and merges the results. The other functions wrap
//! it for file paths, in-memory bytes, blocking callers and JSON output.
//!
//! ## Cost ceiling
//!
//! Run totals are accumulated in one place, the loop that receives chunk
//! results. After each result the running cost is compared with
//! `cost_ceiling`; once it is exceeded a shared flag stops further
//! dispatch. Requests already in flight are allowed to finish and their
//! results are kept. Chunks that never ran come back as `NotAttempted`
//! gaps, and the run returns `Ok` with `ceiling_exceeded = true`.

use crate::config::{ExtractionConfig, PageRange};
use crate::document::{Document, DocumentKind};
use crate::error::{ChunkError, SubmittalError};
use crate::observer::{DebugArtifactWriter, Fanout, PipelineObserver};
use crate::output::{ChunkResult, MergedResult, RunStats};
use crate::pipeline::llm::ExtractionClient;
use crate::pipeline::plan::{self, ChunkPlan, CostEstimate};
use crate::pipeline::split::{self, Chunk};
use crate::pipeline::{input, merge, text};
use crate::prompts::DEFAULT_SYSTEM_PROMPT;
use crate::schema::default_schema;
use crate::service::resolve_service;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Extract the submittal register from a PDF or paged-text file.
///
/// This is the primary entry point for the library.
///
/// # Returns
/// `Ok(MergedResult)` whenever at least one chunk produced output, even if
/// others failed or were skipped by the cost ceiling (check
/// `result.partial` and `result.gaps`, or call
/// [`MergedResult::into_complete`]).
///
/// # Errors
/// Fatal errors only: unreadable input, page range outside the document,
/// no extraction service configured, a split failure, or every chunk failed.
pub async fn extract_submittals(
    input_str: impl AsRef<str>,
    config: &ExtractionConfig,
) -> Result<MergedResult, SubmittalError> {
    let input_str = input_str.as_ref();
    info!("Starting extraction: {}", input_str);
    let document = input::load_document(input_str).await?;
    extract_document(&document, config).await
}

/// Extract from document bytes already in memory.
///
/// `name` is used for logging and for naming chunk artifacts.
pub async fn extract_from_bytes(
    name: &str,
    bytes: Vec<u8>,
    config: &ExtractionConfig,
) -> Result<MergedResult, SubmittalError> {
    info!("Starting extraction: {} ({} bytes in memory)", name, bytes.len());
    let document = input::load_from_bytes(name, bytes).await?;
    extract_document(&document, config).await
}

/// Run the full pipeline over a loaded document.
pub async fn extract_document(
    document: &Document,
    config: &ExtractionConfig,
) -> Result<MergedResult, SubmittalError> {
    let total_start = Instant::now();

    // ── Step 1: Select pages and plan ────────────────────────────────────
    let range = document.selected_range(config.pages)?;
    let plan = plan::plan(range, config);
    info!(
        "'{}': {} pages selected (~{} tokens), {} chunk(s)",
        document.name(),
        range.len(),
        plan.estimated_tokens,
        plan.len()
    );

    // ── Step 2: Resolve the extraction service ───────────────────────────
    let service = resolve_service(config)?;
    debug!("Using extraction service '{}'", service.name());

    let observer = build_observer(config);
    observer.on_run_start(&plan);

    let system_prompt = config
        .system_prompt
        .clone()
        .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string());
    let schema = config.schema.clone().unwrap_or_else(default_schema);
    let client = ExtractionClient::new(service, Arc::clone(&observer), system_prompt, schema, config);

    // ── Step 3: Extract ──────────────────────────────────────────────────
    let results = if plan.needs_splitting() {
        let chunks = split::split(document, &plan).await?;
        let stem = document.stem();
        for chunk in &chunks {
            let file_name = split::chunk_file_name(&stem, &chunk.spec, document.kind());
            observer.on_chunk_materialized(chunk, &file_name);
        }
        process_chunks(&client, &observer, chunks, config).await
    } else {
        vec![process_whole(&client, &observer, document, &plan).await]
    };

    // ── Step 4: Merge ────────────────────────────────────────────────────
    if !results.iter().any(ChunkResult::is_success) {
        let first_error = results
            .iter()
            .find_map(|r| r.error.as_ref())
            .map(|e| e.to_string())
            .unwrap_or_else(|| "Unknown error".to_string());
        return Err(SubmittalError::AllChunksFailed {
            total: results.len(),
            first_error,
        });
    }

    let mut merged = merge::merge(&results, range.len());
    merged.stats.duration_ms = total_start.elapsed().as_millis() as u64;

    if merged.partial {
        warn!(
            "{} of {} chunks produced no output; pages missing: {}",
            merged.stats.chunks_failed,
            merged.stats.chunks_total,
            merged
                .gaps
                .iter()
                .map(|g| format!("{}-{}", g.start_page, g.end_page))
                .collect::<Vec<_>>()
                .join(", ")
        );
    }
    info!(
        "Extraction complete: {} bullets ({} duplicates removed), {}/{} chunks, ${:.4}, {}ms",
        merged.stats.bullets_after_dedup,
        merged.stats.duplicates_removed,
        merged.stats.chunks_total - merged.stats.chunks_failed,
        merged.stats.chunks_total,
        merged.stats.total_cost,
        merged.stats.duration_ms
    );

    observer.on_run_complete(&merged);
    Ok(merged)
}

/// Extract and write the merged result as pretty JSON.
///
/// The file is written to a temporary sibling first and renamed into place,
/// so readers never see a half-written result.
pub async fn extract_to_file(
    input_str: impl AsRef<str>,
    output_path: impl AsRef<Path>,
    config: &ExtractionConfig,
) -> Result<RunStats, SubmittalError> {
    let result = extract_submittals(input_str, config).await?;
    write_result(&result, output_path.as_ref())?;
    Ok(result.stats)
}

/// Atomically write `result` to `path` as pretty JSON.
pub fn write_result(result: &MergedResult, path: &Path) -> Result<(), SubmittalError> {
    let write_failed = |source: std::io::Error| SubmittalError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };
    let json = serde_json::to_vec_pretty(result)
        .map_err(|e| SubmittalError::Internal(format!("Failed to serialize result: {}", e)))?;

    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent).map_err(write_failed)?;

    let mut tmp = tempfile::NamedTempFile::new_in(parent).map_err(write_failed)?;
    tmp.write_all(&json).map_err(write_failed)?;
    tmp.persist(path).map_err(|e| write_failed(e.error))?;
    debug!("Wrote {} bytes to {}", json.len(), path.display());
    Ok(())
}

/// Synchronous wrapper around [`extract_submittals`].
///
/// Creates a temporary tokio runtime internally.
pub fn extract_sync(
    input_str: impl AsRef<str>,
    config: &ExtractionConfig,
) -> Result<MergedResult, SubmittalError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| SubmittalError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(extract_submittals(input_str, config))
}

/// What a run over a document would do, without running it.
#[derive(Debug, Clone, Serialize)]
pub struct Inspection {
    pub name: String,
    pub kind: DocumentKind,
    pub page_count: usize,
    pub range: PageRange,
    pub plan: ChunkPlan,
    pub estimate: CostEstimate,
}

/// Load a document and plan it.
///
/// Does not require an extraction service or API key.
pub async fn inspect(
    input_str: impl AsRef<str>,
    config: &ExtractionConfig,
) -> Result<Inspection, SubmittalError> {
    let document = input::load_document(input_str.as_ref()).await?;
    let range = document.selected_range(config.pages)?;
    let plan = plan::plan(range, config);
    let estimate = plan::estimate_cost(&plan, config.max_tokens_per_chunk, &config.rates);
    Ok(Inspection {
        name: document.name().to_string(),
        kind: document.kind(),
        page_count: document.page_count(),
        range,
        plan,
        estimate,
    })
}

// ── Internal helpers ─────────────────────────────────────────────────────

/// The caller's observer plus a debug artifact writer when `debug_dir` is set.
fn build_observer(config: &ExtractionConfig) -> Arc<dyn PipelineObserver> {
    let mut fanout = Fanout::new();
    if let Some(ref observer) = config.observer {
        fanout.push(Arc::clone(observer));
    }
    if let Some(ref dir) = config.debug_dir {
        info!("Writing debug artifacts to {}", dir.display());
        fanout.push(Arc::new(DebugArtifactWriter::new(dir.clone())));
    }
    Arc::new(fanout)
}

/// Single-chunk plan: read the selected pages straight from the document.
async fn process_whole(
    client: &ExtractionClient,
    observer: &Arc<dyn PipelineObserver>,
    document: &Document,
    plan: &ChunkPlan,
) -> ChunkResult {
    let spec = plan.chunks[0];
    observer.on_chunk_start(&spec, 1);
    let result = match text::document_text(document, spec.index, spec.start_page, spec.end_page).await {
        Ok(chunk_text) => client.extract(&spec, chunk_text).await,
        Err(e) => {
            warn!("Chunk {}: {}", spec.index, e);
            ChunkResult::failed(spec.index, spec.start_page, spec.end_page, e)
        }
    };
    observer.on_chunk_complete(&result, 1);
    result
}

/// Extract every chunk, at most `config.concurrency` at a time.
///
/// Returns results sorted by chunk index.
async fn process_chunks(
    client: &ExtractionClient,
    observer: &Arc<dyn PipelineObserver>,
    chunks: Vec<Chunk>,
    config: &ExtractionConfig,
) -> Vec<ChunkResult> {
    let total = chunks.len();
    let halted = Arc::new(AtomicBool::new(false));

    let mut pending = stream::iter(chunks.into_iter().map(|chunk| {
        let client = client.clone();
        let observer = Arc::clone(observer);
        let halted = Arc::clone(&halted);
        async move {
            let spec = chunk.spec;
            if halted.load(Ordering::SeqCst) {
                debug!("Chunk {}: not dispatched, cost ceiling reached", spec.index);
                return ChunkResult::failed(
                    spec.index,
                    spec.start_page,
                    spec.end_page,
                    ChunkError::NotAttempted { chunk: spec.index },
                );
            }
            observer.on_chunk_start(&spec, total);
            match text::chunk_text(&chunk).await {
                Ok(chunk_text) => client.extract(&spec, chunk_text).await,
                Err(e) => {
                    warn!("Chunk {}: {}", spec.index, e);
                    ChunkResult::failed(spec.index, spec.start_page, spec.end_page, e)
                }
            }
        }
    }))
    .buffer_unordered(config.concurrency);

    let mut results = Vec::with_capacity(total);
    let mut spent = 0.0_f64;
    while let Some(result) = pending.next().await {
        spent += result.usage.cost;
        if let Some(ceiling) = config.cost_ceiling {
            if spent > ceiling && !halted.swap(true, Ordering::SeqCst) {
                warn!(
                    "Cost ceiling ${:.2} exceeded (${:.4} spent after chunk {}); no further chunks will be sent",
                    ceiling, spent, result.chunk_index
                );
            }
        }
        observer.on_chunk_complete(&result, total);
        results.push(result);
    }

    results.sort_by_key(|r| r.chunk_index);
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::PAGE_BREAK;
    use crate::error::ServiceError;
    use crate::service::{ExtractionRequest, ExtractionService, ServiceResponse};
    use futures::future::BoxFuture;
    use futures::FutureExt;
    use std::sync::atomic::AtomicUsize;

    /// Answers every chunk with one bullet titled after the chunk index.
    struct PerChunk {
        calls: AtomicUsize,
        output_tokens: u64,
    }

    impl ExtractionService for PerChunk {
        fn name(&self) -> &str {
            "per-chunk"
        }

        fn extract<'a>(
            &'a self,
            request: &'a ExtractionRequest,
        ) -> BoxFuture<'a, Result<ServiceResponse, ServiceError>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let content = format!(
                r#"{{"bullets":[{{"spec_section":"01 33 00","section_title":"Submittal Procedures","article_number":"1.{i}","submittal_type":"ACTION","submittal_title":"Item {i}","text":"Submit item {i}.","id":"A","level":1,"parent_id":""}}]}}"#,
                i = request.chunk_index
            );
            let output_tokens = self.output_tokens;
            async move {
                Ok(ServiceResponse {
                    content,
                    input_tokens: 0,
                    output_tokens,
                    model: Some("mock".into()),
                })
            }
            .boxed()
        }
    }

    fn paged(pages: usize) -> Document {
        let text = (1..=pages)
            .map(|p| format!("page {}", p))
            .collect::<Vec<_>>()
            .join(&PAGE_BREAK.to_string());
        Document::from_text("manual.txt", &text).unwrap()
    }

    fn config(service: Arc<dyn ExtractionService>) -> crate::config::ExtractionConfigBuilder {
        ExtractionConfig::builder()
            .service(service)
            .tokens_per_page_estimate(1000)
            .split_threshold_tokens(10_000)
            .max_tokens_per_chunk(10_000)
            .retry_backoff_ms(1)
    }

    #[tokio::test]
    async fn small_document_is_one_chunk() {
        let service = Arc::new(PerChunk {
            calls: AtomicUsize::new(0),
            output_tokens: 10,
        });
        let cfg = config(service.clone()).build().unwrap();
        let merged = extract_document(&paged(5), &cfg).await.unwrap();
        assert_eq!(service.calls.load(Ordering::SeqCst), 1);
        assert_eq!(merged.stats.chunks_total, 1);
        assert_eq!(merged.bullets[0].global_id, "1:A");
        assert!(!merged.partial);
    }

    #[tokio::test]
    async fn large_document_splits_and_orders() {
        let service = Arc::new(PerChunk {
            calls: AtomicUsize::new(0),
            output_tokens: 10,
        });
        let cfg = config(service.clone()).concurrency(3).build().unwrap();
        let merged = extract_document(&paged(35), &cfg).await.unwrap();
        assert_eq!(service.calls.load(Ordering::SeqCst), 4);
        let chunks: Vec<usize> = merged.bullets.iter().map(|b| b.chunk_index).collect();
        assert_eq!(chunks, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn ceiling_stops_dispatch() {
        // 100k output tokens at $10/M is $1.00 per chunk.
        let service = Arc::new(PerChunk {
            calls: AtomicUsize::new(0),
            output_tokens: 100_000,
        });
        let cfg = config(service.clone()).cost_ceiling(1.5).build().unwrap();
        let merged = extract_document(&paged(40), &cfg).await.unwrap();
        assert_eq!(service.calls.load(Ordering::SeqCst), 2);
        assert!(merged.ceiling_exceeded);
        assert_eq!(merged.stats.chunks_not_attempted, 2);
        assert!(merged.clone().into_complete(Some(1.5)).is_err());
    }

    #[tokio::test]
    async fn missing_range_is_fatal() {
        let service = Arc::new(PerChunk {
            calls: AtomicUsize::new(0),
            output_tokens: 10,
        });
        let cfg = config(service).pages(PageRange::new(3, 9)).build().unwrap();
        let err = extract_document(&paged(5), &cfg).await.unwrap_err();
        assert!(matches!(err, SubmittalError::PageOutOfRange { .. }));
    }

    #[test]
    fn write_result_replaces_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out/register.json");
        let result = merge::merge(&[ChunkResult::empty(1, 1, 3)], 3);
        write_result(&result, &path).unwrap();
        write_result(&result, &path).unwrap();
        let back: MergedResult = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(back.stats.total_pages, 3);
        assert_eq!(std::fs::read_dir(dir.path().join("out")).unwrap().count(), 1);
    }
}
