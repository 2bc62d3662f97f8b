//! Error types for the submittal-extract library.
//!
//! Three error types map onto three failure scopes:
//!
//! * [`SubmittalError`] is **fatal**: the run cannot produce a result at all
//!   (unreadable input, invalid page range, no service configured, every
//!   chunk failed). Returned as `Err(SubmittalError)` from the top-level
//!   `extract*` functions.
//!
//! * [`ChunkError`] is **non-fatal**: one chunk produced no bullets (service
//!   gave up, response could not be repaired, chunk never dispatched). Stored
//!   inside [`crate::output::ChunkResult`] and surfaced as a gap in the
//!   merged output; the other chunks are unaffected.
//!
//! * [`ServiceError`] means a single attempt against the extraction service
//!   failed. Transient kinds are retried by the extraction client; once
//!   retries run out the last one is folded into [`ChunkError::Service`].

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// A page range that could not be cut out of the source document.
///
/// Splitting is all-or-nothing: one bad range aborts the run before any
/// chunk is sent to the service.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Cannot split pages {start_page}-{end_page}: {reason}")]
pub struct SplitError {
    pub start_page: usize,
    pub end_page: usize,
    pub reason: String,
}

impl SplitError {
    pub fn new(start_page: usize, end_page: usize, reason: impl Into<String>) -> Self {
        Self {
            start_page,
            end_page,
            reason: reason.into(),
        }
    }
}

/// All fatal errors returned by the submittal-extract library.
///
/// Chunk-level failures use [`ChunkError`] and are stored in
/// [`crate::output::ChunkResult`] rather than propagated here.
#[derive(Debug, Error)]
pub enum SubmittalError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("Document not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The file is neither a PDF nor UTF-8 paged text.
    #[error("Unsupported document '{path}': {detail}")]
    UnsupportedInput { path: PathBuf, detail: String },

    /// The document could not be opened or parsed.
    #[error("Document '{path}' is corrupt: {detail}")]
    CorruptDocument { path: PathBuf, detail: String },

    /// The requested page range does not fit the document.
    #[error("Page {page} is out of range (document has {total} pages)")]
    PageOutOfRange { page: usize, total: usize },

    // ── Pipeline errors ───────────────────────────────────────────────────
    /// The splitter rejected a planned range; no chunk was dispatched.
    #[error(transparent)]
    Split(#[from] SplitError),

    /// Every chunk failed; there is nothing to merge.
    #[error("All {total} chunks failed.\nFirst error: {first_error}")]
    AllChunksFailed { total: usize, first_error: String },

    /// The run stopped dispatching chunks because it spent more than allowed.
    ///
    /// The pipeline itself never returns this; see
    /// [`crate::output::MergedResult::into_complete`].
    #[error("Cost ceiling ${ceiling:.2} exceeded (spent ${spent:.4}); {skipped} chunks not dispatched")]
    CostCeilingExceeded {
        spent: f64,
        ceiling: f64,
        skipped: usize,
    },

    /// Some chunks succeeded but at least one produced no bullets.
    ///
    /// Returned by [`crate::output::MergedResult::into_complete`] when the
    /// caller wants to treat any gap as an error.
    #[error("{failed}/{total} chunks failed during extraction")]
    PartialFailure { failed: usize, total: usize },

    // ── Service errors ────────────────────────────────────────────────────
    /// No extraction service could be constructed (missing key etc.).
    #[error("Extraction service '{service}' is not configured.\n{hint}")]
    ServiceNotConfigured { service: String, hint: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write the output JSON file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Pdfium binding errors ─────────────────────────────────────────────
    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
Set PDFIUM_LIB_PATH=/path/to/dir/containing/libpdfium, or install pdfium\n\
where the system dynamic loader can find it.\n"
    )]
    PdfiumBindingFailed(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Failure classes reported by an [`crate::service::ExtractionService`].
///
/// The split between transient and permanent kinds drives the retry loop in
/// [`crate::pipeline::llm`].
#[derive(Debug, Clone, Error, PartialEq, Serialize, Deserialize)]
pub enum ServiceError {
    /// HTTP 429 or provider-side throttling.
    #[error("rate limited{}", .retry_after_secs.map(|s| format!(" (retry after {s}s)")).unwrap_or_default())]
    RateLimited { retry_after_secs: Option<u64> },

    /// The attempt exceeded the per-request wall-clock limit.
    #[error("request timed out after {secs}s")]
    Timeout { secs: u64 },

    /// Connection reset, DNS failure, truncated body.
    #[error("transport error: {0}")]
    Transport(String),

    /// HTTP 5xx from the service.
    #[error("server error {status}: {detail}")]
    Server { status: u16, detail: String },

    /// HTTP 401/403: retrying with the same key cannot help.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// HTTP 4xx other than 401/403/429: the request itself is wrong.
    #[error("request rejected: {0}")]
    BadRequest(String),

    /// The service answered but the envelope carried no content.
    #[error("empty response: {0}")]
    EmptyResponse(String),
}

impl ServiceError {
    /// Whether a retry with the identical request may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ServiceError::RateLimited { .. }
                | ServiceError::Timeout { .. }
                | ServiceError::Transport(_)
                | ServiceError::Server { .. }
                | ServiceError::EmptyResponse(_)
        )
    }

    /// Server-requested delay before the next attempt, if any.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            ServiceError::RateLimited { retry_after_secs } => *retry_after_secs,
            _ => None,
        }
    }
}

/// A non-fatal error for a single chunk.
///
/// Stored alongside [`crate::output::ChunkResult`] when a chunk fails.
/// The run continues unless ALL chunks fail.
#[derive(Debug, Clone, Error, PartialEq, Serialize, Deserialize)]
pub enum ChunkError {
    /// Text could not be pulled out of the materialized sub-document.
    #[error("Chunk {chunk}: text extraction failed: {detail}")]
    TextExtraction { chunk: usize, detail: String },

    /// Transient service failures outlasted the retry budget.
    #[error("Chunk {chunk}: extraction failed after {retries} retries: {source}")]
    Service {
        chunk: usize,
        retries: u32,
        source: ServiceError,
    },

    /// The service refused the request outright (auth, bad request).
    #[error("Chunk {chunk}: service rejected the request: {source}")]
    Rejected { chunk: usize, source: ServiceError },

    /// The response was not valid JSON even after every repair pass.
    #[error("Chunk {chunk}: unrepairable JSON response ({raw_len} bytes): {detail}")]
    JsonParse {
        chunk: usize,
        detail: String,
        raw_len: usize,
    },

    /// The chunk was never sent because the cost ceiling had been crossed.
    #[error("Chunk {chunk}: not attempted (cost ceiling reached)")]
    NotAttempted { chunk: usize },
}

impl ChunkError {
    /// Short machine-friendly label used in gap reports.
    pub fn kind(&self) -> &'static str {
        match self {
            ChunkError::TextExtraction { .. } => "text_extraction",
            ChunkError::Service { .. } => "service",
            ChunkError::Rejected { .. } => "rejected",
            ChunkError::JsonParse { .. } => "json_parse",
            ChunkError::NotAttempted { .. } => "not_attempted",
        }
    }
}
