//! # submittal-extract
//!
//! Build a submittal register from a construction specification manual
//! using an LLM with structured output.
//!
//! Project manuals follow CSI MasterFormat: hundreds of sections, each with
//! a PART 1 article listing what the contractor must submit (product data,
//! shop drawings, samples, warranties). This crate sends the manual to a
//! model in page-range chunks, repairs whatever JSON comes back, and merges
//! the per-chunk bullets into one deduplicated, hierarchical list.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF / paged text
//!  │
//!  ├─ 1. Input   load the document, count pages (pdfium, spawn_blocking)
//!  ├─ 2. Plan    cut the selected range into token-budgeted chunks
//!  ├─ 3. Split   materialize each chunk as its own sub-document
//!  ├─ 4. Extract one structured-output request per chunk, retry + repair
//!  └─ 5. Merge   global ids, cross-chunk dedup, gaps and run stats
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use submittal_extract::{extract_submittals, ExtractionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Service auto-detected from OPENROUTER_API_KEY or the edgequake-llm env vars
//!     let config = ExtractionConfig::builder().cost_ceiling(5.0).build()?;
//!     let result = extract_submittals("project_manual.pdf", &config).await?;
//!     for item in result.submittal_items() {
//!         println!("{} {} {}", item.bullet.spec_section, item.bullet.article_number, item.bullet.submittal_title);
//!     }
//!     eprintln!("cost: ${:.2}, gaps: {}", result.stats.total_cost, result.gaps.len());
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `submittals` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! submittal-extract = { version = "0.3", default-features = false }
//! ```
//!
//! ## Cost
//!
//! A 600-page manual plans into four chunks. At the default Gemini 2.5 Pro
//! rates ($1.25 in / $10.00 out per million tokens) that is roughly $1.35;
//! `submittals plan` prints the estimate without calling the model.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod document;
pub mod error;
pub mod extract;
pub mod observer;
pub mod output;
pub mod pipeline;
pub mod prompts;
pub mod schema;
pub mod service;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{CostRates, ExtractionConfig, ExtractionConfigBuilder, PageRange};
pub use document::{Document, DocumentKind};
pub use error::{ChunkError, ServiceError, SplitError, SubmittalError};
pub use extract::{
    extract_document, extract_from_bytes, extract_submittals, extract_sync, extract_to_file,
    inspect, write_result, Inspection,
};
pub use observer::{DebugArtifactWriter, NoopObserver, PipelineObserver};
pub use output::{
    Bullet, ChunkResult, Gap, MergedBullet, MergedResult, RunStats, SubmittalType, TokenUsage,
};
pub use pipeline::plan::{ChunkPlan, ChunkSpec, CostEstimate};
pub use service::openrouter::OpenRouterService;
pub use service::provider::ProviderService;
pub use service::{ExtractionRequest, ExtractionService, ServiceResponse};
