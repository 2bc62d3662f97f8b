//! Pipeline stages for submittal extraction.
//!
//! Each submodule implements one step and is testable on its own; the
//! orchestration lives in [`crate::extract`].
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ plan ──▶ split ──▶ text ──▶ llm ──▶ merge
//! (load)   (pages)  (pdfium)  (pages)  (+repair) (dedup)
//! ```
//!
//! 1. [`input`]: load a PDF or `\f`-paged text file and count its pages
//! 2. [`plan`]: cut the selected range into token-budgeted chunks
//! 3. [`split`]: copy each chunk's pages into its own sub-document; runs
//!    in `spawn_blocking` because pdfium is not async-safe
//! 4. [`text`]: read chunk text with `--- PAGE n ---` markers
//! 5. [`llm`]: the extraction client (retry/backoff, pricing, parse),
//!    the only stage with network I/O
//! 6. [`repair`]: token-level repair of malformed JSON and hierarchy fixes
//! 7. [`merge`]: concatenate in chunk order, assign global ids, dedup

pub mod input;
pub mod llm;
pub mod merge;
pub mod plan;
pub mod repair;
pub mod split;
pub mod text;
