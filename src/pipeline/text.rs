//! Page text for the extraction request.
//!
//! Every page is prefixed with a `--- PAGE n ---` marker carrying its
//! absolute page number in the source document, so the model (and anyone
//! reading a raw response) can tie bullets back to pages even inside a
//! chunk.

use crate::document::{Document, DocumentKind, PAGE_BREAK};
use crate::error::ChunkError;
use crate::pipeline::split::{bind_pdfium, Chunk, ChunkContent};
use pdfium_render::prelude::*;
use std::sync::Arc;
use tracing::debug;

/// Append one page with its marker.
fn push_page(out: &mut String, page_number: usize, text: &str) {
    out.push_str(&format!("--- PAGE {} ---\n", page_number));
    out.push_str(text.trim_end());
    out.push_str("\n\n");
}

/// Join already-extracted page texts, numbering from `first_page`.
pub fn mark_pages<'a>(first_page: usize, pages: impl IntoIterator<Item = &'a str>) -> String {
    let mut out = String::new();
    for (offset, text) in pages.into_iter().enumerate() {
        push_page(&mut out, first_page + offset, text);
    }
    out
}

/// Text of one materialized chunk.
pub async fn chunk_text(chunk: &Chunk) -> Result<String, ChunkError> {
    let first = chunk.spec.start_page;
    match &chunk.content {
        ChunkContent::Text(text) => Ok(mark_pages(first, text.split(PAGE_BREAK))),
        ChunkContent::Pdf(bytes) => {
            let bytes = Arc::new(bytes.clone());
            pdf_text(chunk.spec.index, bytes, 1, chunk.spec.page_count(), first).await
        }
    }
}

/// Text of pages `start..=end` read straight from the source document.
///
/// Used when the plan has a single chunk and no split happens.
pub async fn document_text(
    document: &Document,
    chunk_index: usize,
    start: usize,
    end: usize,
) -> Result<String, ChunkError> {
    match document.kind() {
        DocumentKind::Text => document
            .text_pages(start, end)
            .map(|pages| mark_pages(start, pages.iter().map(String::as_str)))
            .ok_or_else(|| ChunkError::TextExtraction {
                chunk: chunk_index,
                detail: format!("pages {}-{} not in document", start, end),
            }),
        DocumentKind::Pdf => {
            let bytes = document
                .pdf_bytes()
                .cloned()
                .ok_or_else(|| ChunkError::TextExtraction {
                    chunk: chunk_index,
                    detail: "PDF content missing".into(),
                })?;
            pdf_text(chunk_index, bytes, start, end + 1 - start, start).await
        }
    }
}

/// Extract `count` pages starting at 1-indexed `from`, labelled from `label_from`.
async fn pdf_text(
    chunk_index: usize,
    bytes: Arc<Vec<u8>>,
    from: usize,
    count: usize,
    label_from: usize,
) -> Result<String, ChunkError> {
    tokio::task::spawn_blocking(move || pdf_text_blocking(&bytes, from, count, label_from))
        .await
        .map_err(|e| format!("text task panicked: {}", e))
        .and_then(|r| r)
        .map_err(|detail| ChunkError::TextExtraction {
            chunk: chunk_index,
            detail,
        })
}

fn pdf_text_blocking(bytes: &[u8], from: usize, count: usize, label_from: usize) -> Result<String, String> {
    let pdfium = bind_pdfium().map_err(|e| e.to_string())?;
    let document = pdfium
        .load_pdf_from_byte_slice(bytes, None)
        .map_err(|e| format!("load: {:?}", e))?;
    let pages = document.pages();

    let mut out = String::new();
    for offset in 0..count {
        let idx = (from - 1 + offset) as PdfPageIndex;
        let page = pages
            .get(idx)
            .map_err(|e| format!("page {}: {:?}", label_from + offset, e))?;
        let text = page
            .text()
            .map_err(|e| format!("page {} text: {:?}", label_from + offset, e))?
            .all();
        push_page(&mut out, label_from + offset, &text);
    }
    debug!("Extracted {} chars from {} pages", out.len(), count);
    Ok(out)
}
