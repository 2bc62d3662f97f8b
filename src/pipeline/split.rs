//! Document splitting: materialize one self-contained sub-document per
//! planned chunk.
//!
//! For PDFs each chunk is a brand-new pdfium document with the page range
//! copied in, saved to bytes. For paged text the chunk is the `\f`-joined
//! slice of its pages. Splitting is all-or-nothing: the first bad range
//! aborts with a [`SplitError`] naming it, before anything is sent to the
//! extraction service.
//!
//! pdfium is not async-safe, so the async entry point hops onto the
//! blocking pool.

use crate::document::{Document, DocumentKind, PAGE_BREAK};
use crate::error::{SplitError, SubmittalError};
use crate::pipeline::plan::{ChunkPlan, ChunkSpec};
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Environment variable naming the directory that holds the pdfium library.
pub const PDFIUM_LIB_PATH_ENV: &str = "PDFIUM_LIB_PATH";

/// Materialized content of one chunk.
#[derive(Debug, Clone)]
pub enum ChunkContent {
    /// A complete PDF file.
    Pdf(Vec<u8>),
    /// Page texts joined by form feeds.
    Text(String),
}

/// A sub-document covering exactly one [`ChunkSpec`].
#[derive(Debug, Clone)]
pub struct Chunk {
    pub spec: ChunkSpec,
    pub content: ChunkContent,
}

impl Chunk {
    /// Raw bytes as they would be written to disk.
    pub fn as_bytes(&self) -> &[u8] {
        match &self.content {
            ChunkContent::Pdf(bytes) => bytes,
            ChunkContent::Text(text) => text.as_bytes(),
        }
    }
}

/// `{stem}_chunk_{NN}_pages_{start}-{end}.{ext}`
pub fn chunk_file_name(stem: &str, spec: &ChunkSpec, kind: DocumentKind) -> String {
    let ext = match kind {
        DocumentKind::Pdf => "pdf",
        DocumentKind::Text => "txt",
    };
    format!(
        "{}_chunk_{:02}_pages_{}-{}.{}",
        stem, spec.index, spec.start_page, spec.end_page, ext
    )
}

/// Bind pdfium from `PDFIUM_LIB_PATH`, then the working directory, then the
/// system loader path.
pub fn bind_pdfium() -> Result<Pdfium, SubmittalError> {
    let mut attempts = Vec::new();

    if let Ok(dir) = std::env::var(PDFIUM_LIB_PATH_ENV) {
        let lib = Pdfium::pdfium_platform_library_name_at_path(&dir);
        match Pdfium::bind_to_library(&lib) {
            Ok(bindings) => return Ok(Pdfium::new(bindings)),
            Err(e) => attempts.push(format!("{}: {:?}", lib.display(), e)),
        }
    }

    let local = Pdfium::pdfium_platform_library_name_at_path("./");
    match Pdfium::bind_to_library(&local) {
        Ok(bindings) => return Ok(Pdfium::new(bindings)),
        Err(e) => attempts.push(format!("{}: {:?}", local.display(), e)),
    }

    match Pdfium::bind_to_system_library() {
        Ok(bindings) => Ok(Pdfium::new(bindings)),
        Err(e) => {
            attempts.push(format!("system library: {:?}", e));
            Err(SubmittalError::PdfiumBindingFailed(attempts.join("; ")))
        }
    }
}

/// Count the pages of a PDF held in memory.
pub fn pdf_page_count(bytes: &[u8], path: &Path) -> Result<usize, SubmittalError> {
    let pdfium = bind_pdfium()?;
    let document = pdfium
        .load_pdf_from_byte_slice(bytes, None)
        .map_err(|e| SubmittalError::CorruptDocument {
            path: path.to_path_buf(),
            detail: format!("{:?}", e),
        })?;
    let count = document.pages().len() as usize;
    if count == 0 {
        return Err(SubmittalError::CorruptDocument {
            path: path.to_path_buf(),
            detail: "PDF has no pages".into(),
        });
    }
    Ok(count)
}

/// Check a planned range against the document it will be cut from.
pub fn validate_spec(spec: &ChunkSpec, page_count: usize) -> Result<(), SplitError> {
    if spec.start_page == 0 {
        return Err(SplitError::new(spec.start_page, spec.end_page, "pages are 1-indexed"));
    }
    if spec.start_page > spec.end_page {
        return Err(SplitError::new(
            spec.start_page,
            spec.end_page,
            "start page is after end page",
        ));
    }
    if spec.end_page > page_count {
        return Err(SplitError::new(
            spec.start_page,
            spec.end_page,
            format!("document has only {} pages", page_count),
        ));
    }
    Ok(())
}

/// Split `document` into one [`Chunk`] per entry of `plan`, in plan order.
pub async fn split(document: &Document, plan: &ChunkPlan) -> Result<Vec<Chunk>, SubmittalError> {
    let document = document.clone();
    let specs = plan.chunks.clone();
    tokio::task::spawn_blocking(move || split_blocking(&document, &specs))
        .await
        .map_err(|e| SubmittalError::Internal(format!("Split task panicked: {}", e)))?
}

/// Blocking implementation of [`split`].
pub fn split_blocking(document: &Document, specs: &[ChunkSpec]) -> Result<Vec<Chunk>, SubmittalError> {
    let page_count = document.page_count();
    for spec in specs {
        validate_spec(spec, page_count)?;
    }

    let chunks = match document.kind() {
        DocumentKind::Text => specs
            .iter()
            .map(|spec| {
                let pages = document
                    .text_pages(spec.start_page, spec.end_page)
                    .ok_or_else(|| {
                        SplitError::new(spec.start_page, spec.end_page, "page slice unavailable")
                    })?;
                Ok(Chunk {
                    spec: *spec,
                    content: ChunkContent::Text(pages.join(&PAGE_BREAK.to_string())),
                })
            })
            .collect::<Result<Vec<_>, SplitError>>()?,
        DocumentKind::Pdf => split_pdf(document, specs)?,
    };

    info!("Split '{}' into {} chunks", document.name(), chunks.len());
    Ok(chunks)
}

fn split_pdf(document: &Document, specs: &[ChunkSpec]) -> Result<Vec<Chunk>, SubmittalError> {
    let bytes = document
        .pdf_bytes()
        .ok_or_else(|| SubmittalError::Internal("PDF document without bytes".into()))?;
    let pdfium = bind_pdfium()?;

    let source = pdfium
        .load_pdf_from_byte_slice(bytes, None)
        .map_err(|e| SubmittalError::CorruptDocument {
            path: document.path().map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from(document.name())),
            detail: format!("{:?}", e),
        })?;

    let mut chunks = Vec::with_capacity(specs.len());
    for spec in specs {
        let fail = |what: &str, e: PdfiumError| {
            SplitError::new(spec.start_page, spec.end_page, format!("{}: {:?}", what, e))
        };

        let mut target = pdfium.create_new_pdf().map_err(|e| fail("create document", e))?;
        target
            .pages_mut()
            .copy_page_range_from_document(
                &source,
                (spec.start_page - 1) as PdfPageIndex..=(spec.end_page - 1) as PdfPageIndex,
                0,
            )
            .map_err(|e| fail("copy pages", e))?;
        let out = target.save_to_bytes().map_err(|e| fail("save", e))?;

        debug!(
            "Chunk {} (pages {}-{}): {} bytes",
            spec.index,
            spec.start_page,
            spec.end_page,
            out.len()
        );
        chunks.push(Chunk {
            spec: *spec,
            content: ChunkContent::Pdf(out),
        });
    }
    Ok(chunks)
}

/// Write chunk files to `dir`, returning their paths in plan order.
pub fn write_chunks(
    chunks: &[Chunk],
    stem: &str,
    kind: DocumentKind,
    dir: &Path,
) -> Result<Vec<PathBuf>, SubmittalError> {
    std::fs::create_dir_all(dir).map_err(|e| SubmittalError::OutputWriteFailed {
        path: dir.to_path_buf(),
        source: e,
    })?;
    chunks
        .iter()
        .map(|chunk| {
            let path = dir.join(chunk_file_name(stem, &chunk.spec, kind));
            std::fs::write(&path, chunk.as_bytes()).map_err(|e| SubmittalError::OutputWriteFailed {
                path: path.clone(),
                source: e,
            })?;
            Ok(path)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ExtractionConfig, PageRange};
    use crate::pipeline::plan::plan;

    fn spec(index: usize, start: usize, end: usize) -> ChunkSpec {
        ChunkSpec {
            index,
            start_page: start,
            end_page: end,
            estimated_tokens: 0,
        }
    }

    fn text_doc(pages: usize) -> Document {
        Document::from_pages("manual.txt", (1..=pages).map(|p| format!("page {p}")).collect()).unwrap()
    }

    #[test]
    fn chunk_file_name_is_zero_padded() {
        let name = chunk_file_name("Project Manual", &spec(3, 377, 564), DocumentKind::Pdf);
        assert_eq!(name, "Project Manual_chunk_03_pages_377-564.pdf");
    }

    #[test]
    fn invalid_ranges_name_the_range() {
        let err = validate_spec(&spec(1, 190, 120), 500).unwrap_err();
        assert_eq!((err.start_page, err.end_page), (190, 120));
        assert!(validate_spec(&spec(1, 0, 4), 500).is_err());
        let err = validate_spec(&spec(1, 480, 520), 500).unwrap_err();
        assert!(err.reason.contains("500"));
        assert!(validate_spec(&spec(1, 1, 500), 500).is_ok());
    }

    #[test]
    fn text_document_splits_into_page_slices() {
        let doc = text_doc(25);
        let c = ExtractionConfig::builder()
            .split_threshold_tokens(1)
            .max_tokens_per_chunk(5_300)
            .build()
            .unwrap();
        let p = plan(PageRange::new(1, 25), &c);
        let chunks = split_blocking(&doc, &p.chunks).unwrap();
        assert_eq!(chunks.len(), 3);
        match &chunks[2].content {
            ChunkContent::Text(t) => {
                assert!(t.starts_with("page 21"));
                assert!(t.ends_with("page 25"));
                assert_eq!(t.matches(PAGE_BREAK).count(), 4);
            }
            other => panic!("expected text chunk, got {other:?}"),
        }
    }

    #[test]
    fn bad_range_aborts_whole_split() {
        let doc = text_doc(10);
        let err = split_blocking(&doc, &[spec(1, 1, 5), spec(2, 6, 12)]).unwrap_err();
        assert!(matches!(
            err,
            SubmittalError::Split(SplitError { start_page: 6, end_page: 12, .. })
        ));
    }

    #[test]
    fn write_chunks_uses_naming_scheme() {
        let doc = text_doc(4);
        let chunks = split_blocking(&doc, &[spec(1, 1, 2), spec(2, 3, 4)]).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let paths = write_chunks(&chunks, &doc.stem(), doc.kind(), dir.path()).unwrap();
        assert_eq!(paths.len(), 2);
        assert!(paths[1].ends_with("manual_chunk_02_pages_3-4.txt"));
        assert_eq!(std::fs::read_to_string(&paths[0]).unwrap(), "page 1\u{000C}page 2");
    }
}
