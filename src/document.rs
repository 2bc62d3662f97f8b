//! The loaded source document.
//!
//! A [`Document`] is immutable once loaded. Two page-structured formats are
//! accepted: PDF (pages counted by pdfium at load time) and plain UTF-8 text
//! whose pages are separated by form feeds, the layout `pdftotext` writes.

use crate::config::PageRange;
use crate::error::SubmittalError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Page separator in paged plain-text documents.
pub const PAGE_BREAK: char = '\u{000C}';

/// Format of a loaded document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    Pdf,
    Text,
}

#[derive(Debug, Clone)]
enum Content {
    Pdf(Arc<Vec<u8>>),
    Text(Arc<Vec<String>>),
}

/// An ordered sequence of pages.
#[derive(Debug, Clone)]
pub struct Document {
    name: String,
    path: Option<PathBuf>,
    page_count: usize,
    content: Content,
}

impl Document {
    /// Build a document from `\f`-separated text.
    ///
    /// A trailing form feed does not open an extra page.
    pub fn from_text(name: impl Into<String>, text: &str) -> Result<Self, SubmittalError> {
        let mut pages: Vec<String> = text.split(PAGE_BREAK).map(str::to_string).collect();
        if pages.len() > 1 && pages.last().is_some_and(|p| p.trim().is_empty()) {
            pages.pop();
        }
        Self::from_pages(name, pages)
    }

    /// Build a text document from already-separated pages.
    pub fn from_pages(name: impl Into<String>, pages: Vec<String>) -> Result<Self, SubmittalError> {
        let name = name.into();
        if pages.is_empty() || pages.iter().all(|p| p.trim().is_empty()) {
            return Err(SubmittalError::UnsupportedInput {
                path: PathBuf::from(&name),
                detail: "document has no text pages".into(),
            });
        }
        Ok(Self {
            name,
            path: None,
            page_count: pages.len(),
            content: Content::Text(Arc::new(pages)),
        })
    }

    /// Wrap PDF bytes whose page count has already been read by pdfium.
    pub(crate) fn from_pdf(name: impl Into<String>, bytes: Vec<u8>, page_count: usize) -> Self {
        Self {
            name: name.into(),
            path: None,
            page_count,
            content: Content::Pdf(Arc::new(bytes)),
        }
    }

    pub(crate) fn with_path(mut self, path: &Path) -> Self {
        self.path = Some(path.to_path_buf());
        self
    }

    pub fn kind(&self) -> DocumentKind {
        match self.content {
            Content::Pdf(_) => DocumentKind::Pdf,
            Content::Text(_) => DocumentKind::Text,
        }
    }

    pub fn page_count(&self) -> usize {
        self.page_count
    }

    /// Display name, usually the file name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// File stem used for naming chunk files.
    pub fn stem(&self) -> String {
        Path::new(&self.name)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "document".to_string())
    }

    /// `pages × tokens_per_page`.
    pub fn estimated_tokens(&self, tokens_per_page: usize) -> usize {
        self.page_count.saturating_mul(tokens_per_page)
    }

    /// The range a run covers: the requested one, validated, or every page.
    pub fn selected_range(&self, requested: Option<PageRange>) -> Result<PageRange, SubmittalError> {
        match requested {
            Some(range) => {
                range.within(self.page_count)?;
                Ok(range)
            }
            None => Ok(PageRange::new(1, self.page_count)),
        }
    }

    pub(crate) fn pdf_bytes(&self) -> Option<&Arc<Vec<u8>>> {
        match &self.content {
            Content::Pdf(bytes) => Some(bytes),
            Content::Text(_) => None,
        }
    }

    /// Pages `start..=end` (1-indexed) of a text document.
    pub(crate) fn text_pages(&self, start: usize, end: usize) -> Option<&[String]> {
        match &self.content {
            Content::Text(pages) if start >= 1 && start <= end && end <= pages.len() => {
                Some(&pages[start - 1..end])
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_pages_split_on_form_feed() {
        let doc = Document::from_text("spec.txt", "one\u{000C}two\u{000C}three\u{000C}").unwrap();
        assert_eq!(doc.page_count(), 3);
        assert_eq!(doc.kind(), DocumentKind::Text);
        assert_eq!(doc.text_pages(2, 3).unwrap(), &["two".to_string(), "three".to_string()]);
        assert!(doc.text_pages(3, 4).is_none());
    }

    #[test]
    fn empty_text_is_rejected() {
        assert!(Document::from_text("empty.txt", "  \n").is_err());
    }

    #[test]
    fn estimated_tokens_scale_with_pages() {
        let pages = vec!["p".to_string(); 400];
        let doc = Document::from_pages("big.txt", pages).unwrap();
        assert_eq!(doc.estimated_tokens(530), 212_000);
    }

    #[test]
    fn selected_range_checks_bounds() {
        let doc = Document::from_pages("d.txt", vec!["p".to_string(); 10]).unwrap();
        assert_eq!(doc.selected_range(None).unwrap(), PageRange::new(1, 10));
        assert!(doc.selected_range(Some(PageRange::new(5, 11))).is_err());
        assert_eq!(
            doc.selected_range(Some(PageRange::new(3, 4))).unwrap(),
            PageRange::new(3, 4)
        );
    }

    #[test]
    fn stem_falls_back() {
        let doc = Document::from_text("Project Manual.pdf", "x").unwrap();
        assert_eq!(doc.stem(), "Project Manual");
        let doc = Document::from_text("", "x").unwrap();
        assert_eq!(doc.stem(), "document");
    }
}
