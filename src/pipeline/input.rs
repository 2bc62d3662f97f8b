//! Input resolution: validate a user-supplied path and load it as a
//! [`Document`].
//!
//! Format is decided by content, not extension. `%PDF` magic means PDF and
//! the page count comes from pdfium inside `spawn_blocking`; anything else
//! must be UTF-8 text with `\f` page breaks.

use crate::document::Document;
use crate::error::SubmittalError;
use crate::pipeline::split;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Validate that `path_str` names a readable file.
pub fn resolve_local(path_str: &str) -> Result<PathBuf, SubmittalError> {
    let path = PathBuf::from(path_str);

    if !path.exists() {
        return Err(SubmittalError::FileNotFound { path });
    }
    if path.is_dir() {
        return Err(SubmittalError::UnsupportedInput {
            path,
            detail: "path is a directory".into(),
        });
    }

    match std::fs::File::open(&path) {
        Ok(mut f) => {
            let mut probe = [0u8; 1];
            if let Err(e) = f.read(&mut probe) {
                return Err(SubmittalError::CorruptDocument {
                    path,
                    detail: e.to_string(),
                });
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(SubmittalError::PermissionDenied { path });
        }
        Err(_) => {
            return Err(SubmittalError::FileNotFound { path });
        }
    }

    debug!("Resolved local document: {}", path.display());
    Ok(path)
}

/// Whether the buffer starts with the PDF magic bytes.
pub fn is_pdf(bytes: &[u8]) -> bool {
    bytes.len() >= 4 && &bytes[..4] == b"%PDF"
}

/// Read and load a document from disk.
pub async fn load_document(path_str: &str) -> Result<Document, SubmittalError> {
    let path = resolve_local(path_str)?;
    let bytes = tokio::fs::read(&path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::PermissionDenied => SubmittalError::PermissionDenied { path: path.clone() },
        _ => SubmittalError::CorruptDocument {
            path: path.clone(),
            detail: e.to_string(),
        },
    })?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path_str.to_string());

    let doc = load_from_bytes(&name, bytes).await?.with_path(&path);
    info!(
        "Loaded '{}': {} pages ({:?})",
        doc.name(),
        doc.page_count(),
        doc.kind()
    );
    Ok(doc)
}

/// Load a document from an in-memory buffer.
pub async fn load_from_bytes(name: &str, bytes: Vec<u8>) -> Result<Document, SubmittalError> {
    if is_pdf(&bytes) {
        let name = name.to_string();
        return tokio::task::spawn_blocking(move || {
            let page_count = split::pdf_page_count(&bytes, Path::new(&name))?;
            Ok(Document::from_pdf(name, bytes, page_count))
        })
        .await
        .map_err(|e| SubmittalError::Internal(format!("Load task panicked: {}", e)))?;
    }

    let text = String::from_utf8(bytes).map_err(|_| SubmittalError::UnsupportedInput {
        path: PathBuf::from(name),
        detail: "not a PDF and not UTF-8 text".into(),
    })?;
    Document::from_text(name, &text)
}
