//! Text-layer extraction into `contents.txt`.
//!
//! Independent of per-image OCR: this is whatever text the document itself
//! carries. Scanned pages contribute empty strings, so the output has one
//! segment per page.

use super::{join_error, write_atomic};
use crate::document::DocumentSource;
use crate::error::PipelineError;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Separator placed between consecutive pages.
pub const PAGE_SEPARATOR: &str = "\n";

/// Concatenate every page's text in page order and write it to `output_path`.
///
/// Returns the number of pages read.
///
/// # Errors
/// [`PipelineError::DocumentOpenFailed`], [`PipelineError::TextExtractionFailed`]
/// or [`PipelineError::ArtifactWriteFailed`].
pub async fn extract_text(
    source: Arc<dyn DocumentSource>,
    document_path: &Path,
    output_path: &Path,
) -> Result<usize, PipelineError> {
    let path = document_path.to_path_buf();
    let pages = tokio::task::spawn_blocking(move || read_pages(source.as_ref(), &path))
        .await
        .map_err(|e| join_error("Text extraction", e))??;

    let contents = pages.join(PAGE_SEPARATOR);
    write_atomic(output_path, contents.as_bytes()).await?;

    info!(
        "Extracted text of {} pages ({} chars) → {}",
        pages.len(),
        contents.chars().count(),
        output_path.display()
    );
    Ok(pages.len())
}

fn read_pages(
    source: &dyn DocumentSource,
    document_path: &Path,
) -> Result<Vec<String>, PipelineError> {
    let mut pages = Vec::new();
    source.with_document(document_path, &mut |doc| {
        for index in 0..doc.page_count() {
            let text = doc
                .page_text(index)
                .map_err(|e| PipelineError::TextExtractionFailed {
                    path: document_path.to_path_buf(),
                    detail: format!("page {}: {}", index + 1, e),
                })?;
            pages.push(text);
        }
        Ok(())
    })?;
    Ok(pages)
}
