//! Page rasterisation: every page to `images/page_<n>.png`.
//!
//! ## Why spawn_blocking?
//!
//! pdfium wraps a C++ library with thread-local state that is not safe to
//! call from async contexts. The whole stage, from opening the document
//! through the last PNG write, runs on one blocking-pool thread. The document
//! handle never crosses threads and is dropped when the stage ends, whether
//! it succeeded or not.
//!
//! ## Why no manifest?
//!
//! Filenames self-describe their ordinal. [`discover_pages`] recomputes the
//! ordered page list from a directory, and [`verify_gapless`] checks the
//! `1..=N` invariant.

use super::join_error;
use crate::document::{DocumentSource, RenderOptions};
use crate::error::PipelineError;
use image::{DynamicImage, ImageFormat};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

static PAGE_FILENAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"^page_([0-9]+)\.png$").unwrap());

/// One rasterised page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageImage {
    /// 1-based page ordinal, matching the source page order.
    pub page_index: usize,
    pub path: PathBuf,
}

impl PageImage {
    pub fn filename(&self) -> String {
        page_filename(self.page_index)
    }
}

/// `page_<n>.png` for 1-based `n`.
pub fn page_filename(page_index: usize) -> String {
    format!("page_{page_index}.png")
}

/// Recover the page ordinal from a rasterised page filename.
///
/// ```
/// use pagemill::pipeline::rasterize::parse_page_ordinal;
/// assert_eq!(parse_page_ordinal("page_12.png"), Some(12));
/// assert_eq!(parse_page_ordinal("page2_img1.png"), None);
/// ```
pub fn parse_page_ordinal(filename: &str) -> Option<usize> {
    PAGE_FILENAME
        .captures(filename)
        .and_then(|c| c[1].parse().ok())
        .filter(|&n| n > 0)
}

/// Check that `pages` carries exactly the ordinals `1..=pages.len()` in order.
pub fn verify_gapless(pages: &[PageImage]) -> Result<(), PipelineError> {
    for (i, page) in pages.iter().enumerate() {
        if page.page_index != i + 1 {
            return Err(PipelineError::Internal(format!(
                "page ordinals not gapless: position {} holds page {}",
                i + 1,
                page.page_index
            )));
        }
    }
    Ok(())
}

/// Recompute the ordered page list from the files in `dir`.
///
/// Files that are not `page_<n>.png` (embedded images, temp files) are ignored.
pub async fn discover_pages(dir: &Path) -> Result<Vec<PageImage>, PipelineError> {
    let read_err = |e| PipelineError::ArtifactWriteFailed {
        path: dir.to_path_buf(),
        source: e,
    };

    let mut entries = tokio::fs::read_dir(dir).await.map_err(read_err)?;
    let mut pages = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(read_err)? {
        let name = entry.file_name();
        if let Some(page_index) = name.to_str().and_then(parse_page_ordinal) {
            pages.push(PageImage {
                page_index,
                path: entry.path(),
            });
        }
    }
    pages.sort_by_key(|p| p.page_index);
    Ok(pages)
}

/// Render every page of `document_path` into `output_dir`.
///
/// # Errors
/// - [`PipelineError::DocumentOpenFailed`] if the document cannot be opened
/// - [`PipelineError::RasterisationFailed`] on the first page that fails to render
/// - [`PipelineError::ArtifactWriteFailed`] if a PNG cannot be written
pub async fn rasterize_pages(
    source: Arc<dyn DocumentSource>,
    document_path: &Path,
    output_dir: &Path,
    options: RenderOptions,
) -> Result<Vec<PageImage>, PipelineError> {
    let document_path = document_path.to_path_buf();
    let output_dir = output_dir.to_path_buf();

    let pages = tokio::task::spawn_blocking(move || {
        rasterize_blocking(source.as_ref(), &document_path, &output_dir, options)
    })
    .await
    .map_err(|e| join_error("Rasterisation", e))??;

    verify_gapless(&pages)?;
    info!("Rasterised {} pages", pages.len());
    Ok(pages)
}

fn rasterize_blocking(
    source: &dyn DocumentSource,
    document_path: &Path,
    output_dir: &Path,
    options: RenderOptions,
) -> Result<Vec<PageImage>, PipelineError> {
    std::fs::create_dir_all(output_dir).map_err(|e| PipelineError::ArtifactWriteFailed {
        path: output_dir.to_path_buf(),
        source: e,
    })?;

    let mut pages = Vec::new();
    source.with_document(document_path, &mut |doc| {
        let total = doc.page_count();
        info!("Rasterising {} pages at {} DPI", total, options.dpi);

        for index in 0..total {
            let page_index = index + 1;
            let render_err = |detail: String| PipelineError::RasterisationFailed {
                path: document_path.to_path_buf(),
                page: page_index,
                detail,
            };

            let image = doc
                .render_page(index, options)
                .map_err(|e| render_err(e.to_string()))?;
            let png = encode_png(&image).map_err(|e| render_err(e.to_string()))?;

            let path = output_dir.join(page_filename(page_index));
            std::fs::write(&path, &png).map_err(|e| PipelineError::ArtifactWriteFailed {
                path: path.clone(),
                source: e,
            })?;
            debug!("Page {}/{} → {}", page_index, total, path.display());

            pages.push(PageImage { page_index, path });
        }
        Ok(())
    })?;

    Ok(pages)
}

fn encode_png(image: &DynamicImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    image.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)?;
    Ok(buf)
}
