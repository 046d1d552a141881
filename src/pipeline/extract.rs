//! Embedded image extraction and the `images.json` manifest.
//!
//! Pages are visited in order and, within a page, images in their native
//! resource order. Each image is written as `page<p>_img<i>.<ext>` and gets
//! an id. The manifest is published only after every image is on disk, via
//! temp file + rename, so a crash mid-extraction never leaves a manifest that
//! points at missing files.
//!
//! Unlike analysis, extraction has no per-item tolerance: the first corrupt
//! image aborts the stage with [`PipelineError::EmbeddedImageCorrupt`].

use super::{join_error, write_atomic};
use crate::document::{DocumentError, DocumentSource, ImageEncoding};
use crate::error::PipelineError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Namespace for content-derived image ids.
const IMAGE_ID_NAMESPACE: Uuid = Uuid::from_u128(0x5b1c_9e4a_2f7d_4c3e_9a61_d0e8_47b2_a913);

/// One record of `images.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub id: Uuid,
    pub filename: String,
    pub path: PathBuf,
}

/// An embedded image written to the task's image directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtractedImage {
    pub id: Uuid,
    /// 1-based page ordinal.
    pub page_index: usize,
    /// 1-based position among the page's images.
    pub ordinal_on_page: usize,
    pub path: PathBuf,
    pub source_format: ImageEncoding,
}

impl ExtractedImage {
    pub fn filename(&self) -> String {
        embedded_filename(self.page_index, self.ordinal_on_page, self.source_format)
    }

    pub fn manifest_entry(&self) -> ManifestEntry {
        ManifestEntry {
            id: self.id,
            filename: self.filename(),
            path: self.path.clone(),
        }
    }
}

/// Outcome of [`extract_embedded_images`].
#[derive(Debug, Clone)]
pub struct Extraction {
    /// Images in manifest order.
    pub images: Vec<ExtractedImage>,
    pub manifest_path: PathBuf,
}

impl Extraction {
    pub fn count(&self) -> usize {
        self.images.len()
    }
}

/// `page<p>_img<i>.<ext>`.
pub fn embedded_filename(page_index: usize, ordinal: usize, format: ImageEncoding) -> String {
    format!("page{}_img{}.{}", page_index, ordinal, format.extension())
}

/// Id for one image: random, or UUID v5 over `(page, ordinal, bytes)`.
pub fn image_id(deterministic: bool, page_index: usize, ordinal: usize, bytes: &[u8]) -> Uuid {
    if !deterministic {
        return Uuid::new_v4();
    }
    let mut name = Vec::with_capacity(16 + bytes.len());
    name.extend_from_slice(&(page_index as u64).to_be_bytes());
    name.extend_from_slice(&(ordinal as u64).to_be_bytes());
    name.extend_from_slice(bytes);
    Uuid::new_v5(&IMAGE_ID_NAMESPACE, &name)
}

/// Extract every embedded image of `document_path` into `output_dir` and
/// publish the manifest at `manifest_path`.
///
/// A document without images yields `count() == 0` and an empty manifest.
pub async fn extract_embedded_images(
    source: Arc<dyn DocumentSource>,
    document_path: &Path,
    output_dir: &Path,
    manifest_path: &Path,
    deterministic_ids: bool,
) -> Result<Extraction, PipelineError> {
    let document_path = document_path.to_path_buf();
    let output_dir = output_dir.to_path_buf();

    let images = tokio::task::spawn_blocking(move || {
        extract_blocking(source.as_ref(), &document_path, &output_dir, deterministic_ids)
    })
    .await
    .map_err(|e| join_error("Image extraction", e))??;

    let entries: Vec<ManifestEntry> = images.iter().map(ExtractedImage::manifest_entry).collect();
    write_manifest(manifest_path, &entries).await?;

    info!(
        "Extracted {} embedded images → {}",
        images.len(),
        manifest_path.display()
    );
    Ok(Extraction {
        images,
        manifest_path: manifest_path.to_path_buf(),
    })
}

fn extract_blocking(
    source: &dyn DocumentSource,
    document_path: &Path,
    output_dir: &Path,
    deterministic_ids: bool,
) -> Result<Vec<ExtractedImage>, PipelineError> {
    std::fs::create_dir_all(output_dir).map_err(|e| PipelineError::ArtifactWriteFailed {
        path: output_dir.to_path_buf(),
        source: e,
    })?;

    let mut extracted = Vec::new();
    source.with_document(document_path, &mut |doc| {
        for index in 0..doc.page_count() {
            let page_index = index + 1;
            let corrupt = |index: usize, detail: String| PipelineError::EmbeddedImageCorrupt {
                path: document_path.to_path_buf(),
                page: page_index,
                index,
                detail,
            };

            let images = doc.embedded_images(index).map_err(|e| match e {
                DocumentError::Image { index, detail } => corrupt(index, detail),
                DocumentError::Page(detail) => corrupt(0, detail),
            })?;

            for (i, image) in images.into_iter().enumerate() {
                let ordinal_on_page = i + 1;
                let filename = embedded_filename(page_index, ordinal_on_page, image.encoding);
                let path = output_dir.join(&filename);

                std::fs::write(&path, &image.bytes)
                    .map_err(|e| corrupt(ordinal_on_page, e.to_string()))?;
                debug!("Page {}: {} ({} bytes)", page_index, filename, image.bytes.len());

                extracted.push(ExtractedImage {
                    id: image_id(deterministic_ids, page_index, ordinal_on_page, &image.bytes),
                    page_index,
                    ordinal_on_page,
                    path,
                    source_format: image.encoding,
                });
            }
        }
        Ok(())
    })?;

    Ok(extracted)
}

/// Serialise `entries` as a 4-space-indented JSON array and publish it atomically.
pub async fn write_manifest(path: &Path, entries: &[ManifestEntry]) -> Result<(), PipelineError> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
    entries
        .serialize(&mut serializer)
        .map_err(|e| PipelineError::Internal(format!("manifest serialisation failed: {e}")))?;

    write_atomic(path, &buf).await
}

/// Parse a published manifest back from disk.
pub async fn load_manifest(path: &Path) -> Result<Vec<ManifestEntry>, PipelineError> {
    let unreadable = |detail: String| PipelineError::ManifestUnreadable {
        path: path.to_path_buf(),
        detail,
    };
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| unreadable(e.to_string()))?;
    serde_json::from_slice(&bytes).map_err(|e| unreadable(e.to_string()))
}
