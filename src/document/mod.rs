//! Document access: the capability every extraction stage is written against.
//!
//! Stages never touch pdfium directly. They ask a [`DocumentSource`] to open
//! a file and hand them a [`SourceDocument`] for the duration of one closure.
//! When the closure returns, the handle is released, and that holds on the
//! error path too. The shape gives two guarantees:
//!
//! 1. A document handle is scoped to exactly one stage and used by one
//!    thread. pdfium keeps thread-local state and is not re-entrant.
//! 2. Tests can substitute an in-memory source and exercise rasterisation,
//!    extraction and the orchestrator without a pdfium library on disk.
//!
//! The production implementation is [`pdfium::PdfiumSource`]: pdfium renders
//! pages and reads the text layer, and [`xobject`] pulls native image streams
//! out of the object graph via lopdf.

pub mod pdfium;
pub mod xobject;

use crate::error::PipelineError;
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use thiserror::Error;

/// A failure reading one page of an already-open document.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DocumentError {
    /// The page itself could not be loaded, rendered or read.
    #[error("{0}")]
    Page(String),
    /// One embedded image on the page is malformed (1-based `index`).
    #[error("image {index}: {detail}")]
    Image { index: usize, detail: String },
}

/// Native encoding of an embedded image as stored in the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageEncoding {
    /// Baseline / progressive JPEG (`DCTDecode`).
    Jpeg,
    /// JPEG 2000 codestream (`JPXDecode`).
    Jpx,
    /// JBIG2 bilevel stream (`JBIG2Decode`).
    Jbig2,
    /// CCITT Group 3/4 fax data (`CCITTFaxDecode`).
    Ccitt,
    /// Raw samples (uncompressed, Flate or LZW) re-encoded losslessly as PNG.
    Png,
    /// A layout with no standalone file format; the stream bytes as stored.
    Raw,
}

impl ImageEncoding {
    /// File extension used for the extracted file.
    pub fn extension(&self) -> &'static str {
        match self {
            ImageEncoding::Jpeg => "jpeg",
            ImageEncoding::Jpx => "jpx",
            ImageEncoding::Jbig2 => "jb2",
            ImageEncoding::Ccitt => "ccitt",
            ImageEncoding::Png => "png",
            ImageEncoding::Raw => "bin",
        }
    }
}

impl fmt::Display for ImageEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// One natively embedded raster image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddedImage {
    /// File bytes ready to be written as-is.
    pub bytes: Vec<u8>,
    pub encoding: ImageEncoding,
    pub width: u32,
    pub height: u32,
}

/// Rendering parameters for one page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderOptions {
    pub dpi: u32,
    /// Longest-edge cap in pixels.
    pub max_pixels: u32,
}

/// An open document. Page indices are 0-based.
pub trait SourceDocument {
    fn page_count(&self) -> usize;

    fn render_page(
        &self,
        index: usize,
        options: RenderOptions,
    ) -> Result<DynamicImage, DocumentError>;

    /// The page's text layer (empty for purely scanned pages).
    fn page_text(&self, index: usize) -> Result<String, DocumentError>;

    /// Embedded raster images in their native order on the page.
    fn embedded_images(&self, index: usize) -> Result<Vec<EmbeddedImage>, DocumentError>;
}

/// Closure receiving an open document; see [`DocumentSource::with_document`].
pub type DocumentVisitor<'v> = dyn FnMut(&dyn SourceDocument) -> Result<(), PipelineError> + 'v;

/// Opens documents. Implementations must be shareable across tasks.
pub trait DocumentSource: Send + Sync {
    /// Open `path`, run `visit` against it, then release the handle.
    ///
    /// # Errors
    /// [`PipelineError::DocumentOpenFailed`] if the file is unreadable or
    /// corrupt; otherwise whatever `visit` returns.
    fn with_document(
        &self,
        path: &Path,
        visit: &mut DocumentVisitor<'_>,
    ) -> Result<(), PipelineError>;
}
