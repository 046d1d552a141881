//! pdfium-backed [`DocumentSource`].
//!
//! pdfium renders pages and reads the text layer. Embedded images are
//! read with lopdf instead (see [`super::xobject`]) because pdfium only
//! exposes decoded bitmaps and we want the bytes exactly as stored.
//!
//! A fresh `Pdfium` binding is created per [`DocumentSource::with_document`]
//! call and dropped with the document, so each stage owns its handle for
//! exactly as long as it runs.

use super::{
    xobject, DocumentError, DocumentSource, DocumentVisitor, EmbeddedImage, RenderOptions,
    SourceDocument,
};
use crate::error::PipelineError;
use image::DynamicImage;
use once_cell::unsync::OnceCell;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Opens documents with pdfium (plus lopdf for raw image streams).
#[derive(Debug, Clone, Default)]
pub struct PdfiumSource {
    library_path: Option<PathBuf>,
}

impl PdfiumSource {
    /// `library_path` points at the pdfium shared library file. If None,
    /// the library is looked up next to the working directory and then in
    /// the system library path.
    pub fn new(library_path: Option<PathBuf>) -> Self {
        Self { library_path }
    }

    /// Bind to the pdfium library.
    pub fn bind(&self) -> Result<Pdfium, PipelineError> {
        let bindings = match &self.library_path {
            Some(path) => Pdfium::bind_to_library(path),
            None => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
                .or_else(|_| Pdfium::bind_to_system_library()),
        }
        .map_err(|e| PipelineError::PdfEngineUnavailable(format!("{:?}", e)))?;

        Ok(Pdfium::new(bindings))
    }

    /// Check that the library can be bound, without opening anything.
    pub fn probe(&self) -> Result<(), PipelineError> {
        self.bind().map(|_| ())
    }
}

impl DocumentSource for PdfiumSource {
    fn with_document(
        &self,
        path: &Path,
        visit: &mut DocumentVisitor<'_>,
    ) -> Result<(), PipelineError> {
        let pdfium = self.bind()?;

        let document =
            pdfium
                .load_pdf_from_file(path, None)
                .map_err(|e| PipelineError::DocumentOpenFailed {
                    path: path.to_path_buf(),
                    detail: format!("{:?}", e),
                })?;

        let adapter = PdfiumDocument {
            path,
            document: &document,
            objects: OnceCell::new(),
        };
        info!("Document opened: {} pages", adapter.page_count());

        visit(&adapter)
    }
}

/// lopdf view of the same file, loaded on first image request.
struct ObjectGraph {
    document: lopdf::Document,
    page_ids: Vec<lopdf::ObjectId>,
}

struct PdfiumDocument<'d, 'p> {
    path: &'d Path,
    document: &'d PdfDocument<'p>,
    objects: OnceCell<ObjectGraph>,
}

impl<'p> PdfiumDocument<'_, 'p> {
    fn page(&self, index: usize) -> Result<PdfPage<'p>, DocumentError> {
        self.document
            .pages()
            .get(index as u16)
            .map_err(|e| DocumentError::Page(format!("{:?}", e)))
    }

    fn object_graph(&self) -> Result<&ObjectGraph, DocumentError> {
        self.objects.get_or_try_init(|| {
            let document = lopdf::Document::load(self.path)
                .map_err(|e| DocumentError::Page(format!("object graph unreadable: {e}")))?;
            // get_pages() is keyed by 1-based page number, so values come out in page order.
            let page_ids = document.get_pages().into_values().collect();
            Ok(ObjectGraph { document, page_ids })
        })
    }
}

impl SourceDocument for PdfiumDocument<'_, '_> {
    fn page_count(&self) -> usize {
        self.document.pages().len() as usize
    }

    fn render_page(
        &self,
        index: usize,
        options: RenderOptions,
    ) -> Result<DynamicImage, DocumentError> {
        let page = self.page(index)?;

        let scale = options.dpi as f32 / 72.0;
        let width_px = page.width().value.max(1.0) * scale;
        let height_px = page.height().value.max(1.0) * scale;
        let longest = width_px.max(height_px);
        let target_width = if longest > options.max_pixels as f32 {
            width_px * options.max_pixels as f32 / longest
        } else {
            width_px
        };

        let render_config =
            PdfRenderConfig::new().set_target_width(target_width.round().max(1.0) as i32);

        let bitmap = page
            .render_with_config(&render_config)
            .map_err(|e| DocumentError::Page(format!("{:?}", e)))?;

        let image = bitmap.as_image();
        debug!(
            "Rendered page {} → {}x{} px",
            index + 1,
            image.width(),
            image.height()
        );
        Ok(image)
    }

    fn page_text(&self, index: usize) -> Result<String, DocumentError> {
        let page = self.page(index)?;
        let text = page
            .text()
            .map_err(|e| DocumentError::Page(format!("{:?}", e)))?;
        Ok(text.all())
    }

    fn embedded_images(&self, index: usize) -> Result<Vec<EmbeddedImage>, DocumentError> {
        let graph = self.object_graph()?;
        let page_id = graph.page_ids.get(index).copied().ok_or_else(|| {
            DocumentError::Page(format!(
                "page {} missing from page tree ({} pages)",
                index + 1,
                graph.page_ids.len()
            ))
        })?;
        xobject::page_images(&graph.document, page_id)
    }
}
