//! Error types for the pagemill library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`PipelineError`] — **Fatal**: the task cannot proceed (source missing,
//!   workspace not writable, document corrupt, backend not constructible).
//!   Returned as `Err(PipelineError)` from the orchestrator and every stage.
//!
//! * [`ItemError`] — **Non-fatal**: a single image failed analysis (engine
//!   error, unreadable image, artifact could not be persisted). Stored inside
//!   [`crate::runner::AnalysisResult`] so the rest of the batch carries on.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Pipeline stage an error or state transition belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Backend / engine construction before any task exists.
    Setup,
    /// Task identity allocation and source copy.
    Workspace,
    /// Full-text extraction into `contents.txt`.
    ExtractText,
    /// Page rasterisation.
    Rasterize,
    /// Embedded image extraction and manifest publish.
    ExtractImages,
    /// Per-item analysis.
    Analyze,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Setup => "setup",
            Stage::Workspace => "workspace",
            Stage::ExtractText => "text extraction",
            Stage::Rasterize => "rasterisation",
            Stage::ExtractImages => "image extraction",
            Stage::Analyze => "analysis",
        };
        f.write_str(name)
    }
}

/// All fatal errors returned by the pagemill library.
///
/// Per-item analysis failures use [`ItemError`] and are recorded in the
/// analysis report rather than propagated here.
#[derive(Debug, Error)]
pub enum PipelineError {
    // ── Workspace errors ──────────────────────────────────────────────────
    /// The submitted document does not exist or is not a regular file.
    #[error("Source document not found: '{path}'\nCheck the path exists and is readable.")]
    SourceNotFound { path: PathBuf },

    /// The task directory could not be created or the source could not be copied.
    #[error("Failed to create task workspace '{path}': {source}")]
    WorkspaceCreateFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Document errors ───────────────────────────────────────────────────
    /// The document could not be opened (unreadable, corrupt, encrypted).
    #[error("Failed to open document '{path}': {detail}")]
    DocumentOpenFailed { path: PathBuf, detail: String },

    /// A page could not be rendered; rasterisation of the whole document aborts.
    #[error("Rasterisation failed for page {page} of '{path}': {detail}")]
    RasterisationFailed {
        path: PathBuf,
        page: usize,
        detail: String,
    },

    /// An embedded image stream could not be decoded or written.
    #[error("Embedded image {index} on page {page} of '{path}' is corrupt: {detail}")]
    EmbeddedImageCorrupt {
        path: PathBuf,
        page: usize,
        index: usize,
        detail: String,
    },

    /// The text layer could not be read.
    #[error("Text extraction failed for '{path}': {detail}")]
    TextExtractionFailed { path: PathBuf, detail: String },

    /// An output artifact (manifest, report, page image, text) could not be written.
    #[error("Failed to write artifact '{path}': {source}")]
    ArtifactWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A published manifest could not be read back or parsed.
    #[error("Manifest '{path}' is unreadable: {detail}")]
    ManifestUnreadable { path: PathBuf, detail: String },

    // ── Engine errors ─────────────────────────────────────────────────────
    /// The analysis engine could not be constructed.
    #[error("Analysis backend '{backend}' is unavailable.\n{hint}")]
    BackendUnavailable { backend: String, hint: String },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
Place libpdfium next to the binary, install it system-wide, or point\n\
--pdfium-lib / PAGEMILL_PDFIUM_LIB at the library file.\n"
    )]
    PdfEngineUnavailable(String),

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single analysed image.
#[derive(Debug, Clone, PartialEq, Error, serde::Serialize, serde::Deserialize)]
pub enum ItemError {
    /// The backend reported an error on every attempt.
    #[error("{subject}: analysis failed after {attempts} attempt(s): {detail}")]
    AnalysisFailed {
        subject: String,
        attempts: u32,
        detail: String,
    },

    /// Analysis succeeded but the output sink could not store the payload.
    #[error("{subject}: failed to persist artifact: {detail}")]
    PersistFailed { subject: String, detail: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_not_found_names_path() {
        let e = PipelineError::SourceNotFound {
            path: PathBuf::from("missing/Book.pdf"),
        };
        assert!(e.to_string().contains("missing/Book.pdf"));
    }

    #[test]
    fn corrupt_image_names_page_and_cause() {
        let e = PipelineError::EmbeddedImageCorrupt {
            path: PathBuf::from("Book.pdf"),
            page: 2,
            index: 1,
            detail: "sample count mismatch".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("page 2"), "got: {msg}");
        assert!(msg.contains("sample count mismatch"));
    }

    #[test]
    fn backend_unavailable_carries_hint() {
        let e = PipelineError::BackendUnavailable {
            backend: "ocr".into(),
            hint: "models missing".into(),
        };
        assert!(e.to_string().contains("models missing"));
    }

    #[test]
    fn open_failure_names_document() {
        let e = PipelineError::DocumentOpenFailed {
            path: PathBuf::from("x.pdf"),
            detail: "bad xref".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("x.pdf"), "got: {msg}");
        assert!(msg.contains("bad xref"));
    }

    #[test]
    fn item_error_display() {
        let e = ItemError::AnalysisFailed {
            subject: "page_2.png".into(),
            attempts: 3,
            detail: "engine timeout".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("page_2.png"));
        assert!(msg.contains("3 attempt"));
    }

    #[test]
    fn stage_display() {
        assert_eq!(Stage::ExtractImages.to_string(), "image extraction");
    }
}
