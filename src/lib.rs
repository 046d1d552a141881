//! # pagemill
//!
//! Turn a PDF into a durable, per-document task workspace: rasterised page
//! images, extracted embedded images with stable identifiers, the document's
//! text layer, and machine-readable OCR text or layout JSON for every image.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Workspace  fresh task id + tasks/<id>/Book.pdf
//!  ├─ 2. Text       text layer → contents.txt
//!  ├─ 3. Render     every page → images/page_<n>.png (pdfium, spawn_blocking)
//!  ├─ 4. Extract    native image streams → images/page<p>_img<i>.<ext> + images.json
//!  ├─ 5. Analyse    OCR or vision-LLM layout per image, failures isolated per item
//!  └─ 6. Report     ocr.txt or structure_json/, plus analysis.json
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pagemill::{build_backend, BackendConfig, BackendKind, Pipeline, PipelineConfig};
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Build the engine once; reuse it for every document.
//!     let backend = build_backend(&BackendConfig::new(BackendKind::Structure))?;
//!     let pipeline = Pipeline::with_pdfium(PipelineConfig::default(), backend);
//!
//!     let output = pipeline.process_document(Path::new("Book.pdf")).await?;
//!     println!("task: {}", output.root().display());
//!     eprintln!(
//!         "{} ok / {} failed",
//!         output.report.summary.success_count,
//!         output.report.summary.failure_count
//!     );
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pagemill` binary (clap + anyhow + tracing-subscriber + indicatif) |
//! | `ocr`   | off     | Local OCR backend via `ocrs` + `rten` |
//!
//! ## Backends
//!
//! | Backend | Needs | Output |
//! |---------|-------|--------|
//! | `ocr` | feature `ocr`, `text-detection.rten` + `text-recognition.rten` | `ocr.txt` |
//! | `structure` | an LLM API key (`OPENAI_API_KEY`, `ANTHROPIC_API_KEY`, …) or a local provider | `structure_json/<stem>.json` |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod analysis;
pub mod cancel;
pub mod config;
pub mod document;
pub mod error;
pub mod orchestrator;
pub mod pipeline;
pub mod progress;
pub mod runner;
pub mod sink;
pub mod task;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use analysis::{build_backend, AnalysisBackend, AnalysisPayload, BackendError, PayloadKind};
pub use cancel::CancelToken;
pub use config::{AnalysisTarget, BackendConfig, BackendKind, PipelineConfig, PipelineConfigBuilder};
pub use document::{DocumentSource, SourceDocument};
pub use error::{ItemError, PipelineError, Stage};
pub use orchestrator::{process_document, Pipeline, PipelineState, TaskOutput};
pub use pipeline::extract::{load_manifest, ExtractedImage, ManifestEntry};
pub use pipeline::rasterize::{parse_page_ordinal, PageImage};
pub use progress::{NoopProgressCallback, PipelineProgressCallback, ProgressCallback};
pub use runner::{
    run_analysis, AnalysisItem, AnalysisReport, AnalysisResult, AnalysisStatus, AnalysisSummary,
};
pub use sink::OutputSink;
pub use task::{create_task, Task};
