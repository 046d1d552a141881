//! End-to-end processing of one document into one task workspace.
//!
//! ## State machine
//!
//! ```text
//! Start ─▶ WorkspaceCreated ─▶ Rasterized ─▶ ImagesExtracted ─▶ Analyzed ─▶ Done
//!   │            │                  │               │
//!   └────────────┴──────────────────┴───────────────┴──▶ Failed(stage)
//! ```
//!
//! `Rasterized` and `ImagesExtracted` are each skipped when their stage is
//! disabled. `Analyzed` is reached even when individual items fail; only a
//! fatal [`PipelineError`] leads to `Failed`.
//!
//! ## Engine lifecycle
//!
//! The analysis backend is built once by the caller and injected into
//! [`Pipeline::new`], so one engine serves every task the process runs and
//! tests can pass a fake.

use crate::analysis::{build_backend, AnalysisBackend};
use crate::cancel::CancelToken;
use crate::config::{AnalysisTarget, BackendConfig, PipelineConfig};
use crate::document::pdfium::PdfiumSource;
use crate::document::{DocumentSource, RenderOptions};
use crate::error::{PipelineError, Stage};
use crate::pipeline::extract::{self, ExtractedImage, ManifestEntry};
use crate::pipeline::rasterize::{self, PageImage};
use crate::pipeline::text;
use crate::runner::{run_analysis, AnalysisItem, AnalysisReport};
use crate::sink::default_sink;
use crate::task::{create_task, Task};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

/// Where a task currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "stage", rename_all = "snake_case")]
pub enum PipelineState {
    Start,
    WorkspaceCreated,
    Rasterized,
    ImagesExtracted,
    Analyzed,
    Done,
    /// Terminal; names the stage that aborted.
    Failed(Stage),
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineState::Start => f.write_str("start"),
            PipelineState::WorkspaceCreated => f.write_str("workspace created"),
            PipelineState::Rasterized => f.write_str("rasterized"),
            PipelineState::ImagesExtracted => f.write_str("images extracted"),
            PipelineState::Analyzed => f.write_str("analyzed"),
            PipelineState::Done => f.write_str("done"),
            PipelineState::Failed(stage) => write!(f, "failed during {stage}"),
        }
    }
}

/// Everything one run produced. All paths live under `task.root`.
#[derive(Debug, Clone)]
pub struct TaskOutput {
    pub task: Task,
    /// Rasterised pages in page order (empty if rasterisation was off).
    pub pages: Vec<PageImage>,
    /// Manifest as re-read from disk (None if extraction was off).
    pub manifest: Option<Vec<ManifestEntry>>,
    /// Pages whose text went into `contents.txt` (None if text extraction was off).
    pub text_pages: Option<usize>,
    pub report: AnalysisReport,
}

impl TaskOutput {
    /// The handle for every produced artifact.
    pub fn root(&self) -> &Path {
        &self.task.root
    }
}

/// Sequences the stages for one document at a time.
///
/// Cheap to share: `process_document` takes `&self`, and separate calls
/// produce separate tasks that never touch each other's directories.
pub struct Pipeline {
    config: PipelineConfig,
    source: Arc<dyn DocumentSource>,
    backend: Arc<dyn AnalysisBackend>,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        source: Arc<dyn DocumentSource>,
        backend: Arc<dyn AnalysisBackend>,
    ) -> Self {
        Self {
            config,
            source,
            backend,
        }
    }

    /// Pipeline reading documents with pdfium.
    pub fn with_pdfium(config: PipelineConfig, backend: Arc<dyn AnalysisBackend>) -> Self {
        let source = Arc::new(PdfiumSource::new(config.pdfium_library_path.clone()));
        Self::new(config, source, backend)
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Process `source_document` into a fresh task.
    ///
    /// # Returns
    /// `Ok(TaskOutput)` once the task is `Done`, even if some items failed
    /// analysis (see `output.report.summary.failure_count`).
    ///
    /// # Errors
    /// Any fatal [`PipelineError`]; the task directory, if it was created,
    /// is left in place for inspection.
    pub async fn process_document(
        &self,
        source_document: &Path,
    ) -> Result<TaskOutput, PipelineError> {
        self.process_document_with_cancel(source_document, &CancelToken::new())
            .await
    }

    /// As [`process_document`](Self::process_document), stopping analysis at
    /// the next item boundary once `cancel` fires.
    pub async fn process_document_with_cancel(
        &self,
        source_document: &Path,
        cancel: &CancelToken,
    ) -> Result<TaskOutput, PipelineError> {
        let started = Instant::now();
        info!("Processing {}", source_document.display());
        self.transition(PipelineState::Start);

        let mut stage = Stage::Workspace;
        let result = self.run(source_document, cancel, &mut stage).await;

        match &result {
            Ok(output) => info!(
                "Task {} done in {}ms: {}/{} items analysed",
                output.task.id,
                started.elapsed().as_millis(),
                output.report.summary.success_count,
                output.report.summary.item_count
            ),
            Err(e) => {
                error!(
                    document = %source_document.display(),
                    stage = %stage,
                    "Task failed: {}",
                    e
                );
                self.transition(PipelineState::Failed(stage));
            }
        }
        result
    }

    async fn run(
        &self,
        source_document: &Path,
        cancel: &CancelToken,
        stage: &mut Stage,
    ) -> Result<TaskOutput, PipelineError> {
        let config = &self.config;

        // ── Workspace ────────────────────────────────────────────────────
        let task = create_task(&config.tasks_root, source_document).await?;
        self.transition(PipelineState::WorkspaceCreated);
        let document = task.document_path();

        // ── Text layer ───────────────────────────────────────────────────
        let text_pages = if config.extract_text {
            *stage = Stage::ExtractText;
            let contents = task.contents_path();
            Some(text::extract_text(Arc::clone(&self.source), &document, &contents).await?)
        } else {
            None
        };

        // ── Pages ────────────────────────────────────────────────────────
        let pages = if config.rasterize_pages {
            *stage = Stage::Rasterize;
            let options = RenderOptions {
                dpi: config.dpi,
                max_pixels: config.max_rendered_pixels,
            };
            let pages = rasterize::rasterize_pages(
                Arc::clone(&self.source),
                &document,
                &task.images_dir(),
                options,
            )
            .await?;
            self.transition(PipelineState::Rasterized);
            pages
        } else {
            Vec::new()
        };

        // ── Embedded images ──────────────────────────────────────────────
        let manifest = if config.extract_embedded {
            *stage = Stage::ExtractImages;
            let extraction = extract::extract_embedded_images(
                Arc::clone(&self.source),
                &document,
                &task.images_dir(),
                &task.manifest_path(),
                config.deterministic_image_ids,
            )
            .await?;

            // Analyse exactly what the durable checkpoint says exists.
            let entries = extract::load_manifest(&extraction.manifest_path).await?;
            let expected: Vec<ManifestEntry> = extraction
                .images
                .iter()
                .map(ExtractedImage::manifest_entry)
                .collect();
            if entries != expected {
                return Err(PipelineError::ManifestUnreadable {
                    path: extraction.manifest_path,
                    detail: "manifest on disk differs from extracted images".into(),
                });
            }
            self.transition(PipelineState::ImagesExtracted);
            Some(entries)
        } else {
            None
        };

        // ── Analysis ─────────────────────────────────────────────────────
        *stage = Stage::Analyze;
        let items: Vec<AnalysisItem> = match config.analysis_target {
            AnalysisTarget::Pages => pages.iter().map(AnalysisItem::from_page).collect(),
            AnalysisTarget::EmbeddedImages => manifest
                .as_deref()
                .unwrap_or_default()
                .iter()
                .map(AnalysisItem::from_manifest)
                .collect(),
        };

        let mut sink = default_sink(self.backend.payload_kind(), &task);
        let report =
            run_analysis(&items, self.backend.as_ref(), sink.as_mut(), config, cancel).await;
        report.write(&task.report_path()).await?;
        self.transition(PipelineState::Analyzed);

        self.transition(PipelineState::Done);
        Ok(TaskOutput {
            task,
            pages,
            manifest,
            text_pages,
            report,
        })
    }

    fn transition(&self, state: PipelineState) {
        info!("State → {}", state);
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_state(&state);
        }
    }
}

/// Process one document with a freshly built backend and pdfium.
///
/// The backend is constructed before anything touches the filesystem, so
/// [`PipelineError::BackendUnavailable`] leaves no task behind. Returns the
/// task root.
///
/// Long-running callers should build the backend once with
/// [`build_backend`] and reuse a [`Pipeline`] instead.
pub async fn process_document(
    source_document: &Path,
    backend: &BackendConfig,
    config: &PipelineConfig,
) -> Result<PathBuf, PipelineError> {
    let backend = build_backend(backend).inspect_err(|e| {
        error!(
            document = %source_document.display(),
            stage = %Stage::Setup,
            "Task failed: {}",
            e
        );
    })?;

    let output = Pipeline::with_pdfium(config.clone(), backend)
        .process_document(source_document)
        .await?;
    Ok(output.task.root)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_display() {
        assert_eq!(PipelineState::WorkspaceCreated.to_string(), "workspace created");
        assert_eq!(
            PipelineState::Failed(Stage::ExtractImages).to_string(),
            "failed during image extraction"
        );
    }

    #[test]
    fn state_serialises_with_stage() {
        let json = serde_json::to_value(PipelineState::Failed(Stage::Rasterize)).unwrap();
        assert_eq!(json, serde_json::json!({"state": "failed", "stage": "rasterize"}));
        let json = serde_json::to_value(PipelineState::Done).unwrap();
        assert_eq!(json, serde_json::json!({"state": "done"}));
    }

    #[tokio::test]
    async fn unavailable_backend_creates_no_task() {
        let dir = tempfile::TempDir::new().unwrap();
        let source = dir.path().join("in.pdf");
        std::fs::write(&source, b"%PDF").unwrap();
        let tasks_root = dir.path().join("tasks");
        let config = PipelineConfig::builder().tasks_root(&tasks_root).build().unwrap();

        // Fails with or without the `ocr` feature: no engine, or no models.
        let mut backend = BackendConfig::new(crate::config::BackendKind::Ocr);
        backend.ocr_model_dir = Some(dir.path().join("no-models"));

        let err = process_document(&source, &backend, &config).await.unwrap_err();
        assert!(matches!(err, PipelineError::BackendUnavailable { .. }));
        assert!(!tasks_root.exists());
    }
}
