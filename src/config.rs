//! Configuration types for task processing.
//!
//! Two structs, two lifetimes:
//!
//! * [`PipelineConfig`] — per-run knobs (workspace root, DPI, which stages run,
//!   retry and concurrency policy). Cheap to clone, built via
//!   [`PipelineConfigBuilder`].
//! * [`BackendConfig`] — how to construct the analysis engine. The engine is
//!   built once at process start (see [`crate::analysis::build_backend`]) and
//!   then shared by every task, so its settings live apart from the per-run ones.

use crate::error::PipelineError;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Default directory under which every task workspace is created.
pub const DEFAULT_TASKS_ROOT: &str = "tasks";

/// Configuration for one document run.
///
/// # Example
/// ```rust
/// use pagemill::{AnalysisTarget, PipelineConfig};
///
/// let config = PipelineConfig::builder()
///     .tasks_root("/var/lib/pagemill/tasks")
///     .dpi(300)
///     .extract_embedded(true)
///     .analysis_target(AnalysisTarget::EmbeddedImages)
///     .build()
///     .unwrap();
/// assert_eq!(config.dpi, 300);
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Directory that holds one sub-directory per task. Default: `tasks`.
    pub tasks_root: PathBuf,

    /// Rendering DPI for page rasterisation. Range: 72–600. Default: 200.
    ///
    /// 200 DPI keeps body text legible to both OCR and layout models without
    /// producing multi-megabyte PNGs for ordinary letter/A4 pages.
    pub dpi: u32,

    /// Longest-edge cap in pixels for a rendered page. Default: 6000.
    ///
    /// Guards against posters and drawings whose physical size turns a
    /// sensible DPI into a gigapixel bitmap.
    pub max_rendered_pixels: u32,

    /// Write the document's text layer to `contents.txt`. Default: true.
    pub extract_text: bool,

    /// Rasterise every page to `images/page_<n>.png`. Default: true.
    pub rasterize_pages: bool,

    /// Pull natively embedded images into `images/` and publish `images.json`. Default: false.
    pub extract_embedded: bool,

    /// Which image set the analysis runner consumes. Default: [`AnalysisTarget::Pages`].
    pub analysis_target: AnalysisTarget,

    /// Maximum number of items analysed at once. Default: 1 (strictly sequential).
    ///
    /// Output order never depends on this value: artifacts are written in
    /// input order whatever order the engine finishes in.
    pub concurrency: usize,

    /// Extra attempts per item after a backend failure. Default: 0.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled per attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// Derive embedded-image ids from their content instead of drawing fresh
    /// random ones. Default: false.
    ///
    /// Deterministic ids (UUID v5 over page, ordinal and bytes) let downstream
    /// caches deduplicate re-runs of the same document.
    pub deterministic_image_ids: bool,

    /// Explicit pdfium library file. If None, looks next to the binary and
    /// then in the system library path.
    pub pdfium_library_path: Option<PathBuf>,

    /// Optional progress callback for stage and per-item events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            tasks_root: PathBuf::from(DEFAULT_TASKS_ROOT),
            dpi: 200,
            max_rendered_pixels: 6000,
            extract_text: true,
            rasterize_pages: true,
            extract_embedded: false,
            analysis_target: AnalysisTarget::default(),
            concurrency: 1,
            max_retries: 0,
            retry_backoff_ms: 500,
            deterministic_image_ids: false,
            pdfium_library_path: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("tasks_root", &self.tasks_root)
            .field("dpi", &self.dpi)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("extract_text", &self.extract_text)
            .field("rasterize_pages", &self.rasterize_pages)
            .field("extract_embedded", &self.extract_embedded)
            .field("analysis_target", &self.analysis_target)
            .field("concurrency", &self.concurrency)
            .field("max_retries", &self.max_retries)
            .field("deterministic_image_ids", &self.deterministic_image_ids)
            .field("pdfium_library_path", &self.pdfium_library_path)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn PipelineProgressCallback>"),
            )
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn tasks_root(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.tasks_root = dir.into();
        self
    }

    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 600);
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn extract_text(mut self, v: bool) -> Self {
        self.config.extract_text = v;
        self
    }

    pub fn rasterize_pages(mut self, v: bool) -> Self {
        self.config.rasterize_pages = v;
        self
    }

    pub fn extract_embedded(mut self, v: bool) -> Self {
        self.config.extract_embedded = v;
        self
    }

    pub fn analysis_target(mut self, target: AnalysisTarget) -> Self {
        self.config.analysis_target = target;
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn deterministic_image_ids(mut self, v: bool) -> Self {
        self.config.deterministic_image_ids = v;
        self
    }

    pub fn pdfium_library_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pdfium_library_path = Some(path.into());
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, PipelineError> {
        let c = &self.config;
        if c.dpi < 72 || c.dpi > 600 {
            return Err(PipelineError::InvalidConfig(format!(
                "DPI must be 72–600, got {}",
                c.dpi
            )));
        }
        if c.concurrency == 0 {
            return Err(PipelineError::InvalidConfig("Concurrency must be ≥ 1".into()));
        }
        if c.tasks_root.as_os_str().is_empty() {
            return Err(PipelineError::InvalidConfig(
                "Tasks root must not be empty".into(),
            ));
        }
        match c.analysis_target {
            AnalysisTarget::Pages if !c.rasterize_pages => {
                return Err(PipelineError::InvalidConfig(
                    "Analysing pages requires page rasterisation to be enabled".into(),
                ));
            }
            AnalysisTarget::EmbeddedImages if !c.extract_embedded => {
                return Err(PipelineError::InvalidConfig(
                    "Analysing embedded images requires image extraction to be enabled".into(),
                ));
            }
            _ => {}
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// The image set handed to the analysis runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisTarget {
    /// Rasterised pages, in page order. (default)
    #[default]
    Pages,
    /// Embedded images, in manifest order.
    EmbeddedImages,
}

/// Which analysis engine to construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Local OCR engine producing plain text (feature `ocr`). (default)
    #[default]
    Ocr,
    /// Vision-LLM layout extraction producing structured JSON.
    Structure,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Ocr => f.write_str("ocr"),
            BackendKind::Structure => f.write_str("structure"),
        }
    }
}

/// Settings used once to construct the analysis engine.
#[derive(Clone)]
pub struct BackendConfig {
    /// Engine variant.
    pub kind: BackendKind,

    /// Directory holding `text-detection.rten` and `text-recognition.rten`.
    /// If None, uses `$XDG_CACHE_HOME/ocrs` (falling back to `~/.cache/ocrs`).
    pub ocr_model_dir: Option<PathBuf>,

    /// LLM provider name (e.g. "openai", "anthropic", "ollama").
    /// If None along with `provider`, uses `ProviderFactory::from_env()`.
    pub provider_name: Option<String>,

    /// LLM model identifier. If None, uses `gpt-4.1-nano`.
    pub model: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature for layout extraction. Default: 0.1.
    pub temperature: f32,

    /// Maximum tokens the model may generate per image. Default: 4096.
    pub max_tokens: usize,

    /// Custom system prompt for the structure backend.
    pub system_prompt: Option<String>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::default(),
            ocr_model_dir: None,
            provider_name: None,
            model: None,
            provider: None,
            temperature: 0.1,
            max_tokens: 4096,
            system_prompt: None,
        }
    }
}

impl fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendConfig")
            .field("kind", &self.kind)
            .field("ocr_model_dir", &self.ocr_model_dir)
            .field("provider_name", &self.provider_name)
            .field("model", &self.model)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

impl BackendConfig {
    /// Config for the given engine variant with every other field defaulted.
    pub fn new(kind: BackendKind) -> Self {
        Self {
            kind,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let c = PipelineConfig::default();
        assert_eq!(c.tasks_root, PathBuf::from("tasks"));
        assert_eq!(c.dpi, 200);
        assert!(c.extract_text);
        assert!(c.rasterize_pages);
        assert!(!c.extract_embedded);
        assert_eq!(c.analysis_target, AnalysisTarget::Pages);
        assert_eq!(c.concurrency, 1);
        assert_eq!(c.max_retries, 0);
        assert!(!c.deterministic_image_ids);
    }

    #[test]
    fn builder_clamps_dpi() {
        let c = PipelineConfig::builder().dpi(10).build().unwrap();
        assert_eq!(c.dpi, 72);
        let c = PipelineConfig::builder().dpi(5000).build().unwrap();
        assert_eq!(c.dpi, 600);
    }

    #[test]
    fn builder_concurrency_floor() {
        let c = PipelineConfig::builder().concurrency(0).build().unwrap();
        assert_eq!(c.concurrency, 1);
    }

    #[test]
    fn target_requires_producing_stage() {
        let err = PipelineConfig::builder()
            .analysis_target(AnalysisTarget::EmbeddedImages)
            .build()
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidConfig(_)));

        let err = PipelineConfig::builder()
            .rasterize_pages(false)
            .build()
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidConfig(_)));

        let ok = PipelineConfig::builder()
            .rasterize_pages(false)
            .extract_embedded(true)
            .analysis_target(AnalysisTarget::EmbeddedImages)
            .build();
        assert!(ok.is_ok());
    }

    #[test]
    fn empty_tasks_root_rejected() {
        let err = PipelineConfig::builder().tasks_root("").build().unwrap_err();
        assert!(err.to_string().contains("Tasks root"));
    }

    #[test]
    fn backend_kind_display() {
        assert_eq!(BackendKind::Ocr.to_string(), "ocr");
        assert_eq!(BackendKind::Structure.to_string(), "structure");
        let cfg = BackendConfig::new(BackendKind::Structure);
        assert_eq!(cfg.kind, BackendKind::Structure);
        assert_eq!(cfg.max_tokens, 4096);
    }
}
