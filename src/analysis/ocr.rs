//! Local OCR backend built on `ocrs` (neural text detection + recognition
//! executed by `rten`).
//!
//! # Model Setup
//!
//! The engine needs two model files in one directory:
//!
//! - `text-detection.rten` locates text regions.
//! - `text-recognition.rten` decodes characters from those regions.
//!
//! Running `ocrs-cli` once downloads both to `$XDG_CACHE_HOME/ocrs`
//! (typically `~/.cache/ocrs`), which is also the default lookup directory.
//!
//! Build `ocrs` and `rten` in release mode; debug builds are 10-100x slower.

use super::{AnalysisBackend, AnalysisPayload, BackendError, PayloadKind};
use crate::config::BackendKind;
use crate::error::PipelineError;
use async_trait::async_trait;
use ocrs::{ImageSource, OcrEngine, OcrEngineParams};
use rten::Model;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

const DETECTION_MODEL_FILENAME: &str = "text-detection.rten";
const RECOGNITION_MODEL_FILENAME: &str = "text-recognition.rten";

/// `$XDG_CACHE_HOME/ocrs`, falling back to `~/.cache/ocrs`.
pub fn default_model_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CACHE_HOME") {
        PathBuf::from(xdg).join("ocrs")
    } else if let Ok(home) = std::env::var("HOME") {
        PathBuf::from(home).join(".cache").join("ocrs")
    } else {
        PathBuf::from("ocrs-models")
    }
}

fn unavailable(hint: String) -> PipelineError {
    PipelineError::BackendUnavailable {
        backend: BackendKind::Ocr.to_string(),
        hint,
    }
}

fn load_model(path: &Path) -> Result<Model, PipelineError> {
    if !path.exists() {
        return Err(unavailable(format!(
            "OCR model not found at {}; run `ocrs-cli` once to download models, \
             or pass --ocr-models <dir>",
            path.display()
        )));
    }
    Model::load_file(path)
        .map_err(|e| unavailable(format!("failed to load OCR model {}: {}", path.display(), e)))
}

/// Plain-text OCR over one image per call.
pub struct OcrBackend {
    engine: Arc<OcrEngine>,
}

impl OcrBackend {
    /// Load both models from `model_dir` (or [`default_model_dir`]).
    pub fn new(model_dir: Option<&Path>) -> Result<Self, PipelineError> {
        let dir = model_dir.map(Path::to_path_buf).unwrap_or_else(default_model_dir);

        info!("Loading OCR models from {}", dir.display());
        let detection_model = load_model(&dir.join(DETECTION_MODEL_FILENAME))?;
        let recognition_model = load_model(&dir.join(RECOGNITION_MODEL_FILENAME))?;

        let engine = OcrEngine::new(OcrEngineParams {
            detection_model: Some(detection_model),
            recognition_model: Some(recognition_model),
            ..Default::default()
        })
        .map_err(|e| unavailable(format!("failed to initialise OCR engine: {e}")))?;

        Ok(Self {
            engine: Arc::new(engine),
        })
    }
}

fn recognize(engine: &OcrEngine, path: &Path) -> Result<String, BackendError> {
    let image = image::open(path)
        .map_err(|e| BackendError::new(format!("cannot decode image: {e}")))?;
    let rgb = image.to_rgb8();
    let (width, height) = rgb.dimensions();

    let source = ImageSource::from_bytes(rgb.as_raw(), (width, height))
        .map_err(|e| BackendError::new(format!("image source ({width}x{height}): {e}")))?;
    let input = engine
        .prepare_input(source)
        .map_err(|e| BackendError::new(format!("OCR preprocessing failed: {e}")))?;
    let text = engine
        .get_text(&input)
        .map_err(|e| BackendError::new(format!("OCR recognition failed: {e}")))?;

    debug!(
        lines = text.lines().count(),
        chars = text.len(),
        "OCR complete for {}",
        path.display()
    );
    Ok(text)
}

#[async_trait]
impl AnalysisBackend for OcrBackend {
    fn name(&self) -> &str {
        "ocr"
    }

    fn payload_kind(&self) -> PayloadKind {
        PayloadKind::Text
    }

    async fn analyze(&self, image: &Path) -> Result<AnalysisPayload, BackendError> {
        let engine = Arc::clone(&self.engine);
        let path = image.to_path_buf();

        let text = tokio::task::spawn_blocking(move || recognize(&engine, &path))
            .await
            .map_err(|e| BackendError::new(format!("OCR task panicked: {e}")))??;

        Ok(AnalysisPayload::Text(text))
    }
}
