//! Analysis engines: one raster image in, text or a layout document out.
//!
//! Two interchangeable variants sit behind [`AnalysisBackend`]:
//!
//! | Backend | Module | Payload | Default sink |
//! |---------|--------|---------|--------------|
//! | `ocr` | [`ocr`] (feature `ocr`) | [`AnalysisPayload::Text`] | `ocr.txt` |
//! | `structure` | [`vlm`] | [`AnalysisPayload::Structured`] | `structure_json/` |
//!
//! The engine is constructed once via [`build_backend`] and injected into
//! [`crate::Pipeline`]. Tests substitute their own implementation.

#[cfg(feature = "ocr")]
pub mod ocr;
pub mod prompts;
pub mod vlm;

use crate::config::{BackendConfig, BackendKind};
use crate::error::PipelineError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

/// What one successful analysis produced.
#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisPayload {
    /// Recognised plain text.
    Text(String),
    /// A layout document (blocks, bounding boxes, content).
    Structured(serde_json::Value),
}

impl AnalysisPayload {
    pub fn kind(&self) -> PayloadKind {
        match self {
            AnalysisPayload::Text(_) => PayloadKind::Text,
            AnalysisPayload::Structured(_) => PayloadKind::Structured,
        }
    }
}

/// Payload shape a backend produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadKind {
    Text,
    Structured,
}

/// A single failed analysis call. Never fatal to the batch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct BackendError(pub String);

impl BackendError {
    pub fn new(detail: impl Into<String>) -> Self {
        Self(detail.into())
    }
}

/// Black-box engine converting one image file into a payload.
#[async_trait]
pub trait AnalysisBackend: Send + Sync {
    /// Short name used in logs and the analysis report.
    fn name(&self) -> &str;

    fn payload_kind(&self) -> PayloadKind;

    /// Analyse the image at `image`. Must not modify the file.
    async fn analyze(&self, image: &Path) -> Result<AnalysisPayload, BackendError>;
}

/// Construct the engine described by `config`.
///
/// Call once at process start and share the result across tasks; model
/// loading and provider setup are the expensive part.
///
/// # Errors
/// [`PipelineError::BackendUnavailable`] if the engine cannot be built:
/// OCR models missing, OCR support not compiled in, or no LLM provider
/// configured.
pub fn build_backend(config: &BackendConfig) -> Result<Arc<dyn AnalysisBackend>, PipelineError> {
    let backend: Arc<dyn AnalysisBackend> = match config.kind {
        BackendKind::Ocr => build_ocr(config)?,
        BackendKind::Structure => Arc::new(vlm::StructureBackend::from_config(config)?),
    };
    info!("Analysis backend ready: {}", backend.name());
    Ok(backend)
}

#[cfg(feature = "ocr")]
fn build_ocr(config: &BackendConfig) -> Result<Arc<dyn AnalysisBackend>, PipelineError> {
    Ok(Arc::new(ocr::OcrBackend::new(config.ocr_model_dir.as_deref())?))
}

#[cfg(not(feature = "ocr"))]
fn build_ocr(_config: &BackendConfig) -> Result<Arc<dyn AnalysisBackend>, PipelineError> {
    Err(PipelineError::BackendUnavailable {
        backend: BackendKind::Ocr.to_string(),
        hint: "This build has no OCR engine. Rebuild with `--features ocr`, \
               or use the structure backend."
            .to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_kind_matches_variant() {
        assert_eq!(AnalysisPayload::Text("x".into()).kind(), PayloadKind::Text);
        assert_eq!(
            AnalysisPayload::Structured(serde_json::json!({"blocks": []})).kind(),
            PayloadKind::Structured
        );
    }

    #[cfg(not(feature = "ocr"))]
    #[test]
    fn ocr_without_feature_is_unavailable() {
        let err = build_backend(&BackendConfig::new(BackendKind::Ocr))
            .err()
            .unwrap();
        assert!(matches!(err, PipelineError::BackendUnavailable { .. }));
        assert!(err.to_string().contains("--features ocr"));
    }
}
