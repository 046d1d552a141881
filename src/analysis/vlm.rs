//! Structure backend: layout extraction with a vision LLM.
//!
//! Each image is sent as a base64 attachment together with the layout
//! prompt from [`super::prompts`]. The reply is cleaned up (models wrap JSON
//! in fences despite being told not to) and parsed into a
//! [`serde_json::Value`]. Retries live in the runner, not here.
//!
//! ## Provider resolution
//!
//! From most-specific to least-specific:
//!
//! 1. **Pre-built provider** (`BackendConfig::provider`)
//! 2. **Named provider + model** (`BackendConfig::provider_name`)
//! 3. **Environment pair** (`EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`)
//! 4. **OpenAI key present** (`OPENAI_API_KEY`)
//! 5. **Full auto-detection** (`ProviderFactory::from_env`)

use super::prompts::{DEFAULT_STRUCTURE_PROMPT, STRUCTURE_USER_MESSAGE};
use super::{AnalysisBackend, AnalysisPayload, BackendError, PayloadKind};
use crate::config::{BackendConfig, BackendKind};
use crate::error::PipelineError;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider, ProviderFactory};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Model used when only a provider name is given.
pub const DEFAULT_MODEL: &str = "gpt-4.1-nano";

/// Vision-LLM layout extraction.
pub struct StructureBackend {
    provider: Arc<dyn LLMProvider>,
    system_prompt: String,
    temperature: f32,
    max_tokens: usize,
}

impl StructureBackend {
    /// Use an already-constructed provider.
    pub fn new(provider: Arc<dyn LLMProvider>, config: &BackendConfig) -> Self {
        Self {
            provider,
            system_prompt: config
                .system_prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_STRUCTURE_PROMPT.to_string()),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }

    /// Resolve the provider from `config` and the environment.
    pub fn from_config(config: &BackendConfig) -> Result<Self, PipelineError> {
        let provider = resolve_provider(config)?;
        Ok(Self::new(provider, config))
    }

    fn options(&self) -> CompletionOptions {
        CompletionOptions {
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
            ..Default::default()
        }
    }
}

fn unavailable(hint: String) -> PipelineError {
    PipelineError::BackendUnavailable {
        backend: BackendKind::Structure.to_string(),
        hint,
    }
}

fn create_vision_provider(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, PipelineError> {
    ProviderFactory::create_llm_provider(provider_name, model)
        .map_err(|e| unavailable(format!("provider '{provider_name}': {e}")))
}

fn resolve_provider(config: &BackendConfig) -> Result<Arc<dyn LLMProvider>, PipelineError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
        return create_vision_provider(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_vision_provider(&prov, &model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
            return create_vision_provider("openai", model);
        }
    }

    let (llm_provider, _embedding) = ProviderFactory::from_env().map_err(|e| {
        unavailable(format!(
            "No LLM provider could be auto-detected from environment.\n\
             Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or pass --provider.\n\
             Error: {e}"
        ))
    })?;
    Ok(llm_provider)
}

/// MIME type for the image formats vision APIs accept.
pub fn mime_for(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        _ => None,
    }
}

static RE_JSON_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```(?:json|JSON)?\s*\n(.*?)\n?```\s*$").unwrap());

static RE_INVISIBLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\u{FEFF}\u{200B}\u{200C}\u{200D}\u{2060}]").unwrap());

/// Parse a model reply into a JSON layout document.
///
/// Strips outer code fences and invisible characters, and tolerates prose
/// around a single top-level object. The result must be an object or array.
pub fn parse_layout_json(reply: &str) -> Result<serde_json::Value, BackendError> {
    let cleaned = RE_INVISIBLE.replace_all(reply.trim(), "");
    let body = match RE_JSON_FENCES.captures(&cleaned) {
        Some(caps) => caps[1].to_string(),
        None => cleaned.into_owned(),
    };

    let candidate = match serde_json::from_str::<serde_json::Value>(&body) {
        Ok(value) => value,
        Err(first) => {
            let (Some(start), Some(end)) = (body.find('{'), body.rfind('}')) else {
                return Err(BackendError::new(format!("reply is not JSON: {first}")));
            };
            if end <= start {
                return Err(BackendError::new(format!("reply is not JSON: {first}")));
            }
            serde_json::from_str(&body[start..=end])
                .map_err(|e| BackendError::new(format!("reply is not JSON: {e}")))?
        }
    };

    if candidate.is_object() || candidate.is_array() {
        Ok(candidate)
    } else {
        Err(BackendError::new("reply JSON is not an object or array"))
    }
}

#[async_trait]
impl AnalysisBackend for StructureBackend {
    fn name(&self) -> &str {
        "structure"
    }

    fn payload_kind(&self) -> PayloadKind {
        PayloadKind::Structured
    }

    async fn analyze(&self, image: &Path) -> Result<AnalysisPayload, BackendError> {
        let mime = mime_for(image).ok_or_else(|| {
            BackendError::new(format!(
                "unsupported image format for vision model: {}",
                image.display()
            ))
        })?;
        let bytes = tokio::fs::read(image)
            .await
            .map_err(|e| BackendError::new(format!("cannot read image: {e}")))?;

        let data = ImageData::new(STANDARD.encode(&bytes), mime).with_detail("high");
        let messages = vec![
            ChatMessage::system(self.system_prompt.as_str()),
            ChatMessage::user_with_images(STRUCTURE_USER_MESSAGE, vec![data]),
        ];

        let response = self
            .provider
            .chat(&messages, Some(&self.options()))
            .await
            .map_err(|e| BackendError::new(e.to_string()))?;
        debug!(
            "{}: {} input tokens, {} output tokens",
            image.display(),
            response.prompt_tokens,
            response.completion_tokens
        );

        parse_layout_json(&response.content).map(AnalysisPayload::Structured)
    }
}
