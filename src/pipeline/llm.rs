//! VLM interaction: turn one page image into one raw JSON extraction.
//!
//! [`PageExtractor`] is the seam between the driver and the model. The
//! production [`VisionExtractor`] sends the page image with a schema-specific
//! system prompt through `edgequake-llm`, cleans the answer with
//! [`postprocess::clean_json_response`] and parses it. It makes exactly one
//! request per call: retries and timeouts belong to
//! [`crate::pipeline::driver`], so test doubles get them for free.

use crate::config::ExtractionConfig;
use crate::error::DrillLogError;
use crate::pipeline::postprocess;
use crate::pipeline::render::PageImage;
use crate::prompts;
use crate::schema::SchemaKind;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

const DEFAULT_MODEL: &str = "gpt-4.1-mini";

/// Parsed but not yet validated model output for one call.
#[derive(Debug, Clone, PartialEq)]
pub struct RawExtraction {
    pub json: Value,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Why a single extraction call did not produce JSON.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExtractorError {
    /// Transport, auth, rate-limit or provider error.
    #[error("backend error: {0}")]
    Backend(String),
    /// The model answered but the text is not a JSON object.
    #[error("response is not valid JSON: {0}")]
    Malformed(String),
}

/// Reads one page under one schema.
#[async_trait]
pub trait PageExtractor: Send + Sync {
    async fn extract(
        &self,
        page: &PageImage,
        kind: SchemaKind,
    ) -> Result<RawExtraction, ExtractorError>;
}

/// `edgequake-llm`-backed extractor.
///
/// ## Message Layout
///
/// 1. **System message**: drill-log layout, pass instructions and JSON schema
/// 2. **User message**: the page image as a base64 attachment (empty text)
pub struct VisionExtractor {
    provider: Arc<dyn LLMProvider>,
    soil_prompt: String,
    sample_prompt: String,
    temperature: f32,
    max_tokens: usize,
}

impl VisionExtractor {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &ExtractionConfig) -> Self {
        Self {
            provider,
            soil_prompt: prompts::system_prompt(SchemaKind::Soil, config),
            sample_prompt: prompts::system_prompt(SchemaKind::Sample, config),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }

    /// Resolve the provider from `config` (see [`resolve_provider`]).
    pub fn from_config(config: &ExtractionConfig) -> Result<Self, DrillLogError> {
        let provider = resolve_provider(config)?;
        Ok(Self::new(provider, config))
    }

    fn prompt(&self, kind: SchemaKind) -> &str {
        match kind {
            SchemaKind::Soil => &self.soil_prompt,
            SchemaKind::Sample => &self.sample_prompt,
        }
    }

    fn options(&self) -> CompletionOptions {
        CompletionOptions {
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
            ..Default::default()
        }
    }
}

#[async_trait]
impl PageExtractor for VisionExtractor {
    async fn extract(
        &self,
        page: &PageImage,
        kind: SchemaKind,
    ) -> Result<RawExtraction, ExtractorError> {
        let start = Instant::now();
        let messages = vec![
            ChatMessage::system(self.prompt(kind)),
            ChatMessage::user_with_images("", vec![page.image.clone()]),
        ];

        let response = self
            .provider
            .chat(&messages, Some(&self.options()))
            .await
            .map_err(|e| ExtractorError::Backend(e.to_string()))?;

        debug!(
            "Page {} ({}): {} input tokens, {} output tokens, {:?}",
            page.page_num,
            kind,
            response.prompt_tokens,
            response.completion_tokens,
            start.elapsed()
        );

        let json = parse_response(&response.content)?;
        Ok(RawExtraction {
            json,
            input_tokens: response.prompt_tokens as u64,
            output_tokens: response.completion_tokens as u64,
        })
    }
}

/// Clean and parse a raw model answer.
pub fn parse_response(content: &str) -> Result<Value, ExtractorError> {
    let cleaned = postprocess::clean_json_response(content);
    serde_json::from_str(&cleaned)
        .or_else(|_| serde_json::from_str(&postprocess::repair_trailing_commas(&cleaned)))
        .map_err(|e: serde_json::Error| {
            let preview: String = cleaned.chars().take(80).collect();
            ExtractorError::Malformed(format!("{e} (response starts with {preview:?})"))
        })
}

// ── Provider resolution ─────────────────────────────────────────────────

fn create_vision_provider(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, DrillLogError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        DrillLogError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the LLM provider, from most-specific to least-specific.
///
/// 1. **Pre-built provider** (`config.provider`), used as-is.
/// 2. **Named provider + model** (`config.provider_name`); the factory reads
///    the matching API key from the environment.
/// 3. **Environment pair** (`EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`),
///    both non-empty.
/// 4. **OpenAI**, when `OPENAI_API_KEY` is set.
/// 5. **Full auto-detection** (`ProviderFactory::from_env`).
pub fn resolve_provider(config: &ExtractionConfig) -> Result<Arc<dyn LLMProvider>, DrillLogError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);

    if let Some(ref name) = config.provider_name {
        return create_vision_provider(name, model);
    }

    if let (Ok(prov), Ok(env_model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !env_model.is_empty() {
            return create_vision_provider(&prov, &env_model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            return create_vision_provider("openai", model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| DrillLogError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or configure a provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_fenced_response() {
        let v = parse_response("```json\n{\"metadata\": {\"HOLE_NO\": \"BH-1\"}}\n```").unwrap();
        assert_eq!(v["metadata"]["HOLE_NO"], "BH-1");
    }

    #[test]
    fn parse_repairs_trailing_comma() {
        let v = parse_response("{\"soil_data\": [{\"depth_range\": \"0~1\"},]}").unwrap();
        assert_eq!(v["soil_data"].as_array().map(Vec::len), Some(1));
    }

    #[test]
    fn parse_rejects_prose() {
        let err = parse_response("Sorry, the page is blank.").unwrap_err();
        assert!(matches!(err, ExtractorError::Malformed(_)));
        assert!(err.to_string().contains("Sorry"));
    }
}
