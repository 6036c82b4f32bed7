//! Configuration types for drill-log extraction.
//!
//! All pipeline behaviour is controlled through [`ExtractionConfig`], built
//! via its [`ExtractionConfigBuilder`]. One struct holds every knob so a
//! config can be shared across concurrent document tasks and logged as a
//! whole when two runs disagree.

use crate::error::DrillLogError;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Configuration for extracting borehole data from drill-log PDFs.
///
/// Built via [`ExtractionConfig::builder()`] or using
/// [`ExtractionConfig::default()`].
///
/// # Example
/// ```rust
/// use edgequake_drilllog::{ExtractionConfig, IdentifierPolicy};
///
/// let config = ExtractionConfig::builder()
///     .batch_size(5)
///     .model("gpt-4.1-mini")
///     .identifier_policy(IdentifierPolicy::Trim)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ExtractionConfig {
    /// Longest rendered edge in pixels. Default: 3000.
    ///
    /// Drill logs are dense tables with small handwriting-sized glyphs in the
    /// sample columns; 3000 px across an A4/B4 sheet keeps them legible.
    pub max_rendered_pixels: u32,

    /// Encoding of page images sent to the model. Default: [`ImageFormat::Jpeg`].
    pub image_format: ImageFormat,

    /// Pages per batch. Default: 10.
    ///
    /// Within a batch all soil calls run concurrently, then all sample calls.
    /// The batch size is therefore the upper bound on in-flight model requests
    /// for one document.
    pub batch_size: usize,

    /// Documents processed at once by the multi-document entry points. Default: 2.
    pub document_concurrency: usize,

    /// LLM model identifier, e.g. "gpt-4.1-mini". If None, uses provider default.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "ollama").
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature. Default: 0.0.
    pub temperature: f32,

    /// Maximum tokens the model may generate per call. Default: 4096.
    pub max_tokens: usize,

    /// Retries per (page, schema) call on failure. Default: 3.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled after each attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Override for the soil-pass prompt.
    pub soil_prompt: Option<String>,

    /// Override for the sample-pass prompt.
    pub sample_prompt: Option<String>,

    /// Page selection. Default: all pages.
    pub pages: PageSelection,

    /// How borehole identifiers are compared when grouping. Default: exact.
    pub identifier_policy: IdentifierPolicy,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Per-call timeout in seconds, applied to every attempt. Default: 120.
    pub api_timeout_secs: u64,

    /// Optional per-call progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            max_rendered_pixels: 3000,
            image_format: ImageFormat::default(),
            batch_size: 10,
            document_concurrency: 2,
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.0,
            max_tokens: 4096,
            max_retries: 3,
            retry_backoff_ms: 500,
            password: None,
            soil_prompt: None,
            sample_prompt: None,
            pages: PageSelection::default(),
            identifier_policy: IdentifierPolicy::default(),
            download_timeout_secs: 120,
            api_timeout_secs: 120,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ExtractionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfig")
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("image_format", &self.image_format)
            .field("batch_size", &self.batch_size)
            .field("document_concurrency", &self.document_concurrency)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_retries", &self.max_retries)
            .field("pages", &self.pages)
            .field("identifier_policy", &self.identifier_policy)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .finish()
    }
}

impl ExtractionConfig {
    /// Create a new builder for `ExtractionConfig`.
    pub fn builder() -> ExtractionConfigBuilder {
        ExtractionConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ExtractionConfig`].
#[derive(Debug)]
pub struct ExtractionConfigBuilder {
    config: ExtractionConfig,
}

impl ExtractionConfigBuilder {
    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn image_format(mut self, format: ImageFormat) -> Self {
        self.config.image_format = format;
        self
    }

    pub fn batch_size(mut self, n: usize) -> Self {
        self.config.batch_size = n;
        self
    }

    pub fn document_concurrency(mut self, n: usize) -> Self {
        self.config.document_concurrency = n;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
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

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn soil_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.soil_prompt = Some(prompt.into());
        self
    }

    pub fn sample_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.sample_prompt = Some(prompt.into());
        self
    }

    pub fn pages(mut self, selection: PageSelection) -> Self {
        self.config.pages = selection;
        self
    }

    pub fn identifier_policy(mut self, policy: IdentifierPolicy) -> Self {
        self.config.identifier_policy = policy;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExtractionConfig, DrillLogError> {
        let c = &self.config;
        if c.batch_size == 0 {
            return Err(DrillLogError::InvalidConfig(
                "Batch size must be ≥ 1".into(),
            ));
        }
        if c.document_concurrency == 0 {
            return Err(DrillLogError::InvalidConfig(
                "Document concurrency must be ≥ 1".into(),
            ));
        }
        if c.api_timeout_secs == 0 {
            return Err(DrillLogError::InvalidConfig(
                "API timeout must be ≥ 1 second".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Image encoding for pages sent to the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ImageFormat {
    /// Smaller payloads; scanned logs are already lossy. (default)
    #[default]
    Jpeg,
    /// Lossless, roughly 3-5× larger for scanned pages.
    Png,
}

impl ImageFormat {
    pub fn mime_type(self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Png => "image/png",
        }
    }
}

/// How borehole identifiers are compared when grouping fragments.
///
/// The model reports the identifier per page, and nothing forces it to spell
/// the same hole identically on every page. `Exact` keeps the identifier
/// untouched, so `"BH-1"` and `"bh-1 "` become two boreholes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentifierPolicy {
    /// Byte-for-byte comparison. (default)
    #[default]
    Exact,
    /// Strip leading and trailing whitespace.
    Trim,
    /// Strip whitespace and compare case-insensitively (keys are upper-cased).
    TrimCaseFold,
}

impl IdentifierPolicy {
    /// Grouping key for a raw identifier.
    pub fn key(self, raw: &str) -> String {
        match self {
            IdentifierPolicy::Exact => raw.to_string(),
            IdentifierPolicy::Trim => raw.trim().to_string(),
            IdentifierPolicy::TrimCaseFold => raw.trim().to_uppercase(),
        }
    }
}

/// Specifies which pages of the PDF to process.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub enum PageSelection {
    /// All pages (default).
    #[default]
    All,
    /// A single page (1-indexed).
    Single(usize),
    /// A contiguous range of pages (1-indexed, inclusive).
    Range(usize, usize),
    /// Specific pages (1-indexed, deduplicated).
    Set(Vec<usize>),
}

impl PageSelection {
    /// Expand the selection into a sorted, deduplicated list of 0-indexed page numbers.
    pub fn to_indices(&self, total_pages: usize) -> Vec<usize> {
        let mut indices: Vec<usize> = match self {
            PageSelection::All => (0..total_pages).collect(),
            PageSelection::Single(p) => {
                if *p >= 1 && *p <= total_pages {
                    vec![p - 1]
                } else {
                    vec![]
                }
            }
            PageSelection::Range(start, end) => {
                let s = (*start).max(1) - 1;
                let e = (*end).min(total_pages);
                (s..e).collect()
            }
            PageSelection::Set(pages) => pages
                .iter()
                .filter(|&&p| p >= 1 && p <= total_pages)
                .map(|p| p - 1)
                .collect(),
        };
        indices.sort_unstable();
        indices.dedup();
        indices
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_batching() {
        let c = ExtractionConfig::default();
        assert_eq!(c.batch_size, 10);
        assert_eq!(c.identifier_policy, IdentifierPolicy::Exact);
        assert_eq!(c.image_format, ImageFormat::Jpeg);
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let err = ExtractionConfig::builder().batch_size(0).build().unwrap_err();
        assert!(err.to_string().contains("Batch size"));
    }

    #[test]
    fn zero_document_concurrency_is_rejected() {
        assert!(ExtractionConfig::builder()
            .document_concurrency(0)
            .build()
            .is_err());
    }

    #[test]
    fn identifier_policy_keys() {
        assert_eq!(IdentifierPolicy::Exact.key(" bh-1 "), " bh-1 ");
        assert_eq!(IdentifierPolicy::Trim.key(" bh-1 "), "bh-1");
        assert_eq!(IdentifierPolicy::TrimCaseFold.key(" bh-1 "), "BH-1");
    }

    #[test]
    fn page_selection_to_indices() {
        assert_eq!(PageSelection::All.to_indices(3), vec![0, 1, 2]);
        assert_eq!(PageSelection::Single(3).to_indices(5), vec![2]);
        assert_eq!(PageSelection::Single(6).to_indices(5), Vec::<usize>::new());
        assert_eq!(PageSelection::Range(2, 9).to_indices(4), vec![1, 2, 3]);
        assert_eq!(
            PageSelection::Set(vec![3, 1, 3]).to_indices(5),
            vec![0, 2]
        );
    }

    #[test]
    fn temperature_is_clamped() {
        let c = ExtractionConfig::builder().temperature(5.0).build().unwrap();
        assert_eq!(c.temperature, 2.0);
    }
}
