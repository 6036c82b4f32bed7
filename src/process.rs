//! Document orchestration: input → render → extract → reconcile.
//!
//! [`DrillLogPipeline`] owns the two collaborators (a [`PageRenderer`] and a
//! [`PageExtractor`]) plus the configuration, and exposes the eager entry
//! points. Use [`crate::stream::process_stream`] to receive documents as they
//! finish instead.
//!
//! Failure scopes:
//!
//! * one (page, schema) call failing → recorded in
//!   [`DocumentOutput::failures`], the document still reconciles;
//! * one document failing (missing file, corrupt PDF, every call failed) →
//!   `Err` from [`DrillLogPipeline::process_document`], downgraded to a
//!   [`FailureRecord`] by the multi-document entry points.

use crate::cache::{self, ResultCache};
use crate::config::ExtractionConfig;
use crate::error::DrillLogError;
use crate::output::{
    BatchOutput, DocumentOutput, DocumentStats, DocumentStatus, FailureRecord, ProcessingSummary,
};
use crate::pipeline::driver::{self, DriverOutput};
use crate::pipeline::input;
use crate::pipeline::llm::{PageExtractor, VisionExtractor};
use crate::pipeline::reconcile::{self, Reconciliation};
use crate::pipeline::render::{PageRenderer, PdfiumRenderer};
use futures::stream::{self, StreamExt};
use futures::FutureExt;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Drill-log extraction pipeline.
///
/// Cheap to clone; clones share collaborators and cache.
///
/// # Example
/// ```rust,no_run
/// use edgequake_drilllog::{DrillLogPipeline, ExtractionConfig};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let pipeline = DrillLogPipeline::from_config(ExtractionConfig::default())?;
/// let doc = pipeline.process_document("logs/BH-1.pdf").await?;
/// for hole in &doc.boreholes {
///     println!("{}: {} layers", hole.hole_no, hole.soil_data.len());
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct DrillLogPipeline {
    config: ExtractionConfig,
    renderer: Arc<dyn PageRenderer>,
    extractor: Arc<dyn PageExtractor>,
    cache: Option<ResultCache>,
}

impl DrillLogPipeline {
    /// Production pipeline: pdfium rendering and an `edgequake-llm` provider
    /// resolved from `config` or the environment.
    pub fn from_config(config: ExtractionConfig) -> Result<Self, DrillLogError> {
        let renderer = Arc::new(PdfiumRenderer::new(&config));
        let extractor = Arc::new(VisionExtractor::from_config(&config)?);
        Ok(Self::new(config, renderer, extractor))
    }

    /// Pipeline with injected collaborators.
    pub fn new(
        config: ExtractionConfig,
        renderer: Arc<dyn PageRenderer>,
        extractor: Arc<dyn PageExtractor>,
    ) -> Self {
        Self {
            config,
            renderer,
            extractor,
            cache: None,
        }
    }

    pub fn with_cache(mut self, cache: ResultCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    pub fn cache(&self) -> Option<&ResultCache> {
        self.cache.as_ref()
    }

    /// Process one PDF given as a local path or HTTP(S) URL.
    ///
    /// # Errors
    /// Returns `Err(DrillLogError)` only for fatal errors:
    /// - input not found, unreadable, not a PDF, or download failed
    /// - PDF corrupt, encrypted, or without pages
    /// - every extraction call failed
    pub async fn process_document(&self, input_str: &str) -> Result<DocumentOutput, DrillLogError> {
        info!("Processing drill log: {}", input_str);
        let resolved = input::resolve_input(input_str, self.config.download_timeout_secs).await?;
        self.process_path(input_str, resolved.path()).await
    }

    /// Process PDF bytes held in memory. `source` names the document in the
    /// output.
    ///
    /// The bytes are spilled to a managed [`tempfile`] for pdfium, deleted on
    /// return.
    pub async fn process_from_bytes(
        &self,
        bytes: &[u8],
        source: &str,
    ) -> Result<DocumentOutput, DrillLogError> {
        let mut tmp = tempfile::NamedTempFile::new()
            .map_err(|e| DrillLogError::Internal(format!("tempfile: {e}")))?;
        tmp.write_all(bytes)
            .map_err(|e| DrillLogError::Internal(format!("tempfile write: {e}")))?;
        let path = tmp.path().to_string_lossy().to_string();
        let resolved = input::resolve_input(&path, self.config.download_timeout_secs).await?;
        self.process_path(source, resolved.path()).await
    }

    /// Process several documents, at most `document_concurrency` at a time.
    ///
    /// Never fails as a whole: fatal document errors become entries in
    /// [`ProcessingSummary::failures`]. Documents keep input order.
    pub async fn process_documents<S: AsRef<str>>(&self, inputs: &[S]) -> BatchOutput {
        let owned: Vec<String> = inputs.iter().map(|s| s.as_ref().to_string()).collect();
        let mut results: Vec<(usize, String, Result<DocumentOutput, DrillLogError>)> =
            stream::iter(owned.into_iter().enumerate())
                .map(|(i, input)| {
                    async move {
                        let result = self.process_document(&input).await;
                        (i, input, result)
                    }
                    .boxed()
                })
                .buffer_unordered(self.config.document_concurrency.max(1))
                .collect()
                .await;
        results.sort_by_key(|(i, _, _)| *i);

        let mut batch = BatchOutput::default();
        for (_, source, result) in results {
            let source = source.as_str();
            match result {
                Ok(doc) => {
                    batch.summary.record_document(&doc);
                    batch.documents.push(doc);
                }
                Err(e) => {
                    warn!("{}: {}", source, e);
                    batch.summary.record_failure(FailureRecord::document(source, &e));
                }
            }
        }

        info!(
            "Processed {}/{} documents, {} boreholes",
            batch.summary.successful_documents,
            batch.summary.total_documents,
            batch.summary.total_boreholes
        );
        batch
    }

    /// Process documents and write the [`BatchOutput`] as pretty JSON.
    ///
    /// Uses atomic write (temp file + rename) to prevent partial files.
    pub async fn process_to_file<S: AsRef<str>>(
        &self,
        inputs: &[S],
        output_path: impl AsRef<Path>,
    ) -> Result<ProcessingSummary, DrillLogError> {
        let batch = self.process_documents(inputs).await;
        write_json_atomic(output_path.as_ref(), &batch).await?;
        Ok(batch.summary)
    }

    async fn process_path(&self, source: &str, pdf_path: &Path) -> Result<DocumentOutput, DrillLogError> {
        let total_start = Instant::now();

        let bytes = tokio::fs::read(pdf_path)
            .await
            .map_err(|e| DrillLogError::Internal(format!("Failed to read '{}': {}", pdf_path.display(), e)))?;
        let fingerprint = cache::fingerprint(&bytes);
        drop(bytes);

        let mut stats = DocumentStats::default();

        let cached = match &self.cache {
            Some(c) => c.get(&fingerprint).await,
            None => None,
        };

        let extraction: Arc<DriverOutput> = match cached {
            Some(hit) => {
                info!("{}: using cached extraction", source);
                stats.cached = true;
                hit
            }
            None => {
                let render_start = Instant::now();
                let pages = self.renderer.render(pdf_path).await?;
                if pages.is_empty() {
                    return Err(DrillLogError::EmptyDocument {
                        path: pdf_path.to_path_buf(),
                    });
                }
                stats.render_duration_ms = render_start.elapsed().as_millis() as u64;
                info!(
                    "{}: rendered {} pages in {}ms",
                    source,
                    pages.len(),
                    stats.render_duration_ms
                );

                let extract_start = Instant::now();
                let out = driver::run(self.extractor.as_ref(), &pages, &self.config, source).await;
                stats.extraction_duration_ms = extract_start.elapsed().as_millis() as u64;

                let out = Arc::new(out);
                if let Some(c) = &self.cache {
                    c.insert(fingerprint.clone(), Arc::clone(&out)).await;
                }
                out
            }
        };

        if extraction.all_failed() {
            let first_error = extraction
                .failures
                .first()
                .map(|f| f.error.to_string())
                .unwrap_or_else(|| "Unknown error".to_string());
            return Err(DrillLogError::AllCallsFailed {
                total: extraction.calls,
                first_error,
            });
        }

        let Reconciliation {
            boreholes,
            sample_metadata,
            anomalies,
        } = {
            let extraction = Arc::clone(&extraction);
            let policy = self.config.identifier_policy;
            let source = source.to_string();
            tokio::task::spawn_blocking(move || {
                reconcile::reconcile(&extraction.soil, &extraction.samples, policy, &source)
            })
            .await
            .map_err(|e| DrillLogError::Internal(format!("Reconcile task panicked: {}", e)))?
        };

        stats.total_pages = extraction.calls / 2;
        stats.calls = extraction.calls;
        stats.failed_calls = extraction.failures.len();
        stats.boreholes = boreholes.len();
        stats.input_tokens = extraction.input_tokens;
        stats.output_tokens = extraction.output_tokens;
        stats.total_duration_ms = total_start.elapsed().as_millis() as u64;

        let status = if extraction.is_partial() {
            DocumentStatus::Partial
        } else {
            DocumentStatus::Completed
        };

        info!(
            "{}: {} boreholes, {}/{} calls failed, {}ms",
            source, stats.boreholes, stats.failed_calls, stats.calls, stats.total_duration_ms
        );

        if let Some(ref cb) = self.config.progress_callback {
            cb.on_document_complete(source, stats.boreholes, stats.failed_calls);
        }

        Ok(DocumentOutput {
            source: source.to_string(),
            fingerprint,
            status,
            boreholes,
            sample_metadata,
            anomalies,
            failures: extraction.failures.clone(),
            stats,
        })
    }
}

/// Synchronous wrapper around [`DrillLogPipeline::process_documents`] with
/// the production collaborators.
///
/// Creates a temporary tokio runtime internally.
pub fn process_sync<S: AsRef<str>>(
    inputs: &[S],
    config: ExtractionConfig,
) -> Result<BatchOutput, DrillLogError> {
    let pipeline = DrillLogPipeline::from_config(config)?;
    let runtime = tokio::runtime::Runtime::new()
        .map_err(|e| DrillLogError::Internal(format!("Failed to create tokio runtime: {}", e)))?;
    Ok(runtime.block_on(pipeline.process_documents(inputs)))
}

/// Serialise `value` as pretty JSON to `path` via temp file + rename.
pub async fn write_json_atomic<T: serde::Serialize>(
    path: &Path,
    value: &T,
) -> Result<(), DrillLogError> {
    let write_err = |e: std::io::Error| DrillLogError::OutputWriteFailed {
        path: path.to_path_buf(),
        source: e,
    };

    let json = serde_json::to_vec_pretty(value)
        .map_err(|e| DrillLogError::Internal(format!("JSON serialisation failed: {}", e)))?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
        }
    }

    let tmp_path = path.with_extension("json.tmp");
    tokio::fs::write(&tmp_path, &json).await.map_err(write_err)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(write_err)?;
    Ok(())
}
