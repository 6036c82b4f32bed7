//! # edgequake-drilllog
//!
//! Extract borehole data from scanned drill-log PDFs using Vision Language
//! Models (VLMs).
//!
//! ## Why this crate?
//!
//! Geotechnical drill logs (시추주상도) are scanned tables: a metadata header,
//! a soil-description column with depth ranges, and a sample column with
//! sample numbers, depths and blow counts. Text extraction tools lose the
//! table geometry. This crate rasterises each page, asks a VLM for the soil
//! table and the sample table separately, then reassembles one record per
//! borehole with every sample attached to the soil layer it was taken from.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Input      resolve local file or download from URL
//!  ├─ 2. Render     rasterise pages via pdfium (spawn_blocking), JPEG/PNG → base64
//!  ├─ 3. Extract    per batch: all soil calls, then all sample calls
//!  ├─ 4. Validate   check each JSON answer against the fragment shape
//!  ├─ 5. Reconcile  group by HOLE_NO, sort samples, join on depth range
//!  └─ 6. Output     boreholes + per-document stats + processing summary
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_drilllog::{DrillLogPipeline, ExtractionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / GEMINI_API_KEY
//!     let pipeline = DrillLogPipeline::from_config(ExtractionConfig::default())?;
//!     let batch = pipeline.process_documents(&["BH-1.pdf", "BH-2.pdf"]).await;
//!     println!("{}", serde_json::to_string_pretty(&batch)?);
//!     eprintln!("{} boreholes, {} failed calls",
//!         batch.summary.total_boreholes,
//!         batch.summary.failed_calls);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature  | Default | Description |
//! |----------|---------|-------------|
//! | `cli`    | on      | Enables the `drilllog` binary (clap + anyhow + tracing-subscriber + indicatif) |
//! | `server` | off     | Enables [`server`] and the `drilllog-server` binary (axum + tower-http) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-drilllog = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod cache;
pub mod config;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod process;
pub mod progress;
pub mod prompts;
pub mod schema;
#[cfg(feature = "server")]
pub mod server;
pub mod stream;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use cache::ResultCache;
pub use config::{ExtractionConfig, ExtractionConfigBuilder, IdentifierPolicy, ImageFormat, PageSelection};
pub use error::{DrillLogError, PageError};
pub use output::{
    BatchOutput, Borehole, DocumentOutput, DocumentStats, DocumentStatus, FailureRecord,
    LayerWithSamples, PageFailure, ProcessingSummary,
};
pub use pipeline::llm::{ExtractorError, PageExtractor, RawExtraction, VisionExtractor};
pub use pipeline::reconcile::{parse_depth_range, reconcile, DepthRange, Reconciliation, ReconciliationAnomaly};
pub use pipeline::render::{PageImage, PageRenderer, PdfiumRenderer};
pub use process::{process_sync, DrillLogPipeline};
pub use progress::{ExtractionProgressCallback, NoopProgressCallback, ProgressCallback};
pub use schema::{Metadata, PageExtraction, SampleRecord, SchemaKind, SoilLayer};
pub use stream::{process_stream, DocumentStream};
