//! Error types for the edgequake-drilllog library.
//!
//! Two error types reflect the two failure scopes of the pipeline:
//!
//! * [`DrillLogError`]: **fatal for one document**. The input cannot be
//!   resolved, the PDF cannot be rendered, or no extraction call succeeded.
//!   Returned as `Err(DrillLogError)` from
//!   [`crate::process::DrillLogPipeline::process_document`]. The multi-document
//!   entry points downgrade it to a [`crate::output::FailureRecord`] so one
//!   broken file never blocks its siblings.
//!
//! * [`PageError`]: **non-fatal**: one (page, schema) call failed after its
//!   retries, timed out, or returned JSON with the wrong shape. The page is
//!   skipped, reconciliation proceeds with the remaining fragments, and the
//!   failure is listed in the processing summary.
//!
//! Soft reconciliation anomalies (bad depth ranges, unsortable sample
//! numbers) are not errors at all; see
//! [`crate::pipeline::reconcile::ReconciliationAnomaly`].

use crate::schema::SchemaKind;
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the edgequake-drilllog library.
#[derive(Debug, Error)]
pub enum DrillLogError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The input string is not a valid file path or URL.
    #[error("Invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    /// The file exists and was read, but is not a PDF.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    // ── Render errors ─────────────────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{path}' is corrupt: {detail}")]
    CorruptPdf { path: PathBuf, detail: String },

    /// PDF requires a password but none was provided.
    #[error("PDF '{path}' is encrypted and requires a password.\nProvide it with --password <PASSWORD>.")]
    PasswordRequired { path: PathBuf },

    /// A password was provided but it is wrong.
    #[error("Wrong password for PDF '{path}'")]
    WrongPassword { path: PathBuf },

    /// The document opened but has no pages to render (or none selected).
    #[error("PDF '{path}' has no pages to process")]
    EmptyDocument { path: PathBuf },

    /// pdfium-render returned an error for a specific page.
    #[error("Rasterisation failed for page {page}: {detail}")]
    RasterisationFailed { page: usize, detail: String },

    // ── Extraction errors ─────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// Every extraction call for the document failed; nothing to reconcile.
    #[error("All {total} extraction calls failed.\nFirst error: {first_error}")]
    AllCallsFailed { total: usize, first_error: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write the output JSON file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Pdfium binding errors ─────────────────────────────────────────────
    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
Install libpdfium on the library search path, or set\n\
PDFIUM_LIB_PATH to the library file or the directory containing it.\n"
    )]
    PdfiumBindingFailed(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl DrillLogError {
    /// `true` for failures of the rendering collaborator: the document was
    /// unreadable, unsupported, or empty.
    pub fn is_render_error(&self) -> bool {
        matches!(
            self,
            DrillLogError::CorruptPdf { .. }
                | DrillLogError::PasswordRequired { .. }
                | DrillLogError::WrongPassword { .. }
                | DrillLogError::EmptyDocument { .. }
                | DrillLogError::RasterisationFailed { .. }
                | DrillLogError::PdfiumBindingFailed(_)
        )
    }
}

/// A non-fatal error for a single (page, schema) extraction call.
#[derive(Debug, Clone, Error, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum PageError {
    /// The backend call failed after all retries.
    #[error("Page {page} ({kind}): extraction failed after {retries} retries: {detail}")]
    Extraction {
        page: usize,
        kind: SchemaKind,
        retries: u32,
        detail: String,
    },

    /// The last attempt did not answer within the per-call timeout.
    #[error("Page {page} ({kind}): extraction timed out after {secs}s")]
    Timeout {
        page: usize,
        kind: SchemaKind,
        secs: u64,
    },

    /// The call succeeded but the JSON did not have the expected shape.
    #[error("Page {page} ({kind}): malformed extraction: {detail}")]
    Malformed {
        page: usize,
        kind: SchemaKind,
        detail: String,
    },
}

impl PageError {
    /// 1-indexed page the failed call belonged to.
    pub fn page(&self) -> usize {
        match self {
            PageError::Extraction { page, .. }
            | PageError::Timeout { page, .. }
            | PageError::Malformed { page, .. } => *page,
        }
    }

    /// Schema kind of the failed call.
    pub fn kind(&self) -> SchemaKind {
        match self {
            PageError::Extraction { kind, .. }
            | PageError::Timeout { kind, .. }
            | PageError::Malformed { kind, .. } => *kind,
        }
    }
}
