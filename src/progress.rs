//! Progress-callback trait for per-call extraction events.
//!
//! Inject an [`Arc<dyn ExtractionProgressCallback>`] via
//! [`crate::config::ExtractionConfigBuilder::progress_callback`] to receive
//! events as the driver works through each document. One extraction *call*
//! is one (page, schema) pair, so a document of `n` pages produces `2n`
//! calls.
//!
//! # Example
//!
//! ```rust
//! use edgequake_drilllog::{ExtractionConfig, ExtractionProgressCallback, SchemaKind};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     completed: AtomicUsize,
//! }
//!
//! impl ExtractionProgressCallback for CountingCallback {
//!     fn on_call_complete(&self, source: &str, page_num: usize, kind: SchemaKind, items: usize) {
//!         self.completed.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{source} page {page_num} ({kind}): {items} rows");
//!     }
//! }
//!
//! let config = ExtractionConfig::builder()
//!     .progress_callback(Arc::new(CountingCallback { completed: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use crate::schema::SchemaKind;
use std::sync::Arc;

/// Called by the extraction driver as it processes each document.
///
/// Implementations must be `Send + Sync`: calls within a batch run
/// concurrently and several documents may be in flight at once. All methods
/// default to no-ops.
pub trait ExtractionProgressCallback: Send + Sync {
    /// Called once per document after rendering, before any call is issued.
    ///
    /// * `source`: document reference (path or URL)
    /// * `total_calls`: number of extraction calls that will be issued
    fn on_document_start(&self, source: &str, total_calls: usize) {
        let _ = (source, total_calls);
    }

    /// Called just before the request for one (page, schema) call is sent.
    fn on_call_start(&self, source: &str, page_num: usize, kind: SchemaKind) {
        let _ = (source, page_num, kind);
    }

    /// Called when a call produced a valid fragment with `items` rows.
    fn on_call_complete(&self, source: &str, page_num: usize, kind: SchemaKind, items: usize) {
        let _ = (source, page_num, kind, items);
    }

    /// Called when a call failed after all retries.
    fn on_call_error(&self, source: &str, page_num: usize, kind: SchemaKind, error: &str) {
        let _ = (source, page_num, kind, error);
    }

    /// Called after both passes of a batch have finished.
    ///
    /// * `batch`: 1-indexed batch number
    /// * `total_batches`: batches for this document
    fn on_batch_complete(&self, batch: usize, total_batches: usize) {
        let _ = (batch, total_batches);
    }

    /// Called once per document after reconciliation.
    fn on_document_complete(&self, source: &str, boreholes: usize, failed_calls: usize) {
        let _ = (source, boreholes, failed_calls);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl ExtractionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ExtractionConfig`].
pub type ProgressCallback = Arc<dyn ExtractionProgressCallback>;
