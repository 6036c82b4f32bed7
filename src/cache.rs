//! Fingerprint-keyed cache of extraction results.
//!
//! The expensive part of processing a drill log is the `2 × pages` model
//! calls. [`ResultCache`] keeps the [`DriverOutput`] of recently processed
//! documents, keyed by the SHA-256 of the PDF bytes, so resubmitting the same
//! file (the HTTP service sees this often) skips rendering and extraction.
//! Reconciliation is cheap and always re-runs.
//!
//! A cache belongs to one [`crate::process::DrillLogPipeline`]: entries are
//! only valid for the prompts and page selection that produced them.
//! Partial extractions are never stored, so a transient provider outage does
//! not pin missing pages.

use crate::pipeline::driver::DriverOutput;
use lru::LruCache;
use sha2::{Digest, Sha256};
use std::num::NonZeroUsize;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Default number of documents kept.
pub const DEFAULT_CAPACITY: usize = 64;

/// Lower-case hex SHA-256 of `bytes`.
pub fn fingerprint(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// LRU cache of driver outputs, shareable across tasks.
#[derive(Clone)]
pub struct ResultCache {
    entries: Arc<RwLock<LruCache<String, Arc<DriverOutput>>>>,
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl ResultCache {
    /// Cache holding at most `capacity` documents (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let size = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Arc::new(RwLock::new(LruCache::new(size))),
        }
    }

    /// Look up a fingerprint, marking it most recently used.
    pub async fn get(&self, fingerprint: &str) -> Option<Arc<DriverOutput>> {
        let mut entries = self.entries.write().await;
        let hit = entries.get(fingerprint).cloned();
        debug!(
            "Cache {} for {}",
            if hit.is_some() { "hit" } else { "miss" },
            fingerprint
        );
        hit
    }

    /// Store a complete extraction. Returns `false` (and stores nothing)
    /// when any call failed.
    pub async fn insert(&self, fingerprint: impl Into<String>, output: Arc<DriverOutput>) -> bool {
        if output.is_partial() {
            return false;
        }
        let mut entries = self.entries.write().await;
        entries.put(fingerprint.into(), output);
        true
    }

    /// Drop one entry. Returns `true` if it was present.
    pub async fn evict(&self, fingerprint: &str) -> bool {
        let mut entries = self.entries.write().await;
        entries.pop(fingerprint).is_some()
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}
