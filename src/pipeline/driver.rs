//! Batched two-pass extraction driver.
//!
//! Pages are cut into batches of `batch_size`. Within a batch every soil call
//! runs concurrently, and the sample calls start only once all soil calls of
//! the batch have settled. The next batch starts after both passes finish:
//!
//! ```text
//! batch 1: [soil p1 .. soil p10] ──▶ [sample p1 .. sample p10]
//! batch 2: [soil p11 .. ]        ──▶ [sample p11 .. ]
//! ```
//!
//! So at most `batch_size` model requests are in flight per document.
//!
//! Each call is isolated: its retries, per-attempt timeout and shape
//! validation happen inside [`run_call`], which never fails. A failed call
//! becomes a [`PageFailure`] and every other call proceeds.
//!
//! Dropping the future returned by [`run`] drops the batch's `join_all`,
//! cancelling its in-flight calls together; later batches never start.

use crate::config::ExtractionConfig;
use crate::error::PageError;
use crate::output::PageFailure;
use crate::pipeline::llm::{ExtractorError, PageExtractor};
use crate::pipeline::render::PageImage;
use crate::progress::ProgressCallback;
use crate::schema::{parse_fragment, FragmentItem, PageExtraction, SampleRecord, SoilLayer};
use futures::future::{join_all, FutureExt};
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

/// Everything the driver collected for one document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DriverOutput {
    /// Valid soil fragments, in page order.
    pub soil: Vec<PageExtraction<SoilLayer>>,
    /// Valid sample fragments, in page order.
    pub samples: Vec<PageExtraction<SampleRecord>>,
    pub failures: Vec<PageFailure>,
    /// Calls issued (two per page).
    pub calls: usize,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl DriverOutput {
    /// `true` when at least one call failed.
    pub fn is_partial(&self) -> bool {
        !self.failures.is_empty()
    }

    /// `true` when no call produced a fragment.
    pub fn all_failed(&self) -> bool {
        self.calls > 0 && self.failures.len() == self.calls
    }
}

struct CallOutcome<T> {
    result: Result<PageExtraction<T>, PageFailure>,
    input_tokens: u64,
    output_tokens: u64,
}

impl DriverOutput {
    /// Count the outcomes and keep the failures; returns the fragments.
    fn absorb<T>(&mut self, outcomes: Vec<CallOutcome<T>>) -> Vec<PageExtraction<T>> {
        let mut fragments = Vec::with_capacity(outcomes.len());
        for outcome in outcomes {
            self.calls += 1;
            self.input_tokens += outcome.input_tokens;
            self.output_tokens += outcome.output_tokens;
            match outcome.result {
                Ok(fragment) => fragments.push(fragment),
                Err(failure) => self.failures.push(failure),
            }
        }
        fragments
    }
}

/// Run both extraction passes over `pages` in batches.
pub async fn run(
    extractor: &dyn PageExtractor,
    pages: &[PageImage],
    config: &ExtractionConfig,
    source: &str,
) -> DriverOutput {
    let batch_size = config.batch_size.max(1);
    let total_batches = pages.len().div_ceil(batch_size);
    let progress = config.progress_callback.as_ref();

    if let Some(cb) = progress {
        cb.on_document_start(source, pages.len() * 2);
    }

    let mut out = DriverOutput::default();

    for (i, batch) in pages.chunks(batch_size).enumerate() {
        info!(
            "{}: batch {}/{} ({} pages)",
            source,
            i + 1,
            total_batches,
            batch.len()
        );

        let soil = join_all(batch.iter().map(|page| {
            run_call::<SoilLayer>(extractor, page, config, progress, source).boxed()
        }))
        .await;
        let soil = out.absorb(soil);
        out.soil.extend(soil);

        let samples = join_all(batch.iter().map(|page| {
            run_call::<SampleRecord>(extractor, page, config, progress, source).boxed()
        }))
        .await;
        let samples = out.absorb(samples);
        out.samples.extend(samples);

        if let Some(cb) = progress {
            cb.on_batch_complete(i + 1, total_batches);
        }
    }

    out
}

/// One (page, schema) call with retry, timeout and validation.
///
/// Every attempt gets the full `api_timeout_secs`. Backoff before attempt
/// `n` is `retry_backoff_ms * 2^(n-1)`. Malformed answers are retried like
/// transport errors.
async fn run_call<T: FragmentItem>(
    extractor: &dyn PageExtractor,
    page: &PageImage,
    config: &ExtractionConfig,
    progress: Option<&ProgressCallback>,
    source: &str,
) -> CallOutcome<T> {
    let kind = T::KIND;
    let page_num = page.page_num;
    let limit = Duration::from_secs(config.api_timeout_secs);

    if let Some(cb) = progress {
        cb.on_call_start(source, page_num, kind);
    }

    let mut input_tokens = 0u64;
    let mut output_tokens = 0u64;
    let mut last_err: Option<PageError> = None;
    let mut attempts = 0u32;

    for attempt in 0..=config.max_retries {
        if attempt > 0 {
            let backoff = config
                .retry_backoff_ms
                .saturating_mul(1u64 << (attempt - 1).min(16));
            warn!(
                "{}: page {} ({}): retry {}/{} after {}ms",
                source, page_num, kind, attempt, config.max_retries, backoff
            );
            sleep(Duration::from_millis(backoff)).await;
        }
        attempts += 1;

        let err = match timeout(limit, extractor.extract(page, kind)).await {
            Err(_) => PageError::Timeout {
                page: page_num,
                kind,
                secs: config.api_timeout_secs,
            },
            Ok(Err(ExtractorError::Backend(detail))) => PageError::Extraction {
                page: page_num,
                kind,
                retries: attempt,
                detail,
            },
            Ok(Err(ExtractorError::Malformed(detail))) => PageError::Malformed {
                page: page_num,
                kind,
                detail,
            },
            Ok(Ok(raw)) => {
                input_tokens += raw.input_tokens;
                output_tokens += raw.output_tokens;
                match parse_fragment::<T>(page_num, &raw.json) {
                    Ok(fragment) => {
                        debug!(
                            "Page {} ({}): {} items for {}",
                            page_num,
                            kind,
                            fragment.items.len(),
                            fragment.hole_no
                        );
                        if let Some(cb) = progress {
                            cb.on_call_complete(source, page_num, kind, fragment.items.len());
                        }
                        return CallOutcome {
                            result: Ok(fragment),
                            input_tokens,
                            output_tokens,
                        };
                    }
                    Err(detail) => PageError::Malformed {
                        page: page_num,
                        kind,
                        detail,
                    },
                }
            }
        };

        warn!(
            "{}: page {} ({}): attempt {} failed: {}",
            source, page_num, kind, attempts, err
        );
        last_err = Some(err);
    }

    let error = match last_err {
        Some(PageError::Extraction { detail, .. }) => PageError::Extraction {
            page: page_num,
            kind,
            retries: config.max_retries,
            detail,
        },
        Some(other) => other,
        None => PageError::Extraction {
            page: page_num,
            kind,
            retries: config.max_retries,
            detail: "no attempt was made".into(),
        },
    };

    if let Some(cb) = progress {
        cb.on_call_error(source, page_num, kind, &error.to_string());
    }

    CallOutcome {
        result: Err(PageFailure {
            page_num,
            kind,
            attempts,
            error,
        }),
        input_tokens,
        output_tokens,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::llm::RawExtraction;
    use crate::progress::ExtractionProgressCallback;
    use crate::schema::SchemaKind;
    use async_trait::async_trait;
    use edgequake_llm::ImageData;
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    fn pages(n: usize) -> Vec<PageImage> {
        (1..=n)
            .map(|page_num| PageImage {
                page_num,
                image: ImageData::new("AA==".to_string(), "image/jpeg"),
            })
            .collect()
    }

    fn soil_json(hole: &str) -> Value {
        json!({
            "metadata": { "HOLE_NO": hole },
            "soil_data": [{ "depth_range": "0~1", "soil_name": "clay" }]
        })
    }

    fn sample_json(hole: &str) -> Value {
        json!({
            "metadata": { "HOLE_NO": hole },
            "sample_data": [{ "Sample_number": "S1", "Depth": 0.5 }]
        })
    }

    /// Records call order and answers from a script.
    #[derive(Default)]
    struct ScriptedExtractor {
        log: Mutex<Vec<(usize, SchemaKind)>>,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        /// Failures to return before succeeding, per call.
        failures: HashMap<(usize, SchemaKind), usize>,
        attempts: Mutex<HashMap<(usize, SchemaKind), usize>>,
        /// Calls that never answer.
        hang: Vec<(usize, SchemaKind)>,
        /// Calls that answer with this payload instead of the default.
        payloads: HashMap<(usize, SchemaKind), Value>,
    }

    #[async_trait]
    impl PageExtractor for ScriptedExtractor {
        async fn extract(
            &self,
            page: &PageImage,
            kind: SchemaKind,
        ) -> Result<RawExtraction, ExtractorError> {
            let key = (page.page_num, kind);
            self.log.lock().unwrap().push(key);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::task::yield_now().await;

            if self.hang.contains(&key) {
                std::future::pending::<()>().await;
            }

            let attempt = {
                let mut a = self.attempts.lock().unwrap();
                let n = a.entry(key).or_insert(0);
                *n += 1;
                *n
            };
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if attempt <= self.failures.get(&key).copied().unwrap_or(0) {
                return Err(ExtractorError::Backend("HTTP 503".into()));
            }
            let json = self.payloads.get(&key).cloned().unwrap_or_else(|| match kind {
                SchemaKind::Soil => soil_json("BH-1"),
                SchemaKind::Sample => sample_json("BH-1"),
            });
            Ok(RawExtraction {
                json,
                input_tokens: 100,
                output_tokens: 10,
            })
        }
    }

    fn config(batch_size: usize, max_retries: u32) -> ExtractionConfig {
        ExtractionConfig::builder()
            .batch_size(batch_size)
            .max_retries(max_retries)
            .retry_backoff_ms(10)
            .api_timeout_secs(5)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn soil_pass_precedes_sample_pass_within_each_batch() {
        let ex = ScriptedExtractor::default();
        let out = run(&ex, &pages(3), &config(2, 0), "log.pdf").await;

        let log = ex.log.lock().unwrap().clone();
        let phase = |range: std::ops::Range<usize>| {
            let mut v = log[range].to_vec();
            v.sort_by_key(|(p, _)| *p);
            v
        };
        assert_eq!(phase(0..2), vec![(1, SchemaKind::Soil), (2, SchemaKind::Soil)]);
        assert_eq!(phase(2..4), vec![(1, SchemaKind::Sample), (2, SchemaKind::Sample)]);
        assert_eq!(log[4..], [(3, SchemaKind::Soil), (3, SchemaKind::Sample)]);

        assert_eq!(out.calls, 6);
        assert_eq!(out.soil.len(), 3);
        assert_eq!(out.samples.len(), 3);
        assert_eq!(out.input_tokens, 600);
        assert!(!out.is_partial());
    }

    #[tokio::test]
    async fn in_flight_calls_bounded_by_batch_size() {
        let ex = ScriptedExtractor::default();
        run(&ex, &pages(7), &config(3, 0), "log.pdf").await;
        assert!(ex.peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn fragments_come_back_in_page_order() {
        let ex = ScriptedExtractor::default();
        let out = run(&ex, &pages(5), &config(10, 0), "log.pdf").await;
        let order: Vec<_> = out.soil.iter().map(|f| f.page_num).collect();
        assert_eq!(order, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failure_is_retried() {
        let ex = ScriptedExtractor {
            failures: HashMap::from([((2, SchemaKind::Soil), 2)]),
            ..Default::default()
        };
        let out = run(&ex, &pages(2), &config(10, 3), "log.pdf").await;
        assert!(out.failures.is_empty());
        assert_eq!(out.soil.len(), 2);
        assert_eq!(ex.attempts.lock().unwrap()[&(2, SchemaKind::Soil)], 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_isolate_one_call() {
        let ex = ScriptedExtractor {
            failures: HashMap::from([((1, SchemaKind::Sample), 10)]),
            ..Default::default()
        };
        let out = run(&ex, &pages(2), &config(10, 2), "log.pdf").await;

        assert_eq!(out.soil.len(), 2);
        assert_eq!(out.samples.len(), 1);
        assert_eq!(out.failures.len(), 1);
        let f = &out.failures[0];
        assert_eq!((f.page_num, f.kind, f.attempts), (1, SchemaKind::Sample, 3));
        assert!(matches!(
            f.error,
            PageError::Extraction { retries: 2, .. }
        ));
        assert!(out.is_partial());
        assert!(!out.all_failed());
    }

    #[tokio::test(start_paused = true)]
    async fn hung_call_times_out_without_blocking_siblings() {
        let ex = ScriptedExtractor {
            hang: vec![(1, SchemaKind::Soil)],
            ..Default::default()
        };
        let out = run(&ex, &pages(2), &config(10, 0), "log.pdf").await;

        assert_eq!(out.soil.len(), 1);
        assert_eq!(out.samples.len(), 2);
        assert_eq!(
            out.failures[0].error,
            PageError::Timeout {
                page: 1,
                kind: SchemaKind::Soil,
                secs: 5
            }
        );
    }

    #[tokio::test]
    async fn wrong_shape_becomes_malformed_failure() {
        let ex = ScriptedExtractor {
            payloads: HashMap::from([
                ((1, SchemaKind::Soil), json!({ "soil_data": [] })),
                ((1, SchemaKind::Sample), sample_json("BH-1")),
            ]),
            ..Default::default()
        };
        let out = run(&ex, &pages(1), &config(10, 0), "log.pdf").await;
        assert_eq!(out.soil.len(), 0);
        assert_eq!(out.samples.len(), 1);
        assert!(matches!(out.failures[0].error, PageError::Malformed { page: 1, .. }));
        // tokens of a malformed answer are still billed
        assert_eq!(out.input_tokens, 200);
    }

    #[tokio::test]
    async fn blank_depth_range_is_not_a_failed_call() {
        let ex = ScriptedExtractor {
            payloads: HashMap::from([(
                (1, SchemaKind::Soil),
                json!({
                    "metadata": { "HOLE_NO": "BH-1" },
                    "soil_data": [
                        { "depth_range": "0.0~5.0m", "soil_name": "clay" },
                        { "depth_range": "", "soil_name": "silt" },
                        { "depth_range": "5.0~10.0m", "soil_name": "sand" }
                    ]
                }),
            )]),
            ..Default::default()
        };
        let out = run(&ex, &pages(1), &config(10, 2), "log.pdf").await;
        assert!(out.failures.is_empty());
        assert_eq!(out.soil[0].items.len(), 3);
        assert_eq!(ex.attempts.lock().unwrap()[&(1, SchemaKind::Soil)], 1);
    }

    #[tokio::test]
    async fn every_call_failing_is_reported() {
        let ex = ScriptedExtractor {
            failures: HashMap::from([((1, SchemaKind::Soil), 1), ((1, SchemaKind::Sample), 1)]),
            ..Default::default()
        };
        let out = run(&ex, &pages(1), &config(10, 0), "log.pdf").await;
        assert!(out.all_failed());
    }

    #[derive(Default)]
    struct Events {
        starts: AtomicUsize,
        completes: AtomicUsize,
        errors: Mutex<Vec<(String, usize)>>,
        batches: Mutex<Vec<(usize, usize)>>,
        total_calls: AtomicUsize,
    }

    impl ExtractionProgressCallback for Events {
        fn on_document_start(&self, _source: &str, total_calls: usize) {
            self.total_calls.store(total_calls, Ordering::SeqCst);
        }
        fn on_call_start(&self, _source: &str, _page_num: usize, _kind: SchemaKind) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }
        fn on_call_complete(&self, _source: &str, _page_num: usize, _kind: SchemaKind, _items: usize) {
            self.completes.fetch_add(1, Ordering::SeqCst);
        }
        fn on_call_error(&self, source: &str, page_num: usize, _kind: SchemaKind, _error: &str) {
            self.errors.lock().unwrap().push((source.to_string(), page_num));
        }
        fn on_batch_complete(&self, batch: usize, total_batches: usize) {
            self.batches.lock().unwrap().push((batch, total_batches));
        }
    }

    #[tokio::test]
    async fn progress_events_cover_every_call() {
        let events = Arc::new(Events::default());
        let cfg = ExtractionConfig::builder()
            .batch_size(2)
            .max_retries(0)
            .progress_callback(events.clone())
            .build()
            .unwrap();
        let ex = ScriptedExtractor {
            failures: HashMap::from([((3, SchemaKind::Sample), 1)]),
            ..Default::default()
        };
        run(&ex, &pages(3), &cfg, "log.pdf").await;

        assert_eq!(events.total_calls.load(Ordering::SeqCst), 6);
        assert_eq!(events.starts.load(Ordering::SeqCst), 6);
        assert_eq!(events.completes.load(Ordering::SeqCst), 5);
        assert_eq!(*events.errors.lock().unwrap(), vec![("log.pdf".to_string(), 3)]);
        assert_eq!(*events.batches.lock().unwrap(), vec![(1, 2), (2, 2)]);
    }
}
