//! Result types returned by the extraction entry points.
//!
//! Everything here is `Serialize` so the CLI and the HTTP service can emit
//! results unchanged. Field names of [`Borehole`] and its layers follow the
//! drill-log wire format (`soil_data`, `sample_data`, `Sample_number`, ...).

use crate::error::{DrillLogError, PageError};
use crate::pipeline::reconcile::{DepthRange, ReconciliationAnomaly};
use crate::schema::{Metadata, SampleRecord, SchemaKind, SoilLayer};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One soil layer with the samples collected inside its depth range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerWithSamples {
    #[serde(flatten)]
    pub layer: SoilLayer,
    /// Parsed `depth_range`; `None` when the text was not `<min>~<max>`.
    pub depth: Option<DepthRange>,
    pub samples: Vec<SampleRecord>,
}

/// Fully reconciled record for one borehole.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Borehole {
    pub hole_no: String,
    /// Soil-side metadata, first page wins.
    pub metadata: Metadata,
    pub soil_data: Vec<LayerWithSamples>,
    /// Every sample for this hole, sorted by sample number when possible.
    pub sample_data: Vec<SampleRecord>,
    /// Soil-side pages that contributed (1-indexed).
    pub pages: Vec<usize>,
    /// Document reference (path or URL) the borehole was read from.
    pub source: String,
}

/// A (page, schema) call that failed after retries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageFailure {
    pub page_num: usize,
    pub kind: SchemaKind,
    /// Attempts made, including the first.
    pub attempts: u32,
    pub error: PageError,
}

/// Whether every extraction call of a document succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Completed,
    /// Some calls failed; boreholes were reconciled from the remainder.
    Partial,
}

/// Per-document counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentStats {
    /// Pages rendered and sent for extraction.
    pub total_pages: usize,
    /// Extraction calls issued (two per page).
    pub calls: usize,
    pub failed_calls: usize,
    pub boreholes: usize,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub render_duration_ms: u64,
    pub extraction_duration_ms: u64,
    pub total_duration_ms: u64,
    /// Extraction results were served from the [`crate::cache::ResultCache`].
    pub cached: bool,
}

/// Everything produced for one input document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentOutput {
    /// Input reference exactly as supplied.
    pub source: String,
    /// SHA-256 of the PDF bytes, lower-case hex.
    pub fingerprint: String,
    pub status: DocumentStatus,
    pub boreholes: Vec<Borehole>,
    /// Sample-side metadata per hole, first page wins.
    pub sample_metadata: BTreeMap<String, Metadata>,
    pub anomalies: Vec<ReconciliationAnomaly>,
    pub failures: Vec<PageFailure>,
    pub stats: DocumentStats,
}

/// One line of the processing summary: a failed document, a failed page
/// call, or a reconciliation anomaly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub source: String,
    /// 1-indexed page, when the failure belongs to one page.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<usize>,
    pub reason: String,
}

impl FailureRecord {
    pub fn document(source: impl Into<String>, error: &DrillLogError) -> Self {
        Self {
            source: source.into(),
            page: None,
            reason: error.to_string(),
        }
    }
}

/// Roll-up over a multi-document run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessingSummary {
    pub total_documents: usize,
    pub successful_documents: usize,
    pub failed_documents: usize,
    pub total_pages: usize,
    pub total_calls: usize,
    pub failed_calls: usize,
    pub total_boreholes: usize,
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// Fatal document errors followed by failed page calls.
    pub failures: Vec<FailureRecord>,
    pub anomalies: Vec<FailureRecord>,
}

impl ProcessingSummary {
    /// Fold a processed document into the summary.
    pub fn record_document(&mut self, doc: &DocumentOutput) {
        self.total_documents += 1;
        self.successful_documents += 1;
        self.total_pages += doc.stats.total_pages;
        self.total_calls += doc.stats.calls;
        self.failed_calls += doc.stats.failed_calls;
        self.total_boreholes += doc.boreholes.len();
        self.input_tokens += doc.stats.input_tokens;
        self.output_tokens += doc.stats.output_tokens;
        self.failures.extend(doc.failures.iter().map(|f| FailureRecord {
            source: doc.source.clone(),
            page: Some(f.page_num),
            reason: f.error.to_string(),
        }));
        self.anomalies
            .extend(doc.anomalies.iter().map(|a| FailureRecord {
                source: doc.source.clone(),
                page: None,
                reason: a.to_string(),
            }));
    }

    /// Record a document that failed outright.
    pub fn record_failure(&mut self, failure: FailureRecord) {
        self.total_documents += 1;
        self.failed_documents += 1;
        self.failures.push(failure);
    }
}

/// Result of [`crate::process::DrillLogPipeline::process_documents`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchOutput {
    /// Successful documents in input order.
    pub documents: Vec<DocumentOutput>,
    pub summary: ProcessingSummary,
}

impl BatchOutput {
    /// Every borehole across documents, in input order.
    pub fn boreholes(&self) -> impl Iterator<Item = &Borehole> {
        self.documents.iter().flat_map(|d| d.boreholes.iter())
    }

    /// Boreholes with the given identifier, across documents.
    pub fn find_hole<'a>(&'a self, hole_no: &'a str) -> impl Iterator<Item = &'a Borehole> + 'a {
        self.boreholes().filter(move |b| b.hole_no == hole_no)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(source: &str, holes: &[&str]) -> DocumentOutput {
        DocumentOutput {
            source: source.into(),
            fingerprint: "00".into(),
            status: DocumentStatus::Partial,
            boreholes: holes
                .iter()
                .map(|h| Borehole {
                    hole_no: (*h).into(),
                    metadata: Metadata::default(),
                    soil_data: vec![],
                    sample_data: vec![],
                    pages: vec![1],
                    source: source.into(),
                })
                .collect(),
            sample_metadata: BTreeMap::new(),
            anomalies: vec![ReconciliationAnomaly::SoilOnlyBorehole {
                hole_no: "BH-1".into(),
            }],
            failures: vec![PageFailure {
                page_num: 2,
                kind: SchemaKind::Sample,
                attempts: 4,
                error: PageError::Timeout {
                    page: 2,
                    kind: SchemaKind::Sample,
                    secs: 120,
                },
            }],
            stats: DocumentStats {
                total_pages: 2,
                calls: 4,
                failed_calls: 1,
                ..Default::default()
            },
        }
    }

    #[test]
    fn layer_serialises_flat() {
        let layer = LayerWithSamples {
            layer: SoilLayer {
                depth_range: "0.0~5.0m".into(),
                soil_name: "clay".into(),
                soil_color: "grey".into(),
                observation: String::new(),
            },
            depth: Some(DepthRange { min: 0.0, max: 5.0 }),
            samples: vec![],
        };
        let v = serde_json::to_value(&layer).unwrap();
        assert_eq!(v["depth_range"], "0.0~5.0m");
        assert_eq!(v["soil_name"], "clay");
        assert_eq!(v["depth"], json!({ "min": 0.0, "max": 5.0 }));
    }

    #[test]
    fn summary_folds_documents_and_failures() {
        let mut s = ProcessingSummary::default();
        s.record_document(&doc("a.pdf", &["BH-1", "BH-2"]));
        s.record_failure(FailureRecord::document(
            "b.pdf",
            &DrillLogError::InvalidInput { input: "b".into() },
        ));

        assert_eq!(s.total_documents, 2);
        assert_eq!(s.successful_documents, 1);
        assert_eq!(s.failed_documents, 1);
        assert_eq!(s.total_boreholes, 2);
        assert_eq!(s.failed_calls, 1);
        assert_eq!(s.failures.len(), 2);
        assert_eq!(s.failures[0].page, Some(2));
        assert_eq!(s.failures[1].source, "b.pdf");
        assert_eq!(s.anomalies.len(), 1);
    }

    #[test]
    fn batch_finds_holes_across_documents() {
        let batch = BatchOutput {
            documents: vec![doc("a.pdf", &["BH-1"]), doc("b.pdf", &["BH-1", "BH-2"])],
            summary: ProcessingSummary::default(),
        };
        assert_eq!(batch.boreholes().count(), 3);
        let sources: Vec<_> = batch.find_hole("BH-1").map(|b| b.source.as_str()).collect();
        assert_eq!(sources, vec!["a.pdf", "b.pdf"]);
    }
}
