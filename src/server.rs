//! HTTP service: batch extraction behind a JSON endpoint.
//!
//! Routes:
//!
//! | Method | Path                          | Body / result |
//! |--------|-------------------------------|---------------|
//! | GET    | `/`                           | service info  |
//! | GET    | `/api/v1/health`              | health JSON   |
//! | POST   | `/api/v1/process-drill-logs`  | [`ProcessRequest`] → [`ProcessResponse`] |
//!
//! Inputs are HTTP(S) URLs. Local paths are accepted only when the state was
//! built with `allow_local_paths`, which the binary maps to
//! `DRILLLOG_ALLOW_LOCAL_PATHS`.

use crate::output::{BatchOutput, FailureRecord, LayerWithSamples};
use crate::pipeline::input::is_url;
use crate::process::DrillLogPipeline;
use crate::schema::{Metadata, SampleRecord};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

const SERVICE_NAME: &str = "Drill Log Data Extraction API";

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pipeline: Arc<DrillLogPipeline>,
    allow_local_paths: bool,
}

impl AppState {
    pub fn new(pipeline: DrillLogPipeline, allow_local_paths: bool) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            allow_local_paths,
        }
    }
}

/// Build the service router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/api/v1/health", get(health_check))
        .route("/api/v1/process-drill-logs", post(process_drill_logs))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ── Wire types ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessRequest {
    /// Document URLs. `s3_urls` is accepted as an alias; the objects must be
    /// reachable over HTTP(S), e.g. presigned.
    #[serde(alias = "s3_urls")]
    pub urls: Vec<String>,
    pub pdf_id: String,
    pub user_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoreholeResponse {
    pub hole_no: String,
    pub metadata: Metadata,
    pub sample_data: Vec<SampleRecord>,
    pub soil_data: Vec<LayerWithSamples>,
    pub source_pdf_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseSummary {
    pub total_urls: usize,
    pub successfully_processed: usize,
    pub failed_processing: usize,
    pub failed_calls: usize,
    /// `"<url>: <reason>"` per failed document and
    /// `"<url> page <n>: <reason>"` per failed call.
    pub errors: Vec<String>,
    /// `"<url>: <anomaly>"` per reconciliation anomaly.
    pub anomalies: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessResponse {
    pub pdf_id: String,
    pub user_id: String,
    /// `"completed"` when at least one document succeeded, else `"failed"`.
    pub status: String,
    pub total_pdfs_processed: usize,
    pub total_boreholes_found: usize,
    pub boreholes: Vec<BoreholeResponse>,
    pub processing_summary: ResponseSummary,
}

impl ProcessResponse {
    fn from_batch(request: ProcessRequest, batch: BatchOutput) -> Self {
        let summary = &batch.summary;
        let processing_summary = ResponseSummary {
            total_urls: request.urls.len(),
            successfully_processed: summary.successful_documents,
            failed_processing: summary.failed_documents,
            failed_calls: summary.failed_calls,
            errors: summary.failures.iter().map(describe).collect(),
            anomalies: summary.anomalies.iter().map(describe).collect(),
        };
        let status = if summary.successful_documents > 0 {
            "completed"
        } else {
            "failed"
        };
        let total_pdfs_processed = summary.successful_documents;

        let boreholes: Vec<BoreholeResponse> = batch
            .documents
            .into_iter()
            .flat_map(|doc| doc.boreholes)
            .map(|b| BoreholeResponse {
                hole_no: b.hole_no,
                metadata: b.metadata,
                sample_data: b.sample_data,
                soil_data: b.soil_data,
                source_pdf_url: b.source,
            })
            .collect();

        Self {
            pdf_id: request.pdf_id,
            user_id: request.user_id,
            status: status.to_string(),
            total_pdfs_processed,
            total_boreholes_found: boreholes.len(),
            boreholes,
            processing_summary,
        }
    }
}

fn describe(record: &FailureRecord) -> String {
    match record.page {
        Some(page) => format!("{} page {}: {}", record.source, page, record.reason),
        None => format!("{}: {}", record.source, record.reason),
    }
}

// ── Errors ───────────────────────────────────────────────────────────────

/// Request rejected before processing.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("No URLs provided")]
    NoUrls,
    #[error("Not an HTTP(S) URL: '{0}'")]
    NotAUrl(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            StatusCode::BAD_REQUEST,
            Json(json!({ "detail": self.to_string() })),
        )
            .into_response()
    }
}

// ── Handlers ─────────────────────────────────────────────────────────────

async fn root() -> Json<Value> {
    Json(json!({
        "message": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "endpoint": "/api/v1/process-drill-logs",
        "health": "/api/v1/health",
    }))
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "extraction_method": "Two-pass schema extraction",
    }))
}

async fn process_drill_logs(
    State(state): State<AppState>,
    Json(request): Json<ProcessRequest>,
) -> Result<Json<ProcessResponse>, ApiError> {
    if request.urls.is_empty() {
        return Err(ApiError::NoUrls);
    }
    if !state.allow_local_paths {
        if let Some(bad) = request.urls.iter().find(|u| !is_url(u)) {
            return Err(ApiError::NotAUrl(bad.clone()));
        }
    }

    info!(
        "pdf_id={} user_id={}: processing {} documents",
        request.pdf_id,
        request.user_id,
        request.urls.len()
    );
    let batch = state.pipeline.process_documents(&request.urls).await;
    Ok(Json(ProcessResponse::from_batch(request, batch)))
}
