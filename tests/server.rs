//! Router tests for the HTTP service, driven in-process with `oneshot`.
//!
//! Run with: `cargo test --features server --test server`

#![cfg(feature = "server")]

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use edgequake_drilllog::server::{router, AppState};
use edgequake_drilllog::{
    DrillLogError, DrillLogPipeline, ExtractionConfig, ExtractorError, PageExtractor, PageImage,
    PageRenderer, RawExtraction, SchemaKind,
};
use edgequake_llm::ImageData;
use serde_json::{json, Value};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tower::ServiceExt;

struct OnePage;

#[async_trait]
impl PageRenderer for OnePage {
    async fn render(&self, _pdf_path: &Path) -> Result<Vec<PageImage>, DrillLogError> {
        Ok(vec![PageImage {
            page_num: 1,
            image: ImageData::new("AA==".to_string(), "image/jpeg"),
        }])
    }
}

struct FixedAnswer;

#[async_trait]
impl PageExtractor for FixedAnswer {
    async fn extract(
        &self,
        _page: &PageImage,
        kind: SchemaKind,
    ) -> Result<RawExtraction, ExtractorError> {
        let json = match kind {
            SchemaKind::Soil => json!({
                "metadata": { "HOLE_NO": "BH-12", "GROUND ELEVATION": "35.2m" },
                "soil_data": [
                    { "depth_range": "0.0~2.5m", "soil_name": "fill" },
                    { "depth_range": "2.5~9.0m", "soil_name": "sandy gravel" }
                ]
            }),
            SchemaKind::Sample => json!({
                "metadata": { "HOLE_NO": "BH-12" },
                "sample_data": [
                    { "Sample_number": "S-2", "Depth": 4.0, "Hits": "12/30", "Method": "SPT" },
                    { "Sample_number": "S-1", "Depth": 1.5, "Hits": "4/30", "Method": "SPT" }
                ]
            }),
        };
        Ok(RawExtraction {
            json,
            input_tokens: 50,
            output_tokens: 10,
        })
    }
}

/// Two pages. Page 2's sample call fails and page 2 has a layer without a
/// depth range.
struct TwoPages;

#[async_trait]
impl PageRenderer for TwoPages {
    async fn render(&self, _pdf_path: &Path) -> Result<Vec<PageImage>, DrillLogError> {
        Ok((1..=2)
            .map(|page_num| PageImage {
                page_num,
                image: ImageData::new("AA==".to_string(), "image/jpeg"),
            })
            .collect())
    }
}

struct SecondPageFails;

#[async_trait]
impl PageExtractor for SecondPageFails {
    async fn extract(
        &self,
        page: &PageImage,
        kind: SchemaKind,
    ) -> Result<RawExtraction, ExtractorError> {
        let json = match (kind, page.page_num) {
            (SchemaKind::Sample, 2) => {
                return Err(ExtractorError::Backend("HTTP 429 rate limited".into()))
            }
            (SchemaKind::Soil, 1) => json!({
                "metadata": { "HOLE_NO": "BH-3" },
                "soil_data": [{ "depth_range": "0.0~6.0m", "soil_name": "clay" }]
            }),
            (SchemaKind::Soil, _) => json!({
                "metadata": { "HOLE_NO": "BH-3" },
                "soil_data": [{ "depth_range": "", "soil_name": "sand" }]
            }),
            (SchemaKind::Sample, _) => json!({
                "metadata": { "HOLE_NO": "BH-3" },
                "sample_data": [{ "Sample_number": "S-1", "Depth": 2.0 }]
            }),
        };
        Ok(RawExtraction {
            json,
            input_tokens: 50,
            output_tokens: 10,
        })
    }
}

fn app_with(
    allow_local_paths: bool,
    renderer: Arc<dyn PageRenderer>,
    extractor: Arc<dyn PageExtractor>,
) -> axum::Router {
    let config = ExtractionConfig::builder().max_retries(0).build().unwrap();
    let pipeline = DrillLogPipeline::new(config, renderer, extractor);
    router(AppState::new(pipeline, allow_local_paths))
}

fn app(allow_local_paths: bool) -> axum::Router {
    app_with(allow_local_paths, Arc::new(OnePage), Arc::new(FixedAnswer))
}

fn stub_pdf() -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".pdf").tempfile().unwrap();
    file.write_all(b"%PDF-1.7\n").unwrap();
    file
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn post_json(body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/v1/process-drill-logs")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn health_reports_healthy() {
    let response = app(false)
        .oneshot(Request::get("/api/v1/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn root_points_at_the_endpoint() {
    let response = app(false)
        .oneshot(Request::get("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["endpoint"], "/api/v1/process-drill-logs");
}

#[tokio::test]
async fn empty_url_list_is_rejected() {
    let response = app(false)
        .oneshot(post_json(json!({ "urls": [], "pdf_id": "p1", "user_id": "u1" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["detail"], "No URLs provided");
}

#[tokio::test]
async fn local_path_is_rejected_by_default() {
    let response = app(false)
        .oneshot(post_json(json!({
            "s3_urls": ["/etc/passwd"],
            "pdf_id": "p1",
            "user_id": "u1"
        })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert!(body["detail"].as_str().unwrap().contains("/etc/passwd"));
}

#[tokio::test]
async fn processes_local_documents_when_allowed() {
    let file = stub_pdf();
    let path = file.path().to_string_lossy().to_string();
    let missing = format!("{path}.missing");

    let response = app(true)
        .oneshot(post_json(json!({
            "urls": [path, missing],
            "pdf_id": "site-42",
            "user_id": "geo-team"
        })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["pdf_id"], "site-42");
    assert_eq!(body["user_id"], "geo-team");
    assert_eq!(body["status"], "completed");
    assert_eq!(body["total_pdfs_processed"], 1);
    assert_eq!(body["total_boreholes_found"], 1);

    let hole = &body["boreholes"][0];
    assert_eq!(hole["hole_no"], "BH-12");
    assert_eq!(hole["source_pdf_url"], path.as_str());
    assert_eq!(hole["metadata"]["GROUND ELEVATION"], "35.2m");
    assert_eq!(hole["sample_data"][0]["Sample_number"], "S-1");
    assert_eq!(hole["soil_data"][0]["samples"][0]["Sample_number"], "S-1");
    assert_eq!(hole["soil_data"][1]["samples"][0]["Sample_number"], "S-2");

    let summary = &body["processing_summary"];
    assert_eq!(summary["total_urls"], 2);
    assert_eq!(summary["successfully_processed"], 1);
    assert_eq!(summary["failed_processing"], 1);
    let errors = summary["errors"].as_array().unwrap();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].as_str().unwrap().starts_with(&missing));
    assert!(summary["anomalies"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn partial_document_lists_call_failures_and_anomalies() {
    let file = stub_pdf();
    let path = file.path().to_string_lossy().to_string();

    let response = app_with(true, Arc::new(TwoPages), Arc::new(SecondPageFails))
        .oneshot(post_json(json!({ "urls": [path], "pdf_id": "p1", "user_id": "u1" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "completed");
    assert_eq!(body["total_boreholes_found"], 1);
    assert_eq!(body["boreholes"][0]["soil_data"].as_array().unwrap().len(), 2);

    let summary = &body["processing_summary"];
    assert_eq!(summary["failed_processing"], 0);
    assert_eq!(summary["failed_calls"], 1);

    let errors = summary["errors"].as_array().unwrap();
    assert_eq!(errors.len(), 1);
    let error = errors[0].as_str().unwrap();
    assert!(error.starts_with(&format!("{path} page 2: ")), "got: {error}");
    assert!(error.contains("429"), "got: {error}");

    let anomalies = summary["anomalies"].as_array().unwrap();
    assert_eq!(anomalies.len(), 1);
    let anomaly = anomalies[0].as_str().unwrap();
    assert!(anomaly.starts_with(&format!("{path}: ")), "got: {anomaly}");
    assert!(anomaly.contains("unparseable depth range"), "got: {anomaly}");
}

#[tokio::test]
async fn all_documents_failing_reports_failed() {
    let response = app(true)
        .oneshot(post_json(json!({
            "urls": ["/nonexistent/BH-1.pdf"],
            "pdf_id": "p1",
            "user_id": "u1"
        })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "failed");
    assert_eq!(body["total_boreholes_found"], 0);
}
