#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use tower::ServiceExt;

use datalabel_api::config::ServerConfig;
use datalabel_api::router::build_app_router;
use datalabel_api::state::AppState;
use datalabel_db::store::{MemoryStore, Store};
use datalabel_pipeline::config::PipelineConfig;
use datalabel_pipeline::render::{RenderClient, RenderError, RenderJob, RenderOutput, WorkerTarget};
use datalabel_pipeline::Pipeline;

/// Render client that answers every probe and renders instantly.
pub struct InstantRenderer;

#[async_trait]
impl RenderClient for InstantRenderer {
    async fn render(
        &self,
        worker: &WorkerTarget,
        _document: &serde_json::Value,
        job: &RenderJob,
    ) -> Result<RenderOutput, RenderError> {
        Ok(RenderOutput {
            thumbnails: job
                .seeds
                .iter()
                .map(|seed| format!("{}/view?filename=u{}_{seed}.png", worker.base_url, job.unit_id))
                .collect(),
        })
    }

    async fn probe(&self, _worker: &WorkerTarget) -> Result<(), RenderError> {
        Ok(())
    }
}

/// Build a test `ServerConfig` with safe defaults.
///
/// Uses `http://localhost:5173` as CORS origin (matching the dev default)
/// and a 30-second request timeout.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 30,
        database_url: None,
        pipeline: PipelineConfig {
            no_worker_backoff: Duration::from_millis(10),
            ..PipelineConfig::default()
        },
    }
}

/// Build the full application router over a fresh in-memory store.
///
/// Uses the same [`build_app_router`] as `main.rs` so tests exercise the
/// production middleware stack.
pub fn build_test_app() -> Router {
    let config = test_config();
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let pipeline = Pipeline::new(
        Arc::clone(&store),
        Arc::new(InstantRenderer),
        config.pipeline.clone(),
    );
    let state = AppState {
        store,
        config: Arc::new(config.clone()),
        pipeline,
    };
    build_app_router(state, &config)
}

// ---------------------------------------------------------------------------
// Request helpers
// ---------------------------------------------------------------------------

pub async fn send(app: &Router, request: Request<Body>) -> Response<Body> {
    app.clone().oneshot(request).await.unwrap()
}

pub async fn get(app: &Router, uri: &str) -> Response<Body> {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    send(app, request).await
}

pub async fn post_json(app: &Router, uri: &str, body: serde_json::Value) -> Response<Body> {
    json_request(app, Method::POST, uri, body).await
}

pub async fn patch_json(app: &Router, uri: &str, body: serde_json::Value) -> Response<Body> {
    json_request(app, Method::PATCH, uri, body).await
}

async fn json_request(
    app: &Router,
    method: Method,
    uri: &str,
    body: serde_json::Value,
) -> Response<Body> {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    send(app, request).await
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    response.into_body().collect().await.unwrap().to_bytes().to_vec()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

const BOUNDARY: &str = "datalabel-test-boundary";

/// POST a workflow as a multipart form.
pub async fn upload_workflow(
    app: &Router,
    name: &str,
    version: &str,
    max_batch_size: &str,
    document: &serde_json::Value,
) -> Response<Body> {
    let mut body = String::new();
    for (field, value) in [
        ("name", name),
        ("version", version),
        ("max_batch_size", max_batch_size),
    ] {
        body.push_str(&format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"\r\n\r\n{value}\r\n"
        ));
    }
    body.push_str(&format!(
        "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"workflow.json\"\r\nContent-Type: application/json\r\n\r\n{document}\r\n--{BOUNDARY}--\r\n"
    ));

    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/v1/workflows")
        .header(
            "content-type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap();
    send(app, request).await
}

pub fn sample_workflow() -> serde_json::Value {
    serde_json::json!({
        "3": {"class_type": "KSampler", "inputs": {"seed": 0, "steps": 20}},
        "5": {"class_type": "EmptyLatentImage", "inputs": {"batch_size": 4}},
        "6": {"class_type": "CLIPTextEncode", "inputs": {"text": "a photo of {colors}"}}
    })
}

/// Poll `GET /tasks/{id}` until the task is COMPLETE or FAILED.
pub async fn wait_for_terminal(app: &Router, task_id: i64) -> serde_json::Value {
    let poll = async {
        loop {
            let task = body_json(get(app, &format!("/api/v1/tasks/{task_id}")).await).await;
            let status = task["data"]["status"].as_str().unwrap_or_default().to_string();
            if status == "COMPLETE" || status == "FAILED" {
                return task["data"].clone();
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(10), poll)
        .await
        .expect("task did not finish in time")
}
