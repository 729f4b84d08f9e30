//! End-to-end HTTP flow: pool and workflow setup, worker registration,
//! task generation, annotation and DPO export.

mod common;

use axum::http::{header, StatusCode};
use common::{
    body_bytes, body_json, get, patch_json, post_json, sample_workflow, upload_workflow,
    wait_for_terminal,
};
use serde_json::json;

async fn create_colors_pool(app: &axum::Router) -> i64 {
    let response = post_json(
        app,
        "/api/v1/variable-pools",
        json!({"name": "colors", "mode": "permutation", "items": ["red", "green", "blue"]}),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    body_json(response).await["data"]["id"].as_i64().unwrap()
}

async fn create_workflow(app: &axum::Router) -> i64 {
    let response = upload_workflow(app, "portrait", "v1", "4", &sample_workflow()).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let json = body_json(response).await;
    assert_eq!(json["data"]["slots"], json!(["colors"]));
    json["data"]["id"].as_i64().unwrap()
}

async fn register_healthy_worker(app: &axum::Router, name: &str) -> i64 {
    let response = post_json(
        app,
        "/api/v1/workers",
        json!({"name": name, "base_url": format!("http://{name}.local:8188/")}),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let id = body_json(response).await["data"]["id"].as_i64().unwrap();

    let response = post_json(app, &format!("/api/v1/workers/{id}/test"), json!({})).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["data"]["healthy"], true);
    id
}

// ---------------------------------------------------------------------------
// Full flow
// ---------------------------------------------------------------------------

#[tokio::test]
async fn generate_annotate_and_export() {
    let app = common::build_test_app();
    let pool_id = create_colors_pool(&app).await;
    let workflow_id = create_workflow(&app).await;
    register_healthy_worker(&app, "gpu-1").await;

    let response = post_json(
        &app,
        "/api/v1/tasks",
        json!({
            "workflow_id": workflow_id,
            "variable_pool_ids": [pool_id],
            "target_prompts": 3,
            "seeds_per_prompt": 2,
        }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let task_id = body_json(response).await["data"]["id"].as_i64().unwrap();

    let task = wait_for_terminal(&app, task_id).await;
    assert_eq!(task["status"], "COMPLETE");
    assert_eq!(task["batches_produced"], 3);
    assert_eq!(task["shortfall"], 0);

    // Feed returns every batch in sequence order.
    let feed = body_json(get(&app, &format!("/api/v1/tasks/{task_id}/batches?limit=10")).await).await;
    let batches = feed["data"].as_array().unwrap().clone();
    assert_eq!(batches.len(), 3);
    let sequences: Vec<i64> = batches
        .iter()
        .map(|b| b["sequence_number"].as_i64().unwrap())
        .collect();
    assert_eq!(sequences, vec![0, 1, 2]);
    assert_eq!(batches[0]["thumbnails"].as_array().unwrap().len(), 2);

    // Annotate the first batch, then a duplicate submission loses.
    let first = batches[0]["id"].as_i64().unwrap();
    let choice = json!({
        "task_id": task_id,
        "batch_id": first,
        "chosen_index": 1,
        "rejected_index": 0,
        "user_id": "annotator-1",
    });
    let response = post_json(&app, "/api/v1/annotations", choice.clone()).await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = post_json(&app, "/api/v1/annotations", choice).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(response).await["code"], "ALREADY_ANNOTATED");

    // Spam the second batch.
    let second = batches[1]["id"].as_i64().unwrap();
    let response = post_json(
        &app,
        "/api/v1/annotations",
        json!({"task_id": task_id, "batch_id": second, "spam": true}),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    // Feed now only offers the third batch.
    let feed = body_json(get(&app, &format!("/api/v1/tasks/{task_id}/batches")).await).await;
    let remaining: Vec<i64> = feed["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|b| b["id"].as_i64().unwrap())
        .collect();
    assert_eq!(remaining, vec![batches[2]["id"].as_i64().unwrap()]);

    let annotations =
        body_json(get(&app, &format!("/api/v1/tasks/{task_id}/annotations")).await).await;
    assert_eq!(annotations["data"].as_array().unwrap().len(), 2);

    // Export holds only the non-spam pair.
    let response = get(&app, &format!("/api/v1/tasks/{task_id}/export/dpo")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "application/x-ndjson"
    );
    let body = String::from_utf8(body_bytes(response).await).unwrap();
    let lines: Vec<&str> = body.lines().collect();
    assert_eq!(lines.len(), 1);

    let record: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
    assert_eq!(record["prompt"], batches[0]["prompt_text"]);
    assert_eq!(record["chosen"]["uri"], batches[0]["thumbnails"][1]);
    assert_eq!(record["chosen"]["seed"], batches[0]["seeds"][1]);
    assert_eq!(record["rejected"][0]["seed"], batches[0]["seeds"][0]);
    assert_eq!(record["metadata"]["task_id"], task_id);
    assert_eq!(record["metadata"]["workflow_id"], workflow_id);
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn create_task_with_unknown_workflow_returns_400() {
    let app = common::build_test_app();
    let pool_id = create_colors_pool(&app).await;

    let response = post_json(
        &app,
        "/api/v1/tasks",
        json!({
            "workflow_id": 999,
            "variable_pool_ids": [pool_id],
            "target_prompts": 1,
            "seeds_per_prompt": 2,
        }),
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["code"], "VALIDATION_ERROR");
    assert_eq!(json["error"], "workflow_id 999 does not exist");
}

#[tokio::test]
async fn create_task_with_unknown_pool_returns_400() {
    let app = common::build_test_app();
    let workflow_id = create_workflow(&app).await;

    let response = post_json(
        &app,
        "/api/v1/tasks",
        json!({
            "workflow_id": workflow_id,
            "variable_pool_ids": [4242],
            "target_prompts": 1,
            "seeds_per_prompt": 2,
        }),
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn unknown_task_returns_404() {
    let app = common::build_test_app();

    let response = get(&app, "/api/v1/tasks/999").await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["code"], "NOT_FOUND");
}

#[tokio::test]
async fn create_task_with_too_many_seeds_returns_400() {
    let app = common::build_test_app();
    let pool_id = create_colors_pool(&app).await;
    let workflow_id = create_workflow(&app).await;

    let response = post_json(
        &app,
        "/api/v1/tasks",
        json!({
            "workflow_id": workflow_id,
            "variable_pool_ids": [pool_id],
            "target_prompts": 1,
            "seeds_per_prompt": 5,
        }),
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn workflow_without_prompt_node_is_rejected() {
    let app = common::build_test_app();
    let document = json!({
        "3": {"class_type": "KSampler", "inputs": {"seed": 0}}
    });

    let response = upload_workflow(&app, "broken", "v1", "4", &document).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn pool_with_invalid_mode_is_rejected() {
    let app = common::build_test_app();

    let response = post_json(
        &app,
        "/api/v1/variable-pools",
        json!({"name": "colors", "mode": "shuffle", "items": ["red"]}),
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn invalid_annotation_returns_400() {
    let app = common::build_test_app();
    let pool_id = create_colors_pool(&app).await;
    let workflow_id = create_workflow(&app).await;
    register_healthy_worker(&app, "gpu-1").await;

    let response = post_json(
        &app,
        "/api/v1/tasks",
        json!({
            "workflow_id": workflow_id,
            "variable_pool_ids": [pool_id],
            "target_prompts": 1,
            "seeds_per_prompt": 2,
        }),
    )
    .await;
    let task_id = body_json(response).await["data"]["id"].as_i64().unwrap();
    wait_for_terminal(&app, task_id).await;

    let feed = body_json(get(&app, &format!("/api/v1/tasks/{task_id}/batches")).await).await;
    let batch_id = feed["data"][0]["id"].as_i64().unwrap();

    let response = post_json(
        &app,
        "/api/v1/annotations",
        json!({"task_id": task_id, "batch_id": batch_id, "chosen_index": 0, "rejected_index": 0}),
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "INVALID_ANNOTATION");
}

// ---------------------------------------------------------------------------
// Pools and workers
// ---------------------------------------------------------------------------

#[tokio::test]
async fn sample_preview_is_deterministic() {
    let app = common::build_test_app();
    let pool_id = create_colors_pool(&app).await;
    let uri = format!("/api/v1/variable-pools/{pool_id}/sample?count=6&seed=7");

    let first = body_json(get(&app, &uri).await).await;
    let second = body_json(get(&app, &uri).await).await;

    assert_eq!(first["data"]["items"].as_array().unwrap().len(), 6);
    assert_eq!(first["data"]["items"], second["data"]["items"]);
    assert_eq!(first["data"]["mode"], "permutation");
}

#[tokio::test]
async fn worker_can_be_disabled() {
    let app = common::build_test_app();
    let id = register_healthy_worker(&app, "gpu-1").await;

    let response = patch_json(&app, &format!("/api/v1/workers/{id}"), json!({"enabled": false})).await;
    assert_eq!(response.status(), StatusCode::OK);

    let worker = body_json(get(&app, &format!("/api/v1/workers/{id}")).await).await;
    assert_eq!(worker["data"]["is_enabled"], false);
    assert_eq!(worker["data"]["base_url"], "http://gpu-1.local:8188");
    assert!(worker["data"].get("api_key").is_none());
}

#[tokio::test]
async fn cancelling_a_finished_task_returns_409() {
    let app = common::build_test_app();
    let pool_id = create_colors_pool(&app).await;
    let workflow_id = create_workflow(&app).await;
    register_healthy_worker(&app, "gpu-1").await;

    let response = post_json(
        &app,
        "/api/v1/tasks",
        json!({
            "workflow_id": workflow_id,
            "variable_pool_ids": [pool_id],
            "target_prompts": 1,
            "seeds_per_prompt": 2,
        }),
    )
    .await;
    let task_id = body_json(response).await["data"]["id"].as_i64().unwrap();
    wait_for_terminal(&app, task_id).await;

    let response = post_json(&app, &format!("/api/v1/tasks/{task_id}/cancel"), json!({})).await;

    assert_eq!(response.status(), StatusCode::CONFLICT);
}
