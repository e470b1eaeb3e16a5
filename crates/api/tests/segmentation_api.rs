//! Integration tests for the segmentation queue surface.
//!
//! Exercises the full enqueue → dispatch → inference → commit pipeline
//! against the real router, with the CPU fallback device standing in for
//! the accelerator.

mod common;

use axum::http::{Method, StatusCode};
use serde_json::json;

use common::{
    body_json, build_test_app, get, post, send, wait_for_terminal, write_image, OTHER_USER, OWNER,
    PROJECT, SHARED_USER,
};

// ---------------------------------------------------------------------------
// Identity and validation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn missing_identity_is_unauthorized() {
    let app = build_test_app(false).await;

    let response = send(
        &app.router,
        Method::POST,
        "/api/v1/segmentations",
        None,
        Some(json!({ "image_id": 1, "project_id": PROJECT })),
    )
    .await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn unknown_model_is_rejected() {
    let app = build_test_app(false).await;

    let response = post(
        &app.router,
        "/api/v1/segmentations",
        OWNER,
        json!({ "image_id": 1, "project_id": PROJECT, "model": "resnet50" }),
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn out_of_range_threshold_is_rejected() {
    let app = build_test_app(false).await;

    let response = post(
        &app.router,
        "/api/v1/segmentations",
        OWNER,
        json!({ "image_id": 1, "project_id": PROJECT, "threshold": 1.5 }),
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn foreign_project_is_forbidden() {
    let app = build_test_app(false).await;

    let response = post(
        &app.router,
        "/api/v1/segmentations",
        OTHER_USER,
        json!({ "image_id": 1, "project_id": PROJECT }),
    )
    .await;

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn shared_user_may_enqueue() {
    let app = build_test_app(false).await;

    let response = post(
        &app.router,
        "/api/v1/segmentations",
        SHARED_USER,
        json!({ "image_id": 1, "project_id": PROJECT }),
    )
    .await;

    assert_eq!(response.status(), StatusCode::CREATED);
}

// ---------------------------------------------------------------------------
// Execution pipeline
// ---------------------------------------------------------------------------

#[tokio::test]
async fn enqueued_job_completes_with_polygons() {
    let app = build_test_app(true).await;
    write_image(&app, 1);

    // min_area 50 keeps the fallback device's 8x8 (area 64) detection.
    let response = post(
        &app.router,
        "/api/v1/segmentations",
        OWNER,
        json!({ "image_id": 1, "project_id": PROJECT, "min_area": 50 }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = body_json(response).await;
    assert_eq!(created["data"]["status"], "queued");
    let job_id = created["data"]["id"].as_str().expect("job id").to_string();

    let finished = wait_for_terminal(&app.router, "/api/v1/segmentations", &job_id, OWNER).await;
    assert_eq!(finished["status"], "completed");
    assert_eq!(finished["retry_count"], 0);
    assert_eq!(
        finished["result"]["polygons"].as_array().expect("polygons").len(),
        1
    );
}

#[tokio::test]
async fn missing_image_marks_job_failed() {
    let app = build_test_app(true).await;
    // Image 99 was never written.

    let response = post(
        &app.router,
        "/api/v1/segmentations",
        OWNER,
        json!({ "image_id": 99, "project_id": PROJECT }),
    )
    .await;
    let created = body_json(response).await;
    let job_id = created["data"]["id"].as_str().expect("job id").to_string();

    let finished = wait_for_terminal(&app.router, "/api/v1/segmentations", &job_id, OWNER).await;
    assert_eq!(finished["status"], "failed");
    assert!(finished["error"].as_str().expect("error").contains("Image"));
}

#[tokio::test]
async fn bulk_enqueue_creates_all_jobs() {
    let app = build_test_app(false).await;

    let response = post(
        &app.router,
        "/api/v1/segmentations",
        OWNER,
        json!({ "jobs": [
            { "image_id": 1, "project_id": PROJECT },
            { "image_id": 2, "project_id": PROJECT, "priority": 10 },
        ]}),
    )
    .await;

    assert_eq!(response.status(), StatusCode::CREATED);
    let json = body_json(response).await;
    assert_eq!(json["data"].as_array().expect("array").len(), 2);
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cancel_queued_job_then_cancel_again_is_noop() {
    let app = build_test_app(false).await;

    let created = body_json(
        post(
            &app.router,
            "/api/v1/segmentations",
            OWNER,
            json!({ "image_id": 1, "project_id": PROJECT }),
        )
        .await,
    )
    .await;
    let job_id = created["data"]["id"].as_str().expect("job id").to_string();

    let response = post(
        &app.router,
        &format!("/api/v1/segmentations/{job_id}/cancel"),
        OWNER,
        json!({}),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["data"]["cancelled"], true);

    // Already terminal: the second cancel changes nothing.
    let response = post(
        &app.router,
        &format!("/api/v1/segmentations/{job_id}/cancel"),
        OWNER,
        json!({}),
    )
    .await;
    assert_eq!(body_json(response).await["data"]["cancelled"], false);
}

#[tokio::test]
async fn cancel_all_only_touches_callers_jobs() {
    let app = build_test_app(false).await;

    for _ in 0..2 {
        post(
            &app.router,
            "/api/v1/segmentations",
            OWNER,
            json!({ "image_id": 1, "project_id": PROJECT }),
        )
        .await;
    }
    let shared = body_json(
        post(
            &app.router,
            "/api/v1/segmentations",
            SHARED_USER,
            json!({ "image_id": 2, "project_id": PROJECT }),
        )
        .await,
    )
    .await;
    let shared_job_id = shared["data"]["id"].as_str().expect("job id").to_string();

    let response = post(
        &app.router,
        "/api/v1/segmentations/cancel-all",
        OWNER,
        json!({}),
    )
    .await;
    let summary = body_json(response).await;
    assert_eq!(summary["data"]["cancelled_count"], 2);
    assert_eq!(summary["data"]["affected_projects"], json!([PROJECT]));

    // The shared user's job is untouched.
    let response = get(
        &app.router,
        &format!("/api/v1/segmentations/{shared_job_id}"),
        SHARED_USER,
    )
    .await;
    assert_eq!(body_json(response).await["data"]["status"], "queued");
}

#[tokio::test]
async fn cancel_unknown_job_is_not_found() {
    let app = build_test_app(false).await;

    let response = post(
        &app.router,
        &format!("/api/v1/segmentations/{}/cancel", uuid::Uuid::now_v7()),
        OWNER,
        json!({}),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

#[tokio::test]
async fn snapshot_counts_queued_jobs() {
    let app = build_test_app(false).await;

    for _ in 0..3 {
        post(
            &app.router,
            "/api/v1/segmentations",
            OWNER,
            json!({ "image_id": 1, "project_id": PROJECT }),
        )
        .await;
    }

    let response = get(
        &app.router,
        &format!("/api/v1/queue/snapshot?project_id={PROJECT}"),
        OWNER,
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let snapshot = body_json(response).await;
    assert_eq!(snapshot["data"]["queued"], 3);
    assert_eq!(snapshot["data"]["processing"], 0);
}

#[tokio::test]
async fn snapshot_for_foreign_project_is_forbidden() {
    let app = build_test_app(false).await;

    let response = get(
        &app.router,
        &format!("/api/v1/queue/snapshot?project_id={PROJECT}"),
        OTHER_USER,
    )
    .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}
