//! Handlers for the segmentation queue surface.
//!
//! All endpoints require a caller identity via [`AuthUser`]. No endpoint
//! blocks on execution: enqueue returns the queued job immediately and the
//! GET endpoint is the pull-based source of truth.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;

use annolab_core::types::{DbId, JobId};

use crate::auth::AuthUser;
use crate::engine::queue::SubmitSegmentation;
use crate::error::AppResult;
use crate::response::DataResponse;
use crate::state::AppState;

/// Body of `POST /api/v1/segmentations`: one job, or `{"jobs": [...]}`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum EnqueueRequest {
    Bulk { jobs: Vec<SubmitSegmentation> },
    Single(SubmitSegmentation),
}

/// Query parameters for `GET /api/v1/queue/snapshot`.
#[derive(Debug, Deserialize)]
pub struct SnapshotQuery {
    pub project_id: Option<DbId>,
}

// ---------------------------------------------------------------------------
// Enqueue
// ---------------------------------------------------------------------------

/// POST /api/v1/segmentations
///
/// Enqueue one or many segmentation jobs. Returns 201 with the created
/// job(s); execution happens on background workers.
pub async fn enqueue(
    auth: AuthUser,
    State(state): State<AppState>,
    Json(input): Json<EnqueueRequest>,
) -> AppResult<impl IntoResponse> {
    match input {
        EnqueueRequest::Single(job) => {
            let created = state.queue.enqueue(auth.user_id, &job).await?;
            Ok((StatusCode::CREATED, Json(DataResponse { data: created })).into_response())
        }
        EnqueueRequest::Bulk { jobs } => {
            let created = state.queue.enqueue_many(auth.user_id, &jobs).await?;
            Ok((StatusCode::CREATED, Json(DataResponse { data: created })).into_response())
        }
    }
}

// ---------------------------------------------------------------------------
// Get
// ---------------------------------------------------------------------------

/// GET /api/v1/segmentations/{id}
pub async fn get_job(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> AppResult<impl IntoResponse> {
    let job = state.queue.get_job(auth.user_id, job_id).await?;
    Ok(Json(DataResponse { data: job }))
}

// ---------------------------------------------------------------------------
// Cancel
// ---------------------------------------------------------------------------

/// POST /api/v1/segmentations/{id}/cancel
///
/// Compare-and-set cancellation. `cancelled: false` means the job had
/// already reached a terminal status and nothing changed.
pub async fn cancel_job(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> AppResult<impl IntoResponse> {
    let cancelled = state.queue.cancel(auth.user_id, job_id).await?;
    Ok(Json(serde_json::json!({
        "data": { "job_id": job_id, "cancelled": cancelled }
    })))
}

/// POST /api/v1/segmentations/cancel-all
///
/// Cancel every queued/processing job owned by the caller. Other users'
/// jobs are never affected.
pub async fn cancel_all(
    auth: AuthUser,
    State(state): State<AppState>,
) -> AppResult<impl IntoResponse> {
    let summary = state.queue.cancel_all(auth.user_id).await?;
    Ok(Json(DataResponse { data: summary }))
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// GET /api/v1/queue/snapshot
///
/// Recomputed queue counts for a project (requires access) or, with no
/// `project_id`, for the caller's own jobs.
pub async fn queue_snapshot(
    auth: AuthUser,
    State(state): State<AppState>,
    Query(query): Query<SnapshotQuery>,
) -> AppResult<impl IntoResponse> {
    let snapshot = state.queue.snapshot(auth.user_id, query.project_id).await?;
    Ok(Json(DataResponse { data: snapshot }))
}
