//! Handlers for the export job surface.
//!
//! The download endpoint is deliberately strict: bytes are served iff the
//! job is `Completed`. A job that was cancelled — even a moment before its
//! archive landed — answers 410 Gone, never a stale file.

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;

use annolab_core::error::CoreError;
use annolab_core::export::ExportOptions;
use annolab_core::status::ExportStatus;
use annolab_core::types::{DbId, JobId};
use annolab_store::ExportJob;

use crate::auth::AuthUser;
use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

/// Body of `POST /api/v1/exports`.
#[derive(Debug, Deserialize)]
pub struct StartExportRequest {
    pub project_id: DbId,
    #[serde(default)]
    pub options: Option<ExportOptions>,
}

// ---------------------------------------------------------------------------
// Start
// ---------------------------------------------------------------------------

/// POST /api/v1/exports
///
/// Accept an export job and return 202 immediately; packaging happens on a
/// background task. Poll `GET /api/v1/exports/{id}` or subscribe to the
/// push channel for progress.
pub async fn start_export(
    auth: AuthUser,
    State(state): State<AppState>,
    Json(input): Json<StartExportRequest>,
) -> AppResult<impl IntoResponse> {
    if !state.access.can_access(auth.user_id, input.project_id).await {
        return Err(AppError::Core(CoreError::Forbidden(
            "No access to the target project".to_string(),
        )));
    }

    let options = input.options.unwrap_or_default();
    let job = state
        .exporter
        .clone()
        .start(input.project_id, auth.user_id, options)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(DataResponse { data: job })))
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// GET /api/v1/exports/{id}
pub async fn get_export(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> AppResult<impl IntoResponse> {
    let job = find_visible(&state, auth, job_id).await?;
    Ok(Json(DataResponse { data: job }))
}

// ---------------------------------------------------------------------------
// Download
// ---------------------------------------------------------------------------

/// GET /api/v1/exports/{id}/download
///
/// The archive bytes iff the job is `Completed`; 409 while it is still
/// pending/processing; 410 Gone once cancelled or failed.
pub async fn download_export(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> AppResult<impl IntoResponse> {
    let job = find_visible(&state, auth, job_id).await?;

    match job.status {
        ExportStatus::Completed => {}
        ExportStatus::Pending | ExportStatus::Processing => {
            return Ok((
                StatusCode::CONFLICT,
                Json(serde_json::json!({
                    "error": "Export is not finished yet",
                    "code": "NOT_READY",
                })),
            )
                .into_response());
        }
        ExportStatus::Cancelled | ExportStatus::Failed => {
            return Ok((
                StatusCode::GONE,
                Json(serde_json::json!({
                    "error": "Export artifact is not available",
                    "code": "GONE",
                })),
            )
                .into_response());
        }
    }

    // The store re-checks status; a path is only ever returned for
    // `Completed` jobs.
    let path = state
        .exporter
        .download_path(job_id)
        .await
        .ok_or(CoreError::NotFound {
            entity: "Export archive",
            id: job_id.to_string(),
        })?;

    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|e| CoreError::Internal(format!("failed to read archive: {e}")))?;

    let headers = [
        (header::CONTENT_TYPE, "application/zip".to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"export_{job_id}.zip\""),
        ),
    ];
    Ok((headers, bytes).into_response())
}

// ---------------------------------------------------------------------------
// Cancel
// ---------------------------------------------------------------------------

/// POST /api/v1/exports/{id}/cancel
///
/// Cancel the export and remove partial artifacts. `cancelled: false`
/// means the job had already reached a terminal status.
pub async fn cancel_export(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> AppResult<impl IntoResponse> {
    let job = find_visible(&state, auth, job_id).await?;
    if job.user_id != auth.user_id {
        return Err(AppError::Core(CoreError::Forbidden(
            "Cannot cancel another user's export".to_string(),
        )));
    }

    let cancelled = state.exporter.cancel(job_id).await?;
    Ok(Json(serde_json::json!({
        "data": { "job_id": job_id, "cancelled": cancelled }
    })))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Fetch an export job visible to the caller (owner, or project member).
async fn find_visible(state: &AppState, auth: AuthUser, job_id: JobId) -> AppResult<ExportJob> {
    let job = state
        .exporter
        .get(job_id)
        .await
        .ok_or(CoreError::NotFound {
            entity: "Export job",
            id: job_id.to_string(),
        })?;

    if job.user_id != auth.user_id && !state.access.can_access(auth.user_id, job.project_id).await {
        return Err(AppError::Core(CoreError::Forbidden(
            "Cannot view another user's export".to_string(),
        )));
    }
    Ok(job)
}
