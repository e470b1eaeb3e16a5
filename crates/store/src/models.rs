//! Job entity models and derived aggregates.

use std::path::PathBuf;

use serde::Serialize;

use annolab_core::export::{ExportOptions, ExportPhase};
use annolab_core::segmentation::SegmentationResult;
use annolab_core::status::{ExportStatus, JobStatus};
use annolab_core::types::{new_job_id, DbId, JobId, Timestamp};

/// A user-submitted segmentation job.
#[derive(Debug, Clone, Serialize)]
pub struct SegmentationJob {
    pub id: JobId,
    pub image_id: DbId,
    pub project_id: DbId,
    pub user_id: DbId,
    pub status: JobStatus,
    /// Higher values are dequeued sooner; FIFO within a tier.
    pub priority: i32,
    pub model: String,
    pub threshold: f32,
    pub min_area: u32,
    pub detect_holes: bool,
    pub created_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    pub error: Option<String>,
    /// Set alongside `Failed` when resubmitting as-is may succeed.
    pub retryable: bool,
    /// Automatic OOM retries performed during execution.
    pub retry_count: u32,
    pub result: Option<SegmentationResult>,
}

impl SegmentationJob {
    /// Construct a new job in `Queued` status.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        image_id: DbId,
        project_id: DbId,
        user_id: DbId,
        model: String,
        threshold: f32,
        min_area: u32,
        detect_holes: bool,
        priority: i32,
    ) -> Self {
        Self {
            id: new_job_id(),
            image_id,
            project_id,
            user_id,
            status: JobStatus::Queued,
            priority,
            model,
            threshold,
            min_area,
            detect_holes,
            created_at: chrono::Utc::now(),
            started_at: None,
            completed_at: None,
            error: None,
            retryable: false,
            retry_count: 0,
            result: None,
        }
    }
}

/// A long-running export packaging job.
#[derive(Debug, Clone, Serialize)]
pub struct ExportJob {
    pub id: JobId,
    pub project_id: DbId,
    pub user_id: DbId,
    pub status: ExportStatus,
    /// Most recently started phase, for display only.
    pub phase: Option<ExportPhase>,
    /// Aggregate progress percent. Monotone non-decreasing while
    /// `Processing`; meaningless once a terminal status is set.
    pub progress: u8,
    pub options: ExportOptions,
    /// Path to the packaged archive. Populated iff `Completed`.
    pub file_path: Option<PathBuf>,
    pub error: Option<String>,
    pub created_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    pub cancelled_at: Option<Timestamp>,
}

impl ExportJob {
    /// Construct a new export job in `Pending` status.
    pub fn new(project_id: DbId, user_id: DbId, options: ExportOptions) -> Self {
        Self {
            id: new_job_id(),
            project_id,
            user_id,
            status: ExportStatus::Pending,
            phase: None,
            progress: 0,
            options,
            file_path: None,
            error: None,
            created_at: chrono::Utc::now(),
            started_at: None,
            completed_at: None,
            cancelled_at: None,
        }
    }
}

/// Derived, read-only queue counts for a project or a user.
///
/// Recomputed on demand; never persisted as authoritative state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueSnapshot {
    pub queued: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
}

/// Result of a bulk cancellation.
#[derive(Debug, Clone, Serialize)]
pub struct CancelSummary {
    pub cancelled_count: usize,
    /// Distinct projects that had at least one job cancelled, ascending.
    pub affected_projects: Vec<DbId>,
}
