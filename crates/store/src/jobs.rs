//! Segmentation job registry.
//!
//! All mutations run under the registry's write lock with no `.await` inside
//! the critical section, so each operation is atomic with respect to every
//! other. Terminal writes are compare-and-set: `complete`/`fail` apply only
//! from `Processing`, `cancel` applies only from `Queued`/`Processing`.
//! A stale completion can therefore never overwrite a user-issued
//! cancellation, and vice versa.

use std::collections::HashMap;

use tokio::sync::RwLock;

use annolab_core::error::{CoreError, CoreResult};
use annolab_core::segmentation::SegmentationResult;
use annolab_core::status::JobStatus;
use annolab_core::types::{DbId, JobId};

use crate::models::{QueueSnapshot, SegmentationJob};

/// In-process registry of segmentation jobs.
///
/// Thread-safe via interior `RwLock`; designed to be wrapped in `Arc` and
/// shared across the application.
#[derive(Default)]
pub struct JobStore {
    jobs: RwLock<HashMap<JobId, SegmentationJob>>,
}

impl JobStore {
    /// Create a new, empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a freshly enqueued job.
    pub async fn insert(&self, job: SegmentationJob) {
        self.jobs.write().await.insert(job.id, job);
    }

    /// Fetch a job snapshot by id.
    pub async fn get(&self, job_id: JobId) -> Option<SegmentationJob> {
        self.jobs.read().await.get(&job_id).cloned()
    }

    /// Atomically claim the next queued job for execution.
    ///
    /// Selects the highest-priority `Queued` job, FIFO within a priority
    /// tier (earliest `created_at`, then id as a stable tie-break), and
    /// flips it to `Processing` as part of selection. No job can be
    /// claimed twice.
    pub async fn claim_next(&self) -> Option<SegmentationJob> {
        let mut jobs = self.jobs.write().await;

        let next_id = jobs
            .values()
            .filter(|job| job.status == JobStatus::Queued)
            .min_by(|a, b| {
                b.priority
                    .cmp(&a.priority)
                    .then(a.created_at.cmp(&b.created_at))
                    .then(a.id.cmp(&b.id))
            })
            .map(|job| job.id)?;

        let job = jobs.get_mut(&next_id)?;
        job.status = JobStatus::Processing;
        job.started_at = Some(chrono::Utc::now());
        Some(job.clone())
    }

    /// Cancel a job unless it is already terminal.
    ///
    /// Returns `Ok(true)` if the job was cancelled, `Ok(false)` if it had
    /// already reached a terminal status (the call is then a no-op — a
    /// `Completed` or `Failed` job is never rewritten to `Cancelled`).
    pub async fn cancel(&self, job_id: JobId) -> CoreResult<bool> {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(&job_id).ok_or(CoreError::NotFound {
            entity: "Job",
            id: job_id.to_string(),
        })?;

        if job.status.is_terminal() {
            return Ok(false);
        }
        job.status = JobStatus::Cancelled;
        job.completed_at = Some(chrono::Utc::now());
        Ok(true)
    }

    /// All `Queued`/`Processing` jobs owned by `user_id`, oldest first.
    ///
    /// Jobs owned by other users are never included; this is the selection
    /// half of bulk cancellation.
    pub async fn active_for_user(&self, user_id: DbId) -> Vec<SegmentationJob> {
        let jobs = self.jobs.read().await;
        let mut active: Vec<SegmentationJob> = jobs
            .values()
            .filter(|job| job.user_id == user_id && !job.status.is_terminal())
            .cloned()
            .collect();
        active.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        active
    }

    /// All `Completed` jobs of a project, in completion order.
    ///
    /// Input for the export processor's item source.
    pub async fn completed_for_project(&self, project_id: DbId) -> Vec<SegmentationJob> {
        let jobs = self.jobs.read().await;
        let mut completed: Vec<SegmentationJob> = jobs
            .values()
            .filter(|job| job.project_id == project_id && job.status == JobStatus::Completed)
            .cloned()
            .collect();
        completed.sort_by(|a, b| a.completed_at.cmp(&b.completed_at).then(a.id.cmp(&b.id)));
        completed
    }

    /// Commit a successful result, only if the job is still `Processing`.
    ///
    /// Returns `false` without modifying the job when the compare-and-set
    /// does not apply (e.g. the job was cancelled while the forward pass
    /// was in flight).
    pub async fn complete_if_processing(
        &self,
        job_id: JobId,
        result: SegmentationResult,
        retry_count: u32,
    ) -> bool {
        let mut jobs = self.jobs.write().await;
        match jobs.get_mut(&job_id) {
            Some(job) if job.status == JobStatus::Processing => {
                job.status = JobStatus::Completed;
                job.completed_at = Some(chrono::Utc::now());
                job.result = Some(result);
                job.retry_count = retry_count;
                true
            }
            _ => false,
        }
    }

    /// Record a failure, only if the job is still `Processing`.
    pub async fn fail_if_processing(
        &self,
        job_id: JobId,
        error: &str,
        retryable: bool,
        retry_count: u32,
    ) -> bool {
        let mut jobs = self.jobs.write().await;
        match jobs.get_mut(&job_id) {
            Some(job) if job.status == JobStatus::Processing => {
                job.status = JobStatus::Failed;
                job.completed_at = Some(chrono::Utc::now());
                job.error = Some(error.to_string());
                job.retryable = retryable;
                job.retry_count = retry_count;
                true
            }
            _ => false,
        }
    }

    /// Recompute queue counts for a project.
    pub async fn snapshot_for_project(&self, project_id: DbId) -> QueueSnapshot {
        let jobs = self.jobs.read().await;
        snapshot(jobs.values().filter(|job| job.project_id == project_id))
    }

    /// Recompute queue counts for a user.
    pub async fn snapshot_for_user(&self, user_id: DbId) -> QueueSnapshot {
        let jobs = self.jobs.read().await;
        snapshot(jobs.values().filter(|job| job.user_id == user_id))
    }
}

fn snapshot<'a>(jobs: impl Iterator<Item = &'a SegmentationJob>) -> QueueSnapshot {
    let mut counts = QueueSnapshot::default();
    for job in jobs {
        match job.status {
            JobStatus::Queued => counts.queued += 1,
            JobStatus::Processing => counts.processing += 1,
            JobStatus::Completed => counts.completed += 1,
            JobStatus::Failed => counts.failed += 1,
            JobStatus::Cancelled => {}
        }
    }
    counts
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
