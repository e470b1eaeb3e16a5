//! Segmentation queue manager.
//!
//! The write surface for segmentation jobs: validated enqueue, single and
//! bulk cancellation, and snapshot/status queries. Never blocks on
//! execution: jobs are inserted as `Queued` and picked up by the
//! dispatcher. Every successful transition publishes a status event plus
//! refreshed queue stats; cancellation of an in-flight job additionally
//! marks the inference pool's discard set so a late result is dropped.

use std::sync::Arc;

use serde::Deserialize;

use annolab_core::access::ProjectAccess;
use annolab_core::error::{CoreError, CoreResult};
use annolab_core::segmentation::{
    validate_min_area, validate_model, validate_threshold, DEFAULT_MIN_AREA, DEFAULT_THRESHOLD,
    MODEL_HRNET, PRIORITY_NORMAL,
};
use annolab_core::status::JobStatus;
use annolab_core::types::{DbId, JobId};
use annolab_events::StatusBroadcaster;
use annolab_inference::InferencePool;
use annolab_store::{CancelSummary, JobStore, QueueSnapshot, SegmentationJob};

use super::publish_job_status;

/// DTO for submitting a segmentation job.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitSegmentation {
    pub image_id: DbId,
    pub project_id: DbId,
    /// Model name; defaults to `hrnet`.
    pub model: Option<String>,
    /// Confidence threshold in `[0, 1]`; defaults to `0.5`.
    pub threshold: Option<f32>,
    /// Minimum polygon area in px²; defaults to `100`.
    pub min_area: Option<u32>,
    /// Whether to detect holes in polygons; defaults to `true`.
    pub detect_holes: Option<bool>,
    /// Higher is dequeued sooner; defaults to `0`.
    pub priority: Option<i32>,
}

/// Accepts, cancels, and reports on segmentation jobs.
pub struct QueueManager {
    jobs: Arc<JobStore>,
    pool: Arc<InferencePool>,
    broadcaster: Arc<StatusBroadcaster>,
    access: Arc<dyn ProjectAccess>,
}

impl QueueManager {
    pub fn new(
        jobs: Arc<JobStore>,
        pool: Arc<InferencePool>,
        broadcaster: Arc<StatusBroadcaster>,
        access: Arc<dyn ProjectAccess>,
    ) -> Arc<Self> {
        Arc::new(Self {
            jobs,
            pool,
            broadcaster,
            access,
        })
    }

    /// Validate and enqueue one job. Returns immediately with the queued job.
    pub async fn enqueue(
        &self,
        user_id: DbId,
        input: &SubmitSegmentation,
    ) -> CoreResult<SegmentationJob> {
        let job = self.validated_job(user_id, input).await?;
        self.jobs.insert(job.clone()).await;

        tracing::info!(
            job_id = %job.id,
            image_id = job.image_id,
            project_id = job.project_id,
            user_id,
            model = %job.model,
            priority = job.priority,
            "Segmentation job enqueued",
        );
        publish_job_status(&self.broadcaster, &self.jobs, &job).await;
        Ok(job)
    }

    /// Validate and enqueue a batch of jobs.
    ///
    /// All-or-nothing: if any request fails validation, nothing is enqueued.
    pub async fn enqueue_many(
        &self,
        user_id: DbId,
        inputs: &[SubmitSegmentation],
    ) -> CoreResult<Vec<SegmentationJob>> {
        if inputs.is_empty() {
            return Err(CoreError::Validation(
                "At least one job must be submitted".to_string(),
            ));
        }

        let mut validated = Vec::with_capacity(inputs.len());
        for input in inputs {
            validated.push(self.validated_job(user_id, input).await?);
        }

        for job in &validated {
            self.jobs.insert(job.clone()).await;
            publish_job_status(&self.broadcaster, &self.jobs, job).await;
        }
        tracing::info!(count = validated.len(), user_id, "Bulk segmentation enqueue");
        Ok(validated)
    }

    /// Cancel one job owned by the caller.
    ///
    /// Compare-and-set `Queued`/`Processing` to `Cancelled`; a no-op
    /// (`Ok(false)`) if the job already reached a terminal status. For an
    /// in-flight job the pool's discard set is marked so a late result is
    /// dropped rather than committed.
    pub async fn cancel(&self, user_id: DbId, job_id: JobId) -> CoreResult<bool> {
        let job = self.find_owned(user_id, job_id, "cancel").await?;

        let applied = self.jobs.cancel(job_id).await?;
        if applied {
            if job.status == JobStatus::Processing {
                self.pool.discard(job_id);
            }
            tracing::info!(job_id = %job_id, user_id, "Segmentation job cancelled");
            if let Some(updated) = self.jobs.get(job_id).await {
                publish_job_status(&self.broadcaster, &self.jobs, &updated).await;
            }
        }
        Ok(applied)
    }

    /// Cancel every `Queued`/`Processing` job owned by the caller.
    ///
    /// Jobs owned by other users are never affected.
    pub async fn cancel_all(&self, user_id: DbId) -> CoreResult<CancelSummary> {
        let active = self.jobs.active_for_user(user_id).await;

        let mut cancelled_count = 0;
        let mut affected_projects = Vec::new();
        for job in active {
            if self.jobs.cancel(job.id).await? {
                if job.status == JobStatus::Processing {
                    self.pool.discard(job.id);
                }
                cancelled_count += 1;
                affected_projects.push(job.project_id);
                if let Some(updated) = self.jobs.get(job.id).await {
                    publish_job_status(&self.broadcaster, &self.jobs, &updated).await;
                }
            }
        }
        affected_projects.sort_unstable();
        affected_projects.dedup();

        tracing::info!(
            user_id,
            cancelled_count,
            projects = affected_projects.len(),
            "Bulk cancellation",
        );
        Ok(CancelSummary {
            cancelled_count,
            affected_projects,
        })
    }

    /// Fetch a job visible to the caller (owner, or member of its project).
    pub async fn get_job(&self, user_id: DbId, job_id: JobId) -> CoreResult<SegmentationJob> {
        let job = self.jobs.get(job_id).await.ok_or(CoreError::NotFound {
            entity: "Job",
            id: job_id.to_string(),
        })?;

        if job.user_id != user_id && !self.access.can_access(user_id, job.project_id).await {
            return Err(CoreError::Forbidden(
                "Cannot view another user's job".to_string(),
            ));
        }
        Ok(job)
    }

    /// Queue counts for a project (requires access) or for the caller.
    pub async fn snapshot(
        &self,
        user_id: DbId,
        project_id: Option<DbId>,
    ) -> CoreResult<QueueSnapshot> {
        match project_id {
            Some(project_id) => {
                if !self.access.can_access(user_id, project_id).await {
                    return Err(CoreError::Forbidden(
                        "No access to the target project".to_string(),
                    ));
                }
                Ok(self.jobs.snapshot_for_project(project_id).await)
            }
            None => Ok(self.jobs.snapshot_for_user(user_id).await),
        }
    }

    // -- internals ------------------------------------------------------------

    /// Validate a submission and construct the queued job.
    async fn validated_job(
        &self,
        user_id: DbId,
        input: &SubmitSegmentation,
    ) -> CoreResult<SegmentationJob> {
        let model = input
            .model
            .clone()
            .unwrap_or_else(|| MODEL_HRNET.to_string());
        validate_model(&model)?;

        let threshold = input.threshold.unwrap_or(DEFAULT_THRESHOLD);
        validate_threshold(threshold)?;

        let min_area = input.min_area.unwrap_or(DEFAULT_MIN_AREA);
        validate_min_area(min_area)?;

        if !self.access.can_access(user_id, input.project_id).await {
            return Err(CoreError::Forbidden(
                "No access to the target project".to_string(),
            ));
        }

        Ok(SegmentationJob::new(
            input.image_id,
            input.project_id,
            user_id,
            model,
            threshold,
            min_area,
            input.detect_holes.unwrap_or(true),
            input.priority.unwrap_or(PRIORITY_NORMAL),
        ))
    }

    /// Fetch a job and verify the caller owns it.
    async fn find_owned(
        &self,
        user_id: DbId,
        job_id: JobId,
        action: &str,
    ) -> CoreResult<SegmentationJob> {
        let job = self.jobs.get(job_id).await.ok_or(CoreError::NotFound {
            entity: "Job",
            id: job_id.to_string(),
        })?;

        if job.user_id != user_id {
            return Err(CoreError::Forbidden(format!(
                "Cannot {action} another user's job"
            )));
        }
        Ok(job)
    }
}
