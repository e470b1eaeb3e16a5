//! Export job registry.
//!
//! Same compare-and-set discipline as the segmentation registry, plus two
//! export-specific rules: progress is monotone non-decreasing and only
//! writable while `Processing`, and the artifact path is readable iff the
//! job is `Completed`: a job cancelled a millisecond before its archive
//! landed must never expose a download.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tokio::sync::RwLock;

use annolab_core::error::{CoreError, CoreResult};
use annolab_core::export::ExportPhase;
use annolab_core::status::ExportStatus;
use annolab_core::types::JobId;

use crate::models::ExportJob;

/// In-process registry of export jobs.
#[derive(Default)]
pub struct ExportStore {
    jobs: RwLock<HashMap<JobId, ExportJob>>,
}

impl ExportStore {
    /// Create a new, empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a freshly accepted export job.
    pub async fn insert(&self, job: ExportJob) {
        self.jobs.write().await.insert(job.id, job);
    }

    /// Fetch a job snapshot by id.
    pub async fn get(&self, job_id: JobId) -> Option<ExportJob> {
        self.jobs.read().await.get(&job_id).cloned()
    }

    /// Current status, for cooperative cancellation checks between items.
    pub async fn status(&self, job_id: JobId) -> Option<ExportStatus> {
        self.jobs.read().await.get(&job_id).map(|job| job.status)
    }

    /// Flip `Pending` to `Processing` when the background task picks the
    /// job up. Returns `false` if the job was cancelled before it started.
    pub async fn begin_processing(&self, job_id: JobId) -> bool {
        let mut jobs = self.jobs.write().await;
        match jobs.get_mut(&job_id) {
            Some(job) if job.status == ExportStatus::Pending => {
                job.status = ExportStatus::Processing;
                job.started_at = Some(chrono::Utc::now());
                true
            }
            _ => false,
        }
    }

    /// Record the most recently started phase. Display-only; ignored once
    /// the job is no longer `Processing`.
    pub async fn set_phase(&self, job_id: JobId, phase: ExportPhase) {
        let mut jobs = self.jobs.write().await;
        if let Some(job) = jobs.get_mut(&job_id) {
            if job.status == ExportStatus::Processing {
                job.phase = Some(phase);
            }
        }
    }

    /// Write an aggregate progress value.
    ///
    /// Applies only while `Processing` and only if `percent` is strictly
    /// greater than the stored value, so progress never decreases and
    /// nothing is emitted after a terminal status. Returns the newly stored
    /// percent when the write applied.
    pub async fn update_progress(&self, job_id: JobId, percent: u8) -> Option<u8> {
        let percent = percent.min(100);
        let mut jobs = self.jobs.write().await;
        match jobs.get_mut(&job_id) {
            Some(job) if job.status == ExportStatus::Processing && percent > job.progress => {
                job.progress = percent;
                Some(percent)
            }
            _ => None,
        }
    }

    /// Commit the packaged archive, only if the job is still `Processing`.
    ///
    /// This is the final gate of the completed-after-cancelled race: when it
    /// returns `false` the caller must discard the archive and publish
    /// nothing.
    pub async fn complete_if_processing(&self, job_id: JobId, file_path: &Path) -> bool {
        let mut jobs = self.jobs.write().await;
        match jobs.get_mut(&job_id) {
            Some(job) if job.status == ExportStatus::Processing => {
                job.status = ExportStatus::Completed;
                job.progress = 100;
                job.completed_at = Some(chrono::Utc::now());
                job.file_path = Some(file_path.to_path_buf());
                true
            }
            _ => false,
        }
    }

    /// Record a failure, only if the job is still `Processing`.
    pub async fn fail_if_processing(&self, job_id: JobId, error: &str) -> bool {
        let mut jobs = self.jobs.write().await;
        match jobs.get_mut(&job_id) {
            Some(job) if job.status == ExportStatus::Processing => {
                job.status = ExportStatus::Failed;
                job.completed_at = Some(chrono::Utc::now());
                job.error = Some(error.to_string());
                true
            }
            _ => false,
        }
    }

    /// Cancel a job unless it is already terminal.
    ///
    /// Clears any artifact path so a transiently existing file can never be
    /// served. Returns `Ok(false)` as a no-op for terminal jobs.
    pub async fn cancel(&self, job_id: JobId) -> CoreResult<bool> {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(&job_id).ok_or(CoreError::NotFound {
            entity: "Export job",
            id: job_id.to_string(),
        })?;

        if job.status.is_terminal() {
            return Ok(false);
        }
        job.status = ExportStatus::Cancelled;
        job.cancelled_at = Some(chrono::Utc::now());
        job.file_path = None;
        Ok(true)
    }

    /// The archive path, iff the job is `Completed`.
    ///
    /// Never returns a stale path: `Processing`, `Cancelled`, and `Failed`
    /// jobs all yield `None` even if an archive file transiently exists.
    pub async fn download_path(&self, job_id: JobId) -> Option<PathBuf> {
        let jobs = self.jobs.read().await;
        let job = jobs.get(&job_id)?;
        if job.status == ExportStatus::Completed {
            job.file_path.clone()
        } else {
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
