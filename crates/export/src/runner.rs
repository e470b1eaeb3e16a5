//! Export job runner.
//!
//! [`ExportProcessor`] owns the background execution of export jobs:
//! accept-and-return on `start`, concurrent phase execution under a shared
//! semaphore, cooperative cancellation between items, and the final
//! status-gated archive commit. All terminal writes go through the store's
//! compare-and-set, so a completion can never overwrite a cancellation.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use futures::future::try_join_all;
use tokio::sync::Semaphore;

use annolab_core::error::{CoreError, CoreResult};
use annolab_core::export::{ExportOptions, ExportPhase};
use annolab_core::progress::overall_percent;
use annolab_core::status::ExportStatus;
use annolab_core::types::{DbId, JobId};
use annolab_events::{StatusBroadcaster, StatusEvent};
use annolab_store::{ExportJob, ExportStore};

use crate::archive::archive_directory;
use crate::phases::{write_documentation, write_item};
use crate::source::{ExportItem, ExportSource};

// ---------------------------------------------------------------------------
// Progress table
// ---------------------------------------------------------------------------

/// Per-phase `(completed, total)` counters shared by the running phases.
struct ProgressTable {
    phases: Mutex<HashMap<ExportPhase, (u64, u64)>>,
}

impl ProgressTable {
    fn new(totals: &[(ExportPhase, u64)]) -> Self {
        Self {
            phases: Mutex::new(totals.iter().map(|&(phase, total)| (phase, (0, total))).collect()),
        }
    }

    /// Record one finished item and return the new aggregate percent.
    fn record(&self, phase: ExportPhase) -> u8 {
        let mut phases = self.phases.lock().expect("progress table lock poisoned");
        if let Some(entry) = phases.get_mut(&phase) {
            entry.0 += 1;
        }
        let pairs: Vec<(u64, u64)> = phases.values().copied().collect();
        overall_percent(&pairs)
    }
}

// ---------------------------------------------------------------------------
// Processor
// ---------------------------------------------------------------------------

/// Runs export jobs to completion on background tasks.
///
/// Created once at application startup; the returned `Arc` is cheaply
/// cloned into request handlers.
pub struct ExportProcessor {
    store: Arc<ExportStore>,
    source: Arc<dyn ExportSource>,
    broadcaster: Arc<StatusBroadcaster>,
    export_root: PathBuf,
}

impl ExportProcessor {
    pub fn new(
        store: Arc<ExportStore>,
        source: Arc<dyn ExportSource>,
        broadcaster: Arc<StatusBroadcaster>,
        export_root: PathBuf,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            source,
            broadcaster,
            export_root,
        })
    }

    /// Accept an export job and return immediately.
    ///
    /// The job is inserted as `Pending` and handed to a background task;
    /// callers poll `get` or subscribe to the broadcaster for progress.
    pub async fn start(
        self: Arc<Self>,
        project_id: DbId,
        user_id: DbId,
        options: ExportOptions,
    ) -> CoreResult<ExportJob> {
        options.validate()?;

        let job = ExportJob::new(project_id, user_id, options);
        self.store.insert(job.clone()).await;
        tracing::info!(job_id = %job.id, project_id, user_id, "Export accepted");

        let processor = Arc::clone(&self);
        let spawned = job.clone();
        tokio::spawn(async move {
            processor.run(spawned).await;
        });
        Ok(job)
    }

    /// Cancel an export job.
    ///
    /// On success the working directory and any partial artifacts are
    /// removed immediately; running phases observe the status between items
    /// and stop. A no-op (`Ok(false)`) for jobs already terminal.
    pub async fn cancel(&self, job_id: JobId) -> CoreResult<bool> {
        let job = self.store.get(job_id).await.ok_or(CoreError::NotFound {
            entity: "Export job",
            id: job_id.to_string(),
        })?;

        let applied = self.store.cancel(job_id).await?;
        if applied {
            self.remove_workdir(job_id).await;
            self.remove_staging(job_id).await;
            let _ = tokio::fs::remove_file(self.archive_path(job_id)).await;

            tracing::info!(job_id = %job_id, "Export cancelled");
            self.broadcaster
                .emit_to_project(
                    job.project_id,
                    StatusEvent::ExportCancelled {
                        job_id,
                        project_id: job.project_id,
                        user_id: job.user_id,
                    },
                )
                .await;
        }
        Ok(applied)
    }

    /// Job snapshot for the pull-based status endpoint.
    pub async fn get(&self, job_id: JobId) -> Option<ExportJob> {
        self.store.get(job_id).await
    }

    /// The archive path, iff the job is `Completed`.
    pub async fn download_path(&self, job_id: JobId) -> Option<PathBuf> {
        self.store.download_path(job_id).await
    }

    // -- background task ------------------------------------------------------

    async fn run(self: Arc<Self>, job: ExportJob) {
        if !self.store.begin_processing(job.id).await {
            // Cancelled before the task started; the cancel path owns cleanup.
            tracing::info!(job_id = %job.id, "Export cancelled before start");
            return;
        }

        match self.execute(&job).await {
            Ok(archive_path) => {
                // Final gate of the completed-after-cancelled race: commit
                // only if the job is still Processing.
                if self.store.complete_if_processing(job.id, &archive_path).await {
                    self.remove_workdir(job.id).await;
                    tracing::info!(
                        job_id = %job.id,
                        path = %archive_path.display(),
                        "Export completed",
                    );
                    self.broadcaster
                        .emit_to_project(
                            job.project_id,
                            StatusEvent::ExportCompleted {
                                job_id: job.id,
                                project_id: job.project_id,
                                user_id: job.user_id,
                            },
                        )
                        .await;
                } else {
                    // Cancellation won; discard the archive, publish nothing.
                    tracing::info!(
                        job_id = %job.id,
                        "Export finished after cancellation, discarding archive",
                    );
                    let _ = tokio::fs::remove_file(&archive_path).await;
                    self.remove_workdir(job.id).await;
                }
            }
            Err(CoreError::Cancelled) => {
                // Cooperative stop between items. Not a failure; the cancel
                // path already published the event.
                self.remove_workdir(job.id).await;
            }
            Err(error) => {
                // fail_if_processing is a no-op if cancellation landed first,
                // in which case no failure event is published either.
                if self.store.fail_if_processing(job.id, &error.to_string()).await {
                    tracing::error!(job_id = %job.id, error = %error, "Export failed");
                    self.broadcaster
                        .emit_to_project(
                            job.project_id,
                            StatusEvent::ExportFailed {
                                job_id: job.id,
                                project_id: job.project_id,
                                user_id: job.user_id,
                                error: error.to_string(),
                            },
                        )
                        .await;
                }
                self.remove_staging(job.id).await;
                self.remove_workdir(job.id).await;
            }
        }
    }

    /// Run all enabled phases and package the archive.
    ///
    /// Returns the final archive path; the caller commits it through the
    /// store CAS.
    async fn execute(&self, job: &ExportJob) -> CoreResult<PathBuf> {
        let items = Arc::new(self.source.items(job.project_id).await?);
        let enabled = job.options.enabled_phases();
        let workdir = self.workdir(job.id);

        for phase in &enabled {
            let dir = if phase.subdir().is_empty() {
                workdir.clone()
            } else {
                workdir.join(phase.subdir())
            };
            tokio::fs::create_dir_all(&dir).await.map_err(|e| {
                CoreError::Internal(format!("failed to create working directory: {e}"))
            })?;
        }

        let totals: Vec<(ExportPhase, u64)> = enabled
            .iter()
            .map(|&phase| {
                let total = if phase == ExportPhase::WriteDocumentation {
                    1
                } else {
                    items.len() as u64
                };
                (phase, total)
            })
            .collect();
        let progress = Arc::new(ProgressTable::new(&totals));
        let semaphore = Arc::new(Semaphore::new(job.options.concurrency));

        // Phases run concurrently; the semaphore bounds total in-flight items.
        try_join_all(enabled.iter().map(|&phase| {
            self.run_phase(
                phase,
                job,
                Arc::clone(&items),
                workdir.clone(),
                Arc::clone(&progress),
                Arc::clone(&semaphore),
            )
        }))
        .await?;

        // Re-check immediately before the packaging step.
        self.ensure_processing(job.id).await?;

        let staging = self.staging_path(job.id);
        if let Some(parent) = staging.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                CoreError::Internal(format!("failed to create staging directory: {e}"))
            })?;
        }

        let (src, dst) = (workdir.clone(), staging.clone());
        tokio::task::spawn_blocking(move || archive_directory(&src, &dst))
            .await
            .map_err(|e| CoreError::Internal(format!("archive task panicked: {e}")))??;

        let final_path = self.archive_path(job.id);
        tokio::fs::rename(&staging, &final_path)
            .await
            .map_err(|e| CoreError::Internal(format!("failed to publish archive: {e}")))?;
        Ok(final_path)
    }

    /// Run one phase over its items in batches.
    async fn run_phase(
        &self,
        phase: ExportPhase,
        job: &ExportJob,
        items: Arc<Vec<ExportItem>>,
        workdir: PathBuf,
        progress: Arc<ProgressTable>,
        semaphore: Arc<Semaphore>,
    ) -> CoreResult<()> {
        self.store.set_phase(job.id, phase).await;

        if phase == ExportPhase::WriteDocumentation {
            self.ensure_processing(job.id).await?;
            let _permit = acquire(&semaphore).await?;
            let (dir, job_id, project_id) = (workdir.clone(), job.id, job.project_id);
            let enabled = job.options.enabled_phases();
            let count = items.len();
            tokio::task::spawn_blocking(move || {
                write_documentation(&dir, job_id, project_id, &enabled, count)
            })
            .await
            .map_err(|e| CoreError::Internal(format!("phase task panicked: {e}")))??;
            self.record_and_emit(job, phase, &progress).await;
            return Ok(());
        }

        // Batched to cap peak memory; items within a batch run concurrently
        // up to the shared semaphore limit.
        for batch_start in (0..items.len()).step_by(job.options.batch_size) {
            let batch_end = (batch_start + job.options.batch_size).min(items.len());

            try_join_all((batch_start..batch_end).map(|idx| {
                let items = Arc::clone(&items);
                let workdir = workdir.clone();
                let semaphore = Arc::clone(&semaphore);
                let progress = Arc::clone(&progress);
                async move {
                    // Cooperative cancellation: checked between items.
                    self.ensure_processing(job.id).await?;

                    let permit = acquire(&semaphore).await?;
                    tokio::task::spawn_blocking(move || write_item(phase, &workdir, &items[idx]))
                        .await
                        .map_err(|e| CoreError::Internal(format!("phase task panicked: {e}")))??;
                    drop(permit);

                    self.record_and_emit(job, phase, &progress).await;
                    Ok::<(), CoreError>(())
                }
            }))
            .await?;
        }
        Ok(())
    }

    /// Record one finished item; push the new percent through the store
    /// (which enforces monotonicity) and broadcast it if it advanced.
    async fn record_and_emit(&self, job: &ExportJob, phase: ExportPhase, progress: &ProgressTable) {
        let percent = progress.record(phase);
        if let Some(stored) = self.store.update_progress(job.id, percent).await {
            self.broadcaster
                .emit_to_project(
                    job.project_id,
                    StatusEvent::ExportProgress {
                        job_id: job.id,
                        project_id: job.project_id,
                        user_id: job.user_id,
                        phase,
                        percent: stored,
                    },
                )
                .await;
        }
    }

    /// Error out with `Cancelled` if the job is no longer `Processing`.
    async fn ensure_processing(&self, job_id: JobId) -> CoreResult<()> {
        match self.store.status(job_id).await {
            Some(ExportStatus::Processing) => Ok(()),
            Some(ExportStatus::Cancelled) => Err(CoreError::Cancelled),
            other => Err(CoreError::Internal(format!(
                "unexpected export status mid-run: {other:?}"
            ))),
        }
    }

    // -- paths ----------------------------------------------------------------

    fn workdir(&self, job_id: JobId) -> PathBuf {
        self.export_root.join("work").join(job_id.to_string())
    }

    fn staging_path(&self, job_id: JobId) -> PathBuf {
        self.export_root.join("staging").join(format!("{job_id}.zip"))
    }

    fn archive_path(&self, job_id: JobId) -> PathBuf {
        self.export_root.join(format!("{job_id}.zip"))
    }

    async fn remove_workdir(&self, job_id: JobId) {
        let _ = tokio::fs::remove_dir_all(self.workdir(job_id)).await;
    }

    async fn remove_staging(&self, job_id: JobId) {
        let _ = tokio::fs::remove_file(self.staging_path(job_id)).await;
    }
}

async fn acquire(semaphore: &Semaphore) -> CoreResult<tokio::sync::SemaphorePermit<'_>> {
    semaphore
        .acquire()
        .await
        .map_err(|_| CoreError::Internal("export semaphore closed".to_string()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
