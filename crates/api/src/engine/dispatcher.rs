//! Background job dispatcher.
//!
//! Polls the queue every `poll_interval`, claims work up to the pool's
//! worker count, and commits outcomes through the store's compare-and-set.
//! The claim itself is atomic (`JobStore::claim_next` flips the job to
//! `Processing` as part of selection), so a job can never be dispatched
//! twice even with multiple dispatch cycles in flight.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use annolab_core::storage::ImageSource;
use annolab_events::StatusBroadcaster;
use annolab_inference::{ImageBatch, InferenceOutcome, InferencePool};
use annolab_store::{JobStore, SegmentationJob};

use super::publish_job_status;

/// Default polling interval for the dispatcher loop.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Background dispatcher: queue to inference pool.
///
/// A single long-lived Tokio task; per-job execution is spawned so the
/// loop keeps claiming while earlier jobs run.
pub struct JobDispatcher {
    jobs: Arc<JobStore>,
    pool: Arc<InferencePool>,
    images: Arc<dyn ImageSource>,
    broadcaster: Arc<StatusBroadcaster>,
    poll_interval: Duration,
}

impl JobDispatcher {
    /// Create a dispatcher with the default poll interval.
    pub fn new(
        jobs: Arc<JobStore>,
        pool: Arc<InferencePool>,
        images: Arc<dyn ImageSource>,
        broadcaster: Arc<StatusBroadcaster>,
    ) -> Arc<Self> {
        Arc::new(Self {
            jobs,
            pool,
            images,
            broadcaster,
            poll_interval: DEFAULT_POLL_INTERVAL,
        })
    }

    /// Create a dispatcher with a specific poll interval.
    pub fn with_poll_interval(
        jobs: Arc<JobStore>,
        pool: Arc<InferencePool>,
        images: Arc<dyn ImageSource>,
        broadcaster: Arc<StatusBroadcaster>,
        poll_interval: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            jobs,
            pool,
            images,
            broadcaster,
            poll_interval,
        })
    }

    /// Run the dispatcher loop until the cancellation token is triggered.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        // Bounds in-flight submissions to the pool's worker count so queued
        // jobs stay claimable (and cancellable as Queued) until a worker is
        // actually free.
        let in_flight = Arc::new(Semaphore::new(self.pool.worker_count()));

        let mut ticker = tokio::time::interval(self.poll_interval);
        tracing::info!(
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "Job dispatcher started",
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Job dispatcher shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    Self::dispatch_cycle(&self, &in_flight).await;
                }
            }
        }
    }

    /// One cycle: claim jobs while a worker slot and a queued job exist.
    async fn dispatch_cycle(this: &Arc<Self>, in_flight: &Arc<Semaphore>) {
        loop {
            let Ok(permit) = Arc::clone(in_flight).try_acquire_owned() else {
                break;
            };
            let Some(job) = this.jobs.claim_next().await else {
                break;
            };

            tracing::info!(
                job_id = %job.id,
                model = %job.model,
                priority = job.priority,
                "Job claimed for execution",
            );
            publish_job_status(&this.broadcaster, &this.jobs, &job).await;

            let dispatcher = Arc::clone(this);
            tokio::spawn(async move {
                dispatcher.execute_one(job).await;
                drop(permit);
            });
        }
    }

    /// Execute one claimed job and commit its outcome.
    async fn execute_one(&self, job: SegmentationJob) {
        let batch = match self.images.load(job.image_id).await {
            Ok(bytes) => ImageBatch::single(bytes),
            Err(e) => {
                // Image missing or unreadable: terminal failure, no retry.
                if self
                    .jobs
                    .fail_if_processing(job.id, &e.to_string(), false, 0)
                    .await
                {
                    if let Some(updated) = self.jobs.get(job.id).await {
                        publish_job_status(&self.broadcaster, &self.jobs, &updated).await;
                    }
                }
                return;
            }
        };

        let outcome = self.pool.submit(job.clone(), batch).await;
        match outcome {
            InferenceOutcome::Completed {
                result,
                retry_count,
            } => {
                // Commit only if still Processing; a cancellation issued
                // while the forward pass ran wins, and nothing is published.
                if self
                    .jobs
                    .complete_if_processing(job.id, result, retry_count)
                    .await
                {
                    self.pool.clear_discard(job.id);
                    if let Some(updated) = self.jobs.get(job.id).await {
                        publish_job_status(&self.broadcaster, &self.jobs, &updated).await;
                    }
                } else {
                    tracing::info!(
                        job_id = %job.id,
                        "Result arrived after cancellation, dropped",
                    );
                }
            }
            InferenceOutcome::Failed {
                error,
                retryable,
                retry_count,
            } => {
                if self
                    .jobs
                    .fail_if_processing(job.id, &error.to_string(), retryable, retry_count)
                    .await
                {
                    tracing::warn!(
                        job_id = %job.id,
                        error = %error,
                        retryable,
                        "Segmentation job failed",
                    );
                    if let Some(updated) = self.jobs.get(job.id).await {
                        publish_job_status(&self.broadcaster, &self.jobs, &updated).await;
                    }
                }
            }
            InferenceOutcome::Discarded => {
                // The cancellation path already published its event.
                tracing::debug!(job_id = %job.id, "In-flight result discarded");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU64, Ordering};

    use annolab_core::access::ProjectAccess;
    use annolab_core::error::CoreResult;
    use annolab_core::segmentation::{Polygon, MODEL_HRNET};
    use annolab_core::status::JobStatus;
    use annolab_core::types::DbId;
    use annolab_events::StatusEvent;
    use annolab_inference::{
        AcceleratorDevice, DeviceError, ForwardRequest, InferenceConfig, StreamSlot,
    };

    struct StaticAccess;

    #[async_trait]
    impl ProjectAccess for StaticAccess {
        async fn can_access(&self, _user_id: DbId, _project_id: DbId) -> bool {
            true
        }

        async fn members(&self, _project_id: DbId) -> Vec<DbId> {
            vec![1]
        }
    }

    struct StaticImages;

    #[async_trait]
    impl annolab_core::storage::ImageSource for StaticImages {
        async fn load(&self, _image_id: DbId) -> CoreResult<Vec<u8>> {
            Ok(vec![0u8; 16])
        }
    }

    /// Device that fails with OOM a configurable number of times, then
    /// returns one large polygon per image after an optional delay.
    struct ScriptedDevice {
        oom_failures: AtomicU64,
        delay: Duration,
    }

    impl ScriptedDevice {
        fn new(oom_failures: u64, delay: Duration) -> Self {
            Self {
                oom_failures: AtomicU64::new(oom_failures),
                delay,
            }
        }
    }

    #[async_trait]
    impl AcceleratorDevice for ScriptedDevice {
        fn total_memory_mb(&self) -> u64 {
            24_576
        }

        fn memory_allocated_mb(&self) -> u64 {
            4_096
        }

        async fn forward(
            &self,
            _stream: StreamSlot,
            request: ForwardRequest<'_>,
        ) -> Result<Vec<Vec<Polygon>>, DeviceError> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self
                .oom_failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(DeviceError::OutOfMemory("allocator exhausted".to_string()));
            }
            Ok(request
                .images
                .iter()
                .map(|_| {
                    vec![Polygon {
                        points: vec![[0.0, 0.0], [30.0, 0.0], [30.0, 30.0], [0.0, 30.0]],
                        confidence: 0.9,
                    }]
                })
                .collect())
        }

        async fn synchronize(&self, _stream: StreamSlot) {}

        async fn flush_cache(&self) {}
    }

    struct Harness {
        jobs: Arc<JobStore>,
        pool: Arc<InferencePool>,
        queue: Arc<crate::engine::queue::QueueManager>,
        dispatcher: Arc<JobDispatcher>,
        broadcaster: Arc<StatusBroadcaster>,
        in_flight: Arc<Semaphore>,
    }

    fn harness(device: Arc<dyn AcceleratorDevice>) -> Harness {
        let jobs = Arc::new(JobStore::new());
        let access: Arc<dyn ProjectAccess> = Arc::new(StaticAccess);
        let broadcaster = Arc::new(StatusBroadcaster::new(access.clone()));
        let pool = InferencePool::start(
            InferenceConfig {
                workers: 2,
                inference_timeout: Duration::from_secs(5),
                ..InferenceConfig::default()
            },
            device,
        );
        let queue = crate::engine::queue::QueueManager::new(
            Arc::clone(&jobs),
            Arc::clone(&pool),
            Arc::clone(&broadcaster),
            access,
        );
        let dispatcher = JobDispatcher::new(
            Arc::clone(&jobs),
            Arc::clone(&pool),
            Arc::new(StaticImages),
            Arc::clone(&broadcaster),
        );
        let in_flight = Arc::new(Semaphore::new(pool.worker_count()));
        Harness {
            jobs,
            pool,
            queue,
            dispatcher,
            broadcaster,
            in_flight,
        }
    }

    fn submit_input() -> crate::engine::queue::SubmitSegmentation {
        crate::engine::queue::SubmitSegmentation {
            image_id: 1,
            project_id: 1,
            model: Some(MODEL_HRNET.to_string()),
            threshold: None,
            min_area: Some(50),
            detect_holes: None,
            priority: None,
        }
    }

    async fn wait_terminal(jobs: &JobStore, job_id: annolab_core::types::JobId) -> SegmentationJob {
        for _ in 0..500 {
            if let Some(job) = jobs.get(job_id).await {
                if job.status.is_terminal() {
                    return job;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job did not reach a terminal status");
    }

    #[tokio::test]
    async fn dispatch_commits_completed_result() {
        let h = harness(Arc::new(ScriptedDevice::new(0, Duration::ZERO)));
        let job = h.queue.enqueue(1, &submit_input()).await.unwrap();

        JobDispatcher::dispatch_cycle(&h.dispatcher, &h.in_flight).await;

        let finished = wait_terminal(&h.jobs, job.id).await;
        assert_eq!(finished.status, JobStatus::Completed);
        assert_eq!(finished.retry_count, 0);
        let result = finished.result.expect("result");
        assert_eq!(result.polygons.len(), 1);
    }

    #[tokio::test]
    async fn oom_retry_ends_completed_with_retry_count_recorded() {
        // First forward OOMs, the automatic half-batch retry succeeds.
        let h = harness(Arc::new(ScriptedDevice::new(1, Duration::ZERO)));
        let job = h.queue.enqueue(1, &submit_input()).await.unwrap();

        JobDispatcher::dispatch_cycle(&h.dispatcher, &h.in_flight).await;

        let finished = wait_terminal(&h.jobs, job.id).await;
        assert_eq!(finished.status, JobStatus::Completed);
        assert_eq!(finished.retry_count, 1);
    }

    #[tokio::test]
    async fn persistent_oom_marks_job_failed_retryable() {
        let h = harness(Arc::new(ScriptedDevice::new(10, Duration::ZERO)));
        let job = h.queue.enqueue(1, &submit_input()).await.unwrap();

        JobDispatcher::dispatch_cycle(&h.dispatcher, &h.in_flight).await;

        let finished = wait_terminal(&h.jobs, job.id).await;
        assert_eq!(finished.status, JobStatus::Failed);
        assert!(finished.retryable);
        assert_eq!(finished.retry_count, 1);
        assert!(finished.error.expect("error").contains("memory"));
    }

    #[tokio::test]
    async fn cancel_during_inference_wins_and_suppresses_completion() {
        let h = harness(Arc::new(ScriptedDevice::new(0, Duration::from_millis(150))));
        let job = h.queue.enqueue(1, &submit_input()).await.unwrap();

        JobDispatcher::dispatch_cycle(&h.dispatcher, &h.in_flight).await;

        // The job is in flight; collect events from here on.
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(
            h.jobs.get(job.id).await.unwrap().status,
            JobStatus::Processing
        );
        let mut rx = h.broadcaster.subscribe();
        assert!(h.queue.cancel(1, job.id).await.unwrap());

        // Give the late result time to arrive and be dropped.
        tokio::time::sleep(Duration::from_millis(300)).await;

        let stored = h.jobs.get(job.id).await.unwrap();
        assert_eq!(stored.status, JobStatus::Cancelled);
        assert!(stored.result.is_none());
        assert_eq!(h.pool.stats().discarded_count, 1);

        // No completion event was ever published for this job.
        let mut events = Vec::new();
        while let Ok(addressed) = rx.try_recv() {
            events.push(addressed.event);
        }
        assert!(events.iter().all(|event| !matches!(
            event,
            StatusEvent::SegmentationStatusUpdate { status: JobStatus::Completed, .. }
        )));
    }

    #[tokio::test]
    async fn cancel_all_isolates_users_and_reports_projects() {
        let h = harness(Arc::new(ScriptedDevice::new(0, Duration::ZERO)));

        // Two users, no dispatch: everything stays queued.
        let mut mine = submit_input();
        mine.project_id = 10;
        h.queue.enqueue(1, &mine).await.unwrap();
        mine.project_id = 11;
        h.queue.enqueue(1, &mine).await.unwrap();
        let theirs = h.queue.enqueue(2, &submit_input()).await.unwrap();

        let summary = h.queue.cancel_all(1).await.unwrap();
        assert_eq!(summary.cancelled_count, 2);
        assert_eq!(summary.affected_projects, vec![10, 11]);

        assert_eq!(
            h.jobs.get(theirs.id).await.unwrap().status,
            JobStatus::Queued
        );
    }
}
