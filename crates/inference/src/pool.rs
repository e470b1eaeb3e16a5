//! The worker pool itself.
//!
//! N worker tasks, each bound to one compute stream at construction, pull
//! work items off a shared channel. There is deliberately no per-model lock
//! anywhere near the forward pass: model weights are read-only and each
//! worker's stream is independent, so N submissions execute concurrently.
//! The only critical sections are the stream-assignment cursor and the
//! stats counters.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};

use annolab_core::batching::{halve, per_worker_batch_size, spec_for_model};
use annolab_core::error::CoreError;
use annolab_core::segmentation::{Polygon, SegmentationResult};
use annolab_core::types::JobId;
use annolab_store::SegmentationJob;

use crate::device::{AcceleratorDevice, DeviceError, ForwardRequest, ImageBatch};
use crate::governor::{GovernorStats, MemoryGovernor};
use crate::streams::{StreamAssigner, StreamSlot};

/// Default inference timeout. A timeout is a retryable failure, not a crash.
pub const DEFAULT_INFERENCE_TIMEOUT: Duration = Duration::from_secs(60);

/// Pool configuration. Fixed at construction; the pool is never resized
/// mid-flight.
#[derive(Debug, Clone)]
pub struct InferenceConfig {
    /// Worker count == compute stream count.
    pub workers: usize,
    /// Total device memory in MiB, used for batch planning.
    pub device_memory_mb: u64,
    /// Memory held back from batch planning (weights, fragmentation).
    pub reserved_memory_mb: u64,
    /// Upper bound on a single forward pass.
    pub inference_timeout: Duration,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            device_memory_mb: 24_576,
            reserved_memory_mb: 2_048,
            inference_timeout: DEFAULT_INFERENCE_TIMEOUT,
        }
    }
}

/// The pool's verdict on one submission.
///
/// Terminal job status is **not** written here; the dispatcher commits the
/// outcome through the store's compare-and-set so a stale completion can
/// never overwrite a cancellation.
#[derive(Debug)]
pub enum InferenceOutcome {
    Completed {
        result: SegmentationResult,
        retry_count: u32,
    },
    Failed {
        error: CoreError,
        retryable: bool,
        retry_count: u32,
    },
    /// The job was cancelled while the computation was in flight; its
    /// result was dropped.
    Discarded,
}

/// Execution counters, exposed via the metrics endpoint.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct PoolStats {
    pub total_inferences: u64,
    pub timeout_count: u64,
    pub failure_count: u64,
    pub discarded_count: u64,
}

struct WorkItem {
    job: SegmentationJob,
    batch: ImageBatch,
    reply: oneshot::Sender<InferenceOutcome>,
}

/// State shared by all workers.
struct WorkerShared {
    device: Arc<dyn AcceleratorDevice>,
    governor: MemoryGovernor,
    config: InferenceConfig,
    /// Job ids whose in-flight result must be dropped if it arrives late.
    discard: Mutex<HashSet<JobId>>,
    stats: Mutex<PoolStats>,
}

impl WorkerShared {
    /// Remove `job_id` from the discard set, reporting whether it was there.
    fn take_discard(&self, job_id: JobId) -> bool {
        self.discard
            .lock()
            .expect("discard set lock poisoned")
            .remove(&job_id)
    }

    fn bump(&self, update: impl FnOnce(&mut PoolStats)) {
        let mut stats = self.stats.lock().expect("pool stats lock poisoned");
        update(&mut stats);
    }
}

/// Bounded inference worker pool bound to one accelerator device.
pub struct InferencePool {
    work_tx: mpsc::Sender<WorkItem>,
    shared: Arc<WorkerShared>,
}

impl InferencePool {
    /// Spawn the worker tasks and return a shared handle.
    ///
    /// Each worker claims its stream slot here, round-robin, and keeps it
    /// until shutdown.
    pub fn start(config: InferenceConfig, device: Arc<dyn AcceleratorDevice>) -> Arc<Self> {
        let workers = config.workers.max(1);
        let (work_tx, work_rx) = mpsc::channel(workers * 2);
        let work_rx = Arc::new(tokio::sync::Mutex::new(work_rx));
        let assigner = StreamAssigner::new(workers);

        let shared = Arc::new(WorkerShared {
            device,
            governor: MemoryGovernor::new(),
            config,
            discard: Mutex::new(HashSet::new()),
            stats: Mutex::new(PoolStats::default()),
        });

        for worker_id in 0..workers {
            let slot = assigner.assign();
            tokio::spawn(run_worker(worker_id, slot, shared.clone(), work_rx.clone()));
        }

        tracing::info!(workers, "Inference pool started");
        Arc::new(Self { work_tx, shared })
    }

    /// Execute one job's images and return the outcome.
    ///
    /// Queues behind at most `2 * workers` other submissions; the caller
    /// (the dispatcher) bounds in-flight submissions to the worker count.
    pub async fn submit(&self, job: SegmentationJob, batch: ImageBatch) -> InferenceOutcome {
        let (reply_tx, reply_rx) = oneshot::channel();
        let item = WorkItem {
            job,
            batch,
            reply: reply_tx,
        };
        if self.work_tx.send(item).await.is_err() {
            return InferenceOutcome::Failed {
                error: CoreError::Internal("inference pool is shut down".to_string()),
                retryable: false,
                retry_count: 0,
            };
        }
        match reply_rx.await {
            Ok(outcome) => outcome,
            Err(_) => InferenceOutcome::Failed {
                error: CoreError::Internal("inference worker dropped".to_string()),
                retryable: false,
                retry_count: 0,
            },
        }
    }

    /// Mark a cancelled job so a late in-flight result is dropped.
    pub fn discard(&self, job_id: JobId) {
        self.shared
            .discard
            .lock()
            .expect("discard set lock poisoned")
            .insert(job_id);
    }

    /// Remove a discard mark (the job reached a terminal status through
    /// the normal path before the mark was consumed).
    pub fn clear_discard(&self, job_id: JobId) {
        self.shared.take_discard(job_id);
    }

    pub fn worker_count(&self) -> usize {
        self.shared.config.workers.max(1)
    }

    pub fn stats(&self) -> PoolStats {
        *self.shared.stats.lock().expect("pool stats lock poisoned")
    }

    pub fn governor_stats(&self) -> GovernorStats {
        self.shared.governor.stats()
    }

    pub fn memory_utilization(&self) -> f64 {
        self.shared.device.memory_utilization()
    }
}

/// Worker loop: pull, execute, reply. Exits when the channel closes.
async fn run_worker(
    worker_id: usize,
    slot: StreamSlot,
    shared: Arc<WorkerShared>,
    work_rx: Arc<tokio::sync::Mutex<mpsc::Receiver<WorkItem>>>,
) {
    tracing::debug!(worker_id, stream = slot.index(), "Inference worker started");
    loop {
        // The receiver lock is held only while waiting for an item,
        // never during execution.
        let item = {
            let mut rx = work_rx.lock().await;
            rx.recv().await
        };
        let Some(item) = item else {
            tracing::debug!(worker_id, "Inference worker shutting down");
            break;
        };
        let outcome = execute(&shared, slot, item.job, item.batch).await;
        // The submitter may have gone away; nothing to do about it.
        let _ = item.reply.send(outcome);
    }
}

/// Run one job: plan the batch, chunk the images through the device,
/// recover from a single OOM at half batch, and gate the result on the
/// discard set.
async fn execute(
    shared: &WorkerShared,
    slot: StreamSlot,
    job: SegmentationJob,
    batch: ImageBatch,
) -> InferenceOutcome {
    let device = shared.device.as_ref();

    let Some(spec) = spec_for_model(&job.model) else {
        // Model names are validated at enqueue; reaching this is a bug.
        shared.bump(|s| s.failure_count += 1);
        return InferenceOutcome::Failed {
            error: CoreError::Internal(format!("no batch spec for model '{}'", job.model)),
            retryable: false,
            retry_count: 0,
        };
    };

    let mut batch_size = per_worker_batch_size(
        &spec,
        shared.config.workers.max(1),
        shared.config.device_memory_mb,
        shared.config.reserved_memory_mb,
    );
    let mut retry_count: u32 = 0;
    let mut polygons: Vec<Polygon> = Vec::new();
    let started = Instant::now();
    let min_area = job.min_area as f64;

    let mut pending: &[Vec<u8>] = &batch.images;
    while !pending.is_empty() {
        let take = batch_size.min(pending.len());
        let (chunk, rest) = pending.split_at(take);
        let request = ForwardRequest {
            model: &job.model,
            images: chunk,
            threshold: job.threshold,
            detect_holes: job.detect_holes,
        };

        match tokio::time::timeout(shared.config.inference_timeout, device.forward(slot, request))
            .await
        {
            Err(_) => {
                shared.bump(|s| {
                    s.timeout_count += 1;
                    s.failure_count += 1;
                });
                tracing::warn!(
                    job_id = %job.id,
                    model = %job.model,
                    timeout_secs = shared.config.inference_timeout.as_secs(),
                    "Inference timed out",
                );
                return InferenceOutcome::Failed {
                    error: CoreError::Timeout {
                        secs: shared.config.inference_timeout.as_secs(),
                    },
                    retryable: true,
                    retry_count,
                };
            }
            Ok(Err(DeviceError::OutOfMemory(reason))) => {
                if retry_count == 0 {
                    tracing::warn!(
                        job_id = %job.id,
                        batch_size,
                        "Out of memory, flushing and retrying at half batch",
                    );
                    shared.governor.force_flush(device).await;
                    batch_size = halve(batch_size);
                    retry_count = 1;
                    continue;
                }
                shared.bump(|s| s.failure_count += 1);
                return InferenceOutcome::Failed {
                    error: CoreError::ResourceExhausted(reason),
                    retryable: true,
                    retry_count,
                };
            }
            Ok(Err(DeviceError::Execution(reason))) => {
                shared.bump(|s| s.failure_count += 1);
                return InferenceOutcome::Failed {
                    error: CoreError::Internal(reason),
                    retryable: false,
                    retry_count,
                };
            }
            Ok(Ok(per_image)) => {
                for image_polygons in per_image {
                    polygons.extend(
                        image_polygons
                            .into_iter()
                            .filter(|polygon| polygon.area() >= min_area),
                    );
                }
                pending = rest;
                shared.governor.after_batch(device).await;
            }
        }
    }

    // Drain the stream before releasing the result.
    device.synchronize(slot).await;

    // A cancellation may have arrived while the forward pass was in
    // flight; its result must never be published.
    if shared.take_discard(job.id) {
        shared.bump(|s| s.discarded_count += 1);
        return InferenceOutcome::Discarded;
    }

    shared.bump(|s| s.total_inferences += 1);
    let result = SegmentationResult {
        polygons,
        model: job.model.clone(),
        batch_size,
        inference_ms: started.elapsed().as_millis() as u64,
    };
    InferenceOutcome::Completed {
        result,
        retry_count,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

    use annolab_core::segmentation::{MODEL_HRNET, Polygon};

    /// Scriptable device: configurable delay, a number of leading OOM
    /// failures, and concurrency / batch-size observation.
    struct FakeDevice {
        total_mb: u64,
        allocated_mb: u64,
        forward_delay: Duration,
        oom_failures: AtomicU64,
        observed_batches: Mutex<Vec<usize>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        flushes: AtomicU64,
    }

    impl FakeDevice {
        fn new() -> Self {
            Self {
                total_mb: 24_576,
                allocated_mb: 8_192,
                forward_delay: Duration::ZERO,
                oom_failures: AtomicU64::new(0),
                observed_batches: Mutex::new(Vec::new()),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
                flushes: AtomicU64::new(0),
            }
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.forward_delay = delay;
            self
        }

        fn with_oom_failures(self, n: u64) -> Self {
            self.oom_failures.store(n, Ordering::SeqCst);
            self
        }

        fn observed(&self) -> Vec<usize> {
            self.observed_batches.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl AcceleratorDevice for FakeDevice {
        fn total_memory_mb(&self) -> u64 {
            self.total_mb
        }

        fn memory_allocated_mb(&self) -> u64 {
            self.allocated_mb
        }

        async fn forward(
            &self,
            _stream: StreamSlot,
            request: ForwardRequest<'_>,
        ) -> Result<Vec<Vec<Polygon>>, DeviceError> {
            let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(current, Ordering::SeqCst);
            self.observed_batches
                .lock()
                .unwrap()
                .push(request.images.len());

            if !self.forward_delay.is_zero() {
                tokio::time::sleep(self.forward_delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self
                .oom_failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(DeviceError::OutOfMemory("allocator exhausted".to_string()));
            }

            // One 20x20 polygon (area 400) and one 5x5 polygon (area 25)
            // per image, so min_area filtering is observable.
            let per_image = |_| {
                vec![
                    Polygon {
                        points: vec![[0.0, 0.0], [20.0, 0.0], [20.0, 20.0], [0.0, 20.0]],
                        confidence: 0.95,
                    },
                    Polygon {
                        points: vec![[0.0, 0.0], [5.0, 0.0], [5.0, 5.0], [0.0, 5.0]],
                        confidence: 0.4,
                    },
                ]
            };
            Ok(request.images.iter().enumerate().map(|(i, _)| per_image(i)).collect())
        }

        async fn synchronize(&self, _stream: StreamSlot) {}

        async fn flush_cache(&self) {
            self.flushes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn test_job() -> SegmentationJob {
        SegmentationJob::new(1, 1, 1, MODEL_HRNET.to_string(), 0.5, 100, true, 0)
    }

    fn batch_of(n: usize) -> ImageBatch {
        ImageBatch {
            images: vec![vec![0u8; 16]; n],
        }
    }

    fn config(workers: usize) -> InferenceConfig {
        InferenceConfig {
            workers,
            ..InferenceConfig::default()
        }
    }

    // -- success path ----------------------------------------------------------

    #[tokio::test]
    async fn completes_and_filters_small_polygons() {
        let device = Arc::new(FakeDevice::new());
        let pool = InferencePool::start(config(1), device);

        let outcome = pool.submit(test_job(), batch_of(2)).await;
        match outcome {
            InferenceOutcome::Completed {
                result,
                retry_count,
            } => {
                // The 5x5 polygon (area 25) is below min_area=100.
                assert_eq!(result.polygons.len(), 2);
                assert_eq!(retry_count, 0);
                assert_eq!(result.model, MODEL_HRNET);
            }
            other => panic!("expected Completed, got {other:?}"),
        }
        assert_eq!(pool.stats().total_inferences, 1);
    }

    #[tokio::test]
    async fn chunks_large_submissions_by_planned_batch() {
        let device = Arc::new(FakeDevice::new());
        let pool = InferencePool::start(config(1), device.clone());

        // hrnet plans batch 8 for a single worker with default memory.
        let outcome = pool.submit(test_job(), batch_of(10)).await;
        assert!(matches!(outcome, InferenceOutcome::Completed { .. }));
        assert_eq!(device.observed(), vec![8, 2]);
    }

    // -- OOM recovery ----------------------------------------------------------

    #[tokio::test]
    async fn oom_retries_once_at_half_batch() {
        let device = Arc::new(FakeDevice::new().with_oom_failures(1));
        let pool = InferencePool::start(config(1), device.clone());

        let outcome = pool.submit(test_job(), batch_of(10)).await;
        match outcome {
            InferenceOutcome::Completed { retry_count, .. } => assert_eq!(retry_count, 1),
            other => panic!("expected Completed, got {other:?}"),
        }

        // First chunk of 8 hit OOM; retried at 4, then 4 + 2.
        assert_eq!(device.observed(), vec![8, 4, 4, 2]);
        // The OOM recovery flushed the cache exactly once.
        assert_eq!(device.flushes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn second_oom_fails_the_job_with_reason() {
        let device = Arc::new(FakeDevice::new().with_oom_failures(10));
        let pool = InferencePool::start(config(1), device);

        let outcome = pool.submit(test_job(), batch_of(4)).await;
        match outcome {
            InferenceOutcome::Failed {
                error,
                retryable,
                retry_count,
            } => {
                assert!(matches!(error, CoreError::ResourceExhausted(_)));
                assert!(retryable);
                assert_eq!(retry_count, 1);
            }
            other => panic!("expected Failed, got {other:?}"),
        }
        assert_eq!(pool.stats().failure_count, 1);
    }

    // -- timeout ---------------------------------------------------------------

    #[tokio::test]
    async fn slow_forward_times_out_as_retryable() {
        let device = Arc::new(FakeDevice::new().with_delay(Duration::from_millis(500)));
        let pool = InferencePool::start(
            InferenceConfig {
                workers: 1,
                inference_timeout: Duration::from_millis(50),
                ..InferenceConfig::default()
            },
            device,
        );

        let outcome = pool.submit(test_job(), batch_of(1)).await;
        match outcome {
            InferenceOutcome::Failed {
                error, retryable, ..
            } => {
                assert!(matches!(error, CoreError::Timeout { .. }));
                assert!(retryable);
            }
            other => panic!("expected Failed, got {other:?}"),
        }
        assert_eq!(pool.stats().timeout_count, 1);
    }

    // -- discard ---------------------------------------------------------------

    #[tokio::test]
    async fn discarded_result_is_never_returned_as_completed() {
        let device = Arc::new(FakeDevice::new().with_delay(Duration::from_millis(100)));
        let pool = InferencePool::start(config(1), device);

        let job = test_job();
        let job_id = job.id;
        let submit = tokio::spawn({
            let pool = pool.clone();
            async move { pool.submit(job, batch_of(1)).await }
        });

        // Cancel arrives while the forward pass is in flight.
        tokio::time::sleep(Duration::from_millis(20)).await;
        pool.discard(job_id);

        let outcome = submit.await.unwrap();
        assert!(matches!(outcome, InferenceOutcome::Discarded));
        assert_eq!(pool.stats().discarded_count, 1);
        assert_eq!(pool.stats().total_inferences, 0);
    }

    // -- parallelism -----------------------------------------------------------

    #[tokio::test]
    async fn workers_execute_forward_passes_concurrently() {
        let device = Arc::new(FakeDevice::new().with_delay(Duration::from_millis(80)));
        let pool = InferencePool::start(config(2), device.clone());

        let (a, b) = tokio::join!(
            pool.submit(test_job(), batch_of(1)),
            pool.submit(test_job(), batch_of(1)),
        );
        assert!(matches!(a, InferenceOutcome::Completed { .. }));
        assert!(matches!(b, InferenceOutcome::Completed { .. }));

        // Both forward passes were on the device at the same time: no
        // global model lock serialized them.
        assert!(device.max_in_flight.load(Ordering::SeqCst) >= 2);
    }
}
