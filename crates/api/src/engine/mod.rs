//! Background execution engine: queue manager and dispatcher.

pub mod dispatcher;
pub mod queue;

use annolab_events::{StatusBroadcaster, StatusEvent};
use annolab_store::{JobStore, SegmentationJob};

/// Publish a job's current status plus refreshed queue stats to every
/// member of its project.
///
/// Shared by the queue manager (enqueue/cancel) and the dispatcher
/// (claim/complete/fail) so both sides emit identical event shapes.
pub(crate) async fn publish_job_status(
    broadcaster: &StatusBroadcaster,
    jobs: &JobStore,
    job: &SegmentationJob,
) {
    broadcaster
        .emit_to_project(
            job.project_id,
            StatusEvent::SegmentationStatusUpdate {
                job_id: job.id,
                image_id: job.image_id,
                project_id: job.project_id,
                user_id: job.user_id,
                status: job.status,
                error: job.error.clone(),
            },
        )
        .await;

    let snap = jobs.snapshot_for_project(job.project_id).await;
    broadcaster
        .emit_to_project(
            job.project_id,
            StatusEvent::QueueStatsUpdate {
                project_id: job.project_id,
                queued: snap.queued,
                processing: snap.processing,
                completed: snap.completed,
                failed: snap.failed,
            },
        )
        .await;
}
