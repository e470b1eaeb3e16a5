//! Status event kinds.
//!
//! A closed tagged enumeration shared by the publisher and every subscriber.
//! Each kind has a fixed payload shape; there are deliberately no free-form
//! string event names, so a publisher cannot emit a payload the consumers
//! do not understand.

use serde::{Deserialize, Serialize};

use annolab_core::export::ExportPhase;
use annolab_core::status::JobStatus;
use annolab_core::types::{DbId, JobId};

/// A job/queue state-change event pushed to subscribed observers.
///
/// Serialized with an internal `type` tag (snake_case) for the WebSocket
/// wire format, e.g. `{"type":"export_progress","job_id":...,"percent":42}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StatusEvent {
    /// Recomputed queue counts for a project.
    QueueStatsUpdate {
        project_id: DbId,
        queued: usize,
        processing: usize,
        completed: usize,
        failed: usize,
    },

    /// A segmentation job changed status.
    SegmentationStatusUpdate {
        job_id: JobId,
        image_id: DbId,
        project_id: DbId,
        user_id: DbId,
        status: JobStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// Aggregate export progress advanced.
    ExportProgress {
        job_id: JobId,
        project_id: DbId,
        user_id: DbId,
        phase: ExportPhase,
        percent: u8,
    },

    /// An export archive is ready for download.
    ExportCompleted {
        job_id: JobId,
        project_id: DbId,
        user_id: DbId,
    },

    /// An export was cancelled; partial artifacts were removed.
    ExportCancelled {
        job_id: JobId,
        project_id: DbId,
        user_id: DbId,
    },

    /// An export failed.
    ExportFailed {
        job_id: JobId,
        project_id: DbId,
        user_id: DbId,
        error: String,
    },
}

impl StatusEvent {
    /// The wire name of this event kind (the serde `type` tag).
    pub fn kind(&self) -> &'static str {
        match self {
            StatusEvent::QueueStatsUpdate { .. } => "queue_stats_update",
            StatusEvent::SegmentationStatusUpdate { .. } => "segmentation_status_update",
            StatusEvent::ExportProgress { .. } => "export_progress",
            StatusEvent::ExportCompleted { .. } => "export_completed",
            StatusEvent::ExportCancelled { .. } => "export_cancelled",
            StatusEvent::ExportFailed { .. } => "export_failed",
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
