//! Job status state machines.
//!
//! Both job types share the same discipline: statuses move only forward,
//! and `Completed`, `Failed`, and `Cancelled` are absorbing — once a job
//! reaches one of them, no writer may change it again. The store enforces
//! this with a compare-and-set on every transition; the functions here are
//! the single source of truth for which transitions that CAS may accept.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Segmentation job status
// ---------------------------------------------------------------------------

/// Lifecycle status of a segmentation job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Terminal statuses admit no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// The set of statuses reachable from `self`.
    pub fn valid_transitions(self) -> &'static [JobStatus] {
        match self {
            JobStatus::Queued => &[JobStatus::Processing, JobStatus::Cancelled],
            JobStatus::Processing => &[
                JobStatus::Completed,
                JobStatus::Failed,
                JobStatus::Cancelled,
            ],
            // Terminal states: no outgoing transitions.
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled => &[],
        }
    }

    /// Check whether a transition from `self` to `to` is valid.
    pub fn can_transition(self, to: JobStatus) -> bool {
        self.valid_transitions().contains(&to)
    }

    /// Lowercase wire name, matching the serde representation.
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

// ---------------------------------------------------------------------------
// Export job status
// ---------------------------------------------------------------------------

/// Lifecycle status of an export job.
///
/// Identical discipline to [`JobStatus`]; the initial state is `Pending`
/// because an export is accepted before its background task starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl ExportStatus {
    /// Terminal statuses admit no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExportStatus::Completed | ExportStatus::Failed | ExportStatus::Cancelled
        )
    }

    /// The set of statuses reachable from `self`.
    pub fn valid_transitions(self) -> &'static [ExportStatus] {
        match self {
            ExportStatus::Pending => &[ExportStatus::Processing, ExportStatus::Cancelled],
            ExportStatus::Processing => &[
                ExportStatus::Completed,
                ExportStatus::Failed,
                ExportStatus::Cancelled,
            ],
            ExportStatus::Completed | ExportStatus::Failed | ExportStatus::Cancelled => &[],
        }
    }

    /// Check whether a transition from `self` to `to` is valid.
    pub fn can_transition(self, to: ExportStatus) -> bool {
        self.valid_transitions().contains(&to)
    }

    /// Lowercase wire name, matching the serde representation.
    pub fn as_str(self) -> &'static str {
        match self {
            ExportStatus::Pending => "pending",
            ExportStatus::Processing => "processing",
            ExportStatus::Completed => "completed",
            ExportStatus::Failed => "failed",
            ExportStatus::Cancelled => "cancelled",
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
