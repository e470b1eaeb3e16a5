/// Identifiers for externally-owned entities (users, projects, images) are
/// 64-bit integers assigned by the persistence layer.
pub type DbId = i64;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Jobs are identified by time-ordered UUIDs (v7), generated at enqueue.
pub type JobId = uuid::Uuid;

/// Generate a fresh job id.
pub fn new_job_id() -> JobId {
    uuid::Uuid::now_v7()
}
