//! Job and export state registries.
//!
//! The persistent store behind the engine is an external concern; this crate
//! is the narrow interface the rest of the system talks to, implemented as
//! in-process registries. Every status mutation goes through a single
//! compare-and-set path per job, taken under the registry's write lock, so
//! no two writers can race on the same job's status field and terminal
//! statuses are absorbing.

pub mod access;
pub mod exports;
pub mod jobs;
pub mod models;

pub use access::InMemoryAccess;
pub use exports::ExportStore;
pub use jobs::JobStore;
pub use models::{CancelSummary, ExportJob, QueueSnapshot, SegmentationJob};
