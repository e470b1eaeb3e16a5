//! Project access seam.
//!
//! Authorization is an external concern; the engine only asks two narrow
//! questions: may this user submit work against this project, and who should
//! receive this project's status events.

use async_trait::async_trait;

use crate::types::DbId;

/// Resolves project ownership and accepted share access.
#[async_trait]
pub trait ProjectAccess: Send + Sync {
    /// Whether `user_id` owns `project_id` or holds accepted share access.
    async fn can_access(&self, user_id: DbId, project_id: DbId) -> bool;

    /// Every user that should receive events for `project_id`: the owner
    /// plus all accepted-share members. Order is unspecified.
    async fn members(&self, project_id: DbId) -> Vec<DbId>;
}
