//! In-memory implementation of the project access seam.
//!
//! Stands in for the external authorization service: the API binary seeds
//! it from configuration, tests seed it directly.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use tokio::sync::RwLock;

use annolab_core::access::ProjectAccess;
use annolab_core::types::DbId;

/// Project ownership and accepted shares, held in memory.
#[derive(Default)]
pub struct InMemoryAccess {
    /// project_id -> owning user.
    owners: RwLock<HashMap<DbId, DbId>>,
    /// project_id -> users with accepted share access.
    shares: RwLock<HashMap<DbId, HashSet<DbId>>>,
}

impl InMemoryAccess {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a project with its owner.
    pub async fn add_project(&self, project_id: DbId, owner_id: DbId) {
        self.owners.write().await.insert(project_id, owner_id);
    }

    /// Grant accepted share access on a project to a user.
    pub async fn grant_share(&self, project_id: DbId, user_id: DbId) {
        self.shares
            .write()
            .await
            .entry(project_id)
            .or_default()
            .insert(user_id);
    }
}

#[async_trait]
impl ProjectAccess for InMemoryAccess {
    async fn can_access(&self, user_id: DbId, project_id: DbId) -> bool {
        if self.owners.read().await.get(&project_id) == Some(&user_id) {
            return true;
        }
        self.shares
            .read()
            .await
            .get(&project_id)
            .is_some_and(|users| users.contains(&user_id))
    }

    async fn members(&self, project_id: DbId) -> Vec<DbId> {
        let mut members = Vec::new();
        if let Some(owner) = self.owners.read().await.get(&project_id) {
            members.push(*owner);
        }
        if let Some(users) = self.shares.read().await.get(&project_id) {
            for user in users {
                if !members.contains(user) {
                    members.push(*user);
                }
            }
        }
        members
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
