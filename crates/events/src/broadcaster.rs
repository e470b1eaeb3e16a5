//! User/project fan-out hub backed by a `tokio::sync::broadcast` channel.
//!
//! [`StatusBroadcaster`] is shared via `Arc` across the application. Every
//! published event is addressed to a single user; project-scoped emission
//! resolves the recipient set (owner plus accepted shares) through the
//! [`ProjectAccess`] seam and publishes one addressed copy per member.
//!
//! Delivery is best-effort: zero receivers is not an error, and slow
//! receivers may observe `RecvError::Lagged`. Nothing in the engine depends
//! on an event arriving.

use std::sync::Arc;

use tokio::sync::broadcast;

use annolab_core::access::ProjectAccess;
use annolab_core::types::DbId;

use crate::event::StatusEvent;

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// A status event addressed to one user.
#[derive(Debug, Clone)]
pub struct AddressedEvent {
    pub user_id: DbId,
    pub event: StatusEvent,
}

/// Best-effort publish/subscribe hub for [`StatusEvent`]s.
pub struct StatusBroadcaster {
    sender: broadcast::Sender<AddressedEvent>,
    access: Arc<dyn ProjectAccess>,
}

impl StatusBroadcaster {
    /// Create a broadcaster with the default channel capacity.
    pub fn new(access: Arc<dyn ProjectAccess>) -> Self {
        Self::with_capacity(access, DEFAULT_CAPACITY)
    }

    /// Create a broadcaster with a specific channel capacity.
    ///
    /// When the buffer is full the oldest un-consumed messages are dropped
    /// and slow receivers observe `RecvError::Lagged`.
    pub fn with_capacity(access: Arc<dyn ProjectAccess>, capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender, access }
    }

    /// Subscribe to all addressed events published on this hub.
    ///
    /// Subscribers filter by `user_id` themselves (the WebSocket relay
    /// routes each event to that user's connections).
    pub fn subscribe(&self) -> broadcast::Receiver<AddressedEvent> {
        self.sender.subscribe()
    }

    /// Publish an event to a single user.
    pub fn emit_to_user(&self, user_id: DbId, event: StatusEvent) {
        // Ignore the SendError — it only means there are zero receivers.
        let _ = self.sender.send(AddressedEvent { user_id, event });
    }

    /// Publish an event to every member of a project.
    ///
    /// Fans out to the project owner plus every user with accepted share
    /// access, one addressed copy each.
    pub async fn emit_to_project(&self, project_id: DbId, event: StatusEvent) {
        let members = self.access.members(project_id).await;
        if members.is_empty() {
            tracing::debug!(project_id, kind = event.kind(), "No members to notify");
            return;
        }
        for user_id in members {
            let _ = self.sender.send(AddressedEvent {
                user_id,
                event: event.clone(),
            });
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
