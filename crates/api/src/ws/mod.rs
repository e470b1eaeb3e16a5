//! WebSocket push channel.
//!
//! Best-effort delivery of [`annolab_events::StatusEvent`]s to connected
//! browsers. The REST endpoints remain the source of truth; a dropped
//! connection or lagged receiver loses events without affecting job state.

pub mod handler;
pub mod manager;
pub mod relay;

pub use manager::WsManager;
