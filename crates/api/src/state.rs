use std::sync::Arc;

use annolab_core::access::ProjectAccess;
use annolab_events::StatusBroadcaster;
use annolab_export::ExportProcessor;
use annolab_inference::InferencePool;
use annolab_store::JobStore;

use crate::config::ServerConfig;
use crate::engine::queue::QueueManager;
use crate::ws::WsManager;

/// Shared application state available to all Axum handlers via
/// `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc`).
#[derive(Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Segmentation queue manager (enqueue, cancel, snapshots).
    pub queue: Arc<QueueManager>,
    /// Segmentation job registry, for read-only status queries.
    pub jobs: Arc<JobStore>,
    /// Inference pool, for the metrics endpoint.
    pub pool: Arc<InferencePool>,
    /// Export job processor.
    pub exporter: Arc<ExportProcessor>,
    /// Status event hub.
    pub broadcaster: Arc<StatusBroadcaster>,
    /// Project ownership / share resolution.
    pub access: Arc<dyn ProjectAccess>,
    /// WebSocket connection manager.
    pub ws_manager: Arc<WsManager>,
}
