//! Broadcaster-to-WebSocket relay.
//!
//! A single long-lived task that drains the status broadcaster and routes
//! each addressed event to the target user's connections.

use std::sync::Arc;

use axum::extract::ws::Message;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;

use annolab_events::StatusBroadcaster;

use crate::ws::WsManager;

/// Run the relay loop until the cancellation token is triggered.
pub async fn run(
    broadcaster: Arc<StatusBroadcaster>,
    ws_manager: Arc<WsManager>,
    cancel: CancellationToken,
) {
    let mut rx = broadcaster.subscribe();
    tracing::info!("Status relay started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Status relay shutting down");
                break;
            }
            received = rx.recv() => {
                match received {
                    Ok(addressed) => {
                        let payload = match serde_json::to_string(&addressed.event) {
                            Ok(payload) => payload,
                            Err(e) => {
                                tracing::error!(error = %e, "Failed to serialize status event");
                                continue;
                            }
                        };
                        ws_manager
                            .send_to_user(addressed.user_id, Message::Text(payload.into()))
                            .await;
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        // Best-effort channel: clients recover via the REST
                        // status endpoints.
                        tracing::warn!(skipped, "Status relay lagged, events dropped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }
}
