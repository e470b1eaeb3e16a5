//! WebSocket upgrade handler.
//!
//! Browsers connect to `GET /ws?user_id=<id>`; each connection receives the
//! status events addressed to that user. (Identity is resolved upstream,
//! see `crate::auth`; the query parameter mirrors the header because
//! browser WebSocket clients cannot set request headers.)

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;

use annolab_core::types::DbId;

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub user_id: DbId,
}

/// GET /ws
pub async fn ws_upgrade(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, params.user_id))
}

async fn handle_socket(socket: WebSocket, state: AppState, user_id: DbId) {
    let conn_id = uuid::Uuid::new_v4().to_string();
    let mut outbound = state.ws_manager.add(conn_id.clone(), user_id).await;
    tracing::debug!(conn_id = %conn_id, user_id, "WebSocket connected");

    let (mut sink, mut stream) = socket.split();

    // Forward queued outbound messages to the socket.
    let mut send_task = tokio::spawn(async move {
        while let Some(message) = outbound.recv().await {
            if sink.send(message).await.is_err() {
                break;
            }
        }
    });

    // Drain inbound frames until the client goes away. The push channel is
    // one-way; inbound text is ignored.
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(message)) = stream.next().await {
            if let Message::Close(_) = message {
                break;
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    state.ws_manager.remove(&conn_id).await;
    tracing::debug!(conn_id = %conn_id, user_id, "WebSocket disconnected");
}
