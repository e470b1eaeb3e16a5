//! Inference metrics endpoint.

use axum::extract::State;
use axum::Json;
use serde_json::json;

use crate::state::AppState;

/// GET /api/v1/metrics/inference
///
/// Pool execution counters, memory-governor counters, and the current
/// device memory utilization.
pub async fn inference_metrics(State(state): State<AppState>) -> Json<serde_json::Value> {
    let pool = state.pool.stats();
    let governor = state.pool.governor_stats();

    Json(json!({
        "data": {
            "workers": state.pool.worker_count(),
            "memory_utilization": state.pool.memory_utilization(),
            "pool": pool,
            "governor": governor,
        }
    }))
}
