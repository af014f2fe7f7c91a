//! Prometheus metrics endpoint.

use crate::routes::AppState;
use axum::extract::State;
use std::sync::Arc;

/// GET /metrics
///
/// Prometheus text exposition of the installed recorder.
pub async fn metrics_handler(State(state): State<Arc<AppState>>) -> String {
    state.metrics_handle.render()
}
