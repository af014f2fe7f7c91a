//! Liveness endpoint.

/// GET /api/v1/health
///
/// Returns "OK" while the process is serving. Checks no dependencies.
pub async fn health_check() -> &'static str {
    "OK"
}
