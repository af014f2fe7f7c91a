//! Metrics definitions for the auth service.
//!
//! All metrics follow Prometheus naming conventions:
//! - `auth_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded by code:
//! - `status`: success, error, timeout
//! - `error_category`: malformed, key, signature, claims
//! - `operation`: start, get, refresh, remove / discovery, code_exchange, refresh, revoke
//! - `outcome`: allowed, unauthorized, forbidden, config_missing
//! - `endpoint`: the fixed route list, anything else is `other`

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Install the Prometheus recorder and return the handle served at
/// `GET /metrics`.
///
/// # Errors
///
/// Returns error if a recorder is already installed.
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        // Provider round trips: token endpoint and JWKS are external calls
        .set_buckets_for_metric(
            Matcher::Prefix("auth_idp".to_string()),
            &[0.010, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000, 10.000],
        )
        .map_err(|e| format!("Failed to set identity provider buckets: {e}"))?
        .set_buckets_for_metric(
            Matcher::Prefix("auth_jwks".to_string()),
            &[0.010, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000, 10.000],
        )
        .map_err(|e| format!("Failed to set JWKS buckets: {e}"))?
        // Session cache round trips
        .set_buckets_for_metric(
            Matcher::Prefix("auth_session".to_string()),
            &[0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000],
        )
        .map_err(|e| format!("Failed to set session buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

// ============================================================================
// Token Metrics
// ============================================================================

/// Record bearer token validation result
///
/// Metric: `auth_token_validations_total`
/// Labels: `status`, `error_category`
pub fn record_token_validation(status: &str, error_category: Option<&str>) {
    let category = error_category.unwrap_or("none");
    counter!("auth_token_validations_total", "status" => status.to_string(), "error_category" => category.to_string())
        .increment(1);
}

/// Record JWKS refresh
///
/// Metric: `auth_jwks_refresh_total`, `auth_jwks_refresh_duration_seconds`
/// Labels: `status`
pub fn record_jwks_refresh(status: &str, duration: Duration) {
    histogram!("auth_jwks_refresh_duration_seconds", "status" => status.to_string())
        .record(duration.as_secs_f64());
    counter!("auth_jwks_refresh_total", "status" => status.to_string()).increment(1);
}

// ============================================================================
// Session Metrics
// ============================================================================

/// Record a session store operation
///
/// Metric: `auth_session_operations_total`, `auth_session_operation_duration_seconds`
/// Labels: `operation`, `status`
pub fn record_session_operation(operation: &str, status: &str, duration: Duration) {
    histogram!("auth_session_operation_duration_seconds",
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .record(duration.as_secs_f64());
    counter!("auth_session_operations_total",
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

// ============================================================================
// Identity Provider Metrics
// ============================================================================

/// Record an identity provider call
///
/// Metric: `auth_idp_requests_total`, `auth_idp_request_duration_seconds`
/// Labels: `operation`, `status`
pub fn record_idp_request(operation: &str, status: &str, duration: Duration) {
    histogram!("auth_idp_request_duration_seconds",
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .record(duration.as_secs_f64());
    counter!("auth_idp_requests_total",
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

// ============================================================================
// Access Control Metrics
// ============================================================================

/// Record an access decision
///
/// Metric: `auth_access_decisions_total`
/// Labels: `outcome`
pub fn record_access_decision(outcome: &str) {
    counter!("auth_access_decisions_total", "outcome" => outcome.to_string()).increment(1);
}

/// Record a provisioning outcome
///
/// Metric: `auth_user_provisioning_total`
/// Labels: `action` (created, updated, unchanged, error)
pub fn record_provisioning(action: &str) {
    counter!("auth_user_provisioning_total", "action" => action.to_string()).increment(1);
}

// ============================================================================
// HTTP Metrics
// ============================================================================

/// Record an HTTP request
///
/// Metric: `auth_http_requests_total`, `auth_http_request_duration_seconds`
/// Labels: `method`, `endpoint`, `status` / `status_code`
pub fn record_http_request(method: &str, endpoint: &str, status_code: u16, duration: Duration) {
    let endpoint = normalize_endpoint(endpoint);
    let status = match status_code {
        200..=399 => "success",
        408 | 504 => "timeout",
        _ => "error",
    };

    histogram!("auth_http_request_duration_seconds",
        "method" => method.to_string(),
        "endpoint" => endpoint,
        "status" => status
    )
    .record(duration.as_secs_f64());

    counter!("auth_http_requests_total",
        "method" => method.to_string(),
        "endpoint" => endpoint,
        "status_code" => status_code.to_string()
    )
    .increment(1);
}

/// Known routes keep their path; everything else collapses to `other`.
fn normalize_endpoint(path: &str) -> &'static str {
    match path {
        "/auth/login" => "/auth/login",
        "/auth/callback" => "/auth/callback",
        "/auth/spaCallback" => "/auth/spaCallback",
        "/auth/token" => "/auth/token",
        "/auth/logout" => "/auth/logout",
        "/api/v1/health" => "/api/v1/health",
        "/api/v1/me" => "/api/v1/me",
        "/metrics" => "/metrics",
        _ => "other",
    }
}
