//! Middleware for the auth service.
//!
//! - `access` - Route policy enforcement and the `CurrentUser` extractor
//! - `http_metrics` - HTTP request metrics for every response

pub mod access;
pub mod http_metrics;

pub use access::{enforce_route_policy, AccessController, CurrentUser, RouteGuard};
pub use http_metrics::http_metrics_middleware;
