//! HTTP routes for the auth service.
//!
//! Every route, public ones included, is registered through
//! [`ProtectedRouter`] under a name with a declared [`RoutePolicy`].

pub mod policy;

use crate::handlers;
use crate::middleware::{http_metrics_middleware, AccessController};
use crate::services::AuthService;
use axum::{middleware, routing::get, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

pub use policy::{PolicyError, PolicyTable, ProtectedRouter, RoutePolicy};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Login, token and logout orchestration.
    pub auth: Arc<AuthService>,

    /// Prometheus handle rendered at `/metrics`.
    pub metrics_handle: PrometheusHandle,
}

/// Access policies for the service's own routes.
///
/// # Errors
///
/// `PolicyError::DuplicatePolicy` if a route is declared twice.
pub fn default_policies() -> Result<PolicyTable, PolicyError> {
    PolicyTable::new()
        // Browser login flow, authenticated by the session cookie if at all
        .declare("login", RoutePolicy::public())?
        .declare("callback", RoutePolicy::public())?
        .declare("spa_callback", RoutePolicy::public())?
        .declare("token", RoutePolicy::public())?
        .declare("logout", RoutePolicy::public())?
        // Operational endpoints
        .declare("health", RoutePolicy::public())?
        .declare("metrics", RoutePolicy::public())?
        // Business API
        .declare("me", RoutePolicy::authenticated())
}

/// Build the application routes.
///
/// - `/auth/login`, `/auth/callback`, `/auth/spaCallback`, `/auth/token`,
///   `/auth/logout` - browser login flow
/// - `/api/v1/health` - liveness, public
/// - `/api/v1/me` - current user, bearer token required
/// - `/metrics` - Prometheus metrics, public
///
/// Layer order (outermost first): HTTP metrics, timeout, trace.
///
/// # Errors
///
/// `PolicyError` if a registered route has no policy in `access`.
pub fn build_routes(state: Arc<AppState>, access: Arc<AccessController>) -> Result<Router, PolicyError> {
    let router = ProtectedRouter::new(access)
        .route("login", "/auth/login", get(handlers::login))
        .route("callback", "/auth/callback", get(handlers::callback))
        .route("spa_callback", "/auth/spaCallback", get(handlers::spa_callback))
        .route("token", "/auth/token", get(handlers::token))
        .route("logout", "/auth/logout", get(handlers::logout))
        .route("health", "/api/v1/health", get(handlers::health_check))
        .route("me", "/api/v1/me", get(handlers::get_me))
        .route("metrics", "/metrics", get(handlers::metrics_handler))
        .finish()?;

    Ok(router
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(middleware::from_fn(http_metrics_middleware)))
}
