//! Route access policies.
//!
//! Every route is registered together with its name, and every name must
//! have a [`RoutePolicy`] in the [`PolicyTable`]. [`ProtectedRouter::finish`]
//! refuses to build a router with an unpoliced route, so a missing policy
//! is a startup failure rather than a request-time surprise. The request
//! path still fails closed if a lookup ever misses.

use crate::middleware::access::{enforce_route_policy, AccessController, RouteGuard};
use axum::{middleware, routing::MethodRouter, Router};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use thiserror::Error;

/// Authentication and role requirements of one route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutePolicy {
    auth_required: bool,
    roles: BTreeSet<String>,
}

impl RoutePolicy {
    /// No authentication.
    pub fn public() -> Self {
        Self {
            auth_required: false,
            roles: BTreeSet::new(),
        }
    }

    /// Any valid bearer token.
    pub fn authenticated() -> Self {
        Self {
            auth_required: true,
            roles: BTreeSet::new(),
        }
    }

    /// A valid bearer token holding at least one of `roles`.
    pub fn roles<I, S>(roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            auth_required: true,
            roles: roles.into_iter().map(Into::into).collect(),
        }
    }

    pub fn auth_required(&self) -> bool {
        self.auth_required
    }

    pub fn required_roles(&self) -> &BTreeSet<String> {
        &self.roles
    }

    /// Whether a principal holding `roles` satisfies this policy's role
    /// requirement. An empty requirement admits everyone.
    pub fn permits<S: AsRef<str>>(&self, roles: &[S]) -> bool {
        self.roles.is_empty() || roles.iter().any(|r| self.roles.contains(r.as_ref()))
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PolicyError {
    #[error("Route '{0}' has no access policy")]
    MissingPolicy(String),

    #[error("Access policy for route '{0}' declared twice")]
    DuplicatePolicy(String),

    #[error("Route name '{0}' registered twice")]
    DuplicateRoute(String),
}

/// Route name to policy. Immutable once handed to the [`AccessController`].
#[derive(Debug, Clone, Default)]
pub struct PolicyTable {
    policies: HashMap<String, RoutePolicy>,
}

impl PolicyTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare the policy for `route`.
    ///
    /// # Errors
    ///
    /// `PolicyError::DuplicatePolicy` if `route` already has one.
    pub fn declare(mut self, route: &str, policy: RoutePolicy) -> Result<Self, PolicyError> {
        if self.policies.contains_key(route) {
            return Err(PolicyError::DuplicatePolicy(route.to_string()));
        }
        self.policies.insert(route.to_string(), policy);
        Ok(self)
    }

    pub fn get(&self, route: &str) -> Option<&RoutePolicy> {
        self.policies.get(route)
    }

    pub fn routes(&self) -> impl Iterator<Item = &str> {
        self.policies.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}

/// Router builder that attaches the access check to every route.
pub struct ProtectedRouter<S> {
    access: Arc<AccessController>,
    router: Router<S>,
    registered: BTreeSet<&'static str>,
    error: Option<PolicyError>,
}

impl<S> ProtectedRouter<S>
where
    S: Clone + Send + Sync + 'static,
{
    pub fn new(access: Arc<AccessController>) -> Self {
        Self {
            access,
            router: Router::new(),
            registered: BTreeSet::new(),
            error: None,
        }
    }

    /// Register `method_router` at `path` under the policy named `name`.
    ///
    /// Registration problems are collected and reported by `finish`.
    #[must_use]
    pub fn route(mut self, name: &'static str, path: &str, method_router: MethodRouter<S>) -> Self {
        if self.error.is_none() {
            if !self.registered.insert(name) {
                self.error = Some(PolicyError::DuplicateRoute(name.to_string()));
            } else if self.access.policies().get(name).is_none() {
                self.error = Some(PolicyError::MissingPolicy(name.to_string()));
            }
        }

        let guard = RouteGuard::new(Arc::clone(&self.access), name);
        self.router = self.router.route(
            path,
            method_router.route_layer(middleware::from_fn_with_state(guard, enforce_route_policy)),
        );
        self
    }

    /// Build the router once every registered route has a policy.
    ///
    /// Policies declared for routes that were never registered are logged.
    ///
    /// # Errors
    ///
    /// The first `MissingPolicy` or `DuplicateRoute` found during
    /// registration.
    pub fn finish(self) -> Result<Router<S>, PolicyError> {
        if let Some(e) = self.error {
            tracing::error!(target: "auth.access", error = %e, "Route policy check failed");
            return Err(e);
        }

        for route in self.access.policies().routes() {
            if !self.registered.contains(route) {
                tracing::warn!(target: "auth.access", route, "Policy declared for unregistered route");
            }
        }
        Ok(self.router)
    }
}
