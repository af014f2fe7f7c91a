//! ReqDB Auth Service Library
//!
//! OIDC login, encrypted server-side sessions, bearer token validation and
//! route-level role-based access control for the ReqDB API.
//!
//! # Modules
//!
//! - `auth` - Signing key cache and bearer token validation
//! - `config` - Service configuration
//! - `crypto` - Session encryption, id signing, PKCE
//! - `errors` - Error types and their HTTP mapping
//! - `handlers` - HTTP request handlers
//! - `middleware` - Access control and HTTP metrics
//! - `observability` - Prometheus metrics
//! - `repositories` - User and audit persistence
//! - `routes` - Router, application state and route policies
//! - `services` - Login orchestration, identity provider client, provisioning
//! - `session` - Encrypted session store and cache backends

pub mod auth;
pub mod config;
pub mod crypto;
pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod observability;
pub mod repositories;
pub mod routes;
pub mod services;
pub mod session;
