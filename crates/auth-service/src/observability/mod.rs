//! Observability for the auth service.

pub mod metrics;
