//! Persistence for provisioned users and the audit trail.
//!
//! `users` and `audit` implement the provisioner's collaborator traits on
//! PostgreSQL; `memory` implements them in-process.

pub mod audit;
pub mod memory;
pub mod users;

use thiserror::Error;

pub use audit::PgAuditRecorder;
pub use memory::{InMemoryAuditRecorder, InMemoryUserDirectory};
pub use users::PgUserDirectory;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(String),
}
