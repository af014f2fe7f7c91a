//! Service layer for the auth service.
//!
//! # Components
//!
//! - `auth_service` - Login, token and logout orchestration
//! - `idp_client` - OAuth2/OIDC client for the identity provider
//! - `provisioner` - Local user mirror with audit records
//! - `refresh_gate` - Per-session single-flight for token refresh

pub mod auth_service;
pub mod idp_client;
pub mod provisioner;
pub mod refresh_gate;

pub use auth_service::{AuthService, LoginOutcome, LoginRedirect, TokenData, TokenGrant};
pub use idp_client::{IdentityProviderClient, ProviderMetadata, TokenResponse};
pub use provisioner::{AuditAction, AuditRecorder, LocalUser, ProvisionOutcome, UserDirectory, UserProvisioner};
pub use refresh_gate::RefreshGate;
