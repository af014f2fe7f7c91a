//! Bearer token verification.
//!
//! - `claims` - Verified identity facts carried by a token
//! - `jwks` - Identity provider signing keys, cached and refreshed on demand
//! - `jwt` - Token validation against the cached key set

pub mod claims;
pub mod jwks;
pub mod jwt;

pub use claims::Claims;
pub use jwks::{KeyStore, KeyStoreError, SigningKeySet, VerificationKey};
pub use jwt::TokenValidator;
