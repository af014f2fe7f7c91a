//! # Auth Test Utilities
//!
//! Shared test utilities for the ReqDB auth service.
//!
//! This crate provides:
//! - Deterministic crypto fixtures (fixed Ed25519 keys for reproducible tests)
//! - A JWT claims builder (`TokenBuilder`)
//! - A wiremock identity provider (discovery, JWKS, token, revocation)
//! - Server test harness (`TestAuthServer` for end-to-end tests)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use auth_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let key = TestKeypair::new(1, "key-1");
//!     let token = TokenBuilder::new("https://idp.example.com", "reqdb-client")
//!         .subject("alice")
//!         .roles(["Requirements.Reader"])
//!         .sign(&key);
//! }
//! ```

pub mod crypto_fixtures;
pub mod mock_idp;
pub mod server_harness;
pub mod token_builders;

// Re-export commonly used items
pub use crypto_fixtures::*;
pub use mock_idp::MockIdentityProvider;
pub use server_harness::*;
pub use token_builders::*;
