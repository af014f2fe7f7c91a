//! Utilities shared between the ReqDB auth service and its test utilities.

#![warn(clippy::pedantic)]

/// Secret types that prevent accidental logging
pub mod secret;

/// JWT header inspection and size limits
pub mod jwt;
