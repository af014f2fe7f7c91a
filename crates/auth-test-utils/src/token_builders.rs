//! Builder patterns for test data construction
//!
//! Provides a fluent API for identity provider tokens.

use crate::crypto_fixtures::TestKeypair;
use chrono::{Duration, Utc};
use serde_json::{json, Map, Value};

/// Builder for JWT claims as the identity provider would issue them.
///
/// Defaults: subject `test-user`, no email, empty `roles`, expiry one hour
/// from now.
///
/// # Example
/// ```rust,ignore
/// let token = TokenBuilder::new(ISSUER, CLIENT_ID)
///     .subject("alice")
///     .roles(["Requirements.Writer"])
///     .expires_in_secs(60)
///     .sign(&key);
/// ```
#[derive(Debug, Clone)]
pub struct TokenBuilder {
    claims: Map<String, Value>,
}

impl TokenBuilder {
    pub fn new(issuer: &str, audience: &str) -> Self {
        let now = Utc::now();
        let mut claims = Map::new();
        claims.insert("iss".to_string(), json!(issuer));
        claims.insert("aud".to_string(), json!(audience));
        claims.insert("sub".to_string(), json!("test-user"));
        claims.insert("iat".to_string(), json!(now.timestamp()));
        claims.insert(
            "exp".to_string(),
            json!((now + Duration::seconds(3600)).timestamp()),
        );
        claims.insert("roles".to_string(), json!([]));
        Self { claims }
    }

    pub fn subject(self, subject: &str) -> Self {
        self.claim("sub", json!(subject))
    }

    pub fn email(self, email: &str) -> Self {
        self.claim("email", json!(email))
    }

    pub fn roles<I, S>(self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let roles: Vec<String> = roles.into_iter().map(Into::into).collect();
        self.claim("roles", json!(roles))
    }

    /// Drop the `roles` claim entirely.
    pub fn without_roles(mut self) -> Self {
        self.claims.remove("roles");
        self
    }

    /// Expiry relative to now; negative values produce an expired token.
    pub fn expires_in_secs(self, seconds: i64) -> Self {
        self.claim("exp", json!((Utc::now() + Duration::seconds(seconds)).timestamp()))
    }

    /// Set or replace any claim.
    pub fn claim(mut self, name: &str, value: Value) -> Self {
        self.claims.insert(name.to_string(), value);
        self
    }

    pub fn build(self) -> Value {
        Value::Object(self.claims)
    }

    pub fn sign(self, key: &TestKeypair) -> String {
        key.sign_claims(&self.build())
    }
}
