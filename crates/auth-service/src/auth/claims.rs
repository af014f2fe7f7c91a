//! Verified token claims.
//!
//! The `sub` and `email` fields identify a person and are redacted in
//! Debug output.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Claims extracted from a validated access or ID token.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject identifier, the local user id.
    pub sub: String,

    /// Token issuer.
    pub iss: String,

    /// Expiration timestamp (Unix epoch seconds).
    pub exp: i64,

    /// Issued-at timestamp (Unix epoch seconds).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,

    /// Mirrored profile field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    /// Application roles. Absent in the token means no roles.
    #[serde(default)]
    pub roles: Vec<String>,
}

impl fmt::Debug for Claims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Claims")
            .field("sub", &"[REDACTED]")
            .field("iss", &self.iss)
            .field("exp", &self.exp)
            .field("iat", &self.iat)
            .field("email", &self.email.as_ref().map(|_| "[REDACTED]"))
            .field("roles", &self.roles)
            .finish()
    }
}

impl Claims {
    /// Roles as a set, for policy intersection.
    pub fn role_set(&self) -> BTreeSet<&str> {
        self.roles.iter().map(String::as_str).collect()
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_roles_default_to_empty() {
        let claims: Claims = serde_json::from_str(
            r#"{"sub":"user-1","iss":"https://idp.example.com","exp":1700000000}"#,
        )
        .unwrap();
        assert!(claims.roles.is_empty());
        assert!(claims.email.is_none());
        assert!(!claims.has_role("Requirements.Reader"));
    }

    #[test]
    fn test_role_set() {
        let claims: Claims = serde_json::from_str(
            r#"{"sub":"u","iss":"i","exp":1,"roles":["Writer","Reader","Writer"]}"#,
        )
        .unwrap();
        assert_eq!(claims.role_set(), BTreeSet::from(["Reader", "Writer"]));
        assert!(claims.has_role("Writer"));
    }

    #[test]
    fn test_debug_redacts_identity() {
        let claims = Claims {
            sub: "secret-subject".to_string(),
            iss: "https://idp.example.com".to_string(),
            exp: 1,
            iat: None,
            email: Some("alice@example.com".to_string()),
            roles: vec!["Reader".to_string()],
        };
        let debug = format!("{claims:?}");
        assert!(!debug.contains("secret-subject"));
        assert!(!debug.contains("alice@example.com"));
        assert!(debug.contains("Reader"));
    }
}
