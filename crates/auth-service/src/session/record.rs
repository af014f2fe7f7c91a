//! Session record contents.

use crate::auth::claims::Claims;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity mirrored from the validated ID token.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    pub sub: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
}

impl fmt::Debug for UserInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserInfo")
            .field("sub", &"[REDACTED]")
            .field("email", &self.email.as_ref().map(|_| "[REDACTED]"))
            .field("roles", &self.roles)
            .finish()
    }
}

impl From<&Claims> for UserInfo {
    fn from(claims: &Claims) -> Self {
        Self {
            sub: claims.sub.clone(),
            email: claims.email.clone(),
            roles: claims.roles.clone(),
        }
    }
}

/// The token bundle kept for one browser session.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub id_token: Option<String>,
    /// Access token expiry (Unix epoch seconds).
    pub expires_at: i64,
    pub userinfo: UserInfo,
}

impl fmt::Debug for SessionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionRecord")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("id_token", &self.id_token.as_ref().map(|_| "[REDACTED]"))
            .field("expires_at", &self.expires_at)
            .field("userinfo", &self.userinfo)
            .finish()
    }
}

impl SessionRecord {
    /// Seconds until the access token expires (negative once expired).
    pub fn expires_in(&self, now: i64) -> i64 {
        self.expires_at.saturating_sub(now)
    }

    /// Copy of this record with new token fields.
    ///
    /// `refresh_token` and `id_token` keep their previous values when the
    /// update omits them. `userinfo` is unchanged.
    #[must_use]
    pub fn with_tokens(&self, update: TokenUpdate) -> Self {
        Self {
            access_token: update.access_token,
            refresh_token: update.refresh_token.or_else(|| self.refresh_token.clone()),
            id_token: update.id_token.or_else(|| self.id_token.clone()),
            expires_at: update.expires_at,
            userinfo: self.userinfo.clone(),
        }
    }
}

/// Token fields returned by a refresh exchange.
#[derive(Clone)]
pub struct TokenUpdate {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub id_token: Option<String>,
    pub expires_at: i64,
}

impl fmt::Debug for TokenUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenUpdate")
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}
