//! Auth service configuration.
//!
//! Configuration is loaded once at startup from environment variables.
//! Secrets are held as `SecretString` and redacted in Debug output.

use base64::{engine::general_purpose::STANDARD, Engine};
use common::jwt::{DEFAULT_CLOCK_SKEW, MAX_CLOCK_SKEW};
use common::secret::{ExposeSecret, SecretString};
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Default session lifetime (14 days), used for cookie max-age, signature
/// max-age and cache TTL alike.
pub const DEFAULT_SESSION_MAX_AGE_SECONDS: u64 = 14 * 24 * 60 * 60;

/// Default timeout for identity provider calls.
pub const DEFAULT_IDP_TIMEOUT_SECONDS: u64 = 10;

/// Default timeout for session cache calls.
pub const DEFAULT_CACHE_TIMEOUT_SECONDS: u64 = 2;

/// Access tokens expiring within this margin are refreshed on `/auth/token`.
pub const DEFAULT_TOKEN_REFRESH_MARGIN_SECONDS: u64 = 120;

/// Minimum length of `SESSION_SECRET_KEY` in bytes.
pub const MIN_SESSION_SECRET_LENGTH: usize = 32;

/// Where the browser app receives the SPA login result.
pub const DEFAULT_SPA_CALLBACK_PATH: &str = "/oauth/callback";

/// Value left in deployment templates that must never reach production.
const PLACEHOLDER_VALUE: &str = "xxx";

/// Backing store for encrypted session records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionBackend {
    /// Shared Redis cache (multi-process deployments).
    Redis,
    /// Process-local in-memory cache.
    Memory,
}

/// Redis connection parameters.
#[derive(Clone)]
pub struct RedisSettings {
    pub host: String,
    pub port: u16,
    pub password: Option<SecretString>,
    pub db: i64,
    pub tls: bool,
}

impl RedisSettings {
    /// Build the `redis://` / `rediss://` connection URL.
    ///
    /// Returned as a secret because it embeds the password.
    pub fn connection_url(&self) -> SecretString {
        let scheme = if self.tls { "rediss" } else { "redis" };
        let auth = match &self.password {
            Some(password) => format!(":{}@", password.expose_secret()),
            None => String::new(),
        };
        SecretString::from(format!(
            "{scheme}://{auth}{}:{}/{}",
            self.host, self.port, self.db
        ))
    }
}

impl fmt::Debug for RedisSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("db", &self.db)
            .field("tls", &self.tls)
            .finish()
    }
}

/// Auth service configuration.
#[derive(Clone)]
pub struct Config {
    /// Server bind address (default: "0.0.0.0:8080").
    pub bind_address: String,

    /// Public base URL used to build OAuth callback redirect URIs.
    pub base_url: String,

    /// OIDC discovery document URL.
    pub oauth_discovery_url: String,

    /// OAuth client ID, also the expected token audience.
    pub oauth_client_id: String,

    /// OAuth client secret.
    pub oauth_client_secret: SecretString,

    /// Space-separated scopes requested at login.
    pub oauth_scope: String,

    /// Secret used to sign client-visible session ids and auth state.
    pub session_secret_key: SecretString,

    /// Optional externally managed AES-256 key (base64). When absent a fresh
    /// key is generated per process.
    pub session_encryption_key: Option<SecretString>,

    /// Session lifetime.
    pub session_max_age: Duration,

    /// Session cache backend.
    pub session_backend: SessionBackend,

    /// Redis parameters, present when the backend is Redis.
    pub redis: Option<RedisSettings>,

    /// PostgreSQL URL for the user and audit tables.
    pub database_url: Option<String>,

    /// Timeout for every identity provider call.
    pub idp_timeout: Duration,

    /// Timeout for every session cache call.
    pub cache_timeout: Duration,

    /// Refresh access tokens expiring within this margin.
    pub token_refresh_margin: Duration,

    /// Leeway for `exp`/`nbf` validation.
    pub jwt_clock_skew: Duration,

    /// Browser app path receiving the SPA callback redirect.
    pub spa_callback_path: String,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("bind_address", &self.bind_address)
            .field("base_url", &self.base_url)
            .field("oauth_discovery_url", &self.oauth_discovery_url)
            .field("oauth_client_id", &self.oauth_client_id)
            .field("oauth_client_secret", &"[REDACTED]")
            .field("oauth_scope", &self.oauth_scope)
            .field("session_secret_key", &"[REDACTED]")
            .field(
                "session_encryption_key",
                &self.session_encryption_key.as_ref().map(|_| "[REDACTED]"),
            )
            .field("session_max_age", &self.session_max_age)
            .field("session_backend", &self.session_backend)
            .field("redis", &self.redis)
            .field("database_url", &self.database_url.as_ref().map(|_| "[REDACTED]"))
            .field("idp_timeout", &self.idp_timeout)
            .field("cache_timeout", &self.cache_timeout)
            .field("token_refresh_margin", &self.token_refresh_margin)
            .field("jwt_clock_skew", &self.jwt_clock_skew)
            .field("spa_callback_path", &self.spa_callback_path)
            .finish()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Environment variable {0} still has the placeholder value")]
    PlaceholderValue(String),

    #[error("Invalid value for {name}: {reason}")]
    InvalidValue { name: String, reason: String },
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let oauth_discovery_url = required(vars, "OAUTH_CONFIG")?;
        let oauth_client_id = required(vars, "OAUTH_CLIENT_ID")?;
        let oauth_client_secret = SecretString::from(required(vars, "OAUTH_CLIENT_SECRET")?);

        let session_secret = required(vars, "SESSION_SECRET_KEY")?;
        if session_secret.len() < MIN_SESSION_SECRET_LENGTH {
            return Err(invalid(
                "SESSION_SECRET_KEY",
                format!("must be at least {MIN_SESSION_SECRET_LENGTH} bytes"),
            ));
        }
        let session_secret_key = SecretString::from(session_secret);

        let session_encryption_key = match vars.get("SESSION_ENCRYPTION_KEY") {
            Some(encoded) => {
                let bytes = STANDARD.decode(encoded.trim()).map_err(|e| {
                    invalid("SESSION_ENCRYPTION_KEY", format!("not valid base64: {e}"))
                })?;
                if bytes.len() != 32 {
                    return Err(invalid(
                        "SESSION_ENCRYPTION_KEY",
                        format!("must decode to 32 bytes, got {}", bytes.len()),
                    ));
                }
                Some(SecretString::from(encoded.trim().to_string()))
            }
            None => None,
        };

        let oauth_scope = vars
            .get("OAUTH_SCOPE")
            .cloned()
            .unwrap_or_else(|| format!("openid email offline_access {oauth_client_id}/.default"));

        let session_backend = match vars.get("SESSION_BACKEND").map(String::as_str) {
            None | Some("redis") => SessionBackend::Redis,
            Some("memory") => SessionBackend::Memory,
            Some(other) => {
                return Err(invalid(
                    "SESSION_BACKEND",
                    format!("expected 'redis' or 'memory', got '{other}'"),
                ))
            }
        };

        let redis = match session_backend {
            SessionBackend::Redis => Some(RedisSettings {
                host: required(vars, "REDIS_HOST")?,
                port: parse_or(vars, "REDIS_PORT", 6379u16)?,
                password: vars
                    .get("REDIS_PASSWORD")
                    .filter(|p| !p.is_empty())
                    .map(|p| SecretString::from(p.clone())),
                db: parse_or(vars, "REDIS_DB", 0i64)?,
                tls: parse_flag(vars, "REDIS_TLS")?,
            }),
            SessionBackend::Memory => None,
        };

        let session_max_age = Duration::from_secs(parse_positive(
            vars,
            "SESSION_MAX_AGE_SECONDS",
            DEFAULT_SESSION_MAX_AGE_SECONDS,
        )?);

        let jwt_clock_skew = Duration::from_secs(parse_or(
            vars,
            "JWT_CLOCK_SKEW_SECONDS",
            DEFAULT_CLOCK_SKEW.as_secs(),
        )?);
        if jwt_clock_skew > MAX_CLOCK_SKEW {
            return Err(invalid(
                "JWT_CLOCK_SKEW_SECONDS",
                format!("must not exceed {} seconds", MAX_CLOCK_SKEW.as_secs()),
            ));
        }

        Ok(Self {
            bind_address: vars
                .get("BIND_ADDRESS")
                .cloned()
                .unwrap_or_else(|| "0.0.0.0:8080".to_string()),
            base_url: vars
                .get("BASE_URL")
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or_else(|| "http://localhost".to_string()),
            oauth_discovery_url,
            oauth_client_id,
            oauth_client_secret,
            oauth_scope,
            session_secret_key,
            session_encryption_key,
            session_max_age,
            session_backend,
            redis,
            database_url: vars.get("DATABASE_URL").filter(|u| !u.is_empty()).cloned(),
            idp_timeout: Duration::from_secs(parse_positive(
                vars,
                "IDP_TIMEOUT_SECONDS",
                DEFAULT_IDP_TIMEOUT_SECONDS,
            )?),
            cache_timeout: Duration::from_secs(parse_positive(
                vars,
                "CACHE_TIMEOUT_SECONDS",
                DEFAULT_CACHE_TIMEOUT_SECONDS,
            )?),
            token_refresh_margin: Duration::from_secs(parse_or(
                vars,
                "TOKEN_REFRESH_MARGIN_SECONDS",
                DEFAULT_TOKEN_REFRESH_MARGIN_SECONDS,
            )?),
            jwt_clock_skew,
            spa_callback_path: vars
                .get("SPA_CALLBACK_PATH")
                .cloned()
                .unwrap_or_else(|| DEFAULT_SPA_CALLBACK_PATH.to_string()),
        })
    }

    /// Redirect URI registered for the JSON callback.
    pub fn callback_url(&self) -> String {
        format!("{}/auth/callback", self.base_url)
    }

    /// Redirect URI registered for the browser-app callback.
    pub fn spa_callback_url(&self) -> String {
        format!("{}/auth/spaCallback", self.base_url)
    }
}

fn invalid(name: &str, reason: String) -> ConfigError {
    ConfigError::InvalidValue {
        name: name.to_string(),
        reason,
    }
}

fn required(vars: &HashMap<String, String>, name: &str) -> Result<String, ConfigError> {
    let value = vars
        .get(name)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ConfigError::MissingEnvVar(name.to_string()))?;
    if value.eq_ignore_ascii_case(PLACEHOLDER_VALUE) {
        return Err(ConfigError::PlaceholderValue(name.to_string()));
    }
    Ok(value.clone())
}

fn parse_or<T>(vars: &HashMap<String, String>, name: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: fmt::Display,
{
    match vars.get(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| invalid(name, format!("'{raw}': {e}"))),
        None => Ok(default),
    }
}

fn parse_positive(
    vars: &HashMap<String, String>,
    name: &str,
    default: u64,
) -> Result<u64, ConfigError> {
    let value = parse_or(vars, name, default)?;
    if value == 0 {
        return Err(invalid(name, "must be greater than 0".to_string()));
    }
    Ok(value)
}

fn parse_flag(vars: &HashMap<String, String>, name: &str) -> Result<bool, ConfigError> {
    match vars.get(name).map(|v| v.trim()) {
        None | Some("0") | Some("") => Ok(false),
        Some("1") => Ok(true),
        Some(other) => Err(invalid(name, format!("expected 0 or 1, got '{other}'"))),
    }
}
