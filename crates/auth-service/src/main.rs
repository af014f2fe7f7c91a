//! ReqDB Auth Service
//!
//! Entry point for the ReqDB authentication gateway: OIDC login against the
//! configured identity provider, encrypted session storage and bearer
//! token enforcement for the API routes.

use auth_service::auth::{KeyStore, TokenValidator};
use auth_service::config::{Config, SessionBackend};
use auth_service::crypto::SessionCipher;
use auth_service::middleware::AccessController;
use auth_service::observability::metrics::init_metrics_recorder;
use auth_service::repositories::{
    InMemoryAuditRecorder, InMemoryUserDirectory, PgAuditRecorder, PgUserDirectory,
};
use auth_service::routes::{self, AppState};
use auth_service::services::provisioner::{AuditRecorder, UserDirectory};
use auth_service::services::{AuthService, IdentityProviderClient, ProviderMetadata, UserProvisioner};
use auth_service::session::{MemorySessionCache, RedisSessionCache, SessionCache, SessionStore};
use common::secret::ExposeSecret;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing, JSON lines when LOG_FORMAT=json
    let json_logs = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "auth_service=debug,tower_http=debug".into()),
        )
        .with(json_logs.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json_logs).then(tracing_subscriber::fmt::layer))
        .init();

    info!("Starting ReqDB Auth Service");

    // Load configuration
    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        bind_address = %config.bind_address,
        base_url = %config.base_url,
        session_backend = ?config.session_backend,
        "Configuration loaded successfully"
    );

    let metrics_handle = init_metrics_recorder().map_err(|e| {
        error!("Failed to initialize metrics: {}", e);
        e
    })?;

    // Identity provider
    let http_client = IdentityProviderClient::http_client(config.idp_timeout)?;
    let metadata = ProviderMetadata::discover(&http_client, &config.oauth_discovery_url)
        .await
        .map_err(|e| {
            error!("Identity provider discovery failed: {}", e);
            e
        })?;

    let key_store = Arc::new(KeyStore::with_client(
        metadata.jwks_uri.clone(),
        http_client.clone(),
    ));
    if let Err(e) = key_store.refresh().await {
        // Keys are fetched on demand by the first token that needs them.
        warn!("Initial JWKS fetch failed: {}", e);
    }

    let validator = Arc::new(TokenValidator::new(
        key_store,
        metadata.issuer.clone(),
        config.oauth_client_id.clone(),
        config.jwt_clock_skew,
    ));

    let provider = IdentityProviderClient::new(
        http_client,
        metadata,
        config.oauth_client_id.clone(),
        config.oauth_client_secret.clone(),
        config.oauth_scope.clone(),
    );

    // Session storage
    let cipher = match &config.session_encryption_key {
        Some(key) => SessionCipher::from_base64(key)?,
        None => {
            warn!("SESSION_ENCRYPTION_KEY not set, generated a per-process key; sessions will not survive a restart");
            SessionCipher::generate()?
        }
    };

    let cache: Arc<dyn SessionCache> = match config.session_backend {
        SessionBackend::Redis => {
            let redis = config
                .redis
                .as_ref()
                .ok_or("Redis session backend selected without Redis settings")?;
            info!(host = %redis.host, port = redis.port, db = redis.db, "Connecting to Redis...");
            let cache = RedisSessionCache::connect(redis.connection_url().expose_secret())
                .await
                .map_err(|e| {
                    error!("Failed to connect to Redis: {}", e);
                    e
                })?;
            info!("Redis connection established");
            Arc::new(cache)
        }
        SessionBackend::Memory => {
            warn!("Using in-memory session cache; sessions are local to this process");
            Arc::new(MemorySessionCache::new())
        }
    };

    let sessions = SessionStore::new(
        cache,
        cipher,
        &config.session_secret_key,
        config.session_max_age,
        config.cache_timeout,
    );

    // User and audit persistence
    let (users, audit): (Arc<dyn UserDirectory>, Arc<dyn AuditRecorder>) =
        match &config.database_url {
            Some(database_url) => {
                info!("Connecting to database...");
                let db_pool = sqlx::postgres::PgPoolOptions::new()
                    .max_connections(10)
                    .acquire_timeout(Duration::from_secs(5))
                    .connect(database_url)
                    .await
                    .map_err(|e| {
                        error!("Failed to connect to database: {}", e);
                        e
                    })?;
                info!("Database connection established");
                (
                    Arc::new(PgUserDirectory::new(db_pool.clone())),
                    Arc::new(PgAuditRecorder::new(db_pool)),
                )
            }
            None => {
                warn!("DATABASE_URL not set; provisioned users and audit records are kept in memory");
                (
                    Arc::new(InMemoryUserDirectory::new()),
                    Arc::new(InMemoryAuditRecorder::new()),
                )
            }
        };

    let auth = Arc::new(AuthService::new(
        &config,
        sessions,
        Arc::clone(&validator),
        provider,
        UserProvisioner::new(users, audit),
    ));

    // Routes
    let access = Arc::new(AccessController::new(routes::default_policies()?, validator));
    let state = Arc::new(AppState {
        auth,
        metrics_handle,
    });
    let app = routes::build_routes(state, access).map_err(|e| {
        error!("Route policy check failed: {}", e);
        e
    })?;

    let addr: SocketAddr = config.bind_address.parse().map_err(|e| {
        error!("Invalid bind address: {}", e);
        e
    })?;

    info!("Auth Service listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Auth Service shutdown complete");

    Ok(())
}

/// Listens for shutdown signals (SIGTERM, SIGINT).
/// Returns when a shutdown signal is received and drain period is complete.
async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received SIGINT, starting graceful shutdown..."),
            Err(e) => error!("Failed to listen for SIGINT: {}", e),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received SIGTERM, starting graceful shutdown...");
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    let drain_secs: u64 = std::env::var("AUTH_DRAIN_SECONDS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(10);

    if drain_secs > 0 {
        warn!("Draining connections for {} seconds...", drain_secs);
        tokio::time::sleep(Duration::from_secs(drain_secs)).await;
        info!("Drain period complete");
    } else {
        info!("Skipping drain period (AUTH_DRAIN_SECONDS=0)");
    }
}
