//! HTTP request handlers for the auth service.

pub mod auth_handler;
pub mod health;
pub mod me;
pub mod metrics;

pub use auth_handler::{callback, login, logout, spa_callback, token, SESSION_COOKIE, STATE_COOKIE};
pub use health::health_check;
pub use me::get_me;
pub use metrics::metrics_handler;
