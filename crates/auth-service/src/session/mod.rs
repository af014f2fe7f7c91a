//! Encrypted server-side sessions.
//!
//! The client holds only a signed, time-stamped session id (the
//! `ReqDBSession` cookie). The token bundle lives in a shared cache,
//! AES-256-GCM encrypted under a process-wide key.

pub mod cache;
pub mod record;
pub mod store;

pub use cache::{MemorySessionCache, RedisSessionCache, SessionCache, SessionCacheError};
pub use record::{SessionRecord, TokenUpdate, UserInfo};
pub use store::{Session, SessionStore};
