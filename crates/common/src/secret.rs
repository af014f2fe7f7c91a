//! Secret wrappers for values that must never reach a log line.
//!
//! Re-exports [`secrecy`] types. The auth service keeps OAuth client
//! secrets, the session signing secret and raw symmetric key bytes in
//! these wrappers, so deriving `Debug` on any config or state struct that
//! holds them stays safe.
//!
//! Use `SecretString` for:
//! - OAuth client secrets
//! - The session signing secret
//! - Redis passwords
//!
//! Use [`SecretBytes`] for binary key material (the session encryption key).
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! #[derive(Debug)]
//! struct ClientCredentials {
//!     client_id: String,
//!     client_secret: SecretString,
//! }
//!
//! let creds = ClientCredentials {
//!     client_id: "reqdb".to_string(),
//!     client_secret: SecretString::from("s3cr3t"),
//! };
//! assert!(!format!("{creds:?}").contains("s3cr3t"));
//! assert_eq!(creds.client_secret.expose_secret(), "s3cr3t");
//! ```

pub use secrecy::{ExposeSecret, SecretBox, SecretString};

/// Owned binary secret, zeroized on drop.
pub type SecretBytes = SecretBox<Vec<u8>>;

/// Wrap raw key bytes.
#[must_use]
pub fn secret_bytes(bytes: Vec<u8>) -> SecretBytes {
    SecretBox::new(Box::new(bytes))
}
