//! Deterministic cryptographic fixtures for testing
//!
//! Provides reproducible Ed25519 signing keys with their JWK form, and a
//! fixed session encryption key. All fixtures are deterministic based on
//! seed values.

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use ring::signature::{Ed25519KeyPair, KeyPair};
use serde_json::{json, Value};

/// An Ed25519 signing key published by the mock identity provider.
#[derive(Clone)]
pub struct TestKeypair {
    kid: String,
    pkcs8: Vec<u8>,
    public_key: Vec<u8>,
}

impl std::fmt::Debug for TestKeypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestKeypair").field("kid", &self.kid).finish()
    }
}

impl TestKeypair {
    /// Deterministic keypair: the same seed always yields the same key.
    ///
    /// Two keypairs with different seeds but the same `kid` model a forged
    /// key claiming to be a published one.
    pub fn new(seed: u8, kid: &str) -> Self {
        let seed_bytes = seed_bytes(seed);
        let key_pair = Ed25519KeyPair::from_seed_unchecked(&seed_bytes)
            .expect("fixture seed must produce a valid Ed25519 keypair");

        Self {
            kid: kid.to_string(),
            pkcs8: build_pkcs8_from_seed(&seed_bytes),
            public_key: key_pair.public_key().as_ref().to_vec(),
        }
    }

    pub fn kid(&self) -> &str {
        &self.kid
    }

    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    /// The public key as an OKP JWK.
    pub fn jwk(&self) -> Value {
        json!({
            "kty": "OKP",
            "crv": "Ed25519",
            "alg": "EdDSA",
            "use": "sig",
            "kid": self.kid,
            "x": URL_SAFE_NO_PAD.encode(&self.public_key),
        })
    }

    /// Sign arbitrary JSON claims with this key (`alg=EdDSA`, `kid` set).
    pub fn sign_claims(&self, claims: &Value) -> String {
        let mut header = Header::new(Algorithm::EdDSA);
        header.kid = Some(self.kid.clone());
        let key = EncodingKey::from_ed_der(&self.pkcs8);
        jsonwebtoken::encode(&header, claims, &key).expect("fixture signing must succeed")
    }
}

fn seed_bytes(seed: u8) -> [u8; 32] {
    let mut seed_bytes = [0u8; 32];
    seed_bytes[0] = seed;
    for (i, byte) in seed_bytes.iter_mut().enumerate().skip(1) {
        *byte = seed.wrapping_mul(i as u8).wrapping_add(i as u8);
    }
    seed_bytes
}

/// Build PKCS#8 v1 document from Ed25519 seed
///
/// This is a test-only utility. Production code never holds signing keys.
fn build_pkcs8_from_seed(seed: &[u8; 32]) -> Vec<u8> {
    // SEQUENCE { version INTEGER 0, AlgorithmIdentifier { OID 1.3.101.112 },
    //            OCTET STRING { OCTET STRING seed } }
    let mut pkcs8 = Vec::with_capacity(48);
    pkcs8.extend_from_slice(&[0x30, 0x2e]);
    pkcs8.extend_from_slice(&[0x02, 0x01, 0x00]);
    pkcs8.extend_from_slice(&[0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x70]);
    pkcs8.extend_from_slice(&[0x04, 0x22, 0x04, 0x20]);
    pkcs8.extend_from_slice(seed);
    pkcs8
}

/// Deterministic 32-byte session encryption key.
pub fn test_session_key() -> Vec<u8> {
    (0u8..32).collect()
}

/// [`test_session_key`] in the `SESSION_ENCRYPTION_KEY` encoding.
pub fn test_session_key_b64() -> String {
    STANDARD.encode(test_session_key())
}
