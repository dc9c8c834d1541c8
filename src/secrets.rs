//! Token secret and id generation.
//!
//! Secrets are 32 bytes from the OS CSPRNG, hex encoded. Only a one-way
//! digest is persisted: SHA-256, or HMAC-SHA-256 when a server-side pepper is
//! configured so that a leaked table cannot be checked offline without it.

use std::fmt;

use anyhow::Context;
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::errors::AuthError;

const SECRET_BYTES: usize = 32;
const ID_BYTES: usize = 16;
pub const TOKEN_ID_PREFIX: &str = "token-";

/// Plaintext token secret. Zeroed on drop, redacted in `Debug`.
#[derive(Clone)]
pub struct Secret(Zeroizing<String>);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(Zeroizing::new(value.into()))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(<redacted>)")
    }
}

/// Source of token ids and secrets plus the matching verification digest.
pub trait SecretGenerator: Send + Sync {
    /// Fresh token id.
    fn generate_id(&self) -> Result<String, AuthError>;

    /// Fresh secret and its digest.
    fn generate(&self) -> Result<(Secret, String), AuthError>;

    /// Digest of a candidate secret.
    fn hash(&self, secret: &str) -> String;

    /// Constant-time comparison of `hash(secret)` against a stored digest.
    fn verify(&self, secret: &str, expected_hash: &str) -> bool {
        let computed = self.hash(secret);
        bool::from(computed.as_bytes().ct_eq(expected_hash.as_bytes()))
    }
}

#[derive(Clone)]
enum Hasher {
    Sha256,
    Keyed(Hmac<Sha256>),
}

/// Default generator backed by `OsRng`.
#[derive(Clone)]
pub struct TokenSecrets {
    hasher: Hasher,
}

impl TokenSecrets {
    /// Plain SHA-256 digests.
    pub fn new() -> Self {
        Self {
            hasher: Hasher::Sha256,
        }
    }

    /// HMAC-SHA-256 digests keyed by `pepper`.
    pub fn with_pepper(pepper: &[u8]) -> anyhow::Result<Self> {
        if pepper.is_empty() {
            anyhow::bail!("token hash key must not be empty");
        }
        let mac = Hmac::<Sha256>::new_from_slice(pepper)
            .map_err(|e| anyhow::anyhow!("invalid token hash key: {}", e))?;
        Ok(Self {
            hasher: Hasher::Keyed(mac),
        })
    }

    fn random_hex(len: usize) -> Result<String, AuthError> {
        let mut bytes = Zeroizing::new(vec![0u8; len]);
        OsRng
            .try_fill_bytes(&mut bytes)
            .context("entropy source failed")?;
        Ok(hex::encode(&*bytes))
    }
}

impl Default for TokenSecrets {
    fn default() -> Self {
        Self::new()
    }
}

impl SecretGenerator for TokenSecrets {
    fn generate_id(&self) -> Result<String, AuthError> {
        Ok(format!("{}{}", TOKEN_ID_PREFIX, Self::random_hex(ID_BYTES)?))
    }

    fn generate(&self) -> Result<(Secret, String), AuthError> {
        let secret = Secret::new(Self::random_hex(SECRET_BYTES)?);
        let hash = self.hash(secret.expose());
        Ok((secret, hash))
    }

    fn hash(&self, secret: &str) -> String {
        match &self.hasher {
            Hasher::Sha256 => {
                let mut hasher = Sha256::new();
                hasher.update(secret.as_bytes());
                hex::encode(hasher.finalize())
            }
            Hasher::Keyed(mac) => {
                let mut mac = mac.clone();
                mac.update(secret.as_bytes());
                hex::encode(mac.finalize().into_bytes())
            }
        }
    }
}
