//! Password hashing collaborator.
//!
//! Hashing is CPU-bound, so every call runs on the blocking pool and never
//! stalls a consumer loop.

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{
    PasswordHash, PasswordHasher as _, PasswordVerifier, SaltString,
};
use argon2::{Algorithm, Argon2, Params, Version};
use async_trait::async_trait;

/// Errors from hashing or verifying a password.
#[derive(Debug, thiserror::Error)]
pub enum PasswordError {
    #[error("Password hashing failed: {0}")]
    Hash(String),

    #[error("Stored password digest is malformed: {0}")]
    MalformedDigest(String),

    #[error("Hashing task failed: {0}")]
    Task(String),
}

/// Hash and compare passwords.
#[async_trait]
pub trait PasswordHasher: Send + Sync {
    /// Digest for `plain`, as a PHC string.
    async fn hash(&self, plain: &str) -> Result<String, PasswordError>;

    /// Whether `plain` matches `digest`.
    async fn verify(&self, plain: &str, digest: &str) -> Result<bool, PasswordError>;
}

/// Argon2id hasher.
#[derive(Debug, Clone, Default)]
pub struct Argon2Hasher {
    params: Params,
}

impl Argon2Hasher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Minimal-cost parameters. Digests still verify with any hasher.
    pub fn fast() -> Self {
        Self {
            params: Params::new(Params::MIN_M_COST, Params::MIN_T_COST, 1, None)
                .unwrap_or_default(),
        }
    }

    fn argon2(params: Params) -> Argon2<'static> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
    }
}

#[async_trait]
impl PasswordHasher for Argon2Hasher {
    async fn hash(&self, plain: &str) -> Result<String, PasswordError> {
        let plain = plain.to_owned();
        let params = self.params.clone();

        tokio::task::spawn_blocking(move || {
            let salt = SaltString::generate(&mut OsRng);
            Self::argon2(params)
                .hash_password(plain.as_bytes(), &salt)
                .map(|hash| hash.to_string())
                .map_err(|e| PasswordError::Hash(e.to_string()))
        })
        .await
        .map_err(|e| PasswordError::Task(e.to_string()))?
    }

    async fn verify(&self, plain: &str, digest: &str) -> Result<bool, PasswordError> {
        let plain = plain.to_owned();
        let digest = digest.to_owned();
        let params = self.params.clone();

        tokio::task::spawn_blocking(move || {
            let parsed = PasswordHash::new(&digest)
                .map_err(|e| PasswordError::MalformedDigest(e.to_string()))?;
            match Self::argon2(params).verify_password(plain.as_bytes(), &parsed) {
                Ok(()) => Ok(true),
                Err(argon2::password_hash::Error::Password) => Ok(false),
                Err(e) => Err(PasswordError::Hash(e.to_string())),
            }
        })
        .await
        .map_err(|e| PasswordError::Task(e.to_string()))?
    }
}
