use std::{fmt::Debug, sync::Arc};

use argon2::{
    password_hash::{PasswordHash, PasswordHasher as _, PasswordVerifier, SaltString},
    Argon2,
};
use rand::rngs::OsRng;
use tracing::{error, warn};

use crate::config::{HashAlgorithm, PasswordConfig};

/// Turns a plaintext secret into a self-describing digest and checks secrets
/// against stored digests.
pub trait PasswordHasher: Send + Sync + Debug {
    /// Hashes with a fresh salt. Errors must abort the save.
    fn hash(&self, plain: &str) -> anyhow::Result<String>;

    fn verify(&self, plain: &str, digest: &str) -> bool {
        verify_password(plain, digest)
    }
}

#[derive(Debug, Clone)]
pub struct BcryptHasher {
    cost: u32,
}

impl BcryptHasher {
    pub fn new(cost: u32) -> Self {
        Self { cost }
    }
}

impl Default for BcryptHasher {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_BCRYPT_COST)
    }
}

impl PasswordHasher for BcryptHasher {
    fn hash(&self, plain: &str) -> anyhow::Result<String> {
        bcrypt::hash(plain, self.cost).map_err(|e| {
            error!(error = %e, "bcrypt hash error");
            anyhow::anyhow!(e.to_string())
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct Argon2Hasher;

impl PasswordHasher for Argon2Hasher {
    fn hash(&self, plain: &str) -> anyhow::Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = Argon2::default()
            .hash_password(plain.as_bytes(), &salt)
            .map_err(|e| {
                error!(error = %e, "argon2 hash_password error");
                anyhow::anyhow!(e.to_string())
            })?
            .to_string();
        Ok(hash)
    }
}

pub fn hasher_from_config(cfg: &PasswordConfig) -> Arc<dyn PasswordHasher> {
    match cfg.algorithm {
        HashAlgorithm::Bcrypt => Arc::new(BcryptHasher::new(cfg.bcrypt_cost)),
        HashAlgorithm::Argon2 => Arc::new(Argon2Hasher),
    }
}

/// Checks a secret against a digest from either algorithm, picked by the
/// digest prefix. Malformed digests never match.
pub fn verify_password(plain: &str, digest: &str) -> bool {
    if digest.starts_with("$argon2") {
        let parsed = match PasswordHash::new(digest) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "argon2 parse hash error");
                return false;
            }
        };
        return Argon2::default()
            .verify_password(plain.as_bytes(), &parsed)
            .is_ok();
    }

    if digest.starts_with("$2") {
        return match bcrypt::verify(plain, digest) {
            Ok(ok) => ok,
            Err(e) => {
                warn!(error = %e, "bcrypt parse hash error");
                false
            }
        };
    }

    warn!("unrecognised password digest format");
    false
}

/// True when the value looks like a digest this module produced.
pub fn is_digest(value: &str) -> bool {
    ["$argon2", "$2a$", "$2b$", "$2y$"]
        .iter()
        .any(|prefix| value.starts_with(prefix))
}
