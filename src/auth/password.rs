//! Credential hashing.
//!
//! The service only depends on [`CredentialHasher`]; Argon2id is the default primitive.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};

use crate::config::AuthConfig;
use crate::error::AppError;
use crate::Result;

pub trait CredentialHasher: Send + Sync {
    /// Hash a raw credential into a self-describing string.
    fn hash(&self, raw: &str) -> Result<String>;

    /// `Ok(false)` on mismatch; `Err` only when the stored hash is unusable.
    fn verify(&self, raw: &str, hash: &str) -> Result<bool>;
}

#[derive(Debug, Clone)]
pub struct Argon2Hasher {
    params: Params,
}

impl Argon2Hasher {
    pub fn new(memory_kib: u32, iterations: u32) -> Result<Self> {
        let params = Params::new(memory_kib, iterations, 1, None)
            .map_err(|e| AppError::ConfigError(format!("Invalid argon2 parameters: {}", e)))?;
        Ok(Self { params })
    }

    pub fn from_config(config: &AuthConfig) -> Result<Self> {
        Self::new(config.hash_memory_kib, config.hash_iterations)
    }

    fn argon2(&self) -> Argon2<'static> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }
}

impl Default for Argon2Hasher {
    fn default() -> Self {
        Self { params: Params::default() }
    }
}

impl CredentialHasher for Argon2Hasher {
    fn hash(&self, raw: &str) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2()
            .hash_password(raw.as_bytes(), &salt)
            .map_err(|e| AppError::InternalError(format!("Credential hashing failed: {}", e)))?;
        Ok(hash.to_string())
    }

    fn verify(&self, raw: &str, hash: &str) -> Result<bool> {
        let parsed = PasswordHash::new(hash)
            .map_err(|e| AppError::InternalError(format!("Stored credential hash unreadable: {}", e)))?;
        // Parameters embedded in the PHC string win over `self.params`.
        Ok(self.argon2().verify_password(raw.as_bytes(), &parsed).is_ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hasher() -> Argon2Hasher {
        Argon2Hasher::new(64, 1).unwrap()
    }

    #[test]
    fn test_hash_and_verify() {
        let hasher = hasher();
        let hash = hasher.hash("secret1").unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(hasher.verify("secret1", &hash).unwrap());
        assert!(!hasher.verify("secret2", &hash).unwrap());
    }

    #[test]
    fn test_different_hashes_for_same_credential() {
        let hasher = hasher();
        let h1 = hasher.hash("secret1").unwrap();
        let h2 = hasher.hash("secret1").unwrap();
        assert_ne!(h1, h2);
        assert!(hasher.verify("secret1", &h1).unwrap());
        assert!(hasher.verify("secret1", &h2).unwrap());
    }

    #[test]
    fn test_unreadable_hash_is_an_error() {
        assert!(hasher().verify("secret1", "plaintext-password").is_err());
    }

    #[test]
    fn test_invalid_params_rejected() {
        assert!(matches!(Argon2Hasher::new(0, 0), Err(AppError::ConfigError(_))));
    }
}
