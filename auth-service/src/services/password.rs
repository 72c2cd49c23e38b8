//! Password hasher port.

use crate::domain::{AuthError, HashedPassword, RawPassword};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHasher as _, SaltString},
    Argon2,
};
use async_trait::async_trait;
use service_core::error::AppError;

#[async_trait]
pub trait PasswordHasher: Send + Sync {
    async fn hash(&self, raw: &RawPassword) -> Result<HashedPassword, AuthError>;
}

/// Argon2id with library defaults; hashing runs on the blocking pool.
pub struct Argon2PasswordHasher;

#[async_trait]
impl PasswordHasher for Argon2PasswordHasher {
    async fn hash(&self, raw: &RawPassword) -> Result<HashedPassword, AuthError> {
        let password = raw.as_str().to_string();
        let hash = tokio::task::spawn_blocking(move || {
            let salt = SaltString::generate(&mut OsRng);
            Argon2::default()
                .hash_password(password.as_bytes(), &salt)
                .map(|h| h.to_string())
                .map_err(|e| anyhow::anyhow!("Failed to hash password: {}", e))
        })
        .await
        .map_err(|e| AuthError::Infrastructure(AppError::InternalError(e.into())))?
        .map_err(|e| AuthError::Infrastructure(AppError::InternalError(e)))?;

        HashedPassword::from_hash(hash)
    }
}

/// Deterministic hasher for tests.
pub struct FakePasswordHasher;

#[async_trait]
impl PasswordHasher for FakePasswordHasher {
    async fn hash(&self, raw: &RawPassword) -> Result<HashedPassword, AuthError> {
        HashedPassword::from_hash(format!("fake-hash::{:0>24}", raw.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn argon2_produces_a_parseable_phc_hash() {
        let raw = RawPassword::new("Str0ng!Pass").unwrap();
        let hash = Argon2PasswordHasher.hash(&raw).await.unwrap();
        assert!(hash.as_str().starts_with("$argon2"));
    }
}
