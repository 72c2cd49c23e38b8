//! Validated value objects for the auth domain.

use crate::domain::error::AuthError;
use serde::{Deserialize, Serialize};
use validator::ValidateEmail;

/// Normalized, format-checked email address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Email(String);

impl Email {
    pub fn new(value: &str) -> Result<Self, AuthError> {
        let normalized = value.trim().to_lowercase();
        if !normalized.validate_email() {
            return Err(AuthError::InvalidEmail);
        }
        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

/// Plaintext password; only ever held in memory on the way to the hasher.
#[derive(Clone)]
pub struct RawPassword(String);

impl RawPassword {
    const MIN_LENGTH: usize = 8;

    pub fn new(value: &str) -> Result<Self, AuthError> {
        let has_letter = value.chars().any(|c| c.is_ascii_alphabetic());
        let has_digit = value.chars().any(|c| c.is_ascii_digit());
        if value.len() < Self::MIN_LENGTH || !has_letter || !has_digit {
            return Err(AuthError::WeakPassword);
        }
        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// Never print the raw password.
impl std::fmt::Debug for RawPassword {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("RawPassword(***)")
    }
}

/// Opaque password hash produced by the hasher port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashedPassword(String);

impl HashedPassword {
    const MIN_LENGTH: usize = 20;

    pub fn from_hash(hash: String) -> Result<Self, AuthError> {
        if hash.len() < Self::MIN_LENGTH {
            return Err(AuthError::InvalidPasswordHash);
        }
        Ok(Self(hash))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}
