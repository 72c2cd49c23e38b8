//! Short-lived, secret-keyed one-time passcode.
//!
//! Only the keyed hash and expiry are ever persisted; the plaintext exists
//! in memory at generation time solely for transport to the user.

use crate::domain::error::AuthError;
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

const CODE_LENGTH: usize = 6;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationCode {
    #[serde(skip)]
    code: Option<String>,
    code_hash: String,
    expires_at: DateTime<Utc>,
}

impl VerificationCode {
    pub const DEFAULT_TTL_MINUTES: i64 = 5;

    /// Generate a fresh 6-digit code keyed by `secret`.
    ///
    /// A secret is mandatory: codes must never be generated without a
    /// keying secret.
    pub fn generate(secret: &str, ttl_minutes: i64) -> Result<Self, AuthError> {
        if secret.is_empty() {
            return Err(AuthError::MissingOtpSecret);
        }

        let mut rng = OsRng;
        let code: String = (0..CODE_LENGTH)
            .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
            .collect();
        let code_hash = Self::keyed_hash(&code, secret)?;

        Ok(Self {
            code: Some(code),
            code_hash,
            expires_at: Utc::now() + Duration::minutes(ttl_minutes),
        })
    }

    /// Rebuild a code from its persisted hash and expiry. The plaintext is
    /// gone; only verification is possible.
    pub fn restore(code_hash: String, expires_at: DateTime<Utc>) -> Self {
        Self {
            code: None,
            code_hash,
            expires_at,
        }
    }

    /// True iff the keyed hash of `input` matches the stored hash and the
    /// code has not expired. Pure; clearing the code is the caller's call.
    pub fn verify(&self, input: &str, secret: &str) -> bool {
        let candidate = match Self::keyed_hash(input, secret) {
            Ok(hash) => hash,
            Err(_) => return false,
        };
        let hash_matches: bool = candidate
            .as_bytes()
            .ct_eq(self.code_hash.as_bytes())
            .into();
        hash_matches && Utc::now() < self.expires_at
    }

    /// Plaintext code, available only on a freshly generated instance.
    pub fn plaintext(&self) -> Option<&str> {
        self.code.as_deref()
    }

    pub fn code_hash(&self) -> &str {
        &self.code_hash
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    fn keyed_hash(code: &str, secret: &str) -> Result<String, AuthError> {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|_| AuthError::MissingOtpSecret)?;
        mac.update(code.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }
}
