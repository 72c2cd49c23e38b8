use service_core::error::AppError;
use thiserror::Error;

/// Domain-level errors, kept distinct from transport/infrastructure
/// failures so callers can map them to the right external response.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid email address")]
    InvalidEmail,

    #[error("Password must be at least 8 characters and contain a letter and a digit")]
    WeakPassword,

    #[error("Invalid password hash")]
    InvalidPasswordHash,

    #[error("OTP secret is not configured")]
    MissingOtpSecret,

    #[error("Invalid or expired verification code")]
    InvalidOtp,

    #[error("User is already verified")]
    AlreadyVerified,

    #[error("User not found")]
    UserNotFound,

    #[error("Email already registered")]
    EmailAlreadyRegistered,

    #[error("User ID already assigned")]
    IdentityAlreadyAssigned,

    #[error("Default client role not found")]
    RoleNotFound,

    #[error(transparent)]
    Infrastructure(#[from] AppError),
}

impl From<sqlx::Error> for AuthError {
    fn from(err: sqlx::Error) -> Self {
        AuthError::Infrastructure(AppError::DatabaseError(err))
    }
}

impl From<serde_json::Error> for AuthError {
    fn from(err: serde_json::Error) -> Self {
        AuthError::Infrastructure(AppError::SerdeError(err))
    }
}
