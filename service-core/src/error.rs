use thiserror::Error;

/// Infrastructure-level error shared across the workspace.
///
/// Domain crates define their own error enums and convert into `AppError`
/// at the service boundary, keeping state-conflict errors distinguishable
/// from transport failures.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    ConfigError(#[from] config::ConfigError),

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),

    #[error("Message bus error: {0}")]
    BusError(String),

    #[error("Job queue error: {0}")]
    QueueError(String),

    #[error("Email error: {0}")]
    EmailError(String),

    #[error("Serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Internal server error: {0}")]
    InternalError(#[from] anyhow::Error),
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::InternalError(anyhow::Error::new(err))
    }
}

impl From<async_nats::ConnectError> for AppError {
    fn from(err: async_nats::ConnectError) -> Self {
        AppError::BusError(err.to_string())
    }
}
