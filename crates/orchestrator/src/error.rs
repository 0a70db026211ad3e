#![forbid(unsafe_code)]

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("usage error: {0}")]
    Usage(#[from] usage::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("sqlx error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("tunnel error: {0}")]
    Tunnel(String),

    #[error("duration must be positive")]
    InvalidDuration,
}

impl Error {
    /// Whether this is the missing usage-access precondition.
    pub fn is_permission_missing(&self) -> bool {
        matches!(self, Error::Usage(usage::Error::PermissionMissing))
    }
}
