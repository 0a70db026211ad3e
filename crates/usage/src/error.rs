#![forbid(unsafe_code)]

/// Represents all possible errors that can occur in this crate.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// Usage access has not been granted. The caller must gate on it.
    #[error("usage access permission is missing")]
    PermissionMissing,

    /// A single package could not be looked up; the pass skips it.
    #[error("failed to look up {package}: {reason}")]
    Lookup { package: String, reason: String },

    /// A persisted status string is not one we know.
    #[error("unknown app status: {0}")]
    InvalidStatus(String),
}
