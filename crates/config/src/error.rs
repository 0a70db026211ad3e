#![forbid(unsafe_code)]

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to load config: {0}")]
    Figment(#[from] Box<figment::Error>),

    #[error("failed to parse TOML: {0}")]
    TomlDe(#[from] toml_edit::de::Error),

    #[error("failed to serialize TOML: {0}")]
    TomlSer(#[from] toml_edit::ser::Error),

    #[error("invalid path: {0}")]
    InvalidPath(PathBuf),
}

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}
