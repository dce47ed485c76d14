use crate::ProfileId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("invalid profile: {0}")]
    InvalidProfile(ProfileId),
    #[error("io failure: {0}")]
    Io(String),
    #[error("fatal startup failure: {0}")]
    FatalStartup(String),
    #[error("storage error: {0}")]
    Storage(String),
}

impl CoreError {
    pub fn io(context: impl std::fmt::Display, err: std::io::Error) -> Self {
        CoreError::Io(format!("{context}: {err}"))
    }

    /// Whether the error should halt the bootstrap.
    pub fn is_fatal(&self) -> bool {
        matches!(self, CoreError::FatalStartup(_))
    }
}
