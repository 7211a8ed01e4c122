use thiserror::Error;

#[derive(Debug, Error)]
pub enum NoipError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    /// No-IP answered, but refused the update.
    #[error("Update failed: {0}")]
    Invocation(String),

    /// The update request never got a usable answer.
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl NoipError {
    /// Short error code string used in log lines.
    pub fn code(&self) -> &'static str {
        match self {
            NoipError::Config(_) => "CONFIG_ERROR",
            NoipError::Storage(_) => "STORAGE_ERROR",
            NoipError::Invocation(_) => "INVOCATION_ERROR",
            NoipError::Http(_) => "HTTP_ERROR",
            NoipError::Io(_) => "IO_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, NoipError>;
