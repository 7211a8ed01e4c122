use thiserror::Error;

/// Errors that can occur within the scheduler subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Underlying SQLite / rusqlite error (unreadable, unwritable or locked store).
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// The store's directory could not be created.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A persisted row exists but cannot be decoded.
    #[error("Corrupt job record {id}: {reason}")]
    Corrupt { id: String, reason: String },

    /// Job arguments could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The job definition is unusable (e.g. a zero interval).
    #[error("Invalid job: {0}")]
    InvalidJob(String),

    /// An outcome subscriber returned an error or panicked.
    #[error("Subscriber {name} failed: {reason}")]
    Subscriber { name: String, reason: String },
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
