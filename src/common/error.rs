use thiserror::Error;

/// Engine error types
#[derive(Error, Debug)]
pub enum CowError {
    #[error("Key not found")]
    NotFound,

    #[error("Key already exists")]
    AlreadyExists,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Another write transaction is active")]
    Busy,

    #[error("Corrupt database: {0}")]
    Corrupt(String),

    #[error("Database file has been superseded, re-open required")]
    Stale,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CowError {
    pub(crate) fn no_room(needed: usize, available: usize) -> Self {
        CowError::Internal(format!(
            "page overflow: node size {} exceeds available space {}",
            needed, available
        ))
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        CowError::InvalidArgument(msg.into())
    }

    pub(crate) fn corrupt(msg: impl Into<String>) -> Self {
        CowError::Corrupt(msg.into())
    }

    pub(crate) fn internal(msg: impl Into<String>) -> Self {
        CowError::Internal(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, CowError>;
