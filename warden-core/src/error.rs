use thiserror::Error;

/// Errors that can occur in the warden core library
#[derive(Error, Debug)]
pub enum WardenError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Visit store read or write failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// File I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Relational backend error
    #[error("Database error: {0}")]
    Database(String),

    /// Advisory lock could not be taken or a guard was poisoned
    #[error("Lock error: {0}")]
    Lock(String),

    /// Custom rule construction error
    #[error("Rule error: {0}")]
    Rule(String),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

/// Result type alias using WardenError
pub type Result<T> = std::result::Result<T, WardenError>;

impl From<String> for WardenError {
    fn from(s: String) -> Self {
        WardenError::Other(s)
    }
}

impl From<&str> for WardenError {
    fn from(s: &str) -> Self {
        WardenError::Other(s.to_string())
    }
}

impl From<serde_json::Error> for WardenError {
    fn from(err: serde_json::Error) -> Self {
        WardenError::Serialization(err.to_string())
    }
}

impl From<rusqlite::Error> for WardenError {
    fn from(err: rusqlite::Error) -> Self {
        WardenError::Database(err.to_string())
    }
}

impl From<regex::Error> for WardenError {
    fn from(err: regex::Error) -> Self {
        WardenError::Rule(err.to_string())
    }
}
