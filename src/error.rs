//! Application error types and result alias.

use thiserror::Error;

/// Application result type alias
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error types.
#[derive(Error, Debug)]
pub enum AppError {
    /// Missing or malformed operand (empty RPM list, bad URI, bad flag value)
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Manifest absent where one is required
    #[error("repository not initialized: {0}")]
    NotInitialized(String),

    /// SQLite-only metadata, unknown checksum algorithm, etc.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Malformed XML or RPM input
    #[error("parse error: {0}")]
    Parse(String),

    /// Digest or size disagreement between manifest and payload
    #[error("integrity error: {0}")]
    Integrity(String),

    /// NEVRA already present and replacement not permitted
    #[error("duplicate: {0}")]
    Duplicate(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Concurrent manifest change detected (conditional publish lost)
    #[error("conflict: {0}")]
    Conflict(String),

    /// Underlying storage failure
    #[error("storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// External signing tool failure
    #[error("signing error: {0}")]
    Signing(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("operation cancelled")]
    Cancelled,
}
