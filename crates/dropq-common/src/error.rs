//! Error types shared across dropq crates

use thiserror::Error;

/// Result type alias for shared utilities
pub type Result<T> = std::result::Result<T, DropqError>;

#[derive(Error, Debug)]
pub enum DropqError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid content hash: {0}")]
    InvalidHash(String),
}
