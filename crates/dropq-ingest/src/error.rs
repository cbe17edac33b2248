//! Per-file error taxonomy

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use crate::transform::TransformError;

pub type Result<T> = std::result::Result<T, IngestError>;

/// Everything that can stop one file from being delivered.
///
/// None of these escape the orchestrator: each becomes an error-archive outcome.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("filesystem watch error: {0}")]
    Watch(#[from] notify::Error),

    #[error("failed to hash file: {0}")]
    Hash(#[from] dropq_common::DropqError),

    #[error("invalid folder configuration {}: {message}", path.display())]
    Config { path: PathBuf, message: String },

    #[error("no folder configuration found in {}", .0.display())]
    MissingConfig(PathBuf),

    #[error("{count} configuration files found in {}, expected exactly one", dir.display())]
    AmbiguousConfig { dir: PathBuf, count: usize },

    #[error("unknown transform '{name}' configured for field '{field}'")]
    UnknownTransform { name: String, field: String },

    #[error("record {record}: expected {expected} fields, found {found}")]
    Structure {
        record: u64,
        expected: usize,
        found: usize,
    },

    #[error("record {record}: bytes are not valid {encoding}")]
    Decode { record: u64, encoding: &'static str },

    #[error("record {record}: transform '{transform}' failed on field '{field}'")]
    Transform {
        transform: String,
        field: String,
        record: u64,
        #[source]
        source: TransformError,
    },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("worker task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl From<redis::RedisError> for IngestError {
    fn from(err: redis::RedisError) -> Self {
        IngestError::Transport(err.to_string())
    }
}

impl IngestError {
    pub fn config(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        IngestError::Config {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            IngestError::Io(_) | IngestError::Watch(_) | IngestError::Hash(_) => ErrorKind::Io,
            IngestError::Config { .. }
            | IngestError::MissingConfig(_)
            | IngestError::AmbiguousConfig { .. }
            | IngestError::UnknownTransform { .. } => ErrorKind::Configuration,
            IngestError::Structure { .. } => ErrorKind::Structural,
            IngestError::Decode { .. } => ErrorKind::Decode,
            IngestError::Transform { .. } => ErrorKind::Transform,
            IngestError::Transport(_) => ErrorKind::Transport,
            IngestError::Task(_) => ErrorKind::Internal,
        }
    }
}

/// Coarse classification written to error reports and the journal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Io,
    Configuration,
    Structural,
    Decode,
    Transform,
    Transport,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Io => "io",
            ErrorKind::Configuration => "configuration",
            ErrorKind::Structural => "structural",
            ErrorKind::Decode => "decode",
            ErrorKind::Transform => "transform",
            ErrorKind::Transport => "transport",
            ErrorKind::Internal => "internal",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        let err = IngestError::Structure {
            record: 3,
            expected: 2,
            found: 4,
        };
        assert_eq!(err.kind(), ErrorKind::Structural);
        assert_eq!(err.to_string(), "record 3: expected 2 fields, found 4");

        let err = IngestError::AmbiguousConfig {
            dir: PathBuf::from("/in/a"),
            count: 2,
        };
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert_eq!(ErrorKind::Transport.to_string(), "transport");
    }
}
