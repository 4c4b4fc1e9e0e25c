use crate::backend::BackendError;
use crate::types::NodeKind;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the repositories and engines
#[derive(Debug, Error)]
pub enum TrackerError {
    /// Missing or unusable backend configuration
    #[error("configuration error: {0}")]
    Config(String),

    #[error("{kind} not found: {path}")]
    NotFound { kind: NodeKind, path: String },

    /// Destructive cleanup requested without `--confirm`
    #[error("refusing to delete without --confirm (use --dry-run to preview)")]
    SafetyGate,

    /// Another process holds the per-project lock
    #[error("{0}")]
    Locked(String),

    #[error("invalid name '{0}': names must be non-empty, must not contain ':' or path separators, and must not start with '.'")]
    InvalidName(String),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid JSON in {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

pub type Result<T, E = TrackerError> = std::result::Result<T, E>;

impl TrackerError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        TrackerError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn json(path: impl Into<String>, source: serde_json::Error) -> Self {
        TrackerError::Json {
            path: path.into(),
            source,
        }
    }
}
