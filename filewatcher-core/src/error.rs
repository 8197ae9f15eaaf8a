//! Error types for filewatcher-core.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise while reading or applying desired state.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Underlying I/O failure while reading a desired-state snapshot.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Snapshot file could not be parsed as YAML (JSON is a YAML subset).
    #[error("failed to parse desired state at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// Snapshot parsed but could not be converted to a JSON document.
    #[error("desired state JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A recognized key carried a value of the wrong type.
    #[error("invalid value for '{key}': expected {expected}, got {found}")]
    InvalidValue {
        key: &'static str,
        expected: &'static str,
        found: String,
    },
}
