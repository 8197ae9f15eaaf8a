use std::path::PathBuf;

use thiserror::Error;

/// Error surface for the poller, dispatcher, control socket and runtime.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid search pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: globset::Error,
    },

    #[error("configuration error: {0}")]
    Config(#[from] filewatcher_core::ConfigError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("send on '{output}' timed out after {timeout_ms} ms")]
    SendTimeout { output: String, timeout_ms: u128 },

    #[error("claim target already exists: {target}")]
    ClaimTargetExists { target: PathBuf },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{task} task failed to join: {source}")]
    Join {
        task: &'static str,
        #[source]
        source: tokio::task::JoinError,
    },

    #[error("daemon protocol error: {0}")]
    Protocol(String),

    #[error("daemon is not running (socket missing: {socket})")]
    DaemonNotRunning { socket: PathBuf },

    #[error("another daemon is already listening on {socket}")]
    AlreadyRunning { socket: PathBuf },
}

/// Failures reported by a [`crate::Transport`] implementation.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("transport JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("message rejected: {0}")]
    Rejected(String),
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> DaemonError {
    DaemonError::Io {
        path: path.into(),
        source,
    }
}
