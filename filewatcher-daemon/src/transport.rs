//! Transport collaborator: where telemetry and reported state go.
//!
//! The daemon only talks to the outside world through [`Transport`]. Two
//! implementations ship with the crate:
//!
//! - [`OutboxTransport`] appends messages to JSON-lines files under the state
//!   directory and keeps the merged reported state in `reported.json`.
//! - [`MemoryTransport`] records everything in memory and can be told to
//!   reject sends, for embedding and tests.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::AsyncWriteExt;

use filewatcher_core::{ReportedPatch, TelemetryPayload};

use crate::error::TransportError;
use crate::paths::{outbox_dir, outbox_path, reported_state_path};

pub const CONTENT_TYPE_JSON: &str = "application/json";
pub const CONTENT_ENCODING_UTF8: &str = "utf-8";

/// An outbound message with its content metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub body: String,
    pub content_type: String,
    pub content_encoding: String,
}

impl Message {
    /// Serialize `value` as a UTF-8 JSON message.
    pub fn json<T: Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        Ok(Self {
            body: serde_json::to_string(value)?,
            content_type: CONTENT_TYPE_JSON.to_string(),
            content_encoding: CONTENT_ENCODING_UTF8.to_string(),
        })
    }
}

/// The narrow interface to the cloud-side messaging layer.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one message on a named output. `Ok` means the transport accepted it.
    async fn send_event(&self, output: &str, message: Message) -> Result<(), TransportError>;

    /// Report the configuration keys changed by the latest desired update.
    async fn update_reported(&self, patch: &ReportedPatch) -> Result<(), TransportError>;
}

// ---------------------------------------------------------------------------
// Outbox transport
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
struct OutboxRecord {
    output: String,
    content_type: String,
    content_encoding: String,
    body: Value,
}

/// File-backed transport rooted at a state directory.
#[derive(Debug)]
pub struct OutboxTransport {
    state_dir: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl OutboxTransport {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }
}

#[async_trait]
impl Transport for OutboxTransport {
    async fn send_event(&self, output: &str, message: Message) -> Result<(), TransportError> {
        let record = OutboxRecord {
            output: output.to_string(),
            content_type: message.content_type,
            content_encoding: message.content_encoding,
            body: serde_json::from_str(&message.body)?,
        };
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        let dir = outbox_dir(&self.state_dir);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| TransportError::Io { path: dir, source })?;

        let path = outbox_path(&self.state_dir, output);
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|source| TransportError::Io {
                path: path.clone(),
                source,
            })?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|source| TransportError::Io {
                path: path.clone(),
                source,
            })?;
        file.flush()
            .await
            .map_err(|source| TransportError::Io { path, source })?;
        Ok(())
    }

    async fn update_reported(&self, patch: &ReportedPatch) -> Result<(), TransportError> {
        let _guard = self.write_lock.lock().await;
        let path = reported_state_path(&self.state_dir);

        let mut reported = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => serde_json::from_str::<ReportedPatch>(&raw)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => ReportedPatch::default(),
            Err(source) => return Err(TransportError::Io { path, source }),
        };
        reported.merge(patch);

        tokio::fs::create_dir_all(&self.state_dir)
            .await
            .map_err(|source| TransportError::Io {
                path: self.state_dir.clone(),
                source,
            })?;

        // Write-then-rename so readers never observe a torn file.
        let tmp = PathBuf::from(format!("{}.tmp", path.display()));
        let payload = serde_json::to_vec_pretty(&reported)?;
        tokio::fs::write(&tmp, payload)
            .await
            .map_err(|source| TransportError::Io {
                path: tmp.clone(),
                source,
            })?;
        if let Err(source) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(TransportError::Io { path, source });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Memory transport
// ---------------------------------------------------------------------------

/// One message accepted by a [`MemoryTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentEvent {
    pub output: String,
    pub message: Message,
}

#[derive(Debug, Default)]
struct MemoryInner {
    events: Vec<SentEvent>,
    reported: Vec<ReportedPatch>,
    reject_marker: Option<String>,
    reject_reported: bool,
    attempts: usize,
}

/// In-process transport that records what it is given.
#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every send whose body contains `marker`.
    pub fn reject_sends_containing(&self, marker: impl Into<String>) {
        self.lock().reject_marker = Some(marker.into());
    }

    /// Reject every reported-state update.
    pub fn reject_reported(&self, reject: bool) {
        self.lock().reject_reported = reject;
    }

    pub fn clear_rejections(&self) {
        let mut inner = self.lock();
        inner.reject_marker = None;
        inner.reject_reported = false;
    }

    /// Accepted events, in send order.
    pub fn events(&self) -> Vec<SentEvent> {
        self.lock().events.clone()
    }

    /// Telemetry payloads decoded from accepted events.
    pub fn payloads(&self) -> Vec<TelemetryPayload> {
        self.lock()
            .events
            .iter()
            .filter_map(|event| serde_json::from_str(&event.message.body).ok())
            .collect()
    }

    /// Accepted reported-state patches, in order.
    pub fn reported(&self) -> Vec<ReportedPatch> {
        self.lock().reported.clone()
    }

    /// Number of `send_event` calls, accepted or rejected.
    pub fn send_attempts(&self) -> usize {
        self.lock().attempts
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send_event(&self, output: &str, message: Message) -> Result<(), TransportError> {
        let mut inner = self.lock();
        inner.attempts += 1;
        if let Some(marker) = &inner.reject_marker {
            if message.body.contains(marker.as_str()) {
                return Err(TransportError::Rejected(format!(
                    "simulated rejection for message containing '{marker}'"
                )));
            }
        }
        inner.events.push(SentEvent {
            output: output.to_string(),
            message,
        });
        Ok(())
    }

    async fn update_reported(&self, patch: &ReportedPatch) -> Result<(), TransportError> {
        let mut inner = self.lock();
        if inner.reject_reported {
            return Err(TransportError::Rejected(
                "simulated reported-state rejection".to_string(),
            ));
        }
        inner.reported.push(patch.clone());
        Ok(())
    }
}
