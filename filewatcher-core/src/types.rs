//! Domain types shared by the poller, the dispatcher and the transport.
//!
//! All path fields use `PathBuf`; the telemetry payload carries the path as
//! a display string because that is what goes over the wire.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Discovered files
// ---------------------------------------------------------------------------

/// A file that matched the search pattern and passed the accessibility check.
///
/// Created per tick and consumed immediately by the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredFile {
    /// Absolute form of the listed path. Symlinks are not resolved.
    pub path: PathBuf,
    /// Byte length at check time. Not re-checked before dispatch.
    pub size_bytes: u64,
}

impl DiscoveredFile {
    pub fn payload(&self) -> TelemetryPayload {
        TelemetryPayload::from(self)
    }
}

/// The JSON body sent on the telemetry output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryPayload {
    pub filename: String,
    pub filesize: u64,
}

impl From<&DiscoveredFile> for TelemetryPayload {
    fn from(file: &DiscoveredFile) -> Self {
        Self {
            filename: file.path.display().to_string(),
            filesize: file.size_bytes,
        }
    }
}

// ---------------------------------------------------------------------------
// Reported state
// ---------------------------------------------------------------------------

/// Acknowledgement of the configuration keys changed by one desired update.
///
/// Only keys that were present in the update are set; serialization omits
/// the rest, so `{"interval": 5000}` stays exactly that on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportedPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rename_extension: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_pattern: Option<String>,
}

impl ReportedPatch {
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of keys carried by the patch.
    pub fn len(&self) -> usize {
        usize::from(self.interval.is_some())
            + usize::from(self.rename_extension.is_some())
            + usize::from(self.search_pattern.is_some())
    }

    /// Overlay `newer` on top of `self`, keeping keys `newer` does not carry.
    pub fn merge(&mut self, newer: &ReportedPatch) {
        if let Some(interval) = newer.interval {
            self.interval = Some(interval);
        }
        if let Some(suffix) = &newer.rename_extension {
            self.rename_extension = Some(suffix.clone());
        }
        if let Some(pattern) = &newer.search_pattern {
            self.search_pattern = Some(pattern.clone());
        }
    }
}
