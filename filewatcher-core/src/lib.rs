//! Filewatcher core library — configuration state, desired-state updates, domain types.
//!
//! Public API surface:
//! - [`types`] — file records, telemetry payloads, reported-state patches
//! - [`state`] — [`ConfigState`], the shared handle read by the poller
//! - [`desired`] — parsing of desired-state documents into [`DesiredUpdate`]
//! - [`error`] — [`ConfigError`]

pub mod desired;
pub mod error;
pub mod state;
pub mod types;

pub use desired::{Desired, DesiredUpdate};
pub use error::ConfigError;
pub use state::{
    ConfigState, WatcherConfig, DEFAULT_INTERVAL_MS, DEFAULT_RENAME_SUFFIX,
    DEFAULT_SEARCH_PATTERN,
};
pub use types::{DiscoveredFile, ReportedPatch, TelemetryPayload};
