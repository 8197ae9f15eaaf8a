//! Shared configuration state.
//!
//! [`ConfigState`] is the only mutable state shared between the poller and
//! the desired-state handler. Each field is written under its own short lock;
//! readers take a whole-struct [`ConfigState::snapshot`] at the top of a tick
//! and never re-read mid-tick.

use std::sync::{Arc, PoisonError, RwLock};

use crate::desired::DesiredUpdate;
use crate::types::ReportedPatch;

pub const DEFAULT_INTERVAL_MS: i64 = 10_000;
pub const DEFAULT_SEARCH_PATTERN: &str = "*.txt";
pub const DEFAULT_RENAME_SUFFIX: &str = ".old";

/// The three tunable parameters.
///
/// Values are stored exactly as received; zero/negative intervals and empty
/// patterns are not rejected here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatcherConfig {
    pub interval_ms: i64,
    pub search_pattern: String,
    pub rename_suffix: String,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_INTERVAL_MS,
            search_pattern: DEFAULT_SEARCH_PATTERN.to_string(),
            rename_suffix: DEFAULT_RENAME_SUFFIX.to_string(),
        }
    }
}

/// Cloneable handle to the process-wide configuration.
#[derive(Debug, Clone, Default)]
pub struct ConfigState {
    inner: Arc<RwLock<WatcherConfig>>,
}

impl ConfigState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: WatcherConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(config)),
        }
    }

    pub fn snapshot(&self) -> WatcherConfig {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Set the poll interval; `None` restores the default. Returns the value in effect.
    pub fn set_interval(&self, interval_ms: Option<i64>) -> i64 {
        let value = interval_ms.unwrap_or(DEFAULT_INTERVAL_MS);
        self.write(|config| config.interval_ms = value);
        value
    }

    /// Set the search glob; `None` restores the default. Returns the value in effect.
    pub fn set_search_pattern(&self, pattern: Option<String>) -> String {
        let value = pattern.unwrap_or_else(|| DEFAULT_SEARCH_PATTERN.to_string());
        self.write(|config| config.search_pattern = value.clone());
        value
    }

    /// Set the rename suffix; `None` restores the default. Returns the value in effect.
    pub fn set_rename_suffix(&self, suffix: Option<String>) -> String {
        let value = suffix.unwrap_or_else(|| DEFAULT_RENAME_SUFFIX.to_string());
        self.write(|config| config.rename_suffix = value.clone());
        value
    }

    /// Apply a desired update key by key and return the patch to report.
    ///
    /// Absent keys are left alone and omitted from the patch. Explicit nulls
    /// reset to defaults and report the default.
    pub fn apply(&self, update: DesiredUpdate) -> ReportedPatch {
        let mut patch = ReportedPatch::default();

        match update.interval.into_setter_arg() {
            Some(value) => {
                let interval = self.set_interval(value);
                tracing::info!(interval, "interval changed");
                patch.interval = Some(interval);
            }
            None => tracing::debug!("interval ignored"),
        }

        match update.rename_extension.into_setter_arg() {
            Some(value) => {
                let suffix = self.set_rename_suffix(value);
                tracing::info!(rename_extension = %suffix, "rename extension changed");
                patch.rename_extension = Some(suffix);
            }
            None => tracing::debug!("rename extension ignored"),
        }

        match update.search_pattern.into_setter_arg() {
            Some(value) => {
                let pattern = self.set_search_pattern(value);
                tracing::info!(search_pattern = %pattern, "search pattern changed");
                patch.search_pattern = Some(pattern);
            }
            None => tracing::debug!("search pattern ignored"),
        }

        patch
    }

    fn write(&self, mutate: impl FnOnce(&mut WatcherConfig)) {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        mutate(&mut guard);
    }
}
