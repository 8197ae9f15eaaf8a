//! `filewatcher configure` — push desired state to a running watcher.

use std::path::Path;

use anyhow::{bail, Context, Result};
use clap::{Args, ValueEnum};
use serde_json::{Map, Value};

use filewatcher_core::desired::{KEY_INTERVAL, KEY_RENAME_EXTENSION, KEY_SEARCH_PATTERN};
use filewatcher_daemon::ControlClient;

/// A configuration key that can be reset to its default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ConfigKey {
    Interval,
    RenameExtension,
    SearchPattern,
}

impl ConfigKey {
    fn wire_name(self) -> &'static str {
        match self {
            ConfigKey::Interval => KEY_INTERVAL,
            ConfigKey::RenameExtension => KEY_RENAME_EXTENSION,
            ConfigKey::SearchPattern => KEY_SEARCH_PATTERN,
        }
    }
}

#[derive(Args, Debug, Default)]
pub struct ConfigureArgs {
    /// Poll interval in milliseconds.
    #[arg(long, allow_hyphen_values = true)]
    pub interval: Option<i64>,

    /// Glob matched against file names in the watch directory.
    #[arg(long)]
    pub search_pattern: Option<String>,

    /// Suffix appended to claimed files.
    #[arg(long)]
    pub rename_extension: Option<String>,

    /// Reset a key to its default (sends an explicit null). Repeatable.
    #[arg(long, value_enum)]
    pub reset: Vec<ConfigKey>,
}

impl ConfigureArgs {
    pub fn run(self, state_dir: &Path) -> Result<()> {
        let document = self.into_document()?;
        let patch = ControlClient::new(state_dir)
            .push_desired(document)
            .context("failed to push desired state")?;
        println!(
            "{}",
            serde_json::to_string_pretty(&patch).context("failed to render reported patch")?
        );
        Ok(())
    }

    /// Build the desired-state document sent over the control socket.
    pub fn into_document(self) -> Result<Value> {
        let mut document = Map::new();
        if let Some(interval) = self.interval {
            document.insert(KEY_INTERVAL.to_string(), Value::from(interval));
        }
        if let Some(pattern) = self.search_pattern {
            document.insert(KEY_SEARCH_PATTERN.to_string(), Value::from(pattern));
        }
        if let Some(suffix) = self.rename_extension {
            document.insert(KEY_RENAME_EXTENSION.to_string(), Value::from(suffix));
        }

        for key in self.reset {
            let name = key.wire_name();
            if document.contains_key(name) {
                bail!("'{name}' cannot be both set and reset");
            }
            document.insert(name.to_string(), Value::Null);
        }

        if document.is_empty() {
            bail!(
                "nothing to configure; pass --interval, --search-pattern, \
                 --rename-extension or --reset"
            );
        }
        Ok(Value::Object(document))
    }
}
