use std::path::{Path, PathBuf};
use std::time::Duration;

/// Watch directory, relative to the process working directory.
pub const WATCH_DIR: &str = "exchange";
/// Named output carrying file telemetry.
pub const OUTPUT_CHANNEL: &str = "output1";

pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(30);
/// Floor applied to the sleep between ticks; the configured value is untouched.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

pub const DAEMON_SOCKET: &str = "daemon.sock";
pub const REPORTED_STATE_FILE: &str = "reported.json";

/// Default state directory under the user's home.
pub fn default_state_dir(home: &Path) -> PathBuf {
    home.join(".filewatcher")
}

pub fn socket_path(state_dir: &Path) -> PathBuf {
    state_dir.join(DAEMON_SOCKET)
}

pub fn outbox_dir(state_dir: &Path) -> PathBuf {
    state_dir.join("outbox")
}

pub fn outbox_path(state_dir: &Path, output: &str) -> PathBuf {
    outbox_dir(state_dir).join(format!("{output}.jsonl"))
}

pub fn reported_state_path(state_dir: &Path) -> PathBuf {
    state_dir.join(REPORTED_STATE_FILE)
}
