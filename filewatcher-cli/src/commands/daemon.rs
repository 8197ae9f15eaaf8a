//! `filewatcher run|status|stop` — watcher lifecycle.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;

use filewatcher_daemon::paths::WATCH_DIR;
use filewatcher_daemon::{
    start_blocking, AgentOptions, ControlClient, DaemonError, Identity, OutboxTransport,
};

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Directory polled for matching files.
    #[arg(long, default_value = WATCH_DIR)]
    pub watch_dir: PathBuf,

    /// YAML or JSON file with the full desired state applied at startup.
    #[arg(long)]
    pub desired: Option<PathBuf>,

    /// Upper bound on a single telemetry send.
    #[arg(long, default_value_t = 30_000)]
    pub send_timeout_ms: u64,

    /// Device identifier, logged at startup.
    #[arg(long, env = Identity::DEVICE_ID_ENV)]
    pub device_id: Option<String>,

    /// Module identifier, logged at startup.
    #[arg(long, env = Identity::MODULE_ID_ENV)]
    pub module_id: Option<String>,
}

impl RunArgs {
    pub fn run(self, state_dir: &Path) -> Result<()> {
        let mut options = AgentOptions::new(state_dir);
        options.watch_dir = self.watch_dir;
        options.desired_snapshot = self.desired;
        options.send_timeout = Duration::from_millis(self.send_timeout_ms);
        options.identity = Identity {
            device_id: self.device_id,
            module_id: self.module_id,
        };

        let transport = Arc::new(OutboxTransport::new(state_dir));
        start_blocking(options, transport).context("watcher exited with error")
    }
}

pub fn status(state_dir: &Path) -> Result<()> {
    let client = ControlClient::new(state_dir);
    let payload = match client.status() {
        Ok(report) => serde_json::to_value(report).context("failed to encode status")?,
        Err(DaemonError::DaemonNotRunning { .. }) => serde_json::json!({
            "running": false,
            "socket": client.socket().display().to_string(),
        }),
        Err(err) => return Err(err).context("failed to query watcher status"),
    };
    println!(
        "{}",
        serde_json::to_string_pretty(&payload).context("failed to render status JSON")?
    );
    Ok(())
}

pub fn stop(state_dir: &Path) -> Result<()> {
    match ControlClient::new(state_dir).stop() {
        Ok(_) => println!("watcher stop requested"),
        Err(DaemonError::DaemonNotRunning { .. }) => println!("watcher is not running"),
        Err(err) => return Err(err).context("failed to stop watcher"),
    }
    Ok(())
}
