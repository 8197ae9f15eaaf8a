//! Directory poller: the daemon's single steady-state loop.
//!
//! Each tick snapshots the configuration, lists the watch directory, and
//! hands every match to [`crate::gate::dispatch_file`] one at a time. Files
//! are visited in path order; that order is a convenience for readable
//! logs, not a guarantee.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use globset::{Glob, GlobMatcher};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, RwLock};

use filewatcher_core::{ConfigState, WatcherConfig};

use crate::error::{io_err, DaemonError};
use crate::gate::{dispatch_file, FileOutcome};
use crate::paths::MIN_POLL_INTERVAL;
use crate::transport::Transport;

/// Counters for one completed tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickSummary {
    pub seen: usize,
    pub claimed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub search_pattern: String,
    pub finished_at: DateTime<Utc>,
}

pub fn compile_pattern(pattern: &str) -> Result<GlobMatcher, DaemonError> {
    Glob::new(pattern)
        .map(|glob| glob.compile_matcher())
        .map_err(|source| DaemonError::Pattern {
            pattern: pattern.to_string(),
            source,
        })
}

/// Non-recursive listing of files in `dir` whose name matches `pattern`.
///
/// An empty pattern matches nothing, but the directory is still read so a
/// missing watch directory is reported the same way.
pub fn list_matches(dir: &Path, pattern: &str) -> Result<Vec<PathBuf>, DaemonError> {
    let entries = fs::read_dir(dir).map_err(|e| io_err(dir, e))?;
    if pattern.is_empty() {
        return Ok(Vec::new());
    }
    let matcher = compile_pattern(pattern)?;

    let mut matches = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| io_err(dir, e))?;
        let ty = entry.file_type().map_err(|e| io_err(entry.path(), e))?;
        if ty.is_dir() {
            continue;
        }
        if matcher.is_match(entry.file_name()) {
            matches.push(entry.path());
        }
    }
    matches.sort();
    Ok(matches)
}

/// Sleep between ticks for a configured interval.
///
/// Zero, negative and very small intervals are floored at
/// [`MIN_POLL_INTERVAL`]; the stored configuration keeps the raw value.
pub fn sleep_duration(interval_ms: i64) -> Duration {
    let requested = u64::try_from(interval_ms)
        .map(Duration::from_millis)
        .unwrap_or(Duration::ZERO);
    if requested < MIN_POLL_INTERVAL {
        tracing::warn!(
            interval_ms,
            min_interval_ms = MIN_POLL_INTERVAL.as_millis() as u64,
            "configured interval is below the minimum, sleeping for the minimum instead",
        );
        MIN_POLL_INTERVAL
    } else {
        requested
    }
}

/// Everything a tick needs. Cheap to clone.
#[derive(Clone)]
pub struct Poller {
    watch_dir: PathBuf,
    config: ConfigState,
    transport: Arc<dyn Transport>,
    send_timeout: Duration,
}

impl Poller {
    pub fn new(
        watch_dir: impl Into<PathBuf>,
        config: ConfigState,
        transport: Arc<dyn Transport>,
        send_timeout: Duration,
    ) -> Self {
        Self {
            watch_dir: watch_dir.into(),
            config,
            transport,
            send_timeout,
        }
    }

    pub fn watch_dir(&self) -> &Path {
        &self.watch_dir
    }

    /// Run one tick against a fresh configuration snapshot.
    pub async fn tick(&self) -> TickSummary {
        let config = self.config.snapshot();
        self.tick_with(&config).await
    }

    async fn tick_with(&self, config: &WatcherConfig) -> TickSummary {
        let dir = self.watch_dir.clone();
        let pattern = config.search_pattern.clone();
        let listed = tokio::task::spawn_blocking(move || list_matches(&dir, &pattern))
            .await
            .map_err(|source| DaemonError::Join {
                task: "directory listing",
                source,
            })
            .and_then(|result| result);

        let files = match listed {
            Ok(files) => files,
            Err(err) => {
                tracing::warn!(
                    watch_dir = %self.watch_dir.display(),
                    error = %err,
                    "directory listing failed, treating as empty",
                );
                Vec::new()
            }
        };

        tracing::info!(
            count = files.len(),
            search_pattern = %config.search_pattern,
            "seen files",
        );

        let mut summary = TickSummary {
            seen: files.len(),
            claimed: 0,
            skipped: 0,
            failed: 0,
            search_pattern: config.search_pattern.clone(),
            finished_at: Utc::now(),
        };

        for path in files {
            match dispatch_file(
                &path,
                &config.rename_suffix,
                self.transport.as_ref(),
                self.send_timeout,
            )
            .await
            {
                Ok(FileOutcome::Claimed { .. }) => summary.claimed += 1,
                Ok(FileOutcome::Skipped { .. }) => summary.skipped += 1,
                Err(err) => {
                    tracing::error!(
                        path = %path.display(),
                        error = %err,
                        "file hand-off failed, will retry next tick",
                    );
                    summary.failed += 1;
                }
            }
        }

        summary.finished_at = Utc::now();
        summary
    }

    /// Tick until shutdown is signalled.
    ///
    /// Shutdown is checked before each tick and raced against the sleep; an
    /// in-flight tick finishes before the loop exits.
    pub async fn run(
        self,
        last_tick: Arc<RwLock<Option<TickSummary>>>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<(), DaemonError> {
        loop {
            match shutdown_rx.try_recv() {
                Err(broadcast::error::TryRecvError::Empty) => {}
                _ => break,
            }

            let config = self.config.snapshot();
            let summary = self.tick_with(&config).await;
            *last_tick.write().await = Some(summary);

            let pause = sleep_duration(config.interval_ms);
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                _ = tokio::time::sleep(pause) => {}
            }
        }

        tracing::info!("poller stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryTransport;
    use tempfile::TempDir;

    #[test]
    fn list_matches_filters_by_file_name_and_skips_directories() {
        let dir = TempDir::new().expect("tempdir");
        for name in ["a.txt", "b.txt", "a.txt.old", "notes.md"] {
            fs::write(dir.path().join(name), b"x").expect("write");
        }
        fs::create_dir(dir.path().join("nested.txt")).expect("mkdir");

        let names: Vec<String> = list_matches(dir.path(), "*.txt")
            .expect("list")
            .iter()
            .filter_map(|p| p.file_name().and_then(|n| n.to_str()).map(str::to_owned))
            .collect();
        assert_eq!(names, vec!["a.txt".to_string(), "b.txt".to_string()]);
    }

    #[test]
    fn empty_pattern_matches_nothing() {
        let dir = TempDir::new().expect("tempdir");
        fs::write(dir.path().join("a.txt"), b"x").expect("write");
        assert!(list_matches(dir.path(), "").expect("list").is_empty());
    }

    #[test]
    fn missing_directory_is_an_io_error() {
        let dir = TempDir::new().expect("tempdir");
        let err = list_matches(&dir.path().join("exchange"), "*.txt").expect_err("missing dir");
        assert!(matches!(err, DaemonError::Io { .. }));
    }

    #[test]
    fn invalid_glob_is_a_pattern_error() {
        let dir = TempDir::new().expect("tempdir");
        let err = list_matches(dir.path(), "[unterminated").expect_err("bad glob");
        assert!(matches!(err, DaemonError::Pattern { .. }));
    }

    #[test]
    fn sleep_duration_floors_small_and_negative_intervals() {
        assert_eq!(sleep_duration(10_000), Duration::from_secs(10));
        assert_eq!(sleep_duration(0), MIN_POLL_INTERVAL);
        assert_eq!(sleep_duration(-250), MIN_POLL_INTERVAL);
        assert_eq!(sleep_duration(1), MIN_POLL_INTERVAL);
    }

    #[tokio::test]
    async fn tick_on_missing_directory_reports_zero_files() {
        let dir = TempDir::new().expect("tempdir");
        let poller = Poller::new(
            dir.path().join("exchange"),
            ConfigState::new(),
            Arc::new(MemoryTransport::new()),
            Duration::from_secs(5),
        );

        let summary = poller.tick().await;
        assert_eq!(summary.seen, 0);
        assert_eq!(summary.failed, 0);
    }

    #[tokio::test]
    async fn tick_uses_current_pattern_and_suffix() {
        let dir = TempDir::new().expect("tempdir");
        fs::write(dir.path().join("a.txt"), b"1").expect("write");
        fs::write(dir.path().join("b.csv"), b"22").expect("write");

        let config = ConfigState::new();
        config.set_search_pattern(Some("*.csv".to_string()));
        config.set_rename_suffix(Some(".done".to_string()));
        let transport = MemoryTransport::new();
        let poller = Poller::new(
            dir.path(),
            config,
            Arc::new(transport.clone()),
            Duration::from_secs(5),
        );

        let summary = poller.tick().await;
        assert_eq!(summary.seen, 1);
        assert_eq!(summary.claimed, 1);
        assert!(dir.path().join("b.csv.done").exists());
        assert!(dir.path().join("a.txt").exists());
        assert_eq!(transport.payloads()[0].filesize, 2);
    }

    #[tokio::test]
    async fn run_exits_when_shutdown_was_already_signalled() {
        let dir = TempDir::new().expect("tempdir");
        let transport = MemoryTransport::new();
        fs::write(dir.path().join("a.txt"), b"1").expect("write");
        let poller = Poller::new(
            dir.path(),
            ConfigState::new(),
            Arc::new(transport.clone()),
            Duration::from_secs(5),
        );
        let (shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);
        shutdown_tx.send(()).expect("signal");

        let last_tick = Arc::new(RwLock::new(None));
        poller
            .run(last_tick.clone(), shutdown_rx)
            .await
            .expect("run");

        assert!(last_tick.read().await.is_none(), "no tick after shutdown");
        assert_eq!(transport.send_attempts(), 0);
    }
}
