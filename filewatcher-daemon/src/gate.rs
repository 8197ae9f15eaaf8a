//! File gate and dispatcher.
//!
//! For one candidate path: check that nobody else holds the file, capture
//! its metadata, send the telemetry message, and only after the transport
//! accepted it rename the file with the claim suffix.
//!
//! The listed path is used as-is for both the reported filename and the
//! rename. A symlink in the watch directory is reported and renamed as the
//! link itself; its target is never touched.
//!
//! A failed send leaves the file untouched so the next tick retries it. A
//! failed rename after a successful send also leaves it in place, which can
//! produce a duplicate message on the next tick (at-least-once delivery).

use std::ffi::OsString;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::time::Duration;

use fs2::FileExt;

use filewatcher_core::DiscoveredFile;

use crate::error::{io_err, DaemonError};
use crate::paths::OUTPUT_CHANNEL;
use crate::transport::{Message, Transport};

/// Result of the accessibility check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    /// Opened read/write and exclusively lockable; metadata captured.
    Ready(DiscoveredFile),
    /// Could not be opened or locked (writer still active, vanished, denied).
    Busy { reason: String },
    /// Opened, but is not something we can hand off.
    NotAccessible { reason: String },
}

/// What happened to one candidate file in a tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    /// Sent and renamed; it will no longer match the pattern.
    Claimed {
        file: DiscoveredFile,
        renamed_to: PathBuf,
    },
    /// Not ready this tick; remains a candidate.
    Skipped { path: PathBuf, reason: String },
}

/// Check that `path` can be opened read/write without a lock conflict.
pub fn check_ready(path: &Path) -> Readiness {
    let file = match OpenOptions::new().read(true).write(true).open(path) {
        Ok(file) => file,
        Err(err) => {
            return Readiness::Busy {
                reason: format!("cannot be opened: {err}"),
            }
        }
    };

    if let Err(err) = file.try_lock_exclusive() {
        return Readiness::Busy {
            reason: format!("locked by another handle: {err}"),
        };
    }

    let metadata = file.metadata();
    let _ = FileExt::unlock(&file);
    let metadata = match metadata {
        Ok(metadata) => metadata,
        Err(err) => {
            return Readiness::Busy {
                reason: format!("metadata unavailable: {err}"),
            }
        }
    };

    if !metadata.is_file() {
        return Readiness::NotAccessible {
            reason: "not a regular file".to_string(),
        };
    }

    Readiness::Ready(DiscoveredFile {
        path: absolute_path(path),
        size_bytes: metadata.len(),
    })
}

/// `<original-name><suffix>` in the same directory.
pub fn claim_target(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

/// Check, send and claim a single file.
///
/// Returns `Err` when the send fails or times out (file not renamed) or when
/// the rename fails after a successful send.
pub async fn dispatch_file(
    path: &Path,
    suffix: &str,
    transport: &dyn Transport,
    send_timeout: Duration,
) -> Result<FileOutcome, DaemonError> {
    let candidate = path.to_path_buf();
    let readiness = tokio::task::spawn_blocking(move || check_ready(&candidate))
        .await
        .map_err(|source| DaemonError::Join {
            task: "readiness check",
            source,
        })?;

    let file = match readiness {
        Readiness::Ready(file) => file,
        Readiness::Busy { reason } => {
            tracing::info!(path = %path.display(), %reason, "file not ready, skipping");
            return Ok(FileOutcome::Skipped {
                path: path.to_path_buf(),
                reason,
            });
        }
        Readiness::NotAccessible { reason } => {
            tracing::warn!(path = %path.display(), %reason, "file not readable or writable, skipping");
            return Ok(FileOutcome::Skipped {
                path: path.to_path_buf(),
                reason,
            });
        }
    };

    tracing::info!(
        path = %file.path.display(),
        size_bytes = file.size_bytes,
        "file found",
    );

    let message = Message::json(&file.payload())?;
    let body = message.body.clone();
    send_with_timeout(transport, OUTPUT_CHANNEL, message, send_timeout).await?;
    tracing::info!(output = OUTPUT_CHANNEL, body = %body, "message sent");

    let renamed_to = claim(path, suffix).await?;
    tracing::info!(
        from = %path.display(),
        to = %renamed_to.display(),
        "file renamed",
    );

    Ok(FileOutcome::Claimed { file, renamed_to })
}

async fn send_with_timeout(
    transport: &dyn Transport,
    output: &str,
    message: Message,
    send_timeout: Duration,
) -> Result<(), DaemonError> {
    match tokio::time::timeout(send_timeout, transport.send_event(output, message)).await {
        Ok(result) => result.map_err(DaemonError::from),
        Err(_) => Err(DaemonError::SendTimeout {
            output: output.to_string(),
            timeout_ms: send_timeout.as_millis(),
        }),
    }
}

async fn claim(path: &Path, suffix: &str) -> Result<PathBuf, DaemonError> {
    let target = claim_target(path, suffix);
    if tokio::fs::symlink_metadata(&target).await.is_ok() {
        return Err(DaemonError::ClaimTargetExists { target });
    }
    tokio::fs::rename(path, &target)
        .await
        .map_err(|e| io_err(path, e))?;
    Ok(target)
}

fn absolute_path(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryTransport;
    use std::fs;
    use tempfile::TempDir;

    fn write_file(dir: &TempDir, name: &str, bytes: usize) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, vec![b'x'; bytes]).expect("write candidate");
        path
    }

    #[test]
    fn ready_file_carries_absolute_path_and_size() {
        let dir = TempDir::new().expect("tempdir");
        let path = write_file(&dir, "a.txt", 10);

        match check_ready(&path) {
            Readiness::Ready(file) => {
                assert!(file.path.is_absolute());
                assert_eq!(file.path.file_name().and_then(|n| n.to_str()), Some("a.txt"));
                assert_eq!(file.size_bytes, 10);
            }
            other => panic!("expected Ready, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn symlink_keeps_its_listed_path() {
        let dir = TempDir::new().expect("tempdir");
        let target = write_file(&dir, "real.dat", 7);
        let link = dir.path().join("link.txt");
        std::os::unix::fs::symlink(&target, &link).expect("symlink");

        match check_ready(&link) {
            Readiness::Ready(file) => {
                assert_eq!(file.path, link);
                assert_eq!(file.size_bytes, 7);
            }
            other => panic!("expected Ready, got {other:?}"),
        }
    }

    #[test]
    fn busy_while_another_handle_holds_the_lock() {
        let dir = TempDir::new().expect("tempdir");
        let path = write_file(&dir, "locked.txt", 4);

        let writer = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .expect("open writer");
        writer.lock_exclusive().expect("hold lock");

        assert!(matches!(check_ready(&path), Readiness::Busy { .. }));

        FileExt::unlock(&writer).expect("release lock");
        assert!(matches!(check_ready(&path), Readiness::Ready(_)));
    }

    #[test]
    fn vanished_file_is_busy() {
        let dir = TempDir::new().expect("tempdir");
        assert!(matches!(
            check_ready(&dir.path().join("gone.txt")),
            Readiness::Busy { .. }
        ));
    }

    #[test]
    fn claim_target_appends_suffix_to_full_name() {
        assert_eq!(
            claim_target(Path::new("/data/exchange/a.txt"), ".old"),
            PathBuf::from("/data/exchange/a.txt.old")
        );
    }

    #[tokio::test]
    async fn successful_send_renames_file() {
        let dir = TempDir::new().expect("tempdir");
        let path = write_file(&dir, "a.txt", 10);
        let transport = MemoryTransport::new();

        let outcome = dispatch_file(&path, ".old", &transport, Duration::from_secs(5))
            .await
            .expect("dispatch");

        let FileOutcome::Claimed { file, renamed_to } = outcome else {
            panic!("expected claim");
        };
        assert_eq!(file.size_bytes, 10);
        assert!(renamed_to.ends_with("a.txt.old"));
        assert!(!path.exists());
        assert!(dir.path().join("a.txt.old").exists());

        let events = transport.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].output, "output1");
        assert_eq!(events[0].message.content_type, "application/json");
    }

    #[tokio::test]
    async fn rejected_send_leaves_file_in_place() {
        let dir = TempDir::new().expect("tempdir");
        let path = write_file(&dir, "b.txt", 20);
        let transport = MemoryTransport::new();
        transport.reject_sends_containing("b.txt");

        let err = dispatch_file(&path, ".old", &transport, Duration::from_secs(5))
            .await
            .expect_err("send must fail");
        assert!(matches!(err, DaemonError::Transport(_)));
        assert!(path.exists());
        assert!(!dir.path().join("b.txt.old").exists());
    }

    #[tokio::test]
    async fn existing_claim_target_is_an_error_after_send() {
        let dir = TempDir::new().expect("tempdir");
        let path = write_file(&dir, "c.txt", 3);
        write_file(&dir, "c.txt.old", 1);
        let transport = MemoryTransport::new();

        let err = dispatch_file(&path, ".old", &transport, Duration::from_secs(5))
            .await
            .expect_err("rename must fail");
        assert!(matches!(err, DaemonError::ClaimTargetExists { .. }));
        assert!(path.exists());
        assert_eq!(transport.events().len(), 1, "send happened before the claim");
    }

    #[tokio::test]
    async fn locked_file_is_skipped_without_send() {
        let dir = TempDir::new().expect("tempdir");
        let path = write_file(&dir, "d.txt", 5);
        let writer = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .expect("open writer");
        writer.lock_exclusive().expect("hold lock");
        let transport = MemoryTransport::new();

        let outcome = dispatch_file(&path, ".old", &transport, Duration::from_secs(5))
            .await
            .expect("dispatch");
        assert!(matches!(outcome, FileOutcome::Skipped { .. }));
        assert_eq!(transport.send_attempts(), 0);
        assert!(path.exists());
    }
}
