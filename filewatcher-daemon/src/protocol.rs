//! Control-socket wire format and the blocking client used by the CLI.
//!
//! One JSON object per line in each direction. A connection may carry any
//! number of requests; the daemon closes it after answering `stop`.

use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::thread::sleep;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use filewatcher_core::ReportedPatch;

use crate::error::{io_err, DaemonError};
use crate::paths::socket_path;
use crate::poller::TickSummary;

/// Attempts made by [`ControlClient::status`] while the socket is still coming up.
const STATUS_ATTEMPTS: u32 = 5;
const STATUS_RETRY_DELAY: Duration = Duration::from_millis(100);

/// A request line, tagged by `cmd`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum DaemonRequest {
    Status,
    Stop,
    /// Apply a desired-state document; a missing `properties` is a no-op update.
    Desired {
        #[serde(default)]
        properties: Value,
    },
}

/// A reply line: `{"result":"ok","body":..}` or `{"result":"err","body":"message"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", content = "body", rename_all = "snake_case")]
pub enum DaemonResponse {
    Ok(Value),
    Err(String),
}

impl DaemonResponse {
    pub fn into_result(self) -> Result<Value, DaemonError> {
        match self {
            DaemonResponse::Ok(body) => Ok(body),
            DaemonResponse::Err(message) => Err(DaemonError::Protocol(message)),
        }
    }
}

/// Body of a `status` reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReport {
    pub running: bool,
    pub started_at: DateTime<Utc>,
    pub device_id: Option<String>,
    pub module_id: Option<String>,
    pub watch_dir: PathBuf,
    pub socket: PathBuf,
    /// Current configuration with every key present.
    pub config: ReportedPatch,
    pub last_tick: Option<TickSummary>,
}

/// Body of a `stop` reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopAck {
    pub stopping: bool,
}

/// Serialize `value` as one newline-terminated line.
pub fn encode_line<T: Serialize>(value: &T) -> Result<Vec<u8>, DaemonError> {
    let mut line = serde_json::to_vec(value)?;
    line.push(b'\n');
    Ok(line)
}

/// Blocking client for a daemon's control socket.
#[derive(Debug, Clone)]
pub struct ControlClient {
    socket: PathBuf,
}

impl ControlClient {
    pub fn new(state_dir: &Path) -> Self {
        Self {
            socket: socket_path(state_dir),
        }
    }

    pub fn socket(&self) -> &Path {
        &self.socket
    }

    /// Send one request on a fresh connection and decode the reply body.
    pub fn call(&self, request: &DaemonRequest) -> Result<Value, DaemonError> {
        let mut stream = self.connect()?;
        stream
            .write_all(&encode_line(request)?)
            .map_err(|e| io_err(&self.socket, e))?;

        let mut line = String::new();
        let read = BufReader::new(stream)
            .read_line(&mut line)
            .map_err(|e| io_err(&self.socket, e))?;
        if read == 0 {
            return Err(DaemonError::Protocol(
                "daemon closed connection before responding".to_string(),
            ));
        }

        serde_json::from_str::<DaemonResponse>(line.trim_end())?.into_result()
    }

    /// Query status, retrying briefly while the daemon is still binding its socket.
    pub fn status(&self) -> Result<StatusReport, DaemonError> {
        let mut attempt = 1;
        loop {
            match self.call_typed(&DaemonRequest::Status) {
                Err(DaemonError::DaemonNotRunning { .. }) if attempt < STATUS_ATTEMPTS => {
                    attempt += 1;
                    sleep(STATUS_RETRY_DELAY);
                }
                result => return result,
            }
        }
    }

    pub fn stop(&self) -> Result<StopAck, DaemonError> {
        self.call_typed(&DaemonRequest::Stop)
    }

    /// Push a desired-state document; returns the keys the daemon changed.
    pub fn push_desired(&self, properties: Value) -> Result<ReportedPatch, DaemonError> {
        self.call_typed(&DaemonRequest::Desired { properties })
    }

    fn call_typed<T: DeserializeOwned>(&self, request: &DaemonRequest) -> Result<T, DaemonError> {
        Ok(serde_json::from_value(self.call(request)?)?)
    }

    fn connect(&self) -> Result<UnixStream, DaemonError> {
        UnixStream::connect(&self.socket).map_err(|err| match err.kind() {
            ErrorKind::NotFound | ErrorKind::ConnectionRefused => DaemonError::DaemonNotRunning {
                socket: self.socket.clone(),
            },
            _ => io_err(&self.socket, err),
        })
    }
}
