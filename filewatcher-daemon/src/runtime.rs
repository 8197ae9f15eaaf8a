use std::fs;
use std::future::Future;
use std::io::{self, ErrorKind};
use std::os::unix::fs::PermissionsExt;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::signal::unix::{signal, Signal, SignalKind};
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinError;

use filewatcher_core::{desired::load_document, ConfigState, ReportedPatch};

use crate::error::{io_err, DaemonError};
use crate::handler::{apply_desired, on_desired_properties};
use crate::paths::{socket_path, DEFAULT_SEND_TIMEOUT, WATCH_DIR};
use crate::poller::{Poller, TickSummary};
use crate::protocol::{encode_line, DaemonRequest, DaemonResponse, StatusReport, StopAck};
use crate::transport::Transport;

/// Pause after a failed `accept` so a persistent error (EMFILE) cannot spin.
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Identifiers taken from the hosting environment. Diagnostics only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identity {
    pub device_id: Option<String>,
    pub module_id: Option<String>,
}

impl Identity {
    pub const DEVICE_ID_ENV: &'static str = "IOTEDGE_DEVICEID";
    pub const MODULE_ID_ENV: &'static str = "IOTEDGE_MODULEID";

    pub fn from_env() -> Self {
        Self {
            device_id: std::env::var(Self::DEVICE_ID_ENV).ok(),
            module_id: std::env::var(Self::MODULE_ID_ENV).ok(),
        }
    }
}

/// Startup options for the daemon.
#[derive(Debug, Clone)]
pub struct AgentOptions {
    /// Holds the control socket and, for the outbox transport, its files.
    pub state_dir: PathBuf,
    pub watch_dir: PathBuf,
    /// Full desired document applied once before the first tick.
    pub desired_snapshot: Option<PathBuf>,
    pub send_timeout: Duration,
    pub identity: Identity,
}

impl AgentOptions {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
            watch_dir: PathBuf::from(WATCH_DIR),
            desired_snapshot: None,
            send_timeout: DEFAULT_SEND_TIMEOUT,
            identity: Identity::default(),
        }
    }
}

struct Shared {
    options: AgentOptions,
    config: ConfigState,
    transport: Arc<dyn Transport>,
    last_tick: Arc<RwLock<Option<TickSummary>>>,
    started_at: DateTime<Utc>,
}

/// SIGINT and SIGTERM, registered up front so neither is missed once the
/// control socket is visible.
struct Termination {
    interrupt: Signal,
    terminate: Signal,
}

impl Termination {
    fn register() -> Result<Self, DaemonError> {
        Ok(Self {
            interrupt: signal(SignalKind::interrupt()).map_err(|e| io_err("SIGINT handler", e))?,
            terminate: signal(SignalKind::terminate()).map_err(|e| io_err("SIGTERM handler", e))?,
        })
    }

    async fn recv(&mut self) -> &'static str {
        tokio::select! {
            _ = self.interrupt.recv() => "SIGINT",
            _ = self.terminate.recv() => "SIGTERM",
        }
    }
}

/// Start the daemon runtime and block the current thread until it exits.
pub fn start_blocking(
    options: AgentOptions,
    transport: Arc<dyn Transport>,
) -> Result<(), DaemonError> {
    init_tracing();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(options, transport))
}

/// Run until `stop` is requested or SIGINT/SIGTERM arrives.
pub async fn run(options: AgentOptions, transport: Arc<dyn Transport>) -> Result<(), DaemonError> {
    if !options.state_dir.exists() {
        fs::create_dir_all(&options.state_dir).map_err(|e| io_err(&options.state_dir, e))?;
    }

    log_startup(&options);

    let config = ConfigState::new();
    if let Some(snapshot) = &options.desired_snapshot {
        let document = load_document(snapshot)?;
        tracing::info!(path = %snapshot.display(), "applying startup desired state");
        on_desired_properties(&config, &document, transport.as_ref()).await;
    }

    let mut termination = Termination::register()?;
    let socket = socket_path(&options.state_dir);
    let listener = bind_control_socket(&socket)?;
    tracing::info!(socket = %socket.display(), "control socket listening");

    let shared = Arc::new(Shared {
        options,
        config,
        transport,
        last_tick: Arc::new(RwLock::new(None)),
        started_at: Utc::now(),
    });

    let (shutdown_tx, _) = broadcast::channel::<()>(16);

    let poller_handle = {
        let shutdown = shutdown_tx.clone();
        let poller = Poller::new(
            shared.options.watch_dir.clone(),
            shared.config.clone(),
            shared.transport.clone(),
            shared.options.send_timeout,
        );
        let last_tick = shared.last_tick.clone();
        let shutdown_rx = shutdown.subscribe();
        tokio::spawn(async move {
            let result = poller.run(last_tick, shutdown_rx).await;
            let _ = shutdown.send(());
            result
        })
    };

    let socket_handle = {
        let shutdown = shutdown_tx.clone();
        let shared = shared.clone();
        let shutdown_rx = shutdown.subscribe();
        tokio::spawn(async move {
            let listener = &listener;
            serve_clients(
                move || async move { listener.accept().await.map(|(stream, _)| stream) },
                shared,
                shutdown.clone(),
                shutdown_rx,
            )
            .await;
            let _ = shutdown.send(());
            remove_socket(&socket);
            Ok::<(), DaemonError>(())
        })
    };

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        let mut shutdown_rx = shutdown.subscribe();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown_rx.recv() => {}
                signal = termination.recv() => {
                    tracing::info!(signal, "termination signal received, shutting down");
                    let _ = shutdown.send(());
                }
            }
            Ok::<(), DaemonError>(())
        })
    };

    let (poller_result, socket_result, signal_result) =
        tokio::join!(poller_handle, socket_handle, signal_handle);

    joined("poller", poller_result)?;
    joined("control socket", socket_result)?;
    joined("signal listener", signal_result)?;
    Ok(())
}

fn log_startup(options: &AgentOptions) {
    tracing::info!(
        device_id = options.identity.device_id.as_deref().unwrap_or("<unset>"),
        module_id = options.identity.module_id.as_deref().unwrap_or("<unset>"),
        "filewatcher starting",
    );
    if let Ok(cwd) = std::env::current_dir() {
        tracing::info!(current_dir = %cwd.display(), "working directory");
    }
    if options.watch_dir.is_dir() {
        tracing::info!(watch_dir = %options.watch_dir.display(), "found watch directory");
    } else {
        tracing::warn!(watch_dir = %options.watch_dir.display(), "no watch directory found");
    }
}

/// Accept control clients until shutdown. Accept failures are logged and
/// retried; they never end the loop.
async fn serve_clients<A, F>(
    mut accept: A,
    shared: Arc<Shared>,
    shutdown_tx: broadcast::Sender<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
) where
    A: FnMut() -> F,
    F: Future<Output = io::Result<UnixStream>>,
{
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = accept() => {
                match accepted {
                    Ok(stream) => {
                        let shared = shared.clone();
                        let shutdown_tx = shutdown_tx.clone();
                        tokio::spawn(async move {
                            if let Err(err) = handle_socket_client(stream, shared, shutdown_tx).await {
                                tracing::error!(error = %err, "control client error");
                            }
                        });
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "control socket accept failed");
                        tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                    }
                }
            }
        }
    }
}

async fn handle_socket_client(
    stream: UnixStream,
    shared: Arc<Shared>,
    shutdown_tx: broadcast::Sender<()>,
) -> Result<(), DaemonError> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| io_err("control socket read", e))?
    {
        if line.trim().is_empty() {
            continue;
        }

        let (response, closes) = match serde_json::from_str::<DaemonRequest>(&line) {
            Ok(request) => {
                let closes = matches!(request, DaemonRequest::Stop);
                (answer(request, &shared, &shutdown_tx).await, closes)
            }
            Err(err) => (DaemonResponse::Err(format!("invalid request: {err}")), false),
        };

        writer
            .write_all(&encode_line(&response)?)
            .await
            .map_err(|e| io_err("control socket write", e))?;
        if closes {
            break;
        }
    }

    Ok(())
}

async fn answer(
    request: DaemonRequest,
    shared: &Shared,
    shutdown_tx: &broadcast::Sender<()>,
) -> DaemonResponse {
    match request {
        DaemonRequest::Status => reply(&status_report(shared).await),
        DaemonRequest::Desired { properties } => {
            match apply_desired(&shared.config, &properties, shared.transport.as_ref()).await {
                Ok(patch) => reply(&patch),
                Err(err) => {
                    tracing::error!(error = %err, "desired properties update failed");
                    DaemonResponse::Err(err.to_string())
                }
            }
        }
        DaemonRequest::Stop => {
            tracing::info!("stop requested over control socket");
            let _ = shutdown_tx.send(());
            reply(&StopAck { stopping: true })
        }
    }
}

fn reply<T: Serialize>(body: &T) -> DaemonResponse {
    match serde_json::to_value(body) {
        Ok(body) => DaemonResponse::Ok(body),
        Err(err) => DaemonResponse::Err(format!("failed to encode reply: {err}")),
    }
}

async fn status_report(shared: &Shared) -> StatusReport {
    let config = shared.config.snapshot();
    let identity = &shared.options.identity;

    StatusReport {
        running: true,
        started_at: shared.started_at,
        device_id: identity.device_id.clone(),
        module_id: identity.module_id.clone(),
        watch_dir: shared.options.watch_dir.clone(),
        socket: socket_path(&shared.options.state_dir),
        config: ReportedPatch {
            interval: Some(config.interval_ms),
            rename_extension: Some(config.rename_suffix),
            search_pattern: Some(config.search_pattern),
        },
        last_tick: shared.last_tick.read().await.clone(),
    }
}

/// Bind the control socket with owner-only permissions, replacing a socket
/// file left behind by a daemon that is no longer listening.
fn bind_control_socket(socket: &Path) -> Result<UnixListener, DaemonError> {
    match StdUnixStream::connect(socket) {
        Ok(_) => {
            return Err(DaemonError::AlreadyRunning {
                socket: socket.to_path_buf(),
            })
        }
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => {
            tracing::warn!(socket = %socket.display(), error = %err, "replacing stale control socket");
            if let Err(err) = fs::remove_file(socket) {
                if err.kind() != ErrorKind::NotFound {
                    return Err(io_err(socket, err));
                }
            }
        }
    }

    let listener = UnixListener::bind(socket).map_err(|e| io_err(socket, e))?;
    fs::set_permissions(socket, fs::Permissions::from_mode(0o600))
        .map_err(|e| io_err(socket, e))?;
    Ok(listener)
}

fn remove_socket(socket: &Path) {
    if let Err(err) = fs::remove_file(socket) {
        if err.kind() != ErrorKind::NotFound {
            tracing::warn!(socket = %socket.display(), error = %err, "failed to remove control socket");
        }
    }
}

fn joined(
    task: &'static str,
    result: Result<Result<(), DaemonError>, JoinError>,
) -> Result<(), DaemonError> {
    result.map_err(|source| DaemonError::Join { task, source })?
}

fn init_tracing() {
    use tracing_subscriber::filter::LevelFilter;
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();
    // The poller and control clients log from different worker threads.
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_names(true)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryTransport;
    use serde_json::{json, Value};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tempfile::TempDir;

    fn shared_for(state: &TempDir) -> Shared {
        let mut options = AgentOptions::new(state.path());
        options.identity = Identity {
            device_id: Some("edge-01".to_string()),
            module_id: Some("filewatcher".to_string()),
        };
        Shared {
            options,
            config: ConfigState::new(),
            transport: Arc::new(MemoryTransport::new()),
            last_tick: Arc::new(RwLock::new(None)),
            started_at: Utc::now(),
        }
    }

    async fn status_json(shared: &Shared) -> Value {
        serde_json::to_value(status_report(shared).await).expect("encode status")
    }

    #[tokio::test]
    async fn status_before_first_tick() {
        let state = TempDir::new().expect("state dir");
        let shared = shared_for(&state);

        let payload = status_json(&shared).await;

        assert_eq!(payload["running"], json!(true));
        assert_eq!(payload["device_id"], json!("edge-01"));
        assert_eq!(payload["watch_dir"], json!("exchange"));
        assert_eq!(payload["last_tick"], Value::Null);
        assert_eq!(
            payload["config"],
            json!({ "interval": 10_000, "searchPattern": "*.txt", "renameExtension": ".old" })
        );
    }

    #[tokio::test]
    async fn status_reflects_config_changes_and_last_tick() {
        let state = TempDir::new().expect("state dir");
        let shared = shared_for(&state);
        shared.config.set_interval(Some(2_500));
        *shared.last_tick.write().await = Some(TickSummary {
            seen: 3,
            claimed: 2,
            skipped: 0,
            failed: 1,
            search_pattern: "*.txt".to_string(),
            finished_at: Utc::now(),
        });

        let payload = status_json(&shared).await;

        assert_eq!(payload["config"]["interval"], json!(2_500));
        assert_eq!(payload["last_tick"]["claimed"], json!(2));
        assert_eq!(payload["last_tick"]["failed"], json!(1));
    }

    #[tokio::test]
    async fn stale_socket_file_is_replaced_on_bind() {
        let state = TempDir::new().expect("state dir");
        let socket = socket_path(state.path());
        fs::write(&socket, b"").expect("stale socket placeholder");

        let _listener = bind_control_socket(&socket).expect("bind");
        let mode = fs::metadata(&socket).expect("socket metadata").permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[tokio::test]
    async fn live_socket_is_not_taken_over() {
        let state = TempDir::new().expect("state dir");
        let socket = socket_path(state.path());
        let _first = bind_control_socket(&socket).expect("first bind");

        let err = bind_control_socket(&socket).expect_err("second bind");
        assert!(matches!(err, DaemonError::AlreadyRunning { .. }));
    }

    #[tokio::test]
    async fn accept_errors_do_not_stop_the_control_socket() {
        let state = TempDir::new().expect("state dir");
        let shared = Arc::new(shared_for(&state));
        let (client, server) = UnixStream::pair().expect("stream pair");
        let queue = Arc::new(Mutex::new(VecDeque::from(vec![
            Err(io::Error::from_raw_os_error(24)),
            Err(io::Error::new(ErrorKind::ConnectionAborted, "aborted")),
            Ok(server),
        ])));

        let (shutdown_tx, _) = broadcast::channel::<()>(4);
        let server_task = tokio::spawn(serve_clients(
            move || {
                let next = queue.lock().expect("accept queue").pop_front();
                async move {
                    match next {
                        Some(result) => result,
                        None => std::future::pending::<io::Result<UnixStream>>().await,
                    }
                }
            },
            shared,
            shutdown_tx.clone(),
            shutdown_tx.subscribe(),
        ));

        let (reader, mut writer) = client.into_split();
        let mut replies = BufReader::new(reader).lines();

        writer
            .write_all(&encode_line(&DaemonRequest::Status).expect("encode"))
            .await
            .expect("send status");
        let line = replies.next_line().await.expect("read").expect("status reply");
        let status = serde_json::from_str::<DaemonResponse>(&line)
            .expect("decode")
            .into_result()
            .expect("status ok");
        assert_eq!(status["running"], json!(true));

        writer
            .write_all(&encode_line(&DaemonRequest::Stop).expect("encode"))
            .await
            .expect("send stop");
        let line = replies.next_line().await.expect("read").expect("stop reply");
        assert_eq!(
            serde_json::from_str::<DaemonResponse>(&line).expect("decode"),
            DaemonResponse::Ok(json!({ "stopping": true }))
        );

        tokio::time::timeout(Duration::from_secs(5), server_task)
            .await
            .expect("accept loop ends on stop")
            .expect("join");
    }

    #[tokio::test]
    async fn panicked_task_surfaces_as_join_error() {
        let handle = tokio::spawn(async {
            if true {
                panic!("poller blew up");
            }
            Ok::<(), DaemonError>(())
        });

        let err = joined("poller", handle.await).expect_err("join failure");
        assert!(matches!(err, DaemonError::Join { task: "poller", .. }));
        assert!(err.to_string().starts_with("poller task failed to join"));
    }
}
