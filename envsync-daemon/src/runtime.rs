use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast;

use envsync_core::config::{self, AgentConfig, LogFormat};
use envsync_sync::{
    http::{HttpArgoClient, HttpRemoteService},
    pipeline::initialize_environment,
    send_heartbeat, ApplicationEvent, ApplicationWorker, ClusterSource, DedupQueue, ProjectEvent,
    ProjectWorker, Publisher, QueueItem, Reconciler, RemoteService, SyncError, TickOutcome,
};

use crate::error::{io_err, DaemonError};
use crate::paths::{envsync_root, socket_path, RETRY_DELAY};
use crate::protocol::{DaemonRequest, DaemonResponse};
use crate::watch::{application_event, project_event, watch_task, WatchKind};

/// Grace period for blocking watch readers when the runtime shuts down.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Whether the runtime opens the cluster watch streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchMode {
    Cluster,
    Disabled,
}

/// Everything the runtime's tasks share. Built once at startup and passed
/// around behind an `Arc`.
pub struct AgentState {
    pub started_at_unix: u64,
    pub applications: Arc<DedupQueue<ApplicationEvent>>,
    pub projects: Arc<DedupQueue<ProjectEvent>>,
    pub reconciler: Arc<Reconciler>,
    pub publisher: Arc<Publisher>,
    remote: Arc<dyn RemoteService>,
    cluster: Arc<dyn ClusterSource>,
    app_worker: Arc<ApplicationWorker>,
    project_worker: Arc<ProjectWorker>,
}

impl AgentState {
    pub fn new(
        config: &AgentConfig,
        remote: Arc<dyn RemoteService>,
        cluster: Arc<dyn ClusterSource>,
    ) -> Self {
        let publisher = Arc::new(Publisher::new(remote.clone()));
        Self {
            started_at_unix: unix_seconds_now(),
            applications: Arc::new(DedupQueue::new()),
            projects: Arc::new(DedupQueue::new()),
            reconciler: Arc::new(Reconciler::new(config.source_type.clone())),
            app_worker: Arc::new(ApplicationWorker::new(
                cluster.clone(),
                remote.clone(),
                publisher.clone(),
            )),
            project_worker: Arc::new(ProjectWorker::new(remote.clone())),
            publisher,
            remote,
            cluster,
        }
    }

    /// State wired to the HTTP clients named in `config`.
    pub fn from_config(config: &AgentConfig) -> Self {
        let timeout = config.request_timeout();
        let remote = Arc::new(HttpRemoteService::new(
            &config.remote.url,
            &config.remote.token,
            timeout,
        ));
        let cluster = Arc::new(HttpArgoClient::new(
            &config.argocd.url,
            &config.argocd.token,
            timeout,
        ));
        Self::new(config, remote, cluster)
    }

    /// One reconciliation tick followed by a heartbeat. Blocking.
    pub fn reconcile(&self) -> Result<TickOutcome, SyncError> {
        let outcome = self.reconciler.tick(self.remote.as_ref(), |descriptor| {
            initialize_environment(self.cluster.as_ref(), &self.publisher, descriptor)
        });
        if let Err(err) = send_heartbeat(self.remote.as_ref(), &outcome) {
            tracing::warn!(error = %err, "heartbeat failed");
        }
        outcome
    }
}

/// Load config, start the runtime and block until it exits.
pub fn start_blocking(home: &Path) -> Result<(), DaemonError> {
    let config = config::load_at(home)?;
    init_tracing(config.log_format);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    let result = runtime.block_on(run(home.to_path_buf(), config));
    runtime.shutdown_timeout(SHUTDOWN_GRACE);
    result
}

/// Run the agent against the configured cluster and remote service.
pub async fn run(home: PathBuf, config: AgentConfig) -> Result<(), DaemonError> {
    let state = Arc::new(AgentState::from_config(&config));
    run_with(home, config, state, WatchMode::Cluster).await
}

/// Run the agent tasks over an already built state until shutdown.
pub async fn run_with(
    home: PathBuf,
    config: AgentConfig,
    state: Arc<AgentState>,
    watch: WatchMode,
) -> Result<(), DaemonError> {
    let root = envsync_root(&home);
    fs::create_dir_all(&root).map_err(|e| io_err(&root, e))?;

    let (shutdown_tx, _) = broadcast::channel::<()>(16);
    tracing::info!(
        source_type = state.reconciler.source_type(),
        reconcile_interval_secs = config.reconcile_interval_secs,
        "agent starting",
    );

    let app_watch_handle = {
        let shutdown = shutdown_tx.clone();
        let shutdown_rx = shutdown_tx.subscribe();
        let queue = state.applications.clone();
        let config = config.clone();
        tokio::spawn(async move {
            if watch == WatchMode::Disabled {
                return Ok(());
            }
            let result = watch_task(
                WatchKind::Applications,
                config.cluster.clone(),
                config.request_timeout(),
                config.watch_retry(),
                queue,
                application_event,
                shutdown_rx,
            )
            .await;
            let _ = shutdown.send(());
            result
        })
    };

    let project_watch_handle = {
        let shutdown = shutdown_tx.clone();
        let shutdown_rx = shutdown_tx.subscribe();
        let queue = state.projects.clone();
        let config = config.clone();
        tokio::spawn(async move {
            if watch == WatchMode::Disabled {
                return Ok(());
            }
            let result = watch_task(
                WatchKind::Projects,
                config.cluster.clone(),
                config.request_timeout(),
                config.watch_retry(),
                queue,
                project_event,
                shutdown_rx,
            )
            .await;
            let _ = shutdown.send(());
            result
        })
    };

    let app_worker_handle = {
        let shutdown = shutdown_tx.clone();
        let shutdown_rx = shutdown_tx.subscribe();
        let queue = state.applications.clone();
        let worker = state.app_worker.clone();
        tokio::spawn(async move {
            let process = move |event: &ApplicationEvent| worker.process(event).map(|_| ());
            let result =
                worker_task("applications", queue, Arc::new(process), shutdown_rx).await;
            let _ = shutdown.send(());
            result
        })
    };

    let project_worker_handle = {
        let shutdown = shutdown_tx.clone();
        let shutdown_rx = shutdown_tx.subscribe();
        let queue = state.projects.clone();
        let worker = state.project_worker.clone();
        tokio::spawn(async move {
            let process = move |event: &ProjectEvent| worker.process(event).map(|_| ());
            let result =
                worker_task("projects", queue, Arc::new(process), shutdown_rx).await;
            let _ = shutdown.send(());
            result
        })
    };

    let reconcile_handle = {
        let shutdown = shutdown_tx.clone();
        let shutdown_rx = shutdown_tx.subscribe();
        let state = state.clone();
        let every = config.reconcile_interval();
        tokio::spawn(async move {
            let result = reconcile_task(state, every, shutdown_rx).await;
            let _ = shutdown.send(());
            result
        })
    };

    let socket_handle = {
        let shutdown = shutdown_tx.clone();
        let shutdown_rx = shutdown_tx.subscribe();
        let home = home.clone();
        let state = state.clone();
        tokio::spawn(async move {
            let result = socket_server_task(home, state, shutdown.clone(), shutdown_rx).await;
            let _ = shutdown.send(());
            result
        })
    };

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        let mut shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown_rx.recv() => Ok(()),
                signal = shutdown_signal() => {
                    match signal {
                        Ok(name) => {
                            tracing::info!(signal = name, "received signal, shutting down agent");
                            let _ = shutdown.send(());
                            Ok(())
                        }
                        Err(err) => Err(DaemonError::Protocol(format!("signal handler failed: {err}"))),
                    }
                }
            }
        })
    };

    let (app_watch, project_watch, app_worker, project_worker, reconcile, socket, signal) = tokio::join!(
        app_watch_handle,
        project_watch_handle,
        app_worker_handle,
        project_worker_handle,
        reconcile_handle,
        socket_handle,
        signal_handle
    );

    handle_join("application_watch", app_watch)?;
    handle_join("project_watch", project_watch)?;
    handle_join("application_worker", app_worker)?;
    handle_join("project_worker", project_worker)?;
    handle_join("reconcile", reconcile)?;
    handle_join("socket_server", socket)?;
    handle_join("signal_handler", signal)?;
    tracing::info!("agent stopped");
    Ok(())
}

// ---------------------------------------------------------------------------
// Workers
// ---------------------------------------------------------------------------

/// What happened to one dequeued item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Disposition {
    Done,
    /// Transient failure; the item is pending again.
    Requeued,
    /// Transient failure, but a newer payload was already pending.
    Superseded,
    /// Permanent failure; logged and dropped.
    Dropped,
}

/// Single consumer for one queue. Items are processed one at a time on the
/// blocking pool.
async fn worker_task<P, F>(
    label: &'static str,
    queue: Arc<DedupQueue<P>>,
    process: Arc<F>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError>
where
    P: Send + 'static,
    F: Fn(&P) -> Result<(), SyncError> + Send + Sync + 'static,
{
    loop {
        let item = tokio::select! {
            _ = shutdown_rx.recv() => break,
            item = queue.dequeue() => item,
        };
        let Some(item) = item else { break };

        let disposition = match process_item(label, &queue, item, process.clone()).await {
            Ok(disposition) => disposition,
            Err(err) => {
                tracing::error!(queue = label, error = %err, "item processing aborted");
                continue;
            }
        };
        if disposition == Disposition::Requeued {
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                _ = tokio::time::sleep(RETRY_DELAY) => {}
            }
        }
    }
    queue.close();
    Ok(())
}

pub(crate) async fn process_item<P, F>(
    label: &'static str,
    queue: &DedupQueue<P>,
    item: QueueItem<P>,
    process: Arc<F>,
) -> Result<Disposition, DaemonError>
where
    P: Send + 'static,
    F: Fn(&P) -> Result<(), SyncError> + Send + Sync + 'static,
{
    tracing::debug!(queue = label, uid = %item.identity, depth = queue.len(), "dequeued item");
    let (item, result) = tokio::task::spawn_blocking(move || {
        let result = process(&item.payload);
        (item, result)
    })
    .await
    .map_err(|err| DaemonError::Protocol(format!("{label} worker join error: {err}")))?;

    let disposition = match result {
        Ok(()) => Disposition::Done,
        Err(err) if err.is_retryable() => {
            let uid = item.identity.clone();
            if queue.requeue(item.identity, item.payload) {
                tracing::warn!(queue = label, uid = %uid, error = %err, "transient failure, item requeued");
                Disposition::Requeued
            } else {
                tracing::debug!(queue = label, uid = %uid, "transient failure, newer item already pending");
                Disposition::Superseded
            }
        }
        Err(err) => {
            tracing::error!(queue = label, uid = %item.identity, error = %err, "dropping item after permanent failure");
            Disposition::Dropped
        }
    };
    Ok(disposition)
}

// ---------------------------------------------------------------------------
// Reconciliation
// ---------------------------------------------------------------------------

async fn reconcile_task(
    state: Arc<AgentState>,
    every: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = interval.tick() => {
                if let Err(err) = reconcile_now(&state).await {
                    tracing::warn!(error = %err, "reconciliation tick failed, retrying next interval");
                }
            }
        }
    }
    Ok(())
}

/// Run one tick on the blocking pool.
pub async fn reconcile_now(state: &Arc<AgentState>) -> Result<TickOutcome, DaemonError> {
    let state = state.clone();
    let outcome = tokio::task::spawn_blocking(move || state.reconcile())
        .await
        .map_err(|err| DaemonError::Protocol(format!("reconcile join error: {err}")))??;
    Ok(outcome)
}

// ---------------------------------------------------------------------------
// Control socket
// ---------------------------------------------------------------------------

async fn socket_server_task(
    home: PathBuf,
    state: Arc<AgentState>,
    shutdown_tx: broadcast::Sender<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let socket = socket_path(&home);
    prepare_socket_for_bind(&socket)?;

    let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
    set_socket_permissions(&socket)?;
    tracing::info!(socket = %socket.display(), "control socket listening");

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                let home = home.clone();
                let state = state.clone();
                let shutdown_tx = shutdown_tx.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_socket_client(stream, home, state, shutdown_tx).await {
                        tracing::error!(error = %err, "socket client error");
                    }
                });
            }
        }
    }

    if socket.exists() {
        let _ = fs::remove_file(&socket);
    }
    Ok(())
}

async fn handle_socket_client(
    stream: UnixStream,
    home: PathBuf,
    state: Arc<AgentState>,
    shutdown_tx: broadcast::Sender<()>,
) -> Result<(), DaemonError> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| io_err("agent socket read", e))?
    {
        if line.trim().is_empty() {
            continue;
        }

        let request: DaemonRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(err) => {
                write_response(
                    &mut writer,
                    &DaemonResponse::error(format!("invalid request JSON: {err}")),
                )
                .await?;
                continue;
            }
        };

        let response = match request.cmd.as_str() {
            "status" => DaemonResponse::ok(build_status_payload(&home, &state)),
            "reconcile" => match reconcile_now(&state).await {
                Ok(TickOutcome::Completed(report)) => {
                    DaemonResponse::ok(json!({ "skipped": false, "report": report }))
                }
                Ok(TickOutcome::Skipped) => DaemonResponse::ok(json!({ "skipped": true })),
                Err(err) => DaemonResponse::error(err.to_string()),
            },
            "stop" => {
                let _ = shutdown_tx.send(());
                DaemonResponse::ok(json!({ "stopping": true }))
            }
            other => DaemonResponse::error(format!("unknown command '{other}'")),
        };

        write_response(&mut writer, &response).await?;
        if request.cmd == "stop" {
            break;
        }
    }

    Ok(())
}

fn build_status_payload(home: &Path, state: &AgentState) -> Value {
    let known: Vec<String> = state
        .reconciler
        .known()
        .into_iter()
        .map(|name| name.0)
        .collect();

    let environments: Vec<Value> = state
        .publisher
        .last_published()
        .into_iter()
        .map(|(name, at)| {
            json!({
                "name": name.0,
                "last_published_at": at.to_rfc3339(),
            })
        })
        .collect();

    json!({
        "running": true,
        "started_at_unix": state.started_at_unix,
        "socket": socket_path(home).display().to_string(),
        "source_type": state.reconciler.source_type(),
        "queues": {
            "applications": state.applications.len(),
            "projects": state.projects.len(),
        },
        "known_environments": known,
        "reconcile_running": state.reconciler.is_running(),
        "last_reconcile": state.reconciler.last_report(),
        "environments": environments,
    })
}

fn prepare_socket_for_bind(socket: &Path) -> Result<(), DaemonError> {
    if !socket.exists() {
        return Ok(());
    }

    match StdUnixStream::connect(socket) {
        Ok(_) => {
            return Err(DaemonError::Protocol(format!(
                "agent socket already in use: {}",
                socket.display()
            )));
        }
        Err(err) => {
            tracing::warn!(
                socket = %socket.display(),
                error = %err,
                "removing stale agent socket before bind",
            );
        }
    }

    match fs::remove_file(socket) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(socket, err)),
    }
}

async fn write_response(
    writer: &mut OwnedWriteHalf,
    response: &DaemonResponse,
) -> Result<(), DaemonError> {
    let mut payload = serde_json::to_string(response)?;
    payload.push('\n');
    writer
        .write_all(payload.as_bytes())
        .await
        .map_err(|e| io_err("agent socket write", e))?;
    writer
        .flush()
        .await
        .map_err(|e| io_err("agent socket flush", e))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Process plumbing
// ---------------------------------------------------------------------------

async fn shutdown_signal() -> std::io::Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.map(|()| "SIGINT"),
        _ = terminate.recv() => Ok("SIGTERM"),
    }
}

fn handle_join(
    task: &str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Protocol(format!(
            "{task} task join failure: {err}"
        ))),
    }
}

fn unix_seconds_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Install the global subscriber. Also forwards `log` records from the sync
/// crate.
pub fn init_tracing(format: LogFormat) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = match format {
        LogFormat::Json => fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .try_init(),
        LogFormat::Text => fmt().with_env_filter(filter).with_target(false).try_init(),
    };
}

fn set_socket_permissions(path: &Path) -> Result<(), DaemonError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}
