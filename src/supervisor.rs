//! Process lifecycle (spec.md §4.8, §5, §9 "Linked supervision"): spawns
//! the reader pool, contents worker and router I/O tasks as a linked
//! group, waits for shutdown, and propagates the first task failure as
//! the process exit cause.
//!
//! Grounded on a conventional `Servers` join-handle bundle: a struct of
//! `Option<JoinHandle<..>>`/`Vec<JoinHandle<..>>` fields built up with
//! `with_x` methods, plus an `all_finished` poll and a broadcast channel
//! used purely to log which task went down first.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::config::ConfigFile;
use crate::contents::{self, ContentsInboundMessage, ContentsReply};
use crate::directory::Directory;
use crate::error::VaultaireError;
use crate::router;
use crate::store::connect_guarded;
use crate::workers::{self, InboundMessage, Reply, TelemetryEvent};

type TaskResult = Result<(), VaultaireError>;

#[derive(Debug, Clone)]
pub enum TaskState {
    Stopped { task: &'static str },
}

/// The group of linked tasks that make up one running daemon.
pub struct Servers {
    reader_workers: Vec<JoinHandle<TaskResult>>,
    contents_worker: Option<JoinHandle<TaskResult>>,
    query_inbound: Option<JoinHandle<TaskResult>>,
    query_outbound: Option<JoinHandle<TaskResult>>,
    contents_inbound: Option<JoinHandle<TaskResult>>,
    contents_outbound: Option<JoinHandle<TaskResult>>,
    telemetry: Option<JoinHandle<TaskResult>>,
    task_tx: broadcast::Sender<TaskState>,
}

impl Servers {
    fn build() -> Self {
        let (task_tx, _) = broadcast::channel(256);
        Self {
            reader_workers: Vec::new(),
            contents_worker: None,
            query_inbound: None,
            query_outbound: None,
            contents_inbound: None,
            contents_outbound: None,
            telemetry: None,
            task_tx,
        }
    }

    fn with_reader_workers(mut self, handles: Vec<JoinHandle<TaskResult>>) -> Self {
        self.reader_workers = handles;
        self
    }

    fn with_contents_worker(mut self, handle: JoinHandle<TaskResult>) -> Self {
        self.contents_worker = Some(handle);
        self
    }

    fn with_query_inbound(mut self, handle: JoinHandle<TaskResult>) -> Self {
        self.query_inbound = Some(handle);
        self
    }

    fn with_query_outbound(mut self, handle: JoinHandle<TaskResult>) -> Self {
        self.query_outbound = Some(handle);
        self
    }

    fn with_contents_inbound(mut self, handle: JoinHandle<TaskResult>) -> Self {
        self.contents_inbound = Some(handle);
        self
    }

    fn with_contents_outbound(mut self, handle: JoinHandle<TaskResult>) -> Self {
        self.contents_outbound = Some(handle);
        self
    }

    fn with_telemetry(mut self, handle: JoinHandle<TaskResult>) -> Self {
        self.telemetry = Some(handle);
        self
    }

    fn note_if_finished(&self, name: &'static str, handle: &JoinHandle<TaskResult>) -> bool {
        if handle.is_finished() {
            let _ = self.task_tx.send(TaskState::Stopped { task: name });
            true
        } else {
            false
        }
    }

    /// True once any single linked task has finished, cleanly or not
    /// (spec.md §9: the whole group tears down together).
    fn any_finished(&self) -> bool {
        let mut finished = false;
        for handle in &self.reader_workers {
            finished |= self.note_if_finished("reader-worker", handle);
        }
        if let Some(handle) = &self.contents_worker {
            finished |= self.note_if_finished("contents-worker", handle);
        }
        if let Some(handle) = &self.query_inbound {
            finished |= self.note_if_finished("query-inbound", handle);
        }
        if let Some(handle) = &self.query_outbound {
            finished |= self.note_if_finished("query-outbound", handle);
        }
        if let Some(handle) = &self.contents_inbound {
            finished |= self.note_if_finished("contents-inbound", handle);
        }
        if let Some(handle) = &self.contents_outbound {
            finished |= self.note_if_finished("contents-outbound", handle);
        }
        if let Some(handle) = &self.telemetry {
            finished |= self.note_if_finished("telemetry", handle);
        }
        finished
    }

    /// Aborts every still-running task. Called once the group is tearing
    /// down, whether from a shutdown signal or a linked-task failure.
    fn abort_all(&self) {
        for handle in &self.reader_workers {
            handle.abort();
        }
        for handle in [
            &self.contents_worker,
            &self.query_inbound,
            &self.query_outbound,
            &self.contents_inbound,
            &self.contents_outbound,
            &self.telemetry,
        ] {
            if let Some(handle) = handle {
                handle.abort();
            }
        }
    }

    /// Awaits whichever of the pre-identified finished tasks actually
    /// failed, returning its error. A task that finished with `Ok(())` is
    /// not a failure by itself but still ends the group (spec.md §9).
    async fn first_failure(&mut self) -> Option<VaultaireError> {
        let mut handles: Vec<JoinHandle<TaskResult>> = std::mem::take(&mut self.reader_workers);
        for opt in [
            self.contents_worker.take(),
            self.query_inbound.take(),
            self.query_outbound.take(),
            self.contents_inbound.take(),
            self.contents_outbound.take(),
            self.telemetry.take(),
        ] {
            if let Some(handle) = opt {
                handles.push(handle);
            }
        }
        for handle in handles {
            if handle.is_finished() {
                return match handle.await {
                    Ok(Ok(())) => None,
                    Ok(Err(error)) => Some(error),
                    Err(join_error) => Some(VaultaireError::LinkedTaskFailure(join_error.to_string())),
                };
            }
        }
        None
    }
}

/// Spawns every linked task and runs the group until shutdown or the
/// first failure. Exit code follows spec.md §6: 0 on clean shutdown,
/// non-zero on any linked-task failure or watchdog expiry.
pub async fn run(config: &ConfigFile, workers: usize) -> Result<(), VaultaireError> {
    let store = Arc::new(
        connect_guarded(
            &config.user,
            &config.pool,
            &config.ceph_config_path,
            std::path::Path::new(&config.object_store_dir),
        )
        .await?,
    );
    let (query_socket, contents_socket) = router::connect_routers(&config.broker).await?;

    let (inbound_tx, inbound_rx) = mpsc::channel::<InboundMessage>(1);
    let shared_inbound = Arc::new(Mutex::new(inbound_rx));
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<Reply>();
    let (telemetry_tx, telemetry_rx) = mpsc::unbounded_channel::<TelemetryEvent>();
    let (contents_inbound_tx, contents_inbound_rx) = mpsc::channel::<ContentsInboundMessage>(1);
    let (contents_outbound_tx, contents_outbound_rx) = mpsc::unbounded_channel::<ContentsReply>();
    let directory = Arc::new(Mutex::new(Directory::new()));

    let mut reader_handles = Vec::with_capacity(workers.max(1));
    for worker_id in 0..workers.max(1) {
        let store = Arc::clone(&store);
        let shared_inbound = Arc::clone(&shared_inbound);
        let outbound_tx = outbound_tx.clone();
        let telemetry_tx = telemetry_tx.clone();
        reader_handles.push(tokio::spawn(async move {
            let result = workers::run_shared(store, shared_inbound, outbound_tx, telemetry_tx).await;
            if let Err(ref error) = result {
                error!(worker_id, %error, "reader worker failed");
            }
            result
        }));
    }

    let broker = config.broker.clone();
    let lock_timeout = config.lock_timeout();
    let mut servers = Servers::build()
        .with_reader_workers(reader_handles)
        .with_contents_worker(tokio::spawn(contents::run(
            Arc::clone(&store),
            Arc::clone(&directory),
            contents_inbound_rx,
            contents_outbound_tx,
            lock_timeout,
        )))
        .with_query_inbound(tokio::spawn(router::inbound_pump(Arc::clone(&query_socket), inbound_tx)))
        .with_query_outbound(tokio::spawn(router::outbound_pump(Arc::clone(&query_socket), outbound_rx)))
        .with_contents_inbound(tokio::spawn(router::contents_inbound_pump(
            Arc::clone(&contents_socket),
            contents_inbound_tx,
        )))
        .with_contents_outbound(tokio::spawn(router::contents_outbound_pump(
            Arc::clone(&contents_socket),
            contents_outbound_rx,
        )))
        .with_telemetry(tokio::spawn(router::telemetry_pump(broker, telemetry_rx, config.debug)));

    tokio::select! {
        _ = wait_for_signal() => {
            info!("received shutdown signal, tearing down linked tasks");
            servers.abort_all();
            Ok(())
        }
        outcome = poll_until_any_finished(&mut servers) => {
            let _ = outcome;
            match servers.first_failure().await {
                Some(error) => {
                    error!(%error, "linked task failed, tearing down the group");
                    servers.abort_all();
                    Err(error)
                }
                None => {
                    servers.abort_all();
                    Ok(())
                }
            }
        }
    }
}

async fn poll_until_any_finished(servers: &mut Servers) {
    loop {
        if servers.any_finished() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
        tokio::select! {
            _ = sigterm.recv() => {}
            _ = sigint.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
