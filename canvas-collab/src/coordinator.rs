//! Single-writer actor that owns one artboard.
//!
//! ```text
//!  CoordinatorHandle ──mpsc<Command>──► Coordinator task
//!   (any connection)                    │
//!                                       ├─ OpLog          dedupe + transform window
//!                                       ├─ Artboard       authoritative state
//!                                       ├─ SnapshotManager
//!                                       ├─ ArtboardStore  journal / snapshots
//!                                       ├─ watch<LiveObjects>  live id set
//!                                       └─ BroadcastGroup fan-out, version order
//! ```
//!
//! Commands are handled strictly one at a time, so versions are assigned
//! in arrival order and an operation is never observable half-applied.
//! An operation is applied to a copy of the board and only becomes the
//! authoritative state once it is durable. Store calls run on the blocking
//! pool. Presence traffic never passes through here.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use canvas_core::{
    transform_all, AppliedOp, Artboard, ArtboardId, ClientId, ObjectId, OpId, OpKind, Operation,
};
use tokio::sync::{mpsc, oneshot, watch};
use uuid::Uuid;

use crate::broadcast::BroadcastGroup;
use crate::config::EngineConfig;
use crate::error::SyncError;
use crate::history::OpLog;
use crate::presence::SessionManager;
use crate::protocol::{AppliedUpdate, ResyncState, SubmitResponse, VersionInfo};
use crate::snapshot::{SnapshotId, SnapshotManager, VersionSnapshot};
use crate::storage::{ArtboardStore, StoreError};

/// Ids present on an artboard at one version. Published after every
/// applied operation.
#[derive(Debug, Clone, Default)]
pub struct LiveObjects {
    pub version: u64,
    pub ids: HashSet<ObjectId>,
}

impl LiveObjects {
    fn of(board: &Artboard) -> Self {
        Self {
            version: board.version(),
            ids: board.object_ids(),
        }
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.ids.contains(&id)
    }
}

/// Accepted submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitOutcome {
    pub op_id: OpId,
    /// Version the operation produced, or the current version for no-ops.
    pub version: u64,
    pub noop: bool,
    pub duplicate: bool,
}

impl From<SubmitOutcome> for SubmitResponse {
    fn from(outcome: SubmitOutcome) -> Self {
        SubmitResponse::Applied {
            op_id: outcome.op_id,
            version: outcome.version,
            noop: outcome.noop,
            duplicate: outcome.duplicate,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Processing,
}

enum Command {
    Submit {
        op: Operation,
        reply: oneshot::Sender<Result<SubmitOutcome, SyncError>>,
    },
    Resync {
        last_known_version: u64,
        reply: oneshot::Sender<ResyncState>,
    },
    SaveVersion {
        name: String,
        description: Option<String>,
        reply: oneshot::Sender<Result<VersionInfo, SyncError>>,
    },
    RestoreVersion {
        snapshot_id: SnapshotId,
        client_id: ClientId,
        reply: oneshot::Sender<Result<SubmitOutcome, SyncError>>,
    },
    ListVersions {
        reply: oneshot::Sender<Vec<VersionInfo>>,
    },
    Snapshot {
        reply: oneshot::Sender<Artboard>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Command::Submit { .. } => "submit",
            Command::Resync { .. } => "resync",
            Command::SaveVersion { .. } => "save_version",
            Command::RestoreVersion { .. } => "restore_version",
            Command::ListVersions { .. } => "list_versions",
            Command::Snapshot { .. } => "snapshot",
            Command::Shutdown { .. } => "shutdown",
        }
    }
}

/// Cloneable address of a running coordinator.
#[derive(Clone)]
pub struct CoordinatorHandle {
    artboard_id: ArtboardId,
    commands: mpsc::Sender<Command>,
    live: watch::Receiver<Arc<LiveObjects>>,
    channels: Arc<BroadcastGroup>,
    request_timeout: Duration,
}

impl CoordinatorHandle {
    pub fn artboard_id(&self) -> ArtboardId {
        self.artboard_id
    }

    /// Receiver of the live object set.
    pub fn live(&self) -> &watch::Receiver<Arc<LiveObjects>> {
        &self.live
    }

    /// Last published version.
    pub fn version(&self) -> u64 {
        self.live.borrow().version
    }

    pub fn channels(&self) -> &Arc<BroadcastGroup> {
        &self.channels
    }

    /// The coordinator task has exited.
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T, SyncError> {
        let artboard_id = self.artboard_id;
        let (tx, rx) = oneshot::channel();
        let call = async {
            self.commands
                .send(make(tx))
                .await
                .map_err(|_| SyncError::ArtboardClosed(artboard_id))?;
            rx.await.map_err(|_| SyncError::ArtboardClosed(artboard_id))
        };
        tokio::time::timeout(self.request_timeout, call)
            .await
            .map_err(|_| SyncError::Timeout(self.request_timeout))?
    }

    /// Validate-free submit; callers check [`Operation::validate`] first.
    pub async fn submit(&self, op: Operation) -> Result<SubmitOutcome, SyncError> {
        self.request(|reply| Command::Submit { op, reply }).await?
    }

    pub async fn resync(&self, last_known_version: u64) -> Result<ResyncState, SyncError> {
        self.request(|reply| Command::Resync { last_known_version, reply }).await
    }

    pub async fn save_version(&self, name: String, description: Option<String>) -> Result<VersionInfo, SyncError> {
        self.request(|reply| Command::SaveVersion { name, description, reply }).await?
    }

    pub async fn restore_version(&self, snapshot_id: SnapshotId, client_id: ClientId) -> Result<SubmitOutcome, SyncError> {
        self.request(|reply| Command::RestoreVersion { snapshot_id, client_id, reply }).await?
    }

    pub async fn list_versions(&self) -> Result<Vec<VersionInfo>, SyncError> {
        self.request(|reply| Command::ListVersions { reply }).await
    }

    /// Copy of the authoritative state.
    pub async fn snapshot(&self) -> Result<Artboard, SyncError> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    /// Persist and stop. Later requests fail with `ArtboardClosed`.
    pub async fn shutdown(&self) -> Result<(), SyncError> {
        self.request(|reply| Command::Shutdown { reply }).await
    }
}

pub struct Coordinator {
    board: Artboard,
    log: OpLog,
    snapshots: SnapshotManager,
    store: Arc<dyn ArtboardStore>,
    sessions: SessionManager,
    channels: Arc<BroadcastGroup>,
    live: watch::Sender<Arc<LiveObjects>>,
    phase: Phase,
}

impl Coordinator {
    /// Start the actor for `board`.
    ///
    /// `replayed` are journal entries already applied to `board` during
    /// cold start; they seed the transform window. `versions` is the saved
    /// snapshot history.
    pub fn spawn(
        board: Artboard,
        replayed: Vec<AppliedOp>,
        versions: Vec<VersionSnapshot>,
        store: Arc<dyn ArtboardStore>,
        sessions: SessionManager,
        config: &EngineConfig,
    ) -> CoordinatorHandle {
        let artboard_id = board.id();
        let start = replayed.first().map_or(board.version(), |a| a.version - 1);
        let mut log = OpLog::new(start, config.log_min_ops, config.log_min_age);
        let now = Instant::now();
        for applied in replayed {
            log.record(applied, now);
        }

        let (live, live_rx) = watch::channel(Arc::new(LiveObjects::of(&board)));
        let channels = Arc::new(BroadcastGroup::new(config.broadcast_capacity));
        let (tx, rx) = mpsc::channel(config.queue_capacity);

        let coordinator = Coordinator {
            board,
            log,
            snapshots: SnapshotManager::new(config.snapshot_interval, config.max_periodic_snapshots)
                .with_history(versions),
            store,
            sessions,
            channels: channels.clone(),
            live,
            phase: Phase::Idle,
        };
        tokio::spawn(coordinator.run(rx));
        log::info!("Coordinator started for artboard {artboard_id}");

        CoordinatorHandle {
            artboard_id,
            commands: tx,
            live: live_rx,
            channels,
            request_timeout: config.request_timeout,
        }
    }

    async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        let mut shutdown_reply = None;
        while let Some(cmd) = rx.recv().await {
            self.phase = Phase::Processing;
            log::trace!(
                "Artboard {} {:?}: {} at v{}",
                self.board.id(),
                self.phase,
                cmd.name(),
                self.board.version()
            );
            match cmd {
                Command::Submit { op, reply } => {
                    let result = self.submit(op).await;
                    let _ = reply.send(result);
                }
                Command::Resync { last_known_version, reply } => {
                    let _ = reply.send(self.resync(last_known_version));
                }
                Command::SaveVersion { name, description, reply } => {
                    let result = self.save_version(name, description).await;
                    let _ = reply.send(result);
                }
                Command::RestoreVersion { snapshot_id, client_id, reply } => {
                    let result = self.restore(snapshot_id, client_id).await;
                    let _ = reply.send(result);
                }
                Command::ListVersions { reply } => {
                    let _ = reply.send(self.snapshots.list());
                }
                Command::Snapshot { reply } => {
                    let _ = reply.send(self.board.clone());
                }
                Command::Shutdown { reply } => {
                    shutdown_reply = Some(reply);
                    break;
                }
            }
            self.phase = Phase::Idle;
        }

        let board = self.board.clone();
        if let Err(e) = self.blocking(move |store| store.persist(&board)).await {
            log::error!("Failed to persist artboard {} on shutdown: {e}", self.board.id());
        }
        log::info!("Coordinator for artboard {} stopped at v{}", self.board.id(), self.board.version());
        if let Some(reply) = shutdown_reply {
            let _ = reply.send(());
        }
    }

    async fn submit(&mut self, op: Operation) -> Result<SubmitOutcome, SyncError> {
        if let Some(version) = self.log.lookup(&op.op_id) {
            log::debug!("Duplicate op {} (applied at v{version})", op.op_id);
            return Ok(SubmitOutcome {
                op_id: op.op_id,
                version,
                noop: false,
                duplicate: true,
            });
        }

        let current = self.board.version();
        let floor = self.log.floor();
        if op.base_version > current || op.base_version < floor {
            log::debug!(
                "Op {} has base v{} outside {floor}..={current}",
                op.op_id,
                op.base_version
            );
            return Err(SyncError::StaleVersion {
                base: op.base_version,
                current,
                floor,
            });
        }

        let rebased = transform_all(&op, self.log.since(op.base_version));
        let rebased = self.board.without_missing_targets(&rebased);
        if rebased.is_noop() {
            log::debug!("Op {} transformed to a no-op at v{current}", op.op_id);
            self.log.record_noop(op.op_id.clone(), Instant::now());
            return Ok(SubmitOutcome {
                op_id: op.op_id,
                version: current,
                noop: true,
                duplicate: false,
            });
        }

        let mut next = self.board.clone();
        let applied = next.apply(&rebased).map_err(|e| {
            log::debug!("Op {} rejected: {e}", op.op_id);
            SyncError::from(e)
        })?;
        let version = applied.version;
        self.commit(next, applied).await?;
        Ok(SubmitOutcome {
            op_id: op.op_id,
            version,
            noop: false,
            duplicate: false,
        })
    }

    /// Run a store call on the blocking pool.
    async fn blocking<T, F>(&self, call: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn ArtboardStore) -> Result<T, StoreError> + Send + 'static,
    {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || call(store.as_ref()))
            .await
            .map_err(|e| StoreError::Database(format!("store task failed: {e}")))?
    }

    /// Make `applied` durable. A failed append falls back to persisting
    /// the whole of `next`; if that fails too the operation is rejected.
    async fn make_durable(&self, next: &Artboard, applied: &AppliedOp) -> Result<(), SyncError> {
        let artboard_id = next.id();
        let version = applied.version;
        let entry = applied.clone();
        let Err(e) = self
            .blocking(move |store| store.append_operation(artboard_id, &entry))
            .await
        else {
            return Ok(());
        };
        log::warn!("Failed to journal v{version} of artboard {artboard_id}: {e}; persisting snapshot instead");

        let board = next.clone();
        self.blocking(move |store| store.persist(&board)).await.map_err(|e| {
            log::error!("Failed to persist artboard {artboard_id}; v{version} rejected: {e}");
            SyncError::Storage(e)
        })
    }

    /// Everything that follows a successful apply, in order: durability,
    /// state swap, transform window, live ids, selection pruning,
    /// broadcast, snapshot. Nothing changes if the first step fails.
    async fn commit(&mut self, next: Artboard, applied: AppliedOp) -> Result<(), SyncError> {
        self.make_durable(&next, &applied).await?;
        self.board = next;

        let artboard_id = self.board.id();
        let now = Instant::now();
        let update = AppliedUpdate::from(&applied);

        self.log.record(applied, now);
        self.log.prune(now);

        self.live.send_replace(Arc::new(LiveObjects::of(&self.board)));
        self.sessions.prune_selections(artboard_id, &update.removed).await;

        match self.channels.publish_applied(update) {
            Ok(receivers) => log::trace!("v{} sent to {receivers} receivers", self.board.version()),
            Err(e) => log::error!("Failed to broadcast v{}: {e}", self.board.version()),
        }

        if self.snapshots.note_applied() {
            let snapshot = self.snapshots.take_periodic(&self.board);
            let board = self.board.clone();
            match self.blocking(move |store| store.persist(&board)).await {
                Ok(()) => log::debug!("Periodic snapshot of artboard {artboard_id} at v{}", snapshot.version),
                Err(e) => log::error!("Failed to persist artboard {artboard_id}: {e}"),
            }
        }
        Ok(())
    }

    fn resync(&self, last_known_version: u64) -> ResyncState {
        let floor = self.log.floor();
        let (width, height) = self.board.dimensions();
        ResyncState {
            artboard_id: self.board.id(),
            name: self.board.name().to_string(),
            width,
            height,
            snapshot_version: self.board.version(),
            objects: self.board.objects().to_vec(),
            recent_ops: self
                .log
                .since(last_known_version.max(floor))
                .map(AppliedUpdate::from)
                .collect(),
            retained_from: floor,
        }
    }

    async fn save_version(&mut self, name: String, description: Option<String>) -> Result<VersionInfo, SyncError> {
        let snapshot = self.snapshots.save_named(&self.board, name, description);
        let stored = snapshot.clone();
        self.blocking(move |store| store.save_version(&stored)).await?;
        log::info!(
            "Saved version {:?} of artboard {} at v{}",
            snapshot.name,
            self.board.id(),
            snapshot.version
        );
        Ok(snapshot.info())
    }

    /// Restoring is itself an operation: it gets the next version and is
    /// broadcast like any other.
    async fn restore(&mut self, snapshot_id: SnapshotId, client_id: ClientId) -> Result<SubmitOutcome, SyncError> {
        let snapshot = self
            .snapshots
            .get(snapshot_id)
            .ok_or(SyncError::UnknownVersion(snapshot_id))?;
        let op = Operation::new(
            format!("restore-{}", Uuid::new_v4()),
            self.board.id(),
            client_id,
            self.board.version(),
            None,
            OpKind::Restore {
                snapshot_version: snapshot.version,
                objects: snapshot.objects.clone(),
            },
        );
        let mut next = self.board.clone();
        let applied = next.apply(&op)?;
        let version = applied.version;
        log::info!(
            "Artboard {} restored to snapshot {snapshot_id} (v{}) as v{version}",
            self.board.id(),
            snapshot.version
        );
        self.commit(next, applied).await?;
        Ok(SubmitOutcome {
            op_id: op.op_id,
            version,
            noop: false,
            duplicate: false,
        })
    }
}
