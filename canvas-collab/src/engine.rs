//! Process-wide entry point: artboard registry plus session routing.
//!
//! The engine owns one [`CoordinatorHandle`] per open artboard and the
//! shared [`SessionManager`]. Connections (or tests) call into it; it never
//! touches artboard state directly.

use std::collections::HashMap;
use std::sync::Arc;

use canvas_core::{Artboard, ArtboardId, ClientId, ObjectId, Operation, Point};
use tokio::sync::RwLock;

use crate::broadcast::Subscription;
use crate::config::EngineConfig;
use crate::coordinator::{Coordinator, CoordinatorHandle, SubmitOutcome};
use crate::error::SyncError;
use crate::presence::{Session, SessionId, SessionManager, SessionState, SweepReport, UserId};
use crate::protocol::{JoinedInfo, PresenceEvent, ResyncState, VersionInfo};
use crate::snapshot::SnapshotId;
use crate::storage::{ArtboardStore, MemoryStore};

/// A connection attached to an artboard.
pub struct Attachment {
    pub info: JoinedInfo,
    /// Subscribed before `info.version` was read, so nothing after it is
    /// missed.
    pub subscription: Subscription,
    pub handle: CoordinatorHandle,
}

pub struct SyncEngine {
    config: EngineConfig,
    store: Arc<dyn ArtboardStore>,
    sessions: SessionManager,
    artboards: RwLock<HashMap<ArtboardId, CoordinatorHandle>>,
}

impl SyncEngine {
    pub fn new(config: EngineConfig, store: Arc<dyn ArtboardStore>) -> Self {
        let sessions = SessionManager::new(config.heartbeat_timeout, config.grace_period);
        Self {
            config,
            store,
            sessions,
            artboards: RwLock::new(HashMap::new()),
        }
    }

    /// Engine without durable storage.
    pub fn in_memory(config: EngineConfig) -> Self {
        Self::new(config, Arc::new(MemoryStore::new()))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// Open every artboard the store knows about. Returns how many.
    pub async fn recover(&self) -> Result<usize, SyncError> {
        let ids = self.store.list_artboards()?;
        for id in &ids {
            self.artboard(*id).await?;
        }
        log::info!("Recovery complete: {} artboards restored", ids.len());
        Ok(ids.len())
    }

    /// Get or start the coordinator for an artboard.
    pub async fn artboard(&self, artboard_id: ArtboardId) -> Result<CoordinatorHandle, SyncError> {
        // Fast path: read lock
        {
            let artboards = self.artboards.read().await;
            if let Some(handle) = artboards.get(&artboard_id) {
                if !handle.is_closed() {
                    return Ok(handle.clone());
                }
            }
        }

        // Slow path: write lock to create
        let mut artboards = self.artboards.write().await;
        // Double-check after acquiring write lock
        if let Some(handle) = artboards.get(&artboard_id) {
            if !handle.is_closed() {
                return Ok(handle.clone());
            }
            log::warn!("Coordinator for artboard {artboard_id} exited; reopening");
        }

        let handle = self.open(artboard_id)?;
        artboards.insert(artboard_id, handle.clone());
        Ok(handle)
    }

    /// Handle of an artboard that is already open.
    pub async fn existing(&self, artboard_id: ArtboardId) -> Option<CoordinatorHandle> {
        self.artboards.read().await.get(&artboard_id).cloned()
    }

    pub async fn artboard_count(&self) -> usize {
        self.artboards.read().await.len()
    }

    /// Cold start: latest snapshot, then the journal tail on top.
    fn open(&self, artboard_id: ArtboardId) -> Result<CoordinatorHandle, SyncError> {
        let mut board = match self.store.load_artboard(artboard_id)? {
            Some(board) => board,
            None => Artboard::new(artboard_id, self.config.default_width, self.config.default_height)
                .with_name(self.config.default_name.clone()),
        };
        let snapshot_version = board.version();

        let mut replayed = Vec::new();
        for entry in self.store.load_operations_since(artboard_id, snapshot_version)? {
            if entry.version <= board.version() {
                continue;
            }
            if entry.version != board.version() + 1 {
                log::warn!(
                    "Journal of artboard {artboard_id} jumps from v{} to v{}; replay stopped",
                    board.version(),
                    entry.version
                );
                break;
            }
            match board.apply(&entry.op) {
                Ok(applied) => replayed.push(applied),
                Err(e) => {
                    log::error!("Journal entry v{} of artboard {artboard_id} failed to replay: {e}", entry.version);
                    break;
                }
            }
        }

        let versions = self.store.load_versions(artboard_id)?;
        log::info!(
            "Opened artboard {artboard_id}: snapshot v{snapshot_version}, {} journaled ops, {} saved versions",
            replayed.len(),
            versions.len()
        );
        Ok(Coordinator::spawn(
            board,
            replayed,
            versions,
            self.store.clone(),
            self.sessions.clone(),
            &self.config,
        ))
    }

    /// Validate, then hand the operation to its artboard's coordinator.
    pub async fn submit(&self, op: Operation) -> Result<SubmitOutcome, SyncError> {
        op.validate()?;
        let handle = self.artboard(op.artboard_id).await?;
        handle.submit(op).await
    }

    pub async fn resync(&self, artboard_id: ArtboardId, last_known_version: u64) -> Result<ResyncState, SyncError> {
        self.artboard(artboard_id).await?.resync(last_known_version).await
    }

    /// Attach a user to an artboard, resuming their stale session if any.
    pub async fn join(&self, artboard_id: ArtboardId, user_id: UserId) -> Result<Attachment, SyncError> {
        let handle = self.artboard(artboard_id).await?;
        let subscription = handle.channels().subscribe();
        let joined = self.sessions.join(artboard_id, user_id, handle.live()).await;
        if let Some(expired) = &joined.expired {
            self.publish_left(expired).await;
        }
        let session = joined.session;

        let peers = self
            .sessions
            .on_artboard(artboard_id)
            .await
            .into_iter()
            .filter(|s| s.session_id != session.session_id && s.state == SessionState::Active)
            .map(|s| s.peer())
            .collect();

        self.publish(
            &handle,
            PresenceEvent::Joined {
                session_id: session.session_id,
                client_id: session.client_id,
                user_id,
                resumed: joined.resumed,
            },
        );

        Ok(Attachment {
            info: JoinedInfo {
                session_id: session.session_id,
                client_id: session.client_id,
                artboard_id,
                version: handle.version(),
                resumed: joined.resumed,
                selection: session.selection,
                peers,
            },
            subscription,
            handle,
        })
    }

    pub async fn leave(&self, session_id: SessionId) -> Option<Session> {
        let session = self.sessions.leave(session_id).await?;
        self.publish_left(&session).await;
        Some(session)
    }

    /// The connection is gone but the session may still be resumed.
    pub async fn disconnect(&self, session_id: SessionId) {
        if let Some(session) = self.sessions.disconnect(session_id).await {
            if let Some(handle) = self.existing(session.artboard_id).await {
                self.publish(
                    &handle,
                    PresenceEvent::Stale {
                        session_id,
                        client_id: session.client_id,
                    },
                );
            }
        }
    }

    pub async fn heartbeat(&self, session_id: SessionId) -> Result<Session, SyncError> {
        self.sessions.heartbeat(session_id).await
    }

    pub async fn update_cursor(&self, session_id: SessionId, position: Point) -> Result<PresenceEvent, SyncError> {
        let event = self.sessions.update_cursor(session_id, position).await?;
        if let Some(handle) = self.handle_of(session_id).await {
            self.publish(&handle, event.clone());
        }
        Ok(event)
    }

    pub async fn update_selection(
        &self,
        session_id: SessionId,
        selection: Vec<ObjectId>,
    ) -> Result<PresenceEvent, SyncError> {
        let handle = self
            .handle_of(session_id)
            .await
            .ok_or(SyncError::SessionExpired(session_id))?;
        let event = self
            .sessions
            .update_selection(session_id, selection, handle.live())
            .await?;
        self.publish(&handle, event.clone());
        Ok(event)
    }

    /// Advance heartbeat timeouts and announce the transitions.
    pub async fn sweep(&self) -> SweepReport {
        let report = self.sessions.sweep().await;
        for session in &report.stale {
            if let Some(handle) = self.existing(session.artboard_id).await {
                self.publish(
                    &handle,
                    PresenceEvent::Stale {
                        session_id: session.session_id,
                        client_id: session.client_id,
                    },
                );
            }
        }
        for session in &report.closed {
            self.publish_left(session).await;
        }
        report
    }

    pub async fn save_version(
        &self,
        artboard_id: ArtboardId,
        name: String,
        description: Option<String>,
    ) -> Result<VersionInfo, SyncError> {
        self.artboard(artboard_id).await?.save_version(name, description).await
    }

    pub async fn restore_version(
        &self,
        artboard_id: ArtboardId,
        client_id: ClientId,
        snapshot_id: SnapshotId,
    ) -> Result<SubmitOutcome, SyncError> {
        self.artboard(artboard_id)
            .await?
            .restore_version(snapshot_id, client_id)
            .await
    }

    pub async fn list_versions(&self, artboard_id: ArtboardId) -> Result<Vec<VersionInfo>, SyncError> {
        self.artboard(artboard_id).await?.list_versions().await
    }

    /// Copy of an artboard's authoritative state.
    pub async fn snapshot(&self, artboard_id: ArtboardId) -> Result<Artboard, SyncError> {
        self.artboard(artboard_id).await?.snapshot().await
    }

    /// Persist and stop every coordinator.
    pub async fn shutdown(&self) {
        let handles: Vec<CoordinatorHandle> = self.artboards.write().await.drain().map(|(_, h)| h).collect();
        for handle in handles {
            if let Err(e) = handle.shutdown().await {
                log::warn!("Artboard {} did not shut down cleanly: {e}", handle.artboard_id());
            }
        }
        log::info!("Sync engine stopped");
    }

    async fn handle_of(&self, session_id: SessionId) -> Option<CoordinatorHandle> {
        let session = self.sessions.get(session_id).await?;
        self.existing(session.artboard_id).await
    }

    async fn publish_left(&self, session: &Session) {
        if let Some(handle) = self.existing(session.artboard_id).await {
            self.publish(
                &handle,
                PresenceEvent::Left {
                    session_id: session.session_id,
                    client_id: session.client_id,
                    user_id: session.user_id,
                },
            );
        }
    }

    fn publish(&self, handle: &CoordinatorHandle, event: PresenceEvent) {
        if let Err(e) = handle.channels().publish_presence(event) {
            log::error!("Failed to broadcast presence on artboard {}: {e}", handle.artboard_id());
        }
    }
}
