//! WebSocket sync client for connecting to the collaboration server.
//!
//! Provides:
//! - Connection lifecycle (connect, join, resume after reconnect)
//! - A [`Replica`] of the artboard that follows the server's applied order
//! - Pending operations kept until acknowledged, resubmitted after resync
//! - Cursor, selection and heartbeat messages
//!
//! The replica only ever holds confirmed server state. Local edits become
//! visible in it once their `Applied` broadcast arrives.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use canvas_core::{Artboard, ArtboardId, CanvasObject, ClientId, ObjectId, OpId, OpKind, Operation, Point};

use crate::error::ErrorCode;
use crate::presence::{SessionId, UserId};
use crate::protocol::{
    AppliedUpdate, ClientMessage, JoinedInfo, PresenceEvent, ProtocolError, ResyncState, ServerMessage,
    SubmitResponse, VersionInfo,
};
use crate::snapshot::SnapshotId;

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Events emitted by the sync client.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// Connection established
    Connected,
    /// Connection lost
    Disconnected,
    Joined {
        session_id: SessionId,
        client_id: ClientId,
        resumed: bool,
    },
    /// Replica replaced by server state
    Resynced { version: u64, discarded: usize },
    /// An applied operation was folded into the replica
    RemoteApplied { version: u64, op_id: OpId },
    Acked(SubmitResponse),
    Presence(PresenceEvent),
    Versions(Vec<VersionInfo>),
    VersionSaved(VersionInfo),
    Error { code: ErrorCode, message: String },
}

/// What [`Replica::apply_remote`] did with an update.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplicaStatus {
    Applied,
    /// Already reflected in the replica.
    Ignored,
    /// Versions were skipped; the replica needs a resync.
    Gap { expected: u64, received: u64 },
    /// The update could not be applied; the replica needs a resync.
    Diverged(String),
}

/// Local copy of an artboard, advanced only by server-applied operations.
#[derive(Debug, Clone)]
pub struct Replica {
    board: Artboard,
}

impl Replica {
    /// Empty replica at version 0.
    pub fn new(artboard_id: ArtboardId) -> Self {
        Self {
            board: Artboard::new(artboard_id, 0.0, 0.0),
        }
    }

    pub fn version(&self) -> u64 {
        self.board.version()
    }

    pub fn board(&self) -> &Artboard {
        &self.board
    }

    /// Apply the next operation in the server's order.
    pub fn apply_remote(&mut self, update: &AppliedUpdate) -> ReplicaStatus {
        let expected = self.board.version() + 1;
        if update.version < expected {
            return ReplicaStatus::Ignored;
        }
        if update.version > expected {
            return ReplicaStatus::Gap {
                expected,
                received: update.version,
            };
        }
        match self.board.apply(&update.op) {
            Ok(_) => ReplicaStatus::Applied,
            Err(e) => ReplicaStatus::Diverged(e.to_string()),
        }
    }

    /// Replace everything with a resync answer.
    pub fn install(&mut self, state: &ResyncState) {
        self.board = Artboard::from_parts(
            state.artboard_id,
            state.width,
            state.height,
            state.snapshot_version,
            state.objects.clone(),
        )
        .with_name(state.name.clone());
    }
}

/// Outcome of matching pending operations against a resync.
#[derive(Debug, Default)]
pub struct Reconciled {
    /// Already applied on the server.
    pub acknowledged: Vec<OpId>,
    /// Based on a version the server no longer retains; dropped.
    pub discarded: Vec<Operation>,
    /// Still unconfirmed; send again (same op ids).
    pub resubmit: Vec<Operation>,
}

/// Submitted operations awaiting an acknowledgement.
///
/// Kept across disconnects and resent after resync. Resending is safe:
/// the server recognises op ids it has already applied.
pub struct PendingOps {
    queue: VecDeque<Operation>,
    max_size: usize,
}

impl PendingOps {
    pub fn new(max_size: usize) -> Self {
        Self {
            queue: VecDeque::with_capacity(max_size.min(1024)),
            max_size,
        }
    }

    /// Track an operation. Returns false when full.
    pub fn push(&mut self, op: Operation) -> bool {
        if self.queue.len() >= self.max_size {
            return false;
        }
        self.queue.push_back(op);
        true
    }

    pub fn acknowledge(&mut self, op_id: &str) -> Option<Operation> {
        let at = self.queue.iter().position(|op| op.op_id == op_id)?;
        self.queue.remove(at)
    }

    pub fn reconcile(&mut self, state: &ResyncState) -> Reconciled {
        let applied: HashSet<&str> = state.recent_ops.iter().map(|u| u.op.op_id.as_str()).collect();
        let mut result = Reconciled::default();
        let mut kept = VecDeque::with_capacity(self.queue.len());
        for op in self.queue.drain(..) {
            if applied.contains(op.op_id.as_str()) {
                result.acknowledged.push(op.op_id);
            } else if op.base_version < state.retained_from {
                result.discarded.push(op);
            } else {
                result.resubmit.push(op.clone());
                kept.push_back(op);
            }
        }
        self.queue = kept;
        result
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn clear(&mut self) {
        self.queue.clear();
    }
}

/// The sync client.
///
/// Manages a WebSocket connection to the collaboration server, keeps a
/// replica of one artboard and tracks unacknowledged operations.
pub struct SyncClient {
    user_id: UserId,
    artboard_id: ArtboardId,

    /// Used as the operation client id until the server assigns one.
    local_id: ClientId,

    state: Arc<RwLock<ConnectionState>>,
    /// Bumped on every connect so a stale reader task cannot mark a newer
    /// connection as lost.
    generation: Arc<AtomicU64>,
    session: Arc<RwLock<Option<JoinedInfo>>>,
    replica: Arc<RwLock<Replica>>,
    pending: Arc<Mutex<PendingOps>>,

    /// Channel to the WebSocket writer task
    outgoing_tx: Option<mpsc::Sender<Vec<u8>>>,

    /// Event receiver for the application
    event_rx: Option<mpsc::Receiver<SyncEvent>>,
    event_tx: mpsc::Sender<SyncEvent>,

    server_url: String,
}

impl SyncClient {
    pub fn new(user_id: UserId, artboard_id: ArtboardId, server_url: impl Into<String>) -> Self {
        let (event_tx, event_rx) = mpsc::channel(1024);
        Self {
            user_id,
            artboard_id,
            local_id: Uuid::new_v4(),
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            generation: Arc::new(AtomicU64::new(0)),
            session: Arc::new(RwLock::new(None)),
            replica: Arc::new(RwLock::new(Replica::new(artboard_id))),
            pending: Arc::new(Mutex::new(PendingOps::new(10_000))),
            outgoing_tx: None,
            event_rx: Some(event_rx),
            event_tx,
            server_url: server_url.into(),
        }
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<SyncEvent>> {
        self.event_rx.take()
    }

    /// Connect and join the artboard.
    ///
    /// Spawns background tasks for reading/writing WebSocket messages.
    /// After the join the client resyncs and resends pending operations.
    pub async fn connect(&mut self) -> Result<(), ProtocolError> {
        *self.state.write().await = ConnectionState::Connecting;

        let (ws_stream, _) = match tokio_tungstenite::connect_async(self.server_url.as_str()).await {
            Ok(connected) => connected,
            Err(e) => {
                log::warn!("Failed to connect to {}: {e}", self.server_url);
                *self.state.write().await = ConnectionState::Disconnected;
                return Err(ProtocolError::ConnectionClosed);
            }
        };
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        // Writer task: forward outgoing channel to WebSocket
        let (out_tx, mut out_rx) = mpsc::channel::<Vec<u8>>(256);
        tokio::spawn(async move {
            while let Some(data) = out_rx.recv().await {
                if ws_writer.send(Message::Binary(data.into())).await.is_err() {
                    break;
                }
            }
            let _ = ws_writer.close().await;
        });

        let join = ClientMessage::Join {
            artboard_id: self.artboard_id,
            user_id: self.user_id,
        };
        out_tx
            .send(join.encode()?)
            .await
            .map_err(|_| ProtocolError::ConnectionClosed)?;

        // The reader must not keep the writer alive after `disconnect`.
        let inbound = Inbound {
            artboard_id: self.artboard_id,
            user_id: self.user_id,
            outgoing: out_tx.downgrade(),
            events: self.event_tx.clone(),
            session: self.session.clone(),
            replica: self.replica.clone(),
            pending: self.pending.clone(),
        };
        self.outgoing_tx = Some(out_tx);

        *self.state.write().await = ConnectionState::Connected;
        let _ = self.event_tx.send(SyncEvent::Connected).await;

        // Reader task: process incoming WebSocket messages
        let state = self.state.clone();
        let event_tx = self.event_tx.clone();
        let generation = self.generation.clone();
        let this_connection = generation.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                match msg {
                    Ok(Message::Binary(data)) => match ServerMessage::decode(&data) {
                        Ok(server_msg) => inbound.handle(server_msg).await,
                        Err(e) => log::warn!("Undecodable server frame: {e}"),
                    },
                    Ok(Message::Close(_)) | Err(_) => break,
                    _ => {}
                }
            }

            // Connection lost
            if generation.load(Ordering::SeqCst) == this_connection {
                *state.write().await = ConnectionState::Disconnected;
            }
            let _ = event_tx.send(SyncEvent::Disconnected).await;
        });

        Ok(())
    }

    /// Drop the connection without leaving. The server keeps the session
    /// resumable for its grace period.
    pub async fn disconnect(&mut self) {
        self.outgoing_tx = None;
        *self.state.write().await = ConnectionState::Disconnected;
    }

    async fn send(&self, msg: &ClientMessage) -> Result<(), ProtocolError> {
        let tx = self.outgoing_tx.as_ref().ok_or(ProtocolError::ConnectionClosed)?;
        tx.send(msg.encode()?)
            .await
            .map_err(|_| ProtocolError::ConnectionClosed)
    }

    /// Build an operation against the replica's current version.
    pub async fn prepare(&self, target: Option<ObjectId>, kind: OpKind) -> Operation {
        let client_id = self.client_id().await.unwrap_or(self.local_id);
        let base = self.replica.read().await.version();
        Operation::new(Uuid::new_v4().to_string(), self.artboard_id, client_id, base, target, kind)
    }

    /// Submit an operation. While disconnected it is only queued and goes
    /// out after the next resync.
    pub async fn submit(&self, op: Operation) -> Result<OpId, ProtocolError> {
        let op_id = op.op_id.clone();
        if !self.pending.lock().await.push(op.clone()) {
            return Err(ProtocolError::QueueFull);
        }
        if *self.state.read().await == ConnectionState::Connected && self.session.read().await.is_some() {
            self.send(&ClientMessage::Submit(op)).await?;
        }
        Ok(op_id)
    }

    /// Insert `object` at the top of the z-order.
    pub async fn insert(&self, object: CanvasObject) -> Result<OpId, ProtocolError> {
        let index = self.replica.read().await.board().len();
        let op = self
            .prepare(Some(object.id), OpKind::Insert { object, index })
            .await;
        self.submit(op).await
    }

    /// Cursor moves are dropped while offline.
    pub async fn move_cursor(&self, position: Point) -> Result<(), ProtocolError> {
        if *self.state.read().await != ConnectionState::Connected {
            return Ok(());
        }
        self.send(&ClientMessage::Cursor(position)).await
    }

    pub async fn select(&self, ids: Vec<ObjectId>) -> Result<(), ProtocolError> {
        self.send(&ClientMessage::Selection(ids)).await
    }

    pub async fn heartbeat(&self) -> Result<(), ProtocolError> {
        self.send(&ClientMessage::Heartbeat).await
    }

    pub async fn leave(&self) -> Result<(), ProtocolError> {
        self.send(&ClientMessage::Leave).await?;
        *self.session.write().await = None;
        Ok(())
    }

    pub async fn save_version(&self, name: impl Into<String>, description: Option<String>) -> Result<(), ProtocolError> {
        self.send(&ClientMessage::SaveVersion {
            name: name.into(),
            description,
        })
        .await
    }

    pub async fn restore_version(&self, snapshot_id: SnapshotId) -> Result<(), ProtocolError> {
        self.send(&ClientMessage::RestoreVersion { snapshot_id }).await
    }

    pub async fn list_versions(&self) -> Result<(), ProtocolError> {
        self.send(&ClientMessage::ListVersions).await
    }

    /// Ask for the server's current state.
    pub async fn resync(&self) -> Result<(), ProtocolError> {
        let last_known_version = self.version().await;
        self.send(&ClientMessage::Resync {
            artboard_id: self.artboard_id,
            last_known_version,
        })
        .await
    }

    /// Get the current connection state.
    pub async fn connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn artboard_id(&self) -> ArtboardId {
        self.artboard_id
    }

    /// Get the server URL.
    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    pub async fn session_id(&self) -> Option<SessionId> {
        self.session.read().await.as_ref().map(|s| s.session_id)
    }

    /// Server-assigned id of the current connection.
    pub async fn client_id(&self) -> Option<ClientId> {
        self.session.read().await.as_ref().map(|s| s.client_id)
    }

    /// Replica version.
    pub async fn version(&self) -> u64 {
        self.replica.read().await.version()
    }

    pub async fn objects(&self) -> Vec<CanvasObject> {
        self.replica.read().await.board().objects().to_vec()
    }

    /// Copy of the replica state.
    pub async fn board(&self) -> Artboard {
        self.replica.read().await.board().clone()
    }

    pub async fn pending_len(&self) -> usize {
        self.pending.lock().await.len()
    }
}

/// State shared with the reader task.
struct Inbound {
    artboard_id: ArtboardId,
    user_id: UserId,
    outgoing: mpsc::WeakSender<Vec<u8>>,
    events: mpsc::Sender<SyncEvent>,
    session: Arc<RwLock<Option<JoinedInfo>>>,
    replica: Arc<RwLock<Replica>>,
    pending: Arc<Mutex<PendingOps>>,
}

impl Inbound {
    async fn send(&self, msg: ClientMessage) {
        let Some(tx) = self.outgoing.upgrade() else {
            return;
        };
        match msg.encode() {
            Ok(bytes) => {
                let _ = tx.send(bytes).await;
            }
            Err(e) => log::error!("Failed to encode client message: {e}"),
        }
    }

    async fn emit(&self, event: SyncEvent) {
        let _ = self.events.send(event).await;
    }

    async fn request_resync(&self) {
        let last_known_version = self.replica.read().await.version();
        self.send(ClientMessage::Resync {
            artboard_id: self.artboard_id,
            last_known_version,
        })
        .await;
    }

    async fn handle(&self, msg: ServerMessage) {
        match msg {
            ServerMessage::Joined(info) => {
                let event = SyncEvent::Joined {
                    session_id: info.session_id,
                    client_id: info.client_id,
                    resumed: info.resumed,
                };
                *self.session.write().await = Some(info);
                self.emit(event).await;
                self.request_resync().await;
            }

            ServerMessage::ResyncState(state) => {
                self.replica.write().await.install(&state);
                let reconciled = self.pending.lock().await.reconcile(&state);
                if !reconciled.discarded.is_empty() {
                    log::warn!(
                        "{} pending operations predate v{} and were dropped",
                        reconciled.discarded.len(),
                        state.retained_from
                    );
                }
                for op in reconciled.resubmit {
                    self.send(ClientMessage::Submit(op)).await;
                }
                self.emit(SyncEvent::Resynced {
                    version: state.snapshot_version,
                    discarded: reconciled.discarded.len(),
                })
                .await;
            }

            ServerMessage::Applied(update) => {
                let status = self.replica.write().await.apply_remote(&update);
                match status {
                    ReplicaStatus::Applied => {
                        self.pending.lock().await.acknowledge(&update.op.op_id);
                        self.emit(SyncEvent::RemoteApplied {
                            version: update.version,
                            op_id: update.op.op_id,
                        })
                        .await;
                    }
                    ReplicaStatus::Ignored => {}
                    ReplicaStatus::Gap { expected, received } => {
                        log::debug!("Expected v{expected}, received v{received}; resyncing");
                        self.request_resync().await;
                    }
                    ReplicaStatus::Diverged(reason) => {
                        log::warn!("Replica diverged at v{}: {reason}", update.version);
                        self.request_resync().await;
                    }
                }
            }

            ServerMessage::Ack(response) => {
                let retry = matches!(&response, SubmitResponse::Rejected { code, .. } if code.is_retryable());
                if retry {
                    // Kept pending; the resync decides whether it is resent.
                    self.request_resync().await;
                } else {
                    self.pending.lock().await.acknowledge(response.op_id());
                }
                self.emit(SyncEvent::Acked(response)).await;
            }

            ServerMessage::Presence(event) => self.emit(SyncEvent::Presence(event)).await,
            ServerMessage::Versions(versions) => self.emit(SyncEvent::Versions(versions)).await,
            ServerMessage::VersionSaved(info) => self.emit(SyncEvent::VersionSaved(info)).await,

            ServerMessage::Error { code, message } => {
                if code == ErrorCode::SessionExpired {
                    log::info!("Session expired; rejoining artboard {}", self.artboard_id);
                    self.send(ClientMessage::Join {
                        artboard_id: self.artboard_id,
                        user_id: self.user_id,
                    })
                    .await;
                }
                self.emit(SyncEvent::Error { code, message }).await;
            }

            ServerMessage::ResyncRequired { current_version } => {
                log::debug!("Server at v{current_version} asked for a resync");
                self.request_resync().await;
            }

            ServerMessage::HeartbeatAck => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use canvas_core::{Field, FieldValue};

    fn op(board: ArtboardId, op_id: &str, base: u64) -> Operation {
        Operation::insert(op_id, board, Uuid::new_v4(), base, CanvasObject::rectangle(0.0, 0.0, 1.0, 1.0), 0)
    }

    fn resync_state(board: ArtboardId, recent: Vec<AppliedUpdate>, retained_from: u64) -> ResyncState {
        ResyncState {
            artboard_id: board,
            name: "Home".to_string(),
            width: 100.0,
            height: 100.0,
            snapshot_version: 50,
            objects: Vec::new(),
            recent_ops: recent,
            retained_from,
        }
    }

    #[test]
    fn test_client_creation() {
        let user = Uuid::new_v4();
        let board = Uuid::new_v4();
        let client = SyncClient::new(user, board, "ws://localhost:9090");

        assert_eq!(client.user_id(), user);
        assert_eq!(client.artboard_id(), board);
        assert_eq!(client.server_url(), "ws://localhost:9090");
    }

    #[tokio::test]
    async fn test_client_initial_state() {
        let client = SyncClient::new(Uuid::new_v4(), Uuid::new_v4(), "ws://localhost:9090");

        assert_eq!(client.connection_state().await, ConnectionState::Disconnected);
        assert_eq!(client.version().await, 0);
        assert_eq!(client.pending_len().await, 0);
        assert!(client.session_id().await.is_none());
    }

    #[tokio::test]
    async fn test_submit_offline_queues() {
        let client = SyncClient::new(Uuid::new_v4(), Uuid::new_v4(), "ws://localhost:9090");
        client.insert(CanvasObject::text(0.0, 0.0, "a")).await.unwrap();
        client.insert(CanvasObject::text(0.0, 0.0, "b")).await.unwrap();
        assert_eq!(client.pending_len().await, 2);
    }

    #[tokio::test]
    async fn test_cursor_offline_is_dropped() {
        let client = SyncClient::new(Uuid::new_v4(), Uuid::new_v4(), "ws://localhost:9090");
        client.move_cursor(Point::new(1.0, 1.0)).await.unwrap();
        assert!(client.select(Vec::new()).await.is_err());
    }

    #[tokio::test]
    async fn test_connect_failure_resets_state() {
        // Nothing listens on port 1.
        let mut client = SyncClient::new(Uuid::new_v4(), Uuid::new_v4(), "ws://127.0.0.1:1");
        assert!(client.connect().await.is_err());
        assert_eq!(client.connection_state().await, ConnectionState::Disconnected);
    }

    #[test]
    fn test_replica_detects_gap_and_duplicates() {
        let board = Uuid::new_v4();
        let mut replica = Replica::new(board);

        let mut source = Artboard::new(board, 10.0, 10.0);
        let first = source.apply(&op(board, "a", 0)).unwrap();
        let second = source.apply(&op(board, "b", 1)).unwrap();

        assert!(matches!(
            replica.apply_remote(&AppliedUpdate::from(&second)),
            ReplicaStatus::Gap { expected: 1, received: 2 }
        ));
        assert_eq!(replica.apply_remote(&AppliedUpdate::from(&first)), ReplicaStatus::Applied);
        assert_eq!(replica.apply_remote(&AppliedUpdate::from(&first)), ReplicaStatus::Ignored);
        assert_eq!(replica.apply_remote(&AppliedUpdate::from(&second)), ReplicaStatus::Applied);
        assert_eq!(replica.board().objects(), source.objects());
    }

    #[test]
    fn test_replica_divergence_reported() {
        let board = Uuid::new_v4();
        let mut replica = Replica::new(board);
        let bogus = Operation::update("u", board, Uuid::new_v4(), 0, Uuid::new_v4(), Field::X, FieldValue::Number(1.0));
        let update = AppliedUpdate {
            version: 1,
            op: bogus,
            removed: Vec::new(),
        };
        assert!(matches!(replica.apply_remote(&update), ReplicaStatus::Diverged(_)));
        assert_eq!(replica.version(), 0);
    }

    #[test]
    fn test_replica_install() {
        let board = Uuid::new_v4();
        let mut replica = Replica::new(board);
        let mut state = resync_state(board, Vec::new(), 0);
        state.objects.push(CanvasObject::ellipse(0.0, 0.0, 3.0, 3.0));
        replica.install(&state);
        assert_eq!(replica.version(), 50);
        assert_eq!(replica.board().len(), 1);
        assert_eq!(replica.board().dimensions(), (100.0, 100.0));
        assert_eq!(replica.board().name(), "Home");
    }

    #[test]
    fn test_pending_reconcile() {
        let board = Uuid::new_v4();
        let mut pending = PendingOps::new(10);
        pending.push(op(board, "done", 40));
        pending.push(op(board, "too-old", 5));
        pending.push(op(board, "retry", 45));

        let mut source = Artboard::new(board, 10.0, 10.0);
        let mut done = op(board, "done", 0);
        done.base_version = source.version();
        let applied = source.apply(&done).unwrap();

        let state = resync_state(board, vec![AppliedUpdate::from(&applied)], 30);
        let result = pending.reconcile(&state);

        assert_eq!(result.acknowledged, vec!["done".to_string()]);
        assert_eq!(result.discarded.len(), 1);
        assert_eq!(result.discarded[0].op_id, "too-old");
        assert_eq!(result.resubmit.len(), 1);
        assert_eq!(result.resubmit[0].op_id, "retry");
        assert_eq!(pending.len(), 1);
    }

    #[test]
    fn test_pending_capacity_and_ack() {
        let board = Uuid::new_v4();
        let mut pending = PendingOps::new(2);
        assert!(pending.push(op(board, "a", 0)));
        assert!(pending.push(op(board, "b", 0)));
        assert!(!pending.push(op(board, "c", 0)));

        assert!(pending.acknowledge("a").is_some());
        assert!(pending.acknowledge("a").is_none());
        assert_eq!(pending.len(), 1);
        pending.clear();
        assert!(pending.is_empty());
    }

    struct Wired {
        inbound: Inbound,
        // Holds the writer side open; `Inbound` only keeps a weak sender.
        _writer: mpsc::Sender<Vec<u8>>,
        sent: mpsc::Receiver<Vec<u8>>,
        _events: mpsc::Receiver<SyncEvent>,
    }

    fn wired(board: ArtboardId, pending: Arc<Mutex<PendingOps>>) -> Wired {
        let (out_tx, out_rx) = mpsc::channel(16);
        let (events, event_rx) = mpsc::channel(16);
        let inbound = Inbound {
            artboard_id: board,
            user_id: Uuid::new_v4(),
            outgoing: out_tx.downgrade(),
            events,
            session: Arc::new(RwLock::new(None)),
            replica: Arc::new(RwLock::new(Replica::new(board))),
            pending,
        };
        Wired {
            inbound,
            _writer: out_tx,
            sent: out_rx,
            _events: event_rx,
        }
    }

    async fn next_sent(rx: &mut mpsc::Receiver<Vec<u8>>) -> ClientMessage {
        ClientMessage::decode(&rx.recv().await.unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_timed_out_submit_is_resent_after_resync() {
        let board = Uuid::new_v4();
        let pending = Arc::new(Mutex::new(PendingOps::new(10)));
        let submitted = op(board, "slow", 0);
        pending.lock().await.push(submitted.clone());
        let Wired {
            inbound,
            _writer,
            mut sent,
            _events,
        } = wired(board, pending.clone());

        let timeout = SyncError::Timeout(std::time::Duration::from_secs(5));
        inbound
            .handle(ServerMessage::Ack(SubmitResponse::rejected("slow".into(), &timeout)))
            .await;
        assert_eq!(pending.lock().await.len(), 1);
        assert!(matches!(
            next_sent(&mut sent).await,
            ClientMessage::Resync { last_known_version: 0, .. }
        ));

        // Not among the applied ops, so it goes out again unchanged.
        inbound
            .handle(ServerMessage::ResyncState(resync_state(board, Vec::new(), 0)))
            .await;
        assert_eq!(next_sent(&mut sent).await, ClientMessage::Submit(submitted));
        assert_eq!(pending.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn test_closed_artboard_keeps_op_but_invalid_target_drops_it() {
        let board = Uuid::new_v4();
        let pending = Arc::new(Mutex::new(PendingOps::new(10)));
        pending.lock().await.push(op(board, "closed", 0));
        pending.lock().await.push(op(board, "bad", 0));
        let Wired {
            inbound,
            _writer,
            _events,
            ..
        } = wired(board, pending.clone());

        let closed = SyncError::ArtboardClosed(board);
        inbound
            .handle(ServerMessage::Ack(SubmitResponse::rejected("closed".into(), &closed)))
            .await;
        let invalid = SyncError::InvalidTarget(Uuid::new_v4());
        inbound
            .handle(ServerMessage::Ack(SubmitResponse::rejected("bad".into(), &invalid)))
            .await;

        let mut pending = pending.lock().await;
        assert_eq!(pending.len(), 1);
        assert!(pending.acknowledge("closed").is_some());
    }

    #[tokio::test]
    async fn test_take_event_rx() {
        let mut client = SyncClient::new(Uuid::new_v4(), Uuid::new_v4(), "ws://localhost:9090");

        // First take should succeed
        assert!(client.take_event_rx().is_some());
        // Second take should return None
        assert!(client.take_event_rx().is_none());
    }
}
