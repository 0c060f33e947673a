//! WebSocket sync server.
//!
//! Architecture:
//! ```text
//! Client A ──┐                 ┌── Coordinator (artboard 1) ── BroadcastGroup
//!             ├── SyncEngine ──┤            │
//! Client B ──┘        │        └── Coordinator (artboard 2) ── BroadcastGroup
//!                     │                     │
//!               SessionManager        ArtboardStore (RocksDB or memory)
//! ```
//!
//! Each connection runs a reader loop and a writer task. Everything the
//! connection sends (replies and broadcast frames alike) goes through one
//! outbound queue, so a client sees its messages in the order they were
//! produced.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio_tungstenite::tungstenite::Message;

use canvas_core::{ArtboardId, ClientId};

use crate::broadcast::Frame;
use crate::config::EngineConfig;
use crate::coordinator::CoordinatorHandle;
use crate::engine::SyncEngine;
use crate::error::{ErrorCode, SyncError};
use crate::presence::SessionId;
use crate::protocol::{ClientMessage, ServerMessage, SubmitResponse};
use crate::storage::{ArtboardStore, MemoryStore, RocksStore, StoreConfig};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Outbound frames a connection may have queued before it is considered
/// too slow.
const OUTBOUND_QUEUE: usize = 512;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Persistence storage path (None = in-memory only)
    pub storage_path: Option<PathBuf>,
    /// How often heartbeat timeouts are checked
    pub sweep_interval: Duration,
    pub engine: EngineConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9090".to_string(),
            storage_path: None,
            sweep_interval: Duration::from_secs(5),
            engine: EngineConfig::default(),
        }
    }
}

/// Server statistics.
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_messages: u64,
    pub total_bytes: u64,
    pub applied_ops: u64,
    pub rejected_ops: u64,
    pub malformed_messages: u64,
    pub active_artboards: usize,
}

/// The sync server.
pub struct SyncServer {
    config: ServerConfig,
    engine: Arc<SyncEngine>,
    /// Server-wide statistics
    stats: Arc<RwLock<ServerStats>>,
}

impl SyncServer {
    /// Create a server, opening persistent storage if configured.
    pub fn new(config: ServerConfig) -> Result<Self, SyncError> {
        let store: Arc<dyn ArtboardStore> = match &config.storage_path {
            Some(path) => Arc::new(RocksStore::open(StoreConfig {
                path: path.clone(),
                ..StoreConfig::default()
            })?),
            None => Arc::new(MemoryStore::new()),
        };
        let engine = Arc::new(SyncEngine::new(config.engine.clone(), store));
        Ok(Self {
            config,
            engine,
            stats: Arc::new(RwLock::new(ServerStats::default())),
        })
    }

    /// Create with default configuration (in-memory, no persistence).
    pub fn with_defaults() -> Self {
        let config = ServerConfig::default();
        let engine = Arc::new(SyncEngine::in_memory(config.engine.clone()));
        Self {
            config,
            engine,
            stats: Arc::new(RwLock::new(ServerStats::default())),
        }
    }

    /// Create with persistence enabled at the given path.
    pub fn with_storage(bind_addr: impl Into<String>, path: impl Into<PathBuf>) -> Result<Self, SyncError> {
        Self::new(ServerConfig {
            bind_addr: bind_addr.into(),
            storage_path: Some(path.into()),
            ..ServerConfig::default()
        })
    }

    /// Recover persisted artboards, bind, and serve until an accept error.
    pub async fn run(&self) -> Result<(), BoxError> {
        let recovered = self.engine.recover().await?;
        if recovered > 0 {
            log::info!("Recovered {recovered} artboards from persistent storage");
        }

        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!("Sync server listening on {}", self.config.bind_addr);
        self.serve(listener).await
    }

    /// Accept connections on an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), BoxError> {
        let sweeper = {
            let engine = self.engine.clone();
            let period = self.config.sweep_interval;
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                loop {
                    ticker.tick().await;
                    let report = engine.sweep().await;
                    if !report.stale.is_empty() || !report.closed.is_empty() {
                        log::debug!(
                            "Sweep: {} sessions stale, {} closed",
                            report.stale.len(),
                            report.closed.len()
                        );
                    }
                }
            })
        };

        let result = loop {
            let (stream, addr) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => break Err(e.into()),
            };
            log::debug!("New TCP connection from {addr}");

            let engine = self.engine.clone();
            let stats = self.stats.clone();
            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, addr, engine, stats).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        };

        sweeper.abort();
        result
    }

    /// Handle a single WebSocket connection.
    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        engine: Arc<SyncEngine>,
        stats: Arc<RwLock<ServerStats>>,
    ) -> Result<(), BoxError> {
        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();
        log::info!("WebSocket connection established from {addr}");

        {
            let mut s = stats.write().await;
            s.total_connections += 1;
            s.active_connections += 1;
        }

        let (outbound, mut outbound_rx) = mpsc::channel::<Message>(OUTBOUND_QUEUE);
        let writer = tokio::spawn(async move {
            while let Some(msg) = outbound_rx.recv().await {
                if let Err(e) = ws_sender.send(msg).await {
                    log::debug!("Write to {addr} failed: {e}");
                    break;
                }
            }
            let _ = ws_sender.close().await;
        });

        let mut conn = Connection {
            engine,
            stats: stats.clone(),
            outbound,
            attached: None,
            document_rx: None,
            presence_rx: None,
        };

        loop {
            tokio::select! {
                msg = ws_receiver.next() => {
                    match msg {
                        Some(Ok(Message::Binary(data))) => {
                            if conn.on_frame(&data).await.is_err() {
                                break;
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            log::info!("Connection closed from {addr}");
                            break;
                        }
                        Some(Ok(Message::Ping(data))) => {
                            if conn.outbound.send(Message::Pong(data)).await.is_err() {
                                break;
                            }
                        }
                        Some(Err(e)) => {
                            log::error!("WebSocket error from {addr}: {e}");
                            break;
                        }
                        _ => {}
                    }
                }

                frame = recv_frame(conn.document_rx.as_mut()) => {
                    if conn.on_document(frame).await.is_err() {
                        break;
                    }
                }

                frame = recv_frame(conn.presence_rx.as_mut()) => {
                    if conn.on_presence(frame).await.is_err() {
                        break;
                    }
                }
            }
        }

        // A dropped connection leaves the session resumable.
        if let Some(attached) = conn.attached.take() {
            conn.engine.disconnect(attached.session_id).await;
        }
        drop(conn);
        let _ = writer.await;

        let mut s = stats.write().await;
        s.active_connections = s.active_connections.saturating_sub(1);
        Ok(())
    }

    /// Get server statistics.
    pub async fn stats(&self) -> ServerStats {
        let mut stats = self.stats.read().await.clone();
        stats.active_artboards = self.engine.artboard_count().await;
        stats
    }

    /// Get the configured bind address.
    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    /// Persist every open artboard and stop its coordinator.
    pub async fn shutdown(&self) {
        self.engine.shutdown().await;
    }
}

async fn recv_frame(rx: Option<&mut broadcast::Receiver<Frame>>) -> Result<Frame, RecvError> {
    match rx {
        Some(rx) => rx.recv().await,
        // Not joined yet; wait forever
        None => std::future::pending().await,
    }
}

/// Outbound queue closed: the writer task is gone.
struct Closed;

struct Attached {
    session_id: SessionId,
    client_id: ClientId,
    artboard_id: ArtboardId,
    handle: CoordinatorHandle,
}

/// Per-connection state.
struct Connection {
    engine: Arc<SyncEngine>,
    stats: Arc<RwLock<ServerStats>>,
    outbound: mpsc::Sender<Message>,
    attached: Option<Attached>,
    document_rx: Option<broadcast::Receiver<Frame>>,
    presence_rx: Option<broadcast::Receiver<Frame>>,
}

impl Connection {
    async fn send(&self, msg: ServerMessage) -> Result<(), Closed> {
        match msg.encode() {
            Ok(bytes) => self.outbound.send(Message::Binary(bytes.into())).await.map_err(|_| Closed),
            Err(e) => {
                log::error!("Failed to encode server message: {e}");
                Ok(())
            }
        }
    }

    async fn on_frame(&mut self, data: &[u8]) -> Result<(), Closed> {
        {
            let mut s = self.stats.write().await;
            s.total_messages += 1;
            s.total_bytes += data.len() as u64;
        }
        match ClientMessage::decode(data) {
            Ok(msg) => self.on_message(msg).await,
            Err(e) => {
                log::warn!("Malformed frame: {e}");
                self.stats.write().await.malformed_messages += 1;
                self.send(ServerMessage::Error {
                    code: ErrorCode::Malformed,
                    message: e.to_string(),
                })
                .await
            }
        }
    }

    async fn on_message(&mut self, msg: ClientMessage) -> Result<(), Closed> {
        match msg {
            ClientMessage::Join { artboard_id, user_id } => {
                if let Some(previous) = self.attached.take() {
                    self.engine.leave(previous.session_id).await;
                }
                match self.engine.join(artboard_id, user_id).await {
                    Ok(attachment) => {
                        self.document_rx = Some(attachment.subscription.document);
                        self.presence_rx = Some(attachment.subscription.presence);
                        self.attached = Some(Attached {
                            session_id: attachment.info.session_id,
                            client_id: attachment.info.client_id,
                            artboard_id,
                            handle: attachment.handle,
                        });
                        self.send(ServerMessage::Joined(attachment.info)).await
                    }
                    Err(e) => self.send(ServerMessage::error(&e)).await,
                }
            }

            ClientMessage::Submit(op) => {
                let op_id = op.op_id.clone();
                let result = match &self.attached {
                    None => Err(SyncError::NotJoined),
                    Some(a) if a.artboard_id != op.artboard_id => Err(SyncError::InvalidPayload(
                        "operation targets a different artboard".into(),
                    )),
                    Some(_) => self.engine.submit(op).await,
                };
                let response = match result {
                    Ok(outcome) => {
                        if !outcome.noop && !outcome.duplicate {
                            self.stats.write().await.applied_ops += 1;
                        }
                        SubmitResponse::from(outcome)
                    }
                    Err(e) => {
                        self.stats.write().await.rejected_ops += 1;
                        SubmitResponse::rejected(op_id, &e)
                    }
                };
                self.send(ServerMessage::Ack(response)).await
            }

            ClientMessage::Resync { artboard_id, last_known_version } => {
                match self.engine.resync(artboard_id, last_known_version).await {
                    Ok(state) => self.send(ServerMessage::ResyncState(state)).await,
                    Err(e) => self.send(ServerMessage::error(&e)).await,
                }
            }

            ClientMessage::Cursor(position) => {
                let result = match &self.attached {
                    Some(a) => self.engine.update_cursor(a.session_id, position).await.map(|_| ()),
                    None => Err(SyncError::NotJoined),
                };
                self.reply_on_error(result).await
            }

            ClientMessage::Selection(ids) => {
                let result = match &self.attached {
                    Some(a) => self.engine.update_selection(a.session_id, ids).await.map(|_| ()),
                    None => Err(SyncError::NotJoined),
                };
                self.reply_on_error(result).await
            }

            ClientMessage::Heartbeat => {
                let result = match &self.attached {
                    Some(a) => self.engine.heartbeat(a.session_id).await.map(|_| ()),
                    None => Err(SyncError::NotJoined),
                };
                match result {
                    Ok(()) => self.send(ServerMessage::HeartbeatAck).await,
                    Err(e) => self.send(ServerMessage::error(&e)).await,
                }
            }

            ClientMessage::Leave => {
                if let Some(attached) = self.attached.take() {
                    self.engine.leave(attached.session_id).await;
                }
                self.document_rx = None;
                self.presence_rx = None;
                Ok(())
            }

            ClientMessage::SaveVersion { name, description } => {
                let result = match &self.attached {
                    Some(a) => self.engine.save_version(a.artboard_id, name, description).await,
                    None => Err(SyncError::NotJoined),
                };
                match result {
                    Ok(info) => self.send(ServerMessage::VersionSaved(info)).await,
                    Err(e) => self.send(ServerMessage::error(&e)).await,
                }
            }

            ClientMessage::RestoreVersion { snapshot_id } => {
                let result = match &self.attached {
                    Some(a) => {
                        self.engine
                            .restore_version(a.artboard_id, a.client_id, snapshot_id)
                            .await
                    }
                    None => Err(SyncError::NotJoined),
                };
                match result {
                    Ok(outcome) => self.send(ServerMessage::Ack(outcome.into())).await,
                    Err(e) => self.send(ServerMessage::error(&e)).await,
                }
            }

            ClientMessage::ListVersions => {
                let result = match &self.attached {
                    Some(a) => self.engine.list_versions(a.artboard_id).await,
                    None => Err(SyncError::NotJoined),
                };
                match result {
                    Ok(versions) => self.send(ServerMessage::Versions(versions)).await,
                    Err(e) => self.send(ServerMessage::error(&e)).await,
                }
            }
        }
    }

    async fn reply_on_error(&self, result: Result<(), SyncError>) -> Result<(), Closed> {
        match result {
            Ok(()) => Ok(()),
            Err(e) => self.send(ServerMessage::error(&e)).await,
        }
    }

    async fn on_document(&mut self, frame: Result<Frame, RecvError>) -> Result<(), Closed> {
        match frame {
            Ok(frame) => self.forward(frame).await,
            Err(RecvError::Lagged(n)) => {
                let current_version = match &self.attached {
                    Some(a) => {
                        a.handle.channels().record_lag(n);
                        a.handle.version()
                    }
                    None => 0,
                };
                log::warn!("Connection lagged by {n} applied operations; resync required");
                self.send(ServerMessage::ResyncRequired { current_version }).await
            }
            Err(RecvError::Closed) => {
                self.document_rx = None;
                Ok(())
            }
        }
    }

    async fn on_presence(&mut self, frame: Result<Frame, RecvError>) -> Result<(), Closed> {
        match frame {
            Ok(frame) => {
                let own = self.attached.as_ref().map(|a| a.client_id);
                if frame.origin.is_some() && frame.origin == own {
                    return Ok(());
                }
                self.forward(frame).await
            }
            // Presence is ephemeral; newer updates supersede what was lost.
            Err(RecvError::Lagged(n)) => {
                log::debug!("Presence lagged by {n} events");
                Ok(())
            }
            Err(RecvError::Closed) => {
                self.presence_rx = None;
                Ok(())
            }
        }
    }

    async fn forward(&self, frame: Frame) -> Result<(), Closed> {
        self.outbound
            .send(Message::Binary(frame.bytes.to_vec().into()))
            .await
            .map_err(|_| Closed)
    }
}
