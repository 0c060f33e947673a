//! # canvas-collab: real-time synchronization for shared artboards
//!
//! A central server orders every edit to an artboard, transforms late
//! edits over the ones applied since their base version, and fans the
//! result out to all connected clients. Presence (cursors, selections) is
//! a separate, unversioned channel.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     WebSocket      ┌─────────────┐
//! │ SyncClient  │ ◄────────────────► │ SyncServer  │
//! │ (per user)  │    Binary Proto    │ (central)   │
//! └──────┬──────┘                    └──────┬──────┘
//!        │                                  │
//!        ▼                                  ▼
//! ┌─────────────┐                    ┌─────────────┐      ┌────────────────┐
//! │ Replica     │                    │ SyncEngine  │ ───► │ SessionManager │
//! │ + pending   │                    └──────┬──────┘      └────────────────┘
//! └─────────────┘                           │ one per artboard
//!                                    ┌──────┴──────┐
//!                                    │ Coordinator │ ── OpLog, snapshots
//!                                    └──────┬──────┘
//!                              ┌────────────┼─────────────┐
//!                              ▼                          ▼
//!                     ┌────────────────┐         ┌────────────────┐
//!                     │ BroadcastGroup │         │ ArtboardStore  │
//!                     │ (fan-out)      │         │ RocksDB/memory │
//!                     └────────────────┘         └────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`]: Binary wire protocol (bincode-encoded messages)
//! - [`coordinator`]: Per-artboard single-writer actor
//! - [`engine`]: Artboard registry and session routing
//! - [`presence`]: Sessions, heartbeats, cursors, selections
//! - [`broadcast`]: Per-artboard fan-out with backpressure
//! - [`history`]: Bounded applied-operation log
//! - [`snapshot`]: Periodic and named snapshots
//! - [`storage`]: Persistence (RocksDB + LZ4, or in-memory)
//! - [`server`]: WebSocket sync server
//! - [`client`]: WebSocket sync client with replica and pending queue

pub mod broadcast;
pub mod client;
pub mod config;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod history;
pub mod presence;
pub mod protocol;
pub mod server;
pub mod snapshot;
pub mod storage;

// Re-exports for convenience
pub use broadcast::{BroadcastGroup, BroadcastStats, Frame, Subscription};
pub use client::{ConnectionState, PendingOps, Reconciled, Replica, ReplicaStatus, SyncClient, SyncEvent};
pub use config::EngineConfig;
pub use coordinator::{CoordinatorHandle, LiveObjects, SubmitOutcome};
pub use engine::{Attachment, SyncEngine};
pub use error::{ErrorCode, SyncError};
pub use history::OpLog;
pub use presence::{Session, SessionId, SessionManager, SessionState, SweepReport, UserId};
pub use protocol::{
    AppliedUpdate, ClientMessage, JoinedInfo, PeerPresence, PresenceEvent, ProtocolError, ResyncState,
    ServerMessage, SubmitResponse, VersionInfo,
};
pub use server::{ServerConfig, ServerStats, SyncServer};
pub use snapshot::{SnapshotId, SnapshotManager, VersionSnapshot};
pub use storage::{ArtboardStore, MemoryStore, RocksStore, StoreConfig, StoreError};
