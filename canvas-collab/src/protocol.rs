//! Binary wire protocol between canvas clients and the sync server.
//!
//! Every WebSocket binary frame carries exactly one bincode-encoded
//! [`ClientMessage`] (client → server) or [`ServerMessage`]
//! (server → client). Document updates and presence events share the
//! connection but come from independent channels, so only `Applied`
//! messages are ordered (by `version`).

use canvas_core::{AppliedOp, ArtboardId, CanvasObject, ClientId, ObjectId, OpId, Operation, Point};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::error::{ErrorCode, SyncError};
use crate::presence::{SessionId, UserId};

/// Client → server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClientMessage {
    /// Attach this connection to an artboard. Resumes a stale session of
    /// the same user if one exists.
    Join { artboard_id: ArtboardId, user_id: UserId },
    Submit(Operation),
    Resync { artboard_id: ArtboardId, last_known_version: u64 },
    Cursor(Point),
    Selection(Vec<ObjectId>),
    Heartbeat,
    Leave,
    SaveVersion { name: String, description: Option<String> },
    RestoreVersion { snapshot_id: Uuid },
    ListVersions,
}

/// Server → client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ServerMessage {
    Joined(JoinedInfo),
    Ack(SubmitResponse),
    /// One applied operation, in the artboard's total order.
    Applied(AppliedUpdate),
    Presence(PresenceEvent),
    ResyncState(ResyncState),
    Versions(Vec<VersionInfo>),
    VersionSaved(VersionInfo),
    Error { code: ErrorCode, message: String },
    /// This connection fell behind the broadcast buffer.
    ResyncRequired { current_version: u64 },
    HeartbeatAck,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinedInfo {
    pub session_id: SessionId,
    pub client_id: ClientId,
    pub artboard_id: ArtboardId,
    pub version: u64,
    pub resumed: bool,
    /// Selection carried over from a resumed session.
    pub selection: Vec<ObjectId>,
    pub peers: Vec<PeerPresence>,
}

/// Presence of another session at join time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerPresence {
    pub session_id: SessionId,
    pub client_id: ClientId,
    pub user_id: UserId,
    pub cursor: Option<Point>,
    pub selection: Vec<ObjectId>,
}

/// Outcome of a submitted operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SubmitResponse {
    Applied {
        op_id: OpId,
        version: u64,
        /// Transformed away entirely; nothing changed.
        noop: bool,
        /// The op id had already been applied; `version` is the original.
        duplicate: bool,
    },
    Rejected {
        op_id: OpId,
        code: ErrorCode,
        reason: String,
    },
}

impl SubmitResponse {
    pub fn rejected(op_id: OpId, err: &SyncError) -> Self {
        SubmitResponse::Rejected {
            op_id,
            code: err.code(),
            reason: err.to_string(),
        }
    }

    pub fn op_id(&self) -> &str {
        match self {
            SubmitResponse::Applied { op_id, .. } | SubmitResponse::Rejected { op_id, .. } => op_id,
        }
    }
}

/// Broadcast form of an applied operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedUpdate {
    pub version: u64,
    /// The operation as applied (after transformation).
    pub op: Operation,
    /// Objects that left the artboard; drop them from any selection.
    pub removed: Vec<ObjectId>,
}

impl From<&AppliedOp> for AppliedUpdate {
    fn from(applied: &AppliedOp) -> Self {
        Self {
            version: applied.version,
            op: applied.op.clone(),
            removed: applied.removed.clone(),
        }
    }
}

/// Ephemeral, unversioned per-session state changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PresenceEvent {
    Joined {
        session_id: SessionId,
        client_id: ClientId,
        user_id: UserId,
        resumed: bool,
    },
    Left {
        session_id: SessionId,
        client_id: ClientId,
        user_id: UserId,
    },
    Cursor {
        session_id: SessionId,
        client_id: ClientId,
        position: Point,
        /// Per-session sequence; receivers keep the highest.
        seq: u64,
    },
    Selection {
        session_id: SessionId,
        client_id: ClientId,
        selection: Vec<ObjectId>,
    },
    Stale {
        session_id: SessionId,
        client_id: ClientId,
    },
}

impl PresenceEvent {
    pub fn client_id(&self) -> ClientId {
        match self {
            PresenceEvent::Joined { client_id, .. }
            | PresenceEvent::Left { client_id, .. }
            | PresenceEvent::Cursor { client_id, .. }
            | PresenceEvent::Selection { client_id, .. }
            | PresenceEvent::Stale { client_id, .. } => *client_id,
        }
    }
}

/// Answer to a resync request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResyncState {
    pub artboard_id: ArtboardId,
    pub name: String,
    pub width: f64,
    pub height: f64,
    /// Version of `objects`; always the artboard's current version.
    pub snapshot_version: u64,
    pub objects: Vec<CanvasObject>,
    /// Retained applied operations newer than the requested version.
    pub recent_ops: Vec<AppliedUpdate>,
    /// Oldest base version the server can still transform.
    pub retained_from: u64,
}

/// Metadata of a saved snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionInfo {
    pub snapshot_id: Uuid,
    pub version: u64,
    pub name: Option<String>,
    pub description: Option<String>,
    pub object_count: usize,
    pub created_at: u64,
}

/// Protocol errors.
#[derive(Debug, Clone, Error)]
pub enum ProtocolError {
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("deserialization error: {0}")]
    Deserialization(String),
    #[error("connection closed")]
    ConnectionClosed,
    #[error("connection timeout")]
    Timeout,
    #[error("pending operation queue is full")]
    QueueFull,
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, ProtocolError> {
    bincode::serde::encode_to_vec(value, bincode::config::standard())
        .map_err(|e| ProtocolError::Serialization(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, ProtocolError> {
    let (value, read) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .map_err(|e| ProtocolError::Deserialization(e.to_string()))?;
    if read != bytes.len() {
        return Err(ProtocolError::Deserialization(format!(
            "{} trailing bytes",
            bytes.len() - read
        )));
    }
    Ok(value)
}

impl ClientMessage {
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        encode(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        decode(bytes)
    }
}

impl ServerMessage {
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        encode(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        decode(bytes)
    }

    pub fn error(err: &SyncError) -> Self {
        ServerMessage::Error {
            code: err.code(),
            message: err.to_string(),
        }
    }
}
