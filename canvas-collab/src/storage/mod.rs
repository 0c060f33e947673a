//! Persistence collaborator for artboards.
//!
//! ```text
//! ┌─────────────┐  append_operation   ┌────────────────────────────────────┐
//! │ Coordinator │ ──────────────────► │ ArtboardStore                      │
//! │ (per board) │  persist / versions │  ├── artboards  latest snapshot    │
//! └──────┬──────┘ ──────────────────► │  ├── operations journal since it   │
//!        │                            │  └── versions   named snapshots    │
//!        │ cold start                 └────────────────────────────────────┘
//!        ▼
//!  load_artboard + load_operations_since(snapshot.version)
//! ```
//!
//! Calls are synchronous; the coordinator owns the only writer for an
//! artboard so implementations need no per-artboard ordering of their own.

pub mod memory;
pub mod rocks;

use canvas_core::{AppliedOp, ArtboardId, Artboard};
use thiserror::Error;

use crate::snapshot::VersionSnapshot;

pub use memory::MemoryStore;
pub use rocks::{RocksStore, StoreConfig};

/// Storage errors.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),
    #[error("artboard not found: {0}")]
    NotFound(ArtboardId),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("deserialization error: {0}")]
    Deserialization(String),
    #[error("compression error: {0}")]
    Compression(String),
}

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

pub trait ArtboardStore: Send + Sync {
    /// Latest persisted snapshot, if the artboard was ever persisted.
    fn load_artboard(&self, id: ArtboardId) -> Result<Option<Artboard>, StoreError>;

    /// Store a full snapshot and drop journal entries it covers.
    fn persist(&self, artboard: &Artboard) -> Result<(), StoreError>;

    /// Journal one applied operation.
    fn append_operation(&self, artboard_id: ArtboardId, applied: &AppliedOp) -> Result<(), StoreError>;

    /// Journaled operations with version greater than `version`, in order.
    fn load_operations_since(
        &self,
        artboard_id: ArtboardId,
        version: u64,
    ) -> Result<Vec<AppliedOp>, StoreError>;

    fn save_version(&self, snapshot: &VersionSnapshot) -> Result<(), StoreError>;

    fn load_versions(&self, artboard_id: ArtboardId) -> Result<Vec<VersionSnapshot>, StoreError>;

    /// Every artboard with a snapshot or journal.
    fn list_artboards(&self) -> Result<Vec<ArtboardId>, StoreError>;
}

pub(crate) fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
    bincode::serde::encode_to_vec(value, bincode::config::standard())
        .map_err(|e| StoreError::Serialization(e.to_string()))
}

pub(crate) fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, StoreError> {
    let (value, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .map_err(|e| StoreError::Deserialization(e.to_string()))?;
    Ok(value)
}
