//! In-memory store for tests and ephemeral servers.

use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use canvas_core::{AppliedOp, ArtboardId, Artboard};

use super::{ArtboardStore, StoreError};
use crate::snapshot::VersionSnapshot;

#[derive(Default)]
struct Tables {
    artboards: HashMap<ArtboardId, Artboard>,
    operations: HashMap<ArtboardId, BTreeMap<u64, AppliedOp>>,
    versions: HashMap<ArtboardId, Vec<VersionSnapshot>>,
}

/// Keeps everything in process memory; lost on restart.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>, StoreError> {
        self.tables
            .read()
            .map_err(|e| StoreError::Database(format!("Lock error: {e}")))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>, StoreError> {
        self.tables
            .write()
            .map_err(|e| StoreError::Database(format!("Lock error: {e}")))
    }

    /// Journal length for an artboard.
    pub fn journal_len(&self, artboard_id: ArtboardId) -> Result<usize, StoreError> {
        Ok(self.read()?.operations.get(&artboard_id).map_or(0, BTreeMap::len))
    }
}

impl ArtboardStore for MemoryStore {
    fn load_artboard(&self, id: ArtboardId) -> Result<Option<Artboard>, StoreError> {
        Ok(self.read()?.artboards.get(&id).cloned())
    }

    fn persist(&self, artboard: &Artboard) -> Result<(), StoreError> {
        let mut tables = self.write()?;
        let version = artboard.version();
        if let Some(journal) = tables.operations.get_mut(&artboard.id()) {
            journal.retain(|v, _| *v > version);
        }
        tables.artboards.insert(artboard.id(), artboard.clone());
        Ok(())
    }

    fn append_operation(&self, artboard_id: ArtboardId, applied: &AppliedOp) -> Result<(), StoreError> {
        self.write()?
            .operations
            .entry(artboard_id)
            .or_default()
            .insert(applied.version, applied.clone());
        Ok(())
    }

    fn load_operations_since(
        &self,
        artboard_id: ArtboardId,
        version: u64,
    ) -> Result<Vec<AppliedOp>, StoreError> {
        let tables = self.read()?;
        Ok(tables
            .operations
            .get(&artboard_id)
            .map(|journal| {
                journal
                    .range(version.saturating_add(1)..)
                    .map(|(_, op)| op.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    fn save_version(&self, snapshot: &VersionSnapshot) -> Result<(), StoreError> {
        self.write()?
            .versions
            .entry(snapshot.artboard_id)
            .or_default()
            .push(snapshot.clone());
        Ok(())
    }

    fn load_versions(&self, artboard_id: ArtboardId) -> Result<Vec<VersionSnapshot>, StoreError> {
        Ok(self.read()?.versions.get(&artboard_id).cloned().unwrap_or_default())
    }

    fn list_artboards(&self) -> Result<Vec<ArtboardId>, StoreError> {
        let tables = self.read()?;
        let mut ids: Vec<ArtboardId> = tables
            .artboards
            .keys()
            .chain(tables.operations.keys())
            .copied()
            .collect();
        ids.sort();
        ids.dedup();
        Ok(ids)
    }
}
