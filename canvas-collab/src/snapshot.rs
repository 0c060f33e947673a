//! Point-in-time artboard snapshots and named version history.

use std::sync::Arc;

use canvas_core::{now_millis, ArtboardId, Artboard, CanvasObject};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::protocol::VersionInfo;

pub type SnapshotId = Uuid;

/// Immutable copy of an artboard's objects at one version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionSnapshot {
    pub id: SnapshotId,
    pub artboard_id: ArtboardId,
    pub version: u64,
    /// `None` for periodic snapshots.
    pub name: Option<String>,
    pub description: Option<String>,
    pub objects: Vec<CanvasObject>,
    /// Milliseconds since the Unix epoch.
    pub created_at: u64,
}

impl VersionSnapshot {
    pub fn capture(board: &Artboard, name: Option<String>, description: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            artboard_id: board.id(),
            version: board.version(),
            name,
            description,
            objects: board.objects().to_vec(),
            created_at: now_millis(),
        }
    }

    pub fn is_named(&self) -> bool {
        self.name.is_some()
    }

    pub fn info(&self) -> VersionInfo {
        VersionInfo {
            snapshot_id: self.id,
            version: self.version,
            name: self.name.clone(),
            description: self.description.clone(),
            object_count: self.objects.len(),
            created_at: self.created_at,
        }
    }
}

/// Per-artboard snapshot history, owned by the coordinator.
#[derive(Debug)]
pub struct SnapshotManager {
    interval: u64,
    max_periodic: usize,
    since_last: u64,
    history: Vec<Arc<VersionSnapshot>>,
}

impl SnapshotManager {
    pub fn new(interval: u64, max_periodic: usize) -> Self {
        Self {
            interval: interval.max(1),
            max_periodic,
            since_last: 0,
            history: Vec::new(),
        }
    }

    /// Seed with versions loaded from storage.
    pub fn with_history(mut self, mut snapshots: Vec<VersionSnapshot>) -> Self {
        snapshots.sort_by_key(|s| (s.version, s.created_at));
        self.history = snapshots.into_iter().map(Arc::new).collect();
        self
    }

    /// Count one applied operation. Returns true when a periodic snapshot
    /// is due.
    pub fn note_applied(&mut self) -> bool {
        self.since_last += 1;
        if self.since_last >= self.interval {
            self.since_last = 0;
            true
        } else {
            false
        }
    }

    pub fn take_periodic(&mut self, board: &Artboard) -> Arc<VersionSnapshot> {
        let snapshot = Arc::new(VersionSnapshot::capture(board, None, None));
        self.history.push(snapshot.clone());

        let periodic = self.history.iter().filter(|s| !s.is_named()).count();
        let mut excess = periodic.saturating_sub(self.max_periodic);
        self.history.retain(|s| {
            if excess > 0 && !s.is_named() {
                excess -= 1;
                false
            } else {
                true
            }
        });
        snapshot
    }

    pub fn save_named(
        &mut self,
        board: &Artboard,
        name: String,
        description: Option<String>,
    ) -> Arc<VersionSnapshot> {
        let snapshot = Arc::new(VersionSnapshot::capture(board, Some(name), description));
        self.history.push(snapshot.clone());
        snapshot
    }

    pub fn get(&self, id: SnapshotId) -> Option<Arc<VersionSnapshot>> {
        self.history.iter().find(|s| s.id == id).cloned()
    }

    pub fn latest(&self) -> Option<Arc<VersionSnapshot>> {
        self.history.last().cloned()
    }

    /// Metadata only, oldest first.
    pub fn list(&self) -> Vec<VersionInfo> {
        self.history.iter().map(|s| s.info()).collect()
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use canvas_core::Operation;

    fn board_at(version: usize) -> Artboard {
        let mut board = Artboard::new(Uuid::new_v4(), 10.0, 10.0);
        let client = Uuid::new_v4();
        for i in 0..version {
            let obj = CanvasObject::rectangle(i as f64, 0.0, 1.0, 1.0);
            board
                .apply(&Operation::insert(format!("{i}"), board.id(), client, board.version(), obj, i))
                .unwrap();
        }
        board
    }

    #[test]
    fn test_periodic_due_every_interval() {
        let mut snaps = SnapshotManager::new(3, 4);
        let due: Vec<bool> = (0..7).map(|_| snaps.note_applied()).collect();
        assert_eq!(due, vec![false, false, true, false, false, true, false]);
    }

    #[test]
    fn test_periodic_retention_spares_named() {
        let mut snaps = SnapshotManager::new(1, 2);
        let board = board_at(1);
        let named = snaps.save_named(&board, "Before cleanup".into(), None);
        for _ in 0..5 {
            snaps.take_periodic(&board);
        }
        assert_eq!(snaps.len(), 3);
        assert!(snaps.get(named.id).is_some());
        assert_eq!(snaps.list().iter().filter(|v| v.name.is_none()).count(), 2);
    }

    #[test]
    fn test_capture_is_independent_of_later_edits() {
        let mut board = board_at(2);
        let mut snaps = SnapshotManager::new(100, 16);
        let snap = snaps.save_named(&board, "v2".into(), Some("two shapes".into()));
        let obj = CanvasObject::ellipse(0.0, 0.0, 1.0, 1.0);
        board
            .apply(&Operation::insert("late", board.id(), Uuid::new_v4(), 2, obj, 0))
            .unwrap();

        assert_eq!(snap.version, 2);
        assert_eq!(snap.objects.len(), 2);
        let info = snap.info();
        assert_eq!(info.object_count, 2);
        assert_eq!(info.description.as_deref(), Some("two shapes"));
    }

    #[test]
    fn test_with_history_sorted_by_version() {
        let board = Artboard::new(Uuid::new_v4(), 1.0, 1.0);
        let mut late = VersionSnapshot::capture(&board, Some("late".into()), None);
        late.version = 9;
        let early = VersionSnapshot::capture(&board, Some("early".into()), None);
        let snaps = SnapshotManager::new(10, 4).with_history(vec![late, early]);
        let names: Vec<_> = snaps.list().into_iter().filter_map(|v| v.name).collect();
        assert_eq!(names, vec!["early", "late"]);
        assert_eq!(snaps.latest().unwrap().version, 9);
    }
}
