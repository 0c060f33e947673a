//! Persistence integration tests.
//!
//! Verifies:
//! - Cold start replays the journal on top of the latest snapshot
//! - Restart after shutdown: state and saved versions survive
//! - Periodic snapshots compact the journal
//! - Recovery opens every stored artboard
//! - A gap in the journal stops replay at the last contiguous version
//! - Artboard names and deleted ids survive a restart

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use canvas_collab::{ArtboardStore, EngineConfig, RocksStore, StoreConfig, SyncEngine};
use canvas_core::{AppliedOp, Artboard, CanvasObject, Field, FieldValue, Operation};
use tempfile::tempdir;
use uuid::Uuid;

// ─── Helpers ─────────────────────────────────────────────────────────────────

/// Open a store, retrying while a previous handle still holds the lock.
async fn open_store(path: &Path) -> Arc<RocksStore> {
    for _ in 0..50 {
        match RocksStore::open(StoreConfig::for_testing(path)) {
            Ok(store) => return Arc::new(store),
            Err(_) => tokio::time::sleep(Duration::from_millis(20)).await,
        }
    }
    panic!("database at {} stayed locked", path.display());
}

fn engine_on(store: Arc<RocksStore>) -> SyncEngine {
    SyncEngine::new(EngineConfig::for_testing(), store)
}

/// Apply `count` inserts to a scratch board, returning the journal entries.
fn scratch_history(board: &mut Artboard, count: usize) -> Vec<AppliedOp> {
    let client = Uuid::new_v4();
    (0..count)
        .map(|i| {
            let obj = CanvasObject::rectangle(i as f64, 0.0, 1.0, 1.0);
            let op = Operation::insert(format!("op-{i}"), board.id(), client, board.version(), obj, board.len());
            board.apply(&op).unwrap()
        })
        .collect()
}

async fn insert_many(engine: &SyncEngine, artboard: Uuid, count: usize) {
    let client = Uuid::new_v4();
    for i in 0..count {
        let version = engine.snapshot(artboard).await.unwrap().version();
        let obj = CanvasObject::text(0.0, i as f64, format!("row {i}"));
        let op = Operation::insert(Uuid::new_v4().to_string(), artboard, client, version, obj, 0);
        engine.submit(op).await.unwrap();
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_cold_start_replays_journal() {
    let dir = tempdir().unwrap();
    let store = open_store(dir.path()).await;
    let artboard = Uuid::new_v4();

    let mut expected = Artboard::new(artboard, 1920.0, 1080.0);
    for applied in scratch_history(&mut expected, 7) {
        store.append_operation(artboard, &applied).unwrap();
    }

    let engine = engine_on(store);
    let state = engine.snapshot(artboard).await.unwrap();
    assert_eq!(state.version(), 7);
    assert_eq!(state.objects(), expected.objects());

    // Replayed ops are known to the duplicate check.
    let again = Operation::insert("op-3", artboard, Uuid::new_v4(), 7, CanvasObject::group(), 0);
    let outcome = engine.submit(again).await.unwrap();
    assert!(outcome.duplicate);
    assert_eq!(outcome.version, 4);
}

#[tokio::test]
async fn test_state_survives_restart() {
    let dir = tempdir().unwrap();
    let artboard = Uuid::new_v4();

    let (before, saved) = {
        let engine = engine_on(open_store(dir.path()).await);
        insert_many(&engine, artboard, 5).await;
        let first = engine.snapshot(artboard).await.unwrap().objects()[0].id;
        let op = Operation::update("recolor", artboard, Uuid::new_v4(), 5, first, Field::Opacity, FieldValue::Number(0.5));
        engine.submit(op).await.unwrap();
        let saved = engine.save_version(artboard, "checkpoint".into(), Some("six ops".into())).await.unwrap();
        let before = engine.snapshot(artboard).await.unwrap();
        engine.shutdown().await;
        (before, saved)
    };

    let engine = engine_on(open_store(dir.path()).await);
    let after = engine.snapshot(artboard).await.unwrap();
    assert_eq!(after.version(), before.version());
    assert_eq!(after.objects(), before.objects());

    let versions = engine.list_versions(artboard).await.unwrap();
    let kept = versions
        .iter()
        .find(|v| v.snapshot_id == saved.snapshot_id)
        .expect("named version should survive a restart");
    assert_eq!(kept.name.as_deref(), Some("checkpoint"));
    assert_eq!(kept.version, 6);

    // Restoring it still works after the restart.
    insert_many(&engine, artboard, 1).await;
    let outcome = engine.restore_version(artboard, Uuid::new_v4(), saved.snapshot_id).await.unwrap();
    assert_eq!(outcome.version, 8);
    assert_eq!(engine.snapshot(artboard).await.unwrap().objects(), before.objects());
}

#[tokio::test]
async fn test_periodic_snapshot_compacts_journal() {
    let dir = tempdir().unwrap();
    let store = open_store(dir.path()).await;
    let artboard = Uuid::new_v4();
    let engine = engine_on(store.clone());

    // Snapshot interval is 10 in the test config.
    insert_many(&engine, artboard, 25).await;

    let persisted = store.load_artboard(artboard).unwrap().expect("snapshot written");
    assert_eq!(persisted.version(), 20);
    let journal = store.load_operations_since(artboard, persisted.version()).unwrap();
    let versions: Vec<u64> = journal.iter().map(|a| a.version).collect();
    assert_eq!(versions, vec![21, 22, 23, 24, 25]);
    assert!(store.load_operations_since(artboard, 0).unwrap().len() <= 5);
}

#[tokio::test]
async fn test_recover_opens_every_artboard() {
    let dir = tempdir().unwrap();
    let boards = [Uuid::new_v4(), Uuid::new_v4()];
    {
        let engine = engine_on(open_store(dir.path()).await);
        for board in boards {
            insert_many(&engine, board, 3).await;
        }
        engine.shutdown().await;
    }

    let engine = engine_on(open_store(dir.path()).await);
    assert_eq!(engine.artboard_count().await, 0);
    assert_eq!(engine.recover().await.unwrap(), 2);
    assert_eq!(engine.artboard_count().await, 2);
    for board in boards {
        assert_eq!(engine.existing(board).await.unwrap().version(), 3);
    }
}

#[tokio::test]
async fn test_journal_gap_stops_replay() {
    let dir = tempdir().unwrap();
    let store = open_store(dir.path()).await;
    let artboard = Uuid::new_v4();

    let mut scratch = Artboard::new(artboard, 100.0, 100.0);
    let history = scratch_history(&mut scratch, 4);
    for applied in history.iter().filter(|a| a.version != 3) {
        store.append_operation(artboard, applied).unwrap();
    }

    let engine = engine_on(store);
    let state = engine.snapshot(artboard).await.unwrap();
    assert_eq!(state.version(), 2);
    assert_eq!(state.len(), 2);
}

#[tokio::test]
async fn test_name_and_deleted_ids_survive_restart() {
    let dir = tempdir().unwrap();
    let artboard = Uuid::new_v4();
    let client = Uuid::new_v4();
    let shape = CanvasObject::rectangle(0.0, 0.0, 4.0, 4.0);

    {
        let config = EngineConfig {
            default_name: "Wireframes".into(),
            ..EngineConfig::for_testing()
        };
        let engine = SyncEngine::new(config, open_store(dir.path()).await);
        engine
            .submit(Operation::insert("add", artboard, client, 0, shape.clone(), 0))
            .await
            .unwrap();
        engine.submit(Operation::delete("del", artboard, client, 1, shape.id)).await.unwrap();
        engine.shutdown().await;
    }

    let engine = engine_on(open_store(dir.path()).await);
    let state = engine.resync(artboard, 0).await.unwrap();
    assert_eq!(state.name, "Wireframes");
    assert_eq!(state.snapshot_version, 2);

    let again = Operation::insert("re-add", artboard, client, 2, shape, 0);
    assert!(engine.submit(again).await.is_err());
    assert!(engine.snapshot(artboard).await.unwrap().is_empty());
}
