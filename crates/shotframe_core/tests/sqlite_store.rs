use rusqlite::Connection;
use shotframe_core::{
    ExchangeCoordinator, FrameAssignment, PositionKey, SequenceSnapshot, SequenceStore,
    SqliteSequenceStore, StoreError, SwapOutcome,
};

fn key(value: f64) -> Option<PositionKey> {
    PositionKey::new(value)
}

#[test]
fn unmigrated_connection_is_rejected() {
    let conn = Connection::open_in_memory().unwrap();
    let err = SqliteSequenceStore::try_new(conn).err().unwrap();
    assert!(matches!(
        err,
        StoreError::UninitializedConnection {
            actual_version: 0,
            ..
        }
    ));
}

#[test]
fn inserting_into_missing_shot_fails() {
    let store = SqliteSequenceStore::open_in_memory().unwrap();
    let err = store.insert_item(uuid::Uuid::new_v4(), None).unwrap_err();
    assert!(matches!(err, StoreError::CollectionNotFound(_)));
}

#[tokio::test]
async fn load_orders_by_frame_then_creation_with_unpositioned_last() {
    let store = SqliteSequenceStore::open_in_memory().unwrap();
    let shot = store.create_shot("opening").unwrap();
    let late = store.insert_item(shot, key(100.0)).unwrap();
    let loose = store.insert_item(shot, None).unwrap();
    let head = store.insert_item(shot, key(0.0)).unwrap();
    let tied = store.insert_item(shot, key(100.0)).unwrap();

    let items = store.load_order(shot).await.unwrap();
    let ids: Vec<_> = items.iter().map(|item| item.item_id).collect();

    assert_eq!(
        ids,
        vec![head.item_id, late.item_id, tied.item_id, loose.item_id]
    );
    assert!(late.created_at < tied.created_at);
}

#[tokio::test]
async fn swap_exchanges_frames_atomically() {
    let store = SqliteSequenceStore::open_in_memory().unwrap();
    let shot = store.create_shot("opening").unwrap();
    let a = store.insert_item(shot, key(0.0)).unwrap().item_id;
    let b = store.insert_item(shot, key(50.0)).unwrap().item_id;

    let outcome = store.swap_keys(shot, a, b).await.unwrap();
    assert_eq!(outcome, SwapOutcome::Swapped);

    let snapshot = SequenceSnapshot::from_items(shot, store.load_order(shot).await.unwrap());
    assert_eq!(snapshot.position_of(a), Some(key(50.0)));
    assert_eq!(snapshot.position_of(b), Some(key(0.0)));
}

#[tokio::test]
async fn swap_edge_cases() {
    let store = SqliteSequenceStore::open_in_memory().unwrap();
    let shot = store.create_shot("opening").unwrap();
    let a = store.insert_item(shot, key(10.0)).unwrap().item_id;
    let b = store.insert_item(shot, key(10.0)).unwrap().item_id;
    let loose = store.insert_item(shot, None).unwrap().item_id;

    assert_eq!(
        store.swap_keys(shot, a, b).await.unwrap(),
        SwapOutcome::Unchanged
    );
    assert!(matches!(
        store.swap_keys(shot, a, loose).await,
        Err(StoreError::Unpositioned(id)) if id == loose
    ));
    assert!(matches!(
        store.swap_keys(shot, a, uuid::Uuid::new_v4()).await,
        Err(StoreError::ItemNotFound { .. })
    ));
}

#[tokio::test]
async fn failed_assignment_rolls_back_whole_chunk() {
    let store = SqliteSequenceStore::open_in_memory().unwrap();
    let shot = store.create_shot("opening").unwrap();
    let a = store.insert_item(shot, None).unwrap().item_id;

    let err = store
        .assign_keys(
            shot,
            &[
                FrameAssignment::new(a, PositionKey::ZERO),
                FrameAssignment::new(uuid::Uuid::new_v4(), PositionKey::ZERO),
            ],
        )
        .await
        .unwrap_err();

    assert!(matches!(err, StoreError::ItemNotFound { .. }));
    let items = store.load_order(shot).await.unwrap();
    assert_eq!(items[0].position, None);
}

#[tokio::test]
async fn refresh_views_recomputes_shot_stats() {
    let store = SqliteSequenceStore::open_in_memory().unwrap();
    let shot = store.create_shot("opening").unwrap();
    assert!(store.shot_stats(shot).unwrap().is_none());

    store.insert_item(shot, key(25.0)).unwrap();
    store.insert_item(shot, key(75.0)).unwrap();
    let loose = store.insert_item(shot, None).unwrap().item_id;
    store.refresh_views(shot).await.unwrap();

    let stats = store.shot_stats(shot).unwrap().unwrap();
    assert_eq!(stats.item_count, 3);
    assert_eq!(stats.positioned_count, 2);
    assert_eq!(stats.first_frame, Some(25.0));
    assert_eq!(stats.last_frame, Some(75.0));

    store.remove_item(shot, loose).unwrap();
    store.refresh_views(shot).await.unwrap();
    assert_eq!(store.shot_stats(shot).unwrap().unwrap().item_count, 2);

    let err = store.refresh_views(uuid::Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, StoreError::CollectionNotFound(_)));
}

#[tokio::test]
async fn cleared_item_leaves_sequence() {
    let store = SqliteSequenceStore::open_in_memory().unwrap();
    let shot = store.create_shot("opening").unwrap();
    let a = store.insert_item(shot, key(0.0)).unwrap().item_id;
    let b = store.insert_item(shot, key(50.0)).unwrap().item_id;

    store.clear_position(shot, a).unwrap();

    let snapshot = SequenceSnapshot::from_items(shot, store.load_order(shot).await.unwrap());
    assert_eq!(snapshot.ordered_ids(), vec![b]);
    assert_eq!(snapshot.unpositioned().count(), 1);
    assert!(matches!(
        store.clear_position(shot, uuid::Uuid::new_v4()),
        Err(StoreError::ItemNotFound { .. })
    ));
}

#[tokio::test]
async fn reorder_persists_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("timeline.db");

    let (shot, desired) = {
        let store = SqliteSequenceStore::open(&path).unwrap();
        let shot = store.create_shot("opening").unwrap();
        let ids: Vec<_> = [0.0, 50.0, 100.0, 150.0]
            .into_iter()
            .map(|frame| store.insert_item(shot, key(frame)).unwrap().item_id)
            .collect();
        let coordinator = ExchangeCoordinator::new(store);
        let desired = vec![ids[3], ids[1], ids[2], ids[0]];
        let outcome = coordinator.reorder(shot, &desired).await.unwrap();
        assert_eq!(outcome.snapshot.ordered_ids(), desired);
        (shot, desired)
    };

    let reopened = SqliteSequenceStore::open(&path).unwrap();
    let snapshot = SequenceSnapshot::from_items(shot, reopened.load_order(shot).await.unwrap());
    assert_eq!(snapshot.ordered_ids(), desired);
    assert_eq!(
        reopened.shot_stats(shot).unwrap().unwrap().positioned_count,
        4
    );
}
