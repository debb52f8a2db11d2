use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;

use crate::api::{ApiCall, InMemoryEventApi};
use crate::models::{EventFields, EventPatch, RecordState, Resolution, SyncStatus};
use crate::sync::{ItemOutcome, ResolutionOutcome, TriggerOutcome};
use crate::{Error, LocalStore, NetworkStatus, SyncConfig, SyncEngine};

async fn engine() -> (SyncEngine<InMemoryEventApi>, Arc<InMemoryEventApi>) {
    let store = LocalStore::open_in_memory().await.unwrap();
    let api = Arc::new(InMemoryEventApi::new());
    let engine = SyncEngine::new(
        store,
        Arc::clone(&api),
        NetworkStatus::new(true),
        SyncConfig::default().without_auto_sync(),
    );
    (engine, api)
}

fn rename(title: &str) -> EventPatch {
    EventPatch {
        title: Some(title.to_string()),
        ..EventPatch::default()
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn drain_is_idempotent() {
    let (engine, api) = engine().await;
    engine
        .events()
        .create(EventFields::new("Once", 1))
        .await
        .unwrap();

    let first = engine.queue().process_all_pending().await.unwrap();
    let second = engine.queue().process_all_pending().await.unwrap();

    assert_eq!(first.succeeded, 1);
    assert_eq!(second.attempted, 0);
    assert_eq!(api.server_events().len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn create_reaches_server_before_update() {
    let (engine, api) = engine().await;
    let event = engine
        .events()
        .create(EventFields::new("Draft", 1))
        .await
        .unwrap();
    engine
        .events()
        .update(&event.local_id, rename("Final"))
        .await
        .unwrap();

    let report = engine.queue().process_all_pending().await.unwrap();
    assert_eq!(report.succeeded, 2);

    assert_eq!(
        api.calls(),
        vec![
            ApiCall::Create("Draft".to_string()),
            ApiCall::Update {
                id: "evt_1".to_string(),
                original_version: 1,
            },
        ]
    );
    let record = engine.events().get(&event.local_id).await.unwrap().unwrap();
    assert_eq!(record.fields.title, "Final");
    assert_eq!(record.version, 2);
    assert_eq!(record.state, RecordState::Synced);
}

#[tokio::test(flavor = "multi_thread")]
async fn record_stays_pending_between_create_and_update() {
    let (engine, api) = engine().await;
    let event = engine
        .events()
        .create(EventFields::new("Draft", 1))
        .await
        .unwrap();
    engine
        .events()
        .update(&event.local_id, rename("Final"))
        .await
        .unwrap();

    let items = engine.queue().queued_items().await.unwrap();
    assert_eq!(
        engine.queue().process_item(&items[0]).await.unwrap(),
        ItemOutcome::Applied
    );

    let record = engine.events().get(&event.local_id).await.unwrap().unwrap();
    assert_eq!(record.id.as_deref(), Some("evt_1"));
    assert_eq!(record.fields.title, "Final");
    assert_eq!(record.status(), SyncStatus::Pending);
    assert_eq!(api.server_event("evt_1").unwrap().fields.title, "Draft");

    let remaining = engine.queue().queued_items().await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].entity_id, "evt_1");
}

#[tokio::test(flavor = "multi_thread")]
async fn item_exhausts_after_five_failures() {
    let (engine, api) = engine().await;
    let event = engine
        .events()
        .create(EventFields::new("Unlucky", 1))
        .await
        .unwrap();
    api.fail_next(5);

    for _ in 0..5 {
        let item = engine.queue().queued_items().await.unwrap().remove(0);
        engine.queue().process_item(&item).await.unwrap();
    }

    let item = engine.queue().queued_items().await.unwrap().remove(0);
    assert_eq!(item.retry_count, 5);
    let record = engine.events().get(&event.local_id).await.unwrap().unwrap();
    assert_eq!(record.status(), SyncStatus::Failed);

    // Exhausted items are left alone by drains.
    let report = engine.queue().process_all_pending().await.unwrap();
    assert_eq!(report.attempted, 0);
    assert_eq!(report.skipped, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn writes_to_exhausted_record_wait_for_manual_retry() {
    let (engine, api) = engine().await;
    let event = engine
        .events()
        .create(EventFields::new("Unlucky", 1))
        .await
        .unwrap();
    api.fail_next(5);
    for _ in 0..5 {
        let item = engine.queue().queued_items().await.unwrap().remove(0);
        engine.queue().process_item(&item).await.unwrap();
    }

    engine
        .events()
        .update(&event.local_id, rename("Lucky"))
        .await
        .unwrap();
    let report = engine.queue().process_all_pending().await.unwrap();
    assert_eq!(report.attempted, 0);
    assert_eq!(report.skipped, 2);

    let record = engine.events().get(&event.local_id).await.unwrap().unwrap();
    assert_eq!(record.status(), SyncStatus::Failed);
    assert_eq!(record.fields.title, "Lucky");
    assert_eq!(engine.events().sync_stats().await.unwrap().failed, 1);

    engine.events().delete(&event.local_id).await.unwrap();
    let record = engine.events().get(&event.local_id).await.unwrap().unwrap();
    assert_eq!(record.status(), SyncStatus::Failed);
    assert!(record.is_pending_delete());

    let create = engine.queue().queued_items().await.unwrap().remove(0);
    let outcome = engine.queue().retry_item(&create.id).await.unwrap();
    assert_eq!(outcome, ItemOutcome::Applied);

    let report = engine.queue().process_all_pending().await.unwrap();
    assert_eq!(report.succeeded, 2);
    assert!(api.server_events().is_empty());
    assert!(engine
        .store()
        .get_event(&event.local_id)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn delete_waits_until_conflict_is_resolved() {
    let (engine, api) = engine().await;
    let remote = api.insert_server_event(EventFields::new("Shared", 1));
    engine.events().list(1, 20).await.unwrap();
    engine
        .events()
        .update(&remote.id, rename("Mine"))
        .await
        .unwrap();
    api.modify_server_event(&remote.id, &rename("Theirs"));
    engine.queue().process_all_pending().await.unwrap();

    let rejected = engine.events().delete(&remote.id).await;
    assert!(matches!(rejected, Err(Error::UnresolvedConflict(_))));
    assert_eq!(engine.events().pending_changes_count().await.unwrap(), 0);
    let report = engine.queue().process_all_pending().await.unwrap();
    assert_eq!(report.attempted, 0);
    assert!(api.server_event(&remote.id).is_some());

    let conflict = engine
        .conflicts()
        .unresolved_conflicts()
        .await
        .unwrap()
        .remove(0);
    engine
        .conflicts()
        .resolve_with_server(&conflict.id)
        .await
        .unwrap();

    engine.events().delete(&remote.id).await.unwrap();
    engine.queue().process_all_pending().await.unwrap();
    assert!(api.server_event(&remote.id).is_none());
    assert!(engine.store().get_event(&remote.id).await.unwrap().is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn conflict_round_trip_with_server_resolution() {
    let (engine, api) = engine().await;
    let remote = api.insert_server_event(EventFields::new("Shared", 1));
    engine.events().list(1, 20).await.unwrap();

    // Local edit takes the record to v2, two remote edits take the server to v3.
    engine
        .events()
        .update(&remote.id, rename("Mine"))
        .await
        .unwrap();
    api.modify_server_event(&remote.id, &rename("Theirs"));
    api.modify_server_event(&remote.id, &EventPatch::default());

    let report = engine.queue().process_all_pending().await.unwrap();
    assert_eq!(report.conflicted, 1);

    let record = engine.events().get(&remote.id).await.unwrap().unwrap();
    assert_eq!(record.status(), SyncStatus::Conflict);
    assert_eq!(record.fields.title, "Mine");
    assert_eq!(engine.events().sync_stats().await.unwrap().conflict, 1);

    let conflict = engine
        .conflicts()
        .unresolved_conflicts()
        .await
        .unwrap()
        .remove(0);
    assert_eq!(conflict.local_version, 2);
    assert_eq!(conflict.server_data.version, 3);

    let outcome = engine
        .conflicts()
        .resolve_with_server(&conflict.id)
        .await
        .unwrap();
    assert!(matches!(outcome, ResolutionOutcome::Applied(_)));

    let record = engine.events().get(&remote.id).await.unwrap().unwrap();
    assert_eq!(record.fields.title, "Theirs");
    assert_eq!(record.version, 3);
    assert_eq!(record.state, RecordState::Synced);

    let stored = engine
        .conflicts()
        .get_conflict(&conflict.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.resolution, Some(Resolution::Server));
    assert!(engine
        .conflicts()
        .unresolved_conflicts()
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn offline_reads_fall_back_to_cache() {
    let (engine, api) = engine().await;
    api.insert_server_event(EventFields::new("Cached", 1));
    let online = engine.events().list(1, 20).await.unwrap();
    assert!(!online.from_cache);

    api.set_online(false);
    let created = engine
        .events()
        .create(EventFields::new("Offline", 2))
        .await
        .unwrap();

    let offline = engine.events().list(1, 20).await.unwrap();
    assert!(offline.from_cache);
    assert_eq!(offline.events.len(), 2);

    let fetched = engine.events().get(&created.local_id).await.unwrap().unwrap();
    assert_eq!(fetched.fields.title, "Offline");
    assert_eq!(fetched.status(), SyncStatus::Pending);
}

#[tokio::test(flavor = "multi_thread")]
async fn create_keeps_local_id_and_learns_server_id() {
    let (engine, _api) = engine().await;
    let event = engine
        .events()
        .create(EventFields::new("Remap", 1))
        .await
        .unwrap();
    engine.queue().process_all_pending().await.unwrap();

    let by_local = engine.events().get(&event.local_id).await.unwrap().unwrap();
    let by_server = engine.events().get("evt_1").await.unwrap().unwrap();
    assert_eq!(by_local, by_server);
    assert_eq!(by_local.local_id, event.local_id);
    assert_eq!(by_local.id.as_deref(), Some("evt_1"));

    // A refresh from the server updates the same row.
    engine.events().list(1, 20).await.unwrap();
    assert_eq!(engine.events().sync_stats().await.unwrap().total, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn delete_removes_record_after_sync() {
    let (engine, api) = engine().await;
    let remote = api.insert_server_event(EventFields::new("Doomed", 1));
    engine.events().list(1, 20).await.unwrap();

    engine.events().delete(&remote.id).await.unwrap();
    let hidden = engine.events().list(1, 20).await.unwrap();
    // The server still has it until the delete drains.
    assert_eq!(hidden.events.len(), 1);

    engine.queue().process_all_pending().await.unwrap();
    assert!(api.server_event(&remote.id).is_none());
    assert!(engine
        .store()
        .get_event(&remote.id)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_local_resolution_requeues_update() {
    let (engine, api) = engine().await;
    let remote = api.insert_server_event(EventFields::new("Base", 1));
    engine.events().list(1, 20).await.unwrap();
    engine
        .events()
        .update(&remote.id, rename("Local"))
        .await
        .unwrap();
    api.modify_server_event(&remote.id, &rename("Remote"));
    engine.queue().process_all_pending().await.unwrap();

    let conflict = engine
        .conflicts()
        .unresolved_conflicts()
        .await
        .unwrap()
        .remove(0);
    api.set_online(false);
    let outcome = engine
        .conflicts()
        .resolve_with_local(&conflict.id)
        .await
        .unwrap();
    assert_eq!(outcome, ResolutionOutcome::Requeued);
    assert_eq!(engine.events().pending_changes_count().await.unwrap(), 1);

    api.set_online(true);
    let triggered = engine.coordinator().trigger_sync().await.unwrap();
    assert!(matches!(triggered, TriggerOutcome::Completed(r) if r.succeeded == 1));
    assert_eq!(api.server_event(&remote.id).unwrap().fields.title, "Local");
}

#[tokio::test(flavor = "multi_thread")]
async fn edits_to_conflicted_record_fold_into_resolution() {
    let (engine, api) = engine().await;
    let remote = api.insert_server_event(EventFields::new("Base", 1));
    engine.events().list(1, 20).await.unwrap();
    engine
        .events()
        .update(&remote.id, rename("First"))
        .await
        .unwrap();
    api.modify_server_event(&remote.id, &rename("Remote"));
    engine.queue().process_all_pending().await.unwrap();

    engine
        .events()
        .update(&remote.id, rename("Second"))
        .await
        .unwrap();
    assert_eq!(engine.events().pending_changes_count().await.unwrap(), 0);

    let conflict = engine
        .conflicts()
        .unresolved_conflicts()
        .await
        .unwrap()
        .remove(0);
    engine
        .conflicts()
        .resolve_with_local(&conflict.id)
        .await
        .unwrap();
    assert_eq!(api.server_event(&remote.id).unwrap().fields.title, "Second");
}

#[tokio::test(flavor = "multi_thread")]
async fn queue_survives_restart() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("eventide.db");
    let api = Arc::new(InMemoryEventApi::new());
    api.set_online(false);

    let local_id = {
        let store = LocalStore::open(&path).await.unwrap();
        let engine = SyncEngine::new(
            store,
            Arc::clone(&api),
            NetworkStatus::new(false),
            SyncConfig::default().without_auto_sync(),
        );
        engine
            .events()
            .create(EventFields::new("Persisted", 1))
            .await
            .unwrap()
            .local_id
    };

    api.set_online(true);
    let store = LocalStore::open(&path).await.unwrap();
    let engine = SyncEngine::new(
        store,
        Arc::clone(&api),
        NetworkStatus::new(true),
        SyncConfig::default().without_auto_sync(),
    );
    assert_eq!(engine.events().pending_changes_count().await.unwrap(), 1);

    engine.coordinator().trigger_sync().await.unwrap();
    let record = engine.events().get(&local_id).await.unwrap().unwrap();
    assert_eq!(record.state, RecordState::Synced);
    assert_eq!(api.server_events().len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn coordinator_drains_on_reconnect() {
    let store = LocalStore::open_in_memory().await.unwrap();
    let api = Arc::new(InMemoryEventApi::new());
    let network = NetworkStatus::new(false);
    let engine = SyncEngine::new(
        store,
        Arc::clone(&api),
        network.clone(),
        SyncConfig::default().with_sync_interval(Duration::from_secs(3600)),
    );
    engine
        .events()
        .create(EventFields::new("Queued offline", 1))
        .await
        .unwrap();

    let mut rx = engine.coordinator().subscribe();
    let handle = engine.coordinator().spawn();
    tokio::time::timeout(Duration::from_secs(5), async {
        while rx.borrow_and_update().pending_count != 1 {
            rx.changed().await.unwrap();
        }
    })
    .await
    .unwrap();

    network.set_online(true);
    tokio::time::timeout(Duration::from_secs(5), async {
        while rx.borrow_and_update().pending_count != 0 {
            rx.changed().await.unwrap();
        }
    })
    .await
    .unwrap();
    handle.abort();

    assert_eq!(api.server_events().len(), 1);
    assert!(engine.coordinator().snapshot().is_online);
}
