//! Offline-first event repository.
//!
//! Reads prefer the server and fall back to the local cache. Writes land in
//! the cache first and are queued for the server; they never fail because
//! the network is down.

use std::sync::Arc;

use serde::Serialize;

use crate::api::EventApi;
use crate::db::{EventFilter, LocalStore};
use crate::error::{Error, Result};
use crate::models::{
    EntityType, Event, EventFields, EventPatch, MutationPayload, Operation, RemoteEvent,
    SyncStats, SyncStatus,
};
use crate::sync::MutationQueue;
use crate::util::now_millis;

/// One page of events and where it came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListResult {
    pub events: Vec<Event>,
    /// `true` when the server was unreachable and the cache answered
    pub from_cache: bool,
    pub page: u32,
    pub limit: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
}

/// CRUD facade over the cache, the queue and the remote API
pub struct EventRepository<A> {
    store: LocalStore,
    api: Arc<A>,
    queue: MutationQueue<A>,
}

impl<A> Clone for EventRepository<A> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            api: Arc::clone(&self.api),
            queue: self.queue.clone(),
        }
    }
}

impl<A: EventApi> EventRepository<A> {
    pub const fn new(store: LocalStore, api: Arc<A>, queue: MutationQueue<A>) -> Self {
        Self { store, api, queue }
    }

    /// List a page of events (1-based), refreshing the cache when online
    pub async fn list(&self, page: u32, limit: u32) -> Result<ListResult> {
        let page = page.max(1);
        let limit = limit.max(1);

        match self.api.list(page, limit).await {
            Ok(remote) => {
                let events = self.cache_remote(&remote.data).await?;
                Ok(ListResult {
                    events,
                    from_cache: false,
                    page,
                    limit,
                    total: remote.total,
                })
            }
            Err(error) => {
                tracing::warn!("Listing from local cache, server unavailable: {}", error);
                let cached = self.store.events_where(EventFilter::Visible).await?;
                let total = cached.len() as u64;
                let start = (page as usize - 1).saturating_mul(limit as usize);
                let events = cached
                    .into_iter()
                    .skip(start)
                    .take(limit as usize)
                    .collect();
                Ok(ListResult {
                    events,
                    from_cache: true,
                    page,
                    limit,
                    total: Some(total),
                })
            }
        }
    }

    /// Fetch one event by local or server id
    ///
    /// Returns `None` when it is neither cached nor obtainable from the server.
    pub async fn get(&self, id: &str) -> Result<Option<Event>> {
        if let Some(event) = self.store.get_event(id).await? {
            return Ok(Some(event));
        }

        match self.api.get(id).await {
            Ok(remote) => {
                let mut events = self.cache_remote(std::slice::from_ref(&remote)).await?;
                Ok(events.pop())
            }
            Err(error) => {
                tracing::debug!(id, "Event not available remotely: {}", error);
                Ok(None)
            }
        }
    }

    /// Create an event locally and queue it for the server
    pub async fn create(&self, fields: EventFields) -> Result<Event> {
        if fields.title.trim().is_empty() {
            return Err(Error::InvalidInput("title must not be empty".to_string()));
        }

        let event = Event::new_local(fields);
        self.store.put_event(&event).await?;
        self.queue
            .enqueue(
                EntityType::Event,
                &event.local_id,
                &event.local_id,
                MutationPayload::Create {
                    data: event.fields.clone(),
                },
            )
            .await?;

        tracing::debug!(local_id = %event.local_id, "Created event locally");
        Ok(event)
    }

    /// Apply a partial edit locally and queue it for the server
    ///
    /// Returns `None` when the event is unknown or waiting to be deleted.
    pub async fn update(&self, id: &str, patch: EventPatch) -> Result<Option<Event>> {
        if patch
            .title
            .as_deref()
            .is_some_and(|title| title.trim().is_empty())
        {
            return Err(Error::InvalidInput("title must not be empty".to_string()));
        }

        let Some(mut event) = self.get(id).await? else {
            return Ok(None);
        };
        if event.is_pending_delete() {
            return Ok(None);
        }

        let original_version = event.version;
        event.fields.apply(&patch);
        event.version += 1;
        event.last_modified = now_millis();

        // A conflicted record keeps collecting edits until the conflict is resolved.
        if event.status() == SyncStatus::Conflict {
            self.store.put_event(&event).await?;
            return Ok(Some(event));
        }

        event.state = event.state.after_local_write(Operation::Update);
        self.store.put_event(&event).await?;

        let target = event
            .remote_id()
            .unwrap_or(&event.local_id)
            .to_string();
        self.queue
            .enqueue(
                EntityType::Event,
                &target,
                &event.local_id,
                MutationPayload::Update {
                    id: target.clone(),
                    data: patch,
                    original_version,
                },
            )
            .await?;

        Ok(Some(event))
    }

    /// Delete an event
    ///
    /// Cached events are marked for deletion and queued. Uncached ones get a
    /// best-effort delete on the server. A record with an open conflict is
    /// left alone until the conflict is resolved.
    pub async fn delete(&self, id: &str) -> Result<()> {
        let Some(mut event) = self.store.get_event(id).await? else {
            if let Err(error) = self.api.delete(id).await {
                tracing::debug!(id, "Remote delete of uncached event failed: {}", error);
            }
            return Ok(());
        };

        if event.is_pending_delete() {
            return Ok(());
        }
        if event.status() == SyncStatus::Conflict {
            return Err(Error::UnresolvedConflict(event.local_id));
        }

        event.state = event.state.after_local_write(Operation::Delete);
        event.last_modified = now_millis();
        self.store.put_event(&event).await?;

        let target = event
            .remote_id()
            .unwrap_or(&event.local_id)
            .to_string();
        self.queue
            .enqueue(
                EntityType::Event,
                &target,
                &event.local_id,
                MutationPayload::Delete { id: target.clone() },
            )
            .await?;
        Ok(())
    }

    /// Record counts per sync status
    pub async fn sync_stats(&self) -> Result<SyncStats> {
        self.store.event_stats().await
    }

    /// Number of queued mutations
    pub async fn pending_changes_count(&self) -> Result<usize> {
        self.store.queue_len().await
    }

    /// Records with local changes not yet on the server
    pub async fn pending_events(&self) -> Result<Vec<Event>> {
        self.store.events_where(EventFilter::Unsynced).await
    }

    /// Drop every cached record, queued mutation and conflict
    pub async fn clear_local_cache(&self) -> Result<()> {
        self.store.clear_all().await
    }

    /// Upsert server records, leaving records with unsynced local state alone
    async fn cache_remote(&self, remotes: &[RemoteEvent]) -> Result<Vec<Event>> {
        let mut events = Vec::with_capacity(remotes.len());
        let mut refreshed = Vec::new();

        for remote in remotes {
            match self.store.get_event_by_server_id(&remote.id).await? {
                Some(existing) if existing.status() != SyncStatus::Synced => {
                    events.push(existing);
                }
                Some(mut existing) => {
                    existing.apply_remote(remote);
                    refreshed.push(existing.clone());
                    events.push(existing);
                }
                None => {
                    let event = Event::from_remote(&remote.id, remote);
                    refreshed.push(event.clone());
                    events.push(event);
                }
            }
        }

        self.store.put_events(&refreshed).await?;
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ApiCall, InMemoryEventApi};
    use crate::models::RecordState;
    use crate::sync::RetryPolicy;
    use pretty_assertions::assert_eq;

    struct Harness {
        store: LocalStore,
        api: Arc<InMemoryEventApi>,
        repo: EventRepository<InMemoryEventApi>,
    }

    async fn setup() -> Harness {
        let store = LocalStore::open_in_memory().await.unwrap();
        let api = Arc::new(InMemoryEventApi::new());
        let queue = MutationQueue::new(store.clone(), Arc::clone(&api), RetryPolicy::default());
        let repo = EventRepository::new(store.clone(), Arc::clone(&api), queue);
        Harness { store, api, repo }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_create_is_optimistic_and_queued() {
        let h = setup().await;
        let event = h.repo.create(EventFields::new("Picnic", 10)).await.unwrap();

        assert!(event.id.is_none());
        assert_eq!(event.version, 1);
        assert_eq!(event.state, RecordState::pending(Operation::Create));
        assert_eq!(h.repo.pending_changes_count().await.unwrap(), 1);
        assert!(h.api.calls().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_create_rejects_blank_title() {
        let h = setup().await;
        let result = h.repo.create(EventFields::new("   ", 10)).await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_list_refreshes_cache_from_server() {
        let h = setup().await;
        h.api.insert_server_event(EventFields::new("One", 1));
        h.api.insert_server_event(EventFields::new("Two", 2));

        let result = h.repo.list(1, 10).await.unwrap();
        assert!(!result.from_cache);
        assert_eq!(result.events.len(), 2);
        assert_eq!(result.total, Some(2));

        let cached = h.store.get_event("evt_2").await.unwrap().unwrap();
        assert_eq!(cached.fields.title, "Two");
        assert_eq!(cached.state, RecordState::Synced);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_list_does_not_clobber_local_edits() {
        let h = setup().await;
        let remote = h.api.insert_server_event(EventFields::new("Server", 1));
        h.repo.list(1, 10).await.unwrap();

        h.repo
            .update(
                &remote.id,
                EventPatch {
                    title: Some("Mine".to_string()),
                    ..EventPatch::default()
                },
            )
            .await
            .unwrap();

        let result = h.repo.list(1, 10).await.unwrap();
        assert_eq!(result.events[0].fields.title, "Mine");
        assert_eq!(result.events[0].status(), SyncStatus::Pending);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_list_falls_back_to_cache_and_hides_pending_deletes() {
        let h = setup().await;
        let keep = h.repo.create(EventFields::new("Keep", 1)).await.unwrap();
        let gone = h.repo.create(EventFields::new("Gone", 2)).await.unwrap();
        h.repo.delete(&gone.local_id).await.unwrap();
        h.api.set_online(false);

        let result = h.repo.list(1, 10).await.unwrap();
        assert!(result.from_cache);
        let ids: Vec<_> = result.events.iter().map(|e| e.local_id.clone()).collect();
        assert_eq!(ids, vec![keep.local_id]);

        let second_page = h.repo.list(2, 10).await.unwrap();
        assert!(second_page.events.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_get_seeds_cache_and_tolerates_offline() {
        let h = setup().await;
        let remote = h.api.insert_server_event(EventFields::new("Remote", 1));

        let fetched = h.repo.get(&remote.id).await.unwrap().unwrap();
        assert_eq!(fetched.local_id, remote.id);

        h.api.set_online(false);
        // Cache hit does not touch the server.
        assert!(h.repo.get(&remote.id).await.unwrap().is_some());
        assert!(h.repo.get("evt_999").await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_update_tracks_original_version() {
        let h = setup().await;
        let remote = h.api.insert_server_event(EventFields::new("Talk", 1));

        let updated = h
            .repo
            .update(
                &remote.id,
                EventPatch {
                    capacity: Some(40),
                    ..EventPatch::default()
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.version, 2);
        assert_eq!(updated.fields.capacity, Some(40));

        let queued = h.store.queue_items().await.unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(
            queued[0].payload,
            MutationPayload::Update {
                id: remote.id.clone(),
                data: EventPatch {
                    capacity: Some(40),
                    ..EventPatch::default()
                },
                original_version: 1,
            }
        );
        assert!(h.api.calls().contains(&ApiCall::Get(remote.id)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_update_of_unknown_event_is_noop() {
        let h = setup().await;
        let result = h.repo.update("evt_missing", EventPatch::default()).await.unwrap();
        assert!(result.is_none());
        assert_eq!(h.repo.pending_changes_count().await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_delete_marks_cached_record() {
        let h = setup().await;
        let event = h.repo.create(EventFields::new("Drop me", 1)).await.unwrap();
        h.repo.delete(&event.local_id).await.unwrap();

        let record = h.store.get_event(&event.local_id).await.unwrap().unwrap();
        assert!(record.is_pending_delete());
        assert_eq!(h.repo.pending_changes_count().await.unwrap(), 2);

        // Deleting again does not queue a second delete.
        h.repo.delete(&event.local_id).await.unwrap();
        assert_eq!(h.repo.pending_changes_count().await.unwrap(), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_delete_uncached_goes_straight_to_server() {
        let h = setup().await;
        let remote = h.api.insert_server_event(EventFields::new("Remote only", 1));

        h.repo.delete(&remote.id).await.unwrap();
        assert!(h.api.server_event(&remote.id).is_none());
        assert_eq!(h.repo.pending_changes_count().await.unwrap(), 0);

        h.api.set_online(false);
        h.repo.delete("evt_other").await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_stats_and_reset() {
        let h = setup().await;
        h.api.insert_server_event(EventFields::new("Synced", 1));
        h.repo.list(1, 10).await.unwrap();
        h.repo.create(EventFields::new("Pending", 2)).await.unwrap();

        let stats = h.repo.sync_stats().await.unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.synced, 1);
        assert_eq!(stats.pending, 1);
        assert_eq!(h.repo.pending_events().await.unwrap().len(), 1);

        h.repo.clear_local_cache().await.unwrap();
        assert_eq!(h.repo.sync_stats().await.unwrap(), SyncStats::default());
        assert_eq!(h.repo.pending_changes_count().await.unwrap(), 0);
    }
}
