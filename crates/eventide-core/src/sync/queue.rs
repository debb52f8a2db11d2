//! Durable mutation queue and per-item sync attempts.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;

use super::backoff::RetryPolicy;
use super::conflict;
use crate::api::{ApiError, EventApi};
use crate::db::LocalStore;
use crate::error::{Error, Result};
use crate::models::{
    EntityType, Event, EventFields, EventPatch, MutationItem, MutationPayload, Operation,
    RecordState, RemoteEvent, SyncStatus,
};
use crate::util::now_millis;

const AWAITING_SERVER_ID: &str = "awaiting server identity";

/// What happened to a single processed item
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    /// The server accepted the mutation and the item was removed
    Applied,
    /// The attempt failed; `exhausted` means automatic retries stopped
    Failed { exhausted: bool, error: String },
    /// The server diverged and a conflict was recorded
    Conflicted,
    /// The item's record no longer exists locally; the item was discarded
    Dropped,
}

/// Summary of one drain
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub conflicted: usize,
    /// Items left alone because they were backing off, exhausted, or queued
    /// behind a blocked item for the same record
    pub skipped: usize,
}

/// Result of talking to the server for one item
enum Attempt {
    Applied(RemoteEvent),
    Removed,
    Conflict(Option<RemoteEvent>),
    Retry(String),
    Terminal(String),
}

/// Queue manager: enqueue, drain and retry mutations
pub struct MutationQueue<A> {
    store: LocalStore,
    api: Arc<A>,
    policy: RetryPolicy,
}

impl<A> Clone for MutationQueue<A> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            api: Arc::clone(&self.api),
            policy: self.policy,
        }
    }
}

impl<A: EventApi> MutationQueue<A> {
    pub const fn new(store: LocalStore, api: Arc<A>, policy: RetryPolicy) -> Self {
        Self { store, api, policy }
    }

    pub const fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Append a mutation and mark its record pending.
    ///
    /// A record that already failed keeps its failed state so the exhausted
    /// item stays visible; the new item waits behind it.
    pub async fn enqueue(
        &self,
        entity_type: EntityType,
        entity_id: &str,
        local_id: &str,
        payload: MutationPayload,
    ) -> Result<MutationItem> {
        let item = MutationItem::new(entity_type, entity_id, local_id, payload);
        self.store.put_queue_item(&item).await?;
        if let Some(record) = self.store.get_event(local_id).await? {
            self.store
                .set_event_state(local_id, &record.state.after_local_write(item.operation))
                .await?;
        }
        tracing::debug!(item = %item.id, "Enqueued {} for {}", item.operation, local_id);
        Ok(item)
    }

    /// Remove a completed item
    pub async fn dequeue(&self, item_id: &str) -> Result<()> {
        self.store.delete_queue_item(item_id).await
    }

    /// Items eligible for an attempt at `now`, in enqueue order
    pub async fn pending_items(&self, now: i64) -> Result<Vec<MutationItem>> {
        self.store
            .due_queue_items(self.policy.max_retries, now)
            .await
    }

    /// Every queued item, exhausted ones included
    pub async fn queued_items(&self) -> Result<Vec<MutationItem>> {
        self.store.queue_items().await
    }

    /// Number of queue rows
    pub async fn pending_count(&self) -> Result<usize> {
        self.store.queue_len().await
    }

    /// Reset an item's retry budget and attempt it immediately
    pub async fn retry_item(&self, item_id: &str) -> Result<ItemOutcome> {
        let mut item = self
            .store
            .get_queue_item(item_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("queue item {item_id}")))?;

        item.retry_count = 0;
        item.next_retry_at = None;
        item.error = None;
        self.store.put_queue_item(&item).await?;
        let operation = self.record_operation(&item).await?;
        self.store
            .set_event_state(&item.local_id, &RecordState::pending(operation))
            .await?;

        tracing::info!(item = %item.id, "Retrying {} for {}", item.operation, item.local_id);
        self.process_item(&item).await
    }

    /// Drain every eligible item sequentially.
    ///
    /// Items for one record run in enqueue order: once an item is not
    /// eligible, fails or conflicts, later items for the same record wait
    /// for the next drain.
    pub async fn process_all_pending(&self) -> Result<DrainReport> {
        let due: HashSet<String> = self
            .pending_items(now_millis())
            .await?
            .into_iter()
            .map(|item| item.id)
            .collect();
        let mut report = DrainReport::default();
        let mut blocked: HashSet<String> = HashSet::new();

        for queued in self.queued_items().await? {
            if blocked.contains(&queued.local_id) {
                report.skipped += 1;
                continue;
            }
            if !due.contains(&queued.id) {
                blocked.insert(queued.local_id);
                report.skipped += 1;
                continue;
            }

            // An earlier item may have removed or rewritten this one.
            let Some(item) = self.store.get_queue_item(&queued.id).await? else {
                continue;
            };

            let in_conflict = self
                .store
                .get_event(&item.local_id)
                .await?
                .is_some_and(|event| event.status() == SyncStatus::Conflict);
            if in_conflict {
                blocked.insert(item.local_id);
                report.skipped += 1;
                continue;
            }

            report.attempted += 1;
            match self.process_item(&item).await? {
                ItemOutcome::Applied | ItemOutcome::Dropped => report.succeeded += 1,
                ItemOutcome::Failed { .. } => {
                    report.failed += 1;
                    blocked.insert(item.local_id);
                }
                ItemOutcome::Conflicted => {
                    report.conflicted += 1;
                    blocked.insert(item.local_id);
                }
            }
        }

        if report.attempted > 0 {
            tracing::info!(
                attempted = report.attempted,
                succeeded = report.succeeded,
                failed = report.failed,
                conflicted = report.conflicted,
                skipped = report.skipped,
                "Drained mutation queue"
            );
        }
        Ok(report)
    }

    /// Send one item to the server and apply the outcome locally
    pub async fn process_item(&self, item: &MutationItem) -> Result<ItemOutcome> {
        let Some(record) = self.store.get_event(&item.local_id).await? else {
            tracing::warn!(item = %item.id, "Dropping queue item for missing record");
            self.dequeue(&item.id).await?;
            return Ok(ItemOutcome::Dropped);
        };

        self.store
            .set_event_state(
                &item.local_id,
                &RecordState::Syncing {
                    operation: item.operation,
                    retry_count: item.retry_count,
                },
            )
            .await?;

        let attempt = match &item.payload {
            MutationPayload::Create { data } => self.handle_create(data).await,
            MutationPayload::Update {
                data,
                original_version,
                ..
            } => match record.remote_id() {
                Some(server_id) => self.handle_update(server_id, data, *original_version).await,
                None => Attempt::Retry(AWAITING_SERVER_ID.to_string()),
            },
            MutationPayload::Delete { .. } => self.handle_delete(item, &record).await?,
        };

        match attempt {
            Attempt::Applied(remote) => {
                self.dequeue(&item.id).await?;
                // Re-read: the record may have been edited while the request was in flight.
                if let Some(current) = self.store.get_event(&item.local_id).await? {
                    settle_record(&self.store, current, &remote).await?;
                }
                tracing::debug!(item = %item.id, server_id = %remote.id, "Applied {}", item.operation);
                Ok(ItemOutcome::Applied)
            }
            Attempt::Removed => {
                self.store.delete_queue_items_for(&item.local_id).await?;
                self.store.delete_event(&item.local_id).await?;
                tracing::debug!(item = %item.id, "Removed {}", item.local_id);
                Ok(ItemOutcome::Applied)
            }
            Attempt::Conflict(current) => {
                let fresh = self
                    .store
                    .get_event(&item.local_id)
                    .await?
                    .unwrap_or(record);
                if conflict::record_conflict(&self.store, self.api.as_ref(), item, &fresh, current)
                    .await?
                {
                    Ok(ItemOutcome::Conflicted)
                } else {
                    self.record_failure(item, "version conflict, server record unavailable", false)
                        .await
                }
            }
            Attempt::Retry(error) => self.record_failure(item, &error, false).await,
            Attempt::Terminal(error) => self.record_failure(item, &error, true).await,
        }
    }

    async fn handle_create(&self, data: &EventFields) -> Attempt {
        match self.api.create(data).await {
            Ok(remote) => Attempt::Applied(remote),
            // A rejected create will not succeed by resending the same payload.
            Err(error) if error.is_conflict() => {
                Attempt::Terminal("server rejected create as a duplicate".to_string())
            }
            Err(error) => Attempt::Retry(error.to_string()),
        }
    }

    async fn handle_update(
        &self,
        server_id: &str,
        data: &EventPatch,
        original_version: i64,
    ) -> Attempt {
        match self.api.update(server_id, data, original_version).await {
            Ok(remote) => Attempt::Applied(remote),
            Err(ApiError::Conflict { current }) => Attempt::Conflict(current.map(|boxed| *boxed)),
            Err(error) if error.is_not_found() => {
                Attempt::Terminal("event no longer exists on the server".to_string())
            }
            Err(error) => Attempt::Retry(error.to_string()),
        }
    }

    async fn handle_delete(&self, item: &MutationItem, record: &Event) -> Result<Attempt> {
        let Some(server_id) = record.remote_id() else {
            let others = self
                .store
                .queue_items_for(&item.local_id)
                .await?
                .iter()
                .any(|other| other.id != item.id);
            // Never reached the server: nothing to delete remotely.
            return Ok(if others {
                Attempt::Retry(AWAITING_SERVER_ID.to_string())
            } else {
                Attempt::Removed
            });
        };

        Ok(match self.api.delete(server_id).await {
            Ok(()) => Attempt::Removed,
            Err(error) if error.is_not_found() => Attempt::Removed,
            Err(error) => Attempt::Retry(error.to_string()),
        })
    }

    /// Count a failure against the item and reschedule it.
    ///
    /// `terminal` failures skip the remaining budget.
    async fn record_failure(
        &self,
        item: &MutationItem,
        error: &str,
        terminal: bool,
    ) -> Result<ItemOutcome> {
        let mut item = item.clone();
        let now = now_millis();

        if terminal {
            item.retry_count = self.policy.max_retries;
        } else {
            item.next_retry_at = Some(self.policy.next_retry_at(item.retry_count, now));
            item.retry_count = item.retry_count.saturating_add(1);
        }
        item.error = Some(error.to_string());

        let exhausted = self.policy.is_exhausted(item.retry_count);
        self.store.put_queue_item(&item).await?;

        let operation = self.record_operation(&item).await?;
        let state = if exhausted {
            RecordState::Failed {
                operation,
                retry_count: item.retry_count,
                last_error: error.to_string(),
            }
        } else {
            RecordState::Pending {
                operation,
                retry_count: item.retry_count,
                last_error: Some(error.to_string()),
            }
        };
        self.store.set_event_state(&item.local_id, &state).await?;

        if exhausted {
            tracing::warn!(
                item = %item.id,
                retries = item.retry_count,
                "Giving up on {} for {}: {}",
                item.operation,
                item.local_id,
                error
            );
        } else {
            tracing::warn!(
                item = %item.id,
                retries = item.retry_count,
                next_retry_at = item.next_retry_at,
                "Sync attempt failed: {}",
                error
            );
        }

        Ok(ItemOutcome::Failed {
            exhausted,
            error: error.to_string(),
        })
    }

    /// Operation the item's record shows while the item is still queued
    async fn record_operation(&self, item: &MutationItem) -> Result<Operation> {
        let queued = self.store.queue_items_for(&item.local_id).await?;
        Ok(next_operation(&queued).unwrap_or(item.operation))
    }
}

/// Fold a server response into the local record.
///
/// With nothing else queued the record takes the server's fields and
/// version and becomes `synced`. Otherwise it learns its server id, keeps
/// its local fields and stays pending on the next queued operation.
pub(crate) async fn settle_record(
    store: &LocalStore,
    mut event: Event,
    remote: &RemoteEvent,
) -> Result<Event> {
    let remaining = store.queue_items_for(&event.local_id).await?;

    match next_operation(&remaining) {
        None => event.apply_remote(remote),
        Some(operation) => {
            event.id = Some(remote.id.clone());
            event.version = event.version.max(remote.version);
            event.state = RecordState::pending(operation);

            for mut item in remaining {
                if item.entity_id != remote.id {
                    item.entity_id.clone_from(&remote.id);
                    rewrite_payload_id(&mut item.payload, &remote.id);
                    store.put_queue_item(&item).await?;
                }
            }
        }
    }

    store.put_event(&event).await?;
    Ok(event)
}

fn rewrite_payload_id(payload: &mut MutationPayload, server_id: &str) {
    match payload {
        MutationPayload::Create { .. } => {}
        MutationPayload::Update { id, .. } | MutationPayload::Delete { id } => {
            server_id.clone_into(id);
        }
    }
}

/// Operation the record should show while `items` are still queued.
///
/// A queued delete wins so the record stays hidden until it is gone.
#[must_use]
pub fn next_operation(items: &[MutationItem]) -> Option<Operation> {
    if items.iter().any(|item| item.operation == Operation::Delete) {
        return Some(Operation::Delete);
    }
    items.first().map(|item| item.operation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ApiCall, InMemoryEventApi};
    use pretty_assertions::assert_eq;

    struct Harness {
        store: LocalStore,
        api: Arc<InMemoryEventApi>,
        queue: MutationQueue<InMemoryEventApi>,
    }

    async fn setup() -> Harness {
        let store = LocalStore::open_in_memory().await.unwrap();
        let api = Arc::new(InMemoryEventApi::new());
        let queue = MutationQueue::new(store.clone(), Arc::clone(&api), RetryPolicy::default());
        Harness { store, api, queue }
    }

    async fn local_create(h: &Harness, title: &str) -> (Event, MutationItem) {
        let event = Event::new_local(EventFields::new(title, 1));
        h.store.put_event(&event).await.unwrap();
        let item = h
            .queue
            .enqueue(
                EntityType::Event,
                &event.local_id,
                &event.local_id,
                MutationPayload::Create {
                    data: event.fields.clone(),
                },
            )
            .await
            .unwrap();
        (event, item)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_create_success_assigns_server_id() {
        let h = setup().await;
        let (event, item) = local_create(&h, "Launch").await;

        let outcome = h.queue.process_item(&item).await.unwrap();
        assert_eq!(outcome, ItemOutcome::Applied);

        let synced = h.store.get_event(&event.local_id).await.unwrap().unwrap();
        assert_eq!(synced.id.as_deref(), Some("evt_1"));
        assert_eq!(synced.local_id, event.local_id);
        assert_eq!(synced.state, RecordState::Synced);
        assert_eq!(h.queue.pending_count().await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_failure_reschedules_with_backoff() {
        let h = setup().await;
        let (event, item) = local_create(&h, "Flaky").await;
        h.api.fail_next(1);

        let before = now_millis();
        let outcome = h.queue.process_item(&item).await.unwrap();
        assert!(matches!(outcome, ItemOutcome::Failed { exhausted: false, .. }));

        let stored = h.store.get_queue_item(&item.id).await.unwrap().unwrap();
        assert_eq!(stored.retry_count, 1);
        assert!(stored.error.is_some());
        let next = stored.next_retry_at.unwrap();
        assert!(next >= before + 1_000);

        let record = h.store.get_event(&event.local_id).await.unwrap().unwrap();
        assert_eq!(record.status(), SyncStatus::Pending);
        assert_eq!(record.state.retry_count(), 1);

        // Backing off: not eligible yet.
        assert!(h.queue.pending_items(before).await.unwrap().is_empty());
        assert_eq!(h.queue.pending_items(next).await.unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_exhaustion_marks_record_failed_until_manual_retry() {
        let h = setup().await;
        let (event, mut item) = local_create(&h, "Doomed").await;
        h.api.set_online(false);

        for attempt in 1..=5 {
            let outcome = h.queue.process_item(&item).await.unwrap();
            let exhausted = attempt == 5;
            assert!(
                matches!(outcome, ItemOutcome::Failed { exhausted: e, .. } if e == exhausted),
                "attempt {attempt}: {outcome:?}"
            );
            item = h.store.get_queue_item(&item.id).await.unwrap().unwrap();
        }

        assert_eq!(item.retry_count, 5);
        let record = h.store.get_event(&event.local_id).await.unwrap().unwrap();
        assert_eq!(record.status(), SyncStatus::Failed);
        assert!(h.queue.pending_items(i64::MAX).await.unwrap().is_empty());
        assert_eq!(h.queue.queued_items().await.unwrap().len(), 1);

        h.api.set_online(true);
        let outcome = h.queue.retry_item(&item.id).await.unwrap();
        assert_eq!(outcome, ItemOutcome::Applied);
        let record = h.store.get_event(&event.local_id).await.unwrap().unwrap();
        assert_eq!(record.state, RecordState::Synced);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_failed_record_stays_failed_when_edited() {
        let h = setup().await;
        let (event, mut item) = local_create(&h, "Stuck").await;
        h.api.set_online(false);
        for _ in 0..5 {
            h.queue.process_item(&item).await.unwrap();
            item = h.store.get_queue_item(&item.id).await.unwrap().unwrap();
        }

        h.queue
            .enqueue(
                EntityType::Event,
                &event.local_id,
                &event.local_id,
                MutationPayload::Update {
                    id: event.local_id.clone(),
                    data: EventPatch {
                        title: Some("Unstuck".to_string()),
                        ..EventPatch::default()
                    },
                    original_version: 1,
                },
            )
            .await
            .unwrap();
        let record = h.store.get_event(&event.local_id).await.unwrap().unwrap();
        assert_eq!(record.status(), SyncStatus::Failed);
        assert_eq!(record.state.operation(), Some(Operation::Create));

        h.api.set_online(true);
        h.api.clear_calls();
        let report = h.queue.process_all_pending().await.unwrap();
        assert_eq!(report.attempted, 0);
        assert_eq!(report.skipped, 2);
        assert!(h.api.calls().is_empty());
        let record = h.store.get_event(&event.local_id).await.unwrap().unwrap();
        assert_eq!(record.status(), SyncStatus::Failed);

        assert_eq!(h.queue.retry_item(&item.id).await.unwrap(), ItemOutcome::Applied);
        let record = h.store.get_event(&event.local_id).await.unwrap().unwrap();
        assert_eq!(record.state, RecordState::pending(Operation::Update));

        let report = h.queue.process_all_pending().await.unwrap();
        assert_eq!(report.succeeded, 1);
        assert_eq!(h.api.server_event("evt_1").unwrap().fields.title, "Unstuck");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_update_of_event_removed_on_server_is_terminal() {
        let h = setup().await;
        let remote = h.api.insert_server_event(EventFields::new("Doomed", 1));
        h.store
            .put_event(&Event::from_remote(&remote.id, &remote))
            .await
            .unwrap();
        let item = h
            .queue
            .enqueue(
                EntityType::Event,
                &remote.id,
                &remote.id,
                MutationPayload::Update {
                    id: remote.id.clone(),
                    data: EventPatch::default(),
                    original_version: 1,
                },
            )
            .await
            .unwrap();
        assert!(h.api.remove_server_event(&remote.id));

        let outcome = h.queue.process_item(&item).await.unwrap();
        assert!(matches!(outcome, ItemOutcome::Failed { exhausted: true, .. }));
        let record = h.store.get_event(&remote.id).await.unwrap().unwrap();
        assert_eq!(record.status(), SyncStatus::Failed);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_rejected_create_is_terminal() {
        let h = setup().await;
        let (event, item) = local_create(&h, "Dup").await;
        h.api.fail_next_with(ApiError::Conflict { current: None });

        let outcome = h.queue.process_item(&item).await.unwrap();
        assert!(matches!(outcome, ItemOutcome::Failed { exhausted: true, .. }));
        let record = h.store.get_event(&event.local_id).await.unwrap().unwrap();
        assert_eq!(record.status(), SyncStatus::Failed);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_drain_keeps_update_behind_failed_create() {
        let h = setup().await;
        let (event, _) = local_create(&h, "Ordered").await;
        h.queue
            .enqueue(
                EntityType::Event,
                &event.local_id,
                &event.local_id,
                MutationPayload::Update {
                    id: event.local_id.clone(),
                    data: EventPatch {
                        title: Some("Renamed".to_string()),
                        ..EventPatch::default()
                    },
                    original_version: 1,
                },
            )
            .await
            .unwrap();

        h.api.fail_next(1);
        let report = h.queue.process_all_pending().await.unwrap();
        assert_eq!(report.attempted, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(
            h.api.calls(),
            vec![ApiCall::Create("Ordered".to_string())]
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_delete_of_unsynced_record_completes_locally() {
        let h = setup().await;
        let event = Event::new_local(EventFields::new("Never sent", 1));
        h.store.put_event(&event).await.unwrap();
        let item = h
            .queue
            .enqueue(
                EntityType::Event,
                &event.local_id,
                &event.local_id,
                MutationPayload::Delete {
                    id: event.local_id.clone(),
                },
            )
            .await
            .unwrap();

        assert_eq!(h.queue.process_item(&item).await.unwrap(), ItemOutcome::Applied);
        assert!(h.store.get_event(&event.local_id).await.unwrap().is_none());
        assert!(h.api.calls().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_delete_treats_missing_server_record_as_done() {
        let h = setup().await;
        let remote = RemoteEvent {
            id: "evt_404".to_string(),
            fields: EventFields::new("Gone", 1),
            version: 1,
        };
        let event = Event::from_remote("evt_404", &remote);
        h.store.put_event(&event).await.unwrap();
        let item = h
            .queue
            .enqueue(
                EntityType::Event,
                "evt_404",
                "evt_404",
                MutationPayload::Delete {
                    id: "evt_404".to_string(),
                },
            )
            .await
            .unwrap();

        assert_eq!(h.queue.process_item(&item).await.unwrap(), ItemOutcome::Applied);
        assert!(h.store.get_event("evt_404").await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_missing_record_drops_item() {
        let h = setup().await;
        let item = MutationItem::new(
            EntityType::Event,
            "ghost",
            "ghost",
            MutationPayload::Delete {
                id: "ghost".to_string(),
            },
        );
        h.store.put_queue_item(&item).await.unwrap();

        assert_eq!(h.queue.process_item(&item).await.unwrap(), ItemOutcome::Dropped);
        assert_eq!(h.queue.pending_count().await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_retry_unknown_item_is_not_found() {
        let h = setup().await;
        assert!(matches!(
            h.queue.retry_item("nope").await,
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_next_operation_prefers_queued_delete() {
        let update = MutationItem::new(
            EntityType::Event,
            "a",
            "a",
            MutationPayload::Update {
                id: "a".to_string(),
                data: EventPatch::default(),
                original_version: 1,
            },
        );
        let delete = MutationItem::new(
            EntityType::Event,
            "a",
            "a",
            MutationPayload::Delete { id: "a".to_string() },
        );

        assert_eq!(next_operation(&[update.clone()]), Some(Operation::Update));
        assert_eq!(next_operation(&[update, delete]), Some(Operation::Delete));
        assert_eq!(next_operation(&[]), None);
    }
}
