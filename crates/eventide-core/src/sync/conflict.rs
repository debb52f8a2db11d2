//! Conflict detection and resolution.

use std::sync::Arc;

use super::queue::{settle_record, MutationQueue};
use crate::api::EventApi;
use crate::db::LocalStore;
use crate::error::{Error, Result};
use crate::models::{
    Conflict, EntityType, Event, EventFields, EventPatch, MutationItem, MutationPayload,
    Operation, RecordState, RemoteEvent, Resolution, ResolutionStrategy,
};
use crate::util::now_millis;

/// Persist a conflict for a rejected update.
///
/// Uses `current` when the 409 carried the server record, otherwise fetches
/// it. Returns `false` without touching anything when the server record
/// cannot be obtained, so the caller can treat the attempt as a failure.
///
/// Later queued updates for the record are folded into the local snapshot
/// (the record already holds their fields) and dropped with the item.
pub(crate) async fn record_conflict<A: EventApi>(
    store: &LocalStore,
    api: &A,
    item: &MutationItem,
    record: &Event,
    current: Option<RemoteEvent>,
) -> Result<bool> {
    let server = match current {
        Some(server) => server,
        None => {
            let Some(server_id) = record.remote_id() else {
                return Ok(false);
            };
            match api.get(server_id).await {
                Ok(server) => server,
                Err(error) => {
                    tracing::warn!(
                        local_id = %record.local_id,
                        "Could not fetch server record for conflict: {}",
                        error
                    );
                    return Ok(false);
                }
            }
        }
    };

    let conflict = Conflict::new(
        server.id.clone(),
        record.local_id.clone(),
        record.fields.clone(),
        record.version,
        server,
    );
    store.put_conflict(&conflict).await?;
    store
        .set_event_state(
            &record.local_id,
            &RecordState::Conflict {
                operation: Operation::Update,
            },
        )
        .await?;

    store.delete_queue_item(&item.id).await?;
    for queued in store.queue_items_for(&record.local_id).await? {
        if queued.operation == Operation::Update {
            store.delete_queue_item(&queued.id).await?;
        }
    }

    tracing::warn!(
        conflict = %conflict.id,
        local_version = conflict.local_version,
        server_version = conflict.server_data.version,
        "Version conflict on {}",
        conflict.entity_id
    );
    Ok(true)
}

/// How a resolution ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionOutcome {
    /// The record now matches the chosen side
    Applied(Event),
    /// The server could not be reached; the chosen data was queued as an update
    Requeued,
    /// The local record no longer exists; the conflict was closed without
    /// recreating it
    Closed,
}

/// Resolves recorded conflicts
pub struct ConflictResolver<A> {
    store: LocalStore,
    api: Arc<A>,
    queue: MutationQueue<A>,
}

impl<A> Clone for ConflictResolver<A> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            api: Arc::clone(&self.api),
            queue: self.queue.clone(),
        }
    }
}

impl<A: EventApi> ConflictResolver<A> {
    pub const fn new(store: LocalStore, api: Arc<A>, queue: MutationQueue<A>) -> Self {
        Self { store, api, queue }
    }

    /// Most recent conflicts, resolved ones included
    pub async fn list_conflicts(&self, limit: usize) -> Result<Vec<Conflict>> {
        self.store.list_conflicts(limit).await
    }

    pub async fn unresolved_conflicts(&self) -> Result<Vec<Conflict>> {
        self.store.unresolved_conflicts().await
    }

    pub async fn get_conflict(&self, id: &str) -> Result<Option<Conflict>> {
        self.store.get_conflict(id).await
    }

    /// Push the local fields over the server copy
    pub async fn resolve_with_local(&self, conflict_id: &str) -> Result<ResolutionOutcome> {
        let mut conflict = self.open_conflict(conflict_id).await?;
        let Some(event) = self.store.get_event(&conflict.local_id).await? else {
            return self.close(&mut conflict, Resolution::Local).await;
        };
        self.submit(conflict, event, Resolution::Local).await
    }

    /// Drop local edits and take the server snapshot
    pub async fn resolve_with_server(&self, conflict_id: &str) -> Result<ResolutionOutcome> {
        let mut conflict = self.open_conflict(conflict_id).await?;
        let Some(mut event) = self.store.get_event(&conflict.local_id).await? else {
            return self.close(&mut conflict, Resolution::Server).await;
        };

        self.store.delete_queue_items_for(&conflict.local_id).await?;
        event.apply_remote(&conflict.server_data);
        self.store.put_event(&event).await?;

        self.stamp(&mut conflict, Resolution::Server).await?;
        Ok(ResolutionOutcome::Applied(event))
    }

    /// Submit caller-merged fields
    pub async fn resolve_with_merge(
        &self,
        conflict_id: &str,
        merged: EventFields,
    ) -> Result<ResolutionOutcome> {
        if merged.title.trim().is_empty() {
            return Err(Error::InvalidInput("title must not be empty".to_string()));
        }
        let mut conflict = self.open_conflict(conflict_id).await?;
        let Some(mut event) = self.store.get_event(&conflict.local_id).await? else {
            return self.close(&mut conflict, Resolution::Merged).await;
        };
        event.fields = merged;
        self.submit(conflict, event, Resolution::Merged).await
    }

    /// Resolve every open conflict with one strategy, returning how many were resolved
    pub async fn auto_resolve_conflicts(&self, strategy: ResolutionStrategy) -> Result<usize> {
        if strategy == ResolutionStrategy::Manual {
            return Ok(0);
        }

        let mut resolved = 0;
        for conflict in self.store.unresolved_conflicts().await? {
            let result = match strategy {
                ResolutionStrategy::Local => self.resolve_with_local(&conflict.id).await,
                ResolutionStrategy::Server => self.resolve_with_server(&conflict.id).await,
                ResolutionStrategy::Manual => continue,
            };
            match result {
                Ok(_) => resolved += 1,
                Err(error) => {
                    tracing::warn!(conflict = %conflict.id, "Auto-resolve failed: {}", error);
                }
            }
        }

        tracing::info!(resolved, ?strategy, "Auto-resolved conflicts");
        Ok(resolved)
    }

    async fn open_conflict(&self, conflict_id: &str) -> Result<Conflict> {
        let conflict = self
            .store
            .get_conflict(conflict_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("conflict {conflict_id}")))?;
        if conflict.is_resolved() {
            return Err(Error::ConflictResolved(conflict_id.to_string()));
        }
        Ok(conflict)
    }

    /// Send the record's fields as an update based on the server snapshot.
    ///
    /// If the server cannot be reached the update is queued instead; the
    /// conflict is resolved either way.
    async fn submit(
        &self,
        mut conflict: Conflict,
        mut event: Event,
        resolution: Resolution,
    ) -> Result<ResolutionOutcome> {
        let patch = EventPatch::from(&event.fields);
        let base_version = conflict.server_data.version;

        let outcome = match self
            .api
            .update(&conflict.entity_id, &patch, base_version)
            .await
        {
            Ok(remote) => {
                let event = settle_record(&self.store, event, &remote).await?;
                ResolutionOutcome::Applied(event)
            }
            Err(error) => {
                tracing::warn!(
                    conflict = %conflict.id,
                    "Resolution could not reach the server, queueing update: {}",
                    error
                );
                event.id = Some(conflict.entity_id.clone());
                event.version = base_version + 1;
                event.state = RecordState::pending(Operation::Update);
                event.last_modified = now_millis();
                self.store.put_event(&event).await?;

                self.queue
                    .enqueue(
                        EntityType::Event,
                        &conflict.entity_id,
                        &conflict.local_id,
                        MutationPayload::Update {
                            id: conflict.entity_id.clone(),
                            data: patch,
                            original_version: base_version,
                        },
                    )
                    .await?;
                ResolutionOutcome::Requeued
            }
        };

        self.stamp(&mut conflict, resolution).await?;
        Ok(outcome)
    }

    /// Close a conflict whose record was removed locally
    async fn close(
        &self,
        conflict: &mut Conflict,
        resolution: Resolution,
    ) -> Result<ResolutionOutcome> {
        self.store.delete_queue_items_for(&conflict.local_id).await?;
        tracing::debug!(conflict = %conflict.id, "Record {} is gone locally", conflict.local_id);
        self.stamp(conflict, resolution).await?;
        Ok(ResolutionOutcome::Closed)
    }

    async fn stamp(&self, conflict: &mut Conflict, resolution: Resolution) -> Result<()> {
        conflict.resolved_at = Some(now_millis());
        conflict.resolution = Some(resolution);
        self.store.put_conflict(conflict).await?;
        tracing::info!(conflict = %conflict.id, "Resolved conflict with {}", resolution);
        Ok(())
    }
}
