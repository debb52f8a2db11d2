//! Wires the store, remote API and network signal into one engine.

use std::path::Path;
use std::sync::Arc;

use crate::api::{EventApi, HttpEventApi};
use crate::config::SyncConfig;
use crate::db::LocalStore;
use crate::error::{Error, Result};
use crate::network::NetworkStatus;
use crate::services::EventRepository;
use crate::sync::{ConflictResolver, MutationQueue, SyncCoordinator};

/// All sync components sharing one store and one API client
pub struct SyncEngine<A> {
    store: LocalStore,
    events: EventRepository<A>,
    queue: MutationQueue<A>,
    conflicts: ConflictResolver<A>,
    coordinator: SyncCoordinator<A>,
    config: SyncConfig,
}

impl<A> Clone for SyncEngine<A> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            events: self.events.clone(),
            queue: self.queue.clone(),
            conflicts: self.conflicts.clone(),
            coordinator: self.coordinator.clone(),
            config: self.config.clone(),
        }
    }
}

impl<A: EventApi> SyncEngine<A> {
    pub fn new(store: LocalStore, api: Arc<A>, network: NetworkStatus, config: SyncConfig) -> Self {
        let queue = MutationQueue::new(store.clone(), Arc::clone(&api), config.retry);
        let events = EventRepository::new(store.clone(), Arc::clone(&api), queue.clone());
        let conflicts = ConflictResolver::new(store.clone(), api, queue.clone());
        let coordinator =
            SyncCoordinator::new(store.clone(), queue.clone(), network, config.sync_interval);
        Self {
            store,
            events,
            queue,
            conflicts,
            coordinator,
            config,
        }
    }

    /// Offline-first CRUD
    pub const fn events(&self) -> &EventRepository<A> {
        &self.events
    }

    pub const fn queue(&self) -> &MutationQueue<A> {
        &self.queue
    }

    pub const fn conflicts(&self) -> &ConflictResolver<A> {
        &self.conflicts
    }

    pub const fn coordinator(&self) -> &SyncCoordinator<A> {
        &self.coordinator
    }

    pub const fn store(&self) -> &LocalStore {
        &self.store
    }

    pub const fn config(&self) -> &SyncConfig {
        &self.config
    }
}

impl SyncEngine<HttpEventApi> {
    /// Open the store at `db_path` and talk to the configured HTTP API
    pub async fn open(
        db_path: impl AsRef<Path>,
        config: SyncConfig,
        network: NetworkStatus,
    ) -> Result<Self> {
        config.validate().map_err(Error::InvalidInput)?;
        let api = HttpEventApi::from_config(&config)?;
        let store = LocalStore::open(db_path).await?;
        tracing::info!(api = %api.base_url(), "Sync engine ready");
        Ok(Self::new(store, Arc::new(api), network, config))
    }
}
