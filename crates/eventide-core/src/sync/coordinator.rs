//! Background sync coordinator.
//!
//! Drains the mutation queue on a fixed interval while online and
//! immediately when connectivity comes back. Only one drain runs at a time.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};

use super::queue::{DrainReport, MutationQueue};
use crate::api::EventApi;
use crate::db::{EventFilter, LocalStore};
use crate::error::Result;
use crate::models::{Conflict, Event};
use crate::network::NetworkStatus;
use crate::state::{SyncSnapshot, SyncState};
use crate::util::now_millis;

/// Result of [`SyncCoordinator::trigger_sync`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerOutcome {
    Completed(DrainReport),
    /// Another drain was in progress; nothing was done
    AlreadyRunning,
    /// Offline; draining would only burn retry budget
    Offline,
}

struct Inner<A> {
    store: LocalStore,
    queue: MutationQueue<A>,
    network: NetworkStatus,
    interval: Option<Duration>,
    draining: AtomicBool,
    state: watch::Sender<SyncSnapshot>,
}

/// Drives queue drains and publishes [`SyncSnapshot`]s
pub struct SyncCoordinator<A> {
    inner: Arc<Inner<A>>,
}

impl<A> Clone for SyncCoordinator<A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Clears the drain flag however the drain ends
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl<A: EventApi> SyncCoordinator<A> {
    pub fn new(
        store: LocalStore,
        queue: MutationQueue<A>,
        network: NetworkStatus,
        interval: Option<Duration>,
    ) -> Self {
        let (state, _) = watch::channel(SyncSnapshot {
            is_online: network.is_online(),
            ..SyncSnapshot::default()
        });
        Self {
            inner: Arc::new(Inner {
                store,
                queue,
                network,
                interval,
                draining: AtomicBool::new(false),
                state,
            }),
        }
    }

    /// Current state
    pub fn snapshot(&self) -> SyncSnapshot {
        self.inner.state.borrow().clone()
    }

    /// Watch state changes
    pub fn subscribe(&self) -> watch::Receiver<SyncSnapshot> {
        self.inner.state.subscribe()
    }

    pub fn is_online(&self) -> bool {
        self.inner.network.is_online()
    }

    /// Records with local changes not yet on the server
    pub async fn pending_events(&self) -> Result<Vec<Event>> {
        self.inner.store.events_where(EventFilter::Unsynced).await
    }

    pub async fn unresolved_conflicts(&self) -> Result<Vec<Conflict>> {
        self.inner.store.unresolved_conflicts().await
    }

    /// Re-read the queue length into the snapshot
    pub async fn refresh_pending_count(&self) -> Result<usize> {
        let pending = self.inner.queue.pending_count().await?;
        self.inner.state.send_if_modified(|snapshot| {
            if snapshot.pending_count == pending {
                false
            } else {
                snapshot.pending_count = pending;
                true
            }
        });
        Ok(pending)
    }

    /// Drain the queue now unless offline or already draining
    pub async fn trigger_sync(&self) -> Result<TriggerOutcome> {
        let online = self.inner.network.is_online();
        self.inner.state.send_if_modified(|snapshot| {
            let changed = snapshot.is_online != online;
            snapshot.is_online = online;
            changed
        });
        if !online {
            tracing::debug!("Skipping sync while offline");
            return Ok(TriggerOutcome::Offline);
        }

        if self
            .inner
            .draining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("Sync already running");
            return Ok(TriggerOutcome::AlreadyRunning);
        }
        let _guard = DrainGuard(&self.inner.draining);

        self.inner.state.send_modify(|snapshot| {
            snapshot.state = SyncState::Syncing;
        });

        let result = self.inner.queue.process_all_pending().await;
        let pending = self.inner.queue.pending_count().await;

        match result {
            Ok(report) => {
                let failure = (report.failed > 0).then(|| {
                    format!(
                        "{} of {} mutations failed to sync",
                        report.failed, report.attempted
                    )
                });
                self.inner.state.send_modify(|snapshot| {
                    snapshot.state = if failure.is_some() {
                        SyncState::Error
                    } else {
                        SyncState::Idle
                    };
                    snapshot.last_error.clone_from(&failure);
                    snapshot.last_sync_at = Some(now_millis());
                    if let Ok(pending) = &pending {
                        snapshot.pending_count = *pending;
                    }
                });
                Ok(TriggerOutcome::Completed(report))
            }
            Err(error) => {
                tracing::warn!("Sync drain failed: {}", error);
                let message = error.to_string();
                self.inner.state.send_modify(|snapshot| {
                    snapshot.state = SyncState::Error;
                    snapshot.last_error = Some(message);
                    if let Ok(pending) = &pending {
                        snapshot.pending_count = *pending;
                    }
                });
                Err(error)
            }
        }
    }

    /// Run the coordinator loop on the tokio runtime
    ///
    /// Abort the returned handle to stop it.
    pub fn spawn(&self) -> JoinHandle<()> {
        let coordinator = self.clone();
        tokio::spawn(async move { coordinator.run().await })
    }

    async fn run(self) {
        let mut network = self.inner.network.subscribe();
        let mut changes = self.inner.store.subscribe();
        let mut ticker = self.inner.interval.map(|period| {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });
        let mut was_online = *network.borrow_and_update();

        if let Err(error) = self.refresh_pending_count().await {
            tracing::warn!("Could not read queue length: {}", error);
        }
        if was_online {
            self.drain("startup").await;
        }

        loop {
            tokio::select! {
                () = next_tick(ticker.as_mut()) => {
                    if self.inner.network.is_online() {
                        self.drain("interval").await;
                    }
                }
                changed = network.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let online = *network.borrow_and_update();
                    self.inner.state.send_modify(|snapshot| snapshot.is_online = online);
                    if online && !was_online {
                        tracing::info!("Back online, draining mutation queue");
                        self.drain("reconnect").await;
                    }
                    was_online = online;
                }
                change = changes.recv() => {
                    match change {
                        Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {
                            if let Err(error) = self.refresh_pending_count().await {
                                tracing::warn!("Could not read queue length: {}", error);
                            }
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        }
        tracing::debug!("Sync coordinator stopped");
    }

    async fn drain(&self, reason: &str) {
        match self.trigger_sync().await {
            Ok(TriggerOutcome::Completed(report)) => {
                tracing::debug!(reason, attempted = report.attempted, "Sync finished");
            }
            Ok(outcome) => tracing::debug!(reason, ?outcome, "Sync not run"),
            Err(error) => tracing::warn!(reason, "Sync failed: {}", error),
        }
    }
}

async fn next_tick(ticker: Option<&mut Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}
