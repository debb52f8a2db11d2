//! In-process event server.
//!
//! Behaves like the HTTP API (versioned PATCH with 409 on stale writes,
//! 404 on unknown ids) and adds knobs for going offline, injecting
//! failures and inspecting the calls it received.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{ApiError, ApiResult, EventApi, EventPage};
use crate::models::{EventFields, EventPatch, RemoteEvent};

/// A request received by [`InMemoryEventApi`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiCall {
    List { page: u32, limit: u32 },
    Get(String),
    Create(String),
    Update { id: String, original_version: i64 },
    Delete(String),
}

#[derive(Debug)]
struct ServerState {
    online: bool,
    events: Vec<RemoteEvent>,
    next_id: u64,
    injected: VecDeque<ApiError>,
    conflict_body: bool,
    calls: Vec<ApiCall>,
}

/// [`EventApi`] backed by a vector in memory
#[derive(Debug)]
pub struct InMemoryEventApi {
    state: Mutex<ServerState>,
}

impl Default for InMemoryEventApi {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryEventApi {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(ServerState {
                online: true,
                events: Vec::new(),
                next_id: 1,
                injected: VecDeque::new(),
                conflict_body: true,
                calls: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Toggle reachability; while offline every call fails with a network error
    pub fn set_online(&self, online: bool) {
        self.lock().online = online;
    }

    /// Fail the next `count` calls with a network error
    pub fn fail_next(&self, count: usize) {
        let mut state = self.lock();
        for _ in 0..count {
            state
                .injected
                .push_back(ApiError::Network("injected failure".to_string()));
        }
    }

    /// Fail the next call with `error`
    pub fn fail_next_with(&self, error: ApiError) {
        self.lock().injected.push_back(error);
    }

    /// Whether 409 responses include the current server record
    pub fn set_conflict_body(&self, include: bool) {
        self.lock().conflict_body = include;
    }

    /// Every call received so far, failed ones included
    pub fn calls(&self) -> Vec<ApiCall> {
        self.lock().calls.clone()
    }

    /// Forget recorded calls, keeping server state
    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Create a record directly on the server, as another client would
    pub fn insert_server_event(&self, fields: EventFields) -> RemoteEvent {
        self.lock().insert(fields)
    }

    /// Edit a record directly on the server, bumping its version
    pub fn modify_server_event(&self, id: &str, patch: &EventPatch) -> Option<RemoteEvent> {
        let mut state = self.lock();
        let event = state.events.iter_mut().find(|event| event.id == id)?;
        event.fields.apply(patch);
        event.version += 1;
        Some(event.clone())
    }

    /// Delete a record directly on the server, as another client would
    pub fn remove_server_event(&self, id: &str) -> bool {
        let mut state = self.lock();
        let before = state.events.len();
        state.events.retain(|event| event.id != id);
        state.events.len() != before
    }

    pub fn server_event(&self, id: &str) -> Option<RemoteEvent> {
        self.lock().find(id).cloned()
    }

    pub fn server_events(&self) -> Vec<RemoteEvent> {
        self.lock().events.clone()
    }

    /// Record the call, then apply the offline switch and injected failures
    fn begin(&self, call: ApiCall) -> ApiResult<MutexGuard<'_, ServerState>> {
        let mut state = self.lock();
        state.calls.push(call);
        if !state.online {
            return Err(ApiError::Network("server unreachable".to_string()));
        }
        if let Some(error) = state.injected.pop_front() {
            return Err(error);
        }
        Ok(state)
    }
}

impl ServerState {
    fn insert(&mut self, fields: EventFields) -> RemoteEvent {
        let event = RemoteEvent {
            id: format!("evt_{}", self.next_id),
            fields,
            version: 1,
        };
        self.next_id += 1;
        self.events.push(event.clone());
        event
    }

    fn find(&self, id: &str) -> Option<&RemoteEvent> {
        self.events.iter().find(|event| event.id == id)
    }
}

impl EventApi for InMemoryEventApi {
    async fn list(&self, page: u32, limit: u32) -> ApiResult<EventPage> {
        let state = self.begin(ApiCall::List { page, limit })?;
        let page = page.max(1);
        let start = (page as usize - 1).saturating_mul(limit as usize);
        let data = state
            .events
            .iter()
            .skip(start)
            .take(limit as usize)
            .cloned()
            .collect();
        Ok(EventPage {
            data,
            page,
            limit,
            total: Some(state.events.len() as u64),
        })
    }

    async fn get(&self, id: &str) -> ApiResult<RemoteEvent> {
        let state = self.begin(ApiCall::Get(id.to_string()))?;
        state
            .find(id)
            .cloned()
            .ok_or_else(|| ApiError::NotFound(id.to_string()))
    }

    async fn create(&self, data: &EventFields) -> ApiResult<RemoteEvent> {
        let mut state = self.begin(ApiCall::Create(data.title.clone()))?;
        Ok(state.insert(data.clone()))
    }

    async fn update(
        &self,
        id: &str,
        data: &EventPatch,
        original_version: i64,
    ) -> ApiResult<RemoteEvent> {
        let mut state = self.begin(ApiCall::Update {
            id: id.to_string(),
            original_version,
        })?;
        let conflict_body = state.conflict_body;
        let event = state
            .events
            .iter_mut()
            .find(|event| event.id == id)
            .ok_or_else(|| ApiError::NotFound(id.to_string()))?;

        if event.version > original_version {
            return Err(ApiError::Conflict {
                current: conflict_body.then(|| Box::new(event.clone())),
            });
        }

        event.fields.apply(data);
        event.version += 1;
        Ok(event.clone())
    }

    async fn delete(&self, id: &str) -> ApiResult<()> {
        let mut state = self.begin(ApiCall::Delete(id.to_string()))?;
        let before = state.events.len();
        state.events.retain(|event| event.id != id);
        if state.events.len() == before {
            return Err(ApiError::NotFound(id.to_string()));
        }
        Ok(())
    }
}
