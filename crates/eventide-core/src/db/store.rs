//! Local store for events, the mutation queue and conflicts.
//!
//! All three tables live in one libSQL database. Every write publishes a
//! [`StoreChange`] so observers can react without re-querying.

#![allow(clippy::cast_possible_wrap)] // SQLite uses i64 for LIMIT/OFFSET and counters

use std::path::Path;
use std::sync::Arc;

use libsql::params::Params;
use libsql::{Connection, Row, Value};
use tokio::sync::{broadcast, Mutex};

use super::Database;
use crate::error::{Error, Result};
use crate::models::{
    Conflict, EntityType, Event, MutationItem, Operation, RecordState, Resolution, SyncStats,
    SyncStatus,
};
use crate::util::now_millis;

const CHANGE_CHANNEL_CAPACITY: usize = 256;

const EVENT_COLUMNS: &str = "local_id, server_id, data, version, sync_status, \
     pending_operation, retry_count, last_error, last_modified";

const QUEUE_COLUMNS: &str = "id, entity_type, entity_id, local_id, operation, payload, \
     timestamp, retry_count, next_retry_at, error";

const CONFLICT_COLUMNS: &str = "id, entity_type, entity_id, local_id, local_data, \
     local_version, server_data, detected_at, resolved_at, resolution";

/// Notification emitted after a store write
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreChange {
    /// An event row was written or removed
    Event { local_id: String },
    /// The mutation queue changed
    Queue,
    /// A conflict row was written
    Conflict { id: String },
    /// Every table was wiped
    Cleared,
}

/// Predicate for event scans
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventFilter {
    /// Every cached record
    All,
    /// Records with the given status
    Status(SyncStatus),
    /// Records whose status is anything but `synced`
    Unsynced,
    /// Records not waiting for a delete to reach the server
    Visible,
}

impl EventFilter {
    fn where_clause(self) -> (&'static str, Vec<Value>) {
        match self {
            Self::All => ("", Vec::new()),
            Self::Status(status) => (
                "WHERE sync_status = ?1",
                vec![Value::Text(status.as_str().to_string())],
            ),
            Self::Unsynced => (
                "WHERE sync_status != ?1",
                vec![Value::Text(SyncStatus::Synced.as_str().to_string())],
            ),
            Self::Visible => (
                "WHERE pending_operation IS NULL OR pending_operation != ?1",
                vec![Value::Text(Operation::Delete.as_str().to_string())],
            ),
        }
    }
}

/// Shared handle to the local store
#[derive(Clone)]
pub struct LocalStore {
    db: Arc<Mutex<Database>>,
    changes: broadcast::Sender<StoreChange>,
}

impl LocalStore {
    /// Wrap an already opened database
    pub fn new(db: Database) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            db: Arc::new(Mutex::new(db)),
            changes,
        }
    }

    /// Open a store backed by a file at `path`
    ///
    /// A file that is not a database is moved aside and replaced with a
    /// fresh store.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        match Database::open(path).await {
            Ok(db) => Ok(Self::new(db)),
            Err(error) if is_corrupted_store_error(&error) => {
                tracing::warn!(
                    "Local store at {} is unreadable: {}. Moving it aside and starting fresh.",
                    path.display(),
                    error
                );
                quarantine_store_files(path)?;
                Ok(Self::new(Database::open(path).await?))
            }
            Err(error) => Err(error),
        }
    }

    /// Open an in-memory store (primarily for tests)
    pub async fn open_in_memory() -> Result<Self> {
        Ok(Self::new(Database::open_in_memory().await?))
    }

    /// Subscribe to change notifications
    pub fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }

    fn notify(&self, change: StoreChange) {
        // No subscribers is fine.
        let _ = self.changes.send(change);
    }

    // ---------------------------------------------------------------------
    // Events
    // ---------------------------------------------------------------------

    /// Fetch a record by local id or server id
    pub async fn get_event(&self, id: &str) -> Result<Option<Event>> {
        let db = self.db.lock().await;
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE local_id = ?1 OR server_id = ?1 LIMIT 1"
        );
        let events = query_events(db.connection(), &sql, vec![text(id)]).await?;
        Ok(events.into_iter().next())
    }

    /// Fetch a record by its server id only
    pub async fn get_event_by_server_id(&self, server_id: &str) -> Result<Option<Event>> {
        let db = self.db.lock().await;
        let sql = format!("SELECT {EVENT_COLUMNS} FROM events WHERE server_id = ?1 LIMIT 1");
        let events = query_events(db.connection(), &sql, vec![text(server_id)]).await?;
        Ok(events.into_iter().next())
    }

    /// Insert or replace a record
    pub async fn put_event(&self, event: &Event) -> Result<()> {
        {
            let db = self.db.lock().await;
            insert_event(db.connection(), event).await?;
        }
        self.notify(StoreChange::Event {
            local_id: event.local_id.clone(),
        });
        Ok(())
    }

    /// Insert or replace many records in one transaction
    pub async fn put_events(&self, events: &[Event]) -> Result<()> {
        if events.is_empty() {
            return Ok(());
        }

        {
            let db = self.db.lock().await;
            let conn = db.connection();
            conn.execute("BEGIN TRANSACTION", ()).await?;

            for event in events {
                if let Err(e) = insert_event(conn, event).await {
                    conn.execute("ROLLBACK", ()).await.ok();
                    return Err(e);
                }
            }

            if let Err(e) = conn.execute("COMMIT", ()).await {
                conn.execute("ROLLBACK", ()).await.ok();
                return Err(e.into());
            }
        }

        for event in events {
            self.notify(StoreChange::Event {
                local_id: event.local_id.clone(),
            });
        }
        Ok(())
    }

    /// Replace only the sync state columns of a record
    ///
    /// Returns `false` when the record no longer exists.
    pub async fn set_event_state(&self, local_id: &str, state: &RecordState) -> Result<bool> {
        let rows = {
            let db = self.db.lock().await;
            db.connection()
                .execute(
                    "UPDATE events
                     SET sync_status = ?1, pending_operation = ?2, retry_count = ?3, last_error = ?4
                     WHERE local_id = ?5",
                    Params::Positional(vec![
                        text(state.status().as_str()),
                        opt_text(state.operation().map(Operation::as_str)),
                        Value::Integer(i64::from(state.retry_count())),
                        opt_text(state.last_error()),
                        text(local_id),
                    ]),
                )
                .await?
        };

        if rows > 0 {
            self.notify(StoreChange::Event {
                local_id: local_id.to_string(),
            });
        }
        Ok(rows > 0)
    }

    /// Remove a record by local id
    pub async fn delete_event(&self, local_id: &str) -> Result<()> {
        {
            let db = self.db.lock().await;
            db.connection()
                .execute("DELETE FROM events WHERE local_id = ?1", [local_id])
                .await?;
        }
        self.notify(StoreChange::Event {
            local_id: local_id.to_string(),
        });
        Ok(())
    }

    /// Scan records matching `filter`, most recently modified first
    pub async fn events_where(&self, filter: EventFilter) -> Result<Vec<Event>> {
        let db = self.db.lock().await;
        let (clause, params) = filter.where_clause();
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM events {clause} ORDER BY last_modified DESC, local_id ASC"
        );
        query_events(db.connection(), &sql, params).await
    }

    /// Count records per sync status
    pub async fn event_stats(&self) -> Result<SyncStats> {
        let db = self.db.lock().await;
        let mut rows = db
            .connection()
            .query(
                "SELECT sync_status, COUNT(*) FROM events GROUP BY sync_status",
                (),
            )
            .await?;

        let mut stats = SyncStats::default();
        while let Some(row) = rows.next().await? {
            let status = parse_column::<SyncStatus>(&row.get::<String>(0)?)?;
            let count = usize::try_from(row.get::<i64>(1)?).unwrap_or_default();
            stats.add(status, count);
        }
        Ok(stats)
    }

    // ---------------------------------------------------------------------
    // Mutation queue
    // ---------------------------------------------------------------------

    /// Insert or replace a queue item
    pub async fn put_queue_item(&self, item: &MutationItem) -> Result<()> {
        let payload = serde_json::to_string(&item.payload)?;
        {
            let db = self.db.lock().await;
            db.connection()
                .execute(
                    &format!(
                        "INSERT INTO sync_queue ({QUEUE_COLUMNS})
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                         ON CONFLICT(id) DO UPDATE SET
                             entity_id = excluded.entity_id,
                             payload = excluded.payload,
                             retry_count = excluded.retry_count,
                             next_retry_at = excluded.next_retry_at,
                             error = excluded.error"
                    ),
                    Params::Positional(vec![
                        text(&item.id),
                        text(item.entity_type.as_str()),
                        text(&item.entity_id),
                        text(&item.local_id),
                        text(item.operation.as_str()),
                        Value::Text(payload),
                        Value::Integer(item.timestamp),
                        Value::Integer(i64::from(item.retry_count)),
                        opt_int(item.next_retry_at),
                        opt_text(item.error.as_deref()),
                    ]),
                )
                .await?;
        }
        self.notify(StoreChange::Queue);
        Ok(())
    }

    /// Fetch a queue item by id
    pub async fn get_queue_item(&self, id: &str) -> Result<Option<MutationItem>> {
        let db = self.db.lock().await;
        let sql = format!("SELECT {QUEUE_COLUMNS} FROM sync_queue WHERE id = ?1");
        let items = query_queue(db.connection(), &sql, vec![text(id)]).await?;
        Ok(items.into_iter().next())
    }

    /// Remove a queue item
    pub async fn delete_queue_item(&self, id: &str) -> Result<()> {
        {
            let db = self.db.lock().await;
            db.connection()
                .execute("DELETE FROM sync_queue WHERE id = ?1", [id])
                .await?;
        }
        self.notify(StoreChange::Queue);
        Ok(())
    }

    /// Remove every queue item for a record, returning how many were dropped
    pub async fn delete_queue_items_for(&self, local_id: &str) -> Result<u64> {
        let rows = {
            let db = self.db.lock().await;
            db.connection()
                .execute("DELETE FROM sync_queue WHERE local_id = ?1", [local_id])
                .await?
        };
        if rows > 0 {
            self.notify(StoreChange::Queue);
        }
        Ok(rows)
    }

    /// Every queue item in enqueue order
    pub async fn queue_items(&self) -> Result<Vec<MutationItem>> {
        let db = self.db.lock().await;
        let sql =
            format!("SELECT {QUEUE_COLUMNS} FROM sync_queue ORDER BY timestamp ASC, rowid ASC");
        query_queue(db.connection(), &sql, Vec::new()).await
    }

    /// Queue items for one record in enqueue order
    pub async fn queue_items_for(&self, local_id: &str) -> Result<Vec<MutationItem>> {
        let db = self.db.lock().await;
        let sql = format!(
            "SELECT {QUEUE_COLUMNS} FROM sync_queue WHERE local_id = ?1
             ORDER BY timestamp ASC, rowid ASC"
        );
        query_queue(db.connection(), &sql, vec![text(local_id)]).await
    }

    /// Items still under the retry cap whose backoff has elapsed at `now`
    pub async fn due_queue_items(&self, max_retries: u32, now: i64) -> Result<Vec<MutationItem>> {
        let db = self.db.lock().await;
        let sql = format!(
            "SELECT {QUEUE_COLUMNS} FROM sync_queue
             WHERE retry_count < ?1 AND (next_retry_at IS NULL OR next_retry_at <= ?2)
             ORDER BY timestamp ASC, rowid ASC"
        );
        query_queue(
            db.connection(),
            &sql,
            vec![Value::Integer(i64::from(max_retries)), Value::Integer(now)],
        )
        .await
    }

    /// Number of queue rows
    pub async fn queue_len(&self) -> Result<usize> {
        let db = self.db.lock().await;
        let mut rows = db
            .connection()
            .query("SELECT COUNT(*) FROM sync_queue", ())
            .await?;
        let count = match rows.next().await? {
            Some(row) => row.get::<i64>(0)?,
            None => 0,
        };
        Ok(usize::try_from(count).unwrap_or_default())
    }

    // ---------------------------------------------------------------------
    // Conflicts
    // ---------------------------------------------------------------------

    /// Insert or replace a conflict row
    pub async fn put_conflict(&self, conflict: &Conflict) -> Result<()> {
        let local_data = serde_json::to_string(&conflict.local_data)?;
        let server_data = serde_json::to_string(&conflict.server_data)?;
        {
            let db = self.db.lock().await;
            db.connection()
                .execute(
                    &format!(
                        "INSERT OR REPLACE INTO conflicts ({CONFLICT_COLUMNS})
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
                    ),
                    Params::Positional(vec![
                        text(&conflict.id),
                        text(conflict.entity_type.as_str()),
                        text(&conflict.entity_id),
                        text(&conflict.local_id),
                        Value::Text(local_data),
                        Value::Integer(conflict.local_version),
                        Value::Text(server_data),
                        Value::Integer(conflict.detected_at),
                        opt_int(conflict.resolved_at),
                        opt_text(conflict.resolution.map(Resolution::as_str)),
                    ]),
                )
                .await?;
        }
        self.notify(StoreChange::Conflict {
            id: conflict.id.clone(),
        });
        Ok(())
    }

    /// Fetch a conflict by id
    pub async fn get_conflict(&self, id: &str) -> Result<Option<Conflict>> {
        let db = self.db.lock().await;
        let sql = format!("SELECT {CONFLICT_COLUMNS} FROM conflicts WHERE id = ?1");
        let conflicts = query_conflicts(db.connection(), &sql, vec![text(id)]).await?;
        Ok(conflicts.into_iter().next())
    }

    /// Most recently detected conflicts, resolved ones included
    pub async fn list_conflicts(&self, limit: usize) -> Result<Vec<Conflict>> {
        let db = self.db.lock().await;
        let sql = format!(
            "SELECT {CONFLICT_COLUMNS} FROM conflicts ORDER BY detected_at DESC, id DESC LIMIT ?1"
        );
        query_conflicts(db.connection(), &sql, vec![Value::Integer(limit as i64)]).await
    }

    /// Conflicts awaiting resolution, oldest first
    pub async fn unresolved_conflicts(&self) -> Result<Vec<Conflict>> {
        let db = self.db.lock().await;
        let sql = format!(
            "SELECT {CONFLICT_COLUMNS} FROM conflicts WHERE resolved_at IS NULL
             ORDER BY detected_at ASC, id ASC"
        );
        query_conflicts(db.connection(), &sql, Vec::new()).await
    }

    // ---------------------------------------------------------------------
    // Maintenance
    // ---------------------------------------------------------------------

    /// Wipe all cached records, queued mutations and conflicts
    pub async fn clear_all(&self) -> Result<()> {
        {
            let db = self.db.lock().await;
            let conn = db.connection();
            conn.execute("BEGIN TRANSACTION", ()).await?;
            for stmt in [
                "DELETE FROM events",
                "DELETE FROM sync_queue",
                "DELETE FROM conflicts",
            ] {
                if let Err(e) = conn.execute(stmt, ()).await {
                    conn.execute("ROLLBACK", ()).await.ok();
                    return Err(e.into());
                }
            }
            if let Err(e) = conn.execute("COMMIT", ()).await {
                conn.execute("ROLLBACK", ()).await.ok();
                return Err(e.into());
            }
        }
        tracing::info!("Cleared local store");
        self.notify(StoreChange::Cleared);
        Ok(())
    }
}

fn is_corrupted_store_error(error: &Error) -> bool {
    let message = error.to_string().to_ascii_lowercase();
    message.contains("file is not a database") || message.contains("malformed")
}

/// Rename the store file to `<name>.corrupt-<ms>` and drop its WAL sidecars
fn quarantine_store_files(path: &Path) -> Result<()> {
    if path.exists() {
        let backup = path.with_file_name(format!(
            "{}.corrupt-{}",
            path.file_name()
                .map_or_else(|| "eventide.db".into(), |name| name.to_string_lossy()),
            now_millis()
        ));
        std::fs::rename(path, &backup)?;
        tracing::warn!(
            "Moved unreadable local store from {} to {}",
            path.display(),
            backup.display()
        );
    }

    for suffix in ["-wal", "-shm"] {
        let mut sidecar = path.as_os_str().to_owned();
        sidecar.push(suffix);
        let sidecar = std::path::PathBuf::from(sidecar);
        if sidecar.exists() {
            std::fs::remove_file(&sidecar)?;
        }
    }
    Ok(())
}

// -------------------------------------------------------------------------
// Row mapping
// -------------------------------------------------------------------------

async fn insert_event(conn: &Connection, event: &Event) -> Result<()> {
    let data = serde_json::to_string(&event.fields)?;
    conn.execute(
        &format!(
            "INSERT OR REPLACE INTO events ({EVENT_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
        ),
        Params::Positional(vec![
            text(&event.local_id),
            opt_text(event.id.as_deref()),
            Value::Text(data),
            Value::Integer(event.version),
            text(event.state.status().as_str()),
            opt_text(event.state.operation().map(Operation::as_str)),
            Value::Integer(i64::from(event.state.retry_count())),
            opt_text(event.state.last_error()),
            Value::Integer(event.last_modified),
        ]),
    )
    .await?;
    Ok(())
}

async fn query_events(conn: &Connection, sql: &str, params: Vec<Value>) -> Result<Vec<Event>> {
    let mut rows = conn.query(sql, Params::Positional(params)).await?;
    let mut events = Vec::new();
    while let Some(row) = rows.next().await? {
        events.push(parse_event(&row)?);
    }
    Ok(events)
}

async fn query_queue(
    conn: &Connection,
    sql: &str,
    params: Vec<Value>,
) -> Result<Vec<MutationItem>> {
    let mut rows = conn.query(sql, Params::Positional(params)).await?;
    let mut items = Vec::new();
    while let Some(row) = rows.next().await? {
        items.push(parse_queue_item(&row)?);
    }
    Ok(items)
}

async fn query_conflicts(
    conn: &Connection,
    sql: &str,
    params: Vec<Value>,
) -> Result<Vec<Conflict>> {
    let mut rows = conn.query(sql, Params::Positional(params)).await?;
    let mut conflicts = Vec::new();
    while let Some(row) = rows.next().await? {
        conflicts.push(parse_conflict(&row)?);
    }
    Ok(conflicts)
}

fn parse_event(row: &Row) -> Result<Event> {
    let status = parse_column::<SyncStatus>(&row.get::<String>(4)?)?;
    let operation = read_opt_text(row, 5)?
        .map(|value| parse_column::<Operation>(&value))
        .transpose()?;
    let state = RecordState::from_columns(
        status,
        operation,
        read_count(row, 6)?,
        read_opt_text(row, 7)?,
    )
    .map_err(Error::Database)?;

    Ok(Event {
        local_id: row.get::<String>(0)?,
        id: read_opt_text(row, 1)?,
        fields: serde_json::from_str(&row.get::<String>(2)?)?,
        version: row.get::<i64>(3)?,
        state,
        last_modified: row.get::<i64>(8)?,
    })
}

fn parse_queue_item(row: &Row) -> Result<MutationItem> {
    Ok(MutationItem {
        id: row.get::<String>(0)?,
        entity_type: parse_column::<EntityType>(&row.get::<String>(1)?)?,
        entity_id: row.get::<String>(2)?,
        local_id: row.get::<String>(3)?,
        operation: parse_column::<Operation>(&row.get::<String>(4)?)?,
        payload: serde_json::from_str(&row.get::<String>(5)?)?,
        timestamp: row.get::<i64>(6)?,
        retry_count: read_count(row, 7)?,
        next_retry_at: read_opt_int(row, 8)?,
        error: read_opt_text(row, 9)?,
    })
}

fn parse_conflict(row: &Row) -> Result<Conflict> {
    Ok(Conflict {
        id: row.get::<String>(0)?,
        entity_type: parse_column::<EntityType>(&row.get::<String>(1)?)?,
        entity_id: row.get::<String>(2)?,
        local_id: row.get::<String>(3)?,
        local_data: serde_json::from_str(&row.get::<String>(4)?)?,
        local_version: row.get::<i64>(5)?,
        server_data: serde_json::from_str(&row.get::<String>(6)?)?,
        detected_at: row.get::<i64>(7)?,
        resolved_at: read_opt_int(row, 8)?,
        resolution: read_opt_text(row, 9)?
            .map(|value| parse_column::<Resolution>(&value))
            .transpose()?,
    })
}

fn parse_column<T>(value: &str) -> Result<T>
where
    T: std::str::FromStr<Err = String>,
{
    value.parse().map_err(Error::Database)
}

fn read_opt_text(row: &Row, idx: i32) -> Result<Option<String>> {
    match row.get_value(idx)? {
        Value::Null => Ok(None),
        Value::Text(value) => Ok(Some(value)),
        other => Err(Error::Database(format!(
            "expected text or null in column {idx}, got {other:?}"
        ))),
    }
}

fn read_opt_int(row: &Row, idx: i32) -> Result<Option<i64>> {
    match row.get_value(idx)? {
        Value::Null => Ok(None),
        Value::Integer(value) => Ok(Some(value)),
        other => Err(Error::Database(format!(
            "expected integer or null in column {idx}, got {other:?}"
        ))),
    }
}

fn read_count(row: &Row, idx: i32) -> Result<u32> {
    let value = row.get::<i64>(idx)?;
    u32::try_from(value)
        .map_err(|_| Error::Database(format!("counter out of range in column {idx}: {value}")))
}

fn text(value: impl Into<String>) -> Value {
    Value::Text(value.into())
}

fn opt_text(value: Option<&str>) -> Value {
    value.map_or(Value::Null, |value| Value::Text(value.to_string()))
}

fn opt_int(value: Option<i64>) -> Value {
    value.map_or(Value::Null, Value::Integer)
}
