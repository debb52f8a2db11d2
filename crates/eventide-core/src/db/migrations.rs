//! Database migrations

use crate::error::Result;
use libsql::Connection;

/// Current schema version
const CURRENT_VERSION: i32 = 1;

/// Run all pending migrations
pub async fn run(conn: &Connection) -> Result<()> {
    let version = get_version(conn).await?;

    if version < 1 {
        migrate_v1(conn).await?;
    }

    Ok(())
}

/// Get the current schema version
async fn get_version(conn: &Connection) -> Result<i32> {
    let mut rows = conn
        .query(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
            (),
        )
        .await?;

    let exists: bool = if let Some(row) = rows.next().await? {
        row.get::<i32>(0)? != 0
    } else {
        false
    };

    if !exists {
        return Ok(0);
    }

    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM schema_version", ())
        .await?;

    let version: i32 = if let Some(row) = rows.next().await? {
        row.get(0)?
    } else {
        0
    };

    Ok(version)
}

/// Migration to version 1: events, sync queue and conflicts
async fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute("BEGIN TRANSACTION", ()).await?;

    let statements = [
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        )",
        // Cached records, addressable by local or server id
        "CREATE TABLE IF NOT EXISTS events (
            local_id TEXT PRIMARY KEY,
            server_id TEXT UNIQUE,
            data TEXT NOT NULL,
            version INTEGER NOT NULL,
            sync_status TEXT NOT NULL,
            pending_operation TEXT,
            retry_count INTEGER NOT NULL DEFAULT 0,
            last_error TEXT,
            last_modified INTEGER NOT NULL
        )",
        "CREATE INDEX IF NOT EXISTS idx_events_sync_status ON events(sync_status)",
        "CREATE INDEX IF NOT EXISTS idx_events_last_modified ON events(last_modified DESC)",
        "CREATE INDEX IF NOT EXISTS idx_events_version ON events(version)",
        // Durable FIFO of outstanding mutations
        "CREATE TABLE IF NOT EXISTS sync_queue (
            id TEXT PRIMARY KEY,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            local_id TEXT NOT NULL,
            operation TEXT NOT NULL,
            payload TEXT NOT NULL,
            timestamp INTEGER NOT NULL,
            retry_count INTEGER NOT NULL DEFAULT 0,
            next_retry_at INTEGER,
            error TEXT
        )",
        "CREATE INDEX IF NOT EXISTS idx_sync_queue_entity_id ON sync_queue(entity_id)",
        "CREATE INDEX IF NOT EXISTS idx_sync_queue_local_id ON sync_queue(local_id)",
        "CREATE INDEX IF NOT EXISTS idx_sync_queue_operation ON sync_queue(operation)",
        "CREATE INDEX IF NOT EXISTS idx_sync_queue_timestamp ON sync_queue(timestamp)",
        "CREATE INDEX IF NOT EXISTS idx_sync_queue_retry_count ON sync_queue(retry_count)",
        // Conflict audit trail, rows are stamped on resolution and never deleted
        "CREATE TABLE IF NOT EXISTS conflicts (
            id TEXT PRIMARY KEY,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            local_id TEXT NOT NULL,
            local_data TEXT NOT NULL,
            local_version INTEGER NOT NULL,
            server_data TEXT NOT NULL,
            detected_at INTEGER NOT NULL,
            resolved_at INTEGER,
            resolution TEXT
        )",
        "CREATE INDEX IF NOT EXISTS idx_conflicts_entity_id ON conflicts(entity_id)",
        "CREATE INDEX IF NOT EXISTS idx_conflicts_detected_at ON conflicts(detected_at DESC)",
        "CREATE INDEX IF NOT EXISTS idx_conflicts_resolved_at ON conflicts(resolved_at)",
        "INSERT INTO schema_version (version) VALUES (1)",
    ];

    for stmt in statements {
        if let Err(e) = conn.execute(stmt, ()).await {
            conn.execute("ROLLBACK", ()).await.ok();
            return Err(e.into());
        }
    }

    if let Err(e) = conn.execute("COMMIT", ()).await {
        conn.execute("ROLLBACK", ()).await.ok();
        return Err(e.into());
    }

    tracing::info!("Migrated local store to version {CURRENT_VERSION}");
    Ok(())
}
