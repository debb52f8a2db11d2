use eventide_core::models::SyncStats;
use eventide_core::sync::{DrainReport, ItemOutcome, TriggerOutcome};
use eventide_core::{EventApi, SyncEngine, SyncSnapshot};
use serde::Serialize;

use crate::commands::common::{
    format_event_lines, format_queue_lines, format_timestamp, queue_item_to_list_item,
    QueueListItem,
};
use crate::error::CliError;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusReport {
    #[serde(flatten)]
    snapshot: SyncSnapshot,
    records: SyncStats,
    open_conflicts: usize,
}

pub async fn run_sync<A: EventApi>(
    engine: &SyncEngine<A>,
    as_json: bool,
) -> Result<Option<DrainReport>, CliError> {
    let report = match engine.coordinator().trigger_sync().await? {
        TriggerOutcome::Completed(report) => report,
        TriggerOutcome::Offline => {
            println!("Offline; queued changes stay local until the next sync.");
            return Ok(None);
        }
        TriggerOutcome::AlreadyRunning => {
            println!("A sync is already running.");
            return Ok(None);
        }
    };

    if as_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(Some(report));
    }

    println!(
        "Sync completed: {} sent, {} failed, {} conflicted, {} waiting",
        report.succeeded, report.failed, report.conflicted, report.skipped
    );
    if let Some(error) = engine.coordinator().snapshot().last_error {
        println!("Last error: {error}");
    }
    Ok(Some(report))
}

pub async fn run_status<A: EventApi>(engine: &SyncEngine<A>, as_json: bool) -> Result<(), CliError> {
    engine.coordinator().refresh_pending_count().await?;
    let report = StatusReport {
        snapshot: engine.coordinator().snapshot(),
        records: engine.events().sync_stats().await?,
        open_conflicts: engine.conflicts().unresolved_conflicts().await?.len(),
    };

    if as_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let snapshot = &report.snapshot;
    println!("Network:         {}", if snapshot.is_online { "online" } else { "offline" });
    println!("Sync state:      {}", snapshot.state);
    println!("Queued changes:  {}", snapshot.pending_count);
    println!(
        "Last sync:       {}",
        snapshot
            .last_sync_at
            .map_or_else(|| "never (this session)".to_string(), format_timestamp)
    );
    if let Some(error) = &snapshot.last_error {
        println!("Last error:      {error}");
    }
    let records = &report.records;
    println!(
        "Records:         {} total, {} synced, {} pending, {} failed, {} in conflict",
        records.total, records.synced, records.pending, records.failed, records.conflict
    );
    println!("Open conflicts:  {}", report.open_conflicts);

    let pending = engine.coordinator().pending_events().await?;
    if !pending.is_empty() {
        println!();
        println!("Unsynced events:");
        for line in format_event_lines(&pending) {
            println!("  {line}");
        }
    }
    Ok(())
}

pub async fn run_queue<A: EventApi>(engine: &SyncEngine<A>, as_json: bool) -> Result<(), CliError> {
    let items = engine.queue().queued_items().await?;

    if as_json {
        let json_items = items
            .iter()
            .map(queue_item_to_list_item)
            .collect::<Vec<QueueListItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
        return Ok(());
    }

    if items.is_empty() {
        println!("Queue is empty.");
        return Ok(());
    }

    for line in format_queue_lines(&items, engine.queue().policy().max_retries) {
        println!("{line}");
    }
    Ok(())
}

pub async fn run_retry<A: EventApi>(
    engine: &SyncEngine<A>,
    item_id: &str,
) -> Result<ItemOutcome, CliError> {
    let outcome = engine.queue().retry_item(item_id.trim()).await?;
    match &outcome {
        ItemOutcome::Applied => println!("Sent {item_id}"),
        ItemOutcome::Failed { exhausted, error } => {
            if *exhausted {
                println!("Retry failed and will not be retried automatically: {error}");
            } else {
                println!("Retry failed; will try again later: {error}");
            }
        }
        ItemOutcome::Conflicted => {
            println!("Server copy changed; see `eventide conflicts list`");
        }
        ItemOutcome::Dropped => println!("Event no longer exists locally; dropped {item_id}"),
    }
    Ok(outcome)
}
