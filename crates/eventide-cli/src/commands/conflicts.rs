use eventide_core::models::ResolutionStrategy;
use eventide_core::sync::ResolutionOutcome;
use eventide_core::{EventApi, SyncEngine};

use crate::cli::{AutoStrategy, ResolveStrategy};
use crate::commands::common::{
    conflict_to_list_item, format_conflict_lines, ConflictListItem,
};
use crate::error::CliError;

pub async fn run_conflicts_list<A: EventApi>(
    engine: &SyncEngine<A>,
    limit: usize,
    include_resolved: bool,
    as_json: bool,
) -> Result<(), CliError> {
    let conflicts = if include_resolved {
        engine.conflicts().list_conflicts(limit).await?
    } else {
        let mut open = engine.conflicts().unresolved_conflicts().await?;
        open.reverse();
        open.truncate(limit);
        open
    };

    if as_json {
        let json_items = conflicts
            .iter()
            .map(conflict_to_list_item)
            .collect::<Vec<ConflictListItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
        return Ok(());
    }

    if conflicts.is_empty() {
        println!("No sync conflicts recorded.");
        return Ok(());
    }

    for line in format_conflict_lines(&conflicts) {
        println!("{line}");
    }
    Ok(())
}

pub async fn run_conflicts_resolve<A: EventApi>(
    engine: &SyncEngine<A>,
    id: &str,
    strategy: ResolveStrategy,
) -> Result<ResolutionOutcome, CliError> {
    let id = id.trim();
    let outcome = match strategy {
        ResolveStrategy::Local => engine.conflicts().resolve_with_local(id).await?,
        ResolveStrategy::Server => engine.conflicts().resolve_with_server(id).await?,
    };

    match &outcome {
        ResolutionOutcome::Applied(event) => {
            println!("Resolved {id}; event is now at version {}", event.version);
        }
        ResolutionOutcome::Requeued => {
            println!("Resolved {id}; server unreachable, change queued for the next sync");
        }
        ResolutionOutcome::Closed => {
            println!("Closed {id}; the event was already removed locally");
        }
    }
    Ok(outcome)
}

pub async fn run_conflicts_auto<A: EventApi>(
    engine: &SyncEngine<A>,
    strategy: AutoStrategy,
) -> Result<usize, CliError> {
    let strategy = match strategy {
        AutoStrategy::Local => ResolutionStrategy::Local,
        AutoStrategy::Server => ResolutionStrategy::Server,
        AutoStrategy::Manual => ResolutionStrategy::Manual,
    };
    let resolved = engine.conflicts().auto_resolve_conflicts(strategy).await?;
    println!("Resolved {resolved} conflict(s)");
    Ok(resolved)
}
