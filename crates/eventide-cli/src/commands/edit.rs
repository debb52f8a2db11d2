use eventide_core::{Event, EventApi, EventPatch, SyncEngine};

use crate::commands::common::{find_event, normalize_event_identifier};
use crate::error::CliError;

pub async fn run_edit<A: EventApi>(
    engine: &SyncEngine<A>,
    id: &str,
    patch: EventPatch,
) -> Result<Event, CliError> {
    let id = normalize_event_identifier(id)?;
    let event = find_event(engine, &id).await?;

    let updated = engine
        .events()
        .update(&event.local_id, patch)
        .await?
        .ok_or(CliError::EventNotFound(id))?;
    println!("{}", updated.local_id);
    Ok(updated)
}
