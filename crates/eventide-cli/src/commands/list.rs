use eventide_core::{EventApi, SyncEngine};

use crate::commands::common::{event_to_list_item, format_event_lines, EventListItem};
use crate::error::CliError;

pub async fn run_list<A: EventApi>(
    engine: &SyncEngine<A>,
    page: u32,
    limit: Option<u32>,
    as_json: bool,
) -> Result<(), CliError> {
    let limit = limit.unwrap_or(engine.config().page_size);
    let result = engine.events().list(page, limit).await?;

    if as_json {
        let json_items = result
            .events
            .iter()
            .map(event_to_list_item)
            .collect::<Vec<EventListItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
        return Ok(());
    }

    if result.from_cache {
        eprintln!("Server unreachable; showing cached events.");
    }
    if result.events.is_empty() {
        println!("No events found.");
        return Ok(());
    }

    for line in format_event_lines(&result.events) {
        println!("{line}");
    }
    if let Some(total) = result.total {
        println!("Page {} ({} per page, {total} total)", result.page, result.limit);
    }
    Ok(())
}
