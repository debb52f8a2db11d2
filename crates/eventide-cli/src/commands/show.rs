use eventide_core::{EventApi, SyncEngine};

use crate::commands::common::{event_to_list_item, find_event, format_event_details};
use crate::error::CliError;

pub async fn run_show<A: EventApi>(
    engine: &SyncEngine<A>,
    id: &str,
    as_json: bool,
) -> Result<(), CliError> {
    let event = find_event(engine, id).await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&event_to_list_item(&event))?);
        return Ok(());
    }

    for line in format_event_details(&event) {
        println!("{line}");
    }
    Ok(())
}
