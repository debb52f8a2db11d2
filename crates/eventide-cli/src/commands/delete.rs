use eventide_core::{EventApi, SyncEngine};

use crate::commands::common::{display_id, find_event};
use crate::error::CliError;

pub async fn run_delete<A: EventApi>(engine: &SyncEngine<A>, id: &str) -> Result<(), CliError> {
    let event = find_event(engine, id).await?;
    engine.events().delete(&event.local_id).await?;
    println!("{}", display_id(&event));
    Ok(())
}
