use eventide_core::{EventApi, SyncEngine};

use crate::error::CliError;

pub async fn run_reset<A: EventApi>(engine: &SyncEngine<A>, confirmed: bool) -> Result<(), CliError> {
    if !confirmed {
        return Err(CliError::ResetNotConfirmed);
    }

    let queued = engine.events().pending_changes_count().await?;
    engine.events().clear_local_cache().await?;
    if queued > 0 {
        println!("Local data cleared ({queued} unsynced change(s) discarded)");
    } else {
        println!("Local data cleared");
    }
    Ok(())
}
