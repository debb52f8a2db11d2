use chrono::Utc;
use eventide_core::{Event, EventApi, EventFields, SyncEngine};

use crate::commands::common::{normalize_title, parse_optional_timestamp, parse_timestamp};
use crate::error::CliError;

/// Optional fields accepted by `add`
#[derive(Debug, Default)]
pub struct AddOptions<'a> {
    pub starts_at: Option<&'a str>,
    pub ends_at: Option<&'a str>,
    pub venue: Option<String>,
    pub description: Option<String>,
    pub capacity: Option<u32>,
}

pub async fn run_add<A: EventApi>(
    engine: &SyncEngine<A>,
    title_parts: &[String],
    options: AddOptions<'_>,
) -> Result<Event, CliError> {
    let title = normalize_title(title_parts)?;
    let starts_at = match options.starts_at {
        Some(value) => parse_timestamp(value)?,
        None => Utc::now().timestamp_millis(),
    };

    let mut fields = EventFields::new(title, starts_at);
    fields.ends_at = parse_optional_timestamp(options.ends_at)?;
    fields.venue = options.venue;
    fields.description = options.description;
    fields.capacity = options.capacity;

    let event = engine.events().create(fields).await?;
    println!("{}", event.local_id);
    Ok(event)
}
