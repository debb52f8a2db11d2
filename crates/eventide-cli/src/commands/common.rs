use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use eventide_core::models::{MutationItem, RecordState};
use eventide_core::{Conflict, Event, EventApi, EventPatch, SyncEngine};
use serde::Serialize;

use crate::error::CliError;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventListItem {
    pub id: Option<String>,
    pub local_id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub venue: Option<String>,
    pub starts_at: i64,
    pub starts_at_iso: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ends_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capacity: Option<u32>,
    pub version: i64,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub relative_time: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueListItem {
    pub id: String,
    pub entity_id: String,
    pub local_id: String,
    pub operation: String,
    pub retry_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_retry_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub queued_at_iso: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictListItem {
    pub id: String,
    pub entity_id: String,
    pub local_id: String,
    pub local_title: String,
    pub local_version: i64,
    pub server_title: String,
    pub server_version: i64,
    pub detected_at_iso: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
}

/// Look an event up by local or server id, failing when it is unknown
pub async fn find_event<A: EventApi>(
    engine: &SyncEngine<A>,
    id: &str,
) -> Result<Event, CliError> {
    let id = normalize_event_identifier(id)?;
    engine
        .events()
        .get(&id)
        .await?
        .ok_or(CliError::EventNotFound(id))
}

pub fn normalize_event_identifier(id: &str) -> Result<String, CliError> {
    let trimmed = id.trim();
    if trimmed.is_empty() {
        Err(CliError::EmptyEventId)
    } else {
        Ok(trimmed.to_string())
    }
}

pub fn normalize_title(parts: &[String]) -> Result<String, CliError> {
    let collapsed = parts
        .join(" ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    if collapsed.is_empty() {
        Err(CliError::EmptyTitle)
    } else {
        Ok(collapsed)
    }
}

/// Parse RFC 3339, `YYYY-MM-DD HH:MM`, `YYYY-MM-DD` (UTC) or Unix milliseconds
pub fn parse_timestamp(value: &str) -> Result<i64, CliError> {
    let value = value.trim();
    if let Ok(ms) = value.parse::<i64>() {
        return Ok(ms);
    }
    if let Ok(date_time) = DateTime::parse_from_rfc3339(value) {
        return Ok(date_time.timestamp_millis());
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M") {
        return Ok(naive.and_utc().timestamp_millis());
    }
    if let Some(midnight) = NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
    {
        return Ok(midnight.and_utc().timestamp_millis());
    }
    Err(CliError::InvalidTimestamp(value.to_string()))
}

pub fn parse_optional_timestamp(value: Option<&str>) -> Result<Option<i64>, CliError> {
    value.map(parse_timestamp).transpose()
}

/// Build a patch from edit flags, rejecting a patch that changes nothing
pub fn build_patch(
    title: Option<String>,
    starts_at: Option<&str>,
    ends_at: Option<&str>,
    venue: Option<String>,
    description: Option<String>,
    capacity: Option<u32>,
) -> Result<EventPatch, CliError> {
    let title = match title {
        Some(title) => Some(normalize_title(&[title])?),
        None => None,
    };
    let patch = EventPatch {
        title,
        description,
        venue,
        starts_at: parse_optional_timestamp(starts_at)?,
        ends_at: parse_optional_timestamp(ends_at)?,
        capacity,
    };
    if patch.is_empty() {
        return Err(CliError::EmptyEdit);
    }
    Ok(patch)
}

pub fn display_id(event: &Event) -> &str {
    event.id.as_deref().unwrap_or(&event.local_id)
}

pub fn short_id(id: &str) -> String {
    id.chars().take(13).collect()
}

pub fn format_event_lines(events: &[Event]) -> Vec<String> {
    let now_ms = Utc::now().timestamp_millis();
    events
        .iter()
        .map(|event| {
            let id = short_id(display_id(event));
            let status = event.status().to_string();
            let starts = format_timestamp(event.fields.starts_at);
            let title = title_preview(&event.fields.title, 40);
            let relative_time = format_relative_time(event.last_modified, now_ms);
            format!("{id:<13}  {status:<8}  {starts}  {title:<40}  {relative_time}")
        })
        .collect()
}

pub fn format_event_details(event: &Event) -> Vec<String> {
    let mut lines = vec![
        format!("Title:       {}", event.fields.title),
        format!("Local ID:    {}", event.local_id),
        format!(
            "Server ID:   {}",
            event.id.as_deref().unwrap_or("(not synced yet)")
        ),
        format!("Starts:      {}", format_timestamp(event.fields.starts_at)),
    ];
    if let Some(ends_at) = event.fields.ends_at {
        lines.push(format!("Ends:        {}", format_timestamp(ends_at)));
    }
    if let Some(venue) = &event.fields.venue {
        lines.push(format!("Venue:       {venue}"));
    }
    if let Some(capacity) = event.fields.capacity {
        lines.push(format!("Capacity:    {capacity}"));
    }
    if let Some(description) = &event.fields.description {
        lines.push(format!("Description: {description}"));
    }
    lines.push(format!("Version:     {}", event.version));
    lines.push(format!("Status:      {}", describe_state(&event.state)));
    lines
}

pub fn describe_state(state: &RecordState) -> String {
    match state {
        RecordState::Synced => "synced".to_string(),
        RecordState::Pending {
            operation,
            retry_count,
            last_error,
        } => match last_error {
            Some(error) => format!("pending {operation} (retry {retry_count}: {error})"),
            None => format!("pending {operation}"),
        },
        RecordState::Syncing { operation, .. } => format!("syncing {operation}"),
        RecordState::Failed {
            operation,
            last_error,
            ..
        } => format!("failed {operation}: {last_error}"),
        RecordState::Conflict { operation } => format!("conflict on {operation}"),
    }
}

pub fn event_to_list_item(event: &Event) -> EventListItem {
    let now_ms = Utc::now().timestamp_millis();
    EventListItem {
        id: event.id.clone(),
        local_id: event.local_id.clone(),
        title: event.fields.title.clone(),
        venue: event.fields.venue.clone(),
        starts_at: event.fields.starts_at,
        starts_at_iso: format_timestamp(event.fields.starts_at),
        ends_at: event.fields.ends_at,
        capacity: event.fields.capacity,
        version: event.version,
        status: event.status().to_string(),
        last_error: event.state.last_error().map(str::to_string),
        relative_time: format_relative_time(event.last_modified, now_ms),
    }
}

pub fn queue_item_to_list_item(item: &MutationItem) -> QueueListItem {
    QueueListItem {
        id: item.id.clone(),
        entity_id: item.entity_id.clone(),
        local_id: item.local_id.clone(),
        operation: item.operation.to_string(),
        retry_count: item.retry_count,
        next_retry_at: item.next_retry_at,
        error: item.error.clone(),
        queued_at_iso: format_timestamp(item.timestamp),
    }
}

pub fn format_queue_lines(items: &[MutationItem], max_retries: u32) -> Vec<String> {
    items
        .iter()
        .map(|item| {
            let retries = if item.is_exhausted(max_retries) {
                "exhausted".to_string()
            } else {
                format!("retry {}/{max_retries}", item.retry_count)
            };
            let line = format!(
                "{}  {:<6}  {:<13}  {retries}",
                item.id,
                item.operation.as_str(),
                short_id(&item.entity_id)
            );
            match &item.error {
                Some(error) => format!("{line}  ({error})"),
                None => line,
            }
        })
        .collect()
}

pub fn conflict_to_list_item(conflict: &Conflict) -> ConflictListItem {
    ConflictListItem {
        id: conflict.id.clone(),
        entity_id: conflict.entity_id.clone(),
        local_id: conflict.local_id.clone(),
        local_title: conflict.local_data.title.clone(),
        local_version: conflict.local_version,
        server_title: conflict.server_data.fields.title.clone(),
        server_version: conflict.server_data.version,
        detected_at_iso: format_timestamp(conflict.detected_at),
        resolution: conflict.resolution.map(|resolution| resolution.to_string()),
    }
}

pub fn format_conflict_lines(conflicts: &[Conflict]) -> Vec<String> {
    conflicts
        .iter()
        .map(|conflict| {
            let resolution = conflict
                .resolution
                .map_or_else(|| "open".to_string(), |resolution| resolution.to_string());
            format!(
                "{}  {}  {:<6}  event={}  local=v{} \"{}\"  server=v{} \"{}\"",
                conflict.id,
                format_timestamp(conflict.detected_at),
                resolution,
                conflict.entity_id,
                conflict.local_version,
                title_preview(&conflict.local_data.title, 30),
                conflict.server_data.version,
                title_preview(&conflict.server_data.fields.title, 30),
            )
        })
        .collect()
}

pub fn title_preview(title: &str, max_chars: usize) -> String {
    if title.chars().count() <= max_chars {
        title.to_string()
    } else {
        let take_len = max_chars.saturating_sub(3);
        let mut truncated = title.chars().take(take_len).collect::<String>();
        truncated.push_str("...");
        truncated
    }
}

pub fn format_timestamp(timestamp_ms: i64) -> String {
    DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M UTC").to_string(),
    )
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;
    let month = 30 * day;
    let year = 365 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else if diff < month {
        format!("{}w ago", diff / week)
    } else if diff < year {
        format!("{}mo ago", diff / month)
    } else {
        format!("{}y ago", diff / year)
    }
}
