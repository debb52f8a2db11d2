//! Engine configuration.
//!
//! `SyncConfig` is plain serde data so the CLI can persist it as JSON and
//! layer environment overrides on top.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::sync::RetryPolicy;
use crate::util::{is_http_url, normalize_text_option};

const DEFAULT_SYNC_INTERVAL_SECS: u64 = 30;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
const DEFAULT_PAGE_SIZE: u32 = 20;

/// Settings shared by the repository, queue and coordinator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Base URL of the remote event API
    pub api_base_url: String,
    /// Bearer token forwarded to the API, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
    #[serde(with = "duration_ms")]
    pub request_timeout: Duration,
    /// Periodic drain interval; `None` disables automatic sync
    #[serde(with = "optional_duration_ms")]
    pub sync_interval: Option<Duration>,
    /// Default page size for list calls
    pub page_size: u32,
    pub retry: RetryPolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:3000".to_string(),
            auth_token: None,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            sync_interval: Some(Duration::from_secs(DEFAULT_SYNC_INTERVAL_SECS)),
            page_size: DEFAULT_PAGE_SIZE,
            retry: RetryPolicy::default(),
        }
    }
}

impl SyncConfig {
    #[must_use]
    pub fn with_api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into();
        self
    }

    #[must_use]
    pub fn with_auth_token(mut self, token: Option<String>) -> Self {
        self.auth_token = normalize_text_option(token);
        self
    }

    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = Some(interval);
        self
    }

    #[must_use]
    pub const fn without_auto_sync(mut self) -> Self {
        self.sync_interval = None;
        self
    }

    #[must_use]
    pub const fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    #[must_use]
    pub const fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Check values that would otherwise fail late
    pub fn validate(&self) -> Result<(), String> {
        if !is_http_url(self.api_base_url.trim()) {
            return Err(format!(
                "api_base_url must include http:// or https:// (got '{}')",
                self.api_base_url
            ));
        }
        if self.page_size == 0 {
            return Err("page_size must be at least 1".to_string());
        }
        if self.sync_interval.is_some_and(|interval| interval.is_zero()) {
            return Err("sync_interval must be greater than zero".to_string());
        }
        if self.retry.max_retries == 0 {
            return Err("retry.max_retries must be at least 1".to_string());
        }
        Ok(())
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

mod optional_duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    #[allow(clippy::ref_option)] // signature fixed by serde(with)
    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(value) => {
                serializer.serialize_some(&u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
            }
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(deserializer).map(|value| value.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn default_config_syncs_every_thirty_seconds() {
        let config = SyncConfig::default();
        assert_eq!(config.sync_interval, Some(Duration::from_secs(30)));
        assert_eq!(config.retry.max_retries, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn builder_overrides_fields() {
        let config = SyncConfig::default()
            .with_api_base_url("https://events.example.com")
            .with_auth_token(Some("  ".to_string()))
            .with_page_size(50)
            .without_auto_sync();
        assert_eq!(config.api_base_url, "https://events.example.com");
        assert_eq!(config.auth_token, None);
        assert_eq!(config.page_size, 50);
        assert_eq!(config.sync_interval, None);
    }

    #[test]
    fn validate_rejects_bad_values() {
        assert!(SyncConfig::default()
            .with_api_base_url("events.example.com")
            .validate()
            .is_err());
        assert!(SyncConfig::default().with_page_size(0).validate().is_err());
        assert!(SyncConfig::default()
            .with_sync_interval(Duration::ZERO)
            .validate()
            .is_err());
    }

    #[test]
    fn json_uses_millisecond_durations() {
        let config = SyncConfig::default().with_sync_interval(Duration::from_secs(5));
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["sync_interval"], 5_000);
        assert_eq!(json["request_timeout"], 10_000);

        let parsed: SyncConfig =
            serde_json::from_str(r#"{"api_base_url":"https://x.test","sync_interval":null}"#)
                .unwrap();
        assert_eq!(parsed.sync_interval, None);
        assert_eq!(parsed.page_size, 20);
    }
}
