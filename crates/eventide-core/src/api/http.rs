//! HTTP client for the remote event API.

use std::time::Duration;

use reqwest::{RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};

use super::{ApiError, ApiResult, EventApi, EventPage};
use crate::config::SyncConfig;
use crate::models::{EventFields, EventPatch, RemoteEvent};
use crate::util::{compact_text, is_http_url, normalize_text_option};

/// reqwest-backed [`EventApi`]
#[derive(Clone)]
pub struct HttpEventApi {
    base_url: String,
    auth_token: Option<String>,
    client: reqwest::Client,
}

impl std::fmt::Debug for HttpEventApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpEventApi")
            .field("base_url", &self.base_url)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "[REDACTED]"))
            .finish_non_exhaustive()
    }
}

impl HttpEventApi {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> ApiResult<Self> {
        let base_url = normalize_base_url(base_url.into())?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::Network(e.to_string()))?;
        Ok(Self {
            base_url,
            auth_token: None,
            client,
        })
    }

    /// Build a client from the sync configuration
    pub fn from_config(config: &SyncConfig) -> ApiResult<Self> {
        Ok(Self::new(config.api_base_url.clone(), config.request_timeout)?
            .with_auth_token(config.auth_token.clone()))
    }

    /// Send `Authorization: Bearer <token>` on every request
    #[must_use]
    pub fn with_auth_token(mut self, token: Option<String>) -> Self {
        self.auth_token = normalize_text_option(token);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn events_url(&self) -> String {
        format!("{}/events", self.base_url)
    }

    fn event_url(&self, id: &str) -> String {
        format!("{}/events/{}", self.base_url, urlencoding::encode(id))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let request = request.header("Accept", "application/json");
        match &self.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder, id: Option<&str>) -> ApiResult<Response> {
        let response = self.authorize(request).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(map_error_response(status, &body, id))
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UpdateBody<'a> {
    data: &'a EventPatch,
    original_version: i64,
}

impl EventApi for HttpEventApi {
    async fn list(&self, page: u32, limit: u32) -> ApiResult<EventPage> {
        let request = self
            .client
            .get(self.events_url())
            .query(&[("page", page), ("limit", limit)]);
        let response = self.send(request, None).await?;
        let mut body = response.json::<EventPage>().await?;
        if body.page == 0 {
            body.page = page;
        }
        if body.limit == 0 {
            body.limit = limit;
        }
        Ok(body)
    }

    async fn get(&self, id: &str) -> ApiResult<RemoteEvent> {
        let request = self.client.get(self.event_url(id));
        let response = self.send(request, Some(id)).await?;
        Ok(response.json().await?)
    }

    async fn create(&self, data: &EventFields) -> ApiResult<RemoteEvent> {
        let request = self.client.post(self.events_url()).json(data);
        let response = self.send(request, None).await?;
        Ok(response.json().await?)
    }

    async fn update(
        &self,
        id: &str,
        data: &EventPatch,
        original_version: i64,
    ) -> ApiResult<RemoteEvent> {
        let request = self.client.patch(self.event_url(id)).json(&UpdateBody {
            data,
            original_version,
        });
        let response = self.send(request, Some(id)).await?;
        Ok(response.json().await?)
    }

    async fn delete(&self, id: &str) -> ApiResult<()> {
        let request = self.client.delete(self.event_url(id));
        self.send(request, Some(id)).await?;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
}

/// Conflict responses either carry the record directly or wrap it
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ConflictBody {
    Wrapped {
        #[serde(alias = "current", alias = "serverData")]
        data: RemoteEvent,
    },
    Bare(RemoteEvent),
}

fn map_error_response(status: StatusCode, body: &str, id: Option<&str>) -> ApiError {
    match status {
        StatusCode::CONFLICT => {
            let current = serde_json::from_str::<ConflictBody>(body)
                .ok()
                .map(|body| match body {
                    ConflictBody::Wrapped { data } | ConflictBody::Bare(data) => Box::new(data),
                });
            ApiError::Conflict { current }
        }
        StatusCode::NOT_FOUND => ApiError::NotFound(id.unwrap_or("resource").to_string()),
        _ => ApiError::Status {
            status: status.as_u16(),
            message: parse_api_error(status, body),
        },
    }
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed = compact_text(body);
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", trimmed, status.as_u16())
    }
}

fn normalize_base_url(raw: String) -> ApiResult<String> {
    let base_url = normalize_text_option(Some(raw))
        .ok_or_else(|| ApiError::Network("API base URL must not be empty".to_string()))?;
    if is_http_url(&base_url) {
        Ok(base_url.trim_end_matches('/').to_string())
    } else {
        Err(ApiError::Network(
            "API base URL must include http:// or https://".to_string(),
        ))
    }
}
