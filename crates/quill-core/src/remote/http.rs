//! HTTP client for the `/v1` JSON API

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::{RemoteError, RemoteResult, RemoteStore};
use crate::auth::SharedIdentity;
use crate::config::ConfigError;
use crate::error::Result;
use crate::models::{
    ChangeSet, CreateLabelRequest, CreateNoteRequest, CursorResponse, LabelId, LabelRecord, NoteId,
    NoteRecord, OwnerId, SyncScope, UpdateLabelRequest, UpdateNoteRequest,
};
use crate::util::{compact_text, is_http_url, normalize_text_option};

/// Remote store reached over HTTP with bearer authentication
#[derive(Clone)]
pub struct HttpRemote {
    base_url: String,
    identity: SharedIdentity,
    client: reqwest::Client,
}

impl HttpRemote {
    /// Build a client for `base_url`; every request is bounded by `timeout`
    pub fn new(
        base_url: impl Into<String>,
        identity: SharedIdentity,
        timeout: Duration,
    ) -> Result<Self> {
        let base_url = normalize_base_url(base_url.into())?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| ConfigError::Invalid(format!("HTTP client: {error}")))?;
        Ok(Self {
            base_url,
            identity,
            client,
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, owner: &OwnerId, method: Method, path: &str) -> RemoteResult<RequestBuilder> {
        if self.identity.owner() != *owner {
            return Err(RemoteError::Rejected(format!(
                "credentials do not belong to {owner}"
            )));
        }
        Ok(self
            .client
            .request(method, format!("{}{path}", self.base_url))
            .bearer_auth(self.identity.bearer())
            .header("Accept", "application/json"))
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> RemoteResult<T> {
        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify(status, parse_api_error(status, &body)));
        }
        response.json::<T>().await.map_err(transport_error)
    }

    async fn send_empty(&self, request: RequestBuilder) -> RemoteResult<()> {
        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify(status, parse_api_error(status, &body)));
        }
        Ok(())
    }

    /// Liveness probe; no credentials required
    pub async fn health(&self) -> RemoteResult<()> {
        let request = self
            .client
            .get(format!("{}/healthz", self.base_url))
            .header("Accept", "application/json");
        self.send_empty(request).await
    }
}

#[async_trait]
impl RemoteStore for HttpRemote {
    async fn create_note(
        &self,
        owner: &OwnerId,
        request: &CreateNoteRequest,
    ) -> RemoteResult<NoteRecord> {
        let builder = self.request(owner, Method::POST, "/v1/notes")?.json(request);
        self.send(builder).await
    }

    async fn update_note(
        &self,
        owner: &OwnerId,
        id: &NoteId,
        request: &UpdateNoteRequest,
    ) -> RemoteResult<NoteRecord> {
        let builder = self
            .request(owner, Method::PUT, &format!("/v1/notes/{id}"))?
            .json(request);
        self.send(builder).await
    }

    async fn delete_note(&self, owner: &OwnerId, id: &NoteId) -> RemoteResult<NoteRecord> {
        let builder = self.request(owner, Method::DELETE, &format!("/v1/notes/{id}"))?;
        self.send(builder).await
    }

    async fn get_note(&self, owner: &OwnerId, id: &NoteId) -> RemoteResult<NoteRecord> {
        let builder = self.request(owner, Method::GET, &format!("/v1/notes/{id}"))?;
        self.send(builder).await
    }

    async fn list_notes(
        &self,
        owner: &OwnerId,
        include_deleted: bool,
    ) -> RemoteResult<Vec<NoteRecord>> {
        let builder = self
            .request(owner, Method::GET, "/v1/notes")?
            .query(&[("include_deleted", include_deleted)]);
        self.send(builder).await
    }

    async fn create_label(
        &self,
        owner: &OwnerId,
        request: &CreateLabelRequest,
    ) -> RemoteResult<LabelRecord> {
        let builder = self.request(owner, Method::POST, "/v1/labels")?.json(request);
        self.send(builder).await
    }

    async fn update_label(
        &self,
        owner: &OwnerId,
        id: &LabelId,
        request: &UpdateLabelRequest,
    ) -> RemoteResult<LabelRecord> {
        let builder = self
            .request(owner, Method::PUT, &format!("/v1/labels/{id}"))?
            .json(request);
        self.send(builder).await
    }

    async fn delete_label(&self, owner: &OwnerId, id: &LabelId) -> RemoteResult<LabelRecord> {
        let builder = self.request(owner, Method::DELETE, &format!("/v1/labels/{id}"))?;
        self.send(builder).await
    }

    async fn list_labels(
        &self,
        owner: &OwnerId,
        include_deleted: bool,
    ) -> RemoteResult<Vec<LabelRecord>> {
        let builder = self
            .request(owner, Method::GET, "/v1/labels")?
            .query(&[("include_deleted", include_deleted)]);
        self.send(builder).await
    }

    async fn changes_since(
        &self,
        owner: &OwnerId,
        scope: &SyncScope,
        since: i64,
    ) -> RemoteResult<ChangeSet> {
        let mut builder = self
            .request(owner, Method::GET, "/v1/sync/changes")?
            .query(&[("since", since)]);
        if let Some(label_id) = scope.label_id() {
            builder = builder.query(&[("label_id", label_id.to_string())]);
        }
        self.send(builder).await
    }

    async fn full_snapshot(&self, owner: &OwnerId, scope: &SyncScope) -> RemoteResult<ChangeSet> {
        let mut builder = self.request(owner, Method::GET, "/v1/sync/snapshot")?;
        if let Some(label_id) = scope.label_id() {
            builder = builder.query(&[("label_id", label_id.to_string())]);
        }
        self.send(builder).await
    }

    async fn current_cursor(&self, owner: &OwnerId, scope: &SyncScope) -> RemoteResult<i64> {
        let mut builder = self.request(owner, Method::GET, "/v1/sync/cursor")?;
        if let Some(label_id) = scope.label_id() {
            builder = builder.query(&[("label_id", label_id.to_string())]);
        }
        let response: CursorResponse = self.send(builder).await?;
        Ok(response.cursor)
    }
}

/// Map a non-success status to the remote error taxonomy
fn classify(status: StatusCode, message: String) -> RemoteError {
    match status {
        StatusCode::BAD_REQUEST | StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY => {
            RemoteError::Rejected(message)
        }
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RemoteError::Unauthenticated(message),
        StatusCode::NOT_FOUND => RemoteError::NotFound(message),
        _ => RemoteError::Transient(message),
    }
}

/// Connect failures, timeouts and undecodable bodies are all retried
fn transport_error(error: reqwest::Error) -> RemoteError {
    if error.is_timeout() {
        RemoteError::Transient(format!("request timed out: {error}"))
    } else if error.is_connect() {
        RemoteError::Transient(format!("connection failed: {error}"))
    } else {
        RemoteError::Transient(error.to_string())
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
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

fn normalize_base_url(raw: String) -> Result<String> {
    let base_url = normalize_text_option(Some(raw))
        .ok_or_else(|| ConfigError::Invalid("API URL must not be empty".to_string()))?;
    if is_http_url(&base_url) {
        Ok(base_url.trim_end_matches('/').to_string())
    } else {
        Err(ConfigError::Invalid("API URL must include http:// or https://".to_string()).into())
    }
}
