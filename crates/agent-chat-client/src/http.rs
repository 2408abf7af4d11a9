//! HTTP implementation of the session service and the live stream.

use std::time::Duration;

use agent_chat_core::{
    ApiError, ChatConfig, ChunkStream, CreateSessionRequest, EventLog, SessionApi, SessionId,
    StreamTransport,
};
use async_trait::async_trait;
use futures::{StreamExt, stream};
use reqwest::{Client, Response, header};
use serde_json::{Value, json};
use url::Url;

use crate::{
    error::{ClientError, api_error},
    sse::SseParser,
};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Whole-request limit for session creation and history fetches. The live
/// stream is exempt since its body stays open for the whole turn.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Session service reached over HTTP.
///
/// Routes, relative to the base URL:
/// - `POST /api/sessions`
/// - `GET /api/sessions/{id}/events`
/// - `POST /api/sessions/{id}/events/stream` (server-sent events)
#[derive(Debug, Clone)]
pub struct HttpBackend {
    http: Client,
    base_url: Url,
    request_timeout: Duration,
}

impl HttpBackend {
    /// Create a backend rooted at `base_url`.
    ///
    /// # Errors
    /// Returns error if the URL cannot carry a path or the client cannot be built.
    pub fn new(base_url: Url) -> Result<Self, ClientError> {
        if base_url.cannot_be_a_base() {
            return Err(ClientError::InvalidBaseUrl(base_url.to_string()));
        }
        let http = Client::builder().connect_timeout(CONNECT_TIMEOUT).build()?;
        Ok(Self {
            http,
            base_url,
            request_timeout: REQUEST_TIMEOUT,
        })
    }

    /// Override the limit applied to create and list requests.
    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Create a backend from client configuration.
    ///
    /// # Errors
    /// Returns error if the client cannot be built.
    pub fn from_config(config: &ChatConfig) -> Result<Self, ClientError> {
        Self::new(config.api_base_url().clone())
    }

    #[must_use]
    pub const fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Build an endpoint URL; each segment is percent-encoded on its own.
    ///
    /// # Errors
    /// Returns error if the base URL cannot carry a path.
    pub fn endpoint(&self, segments: &[&str]) -> Result<Url, ApiError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| ApiError::Endpoint(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn checked(response: Result<Response, reqwest::Error>) -> Result<Response, ApiError> {
        let response = response.map_err(|e| api_error(&e))?;
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            Err(ApiError::Status(status.as_u16()))
        }
    }
}

#[async_trait]
impl SessionApi for HttpBackend {
    async fn create_session(
        &self,
        request: &CreateSessionRequest,
    ) -> Result<Option<SessionId>, ApiError> {
        let url = self.endpoint(&["api", "sessions"])?;
        let response = Self::checked(
            self.http
                .post(url)
                .timeout(self.request_timeout)
                .json(request)
                .send()
                .await,
        )
        .await?;
        let body = response.bytes().await.map_err(|e| api_error(&e))?;

        let value: Value = serde_json::from_slice(&body).unwrap_or_else(|e| {
            tracing::warn!("Session creation returned an unparseable body: {e}");
            json!({})
        });

        let id = value.get("id").and_then(Value::as_str).and_then(SessionId::parse);
        if let Some(id) = &id {
            tracing::debug!(session = %id, "Session creation answered");
        }
        Ok(id)
    }

    async fn list_events(&self, session_id: &SessionId) -> Result<EventLog, ApiError> {
        let url = self.endpoint(&["api", "sessions", session_id.as_str(), "events"])?;
        let response =
            Self::checked(self.http.get(url).timeout(self.request_timeout).send().await).await?;
        let body = response.bytes().await.map_err(|e| api_error(&e))?;
        let value: Value =
            serde_json::from_slice(&body).map_err(|e| ApiError::Decode(e.to_string()))?;

        let events = match value.get("data") {
            Some(data @ Value::Array(_)) => serde_json::from_value(data.clone())
                .unwrap_or_else(|e| {
                    tracing::warn!(session = %session_id, "Malformed event array: {e}");
                    EventLog::default()
                }),
            _ => EventLog::default(),
        };
        tracing::debug!(session = %session_id, count = events.len(), "Fetched events");
        Ok(events)
    }
}

#[async_trait]
impl StreamTransport for HttpBackend {
    async fn open(&self, session_id: &SessionId, text: &str) -> Result<ChunkStream, ApiError> {
        let url = self.endpoint(&["api", "sessions", session_id.as_str(), "events", "stream"])?;
        let body = json!({
            "kind": "message",
            "source": "user",
            "content": text,
        });
        let response = Self::checked(
            self.http
                .post(url)
                .header(header::ACCEPT, "text/event-stream")
                .json(&body)
                .send()
                .await,
        )
        .await?;

        let mut parser = SseParser::default();
        let chunks = response
            .bytes_stream()
            .map(move |bytes| match bytes {
                Ok(bytes) => parser.feed(&bytes).into_iter().map(Ok).collect::<Vec<_>>(),
                Err(e) => vec![Err(api_error(&e))],
            })
            .flat_map(stream::iter)
            .boxed();
        Ok(chunks)
    }
}
