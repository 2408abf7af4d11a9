//! Core traits for the backend, the live stream and the location.

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;

use crate::{AgentId, Event, EventKind, EventLog, EventSource, Message, SessionId};

/// Backend API error.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Request failed with status {0}")]
    Status(u16),
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Decode error: {0}")]
    Decode(String),
    #[error("Invalid endpoint: {0}")]
    Endpoint(String),
}

/// Body of a session creation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateSessionRequest {
    pub agent_id: AgentId,
    pub title: String,
}

/// Trait for the remote session service.
#[async_trait]
pub trait SessionApi: Send + Sync {
    /// Create a session.
    ///
    /// Returns `Ok(None)` when the service answered with success but the
    /// body did not carry a usable identifier.
    async fn create_session(
        &self,
        request: &CreateSessionRequest,
    ) -> Result<Option<SessionId>, ApiError>;

    /// Fetch the persisted event log of a session.
    async fn list_events(&self, session_id: &SessionId) -> Result<EventLog, ApiError>;
}

/// Incremental update to the data of an emitted event.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EventPatch {
    pub event_id: String,
    #[serde(default)]
    pub correlation_id: Option<String>,
    #[serde(default)]
    pub source: EventSource,
    #[serde(default)]
    pub kind: EventKind,
    pub patches: json_patch::Patch,
}

/// One decoded unit of the live stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamChunk {
    /// A complete event.
    Event(Event),
    /// A delta against an emitted event.
    Patch(EventPatch),
    /// Agent status change.
    Status {
        status: String,
        detail: Option<String>,
    },
    /// Error reported by the service mid-stream.
    Error { message: String },
    /// End of the turn.
    Done,
}

/// Stream of live chunks for one turn.
pub type ChunkStream = BoxStream<'static, Result<StreamChunk, ApiError>>;

/// Trait for opening the live stream of a turn.
#[async_trait]
pub trait StreamTransport: Send + Sync {
    /// Post a user message and open the stream of resulting activity.
    async fn open(&self, session_id: &SessionId, text: &str) -> Result<ChunkStream, ApiError>;
}

/// Snapshot of the merged history + live view.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LiveView {
    pub session: Option<SessionId>,
    pub messages: Vec<Message>,
    pub streaming: bool,
    pub processing: Option<String>,
    pub error: Option<String>,
    /// Events received from the live stream since initialization.
    pub emitted_events: usize,
    /// Size of the backing history log.
    pub loaded_events: usize,
}

/// Merges a historical log with live events into one display view.
pub trait StreamCoordinator: Send + Sync {
    /// Bind to a session and replace the backing log.
    ///
    /// Binding a different session abandons any live stream and drops the
    /// events it emitted.
    fn initialize(&self, session: Option<&SessionId>, events: EventLog);

    /// Begin streaming a new turn on a session.
    fn start(&self, session: &SessionId, text: &str);

    /// Cancel the active stream. Received messages are kept.
    fn stop(&self);

    /// Drop events emitted by the live stream.
    fn reset_events(&self);

    /// Drop derived messages until the next change.
    fn reset_messages(&self);

    /// Current merged view.
    fn view(&self) -> LiveView;

    /// Notifications fired on every view change.
    fn subscribe(&self) -> broadcast::Receiver<()>;

    fn is_streaming(&self) -> bool {
        self.view().streaming
    }
}

/// Location-like interface standing in for the browser address bar.
pub trait Location: Send + Sync {
    /// Current path.
    fn pathname(&self) -> String;

    /// Record a new path without reloading.
    fn push(&self, path: &str);

    /// Paths reached through back/forward navigation.
    fn subscribe(&self) -> broadcast::Receiver<String>;
}
