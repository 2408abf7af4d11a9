//! In-memory session backend.

use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock},
};

use agent_chat_core::{
    ApiError, ChunkStream, CreateSessionRequest, Event, EventLog, EventPatch, EventSource,
    SessionApi, SessionId, StreamChunk, StreamTransport,
};
use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::Semaphore;
use uuid::Uuid;

/// A request observed by the in-memory backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    CreateSession(CreateSessionRequest),
    ListEvents(SessionId),
    OpenStream { session_id: SessionId, text: String },
}

/// In-memory backend implementation.
///
/// Useful for tests and offline development. Replies echo the user's text.
/// Data is lost on drop.
pub struct MemoryBackend {
    sessions: RwLock<HashMap<SessionId, Vec<Event>>>,
    calls: RwLock<Vec<BackendCall>>,
    gates: RwLock<HashMap<SessionId, Arc<Semaphore>>>,
    create_gate: RwLock<Option<Arc<Semaphore>>>,
    create_failure: RwLock<Option<u16>>,
    omit_ids: RwLock<bool>,
    hold_streams: RwLock<bool>,
}

impl MemoryBackend {
    /// Create an empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            calls: RwLock::new(Vec::new()),
            gates: RwLock::new(HashMap::new()),
            create_gate: RwLock::new(None),
            create_failure: RwLock::new(None),
            omit_ids: RwLock::new(false),
            hold_streams: RwLock::new(false),
        }
    }

    /// Seed a session with history.
    pub fn insert_session(&self, id: SessionId, events: Vec<Event>) {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, events);
    }

    /// Every request seen so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<BackendCall> {
        self.calls
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Answer session creation with this status until cleared.
    pub fn fail_create_with(&self, status: Option<u16>) {
        *self
            .create_failure
            .write()
            .unwrap_or_else(PoisonError::into_inner) = status;
    }

    /// Answer session creation with success but no usable identifier.
    pub fn omit_session_ids(&self, omit: bool) {
        *self.omit_ids.write().unwrap_or_else(PoisonError::into_inner) = omit;
    }

    /// Keep live streams open after the reply until the consumer stops.
    pub fn hold_streams(&self, hold: bool) {
        *self
            .hold_streams
            .write()
            .unwrap_or_else(PoisonError::into_inner) = hold;
    }

    /// Hold event fetches for a session until the returned gate is opened.
    ///
    /// Each `add_permits(1)` on the gate releases one pending fetch.
    pub fn gate_events(&self, id: &SessionId) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        self.gates
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.clone(), Arc::clone(&gate));
        gate
    }

    /// Hold session creation until the returned gate is opened.
    pub fn gate_create(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self
            .create_gate
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&gate));
        gate
    }

    fn record(&self, call: BackendCall) {
        self.calls
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);
    }

    fn gate(&self, id: &SessionId) -> Option<Arc<Semaphore>> {
        self.gates
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionApi for MemoryBackend {
    async fn create_session(
        &self,
        request: &CreateSessionRequest,
    ) -> Result<Option<SessionId>, ApiError> {
        self.record(BackendCall::CreateSession(request.clone()));

        let gate = self
            .create_gate
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(gate) = gate {
            gate.acquire()
                .await
                .map_err(|e| ApiError::Transport(e.to_string()))?
                .forget();
        }

        if let Some(status) = *self
            .create_failure
            .read()
            .unwrap_or_else(PoisonError::into_inner)
        {
            return Err(ApiError::Status(status));
        }
        if *self.omit_ids.read().unwrap_or_else(PoisonError::into_inner) {
            return Ok(None);
        }

        let id = SessionId::parse(&Uuid::new_v4().to_string());
        if let Some(id) = &id {
            self.insert_session(id.clone(), Vec::new());
        }
        Ok(id)
    }

    async fn list_events(&self, session_id: &SessionId) -> Result<EventLog, ApiError> {
        self.record(BackendCall::ListEvents(session_id.clone()));

        if let Some(gate) = self.gate(session_id) {
            gate.acquire()
                .await
                .map_err(|e| ApiError::Transport(e.to_string()))?
                .forget();
        }

        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(session_id)
            .cloned()
            .map(EventLog::new)
            .ok_or(ApiError::Status(404))
    }
}

#[async_trait]
impl StreamTransport for MemoryBackend {
    async fn open(&self, session_id: &SessionId, text: &str) -> Result<ChunkStream, ApiError> {
        self.record(BackendCall::OpenStream {
            session_id: session_id.clone(),
            text: text.to_owned(),
        });

        let turn = Uuid::new_v4();
        let user = Event::message(format!("{turn}-user"), EventSource::User, text);
        let reply = Event::message(
            format!("{turn}-agent"),
            EventSource::AiAgent,
            format!("echo: {text}"),
        );

        {
            let mut sessions = self
                .sessions
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            let log = sessions.get_mut(session_id).ok_or(ApiError::Status(404))?;
            log.push(user.clone());
            log.push(reply.clone());
        }

        let patch: EventPatch = serde_json::from_value(serde_json::json!({
            "event_id": reply.id,
            "source": "ai_agent",
            "kind": "message",
            "patches": [{ "op": "add", "path": "/content", "value": reply.data["content"] }],
        }))
        .map_err(|e| ApiError::Decode(e.to_string()))?;

        let chunks = vec![
            Ok(StreamChunk::Event(user)),
            Ok(StreamChunk::Status {
                status: "processing".to_owned(),
                detail: None,
            }),
            Ok(StreamChunk::Patch(patch)),
            Ok(StreamChunk::Status {
                status: "ready".to_owned(),
                detail: None,
            }),
        ];

        let hold = *self.hold_streams.read().unwrap_or_else(PoisonError::into_inner);
        let replay = futures::stream::iter(chunks);
        if hold {
            Ok(replay.chain(futures::stream::pending()).boxed())
        } else {
            Ok(replay
                .chain(futures::stream::once(async { Ok(StreamChunk::Done) }))
                .boxed())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_created_sessions_start_empty() {
        let backend = MemoryBackend::new();
        let request = CreateSessionRequest {
            agent_id: agent_chat_core::AgentId::parse("agent").unwrap(),
            title: "t".to_string(),
        };

        let id = backend.create_session(&request).await.unwrap().unwrap();
        assert!(backend.list_events(&id).await.unwrap().is_empty());
        assert_eq!(
            backend.calls(),
            vec![
                BackendCall::CreateSession(request),
                BackendCall::ListEvents(id),
            ]
        );
    }

    #[tokio::test]
    async fn test_unknown_session_is_not_found() {
        let backend = MemoryBackend::new();
        let err = backend
            .list_events(&SessionId::parse("missing").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Status(404)));
    }

    #[tokio::test]
    async fn test_stream_echoes_and_persists_turn() {
        let backend = MemoryBackend::new();
        let id = SessionId::parse("s1").unwrap();
        backend.insert_session(id.clone(), Vec::new());

        let chunks: Vec<_> = backend.open(&id, "ping").await.unwrap().collect().await;

        assert_eq!(chunks.len(), 5);
        assert!(matches!(chunks.last(), Some(Ok(StreamChunk::Done))));
        let log = backend.list_events(&id).await.unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log.as_slice()[1].data["content"], "echo: ping");
    }
}
