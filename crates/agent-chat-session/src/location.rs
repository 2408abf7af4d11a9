//! Location binding: session identity from the current path, and back/forward.

use std::sync::{Arc, Mutex, PoisonError};

use agent_chat_core::{Location, SessionId};
use futures::{StreamExt, stream::BoxStream};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::route::{ROOT_PATH, derive_session_id, path_for};

/// Binds session identity to a [`Location`].
#[derive(Clone)]
pub struct LocationBinder {
    location: Arc<dyn Location>,
}

impl LocationBinder {
    #[must_use]
    pub fn new(location: Arc<dyn Location>) -> Self {
        Self { location }
    }

    /// Session identifier for the current path.
    #[must_use]
    pub fn current(&self) -> Option<SessionId> {
        derive_session_id(&self.location.pathname())
    }

    #[must_use]
    pub fn pathname(&self) -> String {
        self.location.pathname()
    }

    /// Point the location at a session, or at the root for `None`.
    pub fn bind(&self, session: Option<&SessionId>) {
        let path = path_for(session);
        tracing::debug!(path = %path, "Updating location");
        self.location.push(&path);
    }

    /// Session identifiers re-derived on every back/forward navigation.
    #[must_use]
    pub fn navigations(&self) -> BoxStream<'static, Option<SessionId>> {
        BroadcastStream::new(self.location.subscribe())
            .filter_map(|res| async move { res.ok().map(|path| derive_session_id(&path)) })
            .boxed()
    }
}

struct History {
    entries: Vec<String>,
    index: usize,
}

/// In-memory location with browser-style history.
///
/// `push` never notifies subscribers; only `back` and `forward` do.
pub struct MemoryLocation {
    history: Mutex<History>,
    sender: broadcast::Sender<String>,
}

impl MemoryLocation {
    /// Create a location starting at `path`.
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        let (sender, _) = broadcast::channel(64);
        let mut path = path.into();
        if path.is_empty() {
            path = ROOT_PATH.to_owned();
        }
        Self {
            history: Mutex::new(History {
                entries: vec![path],
                index: 0,
            }),
            sender,
        }
    }

    /// Go one entry back. Returns false at the first entry.
    pub fn back(&self) -> bool {
        self.travel(-1)
    }

    /// Go one entry forward. Returns false at the last entry.
    pub fn forward(&self) -> bool {
        self.travel(1)
    }

    /// Number of history entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, History> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn travel(&self, delta: isize) -> bool {
        let path = {
            let mut history = self.lock();
            let Some(index) = history.index.checked_add_signed(delta) else {
                return false;
            };
            if index >= history.entries.len() {
                return false;
            }
            history.index = index;
            history.entries[index].clone()
        };
        let _ = self.sender.send(path);
        true
    }
}

impl Default for MemoryLocation {
    fn default() -> Self {
        Self::new(ROOT_PATH)
    }
}

impl Location for MemoryLocation {
    fn pathname(&self) -> String {
        let history = self.lock();
        history.entries[history.index].clone()
    }

    fn push(&self, path: &str) {
        let mut history = self.lock();
        if history.entries[history.index] == path {
            return;
        }
        let next = history.index + 1;
        history.entries.truncate(next);
        history.entries.push(path.to_owned());
        history.index = next;
    }

    fn subscribe(&self) -> broadcast::Receiver<String> {
        self.sender.subscribe()
    }
}
