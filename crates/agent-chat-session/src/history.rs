//! Historical event loading with stale-result protection.

use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use agent_chat_core::{EventLog, SessionApi, SessionId};
use tokio::sync::mpsc;

/// Monotonic counter bumped on every session change seen by the loader.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Generation(u64);

impl Generation {
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A fetched log that was current when it settled.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryUpdate {
    pub generation: Generation,
    pub session: SessionId,
    pub events: EventLog,
}

#[derive(Default)]
struct LoaderState {
    generation: Generation,
    session: Option<SessionId>,
    events: EventLog,
    loading: bool,
}

/// Loads the persisted log of the active session.
pub struct HistoryLoader<A: ?Sized> {
    api: Arc<A>,
    state: Arc<Mutex<LoaderState>>,
    updates: mpsc::UnboundedSender<HistoryUpdate>,
}

impl<A> HistoryLoader<A>
where
    A: SessionApi + ?Sized + 'static,
{
    /// Create a loader and the receiver its applied results are published on.
    #[must_use]
    pub fn new(api: Arc<A>) -> (Self, mpsc::UnboundedReceiver<HistoryUpdate>) {
        let (updates, rx) = mpsc::unbounded_channel();
        let loader = Self {
            api,
            state: Arc::new(Mutex::new(LoaderState::default())),
            updates,
        };
        (loader, rx)
    }

    fn lock(&self) -> MutexGuard<'_, LoaderState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fetch a session's log once.
    ///
    /// Failures are logged and settle as an empty log.
    pub async fn fetch(&self, session: &SessionId) -> EventLog {
        fetch_events(self.api.as_ref(), session).await
    }

    /// Switch to `session` and fetch its log in the background.
    ///
    /// The current log is cleared right away. A fetch that settles after a
    /// newer `load` or `adopt` is discarded. No request is made for `None`.
    pub fn load(&self, session: Option<SessionId>) -> Generation {
        let generation = {
            let mut state = self.lock();
            state.generation = state.generation.next();
            state.session.clone_from(&session);
            state.events = EventLog::default();
            state.loading = session.is_some();
            state.generation
        };

        let Some(session) = session else {
            tracing::debug!(%generation, "Cleared history");
            return generation;
        };

        tracing::debug!(%generation, session = %session, "Loading history");
        let api = Arc::clone(&self.api);
        let state = Arc::clone(&self.state);
        let updates = self.updates.clone();
        tokio::spawn(async move {
            let events = fetch_events(api.as_ref(), &session).await;
            {
                let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
                if state.generation != generation {
                    tracing::debug!(
                        %generation,
                        current = %state.generation,
                        session = %session,
                        "Discarding stale history"
                    );
                    return;
                }
                state.events = events.clone();
                state.loading = false;
            }
            let _ = updates.send(HistoryUpdate {
                generation,
                session,
                events,
            });
        });

        generation
    }

    /// Bind a session whose log is already known, without a request.
    pub fn adopt(&self, session: SessionId, events: EventLog) -> Generation {
        let mut state = self.lock();
        state.generation = state.generation.next();
        state.session = Some(session);
        state.events = events;
        state.loading = false;
        state.generation
    }

    #[must_use]
    pub fn events(&self) -> EventLog {
        self.lock().events.clone()
    }

    /// True while the fetch for the current session is in flight.
    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.lock().loading
    }

    #[must_use]
    pub fn session(&self) -> Option<SessionId> {
        self.lock().session.clone()
    }

    #[must_use]
    pub fn generation(&self) -> Generation {
        self.lock().generation
    }

    #[must_use]
    pub fn is_current(&self, generation: Generation) -> bool {
        self.lock().generation == generation
    }
}

async fn fetch_events<A>(api: &A, session: &SessionId) -> EventLog
where
    A: SessionApi + ?Sized,
{
    match api.list_events(session).await {
        Ok(events) => {
            tracing::debug!(session = %session, count = events.len(), "Fetched history");
            events
        }
        Err(e) => {
            tracing::error!(session = %session, "Failed to fetch history: {e}");
            EventLog::default()
        }
    }
}
