//! Conversation controller: keeps location, history and the live view bound
//! to one session.

use std::sync::Arc;

use agent_chat_core::{
    ChatConfig, EventLog, LiveView, Location, SessionApi, SessionId, StreamCoordinator,
};
use futures::stream::BoxStream;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::{
    history::{HistoryLoader, HistoryUpdate},
    location::LocationBinder,
    provisioner::{ProvisionError, SessionProvisioner},
};

/// Errors surfaced to the caller of `send` / `submit`.
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error(transparent)]
    Provision(#[from] ProvisionError),
}

/// Which session, if any, the conversation is bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversationState {
    NoSession,
    SessionActive(SessionId),
}

/// Orchestrates provisioning, history loading and streaming.
pub struct ConversationController<A: ?Sized, C: ?Sized> {
    binder: LocationBinder,
    provisioner: SessionProvisioner<A>,
    history: HistoryLoader<A>,
    stream: Arc<C>,
    session: Option<SessionId>,
    input: String,
}

impl<A, C> ConversationController<A, C>
where
    A: SessionApi + ?Sized + 'static,
    C: StreamCoordinator + ?Sized,
{
    /// Bind to the session named by the current location and start loading
    /// its history.
    ///
    /// Applied history results arrive on the returned receiver and must be
    /// passed to [`Self::on_history`].
    pub fn new(
        config: &ChatConfig,
        api: Arc<A>,
        location: Arc<dyn Location>,
        stream: Arc<C>,
    ) -> (Self, mpsc::UnboundedReceiver<HistoryUpdate>) {
        let binder = LocationBinder::new(location);
        let provisioner = SessionProvisioner::new(config, Arc::clone(&api));
        let (history, updates) = HistoryLoader::new(api);
        let session = binder.current();

        tracing::info!(
            path = %binder.pathname(),
            session = ?session.as_ref().map(SessionId::as_str),
            "Starting conversation"
        );
        stream.initialize(session.as_ref(), EventLog::default());
        history.load(session.clone());

        let controller = Self {
            binder,
            provisioner,
            history,
            stream,
            session,
            input: String::new(),
        };
        (controller, updates)
    }

    #[must_use]
    pub fn state(&self) -> ConversationState {
        self.session
            .clone()
            .map_or(ConversationState::NoSession, ConversationState::SessionActive)
    }

    #[must_use]
    pub const fn session(&self) -> Option<&SessionId> {
        self.session.as_ref()
    }

    #[must_use]
    pub const fn history(&self) -> &HistoryLoader<A> {
        &self.history
    }

    #[must_use]
    pub const fn location(&self) -> &LocationBinder {
        &self.binder
    }

    #[must_use]
    pub fn view(&self) -> LiveView {
        self.stream.view()
    }

    /// Session identifiers reached by back/forward navigation.
    #[must_use]
    pub fn navigations(&self) -> BoxStream<'static, Option<SessionId>> {
        self.binder.navigations()
    }

    #[must_use]
    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn set_input(&mut self, input: impl Into<String>) {
        self.input = input.into();
    }

    pub fn push_char(&mut self, c: char) {
        self.input.push(c);
    }

    pub fn pop_char(&mut self) {
        self.input.pop();
    }

    /// Send the pending input.
    ///
    /// The input is always cleared first and is not restored on failure.
    /// Blank input is then dropped without any other effect.
    ///
    /// # Errors
    ///
    /// See [`Self::send`].
    pub async fn submit(&mut self) -> Result<(), ControllerError> {
        let text = std::mem::take(&mut self.input);
        self.send(&text).await
    }

    /// Send a message, creating a session first when none is active.
    ///
    /// Blank text is ignored.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::Provision`] when a session was needed and
    /// could not be created; the conversation stays without a session.
    pub async fn send(&mut self, text: &str) -> Result<(), ControllerError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(());
        }

        let session = match &self.session {
            Some(session) => session.clone(),
            None => {
                let session = self.provisioner.create_session().await?;
                self.binder.bind(Some(&session));
                self.session = Some(session.clone());
                self.history.adopt(session.clone(), EventLog::default());
                self.stream.initialize(Some(&session), EventLog::default());
                session
            }
        };

        self.stream.start(&session, text);
        Ok(())
    }

    /// React to a back/forward navigation.
    pub fn on_navigate(&mut self, session: Option<SessionId>) {
        if session == self.session {
            return;
        }
        tracing::info!(
            from = ?self.session.as_ref().map(SessionId::as_str),
            to = ?session.as_ref().map(SessionId::as_str),
            "Navigated"
        );

        self.stream.stop();
        self.session.clone_from(&session);
        self.stream.initialize(session.as_ref(), EventLog::default());
        self.history.load(session);
    }

    /// Apply a settled history fetch if it still belongs to the active
    /// session.
    pub fn on_history(&mut self, update: HistoryUpdate) {
        if !self.history.is_current(update.generation)
            || self.session.as_ref() != Some(&update.session)
        {
            tracing::debug!(
                generation = %update.generation,
                session = %update.session,
                "Ignoring superseded history"
            );
            return;
        }
        self.stream.initialize(Some(&update.session), update.events);
    }

    /// Drop the active session and return to the root view.
    pub fn new_session(&mut self) {
        tracing::info!("Starting new session");
        self.binder.bind(None);
        self.session = None;
        self.history.load(None);
        self.stream.stop();
        self.stream.initialize(None, EventLog::default());
        self.stream.reset_events();
        self.stream.reset_messages();
        self.input.clear();
    }

    /// Cancel the live stream and discard the pending input.
    ///
    /// Does nothing while idle.
    pub fn stop(&mut self) {
        if self.stream.is_streaming() {
            tracing::info!("Stopping live stream");
            self.stream.stop();
            self.input.clear();
        }
    }
}
