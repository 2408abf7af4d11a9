//! Application state driven by the terminal loop.

use std::sync::Arc;

use agent_chat_core::{
    ChatConfig, LiveView, MessageStream, SessionApi, SessionId, StreamCoordinator,
    StreamTransport,
};
use agent_chat_session::{ConversationController, HistoryUpdate, MemoryLocation};
use futures::{FutureExt, StreamExt, stream::BoxStream};
use tokio::sync::{broadcast, mpsc};

use crate::input::Action;

const CANCELLED_NOTICE: &str = "Session creation cancelled; message not sent";

pub struct App<B> {
    controller: ConversationController<B, MessageStream<B>>,
    location: Arc<MemoryLocation>,
    history_rx: mpsc::UnboundedReceiver<HistoryUpdate>,
    navigations: BoxStream<'static, Option<SessionId>>,
    changes: broadcast::Receiver<()>,
    /// Lines scrolled up from the bottom of the message list.
    scroll_back: u16,
    seen_messages: usize,
    notice: Option<String>,
    /// A submit is waiting for a new session.
    creating: bool,
    quit: bool,
}

impl<B> App<B>
where
    B: SessionApi + StreamTransport + 'static,
{
    pub fn new(config: &ChatConfig, backend: Arc<B>, location: Arc<MemoryLocation>) -> Self {
        let stream = Arc::new(MessageStream::new(Arc::clone(&backend)));
        let changes = stream.subscribe();
        let (controller, history_rx) =
            ConversationController::new(config, backend, location.clone(), stream);
        let navigations = controller.navigations();
        Self {
            controller,
            location,
            history_rx,
            navigations,
            changes,
            scroll_back: 0,
            seen_messages: 0,
            notice: None,
            creating: false,
            quit: false,
        }
    }

    /// Apply pending history results and navigations without blocking.
    ///
    /// Returns true when anything on screen may have changed.
    pub fn pump(&mut self) -> bool {
        let mut changed = false;

        while let Ok(update) = self.history_rx.try_recv() {
            self.controller.on_history(update);
            changed = true;
        }
        while let Some(Some(target)) = self.navigations.next().now_or_never() {
            self.controller.on_navigate(target);
            changed = true;
        }
        loop {
            match self.changes.try_recv() {
                Ok(()) | Err(broadcast::error::TryRecvError::Lagged(_)) => changed = true,
                Err(_) => break,
            }
        }

        let count = self.controller.view().messages.len();
        if count != self.seen_messages {
            self.seen_messages = count;
            self.scroll_back = 0;
        }
        changed
    }

    pub async fn handle(&mut self, action: Action) {
        match action {
            Action::Quit => self.quit = true,
            Action::Submit => {
                self.notice = None;
                if let Err(e) = self.controller.submit().await {
                    tracing::error!("Failed to send message: {e}");
                    self.notice = Some(e.to_string());
                }
            }
            Action::Stop => self.controller.stop(),
            Action::NewSession => {
                self.notice = None;
                self.controller.new_session();
            }
            Action::Back => {
                self.location.back();
            }
            Action::Forward => {
                self.location.forward();
            }
            Action::Insert(c) => self.controller.push_char(c),
            Action::Backspace => self.controller.pop_char(),
            Action::ScrollUp(lines) => self.scroll_back = self.scroll_back.saturating_add(lines),
            Action::ScrollDown(lines) => self.scroll_back = self.scroll_back.saturating_sub(lines),
        }
    }

    /// Flag a submit that will have to create a session first.
    ///
    /// Returns true when it will, so the caller can redraw before waiting.
    pub fn prepare_submit(&mut self) -> bool {
        self.creating =
            self.controller.session().is_none() && !self.controller.input().trim().is_empty();
        self.creating
    }

    /// Submit the pending input unless `cancel` resolves first.
    ///
    /// A cancelled submit drops the typed text and leaves the conversation
    /// without a session. Returns false when cancelled.
    pub async fn submit_or_cancel(&mut self, cancel: impl Future<Output = ()>) -> bool {
        let sent = tokio::select! {
            () = self.handle(Action::Submit) => true,
            () = cancel => false,
        };
        self.creating = false;
        if !sent {
            tracing::warn!("Session creation cancelled");
            self.notice = Some(CANCELLED_NOTICE.to_owned());
        }
        sent
    }

    pub const fn is_creating(&self) -> bool {
        self.creating
    }

    pub const fn should_quit(&self) -> bool {
        self.quit
    }

    pub fn view(&self) -> LiveView {
        self.controller.view()
    }

    pub fn session(&self) -> Option<&SessionId> {
        self.controller.session()
    }

    pub fn is_loading(&self) -> bool {
        self.controller.history().is_loading()
    }

    pub fn input(&self) -> &str {
        self.controller.input()
    }

    pub fn notice(&self) -> Option<&str> {
        self.notice.as_deref()
    }

    pub const fn scroll_back(&self) -> u16 {
        self.scroll_back
    }
}
