//! History + live stream merged into one display view.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use futures::StreamExt;
use tokio::sync::{broadcast, oneshot};

use crate::{
    Event, EventLog, EventPatch, LiveView, Message, SessionId, StreamChunk, StreamCoordinator,
    StreamTransport, derive_messages, event::processing_label,
};

struct Inner {
    session: Option<SessionId>,
    history: EventLog,
    emitted: Vec<Event>,
    messages: Vec<Message>,
    streaming: bool,
    processing: Option<String>,
    error: Option<String>,
    /// Bumped whenever the running stream is abandoned; output from an
    /// older epoch is dropped.
    epoch: u64,
    interrupt_tx: Option<oneshot::Sender<()>>,
}

impl Inner {
    fn rebuild(&mut self) {
        self.messages = derive_messages(self.history.iter().chain(self.emitted.iter()));
    }

    fn abandon_stream(&mut self) {
        if let Some(tx) = self.interrupt_tx.take() {
            let _ = tx.send(());
        }
        self.epoch += 1;
        self.streaming = false;
        self.processing = None;
    }

    fn apply(&mut self, chunk: StreamChunk) {
        match chunk {
            StreamChunk::Event(event) => {
                if let Some(label) = event.status_label() {
                    self.processing = label;
                }
                match self.emitted.iter_mut().find(|e| e.id == event.id) {
                    Some(existing) => *existing = event,
                    None => self.emitted.push(event),
                }
            }
            StreamChunk::Patch(patch) => self.apply_patch(patch),
            StreamChunk::Status { status, detail } => {
                self.processing = processing_label(&status, detail.as_deref());
            }
            StreamChunk::Error { message } => {
                tracing::error!("Live stream reported an error: {message}");
                self.error = Some(message);
            }
            StreamChunk::Done => {}
        }
        self.rebuild();
    }

    fn apply_patch(&mut self, patch: EventPatch) {
        let index = match self.emitted.iter().position(|e| e.id == patch.event_id) {
            Some(index) => index,
            None => {
                let mut event = Event::empty(&patch.event_id, patch.source, patch.kind);
                event.correlation_id = patch.correlation_id;
                self.emitted.push(event);
                self.emitted.len() - 1
            }
        };

        let event = &mut self.emitted[index];
        if let Err(e) = json_patch::patch(&mut event.data, &patch.patches.0) {
            tracing::warn!(event_id = %event.id, "Failed to apply live patch: {e}");
            self.error = Some(format!("Failed to apply update to {}: {e}", event.id));
        }
    }
}

/// Merged view over a session's history and its live stream.
///
/// Cloning is cheap; clones share state. Streaming requires a tokio runtime.
pub struct MessageStream<T: ?Sized> {
    inner: Arc<RwLock<Inner>>,
    transport: Arc<T>,
    sender: broadcast::Sender<()>,
}

impl<T: ?Sized> Clone for MessageStream<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            transport: Arc::clone(&self.transport),
            sender: self.sender.clone(),
        }
    }
}

impl<T> MessageStream<T>
where
    T: StreamTransport + ?Sized + 'static,
{
    /// Create an empty, unbound message stream.
    #[must_use]
    pub fn new(transport: Arc<T>) -> Self {
        let (sender, _) = broadcast::channel(256);
        Self {
            inner: Arc::new(RwLock::new(Inner {
                session: None,
                history: EventLog::default(),
                emitted: Vec::new(),
                messages: Vec::new(),
                streaming: false,
                processing: None,
                error: None,
                epoch: 0,
                interrupt_tx: None,
            })),
            transport,
            sender,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self) {
        let _ = self.sender.send(()); // redraw listeners
    }

    /// Apply a chunk if it belongs to the current stream.
    fn apply(&self, epoch: u64, chunk: StreamChunk) {
        {
            let mut inner = self.write();
            if inner.epoch != epoch {
                tracing::debug!("Dropping chunk from an abandoned stream");
                return;
            }
            inner.apply(chunk);
        }
        self.notify();
    }

    fn finish(&self, epoch: u64, error: Option<String>) {
        {
            let mut inner = self.write();
            if inner.epoch != epoch {
                return;
            }
            inner.interrupt_tx = None;
            inner.streaming = false;
            inner.processing = None;
            if error.is_some() {
                inner.error = error;
            }
        }
        self.notify();
    }

    async fn drive(
        self,
        epoch: u64,
        session: SessionId,
        text: String,
        mut interrupt_rx: oneshot::Receiver<()>,
    ) {
        let opened = tokio::select! {
            result = self.transport.open(&session, &text) => result,
            _ = &mut interrupt_rx => return,
        };

        let mut chunks = match opened {
            Ok(chunks) => chunks,
            Err(e) => {
                tracing::error!(session = %session, "Failed to open live stream: {e}");
                self.finish(epoch, Some(e.to_string()));
                return;
            }
        };

        loop {
            tokio::select! {
                _ = &mut interrupt_rx => {
                    tracing::debug!(session = %session, "Live stream stopped");
                    return;
                }
                next = chunks.next() => match next {
                    Some(Ok(StreamChunk::Done)) | None => break,
                    Some(Ok(chunk)) => self.apply(epoch, chunk),
                    Some(Err(e)) => {
                        tracing::error!(session = %session, "Live stream failed: {e}");
                        self.finish(epoch, Some(e.to_string()));
                        return;
                    }
                },
            }
        }

        self.finish(epoch, None);
    }
}

impl<T> StreamCoordinator for MessageStream<T>
where
    T: StreamTransport + ?Sized + 'static,
{
    fn initialize(&self, session: Option<&SessionId>, events: EventLog) {
        {
            let mut inner = self.write();
            if inner.session.as_ref() != session {
                inner.abandon_stream();
                inner.emitted.clear();
                inner.error = None;
                inner.session = session.cloned();
            }
            inner.history = events;
            inner.rebuild();
        }
        self.notify();
    }

    fn start(&self, session: &SessionId, text: &str) {
        let (epoch, interrupt_rx) = {
            let mut inner = self.write();
            if inner.session.as_ref() != Some(session) {
                tracing::warn!(session = %session, "Starting a stream on an unbound session; rebinding");
                inner.emitted.clear();
                inner.history = EventLog::default();
                inner.session = Some(session.clone());
            }
            inner.abandon_stream();

            let (tx, rx) = oneshot::channel();
            inner.interrupt_tx = Some(tx);
            inner.streaming = true;
            inner.error = None;
            inner.rebuild();
            (inner.epoch, rx)
        };
        self.notify();

        tracing::debug!(session = %session, "Starting live stream");
        let this = self.clone();
        let session = session.clone();
        let text = text.to_owned();
        tokio::spawn(this.drive(epoch, session, text, interrupt_rx));
    }

    fn stop(&self) {
        {
            let mut inner = self.write();
            if !inner.streaming {
                return;
            }
            inner.abandon_stream();
        }
        self.notify();
    }

    fn reset_events(&self) {
        {
            let mut inner = self.write();
            inner.emitted.clear();
            inner.processing = None;
            inner.error = None;
            inner.rebuild();
        }
        self.notify();
    }

    fn reset_messages(&self) {
        self.write().messages.clear();
        self.notify();
    }

    fn view(&self) -> LiveView {
        let inner = self.read();
        LiveView {
            session: inner.session.clone(),
            messages: inner.messages.clone(),
            streaming: inner.streaming,
            processing: inner.processing.clone(),
            error: inner.error.clone(),
            emitted_events: inner.emitted.len(),
            loaded_events: inner.history.len(),
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<()> {
        self.sender.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::json;
    use tokio::sync::mpsc;

    use super::*;
    use crate::{ApiError, ChunkStream, EventSource, MessageBody};

    /// Transport whose streams are fed by the test through channels.
    #[derive(Default)]
    struct ChannelTransport {
        opened: Mutex<Vec<(SessionId, String)>>,
        feeds: Mutex<Vec<mpsc::UnboundedSender<Result<StreamChunk, ApiError>>>>,
    }

    impl ChannelTransport {
        fn feed(&self, index: usize) -> mpsc::UnboundedSender<Result<StreamChunk, ApiError>> {
            self.feeds.lock().unwrap()[index].clone()
        }
    }

    #[async_trait]
    impl StreamTransport for ChannelTransport {
        async fn open(&self, session_id: &SessionId, text: &str) -> Result<ChunkStream, ApiError> {
            self.opened
                .lock()
                .unwrap()
                .push((session_id.clone(), text.to_string()));
            let (tx, rx) = mpsc::unbounded_channel();
            self.feeds.lock().unwrap().push(tx);
            Ok(channel_stream(rx))
        }
    }

    fn channel_stream(
        mut rx: mpsc::UnboundedReceiver<Result<StreamChunk, ApiError>>,
    ) -> ChunkStream {
        futures::stream::poll_fn(move |cx| rx.poll_recv(cx)).boxed()
    }

    fn sid(raw: &str) -> SessionId {
        SessionId::parse(raw).unwrap()
    }

    async fn settle(stream: &MessageStream<ChannelTransport>, check: impl Fn(&LiveView) -> bool) {
        for _ in 0..200 {
            if check(&stream.view()) {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        panic!("view never settled: {:?}", stream.view());
    }

    async fn wait_opened(transport: &ChannelTransport, count: usize) {
        for _ in 0..200 {
            if transport.feeds.lock().unwrap().len() >= count {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        panic!("stream never opened");
    }

    fn history() -> EventLog {
        EventLog::new(vec![
            Event::message("h1", EventSource::User, "hi"),
            Event::message("h2", EventSource::AiAgent, "hello"),
        ])
    }

    #[tokio::test]
    async fn test_initialize_derives_history_messages() {
        let stream = MessageStream::new(Arc::new(ChannelTransport::default()));
        stream.initialize(Some(&sid("s1")), history());

        let view = stream.view();
        assert_eq!(view.session, Some(sid("s1")));
        assert_eq!(view.loaded_events, 2);
        assert_eq!(view.messages.len(), 2);
        assert!(!view.streaming);
    }

    #[tokio::test]
    async fn test_live_patches_merge_after_history() {
        let transport = Arc::new(ChannelTransport::default());
        let stream = MessageStream::new(Arc::clone(&transport));
        stream.initialize(Some(&sid("s1")), history());

        stream.start(&sid("s1"), "what's up");
        assert!(stream.view().streaming);
        wait_opened(&transport, 1).await;

        let feed = transport.feed(0);
        feed.send(Ok(StreamChunk::Event(Event::message(
            "u1",
            EventSource::User,
            "what's up",
        ))))
        .unwrap();
        feed.send(Ok(StreamChunk::Status {
            status: "processing".to_string(),
            detail: Some("thinking".to_string()),
        }))
        .unwrap();
        for patch in [
            json!([{ "op": "add", "path": "/content", "value": ["not"] }]),
            json!([{ "op": "add", "path": "/content/-", "value": "much" }]),
        ] {
            feed.send(Ok(StreamChunk::Patch(EventPatch {
                event_id: "a1".to_string(),
                correlation_id: None,
                source: EventSource::AiAgent,
                kind: crate::EventKind::Message,
                patches: serde_json::from_value(patch).unwrap(),
            })))
            .unwrap();
        }

        settle(&stream, |view| view.messages.len() == 4).await;
        let view = stream.view();
        assert_eq!(view.emitted_events, 2);
        assert_eq!(view.processing.as_deref(), Some("thinking"));
        assert_eq!(view.messages[3].body, MessageBody::Text("not much".to_string()));

        feed.send(Ok(StreamChunk::Done)).unwrap();
        settle(&stream, |view| !view.streaming).await;
        assert_eq!(stream.view().processing, None);
        assert_eq!(stream.view().messages.len(), 4);
    }

    #[tokio::test]
    async fn test_stop_keeps_received_messages() {
        let transport = Arc::new(ChannelTransport::default());
        let stream = MessageStream::new(Arc::clone(&transport));
        stream.initialize(Some(&sid("s1")), EventLog::default());
        stream.start(&sid("s1"), "hello");
        wait_opened(&transport, 1).await;

        let feed = transport.feed(0);
        feed.send(Ok(StreamChunk::Event(Event::message(
            "a1",
            EventSource::AiAgent,
            "partial",
        ))))
        .unwrap();
        settle(&stream, |view| view.messages.len() == 1).await;
        let before = stream.view().messages;

        stream.stop();

        let view = stream.view();
        assert!(!view.streaming);
        assert_eq!(view.messages, before);
        assert_eq!(view.emitted_events, 1);

        // Output racing the stop is ignored.
        let _ = feed.send(Ok(StreamChunk::Event(Event::message(
            "a2",
            EventSource::AiAgent,
            "late",
        ))));
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(stream.view().messages, before);
    }

    #[tokio::test]
    async fn test_stop_when_idle_is_noop() {
        let stream = MessageStream::new(Arc::new(ChannelTransport::default()));
        stream.initialize(Some(&sid("s1")), history());
        let mut rx = stream.subscribe();

        stream.stop();

        assert!(rx.try_recv().is_err());
        assert_eq!(stream.view().messages.len(), 2);
    }

    #[tokio::test]
    async fn test_rebinding_session_abandons_stream() {
        let transport = Arc::new(ChannelTransport::default());
        let stream = MessageStream::new(Arc::clone(&transport));
        stream.initialize(Some(&sid("s1")), EventLog::default());
        stream.start(&sid("s1"), "hello");
        wait_opened(&transport, 1).await;

        stream.initialize(Some(&sid("s2")), history());
        let _ = transport.feed(0).send(Ok(StreamChunk::Event(Event::message(
            "stale",
            EventSource::AiAgent,
            "from s1",
        ))));
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let view = stream.view();
        assert_eq!(view.session, Some(sid("s2")));
        assert!(!view.streaming);
        assert_eq!(view.emitted_events, 0);
        assert!(view.messages.iter().all(|m| m.id != "stale"));
    }

    #[tokio::test]
    async fn test_same_session_history_keeps_live_events() {
        let transport = Arc::new(ChannelTransport::default());
        let stream = MessageStream::new(Arc::clone(&transport));
        stream.initialize(Some(&sid("s1")), EventLog::default());
        stream.start(&sid("s1"), "hello");
        wait_opened(&transport, 1).await;
        transport
            .feed(0)
            .send(Ok(StreamChunk::Event(Event::message(
                "a1",
                EventSource::AiAgent,
                "live",
            ))))
            .unwrap();
        settle(&stream, |view| view.emitted_events == 1).await;

        stream.initialize(Some(&sid("s1")), history());

        let view = stream.view();
        assert!(view.streaming);
        assert_eq!(view.messages.len(), 3);
        assert_eq!(view.messages[2].id, "a1");
    }

    #[tokio::test]
    async fn test_stream_error_is_state_not_failure() {
        let transport = Arc::new(ChannelTransport::default());
        let stream = MessageStream::new(Arc::clone(&transport));
        stream.initialize(Some(&sid("s1")), history());
        stream.start(&sid("s1"), "hello");
        wait_opened(&transport, 1).await;

        transport
            .feed(0)
            .send(Err(ApiError::Transport("connection reset".to_string())))
            .unwrap();
        settle(&stream, |view| !view.streaming).await;

        let view = stream.view();
        assert!(view.error.unwrap().contains("connection reset"));
        assert_eq!(view.messages.len(), 2);
    }

    #[tokio::test]
    async fn test_resets_clear_derived_state_only() {
        let transport = Arc::new(ChannelTransport::default());
        let stream = MessageStream::new(Arc::clone(&transport));
        stream.initialize(Some(&sid("s1")), history());
        stream.start(&sid("s1"), "hello");
        wait_opened(&transport, 1).await;
        transport
            .feed(0)
            .send(Ok(StreamChunk::Event(Event::message(
                "a1",
                EventSource::AiAgent,
                "live",
            ))))
            .unwrap();
        settle(&stream, |view| view.emitted_events == 1).await;
        stream.stop();

        stream.reset_events();
        assert_eq!(stream.view().emitted_events, 0);
        assert_eq!(stream.view().messages.len(), 2);

        stream.reset_messages();
        assert!(stream.view().messages.is_empty());
        assert_eq!(stream.view().loaded_events, 2);
    }
}
