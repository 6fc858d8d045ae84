//! Client side of the chat protocol: conversation state plus the request
//! lifecycle `ready -> submitted -> streaming -> ready | error`.

pub mod completion;
pub mod transport;

use futures::future::{ AbortHandle, AbortRegistration, Abortable };
use futures::StreamExt;
use log::{ debug, warn };
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{ broadcast, Mutex };
use uuid::Uuid;

use crate::models::chat::{ ChatRequest, MessagePart, PartState, RequestTrigger, Role, UiMessage };
use crate::models::stream::UiMessageChunk;
pub use completion::Completion;
pub use transport::{ ChatTransport, ChunkEvents, HttpChatTransport };

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatStatus {
    Ready,
    Submitted,
    Streaming,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChatError {
    #[error("A request is already in progress")]
    Busy,

    #[error("There is no user message to regenerate a response for")]
    NothingToReload,

    #[error("Server returned HTTP {status}: {body}")] Http {
        status: u16,
        body: String,
    },

    #[error("Transport error: {0}")] Transport(String),

    #[error("Malformed stream data: {0}")] Decode(String),

    #[error("{0}")] Stream(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    StatusChanged(ChatStatus),
    MessageStarted {
        message_id: String,
    },
    TextDelta {
        message_id: String,
        delta: String,
    },
    ReasoningDelta {
        message_id: String,
        delta: String,
    },
    Error(ChatError),
}

/// Bookkeeping for the request currently allowed to touch the history.
struct ActiveRequest {
    seq: u64,
    abort: AbortHandle,
    assistant: Option<usize>,
    parts: HashMap<String, usize>,
}

struct ChatState {
    messages: Vec<UiMessage>,
    status: ChatStatus,
    error: Option<ChatError>,
    active: Option<ActiveRequest>,
    next_seq: u64,
}

impl ChatState {
    fn is_current(&self, seq: u64) -> bool {
        self.active.as_ref().is_some_and(|a| a.seq == seq)
    }

    fn finalize_assistant(&mut self, active: &ActiveRequest) {
        if let Some(message) = active.assistant.and_then(|i| self.messages.get_mut(i)) {
            message.finalize();
        }
    }
}

struct PendingRequest {
    seq: u64,
    registration: AbortRegistration,
    request: ChatRequest,
}

enum Flow {
    Continue,
    Finished,
    Aborted,
}

/// A conversation bound to one chat endpoint. Clones share the same state,
/// so one handle can `stop()` a request another handle is awaiting.
#[derive(Clone)]
pub struct Chat {
    id: String,
    transport: Arc<dyn ChatTransport>,
    state: Arc<Mutex<ChatState>>,
    events: broadcast::Sender<ChatEvent>,
}

impl Chat {
    pub fn new(transport: Arc<dyn ChatTransport>) -> Self {
        Self::with_history(transport, Vec::new())
    }

    pub fn with_history(transport: Arc<dyn ChatTransport>, messages: Vec<UiMessage>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            id: Uuid::new_v4().to_string(),
            transport,
            state: Arc::new(
                Mutex::new(ChatState {
                    messages,
                    status: ChatStatus::Ready,
                    error: None,
                    active: None,
                    next_seq: 0,
                })
            ),
            events,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub async fn messages(&self) -> Vec<UiMessage> {
        self.state.lock().await.messages.clone()
    }

    pub async fn status(&self) -> ChatStatus {
        self.state.lock().await.status
    }

    pub async fn error(&self) -> Option<ChatError> {
        self.state.lock().await.error.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.events.subscribe()
    }

    /// Appends a user message and streams the assistant's answer into the
    /// history. Resolves once the response has finished, failed or been
    /// stopped; a stop is not an error.
    pub async fn send_message(&self, text: impl Into<String>) -> Result<(), ChatError> {
        let pending = {
            let mut state = self.state.lock().await;
            if state.active.is_some() {
                return Err(ChatError::Busy);
            }
            state.messages.push(UiMessage::user(text));
            self.begin(&mut state, RequestTrigger::SubmitMessage, None)
        };
        self.run(pending).await
    }

    /// Drops everything after the last user message and asks for a new answer.
    pub async fn reload(&self) -> Result<(), ChatError> {
        let pending = {
            let mut state = self.state.lock().await;
            if state.active.is_some() {
                return Err(ChatError::Busy);
            }
            let last_user = state.messages
                .iter()
                .rposition(|m| m.role == Role::User)
                .ok_or(ChatError::NothingToReload)?;
            let replaced = state.messages.get(last_user + 1).map(|m| m.id.clone());
            state.messages.truncate(last_user + 1);
            self.begin(&mut state, RequestTrigger::RegenerateMessage, replaced)
        };
        self.run(pending).await
    }

    /// Cancels the in-flight request, keeping whatever text already arrived.
    pub async fn stop(&self) {
        let mut state = self.state.lock().await;
        let Some(active) = state.active.take() else {
            return;
        };
        active.abort.abort();
        state.finalize_assistant(&active);
        debug!("Chat {}: request {} stopped", self.id, active.seq);
        self.set_status(&mut state, ChatStatus::Ready);
    }

    fn begin(
        &self,
        state: &mut ChatState,
        trigger: RequestTrigger,
        message_id: Option<String>
    ) -> PendingRequest {
        let (abort, registration) = AbortHandle::new_pair();
        let seq = state.next_seq;
        state.next_seq += 1;
        state.active = Some(ActiveRequest { seq, abort, assistant: None, parts: HashMap::new() });
        state.error = None;
        self.set_status(state, ChatStatus::Submitted);

        PendingRequest {
            seq,
            registration,
            request: ChatRequest {
                id: Some(self.id.clone()),
                messages: state.messages.clone(),
                trigger: Some(trigger),
                message_id,
            },
        }
    }

    async fn run(&self, pending: PendingRequest) -> Result<(), ChatError> {
        let PendingRequest { seq, registration, request } = pending;
        let outcome = Abortable::new(self.consume(seq, request), registration).await;
        match outcome {
            Ok(result) => {
                self.settle(seq, result.clone()).await;
                result
            }
            Err(_aborted) => Ok(()),
        }
    }

    async fn consume(&self, seq: u64, request: ChatRequest) -> Result<(), ChatError> {
        let mut chunks = self.transport.send(request).await?;

        while let Some(chunk) = chunks.next().await {
            let chunk = chunk?;
            let mut state = self.state.lock().await;
            if !state.is_current(seq) {
                return Ok(());
            }
            match self.apply(&mut state, chunk)? {
                Flow::Continue => {}
                Flow::Finished => {
                    return Ok(());
                }
                Flow::Aborted => {
                    drop(state);
                    self.stop().await;
                    return Ok(());
                }
            }
        }

        Err(ChatError::Transport("Stream ended before the response finished".to_string()))
    }

    fn apply(&self, state: &mut ChatState, chunk: UiMessageChunk) -> Result<Flow, ChatError> {
        if state.status == ChatStatus::Submitted {
            self.set_status(state, ChatStatus::Streaming);
        }

        match chunk {
            UiMessageChunk::Start { message_id } => {
                let index = self.assistant_index(state, message_id);
                if let Some(message) = state.messages.get(index) {
                    let _ = self.events.send(ChatEvent::MessageStarted { message_id: message.id.clone() });
                }
            }
            UiMessageChunk::StartStep => {
                self.push_part(state, None, MessagePart::StepStart);
            }
            UiMessageChunk::TextStart { id } => {
                self.push_part(state, Some(id), MessagePart::Text {
                    text: String::new(),
                    state: Some(PartState::Streaming),
                });
            }
            UiMessageChunk::ReasoningStart { id } => {
                self.push_part(state, Some(id), MessagePart::Reasoning {
                    text: String::new(),
                    state: Some(PartState::Streaming),
                });
            }
            UiMessageChunk::TextDelta { id, delta } => {
                self.append_delta(state, id, delta, false);
            }
            UiMessageChunk::ReasoningDelta { id, delta } => {
                self.append_delta(state, id, delta, true);
            }
            UiMessageChunk::TextEnd { id } | UiMessageChunk::ReasoningEnd { id } => {
                if let Some(part) = self.part_mut(state, &id) {
                    part.mark_done();
                }
            }
            UiMessageChunk::FinishStep => {}
            UiMessageChunk::Finish => {
                return Ok(Flow::Finished);
            }
            UiMessageChunk::Abort => {
                return Ok(Flow::Aborted);
            }
            UiMessageChunk::Error { error_text } => {
                return Err(ChatError::Stream(error_text));
            }
        }
        Ok(Flow::Continue)
    }

    /// Index of the assistant message for the active request, creating it on
    /// first use.
    fn assistant_index(&self, state: &mut ChatState, message_id: Option<String>) -> usize {
        if let Some(index) = state.active.as_ref().and_then(|a| a.assistant) {
            return index;
        }
        let mut message = UiMessage::new(Role::Assistant, Vec::new());
        if let Some(id) = message_id {
            message.id = id;
        }
        state.messages.push(message);
        let index = state.messages.len() - 1;
        if let Some(active) = state.active.as_mut() {
            active.assistant = Some(index);
        }
        index
    }

    fn push_part(&self, state: &mut ChatState, id: Option<String>, part: MessagePart) {
        let index = self.assistant_index(state, None);
        let Some(message) = state.messages.get_mut(index) else {
            return;
        };
        message.parts.push(part);
        let part_index = message.parts.len() - 1;
        if let (Some(id), Some(active)) = (id, state.active.as_mut()) {
            active.parts.insert(id, part_index);
        }
    }

    fn part_mut<'a>(&self, state: &'a mut ChatState, id: &str) -> Option<&'a mut MessagePart> {
        let active = state.active.as_ref()?;
        let message_index = active.assistant?;
        let part_index = *active.parts.get(id)?;
        state.messages.get_mut(message_index)?.parts.get_mut(part_index)
    }

    fn append_delta(&self, state: &mut ChatState, id: String, delta: String, reasoning: bool) {
        if self.part_mut(state, &id).is_none() {
            warn!("Chat {}: delta for unknown part {}, opening it", self.id, id);
            let part = if reasoning {
                MessagePart::Reasoning { text: String::new(), state: Some(PartState::Streaming) }
            } else {
                MessagePart::Text { text: String::new(), state: Some(PartState::Streaming) }
            };
            self.push_part(state, Some(id.clone()), part);
        }

        if let Some(MessagePart::Text { text, .. } | MessagePart::Reasoning { text, .. }) = self.part_mut(state, &id) {
            text.push_str(&delta);
        }

        let message_id = state.active
            .as_ref()
            .and_then(|a| a.assistant)
            .and_then(|i| state.messages.get(i))
            .map(|m| m.id.clone())
            .unwrap_or_default();
        let event = if reasoning {
            ChatEvent::ReasoningDelta { message_id, delta }
        } else {
            ChatEvent::TextDelta { message_id, delta }
        };
        let _ = self.events.send(event);
    }

    async fn settle(&self, seq: u64, result: Result<(), ChatError>) {
        let mut state = self.state.lock().await;
        if !state.is_current(seq) {
            return;
        }
        let Some(active) = state.active.take() else {
            return;
        };
        state.finalize_assistant(&active);

        match result {
            Ok(()) => self.set_status(&mut state, ChatStatus::Ready),
            Err(e) => {
                warn!("Chat {}: request {} failed: {}", self.id, seq, e);
                state.error = Some(e.clone());
                let _ = self.events.send(ChatEvent::Error(e));
                self.set_status(&mut state, ChatStatus::Error);
            }
        }
    }

    fn set_status(&self, state: &mut ChatState, status: ChatStatus) {
        if state.status != status {
            state.status = status;
            let _ = self.events.send(ChatEvent::StatusChanged(status));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use futures::stream;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    enum Reply {
        Chunks(Vec<Result<UiMessageChunk, ChatError>>),
        /// Sends the chunks, then never finishes.
        Hang(Vec<UiMessageChunk>),
        Fail(ChatError),
    }

    struct ScriptedTransport {
        replies: StdMutex<VecDeque<Reply>>,
        requests: StdMutex<Vec<ChatRequest>>,
    }

    impl ScriptedTransport {
        fn new(replies: Vec<Reply>) -> Arc<Self> {
            Arc::new(Self { replies: StdMutex::new(replies.into()), requests: StdMutex::default() })
        }

        fn requests(&self) -> Vec<ChatRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ChatTransport for ScriptedTransport {
        async fn send(&self, request: ChatRequest) -> Result<ChunkEvents, ChatError> {
            self.requests.lock().unwrap().push(request);
            let reply = self.replies.lock().unwrap().pop_front().expect("no scripted reply left");
            match reply {
                Reply::Chunks(chunks) => Ok(Box::pin(stream::iter(chunks))),
                Reply::Hang(chunks) => {
                    let sent = stream::iter(chunks.into_iter().map(Ok::<_, ChatError>));
                    Ok(Box::pin(sent.chain(stream::pending())))
                }
                Reply::Fail(e) => Err(e),
            }
        }
    }

    fn answer(message_id: &str, deltas: &[&str]) -> Vec<UiMessageChunk> {
        let mut chunks = vec![
            UiMessageChunk::Start { message_id: Some(message_id.into()) },
            UiMessageChunk::StartStep,
            UiMessageChunk::TextStart { id: "text-0".into() }
        ];
        chunks.extend(
            deltas.iter().map(|d| UiMessageChunk::TextDelta { id: "text-0".into(), delta: d.to_string() })
        );
        chunks
    }

    fn finished(message_id: &str, deltas: &[&str]) -> Reply {
        let mut chunks = answer(message_id, deltas);
        chunks.extend([
            UiMessageChunk::TextEnd { id: "text-0".into() },
            UiMessageChunk::FinishStep,
            UiMessageChunk::Finish,
        ]);
        Reply::Chunks(chunks.into_iter().map(Ok).collect())
    }

    async fn wait_for_text(events: &mut broadcast::Receiver<ChatEvent>) {
        loop {
            if let ChatEvent::TextDelta { .. } = events.recv().await.unwrap() {
                return;
            }
        }
    }

    #[tokio::test]
    async fn streams_answer_into_history() {
        let transport = ScriptedTransport::new(vec![finished("a1", &["Hel", "lo"])]);
        let chat = Chat::new(transport.clone());
        let mut events = chat.subscribe();

        chat.send_message("hi").await.unwrap();

        let messages = chat.messages().await;
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[1].id, "a1");
        assert_eq!(messages[1].parts[0], MessagePart::StepStart);
        assert_eq!(messages[1].text(), "Hello");
        assert!(messages[1].is_complete());
        assert_eq!(chat.status().await, ChatStatus::Ready);

        let mut statuses = Vec::new();
        let mut text = String::new();
        while let Ok(event) = events.try_recv() {
            match event {
                ChatEvent::StatusChanged(s) => statuses.push(s),
                ChatEvent::TextDelta { delta, .. } => text.push_str(&delta),
                _ => {}
            }
        }
        assert_eq!(statuses, vec![ChatStatus::Submitted, ChatStatus::Streaming, ChatStatus::Ready]);
        assert_eq!(text, "Hello");

        let request = &transport.requests()[0];
        assert_eq!(request.id.as_deref(), Some(chat.id()));
        assert_eq!(request.trigger, Some(RequestTrigger::SubmitMessage));
        assert_eq!(request.messages, vec![messages[0].clone()]);
    }

    #[tokio::test]
    async fn assistant_text_only_grows_while_streaming() {
        let deltas = ["The ", "quick ", "", "brown ", "fox ", "jumps"];
        let transport = ScriptedTransport::new(vec![Reply::Hang(answer("a1", &deltas))]);
        let chat = Chat::new(transport);
        let mut events = chat.subscribe();

        let task = tokio::spawn({
            let chat = chat.clone();
            async move { chat.send_message("go").await }
        });

        let expected: String = deltas.concat();
        let mut seen = Vec::new();
        loop {
            wait_for_text(&mut events).await;
            let text = chat.messages().await[1].text();
            seen.push(text.clone());
            if text == expected {
                break;
            }
        }
        chat.stop().await;
        assert_eq!(task.await.unwrap(), Ok(()));

        for pair in seen.windows(2) {
            assert!(pair[1].starts_with(&pair[0]), "{:?} shrank to {:?}", pair[0], pair[1]);
        }
        assert_eq!(chat.messages().await[1].text(), expected);
    }

    #[tokio::test]
    async fn user_message_is_appended_before_the_request_resolves() {
        let transport = ScriptedTransport::new(vec![Reply::Hang(vec![])]);
        let chat = Chat::new(transport);
        let task = tokio::spawn({
            let chat = chat.clone();
            async move { chat.send_message("hello").await }
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        let messages = chat.messages().await;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].text(), "hello");
        assert_eq!(chat.status().await, ChatStatus::Submitted);

        chat.stop().await;
        assert_eq!(task.await.unwrap(), Ok(()));
        assert_eq!(chat.status().await, ChatStatus::Ready);
    }

    #[tokio::test]
    async fn stop_keeps_partial_text_and_ignores_the_old_stream() {
        let transport = ScriptedTransport::new(
            vec![Reply::Hang(answer("a1", &["partial ", "answer"])), finished("a2", &["second"])]
        );
        let chat = Chat::new(transport);
        let mut events = chat.subscribe();

        let task = tokio::spawn({
            let chat = chat.clone();
            async move { chat.send_message("first").await }
        });
        wait_for_text(&mut events).await;
        assert_eq!(chat.send_message("too soon").await, Err(ChatError::Busy));
        assert_eq!(chat.reload().await, Err(ChatError::Busy));

        chat.stop().await;
        assert_eq!(task.await.unwrap(), Ok(()));
        assert_eq!(chat.status().await, ChatStatus::Ready);

        let messages = chat.messages().await;
        assert_eq!(messages.len(), 2);
        assert!(messages[1].text().starts_with("partial"));
        assert!(messages[1].is_complete());

        chat.send_message("second").await.unwrap();
        let texts: Vec<String> = chat
            .messages().await
            .iter()
            .map(UiMessage::text)
            .collect();
        assert_eq!(texts[2..], ["second".to_string(), "second".to_string()]);
    }

    #[tokio::test]
    async fn stream_error_sets_error_status_and_keeps_history() {
        let mut chunks: Vec<Result<UiMessageChunk, ChatError>> = answer("a1", &["so far"]).into_iter().map(Ok).collect();
        chunks.push(Ok(UiMessageChunk::Error { error_text: "An error occurred.".into() }));
        let history = vec![UiMessage::user("earlier"), UiMessage::new(Role::Assistant, vec![MessagePart::text("ok")])];
        let chat = Chat::with_history(ScriptedTransport::new(vec![Reply::Chunks(chunks)]), history.clone());

        let err = chat.send_message("next").await.unwrap_err();
        assert_eq!(err, ChatError::Stream("An error occurred.".into()));
        assert_eq!(chat.status().await, ChatStatus::Error);
        assert_eq!(chat.error().await, Some(err));

        let messages = chat.messages().await;
        assert_eq!(messages[..2], history[..]);
        assert_eq!(messages[3].text(), "so far");
        assert!(messages[3].is_complete());
    }

    #[tokio::test]
    async fn transport_failure_leaves_no_assistant_message() {
        let failure = ChatError::Http { status: 500, body: "{}".into() };
        let chat = Chat::new(ScriptedTransport::new(vec![Reply::Fail(failure.clone()), finished("a1", &["ok"])]));

        assert_eq!(chat.send_message("hi").await, Err(failure));
        assert_eq!(chat.messages().await.len(), 1);
        assert_eq!(chat.status().await, ChatStatus::Error);

        chat.reload().await.unwrap();
        assert_eq!(chat.status().await, ChatStatus::Ready);
        assert_eq!(chat.error().await, None);
        assert_eq!(chat.messages().await.len(), 2);
    }

    #[tokio::test]
    async fn truncated_stream_is_an_error() {
        let chunks = answer("a1", &["cut"]).into_iter().map(Ok).collect();
        let chat = Chat::new(ScriptedTransport::new(vec![Reply::Chunks(chunks)]));
        assert!(matches!(chat.send_message("hi").await, Err(ChatError::Transport(_))));
        assert_eq!(chat.messages().await[1].text(), "cut");
    }

    #[tokio::test]
    async fn reload_regenerates_the_last_answer() {
        let transport = ScriptedTransport::new(vec![finished("a1", &["one"]), finished("a2", &["two"])]);
        let chat = Chat::new(transport.clone());
        chat.send_message("question").await.unwrap();
        chat.reload().await.unwrap();

        let messages = chat.messages().await;
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].id, "a2");
        assert_eq!(messages[1].text(), "two");

        let regenerate = &transport.requests()[1];
        assert_eq!(regenerate.trigger, Some(RequestTrigger::RegenerateMessage));
        assert_eq!(regenerate.message_id.as_deref(), Some("a1"));
        assert_eq!(regenerate.messages.len(), 1);
    }

    #[tokio::test]
    async fn reload_without_user_message_fails() {
        let chat = Chat::new(ScriptedTransport::new(vec![]));
        assert_eq!(chat.reload().await, Err(ChatError::NothingToReload));
        assert_eq!(chat.status().await, ChatStatus::Ready);
    }

    #[tokio::test]
    async fn abort_chunk_behaves_like_stop() {
        let mut chunks: Vec<Result<UiMessageChunk, ChatError>> = answer("a1", &["half"]).into_iter().map(Ok).collect();
        chunks.push(Ok(UiMessageChunk::Abort));
        let chat = Chat::new(ScriptedTransport::new(vec![Reply::Chunks(chunks)]));

        assert_eq!(chat.send_message("hi").await, Ok(()));
        assert_eq!(chat.status().await, ChatStatus::Ready);
        assert_eq!(chat.messages().await[1].text(), "half");
    }
}
