use futures::future::{ AbortHandle, Abortable };
use futures::StreamExt;
use log::warn;
use std::sync::Arc;
use tokio::sync::Mutex;

use super::transport::post_json;
use super::{ ChatError, ChatStatus };
use crate::models::chat::CompletionRequest;

struct CompletionState {
    completion: String,
    status: ChatStatus,
    error: Option<ChatError>,
    active: Option<(u64, AbortHandle)>,
    next_seq: u64,
}

/// Single-prompt counterpart of [`super::Chat`]: streams the raw text of
/// `/api/completion` into `completion()`.
#[derive(Clone)]
pub struct Completion {
    http: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    state: Arc<Mutex<CompletionState>>,
}

impl Completion {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into(),
            api_key: None,
            state: Arc::new(
                Mutex::new(CompletionState {
                    completion: String::new(),
                    status: ChatStatus::Ready,
                    error: None,
                    active: None,
                    next_seq: 0,
                })
            ),
        }
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key.filter(|k| !k.trim().is_empty());
        self
    }

    pub async fn completion(&self) -> String {
        self.state.lock().await.completion.clone()
    }

    pub async fn status(&self) -> ChatStatus {
        self.state.lock().await.status
    }

    pub async fn error(&self) -> Option<ChatError> {
        self.state.lock().await.error.clone()
    }

    /// Replaces the current completion with the answer to `prompt`, calling
    /// `on_delta` for every received piece. Returns the accumulated text,
    /// which is partial when the request was stopped.
    pub async fn complete<F>(&self, prompt: &str, on_delta: F) -> Result<String, ChatError>
        where F: FnMut(&str) + Send
    {
        let (seq, registration) = {
            let mut state = self.state.lock().await;
            if state.active.is_some() {
                return Err(ChatError::Busy);
            }
            let (abort, registration) = AbortHandle::new_pair();
            let seq = state.next_seq;
            state.next_seq += 1;
            state.active = Some((seq, abort));
            state.completion.clear();
            state.error = None;
            state.status = ChatStatus::Submitted;
            (seq, registration)
        };

        let outcome = Abortable::new(self.consume(seq, prompt, on_delta), registration).await;

        let mut state = self.state.lock().await;
        let current = state.active.as_ref().is_some_and(|(active, _)| *active == seq);
        if let (true, Ok(result)) = (current, &outcome) {
            state.active = None;
            match result {
                Ok(()) => state.status = ChatStatus::Ready,
                Err(e) => {
                    warn!("Completion failed: {}", e);
                    state.status = ChatStatus::Error;
                    state.error = Some(e.clone());
                }
            }
        }

        match outcome {
            Ok(Err(e)) => Err(e),
            _ => Ok(state.completion.clone()),
        }
    }

    pub async fn stop(&self) {
        let mut state = self.state.lock().await;
        if let Some((_, abort)) = state.active.take() {
            abort.abort();
            state.status = ChatStatus::Ready;
        }
    }

    async fn consume<F>(&self, seq: u64, prompt: &str, mut on_delta: F) -> Result<(), ChatError>
        where F: FnMut(&str) + Send
    {
        let request = CompletionRequest { prompt: prompt.to_string() };
        let response = post_json(&self.http, &self.endpoint, self.api_key.as_deref(), &request).await?;
        let mut bytes = response.bytes_stream();
        let mut pending_utf8: Vec<u8> = Vec::new();

        while let Some(chunk) = bytes.next().await {
            let chunk = chunk.map_err(|e| ChatError::Transport(e.to_string()))?;
            pending_utf8.extend_from_slice(&chunk);
            let delta = take_valid_utf8(&mut pending_utf8);
            if delta.is_empty() {
                continue;
            }

            let mut state = self.state.lock().await;
            if !state.active.as_ref().is_some_and(|(active, _)| *active == seq) {
                return Ok(());
            }
            state.status = ChatStatus::Streaming;
            state.completion.push_str(&delta);
            drop(state);
            on_delta(&delta);
        }

        if !pending_utf8.is_empty() {
            return Err(ChatError::Decode("Completion ended inside a UTF-8 sequence".to_string()));
        }
        Ok(())
    }
}

/// Drains the buffer as UTF-8, replacing invalid bytes, but leaves a
/// trailing partial character for the next network chunk.
fn take_valid_utf8(buffer: &mut Vec<u8>) -> String {
    let mut text = String::new();
    let mut consumed = 0;
    loop {
        match std::str::from_utf8(&buffer[consumed..]) {
            Ok(rest) => {
                text.push_str(rest);
                consumed = buffer.len();
                break;
            }
            Err(e) => {
                let valid = consumed + e.valid_up_to();
                text.push_str(&String::from_utf8_lossy(&buffer[consumed..valid]));
                match e.error_len() {
                    Some(len) => {
                        text.push(char::REPLACEMENT_CHARACTER);
                        consumed = valid + len;
                    }
                    None => {
                        consumed = valid;
                        break;
                    }
                }
            }
        }
    }
    buffer.drain(..consumed);
    text
}
