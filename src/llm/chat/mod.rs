pub mod anthropic;
pub mod gemini;
pub mod mock;
pub mod ollama;
pub mod openai;

use async_trait::async_trait;
use futures::{ Stream, StreamExt, Future };
use log::debug;
use serde::{ Deserialize, Serialize };
use std::error::Error as StdError;
use std::pin::Pin;
use std::sync::Arc;
use super::{ LlmConfig, LlmType };
use self::anthropic::AnthropicChatClient;
use self::gemini::GeminiChatClient;
use self::mock::MockChatClient;
use self::ollama::OllamaClient;
use self::openai::OpenAIChatClient;
use crate::models::chat::Role;
use crate::sse::LineDecoder;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

pub type BoxError = Box<dyn StdError + Send + Sync>;

/// Incremental provider output. Each item is a text fragment; an `Err` item
/// ends the stream.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<String, BoxError>> + Send>>;

const STREAM_CHANNEL_CAPACITY: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: Role,
    pub content: String,
}

impl PromptMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self { role, content: content.into() }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// A provider that streams answers for a prompt.
#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn stream_completion(&self, messages: &[PromptMessage]) -> Result<ChunkStream, BoxError>;

    fn get_model(&self) -> String;
    fn get_base_url(&self) -> Option<String>;
}

pub fn create_streaming_response<F, Fut>(response_fn: F) -> ChunkStream
    where
        F: FnOnce(mpsc::Sender<Result<String, BoxError>>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static
{
    let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);

    tokio::spawn(async move {
        response_fn(tx).await;
    });

    Box::pin(ReceiverStream::new(rx))
}

pub fn new_client(config: &LlmConfig) -> Result<Arc<dyn ChatClient>, BoxError> {
    let client: Arc<dyn ChatClient> = match config.llm_type {
        LlmType::Ollama => {
            let specific_client = OllamaClient::from_config(config)?;
            Arc::new(specific_client)
        }
        LlmType::OpenAI | LlmType::Groq | LlmType::XAI | LlmType::DeepSeek => {
            let specific_client = OpenAIChatClient::from_config(config)?;
            Arc::new(specific_client)
        }
        LlmType::Gemini => {
            let specific_client = GeminiChatClient::from_config(config)?;
            Arc::new(specific_client)
        }
        LlmType::Anthropic => {
            let specific_client = AnthropicChatClient::from_config(config)?;
            Arc::new(specific_client)
        }
        LlmType::Mock => Arc::new(MockChatClient::echo()),
    };
    Ok(client)
}

/// Outcome of parsing one line of a provider's streaming body.
#[derive(Debug, PartialEq, Eq)]
pub enum StreamLine {
    Token(String),
    Skip,
    Done,
    Failed(String),
}

/// Sends `request` and streams the body through `line_parser`, line by line.
///
/// The spawned task stops reading as soon as the receiving side is dropped,
/// which drops the response and closes the upstream connection.
pub fn http_stream_generate(
    request: reqwest::RequestBuilder,
    line_parser: fn(&str) -> StreamLine
) -> ChunkStream {
    create_streaming_response(move |tx| async move {
        let resp = tokio::select! {
            _ = tx.closed() => {
                debug!("Stream receiver dropped before the provider answered");
                return;
            }
            resp = request.send() => resp,
        };
        let resp = match resp {
            Ok(r) => r,
            Err(e) => {
                let _ = tx.send(Err(Box::new(e) as _)).await;
                return;
            }
        };

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let _ = tx.send(Err(provider_status_error(status, &body))).await;
            return;
        }

        let mut bytes = resp.bytes_stream();
        let mut decoder = LineDecoder::new();
        loop {
            let next = tokio::select! {
                _ = tx.closed() => {
                    debug!("Stream receiver dropped, releasing provider connection");
                    return;
                }
                next = bytes.next() => next,
            };
            match next {
                Some(Ok(buf)) => {
                    let lines = match decoder.push(&buf) {
                        Ok(lines) => lines,
                        Err(e) => {
                            let _ = tx.send(Err(Box::new(e) as _)).await;
                            return;
                        }
                    };
                    for line in lines {
                        if !forward_line(&tx, line_parser(&line)).await {
                            return;
                        }
                    }
                }
                Some(Err(e)) => {
                    let _ = tx.send(Err(Box::new(e) as _)).await;
                    return;
                }
                None => {
                    break;
                }
            }
        }

        if let Some(line) = decoder.finish() {
            forward_line(&tx, line_parser(&line)).await;
        }
    })
}

async fn forward_line(tx: &mpsc::Sender<Result<String, BoxError>>, parsed: StreamLine) -> bool {
    match parsed {
        StreamLine::Token(token) => tx.send(Ok(token)).await.is_ok(),
        StreamLine::Skip => true,
        StreamLine::Done => false,
        StreamLine::Failed(message) => {
            let _ = tx.send(Err(message.into())).await;
            false
        }
    }
}

/// Builds an error from a non-2xx provider response, preferring the
/// provider's own error message when the body carries one.
pub fn provider_status_error(status: reqwest::StatusCode, body: &str) -> BoxError {
    let detail = serde_json
        ::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| {
            value
                .pointer("/error/message")
                .or_else(|| value.get("error"))
                .or_else(|| value.get("message"))
                .and_then(|v| v.as_str())
                .map(str::to_owned)
        })
        .unwrap_or_else(|| body.trim().chars().take(200).collect());

    if detail.is_empty() {
        format!("Provider returned HTTP {}", status).into()
    } else {
        format!("Provider returned HTTP {}: {}", status, detail).into()
    }
}

/// Joins the leading system messages into a single instruction and returns it
/// with the remaining conversation, for providers that take the system prompt
/// out of band.
pub fn split_system(messages: &[PromptMessage]) -> (Option<String>, Vec<&PromptMessage>) {
    let system: Vec<&str> = messages
        .iter()
        .filter(|m| m.role == Role::System)
        .map(|m| m.content.as_str())
        .collect();
    let rest = messages
        .iter()
        .filter(|m| m.role != Role::System)
        .collect();
    let system = if system.is_empty() { None } else { Some(system.join("\n\n")) };
    (system, rest)
}
