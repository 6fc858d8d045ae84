//! Provider that needs no network: echoes the last user turn, or replays a
//! script. Selected with `CHAT_LLM_TYPE=mock` and used throughout the tests.

use async_trait::async_trait;
use std::sync::Mutex;
use std::time::Duration;

use super::{ create_streaming_response, BoxError, ChatClient, ChunkStream, PromptMessage };
use crate::models::chat::Role;

#[derive(Debug, Clone)]
pub enum MockStep {
    Chunk(String),
    Error(String),
    Delay(Duration),
}

#[derive(Debug)]
enum MockMode {
    Echo,
    Script(Vec<MockStep>),
    FailToStart(String),
}

#[derive(Debug)]
pub struct MockChatClient {
    mode: MockMode,
    seen: Mutex<Vec<Vec<PromptMessage>>>,
}

impl MockChatClient {
    pub fn echo() -> Self {
        Self::with_mode(MockMode::Echo)
    }

    pub fn scripted(steps: Vec<MockStep>) -> Self {
        Self::with_mode(MockMode::Script(steps))
    }

    /// Streams `chunks` in order and finishes.
    pub fn chunks<I, S>(chunks: I) -> Self where I: IntoIterator<Item = S>, S: Into<String> {
        Self::scripted(
            chunks
                .into_iter()
                .map(|c| MockStep::Chunk(c.into()))
                .collect()
        )
    }

    /// Fails before any output is produced.
    pub fn failing(message: impl Into<String>) -> Self {
        Self::with_mode(MockMode::FailToStart(message.into()))
    }

    fn with_mode(mode: MockMode) -> Self {
        Self { mode, seen: Mutex::new(Vec::new()) }
    }

    /// Every prompt this client received, in call order.
    pub fn received(&self) -> Vec<Vec<PromptMessage>> {
        self.seen
            .lock()
            .map(|seen| seen.clone())
            .unwrap_or_default()
    }

    fn record(&self, messages: &[PromptMessage]) {
        if let Ok(mut seen) = self.seen.lock() {
            seen.push(messages.to_vec());
        }
    }

    fn steps_for(&self, messages: &[PromptMessage]) -> Result<Vec<MockStep>, BoxError> {
        match &self.mode {
            MockMode::Echo => {
                let last = messages
                    .iter()
                    .rev()
                    .find(|m| m.role == Role::User)
                    .map(|m| m.content.as_str())
                    .unwrap_or_default();
                Ok(
                    last
                        .split_inclusive(' ')
                        .map(|word| MockStep::Chunk(word.to_string()))
                        .collect()
                )
            }
            MockMode::Script(steps) => Ok(steps.clone()),
            MockMode::FailToStart(message) => Err(message.clone().into()),
        }
    }
}

#[async_trait]
impl ChatClient for MockChatClient {
    async fn stream_completion(&self, messages: &[PromptMessage]) -> Result<ChunkStream, BoxError> {
        self.record(messages);
        let steps = self.steps_for(messages)?;
        Ok(
            create_streaming_response(move |tx| async move {
                for step in steps {
                    match step {
                        MockStep::Chunk(chunk) => {
                            if tx.send(Ok(chunk)).await.is_err() {
                                return;
                            }
                        }
                        MockStep::Error(message) => {
                            let _ = tx.send(Err(message.into())).await;
                            return;
                        }
                        MockStep::Delay(duration) => tokio::time::sleep(duration).await,
                    }
                }
            })
        )
    }

    fn get_model(&self) -> String {
        "mock".to_string()
    }

    fn get_base_url(&self) -> Option<String> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn echoes_last_user_turn_word_by_word() {
        let client = MockChatClient::echo();
        let messages = vec![PromptMessage::user("first"), PromptMessage::user("say it back")];
        let chunks: Vec<String> = client
            .stream_completion(&messages).await
            .unwrap()
            .map(|r| r.unwrap())
            .collect().await;

        assert_eq!(chunks, vec!["say ", "it ", "back"]);
        assert_eq!(client.received(), vec![messages]);
    }

    #[tokio::test]
    async fn script_errors_end_the_stream() {
        let client = MockChatClient::scripted(
            vec![
                MockStep::Chunk("a".into()),
                MockStep::Error("provider down".into()),
                MockStep::Chunk("never".into())
            ]
        );
        let items: Vec<Result<String, BoxError>> = client
            .stream_completion(&[PromptMessage::user("x")]).await
            .unwrap()
            .collect().await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[1].as_ref().unwrap_err().to_string(), "provider down");
    }
}
