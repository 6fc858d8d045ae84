use async_stream::stream;
use async_trait::async_trait;
use futures::{ Stream, StreamExt };
use log::debug;
use std::pin::Pin;

use super::ChatError;
use crate::models::chat::ChatRequest;
use crate::models::stream::{ StreamFrame, UiMessageChunk };
use crate::sse::{ data_field, LineDecoder };

pub type ChunkEvents = Pin<Box<dyn Stream<Item = Result<UiMessageChunk, ChatError>> + Send>>;

/// Delivers a chat request and yields the decoded response chunks.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn send(&self, request: ChatRequest) -> Result<ChunkEvents, ChatError>;
}

#[derive(Debug, Clone)]
pub struct HttpChatTransport {
    http: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpChatTransport {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self { http: reqwest::Client::new(), endpoint: endpoint.into(), api_key: None }
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key.filter(|k| !k.trim().is_empty());
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl ChatTransport for HttpChatTransport {
    async fn send(&self, request: ChatRequest) -> Result<ChunkEvents, ChatError> {
        let response = post_json(&self.http, &self.endpoint, self.api_key.as_deref(), &request).await?;
        Ok(decode_ui_message_stream(response))
    }
}

/// POSTs `body` and turns transport failures and non-2xx statuses into
/// `ChatError`s.
pub(crate) async fn post_json<T: serde::Serialize + ?Sized>(
    http: &reqwest::Client,
    endpoint: &str,
    api_key: Option<&str>,
    body: &T
) -> Result<reqwest::Response, ChatError> {
    let mut builder = http.post(endpoint).json(body);
    if let Some(key) = api_key {
        builder = builder.header("X-API-Key", key);
    }

    let response = builder.send().await.map_err(|e| ChatError::Transport(e.to_string()))?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ChatError::Http { status: status.as_u16(), body });
    }
    Ok(response)
}

fn decode_ui_message_stream(response: reqwest::Response) -> ChunkEvents {
    Box::pin(stream! {
        let mut bytes = response.bytes_stream();
        let mut decoder = LineDecoder::new();
        let mut at_eof = false;

        while !at_eof {
            let lines = match bytes.next().await {
                Some(Ok(chunk)) => match decoder.push(&chunk) {
                    Ok(lines) => lines,
                    Err(e) => {
                        yield Err(ChatError::Decode(e.to_string()));
                        return;
                    }
                },
                Some(Err(e)) => {
                    yield Err(ChatError::Transport(e.to_string()));
                    return;
                }
                None => {
                    at_eof = true;
                    decoder.finish().into_iter().collect()
                }
            };

            for line in lines {
                let Some(data) = data_field(&line) else {
                    continue;
                };
                match decode_frame(data) {
                    Ok(Some(StreamFrame::Done)) => return,
                    Ok(Some(StreamFrame::Chunk(chunk))) => yield Ok(chunk),
                    Ok(None) => debug!("Skipping unrecognised stream chunk: {}", data),
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                }
            }
        }
    })
}

/// Chunk types this client does not model (tool calls, sources, custom data)
/// are skipped rather than treated as corruption.
fn decode_frame(data: &str) -> Result<Option<StreamFrame>, ChatError> {
    match StreamFrame::parse(data) {
        Ok(frame) => Ok(Some(frame)),
        Err(e) => {
            let typed = serde_json::from_str::<serde_json::Value>(data)
                .ok()
                .is_some_and(|v| v.get("type").is_some_and(|t| t.is_string()));
            if typed {
                Ok(None)
            } else {
                Err(ChatError::Decode(e.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::chat::{ RequestTrigger, UiMessage };
    use wiremock::matchers::{ body_partial_json, header, method, path };
    use wiremock::{ Mock, MockServer, ResponseTemplate };

    fn request() -> ChatRequest {
        ChatRequest {
            id: Some("chat-1".into()),
            messages: vec![UiMessage::user("hi")],
            trigger: Some(RequestTrigger::SubmitMessage),
            message_id: None,
        }
    }

    #[test]
    fn skips_unknown_chunk_types_but_rejects_garbage() {
        assert_eq!(decode_frame(r#"{"type":"tool-input-start","toolCallId":"t"}"#).unwrap(), None);
        assert_eq!(
            decode_frame(r#"{"type":"finish"}"#).unwrap(),
            Some(StreamFrame::Chunk(UiMessageChunk::Finish))
        );
        assert!(matches!(decode_frame("not json"), Err(ChatError::Decode(_))));
    }

    #[tokio::test]
    async fn decodes_sse_chunks_until_done() {
        let server = MockServer::start().await;
        let body = concat!(
            "data: {\"type\":\"start\",\"messageId\":\"m1\"}\n\n",
            ": keep-alive\n\n",
            "data: {\"type\":\"text-start\",\"id\":\"text-0\"}\n\n",
            "data: {\"type\":\"text-delta\",\"id\":\"text-0\",\"delta\":\"Hi\"}\n\n",
            "data: {\"type\":\"data-weather\",\"data\":{}}\n\n",
            "data: [DONE]\n\n",
            "data: {\"type\":\"finish\"}\n\n"
        );
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .and(header("X-API-Key", "k"))
            .and(body_partial_json(serde_json::json!({ "id": "chat-1", "trigger": "submit-message" })))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .mount(&server).await;

        let transport = HttpChatTransport::new(format!("{}/api/chat", server.uri())).with_api_key(
            Some("k".into())
        );
        let chunks: Vec<UiMessageChunk> = transport
            .send(request()).await
            .unwrap()
            .map(|c| c.unwrap())
            .collect().await;

        assert_eq!(
            chunks,
            vec![
                UiMessageChunk::Start { message_id: Some("m1".into()) },
                UiMessageChunk::TextStart { id: "text-0".into() },
                UiMessageChunk::TextDelta { id: "text-0".into(), delta: "Hi".into() }
            ]
        );
    }

    #[tokio::test]
    async fn surfaces_http_errors_with_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("{\"error\":\"Invalid or missing API key\"}"))
            .mount(&server).await;

        let transport = HttpChatTransport::new(server.uri());
        match transport.send(request()).await {
            Err(ChatError::Http { status, body }) => {
                assert_eq!(status, 401);
                assert!(body.contains("API key"));
            }
            Err(other) => panic!("unexpected error: {:?}", other),
            Ok(_) => panic!("expected an HTTP error"),
        }
    }

    #[tokio::test]
    async fn rejects_an_endless_event_line() {
        let server = MockServer::start().await;
        let body = format!("data: {}", "x".repeat(crate::sse::MAX_LINE_BYTES));
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .mount(&server).await;

        let transport = HttpChatTransport::new(server.uri());
        let items: Vec<Result<UiMessageChunk, ChatError>> = transport
            .send(request()).await
            .unwrap()
            .collect().await;

        assert_eq!(items.len(), 1);
        assert!(matches!(&items[0], Err(ChatError::Decode(msg)) if msg.contains("exceeds")));
    }
}
