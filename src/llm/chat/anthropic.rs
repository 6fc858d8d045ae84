use async_trait::async_trait;
use log::{ debug, info };
use reqwest::{ Client as HttpClient, header::{ HeaderMap, HeaderValue, CONTENT_TYPE } };
use serde::{ Deserialize, Serialize };

use super::{
    http_stream_generate,
    split_system,
    BoxError,
    ChatClient,
    ChunkStream,
    PromptMessage,
    StreamLine,
};
use crate::llm::LlmConfig;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;

pub struct AnthropicChatClient {
    http: HttpClient,
    model: String,
    base_url: String,
    temperature: Option<f32>,
    max_tokens: u32,
}

#[derive(Serialize)]
struct AnthropicMessage<'a> {
    role: String,
    content: &'a str,
}

#[derive(Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<AnthropicMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    stream: bool,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicEvent {
    ContentBlockDelta {
        delta: AnthropicDelta,
    },
    MessageStop,
    Error {
        error: AnthropicError,
    },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct AnthropicDelta {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct AnthropicError {
    message: String,
}

pub(crate) fn parse_anthropic_line(line: &str) -> StreamLine {
    let data = match crate::sse::data_field(line) {
        Some(data) if !data.trim().is_empty() => data,
        _ => {
            return StreamLine::Skip;
        }
    };

    match serde_json::from_str::<AnthropicEvent>(data) {
        Ok(AnthropicEvent::ContentBlockDelta { delta }) =>
            match delta.text {
                Some(text) if !text.is_empty() => StreamLine::Token(text),
                _ => StreamLine::Skip,
            }
        Ok(AnthropicEvent::MessageStop) => StreamLine::Done,
        Ok(AnthropicEvent::Error { error }) => StreamLine::Failed(error.message),
        Ok(AnthropicEvent::Other) => StreamLine::Skip,
        Err(e) => {
            debug!("JSON parse error: {} for data: {}", e, data);
            StreamLine::Skip
        }
    }
}

impl AnthropicChatClient {
    pub fn new(
        api_key: String,
        model: Option<String>,
        base_url: Option<String>,
        temperature: Option<f32>,
        max_tokens: Option<u32>
    ) -> Result<Self, BoxError> {
        let chat_model = model.unwrap_or_else(|| "claude-3-5-haiku-latest".to_string());
        let api_url = base_url.unwrap_or_else(|| "https://api.anthropic.com".to_string());

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert("anthropic-version", HeaderValue::from_static(ANTHROPIC_VERSION));
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(&api_key).map_err(|e| format!("Invalid API key format: {}", e))?
        );

        let http = HttpClient::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| Box::new(e) as BoxError)?;

        Ok(Self {
            http,
            model: chat_model,
            base_url: api_url,
            temperature,
            max_tokens: max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        })
    }

    pub fn from_config(config: &LlmConfig) -> Result<Self, BoxError> {
        let api_key = config.api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| "Anthropic API key is required".to_string())?;

        Self::new(
            api_key,
            config.completion_model.clone(),
            config.base_url.clone(),
            config.temperature,
            config.max_tokens
        )
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/messages", self.base_url.trim_end_matches('/'))
    }

    fn build_request<'a>(&'a self, messages: &'a [PromptMessage]) -> AnthropicRequest<'a> {
        let (system, rest) = split_system(messages);
        AnthropicRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            messages: rest
                .into_iter()
                .map(|m| AnthropicMessage {
                    role: m.role.to_string(),
                    content: &m.content,
                })
                .collect(),
            system,
            temperature: self.temperature,
            stream: true,
        }
    }
}

#[async_trait]
impl ChatClient for AnthropicChatClient {
    async fn stream_completion(&self, messages: &[PromptMessage]) -> Result<ChunkStream, BoxError> {
        info!("anthropic stream → model={} url={}", self.model, self.endpoint());
        let req = self.build_request(messages);
        let request = self.http.post(self.endpoint()).json(&req);
        Ok(http_stream_generate(request, parse_anthropic_line))
    }

    fn get_model(&self) -> String {
        self.model.clone()
    }

    fn get_base_url(&self) -> Option<String> {
        Some(self.base_url.clone())
    }
}
