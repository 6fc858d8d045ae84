use async_trait::async_trait;
use log::{ debug, info };
use reqwest::{ Client as HttpClient, header::{ HeaderMap, HeaderValue, CONTENT_TYPE, AUTHORIZATION } };
use serde::{ Deserialize, Serialize };

use super::{ http_stream_generate, BoxError, ChatClient, ChunkStream, PromptMessage, StreamLine };
use crate::llm::{ LlmConfig, LlmType };

/// Client for OpenAI's chat completions API and the providers that speak the
/// same protocol (Groq, xAI, DeepSeek).
pub struct OpenAIChatClient {
    http: HttpClient,
    provider: LlmType,
    model: String,
    base_url: String,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
}

#[derive(Serialize)]
struct OpenAIMessage {
    role: String,
    content: String,
}

#[derive(Serialize)]
struct OpenAIChatRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
}

#[derive(Deserialize)]
struct OpenAIStreamResponse {
    #[serde(default)]
    choices: Vec<OpenAIStreamChoice>,
}

#[derive(Deserialize)]
struct OpenAIStreamChoice {
    delta: OpenAIDelta,
}

#[derive(Deserialize)]
struct OpenAIDelta {
    content: Option<String>,
}

#[derive(Deserialize)]
struct OpenAIStreamError {
    error: OpenAIErrorBody,
}

#[derive(Deserialize)]
struct OpenAIErrorBody {
    message: String,
}

fn defaults_for(provider: LlmType) -> (&'static str, &'static str) {
    match provider {
        LlmType::Groq => ("https://api.groq.com/openai/v1", "llama-3.1-8b-instant"),
        LlmType::XAI => ("https://api.x.ai/v1", "grok-2-latest"),
        LlmType::DeepSeek => ("https://api.deepseek.com/v1", "deepseek-chat"),
        _ => ("https://api.openai.com/v1", "gpt-4o-mini"),
    }
}

pub(crate) fn parse_openai_line(line: &str) -> StreamLine {
    let data = match crate::sse::data_field(line) {
        Some(data) => data.trim(),
        None => {
            return StreamLine::Skip;
        }
    };
    if data.is_empty() {
        return StreamLine::Skip;
    }
    if data == "[DONE]" {
        return StreamLine::Done;
    }

    match serde_json::from_str::<OpenAIStreamResponse>(data) {
        Ok(stream_resp) => {
            let content: String = stream_resp.choices
                .into_iter()
                .filter_map(|choice| choice.delta.content)
                .collect();
            if content.is_empty() {
                StreamLine::Skip
            } else {
                StreamLine::Token(content)
            }
        }
        Err(e) => {
            if let Ok(err) = serde_json::from_str::<OpenAIStreamError>(data) {
                return StreamLine::Failed(err.error.message);
            }
            debug!("JSON parse error: {} for data: {}", e, data);
            StreamLine::Skip
        }
    }
}

impl OpenAIChatClient {
    pub fn new(
        provider: LlmType,
        api_key: String,
        model: Option<String>,
        base_url: Option<String>,
        temperature: Option<f32>,
        max_tokens: Option<u32>
    ) -> Result<Self, BoxError> {
        let (default_url, default_model) = defaults_for(provider);
        let chat_model = model.unwrap_or_else(|| default_model.to_string());
        let api_url = base_url.unwrap_or_else(|| default_url.to_string());
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", api_key)).map_err(|e|
                format!("Invalid API key format: {}", e)
            )?
        );

        let http = HttpClient::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| Box::new(e) as BoxError)?;

        Ok(Self {
            http,
            provider,
            model: chat_model,
            base_url: api_url,
            temperature,
            max_tokens,
        })
    }

    pub fn from_config(config: &LlmConfig) -> Result<Self, BoxError> {
        let api_key = config.api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| format!("{} API key is required", config.llm_type))?;

        Self::new(
            config.llm_type,
            api_key,
            config.completion_model.clone(),
            config.base_url.clone(),
            config.temperature,
            config.max_tokens
        )
    }

    fn endpoint(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        if base.ends_with("/chat/completions") {
            base.to_string()
        } else {
            format!("{}/chat/completions", base)
        }
    }

    fn build_request(&self, messages: &[PromptMessage]) -> OpenAIChatRequest {
        OpenAIChatRequest {
            model: self.model.clone(),
            messages: messages
                .iter()
                .map(|m| OpenAIMessage {
                    role: m.role.to_string(),
                    content: m.content.clone(),
                })
                .collect(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            stream: true,
        }
    }
}

#[async_trait]
impl ChatClient for OpenAIChatClient {
    async fn stream_completion(&self, messages: &[PromptMessage]) -> Result<ChunkStream, BoxError> {
        let url = self.endpoint();
        info!("{} stream → model={} url={}", self.provider, self.model, url);
        let req = self.build_request(messages);
        Ok(http_stream_generate(self.http.post(url).json(&req), parse_openai_line))
    }

    fn get_model(&self) -> String {
        self.model.clone()
    }

    fn get_base_url(&self) -> Option<String> {
        Some(self.base_url.clone())
    }
}
