use async_trait::async_trait;
use log::{ debug, info };
use reqwest::Client as HttpClient;
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
use crate::models::chat::Role;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiStreamRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GeminiGenerationConfig>,
}

#[derive(Serialize)]
struct GeminiContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<GeminiPart>,
}

#[derive(Serialize)]
struct GeminiPart {
    text: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct GoogleChunk {
    #[serde(default)]
    candidates: Vec<GoogleCandidate>,
    #[serde(default)]
    error: Option<GoogleError>,
}

#[derive(Deserialize)]
struct GoogleCandidate {
    #[serde(default)]
    content: Option<GoogleContent>,
}

#[derive(Deserialize)]
struct GoogleContent {
    #[serde(default)]
    parts: Vec<GooglePart>,
}

#[derive(Deserialize)]
struct GooglePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct GoogleError {
    message: String,
}

pub(crate) fn parse_gemini_line(line: &str) -> StreamLine {
    let data = match crate::sse::data_field(line) {
        Some(data) if !data.trim().is_empty() => data,
        _ => {
            return StreamLine::Skip;
        }
    };

    match serde_json::from_str::<GoogleChunk>(data) {
        Ok(GoogleChunk { error: Some(error), .. }) => StreamLine::Failed(error.message),
        Ok(chunk) => {
            let text: String = chunk.candidates
                .into_iter()
                .take(1)
                .filter_map(|c| c.content)
                .flat_map(|c| c.parts)
                .filter_map(|p| p.text)
                .collect();
            if text.is_empty() {
                StreamLine::Skip
            } else {
                StreamLine::Token(text)
            }
        }
        Err(e) => {
            debug!("JSON parse error: {} for data: {}", e, data);
            StreamLine::Skip
        }
    }
}

pub struct GeminiChatClient {
    http: HttpClient,
    api_key: String,
    model: String,
    base_url: String,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
}

impl GeminiChatClient {
    pub fn new(
        api_key: String,
        model: Option<String>,
        base_url: Option<String>,
        max_tokens: Option<u32>,
        temperature: Option<f32>
    ) -> Self {
        let chat_model = model.unwrap_or_else(|| "gemini-1.5-flash-latest".to_string());
        let api_url = base_url.unwrap_or_else(||
            "https://generativelanguage.googleapis.com/v1beta".to_string()
        );

        Self {
            http: HttpClient::new(),
            api_key,
            model: chat_model,
            base_url: api_url,
            temperature,
            max_tokens,
        }
    }

    pub fn from_config(config: &LlmConfig) -> Result<Self, BoxError> {
        let api_key = config.api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| "Google API key is required for GeminiChatClient".to_string())?;

        Ok(
            Self::new(
                api_key,
                config.completion_model.clone(),
                config.base_url.clone(),
                config.max_tokens,
                config.temperature
            )
        )
    }

    fn stream_endpoint(&self) -> String {
        format!(
            "{}/models/{}:streamGenerateContent?alt=sse",
            self.base_url.trim_end_matches('/'),
            self.model
        )
    }

    fn build_stream_request(&self, messages: &[PromptMessage]) -> GeminiStreamRequest {
        let (system, rest) = split_system(messages);
        let contents = rest
            .into_iter()
            .map(|m| GeminiContent {
                role: Some(if m.role == Role::Assistant { "model" } else { "user" }),
                parts: vec![GeminiPart { text: m.content.clone() }],
            })
            .collect();
        let generation_config = if self.temperature.is_some() || self.max_tokens.is_some() {
            Some(GeminiGenerationConfig {
                temperature: self.temperature,
                max_output_tokens: self.max_tokens,
            })
        } else {
            None
        };

        GeminiStreamRequest {
            contents,
            system_instruction: system.map(|text| GeminiContent {
                role: None,
                parts: vec![GeminiPart { text }],
            }),
            generation_config,
        }
    }
}

#[async_trait]
impl ChatClient for GeminiChatClient {
    async fn stream_completion(&self, messages: &[PromptMessage]) -> Result<ChunkStream, BoxError> {
        info!("GeminiChatClient::stream_completion() → model={} url={}", self.model, self.stream_endpoint());
        let payload = self.build_stream_request(messages);
        let request = self.http
            .post(self.stream_endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&payload);
        Ok(http_stream_generate(request, parse_gemini_line))
    }

    fn get_model(&self) -> String {
        self.model.clone()
    }

    fn get_base_url(&self) -> Option<String> {
        Some(self.base_url.clone())
    }
}
