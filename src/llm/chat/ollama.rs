use reqwest::Client as HttpClient;
use serde::{ Deserialize, Serialize };
use async_trait::async_trait;
use super::{ http_stream_generate, BoxError, ChatClient, ChunkStream, PromptMessage, StreamLine };
use crate::llm::LlmConfig;
use log::{ debug, info };

#[derive(Debug)]
pub struct OllamaClient {
    http: HttpClient,
    base_url: String,
    completion_model: String,
    options: Option<OllamaOptions>,
}

#[derive(Serialize, Debug, Clone)]
struct OllamaOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<OllamaMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<OllamaOptions>,
}

#[derive(Serialize, Deserialize)]
struct OllamaMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct StreamResponse {
    #[serde(default)]
    message: Option<OllamaMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

pub(crate) fn parse_ollama_line(line: &str) -> StreamLine {
    let line = line.trim();
    if line.is_empty() {
        return StreamLine::Skip;
    }

    match serde_json::from_str::<StreamResponse>(line) {
        Ok(StreamResponse { error: Some(error), .. }) => StreamLine::Failed(error),
        Ok(stream_resp) => {
            let content = stream_resp.message.map(|m| m.content).unwrap_or_default();
            if !content.is_empty() {
                StreamLine::Token(content)
            } else if stream_resp.done {
                StreamLine::Done
            } else {
                StreamLine::Skip
            }
        }
        Err(e) => {
            debug!("JSON parse error: {} for line: {}", e, line);
            StreamLine::Skip
        }
    }
}

impl OllamaClient {
    pub fn new(base_url: Option<String>, completion_model: Option<String>) -> Self {
        let model = completion_model.unwrap_or_else(|| "llama3.2".to_string());
        let url = base_url.unwrap_or_else(|| "http://localhost:11434".into());

        Self {
            http: HttpClient::new(),
            base_url: url,
            completion_model: model,
            options: None,
        }
    }

    pub fn from_config(config: &LlmConfig) -> Result<Self, BoxError> {
        if config.llm_type != crate::llm::LlmType::Ollama {
            return Err("Invalid config type for OllamaClient".into());
        }

        let mut client = Self::new(config.base_url.clone(), config.completion_model.clone());
        if config.temperature.is_some() || config.max_tokens.is_some() {
            client.options = Some(OllamaOptions {
                temperature: config.temperature,
                num_predict: config.max_tokens,
            });
        }
        Ok(client)
    }

    fn build_request(&self, messages: &[PromptMessage]) -> ChatRequest<'_> {
        ChatRequest {
            model: &self.completion_model,
            messages: messages
                .iter()
                .map(|m| OllamaMessage {
                    role: m.role.to_string(),
                    content: m.content.clone(),
                })
                .collect(),
            stream: true,
            options: self.options.clone(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/api/chat", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl ChatClient for OllamaClient {
    async fn stream_completion(&self, messages: &[PromptMessage]) -> Result<ChunkStream, BoxError> {
        info!("ollama stream → model={} url={}", self.completion_model, self.endpoint());
        let req = self.build_request(messages);
        Ok(http_stream_generate(self.http.post(self.endpoint()).json(&req), parse_ollama_line))
    }

    fn get_model(&self) -> String {
        self.completion_model.clone()
    }

    fn get_base_url(&self) -> Option<String> {
        Some(self.base_url.clone())
    }
}
