pub mod chat;
use serde::{ Deserialize, Serialize };
use std::str::FromStr;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmType {
    Ollama,
    OpenAI,
    Anthropic,
    Gemini,
    DeepSeek,
    XAI,
    Groq,
    Mock,
}

impl LlmType {
    /// Conventional environment variable holding the provider's API key.
    pub fn api_key_env(&self) -> Option<&'static str> {
        match self {
            LlmType::OpenAI => Some("OPENAI_API_KEY"),
            LlmType::Anthropic => Some("ANTHROPIC_API_KEY"),
            LlmType::Gemini => Some("GEMINI_API_KEY"),
            LlmType::DeepSeek => Some("DEEPSEEK_API_KEY"),
            LlmType::XAI => Some("XAI_API_KEY"),
            LlmType::Groq => Some("GROQ_API_KEY"),
            LlmType::Ollama | LlmType::Mock => None,
        }
    }
}

impl fmt::Display for LlmType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LlmType::Ollama => "ollama",
            LlmType::OpenAI => "openai",
            LlmType::Anthropic => "anthropic",
            LlmType::Gemini => "gemini",
            LlmType::DeepSeek => "deepseek",
            LlmType::XAI => "xai",
            LlmType::Groq => "groq",
            LlmType::Mock => "mock",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct ParseLlmTypeError {
    message: String,
}

impl fmt::Display for ParseLlmTypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ParseLlmTypeError {}
impl FromStr for LlmType {
    type Err = ParseLlmTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ollama" => Ok(LlmType::Ollama),
            "openai" => Ok(LlmType::OpenAI),
            "anthropic" => Ok(LlmType::Anthropic),
            "gemini" | "google" => Ok(LlmType::Gemini),
            "deepseek" => Ok(LlmType::DeepSeek),
            "xai" => Ok(LlmType::XAI),
            "groq" => Ok(LlmType::Groq),
            "mock" => Ok(LlmType::Mock),
            _ =>
                Err(ParseLlmTypeError {
                    message: format!("Invalid LLM type: '{}'", s),
                }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub llm_type: LlmType,
    pub api_key: Option<String>,
    pub completion_model: Option<String>,
    pub base_url: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            llm_type: LlmType::OpenAI,
            api_key: None,
            completion_model: None,
            base_url: None,
            temperature: None,
            max_tokens: None,
        }
    }
}

pub fn parse_llm_type(type_str: &str) -> Result<LlmType, String> {
    type_str.parse::<LlmType>().map_err(|_| format!("Unsupported LLM type: {}", type_str))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_provider_names() {
        assert_eq!(parse_llm_type("OpenAI").unwrap(), LlmType::OpenAI);
        assert_eq!(parse_llm_type(" anthropic ").unwrap(), LlmType::Anthropic);
        assert_eq!(parse_llm_type("google").unwrap(), LlmType::Gemini);
        assert_eq!(
            parse_llm_type("cohere").unwrap_err(),
            "Unsupported LLM type: cohere".to_string()
        );
    }
}
