use crate::cli::Args;
use crate::config::prompt;
use crate::llm::{ parse_llm_type, LlmConfig, LlmType };
use crate::llm::chat::{ new_client as new_chat_client, BoxError, ChatClient, ChunkStream, PromptMessage };
use crate::models::chat::{ Role, UiMessage };

use log::{ info, warn };
use std::sync::Arc;

/// Turns conversations into provider prompts and opens provider streams.
/// Shared read-only by every request.
#[derive(Clone)]
pub struct ChatAgent {
    chat_client: Arc<dyn ChatClient>,
    llm_type: LlmType,
    system_prompt: Option<String>,
}

impl ChatAgent {
    pub fn new(
        chat_client: Arc<dyn ChatClient>,
        llm_type: LlmType,
        system_prompt: Option<String>
    ) -> Self {
        let system_prompt = system_prompt.filter(|p| !p.trim().is_empty());
        Self { chat_client, llm_type, system_prompt }
    }

    pub fn from_args(args: &Args) -> Result<Self, BoxError> {
        let chat_config = Self::llm_config(args)?;
        let chat_client = new_chat_client(&chat_config)?;
        info!(
            "Chat client configured: Type={}, Model={}, BaseURL={}",
            chat_config.llm_type,
            chat_client.get_model(),
            chat_client.get_base_url().as_deref().unwrap_or("n/a")
        );

        let system_prompt = prompt::load_system_prompt(
            args.system_prompt.as_deref(),
            args.system_prompt_path.as_deref()
        )?;
        if let Some(p) = &system_prompt {
            info!("System prompt loaded ({} chars)", p.len());
        }

        Ok(Self::new(chat_client, chat_config.llm_type, system_prompt))
    }

    fn llm_config(args: &Args) -> Result<LlmConfig, BoxError> {
        let llm_type = parse_llm_type(&args.chat_llm_type)?;
        let api_key = if !args.chat_api_key.trim().is_empty() {
            Some(args.chat_api_key.clone())
        } else {
            let fallback = llm_type
                .api_key_env()
                .and_then(|var| std::env::var(var).ok())
                .filter(|k| !k.trim().is_empty());
            if fallback.is_none() && llm_type.api_key_env().is_some() {
                warn!("No API key configured for provider {}", llm_type);
            }
            fallback
        };

        Ok(LlmConfig {
            llm_type,
            api_key,
            completion_model: args.chat_model.clone(),
            base_url: args.chat_base_url.clone(),
            temperature: args.chat_temperature,
            max_tokens: args.chat_max_tokens,
        })
    }

    pub fn llm_type(&self) -> LlmType {
        self.llm_type
    }

    pub fn model(&self) -> String {
        self.chat_client.get_model()
    }

    /// Builds the provider prompt for a conversation: the configured system
    /// instruction first, then one message per UI message that carries text.
    pub fn build_prompt(&self, messages: &[UiMessage]) -> Vec<PromptMessage> {
        let mut prompt = Vec::with_capacity(messages.len() + 1);
        if let Some(system) = &self.system_prompt {
            prompt.push(PromptMessage::system(system.clone()));
        }
        prompt.extend(
            messages.iter().filter_map(|m| {
                let text = m.text();
                if text.trim().is_empty() {
                    None
                } else {
                    Some(PromptMessage::new(m.role, text))
                }
            })
        );
        prompt
    }

    pub async fn stream_chat(&self, messages: &[UiMessage]) -> Result<ChunkStream, BoxError> {
        let prompt = self.build_prompt(messages);
        if !prompt.iter().any(|m| m.role != Role::System) {
            return Err("Conversation contains no text to send".into());
        }
        self.chat_client.stream_completion(&prompt).await
    }

    pub async fn stream_prompt(&self, prompt: &str) -> Result<ChunkStream, BoxError> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &self.system_prompt {
            messages.push(PromptMessage::system(system.clone()));
        }
        messages.push(PromptMessage::user(prompt));
        self.chat_client.stream_completion(&messages).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::chat::mock::MockChatClient;
    use crate::models::chat::{ MessagePart, UiMessage };

    fn agent(system: Option<&str>) -> (ChatAgent, Arc<MockChatClient>) {
        let mock = Arc::new(MockChatClient::echo());
        let agent = ChatAgent::new(mock.clone(), LlmType::Mock, system.map(str::to_owned));
        (agent, mock)
    }

    #[test]
    fn prompt_starts_with_system_and_skips_textless_messages() {
        let (agent, _) = agent(Some("You are terse."));
        let history = vec![
            UiMessage::user("hi"),
            UiMessage::new(Role::Assistant, vec![MessagePart::StepStart]),
            UiMessage::new(
                Role::Assistant,
                vec![
                    MessagePart::Reasoning { text: "hidden".into(), state: None },
                    MessagePart::text("Hello!")
                ]
            )
        ];

        let prompt = agent.build_prompt(&history);
        assert_eq!(
            prompt,
            vec![
                PromptMessage::system("You are terse."),
                PromptMessage::user("hi"),
                PromptMessage::assistant("Hello!")
            ]
        );
    }

    #[test]
    fn blank_system_prompt_is_ignored() {
        let (agent, _) = agent(Some("   "));
        assert_eq!(agent.build_prompt(&[UiMessage::user("hi")]), vec![PromptMessage::user("hi")]);
    }

    #[tokio::test]
    async fn refuses_conversations_without_text() {
        let (agent, mock) = agent(Some("sys"));
        let empty = vec![UiMessage::new(Role::User, vec![])];
        assert!(agent.stream_chat(&empty).await.is_err());
        assert!(mock.received().is_empty());
    }

    #[tokio::test]
    async fn prompt_variant_wraps_single_user_turn() {
        let (agent, mock) = agent(Some("sys"));
        agent.stream_prompt("hello").await.unwrap();
        assert_eq!(
            mock.received(),
            vec![vec![PromptMessage::system("sys"), PromptMessage::user("hello")]]
        );
    }
}
