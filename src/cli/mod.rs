pub mod chat;

use clap::{ Parser, Subcommand };

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Command>,

    // --- Chat LLM Provider Args ---
    /// Type of LLM provider for chat completion (openai, anthropic, ollama, gemini, groq, xai, deepseek, mock)
    #[arg(long, env = "CHAT_LLM_TYPE", default_value = "openai")]
    pub chat_llm_type: String,

    /// Base URL for the Chat LLM provider API (e.g., http://localhost:11434 for Ollama)
    #[arg(long, env = "CHAT_BASE_URL")] // No default, let adapters handle defaults if None
    pub chat_base_url: Option<String>,

    /// API Key for the Chat LLM provider. Falls back to the provider's usual variable (OPENAI_API_KEY, ...)
    #[arg(long, env = "CHAT_API_KEY", default_value = "", hide_env_values = true)]
    pub chat_api_key: String,

    /// Model name for chat completion (e.g., gpt-4o-mini, llama3.2, claude-3-5-haiku-latest)
    #[arg(long, env = "CHAT_MODEL")] // No default, rely on adapter defaults if None
    pub chat_model: Option<String>,

    /// Sampling temperature passed to the provider.
    #[arg(long, env = "CHAT_TEMPERATURE")]
    pub chat_temperature: Option<f32>,

    /// Upper bound on generated tokens per response.
    #[arg(long, env = "CHAT_MAX_TOKENS")]
    pub chat_max_tokens: Option<u32>,

    // --- Prompt Args ---
    /// Fixed system instruction prepended to every conversation.
    #[arg(long, env = "SYSTEM_PROMPT")]
    pub system_prompt: Option<String>,

    /// File holding the system instruction. Ignored when SYSTEM_PROMPT is set.
    #[arg(long, env = "SYSTEM_PROMPT_PATH")]
    pub system_prompt_path: Option<String>,

    /// Route text between <think> and </think> to reasoning parts.
    #[arg(long, env = "EXTRACT_REASONING", default_value = "true", action = clap::ArgAction::Set)]
    pub extract_reasoning: bool,

    /// Send provider error messages to clients instead of a generic error text.
    #[arg(long, env = "EXPOSE_PROVIDER_ERRORS", default_value = "false")]
    pub expose_provider_errors: bool,

    // --- Server Args ---
    /// Host address and port for the server to listen on.
    #[arg(long, env = "SERVER_ADDR", default_value = "127.0.0.1:3000")]
    pub server_addr: String,

    /// Optional API Key required for clients. If set, requests must send it as X-API-Key or a Bearer token.
    #[arg(long, env = "SERVER_API_KEY", hide_env_values = true)]
    pub server_api_key: Option<String>,

    /// Requests accepted per second across all clients. 0 disables rate limiting.
    #[arg(long, env = "RATE_LIMIT_PER_SECOND", default_value = "10")]
    pub rate_limit_per_second: u32,

    /// Optional path to the TLS certificate file (PEM format) for enabling HTTPS. Requires --tls-key-path.
    #[arg(long, env = "TLS_CERT_PATH")]
    pub tls_cert_path: Option<String>,

    /// Optional path to the TLS private key file (PEM format) for enabling HTTPS. Requires --tls-cert-path.
    #[arg(long, env = "TLS_KEY_PATH")]
    pub tls_key_path: Option<String>,

    #[arg(long, env = "ENABLE_TLS", default_value = "false")]
    pub enable_tls: bool,

    /// Enable debug logging/output
    #[arg(long, env = "DEBUG", default_value = "false")]
    pub debug: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the chat endpoint (default).
    Serve,

    /// Interactive chat against a running endpoint.
    Chat {
        /// Chat endpoint URL.
        #[arg(long, env = "CHAT_ENDPOINT", default_value = "http://127.0.0.1:3000/api/chat")]
        endpoint: String,
    },

    /// Stream a single completion for PROMPT to stdout.
    Complete {
        /// Completion endpoint URL.
        #[arg(
            long,
            env = "COMPLETION_ENDPOINT",
            default_value = "http://127.0.0.1:3000/api/completion"
        )]
        endpoint: String,

        prompt: String,
    },
}
