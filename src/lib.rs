pub mod agent;
pub mod cli;
pub mod client;
pub mod config;
pub mod llm;
pub mod models;
pub mod server;
pub mod sse;

use agent::ChatAgent;
use cli::{ Args, Command };
use llm::chat::BoxError;
use log::info;
use server::Server;
use std::sync::Arc;

/// Entry point shared by the binary: serves the endpoints or runs one of the
/// terminal clients, depending on the subcommand.
pub async fn run(args: Args) -> Result<(), BoxError> {
    match args.command.clone() {
        Some(Command::Chat { endpoint }) => cli::chat::run_chat(&endpoint, args.server_api_key.clone()).await,
        Some(Command::Complete { endpoint, prompt }) => {
            cli::chat::run_complete(&endpoint, args.server_api_key.clone(), &prompt).await
        }
        Some(Command::Serve) | None => serve(args).await,
    }
}

async fn serve(args: Args) -> Result<(), BoxError> {
    info!("--- Core Configuration ---");
    info!("Server Address: {}", args.server_addr);
    info!("Chat LLM Type: {}", args.chat_llm_type);
    info!("Chat Model: {}", args.chat_model.as_deref().unwrap_or("(provider default)"));
    info!("Reasoning Extraction: {}", args.extract_reasoning);
    info!("Expose Provider Errors: {}", args.expose_provider_errors);
    info!("Rate Limit (req/s): {}", args.rate_limit_per_second);
    info!("TLS Enabled: {}", args.enable_tls);
    info!("-------------------------");

    let agent = Arc::new(ChatAgent::from_args(&args)?);
    let addr = args.server_addr.clone();
    info!("Starting server on: {}", addr);
    let server = Server::new(addr, agent, args);
    server.run().await
}
