pub mod api;
pub mod error;
pub mod stream;
pub mod think;

use crate::agent::ChatAgent;
use crate::cli::Args;
use crate::llm::chat::BoxError;
use log::{ info, warn };
use std::net::SocketAddr;
use std::sync::Arc;

pub struct Server {
    addr: String,
    agent: Arc<ChatAgent>,
    args: Args,
}

impl Server {
    pub fn new(addr: String, agent: Arc<ChatAgent>, args: Args) -> Self {
        let has_api_key = args.server_api_key
            .as_deref()
            .is_some_and(|k| !k.trim().is_empty());
        if has_api_key {
            info!("Server configured with API Key authentication.");
        } else {
            warn!("Server configured WITHOUT API Key authentication. Endpoints are open.");
        }

        Self { addr, agent, args }
    }

    pub async fn run(&self) -> Result<(), BoxError> {
        let addr: SocketAddr = self.addr
            .parse()
            .map_err(|e| format!("Invalid server address '{}': {}", self.addr, e))?;
        let state = api::AppState::new(self.agent.clone(), &self.args);
        if state.limiter.is_none() {
            info!("Rate limiting disabled");
        }
        api::start_http_server(addr, state, &self.args).await
    }
}
