use chat_relay::cli::Args;
use chat_relay::llm::chat::BoxError;
use clap::Parser;
use dotenv::dotenv;
use env_logger::Env;

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    dotenv().ok();
    let args = Args::parse();

    let default_filter = if args.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(default_filter)).init();

    chat_relay::run(args).await
}
