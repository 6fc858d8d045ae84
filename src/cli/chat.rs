//! Terminal front end for a running relay.

use crate::client::{ Chat, ChatError, ChatEvent, Completion, HttpChatTransport };
use crate::llm::chat::BoxError;

use log::{ debug, info };
use std::future::Future;
use std::io::Write;
use std::sync::Arc;
use tokio::io::{ AsyncBufReadExt, BufReader };
use tokio::sync::broadcast::{ self, error::RecvError };

const DIM: &str = "\x1b[2m";
const RESET: &str = "\x1b[0m";

pub async fn run_chat(endpoint: &str, api_key: Option<String>) -> Result<(), BoxError> {
    let transport = Arc::new(HttpChatTransport::new(endpoint).with_api_key(api_key));
    let chat = Chat::new(transport);
    let mut events = chat.subscribe();
    info!("Chat {} connected to {}", chat.id(), endpoint);

    println!("Type a message and press Enter. Ctrl-C stops a response, /reload regenerates, /quit exits.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let result = match line.trim() {
            "" => {
                continue;
            }
            "/quit" | "/exit" => {
                break;
            }
            "/reload" => drive(&chat, &mut events, chat.reload()).await,
            text => drive(&chat, &mut events, chat.send_message(text)).await,
        };
        println!();

        if let Err(e) = result {
            eprintln!("error: {}", e);
        }
    }

    debug!("Chat {} closed with {} messages", chat.id(), chat.messages().await.len());
    Ok(())
}

/// Runs one request while echoing its deltas; Ctrl-C stops the response.
async fn drive<F>(chat: &Chat, events: &mut broadcast::Receiver<ChatEvent>, request: F) -> Result<(), ChatError>
    where F: Future<Output = Result<(), ChatError>>
{
    tokio::pin!(request);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut stopped = false;

    loop {
        tokio::select! {
            result = &mut request => {
                while let Ok(event) = events.try_recv() {
                    print_event(event);
                }
                return result;
            }
            event = events.recv() => {
                match event {
                    Ok(event) => print_event(event),
                    Err(RecvError::Lagged(skipped)) => debug!("Skipped {} chat events", skipped),
                    Err(RecvError::Closed) => {}
                }
            }
            _ = &mut ctrl_c, if !stopped => {
                stopped = true;
                chat.stop().await;
                print!("{} [stopped]{}", DIM, RESET);
            }
        }
    }
}

fn print_event(event: ChatEvent) {
    match event {
        ChatEvent::TextDelta { delta, .. } => print!("{}", delta),
        ChatEvent::ReasoningDelta { delta, .. } => print!("{}{}{}", DIM, delta, RESET),
        _ => {
            return;
        }
    }
    let _ = std::io::stdout().flush();
}

pub async fn run_complete(endpoint: &str, api_key: Option<String>, prompt: &str) -> Result<(), BoxError> {
    let completion = Completion::new(endpoint).with_api_key(api_key);

    let result = tokio::select! {
        result = completion.complete(prompt, |delta| {
            print!("{}", delta);
            let _ = std::io::stdout().flush();
        }) => result.map(|_| ()),
        _ = tokio::signal::ctrl_c() => {
            completion.stop().await;
            Ok(())
        }
    };
    println!();

    result.map_err(Into::into)
}
