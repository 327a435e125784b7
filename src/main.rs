//! Interactive command-line interface for the Ops Assistant.
//!
//! Reads questions from stdin, drives the conversation engine, and prints
//! the event stream live: reasoning tokens dimmed onto stderr-adjacent
//! prose, executed queries as single lines, and the final answer.

use std::io::Write;
use std::sync::Arc;

use anyhow::Context;

use lumo_ops::chat::{ChatEngine, ChatEvent, MemoryStore};
use lumo_ops::gate::SafeQueryGate;
use lumo_ops::inference::{config, OpenAiClient};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    lumo_ops::init_tracing();

    let cwd = std::env::current_dir().context("failed to resolve working directory")?;
    let app_config = config::load_or_default(&cwd).context("failed to load configuration")?;

    let gate = SafeQueryGate::open(&app_config.database.path)
        .with_context(|| format!("failed to open database at {}", app_config.database.path))?;
    let client =
        OpenAiClient::new(app_config.model.clone()).context("failed to build model client")?;

    let engine = ChatEngine::new(
        Arc::new(client),
        Arc::new(gate),
        Arc::new(MemoryStore::new()),
        app_config.model,
    );

    println!("Ops Assistant (type 'quit' or 'exit' to stop)");
    println!("{}", "-".repeat(48));

    let stdin = std::io::stdin();
    let mut conversation_id: Option<String> = None;

    loop {
        print!("\nYou: ");
        std::io::stdout().flush()?;

        let mut line = String::new();
        if stdin.read_line(&mut line)? == 0 {
            println!("\nGoodbye!");
            break;
        }
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input.eq_ignore_ascii_case("quit") || input.eq_ignore_ascii_case("exit") {
            println!("Goodbye!");
            break;
        }

        let mut rx = engine.process_message_stream(input.to_string(), conversation_id.clone());
        let mut answer_started = false;

        while let Some(event) = rx.recv().await {
            match event {
                ChatEvent::Status { status } => {
                    println!("\n[{status}]");
                }
                ChatEvent::ReasoningToken { token } => {
                    print!("{token}");
                    std::io::stdout().flush()?;
                }
                ChatEvent::Reasoning { .. } => {
                    // Full planning text was already streamed token by token.
                    println!();
                }
                ChatEvent::ToolCall { query } => {
                    println!("Executed Query: {query}");
                }
                ChatEvent::ToolResult { success, .. } => {
                    if !success {
                        println!("Query failed; the assistant will retry.");
                    }
                }
                ChatEvent::Token { token } => {
                    if !answer_started {
                        print!("\nAssistant: ");
                        answer_started = true;
                    }
                    print!("{token}");
                    std::io::stdout().flush()?;
                }
                ChatEvent::Done {
                    conversation_id: id,
                    response,
                } => {
                    if !answer_started {
                        print!("\nAssistant: {response}");
                    }
                    println!();
                    conversation_id = Some(id);
                }
                ChatEvent::Error { message } => {
                    println!("\nError: {message}");
                }
            }
        }
    }

    Ok(())
}
