//! Simple query example
//!
//! Runs one prompt through the one-shot `query` function and prints the
//! answer along with the run statistics.

use bmad_claudecode::{ClaudeCodeOptions, Message, Result, query};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("bmad_claudecode=debug,simple_query=info")
        .init();

    let cancel = CancellationToken::new();
    let options = ClaudeCodeOptions::builder()
        .system_prompt("You are a helpful coding assistant. Keep responses concise.")
        .max_turns(1)
        .build();

    let messages = query(&cancel, "Show me a hello world program in Rust", options).await?;

    for msg in &messages {
        match msg {
            Message::Assistant { .. } => println!("Assistant: {}", msg.text()),
            Message::System { subtype, .. } => println!("System: {subtype}"),
            Message::Result {
                duration_ms,
                total_cost_usd,
                ..
            } => {
                println!("\nQuery completed in {duration_ms}ms");
                if let Some(cost) = total_cost_usd {
                    println!("Cost: ${cost:.4}");
                }
            },
            Message::User { .. } => {},
        }
    }

    Ok(())
}
