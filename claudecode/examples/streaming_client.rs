//! Interactive client example
//!
//! Opens a scoped session, streams two prompts into it and interrupts the
//! turn on Ctrl-C.

use bmad_claudecode::{ClaudeCodeOptions, Message, Result, StreamMessage, with_client};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bmad_claudecode=info".into()),
        )
        .init();

    let cancel = CancellationToken::new();
    let options = ClaudeCodeOptions::builder()
        .model("sonnet")
        .allow_tool("Read")
        .build();

    with_client(&cancel, options, |client| async move {
        let cancel = CancellationToken::new();

        let prompts = vec![
            StreamMessage::user("List the files in this directory.", "demo"),
            StreamMessage::user("Now summarise the README in one line.", "demo"),
        ];
        client
            .query_stream(&cancel, futures::stream::iter(prompts))
            .await?;

        let interrupter = client.clone();
        let interrupt_cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                if let Err(e) = interrupter.interrupt(&interrupt_cancel).await {
                    eprintln!("Interrupt failed: {e}");
                }
            }
        });

        let mut results = 0;
        let mut response = client.receive_response().await;
        while results < 2 {
            let msg = response.next(&cancel).await?;
            match &msg {
                Message::Assistant { .. } => println!("Claude: {}", msg.text()),
                Message::Result { num_turns, .. } => {
                    results += 1;
                    println!("-- turn finished after {num_turns} turns");
                },
                _ => {},
            }
        }
        Ok(())
    })
    .await
}
