//! Simple query interface for one-shot interactions

use crate::{
    errors::{Result, SdkError},
    transport::{SubprocessTransport, Transport, find_claude_cli},
    types::{ClaudeCodeOptions, Message},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Run a single prompt and collect every message the CLI prints
///
/// The prompt is passed on the command line, so the CLI answers once and
/// exits. The first error published while reading wins over a failure
/// reported by the shutdown.
///
/// # Example
///
/// ```rust,no_run
/// use bmad_claudecode::{ClaudeCodeOptions, Message, query};
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example() -> bmad_claudecode::Result<()> {
/// let cancel = CancellationToken::new();
/// let messages = query(&cancel, "What is 2 + 2?", ClaudeCodeOptions::default()).await?;
/// for msg in &messages {
///     if let Message::Assistant { .. } = msg {
///         println!("{}", msg.text());
///     }
/// }
/// # Ok(())
/// # }
/// ```
pub async fn query(
    cancel: &CancellationToken,
    prompt: impl Into<String>,
    options: ClaudeCodeOptions,
) -> Result<Vec<Message>> {
    if cancel.is_cancelled() {
        return Err(SdkError::Cancelled("query"));
    }

    options.validate()?;
    let cli_path = match &options.cli_path {
        Some(path) => path.clone(),
        None => find_claude_cli()?,
    };

    let transport = SubprocessTransport::with_prompt(cli_path, options, prompt);
    transport.connect(cancel).await?;
    let (messages, errors) = transport.receive_messages().await;

    let mut collected = Vec::new();
    let mut first_error = None;
    let mut errors_open = true;

    loop {
        tokio::select! {
            biased;
            err = errors.recv(), if errors_open => match err {
                Some(err) if first_error.is_none() => first_error = Some(err),
                Some(err) => debug!("Dropping additional error: {}", err),
                None => errors_open = false,
            },
            msg = messages.recv() => match msg {
                Some(msg) => collected.push(msg),
                None => break,
            },
        }
    }

    // the worker has exited; anything left on the error channel is final
    while errors_open {
        match errors.recv().await {
            Some(err) if first_error.is_none() => first_error = Some(err),
            Some(_) => {},
            None => errors_open = false,
        }
    }

    let closed = transport.close().await;
    if let Some(err) = first_error {
        if let Err(close_err) = closed {
            warn!("Failed to close transport after error: {}", close_err);
        }
        return Err(err);
    }
    if cancel.is_cancelled() {
        return Err(SdkError::Cancelled("query"));
    }
    closed?;

    debug!("Query finished with {} messages", collected.len());
    Ok(collected)
}
