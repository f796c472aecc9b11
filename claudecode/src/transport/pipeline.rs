//! Stdout processing pipeline
//!
//! Every line the CLI prints on stdout runs through a chain of handlers:
//!
//! 1. [`EmptyLineFilter`] drops blank lines
//! 2. [`LineParser`] turns the line into messages or an error
//! 3. [`ErrorDispatcher`] publishes a parse error and ends the line
//! 4. [`MessageDispatcher`] publishes the messages in order
//!
//! Publishing always races the transport's `done` token so a full channel
//! can never keep the worker alive after shutdown starts.

use crate::{
    channel::CHANNEL_BUFFER_SIZE,
    errors::SdkError,
    message_parser::{MAX_BUFFER_SIZE, MessageParser},
    types::Message,
};
use async_trait::async_trait;
use futures::StreamExt;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio_util::codec::{AnyDelimiterCodec, AnyDelimiterCodecError, FramedRead};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Longest stdout line the worker accepts
pub const MAX_LINE_LENGTH: usize = MAX_BUFFER_SIZE;

/// Per-line state handed down the chain
#[derive(Debug)]
pub struct ProcessContext {
    /// Raw line without its terminator
    pub line: String,
    /// Messages produced from the line
    pub messages: Vec<Message>,
    /// Failure produced from the line
    pub error: Option<SdkError>,
    /// Decode failure of an earlier partial object that this line abandoned
    pub abandoned: Option<SdkError>,
}

impl ProcessContext {
    /// Fresh context for one line
    pub fn new(line: impl Into<String>) -> Self {
        Self {
            line: line.into(),
            messages: Vec::new(),
            error: None,
            abandoned: None,
        }
    }
}

/// Sending halves of the transport channels plus the `done` token
#[derive(Debug, Clone)]
pub struct ChannelSink {
    messages: mpsc::Sender<Message>,
    errors: mpsc::Sender<SdkError>,
    done: CancellationToken,
}

impl ChannelSink {
    /// Wrap the senders
    pub fn new(
        messages: mpsc::Sender<Message>,
        errors: mpsc::Sender<SdkError>,
        done: CancellationToken,
    ) -> Self {
        Self {
            messages,
            errors,
            done,
        }
    }

    /// Publish a message, `false` once `done` fires or nobody listens
    pub async fn send_message(&self, message: Message) -> bool {
        tokio::select! {
            biased;
            _ = self.done.cancelled() => false,
            sent = self.messages.send(message) => sent.is_ok(),
        }
    }

    /// Publish an error, `false` once `done` fires or nobody listens
    pub async fn send_error(&self, error: SdkError) -> bool {
        tokio::select! {
            biased;
            _ = self.done.cancelled() => false,
            sent = self.errors.send(error) => sent.is_ok(),
        }
    }

    /// Token that stops the worker
    pub fn done(&self) -> &CancellationToken {
        &self.done
    }
}

/// One link of the stdout chain
#[async_trait]
pub trait StdoutHandler: Send {
    /// Attach the handler that runs after this one
    fn set_next(&mut self, next: Box<dyn StdoutHandler>);

    /// Process a line, `false` tells the worker to stop
    async fn handle(&mut self, ctx: &mut ProcessContext, sink: &ChannelSink) -> bool;
}

async fn delegate(
    next: &mut Option<Box<dyn StdoutHandler>>,
    ctx: &mut ProcessContext,
    sink: &ChannelSink,
) -> bool {
    match next {
        Some(next) => next.handle(ctx, sink).await,
        None => true,
    }
}

/// Drops empty and whitespace-only lines
#[derive(Default)]
pub struct EmptyLineFilter {
    next: Option<Box<dyn StdoutHandler>>,
}

#[async_trait]
impl StdoutHandler for EmptyLineFilter {
    fn set_next(&mut self, next: Box<dyn StdoutHandler>) {
        self.next = Some(next);
    }

    async fn handle(&mut self, ctx: &mut ProcessContext, sink: &ChannelSink) -> bool {
        if ctx.line.trim().is_empty() {
            return true;
        }
        delegate(&mut self.next, ctx, sink).await
    }
}

/// Runs the message parser over the line
#[derive(Default)]
pub struct LineParser {
    parser: MessageParser,
    next: Option<Box<dyn StdoutHandler>>,
}

impl LineParser {
    /// Use a specific parser
    pub fn with_parser(parser: MessageParser) -> Self {
        Self { parser, next: None }
    }
}

#[async_trait]
impl StdoutHandler for LineParser {
    fn set_next(&mut self, next: Box<dyn StdoutHandler>) {
        self.next = Some(next);
    }

    async fn handle(&mut self, ctx: &mut ProcessContext, sink: &ChannelSink) -> bool {
        match self.parser.process_line(&ctx.line) {
            Ok(messages) => ctx.messages = messages,
            Err(e) => ctx.error = Some(e),
        }
        ctx.abandoned = self.parser.take_abandoned();
        delegate(&mut self.next, ctx, sink).await
    }
}

/// Publishes the line's error, if any, and ends processing of the line
///
/// An abandoned partial object is reported first; it never stops the line.
#[derive(Default)]
pub struct ErrorDispatcher {
    next: Option<Box<dyn StdoutHandler>>,
}

#[async_trait]
impl StdoutHandler for ErrorDispatcher {
    fn set_next(&mut self, next: Box<dyn StdoutHandler>) {
        self.next = Some(next);
    }

    async fn handle(&mut self, ctx: &mut ProcessContext, sink: &ChannelSink) -> bool {
        if let Some(error) = ctx.abandoned.take() {
            warn!("Dropping incomplete stdout object: {}", error);
            if !sink.send_error(error).await {
                return false;
            }
        }
        if let Some(error) = ctx.error.take() {
            warn!("Failed to process stdout line: {}", error);
            return sink.send_error(error).await;
        }
        delegate(&mut self.next, ctx, sink).await
    }
}

/// Publishes the line's messages in order
#[derive(Default)]
pub struct MessageDispatcher {
    next: Option<Box<dyn StdoutHandler>>,
}

#[async_trait]
impl StdoutHandler for MessageDispatcher {
    fn set_next(&mut self, next: Box<dyn StdoutHandler>) {
        self.next = Some(next);
    }

    async fn handle(&mut self, ctx: &mut ProcessContext, sink: &ChannelSink) -> bool {
        for message in ctx.messages.drain(..) {
            trace!("Dispatching {} message", message.kind());
            if !sink.send_message(message).await {
                return false;
            }
        }
        delegate(&mut self.next, ctx, sink).await
    }
}

/// Assemble the standard handler chain
pub fn default_chain() -> Box<dyn StdoutHandler> {
    chain_with_parser(MessageParser::new())
}

fn chain_with_parser(parser: MessageParser) -> Box<dyn StdoutHandler> {
    let mut errors = ErrorDispatcher::default();
    errors.set_next(Box::new(MessageDispatcher::default()));

    let mut parse = LineParser::with_parser(parser);
    parse.set_next(Box::new(errors));

    let mut filter = EmptyLineFilter::default();
    filter.set_next(Box::new(parse));

    Box::new(filter)
}

/// Create the message and error senders for a connection
pub(crate) fn sink_channels(
    done: CancellationToken,
) -> (ChannelSink, mpsc::Receiver<Message>, mpsc::Receiver<SdkError>) {
    let (msg_tx, msg_rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);
    let (err_tx, err_rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);
    (ChannelSink::new(msg_tx, err_tx, done), msg_rx, err_rx)
}

/// Read stdout until EOF, a fatal read error, or `done`
///
/// The sink is consumed; dropping it at the end closes both channels.
pub async fn run_stdout_worker<R>(stdout: R, sink: ChannelSink)
where
    R: AsyncRead + Unpin + Send,
{
    run_stdout_worker_with_limit(stdout, default_chain(), sink, MAX_LINE_LENGTH).await
}

/// [`run_stdout_worker`] with an explicit chain and line limit
pub async fn run_stdout_worker_with_limit<R>(
    stdout: R,
    mut chain: Box<dyn StdoutHandler>,
    sink: ChannelSink,
    max_line_length: usize,
) where
    R: AsyncRead + Unpin + Send,
{
    debug!("Stdout worker started");
    let codec = AnyDelimiterCodec::new_with_max_length(b"\n".to_vec(), Vec::new(), max_line_length);
    let mut lines = FramedRead::new(stdout, codec);

    loop {
        let next = tokio::select! {
            biased;
            _ = sink.done().cancelled() => {
                debug!("Stdout worker stopping: done");
                break;
            }
            next = lines.next() => next,
        };

        match next {
            Some(Ok(raw)) => {
                trace!("Claude output line ({} bytes)", raw.len());
                // invalid UTF-8 is replaced, so a bad line only fails its own decode
                let mut ctx = ProcessContext::new(String::from_utf8_lossy(&raw));
                if !chain.handle(&mut ctx, &sink).await {
                    debug!("Stdout worker stopping: channel send aborted");
                    break;
                }
            },
            Some(Err(AnyDelimiterCodecError::MaxChunkLengthExceeded)) => {
                warn!("Stdout line exceeded {} bytes", max_line_length);
                sink.send_error(SdkError::BufferOverflow {
                    limit: max_line_length,
                })
                .await;
                break;
            },
            Some(Err(AnyDelimiterCodecError::Io(e))) => {
                warn!("Failed to read stdout: {}", e);
                sink.send_error(SdkError::StdoutScannerFailed(e)).await;
                break;
            },
            None => {
                debug!("Stdout reached EOF");
                break;
            },
        }
    }

    debug!("Stdout worker ended");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Inbound;
    use std::io::Cursor;

    fn sink() -> (ChannelSink, Inbound<Message>, Inbound<SdkError>) {
        let (sink, msg_rx, err_rx) = sink_channels(CancellationToken::new());
        (sink, Inbound::new(msg_rx), Inbound::new(err_rx))
    }

    async fn drain<T>(inbound: &Inbound<T>) -> Vec<T> {
        let mut items = Vec::new();
        while let Some(item) = inbound.recv().await {
            items.push(item);
        }
        items
    }

    #[tokio::test]
    async fn test_empty_lines_are_dropped() {
        let (sink, messages, errors) = sink();
        let mut chain = default_chain();

        let mut ctx = ProcessContext::new("   ");
        assert!(chain.handle(&mut ctx, &sink).await);
        drop(sink);

        assert!(drain(&messages).await.is_empty());
        assert!(drain(&errors).await.is_empty());
    }

    #[tokio::test]
    async fn test_parse_error_then_message() {
        let (sink, messages, errors) = sink();
        let stdout = Cursor::new(b"\nNOT JSON\n{\"type\":\"system\",\"subtype\":\"ok\"}\n".to_vec());

        run_stdout_worker(stdout, sink).await;

        let errors = drain(&errors).await;
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], SdkError::JsonDecodeError { .. }));

        let messages = drain(&messages).await;
        assert_eq!(messages.len(), 1);
        assert!(matches!(&messages[0], Message::System { subtype, .. } if subtype == "ok"));
    }

    #[tokio::test]
    async fn test_invalid_utf8_line_keeps_scanning() {
        let (sink, messages, errors) = sink();
        let stdout = Cursor::new(b"\xff\xfe garbage\n{\"type\":\"system\",\"subtype\":\"after\"}\n".to_vec());

        run_stdout_worker(stdout, sink).await;

        let errors = drain(&errors).await;
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], SdkError::JsonDecodeError { .. }));

        let messages = drain(&messages).await;
        assert!(matches!(
            messages.as_slice(),
            [Message::System { subtype, .. }] if subtype == "after"
        ));
    }

    #[tokio::test]
    async fn test_unterminated_object_does_not_swallow_next_line() {
        let (sink, messages, errors) = sink();
        let stdout = Cursor::new(
            b"{\"type\":\"system\",\"subtype\":\"x\",\n{\"type\":\"system\",\"subtype\":\"after\"}\n"
                .to_vec(),
        );

        run_stdout_worker(stdout, sink).await;

        let errors = drain(&errors).await;
        assert_eq!(errors.len(), 1);
        assert!(matches!(
            &errors[0],
            SdkError::JsonDecodeError { line, .. } if line.ends_with("\"x\",")
        ));

        let messages = drain(&messages).await;
        assert!(matches!(
            messages.as_slice(),
            [Message::System { subtype, .. }] if subtype == "after"
        ));
    }

    #[tokio::test]
    async fn test_order_preserved() {
        let (sink, messages, _errors) = sink();
        let mut input = String::new();
        for i in 0..8 {
            input.push_str(&format!("{{\"type\":\"system\",\"subtype\":\"s{i}\"}}\n"));
        }

        let reader = tokio::spawn(async move { drain(&messages).await });
        run_stdout_worker(Cursor::new(input.into_bytes()), sink).await;

        let subtypes: Vec<String> = reader
            .await
            .unwrap()
            .into_iter()
            .map(|m| match m {
                Message::System { subtype, .. } => subtype,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(
            subtypes,
            (0..8).map(|i| format!("s{i}")).collect::<Vec<_>>()
        );
    }

    #[tokio::test]
    async fn test_overlong_line_is_buffer_overflow() {
        let (sink, messages, errors) = sink();
        let long = format!("{{\"type\":\"system\",\"subtype\":\"{}\"}}\n", "x".repeat(200));
        let input = format!("{long}{{\"type\":\"system\",\"subtype\":\"after\"}}\n");

        run_stdout_worker_with_limit(Cursor::new(input.into_bytes()), default_chain(), sink, 64)
            .await;

        let errors = drain(&errors).await;
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], SdkError::BufferOverflow { limit: 64 }));
        // the worker stops after an overflow
        assert!(drain(&messages).await.is_empty());
    }

    #[tokio::test]
    async fn test_done_unblocks_full_channel() {
        let done = CancellationToken::new();
        let (sink, _msg_rx, _err_rx) = sink_channels(done.clone());
        let mut input = String::new();
        for _ in 0..(CHANNEL_BUFFER_SIZE * 3) {
            input.push_str("{\"type\":\"system\",\"subtype\":\"x\"}\n");
        }

        let worker = tokio::spawn(run_stdout_worker(Cursor::new(input.into_bytes()), sink));
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(!worker.is_finished());

        done.cancel();
        tokio::time::timeout(std::time::Duration::from_secs(1), worker)
            .await
            .expect("worker should stop once done fires")
            .unwrap();
    }
}
