//! Interactive client for bidirectional communication with Claude
//!
//! This module provides the `ClaudeSDKClient` for interactive, stateful
//! conversations with Claude Code CLI, plus the scoped [`with_client`]
//! helpers that guarantee a disconnect once the caller is done.

use crate::{
    channel::{Inbound, MessageIterator},
    errors::{Result, SdkError},
    transport::{
        DEFAULT_SESSION_ID, StreamMessage, SubprocessTransport, Transport, find_claude_cli,
    },
    types::{ClaudeCodeOptions, Message},
};
use futures::{FutureExt, Stream, StreamExt};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Entrypoint tag reported by the interactive client
pub const CLIENT_ENTRYPOINT: &str = "sdk-rust-client";

#[derive(Default)]
struct ClientState {
    transport: Option<Arc<dyn Transport>>,
    connected: bool,
    messages: Option<Inbound<Message>>,
    errors: Option<Inbound<SdkError>>,
}

struct ClientInner {
    options: ClaudeCodeOptions,
    custom_transport: Option<Arc<dyn Transport>>,
    state: RwLock<ClientState>,
}

/// Interactive client for bidirectional communication with Claude
///
/// The client is a cheap handle: clones share one connection. A fresh
/// subprocess transport is created on every [`connect`](Self::connect)
/// unless a transport was supplied with [`with_transport`](Self::with_transport).
///
/// # Example
///
/// ```rust,no_run
/// use bmad_claudecode::{ClaudeCodeOptions, ClaudeSDKClient, Result};
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example() -> Result<()> {
/// let cancel = CancellationToken::new();
/// let client = ClaudeSDKClient::new(ClaudeCodeOptions::default());
/// client.connect(&cancel).await?;
/// client.query(&cancel, "What is 2 + 2?").await?;
///
/// let mut response = client.receive_response().await;
/// while let Ok(msg) = response.next(&cancel).await {
///     println!("{msg:?}");
///     if msg.is_result() {
///         break;
///     }
/// }
///
/// client.disconnect().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ClaudeSDKClient {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for ClaudeSDKClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClaudeSDKClient")
            .field("options", &self.inner.options)
            .field("custom_transport", &self.inner.custom_transport.is_some())
            .finish_non_exhaustive()
    }
}

impl ClaudeSDKClient {
    /// Create a client that spawns the Claude CLI on connect
    pub fn new(options: ClaudeCodeOptions) -> Self {
        Self::build(options, None)
    }

    /// Create a client over a caller-supplied transport
    pub fn with_transport(options: ClaudeCodeOptions, transport: Arc<dyn Transport>) -> Self {
        Self::build(options, Some(transport))
    }

    fn build(options: ClaudeCodeOptions, custom_transport: Option<Arc<dyn Transport>>) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                options,
                custom_transport,
                state: RwLock::new(ClientState::default()),
            }),
        }
    }

    /// Options this client was built with
    pub fn options(&self) -> &ClaudeCodeOptions {
        &self.inner.options
    }

    /// Validate options, start the transport and install its channels
    pub async fn connect(&self, cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(SdkError::Cancelled("connect"));
        }

        let mut state = self.inner.state.write().await;
        if cancel.is_cancelled() {
            return Err(SdkError::Cancelled("connect"));
        }
        if state.connected {
            return Err(SdkError::AlreadyConnected);
        }

        self.inner.options.validate()?;

        let transport = match &self.inner.custom_transport {
            Some(transport) => Arc::clone(transport),
            None => {
                let cli_path = match &self.inner.options.cli_path {
                    Some(path) => path.clone(),
                    None => find_claude_cli()?,
                };
                Arc::new(SubprocessTransport::new(
                    cli_path,
                    self.inner.options.clone(),
                    false,
                    CLIENT_ENTRYPOINT,
                )) as Arc<dyn Transport>
            },
        };

        transport.connect(cancel).await?;
        let (messages, errors) = transport.receive_messages().await;

        state.transport = Some(transport);
        state.messages = Some(messages);
        state.errors = Some(errors);
        state.connected = true;
        info!("Client connected");

        Ok(())
    }

    /// Whether the client is connected
    pub async fn is_connected(&self) -> bool {
        self.inner.state.read().await.connected
    }

    async fn connected_transport(&self) -> Result<Arc<dyn Transport>> {
        let state = self.inner.state.read().await;
        match (&state.transport, state.connected) {
            (Some(transport), true) => Ok(Arc::clone(transport)),
            _ => Err(SdkError::ClientNotConnected),
        }
    }

    /// Send a prompt in the default session
    pub async fn query(&self, cancel: &CancellationToken, prompt: impl Into<String>) -> Result<()> {
        self.query_with_session(cancel, prompt, DEFAULT_SESSION_ID)
            .await
    }

    /// Send a prompt in a named session, empty means `"default"`
    pub async fn query_with_session(
        &self,
        cancel: &CancellationToken,
        prompt: impl Into<String>,
        session_id: impl Into<String>,
    ) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(SdkError::Cancelled("query"));
        }

        let transport = self.connected_transport().await?;
        if cancel.is_cancelled() {
            return Err(SdkError::Cancelled("query"));
        }

        transport
            .send_message(cancel, StreamMessage::user(prompt, session_id))
            .await
    }

    /// Forward envelopes from `stream` in the background
    ///
    /// Forwarding stops when the stream ends, `cancel` fires, or a send
    /// fails. Send failures are not reported to the caller.
    pub async fn query_stream<S>(&self, cancel: &CancellationToken, stream: S) -> Result<()>
    where
        S: Stream<Item = StreamMessage> + Send + 'static,
    {
        let transport = self.connected_transport().await?;
        let cancel = cancel.clone();

        tokio::spawn(async move {
            let mut stream = Box::pin(stream);
            loop {
                let next = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    next = stream.next() => next,
                };
                let Some(message) = next else {
                    break;
                };
                if let Err(e) = transport.send_message(&cancel, message).await {
                    debug!("Stopping message stream after send failure: {}", e);
                    break;
                }
            }
            debug!("Message stream forwarder finished");
        });

        Ok(())
    }

    /// Message channel of the current connection, closed when not connected
    pub async fn receive_messages(&self) -> Inbound<Message> {
        let state = self.inner.state.read().await;
        match (&state.messages, state.connected) {
            (Some(messages), true) => messages.clone(),
            _ => Inbound::closed(),
        }
    }

    /// Iterator over messages and errors of the current connection
    ///
    /// When not connected the iterator is already exhausted.
    pub async fn receive_response(&self) -> MessageIterator {
        let state = self.inner.state.read().await;
        match (&state.messages, &state.errors, state.connected) {
            (Some(messages), Some(errors), true) => {
                MessageIterator::new(messages.clone(), errors.clone())
            },
            _ => MessageIterator::new(Inbound::closed(), Inbound::closed()),
        }
    }

    /// Interrupt the current turn
    pub async fn interrupt(&self, cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(SdkError::Cancelled("interrupt"));
        }
        let transport = self.connected_transport().await?;
        transport.interrupt(cancel).await
    }

    /// Close the transport, safe to call repeatedly
    ///
    /// The client stays connected when the close fails, so the call can be
    /// retried.
    pub async fn disconnect(&self) -> Result<()> {
        let transport = match &self.inner.state.read().await.transport {
            Some(transport) => Arc::clone(transport),
            None => return Ok(()),
        };

        info!("Client disconnecting");
        transport.close().await?;

        let mut state = self.inner.state.write().await;
        if state
            .transport
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, &transport))
        {
            state.transport = None;
            state.messages = None;
            state.errors = None;
            state.connected = false;
        }
        Ok(())
    }
}

/// Run `callback` with a connected client, disconnecting afterwards
///
/// The connect error is returned as-is. Disconnect errors are logged and
/// dropped so they never hide the callback's result. A panic inside the
/// callback still disconnects before it resumes.
pub async fn with_client<F, Fut, T>(
    cancel: &CancellationToken,
    options: ClaudeCodeOptions,
    callback: F,
) -> Result<T>
where
    F: FnOnce(ClaudeSDKClient) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    if cancel.is_cancelled() {
        return Err(SdkError::Cancelled("with_client"));
    }
    run_scoped(cancel, ClaudeSDKClient::new(options), callback).await
}

/// [`with_client`] over a caller-supplied transport
pub async fn with_client_transport<F, Fut, T>(
    cancel: &CancellationToken,
    transport: Arc<dyn Transport>,
    options: ClaudeCodeOptions,
    callback: F,
) -> Result<T>
where
    F: FnOnce(ClaudeSDKClient) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    if cancel.is_cancelled() {
        return Err(SdkError::Cancelled("with_client_transport"));
    }
    run_scoped(cancel, ClaudeSDKClient::with_transport(options, transport), callback).await
}

async fn run_scoped<F, Fut, T>(
    cancel: &CancellationToken,
    client: ClaudeSDKClient,
    callback: F,
) -> Result<T>
where
    F: FnOnce(ClaudeSDKClient) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    client.connect(cancel).await?;

    let scoped = client.clone();
    let outcome = AssertUnwindSafe(async move { callback(scoped).await })
        .catch_unwind()
        .await;

    if let Err(e) = client.disconnect().await {
        warn!("Failed to disconnect client: {}", e);
    }

    match outcome {
        Ok(result) => result,
        Err(panic) => std::panic::resume_unwind(panic),
    }
}
