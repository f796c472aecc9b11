//! # bmad-claudecode
//!
//! Subprocess transport core used by bmad-cli to drive the Claude Code CLI
//! over its line-delimited `stream-json` protocol.
//!
//! ## Features
//!
//! - **Subprocess transport**: spawns the CLI, writes envelopes to stdin and
//!   reads messages from stdout through a handler chain
//! - **Bounded channels**: messages and errors are delivered on separate
//!   channels with backpressure
//! - **Graceful shutdown**: SIGTERM, then SIGKILL after five seconds, with
//!   stderr captured to a temp file that is removed on close
//! - **Interactive client**: `ClaudeSDKClient` plus the scoped [`with_client`]
//!   helper
//! - **One-shot query**: [`query`] for a single prompt
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use bmad_claudecode::{ClaudeCodeOptions, Result, with_client};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let cancel = CancellationToken::new();
//!     with_client(&cancel, ClaudeCodeOptions::default(), |client| async move {
//!         let cancel = CancellationToken::new();
//!         client.query(&cancel, "What is 2 + 2?").await?;
//!         let mut response = client.receive_response().await;
//!         while let Ok(msg) = response.next(&cancel).await {
//!             println!("{msg:?}");
//!         }
//!         Ok(())
//!     })
//!     .await
//! }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod channel;
mod client;
mod errors;
pub mod message_parser;
mod query;
pub mod transport;
mod types;

// Re-export main types and functions
pub use channel::{Inbound, MessageIterator};
pub use client::{CLIENT_ENTRYPOINT, ClaudeSDKClient, with_client, with_client_transport};
pub use errors::{ConfigError, ErrorCategory, Result, SdkError};
pub use message_parser::MessageParser;
pub use query::query;
pub use transport::{StreamMessage, SubprocessTransport, Transport, TransportState};
pub use types::{
    ClaudeCodeOptions, ClaudeCodeOptionsBuilder, ContentBlock, McpServerConfig, Message,
    PermissionMode, ToolResultContent,
};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        ClaudeCodeOptions, ClaudeSDKClient, Message, PermissionMode, Result, SdkError, query,
        with_client,
    };
}
