//! Transport layer abstractions
//!
//! This module defines the Transport trait and its implementations for
//! communicating with the Claude CLI.

use crate::{
    channel::Inbound,
    errors::{Result, SdkError},
    types::Message,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

pub mod command;
pub mod mock;
pub mod pipeline;
pub mod subprocess;

pub use command::{build_command, build_command_with_prompt, find_claude_cli};
pub use subprocess::SubprocessTransport;

/// Session used when the caller does not name one
pub const DEFAULT_SESSION_ID: &str = "default";

/// Envelope written to the CLI's stdin, one per line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamMessage {
    /// Message type (always "user")
    #[serde(rename = "type")]
    pub r#type: String,
    /// Message content
    pub message: serde_json::Value,
    /// Parent tool use ID (for tool results)
    pub parent_tool_use_id: Option<String>,
    /// Session ID
    pub session_id: String,
}

impl StreamMessage {
    /// Create a new user message, an empty session maps to `"default"`
    pub fn user(content: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            r#type: "user".to_string(),
            message: serde_json::json!({
                "role": "user",
                "content": content.into()
            }),
            parent_tool_use_id: None,
            session_id: session_or_default(session_id.into()),
        }
    }

    /// Create a tool result message
    pub fn tool_result(
        tool_use_id: impl Into<String>,
        content: impl Into<String>,
        session_id: impl Into<String>,
        is_error: bool,
    ) -> Self {
        let tool_use_id = tool_use_id.into();
        Self {
            r#type: "user".to_string(),
            message: serde_json::json!({
                "role": "user",
                "content": [{
                    "type": "tool_result",
                    "tool_use_id": tool_use_id,
                    "content": content.into(),
                    "is_error": is_error
                }]
            }),
            parent_tool_use_id: Some(tool_use_id),
            session_id: session_or_default(session_id.into()),
        }
    }
}

fn session_or_default(session_id: String) -> String {
    if session_id.is_empty() {
        DEFAULT_SESSION_ID.to_string()
    } else {
        session_id
    }
}

/// Transport trait for communicating with Claude CLI
///
/// Implementations use interior mutability so a shared handle can send
/// while another task is receiving.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Start the CLI; `cancel` bounds the lifetime of the connection
    async fn connect(&self, cancel: &CancellationToken) -> Result<()>;

    /// Write one envelope to the CLI
    async fn send_message(&self, cancel: &CancellationToken, message: StreamMessage) -> Result<()>;

    /// Message and error channels, already closed when not connected
    async fn receive_messages(&self) -> (Inbound<Message>, Inbound<SdkError>);

    /// Ask the CLI to stop the current turn
    async fn interrupt(&self, cancel: &CancellationToken) -> Result<()>;

    /// Shut the CLI down and release its resources, idempotent
    async fn close(&self) -> Result<()>;
}

/// Transport state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    /// Not connected yet
    Disconnected,
    /// Connected and ready
    Connected,
    /// Shutdown in progress
    Closing,
    /// Shut down, cannot be reused
    Closed,
}
