//! Type definitions for the Claude Code transport core
//!
//! This module contains the configuration options handed to the CLI, the
//! inbound message union produced by the parser, and the content blocks
//! carried inside assistant and user messages.

use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Permission mode for tool execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PermissionMode {
    /// CLI prompts for dangerous tools
    Default,
    /// Auto-accept file edits
    AcceptEdits,
    /// Plan only, no edits
    Plan,
    /// Allow all tools without prompting
    BypassPermissions,
}

impl PermissionMode {
    /// Wire representation passed to `--permission-mode`
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::AcceptEdits => "acceptEdits",
            Self::Plan => "plan",
            Self::BypassPermissions => "bypassPermissions",
        }
    }
}

impl fmt::Display for PermissionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PermissionMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "default" => Ok(Self::Default),
            "acceptEdits" => Ok(Self::AcceptEdits),
            "plan" => Ok(Self::Plan),
            "bypassPermissions" => Ok(Self::BypassPermissions),
            other => Err(ConfigError::InvalidPermissionMode(other.to_string())),
        }
    }
}

/// MCP (Model Context Protocol) server configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum McpServerConfig {
    /// Standard I/O based MCP server
    Stdio {
        /// Command to execute
        command: String,
        /// Command arguments
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        args: Vec<String>,
        /// Environment variables
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        env: BTreeMap<String, String>,
    },
    /// Server-Sent Events based MCP server
    Sse {
        /// Server URL
        url: String,
        /// HTTP headers
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        headers: BTreeMap<String, String>,
    },
    /// HTTP-based MCP server
    Http {
        /// Server URL
        url: String,
        /// HTTP headers
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        headers: BTreeMap<String, String>,
    },
}

/// Configuration for a Claude CLI session
///
/// Integer limits are signed so that bad values coming from a config file
/// survive deserialization and get rejected by [`ClaudeCodeOptions::validate`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClaudeCodeOptions {
    /// Tools whose invocations are auto-approved
    pub allowed_tools: Vec<String>,
    /// Tools that are disabled entirely
    pub disallowed_tools: Vec<String>,
    /// Replacement system prompt
    pub system_prompt: Option<String>,
    /// Text appended to the default system prompt
    pub append_system_prompt: Option<String>,
    /// Model name
    pub model: Option<String>,
    /// Thinking token budget, 0 leaves the CLI default
    pub max_thinking_tokens: i32,
    /// Permission mode
    pub permission_mode: Option<PermissionMode>,
    /// MCP tool used to answer permission prompts
    pub permission_prompt_tool_name: Option<String>,
    /// Continue the most recent conversation
    pub continue_conversation: bool,
    /// Session id to resume
    pub resume: Option<String>,
    /// Working directory of the child
    pub cwd: Option<PathBuf>,
    /// Extra directories the CLI may access
    pub add_dirs: Vec<PathBuf>,
    /// MCP servers keyed by name
    pub mcp_servers: BTreeMap<String, McpServerConfig>,
    /// Turn limit, 0 leaves the CLI default
    pub max_turns: i32,
    /// Settings file path or inline JSON
    pub settings: Option<String>,
    /// Arbitrary extra flags, `None` values become bare flags
    pub extra_args: BTreeMap<String, Option<String>>,
    /// Explicit CLI binary, skips PATH discovery
    pub cli_path: Option<PathBuf>,
}

impl ClaudeCodeOptions {
    /// Create a new options builder
    pub fn builder() -> ClaudeCodeOptionsBuilder {
        ClaudeCodeOptionsBuilder::default()
    }

    /// Check the options before any process is spawned
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(tool) = self
            .allowed_tools
            .iter()
            .find(|tool| self.disallowed_tools.contains(tool))
        {
            return Err(ConfigError::ToolInBothLists(tool.clone()));
        }

        if self.max_turns < 0 {
            return Err(ConfigError::MaxTurnsMustBeNonNegative(self.max_turns));
        }

        if self.max_thinking_tokens < 0 {
            return Err(ConfigError::NegativeMaxThinkingTokens(
                self.max_thinking_tokens,
            ));
        }

        if let Some(cwd) = &self.cwd {
            if !cwd.exists() {
                return Err(ConfigError::WorkingDirectoryDoesNotExist(cwd.clone()));
            }
        }

        Ok(())
    }
}

/// Builder for ClaudeCodeOptions
#[derive(Debug, Default)]
pub struct ClaudeCodeOptionsBuilder {
    options: ClaudeCodeOptions,
}

impl ClaudeCodeOptionsBuilder {
    /// Set system prompt
    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.options.system_prompt = Some(prompt.into());
        self
    }

    /// Set append system prompt
    pub fn append_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.options.append_system_prompt = Some(prompt.into());
        self
    }

    /// Set allowed tools
    pub fn allowed_tools(mut self, tools: Vec<String>) -> Self {
        self.options.allowed_tools = tools;
        self
    }

    /// Add a single allowed tool
    pub fn allow_tool(mut self, tool: impl Into<String>) -> Self {
        self.options.allowed_tools.push(tool.into());
        self
    }

    /// Set disallowed tools
    pub fn disallowed_tools(mut self, tools: Vec<String>) -> Self {
        self.options.disallowed_tools = tools;
        self
    }

    /// Add a single disallowed tool
    pub fn disallow_tool(mut self, tool: impl Into<String>) -> Self {
        self.options.disallowed_tools.push(tool.into());
        self
    }

    /// Set permission mode
    pub fn permission_mode(mut self, mode: PermissionMode) -> Self {
        self.options.permission_mode = Some(mode);
        self
    }

    /// Set the MCP tool that answers permission prompts
    pub fn permission_prompt_tool_name(mut self, name: impl Into<String>) -> Self {
        self.options.permission_prompt_tool_name = Some(name.into());
        self
    }

    /// Add a single MCP server
    pub fn add_mcp_server(mut self, name: impl Into<String>, config: McpServerConfig) -> Self {
        self.options.mcp_servers.insert(name.into(), config);
        self
    }

    /// Set all MCP servers
    pub fn mcp_servers(mut self, servers: BTreeMap<String, McpServerConfig>) -> Self {
        self.options.mcp_servers = servers;
        self
    }

    /// Set max turns
    pub fn max_turns(mut self, turns: i32) -> Self {
        self.options.max_turns = turns;
        self
    }

    /// Set max thinking tokens
    pub fn max_thinking_tokens(mut self, tokens: i32) -> Self {
        self.options.max_thinking_tokens = tokens;
        self
    }

    /// Set model
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.options.model = Some(model.into());
        self
    }

    /// Set working directory
    pub fn cwd(mut self, path: impl Into<PathBuf>) -> Self {
        self.options.cwd = Some(path.into());
        self
    }

    /// Enable continue conversation
    pub fn continue_conversation(mut self, enable: bool) -> Self {
        self.options.continue_conversation = enable;
        self
    }

    /// Set resume session ID
    pub fn resume(mut self, id: impl Into<String>) -> Self {
        self.options.resume = Some(id.into());
        self
    }

    /// Set settings file path or inline JSON
    pub fn settings(mut self, settings: impl Into<String>) -> Self {
        self.options.settings = Some(settings.into());
        self
    }

    /// Set additional directories
    pub fn add_dirs(mut self, dirs: Vec<PathBuf>) -> Self {
        self.options.add_dirs = dirs;
        self
    }

    /// Add a single directory
    pub fn add_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.options.add_dirs.push(dir.into());
        self
    }

    /// Set all extra CLI arguments
    pub fn extra_args(mut self, args: BTreeMap<String, Option<String>>) -> Self {
        self.options.extra_args = args;
        self
    }

    /// Add a single extra CLI argument, `None` for a bare flag
    pub fn extra_arg(mut self, key: impl Into<String>, value: Option<String>) -> Self {
        self.options.extra_args.insert(key.into(), value);
        self
    }

    /// Use a specific CLI binary instead of searching for one
    pub fn cli_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.options.cli_path = Some(path.into());
        self
    }

    /// Build the options
    pub fn build(self) -> ClaudeCodeOptions {
        self.options
    }
}

/// Message received from the CLI
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Message {
    /// User turn echoed back by the CLI, usually tool results
    User {
        /// Content blocks
        content: Vec<ContentBlock>,
        /// Tool use this message answers
        #[serde(skip_serializing_if = "Option::is_none")]
        parent_tool_use_id: Option<String>,
    },
    /// Assistant turn
    Assistant {
        /// Message id assigned by the API
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        /// Model that produced the message
        #[serde(skip_serializing_if = "Option::is_none")]
        model: Option<String>,
        /// Content blocks
        content: Vec<ContentBlock>,
    },
    /// System notification
    System {
        /// Subtype of system message
        subtype: String,
        /// Every field except `type` and `subtype`
        #[serde(flatten)]
        data: Map<String, Value>,
    },
    /// End of a turn
    Result {
        /// Result subtype
        subtype: String,
        /// Duration in milliseconds
        duration_ms: i64,
        /// API duration in milliseconds
        duration_api_ms: i64,
        /// Whether an error occurred
        is_error: bool,
        /// Number of turns
        num_turns: i32,
        /// Session ID
        session_id: String,
        /// Total cost in USD
        #[serde(skip_serializing_if = "Option::is_none")]
        total_cost_usd: Option<f64>,
        /// Usage statistics
        #[serde(skip_serializing_if = "Option::is_none")]
        usage: Option<Map<String, Value>>,
        /// Final result text
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<String>,
    },
}

impl Message {
    /// Wire tag of this message
    pub fn kind(&self) -> &'static str {
        match self {
            Self::User { .. } => "user",
            Self::Assistant { .. } => "assistant",
            Self::System { .. } => "system",
            Self::Result { .. } => "result",
        }
    }

    /// Content blocks for user and assistant messages
    pub fn content(&self) -> &[ContentBlock] {
        match self {
            Self::User { content, .. } | Self::Assistant { content, .. } => content,
            _ => &[],
        }
    }

    /// Concatenated text of all text blocks
    pub fn text(&self) -> String {
        self.content()
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Whether this message ends a turn
    pub fn is_result(&self) -> bool {
        matches!(self, Self::Result { .. })
    }
}

/// Content block inside an assistant or user message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Plain text
    Text {
        /// Text content
        text: String,
    },
    /// Extended thinking
    Thinking {
        /// Thinking content
        thinking: String,
        /// Signature
        #[serde(default)]
        signature: String,
    },
    /// Tool use request
    ToolUse {
        /// Tool use ID
        id: String,
        /// Tool name
        name: String,
        /// Tool input parameters
        #[serde(default)]
        input: Map<String, Value>,
    },
    /// Tool result
    ToolResult {
        /// Tool use ID this result corresponds to
        tool_use_id: String,
        /// Result content
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<ToolResultContent>,
        /// Whether this is an error result
        #[serde(default)]
        is_error: bool,
    },
}

/// Payload of a tool result block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolResultContent {
    /// Text content
    Text(String),
    /// List of content parts
    Structured(Vec<Value>),
    /// Any other JSON shape, kept as-is
    Opaque(Value),
}
