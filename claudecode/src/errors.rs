//! Error types for the Claude Code transport core
//!
//! Every failure the crate can produce is a variant of [`SdkError`]. Variants
//! are grouped into an [`ErrorCategory`] and carry a stable [`SdkError::code`]
//! so callers can decide what to retry without matching on message text.
//! Option validation failures live in [`ConfigError`] and reach callers
//! wrapped in [`SdkError::InvalidConfiguration`].

use std::path::PathBuf;
use thiserror::Error;

/// Maximum number of characters of an offending line kept in error messages
const MAX_LINE_DISPLAY_LENGTH: usize = 100;

/// Broad classification of an [`SdkError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Invalid options or a missing CLI binary
    Configuration,
    /// Operation not valid in the current connection state
    Lifecycle,
    /// Pipe, process or stream failures
    Io,
    /// Malformed output from the CLI
    Parse,
    /// Failures while terminating the child process
    Shutdown,
}

/// Reasons an options record is rejected before any process is spawned
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// `max_turns` was negative
    #[error("max_turns must be non-negative, got {0}")]
    MaxTurnsMustBeNonNegative(i32),

    /// `max_thinking_tokens` was negative
    #[error("max_thinking_tokens must be non-negative, got {0}")]
    NegativeMaxThinkingTokens(i32),

    /// `cwd` points to a path that does not exist
    #[error("working directory does not exist: {}", .0.display())]
    WorkingDirectoryDoesNotExist(PathBuf),

    /// Permission mode string outside the supported set
    #[error(
        "invalid permission mode '{0}' (expected one of: default, acceptEdits, plan, bypassPermissions)"
    )]
    InvalidPermissionMode(String),

    /// A tool is both allowed and disallowed
    #[error("tool '{0}' appears in both allowed_tools and disallowed_tools")]
    ToolInBothLists(String),
}

/// Main error type for the crate
#[derive(Error, Debug)]
pub enum SdkError {
    /// Options failed validation
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(#[from] ConfigError),

    /// Claude CLI executable was not found
    #[error(
        "Claude CLI not found. Install with: npm install -g @anthropic-ai/claude-code\n\nSearched in:\n{searched_paths}"
    )]
    CliNotFound {
        /// Paths that were searched for the CLI
        searched_paths: String,
    },

    /// Transport `connect` called twice
    #[error("Transport already connected")]
    AlreadyConnected,

    /// Transport operation attempted without a live connection
    #[error("Transport not connected")]
    NotConnected,

    /// Client operation attempted before `connect`
    #[error("Client not connected")]
    ClientNotConnected,

    /// Invalid state transition
    #[error("Invalid state: {message}")]
    InvalidState {
        /// Description of the invalid state
        message: String,
    },

    /// Interrupt is not available on this platform
    #[error("Interrupt not supported on {platform}")]
    InterruptNotSupported {
        /// Platform name as reported by `std::env::consts::OS`
        platform: String,
    },

    /// No child process to signal
    #[error("Claude CLI process is not running")]
    ProcessNotRunning,

    /// The caller's cancellation token fired
    #[error("Operation cancelled: {0}")]
    Cancelled(&'static str),

    /// The message channel closed; iteration is over
    #[error("No more messages")]
    NoMoreMessages,

    /// Failed to start the CLI or set up its pipes
    #[error("Failed to connect to Claude CLI: {message}")]
    ConnectionError {
        /// What was being attempted
        message: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Envelope serialization failed
    #[error("Failed to marshal message: {0}")]
    MarshalFailed(#[source] serde_json::Error),

    /// Writing an envelope to stdin failed
    #[error("Failed to write message to stdin: {0}")]
    WriteMessageFailed(#[source] std::io::Error),

    /// Reading stdout failed
    #[error("Stdout scanner failed: {0}")]
    StdoutScannerFailed(#[source] std::io::Error),

    /// A stdout line or buffered JSON object exceeded the size limit
    #[error("Buffer overflow: line exceeds {limit} bytes")]
    BufferOverflow {
        /// Configured limit in bytes
        limit: usize,
    },

    /// The CLI exited with a non-zero status
    #[error("{message}{}{}", exit_code_suffix(.exit_code), stderr_suffix(.stderr))]
    ProcessError {
        /// Human readable summary
        message: String,
        /// Exit code if the process exited normally
        exit_code: Option<i32>,
        /// Captured stderr output (may be empty)
        stderr: String,
    },

    /// Delivering a signal to the child failed
    #[error("Failed to send {signal} to Claude CLI: {source}")]
    SignalFailed {
        /// Signal name
        signal: &'static str,
        /// Underlying OS error
        #[source]
        source: std::io::Error,
    },

    /// SIGKILL failed during shutdown
    #[error("Failed to kill Claude CLI after {reason}: {source}")]
    KillFailed {
        /// Why the kill was issued
        reason: &'static str,
        /// Underlying OS error
        #[source]
        source: std::io::Error,
    },

    /// A stdout line was not valid JSON
    #[error("Failed to decode JSON: {}...", truncate_line(.line))]
    JsonDecodeError {
        /// Full line that failed to decode
        line: String,
        /// Column at which decoding failed
        position: usize,
        /// Original error
        #[source]
        source: serde_json::Error,
    },

    /// JSON was valid but did not describe a known message
    #[error("Failed to parse message: {error}\nRaw message: {raw}")]
    MessageParseError {
        /// Parse error description
        error: String,
        /// Raw payload that failed to parse
        raw: String,
    },
}

/// Result type alias for crate operations
pub type Result<T> = std::result::Result<T, SdkError>;

fn truncate_line(line: &str) -> &str {
    match line.char_indices().nth(MAX_LINE_DISPLAY_LENGTH) {
        Some((idx, _)) => &line[..idx],
        None => line,
    }
}

fn exit_code_suffix(code: &Option<i32>) -> String {
    match code {
        Some(code) if *code != 0 => format!(" (exit code: {code})"),
        _ => String::new(),
    }
}

fn stderr_suffix(stderr: &str) -> String {
    if stderr.is_empty() {
        String::new()
    } else {
        format!("\nError output: {stderr}")
    }
}

impl SdkError {
    /// Create a new MessageParseError
    pub fn parse_error(error: impl Into<String>, raw: impl Into<String>) -> Self {
        Self::MessageParseError {
            error: error.into(),
            raw: raw.into(),
        }
    }

    /// Create a new InvalidState error
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Create a new ConnectionError
    pub fn connection(message: impl Into<String>, source: std::io::Error) -> Self {
        Self::ConnectionError {
            message: message.into(),
            source,
        }
    }

    /// Category this error belongs to
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidConfiguration(_) | Self::CliNotFound { .. } => {
                ErrorCategory::Configuration
            },
            Self::AlreadyConnected
            | Self::NotConnected
            | Self::ClientNotConnected
            | Self::InvalidState { .. }
            | Self::InterruptNotSupported { .. }
            | Self::ProcessNotRunning
            | Self::Cancelled(_)
            | Self::NoMoreMessages => ErrorCategory::Lifecycle,
            Self::ConnectionError { .. }
            | Self::MarshalFailed(_)
            | Self::WriteMessageFailed(_)
            | Self::StdoutScannerFailed(_)
            | Self::BufferOverflow { .. }
            | Self::ProcessError { .. }
            | Self::SignalFailed { .. } => ErrorCategory::Io,
            Self::JsonDecodeError { .. } | Self::MessageParseError { .. } => ErrorCategory::Parse,
            Self::KillFailed { .. } => ErrorCategory::Shutdown,
        }
    }

    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfiguration(_) => "invalid_configuration",
            Self::CliNotFound { .. } => "cli_not_found",
            Self::AlreadyConnected => "transport_already_connected",
            Self::NotConnected => "transport_not_connected",
            Self::ClientNotConnected => "client_not_connected",
            Self::InvalidState { .. } => "invalid_state",
            Self::InterruptNotSupported { .. } => "interrupt_not_supported",
            Self::ProcessNotRunning => "process_not_running",
            Self::Cancelled(_) => "cancelled",
            Self::NoMoreMessages => "no_more_messages",
            Self::ConnectionError { .. } => "connection_error",
            Self::MarshalFailed(_) => "marshal_failed",
            Self::WriteMessageFailed(_) => "write_message_failed",
            Self::StdoutScannerFailed(_) => "stdout_scanner_failed",
            Self::BufferOverflow { .. } => "buffer_overflow",
            Self::ProcessError { .. } => "process_error",
            Self::SignalFailed { .. } => "signal_failed",
            Self::KillFailed { .. } => "kill_failed",
            Self::JsonDecodeError { .. } => "json_decode_error",
            Self::MessageParseError { .. } => "message_parse_error",
        }
    }

    /// Check if the error is recoverable by retrying at the call site
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::WriteMessageFailed(_)
                | Self::JsonDecodeError { .. }
                | Self::MessageParseError { .. }
                | Self::ProcessError { .. }
        )
    }

    /// Check if the error is a configuration issue
    pub fn is_config_error(&self) -> bool {
        self.category() == ErrorCategory::Configuration
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_error_display() {
        let err = SdkError::CliNotFound {
            searched_paths: "/usr/local/bin\n/usr/bin".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("npm install -g @anthropic-ai/claude-code"));
        assert!(msg.contains("/usr/local/bin"));
    }

    #[test]
    fn test_invalid_configuration_chains_cause() {
        let err = SdkError::from(ConfigError::MaxTurnsMustBeNonNegative(-1));
        assert_eq!(err.code(), "invalid_configuration");
        assert!(err.is_config_error());
        assert!(err.to_string().contains("max_turns must be non-negative, got -1"));

        let cause = err
            .source()
            .and_then(|s| s.downcast_ref::<ConfigError>())
            .cloned();
        assert_eq!(cause, Some(ConfigError::MaxTurnsMustBeNonNegative(-1)));
    }

    #[test]
    fn test_categories() {
        assert_eq!(
            SdkError::InterruptNotSupported {
                platform: "windows".into()
            }
            .category(),
            ErrorCategory::Lifecycle
        );
        assert_eq!(
            SdkError::BufferOverflow { limit: 10 }.category(),
            ErrorCategory::Io
        );
        assert_eq!(
            SdkError::parse_error("bad", "{}").category(),
            ErrorCategory::Parse
        );
        assert_eq!(
            SdkError::KillFailed {
                reason: "timeout",
                source: std::io::Error::other("boom"),
            }
            .category(),
            ErrorCategory::Shutdown
        );
    }

    #[test]
    fn test_is_recoverable() {
        assert!(SdkError::parse_error("bad", "{}").is_recoverable());
        assert!(!SdkError::BufferOverflow { limit: 1 }.is_recoverable());
        assert!(!SdkError::from(ConfigError::ToolInBothLists("Bash".into())).is_recoverable());
    }

    #[test]
    fn test_json_decode_error_truncates_line() {
        let line = format!("NOT JSON {}", "x".repeat(500));
        let original = serde_json::from_str::<serde_json::Value>(&line).unwrap_err();
        let err = SdkError::JsonDecodeError {
            line: line.clone(),
            position: original.column(),
            source: original,
        };

        let msg = err.to_string();
        assert!(msg.starts_with("Failed to decode JSON: NOT JSON"));
        assert!(msg.ends_with("..."));
        assert!(msg.len() < line.len());
        assert_eq!(err.code(), "json_decode_error");
    }

    #[test]
    fn test_process_error_display() {
        let err = SdkError::ProcessError {
            message: "Claude CLI exited".into(),
            exit_code: Some(2),
            stderr: "boom".into(),
        };
        assert_eq!(err.to_string(), "Claude CLI exited (exit code: 2)\nError output: boom");

        let quiet = SdkError::ProcessError {
            message: "Claude CLI exited".into(),
            exit_code: None,
            stderr: String::new(),
        };
        assert_eq!(quiet.to_string(), "Claude CLI exited");
    }
}
