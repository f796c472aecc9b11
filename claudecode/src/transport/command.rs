//! Claude CLI argv construction and binary discovery

use crate::{
    errors::{Result, SdkError},
    types::ClaudeCodeOptions,
};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// How the CLI receives its input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InputMode<'a> {
    /// Long-lived session fed through stdin
    Streaming,
    /// Single turn fed through stdin, CLI exits after answering
    StreamingPrint,
    /// Single turn passed on the command line, stdin unused
    Prompt(&'a str),
}

/// Build argv for a stdin-driven session
///
/// With `close_stdin` the CLI runs in print mode and answers a single
/// envelope before exiting.
pub fn build_command(cli_path: &Path, options: &ClaudeCodeOptions, close_stdin: bool) -> Vec<String> {
    let mode = if close_stdin {
        InputMode::StreamingPrint
    } else {
        InputMode::Streaming
    };
    assemble(cli_path, options, mode)
}

/// Build argv for a one-shot run with the prompt on the command line
pub fn build_command_with_prompt(
    cli_path: &Path,
    options: &ClaudeCodeOptions,
    prompt: &str,
) -> Vec<String> {
    assemble(cli_path, options, InputMode::Prompt(prompt))
}

fn assemble(cli_path: &Path, options: &ClaudeCodeOptions, mode: InputMode<'_>) -> Vec<String> {
    let mut args = vec![
        cli_path.to_string_lossy().into_owned(),
        "--output-format".to_string(),
        "stream-json".to_string(),
        "--verbose".to_string(),
    ];

    push_option_flags(&mut args, options);

    match mode {
        InputMode::Streaming => {
            args.push("--input-format".to_string());
            args.push("stream-json".to_string());
        },
        InputMode::StreamingPrint => {
            args.push("--print".to_string());
            args.push("--input-format".to_string());
            args.push("stream-json".to_string());
        },
        InputMode::Prompt(prompt) => {
            args.push("--print".to_string());
            args.push(prompt.to_string());
        },
    }

    args
}

fn push_option_flags(args: &mut Vec<String>, options: &ClaudeCodeOptions) {
    let mut flag = |name: &str, value: Option<String>| {
        args.push(name.to_string());
        if let Some(value) = value {
            args.push(value);
        }
    };

    if let Some(prompt) = &options.system_prompt {
        flag("--system-prompt", Some(prompt.clone()));
    }
    if let Some(prompt) = &options.append_system_prompt {
        flag("--append-system-prompt", Some(prompt.clone()));
    }
    if let Some(model) = &options.model {
        flag("--model", Some(model.clone()));
    }
    if options.max_thinking_tokens > 0 {
        flag(
            "--max-thinking-tokens",
            Some(options.max_thinking_tokens.to_string()),
        );
    }
    if let Some(mode) = options.permission_mode {
        flag("--permission-mode", Some(mode.to_string()));
    }
    if let Some(tool) = &options.permission_prompt_tool_name {
        flag("--permission-prompt-tool", Some(tool.clone()));
    }
    if options.continue_conversation {
        flag("--continue", None);
    }
    if let Some(session) = &options.resume {
        flag("--resume", Some(session.clone()));
    }
    for dir in &options.add_dirs {
        flag("--add-dir", Some(dir.to_string_lossy().into_owned()));
    }
    if !options.allowed_tools.is_empty() {
        flag("--allowed-tools", Some(options.allowed_tools.join(",")));
    }
    if !options.disallowed_tools.is_empty() {
        flag("--disallowed-tools", Some(options.disallowed_tools.join(",")));
    }
    if !options.mcp_servers.is_empty() {
        let config = serde_json::json!({ "mcpServers": options.mcp_servers });
        flag("--mcp-config", Some(config.to_string()));
    }
    if options.max_turns > 0 {
        flag("--max-turns", Some(options.max_turns.to_string()));
    }
    if let Some(settings) = &options.settings {
        flag("--settings", Some(settings.clone()));
    }
    for (key, value) in &options.extra_args {
        let name = if key.starts_with('-') {
            key.clone()
        } else {
            format!("--{key}")
        };
        flag(&name, value.clone());
    }
}

/// Find the Claude CLI binary
///
/// Search order:
/// 1. System PATH (`claude`, `claude-code`)
/// 2. Common installation locations
pub fn find_claude_cli() -> Result<PathBuf> {
    for cmd_name in &["claude", "claude-code"] {
        if let Ok(path) = which::which(cmd_name) {
            debug!("Found Claude CLI in PATH at: {}", path.display());
            return Ok(path);
        }
    }

    let home = dirs::home_dir().ok_or_else(|| SdkError::CliNotFound {
        searched_paths: "Unable to determine home directory".into(),
    })?;

    let locations = [
        home.join(".npm-global/bin/claude"),
        home.join(".npm-global/bin/claude-code"),
        PathBuf::from("/usr/local/bin/claude"),
        PathBuf::from("/usr/local/bin/claude-code"),
        home.join(".local/bin/claude"),
        home.join(".local/bin/claude-code"),
        home.join("node_modules/.bin/claude"),
        home.join(".yarn/bin/claude"),
        PathBuf::from("/opt/homebrew/bin/claude"),
        home.join(".claude/local/claude"),
    ];

    let mut searched = vec!["$PATH (claude, claude-code)".to_string()];
    for path in &locations {
        searched.push(path.display().to_string());
        if path.is_file() {
            debug!("Found Claude CLI at: {}", path.display());
            return Ok(path.clone());
        }
    }

    warn!("Claude CLI not found in any standard location");
    Err(SdkError::CliNotFound {
        searched_paths: searched.join("\n"),
    })
}
