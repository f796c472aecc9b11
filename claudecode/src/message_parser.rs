//! Message parsing utilities
//!
//! This module turns stdout lines from the Claude CLI into strongly typed
//! [`Message`] values. The parser is stateful: a JSON object that the CLI
//! split over several lines is buffered until it decodes.

use crate::{
    errors::{Result, SdkError},
    types::{ContentBlock, Message, ToolResultContent},
};
use serde_json::{Map, Value};
use tracing::{debug, trace};

/// Largest JSON document the parser will buffer
pub const MAX_BUFFER_SIZE: usize = 10 * 1024 * 1024;

/// Stateful line parser
#[derive(Debug)]
pub struct MessageParser {
    buffer: String,
    max_buffer_size: usize,
    abandoned: Option<SdkError>,
}

impl Default for MessageParser {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageParser {
    /// Create a parser with the default 10 MB limit
    pub fn new() -> Self {
        Self::with_max_buffer_size(MAX_BUFFER_SIZE)
    }

    /// Create a parser with a custom buffer limit
    pub fn with_max_buffer_size(max_buffer_size: usize) -> Self {
        Self {
            buffer: String::new(),
            max_buffer_size,
            abandoned: None,
        }
    }

    /// Feed one stdout line
    ///
    /// Returns the messages completed by this line. An object that is still
    /// incomplete yields an empty vector and stays buffered until a line
    /// starting with `{` replaces it; the dropped object's error is then
    /// available from [`MessageParser::take_abandoned`].
    pub fn process_line(&mut self, line: &str) -> Result<Vec<Message>> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(Vec::new());
        }

        if !self.buffer.is_empty() && line.starts_with('{') {
            let partial = std::mem::take(&mut self.buffer);
            self.abandoned = Some(decode_failure(partial));
        }

        self.buffer.push_str(line);
        if self.buffer.len() > self.max_buffer_size {
            self.buffer.clear();
            return Err(SdkError::BufferOverflow {
                limit: self.max_buffer_size,
            });
        }

        let value: Value = match serde_json::from_str(&self.buffer) {
            Ok(value) => value,
            Err(e) if e.is_eof() && self.buffer.starts_with('{') => {
                trace!(
                    "Buffering partial JSON object ({} bytes so far)",
                    self.buffer.len()
                );
                return Ok(Vec::new());
            },
            Err(e) => {
                let line = std::mem::take(&mut self.buffer);
                debug!("Failed to decode stdout line: {}", e);
                return Err(json_decode_error(line, e));
            },
        };

        self.buffer.clear();
        Ok(vec![parse_message(value)?])
    }

    /// Decode error of the partial object dropped by the last line, if any
    pub fn take_abandoned(&mut self) -> Option<SdkError> {
        self.abandoned.take()
    }

    /// Drop any buffered partial object
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.abandoned = None;
    }

    /// Number of bytes currently buffered
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }
}

fn json_decode_error(line: String, source: serde_json::Error) -> SdkError {
    SdkError::JsonDecodeError {
        position: source.column(),
        line,
        source,
    }
}

/// Re-decode a partial object to recover the error describing it
fn decode_failure(partial: String) -> SdkError {
    match serde_json::from_str::<Value>(&partial) {
        Err(e) => json_decode_error(partial, e),
        Ok(_) => SdkError::parse_error("Buffered object decoded late", partial),
    }
}

/// Parse a decoded JSON value into a Message
pub fn parse_message(json: Value) -> Result<Message> {
    let msg_type = json
        .get("type")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| SdkError::parse_error("Missing 'type' field", json.to_string()))?;

    match msg_type.as_str() {
        "user" => parse_user_message(&json),
        "assistant" => parse_assistant_message(&json),
        "system" => parse_system_message(json),
        "result" => parse_result_message(&json),
        other => Err(SdkError::parse_error(
            format!("Unknown message type: {other}"),
            json.to_string(),
        )),
    }
}

fn parse_user_message(json: &Value) -> Result<Message> {
    let message = inner_message(json)?;
    let content = parse_content(message, json)?;
    let parent_tool_use_id = json
        .get("parent_tool_use_id")
        .and_then(|v| v.as_str())
        .map(str::to_string);

    Ok(Message::User {
        content,
        parent_tool_use_id,
    })
}

fn parse_assistant_message(json: &Value) -> Result<Message> {
    let message = inner_message(json)?;
    let content = parse_content(message, json)?;

    Ok(Message::Assistant {
        id: optional_str(message, "id"),
        model: optional_str(message, "model"),
        content,
    })
}

fn parse_system_message(json: Value) -> Result<Message> {
    let mut data = match json {
        Value::Object(data) => data,
        other => {
            return Err(SdkError::parse_error(
                "System message is not an object",
                other.to_string(),
            ));
        },
    };

    let subtype = match data.remove("subtype") {
        Some(Value::String(subtype)) => subtype,
        _ => {
            return Err(SdkError::parse_error(
                "Missing 'subtype' field in system message",
                Value::Object(data).to_string(),
            ));
        },
    };
    data.remove("type");

    Ok(Message::System { subtype, data })
}

fn parse_result_message(json: &Value) -> Result<Message> {
    let raw = || json.to_string();
    let missing = |field: &str| {
        SdkError::parse_error(format!("Missing or invalid '{field}' in result message"), raw())
    };

    let subtype = json
        .get("subtype")
        .and_then(|v| v.as_str())
        .ok_or_else(|| missing("subtype"))?;
    let duration_ms = json
        .get("duration_ms")
        .and_then(|v| v.as_i64())
        .ok_or_else(|| missing("duration_ms"))?;
    let duration_api_ms = json
        .get("duration_api_ms")
        .and_then(|v| v.as_i64())
        .ok_or_else(|| missing("duration_api_ms"))?;
    let is_error = json
        .get("is_error")
        .and_then(|v| v.as_bool())
        .ok_or_else(|| missing("is_error"))?;
    let num_turns = json
        .get("num_turns")
        .and_then(|v| v.as_i64())
        .and_then(|n| i32::try_from(n).ok())
        .ok_or_else(|| missing("num_turns"))?;
    let session_id = json
        .get("session_id")
        .and_then(|v| v.as_str())
        .ok_or_else(|| missing("session_id"))?;

    Ok(Message::Result {
        subtype: subtype.to_string(),
        duration_ms,
        duration_api_ms,
        is_error,
        num_turns,
        session_id: session_id.to_string(),
        total_cost_usd: json.get("total_cost_usd").and_then(|v| v.as_f64()),
        usage: json.get("usage").and_then(|v| v.as_object()).cloned(),
        result: optional_str(json, "result"),
    })
}

fn inner_message(json: &Value) -> Result<&Value> {
    json.get("message")
        .filter(|m| m.is_object())
        .ok_or_else(|| SdkError::parse_error("Missing 'message' field", json.to_string()))
}

fn optional_str(json: &Value, field: &str) -> Option<String> {
    json.get(field).and_then(|v| v.as_str()).map(str::to_string)
}

/// Content is either a bare string or an array of typed blocks
fn parse_content(message: &Value, raw: &Value) -> Result<Vec<ContentBlock>> {
    match message.get("content") {
        Some(Value::String(text)) => Ok(vec![ContentBlock::Text { text: text.clone() }]),
        Some(Value::Array(blocks)) => blocks
            .iter()
            .enumerate()
            .map(|(index, block)| parse_content_block(index, block, raw))
            .collect(),
        _ => Err(SdkError::parse_error(
            "Missing or invalid 'content' field",
            raw.to_string(),
        )),
    }
}

fn parse_content_block(index: usize, block: &Value, raw: &Value) -> Result<ContentBlock> {
    let err = |what: &str| {
        SdkError::parse_error(format!("content block {index}: {what}"), raw.to_string())
    };
    let field = |name: &str| {
        block
            .get(name)
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| err(&format!("missing '{name}' field")))
    };

    let block_type = block
        .get("type")
        .and_then(|v| v.as_str())
        .ok_or_else(|| err("missing 'type' field"))?;

    match block_type {
        "text" => Ok(ContentBlock::Text {
            text: field("text")?,
        }),
        "thinking" => Ok(ContentBlock::Thinking {
            thinking: field("thinking")?,
            signature: optional_str(block, "signature").unwrap_or_default(),
        }),
        "tool_use" => {
            let input = match block.get("input") {
                None | Some(Value::Null) => Map::new(),
                Some(Value::Object(input)) => input.clone(),
                Some(_) => return Err(err("'input' is not an object")),
            };
            Ok(ContentBlock::ToolUse {
                id: field("id")?,
                name: field("name")?,
                input,
            })
        },
        "tool_result" => {
            let content = match block.get("content") {
                None | Some(Value::Null) => None,
                Some(Value::String(text)) => Some(ToolResultContent::Text(text.clone())),
                Some(Value::Array(parts)) => Some(ToolResultContent::Structured(parts.clone())),
                Some(other) => Some(ToolResultContent::Opaque(other.clone())),
            };
            Ok(ContentBlock::ToolResult {
                tool_use_id: field("tool_use_id")?,
                content,
                is_error: block
                    .get("is_error")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false),
            })
        },
        other => Err(err(&format!("unknown content block type '{other}'"))),
    }
}
