//! NDJSON stream types for AI-CLI communication
//!
//! The CLI prints one JSON object per line on stdout. Each line becomes
//! zero or more [`StreamEvent`]s; malformed lines are skipped.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// =============================================================================
// CLI → sidecar events
// =============================================================================

/// Identifies the CLI process that produced an event
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InvocationId(pub u64);

impl std::fmt::Display for InvocationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One structured event from the CLI's stdout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Assistant {
        #[serde(default)]
        message: Value,
        #[serde(default)]
        session_id: Option<String>,
    },
    ToolUse {
        #[serde(default)]
        id: Option<String>,
        name: String,
        #[serde(default)]
        input: Value,
        /// Process to answer with a tool result; set when the event is read
        #[serde(skip)]
        invocation: InvocationId,
    },
    ToolResult {
        #[serde(default)]
        tool_use_id: Option<String>,
        #[serde(default)]
        content: Value,
        #[serde(default)]
        is_error: bool,
    },
    Result {
        #[serde(default)]
        subtype: Option<String>,
        #[serde(default)]
        is_error: bool,
        #[serde(default)]
        error_code: Option<String>,
        #[serde(default)]
        result: Option<String>,
        #[serde(default)]
        message: Option<Value>,
        #[serde(default)]
        session_id: Option<String>,
    },
    Error {
        #[serde(default)]
        error: Option<Value>,
        #[serde(default)]
        message: Option<Value>,
    },
    System {
        #[serde(default)]
        subtype: Option<String>,
        #[serde(default)]
        session_id: Option<String>,
    },
}

impl StreamEvent {
    /// Session identifier carried by this event, if any.
    pub fn session_id(&self) -> Option<&str> {
        match self {
            Self::Assistant { session_id, .. }
            | Self::Result { session_id, .. }
            | Self::System { session_id, .. } => session_id.as_deref(),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Assistant { .. } => "assistant",
            Self::ToolUse { .. } => "tool_use",
            Self::ToolResult { .. } => "tool_result",
            Self::Result { .. } => "result",
            Self::Error { .. } => "error",
            Self::System { .. } => "system",
        }
    }
}

/// Parse one stdout line into events.
///
/// Assistant messages are followed by one `ToolUse` per `tool_use` content
/// block, and `user` lines yield their `tool_result` blocks, since that is
/// how the CLI reports tool traffic in stream-json mode.
pub fn parse_stream_line(line: &str) -> Vec<StreamEvent> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }

    let value: Value = match serde_json::from_str(trimmed) {
        Ok(v) => v,
        Err(e) => {
            let preview = &trimmed[..floor_char_boundary(trimmed, 200)];
            tracing::debug!("Skipping malformed stream line: {} (line: {})", e, preview);
            return Vec::new();
        }
    };

    if value.get("type").and_then(Value::as_str) == Some("user") {
        return content_blocks(&value)
            .filter(|b| b.get("type").and_then(Value::as_str) == Some("tool_result"))
            .map(|b| StreamEvent::ToolResult {
                tool_use_id: b.get("tool_use_id").and_then(Value::as_str).map(String::from),
                content: b.get("content").cloned().unwrap_or(Value::Null),
                is_error: b.get("is_error").and_then(Value::as_bool).unwrap_or(false),
            })
            .collect();
    }

    let event: StreamEvent = match serde_json::from_value(value.clone()) {
        Ok(ev) => ev,
        Err(e) => {
            tracing::debug!("Skipping unrecognised stream event: {}", e);
            return Vec::new();
        }
    };

    let mut events = Vec::with_capacity(1);
    let tool_uses: Vec<StreamEvent> = if matches!(event, StreamEvent::Assistant { .. }) {
        content_blocks(&value)
            .filter(|b| b.get("type").and_then(Value::as_str) == Some("tool_use"))
            .filter_map(|b| {
                Some(StreamEvent::ToolUse {
                    id: b.get("id").and_then(Value::as_str).map(String::from),
                    name: b.get("name")?.as_str()?.to_string(),
                    input: b.get("input").cloned().unwrap_or(Value::Null),
                    invocation: InvocationId::default(),
                })
            })
            .collect()
    } else {
        Vec::new()
    };
    events.push(event);
    events.extend(tool_uses);
    events
}

/// Parse a whole NDJSON buffer, skipping malformed lines.
pub fn parse_ndjson(data: &str) -> Vec<StreamEvent> {
    data.lines().flat_map(parse_stream_line).collect()
}

fn content_blocks(value: &Value) -> impl Iterator<Item = &Value> {
    value
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
}

fn floor_char_boundary(s: &str, max: usize) -> usize {
    let mut end = s.len().min(max);
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    end
}

// =============================================================================
// Tool input extraction
// =============================================================================

/// What a tool call wants to do, reduced to what the permission gate checks
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolRequest {
    pub tool_name: String,
    pub command: String,
    pub paths: Vec<String>,
}

const PATH_KEYS: [&str; 3] = ["file_path", "path", "notebook_path"];

impl ToolRequest {
    /// Best-effort extraction. Unparseable input yields an empty command
    /// and no paths.
    pub fn from_tool_use(name: &str, input: &Value) -> Self {
        let parsed;
        let input = match input {
            Value::String(raw) => {
                parsed = serde_json::from_str::<Value>(raw).unwrap_or(Value::Null);
                &parsed
            }
            other => other,
        };

        let command = input
            .get("command")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let mut paths: Vec<String> = PATH_KEYS
            .iter()
            .filter_map(|key| input.get(*key).and_then(Value::as_str))
            .filter(|p| !p.is_empty())
            .map(String::from)
            .collect();
        if let Some(list) = input.get("paths").and_then(Value::as_array) {
            paths.extend(list.iter().filter_map(Value::as_str).map(String::from));
        }

        Self {
            tool_name: name.to_string(),
            command,
            paths,
        }
    }

    /// Tools whose paths count as files touched for a resumption prompt.
    pub fn modifies_files(&self) -> bool {
        matches!(
            self.tool_name.as_str(),
            "Write" | "Edit" | "MultiEdit" | "NotebookEdit"
        )
    }
}

// =============================================================================
// Sidecar → CLI lines
// =============================================================================

/// Tool-result line answering a pending tool call.
pub fn tool_result_line(output: &str, is_error: bool) -> String {
    let msg = serde_json::json!({
        "type": "tool_result",
        "output": output,
        "is_error": is_error,
    });
    format!("{}\n", msg)
}

/// User message line for a CLI running with stream-json input.
pub fn user_message_line(content: &str, session_id: Option<&str>) -> String {
    let msg = serde_json::json!({
        "type": "user",
        "message": {
            "role": "user",
            "content": content,
        },
        "parent_tool_use_id": null,
        "session_id": session_id,
    });
    format!("{}\n", msg)
}

// =============================================================================
// Text extraction
// =============================================================================

/// Pull human-readable text out of a structured message body.
///
/// Accepts a plain string, a `{"type":"text","text":..}` block, an array of
/// blocks, or a message object with a `content` field.
pub fn extract_text(body: &Value) -> Option<String> {
    let text = match body {
        Value::String(s) => s.clone(),
        Value::Array(blocks) => blocks
            .iter()
            .filter_map(extract_text)
            .collect::<Vec<_>>()
            .join("\n"),
        Value::Object(map) => {
            let block_type = map.get("type").and_then(Value::as_str);
            if let Some(text) = map.get("text").and_then(Value::as_str) {
                if block_type.is_none() || block_type == Some("text") {
                    text.to_string()
                } else {
                    String::new()
                }
            } else if let Some(content) = map.get("content") {
                extract_text(content).unwrap_or_default()
            } else {
                String::new()
            }
        }
        _ => String::new(),
    };

    if text.trim().is_empty() {
        None
    } else {
        Some(text)
    }
}
