//! Line-oriented JSON output of the external code tool.
//!
//! The tool is run with `--output-format stream-json` and prints one record
//! per line. Only the shapes the [`Translator`](translator::Translator)
//! dispatches on are modelled; unknown record kinds and content blocks
//! deserialize to catch-all variants instead of failing the line.

pub mod terminal;
pub mod translator;

use serde::Deserialize;
use serde_json::Value;

use crate::util::truncate_label;

pub use terminal::{TERMINAL_STATE_PREFIX, TerminalState, TerminalStatus, parse_terminal_line};
pub use translator::{ResultUsage, Translator, TranslatorOutput};

/// Tool names the external tool uses for delegated sub-tasks.
const DELEGATION_TOOLS: &[&str] = &["Task", "Agent"];

/// Records from the tool's stream-json output format
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum StreamEvent {
    #[serde(rename = "system")]
    System {
        #[serde(default)]
        subtype: String,
    },

    #[serde(rename = "assistant")]
    Assistant {
        #[serde(default)]
        message: Message,
        /// Set when the turn belongs to a delegated sub-task.
        #[serde(default)]
        parent_tool_use_id: Option<String>,
    },

    /// Tool results are reported back as a user-role turn.
    #[serde(rename = "user")]
    User {
        #[serde(default)]
        message: Message,
        #[serde(default)]
        parent_tool_use_id: Option<String>,
    },

    #[serde(rename = "result")]
    Result {
        #[serde(default)]
        subtype: String,
        #[serde(default)]
        result: Option<String>,
        #[serde(default)]
        error: Option<String>,
        #[serde(default)]
        errors: Vec<String>,
        #[serde(default)]
        is_error: bool,
        #[serde(default)]
        total_cost_usd: Option<f64>,
        #[serde(default)]
        duration_ms: Option<u64>,
        #[serde(default)]
        num_turns: Option<u32>,
        #[serde(default)]
        usage: Option<Usage>,
    },

    #[serde(other)]
    Unknown,
}

/// Message body of an assistant or user turn.
///
/// `content` stays untyped: user turns may carry a bare string, and a
/// malformed block must not take the rest of the turn down with it.
#[derive(Debug, Default, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub content: Value,
}

impl Message {
    /// Content blocks that parse; anything else is skipped.
    pub fn blocks(&self) -> Vec<ContentBlock> {
        match &self.content {
            Value::Array(items) => items
                .iter()
                .filter_map(|item| serde_json::from_value(item.clone()).ok())
                .collect(),
            _ => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "text")]
    Text {
        #[serde(default)]
        text: String,
    },

    #[serde(rename = "thinking")]
    Thinking {
        #[serde(default)]
        thinking: String,
    },

    #[serde(rename = "tool_use")]
    ToolUse {
        #[serde(default)]
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },

    #[serde(rename = "tool_result")]
    ToolResult {
        #[serde(default)]
        tool_use_id: String,
        #[serde(default)]
        content: Value,
        #[serde(default)]
        is_error: bool,
    },

    #[serde(other)]
    Other,
}

/// Token usage reported on the final result record.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub cache_read_input_tokens: u64,
    #[serde(default)]
    pub cache_creation_input_tokens: u64,
}

/// Whether a tool invocation hands work to a delegated sub-task.
pub fn is_delegation_tool(name: &str) -> bool {
    DELEGATION_TOOLS.contains(&name)
}

/// Flatten a tool result's content (string, or list of text blocks) to text.
pub fn tool_result_text(content: &Value) -> String {
    match content {
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .filter_map(|item| item.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n"),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Extract a human-readable description from a tool use record
pub fn describe_tool_use(name: &str, input: &Value) -> String {
    let str_field = |key: &str| input.get(key).and_then(|v| v.as_str());
    match name {
        "Read" => format!(
            "Reading: {}",
            str_field("file_path").map(shorten_path).unwrap_or_else(|| "file".to_string())
        ),
        "Write" => format!(
            "Creating: {}",
            str_field("file_path").map(shorten_path).unwrap_or_else(|| "file".to_string())
        ),
        "Edit" | "MultiEdit" => format!(
            "Editing: {}",
            str_field("file_path").map(shorten_path).unwrap_or_else(|| "file".to_string())
        ),
        "Bash" => format!(
            "Running: {}",
            str_field("command")
                .map(|s| truncate_label(s, 40))
                .unwrap_or_else(|| "command".to_string())
        ),
        "Glob" => format!("Searching: {}", str_field("pattern").unwrap_or("*")),
        "Grep" => format!(
            "Grep: {}",
            str_field("pattern")
                .map(|s| truncate_label(s, 30))
                .unwrap_or_else(|| "pattern".to_string())
        ),
        "TodoWrite" => "Updating todo list".to_string(),
        n if is_delegation_tool(n) => {
            format!("Agent: {}", str_field("description").unwrap_or("subagent"))
        }
        _ => name.to_string(),
    }
}

/// Get an emoji for a tool
pub fn tool_emoji(name: &str) -> &'static str {
    match name {
        "Read" => "\u{1F4D6}",
        "Write" => "\u{1F4DD}",
        "Edit" | "MultiEdit" => "\u{270F}\u{FE0F}",
        "Bash" => "\u{2699}\u{FE0F}",
        "Glob" => "\u{1F50D}",
        "Grep" => "\u{1F50E}",
        n if is_delegation_tool(n) => "\u{1F916}",
        _ => "\u{1F527}",
    }
}

/// Shorten a file path to just the last 2 components
fn shorten_path(path: &str) -> String {
    let parts: Vec<&str> = path.split('/').collect();
    if parts.len() <= 2 {
        path.to_string()
    } else {
        parts[parts.len() - 2..].join("/")
    }
}

/// First line of a reasoning block, cut to a display snippet
pub fn truncate_thinking(text: &str, max_len: usize) -> String {
    let first_line = text.lines().next().unwrap_or(text);
    truncate_label(first_line.trim(), max_len)
}
