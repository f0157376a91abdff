//! Turns the external tool's raw output into job events.
//!
//! The translator is fed byte chunks exactly as the process produces them
//! (stdout and stderr intermixed, no alignment with line boundaries). Each
//! complete line is classified independently:
//!
//! | Line                         | Result                                            |
//! |------------------------------|---------------------------------------------------|
//! | not a stream-json record     | `text` line, verbatim                             |
//! | `system`                     | nothing                                           |
//! | `assistant` text             | Terminal State capture, else one `text` per line  |
//! | `assistant` thinking         | `thinking` line                                   |
//! | `assistant` tool_use         | `tool_use` line with full input                   |
//! | `user` tool_result           | `tool_error`, or one batched `tasks_finished`     |
//! | `result`                     | result text, Terminal State capture, `text` lines |
//! | anything else                | nothing                                           |
//!
//! All translator output is a `process_output_line` event whose payload
//! `kind` names the line kind above.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::debug;

use super::terminal::{TerminalState, parse_terminal_line, strip_terminal_lines};
use super::{
    ContentBlock, Message, StreamEvent, Usage, describe_tool_use, is_delegation_tool,
    tool_result_text,
};
use crate::monitor::{EventData, EventSink, EventType, data};
use crate::notify::Notifier;
use crate::util::truncate;

/// Maximum length of the error excerpt carried by a `tool_error` line.
const TOOL_ERROR_EXCERPT_LEN: usize = 300;

/// Cost and token usage reported on the final result record.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResultUsage {
    pub cost_usd: f64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_write_tokens: u64,
    pub num_turns: Option<u32>,
    pub duration_ms: Option<u64>,
    pub is_error: bool,
}

impl ResultUsage {
    fn from_record(
        cost: Option<f64>,
        usage: Option<&Usage>,
        num_turns: Option<u32>,
        duration_ms: Option<u64>,
        is_error: bool,
    ) -> Self {
        let usage = usage.cloned().unwrap_or_default();
        Self {
            cost_usd: cost.unwrap_or(0.0),
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            cache_read_tokens: usage.cache_read_input_tokens,
            cache_write_tokens: usage.cache_creation_input_tokens,
            num_turns,
            duration_ms,
            is_error,
        }
    }

    /// Payload of the `llm_response` event the workflow records for a run.
    pub fn to_event_data(&self) -> EventData {
        match serde_json::to_value(self) {
            Ok(value) => data(value),
            Err(_) => EventData::new(),
        }
    }
}

/// What the translator exposes once the process has terminated.
#[derive(Debug, Clone, Default)]
pub struct TranslatorOutput {
    pub terminal_state: Option<TerminalState>,
    pub result_text: String,
    pub raw: Vec<u8>,
    pub usage: Option<ResultUsage>,
}

impl TranslatorOutput {
    /// The final message: the result text, or the raw output when the
    /// process never produced a result record.
    pub fn output(&self) -> String {
        if self.result_text.is_empty() {
            String::from_utf8_lossy(&self.raw).into_owned()
        } else {
            self.result_text.clone()
        }
    }

    /// Leading part of the raw output, for error reports.
    pub fn raw_excerpt(&self, max_len: usize) -> String {
        truncate(String::from_utf8_lossy(&self.raw).trim(), max_len)
    }
}

/// A delegated sub-task that has been started but not reported finished.
#[derive(Debug, Clone)]
struct PendingTask {
    description: String,
    subagent_type: Option<String>,
}

/// Per-job adapter from raw process output to events.
pub struct Translator {
    job_id: String,
    sink: Arc<dyn EventSink>,
    notifier: Option<Arc<dyn Notifier>>,
    notifications_suppressed: bool,
    line_buf: Vec<u8>,
    raw: Vec<u8>,
    result_text: String,
    terminal_state: Option<TerminalState>,
    pending_tasks: HashMap<String, PendingTask>,
    usage: Option<ResultUsage>,
}

impl Translator {
    pub fn new(job_id: impl Into<String>, sink: Arc<dyn EventSink>) -> Self {
        Self {
            job_id: job_id.into(),
            sink,
            notifier: None,
            notifications_suppressed: false,
            line_buf: Vec::new(),
            raw: Vec::new(),
            result_text: String::new(),
            terminal_state: None,
            pending_tasks: HashMap::new(),
            usage: None,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Stop forwarding commentary for the rest of this run.
    pub fn suppress_notifications(mut self, suppressed: bool) -> Self {
        self.notifications_suppressed = suppressed;
        self
    }

    pub fn terminal_state(&self) -> Option<&TerminalState> {
        self.terminal_state.as_ref()
    }

    /// Number of delegated sub-tasks still waiting for their result.
    pub fn pending_task_count(&self) -> usize {
        self.pending_tasks.len()
    }

    /// Feed the next chunk of process output.
    pub fn feed(&mut self, chunk: &[u8]) {
        self.raw.extend_from_slice(chunk);
        let mut rest = chunk;
        while let Some(pos) = rest.iter().position(|&b| b == b'\n') {
            self.line_buf.extend_from_slice(&rest[..pos]);
            let line = std::mem::take(&mut self.line_buf);
            self.process_line(&String::from_utf8_lossy(&line));
            rest = &rest[pos + 1..];
        }
        self.line_buf.extend_from_slice(rest);
    }

    /// Flush a trailing unterminated line and hand over the results.
    pub fn finish(mut self) -> TranslatorOutput {
        if !self.line_buf.is_empty() {
            let line = std::mem::take(&mut self.line_buf);
            self.process_line(&String::from_utf8_lossy(&line));
        }
        if !self.pending_tasks.is_empty() {
            debug!(
                job_id = %self.job_id,
                pending = self.pending_tasks.len(),
                "Stream ended with unfinished sub-tasks"
            );
        }
        TranslatorOutput {
            terminal_state: self.terminal_state,
            result_text: self.result_text,
            raw: self.raw,
            usage: self.usage,
        }
    }

    fn process_line(&mut self, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }

        let record: StreamEvent = match serde_json::from_str(line) {
            Ok(record) => record,
            Err(_) => {
                self.emit_text(line, None);
                return;
            }
        };

        match record {
            StreamEvent::System { .. } => {}
            StreamEvent::Assistant {
                message,
                parent_tool_use_id,
            } => self.handle_assistant(&message, parent_tool_use_id.as_deref()),
            StreamEvent::User { message, .. } => self.handle_tool_results(&message),
            StreamEvent::Result {
                result,
                error,
                errors,
                is_error,
                total_cost_usd,
                duration_ms,
                num_turns,
                usage,
                ..
            } => {
                self.usage = Some(ResultUsage::from_record(
                    total_cost_usd,
                    usage.as_ref(),
                    num_turns,
                    duration_ms,
                    is_error,
                ));
                let text = match error.filter(|e| !e.is_empty()) {
                    Some(error) => error,
                    None if !errors.is_empty() => errors.join("\n"),
                    None => result.unwrap_or_default(),
                };
                self.handle_result_text(text);
            }
            StreamEvent::Unknown => {
                debug!(job_id = %self.job_id, "Ignoring unknown stream record");
            }
        }
    }

    fn handle_assistant(&mut self, message: &Message, parent: Option<&str>) {
        for block in message.blocks() {
            match block {
                ContentBlock::Text { text } => {
                    self.scan_text(&text, parent);
                    if parent.is_none() {
                        self.forward_notification(&text);
                    }
                }
                ContentBlock::Thinking { thinking } => {
                    if thinking.trim().is_empty() {
                        continue;
                    }
                    let mut payload = data(json!({
                        "text": thinking,
                        "captured_at": Utc::now().to_rfc3339(),
                    }));
                    add_parent(&mut payload, parent);
                    self.emit_line("thinking", payload);
                }
                ContentBlock::ToolUse { id, name, input } => {
                    if is_delegation_tool(&name) {
                        let field = |key: &str| input.get(key).and_then(Value::as_str);
                        self.pending_tasks.insert(
                            id.clone(),
                            PendingTask {
                                description: field("description").unwrap_or("sub-task").to_string(),
                                subagent_type: field("subagent_type").map(String::from),
                            },
                        );
                    }
                    let mut payload = data(json!({
                        "tool_name": name,
                        "tool_use_id": id,
                        "tool_input": input.to_string(),
                        "description": describe_tool_use(&name, &input),
                    }));
                    add_parent(&mut payload, parent);
                    self.emit_line("tool_use", payload);
                }
                ContentBlock::ToolResult { .. } | ContentBlock::Other => {}
            }
        }
    }

    fn handle_tool_results(&mut self, message: &Message) {
        let mut finished = Vec::new();
        for block in message.blocks() {
            let ContentBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
            } = block
            else {
                continue;
            };
            if is_error {
                let excerpt = truncate(tool_result_text(&content).trim(), TOOL_ERROR_EXCERPT_LEN);
                self.emit_line(
                    "tool_error",
                    data(json!({ "tool_use_id": tool_use_id, "error": excerpt })),
                );
            } else if let Some(task) = self.pending_tasks.remove(&tool_use_id) {
                finished.push(task);
            }
        }

        if finished.is_empty() {
            return;
        }
        let descriptions: Vec<&str> = finished.iter().map(|t| t.description.as_str()).collect();
        let agents: Vec<Option<&str>> = finished
            .iter()
            .map(|t| t.subagent_type.as_deref())
            .collect();
        self.emit_line(
            "tasks_finished",
            data(json!({
                "count": finished.len(),
                "tasks": descriptions,
                "subagent_types": agents,
                "text": format!("Finished {}: {}", plural_tasks(finished.len()), descriptions.join(", ")),
            })),
        );
    }

    fn handle_result_text(&mut self, text: String) {
        self.scan_text(&text, None);
        self.result_text = text;
    }

    /// Capture a Terminal State if one is embedded, emit every other
    /// non-empty line.
    fn scan_text(&mut self, text: &str, parent: Option<&str>) {
        for line in text.lines() {
            if let Some(state) = parse_terminal_line(line) {
                if self.terminal_state.is_none() {
                    debug!(job_id = %self.job_id, status = %state.status, "Captured terminal state");
                    self.terminal_state = Some(state);
                }
                continue;
            }
            if !line.trim().is_empty() {
                self.emit_text(line.trim_end(), parent);
            }
        }
    }

    fn forward_notification(&self, text: &str) {
        if self.notifications_suppressed {
            return;
        }
        let Some(notifier) = &self.notifier else {
            return;
        };
        let stripped = strip_terminal_lines(text);
        let stripped = stripped.trim();
        if !stripped.is_empty() {
            notifier.notify(&self.job_id, stripped);
        }
    }

    fn emit_text(&self, text: &str, parent: Option<&str>) {
        let mut payload = data(json!({ "text": text }));
        add_parent(&mut payload, parent);
        self.emit_line("text", payload);
    }

    fn emit_line(&self, kind: &str, mut payload: EventData) {
        payload.insert("kind".into(), kind.into());
        self.sink
            .emit(&self.job_id, EventType::ProcessOutputLine, payload);
    }
}

fn add_parent(payload: &mut EventData, parent: Option<&str>) {
    if let Some(parent) = parent {
        payload.insert("parent_tool_use_id".into(), parent.into());
    }
}

fn plural_tasks(n: usize) -> String {
    if n == 1 {
        "1 sub-task".to_string()
    } else {
        format!("{n} sub-tasks")
    }
}
