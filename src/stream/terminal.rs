//! Terminal State: the single-line status record the external tool is asked
//! to print at the very end of its run.
//!
//! The record is `FOREMAN_STATUS: {"status": "...", "message": "..."}` on a
//! line of its own. Compliance is best-effort, so recognition is strict (exact
//! prefix, parseable JSON, non-empty status) and absence is never an error.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Literal prefix that marks a Terminal State line.
pub const TERMINAL_STATE_PREFIX: &str = "FOREMAN_STATUS:";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalStatus {
    Completed,
    #[serde(alias = "needs-information")]
    NeedsInformation,
    Error,
}

impl TerminalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TerminalStatus::Completed => "completed",
            TerminalStatus::NeedsInformation => "needs_information",
            TerminalStatus::Error => "error",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "completed" => Some(TerminalStatus::Completed),
            "needs_information" | "needs-information" => Some(TerminalStatus::NeedsInformation),
            "error" => Some(TerminalStatus::Error),
            _ => None,
        }
    }
}

impl fmt::Display for TerminalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome the external tool reported for its own run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TerminalState {
    pub status: TerminalStatus,
    pub message: String,
}

#[derive(Deserialize)]
struct RawTerminalState {
    #[serde(default)]
    status: String,
    #[serde(default)]
    message: String,
}

/// Recognize a Terminal State line.
///
/// Returns `None` unless the trimmed line starts with
/// [`TERMINAL_STATE_PREFIX`], the remainder parses, and the status is a
/// known, non-empty value.
pub fn parse_terminal_line(line: &str) -> Option<TerminalState> {
    let rest = line.trim().strip_prefix(TERMINAL_STATE_PREFIX)?;
    let raw: RawTerminalState = serde_json::from_str(rest.trim()).ok()?;
    if raw.status.trim().is_empty() {
        return None;
    }
    let status = TerminalStatus::parse(&raw.status)?;
    Some(TerminalState {
        status,
        message: raw.message,
    })
}

/// Drop every recognized Terminal State line from `text`.
pub fn strip_terminal_lines(text: &str) -> String {
    text.lines()
        .filter(|line| parse_terminal_line(line).is_none())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Instructions appended to every task so the tool reports its outcome.
pub fn status_instructions() -> String {
    format!(
        "\n\nWhen you are finished, print exactly one final line of the form\n\
         {TERMINAL_STATE_PREFIX} {{\"status\": \"<completed|needs_information|error>\", \"message\": \"<one or two sentences>\"}}\n\
         Use \"completed\" when the work is done and describe what changed, \
         \"needs_information\" when you cannot continue without an answer and ask the question, \
         and \"error\" when the task cannot be done and explain why."
    )
}
