use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Flat string-keyed payload carried by every event. The hub never looks
/// inside it.
pub type EventData = Map<String, Value>;

/// Kind of fact an [`Event`] records about a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    JobStarted,
    LlmCall,
    LlmResponse,
    ToolStarted,
    ToolCompleted,
    ProcessOutputLine,
    SlackNotification,
    JobCompleted,
    JobError,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::JobStarted => "job_started",
            Self::LlmCall => "llm_call",
            Self::LlmResponse => "llm_response",
            Self::ToolStarted => "tool_started",
            Self::ToolCompleted => "tool_completed",
            Self::ProcessOutputLine => "process_output_line",
            Self::SlackNotification => "slack_notification",
            Self::JobCompleted => "job_completed",
            Self::JobError => "job_error",
        }
    }

    /// True for the two event types that end a job.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::JobCompleted | Self::JobError)
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "job_started" => Ok(Self::JobStarted),
            "llm_call" => Ok(Self::LlmCall),
            "llm_response" => Ok(Self::LlmResponse),
            "tool_started" => Ok(Self::ToolStarted),
            "tool_completed" => Ok(Self::ToolCompleted),
            "process_output_line" => Ok(Self::ProcessOutputLine),
            "slack_notification" => Ok(Self::SlackNotification),
            "job_completed" => Ok(Self::JobCompleted),
            "job_error" => Ok(Self::JobError),
            _ => Err(format!("Invalid event type: {}", s)),
        }
    }
}

/// A single, immutable fact about a job's progress.
///
/// `id` is assigned by the hub loop and is the authoritative order for
/// events of the same job. `timestamp` is taken when the producer called
/// `emit` and is only advisory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub job_id: String,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub data: EventData,
}

impl Event {
    /// Sequence number parsed back out of `id`, if it is numeric.
    pub fn seq(&self) -> Option<u64> {
        self.id.parse().ok()
    }

    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }

    pub fn f64_field(&self, key: &str) -> Option<f64> {
        self.data.get(key).and_then(Value::as_f64)
    }

    /// Integer payload field; accepts floats as well since JSON producers
    /// do not agree on how to encode token counts.
    pub fn i64_field(&self, key: &str) -> Option<i64> {
        let value = self.data.get(key)?;
        value
            .as_i64()
            .or_else(|| value.as_f64().map(|v| v as i64))
    }
}

/// Build an [`EventData`] map from a `serde_json::json!` object literal.
///
/// Non-object values yield an empty map.
pub fn data(value: Value) -> EventData {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// Generate a fresh job identifier.
pub fn new_job_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
