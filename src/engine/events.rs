//! Stream event vocabulary.
//!
//! One `StreamEvent` per framed line from the backend. Events are immutable
//! once built; everything the viewer shows is a projection of the ordered
//! list of events accumulated for a turn.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    Start,
    Finish,
    TextChunk,
    SubAgentTextChunk,
    ToolCallStart,
    ToolResult,
    TableChunk,
    CodeChunk,
    ChartChunk,
    #[serde(other)]
    Unknown,
}

impl EventKind {
    /// Chunk kinds fold into a consolidated message keyed by `messageId`.
    pub fn is_chunk(self) -> bool {
        self.is_text() || self.is_structured()
    }

    pub fn is_text(self) -> bool {
        matches!(self, EventKind::TextChunk | EventKind::SubAgentTextChunk)
    }

    pub fn is_structured(self) -> bool {
        matches!(
            self,
            EventKind::TableChunk | EventKind::CodeChunk | EventKind::ChartChunk
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Start => "start",
            EventKind::Finish => "finish",
            EventKind::TextChunk => "text-chunk",
            EventKind::SubAgentTextChunk => "sub-agent-text-chunk",
            EventKind::ToolCallStart => "tool-call-start",
            EventKind::ToolResult => "tool-result",
            EventKind::TableChunk => "table-chunk",
            EventKind::CodeChunk => "code-chunk",
            EventKind::ChartChunk => "chart-chunk",
            EventKind::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventPayload {
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "message_id")]
    pub message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
    /// Plain text for text chunks, structured data for table/code/chart chunks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "final_answer")]
    pub final_answer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "tool_call_id")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "tool_name")]
    pub tool_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "tool_result")]
    pub tool_result: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamEvent {
    #[serde(alias = "type")]
    pub kind: EventKind,
    #[serde(default, alias = "run_id")]
    pub run_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "parent_id")]
    pub parent_id: Option<String>,
    /// The tool call in the parent run that spawned this run.
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "tool_call_id")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "agent_id")]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<EventPayload>,
}

/// Identity used to suppress at-least-once redelivery.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey {
    pub run_id: String,
    pub kind: EventKind,
    pub timestamp: String,
    pub message_id: Option<String>,
}

impl StreamEvent {
    pub fn new(kind: EventKind, run_id: impl Into<String>, timestamp: impl Into<String>) -> Self {
        Self {
            kind,
            run_id: run_id.into(),
            parent_id: None,
            tool_call_id: None,
            agent_id: None,
            timestamp: timestamp.into(),
            payload: None,
        }
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>, tool_call_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self.tool_call_id = Some(tool_call_id.into());
        self
    }

    pub fn with_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    pub fn with_payload(mut self, payload: EventPayload) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn message_id(&self) -> Option<&str> {
        self.payload
            .as_ref()
            .and_then(|p| p.message_id.as_deref())
            .filter(|id| !id.is_empty())
    }

    /// Id of the tool call this event starts or resolves. Only meaningful for
    /// `tool-call-start` and `tool-result`.
    pub fn payload_tool_call_id(&self) -> Option<&str> {
        self.payload
            .as_ref()
            .and_then(|p| p.tool_call_id.as_deref())
            .filter(|id| !id.is_empty())
    }

    pub fn tool_name(&self) -> Option<&str> {
        self.payload
            .as_ref()
            .and_then(|p| p.tool_name.as_deref())
            .filter(|name| !name.is_empty())
    }

    pub fn dedup_key(&self) -> DedupKey {
        DedupKey {
            run_id: self.run_id.clone(),
            kind: self.kind,
            timestamp: self.timestamp.clone(),
            message_id: self.message_id().map(String::from),
        }
    }
}

/// JavaScript-style truthiness, used by the per-field merge rule.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

pub(crate) fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.is_empty())
}
