//! View mapping: execution forest + consolidated items + disclosure state
//! → a recursive, serializable render tree.
//!
//! Hosts draw the `RenderTree`; they never look at raw events.

use chrono::DateTime;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;

use super::consolidate::{consolidate_node, ConsolidatedMessage, ContentKind, RenderItem};
use super::disclosure::{DisclosureKey, DisclosureState};
use super::events::non_empty;
use super::tree::{ExecutionForest, ExecutionNode, RunStatus, ToolCallNode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    Streaming,
    Complete,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderTree {
    pub turn_id: String,
    pub status: TurnStatus,
    pub streaming: bool,
    /// Set when the turn failed; replaces the turn's content.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub roots: Vec<RunView>,
}

impl RenderTree {
    /// Depth-first walk over every run in display order.
    pub fn runs(&self) -> Vec<&RunView> {
        let mut out = Vec::new();
        for root in &self.roots {
            root.collect_runs(&mut out);
        }
        out
    }

    pub fn find_run(&self, run_id: &str) -> Option<&RunView> {
        self.runs().into_iter().find(|run| run.run_id == run_id)
    }

    pub fn find_message(&self, run_id: &str, message_id: &str) -> Option<&MessageView> {
        self.find_run(run_id).and_then(|run| {
            run.items.iter().find_map(|item| match item {
                ViewItem::Message(m) if m.message_id == message_id => Some(m),
                _ => None,
            })
        })
    }

    pub fn find_tool_call(&self, run_id: &str, tool_call_id: &str) -> Option<&ToolCallView> {
        self.find_run(run_id).and_then(|run| {
            run.items.iter().find_map(|item| match item {
                ViewItem::ToolCall(t) if t.tool_call_id == tool_call_id => Some(t),
                _ => None,
            })
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Running,
    Finished,
}

impl From<RunStatus> for RunState {
    fn from(status: RunStatus) -> Self {
        match status {
            RunStatus::Running => RunState::Running,
            RunStatus::Finished => RunState::Finished,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunView {
    pub run_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    pub depth: usize,
    pub state: RunState,
    pub expanded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
    pub items: Vec<ViewItem>,
}

impl RunView {
    fn collect_runs<'s>(&'s self, out: &mut Vec<&'s RunView>) {
        out.push(self);
        for item in &self.items {
            if let ViewItem::ToolCall(call) = item {
                if let Some(child) = &call.child {
                    child.collect_runs(out);
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ViewItem {
    Message(MessageView),
    ToolCall(ToolCallView),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    pub message_id: String,
    pub body: MessageBody,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
    pub thinking_expanded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

/// Content of a message, one variant per chunk family.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum MessageBody {
    /// Nothing but (possibly) thinking so far.
    Pending,
    Text {
        text: String,
        #[serde(rename = "fromSubAgent")]
        from_sub_agent: bool,
    },
    Table {
        headers: Vec<String>,
        rows: Vec<Vec<String>>,
        #[serde(rename = "finalAnswer", skip_serializing_if = "Option::is_none")]
        final_answer: Option<String>,
    },
    Code {
        #[serde(skip_serializing_if = "Option::is_none")]
        language: Option<String>,
        code: String,
        #[serde(rename = "finalAnswer", skip_serializing_if = "Option::is_none")]
        final_answer: Option<String>,
    },
    Chart {
        #[serde(skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        #[serde(rename = "chartType", skip_serializing_if = "Option::is_none")]
        chart_type: Option<String>,
        spec: Value,
        #[serde(rename = "finalAnswer", skip_serializing_if = "Option::is_none")]
        final_answer: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallState {
    Pending,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallView {
    pub tool_call_id: String,
    pub tool_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub args: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    pub state: ToolCallState,
    pub expanded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub child: Option<Box<RunView>>,
}

pub fn build_view(
    forest: &ExecutionForest<'_>,
    disclosure: &DisclosureState,
) -> Vec<RunView> {
    let mut visited = HashSet::new();
    forest
        .root_nodes()
        .filter_map(|node| map_run(forest, node, 0, disclosure, &mut visited))
        .collect()
}

fn map_run(
    forest: &ExecutionForest<'_>,
    node: &ExecutionNode<'_>,
    depth: usize,
    disclosure: &DisclosureState,
    visited: &mut HashSet<String>,
) -> Option<RunView> {
    if !visited.insert(node.run_id.clone()) {
        return None;
    }
    let items = consolidate_node(node)
        .into_iter()
        .filter_map(|item| match item {
            RenderItem::Message(message) => Some(ViewItem::Message(map_message(
                &node.run_id,
                message,
                disclosure,
            ))),
            RenderItem::ToolCall { tool_call_id, .. } => {
                let call = node.tool_calls.get(&tool_call_id)?;
                Some(ViewItem::ToolCall(map_tool_call(
                    forest,
                    &node.run_id,
                    call,
                    depth,
                    disclosure,
                    visited,
                )))
            }
        })
        .collect();

    let start_time = node.start_time().map(String::from);
    let end_time = node.end_time().map(String::from);
    Some(RunView {
        run_id: node.run_id.clone(),
        agent_id: node.agent_id.clone(),
        depth,
        state: node.status().into(),
        expanded: disclosure.is_expanded(&DisclosureKey::run(&node.run_id)),
        duration_ms: duration_ms(start_time.as_deref(), end_time.as_deref()),
        start_time,
        end_time,
        items,
    })
}

fn map_tool_call(
    forest: &ExecutionForest<'_>,
    run_id: &str,
    call: &ToolCallNode<'_>,
    depth: usize,
    disclosure: &DisclosureState,
    visited: &mut HashSet<String>,
) -> ToolCallView {
    let child = call
        .child_agent
        .as_deref()
        .and_then(|id| forest.get(id))
        .and_then(|child| map_run(forest, child, depth + 1, disclosure, visited))
        .map(Box::new);
    ToolCallView {
        tool_call_id: call.tool_call_id.clone(),
        tool_name: call.tool_name.clone(),
        args: call.start_event.payload.as_ref().and_then(|p| p.args.clone()),
        result: call
            .result_event
            .and_then(|e| e.payload.as_ref())
            .and_then(|p| p.tool_result.clone()),
        state: if call.is_completed() {
            ToolCallState::Completed
        } else {
            ToolCallState::Pending
        },
        expanded: disclosure.is_expanded(&DisclosureKey::tool_call(run_id, &call.tool_call_id)),
        child,
    }
}

fn map_message(run_id: &str, message: ConsolidatedMessage, disclosure: &DisclosureState) -> MessageView {
    let thinking_expanded =
        disclosure.is_expanded(&DisclosureKey::message(run_id, &message.message_id));
    let body = message_body(&message);
    MessageView {
        message_id: message.message_id,
        body,
        thinking: message.thinking.filter(|t| !t.is_empty()),
        thinking_expanded,
        suggestion: message.suggestion.filter(|s| !s.is_empty()),
    }
}

pub fn message_body(message: &ConsolidatedMessage) -> MessageBody {
    if !message.has_content() {
        return MessageBody::Pending;
    }
    let final_answer = non_empty(&message.final_answer).map(String::from);
    let structured = message.structured_content.as_ref();
    match message.kind {
        ContentKind::Text | ContentKind::SubAgentText => MessageBody::Text {
            // A text message may carry only a final answer.
            text: non_empty(&message.text_content)
                .or(final_answer.as_deref())
                .unwrap_or_default()
                .to_string(),
            from_sub_agent: message.kind == ContentKind::SubAgentText,
        },
        ContentKind::Table => {
            let (headers, rows) = structured.map(decode_table).unwrap_or_default();
            MessageBody::Table {
                headers,
                rows,
                final_answer,
            }
        }
        ContentKind::Code => {
            let (language, code) = structured.map(decode_code).unwrap_or_default();
            MessageBody::Code {
                language,
                code,
                final_answer,
            }
        }
        ContentKind::Chart => MessageBody::Chart {
            title: structured.and_then(|v| string_field(v, &["title", "name"])),
            chart_type: structured.and_then(|v| string_field(v, &["type", "chartType", "kind"])),
            spec: structured.cloned().unwrap_or(Value::Null),
            final_answer,
        },
    }
}

fn decode_table(value: &Value) -> (Vec<String>, Vec<Vec<String>>) {
    let mut headers: Vec<String> = value
        .get("headers")
        .or_else(|| value.get("columns"))
        .and_then(Value::as_array)
        .map(|cols| cols.iter().map(cell_text).collect())
        .unwrap_or_default();

    let raw_rows = value
        .get("rows")
        .or_else(|| value.get("data"))
        .and_then(Value::as_array)
        .or_else(|| value.as_array());

    let Some(raw_rows) = raw_rows else {
        return (headers, Vec::new());
    };

    if headers.is_empty() {
        if let Some(Value::Object(first)) = raw_rows.first() {
            headers = first.keys().cloned().collect();
        }
    }

    let rows = raw_rows
        .iter()
        .map(|row| match row {
            Value::Array(cells) => cells.iter().map(cell_text).collect(),
            Value::Object(map) => headers
                .iter()
                .map(|h| map.get(h).map(cell_text).unwrap_or_default())
                .collect(),
            other => vec![cell_text(other)],
        })
        .collect();
    (headers, rows)
}

fn decode_code(value: &Value) -> (Option<String>, String) {
    match value {
        Value::String(code) => (None, code.clone()),
        other => (
            string_field(other, &["language", "lang"]),
            string_field(other, &["code", "content", "source"]).unwrap_or_else(|| other.to_string()),
        ),
    }
}

fn string_field(value: &Value, names: &[&str]) -> Option<String> {
    names
        .iter()
        .find_map(|name| value.get(*name).and_then(Value::as_str))
        .filter(|s| !s.is_empty())
        .map(String::from)
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn duration_ms(start: Option<&str>, end: Option<&str>) -> Option<i64> {
    let start = DateTime::parse_from_rfc3339(start?).ok()?;
    let end = DateTime::parse_from_rfc3339(end?).ok()?;
    let ms = (end - start).num_milliseconds();
    (ms >= 0).then_some(ms)
}
