//! Message consolidation.
//!
//! A run's chunk events are partial updates keyed by `messageId`. Folding them
//! per field (a field is replaced only by a truthy incoming value) yields one
//! message per id. Messages and tool-call starts are then interleaved by the
//! index of the event that first introduced them.

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;
use tracing::trace;

use super::events::{is_truthy, non_empty, EventKind, StreamEvent};
use super::tree::ExecutionNode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContentKind {
    Text,
    SubAgentText,
    Table,
    Code,
    Chart,
}

impl ContentKind {
    fn from_event(kind: EventKind) -> Option<Self> {
        match kind {
            EventKind::TextChunk => Some(ContentKind::Text),
            EventKind::SubAgentTextChunk => Some(ContentKind::SubAgentText),
            EventKind::TableChunk => Some(ContentKind::Table),
            EventKind::CodeChunk => Some(ContentKind::Code),
            EventKind::ChartChunk => Some(ContentKind::Chart),
            _ => None,
        }
    }

    pub fn is_structured(self) -> bool {
        matches!(self, ContentKind::Table | ContentKind::Code | ContentKind::Chart)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsolidatedMessage {
    pub message_id: String,
    pub kind: ContentKind,
    pub thinking: Option<String>,
    pub text_content: Option<String>,
    pub structured_content: Option<Value>,
    pub final_answer: Option<String>,
    pub suggestion: Option<String>,
    /// Index (within the run's events) of the event that created the message.
    pub first_seen: usize,
}

impl ConsolidatedMessage {
    fn new(message_id: &str, kind: ContentKind, first_seen: usize) -> Self {
        Self {
            message_id: message_id.to_string(),
            kind,
            thinking: None,
            text_content: None,
            structured_content: None,
            final_answer: None,
            suggestion: None,
            first_seen,
        }
    }

    /// Anything beyond reasoning: text, a final answer or structured data.
    pub fn has_content(&self) -> bool {
        non_empty(&self.text_content).is_some()
            || non_empty(&self.final_answer).is_some()
            || self.structured_content.as_ref().is_some_and(is_truthy)
    }

    pub fn has_thinking(&self) -> bool {
        non_empty(&self.thinking).is_some()
    }

    fn apply(&mut self, event: &StreamEvent, kind: ContentKind) {
        self.kind = kind;
        let Some(payload) = event.payload.as_ref() else {
            return;
        };
        if let Some(thinking) = non_empty(&payload.thinking) {
            self.thinking = Some(thinking.to_string());
        }
        if let Some(content) = payload.content.as_ref().filter(|v| is_truthy(v)) {
            if kind.is_structured() {
                self.structured_content = Some(decode_structured(content));
            } else {
                self.text_content = Some(content_as_text(content));
            }
        }
        if let Some(answer) = non_empty(&payload.final_answer) {
            self.final_answer = Some(answer.to_string());
        }
        if let Some(suggestion) = non_empty(&payload.suggestion) {
            self.suggestion = Some(suggestion.to_string());
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum RenderItem {
    Message(ConsolidatedMessage),
    ToolCall {
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        #[serde(rename = "firstSeen")]
        first_seen: usize,
    },
}

impl RenderItem {
    pub fn first_seen(&self) -> usize {
        match self {
            RenderItem::Message(message) => message.first_seen,
            RenderItem::ToolCall { first_seen, .. } => *first_seen,
        }
    }
}

/// Ordered, de-duplicated renderable items for one run.
pub fn consolidate_node(node: &ExecutionNode<'_>) -> Vec<RenderItem> {
    consolidate_events(node.events.iter().copied())
}

pub fn consolidate_events<'e>(events: impl IntoIterator<Item = &'e StreamEvent>) -> Vec<RenderItem> {
    let mut messages: IndexMap<String, ConsolidatedMessage> = IndexMap::new();
    let mut tool_calls: IndexMap<String, usize> = IndexMap::new();

    for (index, event) in events.into_iter().enumerate() {
        if event.kind == EventKind::ToolCallStart {
            if let Some(id) = event.payload_tool_call_id() {
                tool_calls.entry(id.to_string()).or_insert(index);
            }
            continue;
        }
        let Some(kind) = ContentKind::from_event(event.kind) else {
            continue;
        };
        let Some(message_id) = event.message_id() else {
            trace!(run_id = %event.run_id, kind = %event.kind, "chunk without messageId ignored");
            continue;
        };
        messages
            .entry(message_id.to_string())
            .or_insert_with(|| ConsolidatedMessage::new(message_id, kind, index))
            .apply(event, kind);
    }

    let mut items: Vec<RenderItem> = messages
        .into_values()
        .map(RenderItem::Message)
        .chain(
            tool_calls
                .into_iter()
                .map(|(tool_call_id, first_seen)| RenderItem::ToolCall {
                    tool_call_id,
                    first_seen,
                }),
        )
        .collect();
    // First-seen indices are distinct event positions, so a stable sort is exact.
    items.sort_by_key(RenderItem::first_seen);
    items
}

fn content_as_text(content: &Value) -> String {
    match content {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Structured payloads are sometimes double-encoded as a JSON string.
fn decode_structured(content: &Value) -> Value {
    if let Value::String(raw) = content {
        let trimmed = raw.trim_start();
        if trimmed.starts_with('{') || trimmed.starts_with('[') {
            if let Ok(parsed) = serde_json::from_str::<Value>(raw) {
                return parsed;
            }
        }
    }
    content.clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::events::EventPayload;
    use crate::engine::tree::build_execution_tree;
    use serde_json::json;

    fn chunk(kind: EventKind, ts: &str, message_id: &str, payload: EventPayload) -> StreamEvent {
        StreamEvent::new(kind, "A", ts).with_payload(EventPayload {
            message_id: Some(message_id.into()),
            ..payload
        })
    }

    fn text(ts: &str, message_id: &str, content: &str) -> StreamEvent {
        chunk(
            EventKind::TextChunk,
            ts,
            message_id,
            EventPayload {
                content: Some(json!(content)),
                ..Default::default()
            },
        )
    }

    fn thinking(ts: &str, message_id: &str, thought: &str) -> StreamEvent {
        chunk(
            EventKind::TextChunk,
            ts,
            message_id,
            EventPayload {
                thinking: Some(thought.into()),
                ..Default::default()
            },
        )
    }

    fn only_message(items: &[RenderItem]) -> &ConsolidatedMessage {
        assert_eq!(items.len(), 1);
        match &items[0] {
            RenderItem::Message(message) => message,
            other => panic!("expected message, got {other:?}"),
        }
    }

    #[test]
    fn simple_round_trip() {
        let events = vec![
            StreamEvent::new(EventKind::Start, "A", "01"),
            text("02", "m1", "Hi"),
            StreamEvent::new(EventKind::Finish, "A", "03"),
        ];
        let forest = build_execution_tree(&events);
        assert_eq!(forest.roots, vec!["A".to_string()]);
        let items = consolidate_node(forest.get("A").unwrap());
        let message = only_message(&items);
        assert_eq!(message.message_id, "m1");
        assert_eq!(message.text_content.as_deref(), Some("Hi"));
        assert!(forest.get("A").unwrap().tool_calls.is_empty());
    }

    #[test]
    fn fields_merge_independently_in_either_order() {
        let e1 = thinking("01", "m1", "a");
        let e2 = text("02", "m1", "b");

        let forward = consolidate_events([&e1, &e2]);
        let backward = consolidate_events([&e2, &e1]);
        let f = only_message(&forward);
        let b = only_message(&backward);
        assert_eq!(f.thinking.as_deref(), Some("a"));
        assert_eq!(f.text_content.as_deref(), Some("b"));
        assert_eq!(f.thinking, b.thinking);
        assert_eq!(f.text_content, b.text_content);
    }

    #[test]
    fn later_truthy_value_overwrites_and_empty_preserves() {
        let events = vec![
            text("01", "m1", "draft"),
            text("02", "m1", ""),
            text("03", "m1", "final"),
            text("04", "m1", ""),
        ];
        let items = consolidate_events(&events);
        assert_eq!(only_message(&items).text_content.as_deref(), Some("final"));
    }

    #[test]
    fn structured_chunk_merge_keeps_content() {
        let events = vec![
            chunk(
                EventKind::TableChunk,
                "01",
                "m3",
                EventPayload {
                    content: Some(json!({"headers": ["a", "b"], "rows": [[1, 2]]})),
                    ..Default::default()
                },
            ),
            chunk(
                EventKind::TableChunk,
                "02",
                "m3",
                EventPayload {
                    final_answer: Some("done".into()),
                    ..Default::default()
                },
            ),
        ];
        let items = consolidate_events(&events);
        let message = only_message(&items);
        assert_eq!(message.kind, ContentKind::Table);
        assert_eq!(message.final_answer.as_deref(), Some("done"));
        assert_eq!(
            message.structured_content,
            Some(json!({"headers": ["a", "b"], "rows": [[1, 2]]}))
        );
    }

    #[test]
    fn string_encoded_structure_is_decoded() {
        let events = vec![chunk(
            EventKind::CodeChunk,
            "01",
            "m1",
            EventPayload {
                content: Some(json!(r#"{"code":"fn main() {}","language":"rust"}"#)),
                ..Default::default()
            },
        )];
        let items = consolidate_events(&events);
        assert_eq!(
            only_message(&items).structured_content,
            Some(json!({"code": "fn main() {}", "language": "rust"}))
        );
    }

    #[test]
    fn chunk_without_message_id_is_ignored() {
        let orphan = StreamEvent::new(EventKind::TextChunk, "A", "01").with_payload(EventPayload {
            content: Some(json!("lost")),
            ..Default::default()
        });
        assert!(consolidate_events([&orphan]).is_empty());
    }

    #[test]
    fn items_interleave_by_first_seen_index() {
        let call = StreamEvent::new(EventKind::ToolCallStart, "A", "02").with_payload(EventPayload {
            tool_call_id: Some("t1".into()),
            tool_name: Some("search".into()),
            ..Default::default()
        });
        let events = vec![
            thinking("01", "m1", "planning"),
            call,
            text("03", "m2", "result"),
            // A late update to m1 keeps its original slot.
            text("04", "m1", "plan ready"),
        ];
        let items = consolidate_events(&events);
        let order: Vec<String> = items
            .iter()
            .map(|item| match item {
                RenderItem::Message(m) => m.message_id.clone(),
                RenderItem::ToolCall { tool_call_id, .. } => tool_call_id.clone(),
            })
            .collect();
        assert_eq!(order, vec!["m1", "t1", "m2"]);
        match &items[0] {
            RenderItem::Message(m) => {
                assert_eq!(m.thinking.as_deref(), Some("planning"));
                assert_eq!(m.text_content.as_deref(), Some("plan ready"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn content_predicates() {
        let events = vec![thinking("01", "m1", "hmm")];
        let items = consolidate_events(&events);
        let message = only_message(&items);
        assert!(message.has_thinking());
        assert!(!message.has_content());

        let events = vec![chunk(
            EventKind::ChartChunk,
            "01",
            "m2",
            EventPayload {
                content: Some(json!({"type": "bar"})),
                ..Default::default()
            },
        )];
        let items = consolidate_events(&events);
        assert!(only_message(&items).has_content());
    }

    #[test]
    fn suggestion_is_kept_alongside_content() {
        let events = vec![
            text("01", "m1", "answer"),
            chunk(
                EventKind::TextChunk,
                "02",
                "m1",
                EventPayload {
                    suggestion: Some("Ask about pricing?".into()),
                    ..Default::default()
                },
            ),
        ];
        let items = consolidate_events(&events);
        let message = only_message(&items);
        assert_eq!(message.text_content.as_deref(), Some("answer"));
        assert_eq!(message.suggestion.as_deref(), Some("Ask about pricing?"));
    }
}
