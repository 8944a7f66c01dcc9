//! Incremental render engine.
//!
//! A `RenderSession` owns everything for one assistant turn: the append-only
//! event log, disclosure state and the automatic policy. Every change
//! re-derives the tree and consolidated items from the full log; nothing
//! derived is patched in place.
//!
//! `TurnRegistry` isolates turns from each other and drops signals that
//! belong to a turn which was cancelled or never started.

use indexmap::IndexMap;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use tracing::{debug, info};
use uuid::Uuid;

use super::consolidate::{consolidate_node, RenderItem};
use super::disclosure::{AutoDisclosurePolicy, DisclosureDefaults, DisclosureKey, DisclosureState};
use super::events::{DedupKey, StreamEvent};
use super::tree::build_execution_tree;
use super::view::{build_view, RenderTree, TurnStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct TurnId(Uuid);

impl TurnId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TurnId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TurnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Append-only event list with duplicate suppression.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Vec<StreamEvent>,
    seen: HashSet<DedupKey>,
}

impl EventLog {
    /// Appends unless an event with the same `(runId, kind, timestamp,
    /// messageId)` is already present. Returns whether it was appended.
    pub fn append(&mut self, event: StreamEvent) -> bool {
        if !self.seen.insert(event.dedup_key()) {
            return false;
        }
        self.events.push(event);
        true
    }

    pub fn events(&self) -> &[StreamEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Knobs a host passes when opening a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    pub defaults: DisclosureDefaults,
    pub auto_expand_thinking: bool,
    pub auto_collapse_on_content: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            defaults: DisclosureDefaults::default(),
            auto_expand_thinking: true,
            auto_collapse_on_content: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RenderSession {
    turn_id: TurnId,
    log: EventLog,
    disclosure: DisclosureState,
    policy: AutoDisclosurePolicy,
    status: TurnStatus,
    streaming: bool,
    error: Option<String>,
}

impl RenderSession {
    pub fn new(turn_id: TurnId, options: SessionOptions) -> Self {
        Self {
            turn_id,
            log: EventLog::default(),
            disclosure: DisclosureState::new(options.defaults),
            policy: AutoDisclosurePolicy::new(
                options.auto_expand_thinking,
                options.auto_collapse_on_content,
            ),
            status: TurnStatus::Streaming,
            streaming: true,
            error: None,
        }
    }

    pub fn turn_id(&self) -> TurnId {
        self.turn_id
    }

    pub fn status(&self) -> TurnStatus {
        self.status
    }

    pub fn events(&self) -> &[StreamEvent] {
        self.log.events()
    }

    pub fn disclosure(&self) -> &DisclosureState {
        &self.disclosure
    }

    /// Single-event append. The disclosure policy runs when the log grew.
    pub fn append_event(&mut self, event: StreamEvent) -> bool {
        let appended = self.push(event);
        if appended {
            self.refresh_disclosure();
        }
        appended
    }

    /// Batch append; the disclosure policy is evaluated once for the batch.
    pub fn extend(&mut self, events: impl IntoIterator<Item = StreamEvent>) -> usize {
        let mut appended = 0;
        for event in events {
            if self.push(event) {
                appended += 1;
            }
        }
        if appended > 0 {
            self.refresh_disclosure();
        }
        appended
    }

    /// Host entry point: fold in the next event (if any), record whether the
    /// transport is still streaming, and return the current view.
    ///
    /// `streaming` only drives the live indicator. The turn ends through
    /// `complete`, `fail` or a cancellation, never through this flag.
    pub fn step(&mut self, event: Option<StreamEvent>, streaming: bool) -> RenderTree {
        if let Some(event) = event {
            self.append_event(event);
        }
        self.streaming = streaming;
        self.render()
    }

    pub fn render(&self) -> RenderTree {
        let roots = if self.error.is_some() {
            Vec::new()
        } else {
            let forest = build_execution_tree(self.log.events());
            build_view(&forest, &self.disclosure)
        };
        RenderTree {
            turn_id: self.turn_id.to_string(),
            status: self.status,
            streaming: self.streaming && self.status == TurnStatus::Streaming,
            error: self.error.clone(),
            roots,
        }
    }

    pub fn toggle(&mut self, key: &DisclosureKey) -> bool {
        let expanded = self.disclosure.toggle(key);
        debug!(turn_id = %self.turn_id, %key, expanded, "disclosure toggled");
        expanded
    }

    pub fn set_expanded(&mut self, key: DisclosureKey, expanded: bool) {
        self.disclosure.set_by_user(key, expanded);
    }

    pub fn complete(&mut self) {
        self.streaming = false;
        if self.status == TurnStatus::Streaming {
            self.status = TurnStatus::Complete;
        }
    }

    /// Terminal transport failure: the turn's content is replaced by `message`.
    pub fn fail(&mut self, message: impl Into<String>) {
        let message = message.into();
        info!(turn_id = %self.turn_id, error = %message, "turn failed");
        self.streaming = false;
        self.status = TurnStatus::Failed;
        self.error = Some(message);
    }

    fn cancel(&mut self) {
        self.streaming = false;
        if self.status == TurnStatus::Streaming {
            self.status = TurnStatus::Cancelled;
        }
    }

    fn push(&mut self, event: StreamEvent) -> bool {
        if !matches!(self.status, TurnStatus::Streaming) {
            debug!(turn_id = %self.turn_id, kind = %event.kind, "event after turn ended ignored");
            return false;
        }
        let appended = self.log.append(event);
        if !appended {
            debug!(turn_id = %self.turn_id, "duplicate event suppressed");
        }
        appended
    }

    fn refresh_disclosure(&mut self) {
        let forest = build_execution_tree(self.log.events());
        for node in forest.nodes.values() {
            let messages: Vec<_> = consolidate_node(node)
                .into_iter()
                .filter_map(|item| match item {
                    RenderItem::Message(message) => Some(message),
                    RenderItem::ToolCall { .. } => None,
                })
                .collect();
            self.policy.apply(&node.run_id, &messages, &mut self.disclosure);
        }
    }
}

/// What the transport relays for a turn.
#[derive(Debug, Clone, PartialEq)]
pub enum SignalBody {
    Event(StreamEvent),
    Complete,
    Error(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TurnSignal {
    pub turn_id: TurnId,
    pub body: SignalBody,
}

impl TurnSignal {
    pub fn event(turn_id: TurnId, event: StreamEvent) -> Self {
        Self {
            turn_id,
            body: SignalBody::Event(event),
        }
    }

    pub fn complete(turn_id: TurnId) -> Self {
        Self {
            turn_id,
            body: SignalBody::Complete,
        }
    }

    pub fn error(turn_id: TurnId, message: impl Into<String>) -> Self {
        Self {
            turn_id,
            body: SignalBody::Error(message.into()),
        }
    }
}

/// All turns of one conversation. Each turn has its own isolated session.
#[derive(Debug, Default)]
pub struct TurnRegistry {
    sessions: IndexMap<TurnId, RenderSession>,
    options: SessionOptions,
}

impl TurnRegistry {
    pub fn new(options: SessionOptions) -> Self {
        Self {
            sessions: IndexMap::new(),
            options,
        }
    }

    pub fn begin_turn(&mut self) -> TurnId {
        let turn_id = TurnId::new();
        self.sessions
            .insert(turn_id, RenderSession::new(turn_id, self.options));
        debug!(%turn_id, "turn started");
        turn_id
    }

    /// The user walked away: late transport activity for the turn is ignored.
    pub fn cancel(&mut self, turn_id: TurnId) {
        if let Some(session) = self.sessions.get_mut(&turn_id) {
            session.cancel();
            debug!(%turn_id, "turn cancelled");
        }
    }

    /// Applies a signal. Returns false if it was stale and dropped.
    pub fn dispatch(&mut self, signal: TurnSignal) -> bool {
        let Some(session) = self.sessions.get_mut(&signal.turn_id) else {
            debug!(turn_id = %signal.turn_id, "signal for unknown turn dropped");
            return false;
        };
        if session.status() != TurnStatus::Streaming {
            debug!(turn_id = %signal.turn_id, status = ?session.status(), "signal for ended turn dropped");
            return false;
        }
        match signal.body {
            SignalBody::Event(event) => {
                session.append_event(event);
            }
            SignalBody::Complete => session.complete(),
            SignalBody::Error(message) => session.fail(message),
        }
        true
    }

    pub fn session(&self, turn_id: TurnId) -> Option<&RenderSession> {
        self.sessions.get(&turn_id)
    }

    pub fn session_mut(&mut self, turn_id: TurnId) -> Option<&mut RenderSession> {
        self.sessions.get_mut(&turn_id)
    }

    pub fn render(&self, turn_id: TurnId) -> Option<RenderTree> {
        self.sessions.get(&turn_id).map(RenderSession::render)
    }

    /// Turns in creation order.
    pub fn turns(&self) -> impl Iterator<Item = TurnId> + '_ {
        self.sessions.keys().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::events::{EventKind, EventPayload};
    use crate::engine::view::{MessageBody, ViewItem};
    use serde_json::json;

    fn text(run: &str, ts: &str, message_id: &str, payload: EventPayload) -> StreamEvent {
        StreamEvent::new(EventKind::TextChunk, run, ts).with_payload(EventPayload {
            message_id: Some(message_id.into()),
            ..payload
        })
    }

    fn content(value: &str) -> EventPayload {
        EventPayload {
            content: Some(json!(value)),
            ..Default::default()
        }
    }

    fn thought(value: &str) -> EventPayload {
        EventPayload {
            thinking: Some(value.into()),
            ..Default::default()
        }
    }

    fn session() -> RenderSession {
        RenderSession::new(TurnId::new(), SessionOptions::default())
    }

    #[test]
    fn duplicate_append_is_idempotent() {
        let event = text("A", "01", "m1", content("Hi"));
        let mut once = session();
        once.append_event(event.clone());

        let mut twice = session();
        assert!(twice.append_event(event.clone()));
        assert!(!twice.append_event(event));

        assert_eq!(once.events(), twice.events());
        let (a, b) = (once.render(), twice.render());
        assert_eq!(a.roots, b.roots);
    }

    #[test]
    fn duplicate_text_chunk_yields_one_message() {
        let mut s = session();
        let event = text("A", "01", "m1", content("Hi"));
        s.extend([event.clone(), event]);
        let tree = s.render();
        assert_eq!(tree.roots.len(), 1);
        assert_eq!(tree.roots[0].items.len(), 1);
        assert_eq!(s.events().len(), 1);
    }

    #[test]
    fn tool_call_with_sub_agent_scenario() {
        let mut s = session();
        let events = vec![
            StreamEvent::new(EventKind::Start, "A", "01"),
            StreamEvent::new(EventKind::ToolCallStart, "A", "02").with_payload(EventPayload {
                tool_call_id: Some("t1".into()),
                tool_name: Some("search".into()),
                ..Default::default()
            }),
            StreamEvent::new(EventKind::Start, "B", "03").with_parent("A", "t1"),
            text("B", "04", "m2", content("found it")).with_parent("A", "t1"),
            StreamEvent::new(EventKind::Finish, "B", "05").with_parent("A", "t1"),
            StreamEvent::new(EventKind::ToolResult, "A", "06").with_payload(EventPayload {
                tool_call_id: Some("t1".into()),
                tool_result: Some(json!({"url": "https://example.com"})),
                ..Default::default()
            }),
            StreamEvent::new(EventKind::Finish, "A", "07"),
        ];
        assert!(s.step(None, true).roots.is_empty());
        for event in events {
            s.step(Some(event), true);
        }
        let tree = s.step(None, false);
        assert_eq!(tree.status, TurnStatus::Streaming);
        assert!(!tree.streaming);

        s.complete();
        let tree = s.render();
        assert_eq!(tree.status, TurnStatus::Complete);
        assert_eq!(tree.roots.len(), 1);
        let call = tree.find_tool_call("A", "t1").unwrap();
        assert_eq!(call.tool_name, "search");
        assert_eq!(call.result, Some(json!({"url": "https://example.com"})));
        let child = call.child.as_ref().unwrap();
        assert_eq!(child.run_id, "B");
        let ViewItem::Message(message) = &child.items[0] else {
            panic!("expected message");
        };
        assert_eq!(message.message_id, "m2");
    }

    #[test]
    fn user_toggle_survives_rederivation() {
        let mut s = session();
        s.append_event(text("A", "01", "m1", thought("considering")));
        assert!(s.render().find_message("A", "m1").unwrap().thinking_expanded);

        // User collapses while still thinking.
        s.toggle(&DisclosureKey::message("A", "m1"));
        s.append_event(text("A", "02", "m1", thought("still considering")));
        assert!(!s.render().find_message("A", "m1").unwrap().thinking_expanded);

        s.toggle(&DisclosureKey::message("A", "m1"));
        s.append_event(text("A", "03", "m1", content("answer")));
        let tree = s.render();
        let message = tree.find_message("A", "m1").unwrap();
        assert!(message.thinking_expanded);
        assert_eq!(
            message.body,
            MessageBody::Text {
                text: "answer".into(),
                from_sub_agent: false
            }
        );
    }

    #[test]
    fn content_arrival_auto_collapses_thinking() {
        let mut s = session();
        s.append_event(text("A", "01", "m1", thought("considering")));
        assert!(s.render().find_message("A", "m1").unwrap().thinking_expanded);
        s.append_event(text("A", "02", "m1", content("answer")));
        assert!(!s.render().find_message("A", "m1").unwrap().thinking_expanded);
    }

    #[test]
    fn tool_call_toggle_is_sticky() {
        let mut s = session();
        s.append_event(StreamEvent::new(EventKind::ToolCallStart, "A", "01").with_payload(
            EventPayload {
                tool_call_id: Some("t1".into()),
                ..Default::default()
            },
        ));
        assert!(!s.render().find_tool_call("A", "t1").unwrap().expanded);
        s.toggle(&DisclosureKey::tool_call("A", "t1"));
        s.append_event(StreamEvent::new(EventKind::ToolResult, "A", "02").with_payload(
            EventPayload {
                tool_call_id: Some("t1".into()),
                tool_result: Some(json!("ok")),
                ..Default::default()
            },
        ));
        assert!(s.render().find_tool_call("A", "t1").unwrap().expanded);
    }

    #[test]
    fn failure_replaces_content() {
        let mut s = session();
        s.append_event(text("A", "01", "m1", content("partial")));
        s.fail("HTTP 502");
        let tree = s.render();
        assert_eq!(tree.status, TurnStatus::Failed);
        assert_eq!(tree.error.as_deref(), Some("HTTP 502"));
        assert!(tree.roots.is_empty());
        assert!(!s.append_event(text("A", "02", "m2", content("late"))));
    }

    #[test]
    fn registry_isolates_turns_and_drops_stale_signals() {
        let mut registry = TurnRegistry::new(SessionOptions::default());
        let first = registry.begin_turn();
        let second = registry.begin_turn();

        assert!(registry.dispatch(TurnSignal::event(first, text("A", "01", "m1", content("one")))));
        registry.cancel(first);
        assert!(!registry.dispatch(TurnSignal::event(first, text("A", "02", "m2", content("late")))));
        assert!(!registry.dispatch(TurnSignal::error(first, "boom")));

        assert!(registry.dispatch(TurnSignal::event(second, text("X", "01", "m9", content("two")))));
        assert!(registry.dispatch(TurnSignal::error(second, "network down")));

        let first_tree = registry.render(first).unwrap();
        assert_eq!(first_tree.status, TurnStatus::Cancelled);
        assert_eq!(first_tree.roots[0].items.len(), 1);
        assert!(first_tree.error.is_none());

        let second_tree = registry.render(second).unwrap();
        assert_eq!(second_tree.status, TurnStatus::Failed);
        assert_eq!(second_tree.error.as_deref(), Some("network down"));

        assert!(!registry.dispatch(TurnSignal::complete(TurnId::new())));
        assert_eq!(registry.turns().collect::<Vec<_>>(), vec![first, second]);
    }

    #[test]
    fn completion_signal_ends_streaming() {
        let mut registry = TurnRegistry::default();
        let turn = registry.begin_turn();
        assert!(registry.dispatch(TurnSignal::complete(turn)));
        let tree = registry.render(turn).unwrap();
        assert_eq!(tree.status, TurnStatus::Complete);
        assert!(!tree.streaming);
    }

    #[test]
    fn not_streaming_flag_does_not_end_the_turn() {
        let mut s = session();
        s.step(Some(text("A", "01", "m1", content("first"))), false);
        let tree = s.step(Some(text("A", "02", "m2", content("second"))), false);

        assert_eq!(s.events().len(), 2);
        assert_eq!(tree.roots[0].items.len(), 2);
        assert!(!tree.streaming);
        assert_eq!(tree.status, TurnStatus::Streaming);

        // Only an explicit completion ends the turn.
        s.complete();
        assert!(!s.append_event(text("A", "03", "m3", content("late"))));
    }

    #[test]
    fn shared_tool_call_id_toggles_per_run() {
        let start = |run: &str, ts: &str| {
            StreamEvent::new(EventKind::ToolCallStart, run, ts).with_payload(EventPayload {
                tool_call_id: Some("call_0".into()),
                ..Default::default()
            })
        };
        let mut s = session();
        s.extend([start("A", "01"), start("Z", "02")]);
        s.toggle(&DisclosureKey::tool_call("A", "call_0"));

        let tree = s.render();
        assert!(tree.find_tool_call("A", "call_0").unwrap().expanded);
        assert!(!tree.find_tool_call("Z", "call_0").unwrap().expanded);
    }

    #[test]
    fn batch_with_thinking_and_content_keeps_default() {
        let mut s = session();
        s.extend([
            text("A", "01", "m1", thought("considering")),
            text("A", "02", "m1", content("answer")),
        ]);
        assert!(!s.render().find_message("A", "m1").unwrap().thinking_expanded);
    }

    #[test]
    fn policy_compares_against_previous_batch() {
        let mut s = session();
        s.extend([
            StreamEvent::new(EventKind::Start, "A", "00"),
            text("A", "01", "m1", thought("considering")),
        ]);
        assert!(s.render().find_message("A", "m1").unwrap().thinking_expanded);

        s.extend([
            text("A", "02", "m1", thought("still considering")),
            text("A", "03", "m1", content("answer")),
        ]);
        assert!(!s.render().find_message("A", "m1").unwrap().thinking_expanded);
    }
}
