//! Execution tree reconstruction.
//!
//! `build_execution_tree` is a pure projection of the accumulated event list:
//! runs are bucketed by `runId`, each run's tool calls are collected from its
//! own events, and child runs are hung off the tool call that spawned them.
//! It is re-run from scratch on every change, so a child that shows up before
//! its parent simply links on a later pass.

use indexmap::IndexMap;
use std::collections::HashSet;
use tracing::debug;

use super::events::{EventKind, StreamEvent};

pub const UNKNOWN_TOOL: &str = "unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Finished,
}

#[derive(Debug, Clone)]
pub struct ToolCallNode<'a> {
    pub tool_call_id: String,
    pub tool_name: String,
    pub start_event: &'a StreamEvent,
    pub result_event: Option<&'a StreamEvent>,
    /// `runId` of the sub-run spawned by this call, once linked.
    pub child_agent: Option<String>,
}

impl ToolCallNode<'_> {
    pub fn is_completed(&self) -> bool {
        self.result_event.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct ExecutionNode<'a> {
    pub run_id: String,
    pub parent_id: Option<String>,
    pub tool_call_id: Option<String>,
    pub agent_id: Option<String>,
    pub events: Vec<&'a StreamEvent>,
    pub tool_calls: IndexMap<String, ToolCallNode<'a>>,
}

impl<'a> ExecutionNode<'a> {
    fn new(first: &'a StreamEvent) -> Self {
        Self {
            run_id: first.run_id.clone(),
            parent_id: first.parent_id.clone().filter(|s| !s.is_empty()),
            tool_call_id: first.tool_call_id.clone().filter(|s| !s.is_empty()),
            agent_id: first.agent_id.clone().filter(|s| !s.is_empty()),
            events: Vec::new(),
            tool_calls: IndexMap::new(),
        }
    }

    /// Timestamp of the `start` event, else of the first event.
    pub fn start_time(&self) -> Option<&str> {
        self.events
            .iter()
            .find(|e| e.kind == EventKind::Start)
            .or_else(|| self.events.first())
            .map(|e| e.timestamp.as_str())
            .filter(|ts| !ts.is_empty())
    }

    /// Timestamp of the `finish` event, else of the last event.
    pub fn end_time(&self) -> Option<&str> {
        self.events
            .iter()
            .rev()
            .find(|e| e.kind == EventKind::Finish)
            .or_else(|| self.events.last())
            .map(|e| e.timestamp.as_str())
            .filter(|ts| !ts.is_empty())
    }

    pub fn status(&self) -> RunStatus {
        if self.events.iter().any(|e| e.kind == EventKind::Finish) {
            RunStatus::Finished
        } else {
            RunStatus::Running
        }
    }

    fn collect_tool_calls(&mut self) {
        for &event in &self.events {
            match event.kind {
                EventKind::ToolCallStart => {
                    let Some(id) = event.payload_tool_call_id() else {
                        debug!(run_id = %self.run_id, "tool-call-start without toolCallId");
                        continue;
                    };
                    self.tool_calls.insert(
                        id.to_string(),
                        ToolCallNode {
                            tool_call_id: id.to_string(),
                            tool_name: event.tool_name().unwrap_or(UNKNOWN_TOOL).to_string(),
                            start_event: event,
                            result_event: None,
                            child_agent: None,
                        },
                    );
                }
                EventKind::ToolResult => {
                    let id = event.payload_tool_call_id().unwrap_or_default();
                    match self.tool_calls.get_mut(id) {
                        Some(call) => call.result_event = Some(event),
                        None => {
                            debug!(run_id = %self.run_id, tool_call_id = id, "dropping orphaned tool-result");
                        }
                    }
                }
                _ => {}
            }
        }
    }
}

/// All runs of one turn plus the top-level display order.
#[derive(Debug, Clone, Default)]
pub struct ExecutionForest<'a> {
    /// Every run, in first-appearance order.
    pub nodes: IndexMap<String, ExecutionNode<'a>>,
    /// Runs rendered at the top level, in first-appearance order.
    pub roots: Vec<String>,
}

impl<'a> ExecutionForest<'a> {
    pub fn get(&self, run_id: &str) -> Option<&ExecutionNode<'a>> {
        self.nodes.get(run_id)
    }

    pub fn root_nodes(&self) -> impl Iterator<Item = &ExecutionNode<'a>> {
        self.roots.iter().filter_map(|id| self.nodes.get(id))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

pub fn build_execution_tree(events: &[StreamEvent]) -> ExecutionForest<'_> {
    let mut nodes: IndexMap<String, ExecutionNode<'_>> = IndexMap::new();

    for event in events {
        nodes
            .entry(event.run_id.clone())
            .or_insert_with(|| ExecutionNode::new(event))
            .events
            .push(event);
    }

    for node in nodes.values_mut() {
        node.collect_tool_calls();
    }

    // Link children. Collect first so the parent can be borrowed mutably.
    let links: Vec<(String, String, String)> = nodes
        .values()
        .filter_map(|node| {
            let parent = node.parent_id.clone()?;
            let call = node.tool_call_id.clone()?;
            Some((node.run_id.clone(), parent, call))
        })
        .collect();

    for (child, parent, call) in links {
        let Some(parent_node) = nodes.get_mut(&parent) else {
            debug!(run_id = %child, parent_id = %parent, "parent run not seen yet");
            continue;
        };
        let Some(tool_call) = parent_node.tool_calls.get_mut(&call) else {
            debug!(run_id = %child, tool_call_id = %call, "spawning tool call not seen yet");
            continue;
        };
        tool_call.child_agent = Some(child);
    }

    let roots = collect_roots(&nodes);
    ExecutionForest { nodes, roots }
}

/// Unlinked runs are roots. Anything still unreachable (a link cycle) is
/// promoted so that no run disappears from view.
fn collect_roots(nodes: &IndexMap<String, ExecutionNode<'_>>) -> Vec<String> {
    let linked: HashSet<&str> = nodes
        .values()
        .flat_map(|n| n.tool_calls.values())
        .filter_map(|c| c.child_agent.as_deref())
        .collect();

    let unlinked: Vec<&str> = nodes
        .keys()
        .map(String::as_str)
        .filter(|id| !linked.contains(id))
        .collect();
    let mut roots: Vec<String> = unlinked.iter().map(|id| id.to_string()).collect();

    let mut reachable: HashSet<&str> = HashSet::new();
    let mut stack = unlinked;
    mark_reachable(nodes, &mut stack, &mut reachable);

    for id in nodes.keys() {
        if reachable.contains(id.as_str()) {
            continue;
        }
        debug!(run_id = %id, "promoting unreachable run to root");
        roots.push(id.clone());
        stack.push(id.as_str());
        mark_reachable(nodes, &mut stack, &mut reachable);
    }
    roots
}

fn mark_reachable<'n>(
    nodes: &'n IndexMap<String, ExecutionNode<'_>>,
    stack: &mut Vec<&'n str>,
    reachable: &mut HashSet<&'n str>,
) {
    while let Some(id) = stack.pop() {
        if !reachable.insert(id) {
            continue;
        }
        if let Some(node) = nodes.get(id) {
            stack.extend(
                node.tool_calls
                    .values()
                    .filter_map(|c| c.child_agent.as_deref()),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::events::EventPayload;
    use serde_json::json;

    fn ev(kind: EventKind, run: &str, ts: &str) -> StreamEvent {
        StreamEvent::new(kind, run, ts)
    }

    fn tool_start(run: &str, ts: &str, id: &str, name: Option<&str>) -> StreamEvent {
        ev(EventKind::ToolCallStart, run, ts).with_payload(EventPayload {
            tool_call_id: Some(id.into()),
            tool_name: name.map(String::from),
            ..Default::default()
        })
    }

    fn tool_result(run: &str, ts: &str, id: &str) -> StreamEvent {
        ev(EventKind::ToolResult, run, ts).with_payload(EventPayload {
            tool_call_id: Some(id.into()),
            tool_result: Some(json!({"hits": 3})),
            ..Default::default()
        })
    }

    fn sub_agent_scenario() -> Vec<StreamEvent> {
        vec![
            ev(EventKind::Start, "A", "01"),
            tool_start("A", "02", "t1", Some("search")),
            ev(EventKind::Start, "B", "03").with_parent("A", "t1"),
            ev(EventKind::TextChunk, "B", "04").with_parent("A", "t1"),
            ev(EventKind::Finish, "B", "05").with_parent("A", "t1"),
            tool_result("A", "06", "t1"),
            ev(EventKind::Finish, "A", "07"),
        ]
    }

    #[test]
    fn single_run_is_one_root() {
        let events = vec![ev(EventKind::Start, "A", "01"), ev(EventKind::Finish, "A", "02")];
        let forest = build_execution_tree(&events);
        assert_eq!(forest.roots, vec!["A".to_string()]);
        let a = forest.get("A").unwrap();
        assert_eq!(a.events.len(), 2);
        assert!(a.tool_calls.is_empty());
        assert_eq!(a.status(), RunStatus::Finished);
    }

    #[test]
    fn tool_call_links_sub_agent_and_result() {
        let events = sub_agent_scenario();
        let forest = build_execution_tree(&events);

        assert_eq!(forest.roots, vec!["A".to_string()]);
        let call = &forest.get("A").unwrap().tool_calls["t1"];
        assert_eq!(call.tool_name, "search");
        assert_eq!(call.child_agent.as_deref(), Some("B"));
        let result = call.result_event.unwrap();
        assert_eq!(
            result.payload.as_ref().unwrap().tool_result,
            Some(json!({"hits": 3}))
        );
        assert_eq!(forest.get("B").unwrap().parent_id.as_deref(), Some("A"));
    }

    #[test]
    fn missing_tool_name_defaults_to_unknown() {
        let events = vec![tool_start("A", "01", "t1", None)];
        let forest = build_execution_tree(&events);
        assert_eq!(forest.get("A").unwrap().tool_calls["t1"].tool_name, UNKNOWN_TOOL);
    }

    #[test]
    fn orphaned_and_early_results_are_dropped() {
        let events = vec![
            tool_result("A", "01", "t1"),
            tool_start("A", "02", "t1", Some("read")),
            tool_result("A", "03", "nope"),
        ];
        let forest = build_execution_tree(&events);
        let node = forest.get("A").unwrap();
        assert_eq!(node.tool_calls.len(), 1);
        assert!(node.tool_calls["t1"].result_event.is_none());
    }

    #[test]
    fn result_in_other_run_does_not_attach() {
        let events = vec![tool_start("A", "01", "t1", Some("read")), tool_result("Z", "02", "t1")];
        let forest = build_execution_tree(&events);
        assert!(forest.get("A").unwrap().tool_calls["t1"].result_event.is_none());
    }

    #[test]
    fn child_before_parent_links_once_parent_arrives() {
        let in_order = sub_agent_scenario();
        let mut reordered = in_order.clone();
        // Child run B is discovered before A.
        reordered.sort_by_key(|e| if e.run_id == "B" { 0 } else { 1 });

        let partial: Vec<StreamEvent> = reordered.iter().take(3).cloned().collect();
        let early = build_execution_tree(&partial);
        assert_eq!(early.roots, vec!["B".to_string()]);

        let late = build_execution_tree(&reordered);
        let expected = build_execution_tree(&in_order);
        assert_eq!(
            late.get("A").unwrap().tool_calls["t1"].child_agent,
            expected.get("A").unwrap().tool_calls["t1"].child_agent
        );
        assert_eq!(late.roots, vec!["A".to_string()]);
    }

    #[test]
    fn unlinkable_child_renders_as_root() {
        let events = vec![
            ev(EventKind::Start, "A", "01"),
            ev(EventKind::Start, "B", "02").with_parent("A", "missing"),
        ];
        let forest = build_execution_tree(&events);
        assert_eq!(forest.roots, vec!["A".to_string(), "B".to_string()]);
    }

    #[test]
    fn first_event_defines_run_identity() {
        let events = vec![
            ev(EventKind::Start, "B", "01").with_parent("A", "t1").with_agent("researcher"),
            ev(EventKind::Finish, "B", "02").with_parent("X", "t9").with_agent("other"),
        ];
        let forest = build_execution_tree(&events);
        let b = forest.get("B").unwrap();
        assert_eq!(b.parent_id.as_deref(), Some("A"));
        assert_eq!(b.tool_call_id.as_deref(), Some("t1"));
        assert_eq!(b.agent_id.as_deref(), Some("researcher"));
    }

    #[test]
    fn times_fall_back_to_first_and_last_event() {
        let events = vec![
            ev(EventKind::TextChunk, "A", "01"),
            ev(EventKind::Start, "A", "02"),
            ev(EventKind::TextChunk, "A", "03"),
        ];
        let forest = build_execution_tree(&events);
        let a = forest.get("A").unwrap();
        assert_eq!(a.start_time(), Some("02"));
        assert_eq!(a.end_time(), Some("03"));
        assert_eq!(a.status(), RunStatus::Running);
    }

    #[test]
    fn link_cycle_is_promoted_not_dropped() {
        let events = vec![
            tool_start("A", "01", "ta", Some("x")).with_parent("B", "tb"),
            tool_start("B", "02", "tb", Some("y")).with_parent("A", "ta"),
        ];
        let forest = build_execution_tree(&events);
        assert_eq!(forest.len(), 2);
        assert_eq!(forest.roots.len(), 1);
    }

    #[test]
    fn roots_follow_first_appearance() {
        let events = vec![
            ev(EventKind::Start, "R2", "01"),
            ev(EventKind::Start, "R1", "02"),
            ev(EventKind::Finish, "R2", "03"),
        ];
        let forest = build_execution_tree(&events);
        assert_eq!(forest.roots, vec!["R2".to_string(), "R1".to_string()]);
    }
}
