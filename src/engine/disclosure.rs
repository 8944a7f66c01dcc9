//! Expand/collapse state and the automatic disclosure rules.
//!
//! State is keyed by durable identifiers, never by list position, so a full
//! re-derivation of the tree leaves user toggles intact. A flag set by the
//! user is sticky: the automatic policy never touches it again.

use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use tracing::trace;

use super::consolidate::ConsolidatedMessage;

/// Message and tool-call ids are only unique within their run, so both
/// carry the owning `runId`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "scope", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum DisclosureKey {
    /// Thinking panel of a consolidated message.
    Message { run_id: String, message_id: String },
    /// Detail panel of a tool call.
    ToolCall { run_id: String, tool_call_id: String },
    /// Body of a (sub-)run.
    Run { run_id: String },
}

impl DisclosureKey {
    pub fn message(run_id: impl Into<String>, message_id: impl Into<String>) -> Self {
        Self::Message {
            run_id: run_id.into(),
            message_id: message_id.into(),
        }
    }

    pub fn tool_call(run_id: impl Into<String>, tool_call_id: impl Into<String>) -> Self {
        Self::ToolCall {
            run_id: run_id.into(),
            tool_call_id: tool_call_id.into(),
        }
    }

    pub fn run(run_id: impl Into<String>) -> Self {
        Self::Run {
            run_id: run_id.into(),
        }
    }
}

impl fmt::Display for DisclosureKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisclosureKey::Message { run_id, message_id } => write!(f, "message:{run_id}/{message_id}"),
            DisclosureKey::ToolCall {
                run_id,
                tool_call_id,
            } => write!(f, "tool:{run_id}/{tool_call_id}"),
            DisclosureKey::Run { run_id } => write!(f, "run:{run_id}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Flag {
    expanded: bool,
    user_set: bool,
}

/// Defaults used when nothing (user or policy) has decided a key yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisclosureDefaults {
    pub thinking_expanded: bool,
    pub tool_call_expanded: bool,
    pub run_expanded: bool,
}

impl Default for DisclosureDefaults {
    fn default() -> Self {
        Self {
            thinking_expanded: false,
            tool_call_expanded: false,
            run_expanded: true,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DisclosureState {
    flags: HashMap<DisclosureKey, Flag>,
    defaults: DisclosureDefaults,
}

impl DisclosureState {
    pub fn new(defaults: DisclosureDefaults) -> Self {
        Self {
            flags: HashMap::new(),
            defaults,
        }
    }

    pub fn is_expanded(&self, key: &DisclosureKey) -> bool {
        match self.flags.get(key) {
            Some(flag) => flag.expanded,
            None => self.default_for(key),
        }
    }

    pub fn is_user_set(&self, key: &DisclosureKey) -> bool {
        self.flags.get(key).is_some_and(|f| f.user_set)
    }

    /// Explicit user toggle. Returns the new state.
    pub fn toggle(&mut self, key: &DisclosureKey) -> bool {
        let expanded = !self.is_expanded(key);
        self.set_by_user(key.clone(), expanded);
        expanded
    }

    pub fn set_by_user(&mut self, key: DisclosureKey, expanded: bool) {
        self.flags.insert(
            key,
            Flag {
                expanded,
                user_set: true,
            },
        );
    }

    /// Policy-driven change; ignored once the user has touched the key.
    pub fn set_auto(&mut self, key: DisclosureKey, expanded: bool) -> bool {
        let flag = self.flags.entry(key).or_insert(Flag {
            expanded,
            user_set: false,
        });
        if flag.user_set {
            return false;
        }
        flag.expanded = expanded;
        true
    }

    fn default_for(&self, key: &DisclosureKey) -> bool {
        match key {
            DisclosureKey::Message { .. } => self.defaults.thinking_expanded,
            DisclosureKey::ToolCall { .. } => self.defaults.tool_call_expanded,
            DisclosureKey::Run { .. } => self.defaults.run_expanded,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Neither thinking nor content yet.
    Empty,
    /// Thinking only, still waiting for content.
    Thinking,
    HasContent,
}

impl Phase {
    fn of(message: &ConsolidatedMessage) -> Self {
        if message.has_content() {
            Phase::HasContent
        } else if message.has_thinking() {
            Phase::Thinking
        } else {
            Phase::Empty
        }
    }
}

/// Default disclosure transitions as content supersedes "thinking".
///
/// Evaluated once per event batch against the phases recorded on the
/// previous evaluation:
/// - a message waiting with thinking only is expanded so the reasoning is
///   visible;
/// - a message whose content arrives is collapsed again.
#[derive(Debug, Clone)]
pub struct AutoDisclosurePolicy {
    auto_expand_thinking: bool,
    auto_collapse_on_content: bool,
    previous: HashMap<DisclosureKey, Phase>,
}

impl Default for AutoDisclosurePolicy {
    fn default() -> Self {
        Self::new(true, true)
    }
}

impl AutoDisclosurePolicy {
    pub fn new(auto_expand_thinking: bool, auto_collapse_on_content: bool) -> Self {
        Self {
            auto_expand_thinking,
            auto_collapse_on_content,
            previous: HashMap::new(),
        }
    }

    /// Evaluates the consolidated messages of one run.
    pub fn apply<'m>(
        &mut self,
        run_id: &str,
        messages: impl IntoIterator<Item = &'m ConsolidatedMessage>,
        state: &mut DisclosureState,
    ) {
        for message in messages {
            let now = Phase::of(message);
            let key = DisclosureKey::message(run_id, &message.message_id);
            let before = self.previous.insert(key.clone(), now);

            let waiting = now == Phase::Thinking && matches!(before, None | Some(Phase::Empty));
            let superseded = now == Phase::HasContent
                && matches!(before, Some(Phase::Empty) | Some(Phase::Thinking));

            if waiting && self.auto_expand_thinking {
                if state.set_auto(key, true) {
                    trace!(message_id = %message.message_id, "auto-expanded thinking");
                }
            } else if superseded && self.auto_collapse_on_content && state.set_auto(key, false) {
                trace!(message_id = %message.message_id, "auto-collapsed thinking");
            }
        }
    }
}
