//! Execution-tree reconstruction and incremental rendering for streamed
//! agent runs.
//!
//! Data flow: events → [`session::RenderSession`] (dedup + append) →
//! [`tree::build_execution_tree`] → [`consolidate::consolidate_node`] per run →
//! [`view::build_view`] with [`disclosure::DisclosureState`] → host.

pub mod consolidate;
pub mod disclosure;
pub mod events;
pub mod session;
pub mod tree;
pub mod view;

pub use disclosure::DisclosureKey;
pub use events::{EventKind, EventPayload, StreamEvent};
pub use session::{RenderSession, SessionOptions, SignalBody, TurnId, TurnRegistry, TurnSignal};
pub use view::{MessageBody, RenderTree, RunView, ToolCallView, TurnStatus, ViewItem};
