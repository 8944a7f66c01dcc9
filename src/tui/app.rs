use anyhow::Result;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use ratatui::layout::{Constraint, Direction, Layout};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::Paragraph;
use tokio::sync::mpsc;
use tracing::debug;

use super::render::{self, RenderedLine};
use crate::config::DisplayConfig;
use crate::engine::{DisclosureKey, RenderTree, TurnId, TurnRegistry, TurnSignal, TurnStatus, ViewItem};

pub struct App {
    registry: TurnRegistry,
    turn_id: TurnId,
    pub signals: mpsc::UnboundedReceiver<TurnSignal>,
    display: DisplayConfig,
    source_label: String,
    /// Selection follows the key, not the row, so it survives re-derivation.
    selected: Option<DisclosureKey>,
    scroll: usize,
}

impl App {
    pub fn new(
        registry: TurnRegistry,
        turn_id: TurnId,
        signals: mpsc::UnboundedReceiver<TurnSignal>,
        display: DisplayConfig,
        source_label: String,
    ) -> Self {
        Self {
            registry,
            turn_id,
            signals,
            display,
            source_label,
            selected: None,
            scroll: 0,
        }
    }

    pub fn handle_signal(&mut self, signal: TurnSignal) {
        if !self.registry.dispatch(signal) {
            debug!("stale signal ignored");
        }
    }

    fn tree(&self) -> Option<RenderTree> {
        self.registry.render(self.turn_id)
    }

    fn lines(&self) -> Vec<RenderedLine> {
        self.tree()
            .map(|tree| render::render_tree(&tree, &self.display))
            .unwrap_or_default()
    }

    fn toggle_keys(&self) -> Vec<DisclosureKey> {
        self.lines().into_iter().filter_map(|l| l.toggle).collect()
    }

    /// Returns true when the app should quit.
    pub fn handle_key(&mut self, key: KeyEvent) -> Result<bool> {
        match key.code {
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => return Ok(true),
            KeyCode::Char('q') | KeyCode::Esc => return Ok(true),
            KeyCode::Up | KeyCode::Char('k') => self.move_selection(-1),
            KeyCode::Down | KeyCode::Char('j') => self.move_selection(1),
            KeyCode::Enter | KeyCode::Char(' ') => self.toggle_selected(),
            KeyCode::Char('e') => self.set_all_tool_calls(true),
            KeyCode::Char('c') => self.set_all_tool_calls(false),
            KeyCode::Char('x') => {
                self.registry.cancel(self.turn_id);
            }
            _ => {}
        }
        Ok(false)
    }

    fn move_selection(&mut self, delta: isize) {
        let keys = self.toggle_keys();
        if keys.is_empty() {
            self.selected = None;
            return;
        }
        let current = self
            .selected
            .as_ref()
            .and_then(|key| keys.iter().position(|k| k == key));
        let next = match current {
            None => 0,
            Some(i) => (i as isize + delta).clamp(0, keys.len() as isize - 1) as usize,
        };
        self.selected = Some(keys[next].clone());
    }

    fn toggle_selected(&mut self) {
        let Some(key) = self.selected.clone() else {
            return;
        };
        if let Some(session) = self.registry.session_mut(self.turn_id) {
            session.toggle(&key);
        }
    }

    fn set_all_tool_calls(&mut self, expanded: bool) {
        let Some(tree) = self.tree() else {
            return;
        };
        let Some(session) = self.registry.session_mut(self.turn_id) else {
            return;
        };
        for run in tree.runs() {
            for item in &run.items {
                if let ViewItem::ToolCall(call) = item {
                    session.set_expanded(
                        DisclosureKey::tool_call(&run.run_id, &call.tool_call_id),
                        expanded,
                    );
                }
            }
        }
    }

    pub fn render(&mut self, f: &mut ratatui::Frame) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Min(1),    // Scrollable tree
                Constraint::Length(2), // Divider + status
            ])
            .split(f.area());
        let content_area = chunks[0];
        let status_area = chunks[1];
        let content_height = content_area.height as usize;

        let rendered = self.lines();
        let selected_row = self
            .selected
            .as_ref()
            .and_then(|key| rendered.iter().position(|l| l.toggle.as_ref() == Some(key)));

        // Keep the selection on screen; otherwise follow the tail while streaming.
        let max_scroll = rendered.len().saturating_sub(content_height);
        self.scroll = match selected_row {
            Some(row) if row < self.scroll => row,
            Some(row) if row >= self.scroll + content_height => row + 1 - content_height,
            Some(_) => self.scroll,
            None => max_scroll,
        }
        .min(max_scroll);

        let lines: Vec<Line<'static>> = rendered
            .into_iter()
            .enumerate()
            .map(|(i, l)| {
                if Some(i) == selected_row {
                    l.line.patch_style(Style::default().add_modifier(Modifier::REVERSED))
                } else {
                    l.line
                }
            })
            .collect();
        let output = Paragraph::new(Text::from(lines)).scroll((self.scroll as u16, 0));
        f.render_widget(output, content_area);

        let (status_text, status_color) = match self.tree().map(|t| t.status) {
            Some(TurnStatus::Streaming) => ("streaming", Color::Green),
            Some(TurnStatus::Complete) => ("complete", Color::Blue),
            Some(TurnStatus::Failed) => ("failed", Color::Red),
            Some(TurnStatus::Cancelled) => ("cancelled", Color::Yellow),
            None => ("idle", Color::DarkGray),
        };
        let divider = "─".repeat(status_area.width as usize);
        let status = Paragraph::new(vec![
            Line::from(Span::styled(divider, Style::default().fg(Color::DarkGray))),
            Line::from(vec![
                Span::styled(
                    format!(" {} ", self.source_label),
                    Style::default().fg(Color::Black).bg(Color::Cyan),
                ),
                Span::raw("  "),
                Span::styled(
                    format!(" {status_text} "),
                    Style::default().fg(Color::White).bg(status_color),
                ),
                Span::styled(
                    "  ↑↓ select · enter toggle · e/c tools · x stop · q quit",
                    Style::default().fg(Color::DarkGray),
                ),
            ]),
        ]);
        f.render_widget(status, status_area);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EventKind, EventPayload, SessionOptions, StreamEvent};
    use serde_json::json;

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn app_with_tool_call() -> App {
        let mut registry = TurnRegistry::new(SessionOptions::default());
        let turn = registry.begin_turn();
        let (_tx, rx) = mpsc::unbounded_channel();
        let mut app = App::new(registry, turn, rx, DisplayConfig::default(), "test".into());
        for event in [
            StreamEvent::new(EventKind::Start, "A", "01"),
            StreamEvent::new(EventKind::ToolCallStart, "A", "02").with_payload(EventPayload {
                tool_call_id: Some("t1".into()),
                tool_name: Some("search".into()),
                ..Default::default()
            }),
            StreamEvent::new(EventKind::ToolResult, "A", "03").with_payload(EventPayload {
                tool_call_id: Some("t1".into()),
                tool_result: Some(json!("ok")),
                ..Default::default()
            }),
        ] {
            app.handle_signal(TurnSignal::event(turn, event));
        }
        app
    }

    fn tool_expanded(app: &App) -> bool {
        app.tree().unwrap().find_tool_call("A", "t1").unwrap().expanded
    }

    #[test]
    fn navigation_walks_toggle_rows() {
        let mut app = app_with_tool_call();
        app.handle_key(key(KeyCode::Down)).unwrap();
        assert_eq!(app.selected, Some(DisclosureKey::run("A")));
        app.handle_key(key(KeyCode::Char('j'))).unwrap();
        assert_eq!(app.selected, Some(DisclosureKey::tool_call("A", "t1")));
        // Clamped at the last toggle row.
        app.handle_key(key(KeyCode::Down)).unwrap();
        assert_eq!(app.selected, Some(DisclosureKey::tool_call("A", "t1")));
        app.handle_key(key(KeyCode::Char('k'))).unwrap();
        assert_eq!(app.selected, Some(DisclosureKey::run("A")));
    }

    #[test]
    fn enter_toggles_selected_tool_call() {
        let mut app = app_with_tool_call();
        app.selected = Some(DisclosureKey::tool_call("A", "t1"));
        assert!(!tool_expanded(&app));
        app.handle_key(key(KeyCode::Enter)).unwrap();
        assert!(tool_expanded(&app));
        app.handle_key(key(KeyCode::Char(' '))).unwrap();
        assert!(!tool_expanded(&app));
    }

    #[test]
    fn expand_and_collapse_all_tool_calls() {
        let mut app = app_with_tool_call();
        app.handle_key(key(KeyCode::Char('e'))).unwrap();
        assert!(tool_expanded(&app));
        app.handle_key(key(KeyCode::Char('c'))).unwrap();
        assert!(!tool_expanded(&app));
    }

    #[test]
    fn stop_cancels_turn_and_quit_keys_exit() {
        let mut app = app_with_tool_call();
        assert!(!app.handle_key(key(KeyCode::Char('x'))).unwrap());
        assert_eq!(app.tree().unwrap().status, TurnStatus::Cancelled);
        assert!(app.handle_key(key(KeyCode::Char('q'))).unwrap());
        assert!(app.handle_key(key(KeyCode::Esc)).unwrap());
        assert!(app
            .handle_key(KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL))
            .unwrap());
    }
}
