//! Rendering logic: converts a `RenderTree` into styled terminal lines.
//!
//! Visual conventions:
//! - Runs: ⏺ bullet with the run id, agent and state
//! - Tool calls: ⏺ name(args) with ⎿ result lines, sub-runs nested below
//! - Thinking: ✻ header, body behind a ▸/▾ toggle
//! - Code: box-drawing fences (┌ │ └)
//!
//! Lines that carry a disclosure key are the rows a user can toggle.

use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use serde_json::Value;

use crate::config::DisplayConfig;
use crate::engine::view::{MessageView, RunState, ToolCallState};
use crate::engine::{DisclosureKey, MessageBody, RenderTree, RunView, ToolCallView, TurnStatus, ViewItem};

#[derive(Debug, Clone)]
pub struct RenderedLine {
    pub line: Line<'static>,
    pub toggle: Option<DisclosureKey>,
}

impl RenderedLine {
    fn plain(line: Line<'static>) -> Self {
        Self { line, toggle: None }
    }

    fn toggle(line: Line<'static>, key: DisclosureKey) -> Self {
        Self {
            line,
            toggle: Some(key),
        }
    }
}

pub fn render_tree(tree: &RenderTree, display: &DisplayConfig) -> Vec<RenderedLine> {
    let mut out = Vec::new();

    if let Some(error) = &tree.error {
        out.push(RenderedLine::plain(Line::from(vec![
            Span::styled("✗ ", Style::default().fg(Color::Red)),
            Span::styled(
                truncate_str(error, display.max_text_width),
                Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
            ),
        ])));
        return out;
    }

    for root in &tree.roots {
        render_run(root, "", display, &mut out);
    }

    match tree.status {
        TurnStatus::Streaming if tree.streaming => out.push(RenderedLine::plain(dim_line("  … streaming"))),
        TurnStatus::Cancelled => out.push(RenderedLine::plain(dim_line("  (cancelled)"))),
        _ => {}
    }
    out
}

fn render_run(run: &RunView, indent: &str, display: &DisplayConfig, out: &mut Vec<RenderedLine>) {
    let (bullet_color, state_text) = match run.state {
        RunState::Running => (Color::Yellow, "running"),
        RunState::Finished => (Color::Green, "finished"),
    };
    let mut spans = vec![
        Span::raw(indent.to_string()),
        Span::styled(disclosure_marker(run.expanded), Style::default().fg(Color::DarkGray)),
        Span::styled("⏺ ", Style::default().fg(bullet_color)),
        Span::styled(
            run.agent_id.clone().unwrap_or_else(|| "agent".to_string()),
            Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
        ),
        Span::styled(format!(" · {}", run.run_id), Style::default().fg(Color::DarkGray)),
        Span::styled(format!(" · {state_text}"), Style::default().fg(bullet_color)),
    ];
    if let Some(ms) = run.duration_ms {
        spans.push(Span::styled(
            format!(" · {}", format_duration(ms)),
            Style::default().fg(Color::DarkGray),
        ));
    }
    out.push(RenderedLine::toggle(Line::from(spans), DisclosureKey::run(&run.run_id)));

    if !run.expanded {
        let count = run.items.len();
        out.push(RenderedLine::plain(dim_line(&format!(
            "{indent}    ⎿  {count} item{} hidden",
            if count == 1 { "" } else { "s" }
        ))));
        return;
    }

    let body_indent = format!("{indent}  ");
    for item in &run.items {
        match item {
            ViewItem::Message(message) => render_message(&run.run_id, message, &body_indent, display, out),
            ViewItem::ToolCall(call) => render_tool_call(&run.run_id, call, &body_indent, display, out),
        }
    }
}

fn render_message(
    run_id: &str,
    message: &MessageView,
    indent: &str,
    display: &DisplayConfig,
    out: &mut Vec<RenderedLine>,
) {
    if display.show_thinking {
        if let Some(thinking) = &message.thinking {
            let label = if matches!(message.body, MessageBody::Pending) {
                "Thinking…"
            } else {
                "Thought"
            };
            out.push(RenderedLine::toggle(
                Line::from(vec![
                    Span::raw(indent.to_string()),
                    Span::styled(
                        disclosure_marker(message.thinking_expanded),
                        Style::default().fg(Color::DarkGray),
                    ),
                    Span::styled("✻ ", Style::default().fg(Color::Magenta)),
                    Span::styled(
                        label,
                        Style::default().fg(Color::Magenta).add_modifier(Modifier::ITALIC),
                    ),
                ]),
                DisclosureKey::message(run_id, &message.message_id),
            ));
            if message.thinking_expanded {
                for text in thinking.lines() {
                    out.push(RenderedLine::plain(Line::from(vec![
                        Span::styled(format!("{indent}  │ "), Style::default().fg(Color::DarkGray)),
                        Span::styled(
                            truncate_str(text, display.max_text_width),
                            Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC),
                        ),
                    ])));
                }
            }
        }
    }

    for line in render_message_body(&message.body, indent, display.max_text_width) {
        out.push(RenderedLine::plain(line));
    }

    if display.show_suggestions {
        if let Some(suggestion) = &message.suggestion {
            out.push(RenderedLine::plain(Line::from(vec![
                Span::styled(format!("{indent}→ "), Style::default().fg(Color::Blue)),
                Span::styled(
                    truncate_str(suggestion, display.max_text_width),
                    Style::default().fg(Color::Blue).add_modifier(Modifier::ITALIC),
                ),
            ])));
        }
    }
}

/// One case per content family.
fn render_message_body(body: &MessageBody, indent: &str, max_width: usize) -> Vec<Line<'static>> {
    match body {
        MessageBody::Pending => Vec::new(),
        MessageBody::Text {
            text,
            from_sub_agent,
        } => {
            let style = if *from_sub_agent {
                Style::default().fg(Color::Gray)
            } else {
                Style::default().fg(Color::White)
            };
            text.lines()
                .map(|l| {
                    Line::from(vec![
                        Span::raw(indent.to_string()),
                        Span::styled(truncate_str(l, max_width), style),
                    ])
                })
                .collect()
        }
        MessageBody::Table {
            headers,
            rows,
            final_answer,
        } => {
            let mut lines = render_table(headers, rows, indent, max_width);
            lines.extend(render_final_answer(final_answer.as_deref(), indent, max_width));
            lines
        }
        MessageBody::Code {
            language,
            code,
            final_answer,
        } => {
            let mut lines = render_code_block(language.as_deref(), code, indent, max_width);
            lines.extend(render_final_answer(final_answer.as_deref(), indent, max_width));
            lines
        }
        MessageBody::Chart {
            title,
            chart_type,
            spec,
            final_answer,
        } => {
            let mut summary = format!("Chart: {}", title.as_deref().unwrap_or("untitled"));
            if let Some(kind) = chart_type {
                summary.push_str(&format!(" ({kind})"));
            }
            let series = count_series(spec);
            if series > 0 {
                summary.push_str(&format!(" · {series} series"));
            }
            let mut lines = vec![Line::from(vec![
                Span::raw(indent.to_string()),
                Span::styled("▤ ", Style::default().fg(Color::Cyan)),
                Span::styled(
                    truncate_str(&summary, max_width),
                    Style::default().fg(Color::Cyan),
                ),
            ])];
            lines.extend(render_final_answer(final_answer.as_deref(), indent, max_width));
            lines
        }
    }
}

fn render_final_answer(answer: Option<&str>, indent: &str, max_width: usize) -> Vec<Line<'static>> {
    answer
        .into_iter()
        .flat_map(str::lines)
        .map(|l| {
            Line::from(vec![
                Span::raw(indent.to_string()),
                Span::styled(truncate_str(l, max_width), Style::default().fg(Color::White)),
            ])
        })
        .collect()
}

fn render_table(headers: &[String], rows: &[Vec<String>], indent: &str, max_width: usize) -> Vec<Line<'static>> {
    let columns = headers.len().max(rows.iter().map(Vec::len).max().unwrap_or(0));
    if columns == 0 {
        return vec![dim_line(&format!("{indent}(empty table)"))];
    }
    let cell_cap = (max_width / columns).max(4);
    let mut widths = vec![0usize; columns];
    for row in std::iter::once(headers).chain(rows.iter().map(Vec::as_slice)) {
        for (i, cell) in row.iter().enumerate() {
            widths[i] = widths[i].max(cell.chars().count().min(cell_cap));
        }
    }

    let format_row = |cells: &[String]| -> String {
        (0..columns)
            .map(|i| {
                let cell = cells.get(i).map(String::as_str).unwrap_or("");
                let cell = truncate_str(cell, cell_cap);
                format!("{cell:<width$}", width = widths[i])
            })
            .collect::<Vec<_>>()
            .join(" │ ")
    };

    let mut lines = Vec::new();
    if !headers.is_empty() {
        lines.push(Line::from(vec![
            Span::raw(indent.to_string()),
            Span::styled(
                format_row(headers),
                Style::default().fg(Color::White).add_modifier(Modifier::BOLD),
            ),
        ]));
        let rule = widths
            .iter()
            .map(|w| "─".repeat(*w))
            .collect::<Vec<_>>()
            .join("─┼─");
        lines.push(Line::from(vec![
            Span::raw(indent.to_string()),
            Span::styled(rule, Style::default().fg(Color::DarkGray)),
        ]));
    }
    for row in rows {
        lines.push(Line::from(vec![
            Span::raw(indent.to_string()),
            Span::styled(format_row(row), Style::default().fg(Color::White)),
        ]));
    }
    lines
}

fn render_code_block(language: Option<&str>, code: &str, indent: &str, max_width: usize) -> Vec<Line<'static>> {
    let fence = Style::default().fg(Color::DarkGray);
    let mut lines = vec![Line::from(vec![
        Span::raw(indent.to_string()),
        Span::styled(format!("┌─ {}", language.unwrap_or("code")), fence),
    ])];
    for l in code.lines() {
        lines.push(Line::from(vec![
            Span::raw(indent.to_string()),
            Span::styled("│ ", fence),
            Span::styled(truncate_str(l, max_width), Style::default().fg(Color::Yellow)),
        ]));
    }
    lines.push(Line::from(vec![
        Span::raw(indent.to_string()),
        Span::styled("└─", fence),
    ]));
    lines
}

fn render_tool_call(
    run_id: &str,
    call: &ToolCallView,
    indent: &str,
    display: &DisplayConfig,
    out: &mut Vec<RenderedLine>,
) {
    let (bullet_color, status_text) = match call.state {
        ToolCallState::Pending => (Color::Yellow, "Running..."),
        ToolCallState::Completed => (Color::Green, "Done"),
    };

    let args_display = match (&call.args, display.show_tool_args) {
        (Some(args), true) => format!("({})", truncate_str(&compact_json(args), 80)),
        _ => String::new(),
    };

    out.push(RenderedLine::toggle(
        Line::from(vec![
            Span::raw(indent.to_string()),
            Span::styled(disclosure_marker(call.expanded), Style::default().fg(Color::DarkGray)),
            Span::styled("⏺ ", Style::default().fg(bullet_color)),
            Span::styled(
                call.tool_name.clone(),
                Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
            ),
            Span::styled(args_display, Style::default().fg(Color::White)),
        ]),
        DisclosureKey::tool_call(run_id, &call.tool_call_id),
    ));

    let result_lines: Vec<String> = match (&call.result, call.expanded) {
        (Some(result), true) => pretty_json(result).lines().map(String::from).collect(),
        _ => vec![status_text.to_string()],
    };
    for (i, text) in result_lines.iter().enumerate() {
        let gutter = if i == 0 { "  ⎿  " } else { "     " };
        out.push(RenderedLine::plain(Line::from(vec![
            Span::styled(format!("{indent}{gutter}"), Style::default().fg(Color::DarkGray)),
            Span::styled(
                truncate_str(text, display.max_text_width),
                Style::default().fg(Color::DarkGray),
            ),
        ])));
    }

    // Sub-runs hang one indent step to the right of the call that spawned them.
    if let Some(child) = &call.child {
        let child_indent = format!("{indent}{}", " ".repeat(display.indent_width));
        render_run(child, &child_indent, display, out);
    }
}

fn count_series(spec: &Value) -> usize {
    spec.get("series")
        .or_else(|| spec.get("datasets"))
        .or_else(|| spec.pointer("/data/datasets"))
        .and_then(Value::as_array)
        .map_or(0, Vec::len)
}

fn compact_json(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn pretty_json(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    }
}

fn disclosure_marker(expanded: bool) -> &'static str {
    if expanded {
        "▾ "
    } else {
        "▸ "
    }
}

fn dim_line(text: &str) -> Line<'static> {
    Line::from(Span::styled(
        text.to_string(),
        Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC),
    ))
}

/// `1234` → `1.2s`, `450` → `450ms`.
fn format_duration(ms: i64) -> String {
    if ms >= 60_000 {
        format!("{}m{}s", ms / 60_000, (ms % 60_000) / 1000)
    } else if ms >= 1000 {
        format!("{:.1}s", ms as f64 / 1000.0)
    } else {
        format!("{ms}ms")
    }
}

/// Concatenates span contents, dropping styling.
pub fn line_to_plain(line: &Line<'_>) -> String {
    line.spans.iter().map(|s| s.content.as_ref()).collect()
}

pub fn render_plain(tree: &RenderTree, display: &DisplayConfig) -> String {
    let mut text = render_tree(tree, display)
        .iter()
        .map(|l| line_to_plain(&l.line))
        .collect::<Vec<_>>()
        .join("\n");
    text.push('\n');
    text
}

pub fn truncate_str(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{truncated}...")
    }
}
