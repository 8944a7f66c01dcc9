pub mod app;
pub mod render;

use anyhow::Result;
use crossterm::event::{Event, EventStream, KeyEventKind};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use futures_util::StreamExt;
use ratatui::backend::CrosstermBackend;
use ratatui::{Terminal, TerminalOptions, Viewport};
use std::io::{self, Stdout};
use std::time::Duration;

use crate::config::Config;
use crate::engine::TurnRegistry;
use crate::source::{self, Input};

/// Replays `input` as a live turn and lets the user browse the tree.
/// Key input comes from the controlling terminal, so `input` may be stdin.
pub async fn run_tui(input: Input, config: &Config, delay: Duration) -> Result<()> {
    let mut registry = TurnRegistry::new(config.session_options());
    let turn_id = registry.begin_turn();
    let signals = source::spawn_source(input.clone(), turn_id, delay);
    let mut app = app::App::new(
        registry,
        turn_id,
        signals,
        config.display.clone(),
        input.describe(),
    );

    let mut terminal = setup_terminal()?;
    let tick_rate = Duration::from_millis(50);
    let mut event_stream = EventStream::new();

    let result = loop {
        // Drain everything queued before drawing.
        while let Ok(signal) = app.signals.try_recv() {
            app.handle_signal(signal);
        }

        if let Err(e) = terminal.draw(|f| app.render(f)) {
            break Err(e.into());
        }

        tokio::select! {
            maybe_event = event_stream.next() => {
                if let Some(Ok(Event::Key(key))) = maybe_event {
                    if key.kind == KeyEventKind::Press {
                        match app.handle_key(key) {
                            Ok(true) => break Ok(()),
                            Ok(false) => {}
                            Err(e) => break Err(e),
                        }
                    }
                }
            }
            Some(signal) = app.signals.recv() => {
                app.handle_signal(signal);
            }
            _ = tokio::time::sleep(tick_rate) => {}
        }
    };

    restore_terminal(terminal)?;
    result
}

fn setup_terminal() -> Result<Terminal<CrosstermBackend<Stdout>>> {
    enable_raw_mode()?;
    let build = || -> Result<Terminal<CrosstermBackend<Stdout>>> {
        let backend = CrosstermBackend::new(io::stdout());
        let (_, rows) = crossterm::terminal::size()?;
        let terminal = Terminal::with_options(
            backend,
            TerminalOptions {
                viewport: Viewport::Inline(rows),
            },
        )?;
        Ok(terminal)
    };
    // Raw mode must not outlive a terminal we failed to build.
    undo_on_error(build(), disable_raw_mode)
}

fn undo_on_error<T>(result: Result<T>, undo: impl FnOnce() -> io::Result<()>) -> Result<T> {
    if result.is_err() {
        let _ = undo();
    }
    result
}

fn restore_terminal(mut terminal: Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
    disable_raw_mode()?;
    terminal.show_cursor()?;
    Ok(())
}
