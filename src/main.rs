mod config;
mod engine;
mod logging;
mod paths;
mod source;
mod tui;

use crate::config::Config;
use crate::engine::{RenderSession, RenderTree, StreamEvent, TurnId};
use crate::source::Input;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "runtree", version)]
#[command(about = "Rebuild and render agent execution trees from streamed run events", long_about = None)]
struct Cli {
    /// Config file. If omitted, searches $RUNTREE_CONFIG, ./runtree.toml and the config dirs.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Replay an event log and print the final tree as text
    Render {
        /// NDJSON or SSE event log, `-` for stdin
        input: PathBuf,
    },
    /// Replay an event log and print the render tree as JSON
    Dump {
        /// NDJSON or SSE event log, `-` for stdin
        input: PathBuf,
    },
    /// Interactive viewer fed through the live signal path
    Tui {
        /// NDJSON or SSE event log, `-` for stdin
        input: PathBuf,

        /// Pause between events to simulate streaming
        #[arg(long, default_value_t = 0)]
        delay_ms: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (config, config_path) = Config::load_with_path(cli.config.as_deref())?;

    // Stderr logging is suppressed in TUI mode: ratatui owns the terminal.
    let will_run_tui = matches!(cli.cmd, Command::Tui { .. });
    let log_dir = match logging::setup_tracing_with_settings(logging::LoggingSettings {
        level: config.logging.level.as_deref(),
        directory: config.logging.directory.as_deref(),
        retention_days: config.logging.retention_days,
        suppress_console: will_run_tui,
    }) {
        Ok(path) => Some(path),
        Err(err) => {
            eprintln!("Failed to initialize logging: {err:#}");
            None
        }
    };
    info!(
        config = ?config_path,
        logs = ?log_dir,
        "runtree {}",
        env!("CARGO_PKG_VERSION")
    );

    match cli.cmd {
        Command::Render { input } => {
            let tree = replay(&Input::from_arg(&input), &config)?;
            print!("{}", tui::render::render_plain(&tree, &config.display));
        }
        Command::Dump { input } => {
            let tree = replay(&Input::from_arg(&input), &config)?;
            let json = serde_json::to_string_pretty(&tree).context("serializing render tree")?;
            println!("{json}");
        }
        Command::Tui { input, delay_ms } => {
            tui::run_tui(
                Input::from_arg(&input),
                &config,
                Duration::from_millis(delay_ms),
            )
            .await?;
        }
    }
    Ok(())
}

/// Feeds every event through `step` as a live host would, then completes the turn.
fn replay(input: &Input, config: &Config) -> Result<RenderTree> {
    let events: Vec<StreamEvent> = source::read_events(input)?;
    info!(source = %input.describe(), count = events.len(), "replaying events");
    let mut session = RenderSession::new(TurnId::new(), config.session_options());
    for event in events {
        session.step(Some(event), true);
    }
    session.step(None, false);
    // The log was read to its end: the turn is over.
    session.complete();
    Ok(session.render())
}
