//! Event source: one JSON event per line, from a file or stdin.
//!
//! Lines may be bare NDJSON or SSE-style `data: {...}` frames; comments
//! (`:`), `event:`/`id:` fields and blank lines are skipped and `[DONE]`
//! ends the turn. Everything is relayed as turn-scoped signals so the
//! consumer can drop activity for a turn it no longer cares about.

use anyhow::{Context, Result};
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::engine::{StreamEvent, TurnId, TurnSignal};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Stdin,
    File(PathBuf),
}

impl Input {
    /// `-` means stdin.
    pub fn from_arg(arg: &Path) -> Self {
        if arg.as_os_str() == "-" {
            Input::Stdin
        } else {
            Input::File(arg.to_path_buf())
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Input::Stdin => "<stdin>".to_string(),
            Input::File(path) => path.display().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Event(Box<StreamEvent>),
    Done,
    Skip,
    Malformed(String),
}

pub fn parse_frame_line(line: &str) -> Frame {
    let line = line.trim();
    if line.is_empty() || line.starts_with(':') {
        return Frame::Skip;
    }
    let data = match line.strip_prefix("data:") {
        Some(rest) => rest.trim(),
        None if line.starts_with("event:") || line.starts_with("id:") || line.starts_with("retry:") => {
            return Frame::Skip;
        }
        None => line,
    };
    if data.is_empty() {
        return Frame::Skip;
    }
    if data == "[DONE]" {
        return Frame::Done;
    }
    match serde_json::from_str::<StreamEvent>(data) {
        Ok(event) => Frame::Event(Box::new(event)),
        Err(e) => Frame::Malformed(e.to_string()),
    }
}

/// Reads the whole input eagerly. Malformed lines are skipped with a warning.
pub fn read_events(input: &Input) -> Result<Vec<StreamEvent>> {
    let reader: Box<dyn BufRead> = match input {
        Input::Stdin => Box::new(std::io::stdin().lock()),
        Input::File(path) => Box::new(std::io::BufReader::new(
            std::fs::File::open(path).with_context(|| format!("opening {}", path.display()))?,
        )),
    };
    collect_events(reader)
}

fn collect_events(reader: impl BufRead) -> Result<Vec<StreamEvent>> {
    let mut events = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("reading line {}", index + 1))?;
        match parse_frame_line(&line) {
            Frame::Event(event) => events.push(*event),
            Frame::Done => break,
            Frame::Skip => {}
            Frame::Malformed(err) => warn!(line = index + 1, "skipping malformed event: {err}"),
        }
    }
    Ok(events)
}

/// Spawns a reader task relaying `input` as signals for `turn_id`.
/// `delay` throttles delivery to replay a recording at streaming pace.
pub fn spawn_source(
    input: Input,
    turn_id: TurnId,
    delay: Duration,
) -> mpsc::UnboundedReceiver<TurnSignal> {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let result = match &input {
            Input::Stdin => relay(tokio::io::stdin(), turn_id, delay, &tx).await,
            Input::File(path) => match tokio::fs::File::open(path).await {
                Ok(file) => relay(file, turn_id, delay, &tx).await,
                Err(e) => Err(anyhow::Error::new(e).context(format!("opening {}", path.display()))),
            },
        };
        let last = match result {
            Ok(()) => TurnSignal::complete(turn_id),
            Err(e) => {
                warn!("event source {} failed: {e:#}", input.describe());
                TurnSignal::error(turn_id, format!("{e:#}"))
            }
        };
        let _ = tx.send(last);
    });
    rx
}

async fn relay(
    reader: impl AsyncRead + Unpin,
    turn_id: TurnId,
    delay: Duration,
    tx: &mpsc::UnboundedSender<TurnSignal>,
) -> Result<()> {
    let mut lines = BufReader::new(reader).lines();
    let mut line_no = 0usize;
    while let Some(line) = lines.next_line().await.context("reading event stream")? {
        line_no += 1;
        match parse_frame_line(&line) {
            Frame::Event(event) => {
                if tx.send(TurnSignal::event(turn_id, *event)).is_err() {
                    debug!("signal receiver dropped, stopping source");
                    return Ok(());
                }
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }
            Frame::Done => break,
            Frame::Skip => {}
            Frame::Malformed(err) => warn!(line = line_no, "skipping malformed event: {err}"),
        }
    }
    Ok(())
}
