//! Chunking, sync, and reindex progress reporting.
//!
//! Long operations emit [`ProgressEvent`]s through a [`ProgressReporter`].
//! The CLI reporters write to **stderr** so stdout remains parseable for
//! scripts; [`ChannelProgress`] forwards events to an async consumer.
//!
//! Sync and reindex always end with exactly one terminal event
//! ([`ProgressEvent::Finished`] or [`ProgressEvent::Failed`]).

use std::io::Write;

use tokio::sync::mpsc;

use crate::models::SyncSummary;

/// A single progress event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProgressEvent {
    /// Conversation `n` of `total` has been chunked.
    Chunking {
        conversation: String,
        n: u64,
        total: u64,
    },
    /// `n` of `total` chunks processed by an incremental sync.
    Embedding { n: u64, total: u64 },
    /// `n` of `total` chunks written to the shadow index.
    Reindexing { n: u64, total: u64 },
    Finished {
        operation: &'static str,
        summary: SyncSummary,
    },
    Failed {
        operation: &'static str,
        error: String,
    },
}

impl ProgressEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProgressEvent::Finished { .. } | ProgressEvent::Failed { .. })
    }
}

pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// Human-friendly progress on stderr: "embed  1,234 / 5,000 chunks".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: ProgressEvent) {
        let line = match &event {
            ProgressEvent::Chunking {
                conversation,
                n,
                total,
            } => format!(
                "chunk  {} / {} conversations  ({})\n",
                format_number(*n),
                format_number(*total),
                conversation
            ),
            ProgressEvent::Embedding { n, total } => format!(
                "embed  {} / {} chunks\n",
                format_number(*n),
                format_number(*total)
            ),
            ProgressEvent::Reindexing { n, total } => format!(
                "reindex  {} / {} chunks\n",
                format_number(*n),
                format_number(*total)
            ),
            ProgressEvent::Finished { operation, summary } => format!(
                "{}  done: {} embedded, {} skipped, {} stale, {} errors{}\n",
                operation,
                format_number(summary.embedded as u64),
                format_number(summary.skipped as u64),
                format_number(summary.deleted as u64),
                format_number(summary.errors as u64),
                if summary.wiped { " (index rebuilt)" } else { "" }
            ),
            ProgressEvent::Failed { operation, error } => {
                format!("{}  failed: {}\n", operation, error)
            }
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: ProgressEvent) {
        let obj = match &event {
            ProgressEvent::Chunking {
                conversation,
                n,
                total,
            } => serde_json::json!({
                "event": "progress",
                "phase": "chunking",
                "conversation": conversation,
                "n": n,
                "total": total
            }),
            ProgressEvent::Embedding { n, total } => serde_json::json!({
                "event": "progress",
                "phase": "embedding",
                "n": n,
                "total": total
            }),
            ProgressEvent::Reindexing { n, total } => serde_json::json!({
                "event": "progress",
                "phase": "reindexing",
                "n": n,
                "total": total
            }),
            ProgressEvent::Finished { operation, summary } => serde_json::json!({
                "event": "done",
                "operation": operation,
                "summary": summary
            }),
            ProgressEvent::Failed { operation, error } => serde_json::json!({
                "event": "error",
                "operation": operation,
                "error": error
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: ProgressEvent) {}
}

/// Forwards events to a channel. Events are dropped once the receiver is gone.
pub struct ChannelProgress {
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl ChannelProgress {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ProgressReporter for ChannelProgress {
    fn report(&self, event: ProgressEvent) {
        let _ = self.tx.send(event);
    }
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
