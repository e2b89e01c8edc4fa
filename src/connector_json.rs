//! Chat-export JSON connector.
//!
//! Reads exports whose top level is one conversation object or an array of
//! them:
//!
//! ```json
//! {"id": 42, "name": "Alice", "type": "personal_chat",
//!  "messages": [{"id": 1, "type": "message", "date": "2024-01-05T10:00:00",
//!                "date_unixtime": "1704448800", "from": "Alice",
//!                "from_id": "user42", "text": "hi"}]}
//! ```
//!
//! A directory is scanned recursively for `*.json` files. Only entries with
//! `type == "message"` and non-empty text are imported.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::models::{SourceConversation, SourceMessage};
use crate::sources::ChatSource;

pub const MAX_FILE_SIZE: u64 = 500 * 1024 * 1024;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ExportFile {
    Many(Vec<ExportChat>),
    One(ExportChat),
}

#[derive(Debug, Deserialize)]
struct ExportChat {
    #[serde(default)]
    id: Value,
    #[serde(default)]
    name: Option<String>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    messages: Vec<ExportMessage>,
}

#[derive(Debug, Deserialize)]
struct ExportMessage {
    #[serde(default)]
    id: Value,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    date: Option<String>,
    #[serde(default)]
    date_unixtime: Option<Value>,
    #[serde(default)]
    from: Option<String>,
    #[serde(default)]
    from_id: Option<Value>,
    #[serde(default)]
    text: Value,
}

struct LoadedChat {
    conversation: SourceConversation,
    messages: Vec<SourceMessage>,
}

/// A parsed chat export, held in memory.
pub struct JsonExportSource {
    chats: BTreeMap<String, LoadedChat>,
    /// Service events and messages with empty text.
    skipped_empty: u64,
}

impl JsonExportSource {
    /// Load a single export file or every `*.json` file under a directory.
    ///
    /// `self_name` is used as the sender for messages whose sender is missing.
    pub fn open(path: &Path, self_name: Option<&str>) -> Result<Self> {
        if !path.exists() {
            bail!("Export path does not exist: {}", path.display());
        }

        let files = export_files(path)?;
        let mut source = Self {
            chats: BTreeMap::new(),
            skipped_empty: 0,
        };

        for file in &files {
            source
                .load_file(file, self_name)
                .with_context(|| format!("Failed to import {}", file.display()))?;
        }

        info!(
            files = files.len(),
            conversations = source.chats.len(),
            skipped = source.skipped_empty,
            "loaded chat export"
        );
        Ok(source)
    }

    fn load_file(&mut self, path: &Path, self_name: Option<&str>) -> Result<()> {
        let size = std::fs::metadata(path)?.len();
        if size > MAX_FILE_SIZE {
            bail!(
                "File too large. Maximum size is {}MB",
                MAX_FILE_SIZE / (1024 * 1024)
            );
        }

        let content = std::fs::read_to_string(path)?;
        let parsed: ExportFile = serde_json::from_str(&content).context("Invalid JSON export")?;
        let chats = match parsed {
            ExportFile::Many(chats) => chats,
            ExportFile::One(chat) => vec![chat],
        };

        let imported_at = chrono::Utc::now().timestamp();
        for chat in chats {
            self.add_chat(chat, self_name, imported_at);
        }
        Ok(())
    }

    fn add_chat(&mut self, chat: ExportChat, self_name: Option<&str>, imported_at: i64) {
        let conversation_id = id_string(&chat.id);
        let name = chat.name.unwrap_or_else(|| "Unknown".to_string());
        debug!(conversation = %conversation_id, name = %name, "reading chat");

        let mut messages = Vec::with_capacity(chat.messages.len());
        for msg in chat.messages {
            if msg.kind.as_deref() != Some("message") {
                self.skipped_empty += 1;
                continue;
            }
            let text = flatten_text(&msg.text);
            if text.trim().is_empty() {
                self.skipped_empty += 1;
                continue;
            }

            let sender_name = match msg.from.filter(|f| !f.is_empty()) {
                Some(from) => Some(from),
                None => self_name.map(str::to_string),
            };

            messages.push(SourceMessage {
                message_id: id_string(&msg.id),
                sender_id: msg.from_id.as_ref().map(id_string),
                sender_name,
                text,
                timestamp: message_timestamp(msg.date_unixtime.as_ref(), msg.date.as_deref())
                    .unwrap_or(imported_at),
            });
        }
        messages.sort_by_key(|m| m.timestamp);

        let entry = self.chats.entry(conversation_id.clone()).or_insert_with(|| LoadedChat {
            conversation: SourceConversation {
                conversation_id,
                name: name.clone(),
                kind: chat.kind.clone().unwrap_or_else(|| "private".to_string()),
            },
            messages: Vec::new(),
        });
        entry.conversation.name = name;
        entry.messages.extend(messages);
        entry.messages.sort_by_key(|m| m.timestamp);
    }
}

#[async_trait]
impl ChatSource for JsonExportSource {
    fn name(&self) -> &str {
        "json_import"
    }

    fn skipped_entries(&self) -> u64 {
        self.skipped_empty
    }

    async fn conversations(&self) -> Result<Vec<SourceConversation>> {
        Ok(self.chats.values().map(|c| c.conversation.clone()).collect())
    }

    async fn messages(&self, conversation_id: &str, since: Option<i64>) -> Result<Vec<SourceMessage>> {
        let chat = self
            .chats
            .get(conversation_id)
            .ok_or_else(|| anyhow::anyhow!("Unknown conversation: {}", conversation_id))?;
        Ok(chat
            .messages
            .iter()
            .filter(|m| since.map_or(true, |s| m.timestamp >= s))
            .cloned()
            .collect())
    }
}

fn export_files(path: &Path) -> Result<Vec<PathBuf>> {
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(path) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let is_json = entry
            .path()
            .extension()
            .map(|e| e.eq_ignore_ascii_case("json"))
            .unwrap_or(false);
        if is_json {
            files.push(entry.path().to_path_buf());
        }
    }

    // Sort for deterministic ordering
    files.sort();
    Ok(files)
}

/// Text is either a string or an array of strings and `{"text": ...}` entities.
pub fn flatten_text(text: &Value) -> String {
    match text {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Array(parts) => parts
            .iter()
            .map(|part| match part {
                Value::String(s) => s.as_str(),
                other => other.get("text").and_then(Value::as_str).unwrap_or(""),
            })
            .collect(),
        other => other.to_string(),
    }
}

fn id_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Prefer `date_unixtime`; fall back to the ISO-8601 `date` (read as UTC).
fn message_timestamp(unixtime: Option<&Value>, date: Option<&str>) -> Option<i64> {
    let from_unix = unixtime.and_then(|v| match v {
        Value::String(s) => s.parse::<i64>().ok(),
        Value::Number(n) => n.as_i64(),
        _ => None,
    });
    if from_unix.is_some() {
        return from_unix;
    }

    let date = date?;
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(date) {
        return Some(dt.timestamp());
    }
    NaiveDateTime::parse_from_str(date, "%Y-%m-%dT%H:%M:%S")
        .ok()
        .map(|dt| dt.and_utc().timestamp())
}
