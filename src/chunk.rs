//! Time-gap aware conversation chunker.
//!
//! Splits one conversation's messages (timestamp ascending) into [`Chunk`]s.
//! A single open buffer accumulates messages until one of the break rules
//! closes it:
//!
//! | Rule | Condition | Effect |
//! |------|-----------|--------|
//! | noise | text contains a noise keyword | message dropped before accumulation |
//! | hard break | gap > [`GAP_HARD_SECONDS`] | close buffer, start a new one |
//! | soft break | gap > [`GAP_SOFT_SECONDS`] and buffer ≥ [`CHUNK_MIN_TOKENS`] | close buffer, start a new one |
//! | max size | buffer ≥ `max_tokens` after appending | close first half, keep second half open |
//!
//! Each message renders as one line `[YYYY-MM-DD HH:MM] Sender: text` (UTC).
//! The rendered text is what gets fingerprinted, so re-chunking identical
//! input yields identical chunk ids.

use std::collections::BTreeSet;

use chrono::DateTime;

use crate::config::ChunkingConfig;
use crate::fingerprint;
use crate::models::{Chunk, Message};

/// Gap that always starts a new chunk (4 hours).
pub const GAP_HARD_SECONDS: i64 = 4 * 60 * 60;

/// Gap that starts a new chunk once the buffer is big enough (20 minutes).
pub const GAP_SOFT_SECONDS: i64 = 20 * 60;

/// Minimum buffer size (estimated tokens) before a soft break applies.
pub const CHUNK_MIN_TOKENS: usize = 300;

/// Words-to-tokens ratio, as a percentage (1.35 tokens per word).
const TOKENS_PER_100_WORDS: usize = 135;

/// Segmentation parameters that may vary by configuration.
#[derive(Debug, Clone)]
pub struct ChunkPolicy {
    pub max_tokens: usize,
    /// Lowercased, trimmed, non-empty keywords.
    noise_keywords: Vec<String>,
}

impl ChunkPolicy {
    pub fn new(max_tokens: usize, noise_keywords: &[String]) -> Self {
        let noise_keywords = noise_keywords
            .iter()
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();
        Self {
            max_tokens,
            noise_keywords,
        }
    }

    pub fn from_config(config: &ChunkingConfig) -> Self {
        Self::new(config.max_tokens, &config.noise_keywords)
    }

    fn is_noise(&self, text: &str) -> bool {
        if self.noise_keywords.is_empty() {
            return false;
        }
        let lower = text.to_lowercase();
        self.noise_keywords.iter().any(|k| lower.contains(k.as_str()))
    }
}

/// Estimate token count: word count × 1.35, truncated.
///
/// A fast, conservative proxy, not a model-exact tokenizer.
pub fn estimate_tokens(text: &str) -> usize {
    tokens_for_words(text.split_whitespace().count())
}

fn tokens_for_words(words: usize) -> usize {
    words * TOKENS_PER_100_WORDS / 100
}

/// Render a single message line.
pub fn format_message(timestamp: i64, sender_name: &str, text: &str) -> String {
    let when = DateTime::from_timestamp(timestamp, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| timestamp.to_string());
    format!("[{}] {}: {}", when, sender_name, text)
}

/// A message held in the open buffer together with its rendered line.
struct Buffered<'a> {
    msg: &'a Message,
    line: String,
    words: usize,
}

impl<'a> Buffered<'a> {
    fn new(msg: &'a Message) -> Self {
        let line = format_message(msg.timestamp, &msg.sender_name, &msg.text);
        // Lines are newline-joined, so per-line word counts sum to the
        // word count of the rendered chunk.
        let words = line.split_whitespace().count();
        Self { msg, line, words }
    }
}

fn buffer_tokens(buf: &[Buffered<'_>]) -> usize {
    tokens_for_words(buf.iter().map(|b| b.words).sum())
}

/// Chunk one conversation's messages.
///
/// `messages` must belong to a single conversation and be ordered by
/// timestamp ascending; messages at or before the conversation watermark
/// are expected to be excluded by the caller.
pub fn chunk_conversation(messages: &[Message], policy: &ChunkPolicy) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let mut buf: Vec<Buffered<'_>> = Vec::new();

    for msg in messages {
        if policy.is_noise(&msg.text) {
            tracing::debug!(conversation = %msg.conversation_id, "skipping noisy message");
            continue;
        }

        let Some(last) = buf.last() else {
            buf.push(Buffered::new(msg));
            continue;
        };

        let delta = msg.timestamp.saturating_sub(last.msg.timestamp);

        if delta > GAP_HARD_SECONDS {
            chunks.extend(finalize(&buf));
            buf = vec![Buffered::new(msg)];
            continue;
        }

        if delta > GAP_SOFT_SECONDS && buffer_tokens(&buf) >= CHUNK_MIN_TOKENS {
            chunks.extend(finalize(&buf));
            buf = vec![Buffered::new(msg)];
            continue;
        }

        buf.push(Buffered::new(msg));

        if buffer_tokens(&buf) >= policy.max_tokens {
            let split_point = buf.len() / 2;
            let tail = buf.split_off(split_point);
            chunks.extend(finalize(&buf));
            buf = tail;
        }
    }

    chunks.extend(finalize(&buf));
    chunks
}

/// Build a [`Chunk`] from buffered messages. Returns `None` for an empty buffer.
fn finalize(buf: &[Buffered<'_>]) -> Option<Chunk> {
    let first = buf.first()?.msg;
    let last = buf.last()?.msg;

    let participants: BTreeSet<&str> = buf
        .iter()
        .map(|b| b.msg.sender_name.as_str())
        .filter(|name| !name.is_empty())
        .collect();

    let content = buf
        .iter()
        .map(|b| b.line.as_str())
        .collect::<Vec<_>>()
        .join("\n");

    let content_fingerprint = fingerprint::fingerprint(&content);
    let chunk_id = fingerprint::chunk_id(&first.conversation_id, &content_fingerprint);

    Some(Chunk {
        chunk_id,
        conversation_id: first.conversation_id.clone(),
        conversation_name: first.conversation_name.clone(),
        participants: participants.into_iter().map(str::to_string).collect(),
        time_start: first.timestamp,
        time_end: last.timestamp,
        message_count: buf.len() as i64,
        content,
        content_fingerprint,
    })
}
