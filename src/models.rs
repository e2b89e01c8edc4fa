//! Core data models used throughout chatmem.
//!
//! These types represent the messages, conversations, and chunks that flow
//! through the ingestion, chunking, and embedding pipeline.

use serde::{Deserialize, Serialize};

/// Raw message produced by a chat source before it is stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceMessage {
    pub message_id: String,
    pub sender_id: Option<String>,
    pub sender_name: Option<String>,
    pub text: String,
    /// Unix timestamp in seconds.
    pub timestamp: i64,
}

/// Conversation metadata as delivered by a chat source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceConversation {
    pub conversation_id: String,
    pub name: String,
    pub kind: String,
}

/// A stored message, as read back for chunking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub message_id: String,
    pub conversation_id: String,
    pub conversation_name: String,
    pub sender_name: String,
    pub text: String,
    pub timestamp: i64,
}

/// A conversation row from the `conversations` table.
#[derive(Debug, Clone)]
pub struct Conversation {
    pub conversation_id: String,
    pub name: String,
    pub kind: String,
    pub included: bool,
    pub message_count: i64,
    pub last_message_at: Option<i64>,
    /// Watermark: messages at or before this timestamp are already chunked.
    pub last_chunked_at: Option<i64>,
}

/// A bounded span of one conversation's messages, rendered as text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub chunk_id: String,
    pub conversation_id: String,
    pub conversation_name: String,
    pub participants: Vec<String>,
    pub time_start: i64,
    pub time_end: i64,
    pub message_count: i64,
    pub content: String,
    pub content_fingerprint: String,
}

/// A persisted chunk, including its embedding bookkeeping.
#[derive(Debug, Clone)]
pub struct StoredChunk {
    pub chunk: Chunk,
    pub embedding_version: String,
    /// `None` until the chunk has been embedded with the current model.
    pub embedded_at: Option<i64>,
}

/// Metadata mirrored into the vector index next to each embedding.
///
/// Carries enough to decide whether an entry is stale relative to the chunk
/// store without reading chunk content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryMetadata {
    pub conversation_id: String,
    pub conversation_name: String,
    pub participants: Vec<String>,
    pub content_fingerprint: String,
    pub embedding_version: String,
    pub time_start: i64,
    pub time_end: i64,
    pub message_count: i64,
}

impl EntryMetadata {
    pub fn for_chunk(chunk: &Chunk, embedding_version: &str) -> Self {
        Self {
            conversation_id: chunk.conversation_id.clone(),
            conversation_name: chunk.conversation_name.clone(),
            participants: chunk.participants.clone(),
            content_fingerprint: chunk.content_fingerprint.clone(),
            embedding_version: embedding_version.to_string(),
            time_start: chunk.time_start,
            time_end: chunk.time_end,
            message_count: chunk.message_count,
        }
    }
}

/// A similarity hit returned from the vector index.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub chunk_id: String,
    pub score: f32,
    pub document: String,
    pub metadata: EntryMetadata,
}

/// Outcome of an embedding sync or a full reindex.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncSummary {
    /// Chunks embedded and written to the index.
    pub embedded: usize,
    /// Chunks already present in the index with a matching fingerprint.
    pub skipped: usize,
    /// Index entries with no counterpart in the chunk store. Reported, not removed.
    pub deleted: usize,
    /// Chunks in failed batches.
    pub errors: usize,
    pub last_error: Option<String>,
    /// The live index was cleared because its embedding version differed.
    pub wiped: bool,
}
