//! Relational chunk store accessor.
//!
//! Thin wrapper over the SQLite tables that hold messages, conversations,
//! chunks, and the run log. Every write method takes a [`WriteGuard`], so a
//! mutation cannot be expressed without holding the process-wide write gate.
//!
//! Chunk inserts are idempotent: a chunk whose content fingerprint already
//! exists is ignored. The conversation watermark advances in the same
//! transaction that persists the chunks derived from messages up to it.

use std::collections::HashMap;
use std::sync::Arc;

use sqlx::sqlite::SqliteRow;
use sqlx::{Connection, Row};

use crate::db::{Database, WriteGuard};
use crate::error::Result;
use crate::models::{Chunk, Conversation, Message, SourceConversation, SourceMessage, StoredChunk};

/// Maximum bound parameters per `IN (...)` statement.
const IN_CLAUSE_LIMIT: usize = 500;

/// Outcome of inserting a batch of messages.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MessageInsert {
    pub inserted: u64,
    pub skipped_duplicate: u64,
}

/// Outcome of persisting one conversation's chunks.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ChunkInsert {
    pub inserted: u64,
    pub duplicates: u64,
}

/// Row counts for health reporting.
#[derive(Debug, Default, Clone, Copy)]
pub struct StoreCounts {
    pub conversations: i64,
    pub messages: i64,
    pub unchunked_messages: i64,
    pub chunks: i64,
    pub unembedded_chunks: i64,
}

/// One row of the `sync_log` table.
#[derive(Debug, Clone, Default)]
pub struct RunLogEntry {
    pub operation: String,
    pub started_at: i64,
    pub finished_at: Option<i64>,
    pub status: String,
    pub messages_added: i64,
    pub chunks_created: i64,
    pub skipped_duplicate: i64,
    pub skipped_empty: i64,
    pub detail: Option<String>,
}

#[derive(Clone)]
pub struct ChunkStore {
    db: Arc<Database>,
}

impl ChunkStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    // ============ Reads ============

    pub async fn conversations(&self) -> Result<Vec<Conversation>> {
        let mut conn = self.db.connect().await?;
        let rows = sqlx::query(
            r#"
            SELECT conversation_id, name, kind, included, message_count,
                   last_message_at, last_chunked_at
            FROM conversations
            ORDER BY conversation_id
            "#,
        )
        .fetch_all(&mut conn)
        .await?;
        Ok(rows.iter().map(conversation_from_row).collect())
    }

    pub async fn conversation(&self, conversation_id: &str) -> Result<Option<Conversation>> {
        let mut conn = self.db.connect().await?;
        let row = sqlx::query(
            r#"
            SELECT conversation_id, name, kind, included, message_count,
                   last_message_at, last_chunked_at
            FROM conversations
            WHERE conversation_id = ?
            "#,
        )
        .bind(conversation_id)
        .fetch_optional(&mut conn)
        .await?;
        Ok(row.as_ref().map(conversation_from_row))
    }

    /// Included conversations that have messages newer than their watermark.
    pub async fn pending_conversations(&self) -> Result<Vec<Conversation>> {
        let mut conn = self.db.connect().await?;
        let rows = sqlx::query(
            r#"
            SELECT c.conversation_id, c.name, c.kind, c.included, c.message_count,
                   c.last_message_at, c.last_chunked_at
            FROM conversations c
            WHERE c.included = 1
              AND EXISTS (
                SELECT 1 FROM messages m
                WHERE m.conversation_id = c.conversation_id
                  AND (c.last_chunked_at IS NULL OR m.timestamp > c.last_chunked_at)
              )
            ORDER BY c.conversation_id
            "#,
        )
        .fetch_all(&mut conn)
        .await?;
        Ok(rows.iter().map(conversation_from_row).collect())
    }

    /// Messages of one conversation newer than its watermark, oldest first.
    pub async fn unchunked_messages(&self, conversation_id: &str) -> Result<Vec<Message>> {
        let mut conn = self.db.connect().await?;
        let rows = sqlx::query(
            r#"
            SELECT m.message_id, m.conversation_id, c.name AS conversation_name,
                   COALESCE(NULLIF(m.sender_name, ''), 'Unknown') AS sender_name,
                   m.text, m.timestamp
            FROM messages m
            JOIN conversations c ON c.conversation_id = m.conversation_id
            WHERE m.conversation_id = ?
              AND (c.last_chunked_at IS NULL OR m.timestamp > c.last_chunked_at)
            ORDER BY m.timestamp ASC, m.id ASC
            "#,
        )
        .bind(conversation_id)
        .fetch_all(&mut conn)
        .await?;

        Ok(rows
            .iter()
            .map(|row| Message {
                message_id: row.get("message_id"),
                conversation_id: row.get("conversation_id"),
                conversation_name: row.get("conversation_name"),
                sender_name: row.get("sender_name"),
                text: row.get("text"),
                timestamp: row.get("timestamp"),
            })
            .collect())
    }

    /// `chunk_id -> content fingerprint` for every stored chunk.
    pub async fn chunk_fingerprints(&self) -> Result<HashMap<String, String>> {
        let mut conn = self.db.connect().await?;
        let rows = sqlx::query("SELECT chunk_id, content_hash FROM chunks")
            .fetch_all(&mut conn)
            .await?;
        Ok(rows
            .iter()
            .map(|row| (row.get("chunk_id"), row.get("content_hash")))
            .collect())
    }

    /// Every stored chunk, in insertion order.
    pub async fn all_chunks(&self) -> Result<Vec<StoredChunk>> {
        let mut conn = self.db.connect().await?;
        let rows = sqlx::query(
            r#"
            SELECT chunk_id, conversation_id, conversation_name, participants,
                   time_start, time_end, message_count, content, content_hash,
                   embedding_version, embedded_at
            FROM chunks
            ORDER BY id
            "#,
        )
        .fetch_all(&mut conn)
        .await?;

        rows.iter().map(stored_chunk_from_row).collect()
    }

    pub async fn chunk_ids_for_conversation(&self, conversation_id: &str) -> Result<Vec<String>> {
        let mut conn = self.db.connect().await?;
        let ids = sqlx::query_scalar("SELECT chunk_id FROM chunks WHERE conversation_id = ? ORDER BY id")
            .bind(conversation_id)
            .fetch_all(&mut conn)
            .await?;
        Ok(ids)
    }

    pub async fn counts(&self) -> Result<StoreCounts> {
        let mut conn = self.db.connect().await?;
        let conversations = sqlx::query_scalar("SELECT COUNT(*) FROM conversations")
            .fetch_one(&mut conn)
            .await?;
        let messages = sqlx::query_scalar("SELECT COUNT(*) FROM messages")
            .fetch_one(&mut conn)
            .await?;
        let unchunked_messages = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM messages m
            JOIN conversations c ON c.conversation_id = m.conversation_id
            WHERE c.included = 1
              AND (c.last_chunked_at IS NULL OR m.timestamp > c.last_chunked_at)
            "#,
        )
        .fetch_one(&mut conn)
        .await?;
        let chunks = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&mut conn)
            .await?;
        let unembedded_chunks = sqlx::query_scalar("SELECT COUNT(*) FROM chunks WHERE embedded_at IS NULL")
            .fetch_one(&mut conn)
            .await?;

        Ok(StoreCounts {
            conversations,
            messages,
            unchunked_messages,
            chunks,
            unembedded_chunks,
        })
    }

    pub async fn recent_runs(&self, limit: i64) -> Result<Vec<RunLogEntry>> {
        let mut conn = self.db.connect().await?;
        let rows = sqlx::query(
            r#"
            SELECT operation, started_at, finished_at, status, messages_added,
                   chunks_created, skipped_duplicate, skipped_empty, detail
            FROM sync_log
            ORDER BY id DESC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&mut conn)
        .await?;

        Ok(rows
            .iter()
            .map(|row| RunLogEntry {
                operation: row.get("operation"),
                started_at: row.get("started_at"),
                finished_at: row.get("finished_at"),
                status: row.get("status"),
                messages_added: row.get("messages_added"),
                chunks_created: row.get("chunks_created"),
                skipped_duplicate: row.get("skipped_duplicate"),
                skipped_empty: row.get("skipped_empty"),
                detail: row.get("detail"),
            })
            .collect())
    }

    // ============ Writes (gate required) ============

    /// Insert or rename a conversation. Its watermark and inclusion flag are kept.
    pub async fn upsert_conversation(
        &self,
        gate: &WriteGuard<'_>,
        conversation: &SourceConversation,
    ) -> Result<()> {
        let mut conn = gate.connect().await?;
        sqlx::query(
            r#"
            INSERT INTO conversations (conversation_id, name, kind, created_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(conversation_id) DO UPDATE SET
                name = excluded.name,
                kind = excluded.kind
            "#,
        )
        .bind(&conversation.conversation_id)
        .bind(&conversation.name)
        .bind(&conversation.kind)
        .bind(chrono::Utc::now().timestamp())
        .execute(&mut conn)
        .await?;
        Ok(())
    }

    /// Insert messages, ignoring ones already present, and refresh the
    /// conversation's message count and last-message time.
    pub async fn insert_messages(
        &self,
        gate: &WriteGuard<'_>,
        conversation_id: &str,
        messages: &[SourceMessage],
        source: &str,
    ) -> Result<MessageInsert> {
        let imported_at = chrono::Utc::now().timestamp();
        let mut outcome = MessageInsert::default();

        let mut conn = gate.connect().await?;
        let mut tx = conn.begin().await?;

        for msg in messages {
            let result = sqlx::query(
                r#"
                INSERT OR IGNORE INTO messages
                    (message_id, conversation_id, sender_id, sender_name, text, timestamp, source, imported_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&msg.message_id)
            .bind(conversation_id)
            .bind(&msg.sender_id)
            .bind(&msg.sender_name)
            .bind(&msg.text)
            .bind(msg.timestamp)
            .bind(source)
            .bind(imported_at)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() > 0 {
                outcome.inserted += 1;
            } else {
                outcome.skipped_duplicate += 1;
            }
        }

        sqlx::query(
            r#"
            UPDATE conversations SET
                message_count = (SELECT COUNT(*) FROM messages WHERE conversation_id = ?1),
                last_message_at = (SELECT MAX(timestamp) FROM messages WHERE conversation_id = ?1)
            WHERE conversation_id = ?1
            "#,
        )
        .bind(conversation_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(outcome)
    }

    /// Persist one conversation's chunks and advance its watermark, atomically.
    pub async fn persist_chunks(
        &self,
        gate: &WriteGuard<'_>,
        conversation_id: &str,
        chunks: &[Chunk],
        watermark: i64,
        embedding_version: &str,
    ) -> Result<ChunkInsert> {
        let mut outcome = ChunkInsert::default();

        let mut conn = gate.connect().await?;
        let mut tx = conn.begin().await?;

        for chunk in chunks {
            let participants = serde_json::to_string(&chunk.participants)?;
            let result = sqlx::query(
                r#"
                INSERT OR IGNORE INTO chunks (
                    chunk_id, conversation_id, conversation_name, participants,
                    time_start, time_end, message_count, content, content_hash,
                    embedding_version, embedded_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, NULL)
                "#,
            )
            .bind(&chunk.chunk_id)
            .bind(&chunk.conversation_id)
            .bind(&chunk.conversation_name)
            .bind(participants)
            .bind(chunk.time_start)
            .bind(chunk.time_end)
            .bind(chunk.message_count)
            .bind(&chunk.content)
            .bind(&chunk.content_fingerprint)
            .bind(embedding_version)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() > 0 {
                outcome.inserted += 1;
            } else {
                tracing::debug!(fingerprint = %chunk.content_fingerprint, "skipping duplicate chunk");
                outcome.duplicates += 1;
            }
        }

        sqlx::query("UPDATE conversations SET last_chunked_at = ? WHERE conversation_id = ?")
            .bind(watermark)
            .bind(conversation_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(outcome)
    }

    /// Record a successful embed for the given chunks.
    pub async fn mark_embedded(
        &self,
        gate: &WriteGuard<'_>,
        chunk_ids: &[String],
        embedding_version: &str,
        embedded_at: i64,
    ) -> Result<u64> {
        let mut updated = 0;
        let mut conn = gate.connect().await?;
        let mut tx = conn.begin().await?;

        for ids in chunk_ids.chunks(IN_CLAUSE_LIMIT) {
            let sql = format!(
                "UPDATE chunks SET embedded_at = ?, embedding_version = ? WHERE chunk_id IN ({})",
                placeholders(ids.len())
            );
            let mut query = sqlx::query(&sql).bind(embedded_at).bind(embedding_version);
            for id in ids {
                query = query.bind(id);
            }
            updated += query.execute(&mut *tx).await?.rows_affected();
        }

        tx.commit().await?;
        Ok(updated)
    }

    /// Mark every chunk as not yet embedded (after the index was wiped).
    pub async fn reset_embedded(&self, gate: &WriteGuard<'_>) -> Result<u64> {
        let mut conn = gate.connect().await?;
        let result = sqlx::query("UPDATE chunks SET embedded_at = NULL")
            .execute(&mut conn)
            .await?;
        Ok(result.rows_affected())
    }

    /// Delete every chunk and reset every watermark so all messages are
    /// chunked again.
    pub async fn clear_chunks(&self, gate: &WriteGuard<'_>) -> Result<u64> {
        let mut conn = gate.connect().await?;
        let mut tx = conn.begin().await?;
        let deleted = sqlx::query("DELETE FROM chunks").execute(&mut *tx).await?;
        sqlx::query("UPDATE conversations SET last_chunked_at = NULL")
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(deleted.rows_affected())
    }

    pub async fn set_included(
        &self,
        gate: &WriteGuard<'_>,
        conversation_id: &str,
        included: bool,
    ) -> Result<bool> {
        let mut conn = gate.connect().await?;
        let result = sqlx::query("UPDATE conversations SET included = ? WHERE conversation_id = ?")
            .bind(included)
            .bind(conversation_id)
            .execute(&mut conn)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Remove a conversation with its messages and chunks. Returns the ids of
    /// the deleted chunks so the caller can drop them from the vector index.
    pub async fn delete_conversation(
        &self,
        gate: &WriteGuard<'_>,
        conversation_id: &str,
    ) -> Result<Vec<String>> {
        let mut conn = gate.connect().await?;
        let mut tx = conn.begin().await?;

        let chunk_ids: Vec<String> =
            sqlx::query_scalar("SELECT chunk_id FROM chunks WHERE conversation_id = ?")
                .bind(conversation_id)
                .fetch_all(&mut *tx)
                .await?;

        for table in ["chunks", "messages", "conversations"] {
            sqlx::query(&format!("DELETE FROM {} WHERE conversation_id = ?", table))
                .bind(conversation_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(chunk_ids)
    }

    pub async fn log_run(&self, gate: &WriteGuard<'_>, entry: &RunLogEntry) -> Result<()> {
        let mut conn = gate.connect().await?;
        sqlx::query(
            r#"
            INSERT INTO sync_log
                (operation, started_at, finished_at, status, messages_added, chunks_created,
                 skipped_duplicate, skipped_empty, detail)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&entry.operation)
        .bind(entry.started_at)
        .bind(entry.finished_at)
        .bind(&entry.status)
        .bind(entry.messages_added)
        .bind(entry.chunks_created)
        .bind(entry.skipped_duplicate)
        .bind(entry.skipped_empty)
        .bind(&entry.detail)
        .execute(&mut conn)
        .await?;
        Ok(())
    }
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(",")
}

fn conversation_from_row(row: &SqliteRow) -> Conversation {
    Conversation {
        conversation_id: row.get("conversation_id"),
        name: row.get("name"),
        kind: row.get("kind"),
        included: row.get("included"),
        message_count: row.get("message_count"),
        last_message_at: row.get("last_message_at"),
        last_chunked_at: row.get("last_chunked_at"),
    }
}

fn stored_chunk_from_row(row: &SqliteRow) -> Result<StoredChunk> {
    let participants: String = row.get("participants");
    Ok(StoredChunk {
        chunk: Chunk {
            chunk_id: row.get("chunk_id"),
            conversation_id: row.get("conversation_id"),
            conversation_name: row.get("conversation_name"),
            participants: serde_json::from_str(&participants)?,
            time_start: row.get("time_start"),
            time_end: row.get("time_end"),
            message_count: row.get("message_count"),
            content: row.get("content"),
            content_fingerprint: row.get("content_hash"),
        },
        embedding_version: row.get("embedding_version"),
        embedded_at: row.get("embedded_at"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{chunk_conversation, ChunkPolicy};
    use crate::config::DbConfig;
    use tempfile::TempDir;

    async fn open_store(tmp: &TempDir) -> ChunkStore {
        let db = Database::open(&DbConfig {
            path: tmp.path().join("chatmem.sqlite"),
            connect_retries: 2,
            retry_backoff_ms: 5,
            nolock: false,
        })
        .await
        .unwrap();
        ChunkStore::new(Arc::new(db))
    }

    fn source_msg(id: &str, ts: i64, sender: Option<&str>, text: &str) -> SourceMessage {
        SourceMessage {
            message_id: id.to_string(),
            sender_id: None,
            sender_name: sender.map(str::to_string),
            text: text.to_string(),
            timestamp: ts,
        }
    }

    async fn seed(store: &ChunkStore, conversation_id: &str, messages: &[SourceMessage]) {
        let gate = store.db().lock().await;
        store
            .upsert_conversation(
                &gate,
                &SourceConversation {
                    conversation_id: conversation_id.to_string(),
                    name: format!("Chat {}", conversation_id),
                    kind: "private".to_string(),
                },
            )
            .await
            .unwrap();
        store
            .insert_messages(&gate, conversation_id, messages, "test")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_message_insert_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp).await;
        let msgs = vec![source_msg("1", 0, Some("Alice"), "hi"), source_msg("2", 60, None, "yo")];
        seed(&store, "c1", &msgs).await;

        let gate = store.db().lock().await;
        let again = store.insert_messages(&gate, "c1", &msgs, "test").await.unwrap();
        assert_eq!(again, MessageInsert { inserted: 0, skipped_duplicate: 2 });
        drop(gate);

        let conv = store.conversation("c1").await.unwrap().unwrap();
        assert_eq!(conv.message_count, 2);
        assert_eq!(conv.last_message_at, Some(60));
    }

    #[tokio::test]
    async fn test_missing_sender_reads_as_unknown() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp).await;
        seed(&store, "c1", &[source_msg("1", 0, None, "hello")]).await;
        let msgs = store.unchunked_messages("c1").await.unwrap();
        assert_eq!(msgs[0].sender_name, "Unknown");
    }

    #[tokio::test]
    async fn test_watermark_excludes_chunked_messages() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp).await;
        seed(
            &store,
            "c1",
            &[
                source_msg("1", 0, Some("Alice"), "one"),
                source_msg("2", 60, Some("Bob"), "two"),
            ],
        )
        .await;

        let messages = store.unchunked_messages("c1").await.unwrap();
        assert_eq!(messages.len(), 2);
        let chunks = chunk_conversation(&messages, &ChunkPolicy::new(1500, &[]));

        let gate = store.db().lock().await;
        let outcome = store
            .persist_chunks(&gate, "c1", &chunks, 60, "model-a")
            .await
            .unwrap();
        assert_eq!(outcome.inserted, 1);
        drop(gate);

        assert!(store.unchunked_messages("c1").await.unwrap().is_empty());
        assert!(store.pending_conversations().await.unwrap().is_empty());

        seed(&store, "c1", &[source_msg("3", 14_500, Some("Alice"), "three")]).await;
        let newer = store.unchunked_messages("c1").await.unwrap();
        assert_eq!(newer.len(), 1);
        assert_eq!(newer[0].message_id, "3");
    }

    #[tokio::test]
    async fn test_duplicate_chunks_are_ignored() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp).await;
        seed(&store, "c1", &[source_msg("1", 0, Some("Alice"), "one")]).await;
        let messages = store.unchunked_messages("c1").await.unwrap();
        let chunks = chunk_conversation(&messages, &ChunkPolicy::new(1500, &[]));

        let gate = store.db().lock().await;
        store.persist_chunks(&gate, "c1", &chunks, 0, "m").await.unwrap();
        let again = store.persist_chunks(&gate, "c1", &chunks, 0, "m").await.unwrap();
        assert_eq!(again, ChunkInsert { inserted: 0, duplicates: 1 });
        drop(gate);

        let stored = store.all_chunks().await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].chunk, chunks[0]);
        assert!(stored[0].embedded_at.is_none());
    }

    #[tokio::test]
    async fn test_mark_and_reset_embedded() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp).await;
        seed(&store, "c1", &[source_msg("1", 0, Some("A"), "x"), source_msg("2", 20_000, Some("A"), "y")]).await;
        let messages = store.unchunked_messages("c1").await.unwrap();
        let chunks = chunk_conversation(&messages, &ChunkPolicy::new(1500, &[]));
        assert_eq!(chunks.len(), 2);

        let gate = store.db().lock().await;
        store.persist_chunks(&gate, "c1", &chunks, 20_000, "m1").await.unwrap();
        let updated = store
            .mark_embedded(&gate, &[chunks[0].chunk_id.clone()], "m2", 123)
            .await
            .unwrap();
        assert_eq!(updated, 1);
        drop(gate);

        let counts = store.counts().await.unwrap();
        assert_eq!(counts.chunks, 2);
        assert_eq!(counts.unembedded_chunks, 1);

        let gate = store.db().lock().await;
        store.reset_embedded(&gate).await.unwrap();
        drop(gate);
        assert_eq!(store.counts().await.unwrap().unembedded_chunks, 2);
    }

    #[tokio::test]
    async fn test_clear_chunks_resets_watermarks() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp).await;
        seed(&store, "c1", &[source_msg("1", 0, Some("A"), "x")]).await;
        let chunks = chunk_conversation(
            &store.unchunked_messages("c1").await.unwrap(),
            &ChunkPolicy::new(1500, &[]),
        );

        let gate = store.db().lock().await;
        store.persist_chunks(&gate, "c1", &chunks, 0, "m").await.unwrap();
        assert_eq!(store.clear_chunks(&gate).await.unwrap(), 1);
        drop(gate);

        assert_eq!(store.unchunked_messages("c1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_excluded_conversation_not_pending() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp).await;
        seed(&store, "c1", &[source_msg("1", 0, Some("A"), "x")]).await;
        let gate = store.db().lock().await;
        assert!(store.set_included(&gate, "c1", false).await.unwrap());
        drop(gate);
        assert!(store.pending_conversations().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_conversation_returns_chunk_ids() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp).await;
        seed(&store, "c1", &[source_msg("1", 0, Some("A"), "x")]).await;
        seed(&store, "c2", &[source_msg("1", 0, Some("B"), "y")]).await;
        for conv in ["c1", "c2"] {
            let chunks = chunk_conversation(
                &store.unchunked_messages(conv).await.unwrap(),
                &ChunkPolicy::new(1500, &[]),
            );
            let gate = store.db().lock().await;
            store.persist_chunks(&gate, conv, &chunks, 0, "m").await.unwrap();
        }

        let gate = store.db().lock().await;
        let removed = store.delete_conversation(&gate, "c1").await.unwrap();
        drop(gate);
        assert_eq!(removed.len(), 1);

        let counts = store.counts().await.unwrap();
        assert_eq!(counts.conversations, 1);
        assert_eq!(counts.messages, 1);
        assert_eq!(counts.chunks, 1);
    }

    #[tokio::test]
    async fn test_run_log_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp).await;
        let gate = store.db().lock().await;
        for (i, status) in ["success", "error"].iter().enumerate() {
            store
                .log_run(
                    &gate,
                    &RunLogEntry {
                        operation: "sync".to_string(),
                        started_at: i as i64,
                        finished_at: Some(i as i64 + 1),
                        status: status.to_string(),
                        ..Default::default()
                    },
                )
                .await
                .unwrap();
        }
        drop(gate);

        let runs = store.recent_runs(10).await.unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].status, "error");
    }
}
