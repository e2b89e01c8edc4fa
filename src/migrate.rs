use anyhow::Result;
use sqlx::SqliteConnection;

use crate::config::Config;
use crate::db::Database;

/// Create the database (if needed) and apply the schema.
pub async fn run_migrations(config: &Config) -> Result<()> {
    Database::open(&config.db).await?;
    Ok(())
}

/// Create all tables and indexes. Idempotent.
pub async fn apply_schema(conn: &mut SqliteConnection) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS conversations (
            conversation_id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            kind TEXT NOT NULL DEFAULT 'private',
            included INTEGER NOT NULL DEFAULT 1,
            message_count INTEGER NOT NULL DEFAULT 0,
            last_message_at INTEGER,
            last_chunked_at INTEGER,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(&mut *conn)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS messages (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            message_id TEXT NOT NULL,
            conversation_id TEXT NOT NULL,
            sender_id TEXT,
            sender_name TEXT,
            text TEXT NOT NULL,
            timestamp INTEGER NOT NULL,
            source TEXT NOT NULL,
            imported_at INTEGER NOT NULL,
            UNIQUE(message_id, conversation_id)
        )
        "#,
    )
    .execute(&mut *conn)
    .await?;

    // Both identity columns are unique: a chunk whose content fingerprint is
    // already present is ignored on insert.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            chunk_id TEXT NOT NULL UNIQUE,
            conversation_id TEXT NOT NULL,
            conversation_name TEXT NOT NULL,
            participants TEXT NOT NULL DEFAULT '[]',
            time_start INTEGER NOT NULL,
            time_end INTEGER NOT NULL,
            message_count INTEGER NOT NULL,
            content TEXT NOT NULL,
            content_hash TEXT NOT NULL UNIQUE,
            embedding_version TEXT NOT NULL,
            embedded_at INTEGER
        )
        "#,
    )
    .execute(&mut *conn)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sync_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            operation TEXT NOT NULL,
            started_at INTEGER NOT NULL,
            finished_at INTEGER,
            status TEXT NOT NULL,
            messages_added INTEGER NOT NULL DEFAULT 0,
            chunks_created INTEGER NOT NULL DEFAULT 0,
            skipped_duplicate INTEGER NOT NULL DEFAULT 0,
            skipped_empty INTEGER NOT NULL DEFAULT 0,
            detail TEXT
        )
        "#,
    )
    .execute(&mut *conn)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_messages_conversation_ts ON messages(conversation_id, timestamp)")
        .execute(&mut *conn)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_conversation_id ON chunks(conversation_id)")
        .execute(&mut *conn)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_embedded_at ON chunks(embedded_at)")
        .execute(&mut *conn)
        .await?;

    Ok(())
}
