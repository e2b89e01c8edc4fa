//! Flat vector index stored in its own SQLite file.
//!
//! Vectors are little-endian `f32` BLOBs; similarity is brute-force cosine
//! over the live collection. The live and shadow collections share one
//! table, so swapping is a single transaction that drops the live rows and
//! relabels the shadow rows.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{ConnectOptions, Row};

use super::{top_k, IndexEntry, IndexTarget, QueryFilter, Result, VectorIndex};
use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::error::IndexError;
use crate::models::{EntryMetadata, SearchHit};

const IN_CLAUSE_LIMIT: usize = 500;

pub struct SqliteIndex {
    pool: SqlitePool,
}

impl SqliteIndex {
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        // Network shares: no WAL, no mmap.
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(60))
            .journal_mode(SqliteJournalMode::Delete)
            .pragma("mmap_size", "0")
            .disable_statement_logging();

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let index = Self { pool };
        index.apply_schema().await?;
        Ok(index)
    }

    async fn apply_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS index_collections (
                name TEXT PRIMARY KEY,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS index_entries (
                collection TEXT NOT NULL,
                chunk_id TEXT NOT NULL,
                embedding BLOB NOT NULL,
                dims INTEGER NOT NULL,
                document TEXT NOT NULL,
                metadata TEXT NOT NULL,
                PRIMARY KEY (collection, chunk_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("INSERT OR IGNORE INTO index_collections (name, created_at) VALUES ('live', ?)")
            .bind(chrono::Utc::now().timestamp())
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn shadow_exists<'e, E>(executor: E) -> Result<bool>
    where
        E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
    {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM index_collections WHERE name = 'shadow'")
            .fetch_one(executor)
            .await?;
        Ok(n > 0)
    }
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(",")
}

fn entry_from_row(row: &SqliteRow) -> Result<IndexEntry> {
    let blob: Vec<u8> = row.get("embedding");
    let metadata: String = row.get("metadata");
    Ok(IndexEntry {
        chunk_id: row.get("chunk_id"),
        vector: blob_to_vec(&blob),
        document: row.get("document"),
        metadata: serde_json::from_str(&metadata)?,
    })
}

#[async_trait]
impl VectorIndex for SqliteIndex {
    async fn upsert(&self, target: IndexTarget, entries: &[IndexEntry]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        if target == IndexTarget::Shadow && !Self::shadow_exists(&mut *tx).await? {
            return Err(IndexError::NoShadow);
        }

        for entry in entries {
            sqlx::query(
                r#"
                INSERT INTO index_entries (collection, chunk_id, embedding, dims, document, metadata)
                VALUES (?, ?, ?, ?, ?, ?)
                ON CONFLICT(collection, chunk_id) DO UPDATE SET
                    embedding = excluded.embedding,
                    dims = excluded.dims,
                    document = excluded.document,
                    metadata = excluded.metadata
                "#,
            )
            .bind(target.as_str())
            .bind(&entry.chunk_id)
            .bind(vec_to_blob(&entry.vector))
            .bind(entry.vector.len() as i64)
            .bind(&entry.document)
            .bind(serde_json::to_string(&entry.metadata)?)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn metadata(&self, target: IndexTarget) -> Result<HashMap<String, EntryMetadata>> {
        let rows = sqlx::query("SELECT chunk_id, metadata FROM index_entries WHERE collection = ?")
            .bind(target.as_str())
            .fetch_all(&self.pool)
            .await?;

        let mut map = HashMap::with_capacity(rows.len());
        for row in rows {
            let metadata: String = row.get("metadata");
            map.insert(row.get("chunk_id"), serde_json::from_str(&metadata)?);
        }
        Ok(map)
    }

    async fn get(&self, target: IndexTarget, ids: &[String]) -> Result<Vec<IndexEntry>> {
        let mut entries = Vec::with_capacity(ids.len());
        for batch in ids.chunks(IN_CLAUSE_LIMIT) {
            let sql = format!(
                "SELECT chunk_id, embedding, document, metadata FROM index_entries \
                 WHERE collection = ? AND chunk_id IN ({})",
                placeholders(batch.len())
            );
            let mut query = sqlx::query(&sql).bind(target.as_str());
            for id in batch {
                query = query.bind(id);
            }
            for row in query.fetch_all(&self.pool).await? {
                entries.push(entry_from_row(&row)?);
            }
        }
        Ok(entries)
    }

    async fn delete(&self, ids: &[String]) -> Result<usize> {
        let mut removed = 0;
        let mut tx = self.pool.begin().await?;
        for batch in ids.chunks(IN_CLAUSE_LIMIT) {
            let sql = format!(
                "DELETE FROM index_entries WHERE collection = 'live' AND chunk_id IN ({})",
                placeholders(batch.len())
            );
            let mut query = sqlx::query(&sql);
            for id in batch {
                query = query.bind(id);
            }
            removed += query.execute(&mut *tx).await?.rows_affected() as usize;
        }
        tx.commit().await?;
        Ok(removed)
    }

    async fn create_shadow(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM index_entries WHERE collection = 'shadow'")
            .execute(&mut *tx)
            .await?;
        sqlx::query("INSERT OR REPLACE INTO index_collections (name, created_at) VALUES ('shadow', ?)")
            .bind(chrono::Utc::now().timestamp())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn swap(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        if !Self::shadow_exists(&mut *tx).await? {
            return Err(IndexError::NoShadow);
        }

        sqlx::query("DELETE FROM index_entries WHERE collection = 'live'")
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE index_entries SET collection = 'live' WHERE collection = 'shadow'")
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM index_collections WHERE name = 'shadow'")
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn discard_shadow(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM index_entries WHERE collection = 'shadow'")
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM index_collections WHERE name = 'shadow'")
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn has_shadow(&self) -> Result<bool> {
        Self::shadow_exists(&self.pool).await
    }

    async fn wipe(&self) -> Result<()> {
        sqlx::query("DELETE FROM index_entries WHERE collection = 'live'")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn count(&self, target: IndexTarget) -> Result<usize> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM index_entries WHERE collection = ?")
            .bind(target.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(n as usize)
    }

    async fn query(&self, vector: &[f32], k: usize, filter: &QueryFilter) -> Result<Vec<SearchHit>> {
        let rows = match &filter.conversation_id {
            Some(conversation_id) => {
                sqlx::query(
                    "SELECT chunk_id, embedding, document, metadata FROM index_entries \
                     WHERE collection = 'live' AND json_extract(metadata, '$.conversation_id') = ?",
                )
                .bind(conversation_id)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT chunk_id, embedding, document, metadata FROM index_entries \
                     WHERE collection = 'live'",
                )
                .fetch_all(&self.pool)
                .await?
            }
        };

        let mut hits = Vec::with_capacity(rows.len());
        for row in &rows {
            let entry = entry_from_row(row)?;
            hits.push(SearchHit {
                score: cosine_similarity(vector, &entry.vector),
                chunk_id: entry.chunk_id,
                document: entry.document,
                metadata: entry.metadata,
            });
        }
        Ok(top_k(hits, k))
    }
}
