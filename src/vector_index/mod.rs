//! Vector index contract and engines.
//!
//! An index holds one entry per chunk: the embedding, the rendered document,
//! and an [`EntryMetadata`] mirror. Besides the live collection an index can
//! hold one shadow collection, which a full rebuild fills before swapping it
//! in atomically.
//!
//! Engines:
//! - [`SqliteIndex`]: persistent flat index in its own SQLite file.
//! - [`MemoryIndex`]: in-process index.
//!
//! [`TimedIndex`] wraps any engine so that every call is bounded: a read that
//! times out yields an empty result, a write that times out is an error.

mod memory;
mod sqlite;

pub use memory::MemoryIndex;
pub use sqlite::SqliteIndex;

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use crate::error::IndexError;
use crate::models::{EntryMetadata, SearchHit};

pub type Result<T, E = IndexError> = std::result::Result<T, E>;

/// Which collection an operation addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexTarget {
    Live,
    Shadow,
}

impl IndexTarget {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexTarget::Live => "live",
            IndexTarget::Shadow => "shadow",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub chunk_id: String,
    pub vector: Vec<f32>,
    pub document: String,
    pub metadata: EntryMetadata,
}

/// Restricts a similarity query.
#[derive(Debug, Clone, Default)]
pub struct QueryFilter {
    pub conversation_id: Option<String>,
}

impl QueryFilter {
    pub fn matches(&self, metadata: &EntryMetadata) -> bool {
        self.conversation_id
            .as_deref()
            .map_or(true, |id| metadata.conversation_id == id)
    }
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert or replace entries keyed by `chunk_id`. Writing to the shadow
    /// requires a prior [`VectorIndex::create_shadow`].
    async fn upsert(&self, target: IndexTarget, entries: &[IndexEntry]) -> Result<()>;

    /// `chunk_id -> metadata` for every entry in the collection.
    async fn metadata(&self, target: IndexTarget) -> Result<HashMap<String, EntryMetadata>>;

    /// Entries for the given ids; unknown ids are skipped.
    async fn get(&self, target: IndexTarget, ids: &[String]) -> Result<Vec<IndexEntry>>;

    /// Delete live entries. Returns the number removed.
    async fn delete(&self, ids: &[String]) -> Result<usize>;

    /// Create an empty shadow collection, discarding any leftover one.
    async fn create_shadow(&self) -> Result<()>;

    /// Replace the live collection with the shadow in one step.
    async fn swap(&self) -> Result<()>;

    async fn discard_shadow(&self) -> Result<()>;

    async fn has_shadow(&self) -> Result<bool>;

    /// Remove every live entry.
    async fn wipe(&self) -> Result<()>;

    async fn count(&self, target: IndexTarget) -> Result<usize>;

    /// The `k` live entries most similar to `vector`, best first.
    async fn query(&self, vector: &[f32], k: usize, filter: &QueryFilter) -> Result<Vec<SearchHit>>;
}

/// Run an index operation under a time limit.
pub async fn with_timeout<T, F>(limit: Duration, op: &'static str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => {
            warn!(op, secs = limit.as_secs(), "vector index operation timed out");
            Err(IndexError::Timeout {
                op,
                secs: limit.as_secs(),
            })
        }
    }
}

/// Like [`with_timeout`], but a timeout yields `T::default()`.
async fn read_with_timeout<T, F>(limit: Duration, op: &'static str, fut: F) -> Result<T>
where
    T: Default,
    F: Future<Output = Result<T>>,
{
    match with_timeout(limit, op, fut).await {
        Err(IndexError::Timeout { .. }) => Ok(T::default()),
        other => other,
    }
}

/// Bounds every call to an inner index.
pub struct TimedIndex {
    inner: Arc<dyn VectorIndex>,
    limit: Duration,
}

impl TimedIndex {
    pub fn new(inner: Arc<dyn VectorIndex>, limit: Duration) -> Self {
        Self { inner, limit }
    }
}

#[async_trait]
impl VectorIndex for TimedIndex {
    async fn upsert(&self, target: IndexTarget, entries: &[IndexEntry]) -> Result<()> {
        with_timeout(self.limit, "upsert", self.inner.upsert(target, entries)).await
    }

    async fn metadata(&self, target: IndexTarget) -> Result<HashMap<String, EntryMetadata>> {
        read_with_timeout(self.limit, "metadata", self.inner.metadata(target)).await
    }

    async fn get(&self, target: IndexTarget, ids: &[String]) -> Result<Vec<IndexEntry>> {
        read_with_timeout(self.limit, "get", self.inner.get(target, ids)).await
    }

    async fn delete(&self, ids: &[String]) -> Result<usize> {
        with_timeout(self.limit, "delete", self.inner.delete(ids)).await
    }

    async fn create_shadow(&self) -> Result<()> {
        with_timeout(self.limit, "create_shadow", self.inner.create_shadow()).await
    }

    async fn swap(&self) -> Result<()> {
        with_timeout(self.limit, "swap", self.inner.swap()).await
    }

    async fn discard_shadow(&self) -> Result<()> {
        with_timeout(self.limit, "discard_shadow", self.inner.discard_shadow()).await
    }

    async fn has_shadow(&self) -> Result<bool> {
        read_with_timeout(self.limit, "has_shadow", self.inner.has_shadow()).await
    }

    async fn wipe(&self) -> Result<()> {
        with_timeout(self.limit, "wipe", self.inner.wipe()).await
    }

    async fn count(&self, target: IndexTarget) -> Result<usize> {
        read_with_timeout(self.limit, "count", self.inner.count(target)).await
    }

    async fn query(&self, vector: &[f32], k: usize, filter: &QueryFilter) -> Result<Vec<SearchHit>> {
        read_with_timeout(self.limit, "query", self.inner.query(vector, k, filter)).await
    }
}

/// Sort hits best first and keep the top `k`.
fn top_k(mut hits: Vec<SearchHit>, k: usize) -> Vec<SearchHit> {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
    hits.truncate(k);
    hits
}
