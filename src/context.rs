//! Process-wide context.
//!
//! Owns the configuration, the relational store, the vector index, and the
//! embedding client. The client is created on first use and dropped by
//! [`AppContext::reset_embedder`], so the next use picks up a changed config.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::Mutex;

use crate::chunk::ChunkPolicy;
use crate::chunk_store::ChunkStore;
use crate::config::Config;
use crate::db::Database;
use crate::embedding::{create_embedder, Embedder};
use crate::vector_index::{SqliteIndex, TimedIndex, VectorIndex};

pub struct AppContext {
    config: Config,
    store: ChunkStore,
    index: Arc<dyn VectorIndex>,
    embedder: Mutex<Option<Arc<dyn Embedder>>>,
}

impl AppContext {
    /// Open the database and the on-disk vector index named by `config`.
    pub async fn open(config: Config) -> Result<Self> {
        let db = Database::open(&config.db).await?;
        let index = SqliteIndex::open(&config.index.path).await?;
        let index: Arc<dyn VectorIndex> = Arc::new(TimedIndex::new(
            Arc::new(index),
            Duration::from_secs(config.index.timeout_secs),
        ));
        Ok(Self::with_parts(config, Arc::new(db), index, None))
    }

    /// Assemble a context from existing parts. A `None` embedder is created
    /// from the config on first use.
    pub fn with_parts(
        config: Config,
        db: Arc<Database>,
        index: Arc<dyn VectorIndex>,
        embedder: Option<Arc<dyn Embedder>>,
    ) -> Self {
        Self {
            config,
            store: ChunkStore::new(db),
            index,
            embedder: Mutex::new(embedder),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &ChunkStore {
        &self.store
    }

    pub fn index(&self) -> &dyn VectorIndex {
        self.index.as_ref()
    }

    pub fn chunk_policy(&self) -> ChunkPolicy {
        ChunkPolicy::from_config(&self.config.chunking)
    }

    /// The embedding client, created on first call.
    pub async fn embedder(&self) -> Result<Arc<dyn Embedder>> {
        let mut slot = self.embedder.lock().await;
        if let Some(embedder) = slot.as_ref() {
            return Ok(embedder.clone());
        }
        let embedder = create_embedder(&self.config.embedding)?;
        tracing::debug!(model = embedder.model_name(), "embedding client created");
        *slot = Some(embedder.clone());
        Ok(embedder)
    }

    /// Drop the cached embedding client.
    pub async fn reset_embedder(&self) {
        self.embedder.lock().await.take();
    }

    /// Embedding version recorded on newly persisted chunks.
    pub fn embedding_version(&self) -> &str {
        self.config.embedding.version()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_embedder_is_cached_until_reset() {
        let tmp = TempDir::new().unwrap();
        let ctx = AppContext::open(Config::in_dir(tmp.path())).await.unwrap();

        let first = ctx.embedder().await.unwrap();
        let second = ctx.embedder().await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.model_name(), "disabled");

        ctx.reset_embedder().await;
        let third = ctx.embedder().await.unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
    }
}
