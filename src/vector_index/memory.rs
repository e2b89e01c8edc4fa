use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{top_k, IndexEntry, IndexTarget, QueryFilter, Result, VectorIndex};
use crate::embedding::cosine_similarity;
use crate::error::IndexError;
use crate::models::{EntryMetadata, SearchHit};

#[derive(Default)]
struct Collections {
    live: HashMap<String, IndexEntry>,
    shadow: Option<HashMap<String, IndexEntry>>,
}

impl Collections {
    fn target(&self, target: IndexTarget) -> Option<&HashMap<String, IndexEntry>> {
        match target {
            IndexTarget::Live => Some(&self.live),
            IndexTarget::Shadow => self.shadow.as_ref(),
        }
    }
}

/// In-process vector index. Contents are lost when dropped.
#[derive(Default)]
pub struct MemoryIndex {
    state: RwLock<Collections>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorIndex for MemoryIndex {
    async fn upsert(&self, target: IndexTarget, entries: &[IndexEntry]) -> Result<()> {
        let mut state = self.state.write().await;
        let collection = match target {
            IndexTarget::Live => &mut state.live,
            IndexTarget::Shadow => state.shadow.as_mut().ok_or(IndexError::NoShadow)?,
        };
        for entry in entries {
            collection.insert(entry.chunk_id.clone(), entry.clone());
        }
        Ok(())
    }

    async fn metadata(&self, target: IndexTarget) -> Result<HashMap<String, EntryMetadata>> {
        let state = self.state.read().await;
        Ok(state
            .target(target)
            .map(|c| {
                c.iter()
                    .map(|(id, e)| (id.clone(), e.metadata.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get(&self, target: IndexTarget, ids: &[String]) -> Result<Vec<IndexEntry>> {
        let state = self.state.read().await;
        let Some(collection) = state.target(target) else {
            return Ok(Vec::new());
        };
        Ok(ids.iter().filter_map(|id| collection.get(id).cloned()).collect())
    }

    async fn delete(&self, ids: &[String]) -> Result<usize> {
        let mut state = self.state.write().await;
        Ok(ids.iter().filter(|id| state.live.remove(*id).is_some()).count())
    }

    async fn create_shadow(&self) -> Result<()> {
        self.state.write().await.shadow = Some(HashMap::new());
        Ok(())
    }

    async fn swap(&self) -> Result<()> {
        let mut state = self.state.write().await;
        let shadow = state.shadow.take().ok_or(IndexError::NoShadow)?;
        state.live = shadow;
        Ok(())
    }

    async fn discard_shadow(&self) -> Result<()> {
        self.state.write().await.shadow = None;
        Ok(())
    }

    async fn has_shadow(&self) -> Result<bool> {
        Ok(self.state.read().await.shadow.is_some())
    }

    async fn wipe(&self) -> Result<()> {
        self.state.write().await.live.clear();
        Ok(())
    }

    async fn count(&self, target: IndexTarget) -> Result<usize> {
        let state = self.state.read().await;
        Ok(state.target(target).map_or(0, HashMap::len))
    }

    async fn query(&self, vector: &[f32], k: usize, filter: &QueryFilter) -> Result<Vec<SearchHit>> {
        let state = self.state.read().await;
        let hits = state
            .live
            .values()
            .filter(|e| filter.matches(&e.metadata))
            .map(|e| SearchHit {
                chunk_id: e.chunk_id.clone(),
                score: cosine_similarity(vector, &e.vector),
                document: e.document.clone(),
                metadata: e.metadata.clone(),
            })
            .collect();
        Ok(top_k(hits, k))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, conversation: &str, vector: Vec<f32>) -> IndexEntry {
        IndexEntry {
            chunk_id: id.to_string(),
            vector,
            document: format!("doc {}", id),
            metadata: EntryMetadata {
                conversation_id: conversation.to_string(),
                conversation_name: conversation.to_string(),
                participants: vec!["Alice".to_string()],
                content_fingerprint: format!("fp-{}", id),
                embedding_version: "m".to_string(),
                time_start: 0,
                time_end: 0,
                message_count: 1,
            },
        }
    }

    #[tokio::test]
    async fn test_shadow_swap_replaces_live() {
        let index = MemoryIndex::new();
        index
            .upsert(IndexTarget::Live, &[entry("old", "c1", vec![1.0, 0.0])])
            .await
            .unwrap();

        assert!(matches!(
            index.upsert(IndexTarget::Shadow, &[entry("x", "c1", vec![1.0])]).await,
            Err(IndexError::NoShadow)
        ));

        index.create_shadow().await.unwrap();
        index
            .upsert(IndexTarget::Shadow, &[entry("new", "c1", vec![0.0, 1.0])])
            .await
            .unwrap();
        assert_eq!(index.count(IndexTarget::Live).await.unwrap(), 1);
        assert!(index.metadata(IndexTarget::Live).await.unwrap().contains_key("old"));

        index.swap().await.unwrap();
        let live = index.metadata(IndexTarget::Live).await.unwrap();
        assert!(live.contains_key("new"));
        assert!(!live.contains_key("old"));
        assert!(!index.has_shadow().await.unwrap());
    }

    #[tokio::test]
    async fn test_discard_leaves_live_untouched() {
        let index = MemoryIndex::new();
        index
            .upsert(IndexTarget::Live, &[entry("a", "c1", vec![1.0])])
            .await
            .unwrap();
        index.create_shadow().await.unwrap();
        index.discard_shadow().await.unwrap();
        assert!(index.swap().await.is_err());
        assert_eq!(index.count(IndexTarget::Live).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_query_ranks_and_filters() {
        let index = MemoryIndex::new();
        index
            .upsert(
                IndexTarget::Live,
                &[
                    entry("a", "c1", vec![1.0, 0.0]),
                    entry("b", "c1", vec![0.7, 0.7]),
                    entry("c", "c2", vec![0.9, 0.1]),
                ],
            )
            .await
            .unwrap();

        let hits = index.query(&[1.0, 0.0], 2, &QueryFilter::default()).await.unwrap();
        let ids: Vec<_> = hits.iter().map(|h| h.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);

        let filter = QueryFilter {
            conversation_id: Some("c1".to_string()),
        };
        let hits = index.query(&[1.0, 0.0], 5, &filter).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|h| h.metadata.conversation_id == "c1"));
    }

    #[tokio::test]
    async fn test_delete_and_wipe() {
        let index = MemoryIndex::new();
        index
            .upsert(
                IndexTarget::Live,
                &[entry("a", "c1", vec![1.0]), entry("b", "c1", vec![1.0])],
            )
            .await
            .unwrap();
        let removed = index
            .delete(&["a".to_string(), "missing".to_string()])
            .await
            .unwrap();
        assert_eq!(removed, 1);
        index.wipe().await.unwrap();
        assert_eq!(index.count(IndexTarget::Live).await.unwrap(), 0);
    }
}
