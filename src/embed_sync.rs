//! Incremental embedding sync.
//!
//! Reconciles the chunk store with the live vector index by chunk identity
//! and content fingerprint:
//!
//! ```text
//! new     = store − index
//! changed = store ∩ index, fingerprint differs
//! stale   = index − store          (reported only, see prune_stale)
//! ```
//!
//! `new ∪ changed` is embedded in batches. Embedding runs outside the write
//! gate; the index upsert and the `embedded_at` update for a batch run under
//! it. A failed batch is counted and the run continues.
//!
//! If any live entry carries a different embedding version than the current
//! model, the live index is wiped and every chunk is treated as new.

use std::collections::HashMap;

use tracing::{debug, info, warn};

use crate::chunk_store::ChunkStore;
use crate::embedding::Embedder;
use crate::error::SyncError;
use crate::models::{EntryMetadata, StoredChunk, SyncSummary};
use crate::progress::{ProgressEvent, ProgressReporter};
use crate::vector_index::{IndexEntry, IndexTarget, VectorIndex};

/// Fail with no side effects unless the backend is up and serves the model.
pub async fn preflight(embedder: &dyn Embedder) -> Result<(), SyncError> {
    if !embedder.is_enabled() {
        return Err(SyncError::Disabled);
    }
    let model = embedder.model_name();
    if !embedder.is_reachable().await {
        return Err(SyncError::BackendUnreachable(model.to_string()));
    }
    if !embedder.model_available(model).await {
        return Err(SyncError::ModelUnavailable(model.to_string()));
    }
    Ok(())
}

/// Run one incremental sync. Always reports exactly one terminal event.
pub async fn sync_embeddings(
    store: &ChunkStore,
    index: &dyn VectorIndex,
    embedder: &dyn Embedder,
    batch_size: usize,
    reporter: &dyn ProgressReporter,
) -> Result<SyncSummary, SyncError> {
    match run_sync(store, index, embedder, batch_size, reporter).await {
        Ok(summary) => {
            info!(
                embedded = summary.embedded,
                skipped = summary.skipped,
                stale = summary.deleted,
                errors = summary.errors,
                wiped = summary.wiped,
                "embedding sync finished"
            );
            reporter.report(ProgressEvent::Finished {
                operation: "sync",
                summary: summary.clone(),
            });
            Ok(summary)
        }
        Err(e) => {
            warn!(error = %e, "embedding sync failed");
            reporter.report(ProgressEvent::Failed {
                operation: "sync",
                error: e.to_string(),
            });
            Err(e)
        }
    }
}

async fn run_sync(
    store: &ChunkStore,
    index: &dyn VectorIndex,
    embedder: &dyn Embedder,
    batch_size: usize,
    reporter: &dyn ProgressReporter,
) -> Result<SyncSummary, SyncError> {
    preflight(embedder).await?;

    let version = embedder.model_name().to_string();
    let mut summary = SyncSummary::default();

    let mut indexed = index.metadata(IndexTarget::Live).await?;
    if indexed.values().any(|m| m.embedding_version != version) {
        info!(
            entries = indexed.len(),
            version = %version,
            "embedding version changed, rebuilding index"
        );
        let gate = store.db().lock().await;
        index.wipe().await?;
        store.reset_embedded(&gate).await?;
        drop(gate);
        indexed.clear();
        summary.wiped = true;
    }

    let chunks = store.all_chunks().await?;
    let plan = plan_sync(&chunks, &indexed);
    summary.skipped = plan.skipped;
    summary.deleted = plan.stale.len();

    if !plan.stale.is_empty() {
        debug!(count = plan.stale.len(), "stale index entries left in place");
    }

    // Present in the index but never marked (interrupted between upsert and mark).
    if !plan.unmarked.is_empty() {
        let gate = store.db().lock().await;
        store
            .mark_embedded(&gate, &plan.unmarked, &version, chrono::Utc::now().timestamp())
            .await?;
    }

    let total = plan.to_embed.len() as u64;
    if total == 0 {
        return Ok(summary);
    }

    info!(count = total, batch_size, "embedding chunks");

    let mut processed = 0u64;
    for (batch_no, batch) in plan.to_embed.chunks(batch_size.max(1)).enumerate() {
        match embed_batch(store, index, embedder, IndexTarget::Live, batch, &version).await {
            Ok(()) => summary.embedded += batch.len(),
            Err(e) => {
                warn!(batch = batch_no, size = batch.len(), error = %e, "embedding batch failed");
                summary.errors += batch.len();
                summary.last_error = Some(e);
            }
        }
        processed += batch.len() as u64;
        reporter.report(ProgressEvent::Embedding { n: processed, total });
    }

    Ok(summary)
}

/// Embed one batch and write it to `target`.
///
/// For the live index the rows are marked embedded under the write gate right
/// after the upsert. The shadow path leaves marking to the caller.
pub(crate) async fn embed_batch(
    store: &ChunkStore,
    index: &dyn VectorIndex,
    embedder: &dyn Embedder,
    target: IndexTarget,
    batch: &[&StoredChunk],
    version: &str,
) -> Result<(), String> {
    let texts: Vec<String> = batch.iter().map(|c| c.chunk.content.clone()).collect();
    let vectors = embedder.embed(&texts).await.map_err(|e| e.to_string())?;
    if vectors.len() != batch.len() {
        return Err(format!(
            "embedding backend returned {} vectors for {} texts",
            vectors.len(),
            batch.len()
        ));
    }

    let entries: Vec<IndexEntry> = batch
        .iter()
        .zip(vectors)
        .map(|(stored, vector)| IndexEntry {
            chunk_id: stored.chunk.chunk_id.clone(),
            vector,
            document: stored.chunk.content.clone(),
            metadata: EntryMetadata::for_chunk(&stored.chunk, version),
        })
        .collect();

    let gate = store.db().lock().await;
    index
        .upsert(target, &entries)
        .await
        .map_err(|e| e.to_string())?;

    if target == IndexTarget::Live {
        let ids: Vec<String> = entries.into_iter().map(|e| e.chunk_id).collect();
        store
            .mark_embedded(&gate, &ids, version, chrono::Utc::now().timestamp())
            .await
            .map_err(|e| e.to_string())?;
    }
    Ok(())
}

/// Delete live index entries whose chunk no longer exists in the store.
pub async fn prune_stale(store: &ChunkStore, index: &dyn VectorIndex) -> Result<usize, SyncError> {
    let known = store.chunk_fingerprints().await?;
    let stale: Vec<String> = index
        .metadata(IndexTarget::Live)
        .await?
        .into_keys()
        .filter(|id| !known.contains_key(id))
        .collect();

    if stale.is_empty() {
        return Ok(0);
    }

    let _gate = store.db().lock().await;
    let removed = index.delete(&stale).await?;
    info!(removed, "pruned stale index entries");
    Ok(removed)
}

struct SyncPlan<'a> {
    to_embed: Vec<&'a StoredChunk>,
    unmarked: Vec<String>,
    skipped: usize,
    stale: Vec<String>,
}

fn plan_sync<'a>(chunks: &'a [StoredChunk], indexed: &HashMap<String, EntryMetadata>) -> SyncPlan<'a> {
    let mut plan = SyncPlan {
        to_embed: Vec::new(),
        unmarked: Vec::new(),
        skipped: 0,
        stale: Vec::new(),
    };

    for stored in chunks {
        match indexed.get(&stored.chunk.chunk_id) {
            Some(meta) if meta.content_fingerprint == stored.chunk.content_fingerprint => {
                plan.skipped += 1;
                if stored.embedded_at.is_none() {
                    plan.unmarked.push(stored.chunk.chunk_id.clone());
                }
            }
            _ => plan.to_embed.push(stored),
        }
    }

    let known: std::collections::HashSet<&str> =
        chunks.iter().map(|c| c.chunk.chunk_id.as_str()).collect();
    plan.stale = indexed
        .keys()
        .filter(|id| !known.contains(id.as_str()))
        .cloned()
        .collect();
    plan.stale.sort();

    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::DisabledEmbedder;
    use crate::models::Chunk;
    use async_trait::async_trait;

    struct UpEmbedder(&'static str);

    #[async_trait]
    impl Embedder for UpEmbedder {
        fn model_name(&self) -> &str {
            self.0
        }

        async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![1.0]).collect())
        }

        async fn is_reachable(&self) -> bool {
            true
        }

        async fn model_available(&self, _model: &str) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn test_preflight_uses_provider_not_model_name() {
        assert!(preflight(&UpEmbedder("disabled")).await.is_ok());
        assert!(matches!(
            preflight(&DisabledEmbedder).await,
            Err(SyncError::Disabled)
        ));
    }

    fn stored(id: &str, fp: &str, embedded: bool) -> StoredChunk {
        StoredChunk {
            chunk: Chunk {
                chunk_id: id.to_string(),
                conversation_id: "c1".to_string(),
                conversation_name: "Chat".to_string(),
                participants: vec![],
                time_start: 0,
                time_end: 0,
                message_count: 1,
                content: format!("content {}", id),
                content_fingerprint: fp.to_string(),
            },
            embedding_version: "m".to_string(),
            embedded_at: embedded.then_some(1),
        }
    }

    fn meta(fp: &str) -> EntryMetadata {
        EntryMetadata {
            conversation_id: "c1".to_string(),
            conversation_name: "Chat".to_string(),
            participants: vec![],
            content_fingerprint: fp.to_string(),
            embedding_version: "m".to_string(),
            time_start: 0,
            time_end: 0,
            message_count: 1,
        }
    }

    #[test]
    fn test_plan_classifies_new_changed_stale() {
        let chunks = vec![
            stored("same", "f1", true),
            stored("changed", "f2-new", true),
            stored("new", "f3", false),
            stored("unmarked", "f4", false),
        ];
        let indexed: HashMap<String, EntryMetadata> = [
            ("same".to_string(), meta("f1")),
            ("changed".to_string(), meta("f2-old")),
            ("unmarked".to_string(), meta("f4")),
            ("gone".to_string(), meta("f9")),
        ]
        .into_iter()
        .collect();

        let plan = plan_sync(&chunks, &indexed);
        let to_embed: Vec<_> = plan.to_embed.iter().map(|c| c.chunk.chunk_id.as_str()).collect();
        assert_eq!(to_embed, vec!["changed", "new"]);
        assert_eq!(plan.skipped, 2);
        assert_eq!(plan.unmarked, vec!["unmarked"]);
        assert_eq!(plan.stale, vec!["gone"]);
    }

    #[test]
    fn test_plan_empty_index_embeds_everything() {
        let chunks = vec![stored("a", "f1", false), stored("b", "f2", false)];
        let plan = plan_sync(&chunks, &HashMap::new());
        assert_eq!(plan.to_embed.len(), 2);
        assert_eq!(plan.skipped, 0);
        assert!(plan.stale.is_empty());
    }
}
