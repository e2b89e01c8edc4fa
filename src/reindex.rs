//! Rollback-safe full reindex.
//!
//! Every chunk is embedded into a shadow collection. Only when all batches
//! succeed is the shadow swapped in and the chunk rows marked embedded; any
//! failure discards the shadow and leaves the live index as it was. Readers
//! therefore always see either the old complete index or the new one.

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::chunk::ChunkPolicy;
use crate::chunk_store::ChunkStore;
use crate::embed_sync::{embed_batch, preflight};
use crate::embedding::Embedder;
use crate::error::SyncError;
use crate::ingest::chunk_pending;
use crate::models::{StoredChunk, SyncSummary};
use crate::progress::{NoProgress, ProgressEvent, ProgressReporter};
use crate::vector_index::{IndexTarget, VectorIndex};

pub struct ReindexOptions<'a> {
    pub batch_size: usize,
    /// Drop all chunks and re-chunk every conversation with this policy
    /// before rebuilding.
    pub rechunk: Option<&'a ChunkPolicy>,
}

/// Rebuild the live index from the chunk store. Always reports exactly one
/// terminal event.
pub async fn reindex_all(
    store: &ChunkStore,
    index: &dyn VectorIndex,
    embedder: &dyn Embedder,
    options: &ReindexOptions<'_>,
    reporter: &dyn ProgressReporter,
) -> Result<SyncSummary, SyncError> {
    match run_reindex(store, index, embedder, options, reporter).await {
        Ok(summary) => {
            info!(embedded = summary.embedded, "reindex finished");
            reporter.report(ProgressEvent::Finished {
                operation: "reindex",
                summary: summary.clone(),
            });
            Ok(summary)
        }
        Err(e) => {
            error!(error = %e, "reindex failed");
            reporter.report(ProgressEvent::Failed {
                operation: "reindex",
                error: e.to_string(),
            });
            Err(e)
        }
    }
}

async fn run_reindex(
    store: &ChunkStore,
    index: &dyn VectorIndex,
    embedder: &dyn Embedder,
    options: &ReindexOptions<'_>,
    reporter: &dyn ProgressReporter,
) -> Result<SyncSummary, SyncError> {
    preflight(embedder).await?;
    let version = embedder.model_name().to_string();

    if let Some(policy) = options.rechunk {
        let gate = store.db().lock().await;
        let cleared = store.clear_chunks(&gate).await?;
        drop(gate);
        info!(cleared, "cleared chunks for re-chunking");
        chunk_pending(store, policy, &version, &CancellationToken::new(), &NoProgress).await?;
    }

    index.create_shadow().await?;

    let chunks = store.all_chunks().await?;
    let refs: Vec<&StoredChunk> = chunks.iter().collect();
    let total = refs.len() as u64;
    info!(count = total, batch_size = options.batch_size, "building shadow index");

    let mut processed = 0u64;
    for (batch_no, batch) in refs.chunks(options.batch_size.max(1)).enumerate() {
        if let Err(message) =
            embed_batch(store, index, embedder, IndexTarget::Shadow, batch, &version).await
        {
            discard(index).await;
            return Err(SyncError::ReindexFailed {
                batch: batch_no + 1,
                message,
            });
        }
        processed += batch.len() as u64;
        reporter.report(ProgressEvent::Reindexing { n: processed, total });
    }

    let ids: Vec<String> = chunks.iter().map(|c| c.chunk.chunk_id.clone()).collect();
    let gate = store.db().lock().await;
    if let Err(e) = index.swap().await {
        drop(gate);
        discard(index).await;
        return Err(e.into());
    }
    store
        .mark_embedded(&gate, &ids, &version, chrono::Utc::now().timestamp())
        .await?;

    Ok(SyncSummary {
        embedded: ids.len(),
        ..Default::default()
    })
}

async fn discard(index: &dyn VectorIndex) {
    if let Err(e) = index.discard_shadow().await {
        warn!(error = %e, "failed to discard shadow index");
    }
}
