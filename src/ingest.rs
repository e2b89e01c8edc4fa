//! Ingestion pipeline orchestration.
//!
//! Coordinates the full flow: chat source → message store → chunking →
//! embedding sync. Long runs check a shared [`CancellationToken`] between
//! conversations; work for conversations already finished stays committed.
//! Every pipeline, sync, and reindex run is recorded in `sync_log`.

use anyhow::Result;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::chunk::{chunk_conversation, ChunkPolicy};
use crate::chunk_store::{ChunkStore, RunLogEntry};
use crate::context::AppContext;
use crate::embed_sync::sync_embeddings;
use crate::error::StoreError;
use crate::models::SyncSummary;
use crate::progress::{ProgressEvent, ProgressReporter};
use crate::reindex::{reindex_all, ReindexOptions};
use crate::sources::ChatSource;

#[derive(Debug, Default, Clone, Serialize)]
pub struct ImportStats {
    pub conversations: usize,
    pub messages_added: u64,
    pub skipped_duplicate: u64,
    pub skipped_empty: u64,
    pub cancelled: bool,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct ChunkStats {
    pub conversations: usize,
    pub chunks_created: u64,
    pub duplicates: u64,
    pub cancelled: bool,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct PipelineReport {
    pub import: Option<ImportStats>,
    pub chunking: ChunkStats,
    pub sync: Option<SyncSummary>,
    pub sync_error: Option<String>,
}

impl PipelineReport {
    pub fn cancelled(&self) -> bool {
        self.chunking.cancelled || self.import.as_ref().map_or(false, |i| i.cancelled)
    }
}

/// Copy every conversation and message from `source` into the store.
pub async fn import_source(
    store: &ChunkStore,
    source: &dyn ChatSource,
    cancel: &CancellationToken,
) -> Result<ImportStats> {
    let mut stats = ImportStats {
        skipped_empty: source.skipped_entries(),
        ..Default::default()
    };

    for conversation in source.conversations().await? {
        if cancel.is_cancelled() {
            info!("import cancelled");
            stats.cancelled = true;
            break;
        }

        let since = store
            .conversation(&conversation.conversation_id)
            .await?
            .and_then(|c| c.last_message_at);
        let mut messages = source
            .messages(&conversation.conversation_id, since)
            .await?;

        let before = messages.len();
        messages.retain(|m| !m.text.trim().is_empty());
        stats.skipped_empty += (before - messages.len()) as u64;

        let gate = store.db().lock().await;
        store.upsert_conversation(&gate, &conversation).await?;
        let inserted = store
            .insert_messages(&gate, &conversation.conversation_id, &messages, source.name())
            .await?;
        drop(gate);

        info!(
            conversation = %conversation.conversation_id,
            added = inserted.inserted,
            duplicates = inserted.skipped_duplicate,
            "imported conversation"
        );
        stats.conversations += 1;
        stats.messages_added += inserted.inserted;
        stats.skipped_duplicate += inserted.skipped_duplicate;
    }

    Ok(stats)
}

/// Chunk every included conversation that has messages past its watermark.
pub async fn chunk_pending(
    store: &ChunkStore,
    policy: &ChunkPolicy,
    embedding_version: &str,
    cancel: &CancellationToken,
    reporter: &dyn ProgressReporter,
) -> Result<ChunkStats, StoreError> {
    let pending = store.pending_conversations().await?;
    let total = pending.len() as u64;
    let mut stats = ChunkStats::default();

    for (i, conversation) in pending.iter().enumerate() {
        if cancel.is_cancelled() {
            info!(done = i, total, "chunking cancelled");
            stats.cancelled = true;
            break;
        }

        let messages = store.unchunked_messages(&conversation.conversation_id).await?;
        let Some(watermark) = messages.last().map(|m| m.timestamp) else {
            continue;
        };
        let chunks = chunk_conversation(&messages, policy);

        let gate = store.db().lock().await;
        let outcome = store
            .persist_chunks(
                &gate,
                &conversation.conversation_id,
                &chunks,
                watermark,
                embedding_version,
            )
            .await?;
        drop(gate);

        stats.conversations += 1;
        stats.chunks_created += outcome.inserted;
        stats.duplicates += outcome.duplicates;
        reporter.report(ProgressEvent::Chunking {
            conversation: conversation.name.clone(),
            n: i as u64 + 1,
            total,
        });
    }

    info!(
        conversations = stats.conversations,
        chunks = stats.chunks_created,
        duplicates = stats.duplicates,
        "chunking finished"
    );
    Ok(stats)
}

/// Import (when a source is given), chunk, then sync embeddings if enabled.
pub async fn run_pipeline(
    ctx: &AppContext,
    source: Option<&dyn ChatSource>,
    cancel: &CancellationToken,
    reporter: &dyn ProgressReporter,
) -> Result<PipelineReport> {
    let started_at = chrono::Utc::now().timestamp();
    let mut report = PipelineReport::default();
    let outcome = pipeline_steps(ctx, source, cancel, reporter, &mut report).await;

    let status = match &outcome {
        Err(_) => "error",
        Ok(()) if report.sync_error.is_some() => "error",
        Ok(()) if report.cancelled() => "cancelled",
        Ok(()) => "success",
    };
    let detail = match &outcome {
        Err(e) => Some(format!("{:#}", e)),
        Ok(()) => report.sync_error.clone(),
    };
    let import = report.import.clone().unwrap_or_default();
    record_run(
        ctx.store(),
        RunLogEntry {
            operation: "pipeline".to_string(),
            started_at,
            finished_at: Some(chrono::Utc::now().timestamp()),
            status: status.to_string(),
            messages_added: import.messages_added as i64,
            chunks_created: report.chunking.chunks_created as i64,
            skipped_duplicate: import.skipped_duplicate as i64,
            skipped_empty: import.skipped_empty as i64,
            detail,
        },
    )
    .await;

    outcome.map(|()| report)
}

async fn pipeline_steps(
    ctx: &AppContext,
    source: Option<&dyn ChatSource>,
    cancel: &CancellationToken,
    reporter: &dyn ProgressReporter,
    report: &mut PipelineReport,
) -> Result<()> {
    if let Some(source) = source {
        let stats = import_source(ctx.store(), source, cancel).await?;
        let cancelled = stats.cancelled;
        report.import = Some(stats);
        if cancelled {
            return Ok(());
        }
    }

    report.chunking = chunk_pending(
        ctx.store(),
        &ctx.chunk_policy(),
        ctx.embedding_version(),
        cancel,
        reporter,
    )
    .await?;
    if report.chunking.cancelled || !ctx.config().embedding.is_enabled() {
        return Ok(());
    }

    let embedder = ctx.embedder().await?;
    match sync_embeddings(
        ctx.store(),
        ctx.index(),
        embedder.as_ref(),
        ctx.config().embedding.batch_size,
        reporter,
    )
    .await
    {
        Ok(summary) => report.sync = Some(summary),
        Err(e) => report.sync_error = Some(e.to_string()),
    }
    Ok(())
}

/// Run one embedding sync against the context's index and log it.
pub async fn run_sync(ctx: &AppContext, reporter: &dyn ProgressReporter) -> Result<SyncSummary> {
    let started_at = chrono::Utc::now().timestamp();
    let embedder = ctx.embedder().await?;
    let result = sync_embeddings(
        ctx.store(),
        ctx.index(),
        embedder.as_ref(),
        ctx.config().embedding.batch_size,
        reporter,
    )
    .await;
    record_summary(ctx.store(), "sync", started_at, &result).await;
    Ok(result?)
}

/// Rebuild the index through a shadow copy and log it.
pub async fn run_reindex(
    ctx: &AppContext,
    rechunk: bool,
    reporter: &dyn ProgressReporter,
) -> Result<SyncSummary> {
    let started_at = chrono::Utc::now().timestamp();
    let embedder = ctx.embedder().await?;
    let policy = ctx.chunk_policy();
    let options = ReindexOptions {
        batch_size: ctx.config().embedding.batch_size,
        rechunk: rechunk.then_some(&policy),
    };
    let result = reindex_all(ctx.store(), ctx.index(), embedder.as_ref(), &options, reporter).await;
    record_summary(ctx.store(), "reindex", started_at, &result).await;
    Ok(result?)
}

/// Delete a conversation from the chunk store and its entries from the index.
/// Returns the number of index entries removed.
pub async fn forget_conversation(ctx: &AppContext, conversation_id: &str) -> Result<usize> {
    let gate = ctx.store().db().lock().await;
    let chunk_ids = ctx.store().delete_conversation(&gate, conversation_id).await?;
    let removed = ctx.index().delete(&chunk_ids).await?;
    info!(conversation = %conversation_id, chunks = chunk_ids.len(), removed, "forgot conversation");
    Ok(removed)
}

async fn record_summary<E: std::fmt::Display>(
    store: &ChunkStore,
    operation: &str,
    started_at: i64,
    result: &std::result::Result<SyncSummary, E>,
) {
    let (status, detail) = match result {
        Ok(summary) if summary.errors > 0 => ("error", summary.last_error.clone()),
        Ok(_) => ("success", None),
        Err(e) => ("error", Some(e.to_string())),
    };
    record_run(
        store,
        RunLogEntry {
            operation: operation.to_string(),
            started_at,
            finished_at: Some(chrono::Utc::now().timestamp()),
            status: status.to_string(),
            detail,
            ..Default::default()
        },
    )
    .await;
}

async fn record_run(store: &ChunkStore, entry: RunLogEntry) {
    let gate = store.db().lock().await;
    if let Err(e) = store.log_run(&gate, &entry).await {
        warn!(operation = %entry.operation, error = %e, "failed to record run");
    }
}
