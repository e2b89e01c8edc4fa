//! Similarity retrieval over the live vector index.

use anyhow::{bail, Result};

use crate::context::AppContext;
use crate::embedding::{embed_query, Embedder};
use crate::models::SearchHit;
use crate::vector_index::{QueryFilter, VectorIndex};

const EXCERPT_CHARS: usize = 240;

/// Embed `query` and return the `limit` most similar chunks, best first.
pub async fn search(
    index: &dyn VectorIndex,
    embedder: &dyn Embedder,
    query: &str,
    limit: usize,
    filter: &QueryFilter,
) -> Result<Vec<SearchHit>> {
    if query.trim().is_empty() || limit == 0 {
        return Ok(Vec::new());
    }
    let vector = embed_query(embedder, query).await?;
    Ok(index.query(&vector, limit, filter).await?)
}

pub async fn run_search(
    ctx: &AppContext,
    query: &str,
    limit: usize,
    conversation_id: Option<String>,
) -> Result<()> {
    if !ctx.config().embedding.is_enabled() {
        bail!("Search requires embeddings. Set [embedding] provider in config.");
    }

    let embedder = ctx.embedder().await?;
    let filter = QueryFilter { conversation_id };
    let hits = search(ctx.index(), embedder.as_ref(), query, limit, &filter).await?;

    if hits.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, hit) in hits.iter().enumerate() {
        let meta = &hit.metadata;
        let start = format_date(meta.time_start);
        let end = format_date(meta.time_end);

        println!("{}. [{:.2}] {}", i + 1, hit.score, meta.conversation_name);
        println!("    when: {} → {}", start, end);
        println!("    participants: {}", meta.participants.join(", "));
        println!("    messages: {}", meta.message_count);
        println!("    excerpt: \"{}\"", excerpt(&hit.document));
        println!("    id: {}", hit.chunk_id);
        println!();
    }

    Ok(())
}

fn format_date(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}

fn excerpt(document: &str) -> String {
    let flat = document.replace('\n', " ");
    let trimmed = flat.trim();
    if trimmed.chars().count() <= EXCERPT_CHARS {
        return trimmed.to_string();
    }
    let cut: String = trimmed.chars().take(EXCERPT_CHARS).collect();
    format!("{}…", cut.trim_end())
}
