//! Store and index statistics.
//!
//! A quick summary of what has been imported, chunked, and embedded, plus the
//! recent run log. Used by `chatmem stats` and `chatmem log`.

use anyhow::Result;

use crate::context::AppContext;
use crate::vector_index::IndexTarget;

/// Run the stats command: query both stores and print a summary.
pub async fn run_stats(ctx: &AppContext) -> Result<()> {
    let config = ctx.config();
    let counts = ctx.store().counts().await?;
    let indexed = ctx.index().count(IndexTarget::Live).await?;
    let shadow = ctx.index().has_shadow().await?;
    let embedded = counts.chunks - counts.unembedded_chunks;

    let db_size = std::fs::metadata(&config.db.path).map(|m| m.len()).unwrap_or(0);
    let index_size = std::fs::metadata(&config.index.path).map(|m| m.len()).unwrap_or(0);

    println!("chatmem — Store Stats");
    println!("=====================");
    println!();
    println!("  Database:        {} ({})", config.db.path.display(), format_bytes(db_size));
    println!("  Index:           {} ({})", config.index.path.display(), format_bytes(index_size));
    println!("  Embedding model: {}", config.embedding.version());
    println!();
    println!("  Conversations:   {}", counts.conversations);
    println!("  Messages:        {}", counts.messages);
    println!("  Unchunked:       {}", counts.unchunked_messages);
    println!("  Chunks:          {}", counts.chunks);
    println!(
        "  Embedded:        {} / {} ({}%)",
        embedded,
        counts.chunks,
        if counts.chunks > 0 {
            (embedded * 100) / counts.chunks
        } else {
            0
        }
    );
    println!("  Index entries:   {}", indexed);
    if shadow {
        println!("  Shadow index:    present (interrupted reindex)");
    }

    let conversations = ctx.store().conversations().await?;
    if !conversations.is_empty() {
        println!();
        println!("  By conversation:");
        println!(
            "  {:<28} {:>8} {:>8}   {}",
            "CONVERSATION", "MESSAGES", "INCLUDED", "LAST CHUNKED"
        );
        println!("  {}", "-".repeat(70));
        for c in &conversations {
            let chunked = match c.last_chunked_at {
                Some(ts) => format_ts_relative(ts),
                None => "never".to_string(),
            };
            println!(
                "  {:<28} {:>8} {:>8}   {}",
                truncate(&c.name, 28),
                c.message_count,
                if c.included { "yes" } else { "no" },
                chunked
            );
        }
    }

    println!();
    Ok(())
}

/// Print the most recent run-log entries.
pub async fn run_log(ctx: &AppContext, limit: i64) -> Result<()> {
    let runs = ctx.store().recent_runs(limit).await?;
    if runs.is_empty() {
        println!("No runs recorded.");
        return Ok(());
    }

    println!(
        "  {:<10} {:<18} {:<10} {:>8} {:>8}   {}",
        "OPERATION", "STARTED", "STATUS", "MESSAGES", "CHUNKS", "DETAIL"
    );
    println!("  {}", "-".repeat(80));
    for run in &runs {
        println!(
            "  {:<10} {:<18} {:<10} {:>8} {:>8}   {}",
            run.operation,
            format_ts_iso(run.started_at),
            run.status,
            run.messages_added,
            run.chunks_created,
            run.detail.as_deref().unwrap_or("")
        );
    }
    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max - 1).collect();
        format!("{}…", cut)
    }
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp as a relative time string (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let delta = chrono::Utc::now().timestamp() - ts;

    if delta < 0 {
        return format_ts_iso(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn test_relative_time() {
        let now = chrono::Utc::now().timestamp();
        assert_eq!(format_ts_relative(now - 5), "just now");
        assert_eq!(format_ts_relative(now - 7200), "2 hours ago");
        assert_eq!(format_ts_relative(now - 86400), "1 day ago");
        assert_eq!(format_ts_relative(0), "1970-01-01 00:00");
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 28), "short");
        assert_eq!(truncate("abcdef", 4), "abc…");
    }
}
