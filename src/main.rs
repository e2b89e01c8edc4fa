//! # chatmem CLI
//!
//! Commands for importing chat exports, chunking them, keeping the vector
//! index in sync, and searching it.
//!
//! ```bash
//! chatmem --config ./config/chatmem.toml init
//! chatmem run ./exports/result.json       # import → chunk → embed
//! chatmem search "trip to lisbon" --limit 5
//! chatmem embed reindex --rechunk         # after changing chunking settings
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use chatmem::config;
use chatmem::connector_json::JsonExportSource;
use chatmem::context::AppContext;
use chatmem::embed_sync::prune_stale;
use chatmem::ingest;
use chatmem::migrate;
use chatmem::progress::ProgressMode;
use chatmem::scheduler::{AutoSync, SourceLoader};
use chatmem::search;
use chatmem::sources::ChatSource;
use chatmem::stats;

/// chatmem: searchable memory of your chat history.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file.
#[derive(Parser)]
#[command(name = "chatmem", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/chatmem.toml")]
    config: PathBuf,

    /// Progress output on stderr. Defaults to `human` on a terminal, else `off`.
    #[arg(long, global = true, value_enum)]
    progress: Option<ProgressMode>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database and schema. Idempotent.
    Init,

    /// Import a chat-export JSON file or a directory of them.
    Import {
        path: PathBuf,
        /// Sender name for messages that carry none (e.g. your own, from a
        /// deleted account).
        #[arg(long)]
        as_user: Option<String>,
    },

    /// Chunk all messages newer than each conversation's watermark.
    Chunk,

    /// Embedding index management.
    Embed {
        #[command(subcommand)]
        action: EmbedAction,
    },

    /// Full pipeline: import, chunk, then sync embeddings.
    Run {
        path: PathBuf,
        #[arg(long)]
        as_user: Option<String>,
    },

    /// Re-run the pipeline on `[scheduler].interval_mins` until Ctrl-C.
    Watch {
        path: PathBuf,
        #[arg(long)]
        as_user: Option<String>,
    },

    /// Similarity search over the live index.
    Search {
        query: String,
        #[arg(long, default_value_t = 10)]
        limit: usize,
        /// Only return chunks from this conversation.
        #[arg(long)]
        conversation: Option<String>,
    },

    /// Delete a conversation from the chunk store and the index.
    Forget { conversation_id: String },

    /// Stop chunking a conversation.
    Exclude { conversation_id: String },

    /// Resume chunking a conversation.
    Include { conversation_id: String },

    /// Store and index summary.
    Stats,

    /// Recent pipeline, sync, and reindex runs.
    Log {
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
}

#[derive(Subcommand)]
enum EmbedAction {
    /// Embed new and changed chunks into the live index.
    Sync,
    /// Rebuild the whole index through a shadow copy and swap it in.
    Reindex {
        /// Drop all chunks and re-chunk every conversation first.
        #[arg(long)]
        rechunk: bool,
    },
    /// Delete index entries whose chunk no longer exists.
    Prune,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    let progress = cli.progress.unwrap_or_else(ProgressMode::default_for_tty);

    if let Commands::Init = cli.command {
        migrate::run_migrations(&cfg).await?;
        println!("Database initialized successfully.");
        return Ok(());
    }

    let ctx = Arc::new(AppContext::open(cfg).await?);
    let reporter = progress.reporter();

    match cli.command {
        Commands::Init => {}
        Commands::Import { path, as_user } => {
            let source = JsonExportSource::open(&path, as_user.as_deref())?;
            let stats = ingest::import_source(ctx.store(), &source, &CancellationToken::new()).await?;
            println!(
                "Imported {} messages from {} conversations ({} duplicates, {} empty skipped).",
                stats.messages_added, stats.conversations, stats.skipped_duplicate, stats.skipped_empty
            );
        }
        Commands::Chunk => {
            let stats = ingest::chunk_pending(
                ctx.store(),
                &ctx.chunk_policy(),
                ctx.embedding_version(),
                &CancellationToken::new(),
                reporter.as_ref(),
            )
            .await?;
            println!(
                "Chunked {} conversations: {} new chunks, {} duplicates.",
                stats.conversations, stats.chunks_created, stats.duplicates
            );
        }
        Commands::Embed { action } => match action {
            EmbedAction::Sync => {
                let summary = ingest::run_sync(&ctx, reporter.as_ref()).await?;
                println!("{}", serde_json::to_string_pretty(&summary)?);
            }
            EmbedAction::Reindex { rechunk } => {
                let summary = ingest::run_reindex(&ctx, rechunk, reporter.as_ref()).await?;
                println!("Reindexed {} chunks.", summary.embedded);
            }
            EmbedAction::Prune => {
                let removed = prune_stale(ctx.store(), ctx.index()).await?;
                println!("Removed {} stale index entries.", removed);
            }
        },
        Commands::Run { path, as_user } => {
            let source = JsonExportSource::open(&path, as_user.as_deref())?;
            let cancel = CancellationToken::new();
            let ctrl_c = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    ctrl_c.cancel();
                }
            });
            let report = ingest::run_pipeline(&ctx, Some(&source as &dyn ChatSource), &cancel, reporter.as_ref()).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if let Some(e) = report.sync_error {
                anyhow::bail!("embedding sync failed: {}", e);
            }
        }
        Commands::Watch { path, as_user } => {
            let Some(every) = AutoSync::interval(&ctx.config().scheduler) else {
                anyhow::bail!("Auto-sync is disabled ([scheduler].interval_mins = 0)");
            };
            let loader: SourceLoader = Arc::new(move || {
                Ok(Box::new(JsonExportSource::open(&path, as_user.as_deref())?) as Box<dyn ChatSource>)
            });
            let auto = AutoSync::start(ctx.clone(), Some(loader), every, Arc::from(reporter));
            tokio::signal::ctrl_c().await?;
            println!("Stopping auto-sync...");
            auto.stop().await;
        }
        Commands::Search {
            query,
            limit,
            conversation,
        } => {
            search::run_search(&ctx, &query, limit, conversation).await?;
        }
        Commands::Forget { conversation_id } => {
            let removed = ingest::forget_conversation(&ctx, &conversation_id).await?;
            println!("Forgot {} ({} index entries removed).", conversation_id, removed);
        }
        Commands::Exclude { conversation_id } => {
            set_included(&ctx, &conversation_id, false).await?;
        }
        Commands::Include { conversation_id } => {
            set_included(&ctx, &conversation_id, true).await?;
        }
        Commands::Stats => {
            stats::run_stats(&ctx).await?;
        }
        Commands::Log { limit } => {
            stats::run_log(&ctx, limit).await?;
        }
    }

    Ok(())
}

async fn set_included(ctx: &AppContext, conversation_id: &str, included: bool) -> Result<()> {
    let gate = ctx.store().db().lock().await;
    if !ctx.store().set_included(&gate, conversation_id, included).await? {
        anyhow::bail!("Unknown conversation: {}", conversation_id);
    }
    println!(
        "{} {}.",
        if included { "Included" } else { "Excluded" },
        conversation_id
    );
    Ok(())
}
