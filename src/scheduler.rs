//! Background auto-sync.
//!
//! [`AutoSync`] runs the pipeline on a fixed interval until stopped. The
//! first run starts immediately. The cancellation token is shared with the
//! pipeline, so stopping also interrupts a run in progress at the next
//! conversation boundary. Dropping an `AutoSync` stops it.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{error, info};

use crate::config::SchedulerConfig;
use crate::context::AppContext;
use crate::ingest::run_pipeline;
use crate::progress::ProgressReporter;
use crate::sources::ChatSource;

/// Produces a fresh source for each run, so changes on disk are picked up.
pub type SourceLoader = Arc<dyn Fn() -> Result<Box<dyn ChatSource>> + Send + Sync>;

pub struct AutoSync {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
    _cancel_loop: DropGuard,
}

impl AutoSync {
    /// `None` when auto-sync is disabled (`interval_mins = 0`).
    pub fn interval(config: &SchedulerConfig) -> Option<Duration> {
        (config.interval_mins > 0).then(|| Duration::from_secs(config.interval_mins * 60))
    }

    pub fn start(
        ctx: Arc<AppContext>,
        loader: Option<SourceLoader>,
        every: Duration,
        reporter: Arc<dyn ProgressReporter>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let loop_cancel = cancel.child_token();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = loop_cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let source = match loader.as_ref().map(|load| load()).transpose() {
                    Ok(source) => source,
                    Err(e) => {
                        error!(error = %format!("{:#}", e), "auto-sync could not load source");
                        continue;
                    }
                };

                match run_pipeline(&ctx, source.as_deref(), &loop_cancel, reporter.as_ref()).await {
                    Ok(report) => info!(
                        chunks = report.chunking.chunks_created,
                        embedded = report.sync.as_ref().map_or(0, |s| s.embedded),
                        cancelled = report.cancelled(),
                        "auto-sync run finished"
                    ),
                    Err(e) => error!(error = %format!("{:#}", e), "auto-sync run failed"),
                }
            }

            info!("auto-sync stopped");
        });

        info!(every_secs = every.as_secs(), "auto-sync started");
        Self {
            _cancel_loop: cancel.clone().drop_guard(),
            cancel,
            handle,
        }
    }

    /// A token that stops this task when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop the loop and wait for the current run to wind down.
    pub async fn stop(self) {
        self.cancel.cancel();
        let _ = self.handle.await;
    }
}
