//! CLI command handlers.

mod args;

pub use args::{Cli, CliCommand, ReprocessCliArgs};

use anyhow::{bail, Result};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::app;
use crate::config::Config;
use crate::db::tasks::TaskStore as _;
use crate::queue::TaskQueue;
use crate::sweeper::RetrySweeper;

/// Re-run the pipeline for the named archives, or for a user's archives,
/// or for everything. Runs attempts inline, sequentially.
pub async fn handle_reprocess_command(args: ReprocessCliArgs) -> Result<()> {
    let config = Config::load()?;
    let service = app::build_service(&config)?;

    let keys = if args.all {
        service.store.all_keys()?
    } else if let Some(user) = &args.user {
        service.store.keys_for_user(user)?
    } else {
        args.keys
    };

    if keys.is_empty() {
        bail!("No archives to reprocess");
    }

    info!("Reprocessing {} archive(s)", keys.len());
    let mut failures = 0usize;
    for key in &keys {
        service.store.upsert_received(key)?;
        if let Err(e) = service.orchestrator.run(key).await {
            error!("Reprocessing failed for '{}': {}", key, e);
            failures += 1;
        }
    }

    if failures > 0 {
        bail!("{}/{} archives failed to reprocess", failures, keys.len());
    }
    Ok(())
}

/// Queue that collects claimed keys so a one-shot sweep can run the
/// re-enqueued attempts inline.
#[derive(Default)]
struct InlineQueue {
    keys: Mutex<Vec<String>>,
}

#[async_trait::async_trait]
impl TaskQueue for InlineQueue {
    async fn enqueue(&self, file_key: &str) -> Result<()> {
        self.keys.lock().await.push(file_key.to_string());
        Ok(())
    }
}

/// Run a single sweep pass, then drive the re-enqueued tasks to a
/// terminal state inline.
pub async fn handle_sweep_command() -> Result<()> {
    let config = Config::load()?;
    let service = app::build_service(&config)?;

    let queue = Arc::new(InlineQueue::default());
    let sweeper = RetrySweeper::new(
        service.store.clone(),
        queue.clone(),
        service.notifier.clone(),
        service.retry_policy.clone(),
    );

    let outcome = sweeper.sweep_once().await?;
    info!(
        "Sweep finished: {} requeued, {} escalated",
        outcome.requeued, outcome.escalated
    );

    let keys = queue.keys.lock().await.clone();
    for key in &keys {
        if let Err(e) = service.orchestrator.run(key).await {
            error!("Retry attempt failed for '{}': {}", key, e);
        }
    }

    Ok(())
}
