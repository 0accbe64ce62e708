//! Service wiring.
//!
//! All collaborators are built here from config and injected — the
//! orchestrator and sweeper never construct their own storage, provider,
//! queue or notifier.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info};

use crate::config::Config;
use crate::db::tasks::{SqliteTaskStore, TaskStore};
use crate::db::Database;
use crate::notify::{LogNotifier, Notifier, WebhookNotifier};
use crate::pipeline::Orchestrator;
use crate::queue::{MpscTaskQueue, TaskQueue, WorkerPool};
use crate::storage::HttpStorage;
use crate::sweeper::{RetryPolicy, RetrySweeper};
use crate::transcription::providers::AssemblyClient;
use crate::transcription::TranscriptionConfig;

/// Built collaborators, shared between the worker service and the CLI
/// reprocess/sweep commands.
pub struct Service {
    pub store: Arc<dyn TaskStore>,
    pub orchestrator: Arc<Orchestrator>,
    pub notifier: Arc<dyn Notifier>,
    pub retry_policy: RetryPolicy,
}

pub fn build_service(config: &Config) -> Result<Service> {
    let db = match &config.worker.db_path {
        Some(path) => Database::new(path.clone())?,
        None => Database::open_default()?,
    };
    let store: Arc<dyn TaskStore> = Arc::new(SqliteTaskStore::new(db));

    let storage = Arc::new(HttpStorage::new(
        &config.storage.base_url,
        config.storage.auth_token.clone(),
    ));

    let transcriber = Arc::new(AssemblyClient::new(
        config.transcription.api_key.clone(),
        config.transcription.api_endpoint.clone(),
        Duration::from_secs(config.transcription.poll_interval_seconds),
        Duration::from_secs(config.transcription.timeout_seconds),
    ));

    let notifier: Arc<dyn Notifier> = match &config.notify.webhook_url {
        Some(url) => Arc::new(WebhookNotifier::new(url)),
        None => Arc::new(LogNotifier),
    };

    let orchestrator = Arc::new(Orchestrator::new(
        store.clone(),
        storage,
        transcriber,
        TranscriptionConfig::default(),
    ));

    let retry_policy = RetryPolicy {
        max_retries: config.retry.max_retries,
        cooldown: Duration::from_secs(config.retry.cooldown_seconds),
        requeue_spacing: Duration::from_secs(config.retry.requeue_spacing_seconds),
    };

    Ok(Service {
        store,
        orchestrator,
        notifier,
        retry_policy,
    })
}

/// Run the worker service: a pool of pipeline workers fed by triggers
/// (validated file keys on stdin, one per line) and the retry sweeper.
pub async fn run_service() -> Result<()> {
    info!("Starting scribed worker service");

    let config = Config::load()?;
    let service = build_service(&config)?;

    let (queue, rx) = MpscTaskQueue::new(config.worker.queue_capacity);
    let queue: Arc<dyn TaskQueue> = Arc::new(queue);

    WorkerPool::spawn(rx, service.orchestrator.clone(), config.worker.concurrency);

    let sweeper = RetrySweeper::new(
        service.store.clone(),
        queue.clone(),
        service.notifier.clone(),
        service.retry_policy.clone(),
    );
    let sweep_interval = Duration::from_secs(config.retry.sweep_interval_seconds);
    tokio::spawn(async move {
        sweeper.run(sweep_interval).await;
    });

    info!(
        "scribed is ready: {} workers, sweep every {}s",
        config.worker.concurrency, config.retry.sweep_interval_seconds
    );
    info!("Feed validated archive keys on stdin, one per line");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let file_key = line.trim();
        if file_key.is_empty() {
            continue;
        }

        if let Err(e) = service.store.upsert_received(file_key) {
            error!("Could not record trigger for '{}': {}", file_key, e);
            continue;
        }
        if let Err(e) = queue.enqueue(file_key).await {
            error!("Could not enqueue '{}': {}", file_key, e);
        }
    }

    info!("Trigger input closed, shutting down");
    Ok(())
}
