//! Task queue abstraction and worker pool.
//!
//! Triggers and the retry sweeper enqueue by `file_key`; a pool of workers
//! pulls keys and drives the pipeline. Delivery is at-least-once — the
//! orchestrator's per-attempt idempotency is the correctness backstop, so
//! the in-process channel implementation needs no deduplication.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::pipeline::Orchestrator;

/// Enqueue-by-key capability handed to triggers and the sweeper.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn enqueue(&self, file_key: &str) -> Result<()>;
}

/// Channel-backed queue feeding the in-process worker pool.
pub struct MpscTaskQueue {
    tx: mpsc::Sender<String>,
}

impl MpscTaskQueue {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

#[async_trait]
impl TaskQueue for MpscTaskQueue {
    async fn enqueue(&self, file_key: &str) -> Result<()> {
        self.tx
            .send(file_key.to_string())
            .await
            .context("Task queue is closed")
    }
}

/// Pool of workers consuming pipeline tasks.
pub struct WorkerPool;

impl WorkerPool {
    /// Spawn `workers` tasks sharing one receiver. Each worker pulls a
    /// key, runs the full pipeline for it, and logs the outcome; a failed
    /// attempt is left to the retry sweeper.
    pub fn spawn(
        rx: mpsc::Receiver<String>,
        orchestrator: Arc<Orchestrator>,
        workers: usize,
    ) -> Vec<JoinHandle<()>> {
        let rx = Arc::new(Mutex::new(rx));

        (0..workers)
            .map(|worker_id| {
                let rx = rx.clone();
                let orchestrator = orchestrator.clone();
                tokio::spawn(async move {
                    loop {
                        let file_key = {
                            let mut rx = rx.lock().await;
                            rx.recv().await
                        };
                        let Some(file_key) = file_key else {
                            info!("Worker {} shutting down, queue closed", worker_id);
                            break;
                        };

                        info!("Worker {} picked up task '{}'", worker_id, file_key);
                        if let Err(e) = orchestrator.run(&file_key).await {
                            error!("Worker {} task '{}' failed: {}", worker_id, file_key, e);
                        }
                    }
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_enqueue_delivers_key() {
        let (queue, mut rx) = MpscTaskQueue::new(4);
        queue.enqueue("raw_combined/a.tar").await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), "raw_combined/a.tar");
    }

    #[tokio::test]
    async fn test_enqueue_after_receiver_dropped_fails() {
        let (queue, rx) = MpscTaskQueue::new(4);
        drop(rx);
        assert!(queue.enqueue("k.tar").await.is_err());
    }
}
