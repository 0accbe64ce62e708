//! Retry sweeper.
//!
//! Periodic job that re-drives failed tasks. Each pass claims failed
//! tasks past the cool-down whose retry budget is not exhausted (the
//! claim increments `retry_count` inside one exclusive transaction, so
//! concurrent sweeper instances never double-process a row), then either
//! re-enqueues the task or escalates when the budget runs out.
//!
//! The sweep does not distinguish fatal from transient failures — a
//! permanently malformed upload burns through its budget over successive
//! cool-down cycles before escalating.

use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::db::tasks::TaskStore;
use crate::notify::{Notification, Notifier};
use crate::queue::TaskQueue;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub cooldown: Duration,
    /// Delay between successive re-enqueues within one pass, to avoid
    /// bursting the transcription provider.
    pub requeue_spacing: Duration,
}

/// Outcome of one sweep pass.
#[derive(Debug, Default, PartialEq)]
pub struct SweepOutcome {
    pub requeued: usize,
    pub escalated: usize,
}

pub struct RetrySweeper {
    store: Arc<dyn TaskStore>,
    queue: Arc<dyn TaskQueue>,
    notifier: Arc<dyn Notifier>,
    policy: RetryPolicy,
}

impl RetrySweeper {
    pub fn new(
        store: Arc<dyn TaskStore>,
        queue: Arc<dyn TaskQueue>,
        notifier: Arc<dyn Notifier>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            store,
            queue,
            notifier,
            policy,
        }
    }

    /// Run sweeps forever on a fixed interval.
    pub async fn run(&self, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            match self.sweep_once().await {
                Ok(outcome) if outcome.requeued > 0 || outcome.escalated > 0 => {
                    info!(
                        "Sweep finished: {} requeued, {} escalated",
                        outcome.requeued, outcome.escalated
                    );
                }
                Ok(_) => {}
                Err(e) => error!("Sweep pass failed: {}", e),
            }
        }
    }

    /// One sweep pass: claim eligible failed tasks, re-enqueue or escalate.
    pub async fn sweep_once(&self) -> Result<SweepOutcome> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.policy.cooldown)
                .unwrap_or_else(|_| chrono::Duration::seconds(300));

        let claimed = self.store.claim_retryable(cutoff, self.policy.max_retries)?;
        if claimed.is_empty() {
            debug!("No eligible failed tasks found");
            return Ok(SweepOutcome::default());
        }

        let mut outcome = SweepOutcome::default();
        for task in &claimed {
            if task.retry_count >= self.policy.max_retries {
                warn!(
                    "Task '{}' exhausted its retry budget ({}), escalating",
                    task.file_key, self.policy.max_retries
                );
                let notification =
                    Notification::retry_exhausted(&task.file_key, self.policy.max_retries, Utc::now());
                if let Err(e) = self.notifier.escalate(&notification).await {
                    error!("Escalation delivery failed for '{}': {}", task.file_key, e);
                }
                outcome.escalated += 1;
                continue;
            }

            info!(
                "Retrying task '{}' (attempt {})",
                task.file_key, task.retry_count
            );
            match self.queue.enqueue(&task.file_key).await {
                Ok(()) => outcome.requeued += 1,
                Err(e) => {
                    error!("Failed to re-enqueue '{}': {}", task.file_key, e);
                    continue;
                }
            }

            if !self.policy.requeue_spacing.is_zero() {
                tokio::time::sleep(self.policy.requeue_spacing).await;
            }
        }

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use std::sync::Mutex;

    use crate::db::tasks::{SqliteTaskStore, TaskStore as _};
    use crate::db::Database;

    #[derive(Default)]
    struct RecordingQueue {
        keys: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl TaskQueue for RecordingQueue {
        async fn enqueue(&self, file_key: &str) -> Result<()> {
            self.keys.lock().unwrap().push(file_key.to_string());
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        notifications: Mutex<Vec<Notification>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn escalate(&self, notification: &Notification) -> Result<()> {
            self.notifications.lock().unwrap().push(notification.clone());
            Ok(())
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        store: Arc<SqliteTaskStore>,
        queue: Arc<RecordingQueue>,
        notifier: Arc<RecordingNotifier>,
        sweeper: RetrySweeper,
    }

    fn fixture(max_retries: u32) -> Fixture {
        let dir = tempfile::TempDir::new().unwrap();
        let db = Database::new(dir.path().join("test.db")).unwrap();
        let store = Arc::new(SqliteTaskStore::new(db));
        let queue = Arc::new(RecordingQueue::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let sweeper = RetrySweeper::new(
            store.clone(),
            queue.clone(),
            notifier.clone(),
            RetryPolicy {
                max_retries,
                cooldown: Duration::from_secs(300),
                requeue_spacing: Duration::ZERO,
            },
        );
        Fixture {
            _dir: dir,
            store,
            queue,
            notifier,
            sweeper,
        }
    }

    fn fail_task(store: &SqliteTaskStore, key: &str) {
        store.upsert_received(key).unwrap();
        store
            .mark_failed(key, "provider timeout", Utc::now() - ChronoDuration::minutes(10))
            .unwrap();
    }

    #[tokio::test]
    async fn test_sweep_requeues_eligible_task() {
        let f = fixture(4);
        fail_task(&f.store, "k.tar");

        let outcome = f.sweeper.sweep_once().await.unwrap();
        assert_eq!(outcome, SweepOutcome { requeued: 1, escalated: 0 });
        assert_eq!(*f.queue.keys.lock().unwrap(), vec!["k.tar"]);
    }

    #[tokio::test]
    async fn test_sweep_skips_task_within_cooldown() {
        let f = fixture(4);
        f.store.upsert_received("fresh.tar").unwrap();
        f.store.mark_failed("fresh.tar", "boom", Utc::now()).unwrap();

        let outcome = f.sweeper.sweep_once().await.unwrap();
        assert_eq!(outcome, SweepOutcome::default());
        assert!(f.queue.keys.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_retry_bound_escalates_exactly_once() {
        let max_retries = 4;
        let f = fixture(max_retries);
        fail_task(&f.store, "doomed.tar");

        // Permanently failing task: each re-enqueued attempt fails again
        // before the next sweep.
        for _ in 0..10 {
            f.sweeper.sweep_once().await.unwrap();
            f.store
                .mark_failed("doomed.tar", "boom", Utc::now() - ChronoDuration::minutes(10))
                .unwrap();
        }

        let task = f.store.get("doomed.tar").unwrap().unwrap();
        assert_eq!(task.retry_count, max_retries);

        let notifications = f.notifier.notifications.lock().unwrap();
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].file_key, "doomed.tar");

        // Re-enqueued for attempts 1..max-1 only, never after escalation.
        assert_eq!(f.queue.keys.lock().unwrap().len(), (max_retries - 1) as usize);
    }

    #[tokio::test]
    async fn test_exhausted_task_is_not_requeued() {
        let f = fixture(1);
        fail_task(&f.store, "k.tar");

        let outcome = f.sweeper.sweep_once().await.unwrap();
        assert_eq!(outcome, SweepOutcome { requeued: 0, escalated: 1 });
        assert!(f.queue.keys.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sweep_handles_multiple_tasks() {
        let f = fixture(4);
        fail_task(&f.store, "a.tar");
        fail_task(&f.store, "b.tar");

        let outcome = f.sweeper.sweep_once().await.unwrap();
        assert_eq!(outcome.requeued, 2);

        let mut keys = f.queue.keys.lock().unwrap().clone();
        keys.sort();
        assert_eq!(keys, vec!["a.tar", "b.tar"]);
    }
}
