//! Task and transcript-segment persistence.
//!
//! The orchestrator and sweeper see a typed repository interface, never a
//! raw row. Tasks are only ever updated, not deleted, so the table keeps
//! the full processing history of every archive. Segment replacement and
//! the sweeper's claim-and-increment both run inside a single transaction.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, TransactionBehavior};

use super::Database;
use crate::reconcile::Utterance;
use crate::storage::TaskMetadata;

/// Task lifecycle states. Transitions are monotonic within one attempt:
/// received → processing → processed | failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Received,
    Processing,
    Processed,
    Failed,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Received => "received",
            TaskState::Processing => "processing",
            TaskState::Processed => "processed",
            TaskState::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Result<TaskState> {
        match s {
            "received" => Ok(TaskState::Received),
            "processing" => Ok(TaskState::Processing),
            "processed" => Ok(TaskState::Processed),
            "failed" => Ok(TaskState::Failed),
            _ => bail!("Invalid task state: {}", s),
        }
    }
}

/// A task row.
#[derive(Debug, Clone)]
pub struct TaskRecord {
    pub id: i64,
    pub file_key: String,
    pub execution_id: Option<String>,
    pub created_by_user_id: Option<String>,
    pub bot_type: Option<String>,
    pub meeting_title: Option<String>,
    pub status: TaskState,
    pub retry_count: u32,
    pub process_started_at: Option<String>,
    pub process_completed_at: Option<String>,
    pub last_error: Option<String>,
    pub meeting_start_time: Option<String>,
    pub meeting_end_time: Option<String>,
    pub audio_file_key: Option<String>,
    pub created_at: String,
}

/// A persisted transcript segment.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentRecord {
    pub id: i64,
    pub task_id: i64,
    pub speaker: String,
    pub start_ms: i64,
    pub end_ms: i64,
    pub text: String,
}

/// A failed task claimed by a sweep pass. `retry_count` is the value
/// after the claim's increment.
#[derive(Debug, Clone)]
pub struct ClaimedTask {
    pub file_key: String,
    pub retry_count: u32,
}

/// Extra fields recorded when a task completes successfully.
#[derive(Debug, Clone, Default)]
pub struct CompletionDetails {
    pub meeting_start_time: Option<String>,
    pub meeting_end_time: Option<String>,
    pub audio_file_key: Option<String>,
}

/// Typed read/replace operations over tasks and their segments.
pub trait TaskStore: Send + Sync {
    /// Ensure a task row exists for `file_key`, in received state if new.
    fn upsert_received(&self, file_key: &str) -> Result<()>;

    /// Enter processing: record attribution metadata, stamp the start
    /// time, clear the previous diagnostic.
    fn mark_processing(
        &self,
        file_key: &str,
        meta: &TaskMetadata,
        started_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Terminal success for this attempt.
    fn mark_processed(
        &self,
        file_key: &str,
        completed_at: DateTime<Utc>,
        details: &CompletionDetails,
    ) -> Result<()>;

    /// Terminal failure for this attempt. No-op if the task row does not
    /// exist yet.
    fn mark_failed(&self, file_key: &str, error: &str, completed_at: DateTime<Utc>) -> Result<()>;

    fn get(&self, file_key: &str) -> Result<Option<TaskRecord>>;

    /// Replace the task's full segment set in one transaction. Readers see
    /// either the previous complete set or the new one, never a mix.
    fn replace_segments(&self, file_key: &str, utterances: &[Utterance]) -> Result<()>;

    fn segments_for(&self, file_key: &str) -> Result<Vec<SegmentRecord>>;

    /// Claim failed tasks eligible for retry: failed before `cutoff` with
    /// retry_count below `max_retries`. Increments retry_count as part of
    /// the claim, inside one exclusive transaction, so concurrent sweeper
    /// instances never double-claim a row.
    fn claim_retryable(&self, cutoff: DateTime<Utc>, max_retries: u32) -> Result<Vec<ClaimedTask>>;

    fn keys_for_user(&self, user_id: &str) -> Result<Vec<String>>;

    fn all_keys(&self) -> Result<Vec<String>>;
}

/// Sqlite-backed store; the production implementation.
#[derive(Clone)]
pub struct SqliteTaskStore {
    db: Database,
}

impl SqliteTaskStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    fn task_id(conn: &Connection, file_key: &str) -> Result<i64> {
        conn.query_row(
            "SELECT id FROM tasks WHERE file_key = ?1",
            params![file_key],
            |row| row.get(0),
        )
        .with_context(|| format!("No task row for file_key {}", file_key))
    }
}

fn stamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn row_to_task(row: &rusqlite::Row) -> rusqlite::Result<(TaskRecord, String)> {
    let status: String = row.get(6)?;
    Ok((
        TaskRecord {
            id: row.get(0)?,
            file_key: row.get(1)?,
            execution_id: row.get(2)?,
            created_by_user_id: row.get(3)?,
            bot_type: row.get(4)?,
            meeting_title: row.get(5)?,
            status: TaskState::Received, // replaced after parse
            retry_count: row.get(7)?,
            process_started_at: row.get(8)?,
            process_completed_at: row.get(9)?,
            last_error: row.get(10)?,
            meeting_start_time: row.get(11)?,
            meeting_end_time: row.get(12)?,
            audio_file_key: row.get(13)?,
            created_at: row.get(14)?,
        },
        status,
    ))
}

const TASK_COLUMNS: &str = "id, file_key, execution_id, created_by_user_id, bot_type, \
    meeting_title, status, retry_count, process_started_at, process_completed_at, \
    last_error, meeting_start_time, meeting_end_time, audio_file_key, created_at";

impl TaskStore for SqliteTaskStore {
    fn upsert_received(&self, file_key: &str) -> Result<()> {
        let conn = self.db.conn()?;
        conn.execute(
            "INSERT INTO tasks (file_key, status) VALUES (?1, ?2)
             ON CONFLICT(file_key) DO NOTHING",
            params![file_key, TaskState::Received.as_str()],
        )
        .context("Failed to upsert received task")?;
        Ok(())
    }

    fn mark_processing(
        &self,
        file_key: &str,
        meta: &TaskMetadata,
        started_at: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.db.conn()?;
        conn.execute(
            "INSERT INTO tasks (file_key, execution_id, created_by_user_id, bot_type, \
             meeting_title, status, process_started_at, last_error)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, NULL)
             ON CONFLICT(file_key) DO UPDATE SET
                execution_id = excluded.execution_id,
                created_by_user_id = excluded.created_by_user_id,
                bot_type = excluded.bot_type,
                meeting_title = excluded.meeting_title,
                status = excluded.status,
                process_started_at = excluded.process_started_at,
                last_error = NULL",
            params![
                file_key,
                meta.execution_id,
                meta.user_id,
                meta.bot_type,
                meta.meeting_title,
                TaskState::Processing.as_str(),
                stamp(started_at),
            ],
        )
        .context("Failed to mark task as processing")?;
        Ok(())
    }

    fn mark_processed(
        &self,
        file_key: &str,
        completed_at: DateTime<Utc>,
        details: &CompletionDetails,
    ) -> Result<()> {
        let conn = self.db.conn()?;
        conn.execute(
            "UPDATE tasks SET status = ?1, process_completed_at = ?2, last_error = NULL, \
             meeting_start_time = ?3, meeting_end_time = ?4, audio_file_key = ?5
             WHERE file_key = ?6",
            params![
                TaskState::Processed.as_str(),
                stamp(completed_at),
                details.meeting_start_time,
                details.meeting_end_time,
                details.audio_file_key,
                file_key,
            ],
        )
        .context("Failed to mark task as processed")?;
        Ok(())
    }

    fn mark_failed(&self, file_key: &str, error: &str, completed_at: DateTime<Utc>) -> Result<()> {
        let conn = self.db.conn()?;
        conn.execute(
            "UPDATE tasks SET status = ?1, last_error = ?2, process_completed_at = ?3
             WHERE file_key = ?4",
            params![
                TaskState::Failed.as_str(),
                error,
                stamp(completed_at),
                file_key,
            ],
        )
        .context("Failed to mark task as failed")?;
        Ok(())
    }

    fn get(&self, file_key: &str) -> Result<Option<TaskRecord>> {
        let conn = self.db.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM tasks WHERE file_key = ?1",
                TASK_COLUMNS
            ))
            .context("Failed to prepare task query")?;

        let mut rows = stmt
            .query_map(params![file_key], row_to_task)
            .context("Failed to query task")?;

        match rows.next() {
            Some(Ok((mut record, status))) => {
                record.status = TaskState::parse(&status)?;
                Ok(Some(record))
            }
            Some(Err(e)) => Err(e.into()),
            None => Ok(None),
        }
    }

    fn replace_segments(&self, file_key: &str, utterances: &[Utterance]) -> Result<()> {
        let mut conn = self.db.conn()?;
        let tx = conn
            .transaction()
            .context("Failed to start segment replacement transaction")?;

        let task_id = Self::task_id(&tx, file_key)?;

        tx.execute(
            "DELETE FROM transcript_segments WHERE task_id = ?1",
            params![task_id],
        )
        .context("Failed to delete previous segments")?;

        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO transcript_segments (task_id, speaker, start_ms, end_ms, text)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                )
                .context("Failed to prepare segment insert")?;

            for utterance in utterances {
                stmt.execute(params![
                    task_id,
                    utterance.speaker,
                    utterance.start_ms,
                    utterance.end_ms,
                    utterance.text,
                ])
                .context("Failed to insert segment")?;
            }
        }

        tx.commit().context("Failed to commit segment replacement")
    }

    fn segments_for(&self, file_key: &str) -> Result<Vec<SegmentRecord>> {
        let conn = self.db.conn()?;
        let task_id = Self::task_id(&conn, file_key)?;

        let mut stmt = conn
            .prepare(
                "SELECT id, task_id, speaker, start_ms, end_ms, text
                 FROM transcript_segments WHERE task_id = ?1 ORDER BY start_ms, id",
            )
            .context("Failed to prepare segments query")?;

        let rows = stmt
            .query_map(params![task_id], |row| {
                Ok(SegmentRecord {
                    id: row.get(0)?,
                    task_id: row.get(1)?,
                    speaker: row.get(2)?,
                    start_ms: row.get(3)?,
                    end_ms: row.get(4)?,
                    text: row.get(5)?,
                })
            })
            .context("Failed to query segments")?;

        let mut segments = Vec::new();
        for row in rows {
            segments.push(row?);
        }
        Ok(segments)
    }

    fn claim_retryable(&self, cutoff: DateTime<Utc>, max_retries: u32) -> Result<Vec<ClaimedTask>> {
        let mut conn = self.db.conn()?;
        // Immediate mode takes the write lock up front, so a concurrent
        // sweep instance serializes behind this claim instead of both
        // reading the same eligible rows.
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("Failed to start claim transaction")?;

        let claimed = {
            let mut stmt = tx
                .prepare(
                    "SELECT id, file_key, retry_count FROM tasks
                     WHERE status = ?1 AND retry_count < ?2
                       AND process_completed_at IS NOT NULL
                       AND process_completed_at < ?3
                     ORDER BY process_completed_at",
                )
                .context("Failed to prepare claim query")?;

            let rows = stmt
                .query_map(
                    params![TaskState::Failed.as_str(), max_retries, stamp(cutoff)],
                    |row| {
                        let id: i64 = row.get(0)?;
                        let file_key: String = row.get(1)?;
                        let retry_count: u32 = row.get(2)?;
                        Ok((id, file_key, retry_count))
                    },
                )
                .context("Failed to query retryable tasks")?;

            let mut claimed = Vec::new();
            for row in rows {
                let (id, file_key, retry_count) = row?;
                tx.execute(
                    "UPDATE tasks SET retry_count = retry_count + 1 WHERE id = ?1",
                    params![id],
                )
                .context("Failed to increment retry count")?;
                claimed.push(ClaimedTask {
                    file_key,
                    retry_count: retry_count + 1,
                });
            }
            claimed
        };

        tx.commit().context("Failed to commit claim")?;
        Ok(claimed)
    }

    fn keys_for_user(&self, user_id: &str) -> Result<Vec<String>> {
        let conn = self.db.conn()?;
        let mut stmt = conn
            .prepare("SELECT file_key FROM tasks WHERE created_by_user_id = ?1 ORDER BY id")
            .context("Failed to prepare user keys query")?;
        let rows = stmt
            .query_map(params![user_id], |row| row.get(0))
            .context("Failed to query user keys")?;
        let mut keys = Vec::new();
        for row in rows {
            keys.push(row?);
        }
        Ok(keys)
    }

    fn all_keys(&self) -> Result<Vec<String>> {
        let conn = self.db.conn()?;
        let mut stmt = conn
            .prepare("SELECT file_key FROM tasks ORDER BY id")
            .context("Failed to prepare keys query")?;
        let rows = stmt
            .query_map([], |row| row.get(0))
            .context("Failed to query keys")?;
        let mut keys = Vec::new();
        for row in rows {
            keys.push(row?);
        }
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn setup_store() -> (tempfile::TempDir, SqliteTaskStore) {
        let dir = tempfile::TempDir::new().unwrap();
        let db = Database::new(dir.path().join("test.db")).unwrap();
        (dir, SqliteTaskStore::new(db))
    }

    fn meta() -> TaskMetadata {
        TaskMetadata {
            user_id: "user-1".to_string(),
            bot_type: "zoom".to_string(),
            execution_id: "exec-1".to_string(),
            meeting_title: Some("Standup".to_string()),
        }
    }

    fn utterance(speaker: &str, start_ms: i64, text: &str) -> Utterance {
        Utterance {
            speaker: speaker.to_string(),
            start_ms,
            end_ms: start_ms + 1000,
            text: text.to_string(),
        }
    }

    #[test]
    fn test_upsert_received_creates_once() {
        let (_dir, store) = setup_store();
        store.upsert_received("raw_combined/a.tar").unwrap();
        store.upsert_received("raw_combined/a.tar").unwrap();

        let task = store.get("raw_combined/a.tar").unwrap().unwrap();
        assert_eq!(task.status, TaskState::Received);
        assert_eq!(task.retry_count, 0);
    }

    #[test]
    fn test_mark_processing_records_metadata() {
        let (_dir, store) = setup_store();
        store.upsert_received("k.tar").unwrap();
        store.mark_processing("k.tar", &meta(), Utc::now()).unwrap();

        let task = store.get("k.tar").unwrap().unwrap();
        assert_eq!(task.status, TaskState::Processing);
        assert_eq!(task.created_by_user_id.as_deref(), Some("user-1"));
        assert_eq!(task.bot_type.as_deref(), Some("zoom"));
        assert_eq!(task.execution_id.as_deref(), Some("exec-1"));
        assert!(task.process_started_at.is_some());
    }

    #[test]
    fn test_processed_clears_error() {
        let (_dir, store) = setup_store();
        store.upsert_received("k.tar").unwrap();
        store.mark_failed("k.tar", "boom", Utc::now()).unwrap();
        assert_eq!(
            store.get("k.tar").unwrap().unwrap().last_error.as_deref(),
            Some("boom")
        );

        store.mark_processing("k.tar", &meta(), Utc::now()).unwrap();
        store
            .mark_processed("k.tar", Utc::now(), &CompletionDetails::default())
            .unwrap();

        let task = store.get("k.tar").unwrap().unwrap();
        assert_eq!(task.status, TaskState::Processed);
        assert!(task.last_error.is_none());
        assert!(task.process_completed_at.is_some());
    }

    #[test]
    fn test_mark_failed_missing_row_is_noop() {
        let (_dir, store) = setup_store();
        store.mark_failed("nothing.tar", "boom", Utc::now()).unwrap();
        assert!(store.get("nothing.tar").unwrap().is_none());
    }

    #[test]
    fn test_replace_segments_is_full_replacement() {
        let (_dir, store) = setup_store();
        store.upsert_received("k.tar").unwrap();

        store
            .replace_segments(
                "k.tar",
                &[utterance("Alice", 0, "hello"), utterance("Bob", 2000, "hi")],
            )
            .unwrap();
        assert_eq!(store.segments_for("k.tar").unwrap().len(), 2);

        store
            .replace_segments("k.tar", &[utterance("Carol", 500, "rerun")])
            .unwrap();

        let segments = store.segments_for("k.tar").unwrap();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].speaker, "Carol");
    }

    #[test]
    fn test_replace_segments_identical_rerun_yields_identical_set() {
        let (_dir, store) = setup_store();
        store.upsert_received("k.tar").unwrap();

        let utterances = vec![utterance("Alice", 0, "hello"), utterance("Bob", 2000, "hi")];
        store.replace_segments("k.tar", &utterances).unwrap();
        let first: Vec<_> = store
            .segments_for("k.tar")
            .unwrap()
            .into_iter()
            .map(|s| (s.speaker, s.start_ms, s.end_ms, s.text))
            .collect();

        store.replace_segments("k.tar", &utterances).unwrap();
        let second: Vec<_> = store
            .segments_for("k.tar")
            .unwrap()
            .into_iter()
            .map(|s| (s.speaker, s.start_ms, s.end_ms, s.text))
            .collect();

        assert_eq!(first, second);
    }

    #[test]
    fn test_claim_respects_cooldown() {
        let (_dir, store) = setup_store();
        store.upsert_received("recent.tar").unwrap();
        store.upsert_received("stale.tar").unwrap();

        let now = Utc::now();
        store.mark_failed("recent.tar", "boom", now).unwrap();
        store
            .mark_failed("stale.tar", "boom", now - Duration::minutes(10))
            .unwrap();

        let cutoff = now - Duration::minutes(5);
        let claimed = store.claim_retryable(cutoff, 4).unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].file_key, "stale.tar");
        assert_eq!(claimed[0].retry_count, 1);
    }

    #[test]
    fn test_claim_increments_persisted_count() {
        let (_dir, store) = setup_store();
        store.upsert_received("k.tar").unwrap();
        let long_ago = Utc::now() - Duration::hours(1);
        store.mark_failed("k.tar", "boom", long_ago).unwrap();

        store.claim_retryable(Utc::now(), 4).unwrap();
        assert_eq!(store.get("k.tar").unwrap().unwrap().retry_count, 1);

        store.claim_retryable(Utc::now(), 4).unwrap();
        assert_eq!(store.get("k.tar").unwrap().unwrap().retry_count, 2);
    }

    #[test]
    fn test_claim_excludes_exhausted_tasks() {
        let (_dir, store) = setup_store();
        store.upsert_received("k.tar").unwrap();
        let long_ago = Utc::now() - Duration::hours(1);
        store.mark_failed("k.tar", "boom", long_ago).unwrap();

        for expected in 1..=4u32 {
            let claimed = store.claim_retryable(Utc::now(), 4).unwrap();
            assert_eq!(claimed.len(), 1);
            assert_eq!(claimed[0].retry_count, expected);
            // Failed again after each attempt.
            store.mark_failed("k.tar", "boom", long_ago).unwrap();
        }

        // Budget exhausted: no further claims.
        assert!(store.claim_retryable(Utc::now(), 4).unwrap().is_empty());
        assert_eq!(store.get("k.tar").unwrap().unwrap().retry_count, 4);
    }

    #[test]
    fn test_claim_ignores_non_failed_tasks() {
        let (_dir, store) = setup_store();
        store.upsert_received("k.tar").unwrap();
        store.mark_processing("k.tar", &meta(), Utc::now()).unwrap();

        assert!(store.claim_retryable(Utc::now(), 4).unwrap().is_empty());
    }

    #[test]
    fn test_keys_for_user_and_all_keys() {
        let (_dir, store) = setup_store();
        for key in ["a.tar", "b.tar", "c.tar"] {
            store.upsert_received(key).unwrap();
        }
        store.mark_processing("a.tar", &meta(), Utc::now()).unwrap();

        assert_eq!(store.keys_for_user("user-1").unwrap(), vec!["a.tar"]);
        assert_eq!(store.all_keys().unwrap().len(), 3);
    }
}
